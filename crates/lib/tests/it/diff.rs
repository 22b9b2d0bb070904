use serde_json::{Value, json};
use vaultsync::diff::{self, DiffError, Snapshot};

fn snapshot(pairs: &[(&str, Value)]) -> Snapshot {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

fn samples() -> Vec<Snapshot> {
    vec![
        Snapshot::new(),
        snapshot(&[("a", json!("1"))]),
        snapshot(&[("a", json!("2")), ("b", json!({"nested": [1, 2]}))]),
        snapshot(&[("b", json!({"nested": [1, 2, 3]})), ("c", json!(null))]),
        snapshot(&[("z", json!(true)), ("a", json!({}))]),
    ]
}

#[test]
fn apply_create_round_trips_between_all_samples() {
    for a in samples() {
        for b in samples() {
            let delta = diff::create(&a, &b);
            assert_eq!(diff::apply(&delta, &a).unwrap(), b, "{a:?} -> {b:?}");
            assert_eq!(diff::apply(&delta.reverse(), &b).unwrap(), a, "{b:?} -> {a:?}");
            assert_eq!(delta.is_empty(), a == b);
        }
    }
}

#[test]
fn diff_from_empty_is_compact_full_state() {
    for s in samples() {
        let delta = diff::create(&Snapshot::new(), &s);
        assert!(delta.is_compact());
        assert_eq!(delta.added().len(), s.len());
    }
    let partial = diff::create(&samples()[1], &samples()[2]);
    assert!(!partial.is_compact());
}

#[test]
fn apply_rejects_mismatched_base() {
    let old = snapshot(&[("a", json!("1"))]);
    let new = snapshot(&[("a", json!("2"))]);
    let change = diff::create(&old, &new);
    assert_eq!(
        diff::apply(&change, &Snapshot::new()).unwrap_err(),
        DiffError::MissingKey {
            key: "a".to_string()
        }
    );

    let add = diff::create(&Snapshot::new(), &old);
    let err = diff::apply(&add, &old).unwrap_err();
    assert_eq!(err.key(), "a");
}

#[test]
fn wire_form_omits_empty_sections() {
    let delta = diff::create(&Snapshot::new(), &snapshot(&[("a", json!("1"))]));
    assert_eq!(
        serde_json::to_value(&delta).unwrap(),
        json!({"added": {"a": "1"}})
    );
}
