//! Reversible deltas between key-value snapshots.
//!
//! A [`Diff`] records which keys were added, removed or changed between two
//! [`Snapshot`]s. Removed and changed entries keep the old value, so every diff
//! can be [reversed](Diff::reverse). Applying is strict: a diff only applies to
//! a base that actually has the shape the diff was computed against.
//!
//! ```
//! use serde_json::json;
//! use vaultsync::diff::{self, Snapshot};
//!
//! let old: Snapshot = [("a".to_string(), json!("1"))].into();
//! let new: Snapshot = [("a".to_string(), json!("2")), ("b".to_string(), json!({}))].into();
//!
//! let delta = diff::create(&old, &new);
//! assert_eq!(diff::apply(&delta, &old).unwrap(), new);
//! assert_eq!(diff::apply(&delta.reverse(), &new).unwrap(), old);
//! ```

mod errors;

pub use errors::DiffError;

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The full state of a container at one version.
pub type Snapshot = BTreeMap<String, Value>;

/// Old and new value of a key present on both sides of a diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Change {
    pub old: Value,
    pub new: Value,
}

/// A reversible delta between two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Diff {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    added: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    removed: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    changed: BTreeMap<String, Change>,
}

impl Diff {
    /// Keys introduced by this diff, with their values.
    pub fn added(&self) -> &BTreeMap<String, Value> {
        &self.added
    }

    /// Keys dropped by this diff, with the values they had.
    pub fn removed(&self) -> &BTreeMap<String, Value> {
        &self.removed
    }

    /// Keys whose value changed.
    pub fn changed(&self) -> &BTreeMap<String, Change> {
        &self.changed
    }

    /// True when applying the diff would be a no-op.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }

    /// Number of keys touched.
    pub fn len(&self) -> usize {
        self.added.len() + self.removed.len() + self.changed.len()
    }

    /// True when the diff only adds keys, i.e. it expresses a full state and
    /// applies to the empty snapshot.
    pub fn is_compact(&self) -> bool {
        self.removed.is_empty() && self.changed.is_empty()
    }

    /// The diff that undoes this one.
    pub fn reverse(&self) -> Diff {
        Diff {
            added: self.removed.clone(),
            removed: self.added.clone(),
            changed: self
                .changed
                .iter()
                .map(|(key, change)| {
                    (
                        key.clone(),
                        Change {
                            old: change.new.clone(),
                            new: change.old.clone(),
                        },
                    )
                })
                .collect(),
        }
    }
}

/// Compute the delta that turns `old` into `new`.
pub fn create(old: &Snapshot, new: &Snapshot) -> Diff {
    let mut diff = Diff::default();

    for (key, new_value) in new {
        match old.get(key) {
            None => {
                diff.added.insert(key.clone(), new_value.clone());
            }
            Some(old_value) if old_value != new_value => {
                diff.changed.insert(
                    key.clone(),
                    Change {
                        old: old_value.clone(),
                        new: new_value.clone(),
                    },
                );
            }
            Some(_) => {}
        }
    }

    for (key, old_value) in old {
        if !new.contains_key(key) {
            diff.removed.insert(key.clone(), old_value.clone());
        }
    }

    diff
}

/// Apply `diff` to `base`, returning the resulting snapshot.
///
/// `base` is left untouched; on error no partial result escapes.
pub fn apply(diff: &Diff, base: &Snapshot) -> Result<Snapshot, DiffError> {
    let mut result = base.clone();

    for key in diff.removed.keys() {
        if result.remove(key).is_none() {
            return Err(DiffError::MissingKey { key: key.clone() });
        }
    }

    for (key, change) in &diff.changed {
        match result.get_mut(key) {
            Some(value) => *value = change.new.clone(),
            None => return Err(DiffError::MissingKey { key: key.clone() }),
        }
    }

    for (key, value) in &diff.added {
        if result.contains_key(key) {
            return Err(DiffError::KeyExists { key: key.clone() });
        }
        result.insert(key.clone(), value.clone());
    }

    Ok(result)
}
