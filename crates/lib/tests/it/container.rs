use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value, json};
use vaultsync::{
    Error, Result,
    connection::Connection,
    container::{CONTAINER_SHARE_MESSAGE, Container, ContainerError},
    diff::Snapshot,
    protocol::{
        AccountId, AccountRegistration, ChallengeAnswer, ChallengeInfo, Message, MessageId,
        PeerInfo, Record, TransactionId, TransactionStatus,
    },
    session::Session,
    transaction::Chunk,
};

use crate::helpers::{connect, login, register, test_config, test_server};

/// Connection that hides one record index from every fetch.
struct DroppingConnection {
    inner: Arc<dyn Connection>,
    dropped: i64,
}

#[async_trait]
impl Connection for DroppingConnection {
    async fn register(&self, registration: &AccountRegistration) -> Result<AccountId> {
        self.inner.register(registration).await
    }

    async fn challenge(&self, username: &str) -> Result<ChallengeInfo> {
        self.inner.challenge(username).await
    }

    async fn answer(&self, username: &str, answer: &ChallengeAnswer) -> Result<AccountId> {
        self.inner.answer(username, answer).await
    }

    async fn create_transaction(&self) -> Result<TransactionId> {
        self.inner.create_transaction().await
    }

    async fn stage(&self, id: TransactionId, chunk: &Chunk) -> Result<()> {
        self.inner.stage(id, chunk).await
    }

    async fn request_commit(&self, id: TransactionId) -> Result<()> {
        self.inner.request_commit(id).await
    }

    async fn transaction_status(&self, id: TransactionId) -> Result<TransactionStatus> {
        self.inner.transaction_status(id).await
    }

    async fn records(&self, container_name_hmac: &str, after: i64) -> Result<Vec<Record>> {
        let mut records = self.inner.records(container_name_hmac, after).await?;
        records.retain(|record| record.index != self.dropped);
        Ok(records)
    }

    async fn peer(&self, username: &str) -> Result<PeerInfo> {
        self.inner.peer(username).await
    }

    async fn send_message(&self, to_username: &str, headers: Value, body: Value) -> Result<MessageId> {
        self.inner.send_message(to_username, headers, body).await
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        self.inner.messages().await
    }
}

async fn put(container: &mut Container, key: &str, value: &str) {
    if container.get(key).is_err() {
        container.add(key).unwrap();
    }
    container.set(key, value).unwrap();
    container.save().await.unwrap();
}

#[tokio::test]
async fn notes_scenario_replays_on_a_fresh_client() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;

    let mut notes = Container::create(&alice, "notes").await.unwrap();
    assert!(notes.snapshot().is_empty());

    notes.add("a").unwrap();
    notes.set("a", "1").unwrap();
    let pending = notes.diff();
    assert_eq!(pending.added().get("a"), Some(&json!("1")));
    let v1 = notes.save().await.unwrap();

    notes.add("b").unwrap();
    notes.set("b", "2").unwrap();
    let pending = notes.diff();
    assert_eq!(pending.added().len(), 1);
    assert_eq!(pending.added().get("b"), Some(&json!("2")));
    let v2 = notes.save().await.unwrap();
    assert!(v1 < v2);

    let fresh = login(&server, "alice").await;
    let replica = Container::load(&fresh, "notes").await.unwrap();
    let expected: Snapshot = [
        ("a".to_string(), json!("1")),
        ("b".to_string(), json!("2")),
    ]
    .into();
    assert_eq!(replica.snapshot(), &expected);
    assert_eq!(replica.record_index(), notes.record_index());
    assert_eq!(replica.public_name(), notes.public_name());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn save_without_changes_adds_no_version() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let mut notes = Container::create(&alice, "notes").await.unwrap();
    put(&mut notes, "a", "1").await;

    let versions = notes.versions().len();
    let index = notes.record_index();
    let err = notes.save().await.unwrap_err();
    assert!(matches!(err, Error::Container(ContainerError::NoChange)));
    assert_eq!(notes.versions().len(), versions);
    assert_eq!(notes.record_index(), index);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn gap_in_records_fails_sync_and_keeps_state() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let mut notes = Container::create(&alice, "notes").await.unwrap();
    put(&mut notes, "a", "1").await;

    let lossy = DroppingConnection {
        inner: connect(&server),
        dropped: 3,
    };
    let reader_session = Session::login(Arc::new(lossy), "alice", "pw", test_config())
        .await
        .unwrap();
    let mut reader = Container::load(&reader_session, "notes").await.unwrap();
    assert_eq!(reader.record_index(), 2);
    let before = reader.snapshot().clone();
    let versions_before = reader.versions().len();

    put(&mut notes, "b", "2").await;
    put(&mut notes, "c", "3").await;
    assert_eq!(notes.record_index(), 4);

    let err = reader.sync().await.unwrap_err();
    assert!(err.is_ordering_error());
    assert!(matches!(
        err,
        Error::Container(ContainerError::OutOfOrder {
            expected: 3,
            found: 4
        })
    ));
    assert_eq!(reader.record_index(), 2);
    assert_eq!(reader.snapshot(), &before);
    assert_eq!(reader.versions().len(), versions_before);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn compaction_keeps_state_and_collapses_history() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let mut notes = Container::create(&alice, "notes").await.unwrap();
    for (key, value) in [("a", "1"), ("b", "2"), ("a", "3"), ("c", "4")] {
        put(&mut notes, key, value).await;
    }
    notes.remove("b").unwrap();
    notes.save().await.unwrap();

    let before = notes.snapshot().clone();
    assert_eq!(notes.record_count(), 6);

    notes.compact().await.unwrap();
    assert_eq!(notes.snapshot(), &before);
    assert_eq!(notes.record_count(), 1);
    assert_eq!(notes.versions().len(), 1);
    assert_eq!(notes.record_index(), 7);

    let stored = alice
        .connection()
        .records(notes.public_name(), 0)
        .await
        .unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].index, 7);

    // History continues after the compacted record
    put(&mut notes, "d", "5").await;
    let fresh = login(&server, "alice").await;
    let replica = Container::load(&fresh, "notes").await.unwrap();
    assert_eq!(replica.snapshot(), notes.snapshot());
    assert_eq!(replica.record_index(), 8);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn sync_carries_unsaved_changes_forward() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let mut writer = Container::create(&alice, "notes").await.unwrap();

    let other = login(&server, "alice").await;
    let mut reader = Container::load(&other, "notes").await.unwrap();
    reader.add("local").unwrap();

    put(&mut writer, "remote", "1").await;
    assert_eq!(reader.sync().await.unwrap(), 1);
    assert_eq!(reader.get("remote").unwrap(), &json!("1"));
    assert_eq!(reader.get("local").unwrap(), &json!({}));
    assert_eq!(reader.diff().added().len(), 1);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn share_lets_peer_read_but_not_write() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let bob = register(&server, "bob").await;

    let mut notes = Container::create(&alice, "notes").await.unwrap();
    put(&mut notes, "a", "1").await;

    let bob_peer = alice.peer("bob").await.unwrap();
    notes.share(&bob_peer).await.unwrap();

    let inbox = bob.connection().messages().await.unwrap();
    assert_eq!(inbox.len(), 1);
    assert_eq!(inbox[0].from_username, "alice");
    assert_eq!(inbox[0].headers["type"], CONTAINER_SHARE_MESSAGE);
    let public_name = inbox[0].body["containerNameHmac"].as_str().unwrap();
    assert_eq!(public_name, notes.public_name());

    let alice_peer = bob.peer("alice").await.unwrap();
    let mut shared = Container::load_shared(&bob, &alice_peer, public_name)
        .await
        .unwrap();
    assert_eq!(shared.snapshot(), notes.snapshot());

    put(&mut notes, "b", "2").await;
    assert_eq!(shared.sync().await.unwrap(), 1);
    assert_eq!(shared.get("b").unwrap(), &json!("2"));

    shared.set("a", "bob was here").unwrap();
    let err = shared.save().await.unwrap_err();
    assert!(err.is_authorization_error(), "{err:?}");
    assert_eq!(shared.record_index(), notes.record_index());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn shared_container_must_be_signed_by_the_claimed_owner() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let bob = register(&server, "bob").await;
    let mallory = register(&server, "mallory").await;

    let notes = Container::create(&alice, "notes").await.unwrap();
    notes.share(&alice.peer("bob").await.unwrap()).await.unwrap();

    let impostor = bob.peer("mallory").await.unwrap();
    let err = Container::load_shared(&bob, &impostor, notes.public_name())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        Error::Container(ContainerError::SessionKeyMismatch { .. })
    ));

    // Without a share there is nothing to read
    let err = Container::load(&mallory, "notes").await.unwrap_err();
    assert!(err.is_not_found());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn loading_unknown_container_is_not_found() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;

    let err = Container::load(&alice, "never-created").await.unwrap_err();
    assert!(err.is_not_found());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn watcher_hears_remote_writes() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let bob = register(&server, "bob").await;

    let mut notes = Container::create(&alice, "notes").await.unwrap();
    notes.share(&alice.peer("bob").await.unwrap()).await.unwrap();
    let shared = Container::load_shared(&bob, &bob.peer("alice").await.unwrap(), notes.public_name())
        .await
        .unwrap();

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<String>();
    shared.watch(move |name| {
        let _ = tx.send(name.to_string());
    });
    let follower = bob.follow(server.subscribe());

    put(&mut notes, "a", "1").await;
    let heard = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("watcher should be called")
        .unwrap();
    assert_eq!(heard, notes.public_name());

    assert!(shared.unwatch());
    assert!(!shared.unwatch());
    follower.abort();
    server.shutdown().await.unwrap();
}
