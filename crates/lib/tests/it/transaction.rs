use std::time::Duration;

use serde_json::json;
use vaultsync::{
    Error, ErrorKind,
    account::challenge_key,
    backend::{CommitOutcome, Failure, StagedChunk, TransactionRow, TransactionState},
    container::Container,
    crypto::{Ciphertext, encode_base64},
    protocol::{AccountId, ChallengeAnswer, SignedPayload, TransactionId, TransactionStatus},
    session::Session,
    transaction::{Chunk, TransactionError},
};

use crate::helpers::{register, test_backend, test_config, test_server};

fn record(container: &str, index: i64) -> Chunk {
    Chunk::AddContainerRecord {
        container_name_hmac: container.to_string(),
        record_index: index,
        payload: SignedPayload {
            ciphertext: Ciphertext::from_bytes(vec![index as u8; 16]),
            signature: "c2lnbmF0dXJl".to_string(),
        },
    }
}

/// Stage `chunks` in a new transaction and request its commit.
async fn submit(session: &Session, chunks: &[Chunk]) -> vaultsync::Result<()> {
    let connection = session.connection();
    let id = connection.create_transaction().await?;
    for chunk in chunks {
        connection.stage(id, chunk).await?;
    }
    connection.commit(id, &test_config()).await
}

#[tokio::test]
async fn same_index_commits_exactly_once() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let notes = Container::create(&alice, "notes").await.unwrap();
    let name = notes.public_name();

    let (a, b) = ([record(name, 2)], [record(name, 2)]);
    let (first, second) = tokio::join!(submit(&alice, &a), submit(&alice, &b));
    let results = [first, second];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    let err = results.into_iter().find_map(Result::err).unwrap();
    assert!(err.is_constraint_violation(), "{err:?}");

    let stored = alice.connection().records(name, 0).await.unwrap();
    assert_eq!(
        stored.iter().map(|r| r.index).collect::<Vec<_>>(),
        vec![1, 2]
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn failing_chunk_rolls_back_the_whole_transaction() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let notes = Container::create(&alice, "notes").await.unwrap();
    let name = notes.public_name();

    let err = submit(&alice, &[record(name, 2), record(name, 2)])
        .await
        .unwrap_err();
    assert!(err.is_constraint_violation());

    let stored = alice.connection().records(name, 1).await.unwrap();
    assert!(stored.is_empty());

    // The index is still free for the next transaction
    submit(&alice, &[record(name, 2)]).await.unwrap();

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn only_the_owner_can_append() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let bob = register(&server, "bob").await;
    let notes = Container::create(&alice, "notes").await.unwrap();

    let err = submit(&bob, &[record(notes.public_name(), 2)])
        .await
        .unwrap_err();
    assert!(err.is_authorization_error());

    let err = submit(&bob, &[record("no-such-container", 1)])
        .await
        .unwrap_err();
    assert!(err.is_validation_error());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn transactions_belong_to_their_account() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let bob = register(&server, "bob").await;

    let id = alice.connection().create_transaction().await.unwrap();
    let err = bob
        .connection()
        .stage(id, &record("x", 1))
        .await
        .unwrap_err();
    assert!(err.is_authorization_error());
    assert!(
        bob.connection()
            .transaction_status(id)
            .await
            .unwrap_err()
            .is_authorization_error()
    );
    assert_eq!(
        alice.connection().transaction_status(id).await.unwrap(),
        TransactionStatus::Open
    );

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn staging_after_commit_request_is_rejected() {
    let server = test_server().await;
    let alice = register(&server, "alice").await;
    let connection = alice.connection();

    let id = connection.create_transaction().await.unwrap();
    connection
        .stage(
            id,
            &Chunk::AddContainer {
                container_name_hmac: "raw".to_string(),
            },
        )
        .await
        .unwrap();
    connection.request_commit(id).await.unwrap();

    let err = connection.stage(id, &record("raw", 1)).await.unwrap_err();
    assert!(matches!(
        err,
        Error::Transaction(TransactionError::NotOpen { .. })
    ));
    assert!(connection.request_commit(id).await.is_err());

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_chunk_type_is_rejected_before_any_write() {
    let server = test_server().await;
    register(&server, "alice").await;

    let challenge = server.challenge("alice").await.unwrap();
    let key = challenge_key("pw", &challenge.challenge_key_salt, &test_config().hashing).unwrap();
    let grant = server
        .answer(
            "alice",
            &ChallengeAnswer {
                challenge_key: encode_base64(key.as_bytes()),
            },
        )
        .await
        .unwrap();
    let session = grant.session_id;

    let id = server.open_transaction(&session).await.unwrap();
    let err = server
        .stage_json(
            &session,
            id,
            json!({"type": "dropTables", "containerNameHmac": "x"}),
        )
        .await
        .unwrap_err();
    assert!(err.is_validation_error());
    assert!(matches!(
        err,
        Error::Transaction(TransactionError::InvalidTransactionType { ref kind }) if kind == "dropTables"
    ));

    // Nothing was staged, so the commit succeeds without writing
    server.request_commit(&session, id).await.unwrap();
    let status = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let status = server.transaction_status(&session, id).await.unwrap();
            if status.is_terminal() {
                break status;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(status, TransactionStatus::Committed);

    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn backend_refuses_chunks_once_commit_is_requested() {
    let backend = test_backend().await;
    let account = AccountId::generate();
    let row = TransactionRow::open(account, 1);
    backend.insert_transaction(&row).await.unwrap();

    let staged = StagedChunk {
        account_id: account,
        chunk: record("late", 1),
    };
    assert!(backend.append_chunk(row.id, &staged).await.unwrap());
    assert!(backend.request_commit(row.id, 2).await.unwrap());

    assert!(!backend.append_chunk(row.id, &staged).await.unwrap());
    assert_eq!(backend.chunks(row.id).await.unwrap(), vec![staged.clone()]);

    let err = backend
        .append_chunk(TransactionId::generate(), &staged)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn finalized_transactions_drop_their_chunks() {
    let backend = test_backend().await;
    let account = AccountId::generate();
    let staged = StagedChunk {
        account_id: account,
        chunk: record("pruned", 1),
    };

    let committed = TransactionRow::open(account, 1);
    let failed = TransactionRow::open(account, 1);
    for row in [&committed, &failed] {
        backend.insert_transaction(row).await.unwrap();
        assert!(backend.append_chunk(row.id, &staged).await.unwrap());
        assert!(backend.request_commit(row.id, 2).await.unwrap());
        assert!(backend.claim_commit(row.id, 3).await.unwrap());
    }

    let mut unit = backend.begin_commit().await.unwrap();
    unit.mark_committed(committed.id, 4).await.unwrap();
    unit.commit().await.unwrap();

    let failure = Failure {
        kind: ErrorKind::Constraint,
        reason: "duplicate".to_string(),
    };
    backend
        .release_commit(failed.id, &CommitOutcome::Failed(failure), 4)
        .await
        .unwrap();

    for row in [&committed, &failed] {
        assert!(backend.chunks(row.id).await.unwrap().is_empty());
    }
    assert_eq!(
        backend.transaction(committed.id).await.unwrap().unwrap().state,
        TransactionState::Committed
    );
    assert_eq!(
        backend.transaction(failed.id).await.unwrap().unwrap().state,
        TransactionState::Failed
    );
}
