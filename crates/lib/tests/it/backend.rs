use std::sync::Arc;

use serde_json::json;
use vaultsync::{backend::database::InMemory, container::Container, server::Server};

use crate::helpers::{login, register, test_config};

/// Write a container through `server`, then shut it down.
async fn populate(server: &Server) -> Container {
    server.start().await;
    let alice = register(server, "alice").await;
    let mut notes = Container::create(&alice, "notes").await.unwrap();
    notes.add("a").unwrap();
    notes.set("a", json!({"title": "groceries"})).unwrap();
    notes.save().await.unwrap();
    server.shutdown().await.unwrap();
    notes
}

/// Log back in through `server` and check the container survived.
async fn verify(server: &Server, expected: &Container) {
    server.start().await;
    let alice = login(server, "alice").await;
    let notes = Container::load(&alice, "notes").await.unwrap();
    assert_eq!(notes.snapshot(), expected.snapshot());
    assert_eq!(notes.record_index(), expected.record_index());
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn in_memory_state_survives_a_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vaultsync.json");

    let backend = Arc::new(InMemory::new());
    let written = populate(&Server::new(backend.clone(), test_config())).await;
    backend.save_to_file(&path).await.unwrap();

    let reloaded = Arc::new(InMemory::load_from_file(&path).await.unwrap());
    assert_eq!(reloaded.record_count(written.public_name()).await, 2);
    verify(&Server::new(reloaded, test_config()), &written).await;
}

#[tokio::test]
async fn missing_file_loads_an_empty_backend() {
    let dir = tempfile::tempdir().unwrap();
    let backend = InMemory::load_from_file(dir.path().join("absent.json"))
        .await
        .unwrap();
    assert_eq!(backend.record_count("anything").await, 0);
}

#[cfg(feature = "sqlite")]
#[tokio::test]
async fn sqlite_file_survives_reopen() {
    use vaultsync::backend::database::SqlxBackend;

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vaultsync.db");

    let backend = Arc::new(SqlxBackend::open_sqlite(&path).await.unwrap());
    let written = populate(&Server::new(backend.clone(), test_config())).await;
    backend.close().await;

    let reopened = Arc::new(SqlxBackend::open_sqlite(&path).await.unwrap());
    assert!(reopened.is_sqlite());
    verify(&Server::new(reopened.clone(), test_config()), &written).await;
    reopened.close().await;
}
