//! Persistence operations for the in-memory backend
//!
//! Saves and loads the complete state as one JSON document.

use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::RwLock;

use super::{Accounts, ContainerTables, InMemory, Transactions};
use crate::backend::NewMessage;
use crate::backend::errors::BackendError;
use crate::{Error, Result};

/// The current persistence file format version.
/// v0 indicates this is an unstable format subject to breaking changes.
const PERSISTENCE_VERSION: u8 = 0;

/// Validates the persistence version during deserialization.
fn validate_persistence_version<'de, D>(deserializer: D) -> std::result::Result<u8, D::Error>
where
    D: Deserializer<'de>,
{
    let version = u8::deserialize(deserializer)?;
    if version != PERSISTENCE_VERSION {
        return Err(serde::de::Error::custom(format!(
            "unsupported persistence version {version}; only version {PERSISTENCE_VERSION} is supported"
        )));
    }
    Ok(version)
}

#[derive(Deserialize)]
struct SerializableState {
    #[serde(
        rename = "_v",
        default,
        deserialize_with = "validate_persistence_version"
    )]
    version: u8,
    #[serde(default)]
    accounts: Accounts,
    #[serde(default)]
    transactions: Transactions,
    #[serde(default)]
    containers: ContainerTables,
    #[serde(default)]
    messages: Vec<NewMessage>,
}

/// Write the backend's state to `path`.
///
/// Each table is locked in turn, so a save taken while commits are running
/// may land between two commits but never inside one.
pub(crate) async fn save_to_file<P: AsRef<Path>>(backend: &InMemory, path: P) -> Result<()> {
    let json = {
        let accounts = backend.accounts.read().await;
        let transactions = backend.transactions.read().await;
        let containers = backend.containers.read().await;
        let messages = backend.messages.read().await;

        #[derive(Serialize)]
        struct Borrowed<'a> {
            accounts: &'a Accounts,
            transactions: &'a Transactions,
            containers: &'a ContainerTables,
            messages: &'a Vec<NewMessage>,
        }

        serde_json::to_string_pretty(&Borrowed {
            accounts: &accounts,
            transactions: &transactions,
            containers: &containers,
            messages: &messages,
        })
        .map_err(|e| -> Error {
            BackendError::Storage {
                reason: format!("failed to serialize state: {e}"),
            }
            .into()
        })?
    };

    tokio::fs::write(path, json).await.map_err(Error::from)
}

/// Load state from `path`; a missing file gives an empty backend.
pub(crate) async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<InMemory> {
    match tokio::fs::read_to_string(path).await {
        Ok(json) => {
            let state: SerializableState = serde_json::from_str(&json).map_err(|e| -> Error {
                BackendError::Corrupt {
                    reason: format!("failed to parse saved state: {e}"),
                }
                .into()
            })?;
            tracing::debug!(version = state.version, "Loaded in-memory state");
            Ok(InMemory {
                accounts: RwLock::new(state.accounts).into(),
                transactions: RwLock::new(state.transactions).into(),
                containers: RwLock::new(state.containers).into(),
                messages: RwLock::new(state.messages),
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(InMemory::new()),
        Err(e) => Err(e.into()),
    }
}
