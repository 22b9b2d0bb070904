//! In-memory backend implementation
//!
//! Suitable for tests, development, and servers whose state is allowed to
//! disappear (optionally persisted to a JSON file on shutdown).
//!
//! Container storage sits behind one `tokio` lock. A [`CommitUnit`] takes that
//! lock exclusively for the whole commit and writes in place, keeping an undo
//! log that is replayed if the unit is dropped before [`CommitUnit::commit`].
//! Readers never see a partial commit because they wait on the same lock.
//!
//! Staged chunks are dropped once their transaction is committed or failed.

mod persistence;
mod unit;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::Result;
use crate::backend::errors::BackendError;
use crate::backend::{
    AccountRow, Backend, CommitOutcome, CommitUnit, NewMessage, StagedChunk, StoredRecord,
    TransactionRow, TransactionState,
};
use crate::crypto::SealedKey;
use crate::protocol::{AccountId, Message, TransactionId};

use unit::InMemoryUnit;

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Accounts {
    by_id: HashMap<AccountId, AccountRow>,
    by_username: HashMap<String, AccountId>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(crate) struct Transactions {
    rows: HashMap<TransactionId, TransactionRow>,
    chunks: HashMap<TransactionId, Vec<StagedChunk>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ContainerEntry {
    owner: AccountId,
    created_time: u64,
}

/// Everything a commit may touch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ContainerTables {
    containers: HashMap<String, ContainerEntry>,
    /// container -> recipient -> envelope
    session_keys: HashMap<String, BTreeMap<AccountId, SealedKey>>,
    /// container -> index -> record
    records: HashMap<String, BTreeMap<i64, StoredRecord>>,
}

/// A simple in-memory backend.
#[derive(Debug, Default)]
pub struct InMemory {
    accounts: Arc<RwLock<Accounts>>,
    transactions: Arc<RwLock<Transactions>>,
    containers: Arc<RwLock<ContainerTables>>,
    messages: RwLock<Vec<NewMessage>>,
}

impl InMemory {
    /// Creates a new, empty `InMemory` backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Saves the entire state to `path` as JSON.
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        persistence::save_to_file(self, path).await
    }

    /// Loads state from a JSON file written by [`InMemory::save_to_file`].
    ///
    /// A missing file yields an empty backend.
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        persistence::load_from_file(path).await
    }

    /// Number of stored records for a container.
    pub async fn record_count(&self, container: &str) -> usize {
        self.containers
            .read()
            .await
            .records
            .get(container)
            .map(BTreeMap::len)
            .unwrap_or(0)
    }
}

fn transaction_not_found(id: TransactionId) -> crate::Error {
    BackendError::NotFound {
        entity: "Transaction",
        id: id.to_string(),
    }
    .into()
}

#[async_trait]
impl Backend for InMemory {
    async fn insert_account(&self, account: &AccountRow) -> Result<()> {
        let mut accounts = self.accounts.write().await;
        if accounts.by_username.contains_key(&account.username) {
            return Err(BackendError::Constraint {
                reason: format!("username '{}' is taken", account.username),
            }
            .into());
        }
        accounts
            .by_username
            .insert(account.username.clone(), account.id);
        accounts.by_id.insert(account.id, account.clone());
        Ok(())
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<AccountRow>> {
        let accounts = self.accounts.read().await;
        Ok(accounts
            .by_username
            .get(username)
            .and_then(|id| accounts.by_id.get(id))
            .cloned())
    }

    async fn account_by_id(&self, id: AccountId) -> Result<Option<AccountRow>> {
        Ok(self.accounts.read().await.by_id.get(&id).cloned())
    }

    async fn insert_transaction(&self, transaction: &TransactionRow) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        if transactions.rows.contains_key(&transaction.id) {
            return Err(BackendError::Constraint {
                reason: format!("transaction {} already exists", transaction.id),
            }
            .into());
        }
        transactions
            .rows
            .insert(transaction.id, transaction.clone());
        Ok(())
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<TransactionRow>> {
        Ok(self.transactions.read().await.rows.get(&id).cloned())
    }

    async fn append_chunk(&self, id: TransactionId, staged: &StagedChunk) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        let row = transactions
            .rows
            .get(&id)
            .ok_or_else(|| transaction_not_found(id))?;
        if row.state != TransactionState::Open {
            return Ok(false);
        }
        transactions
            .chunks
            .entry(id)
            .or_default()
            .push(staged.clone());
        Ok(true)
    }

    async fn chunks(&self, id: TransactionId) -> Result<Vec<StagedChunk>> {
        let transactions = self.transactions.read().await;
        if !transactions.rows.contains_key(&id) {
            return Err(transaction_not_found(id));
        }
        Ok(transactions.chunks.get(&id).cloned().unwrap_or_default())
    }

    async fn request_commit(&self, id: TransactionId, now: u64) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        let row = transactions
            .rows
            .get_mut(&id)
            .ok_or_else(|| transaction_not_found(id))?;
        if row.state != TransactionState::Open {
            return Ok(false);
        }
        row.state = TransactionState::CommitRequested;
        row.commit_request_time = Some(now);
        Ok(true)
    }

    async fn pending_commits(&self) -> Result<Vec<TransactionRow>> {
        let transactions = self.transactions.read().await;
        let mut pending: Vec<TransactionRow> = transactions
            .rows
            .values()
            .filter(|row| {
                row.state == TransactionState::CommitRequested
                    && row.commit_request_time.is_some()
                    && row.commit_start_time.is_none()
            })
            .cloned()
            .collect();
        pending.sort_by_key(|row| (row.commit_request_time, row.created_time));
        Ok(pending)
    }

    async fn claim_commit(&self, id: TransactionId, now: u64) -> Result<bool> {
        let mut transactions = self.transactions.write().await;
        let row = transactions
            .rows
            .get_mut(&id)
            .ok_or_else(|| transaction_not_found(id))?;
        if row.state != TransactionState::CommitRequested || row.commit_start_time.is_some() {
            return Ok(false);
        }
        row.state = TransactionState::Committing;
        row.commit_start_time = Some(now);
        Ok(true)
    }

    async fn release_commit(
        &self,
        id: TransactionId,
        outcome: &CommitOutcome,
        now: u64,
    ) -> Result<()> {
        let mut transactions = self.transactions.write().await;
        let row = transactions
            .rows
            .get_mut(&id)
            .ok_or_else(|| transaction_not_found(id))?;
        row.attempts += 1;
        match outcome {
            CommitOutcome::Retry(failure) => {
                row.state = TransactionState::CommitRequested;
                row.commit_start_time = None;
                row.failure = Some(failure.clone());
            }
            CommitOutcome::Failed(failure) => {
                row.state = TransactionState::Failed;
                row.commit_finish_time = Some(now);
                row.failure = Some(failure.clone());
                transactions.chunks.remove(&id);
            }
        }
        Ok(())
    }

    async fn begin_commit(&self) -> Result<Box<dyn CommitUnit>> {
        let guard = self.containers.clone().write_owned().await;
        Ok(Box::new(InMemoryUnit::new(
            guard,
            self.accounts.clone(),
            self.transactions.clone(),
        )))
    }

    async fn records_after(&self, container: &str, after: i64) -> Result<Vec<StoredRecord>> {
        let tables = self.containers.read().await;
        Ok(tables
            .records
            .get(container)
            .map(|records| {
                records
                    .range(after.saturating_add(1)..)
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn container_owner(&self, container: &str) -> Result<Option<AccountId>> {
        Ok(self
            .containers
            .read()
            .await
            .containers
            .get(container)
            .map(|entry| entry.owner))
    }

    async fn session_key(&self, container: &str, account: AccountId) -> Result<Option<SealedKey>> {
        Ok(self
            .containers
            .read()
            .await
            .session_keys
            .get(container)
            .and_then(|keys| keys.get(&account))
            .cloned())
    }

    async fn key_holders(&self, container: &str) -> Result<Vec<AccountId>> {
        Ok(self
            .containers
            .read()
            .await
            .session_keys
            .get(container)
            .map(|keys| keys.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        self.messages.write().await.push(message.clone());
        Ok(())
    }

    async fn messages_for(&self, account: AccountId) -> Result<Vec<Message>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .filter(|message| message.to_account == account)
            .map(NewMessage::to_message)
            .collect())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
