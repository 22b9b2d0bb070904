use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

use super::{Accounts, ContainerEntry, ContainerTables, Transactions};
use crate::Result;
use crate::backend::errors::BackendError;
use crate::backend::{CommitUnit, StoredRecord, TransactionState};
use crate::crypto::SealedKey;
use crate::protocol::{AccountId, TransactionId};

/// Reverses one write made through an [`InMemoryUnit`].
enum Undo {
    Container(String),
    SessionKey(String, AccountId),
    Record(String, i64),
    Deleted(String, BTreeMap<i64, StoredRecord>),
}

/// Holds the container lock for its whole lifetime and writes straight into
/// the tables, logging how to reverse each write. Dropping the unit without
/// committing replays the log backwards.
pub(super) struct InMemoryUnit {
    guard: OwnedRwLockWriteGuard<ContainerTables>,
    undo: Vec<Undo>,
    accounts: Arc<RwLock<Accounts>>,
    transactions: Arc<RwLock<Transactions>>,
    committed: Option<(TransactionId, u64)>,
}

impl InMemoryUnit {
    pub(super) fn new(
        guard: OwnedRwLockWriteGuard<ContainerTables>,
        accounts: Arc<RwLock<Accounts>>,
        transactions: Arc<RwLock<Transactions>>,
    ) -> Self {
        Self {
            guard,
            undo: Vec::new(),
            accounts,
            transactions,
            committed: None,
        }
    }
}

impl Drop for InMemoryUnit {
    fn drop(&mut self) {
        let tables = &mut *self.guard;
        while let Some(undo) = self.undo.pop() {
            match undo {
                Undo::Container(name) => {
                    tables.containers.remove(&name);
                }
                Undo::SessionKey(container, account) => {
                    if let Some(keys) = tables.session_keys.get_mut(&container) {
                        keys.remove(&account);
                        if keys.is_empty() {
                            tables.session_keys.remove(&container);
                        }
                    }
                }
                Undo::Record(container, index) => {
                    if let Some(records) = tables.records.get_mut(&container) {
                        records.remove(&index);
                        if records.is_empty() {
                            tables.records.remove(&container);
                        }
                    }
                }
                Undo::Deleted(container, mut removed) => {
                    tables
                        .records
                        .entry(container)
                        .or_default()
                        .append(&mut removed);
                }
            }
        }
    }
}

#[async_trait]
impl CommitUnit for InMemoryUnit {
    async fn container_owner(&mut self, container: &str) -> Result<Option<AccountId>> {
        Ok(self
            .guard
            .containers
            .get(container)
            .map(|entry| entry.owner))
    }

    async fn insert_container(&mut self, container: &str, owner: AccountId, now: u64) -> Result<()> {
        if self.guard.containers.contains_key(container) {
            return Err(BackendError::Constraint {
                reason: format!("container {container} already exists"),
            }
            .into());
        }
        self.guard.containers.insert(
            container.to_string(),
            ContainerEntry {
                owner,
                created_time: now,
            },
        );
        self.undo.push(Undo::Container(container.to_string()));
        Ok(())
    }

    async fn insert_session_key(
        &mut self,
        container: &str,
        account: AccountId,
        key: &SealedKey,
    ) -> Result<()> {
        let keys = self
            .guard
            .session_keys
            .entry(container.to_string())
            .or_default();
        if keys.contains_key(&account) {
            return Err(BackendError::Constraint {
                reason: format!("account {account} already holds a key for {container}"),
            }
            .into());
        }
        keys.insert(account, key.clone());
        self.undo
            .push(Undo::SessionKey(container.to_string(), account));
        Ok(())
    }

    async fn account_id_by_username(&mut self, username: &str) -> Result<Option<AccountId>> {
        Ok(self
            .accounts
            .read()
            .await
            .by_username
            .get(username)
            .copied())
    }

    async fn latest_record_index(&mut self, container: &str) -> Result<Option<i64>> {
        Ok(self
            .guard
            .records
            .get(container)
            .and_then(|records| records.keys().next_back().copied()))
    }

    async fn insert_record(&mut self, record: &StoredRecord) -> Result<()> {
        let records = self
            .guard
            .records
            .entry(record.container_name_hmac.clone())
            .or_default();
        if records.contains_key(&record.index) {
            return Err(BackendError::Constraint {
                reason: format!(
                    "record {} already exists for {}",
                    record.index, record.container_name_hmac
                ),
            }
            .into());
        }
        records.insert(record.index, record.clone());
        self.undo
            .push(Undo::Record(record.container_name_hmac.clone(), record.index));
        Ok(())
    }

    async fn delete_records_before(&mut self, container: &str, index: i64) -> Result<u64> {
        let Some(records) = self.guard.records.get_mut(container) else {
            return Ok(0);
        };
        let kept = records.split_off(&index);
        let removed = std::mem::replace(records, kept);
        let count = removed.len() as u64;
        if !removed.is_empty() {
            self.undo
                .push(Undo::Deleted(container.to_string(), removed));
        }
        Ok(count)
    }

    async fn mark_committed(&mut self, id: TransactionId, now: u64) -> Result<()> {
        if !self.transactions.read().await.rows.contains_key(&id) {
            return Err(BackendError::NotFound {
                entity: "Transaction",
                id: id.to_string(),
            }
            .into());
        }
        self.committed = Some((id, now));
        Ok(())
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if let Some((id, now)) = self.committed.take() {
            let mut transactions = self.transactions.write().await;
            if let Some(row) = transactions.rows.get_mut(&id) {
                row.state = TransactionState::Committed;
                row.commit_finish_time = Some(now);
                row.failure = None;
            }
            transactions.chunks.remove(&id);
        }
        self.undo.clear();
        Ok(())
    }
}
