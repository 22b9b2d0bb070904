//! Fault injection over [`InMemory`] for tests.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;

use crate::Result;
use crate::backend::errors::BackendError;
use crate::backend::{
    AccountRow, Backend, CommitOutcome, CommitUnit, NewMessage, StagedChunk, StoredRecord,
    TransactionRow, TransactionState,
};
use crate::crypto::SealedKey;
use crate::protocol::{AccountId, Message, TransactionId};

use super::InMemory;

/// Delegates to an [`InMemory`] backend, misbehaving on request.
#[derive(Debug, Default)]
pub(crate) struct Flaky {
    pub(crate) inner: InMemory,
    stale_reads: AtomicU32,
    begin_failures: AtomicU32,
}

/// Decrement `counter` if positive; `true` when it was.
fn take(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl Flaky {
    /// The next `n` transaction lookups report the row as still open.
    pub(crate) fn stale_reads(&self, n: u32) {
        self.stale_reads.store(n, Ordering::SeqCst);
    }

    /// The next `n` calls to `begin_commit` fail with a storage error.
    pub(crate) fn fail_begin(&self, n: u32) {
        self.begin_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for Flaky {
    async fn insert_account(&self, account: &AccountRow) -> Result<()> {
        self.inner.insert_account(account).await
    }

    async fn account_by_username(&self, username: &str) -> Result<Option<AccountRow>> {
        self.inner.account_by_username(username).await
    }

    async fn account_by_id(&self, id: AccountId) -> Result<Option<AccountRow>> {
        self.inner.account_by_id(id).await
    }

    async fn insert_transaction(&self, transaction: &TransactionRow) -> Result<()> {
        self.inner.insert_transaction(transaction).await
    }

    async fn transaction(&self, id: TransactionId) -> Result<Option<TransactionRow>> {
        let mut row = self.inner.transaction(id).await?;
        if take(&self.stale_reads) {
            if let Some(row) = row.as_mut() {
                row.state = TransactionState::Open;
            }
        }
        Ok(row)
    }

    async fn append_chunk(&self, id: TransactionId, staged: &StagedChunk) -> Result<bool> {
        self.inner.append_chunk(id, staged).await
    }

    async fn chunks(&self, id: TransactionId) -> Result<Vec<StagedChunk>> {
        self.inner.chunks(id).await
    }

    async fn request_commit(&self, id: TransactionId, now: u64) -> Result<bool> {
        self.inner.request_commit(id, now).await
    }

    async fn pending_commits(&self) -> Result<Vec<TransactionRow>> {
        self.inner.pending_commits().await
    }

    async fn claim_commit(&self, id: TransactionId, now: u64) -> Result<bool> {
        self.inner.claim_commit(id, now).await
    }

    async fn release_commit(
        &self,
        id: TransactionId,
        outcome: &CommitOutcome,
        now: u64,
    ) -> Result<()> {
        self.inner.release_commit(id, outcome, now).await
    }

    async fn begin_commit(&self) -> Result<Box<dyn CommitUnit>> {
        if take(&self.begin_failures) {
            return Err(BackendError::Storage {
                reason: "disk unavailable".to_string(),
            }
            .into());
        }
        self.inner.begin_commit().await
    }

    async fn records_after(&self, container: &str, after: i64) -> Result<Vec<StoredRecord>> {
        self.inner.records_after(container, after).await
    }

    async fn container_owner(&self, container: &str) -> Result<Option<AccountId>> {
        self.inner.container_owner(container).await
    }

    async fn session_key(&self, container: &str, account: AccountId) -> Result<Option<SealedKey>> {
        self.inner.session_key(container, account).await
    }

    async fn key_holders(&self, container: &str) -> Result<Vec<AccountId>> {
        self.inner.key_holders(container).await
    }

    async fn insert_message(&self, message: &NewMessage) -> Result<()> {
        self.inner.insert_message(message).await
    }

    async fn messages_for(&self, account: AccountId) -> Result<Vec<Message>> {
        self.inner.messages_for(account).await
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
