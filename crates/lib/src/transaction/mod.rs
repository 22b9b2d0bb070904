//! Server-side transaction staging.
//!
//! A client opens a transaction, stages typed [`Chunk`]s into it and then
//! requests a commit. Nothing staged is visible to readers until the
//! [`crate::commit::CommitCoordinator`] applies the whole transaction in one
//! atomic unit.
//!
//! ```text
//! OPEN -> COMMIT_REQUESTED -> COMMITTING -> COMMITTED
//!               ^                 |
//!               +---- retry ------+--> FAILED
//! ```

pub(crate) mod apply;
mod chunk;
pub mod errors;

use std::sync::Arc;

use serde_json::Value;

pub use chunk::{CHUNK_TYPES, Chunk};
pub use errors::TransactionError;

use crate::backend::{Backend, StagedChunk, TransactionRow, TransactionState};
use crate::protocol::{AccountId, TransactionId, TransactionStatus};
use crate::{Clock, Result};

/// Staging area for transactions, one per server.
#[derive(Clone)]
pub struct TransactionLog {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
}

impl TransactionLog {
    pub fn new(backend: Arc<dyn Backend>, clock: Arc<dyn Clock>) -> Self {
        Self { backend, clock }
    }

    /// Open a new, empty transaction owned by `account_id`.
    pub async fn open(&self, account_id: AccountId) -> Result<TransactionId> {
        let row = TransactionRow::open(account_id, self.clock.now_millis());
        self.backend.insert_transaction(&row).await?;
        tracing::debug!(transaction = %row.id, account = %account_id, "Opened transaction");
        Ok(row.id)
    }

    /// Load a transaction and check it belongs to `account_id`.
    async fn owned(&self, account_id: AccountId, id: TransactionId) -> Result<TransactionRow> {
        let row = self
            .backend
            .transaction(id)
            .await?
            .ok_or(TransactionError::NotFound { id })?;
        if row.account_id != account_id {
            return Err(TransactionError::AccountMismatch.into());
        }
        Ok(row)
    }

    fn require_open(row: &TransactionRow) -> Result<()> {
        if row.state != TransactionState::Open {
            return Err(TransactionError::NotOpen {
                id: row.id,
                state: row.state.as_str().to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// `NotOpen` carrying whatever state the transaction moved to after a
    /// conditional backend write lost a race.
    async fn lost_race(&self, id: TransactionId) -> Result<()> {
        let state = self
            .backend
            .transaction(id)
            .await?
            .map(|row| row.state.as_str().to_string())
            .unwrap_or_default();
        Err(TransactionError::NotOpen { id, state }.into())
    }

    /// Append a chunk to an open transaction.
    ///
    /// The backend re-checks the state as it writes, so a commit requested
    /// in between rejects the chunk instead of dropping it.
    pub async fn stage(&self, account_id: AccountId, id: TransactionId, chunk: Chunk) -> Result<()> {
        let row = self.owned(account_id, id).await?;
        Self::require_open(&row)?;

        tracing::debug!(transaction = %id, kind = chunk.kind(), "Staging chunk");
        if !self
            .backend
            .append_chunk(id, &StagedChunk { account_id, chunk })
            .await?
        {
            return self.lost_race(id).await;
        }
        Ok(())
    }

    /// Parse a chunk from its wire form and stage it.
    ///
    /// The `type` tag is checked before anything is read or written.
    pub async fn stage_json(
        &self,
        account_id: AccountId,
        id: TransactionId,
        json: Value,
    ) -> Result<()> {
        let chunk = Chunk::from_json(json)?;
        self.stage(account_id, id, chunk).await
    }

    /// Mark the transaction ready for the coordinator. Returns immediately.
    pub async fn request_commit(&self, account_id: AccountId, id: TransactionId) -> Result<()> {
        let row = self.owned(account_id, id).await?;
        Self::require_open(&row)?;

        if !self
            .backend
            .request_commit(id, self.clock.now_millis())
            .await?
        {
            return self.lost_race(id).await;
        }
        tracing::debug!(transaction = %id, "Commit requested");
        Ok(())
    }

    /// Where the transaction is in its lifecycle.
    pub async fn status(&self, account_id: AccountId, id: TransactionId) -> Result<TransactionStatus> {
        Ok(self.owned(account_id, id).await?.status())
    }
}
