//! Server-side storage.
//!
//! The [`Backend`] trait is the single source of truth for the server engine:
//! accounts, staged transactions, container records, session-key envelopes and
//! messages all live behind it. Everything that must change atomically when a
//! transaction commits goes through a [`CommitUnit`], which either commits as a
//! whole or, when dropped, leaves no trace.
//!
//! Implementations live in [`database`]: an in-memory one for tests and
//! ephemeral servers, and an sqlx one for SQLite and PostgreSQL.

pub mod database;
pub mod errors;

use std::any::Any;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use errors::BackendError;

use crate::crypto::{Ciphertext, EncryptionPublicKey, PublicKey, SealedKey};
use crate::protocol::{AccountId, Message, MessageId, SignedPayload, TransactionId, TransactionStatus};
use crate::transaction::Chunk;
use crate::{ErrorKind, Result};

/// Stored account.
///
/// `challenge_key_hash` is the slow hash of the hex challenge key; the key
/// itself is never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountRow {
    pub id: AccountId,
    pub username: String,
    pub challenge_key_hash: String,
    pub challenge_key_salt: String,
    pub keyring_salt: String,
    pub keyring: Ciphertext,
    pub signing_key: PublicKey,
    pub encryption_key: EncryptionPublicKey,
    pub created_time: u64,
}

/// Persisted lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Open,
    CommitRequested,
    Committing,
    Committed,
    Failed,
}

impl TransactionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionState::Open => "open",
            TransactionState::CommitRequested => "commit_requested",
            TransactionState::Committing => "committing",
            TransactionState::Committed => "committed",
            TransactionState::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "open" => Some(TransactionState::Open),
            "commit_requested" => Some(TransactionState::CommitRequested),
            "committing" => Some(TransactionState::Committing),
            "committed" => Some(TransactionState::Committed),
            "failed" => Some(TransactionState::Failed),
            _ => None,
        }
    }
}

/// Why the last commit attempt did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Failure {
    pub kind: ErrorKind,
    pub reason: String,
}

/// Stored transaction header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRow {
    pub id: TransactionId,
    pub account_id: AccountId,
    pub state: TransactionState,
    pub created_time: u64,
    pub commit_request_time: Option<u64>,
    pub commit_start_time: Option<u64>,
    pub commit_finish_time: Option<u64>,
    /// Failed commit attempts so far.
    pub attempts: u32,
    pub failure: Option<Failure>,
}

impl TransactionRow {
    /// A freshly opened transaction.
    pub fn open(account_id: AccountId, now: u64) -> Self {
        Self {
            id: TransactionId::generate(),
            account_id,
            state: TransactionState::Open,
            created_time: now,
            commit_request_time: None,
            commit_start_time: None,
            commit_finish_time: None,
            attempts: 0,
            failure: None,
        }
    }

    /// The client-facing view of this row.
    pub fn status(&self) -> TransactionStatus {
        match self.state {
            TransactionState::Open => TransactionStatus::Open,
            TransactionState::CommitRequested => TransactionStatus::CommitRequested,
            TransactionState::Committing => TransactionStatus::Committing,
            TransactionState::Committed => TransactionStatus::Committed,
            TransactionState::Failed => {
                let failure = self.failure.clone().unwrap_or(Failure {
                    kind: ErrorKind::Internal,
                    reason: "unknown failure".to_string(),
                });
                TransactionStatus::Failed {
                    kind: failure.kind,
                    reason: failure.reason,
                }
            }
        }
    }
}

/// A chunk together with the account that staged it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedChunk {
    pub account_id: AccountId,
    pub chunk: Chunk,
}

/// One stored container record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub container_name_hmac: String,
    pub index: i64,
    pub creation_time: u64,
    pub payload: SignedPayload,
}

/// A message about to be stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewMessage {
    pub id: MessageId,
    pub from_account: AccountId,
    pub from_username: String,
    pub to_account: AccountId,
    pub headers: Value,
    pub body: Value,
    pub creation_time: u64,
}

impl NewMessage {
    pub fn to_message(&self) -> Message {
        Message {
            message_id: self.id,
            from_username: self.from_username.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            creation_time: self.creation_time,
        }
    }
}

/// Outcome of a commit attempt that did not commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    /// Transient failure; hand the transaction back to the sweep.
    Retry(Failure),
    /// Permanent failure; the client must start over.
    Failed(Failure),
}

/// Storage used by the server engine.
///
/// Writes that are not part of a commit (accounts, staging, messages) are
/// individually atomic. Operations that race with the commit coordinator
/// (`append_chunk`, `request_commit`, `claim_commit`) are conditional on the
/// transaction state and report whether they won.
#[async_trait]
pub trait Backend: Send + Sync + Any {
    /// Store a new account. A taken username is a constraint violation.
    async fn insert_account(&self, account: &AccountRow) -> Result<()>;

    async fn account_by_username(&self, username: &str) -> Result<Option<AccountRow>>;

    async fn account_by_id(&self, id: AccountId) -> Result<Option<AccountRow>>;

    async fn insert_transaction(&self, transaction: &TransactionRow) -> Result<()>;

    async fn transaction(&self, id: TransactionId) -> Result<Option<TransactionRow>>;

    /// Append a chunk after any already staged, provided the transaction is
    /// still open when the chunk is written. Returns `false` (and stores
    /// nothing) when it was not.
    async fn append_chunk(&self, id: TransactionId, staged: &StagedChunk) -> Result<bool>;

    /// Staged chunks in staging order. Empty once the transaction is
    /// committed or failed.
    async fn chunks(&self, id: TransactionId) -> Result<Vec<StagedChunk>>;

    /// Move an open transaction to COMMIT_REQUESTED. Returns `false` when the
    /// transaction was not open.
    async fn request_commit(&self, id: TransactionId, now: u64) -> Result<bool>;

    /// Transactions with a commit requested and not yet started, oldest
    /// request first.
    async fn pending_commits(&self) -> Result<Vec<TransactionRow>>;

    /// Set `commit_start_time` if it is still unset. Returns `true` for the one
    /// caller that wins.
    async fn claim_commit(&self, id: TransactionId, now: u64) -> Result<bool>;

    /// Record a failed attempt on a claimed transaction.
    async fn release_commit(&self, id: TransactionId, outcome: &CommitOutcome, now: u64)
    -> Result<()>;

    /// Start an atomic unit for applying one transaction.
    async fn begin_commit(&self) -> Result<Box<dyn CommitUnit>>;

    /// Records of a container with index greater than `after`, ascending.
    async fn records_after(&self, container: &str, after: i64) -> Result<Vec<StoredRecord>>;

    async fn container_owner(&self, container: &str) -> Result<Option<AccountId>>;

    /// The session-key envelope addressed to `account`, if any.
    async fn session_key(&self, container: &str, account: AccountId)
    -> Result<Option<SealedKey>>;

    /// Accounts holding an envelope for the container (owner included).
    async fn key_holders(&self, container: &str) -> Result<Vec<AccountId>>;

    async fn insert_message(&self, message: &NewMessage) -> Result<()>;

    /// Messages addressed to `account`, oldest first.
    async fn messages_for(&self, account: AccountId) -> Result<Vec<Message>>;

    /// Downcast support for backend-specific operations.
    fn as_any(&self) -> &dyn Any;
}

/// Exclusive, all-or-nothing view of container storage for one commit.
///
/// Dropping a unit without calling [`CommitUnit::commit`] discards every
/// write made through it.
#[async_trait]
pub trait CommitUnit: Send {
    async fn container_owner(&mut self, container: &str) -> Result<Option<AccountId>>;

    /// Register a container. An existing name is a constraint violation.
    async fn insert_container(&mut self, container: &str, owner: AccountId, now: u64)
    -> Result<()>;

    /// Store an envelope for `account`. A second envelope for the same account
    /// is a constraint violation.
    async fn insert_session_key(
        &mut self,
        container: &str,
        account: AccountId,
        key: &SealedKey,
    ) -> Result<()>;

    async fn account_id_by_username(&mut self, username: &str) -> Result<Option<AccountId>>;

    async fn latest_record_index(&mut self, container: &str) -> Result<Option<i64>>;

    /// Store a record. A duplicate index is a constraint violation.
    async fn insert_record(&mut self, record: &StoredRecord) -> Result<()>;

    /// Delete records of `container` with index below `index`; returns how many.
    async fn delete_records_before(&mut self, container: &str, index: i64) -> Result<u64>;

    /// Mark the transaction committed as part of this unit.
    async fn mark_committed(&mut self, id: TransactionId, now: u64) -> Result<()>;

    /// Make every write of this unit durable and visible.
    async fn commit(self: Box<Self>) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_strings_round_trip() {
        for state in [
            TransactionState::Open,
            TransactionState::CommitRequested,
            TransactionState::Committing,
            TransactionState::Committed,
            TransactionState::Failed,
        ] {
            assert_eq!(TransactionState::parse(state.as_str()), Some(state));
        }
        assert_eq!(TransactionState::parse("bogus"), None);
    }

    #[test]
    fn failed_row_reports_its_failure() {
        let mut row = TransactionRow::open(AccountId::generate(), 10);
        assert_eq!(row.status(), TransactionStatus::Open);

        row.state = TransactionState::Failed;
        row.failure = Some(Failure {
            kind: ErrorKind::Constraint,
            reason: "duplicate".to_string(),
        });
        assert_eq!(
            row.status(),
            TransactionStatus::Failed {
                kind: ErrorKind::Constraint,
                reason: "duplicate".to_string()
            }
        );
    }
}
