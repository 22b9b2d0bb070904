//! Error types for transaction staging and commit.

use thiserror::Error;

use crate::ErrorKind;
use crate::protocol::TransactionId;

/// Errors raised while staging, committing or waiting on a transaction.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TransactionError {
    #[error("Transaction not found: {id}")]
    NotFound { id: TransactionId },

    /// The caller is authenticated but the transaction belongs to someone else.
    #[error("Transaction does not belong to account")]
    AccountMismatch,

    /// The chunk's `type` tag names no known chunk.
    #[error("Invalid transaction type: {kind}")]
    InvalidTransactionType { kind: String },

    /// The tag is known but the body does not match it.
    #[error("Malformed chunk: {reason}")]
    InvalidChunk { reason: String },

    /// Chunks can only be staged, and commits requested, while the transaction is open.
    #[error("Transaction {id} is not open (state: {state})")]
    NotOpen { id: TransactionId, state: String },

    #[error("Container does not exist: {container}")]
    UnknownContainer { container: String },

    #[error("Only the owner of container {container} may modify it")]
    NotContainerOwner { container: String },

    #[error("Unknown share recipient: {username}")]
    UnknownRecipient { username: String },

    /// Record indices must strictly increase per container.
    #[error("Record index {index} for container {container} is not after {latest}")]
    IndexNotIncreasing {
        container: String,
        index: i64,
        latest: i64,
    },

    /// The server gave up on the transaction.
    #[error("Commit failed: {reason}")]
    CommitFailed { kind: ErrorKind, reason: String },

    #[error("Timed out waiting for transaction {id} to commit")]
    CommitTimedOut { id: TransactionId },
}

impl TransactionError {
    /// Check if this error indicates the transaction was not found.
    pub fn is_not_found(&self) -> bool {
        match self {
            TransactionError::NotFound { .. } => true,
            TransactionError::CommitFailed { kind, .. } => *kind == ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Check if the caller acted on something it does not own.
    pub fn is_authorization_error(&self) -> bool {
        match self {
            TransactionError::AccountMismatch | TransactionError::NotContainerOwner { .. } => true,
            TransactionError::CommitFailed { kind, .. } => *kind == ErrorKind::Authorization,
            _ => false,
        }
    }

    /// Check if the request itself was malformed or out of place.
    pub fn is_validation_error(&self) -> bool {
        match self {
            TransactionError::InvalidTransactionType { .. }
            | TransactionError::InvalidChunk { .. }
            | TransactionError::NotOpen { .. }
            | TransactionError::UnknownContainer { .. }
            | TransactionError::UnknownRecipient { .. } => true,
            TransactionError::CommitFailed { kind, .. } => *kind == ErrorKind::Validation,
            _ => false,
        }
    }

    /// Check if a storage invariant rejected the write.
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            TransactionError::IndexNotIncreasing { .. } => true,
            TransactionError::CommitFailed { kind, .. } => *kind == ErrorKind::Constraint,
            _ => false,
        }
    }
}

impl From<TransactionError> for crate::Error {
    fn from(err: TransactionError) -> Self {
        crate::Error::Transaction(err)
    }
}
