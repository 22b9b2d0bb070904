//! Error types for the storage backends.

use thiserror::Error;

/// Errors that can occur during storage operations.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BackendError {
    /// A row that must exist does not.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// A uniqueness or ordering constraint rejected the write.
    #[error("Constraint violation: {reason}")]
    Constraint { reason: String },

    /// A stored value could not be decoded.
    #[error("Corrupt stored data: {reason}")]
    Corrupt { reason: String },

    /// Generic storage failure.
    #[error("Storage error: {reason}")]
    Storage { reason: String },

    /// SQL database error from sqlx.
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("SQL error: {reason}")]
    SqlxError {
        /// Description of the error
        reason: String,
        /// Underlying sqlx error
        #[source]
        source: Option<sqlx::Error>,
    },
}

impl BackendError {
    /// Check if this error indicates a missing row.
    pub fn is_not_found(&self) -> bool {
        matches!(self, BackendError::NotFound { .. })
    }

    /// Check if this error is a constraint violation.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(self, BackendError::Constraint { .. })
    }

    /// Check if this error is a storage failure that may be transient.
    pub fn is_database_error(&self) -> bool {
        match self {
            BackendError::Storage { .. } | BackendError::Corrupt { .. } => true,
            #[cfg(any(feature = "sqlite", feature = "postgres"))]
            BackendError::SqlxError { .. } => true,
            _ => false,
        }
    }
}

impl From<BackendError> for crate::Error {
    fn from(err: BackendError) -> Self {
        crate::Error::Backend(err)
    }
}
