//! Error types for container operations.

use thiserror::Error;

/// Errors raised by [`super::Container`].
///
/// Every failing operation leaves the container exactly as it was before the
/// call.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ContainerError {
    #[error("Key already exists: {key}")]
    AlreadyExists { key: String },

    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Version not found: {version}")]
    VersionNotFound { version: String },

    /// `save` found nothing to record.
    #[error("No changes to save")]
    NoChange,

    /// The container has no session key yet.
    #[error("Container {name} has no session key")]
    NotKeyed { name: String },

    /// The operation needs a clean working state.
    #[error("Container {name} has unsaved changes")]
    UnsavedChanges { name: String },

    /// Replay hit a record that does not follow the last applied one.
    #[error("Record out of order: expected index {expected}, found {found}")]
    OutOfOrder { expected: i64, found: i64 },

    #[error("Malformed record {index}: {reason}")]
    MalformedRecord { index: i64, reason: String },

    /// The session-key envelope is missing or was not sealed by the writer.
    #[error("Session key for container {name} could not be verified")]
    SessionKeyMismatch { name: String },
}

impl ContainerError {
    /// Check if this error indicates a key or version was not found.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ContainerError::NotFound { .. } | ContainerError::VersionNotFound { .. }
        )
    }

    /// Check if the call was not valid for the container's current state.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            ContainerError::AlreadyExists { .. }
                | ContainerError::NoChange
                | ContainerError::NotKeyed { .. }
                | ContainerError::UnsavedChanges { .. }
        )
    }

    /// Check if replay stopped because records arrived out of order.
    pub fn is_ordering_error(&self) -> bool {
        matches!(self, ContainerError::OutOfOrder { .. })
    }

    /// Check if a record or its key failed verification.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            ContainerError::MalformedRecord { .. } | ContainerError::SessionKeyMismatch { .. }
        )
    }
}

impl From<ContainerError> for crate::Error {
    fn from(err: ContainerError) -> Self {
        crate::Error::Container(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification() {
        let err: crate::Error = ContainerError::OutOfOrder {
            expected: 3,
            found: 4,
        }
        .into();
        assert!(err.is_ordering_error());
        assert!(!err.is_not_found());
        assert_eq!(err.module(), "container");

        let err: crate::Error = ContainerError::NoChange.into();
        assert!(err.is_validation_error());

        let err: crate::Error = ContainerError::NotFound {
            key: "a".to_string(),
        }
        .into();
        assert!(err.is_not_found());
    }
}
