//! Error types for diff application.

use thiserror::Error;

/// Errors raised when a diff does not fit the snapshot it is applied to.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DiffError {
    /// The diff removes or changes a key the base does not contain.
    #[error("Cannot apply diff: key '{key}' is missing from the base")]
    MissingKey { key: String },

    /// The diff adds a key the base already contains.
    #[error("Cannot apply diff: key '{key}' already exists in the base")]
    KeyExists { key: String },
}

impl DiffError {
    /// The key that caused the mismatch.
    pub fn key(&self) -> &str {
        match self {
            DiffError::MissingKey { key } | DiffError::KeyExists { key } => key,
        }
    }
}

impl From<DiffError> for crate::Error {
    fn from(err: DiffError) -> Self {
        crate::Error::Diff(err)
    }
}
