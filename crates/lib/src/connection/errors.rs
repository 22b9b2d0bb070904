//! Error types for the client transport.

use thiserror::Error;

use crate::ErrorKind;

/// Errors raised by a [`super::Connection`] itself, as opposed to errors the
/// server reported.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The server rejected the request. `kind` keeps the server-side class so
    /// callers can still use the `is_*` helpers on [`crate::Error`].
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },

    /// The request never produced a response.
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    /// The response could not be understood.
    #[error("Invalid response: {reason}")]
    InvalidResponse { reason: String },

    /// An operation that needs a session was attempted before logging in.
    #[error("Not logged in")]
    NotLoggedIn,
}

impl ConnectionError {
    /// The error class, when one is known.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            ConnectionError::Remote { kind, .. } => Some(*kind),
            ConnectionError::NotLoggedIn => Some(ErrorKind::Authentication),
            _ => None,
        }
    }

    /// Check if the request may succeed when simply sent again.
    pub fn is_transport_error(&self) -> bool {
        matches!(self, ConnectionError::Transport { .. })
    }
}

impl From<ConnectionError> for crate::Error {
    fn from(err: ConnectionError) -> Self {
        crate::Error::Connection(err)
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for ConnectionError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ConnectionError::InvalidResponse {
                reason: err.to_string(),
            }
        } else {
            ConnectionError::Transport {
                reason: err.to_string(),
            }
        }
    }
}
