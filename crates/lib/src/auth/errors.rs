//! Authentication error types.

use thiserror::Error as ThisError;

/// Errors that can occur during registration, login and session lookup.
///
/// # Stability
///
/// - New variants may be added in minor versions (enum is `#[non_exhaustive]`)
/// - Existing variants will not be removed in minor versions
/// - Helper methods like `is_*()` provide stable APIs
#[non_exhaustive]
#[derive(Debug, ThisError)]
pub enum AuthError {
    /// Login failed. Deliberately says nothing about whether the username
    /// exists.
    #[error("Incorrect password")]
    IncorrectPassword,

    #[error("Invalid username: {reason}")]
    InvalidUsername { reason: String },

    /// A registration field is missing or malformed.
    #[error("Invalid registration: {reason}")]
    InvalidRegistration { reason: String },

    /// The session id is unknown or was logged out.
    #[error("Invalid or expired session")]
    InvalidSession,

    /// The slow hash could not be computed or parsed.
    #[error("Password hashing failed: {reason}")]
    HashingFailed { reason: String },
}

impl AuthError {
    /// Check if the request was rejected before any credential was checked.
    pub fn is_validation_error(&self) -> bool {
        matches!(
            self,
            AuthError::InvalidUsername { .. } | AuthError::InvalidRegistration { .. }
        )
    }

    /// Check if the caller could not be authenticated.
    pub fn is_authentication_error(&self) -> bool {
        matches!(self, AuthError::IncorrectPassword | AuthError::InvalidSession)
    }
}

impl From<AuthError> for crate::Error {
    fn from(err: AuthError) -> Self {
        crate::Error::Auth(err)
    }
}
