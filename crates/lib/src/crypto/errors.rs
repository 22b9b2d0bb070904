//! Error types for the cryptographic primitives.

use thiserror::Error;

/// Errors from encryption, signing and key handling.
///
/// Messages never include key material or plaintext.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Encryption failed: {reason}")]
    EncryptionFailed { reason: String },

    /// Authentication tag mismatch, wrong key, or truncated input.
    #[error("Decryption failed: {reason}")]
    DecryptionFailed { reason: String },

    #[error("Invalid signature")]
    InvalidSignature,

    #[error("Invalid key format: {reason}")]
    InvalidKeyFormat { reason: String },

    #[error("Key derivation failed: {reason}")]
    KeyDerivationFailed { reason: String },

    #[error("Invalid encoding: {reason}")]
    InvalidEncoding { reason: String },
}

impl CryptoError {
    /// Check if this error means data failed an integrity check.
    pub fn is_integrity_error(&self) -> bool {
        matches!(
            self,
            CryptoError::DecryptionFailed { .. } | CryptoError::InvalidSignature
        )
    }

    /// Check if this error is a malformed key or encoding.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            CryptoError::InvalidKeyFormat { .. } | CryptoError::InvalidEncoding { .. }
        )
    }
}

impl From<CryptoError> for crate::Error {
    fn from(err: CryptoError) -> Self {
        crate::Error::Crypto(err)
    }
}
