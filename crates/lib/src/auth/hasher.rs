//! Slow hashing of challenge keys.

use argon2::password_hash::{
    PasswordHash, PasswordHasher as _, PasswordVerifier, SaltString, rand_core,
};

use super::errors::AuthError;
use crate::Result;
use crate::config::HashingConfig;
use crate::crypto;

/// A deliberately expensive one-way function with a verifier.
///
/// `verify` must take comparable time whether or not the secret matches.
pub trait PasswordHasher: Send + Sync {
    /// Hash `secret` with a fresh salt into a self-describing string.
    fn hash(&self, secret: &[u8]) -> Result<String>;

    /// Check `secret` against a string produced by [`PasswordHasher::hash`].
    fn verify(&self, secret: &[u8], hash: &str) -> Result<bool>;
}

/// Argon2id in PHC string format.
///
/// New hashes use the configured parameters; verification reads the
/// parameters embedded in the stored hash.
#[derive(Debug, Clone)]
pub struct Argon2Hasher {
    params: HashingConfig,
}

impl Argon2Hasher {
    pub fn new(params: HashingConfig) -> Self {
        Self { params }
    }
}

impl PasswordHasher for Argon2Hasher {
    fn hash(&self, secret: &[u8]) -> Result<String> {
        let salt = SaltString::generate(&mut rand_core::OsRng);
        let hash = crypto::kdf_argon2(&self.params)?
            .hash_password(secret, &salt)
            .map_err(|e| AuthError::HashingFailed {
                reason: e.to_string(),
            })?;
        Ok(hash.to_string())
    }

    fn verify(&self, secret: &[u8], hash: &str) -> Result<bool> {
        let parsed = PasswordHash::new(hash).map_err(|e| AuthError::HashingFailed {
            reason: format!("stored hash is malformed: {e}"),
        })?;
        match crypto::kdf_argon2(&self.params)?.verify_password(secret, &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(e) => Err(AuthError::HashingFailed {
                reason: e.to_string(),
            }
            .into()),
        }
    }
}
