//! Argon2id key derivation from passphrases.

use argon2::{
    Algorithm, Argon2, Params, Version,
    password_hash::{SaltString, rand_core},
};
use zeroize::Zeroizing;

use super::{CryptoError, KEY_LENGTH, SymmetricKey};
use crate::config::HashingConfig;

/// Build an Argon2id instance with explicit cost parameters.
pub(crate) fn argon2(params: &HashingConfig) -> Result<Argon2<'static>, CryptoError> {
    let params = Params::new(
        params.memory_kib,
        params.iterations,
        params.parallelism,
        Some(KEY_LENGTH),
    )
    .map_err(|e| CryptoError::KeyDerivationFailed {
        reason: format!("Invalid Argon2 parameters: {e}"),
    })?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

/// A fresh random salt in PHC base64 form (22 characters).
pub fn generate_salt() -> String {
    SaltString::generate(&mut rand_core::OsRng)
        .as_str()
        .to_string()
}

/// Derive a 256-bit key from `passphrase` and `salt`.
///
/// The same passphrase, salt and parameters always give the same key.
pub fn derive_key(
    passphrase: &str,
    salt: &str,
    params: &HashingConfig,
) -> Result<SymmetricKey, CryptoError> {
    if salt.len() < 8 {
        return Err(CryptoError::KeyDerivationFailed {
            reason: format!("salt too short: {} bytes", salt.len()),
        });
    }
    let mut key = Zeroizing::new([0u8; KEY_LENGTH]);
    argon2(params)?
        .hash_password_into(passphrase.as_bytes(), salt.as_bytes(), &mut key[..])
        .map_err(|e| CryptoError::KeyDerivationFailed {
            reason: format!("Key derivation failed: {e}"),
        })?;
    Ok(SymmetricKey::from_bytes(*key))
}
