//! Cryptographic primitives.
//!
//! - AES-256-GCM for container records and keyrings ([`SymmetricKey`], [`Ciphertext`])
//! - HMAC-SHA256 for container public names ([`hmac_hex`])
//! - SHA-256 for the digest that record signatures cover ([`digest`])
//! - Ed25519 for signatures ([`PrivateKey`], [`PublicKey`])
//! - X25519 + HKDF for session-key envelopes ([`SealedKey`])
//! - Argon2id for passphrase key derivation ([`derive_key`])

mod cipher;
mod envelope;
mod errors;
mod kdf;
mod keys;

pub use cipher::{Ciphertext, SymmetricKey};
pub use envelope::SealedKey;
pub use errors::CryptoError;
pub use kdf::{derive_key, generate_salt};
pub(crate) use kdf::argon2 as kdf_argon2;
pub use keys::{EncryptionPublicKey, EncryptionSecret, PrivateKey, PublicKey};

use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};

/// Length of every symmetric key in bytes.
pub const KEY_LENGTH: usize = 32;

/// Nonce length for AES-GCM (12 bytes standard)
pub const NONCE_LENGTH: usize = 12;

/// SHA-256 of `data`.
pub fn digest(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// Hex-encoded HMAC-SHA256 of `message` under `key`.
pub fn hmac_hex(key: &[u8], message: &[u8]) -> Result<String, CryptoError> {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(key).map_err(|e| CryptoError::InvalidKeyFormat {
            reason: format!("HMAC key rejected: {e}"),
        })?;
    mac.update(message);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Fill a fresh buffer with `len` bytes from the OS generator.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    bytes
}

/// Standard base64 encoding, as used in every wire type.
pub fn encode_base64(data: &[u8]) -> String {
    Base64::encode_string(data)
}

/// Inverse of [`encode_base64`].
pub fn decode_base64(data: &str) -> Result<Vec<u8>, CryptoError> {
    Base64::decode_vec(data).map_err(|e| CryptoError::InvalidEncoding {
        reason: format!("invalid base64: {e}"),
    })
}
