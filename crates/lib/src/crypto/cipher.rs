//! AES-256-GCM symmetric encryption.

use std::fmt;

use aes_gcm::{
    Aes256Gcm, KeyInit, Nonce,
    aead::{Aead, AeadCore, OsRng},
};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use super::{CryptoError, KEY_LENGTH, NONCE_LENGTH, decode_base64, encode_base64};

/// A 256-bit AES key, zeroized on drop.
#[derive(Clone)]
pub struct SymmetricKey(Zeroizing<[u8; KEY_LENGTH]>);

impl fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SymmetricKey([REDACTED])")
    }
}

impl PartialEq for SymmetricKey {
    // No early exit.
    fn eq(&self, other: &Self) -> bool {
        self.0
            .iter()
            .zip(other.0.iter())
            .fold(0u8, |acc, (x, y)| acc | (x ^ y))
            == 0
    }
}

impl Eq for SymmetricKey {}

impl SymmetricKey {
    /// Generate a new random key.
    pub fn generate() -> Self {
        let mut bytes = Zeroizing::new([0u8; KEY_LENGTH]);
        rand::rngs::OsRng.fill_bytes(&mut bytes[..]);
        Self(bytes)
    }

    pub fn from_bytes(bytes: [u8; KEY_LENGTH]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    /// Build a key from a slice, failing unless it is exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptoError> {
        let array: [u8; KEY_LENGTH] =
            bytes
                .try_into()
                .map_err(|_| CryptoError::InvalidKeyFormat {
                    reason: format!(
                        "Invalid key length: expected {KEY_LENGTH}, got {}",
                        bytes.len()
                    ),
                })?;
        Ok(Self::from_bytes(array))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LENGTH] {
        &self.0
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Ciphertext, CryptoError> {
        let cipher = Aes256Gcm::new_from_slice(&self.0[..]).map_err(|e| {
            CryptoError::EncryptionFailed {
                reason: format!("Failed to create cipher: {e}"),
            }
        })?;
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let data = cipher
            .encrypt(&nonce, plaintext)
            .map_err(|e| CryptoError::EncryptionFailed {
                reason: e.to_string(),
            })?;

        let mut bytes = Vec::with_capacity(NONCE_LENGTH + data.len());
        bytes.extend_from_slice(&nonce);
        bytes.extend_from_slice(&data);
        Ok(Ciphertext(bytes))
    }

    /// Decrypt and authenticate `ciphertext`.
    pub fn decrypt(&self, ciphertext: &Ciphertext) -> Result<Zeroizing<Vec<u8>>, CryptoError> {
        if ciphertext.0.len() < NONCE_LENGTH {
            return Err(CryptoError::DecryptionFailed {
                reason: format!(
                    "ciphertext shorter than the {NONCE_LENGTH}-byte nonce ({} bytes)",
                    ciphertext.0.len()
                ),
            });
        }
        let (nonce, data) = ciphertext.0.split_at(NONCE_LENGTH);
        let cipher = Aes256Gcm::new_from_slice(&self.0[..]).map_err(|e| {
            CryptoError::DecryptionFailed {
                reason: format!("Failed to create cipher: {e}"),
            }
        })?;
        cipher
            .decrypt(Nonce::from_slice(nonce), data)
            .map(Zeroizing::new)
            .map_err(|_| CryptoError::DecryptionFailed {
                reason: "authentication failed".to_string(),
            })
    }
}

/// AES-GCM output laid out as `nonce || ciphertext || tag`.
///
/// Serializes as a base64 string.
#[derive(Clone, PartialEq, Eq)]
pub struct Ciphertext(Vec<u8>);

impl Ciphertext {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Ciphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Ciphertext({} bytes)", self.0.len())
    }
}

impl Serialize for Ciphertext {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode_base64(&self.0))
    }
}

impl<'de> Deserialize<'de> for Ciphertext {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        decode_base64(&s)
            .map(Ciphertext)
            .map_err(serde::de::Error::custom)
    }
}
