//! Asymmetric key types.
//!
//! Signing keys are Ed25519 and encryption keys are X25519. Both serialize as
//! prefixed strings (`"ed25519:<base64>"`, `"x25519:<base64>"`) so the algorithm
//! travels with the key.

use std::fmt;

use base64ct::{Base64, Encoding};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use zeroize::{ZeroizeOnDrop, Zeroizing};

use super::CryptoError;

/// Size of Ed25519 and X25519 keys in bytes
pub const KEY_SIZE: usize = 32;

/// Size of Ed25519 signatures in bytes
pub const SIGNATURE_SIZE: usize = 64;

const ED25519: &str = "ed25519";
const X25519: &str = "x25519";

fn split_prefixed(s: &str, expected: &str) -> Result<[u8; KEY_SIZE], CryptoError> {
    let (prefix, key_data) = s
        .split_once(':')
        .ok_or_else(|| CryptoError::InvalidKeyFormat {
            reason: "Expected 'algorithm:key' format".to_string(),
        })?;
    if prefix != expected {
        return Err(CryptoError::InvalidKeyFormat {
            reason: format!("Unknown key algorithm prefix: '{prefix}'"),
        });
    }
    let key_bytes = Zeroizing::new(Base64::decode_vec(key_data).map_err(|e| {
        CryptoError::InvalidKeyFormat {
            reason: format!("Invalid base64 for key: {e}"),
        }
    })?);
    key_bytes
        .as_slice()
        .try_into()
        .map_err(|_| CryptoError::InvalidKeyFormat {
            reason: format!(
                "{expected} key must be {KEY_SIZE} bytes, got {}",
                key_bytes.len()
            ),
        })
}

/// Public half of a signing key.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PublicKey {
    /// Ed25519 public key (32 bytes)
    Ed25519(VerifyingKey),
}

impl PublicKey {
    /// Verify a signature over the given data.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> Result<(), CryptoError> {
        match self {
            PublicKey::Ed25519(key) => {
                let sig_array: [u8; SIGNATURE_SIZE] = signature
                    .try_into()
                    .map_err(|_| CryptoError::InvalidSignature)?;
                let sig = Signature::from_bytes(&sig_array);
                key.verify(data, &sig)
                    .map_err(|_| CryptoError::InvalidSignature)
            }
        }
    }

    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        match self {
            PublicKey::Ed25519(key) => key.to_bytes(),
        }
    }

    /// Format the public key as a prefixed string (e.g. `"ed25519:base64..."`).
    pub fn to_prefixed_string(&self) -> String {
        format!("{ED25519}:{}", Base64::encode_string(&self.to_bytes()))
    }

    /// Parse a public key from a prefixed string.
    pub fn from_prefixed_string(s: &str) -> Result<Self, CryptoError> {
        let bytes = split_prefixed(s, ED25519)?;
        let verifying_key =
            VerifyingKey::from_bytes(&bytes).map_err(|e| CryptoError::InvalidKeyFormat {
                reason: e.to_string(),
            })?;
        Ok(PublicKey::Ed25519(verifying_key))
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_prefixed_string())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed_string())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PublicKey::from_prefixed_string(&s).map_err(serde::de::Error::custom)
    }
}

/// Signing key for records and session-key envelopes.
///
/// Secret material is zeroed on drop by the inner key type.
#[non_exhaustive]
#[derive(Clone)]
pub enum PrivateKey {
    /// Ed25519 signing key (32 bytes)
    Ed25519(SigningKey),
}

impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivateKey::Ed25519(_) => f.write_str("PrivateKey::Ed25519([REDACTED])"),
        }
    }
}

impl PrivateKey {
    /// Generate a new Ed25519 key.
    pub fn generate() -> Self {
        PrivateKey::Ed25519(SigningKey::generate(&mut OsRng))
    }

    /// Sign the given data and return the raw signature bytes.
    pub fn sign(&self, data: &[u8]) -> Vec<u8> {
        match self {
            PrivateKey::Ed25519(key) => {
                let signature: Signature = key.sign(data);
                signature.to_bytes().to_vec()
            }
        }
    }

    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
        }
    }

    /// Format the private key as a prefixed string.
    pub fn to_prefixed_string(&self) -> Zeroizing<String> {
        match self {
            PrivateKey::Ed25519(key) => {
                let bytes = Zeroizing::new(key.to_bytes());
                Zeroizing::new(format!("{ED25519}:{}", Base64::encode_string(&bytes[..])))
            }
        }
    }

    /// Parse a private key from a prefixed string.
    pub fn from_prefixed_string(s: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(split_prefixed(s, ED25519)?);
        Ok(PrivateKey::Ed25519(SigningKey::from_bytes(&bytes)))
    }
}

impl ZeroizeOnDrop for PrivateKey {}

impl Serialize for PrivateKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed_string())
    }
}

impl<'de> Deserialize<'de> for PrivateKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Zeroizing::new(String::deserialize(deserializer)?);
        PrivateKey::from_prefixed_string(&s).map_err(serde::de::Error::custom)
    }
}

/// Public X25519 key that session keys are wrapped to.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct EncryptionPublicKey(x25519_dalek::PublicKey);

impl EncryptionPublicKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(x25519_dalek::PublicKey::from(bytes))
    }

    pub fn to_bytes(&self) -> [u8; KEY_SIZE] {
        self.0.to_bytes()
    }

    pub(crate) fn inner(&self) -> &x25519_dalek::PublicKey {
        &self.0
    }

    pub fn to_prefixed_string(&self) -> String {
        format!("{X25519}:{}", Base64::encode_string(self.0.as_bytes()))
    }

    pub fn from_prefixed_string(s: &str) -> Result<Self, CryptoError> {
        split_prefixed(s, X25519).map(Self::from_bytes)
    }
}

impl fmt::Debug for EncryptionPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EncryptionPublicKey({})", self.to_prefixed_string())
    }
}

impl fmt::Display for EncryptionPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_prefixed_string())
    }
}

impl Serialize for EncryptionPublicKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed_string())
    }
}

impl<'de> Deserialize<'de> for EncryptionPublicKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        EncryptionPublicKey::from_prefixed_string(&s).map_err(serde::de::Error::custom)
    }
}

/// Long-lived X25519 secret used to open session-key envelopes.
#[derive(Clone)]
pub struct EncryptionSecret(x25519_dalek::StaticSecret);

impl EncryptionSecret {
    pub fn generate() -> Self {
        Self(x25519_dalek::StaticSecret::random_from_rng(OsRng))
    }

    pub fn public_key(&self) -> EncryptionPublicKey {
        EncryptionPublicKey(x25519_dalek::PublicKey::from(&self.0))
    }

    pub(crate) fn inner(&self) -> &x25519_dalek::StaticSecret {
        &self.0
    }

    pub fn to_prefixed_string(&self) -> Zeroizing<String> {
        let bytes = Zeroizing::new(self.0.to_bytes());
        Zeroizing::new(format!("{X25519}:{}", Base64::encode_string(&bytes[..])))
    }

    pub fn from_prefixed_string(s: &str) -> Result<Self, CryptoError> {
        let bytes = Zeroizing::new(split_prefixed(s, X25519)?);
        Ok(Self(x25519_dalek::StaticSecret::from(*bytes)))
    }
}

impl fmt::Debug for EncryptionSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionSecret([REDACTED])")
    }
}

impl Serialize for EncryptionSecret {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_prefixed_string())
    }
}

impl<'de> Deserialize<'de> for EncryptionSecret {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = Zeroizing::new(String::deserialize(deserializer)?);
        EncryptionSecret::from_prefixed_string(&s).map_err(serde::de::Error::custom)
    }
}
