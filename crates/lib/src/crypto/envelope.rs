//! Session-key envelopes.
//!
//! A container's session key is wrapped to a recipient's X25519 key: an
//! ephemeral key agreement feeds HKDF-SHA256, whose output encrypts the session
//! key with AES-256-GCM. The sender signs the wrapped bytes so the recipient can
//! tell which account produced the envelope.

use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use x25519_dalek::EphemeralSecret;
use zeroize::Zeroizing;

use super::{
    Ciphertext, CryptoError, EncryptionPublicKey, EncryptionSecret, KEY_LENGTH, PrivateKey,
    PublicKey, SymmetricKey, decode_base64, encode_base64,
};

const HKDF_SALT: &[u8] = b"vaultsync.session-key.v1";
const HKDF_INFO: &[u8] = b"session key wrap";

/// A session key wrapped to one recipient and signed by its sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedKey {
    /// Sender's ephemeral X25519 public key.
    pub ephemeral: EncryptionPublicKey,
    pub ciphertext: Ciphertext,
    /// Base64 Ed25519 signature over `ephemeral || ciphertext`.
    pub signature: String,
}

fn wrapping_key(shared: &[u8]) -> Result<SymmetricKey, CryptoError> {
    let hkdf = Hkdf::<Sha256>::new(Some(HKDF_SALT), shared);
    let mut okm = Zeroizing::new([0u8; KEY_LENGTH]);
    hkdf.expand(HKDF_INFO, &mut okm[..])
        .map_err(|e| CryptoError::KeyDerivationFailed {
            reason: format!("HKDF expansion failed: {e}"),
        })?;
    Ok(SymmetricKey::from_bytes(*okm))
}

impl SealedKey {
    /// Wrap `key` to `recipient` and sign the result with `sender`.
    pub fn seal(
        key: &SymmetricKey,
        recipient: &EncryptionPublicKey,
        sender: &PrivateKey,
    ) -> Result<Self, CryptoError> {
        let ephemeral_secret = EphemeralSecret::random_from_rng(rand::rngs::OsRng);
        let ephemeral = EncryptionPublicKey::from_bytes(
            x25519_dalek::PublicKey::from(&ephemeral_secret).to_bytes(),
        );
        let shared = ephemeral_secret.diffie_hellman(recipient.inner());

        let ciphertext = wrapping_key(shared.as_bytes())?.encrypt(key.as_bytes())?;
        let signature = encode_base64(&sender.sign(&signed_bytes(&ephemeral, &ciphertext)));

        Ok(Self {
            ephemeral,
            ciphertext,
            signature,
        })
    }

    /// Check the sender's signature, then unwrap with the recipient's secret.
    pub fn open(
        &self,
        recipient: &EncryptionSecret,
        sender: &PublicKey,
    ) -> Result<SymmetricKey, CryptoError> {
        let signature = decode_base64(&self.signature)?;
        sender.verify(&signed_bytes(&self.ephemeral, &self.ciphertext), &signature)?;

        let shared = recipient.inner().diffie_hellman(self.ephemeral.inner());
        let plaintext = wrapping_key(shared.as_bytes())?.decrypt(&self.ciphertext)?;
        SymmetricKey::from_slice(&plaintext)
    }
}

fn signed_bytes(ephemeral: &EncryptionPublicKey, ciphertext: &Ciphertext) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(32 + ciphertext.len());
    bytes.extend_from_slice(&ephemeral.to_bytes());
    bytes.extend_from_slice(ciphertext.as_bytes());
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_and_open() {
        let session_key = SymmetricKey::generate();
        let recipient = EncryptionSecret::generate();
        let sender = PrivateKey::generate();

        let sealed = SealedKey::seal(&session_key, &recipient.public_key(), &sender).unwrap();
        let opened = sealed.open(&recipient, &sender.public_key()).unwrap();
        assert_eq!(opened, session_key);
    }

    #[test]
    fn wrong_sender_is_rejected() {
        let recipient = EncryptionSecret::generate();
        let sealed = SealedKey::seal(
            &SymmetricKey::generate(),
            &recipient.public_key(),
            &PrivateKey::generate(),
        )
        .unwrap();

        let err = sealed
            .open(&recipient, &PrivateKey::generate().public_key())
            .unwrap_err();
        assert!(matches!(err, CryptoError::InvalidSignature));
    }

    #[test]
    fn wrong_recipient_cannot_open() {
        let sender = PrivateKey::generate();
        let sealed = SealedKey::seal(
            &SymmetricKey::generate(),
            &EncryptionSecret::generate().public_key(),
            &sender,
        )
        .unwrap();

        let err = sealed
            .open(&EncryptionSecret::generate(), &sender.public_key())
            .unwrap_err();
        assert!(err.is_integrity_error());
    }
}
