//! Plaintext record bodies and their sealed form.

use serde::{Deserialize, Serialize};

use super::ContainerError;
use crate::Result;
use crate::crypto::{self, PrivateKey, PublicKey, SymmetricKey};
use crate::diff::Diff;
use crate::protocol::SignedPayload;

/// What a record decrypts to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RecordPayload {
    /// Must match the index the server stored the record under.
    pub record_index: i64,
    pub delta: Diff,
    /// A compact record holds a full state and replays onto the empty map.
    pub compact: bool,
}

impl RecordPayload {
    /// Encrypt under the session key and sign the ciphertext's SHA-256.
    pub fn seal(&self, session_key: &SymmetricKey, signer: &PrivateKey) -> Result<SignedPayload> {
        let plaintext = zeroize::Zeroizing::new(serde_json::to_vec(self)?);
        let ciphertext = session_key.encrypt(&plaintext)?;
        let signature = signer.sign(&crypto::digest(ciphertext.as_bytes()));
        Ok(SignedPayload {
            ciphertext,
            signature: crypto::encode_base64(&signature),
        })
    }

    /// Verify the writer's signature, decrypt, and check the embedded index.
    pub fn open(
        payload: &SignedPayload,
        index: i64,
        session_key: &SymmetricKey,
        writer: &PublicKey,
    ) -> Result<Self> {
        let malformed = |reason: String| ContainerError::MalformedRecord { index, reason };

        let signature =
            crypto::decode_base64(&payload.signature).map_err(|e| malformed(e.to_string()))?;
        writer
            .verify(&crypto::digest(payload.ciphertext.as_bytes()), &signature)
            .map_err(|e| malformed(e.to_string()))?;

        let plaintext = session_key
            .decrypt(&payload.ciphertext)
            .map_err(|e| malformed(e.to_string()))?;
        let record: RecordPayload =
            serde_json::from_slice(&plaintext).map_err(|e| malformed(e.to_string()))?;

        if record.record_index != index {
            return Err(malformed(format!(
                "payload claims index {}",
                record.record_index
            ))
            .into());
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diff;
    use serde_json::json;

    fn payload(index: i64) -> RecordPayload {
        let new = [("a".to_string(), json!("1"))].into();
        RecordPayload {
            record_index: index,
            delta: diff::create(&Default::default(), &new),
            compact: false,
        }
    }

    #[test]
    fn seal_then_open() {
        let key = SymmetricKey::generate();
        let signer = PrivateKey::generate();
        let sealed = payload(2).seal(&key, &signer).unwrap();

        let opened = RecordPayload::open(&sealed, 2, &key, &signer.public_key()).unwrap();
        assert_eq!(opened, payload(2));
    }

    #[test]
    fn wrong_writer_or_index_is_malformed() {
        let key = SymmetricKey::generate();
        let signer = PrivateKey::generate();
        let sealed = payload(2).seal(&key, &signer).unwrap();

        let err = RecordPayload::open(&sealed, 2, &key, &PrivateKey::generate().public_key())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Container(ContainerError::MalformedRecord { index: 2, .. })
        ));

        let err = RecordPayload::open(&sealed, 3, &key, &signer.public_key()).unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Container(ContainerError::MalformedRecord { index: 3, .. })
        ));
    }

    #[test]
    fn wrong_session_key_cannot_decrypt() {
        let signer = PrivateKey::generate();
        let sealed = payload(1).seal(&SymmetricKey::generate(), &signer).unwrap();
        assert!(
            RecordPayload::open(&sealed, 1, &SymmetricKey::generate(), &signer.public_key())
                .is_err()
        );
    }
}
