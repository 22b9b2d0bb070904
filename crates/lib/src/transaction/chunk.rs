//! The typed units of work a transaction carries.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::TransactionError;
use crate::crypto::SealedKey;
use crate::protocol::SignedPayload;

/// One staged write.
///
/// On the wire a chunk is a JSON object whose `type` field selects the variant,
/// e.g. `{"type": "addContainer", "containerNameHmac": "…"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Chunk {
    /// Register a new container name.
    AddContainer { container_name_hmac: String },

    /// The owner's own session-key envelope.
    AddContainerSessionKey {
        container_name_hmac: String,
        session_key: SealedKey,
    },

    /// A session-key envelope for another account.
    AddContainerSessionKeyShare {
        container_name_hmac: String,
        to_username: String,
        session_key: SealedKey,
    },

    /// Append one encrypted diff.
    AddContainerRecord {
        container_name_hmac: String,
        record_index: i64,
        payload: SignedPayload,
    },

    /// Append a full-state record and drop every earlier one.
    CompactContainer {
        container_name_hmac: String,
        record_index: i64,
        payload: SignedPayload,
    },
}

/// Wire tags, in declaration order.
pub const CHUNK_TYPES: &[&str] = &[
    "addContainer",
    "addContainerSessionKey",
    "addContainerSessionKeyShare",
    "addContainerRecord",
    "compactContainer",
];

impl Chunk {
    /// Parse the wire form, rejecting unknown tags before looking at the body.
    pub fn from_json(value: Value) -> Result<Self, TransactionError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| TransactionError::InvalidTransactionType {
                kind: "<missing>".to_string(),
            })?;
        if !CHUNK_TYPES.contains(&kind) {
            return Err(TransactionError::InvalidTransactionType {
                kind: kind.to_string(),
            });
        }
        serde_json::from_value(value).map_err(|e| TransactionError::InvalidChunk {
            reason: e.to_string(),
        })
    }

    /// The wire tag of this chunk.
    pub fn kind(&self) -> &'static str {
        match self {
            Chunk::AddContainer { .. } => CHUNK_TYPES[0],
            Chunk::AddContainerSessionKey { .. } => CHUNK_TYPES[1],
            Chunk::AddContainerSessionKeyShare { .. } => CHUNK_TYPES[2],
            Chunk::AddContainerRecord { .. } => CHUNK_TYPES[3],
            Chunk::CompactContainer { .. } => CHUNK_TYPES[4],
        }
    }

    /// The public name of the container this chunk writes to.
    pub fn container_name_hmac(&self) -> &str {
        match self {
            Chunk::AddContainer {
                container_name_hmac,
            }
            | Chunk::AddContainerSessionKey {
                container_name_hmac,
                ..
            }
            | Chunk::AddContainerSessionKeyShare {
                container_name_hmac,
                ..
            }
            | Chunk::AddContainerRecord {
                container_name_hmac,
                ..
            }
            | Chunk::CompactContainer {
                container_name_hmac,
                ..
            } => container_name_hmac,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Ciphertext;
    use serde_json::json;

    fn record_chunk() -> Chunk {
        Chunk::AddContainerRecord {
            container_name_hmac: "abc".to_string(),
            record_index: 3,
            payload: SignedPayload {
                ciphertext: Ciphertext::from_bytes(vec![1, 2, 3]),
                signature: "c2ln".to_string(),
            },
        }
    }

    #[test]
    fn wire_form_uses_type_tag() {
        let wire = serde_json::to_value(record_chunk()).unwrap();
        assert_eq!(wire["type"], "addContainerRecord");
        assert_eq!(wire["containerNameHmac"], "abc");
        assert_eq!(wire["recordIndex"], 3);
        assert_eq!(Chunk::from_json(wire).unwrap(), record_chunk());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = Chunk::from_json(json!({"type": "dropTables", "containerNameHmac": "x"}))
            .unwrap_err();
        assert!(matches!(
            err,
            TransactionError::InvalidTransactionType { ref kind } if kind == "dropTables"
        ));
        assert!(err.is_validation_error());

        let err = Chunk::from_json(json!({"containerNameHmac": "x"})).unwrap_err();
        assert!(matches!(err, TransactionError::InvalidTransactionType { .. }));
    }

    #[test]
    fn known_type_with_bad_body() {
        let err = Chunk::from_json(json!({"type": "addContainerRecord"})).unwrap_err();
        assert!(matches!(err, TransactionError::InvalidChunk { .. }));
    }

    #[test]
    fn kinds_match_serde_tags() {
        let chunk = Chunk::AddContainer {
            container_name_hmac: "n".to_string(),
        };
        let wire = serde_json::to_value(&chunk).unwrap();
        assert_eq!(wire["type"], chunk.kind());
        assert_eq!(record_chunk().container_name_hmac(), "abc");
    }
}
