//! Types shared between client and server.
//!
//! Everything here crosses the process boundary, either over HTTP as JSON or
//! through the in-process connection, so every type is serde-serializable and
//! carries only ciphertext, public keys and opaque identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;
use zeroize::Zeroize;

use crate::ErrorKind;
use crate::crypto::{Ciphertext, EncryptionPublicKey, PublicKey, SealedKey};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// A fresh random identifier.
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl FromStr for $name {
            type Err = uuid::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s).map(Self)
            }
        }
    };
}

uuid_id!(
    /// Server-assigned account identifier.
    AccountId
);
uuid_id!(
    /// Identifier of a staged transaction.
    TransactionId
);
uuid_id!(
    /// Identifier of a persisted message.
    MessageId
);

/// Name of the HTTP cookie that carries the [`SessionId`].
pub const SESSION_COOKIE: &str = "vaultsync.sid";

/// Opaque session token handed out after a successful login.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SessionId([REDACTED])")
    }
}

/// Everything the server stores when an account is created.
///
/// `challenge_key` is the only secret-bearing field: the server hashes it and
/// drops it. It is wiped when this value is dropped.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRegistration {
    pub username: String,
    /// Base64 of the passphrase-derived challenge key.
    pub challenge_key: String,
    pub challenge_key_salt: String,
    pub keyring_salt: String,
    pub keyring: Ciphertext,
    pub signing_key: PublicKey,
    pub encryption_key: EncryptionPublicKey,
}

impl fmt::Debug for AccountRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRegistration")
            .field("username", &self.username)
            .field("challenge_key", &"[REDACTED]")
            .field("signing_key", &self.signing_key)
            .finish_non_exhaustive()
    }
}

impl Drop for AccountRegistration {
    fn drop(&mut self) {
        self.challenge_key.zeroize();
    }
}

/// What a client needs to derive its challenge answer and unlock its keyring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeInfo {
    pub challenge_key_salt: String,
    pub keyring_salt: String,
    pub keyring: Ciphertext,
}

/// Login answer: the re-derived challenge key.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeAnswer {
    /// Base64 of the passphrase-derived challenge key.
    pub challenge_key: String,
}

impl fmt::Debug for ChallengeAnswer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ChallengeAnswer([REDACTED])")
    }
}

impl Drop for ChallengeAnswer {
    fn drop(&mut self) {
        self.challenge_key.zeroize();
    }
}

/// Result of a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionGrant {
    pub account_id: AccountId,
    pub session_id: SessionId,
}

/// Public keys of an account, as served to other accounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerInfo {
    pub username: String,
    pub signing_key: PublicKey,
    pub encryption_key: EncryptionPublicKey,
}

/// Encrypted record body plus the writer's signature over its SHA-256.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedPayload {
    pub ciphertext: Ciphertext,
    /// Base64 Ed25519 signature over `SHA-256(ciphertext)`.
    pub signature: String,
}

/// One stored container record as returned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub index: i64,
    pub creation_time: u64,
    /// Session-key envelope for the requesting account; only set on the first
    /// record of a fetched batch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<SealedKey>,
    pub payload: SignedPayload,
}

/// A message delivered to an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: MessageId,
    pub from_username: String,
    pub headers: Value,
    pub body: Value,
    pub creation_time: u64,
}

/// Body of a send-message request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub headers: Value,
    pub body: Value,
}

/// Where a transaction sits in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TransactionStatus {
    Open,
    CommitRequested,
    Committing,
    Committed,
    Failed { kind: ErrorKind, reason: String },
}

impl TransactionStatus {
    /// Committed or failed; the coordinator will not touch it again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Committed | TransactionStatus::Failed { .. }
        )
    }
}

/// Envelope for every HTTP response body: `{success, error?, kind?, data?}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ErrorKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            error: None,
            kind: None,
            data: Some(data),
        }
    }

    pub fn err(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            kind: Some(kind),
            data: None,
        }
    }
}
