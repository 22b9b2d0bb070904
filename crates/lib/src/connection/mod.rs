//! Client-side transport to a vaultsync server.
//!
//! A [`Connection`] carries one login session. [`LocalConnection`] calls a
//! [`crate::server::Server`] in the same process; [`HttpConnection`] talks to
//! the `vaultsync` binary over HTTP.

pub mod errors;
#[cfg(feature = "http")]
mod http;
mod local;

use async_trait::async_trait;
use serde_json::Value;

pub use errors::ConnectionError;
#[cfg(feature = "http")]
pub use http::HttpConnection;
pub use local::LocalConnection;

use crate::protocol::{
    AccountId, AccountRegistration, ChallengeAnswer, ChallengeInfo, Message, MessageId, PeerInfo,
    Record, TransactionId, TransactionStatus,
};
use crate::transaction::{Chunk, TransactionError};
use crate::{Config, Result};

/// Everything a client asks of the server.
#[async_trait]
pub trait Connection: Send + Sync {
    async fn register(&self, registration: &AccountRegistration) -> Result<AccountId>;

    async fn challenge(&self, username: &str) -> Result<ChallengeInfo>;

    /// Answer a login challenge. On success the connection keeps the session
    /// for every later call.
    async fn answer(&self, username: &str, answer: &ChallengeAnswer) -> Result<AccountId>;

    async fn create_transaction(&self) -> Result<TransactionId>;

    async fn stage(&self, id: TransactionId, chunk: &Chunk) -> Result<()>;

    async fn request_commit(&self, id: TransactionId) -> Result<()>;

    async fn transaction_status(&self, id: TransactionId) -> Result<TransactionStatus>;

    /// Records of a container with index greater than `after`.
    async fn records(&self, container_name_hmac: &str, after: i64) -> Result<Vec<Record>>;

    async fn peer(&self, username: &str) -> Result<PeerInfo>;

    async fn send_message(&self, to_username: &str, headers: Value, body: Value)
    -> Result<MessageId>;

    async fn messages(&self) -> Result<Vec<Message>>;

    /// Request a commit and wait until the server finishes it.
    ///
    /// Polls every `commit_poll_interval` until the transaction is committed
    /// or failed, giving up after `commit_wait_timeout`.
    async fn commit(&self, id: TransactionId, config: &Config) -> Result<()> {
        self.request_commit(id).await?;

        let deadline = tokio::time::Instant::now() + config.commit_wait_timeout();
        loop {
            match self.transaction_status(id).await? {
                TransactionStatus::Committed => return Ok(()),
                TransactionStatus::Failed { kind, reason } => {
                    return Err(TransactionError::CommitFailed { kind, reason }.into());
                }
                _ => {}
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(TransactionError::CommitTimedOut { id }.into());
            }
            tokio::time::sleep(config.commit_poll_interval()).await;
        }
    }
}
