use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Connection, ConnectionError};
use crate::Result;
use crate::protocol::{
    AccountId, AccountRegistration, ChallengeAnswer, ChallengeInfo, Message, MessageId, PeerInfo,
    Record, SessionId, TransactionId, TransactionStatus,
};
use crate::server::Server;
use crate::transaction::Chunk;

/// In-process connection to a [`Server`].
///
/// Errors come back exactly as the server raised them.
#[derive(Debug)]
pub struct LocalConnection {
    server: Server,
    session: RwLock<Option<SessionId>>,
}

impl LocalConnection {
    pub fn new(server: Server) -> Self {
        Self {
            server,
            session: RwLock::new(None),
        }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    async fn session(&self) -> Result<SessionId> {
        self.session
            .read()
            .await
            .clone()
            .ok_or_else(|| ConnectionError::NotLoggedIn.into())
    }
}

#[async_trait]
impl Connection for LocalConnection {
    async fn register(&self, registration: &AccountRegistration) -> Result<AccountId> {
        self.server.register(registration).await
    }

    async fn challenge(&self, username: &str) -> Result<ChallengeInfo> {
        self.server.challenge(username).await
    }

    async fn answer(&self, username: &str, answer: &ChallengeAnswer) -> Result<AccountId> {
        let grant = self.server.answer(username, answer).await?;
        *self.session.write().await = Some(grant.session_id);
        Ok(grant.account_id)
    }

    async fn create_transaction(&self) -> Result<TransactionId> {
        self.server.open_transaction(&self.session().await?).await
    }

    async fn stage(&self, id: TransactionId, chunk: &Chunk) -> Result<()> {
        self.server
            .stage(&self.session().await?, id, chunk.clone())
            .await
    }

    async fn request_commit(&self, id: TransactionId) -> Result<()> {
        self.server.request_commit(&self.session().await?, id).await
    }

    async fn transaction_status(&self, id: TransactionId) -> Result<TransactionStatus> {
        self.server
            .transaction_status(&self.session().await?, id)
            .await
    }

    async fn records(&self, container_name_hmac: &str, after: i64) -> Result<Vec<Record>> {
        self.server
            .records(&self.session().await?, container_name_hmac, after)
            .await
    }

    async fn peer(&self, username: &str) -> Result<PeerInfo> {
        self.server.peer(&self.session().await?, username).await
    }

    async fn send_message(
        &self,
        to_username: &str,
        headers: Value,
        body: Value,
    ) -> Result<MessageId> {
        self.server
            .send_message(&self.session().await?, to_username, headers, body)
            .await
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        self.server.messages(&self.session().await?).await
    }
}
