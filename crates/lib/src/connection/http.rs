//! HTTP connection to the `vaultsync` binary.
//!
//! Every route answers with an [`ApiResponse`] envelope, success or not, so
//! the body is decoded before the status code is looked at.

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{Connection, ConnectionError};
use crate::protocol::{
    AccountId, AccountRegistration, ApiResponse, ChallengeAnswer, ChallengeInfo, Message,
    MessageId, OutgoingMessage, PeerInfo, Record, SESSION_COOKIE, SessionGrant, SessionId,
    TransactionId, TransactionStatus,
};
use crate::transaction::Chunk;
use crate::{ErrorKind, Result};

/// Connection to a remote server over HTTP.
#[derive(Debug)]
pub struct HttpConnection {
    client: Client,
    base_url: String,
    session: RwLock<Option<SessionId>>,
}

impl HttpConnection {
    /// Connect to the server at `base_url`, e.g. `http://127.0.0.1:3000`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            session: RwLock::new(None),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Attach the session cookie, failing when not logged in.
    async fn authed(&self, request: RequestBuilder) -> Result<RequestBuilder> {
        let session = self.session.read().await;
        let session = session.as_ref().ok_or(ConnectionError::NotLoggedIn)?;
        Ok(request.header(COOKIE, format!("{SESSION_COOKIE}={}", session.as_str())))
    }

    /// Send a request and unwrap the response envelope.
    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Option<T>> {
        let response = request.send().await.map_err(ConnectionError::from)?;
        let status = response.status();
        let envelope: ApiResponse<T> = response.json().await.map_err(|e| {
            ConnectionError::InvalidResponse {
                reason: format!("{status}: {e}"),
            }
        })?;

        if envelope.success {
            return Ok(envelope.data);
        }
        Err(ConnectionError::Remote {
            kind: envelope.kind.unwrap_or(ErrorKind::Internal),
            message: envelope.error.unwrap_or_else(|| status.to_string()),
        }
        .into())
    }

    /// Like [`Self::send`] for routes whose success carries a payload.
    async fn fetch<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T> {
        self.send(request).await?.ok_or_else(|| {
            ConnectionError::InvalidResponse {
                reason: "response has no data".to_string(),
            }
            .into()
        })
    }
}

#[async_trait]
impl Connection for HttpConnection {
    async fn register(&self, registration: &AccountRegistration) -> Result<AccountId> {
        self.fetch(self.client.post(self.url("/account")).json(registration))
            .await
    }

    async fn challenge(&self, username: &str) -> Result<ChallengeInfo> {
        self.fetch(self.client.post(self.url(&format!("/account/{username}"))))
            .await
    }

    async fn answer(&self, username: &str, answer: &ChallengeAnswer) -> Result<AccountId> {
        let grant: SessionGrant = self
            .fetch(
                self.client
                    .post(self.url(&format!("/account/{username}/answer")))
                    .json(answer),
            )
            .await?;
        *self.session.write().await = Some(grant.session_id);
        Ok(grant.account_id)
    }

    async fn create_transaction(&self) -> Result<TransactionId> {
        let request = self
            .authed(self.client.post(self.url("/transaction/create")))
            .await?;
        self.fetch(request).await
    }

    async fn stage(&self, id: TransactionId, chunk: &Chunk) -> Result<()> {
        let request = self
            .authed(self.client.post(self.url(&format!("/transaction/{id}"))))
            .await?
            .json(chunk);
        self.send::<Value>(request).await.map(|_| ())
    }

    async fn request_commit(&self, id: TransactionId) -> Result<()> {
        let request = self
            .authed(
                self.client
                    .post(self.url(&format!("/transaction/{id}/commit"))),
            )
            .await?;
        self.send::<Value>(request).await.map(|_| ())
    }

    async fn transaction_status(&self, id: TransactionId) -> Result<TransactionStatus> {
        let request = self
            .authed(self.client.get(self.url(&format!("/transaction/{id}"))))
            .await?;
        self.fetch(request).await
    }

    async fn records(&self, container_name_hmac: &str, after: i64) -> Result<Vec<Record>> {
        let request = self
            .authed(
                self.client
                    .get(self.url(&format!("/container/{container_name_hmac}")))
                    .query(&[("after", after)]),
            )
            .await?;
        self.fetch(request).await
    }

    async fn peer(&self, username: &str) -> Result<PeerInfo> {
        let request = self
            .authed(self.client.get(self.url(&format!("/peer/{username}"))))
            .await?;
        self.fetch(request).await
    }

    async fn send_message(
        &self,
        to_username: &str,
        headers: Value,
        body: Value,
    ) -> Result<MessageId> {
        let request = self
            .authed(
                self.client
                    .post(self.url(&format!("/peer/{to_username}/message"))),
            )
            .await?
            .json(&OutgoingMessage { headers, body });
        self.fetch(request).await
    }

    async fn messages(&self) -> Result<Vec<Message>> {
        let request = self.authed(self.client.get(self.url("/messages"))).await?;
        self.fetch(request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn session_routes_need_login() {
        let connection = HttpConnection::new("http://127.0.0.1:1/");
        assert_eq!(connection.base_url(), "http://127.0.0.1:1");

        let err = connection.create_transaction().await.unwrap_err();
        assert!(matches!(
            err,
            crate::Error::Connection(ConnectionError::NotLoggedIn)
        ));
        assert!(err.is_authentication_error());
    }

    #[tokio::test]
    async fn unreachable_server_is_a_transport_error() {
        let connection = HttpConnection::new("http://127.0.0.1:1");
        let err = connection.challenge("alice").await.unwrap_err();
        match err {
            crate::Error::Connection(err) => assert!(err.is_transport_error()),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
