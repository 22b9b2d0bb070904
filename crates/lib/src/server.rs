//! The server engine.
//!
//! [`Server`] wires a [`Backend`] to account authentication, the transaction
//! log, the commit coordinator and the notifier. Every operation after login
//! takes the caller's [`SessionId`] and resolves it to an account first. The
//! HTTP binary and the in-process [`crate::connection::LocalConnection`] are
//! thin adapters over this type.

use std::sync::Arc;

use serde_json::Value;
use tokio::sync::{Mutex, broadcast};

use crate::auth::{AccountAuth, Argon2Hasher, AuthError, PasswordHasher};
use crate::backend::{Backend, NewMessage};
use crate::commit::{CommitCoordinator, CoordinatorHandle};
use crate::notify::{BroadcastNotifier, Event, Notification, Notifier};
use crate::protocol::{
    AccountId, AccountRegistration, ChallengeAnswer, ChallengeInfo, Message, MessageId, PeerInfo,
    Record, SessionGrant, SessionId, TransactionId, TransactionStatus,
};
use crate::transaction::{Chunk, TransactionLog};
use crate::{Clock, Config, Result, SystemClock};

struct Inner {
    backend: Arc<dyn Backend>,
    clock: Arc<dyn Clock>,
    config: Config,
    auth: AccountAuth,
    log: TransactionLog,
    coordinator: CommitCoordinator,
    notifier: BroadcastNotifier,
    running: Mutex<Option<CoordinatorHandle>>,
}

/// Server facade. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Server {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

impl Server {
    pub fn new(backend: Arc<dyn Backend>, config: Config) -> Self {
        Self::with_clock(backend, config, Arc::new(SystemClock))
    }

    pub fn with_clock(backend: Arc<dyn Backend>, config: Config, clock: Arc<dyn Clock>) -> Self {
        let hasher: Arc<dyn PasswordHasher> = Arc::new(Argon2Hasher::new(config.hashing));
        let notifier = BroadcastNotifier::default();
        let auth = AccountAuth::new(
            backend.clone(),
            hasher,
            clock.clone(),
            config.server_secret.as_deref(),
        );
        let log = TransactionLog::new(backend.clone(), clock.clone());
        let coordinator = CommitCoordinator::new(
            backend.clone(),
            clock.clone(),
            Arc::new(notifier.clone()),
            &config,
        );

        Self {
            inner: Arc::new(Inner {
                backend,
                clock,
                config,
                auth,
                log,
                coordinator,
                notifier,
                running: Mutex::new(None),
            }),
        }
    }

    /// Start the background commit coordinator and precompute the
    /// unknown-user login material. A second call is a no-op.
    pub async fn start(&self) {
        let mut running = self.inner.running.lock().await;
        if running.is_none() {
            if let Err(e) = self.inner.auth.warm_up().await {
                // Logins still work; the first unknown-user answer builds it
                tracing::warn!(error = %e, "Failed to precompute unknown-user hash");
            }
            *running = Some(self.inner.coordinator.start());
        }
    }

    /// Stop the commit coordinator after its current sweep.
    pub async fn shutdown(&self) -> Result<()> {
        let handle = self.inner.running.lock().await.take();
        match handle {
            Some(handle) => handle.shutdown().await,
            None => Ok(()),
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.inner.backend
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// The coordinator, for driving sweeps by hand.
    pub fn coordinator(&self) -> &CommitCoordinator {
        &self.inner.coordinator
    }

    /// Receive every notification the server emits.
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.inner.notifier.subscribe()
    }

    // Accounts and sessions

    pub async fn register(&self, registration: &AccountRegistration) -> Result<AccountId> {
        self.inner.auth.register(registration).await
    }

    pub async fn challenge(&self, username: &str) -> Result<ChallengeInfo> {
        self.inner.auth.challenge(username).await
    }

    pub async fn answer(&self, username: &str, answer: &ChallengeAnswer) -> Result<SessionGrant> {
        self.inner.auth.answer(username, answer).await
    }

    pub async fn logout(&self, session: &SessionId) -> bool {
        self.inner.auth.logout(session).await
    }

    pub async fn account_for_session(&self, session: &SessionId) -> Result<AccountId> {
        self.inner.auth.account_for_session(session).await
    }

    // Transactions

    pub async fn open_transaction(&self, session: &SessionId) -> Result<TransactionId> {
        let account = self.account_for_session(session).await?;
        self.inner.log.open(account).await
    }

    pub async fn stage(&self, session: &SessionId, id: TransactionId, chunk: Chunk) -> Result<()> {
        let account = self.account_for_session(session).await?;
        self.inner.log.stage(account, id, chunk).await
    }

    /// Stage a chunk in its JSON wire form.
    pub async fn stage_json(&self, session: &SessionId, id: TransactionId, json: Value) -> Result<()> {
        let account = self.account_for_session(session).await?;
        self.inner.log.stage_json(account, id, json).await
    }

    pub async fn request_commit(&self, session: &SessionId, id: TransactionId) -> Result<()> {
        let account = self.account_for_session(session).await?;
        self.inner.log.request_commit(account, id).await
    }

    pub async fn transaction_status(
        &self,
        session: &SessionId,
        id: TransactionId,
    ) -> Result<TransactionStatus> {
        let account = self.account_for_session(session).await?;
        self.inner.log.status(account, id).await
    }

    // Containers

    /// Records of a container after index `after`.
    ///
    /// Only accounts holding a session key for the container may read it;
    /// everyone else sees it as missing. The first record of a non-empty batch
    /// carries the caller's session-key envelope.
    pub async fn records(
        &self,
        session: &SessionId,
        container_name_hmac: &str,
        after: i64,
    ) -> Result<Vec<Record>> {
        let account = self.account_for_session(session).await?;
        let backend = &self.inner.backend;

        let session_key = backend
            .session_key(container_name_hmac, account)
            .await?
            .ok_or_else(|| crate::backend::BackendError::NotFound {
                entity: "Container",
                id: container_name_hmac.to_string(),
            })?;

        let stored = backend.records_after(container_name_hmac, after).await?;
        let mut session_key = Some(session_key);
        Ok(stored
            .into_iter()
            .map(|record| Record {
                index: record.index,
                creation_time: record.creation_time,
                session_key: session_key.take(),
                payload: record.payload,
            })
            .collect())
    }

    // Peers and messages

    /// Public keys of another account.
    pub async fn peer(&self, session: &SessionId, username: &str) -> Result<PeerInfo> {
        self.account_for_session(session).await?;
        let row = self
            .inner
            .backend
            .account_by_username(username)
            .await?
            .ok_or_else(|| crate::backend::BackendError::NotFound {
                entity: "Account",
                id: username.to_string(),
            })?;
        Ok(PeerInfo {
            username: row.username,
            signing_key: row.signing_key,
            encryption_key: row.encryption_key,
        })
    }

    /// Persist a message for `to_username`, then announce it.
    pub async fn send_message(
        &self,
        session: &SessionId,
        to_username: &str,
        headers: Value,
        body: Value,
    ) -> Result<MessageId> {
        let from = self.account_for_session(session).await?;
        let backend = &self.inner.backend;

        let sender = backend
            .account_by_id(from)
            .await?
            .ok_or(AuthError::InvalidSession)?;
        let recipient = backend
            .account_by_username(to_username)
            .await?
            .ok_or_else(|| crate::backend::BackendError::NotFound {
                entity: "Account",
                id: to_username.to_string(),
            })?;

        let message = NewMessage {
            id: MessageId::generate(),
            from_account: from,
            from_username: sender.username,
            to_account: recipient.id,
            headers,
            body,
            creation_time: self.inner.clock.now_millis(),
        };
        backend.insert_message(&message).await?;

        tracing::debug!(message = %message.id, to = %recipient.id, "Message stored");
        self.inner.notifier.emit(
            recipient.id,
            Event::Message {
                message: message.to_message(),
            },
        );
        Ok(message.id)
    }

    /// The caller's inbox, oldest first.
    pub async fn messages(&self, session: &SessionId) -> Result<Vec<Message>> {
        let account = self.account_for_session(session).await?;
        self.inner.backend.messages_for(account).await
    }
}
