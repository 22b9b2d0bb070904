//! The client context.
//!
//! A [`Session`] is what every client operation runs against: the unlocked
//! [`Account`], the [`Connection`] to the server, the [`Clock`] used for
//! version ids, the [`Config`], and the registry of container watchers. It is
//! created by [`Session::login`] or [`Session::register`] and passed
//! explicitly; there is no global client state.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::account::{self, Account, Peer};
use crate::connection::Connection;
use crate::notify::{Event, Notification};
use crate::protocol::{AccountId, ChallengeAnswer, TransactionId};
use crate::transaction::Chunk;
use crate::{Clock, Config, Result, SystemClock, crypto};

/// Callback invoked with the public name of a container written remotely.
pub type Listener = Arc<dyn Fn(&str) + Send + Sync>;

struct Inner {
    account: Account,
    account_id: AccountId,
    connection: Arc<dyn Connection>,
    clock: Arc<dyn Clock>,
    config: Config,
    watchers: Mutex<HashMap<String, Listener>>,
}

/// A logged-in client. Cloning is cheap and shares all state.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.inner.account.username())
            .field("account_id", &self.inner.account_id)
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Log in with the system clock.
    pub async fn login(
        connection: Arc<dyn Connection>,
        username: &str,
        passphrase: &str,
        config: Config,
    ) -> Result<Self> {
        Self::login_with_clock(connection, username, passphrase, config, Arc::new(SystemClock))
            .await
    }

    /// Run the challenge-response login and unlock the keyring.
    ///
    /// The challenge key and the keyring key come from the same passphrase
    /// under different salts; only the first ever leaves the process.
    pub async fn login_with_clock(
        connection: Arc<dyn Connection>,
        username: &str,
        passphrase: &str,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let challenge = connection.challenge(username).await?;

        let challenge_key =
            account::challenge_key(passphrase, &challenge.challenge_key_salt, &config.hashing)?;
        let answer = ChallengeAnswer {
            challenge_key: crypto::encode_base64(challenge_key.as_bytes()),
        };
        let account_id = connection.answer(username, &answer).await?;

        let account = Account::unlock(username, passphrase, &challenge, &config.hashing)?;
        tracing::debug!(username, %account_id, "Logged in");

        Ok(Self {
            inner: Arc::new(Inner {
                account,
                account_id,
                connection,
                clock,
                config,
                watchers: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// Create a new account with fresh keys, then log in as it.
    pub async fn register(
        connection: Arc<dyn Connection>,
        username: &str,
        passphrase: &str,
        config: Config,
    ) -> Result<Self> {
        Self::register_with_clock(connection, username, passphrase, config, Arc::new(SystemClock))
            .await
    }

    pub async fn register_with_clock(
        connection: Arc<dyn Connection>,
        username: &str,
        passphrase: &str,
        config: Config,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let account = Account::generate(username);
        let registration = account.registration(passphrase, &config.hashing)?;
        let account_id = connection.register(&registration).await?;
        tracing::info!(username, %account_id, "Registered account");

        Self::login_with_clock(connection, username, passphrase, config, clock).await
    }

    pub fn account(&self) -> &Account {
        &self.inner.account
    }

    pub fn account_id(&self) -> AccountId {
        self.inner.account_id
    }

    pub fn username(&self) -> &str {
        self.inner.account.username()
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.inner.connection
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.inner.clock
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Fetch another account's public keys.
    pub async fn peer(&self, username: &str) -> Result<Peer> {
        Ok(self.inner.connection.peer(username).await?.into())
    }

    /// Stage `chunks` in a fresh transaction and wait for it to commit.
    pub(crate) async fn commit(&self, chunks: &[Chunk]) -> Result<TransactionId> {
        let connection = &self.inner.connection;
        let id = connection.create_transaction().await?;
        for chunk in chunks {
            connection.stage(id, chunk).await?;
        }
        connection.commit(id, &self.inner.config).await?;
        Ok(id)
    }

    // Watchers

    /// Register the listener for a container, replacing any earlier one.
    pub(crate) fn watch(&self, public_name: &str, listener: Listener) {
        self.watchers().insert(public_name.to_string(), listener);
    }

    /// Remove the listener for a container. Returns whether one was set.
    pub(crate) fn unwatch(&self, public_name: &str) -> bool {
        self.watchers().remove(public_name).is_some()
    }

    pub fn is_watching(&self, public_name: &str) -> bool {
        self.watchers().contains_key(public_name)
    }

    fn watchers(&self) -> std::sync::MutexGuard<'_, HashMap<String, Listener>> {
        self.inner
            .watchers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Route a server event to the matching container watcher.
    ///
    /// Returns whether a listener ran.
    pub fn dispatch(&self, event: &Event) -> bool {
        let Event::ContainerUpdate {
            container_name_hmac,
        } = event
        else {
            return false;
        };

        // Run the listener outside the lock so it may call back into the session.
        let listener = self.watchers().get(container_name_hmac).cloned();
        match listener {
            Some(listener) => {
                listener(container_name_hmac);
                true
            }
            None => false,
        }
    }

    /// Dispatch every notification addressed to this account until the
    /// channel closes.
    pub fn follow(&self, mut receiver: broadcast::Receiver<Notification>) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Ok(notification) => {
                        if notification.account_id == session.account_id() {
                            session.dispatch(&notification.event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Notification stream lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::backend::database::InMemory;
    use crate::config::HashingConfig;
    use crate::connection::LocalConnection;
    use crate::server::Server;

    fn test_config() -> Config {
        Config {
            hashing: HashingConfig::insecure_fast(),
            commit_sweep_interval_ms: 5,
            ..Config::default()
        }
    }

    fn connection(server: &Server) -> Arc<dyn Connection> {
        Arc::new(LocalConnection::new(server.clone()))
    }

    #[tokio::test]
    async fn register_then_login_again() {
        let server = Server::new(Arc::new(InMemory::new()), test_config());
        let first = Session::register(connection(&server), "alice", "pw", test_config())
            .await
            .unwrap();
        let second = Session::login(connection(&server), "alice", "pw", test_config())
            .await
            .unwrap();

        assert_eq!(first.account_id(), second.account_id());
        assert_eq!(first.account().peer(), second.account().peer());

        let err = Session::login(connection(&server), "alice", "nope", test_config())
            .await
            .unwrap_err();
        assert!(err.is_authentication_error());
    }

    #[tokio::test]
    async fn peer_lookup() {
        let server = Server::new(Arc::new(InMemory::new()), test_config());
        let alice = Session::register(connection(&server), "alice", "pw", test_config())
            .await
            .unwrap();
        let bob = Session::register(connection(&server), "bob", "pw", test_config())
            .await
            .unwrap();

        let seen = alice.peer("bob").await.unwrap();
        assert_eq!(seen, bob.account().peer());
        assert_eq!(seen.fingerprint(), bob.account().peer().fingerprint());
        assert!(alice.peer("nobody").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn dispatch_reaches_only_the_watched_container() {
        let server = Server::new(Arc::new(InMemory::new()), test_config());
        let session = Session::register(connection(&server), "alice", "pw", test_config())
            .await
            .unwrap();

        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        session.watch(
            "abc",
            Arc::new(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        );

        let update = |name: &str| Event::ContainerUpdate {
            container_name_hmac: name.to_string(),
        };
        assert!(session.dispatch(&update("abc")));
        assert!(!session.dispatch(&update("other")));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        assert!(session.unwatch("abc"));
        assert!(!session.dispatch(&update("abc")));
        assert!(!session.is_watching("abc"));
    }
}
