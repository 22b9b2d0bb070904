//! Challenge-response account authentication.
//!
//! The password never leaves the client. From it the client derives a
//! *challenge key* with Argon2id; the server stores only a slow hash of that
//! key and compares against it on login. A second, independently salted
//! derivation encrypts the keyring, so nothing the server holds decrypts it.
//!
//! Login is two requests:
//!
//! 1. [`AccountAuth::challenge`] returns the salts and encrypted keyring for a
//!    username. Unknown usernames get stable fake material so the response does
//!    not reveal whether the account exists.
//! 2. [`AccountAuth::answer`] checks the derived challenge key and opens a
//!    session. Every failure is the same [`AuthError::IncorrectPassword`].

pub mod errors;
pub mod hasher;
pub mod session_store;

use std::sync::Arc;

use base64ct::{Base64Unpadded, Encoding};
use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::OnceCell;
use zeroize::Zeroizing;

pub use errors::AuthError;
pub use hasher::{Argon2Hasher, PasswordHasher};
pub use session_store::SessionStore;

use crate::backend::{AccountRow, Backend};
use crate::crypto::{self, Ciphertext, KEY_LENGTH};
use crate::protocol::{
    AccountId, AccountRegistration, ChallengeAnswer, ChallengeInfo, SessionGrant, SessionId,
};
use crate::{Clock, Result, account};

/// Longest accepted username.
pub const MAX_USERNAME_LENGTH: usize = 64;

/// Byte length of fake salts before encoding; matches a real 22-char salt.
const FAKE_SALT_BYTES: usize = 16;

/// Check a username: 1 to 64 characters from `[A-Za-z0-9._-]`.
pub fn validate_username(username: &str) -> std::result::Result<(), AuthError> {
    if username.is_empty() {
        return Err(AuthError::InvalidUsername {
            reason: "username is empty".to_string(),
        });
    }
    if username.chars().count() > MAX_USERNAME_LENGTH {
        return Err(AuthError::InvalidUsername {
            reason: format!("username is longer than {MAX_USERNAME_LENGTH} characters"),
        });
    }
    if let Some(c) = username
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(AuthError::InvalidUsername {
            reason: format!("username contains invalid character {c:?}"),
        });
    }
    Ok(())
}

/// Account registration, challenges, logins and sessions.
pub struct AccountAuth {
    backend: Arc<dyn Backend>,
    hasher: Arc<dyn PasswordHasher>,
    sessions: SessionStore,
    clock: Arc<dyn Clock>,
    server_secret: Zeroizing<Vec<u8>>,
    /// Hash verified against when the username is unknown.
    dummy_hash: OnceCell<String>,
    keyring_len: OnceCell<usize>,
}

impl AccountAuth {
    /// `server_secret` keys the fake challenge material for unknown users; a
    /// random one is generated when `None`.
    pub fn new(
        backend: Arc<dyn Backend>,
        hasher: Arc<dyn PasswordHasher>,
        clock: Arc<dyn Clock>,
        server_secret: Option<&str>,
    ) -> Self {
        let server_secret = match server_secret {
            Some(secret) => Zeroizing::new(secret.as_bytes().to_vec()),
            None => Zeroizing::new(crypto::random_bytes(KEY_LENGTH)),
        };
        Self {
            backend,
            hasher,
            sessions: SessionStore::new(),
            clock,
            server_secret,
            dummy_hash: OnceCell::new(),
            keyring_len: OnceCell::new(),
        }
    }

    /// Build the unknown-user hash and fake keyring length ahead of the first
    /// login, so the first unknown-user answer costs the same as any other.
    pub async fn warm_up(&self) -> Result<()> {
        self.dummy_hash().await?;
        self.keyring_len
            .get_or_try_init(|| async { account::sealed_keyring_len() })
            .await?;
        Ok(())
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Create an account. The challenge key is hashed and then wiped.
    pub async fn register(&self, registration: &AccountRegistration) -> Result<AccountId> {
        validate_username(&registration.username)?;
        validate_salt(&registration.challenge_key_salt, "challenge key salt")?;
        validate_salt(&registration.keyring_salt, "keyring salt")?;
        if registration.keyring.is_empty() {
            return Err(AuthError::InvalidRegistration {
                reason: "keyring is empty".to_string(),
            }
            .into());
        }

        let challenge_key = decode_challenge_key(&registration.challenge_key).ok_or_else(|| {
            AuthError::InvalidRegistration {
                reason: format!("challenge key must be {KEY_LENGTH} base64-encoded bytes"),
            }
        })?;
        let challenge_key_hash = self.hash(challenge_key).await?;

        let row = AccountRow {
            id: AccountId::generate(),
            username: registration.username.clone(),
            challenge_key_hash,
            challenge_key_salt: registration.challenge_key_salt.clone(),
            keyring_salt: registration.keyring_salt.clone(),
            keyring: registration.keyring.clone(),
            signing_key: registration.signing_key.clone(),
            encryption_key: registration.encryption_key,
            created_time: self.clock.now_millis(),
        };
        self.backend.insert_account(&row).await?;

        tracing::info!(account = %row.id, username = %row.username, "Registered account");
        Ok(row.id)
    }

    /// Salts and keyring for `username`; deterministic fakes when it does not
    /// exist.
    pub async fn challenge(&self, username: &str) -> Result<ChallengeInfo> {
        match self.backend.account_by_username(username).await? {
            Some(row) => Ok(ChallengeInfo {
                challenge_key_salt: row.challenge_key_salt,
                keyring_salt: row.keyring_salt,
                keyring: row.keyring,
            }),
            None => self.fake_challenge(username).await,
        }
    }

    /// Verify a challenge answer and open a session.
    pub async fn answer(&self, username: &str, answer: &ChallengeAnswer) -> Result<SessionGrant> {
        let account = self.backend.account_by_username(username).await?;
        let stored_hash = match &account {
            Some(row) => row.challenge_key_hash.clone(),
            None => self.dummy_hash().await?.clone(),
        };

        // A malformed answer is still run through the hasher
        let (challenge_key, well_formed) = match decode_challenge_key(&answer.challenge_key) {
            Some(key) => (key, true),
            None => (Zeroizing::new(String::new()), false),
        };
        let verified = self.verify(challenge_key, stored_hash).await?;

        match account {
            Some(row) if verified && well_formed => {
                let session_id = self.sessions.create(row.id).await;
                tracing::debug!(account = %row.id, "Login succeeded");
                Ok(SessionGrant {
                    account_id: row.id,
                    session_id,
                })
            }
            _ => {
                tracing::debug!("Login failed");
                Err(AuthError::IncorrectPassword.into())
            }
        }
    }

    /// The account behind a live session.
    pub async fn account_for_session(&self, session_id: &SessionId) -> Result<AccountId> {
        self.sessions
            .account(session_id)
            .await
            .ok_or_else(|| AuthError::InvalidSession.into())
    }

    pub async fn logout(&self, session_id: &SessionId) -> bool {
        self.sessions.destroy(session_id).await
    }

    async fn hash(&self, secret: Zeroizing<String>) -> Result<String> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.hash(secret.as_bytes()))
            .await
            .map_err(|e| AuthError::HashingFailed {
                reason: e.to_string(),
            })?
    }

    async fn verify(&self, secret: Zeroizing<String>, hash: String) -> Result<bool> {
        let hasher = self.hasher.clone();
        tokio::task::spawn_blocking(move || hasher.verify(secret.as_bytes(), &hash))
            .await
            .map_err(|e| AuthError::HashingFailed {
                reason: e.to_string(),
            })?
    }

    async fn dummy_hash(&self) -> Result<&String> {
        self.dummy_hash
            .get_or_try_init(|| async {
                let secret = Zeroizing::new(hex::encode(crypto::random_bytes(KEY_LENGTH)));
                self.hash(secret).await
            })
            .await
    }

    async fn fake_challenge(&self, username: &str) -> Result<ChallengeInfo> {
        let keyring_len = *self
            .keyring_len
            .get_or_try_init(|| async { account::sealed_keyring_len() })
            .await?;

        let mut keyring = vec![0u8; keyring_len];
        Hkdf::<Sha256>::new(Some(&b"vaultsync.fake-keyring"[..]), &self.server_secret)
            .expand(username.as_bytes(), &mut keyring)
            .map_err(|e| AuthError::HashingFailed {
                reason: format!("fake keyring expansion failed: {e}"),
            })?;

        Ok(ChallengeInfo {
            challenge_key_salt: self.fake_salt("challenge-key-salt", username)?,
            keyring_salt: self.fake_salt("keyring-salt", username)?,
            keyring: Ciphertext::from_bytes(keyring),
        })
    }

    fn fake_salt(&self, label: &str, username: &str) -> Result<String> {
        let mut mac = Hmac::<Sha256>::new_from_slice(&self.server_secret).map_err(|e| {
            AuthError::HashingFailed {
                reason: format!("server secret rejected: {e}"),
            }
        })?;
        mac.update(label.as_bytes());
        mac.update(&[0]);
        mac.update(username.as_bytes());
        let bytes = mac.finalize().into_bytes();
        Ok(Base64Unpadded::encode_string(&bytes[..FAKE_SALT_BYTES]))
    }
}

/// Base64 challenge key to the hex string that gets hashed.
fn decode_challenge_key(encoded: &str) -> Option<Zeroizing<String>> {
    let bytes = Zeroizing::new(crypto::decode_base64(encoded).ok()?);
    if bytes.len() != KEY_LENGTH {
        return None;
    }
    Some(Zeroizing::new(hex::encode(&*bytes)))
}

fn validate_salt(salt: &str, what: &str) -> std::result::Result<(), AuthError> {
    if salt.len() < 8 || salt.len() > 64 {
        return Err(AuthError::InvalidRegistration {
            reason: format!("{what} must be 8 to 64 characters"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FixedClock;
    use crate::account::Account;
    use crate::backend::database::InMemory;
    use crate::config::HashingConfig;

    fn auth() -> AccountAuth {
        AccountAuth::new(
            Arc::new(InMemory::new()),
            Arc::new(Argon2Hasher::new(HashingConfig::insecure_fast())),
            Arc::new(FixedClock::default()),
            Some("server secret"),
        )
    }

    fn answer_for(passphrase: &str, info: &ChallengeInfo) -> ChallengeAnswer {
        let key = account::challenge_key(
            passphrase,
            &info.challenge_key_salt,
            &HashingConfig::insecure_fast(),
        )
        .unwrap();
        ChallengeAnswer {
            challenge_key: crypto::encode_base64(key.as_bytes()),
        }
    }

    /// Argon2 that counts how often it hashes.
    #[derive(Default)]
    struct CountingHasher {
        hashes: std::sync::atomic::AtomicUsize,
    }

    impl PasswordHasher for CountingHasher {
        fn hash(&self, secret: &[u8]) -> Result<String> {
            self.hashes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Argon2Hasher::new(HashingConfig::insecure_fast()).hash(secret)
        }

        fn verify(&self, secret: &[u8], hash: &str) -> Result<bool> {
            Argon2Hasher::new(HashingConfig::insecure_fast()).verify(secret, hash)
        }
    }

    #[tokio::test]
    async fn warmed_up_auth_does_not_hash_during_unknown_user_login() {
        let hasher = Arc::new(CountingHasher::default());
        let auth = AccountAuth::new(
            Arc::new(InMemory::new()),
            hasher.clone(),
            Arc::new(FixedClock::default()),
            None,
        );
        let hashes = || hasher.hashes.load(std::sync::atomic::Ordering::SeqCst);

        auth.warm_up().await.unwrap();
        assert_eq!(hashes(), 1);

        let answer = ChallengeAnswer {
            challenge_key: crypto::encode_base64(&crypto::random_bytes(KEY_LENGTH)),
        };
        let err = auth.answer("nobody", &answer).await.unwrap_err();
        assert!(err.is_authentication_error());
        assert_eq!(hashes(), 1);

        // Idempotent
        auth.warm_up().await.unwrap();
        assert_eq!(hashes(), 1);
    }

    #[tokio::test]
    async fn register_and_login() {
        let auth = auth();
        let reg = Account::generate("alice")
            .registration("hunter2", &HashingConfig::insecure_fast())
            .unwrap();
        let account_id = auth.register(&reg).await.unwrap();

        let info = auth.challenge("alice").await.unwrap();
        assert_eq!(info.challenge_key_salt, reg.challenge_key_salt);

        let grant = auth
            .answer("alice", &answer_for("hunter2", &info))
            .await
            .unwrap();
        assert_eq!(grant.account_id, account_id);
        assert_eq!(
            auth.account_for_session(&grant.session_id).await.unwrap(),
            account_id
        );

        assert!(auth.logout(&grant.session_id).await);
        let err = auth
            .account_for_session(&grant.session_id)
            .await
            .unwrap_err();
        assert!(err.is_authentication_error());
    }

    #[tokio::test]
    async fn stored_row_has_no_plaintext_key() {
        let backend = Arc::new(InMemory::new());
        let auth = AccountAuth::new(
            backend.clone(),
            Arc::new(Argon2Hasher::new(HashingConfig::insecure_fast())),
            Arc::new(FixedClock::default()),
            None,
        );
        let reg = Account::generate("bob")
            .registration("pw", &HashingConfig::insecure_fast())
            .unwrap();
        auth.register(&reg).await.unwrap();

        let row = backend.account_by_username("bob").await.unwrap().unwrap();
        let raw = crypto::decode_base64(&reg.challenge_key).unwrap();
        assert!(row.challenge_key_hash.starts_with("$argon2id$"));
        assert!(!row.challenge_key_hash.contains(&hex::encode(&raw)));
        assert!(!row.challenge_key_hash.contains(&reg.challenge_key));
    }

    #[tokio::test]
    async fn failures_are_indistinguishable() {
        let auth = auth();
        let reg = Account::generate("carol")
            .registration("right", &HashingConfig::insecure_fast())
            .unwrap();
        auth.register(&reg).await.unwrap();

        let info = auth.challenge("carol").await.unwrap();
        let wrong = auth
            .answer("carol", &answer_for("wrong", &info))
            .await
            .unwrap_err();

        let ghost_info = auth.challenge("ghost").await.unwrap();
        let missing = auth
            .answer("ghost", &answer_for("right", &ghost_info))
            .await
            .unwrap_err();

        assert_eq!(wrong.to_string(), missing.to_string());
        assert_eq!(wrong.kind(), missing.kind());
        assert!(wrong.is_authentication_error());
    }

    #[tokio::test]
    async fn fake_challenges_are_stable_and_realistic() {
        let auth = auth();
        let reg = Account::generate("dave")
            .registration("pw", &HashingConfig::insecure_fast())
            .unwrap();
        auth.register(&reg).await.unwrap();
        let real = auth.challenge("dave").await.unwrap();

        let a = auth.challenge("nobody").await.unwrap();
        let b = auth.challenge("nobody").await.unwrap();
        assert_eq!(a, b);
        assert_ne!(a, auth.challenge("somebody").await.unwrap());

        assert_eq!(a.challenge_key_salt.len(), real.challenge_key_salt.len());
        assert_eq!(a.keyring_salt.len(), real.keyring_salt.len());
        assert_eq!(a.keyring.len(), real.keyring.len());
    }

    #[tokio::test]
    async fn duplicate_username_is_a_constraint() {
        let auth = auth();
        let params = HashingConfig::insecure_fast();
        auth.register(&Account::generate("erin").registration("a", &params).unwrap())
            .await
            .unwrap();
        let err = auth
            .register(&Account::generate("erin").registration("b", &params).unwrap())
            .await
            .unwrap_err();
        assert!(err.is_constraint_violation());
    }

    #[test]
    fn username_rules() {
        assert!(validate_username("alice.smith-2_x").is_ok());
        assert!(validate_username("").is_err());
        assert!(validate_username("has space").is_err());
        assert!(validate_username(&"a".repeat(65)).is_err());
        assert!(validate_username(&"a".repeat(64)).is_ok());
    }
}
