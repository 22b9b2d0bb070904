//! Client-side accounts and peers.
//!
//! An [`Account`] is the unlocked key material of one user: an Ed25519 signing
//! key, an X25519 encryption secret, and the HMAC key that turns container
//! names into the public names the server sees. The material lives on the
//! server only inside a keyring encrypted with a passphrase-derived key, see
//! [`Account::registration`] and [`Account::unlock`].
//!
//! A [`Peer`] is the public projection of someone else's account.

mod keyring;

use std::fmt;

use crate::Result;
use crate::config::HashingConfig;
use crate::crypto::{
    self, EncryptionPublicKey, EncryptionSecret, PrivateKey, PublicKey, SymmetricKey,
};
use crate::protocol::{AccountRegistration, ChallengeInfo, PeerInfo};

use keyring::Keyring;

/// Unlocked key material for one user.
pub struct Account {
    username: String,
    signing_key: PrivateKey,
    encryption_secret: EncryptionSecret,
    container_name_hmac_key: SymmetricKey,
}

impl fmt::Debug for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Account")
            .field("username", &self.username)
            .field("signing_key", &self.signing_key.public_key())
            .finish_non_exhaustive()
    }
}

impl Account {
    /// Create an account with freshly generated keys.
    pub fn generate(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            signing_key: PrivateKey::generate(),
            encryption_secret: EncryptionSecret::generate(),
            container_name_hmac_key: SymmetricKey::generate(),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn signing_key(&self) -> &PrivateKey {
        &self.signing_key
    }

    pub fn encryption_secret(&self) -> &EncryptionSecret {
        &self.encryption_secret
    }

    pub fn signing_public_key(&self) -> PublicKey {
        self.signing_key.public_key()
    }

    pub fn encryption_public_key(&self) -> EncryptionPublicKey {
        self.encryption_secret.public_key()
    }

    /// The server-visible name of a container: hex HMAC-SHA256 of `name`.
    pub fn container_public_name(&self, name: &str) -> Result<String> {
        Ok(crypto::hmac_hex(
            self.container_name_hmac_key.as_bytes(),
            name.as_bytes(),
        )?)
    }

    /// This account as other accounts see it.
    pub fn peer(&self) -> Peer {
        Peer {
            username: self.username.clone(),
            signing_key: self.signing_public_key(),
            encryption_key: self.encryption_public_key(),
        }
    }

    /// Build the registration request for this account.
    ///
    /// Two independent salts are drawn: one for the challenge key the server
    /// verifies logins against, one for the key that encrypts the keyring. The
    /// server therefore never holds anything that decrypts the keyring.
    pub fn registration(
        &self,
        passphrase: &str,
        params: &HashingConfig,
    ) -> Result<AccountRegistration> {
        let challenge_key_salt = crypto::generate_salt();
        let keyring_salt = crypto::generate_salt();

        let challenge_key = challenge_key(passphrase, &challenge_key_salt, params)?;
        let keyring_key = crypto::derive_key(passphrase, &keyring_salt, params)?;
        let keyring = Keyring::from_account(self).seal(&keyring_key)?;

        Ok(AccountRegistration {
            username: self.username.clone(),
            challenge_key: crypto::encode_base64(challenge_key.as_bytes()),
            challenge_key_salt,
            keyring_salt,
            keyring,
            signing_key: self.signing_public_key(),
            encryption_key: self.encryption_public_key(),
        })
    }

    /// Decrypt the keyring from a challenge response.
    ///
    /// A wrong passphrase fails authentication of the keyring ciphertext.
    pub fn unlock(
        username: impl Into<String>,
        passphrase: &str,
        challenge: &ChallengeInfo,
        params: &HashingConfig,
    ) -> Result<Self> {
        let keyring_key = crypto::derive_key(passphrase, &challenge.keyring_salt, params)?;
        let keyring = Keyring::open(&challenge.keyring, &keyring_key)?;
        keyring.into_account(username.into())
    }
}

/// Length of an encrypted keyring. Every key in it has a fixed encoded size,
/// so the length is the same for every account.
pub(crate) fn sealed_keyring_len() -> Result<usize> {
    let keyring = Keyring::from_account(&Account::generate(""));
    Ok(keyring.seal(&SymmetricKey::generate())?.len())
}

/// Derive the login challenge key for `passphrase`.
pub fn challenge_key(
    passphrase: &str,
    challenge_key_salt: &str,
    params: &HashingConfig,
) -> Result<SymmetricKey> {
    Ok(crypto::derive_key(passphrase, challenge_key_salt, params)?)
}

/// Public keys of another account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub username: String,
    pub signing_key: PublicKey,
    pub encryption_key: EncryptionPublicKey,
}

impl Peer {
    /// Short human-comparable digest of both public keys.
    ///
    /// Two users reading the same fingerprint out loud know they hold the same
    /// keys for this peer.
    pub fn fingerprint(&self) -> String {
        let mut material = Vec::with_capacity(64);
        material.extend_from_slice(&self.signing_key.to_bytes());
        material.extend_from_slice(&self.encryption_key.to_bytes());
        let hash = crypto::digest(&material);

        hex::encode_upper(&hash[..16])
            .as_bytes()
            .chunks(4)
            .map(|chunk| String::from_utf8_lossy(chunk).into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl From<PeerInfo> for Peer {
    fn from(info: PeerInfo) -> Self {
        Self {
            username: info.username,
            signing_key: info.signing_key,
            encryption_key: info.encryption_key,
        }
    }
}

impl From<&Peer> for PeerInfo {
    fn from(peer: &Peer) -> Self {
        Self {
            username: peer.username.clone(),
            signing_key: peer.signing_key.clone(),
            encryption_key: peer.encryption_key,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_then_unlock() {
        let params = HashingConfig::insecure_fast();
        let account = Account::generate("alice");
        let reg = account.registration("hunter2", &params).unwrap();

        assert_eq!(reg.username, "alice");
        assert_ne!(reg.challenge_key_salt, reg.keyring_salt);

        let challenge = ChallengeInfo {
            challenge_key_salt: reg.challenge_key_salt.clone(),
            keyring_salt: reg.keyring_salt.clone(),
            keyring: reg.keyring.clone(),
        };
        let unlocked = Account::unlock("alice", "hunter2", &challenge, &params).unwrap();
        assert_eq!(unlocked.peer(), account.peer());
        assert_eq!(
            unlocked.container_public_name("notes").unwrap(),
            account.container_public_name("notes").unwrap()
        );

        let expected = challenge_key("hunter2", &reg.challenge_key_salt, &params).unwrap();
        assert_eq!(reg.challenge_key, crypto::encode_base64(expected.as_bytes()));
    }

    #[test]
    fn wrong_passphrase_cannot_unlock() {
        let params = HashingConfig::insecure_fast();
        let reg = Account::generate("bob").registration("right", &params).unwrap();
        let challenge = ChallengeInfo {
            challenge_key_salt: reg.challenge_key_salt.clone(),
            keyring_salt: reg.keyring_salt.clone(),
            keyring: reg.keyring.clone(),
        };
        let err = Account::unlock("bob", "wrong", &challenge, &params).unwrap_err();
        assert!(err.is_crypto_error());
    }

    #[test]
    fn public_names_differ_between_accounts() {
        let a = Account::generate("a");
        let b = Account::generate("b");
        assert_ne!(
            a.container_public_name("notes").unwrap(),
            b.container_public_name("notes").unwrap()
        );
    }

    #[test]
    fn fingerprint_shape() {
        let peer = Account::generate("carol").peer();
        let fp = peer.fingerprint();
        assert_eq!(fp.split(' ').count(), 8);
        assert!(fp.split(' ').all(|group| group.len() == 4));
        assert_eq!(fp, peer.clone().fingerprint());
        assert_ne!(fp, Account::generate("carol").peer().fingerprint());
    }
}
