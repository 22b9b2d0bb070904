//! Encrypted-at-rest form of an account's secrets.

use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, Zeroizing};

use super::Account;
use crate::Result;
use crate::crypto::{self, Ciphertext, EncryptionSecret, PrivateKey, SymmetricKey};

#[derive(Serialize, Deserialize)]
pub(super) struct Keyring {
    signing_key: PrivateKey,
    encryption_secret: EncryptionSecret,
    /// Base64 HMAC key for container names.
    container_name_hmac_key: String,
}

impl Drop for Keyring {
    fn drop(&mut self) {
        self.container_name_hmac_key.zeroize();
    }
}

impl Keyring {
    pub(super) fn from_account(account: &Account) -> Self {
        Self {
            signing_key: account.signing_key.clone(),
            encryption_secret: account.encryption_secret.clone(),
            container_name_hmac_key: crypto::encode_base64(
                account.container_name_hmac_key.as_bytes(),
            ),
        }
    }

    pub(super) fn seal(&self, key: &SymmetricKey) -> Result<Ciphertext> {
        let plaintext = Zeroizing::new(serde_json::to_vec(self)?);
        Ok(key.encrypt(&plaintext)?)
    }

    pub(super) fn open(ciphertext: &Ciphertext, key: &SymmetricKey) -> Result<Self> {
        let plaintext = key.decrypt(ciphertext)?;
        Ok(serde_json::from_slice(&plaintext)?)
    }

    pub(super) fn into_account(self, username: String) -> Result<Account> {
        let hmac_key = Zeroizing::new(crypto::decode_base64(&self.container_name_hmac_key)?);
        Ok(Account {
            username,
            signing_key: self.signing_key.clone(),
            encryption_secret: self.encryption_secret.clone(),
            container_name_hmac_key: SymmetricKey::from_slice(&hmac_key)?,
        })
    }
}
