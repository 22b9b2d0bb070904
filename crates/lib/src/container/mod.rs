//! Encrypted, versioned key-value containers.
//!
//! A [`Container`] keeps its working state in memory and mirrors it to the
//! server as a chain of records. Each record is an encrypted, signed
//! [`Diff`] against the previous version; the server stores the records under
//! the container's public name and never sees a key, a value or the real name.
//!
//! Writes go through [`Container::save`] and are applied locally only after
//! the server has committed them. [`Container::sync`] replays new records in
//! strict index order into scratch copies and swaps them in only when every
//! record verified and applied.
//!
//! ```text
//! create ──► add/set/remove ──► save ──► (server) ──► sync on other clients
//! ```

mod errors;
mod record;
mod version;

pub use errors::ContainerError;
pub use version::VersionId;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use crate::account::Peer;
use crate::crypto::{SealedKey, SymmetricKey};
use crate::diff::{self, Diff, Snapshot};
use crate::protocol::Record;
use crate::session::Session;
use crate::transaction::Chunk;
use crate::Result;

use record::RecordPayload;

/// Message header `type` announcing a share to its recipient.
pub const CONTAINER_SHARE_MESSAGE: &str = "containerShare";

/// Local projection of one container.
pub struct Container {
    session: Session,
    name: String,
    public_name: String,
    /// The account whose key signs records and envelopes.
    owner: Peer,
    session_key: Option<SymmetricKey>,
    keys: Snapshot,
    versions: BTreeMap<VersionId, Snapshot>,
    version: Option<VersionId>,
    record_index: i64,
    record_count: usize,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Container")
            .field("name", &self.name)
            .field("public_name", &self.public_name)
            .field("owner", &self.owner.username)
            .field("record_index", &self.record_index)
            .field("keys", &self.keys.len())
            .finish_non_exhaustive()
    }
}

/// State rebuilt by a sync before it replaces the live one.
struct Replay {
    session_key: Option<SymmetricKey>,
    head: Snapshot,
    versions: BTreeMap<VersionId, Snapshot>,
    version: Option<VersionId>,
    record_index: i64,
    record_count: usize,
}

impl Container {
    fn empty(session: &Session, name: String, public_name: String, owner: Peer) -> Self {
        Self {
            session: session.clone(),
            name,
            public_name,
            owner,
            session_key: None,
            keys: Snapshot::new(),
            versions: BTreeMap::new(),
            version: None,
            record_index: 0,
            record_count: 0,
        }
    }

    /// Create a new container owned by the session's account.
    ///
    /// Registers the public name, stores the owner's session-key envelope and
    /// an empty first record in one transaction. Fails with a constraint error
    /// if the container already exists.
    pub async fn create(session: &Session, name: &str) -> Result<Self> {
        let account = session.account();
        let public_name = account.container_public_name(name)?;
        let session_key = SymmetricKey::generate();

        let envelope = SealedKey::seal(
            &session_key,
            &account.encryption_public_key(),
            account.signing_key(),
        )?;
        let genesis = RecordPayload {
            record_index: 1,
            delta: Diff::default(),
            compact: true,
        }
        .seal(&session_key, account.signing_key())?;

        session
            .commit(&[
                Chunk::AddContainer {
                    container_name_hmac: public_name.clone(),
                },
                Chunk::AddContainerSessionKey {
                    container_name_hmac: public_name.clone(),
                    session_key: envelope,
                },
                Chunk::AddContainerRecord {
                    container_name_hmac: public_name.clone(),
                    record_index: 1,
                    payload: genesis,
                },
            ])
            .await?;

        let mut container = Self::empty(session, name.to_string(), public_name, account.peer());
        let version = VersionId::next(None, session.clock().now_millis());
        container.session_key = Some(session_key);
        container.versions.insert(version, Snapshot::new());
        container.version = Some(version);
        container.record_index = 1;
        container.record_count = 1;

        tracing::debug!(container = %container.public_name, "Created container");
        Ok(container)
    }

    /// Open one of the session's own containers and sync it.
    pub async fn load(session: &Session, name: &str) -> Result<Self> {
        let account = session.account();
        let public_name = account.container_public_name(name)?;
        let mut container = Self::empty(session, name.to_string(), public_name, account.peer());
        container.sync().await?;
        Ok(container)
    }

    /// Open a container `owner` shared with this session, by its public name.
    pub async fn load_shared(session: &Session, owner: &Peer, public_name: &str) -> Result<Self> {
        let mut container = Self::empty(
            session,
            public_name.to_string(),
            public_name.to_string(),
            owner.clone(),
        );
        container.sync().await?;
        Ok(container)
    }

    /// Local name. For shared containers this is the public name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The name the server knows the container by.
    pub fn public_name(&self) -> &str {
        &self.public_name
    }

    pub fn owner(&self) -> &Peer {
        &self.owner
    }

    /// Whether the session key is known.
    pub fn is_keyed(&self) -> bool {
        self.session_key.is_some()
    }

    // Working state

    /// Insert `key` with an empty object as its value.
    pub fn add(&mut self, key: &str) -> Result<()> {
        if self.keys.contains_key(key) {
            return Err(ContainerError::AlreadyExists {
                key: key.to_string(),
            }
            .into());
        }
        self.keys.insert(key.to_string(), json!({}));
        Ok(())
    }

    pub fn get(&self, key: &str) -> Result<&Value> {
        self.keys.get(key).ok_or_else(|| {
            ContainerError::NotFound {
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Replace the value of an existing key.
    pub fn set(&mut self, key: &str, value: impl Into<Value>) -> Result<()> {
        match self.keys.get_mut(key) {
            Some(slot) => {
                *slot = value.into();
                Ok(())
            }
            None => Err(ContainerError::NotFound {
                key: key.to_string(),
            }
            .into()),
        }
    }

    /// Remove a key, returning its value.
    pub fn remove(&mut self, key: &str) -> Result<Value> {
        self.keys.remove(key).ok_or_else(|| {
            ContainerError::NotFound {
                key: key.to_string(),
            }
            .into()
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.keys.keys()
    }

    /// The full working state.
    pub fn snapshot(&self) -> &Snapshot {
        &self.keys
    }

    /// Unsaved changes against the latest version.
    pub fn diff(&self) -> Diff {
        diff::create(self.head(), &self.keys)
    }

    // History

    pub fn versions(&self) -> &BTreeMap<VersionId, Snapshot> {
        &self.versions
    }

    pub fn version(&self, id: VersionId) -> Result<&Snapshot> {
        self.versions.get(&id).ok_or_else(|| {
            ContainerError::VersionNotFound {
                version: id.to_string(),
            }
            .into()
        })
    }

    pub fn latest_version(&self) -> Option<VersionId> {
        self.version
    }

    /// Index of the last record applied locally.
    pub fn record_index(&self) -> i64 {
        self.record_index
    }

    /// Records the server holds for this container, as far as this client
    /// has seen.
    pub fn record_count(&self) -> usize {
        self.record_count
    }

    fn head(&self) -> &Snapshot {
        static EMPTY: Snapshot = Snapshot::new();
        self.version
            .and_then(|id| self.versions.get(&id))
            .unwrap_or(&EMPTY)
    }

    fn session_key(&self) -> Result<&SymmetricKey> {
        self.session_key.as_ref().ok_or_else(|| {
            ContainerError::NotKeyed {
                name: self.name.clone(),
            }
            .into()
        })
    }

    // Server round-trips

    /// Record the unsaved changes as a new version.
    ///
    /// Fails with [`ContainerError::NoChange`] when there is nothing to save.
    /// Local history only moves once the server committed the record.
    pub async fn save(&mut self) -> Result<VersionId> {
        let session_key = self.session_key()?;
        let delta = self.diff();
        if delta.is_empty() {
            return Err(ContainerError::NoChange.into());
        }

        let record_index = self.record_index + 1;
        let payload = RecordPayload {
            record_index,
            delta,
            compact: false,
        }
        .seal(session_key, self.session.account().signing_key())?;

        self.session
            .commit(&[Chunk::AddContainerRecord {
                container_name_hmac: self.public_name.clone(),
                record_index,
                payload,
            }])
            .await?;

        let version = VersionId::next(self.version, self.session.clock().now_millis());
        self.versions.insert(version, self.keys.clone());
        self.version = Some(version);
        self.record_index = record_index;
        self.record_count += 1;

        tracing::debug!(container = %self.public_name, record_index, %version, "Saved container");
        Ok(version)
    }

    /// Fetch and apply records written since the last one applied here.
    ///
    /// Returns the number of records applied. Unsaved local changes are
    /// carried over onto the new head; if they no longer apply, the sync fails
    /// and nothing changes.
    pub async fn sync(&mut self) -> Result<usize> {
        let records = self
            .session
            .connection()
            .records(&self.public_name, self.record_index)
            .await?;
        if records.is_empty() {
            return Ok(0);
        }

        let replay = Replay {
            session_key: None,
            head: self.head().clone(),
            versions: self.versions.clone(),
            version: self.version,
            record_index: self.record_index,
            record_count: self.record_count,
        };
        let applied = records.len();
        self.replay(replay, &records)?;
        Ok(applied)
    }

    /// Drop local history and rebuild it from every record on the server.
    async fn resync(&mut self) -> Result<usize> {
        let records = self
            .session
            .connection()
            .records(&self.public_name, 0)
            .await?;
        let replay = Replay {
            session_key: None,
            head: Snapshot::new(),
            versions: BTreeMap::new(),
            version: None,
            record_index: 0,
            record_count: 0,
        };
        let applied = records.len();
        self.replay(replay, &records)?;
        Ok(applied)
    }

    fn replay(&mut self, mut state: Replay, records: &[Record]) -> Result<()> {
        let pending = self.diff();

        if self.session_key.is_none() {
            let first = records.first().ok_or_else(|| ContainerError::NotKeyed {
                name: self.name.clone(),
            })?;
            state.session_key = Some(self.decrypt_key(first)?);
        }
        let Some(session_key) = self.session_key.as_ref().or(state.session_key.as_ref()) else {
            return Err(ContainerError::NotKeyed {
                name: self.name.clone(),
            }
            .into());
        };

        for record in records {
            let expected = state.record_index + 1;
            let payload =
                RecordPayload::open(&record.payload, record.index, session_key, &self.owner.signing_key)?;

            if payload.compact {
                if record.index < expected {
                    return Err(ContainerError::OutOfOrder {
                        expected,
                        found: record.index,
                    }
                    .into());
                }
                state.head = diff::apply(&payload.delta, &Snapshot::new())?;
                state.record_count = 1;
            } else {
                if record.index != expected {
                    return Err(ContainerError::OutOfOrder {
                        expected,
                        found: record.index,
                    }
                    .into());
                }
                state.head = diff::apply(&payload.delta, &state.head)?;
                state.record_count += 1;
            }

            let version = VersionId::next(state.version, record.creation_time);
            state.versions.insert(version, state.head.clone());
            state.version = Some(version);
            state.record_index = record.index;
        }

        let keys = if pending.is_empty() {
            state.head.clone()
        } else {
            diff::apply(&pending, &state.head)?
        };

        tracing::debug!(
            container = %self.public_name,
            from = self.record_index,
            to = state.record_index,
            "Synced container"
        );
        if let Some(session_key) = state.session_key {
            self.session_key = Some(session_key);
        }
        self.keys = keys;
        self.versions = state.versions;
        self.version = state.version;
        self.record_index = state.record_index;
        self.record_count = state.record_count;
        Ok(())
    }

    /// Open the session-key envelope carried by the first fetched record.
    ///
    /// The envelope must be sealed to this account and signed by the owner.
    fn decrypt_key(&self, record: &Record) -> Result<SymmetricKey> {
        let mismatch = || ContainerError::SessionKeyMismatch {
            name: self.name.clone(),
        };
        let envelope = record.session_key.as_ref().ok_or_else(mismatch)?;
        envelope
            .open(
                self.session.account().encryption_secret(),
                &self.owner.signing_key,
            )
            .map_err(|e| {
                tracing::warn!(container = %self.public_name, error = %e, "Session key rejected");
                mismatch().into()
            })
    }

    /// Give `peer` read access and tell them about it.
    ///
    /// The share is committed before the notification message goes out; a
    /// failed message is logged and otherwise ignored.
    pub async fn share(&self, peer: &Peer) -> Result<()> {
        let session_key = self.session_key()?;
        let account = self.session.account();
        let envelope = SealedKey::seal(session_key, &peer.encryption_key, account.signing_key())?;

        self.session
            .commit(&[Chunk::AddContainerSessionKeyShare {
                container_name_hmac: self.public_name.clone(),
                to_username: peer.username.clone(),
                session_key: envelope,
            }])
            .await?;
        tracing::info!(container = %self.public_name, to = %peer.username, "Shared container");

        let sent = self
            .session
            .connection()
            .send_message(
                &peer.username,
                json!({ "type": CONTAINER_SHARE_MESSAGE }),
                json!({ "containerNameHmac": self.public_name }),
            )
            .await;
        if let Err(e) = sent {
            tracing::warn!(to = %peer.username, error = %e, "Share notification not delivered");
        }
        Ok(())
    }

    /// Collapse the server-side history into one full-state record.
    ///
    /// Requires a clean working state. The state after compaction equals the
    /// state before it; local history is rebuilt from the compacted record.
    pub async fn compact(&mut self) -> Result<()> {
        let session_key = self.session_key()?;
        if !self.diff().is_empty() {
            return Err(ContainerError::UnsavedChanges {
                name: self.name.clone(),
            }
            .into());
        }

        let record_index = self.record_index + 1;
        let payload = RecordPayload {
            record_index,
            delta: diff::create(&Snapshot::new(), &self.keys),
            compact: true,
        }
        .seal(session_key, self.session.account().signing_key())?;

        self.session
            .commit(&[Chunk::CompactContainer {
                container_name_hmac: self.public_name.clone(),
                record_index,
                payload,
            }])
            .await?;

        self.resync().await?;
        tracing::info!(container = %self.public_name, record_index, "Compacted container");
        Ok(())
    }

    // Notifications

    /// Call `listener` whenever another client writes to this container.
    ///
    /// A container has at most one listener; a new one replaces the old.
    pub fn watch<F>(&self, listener: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.session.watch(&self.public_name, Arc::new(listener));
    }

    /// Remove the listener. Returns whether one was set.
    pub fn unwatch(&self) -> bool {
        self.session.unwatch(&self.public_name)
    }
}
