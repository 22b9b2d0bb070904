//! In-memory mapping from session ids to accounts.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::protocol::{AccountId, SessionId};

/// Live login sessions. Cloning shares the same store.
///
/// Sessions do not survive a server restart; clients log in again.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, AccountId>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a session for `account_id`.
    pub async fn create(&self, account_id: AccountId) -> SessionId {
        let session_id = SessionId::generate();
        self.sessions
            .write()
            .await
            .insert(session_id.clone(), account_id);
        session_id
    }

    /// The account a session belongs to, if the session is live.
    pub async fn account(&self, session_id: &SessionId) -> Option<AccountId> {
        self.sessions.read().await.get(session_id).copied()
    }

    /// End a session. Returns whether it existed.
    pub async fn destroy(&self, session_id: &SessionId) -> bool {
        self.sessions.write().await.remove(session_id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
