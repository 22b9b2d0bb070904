//! Fire-and-forget notifications from the server to connected accounts.
//!
//! The server announces two things: a message addressed to an account, and a
//! committed write to a container the account holds a key for. Delivery is best
//! effort; an account that is not listening simply misses the event and picks
//! up the state on its next sync.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::protocol::{AccountId, Message};

/// Something an account may want to react to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Event {
    /// A message was delivered to the account's inbox.
    Message { message: Message },
    /// A transaction writing to this container committed.
    ContainerUpdate { container_name_hmac: String },
}

/// An event together with its addressee.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub account_id: AccountId,
    pub event: Event,
}

/// Sink for server events. `emit` must not block or fail.
pub trait Notifier: Send + Sync {
    fn emit(&self, account_id: AccountId, event: Event);
}

/// Default capacity of the broadcast channel.
const DEFAULT_CAPACITY: usize = 256;

/// [`Notifier`] backed by a tokio broadcast channel.
///
/// Every subscriber sees every notification and filters by account itself.
/// Slow subscribers lose the oldest events rather than slowing the server.
#[derive(Debug, Clone)]
pub struct BroadcastNotifier {
    sender: broadcast::Sender<Notification>,
}

impl BroadcastNotifier {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl Notifier for BroadcastNotifier {
    fn emit(&self, account_id: AccountId, event: Event) {
        // An error only means nobody is subscribed right now
        if self.sender.send(Notification { account_id, event }).is_err() {
            tracing::trace!(account = %account_id, "No notification subscribers");
        }
    }
}
