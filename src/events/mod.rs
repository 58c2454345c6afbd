//! Change bus for conversation updates
//!
//! Every store mutation is published here so any number of display surfaces
//! (transcript, conversation list, SSE clients) can follow the cache without
//! holding references to each other. Delivery is in publish order; there is
//! no replay for subscribers that join late.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::conversation::ConversationRecord;

/// Name of the single change event
pub const CONVERSATIONS_UPDATED: &str = "conversations:updated";

/// Broadcast channel capacity for change events
const CHANNEL_CAPACITY: usize = 64;

/// Payload of a change event: the whole list or one changed record.
///
/// Serialized untagged, so consumers see either a JSON array or an object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChangeEvent {
    Conversations(Vec<ConversationRecord>),
    Conversation(ConversationRecord),
}

/// Publish/subscribe channel for [`ChangeEvent`]s
#[derive(Debug, Clone)]
pub struct ChangeBus {
    sender: broadcast::Sender<ChangeEvent>,
}

impl ChangeBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender }
    }

    /// Publish an event to everyone currently subscribed
    pub fn publish(&self, event: ChangeEvent) {
        match self.sender.send(event) {
            Ok(receivers) => debug!(receivers, "Published {}", CONVERSATIONS_UPDATED),
            Err(_) => debug!("No subscribers for {}", CONVERSATIONS_UPDATED),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for ChangeBus {
    fn default() -> Self {
        Self::new()
    }
}
