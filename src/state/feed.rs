use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::dto::feed::ChangeEvent;

/// Broadcast hub fanning out invitation changes to every feed subscriber.
///
/// Delivery is best effort per subscriber: a lagging receiver loses events and has
/// to reconcile by re-fetching.
pub struct FeedHub {
    sender: broadcast::Sender<ChangeEvent>,
}

impl FeedHub {
    /// Construct a new hub backed by a Tokio broadcast channel with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _receiver) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Register a new subscriber that will receive subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    /// Publish a change to all current subscribers.
    pub fn publish(&self, event: ChangeEvent) {
        let id = event.row.id;
        let kind = event.event_type;
        match self.sender.send(event) {
            Ok(receivers) => debug!(%id, ?kind, receivers, "published invitation change"),
            Err(_) => warn!(%id, ?kind, "no feed subscribers; invitation change dropped"),
        }
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}
