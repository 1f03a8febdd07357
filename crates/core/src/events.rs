//! Progress event broadcasting for translation requests.

use tokio::sync::broadcast;

use crate::request::RequestStatus;

/// A progress update for one request.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub request_id: String,
    pub progress: u8,
    pub status: RequestStatus,
}

/// Fan-out channel for [`ProgressEvent`]s.
///
/// Consumers (UI layers, the daemon's log forwarder) subscribe and receive
/// every event published after the subscription. Lagging receivers drop the
/// oldest events rather than blocking publishers.
#[derive(Clone)]
pub struct ProgressBroadcaster {
    tx: broadcast::Sender<ProgressEvent>,
}

impl ProgressBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.tx.subscribe()
    }

    /// Publish an event. Having no subscribers is not an error.
    pub fn publish(&self, event: ProgressEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new(256)
    }
}
