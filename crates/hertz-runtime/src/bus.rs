//! Broadcast bus for node lifecycle events.
//!
//! Uses [`tokio::sync::broadcast`] so every subscriber sees every
//! [`NodeEvent`] and a slow subscriber never blocks the orchestrator.  A
//! subscriber that falls behind loses the oldest events.

use hertz_types::{HertzError, NodeEvent, NodeId};
use tokio::sync::broadcast;
use tracing::warn;

/// Default channel capacity (events buffered per slow subscriber).
pub const DEFAULT_CAPACITY: usize = 256;

/// Shared lifecycle event bus.  Clones share the same channel.
#[derive(Clone, Debug)]
pub struct EventBus {
    sender: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Publish `event` to every current subscriber.
    ///
    /// Returns the number of subscribers reached, or
    /// [`HertzError::Channel`] when nobody is listening.
    pub fn publish(&self, event: NodeEvent) -> Result<usize, HertzError> {
        self.sender
            .send(event)
            .map_err(|e| HertzError::Channel(format!("no subscribers for node event: {e}")))
    }

    /// Subscribe to every event.
    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the events of a single node.
    pub fn subscribe_node(&self, node: NodeId) -> NodeSubscriber {
        NodeSubscriber {
            node,
            receiver: self.sender.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

/// A subscriber that only yields events about one node.
pub struct NodeSubscriber {
    node: NodeId,
    receiver: broadcast::Receiver<NodeEvent>,
}

impl NodeSubscriber {
    /// Wait for the next event about this subscriber's node.
    ///
    /// Returns `None` once the bus is closed.
    pub async fn recv(&mut self) -> Option<NodeEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.node == self.node => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(node = %self.node, lagged_by = n, "node subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }
}
