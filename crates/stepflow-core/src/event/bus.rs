//! Broadcast event bus for distributing `WorkflowEvent` to multiple subscribers.
//!
//! Built on `tokio::sync::broadcast`, the `EventBus` supports multiple
//! concurrent subscribers. Publishing with no active subscribers is a no-op,
//! so the engine never blocks or fails on observers. Observers that only
//! follow one workflow use [`EventBus::subscribe_workflow`].

use stepflow_types::event::WorkflowEvent;
use tokio::sync::broadcast;
use tracing::debug;

/// Default channel capacity used by the engine.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Multi-consumer bus for workflow lifecycle events.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers.
pub struct EventBus {
    sender: broadcast::Sender<WorkflowEvent>,
}

impl EventBus {
    /// Create a new event bus with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkflowEvent> {
        self.sender.subscribe()
    }

    /// Subscribe to the future events of one workflow only.
    pub fn subscribe_workflow(&self, logical_id: impl Into<String>) -> WorkflowSubscription {
        WorkflowSubscription {
            logical_id: logical_id.into(),
            receiver: self.sender.subscribe(),
        }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no subscribers, the event is silently dropped.
    pub fn publish(&self, event: WorkflowEvent) {
        let _ = self.sender.send(event);
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}

/// Receiver filtered to a single workflow's events.
///
/// A subscriber that falls behind loses the overwritten events and carries
/// on from the oldest one still buffered.
pub struct WorkflowSubscription {
    logical_id: String,
    receiver: broadcast::Receiver<WorkflowEvent>,
}

impl WorkflowSubscription {
    /// Wait for the next event of this workflow.
    ///
    /// Returns `None` once every sender is gone. Cancel safe.
    pub async fn recv(&mut self) -> Option<WorkflowEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if event.logical_id() == self.logical_id => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(workflow = %self.logical_id, skipped, "event subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Events of this workflow that are already buffered, without waiting.
    pub fn drain(&mut self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        loop {
            match self.receiver.try_recv() {
                Ok(event) if event.logical_id() == self.logical_id => events.push(event),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
                Err(_) => return events,
            }
        }
    }
}
