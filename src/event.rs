//! Event-driven communication between the control surface and the coordinator.

use anyhow::Result;
use tokio::sync::broadcast;

/// Configuration section that was replaced through the control surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSection {
    Display,
    Fan,
    Wifi,
}

/// Application events published on the [`EventBus`].
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A section was validated, persisted and its controller restarted.
    ConfigChanged(ConfigSection),
    /// The access point was brought up (`true`) or torn down (`false`).
    ApStateChanged(bool),
    SystemShutdown,
}

/// Event bus for publish-subscribe messaging between services.
///
/// # Example
///
/// ```no_run
/// use picpd::event::{Event, EventBus};
///
/// let event_bus = EventBus::new();
/// let mut subscriber = event_bus.subscribe();
///
/// event_bus.publish(Event::SystemShutdown).ok();
///
/// // In async context, receive events:
/// // let event = subscriber.recv().await;
/// ```
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<Event>,
}

impl EventBus {
    /// Creates a new EventBus with default capacity.
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(100);
        Self { sender }
    }

    #[cfg(test)]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publishes an event to all subscribers.
    ///
    /// Returns an error if there are no active subscribers.
    pub fn publish(&self, event: Event) -> Result<()> {
        self.sender.send(event)?;
        Ok(())
    }

    /// Like [`publish`](Self::publish) for notifications nobody may be
    /// listening to.
    pub fn notify(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    /// Each subscriber receives all events published after subscription.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
