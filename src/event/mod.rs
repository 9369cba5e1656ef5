//! Event system for session lifecycle and telemetry notifications.
//!
//! Every session publishes what happens to its device on an
//! [`EventDispatcher`]. A host usually shares one dispatcher across all
//! sessions so that a single subscriber sees every device.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::session::DisconnectReason;
use crate::types::{DeviceIdentifier, ParamValues};

/// Event types that can be dispatched.
#[derive(Debug, Clone)]
pub enum Event {
    /// A device completed the handshake.
    Identified(DeviceIdentifier),
    /// A connection ended before the device identified itself.
    Unidentified,
    /// An identified device went away.
    Disconnected {
        identifier: DeviceIdentifier,
        reason: DisconnectReason,
    },
    /// A device reported parameter values.
    Data {
        identifier: DeviceIdentifier,
        values: ParamValues,
    },
    /// A device sent an error message.
    DeviceError {
        identifier: Option<DeviceIdentifier>,
        message: String,
    },
}

impl Event {
    /// Returns the device this event concerns, if known.
    #[must_use]
    pub const fn identifier(&self) -> Option<&DeviceIdentifier> {
        match self {
            Self::Identified(identifier)
            | Self::Disconnected { identifier, .. }
            | Self::Data { identifier, .. } => Some(identifier),
            Self::DeviceError { identifier, .. } => identifier.as_ref(),
            Self::Unidentified => None,
        }
    }
}

/// A subscription to events.
pub struct Subscription {
    receiver: broadcast::Receiver<Event>,
}

impl Subscription {
    /// Receives the next event, or `None` once every dispatcher is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("event subscriber lagged, {n} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next already-dispatched event without waiting.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(_) => return None,
            }
        }
    }
}

/// Subscription filter for specific events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Only events for this device.
    pub device: Option<DeviceIdentifier>,
    /// Only lifecycle events (identified, unidentified, disconnected).
    pub lifecycle_only: bool,
}

impl EventFilter {
    /// Creates a filter for one device.
    #[must_use]
    pub const fn device(identifier: DeviceIdentifier) -> Self {
        Self {
            device: Some(identifier),
            lifecycle_only: false,
        }
    }

    /// Creates a filter for lifecycle events.
    #[must_use]
    pub const fn lifecycle() -> Self {
        Self {
            device: None,
            lifecycle_only: true,
        }
    }

    /// Checks if an event matches this filter.
    #[must_use]
    pub fn matches(&self, event: &Event) -> bool {
        if let Some(ref device) = self.device {
            if event.identifier() != Some(device) {
                return false;
            }
        }

        if self.lifecycle_only {
            return matches!(
                event,
                Event::Identified(_) | Event::Unidentified | Event::Disconnected { .. }
            );
        }

        true
    }
}

struct EventDispatcherInner {
    sender: broadcast::Sender<Event>,
}

/// Dispatches events to subscribers.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<EventDispatcherInner>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventDispatcher {
    /// Creates a new event dispatcher.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(EventDispatcherInner { sender }),
        }
    }

    /// Dispatches an event to all subscribers.
    pub fn dispatch(&self, event: Event) {
        // No subscribers is fine
        let _ = self.inner.sender.send(event);
    }

    /// Subscribes to all events.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        Subscription {
            receiver: self.inner.sender.subscribe(),
        }
    }

    /// Waits for an event matching the filter with timeout.
    ///
    /// Returns `None` if the timeout expires or the channel is closed.
    pub async fn wait_for(&self, filter: EventFilter, timeout: Duration) -> Option<Event> {
        let mut subscription = self.subscribe();

        tokio::select! {
            biased;
            result = async {
                loop {
                    if let Some(event) = subscription.recv().await {
                        if filter.matches(&event) {
                            return Some(event);
                        }
                    } else {
                        return None;
                    }
                }
            } => result,
            () = tokio::time::sleep(timeout) => None,
        }
    }
}
