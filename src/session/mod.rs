//! Per-connection protocol state machine.
//!
//! A [`Session`] does no I/O of its own. The caller feeds it decoded
//! messages and frame errors, calls [`Session::poll`] with the current time,
//! and drains [`Session::next_outgoing`] onto the wire. The async driver for
//! this loop is [`Connection`](crate::connection::Connection).

mod config;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

pub use config::{
    DEFAULT_ACTION_INTERVAL, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_HEARTBEAT_TIMEOUT,
    DEFAULT_PING_INTERVAL, DEFAULT_READ_TIMEOUT, SessionConfig,
};
use config::duration_ms;

use crate::error::{Error, FrameError, Result};
use crate::event::{Event, EventDispatcher};
use crate::protocol::{
    Message, MessageKind, SubscriptionState, parse_acknowledgement, parse_error_text,
    parse_param_payload, parse_subscription_request,
};
use crate::schema::SchemaProvider;
use crate::store::ParamStore;
use crate::types::{
    Access, DeviceHandle, DeviceIdentifier, DeviceSchema, ParamBitmap, ParamValues, SessionStats,
};

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Pinging, waiting for the device to identify itself.
    AwaitingHandshake,
    /// Device identified; heartbeat and subscriptions running.
    Active,
    /// Terminal. All input is dropped.
    Disconnected,
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// No acknowledgement within the handshake timeout.
    HandshakeTimeout,
    /// No ping from an identified device within the heartbeat timeout.
    HeartbeatTimeout,
    /// The transport closed or failed.
    TransportClosed,
    /// Closed locally.
    Closed,
}

impl DisconnectReason {
    /// Converts a failure reason into an [`Error`]. A local close is not an
    /// error and yields `None`.
    #[must_use]
    pub fn into_error(self, config: &SessionConfig) -> Option<Error> {
        match self {
            Self::HandshakeTimeout => Some(Error::HandshakeTimeout {
                timeout_ms: duration_ms(config.handshake_timeout),
            }),
            Self::HeartbeatTimeout => Some(Error::HeartbeatTimeout {
                timeout_ms: duration_ms(config.heartbeat_timeout),
            }),
            Self::TransportClosed => Some(Error::NotConnected),
            Self::Closed => None,
        }
    }
}

/// Protocol state for one connected device.
pub struct Session {
    config: SessionConfig,
    store: Arc<dyn ParamStore>,
    schemas: Arc<dyn SchemaProvider>,
    events: EventDispatcher,
    state: SessionState,
    identifier: Option<DeviceIdentifier>,
    handle: Option<DeviceHandle>,
    schema: Arc<DeviceSchema>,
    subscription: SubscriptionState,
    started_at: Instant,
    last_ping_sent_at: Option<Instant>,
    last_ping_received_at: Instant,
    last_data_sent_at: Instant,
    last_action_at: Instant,
    outgoing: VecDeque<Message>,
    stats: SessionStats,
    disconnect_reason: Option<DisconnectReason>,
}

impl Session {
    /// Creates a session in [`SessionState::AwaitingHandshake`].
    pub fn new(
        config: SessionConfig,
        store: Arc<dyn ParamStore>,
        schemas: Arc<dyn SchemaProvider>,
        now: Instant,
    ) -> Self {
        Self {
            config,
            store,
            schemas,
            events: EventDispatcher::default(),
            state: SessionState::AwaitingHandshake,
            identifier: None,
            handle: None,
            schema: Arc::new(DeviceSchema::default()),
            subscription: SubscriptionState::default(),
            started_at: now,
            last_ping_sent_at: None,
            last_ping_received_at: now,
            last_data_sent_at: now,
            last_action_at: now,
            outgoing: VecDeque::new(),
            stats: SessionStats::default(),
            disconnect_reason: None,
        }
    }

    /// Publishes events on a shared dispatcher instead of a private one.
    #[must_use]
    pub fn with_dispatcher(mut self, events: EventDispatcher) -> Self {
        self.events = events;
        self
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Identity reported by the device, once the handshake completed.
    #[must_use]
    pub const fn identifier(&self) -> Option<&DeviceIdentifier> {
        self.identifier.as_ref()
    }

    /// True once an acknowledgement was accepted. Stays true after
    /// disconnect.
    #[must_use]
    pub const fn handshake_complete(&self) -> bool {
        self.identifier.is_some()
    }

    /// Subscription the device requested from us.
    #[must_use]
    pub const fn subscription(&self) -> &SubscriptionState {
        &self.subscription
    }

    /// Traffic counters.
    #[must_use]
    pub const fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Why the session ended, if it has.
    #[must_use]
    pub const fn disconnect_reason(&self) -> Option<DisconnectReason> {
        self.disconnect_reason
    }

    /// Timing configuration.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Event dispatcher this session publishes on.
    #[must_use]
    pub const fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Schema of the identified device. Empty before the handshake.
    #[must_use]
    pub fn schema(&self) -> &DeviceSchema {
        &self.schema
    }

    /// Pops the next message to send.
    pub fn next_outgoing(&mut self) -> Option<Message> {
        self.outgoing.pop_front()
    }

    /// Counts a frame the caller wrote to the transport.
    pub fn record_sent(&mut self) {
        self.stats.frames_sent += 1;
    }

    /// Handles one decoded message.
    pub fn handle_message(&mut self, msg: Message, now: Instant) {
        if self.state == SessionState::Disconnected {
            tracing::trace!(kind = %msg.kind(), "dropping message after disconnect");
            return;
        }
        self.stats.frames_received += 1;
        tracing::trace!(kind = %msg.kind(), len = msg.len(), "received message");

        // Ping carries no payload; anything else is a corrupted frame.
        if msg.kind() == MessageKind::Ping && !msg.is_empty() {
            tracing::debug!(len = msg.len(), "dropping ping with payload");
            self.stats.ignored += 1;
            return;
        }

        match self.state {
            SessionState::Disconnected => {}
            SessionState::AwaitingHandshake => match msg.kind() {
                MessageKind::Acknowledgement => self.identify(&msg, now),
                MessageKind::Ping => self.last_ping_received_at = now,
                other => {
                    tracing::debug!(kind = %other, "ignoring message before handshake");
                    self.stats.ignored += 1;
                }
            },
            SessionState::Active => self.handle_active(&msg, now),
        }
    }

    /// Records a frame the decoder had to drop. The session carries on.
    pub fn handle_frame_error(&mut self, err: &FrameError) {
        if self.state == SessionState::Disconnected {
            return;
        }
        match err {
            FrameError::Checksum { .. } => self.stats.checksum_errors += 1,
            FrameError::Framing { .. }
            | FrameError::TooLarge { .. }
            | FrameError::UnknownKind(_) => self.stats.framing_errors += 1,
        }
        tracing::debug!(uid = self.uid(), "dropped frame: {err}");
    }

    /// Runs the timers and returns the resulting state.
    pub fn poll(&mut self, now: Instant) -> SessionState {
        match self.state {
            SessionState::Disconnected => {}
            SessionState::AwaitingHandshake => {
                if now.saturating_duration_since(self.started_at) >= self.config.handshake_timeout {
                    tracing::info!(
                        timeout_ms = duration_ms(self.config.handshake_timeout),
                        "device did not identify"
                    );
                    self.close(DisconnectReason::HandshakeTimeout);
                } else {
                    self.maybe_ping(now);
                }
            }
            SessionState::Active => {
                if now.saturating_duration_since(self.last_ping_received_at)
                    >= self.config.heartbeat_timeout
                {
                    tracing::warn!(uid = self.uid(), "heartbeat lost");
                    self.close(DisconnectReason::HeartbeatTimeout);
                } else {
                    self.maybe_ping(now);
                    self.maybe_send_data(now);
                    self.maybe_refresh(now);
                }
            }
        }
        self.state
    }

    /// Asks the device to report `bitmap` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotIdentified`] unless the session is active.
    pub fn request_subscription(&mut self, bitmap: ParamBitmap, interval: Duration) -> Result<()> {
        self.require_active()?;
        let interval_ms = u16::try_from(interval.as_millis()).unwrap_or(u16::MAX);
        self.queue(Message::subscription_request(bitmap, interval_ms));
        Ok(())
    }

    /// Sends values to the device. Parameters the schema does not mark
    /// writable are left out.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotIdentified`] unless the session is active.
    pub fn write_params(&mut self, values: &ParamValues) -> Result<()> {
        self.require_active()?;
        let msg = Message::device_write(values, &self.schema);
        self.queue(msg);
        Ok(())
    }

    /// Tells the device to stop its outputs.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotIdentified`] unless the session is active.
    pub fn disable(&mut self) -> Result<()> {
        self.require_active()?;
        self.queue(Message::disable());
        Ok(())
    }

    /// Ends the session. Calling it again has no effect.
    pub fn close(&mut self, reason: DisconnectReason) {
        if self.state == SessionState::Disconnected {
            return;
        }
        self.state = SessionState::Disconnected;
        self.disconnect_reason = Some(reason);
        self.subscription = SubscriptionState::default();
        self.outgoing.clear();

        match (self.identifier, self.handle.take()) {
            (Some(identifier), Some(handle)) => {
                self.store.unregister_device(handle);
                tracing::info!(
                    uid = identifier.uid,
                    device_type = identifier.device_type,
                    ?reason,
                    "device disconnected"
                );
                self.events
                    .dispatch(Event::Disconnected { identifier, reason });
            }
            _ => {
                self.store.device_unidentified();
                tracing::info!(?reason, "connection closed before handshake");
                self.events.dispatch(Event::Unidentified);
            }
        }
    }

    fn identify(&mut self, msg: &Message, now: Instant) {
        let identifier = match parse_acknowledgement(msg) {
            Ok(identifier) => identifier,
            Err(e) => {
                tracing::warn!("bad acknowledgement: {e}");
                self.stats.ignored += 1;
                return;
            }
        };

        self.schema = self
            .schemas
            .schema(identifier.device_type)
            .unwrap_or_else(|| {
                tracing::warn!(
                    device_type = identifier.device_type,
                    "no schema for device type, parameters will be ignored"
                );
                Arc::new(DeviceSchema::new(identifier.device_type, "unknown"))
            });

        self.handle = Some(self.store.register_device(&identifier));
        self.identifier = Some(identifier);
        self.state = SessionState::Active;
        self.last_ping_received_at = now;
        self.last_data_sent_at = now;
        self.last_action_at = now;

        tracing::info!(
            uid = identifier.uid,
            device_type = identifier.device_type,
            hardware_year = identifier.hardware_year,
            schema = %self.schema.name,
            "device identified"
        );
        self.events.dispatch(Event::Identified(identifier));
    }

    fn handle_active(&mut self, msg: &Message, now: Instant) {
        let Some(handle) = self.handle else {
            return;
        };

        match msg.kind() {
            MessageKind::Ping => self.last_ping_received_at = now,
            MessageKind::SubscriptionRequest => match parse_subscription_request(msg) {
                Ok(subscription) => {
                    tracing::debug!(
                        uid = self.uid(),
                        bitmap = ?subscription.bitmap,
                        interval_ms = duration_ms(subscription.interval),
                        "subscription updated"
                    );
                    self.subscription = subscription;
                    self.last_data_sent_at = now;
                }
                Err(e) => self.malformed(&e),
            },
            MessageKind::DeviceWrite => match parse_param_payload(msg, &self.schema) {
                Ok(values) if !values.is_empty() => self.store.write_params(handle, &values),
                Ok(_) => {}
                Err(e) => self.malformed(&e),
            },
            MessageKind::DeviceData => match parse_param_payload(msg, &self.schema) {
                Ok(values) => {
                    self.store.publish_params(handle, &values);
                    if let Some(identifier) = self.identifier {
                        self.events.dispatch(Event::Data { identifier, values });
                    }
                }
                Err(e) => self.malformed(&e),
            },
            MessageKind::Error => {
                let message = parse_error_text(msg);
                tracing::warn!(uid = self.uid(), "device reported error: {message}");
                self.events.dispatch(Event::DeviceError {
                    identifier: self.identifier,
                    message,
                });
            }
            other => {
                tracing::trace!(kind = %other, "ignoring message");
                self.stats.ignored += 1;
            }
        }
    }

    fn malformed(&mut self, err: &Error) {
        tracing::warn!(uid = self.uid(), "{err}");
        self.stats.ignored += 1;
    }

    fn maybe_ping(&mut self, now: Instant) {
        let due = self
            .last_ping_sent_at
            .is_none_or(|at| now.saturating_duration_since(at) >= self.config.ping_interval);
        if due {
            self.queue(Message::ping());
            self.last_ping_sent_at = Some(now);
        }
    }

    fn maybe_send_data(&mut self, now: Instant) {
        let Some(handle) = self.handle else {
            return;
        };
        if !self.subscription.is_active()
            || now.saturating_duration_since(self.last_data_sent_at) < self.subscription.interval
        {
            return;
        }

        let bitmap = self
            .subscription
            .bitmap
            .intersect(self.schema.mask(Access::Read));
        let values = self.store.read_params(handle, bitmap);
        let msg = Message::device_data(&values, &self.schema);
        self.queue(msg);
        self.last_data_sent_at = now;
    }

    fn maybe_refresh(&mut self, now: Instant) {
        let (Some(interval), Some(handle)) = (self.config.action_interval, self.handle) else {
            return;
        };
        if now.saturating_duration_since(self.last_action_at) >= interval {
            self.store.refresh(handle);
            self.last_action_at = now;
        }
    }

    fn queue(&mut self, msg: Message) {
        self.outgoing.push_back(msg);
    }

    fn require_active(&self) -> Result<()> {
        if self.state == SessionState::Active {
            Ok(())
        } else {
            Err(Error::NotIdentified)
        }
    }

    fn uid(&self) -> u64 {
        self.identifier.map_or(0, |id| id.uid)
    }
}
