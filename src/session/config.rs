//! Session timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default interval between outgoing pings.
pub const DEFAULT_PING_INTERVAL: Duration = Duration::from_millis(500);

/// Default silence after which a device is declared gone.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(2000);

/// Default interval of the refresh hook.
pub const DEFAULT_ACTION_INTERVAL: Duration = Duration::from_millis(100);

/// Default time a device gets to answer the handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_millis(5000);

/// Default time a connection blocks on a single transport read.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(20);

/// Timing configuration for one session.
///
/// In configuration files every duration is given in milliseconds, and an
/// `action_interval_ms` below zero disables the refresh hook:
/// ```json
/// {"ping_interval_ms": 500, "heartbeat_timeout_ms": 2000, "action_interval_ms": -1}
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Interval between outgoing pings.
    #[serde(rename = "ping_interval_ms", with = "millis")]
    pub ping_interval: Duration,
    /// Silence after which an identified device is declared gone.
    #[serde(rename = "heartbeat_timeout_ms", with = "millis")]
    pub heartbeat_timeout: Duration,
    /// Interval of the store's refresh hook, `None` to disable.
    #[serde(rename = "action_interval_ms", with = "optional_millis")]
    pub action_interval: Option<Duration>,
    /// Time a new connection gets to identify itself.
    #[serde(rename = "handshake_timeout_ms", with = "millis")]
    pub handshake_timeout: Duration,
    /// Time a connection blocks on a single transport read.
    #[serde(rename = "read_timeout_ms", with = "millis")]
    pub read_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            heartbeat_timeout: DEFAULT_HEARTBEAT_TIMEOUT,
            action_interval: Some(DEFAULT_ACTION_INTERVAL),
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
        }
    }
}

impl SessionConfig {
    /// Creates a configuration with default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the ping interval.
    #[must_use]
    pub const fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the heartbeat timeout.
    #[must_use]
    pub const fn heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    /// Sets the refresh hook interval, `None` to disable.
    #[must_use]
    pub const fn action_interval(mut self, interval: Option<Duration>) -> Self {
        self.action_interval = interval;
        self
    }

    /// Sets the handshake timeout.
    #[must_use]
    pub const fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Sets the per-read timeout.
    #[must_use]
    pub const fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }
}

pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(super::duration_ms(*duration))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod optional_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match duration {
            Some(d) => s.serialize_i64(i64::try_from(d.as_millis()).unwrap_or(i64::MAX)),
            None => s.serialize_i64(-1),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        let ms = i64::deserialize(d)?;
        Ok(u64::try_from(ms).ok().map(Duration::from_millis))
    }
}
