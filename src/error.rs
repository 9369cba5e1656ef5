//! Error types for the perilink library.

use thiserror::Error;

/// The main error type for perilink operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Serial port error.
    #[error("serial port error: {0}")]
    Serial(#[from] tokio_serial::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame encoding/decoding error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// Protocol misuse, such as sending an internal-only message kind.
    #[error("protocol error: {message}")]
    Protocol { message: String },

    /// A message payload does not match the shape its kind requires.
    #[error("malformed {kind} payload: {reason}")]
    Payload { kind: &'static str, reason: String },

    /// The device never acknowledged the handshake.
    #[error("device did not identify within {timeout_ms}ms")]
    HandshakeTimeout { timeout_ms: u64 },

    /// The device stopped answering pings.
    #[error("no heartbeat from device for {timeout_ms}ms")]
    HeartbeatTimeout { timeout_ms: u64 },

    /// Operation requires an identified device.
    #[error("device has not completed the handshake")]
    NotIdentified,

    /// Transport is not open.
    #[error("not connected")]
    NotConnected,

    /// Schema table could not be parsed.
    #[error("invalid schema table: {0}")]
    Schema(#[from] serde_json::Error),

    /// Command channel to a running connection is closed.
    #[error("channel closed")]
    ChannelClosed,
}

impl Error {
    pub(crate) fn payload(kind: &'static str, reason: impl Into<String>) -> Self {
        Self::Payload {
            kind,
            reason: reason.into(),
        }
    }
}

/// Frame-level errors. All of them are local to one frame: the frame is
/// discarded and the stream resynchronizes on the next delimiter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Malformed COBS stream or truncated frame.
    #[error("framing error: {reason}")]
    Framing { reason: &'static str },

    /// Frame body checksum does not match.
    #[error("checksum mismatch: expected 0x{expected:02x}, got 0x{actual:02x}")]
    Checksum { expected: u8, actual: u8 },

    /// Payload or encoded body exceeds what a frame can carry.
    #[error("frame too large: {size} bytes exceeds maximum {max}")]
    TooLarge { size: usize, max: usize },

    /// Kind byte is not in the message table.
    #[error("unknown message kind 0x{0:02x}")]
    UnknownKind(u8),
}

impl FrameError {
    pub(crate) const fn framing(reason: &'static str) -> Self {
        Self::Framing { reason }
    }
}

/// Result type alias for perilink operations.
pub type Result<T> = std::result::Result<T, Error>;
