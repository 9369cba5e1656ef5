//! Message kinds and the [`Message`] value exchanged with devices.
//!
//! The kind is the first byte of every frame body and determines the shape
//! of the payload that follows.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, FrameError, Result};
use crate::protocol::params::pack_params;
use crate::types::{Access, DeviceIdentifier, DeviceSchema, ParamBitmap, ParamValues};

/// Largest payload a message may carry.
pub const MAX_PAYLOAD_SIZE: usize = 132;

/// Message kinds, with their wire tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageKind {
    /// Liveness probe, sent by both sides.
    Ping = 0x00,
    /// Handshake reply carrying the device identifier.
    Acknowledgement = 0x01,
    /// Host asks the device to report parameters periodically.
    SubscriptionRequest = 0x02,
    /// Host changes device parameters.
    DeviceWrite = 0x03,
    /// Device reports parameter values.
    DeviceData = 0x04,
    /// Host asks the device to stop acting.
    Disable = 0x05,
    /// Diagnostic text.
    Error = 0x06,
    /// Placeholder, never sent on the wire.
    Nop = 0x07,
}

impl MessageKind {
    /// Attempts to parse a message kind from a byte.
    #[must_use]
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Ping),
            0x01 => Some(Self::Acknowledgement),
            0x02 => Some(Self::SubscriptionRequest),
            0x03 => Some(Self::DeviceWrite),
            0x04 => Some(Self::DeviceData),
            0x05 => Some(Self::Disable),
            0x06 => Some(Self::Error),
            0x07 => Some(Self::Nop),
            _ => None,
        }
    }

    /// Returns true if this kind may appear on the wire.
    #[must_use]
    pub const fn is_wire(&self) -> bool {
        !matches!(self, Self::Nop)
    }

    /// Short name used in logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Ping => "Ping",
            Self::Acknowledgement => "Acknowledgement",
            Self::SubscriptionRequest => "SubscriptionRequest",
            Self::DeviceWrite => "DeviceWrite",
            Self::DeviceData => "DeviceData",
            Self::Disable => "Disable",
            Self::Error => "Error",
            Self::Nop => "Nop",
        }
    }
}

impl From<MessageKind> for u8 {
    fn from(kind: MessageKind) -> Self {
        kind as Self
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded protocol message.
///
/// The payload length is authoritative; payload bytes are never scanned for
/// a terminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    kind: MessageKind,
    payload: Bytes,
}

impl Message {
    /// Creates a message, rejecting payloads over [`MAX_PAYLOAD_SIZE`].
    pub fn new(
        kind: MessageKind,
        payload: impl Into<Bytes>,
    ) -> std::result::Result<Self, FrameError> {
        let payload = payload.into();
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(FrameError::TooLarge {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }
        Ok(Self { kind, payload })
    }

    fn empty(kind: MessageKind) -> Self {
        Self {
            kind,
            payload: Bytes::new(),
        }
    }

    /// Builds a `Ping`.
    #[must_use]
    pub fn ping() -> Self {
        Self::empty(MessageKind::Ping)
    }

    /// Builds a `Disable`.
    #[must_use]
    pub fn disable() -> Self {
        Self::empty(MessageKind::Disable)
    }

    /// Builds a `Nop`.
    #[must_use]
    pub fn nop() -> Self {
        Self::empty(MessageKind::Nop)
    }

    /// Builds an `Acknowledgement` carrying the device identity.
    ///
    /// Format:
    /// ```text
    /// [device_type:2LE] [hardware_year:1] [uid:8LE]
    /// ```
    #[must_use]
    pub fn acknowledgement(id: &DeviceIdentifier) -> Self {
        let mut buf = BytesMut::with_capacity(DeviceIdentifier::WIRE_SIZE);
        buf.put_u16_le(id.device_type);
        buf.put_u8(id.hardware_year);
        buf.put_u64_le(id.uid);
        Self {
            kind: MessageKind::Acknowledgement,
            payload: buf.freeze(),
        }
    }

    /// Builds a `SubscriptionRequest`.
    ///
    /// Format:
    /// ```text
    /// [bitmap:4LE] [interval_ms:2LE]
    /// ```
    #[must_use]
    pub fn subscription_request(bitmap: ParamBitmap, interval_ms: u16) -> Self {
        let mut buf = BytesMut::with_capacity(6);
        buf.put_u32_le(bitmap.bits());
        buf.put_u16_le(interval_ms);
        Self {
            kind: MessageKind::SubscriptionRequest,
            payload: buf.freeze(),
        }
    }

    /// Builds a `DeviceWrite` for the writable subset of `values`.
    ///
    /// Format:
    /// ```text
    /// [bitmap:4LE] [value...] (ascending index, no padding)
    /// ```
    #[must_use]
    pub fn device_write(values: &ParamValues, schema: &DeviceSchema) -> Self {
        Self::param_message(MessageKind::DeviceWrite, values, schema, Access::Write)
    }

    /// Builds a `DeviceData` for the readable subset of `values`.
    #[must_use]
    pub fn device_data(values: &ParamValues, schema: &DeviceSchema) -> Self {
        Self::param_message(MessageKind::DeviceData, values, schema, Access::Read)
    }

    fn param_message(
        kind: MessageKind,
        values: &ParamValues,
        schema: &DeviceSchema,
        access: Access,
    ) -> Self {
        let (bitmap, packed) = pack_params(values.bitmap(), values, schema, access);
        let mut buf = BytesMut::with_capacity(4 + packed.len());
        buf.put_u32_le(bitmap.bits());
        buf.put_slice(&packed);
        // 4 + 32 * 4 bytes at most, always within MAX_PAYLOAD_SIZE
        Self {
            kind,
            payload: buf.freeze(),
        }
    }

    /// Builds an `Error` carrying diagnostic text, truncated to fit.
    #[must_use]
    pub fn error(text: &str) -> Self {
        let bytes = text.as_bytes();
        let len = bytes.len().min(MAX_PAYLOAD_SIZE);
        Self {
            kind: MessageKind::Error,
            payload: Bytes::copy_from_slice(&bytes[..len]),
        }
    }

    /// Message kind.
    #[must_use]
    pub const fn kind(&self) -> MessageKind {
        self.kind
    }

    /// Payload bytes.
    #[must_use]
    pub const fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Payload length.
    #[must_use]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the payload is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Encodes this message into a wire frame.
    pub fn to_frame(&self) -> Result<Bytes> {
        if !self.kind.is_wire() {
            return Err(Error::Protocol {
                message: format!("{} messages are never sent", self.kind),
            });
        }
        Ok(crate::protocol::frame::encode(self.kind.into(), &self.payload)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, ParamDescriptor, ParamValue};

    #[test]
    fn test_kind_from_byte() {
        assert_eq!(MessageKind::from_byte(0x00), Some(MessageKind::Ping));
        assert_eq!(MessageKind::from_byte(0x04), Some(MessageKind::DeviceData));
        assert_eq!(MessageKind::from_byte(0x08), None);
        assert_eq!(MessageKind::from_byte(0xFF), None);
    }

    #[test]
    fn test_kind_tags_are_dense() {
        for tag in 0..=7u8 {
            let kind = MessageKind::from_byte(tag).unwrap();
            assert_eq!(u8::from(kind), tag);
        }
    }

    #[test]
    fn test_new_rejects_oversize_payload() {
        let result = Message::new(MessageKind::Error, vec![b'x'; MAX_PAYLOAD_SIZE + 1]);
        assert!(matches!(
            result,
            Err(FrameError::TooLarge { size: 133, max: 132 })
        ));
        assert!(Message::new(MessageKind::Error, vec![b'x'; MAX_PAYLOAD_SIZE]).is_ok());
    }

    #[test]
    fn test_acknowledgement_layout() {
        let msg = Message::acknowledgement(&DeviceIdentifier::new(6, 1, 42));
        assert_eq!(msg.kind(), MessageKind::Acknowledgement);
        assert_eq!(
            &msg.payload()[..],
            &[0x06, 0x00, 0x01, 42, 0, 0, 0, 0, 0, 0, 0]
        );
    }

    #[test]
    fn test_subscription_request_layout() {
        let msg = Message::subscription_request(ParamBitmap(0b101), 100);
        assert_eq!(&msg.payload()[..], &[0b101, 0, 0, 0, 100, 0]);
    }

    #[test]
    fn test_device_write_drops_read_only() {
        let schema = DeviceSchema::new(1, "switch")
            .with_param(ParamDescriptor::new(0, DataType::Bool).readable())
            .with_param(ParamDescriptor::new(1, DataType::Int32).readable().writable());
        let values = ParamValues::new()
            .with(0, ParamValue::Bool(true))
            .with(1, ParamValue::Int32(5));

        let msg = Message::device_write(&values, &schema);
        assert_eq!(&msg.payload()[..], &[0b10, 0, 0, 0, 5, 0, 0, 0]);
    }

    #[test]
    fn test_error_truncates() {
        let text = "e".repeat(200);
        assert_eq!(Message::error(&text).len(), MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_nop_never_framed() {
        assert!(matches!(
            Message::nop().to_frame(),
            Err(Error::Protocol { .. })
        ));
    }
}
