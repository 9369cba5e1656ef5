//! Payload parsing for each message kind.
//!
//! Every parser checks the payload length before reading, so a short or
//! corrupted payload is reported as [`Error::Payload`] instead of panicking.

use std::time::Duration;

use bytes::Buf;

use crate::error::{Error, Result};
use crate::protocol::message::{Message, MessageKind};
use crate::protocol::params::unpack_params;
use crate::types::{Access, DeviceIdentifier, DeviceSchema, ParamBitmap, ParamValues};

/// Subscription parameters requested by the host.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionState {
    /// Parameters to report.
    pub bitmap: ParamBitmap,
    /// Report interval.
    pub interval: Duration,
}

impl SubscriptionState {
    /// Returns true if any parameter is subscribed.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !self.bitmap.is_empty()
    }
}

fn expect_kind(msg: &Message, kind: MessageKind) -> Result<()> {
    if msg.kind() == kind {
        Ok(())
    } else {
        Err(Error::payload(
            kind.name(),
            format!("got a {} message", msg.kind()),
        ))
    }
}

/// Parses the device identity from an `Acknowledgement`.
///
/// Format:
/// ```text
/// [device_type:2LE] [hardware_year:1] [uid:8LE]
/// ```
pub fn parse_acknowledgement(msg: &Message) -> Result<DeviceIdentifier> {
    expect_kind(msg, MessageKind::Acknowledgement)?;
    let mut data: &[u8] = msg.payload();
    if data.len() < DeviceIdentifier::WIRE_SIZE {
        return Err(Error::payload(
            "Acknowledgement",
            format!("too short: {} bytes", data.len()),
        ));
    }

    let device_type = data.get_u16_le();
    let hardware_year = data.get_u8();
    let uid = data.get_u64_le();

    Ok(DeviceIdentifier {
        device_type,
        hardware_year,
        uid,
    })
}

/// Parses a `SubscriptionRequest`.
///
/// Format:
/// ```text
/// [bitmap:4LE] [interval_ms:2LE]
/// ```
pub fn parse_subscription_request(msg: &Message) -> Result<SubscriptionState> {
    expect_kind(msg, MessageKind::SubscriptionRequest)?;
    let mut data: &[u8] = msg.payload();
    if data.len() < 6 {
        return Err(Error::payload(
            "SubscriptionRequest",
            format!("too short: {} bytes", data.len()),
        ));
    }

    let bitmap = ParamBitmap(data.get_u32_le());
    let interval_ms = data.get_u16_le();

    Ok(SubscriptionState {
        bitmap,
        interval: Duration::from_millis(u64::from(interval_ms)),
    })
}

/// Parses a `DeviceWrite` or `DeviceData` payload against a schema.
///
/// `DeviceWrite` keeps only writable parameters, `DeviceData` only readable
/// ones.
///
/// Format:
/// ```text
/// [bitmap:4LE] [value...]
/// ```
pub fn parse_param_payload(msg: &Message, schema: &DeviceSchema) -> Result<ParamValues> {
    let access = match msg.kind() {
        MessageKind::DeviceWrite => Access::Write,
        MessageKind::DeviceData => Access::Read,
        other => {
            return Err(Error::payload(
                "parameter",
                format!("{other} does not carry parameters"),
            ));
        }
    };

    let mut data: &[u8] = msg.payload();
    if data.len() < 4 {
        return Err(Error::payload(
            msg.kind().name(),
            format!("too short: {} bytes", data.len()),
        ));
    }
    let bitmap = ParamBitmap(data.get_u32_le());

    unpack_params(bitmap, data, schema, access)
}

/// Returns the diagnostic text of an `Error` message.
#[must_use]
pub fn parse_error_text(msg: &Message) -> String {
    String::from_utf8_lossy(msg.payload()).into_owned()
}
