//! Protocol definitions for device communication.
//!
//! This module contains the low-level protocol types including:
//! - COBS byte stuffing
//! - Frame encoding/decoding
//! - Message kinds
//! - Parameter marshalling
//! - Payload parsing

pub mod cobs;
pub mod frame;
pub mod message;
pub mod params;
pub mod parser;

pub use frame::{
    DELIMITER, FrameDecoder, MAX_FRAME_SIZE, checksum, encode as encode_frame, read_message,
};
pub use message::{MAX_PAYLOAD_SIZE, Message, MessageKind};
pub use params::{pack_params, unpack_params};
pub use parser::{
    SubscriptionState, parse_acknowledgement, parse_error_text, parse_param_payload,
    parse_subscription_request,
};
