//! Frame encoding and decoding.
//!
//! The wire format wraps a COBS-encoded body between a delimiter and a
//! length byte:
//! ```text
//! ┌──────────┬──────────────┬──────────────────────────────────────┐
//! │  0x00    │  cobs_len    │  COBS(kind ‖ payload ‖ checksum)     │
//! │  1 byte  │   1 byte     │  cobs_len bytes                      │
//! └──────────┴──────────────┴──────────────────────────────────────┘
//! ```
//! The checksum is the sum of `kind ‖ payload` modulo 256. A single flipped
//! bit in the decoded body always changes that sum; compensating multi-byte
//! errors and swapped bytes are not detected.
//!
//! On the wire the guarantee is narrower. A flipped bit in a COBS data byte
//! is always caught, either by the checksum or as a truncated frame. A
//! flipped bit in a COBS code byte moves where the decoder re-inserts zeros,
//! which can shift the checksum byte along with the payload: the frame
//! `00 03 01 01 01` (a `Ping`) with its first code byte turned into `03`
//! decodes as an empty `Acknowledgement`. Message handlers must therefore
//! validate payload shapes rather than trust the checksum alone.
//!
//! Because the body never contains `0x00`, a decoder that loses sync
//! discards bytes until the next delimiter and carries on from there.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{Error, FrameError, Result};
use crate::protocol::cobs;
use crate::protocol::message::{MAX_PAYLOAD_SIZE, Message, MessageKind};

/// Frame delimiter byte.
pub const DELIMITER: u8 = 0x00;

/// Largest encoded body the length byte can describe.
pub const MAX_BODY_SIZE: usize = 255;

/// Delimiter plus length byte.
pub const HEADER_SIZE: usize = 2;

/// Largest frame on the wire.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_BODY_SIZE;

/// Additive checksum over `kind ‖ payload`.
#[must_use]
pub fn checksum(kind: u8, payload: &[u8]) -> u8 {
    payload.iter().fold(kind, |sum, &b| sum.wrapping_add(b))
}

/// Encodes a kind byte and payload into a wire frame.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if the payload exceeds
/// [`MAX_PAYLOAD_SIZE`] or the encoded body would not fit the length byte.
pub fn encode(kind: u8, payload: &[u8]) -> std::result::Result<Bytes, FrameError> {
    if payload.len() > MAX_PAYLOAD_SIZE {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            max: MAX_PAYLOAD_SIZE,
        });
    }

    let mut body = Vec::with_capacity(payload.len() + 2);
    body.push(kind);
    body.extend_from_slice(payload);
    body.push(checksum(kind, payload));

    let encoded = cobs::encode(&body)?;
    let Ok(cobs_len) = u8::try_from(encoded.len()) else {
        return Err(FrameError::TooLarge {
            size: encoded.len(),
            max: MAX_BODY_SIZE,
        });
    };

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + encoded.len());
    buf.put_u8(DELIMITER);
    buf.put_u8(cobs_len);
    buf.put_slice(&encoded);
    Ok(buf.freeze())
}

/// Decodes a COBS-encoded frame body into a message.
fn decode_body(encoded: &[u8]) -> std::result::Result<Message, FrameError> {
    let body = cobs::decode(encoded)?;
    if body.len() < 2 {
        return Err(FrameError::framing("frame body shorter than kind and checksum"));
    }

    let kind_byte = body[0];
    let payload = &body[1..body.len() - 1];
    let received = body[body.len() - 1];
    let computed = checksum(kind_byte, payload);
    if computed != received {
        return Err(FrameError::Checksum {
            expected: computed,
            actual: received,
        });
    }

    let kind = MessageKind::from_byte(kind_byte).ok_or(FrameError::UnknownKind(kind_byte))?;
    Message::new(kind, Bytes::copy_from_slice(payload))
}

/// Frame decoder that handles partial data and resynchronizes after
/// corruption.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    /// Creates a new frame decoder.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(MAX_FRAME_SIZE),
        }
    }

    /// Feeds data into the decoder.
    pub fn feed(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Attempts to decode the next complete frame.
    ///
    /// Returns `Ok(Some(message))` if a frame was decoded, `Ok(None)` if more
    /// data is needed, or an error if a frame had to be discarded. After an
    /// error the decoder has already skipped the bad bytes, so callers just
    /// call `decode` again.
    ///
    /// Bytes before a delimiter are discarded silently. A delimiter showing
    /// up inside a frame body means the frame was cut short; the partial
    /// frame is dropped and decoding restarts at that delimiter.
    pub fn decode(&mut self) -> std::result::Result<Option<Message>, FrameError> {
        let start = self.buffer.iter().position(|&b| b == DELIMITER);
        match start {
            Some(0) => {}
            Some(skip) => {
                tracing::debug!(
                    "skipping {skip} bytes before delimiter: {}",
                    hex::encode(&self.buffer[..skip])
                );
                self.buffer.advance(skip);
            }
            None => {
                if !self.buffer.is_empty() {
                    tracing::debug!("discarding {} bytes without delimiter", self.buffer.len());
                    self.buffer.clear();
                }
                return Ok(None);
            }
        }

        if self.buffer.len() < HEADER_SIZE {
            return Ok(None);
        }

        let cobs_len = usize::from(self.buffer[1]);
        if cobs_len == 0 {
            self.buffer.advance(1);
            return Err(FrameError::framing("zero frame length"));
        }

        let available = self.buffer.len() - HEADER_SIZE;
        let cut_at = self.buffer[HEADER_SIZE..HEADER_SIZE + available.min(cobs_len)]
            .iter()
            .position(|&b| b == DELIMITER);
        if let Some(pos) = cut_at {
            self.buffer.advance(HEADER_SIZE + pos);
            return Err(FrameError::framing("truncated frame"));
        }

        if available < cobs_len {
            return Ok(None);
        }

        self.buffer.advance(HEADER_SIZE);
        let encoded = self.buffer.split_to(cobs_len);
        let message = decode_body(&encoded)?;
        tracing::trace!("decoded {} frame: {} payload bytes", message.kind(), message.len());
        Ok(Some(message))
    }

    /// Returns the number of bytes currently buffered.
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer, dropping any partial frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Reads from `reader` until one valid message is decoded.
///
/// Discarded frames are logged and skipped; only I/O failures and end of
/// stream are returned as errors.
pub async fn read_message<R>(reader: &mut R, decoder: &mut FrameDecoder) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; MAX_FRAME_SIZE];
    loop {
        loop {
            match decoder.decode() {
                Ok(Some(message)) => return Ok(message),
                Ok(None) => break,
                Err(e) => tracing::debug!("discarding frame: {e}"),
            }
        }

        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return Err(Error::Io(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream closed",
            )));
        }
        decoder.feed(&buf[..n]);
    }
}
