//! Consistent Overhead Byte Stuffing.
//!
//! Removes every `0x00` from a buffer so that `0x00` can mark frame
//! boundaries on the wire. The encoding treats the input as if a zero byte
//! were appended; each run of non-zero bytes that ends at a zero (real or
//! implicit) becomes one group:
//! ```text
//! ┌──────────────┬──────────────────────┐
//! │  run_len + 1 │  run bytes (no 0x00) │
//! │    1 byte    │    run_len bytes     │
//! └──────────────┴──────────────────────┘
//! ```
//! Inputs are capped at [`MAX_COBS_INPUT`] bytes, which keeps every run at
//! most 254 long and every group length byte non-zero.

use crate::error::FrameError;

/// Largest input [`encode`] accepts.
pub const MAX_COBS_INPUT: usize = 254;

/// Worst-case encoded length for an input of `len` bytes.
#[must_use]
pub const fn max_encoded_len(len: usize) -> usize {
    len + 1
}

/// Encodes `data`, returning a buffer with no zero bytes.
///
/// # Errors
///
/// Returns [`FrameError::TooLarge`] if `data` is longer than
/// [`MAX_COBS_INPUT`].
pub fn encode(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    if data.len() > MAX_COBS_INPUT {
        return Err(FrameError::TooLarge {
            size: data.len(),
            max: MAX_COBS_INPUT,
        });
    }

    let mut out = Vec::with_capacity(max_encoded_len(data.len()));
    let mut code_index = 0;
    out.push(0);
    let mut code: u8 = 1;

    for &byte in data {
        if byte == 0 {
            out[code_index] = code;
            code_index = out.len();
            out.push(0);
            code = 1;
        } else {
            out.push(byte);
            code += 1;
        }
    }

    // The implicit trailing zero closes the last group.
    out[code_index] = code;
    Ok(out)
}

/// Decodes a COBS buffer produced by [`encode`].
///
/// # Errors
///
/// Returns [`FrameError::Framing`] on empty input, a zero length byte, or a
/// group that runs past the end of `encoded`.
pub fn decode(encoded: &[u8]) -> Result<Vec<u8>, FrameError> {
    if encoded.is_empty() {
        return Err(FrameError::framing("empty COBS body"));
    }

    let mut out = Vec::with_capacity(encoded.len());
    let mut i = 0;

    while i < encoded.len() {
        let code = usize::from(encoded[i]);
        if code == 0 {
            return Err(FrameError::framing("zero COBS length byte"));
        }
        i += 1;

        let run = code - 1;
        if i + run > encoded.len() {
            return Err(FrameError::framing("COBS run overruns body"));
        }
        out.extend_from_slice(&encoded[i..i + run]);
        i += run;

        if i < encoded.len() {
            out.push(0);
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_encode_known_vectors() {
        assert_eq!(encode(&[]).unwrap(), vec![0x01]);
        assert_eq!(encode(&[0x00]).unwrap(), vec![0x01, 0x01]);
        assert_eq!(encode(&[0x00, 0x00]).unwrap(), vec![0x01, 0x01, 0x01]);
        assert_eq!(
            encode(&[0x11, 0x22, 0x00, 0x33]).unwrap(),
            vec![0x03, 0x11, 0x22, 0x02, 0x33]
        );
        assert_eq!(
            encode(&[0x11, 0x00, 0x00, 0x00]).unwrap(),
            vec![0x02, 0x11, 0x01, 0x01, 0x01]
        );
    }

    #[test]
    fn test_encode_longest_run() {
        let data: Vec<u8> = (1..=254).map(|b| b as u8).collect();
        let encoded = encode(&data).unwrap();
        assert_eq!(encoded.len(), 255);
        assert_eq!(encoded[0], 0xFF);
        assert_eq!(decode(&encoded).unwrap(), data);
    }

    #[test]
    fn test_encode_rejects_oversize() {
        let data = vec![1u8; MAX_COBS_INPUT + 1];
        assert!(matches!(
            encode(&data),
            Err(FrameError::TooLarge { size: 255, max: 254 })
        ));
    }

    #[test]
    fn test_decode_errors() {
        assert!(matches!(decode(&[]), Err(FrameError::Framing { .. })));
        assert!(matches!(decode(&[0x00]), Err(FrameError::Framing { .. })));
        assert!(matches!(
            decode(&[0x02, 0x11, 0x00]),
            Err(FrameError::Framing { .. })
        ));
        // Declares three literal bytes but only one follows
        assert!(matches!(
            decode(&[0x04, 0x11]),
            Err(FrameError::Framing { .. })
        ));
    }

    proptest! {
        #[test]
        fn prop_roundtrip(data in proptest::collection::vec(any::<u8>(), 0..=MAX_COBS_INPUT)) {
            let encoded = encode(&data).unwrap();
            prop_assert!(!encoded.contains(&0));
            prop_assert!(encoded.len() <= max_encoded_len(data.len()));
            prop_assert_eq!(decode(&encoded).unwrap(), data);
        }

        #[test]
        fn prop_roundtrip_zero_heavy(
            data in proptest::collection::vec(
                prop_oneof![Just(0u8), Just(0xFFu8)],
                0..=MAX_COBS_INPUT,
            ),
        ) {
            let encoded = encode(&data).unwrap();
            prop_assert!(!encoded.contains(&0));
            prop_assert_eq!(decode(&encoded).unwrap(), data);
        }
    }
}
