//! Packing and unpacking of parameter values.
//!
//! Values are laid out back to back in ascending index order, each in the
//! fixed width of its declared [`DataType`], with no padding:
//! ```text
//! int32   [value:4LE]
//! float32 [value:4LE]
//! bool    [value:1]
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};
use crate::types::{Access, DataType, DeviceSchema, ParamBitmap, ParamValue, ParamValues};

fn put_value(buf: &mut BytesMut, value: ParamValue) {
    match value {
        ParamValue::Int32(v) => buf.put_i32_le(v),
        ParamValue::Float32(v) => buf.put_f32_le(v),
        ParamValue::Bool(v) => buf.put_u8(u8::from(v)),
    }
}

fn get_value(data: &mut &[u8], data_type: DataType) -> ParamValue {
    match data_type {
        DataType::Int32 => ParamValue::Int32(data.get_i32_le()),
        DataType::Float32 => ParamValue::Float32(data.get_f32_le()),
        DataType::Bool => ParamValue::Bool(data.get_u8() != 0),
    }
}

/// Packs the values selected by `bitmap`.
///
/// An index is packed only if it is declared in `schema`, allowed for
/// `access`, and `values` holds a value of the declared type. Every other set
/// bit is skipped. The returned bitmap has exactly the packed bits set, so it
/// always describes the returned bytes.
#[must_use]
pub fn pack_params(
    bitmap: ParamBitmap,
    values: &ParamValues,
    schema: &DeviceSchema,
    access: Access,
) -> (ParamBitmap, Bytes) {
    let mut packed = ParamBitmap::EMPTY;
    let mut buf = BytesMut::new();

    for index in bitmap.indices() {
        let Some(param) = schema.param(index) else {
            tracing::debug!(index, "skipping undeclared parameter");
            continue;
        };
        if !param.allows(access) {
            tracing::debug!(index, ?access, "skipping parameter not allowed for access");
            continue;
        }
        match values.get(index) {
            Some(value) if value.data_type() == param.data_type => {
                put_value(&mut buf, value);
                packed = packed.with(index);
            }
            Some(value) => {
                tracing::warn!(
                    index,
                    expected = ?param.data_type,
                    got = ?value.data_type(),
                    "skipping parameter with mismatched type"
                );
            }
            None => tracing::debug!(index, "no value for requested parameter"),
        }
    }

    (packed, buf.freeze())
}

/// Unpacks values for the set bits of `bitmap` from `data`.
///
/// Undeclared indices are ignored and consume nothing. Declared indices that
/// are not allowed for `access` are consumed but dropped. Trailing bytes are
/// ignored.
///
/// # Errors
///
/// Returns [`Error::Payload`] if `data` ends before a declared value.
pub fn unpack_params(
    bitmap: ParamBitmap,
    data: &[u8],
    schema: &DeviceSchema,
    access: Access,
) -> Result<ParamValues> {
    let mut values = ParamValues::new();
    let mut cursor = data;

    for index in bitmap.indices() {
        let Some(param) = schema.param(index) else {
            tracing::debug!(index, "ignoring undeclared parameter");
            continue;
        };
        let width = param.data_type.width();
        if cursor.remaining() < width {
            return Err(Error::payload(
                "parameter",
                format!(
                    "index {index} needs {width} bytes, {} remain",
                    cursor.remaining()
                ),
            ));
        }
        let value = get_value(&mut cursor, param.data_type);
        if param.allows(access) {
            values.insert(index, value);
        } else {
            tracing::warn!(index, ?access, "ignoring parameter not allowed for access");
        }
    }

    if cursor.has_remaining() {
        tracing::trace!("{} trailing parameter bytes ignored", cursor.remaining());
    }

    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParamDescriptor;

    fn schema() -> DeviceSchema {
        DeviceSchema::new(6, "servo")
            .with_param(ParamDescriptor::new(0, DataType::Int32).readable())
            .with_param(ParamDescriptor::new(1, DataType::Bool).readable().writable())
            .with_param(ParamDescriptor::new(2, DataType::Float32).readable())
            .with_param(ParamDescriptor::new(3, DataType::Int32).writable())
    }

    fn values() -> ParamValues {
        ParamValues::new()
            .with(0, ParamValue::Int32(-2))
            .with(1, ParamValue::Bool(true))
            .with(2, ParamValue::Float32(1.5))
            .with(3, ParamValue::Int32(9))
    }

    #[test]
    fn test_pack_ascending_without_padding() {
        let (bitmap, data) = pack_params(ParamBitmap(0b101), &values(), &schema(), Access::Read);
        assert_eq!(bitmap.bits(), 0b101);
        let mut expected = Vec::new();
        expected.extend_from_slice(&(-2i32).to_le_bytes());
        expected.extend_from_slice(&1.5f32.to_le_bytes());
        assert_eq!(&data[..], expected.as_slice());
    }

    #[test]
    fn test_pack_skips_unreadable_and_undeclared() {
        // Index 3 is write-only, index 9 is not declared
        let bitmap = ParamBitmap::from_indices([1, 3, 9]);
        let (packed, data) = pack_params(bitmap, &values(), &schema(), Access::Read);
        assert_eq!(packed.bits(), 0b10);
        assert_eq!(&data[..], &[1]);
    }

    #[test]
    fn test_pack_skips_type_mismatch() {
        let values = ParamValues::new().with(0, ParamValue::Bool(true));
        let (packed, data) = pack_params(ParamBitmap(1), &values, &schema(), Access::Read);
        assert!(packed.is_empty());
        assert!(data.is_empty());
    }

    #[test]
    fn test_unpack_roundtrip() {
        let (bitmap, data) =
            pack_params(ParamBitmap(0b111), &values(), &schema(), Access::Read);
        let unpacked = unpack_params(bitmap, &data, &schema(), Access::Read).unwrap();
        assert_eq!(unpacked.get(0), Some(ParamValue::Int32(-2)));
        assert_eq!(unpacked.get(1), Some(ParamValue::Bool(true)));
        assert_eq!(unpacked.get(2), Some(ParamValue::Float32(1.5)));
        assert_eq!(unpacked.len(), 3);
    }

    #[test]
    fn test_unpack_write_ignores_non_writable() {
        // Index 0 (int32, read-only) then index 1 (bool, writable)
        let mut data = Vec::new();
        data.extend_from_slice(&77i32.to_le_bytes());
        data.push(0);
        let unpacked = unpack_params(ParamBitmap(0b11), &data, &schema(), Access::Write).unwrap();
        assert_eq!(unpacked.get(0), None);
        assert_eq!(unpacked.get(1), Some(ParamValue::Bool(false)));
    }

    #[test]
    fn test_unpack_ignores_bits_beyond_schema() {
        let data = [1u8];
        let bitmap = ParamBitmap(0b10 | (1 << 20) | (1 << 31));
        let unpacked = unpack_params(bitmap, &data, &schema(), Access::Read).unwrap();
        assert_eq!(unpacked.len(), 1);
        assert_eq!(unpacked.get(1), Some(ParamValue::Bool(true)));
    }

    #[test]
    fn test_unpack_truncated() {
        let result = unpack_params(ParamBitmap(0b1), &[1, 2], &schema(), Access::Read);
        assert!(matches!(result, Err(Error::Payload { .. })));
    }
}
