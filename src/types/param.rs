//! Parameter schema and value types.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Highest number of parameters a device type can declare.
pub const MAX_PARAMS: usize = 32;

/// Wire data type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    /// Signed 32-bit integer, 4 bytes little-endian.
    Int32,
    /// IEEE-754 single precision, 4 bytes little-endian.
    Float32,
    /// Boolean, 1 byte (`0` is false, anything else true).
    Bool,
}

impl DataType {
    /// Encoded width in bytes.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Int32 | Self::Float32 => 4,
            Self::Bool => 1,
        }
    }
}

/// Direction a parameter is accessed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Device reports the value (`DeviceData`).
    Read,
    /// Host changes the value (`DeviceWrite`).
    Write,
}

/// One entry of a device type's parameter table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamDescriptor {
    /// Bitmap index (0-31).
    pub index: u8,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Wire data type.
    #[serde(rename = "type")]
    pub data_type: DataType,
    /// Device may report this parameter.
    #[serde(default)]
    pub readable: bool,
    /// Host may change this parameter.
    #[serde(default)]
    pub writable: bool,
}

impl ParamDescriptor {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(index: u8, data_type: DataType) -> Self {
        Self {
            index,
            name: String::new(),
            data_type,
            readable: false,
            writable: false,
        }
    }

    /// Sets the name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Marks the parameter readable.
    #[must_use]
    pub const fn readable(mut self) -> Self {
        self.readable = true;
        self
    }

    /// Marks the parameter writable.
    #[must_use]
    pub const fn writable(mut self) -> Self {
        self.writable = true;
        self
    }

    /// Returns true if the parameter may be accessed in the given direction.
    #[must_use]
    pub const fn allows(&self, access: Access) -> bool {
        match access {
            Access::Read => self.readable,
            Access::Write => self.writable,
        }
    }
}

/// Parameter table for one device type.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceSchema {
    /// Device type this table describes.
    pub device_type: u16,
    /// Human-readable device type name.
    #[serde(default)]
    pub name: String,
    /// Parameter descriptors.
    #[serde(default)]
    pub params: Vec<ParamDescriptor>,
}

impl DeviceSchema {
    /// Creates an empty schema for a device type.
    #[must_use]
    pub fn new(device_type: u16, name: impl Into<String>) -> Self {
        Self {
            device_type,
            name: name.into(),
            params: Vec::new(),
        }
    }

    /// Adds a parameter descriptor.
    #[must_use]
    pub fn with_param(mut self, param: ParamDescriptor) -> Self {
        self.params.push(param);
        self
    }

    /// Looks up the descriptor for a bitmap index.
    #[must_use]
    pub fn param(&self, index: u8) -> Option<&ParamDescriptor> {
        self.params.iter().find(|p| p.index == index)
    }

    /// Bitmap of every declared index allowed for `access`.
    #[must_use]
    pub fn mask(&self, access: Access) -> ParamBitmap {
        self.params
            .iter()
            .filter(|p| usize::from(p.index) < MAX_PARAMS && p.allows(access))
            .fold(ParamBitmap::EMPTY, |bitmap, p| bitmap.with(p.index))
    }
}

/// Bitmap of parameter indices; bit `i` set means parameter `i` is present.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ParamBitmap(pub u32);

impl ParamBitmap {
    /// No parameters.
    pub const EMPTY: Self = Self(0);

    /// Builds a bitmap from indices; indices of 32 and above are dropped.
    #[must_use]
    pub fn from_indices(indices: impl IntoIterator<Item = u8>) -> Self {
        indices.into_iter().fold(Self::EMPTY, Self::with)
    }

    /// Returns the raw bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Returns true if bit `index` is set.
    #[must_use]
    pub const fn contains(self, index: u8) -> bool {
        index < 32 && (self.0 >> index) & 1 == 1
    }

    /// Returns a copy with bit `index` set.
    #[must_use]
    pub const fn with(self, index: u8) -> Self {
        if index < 32 {
            Self(self.0 | (1 << index))
        } else {
            self
        }
    }

    /// Bits set in both bitmaps.
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Set indices in ascending order.
    pub fn indices(self) -> impl Iterator<Item = u8> {
        (0..32u8)
            .take_while(move |&i| self.0 >> i != 0)
            .filter(move |&i| self.contains(i))
    }
}

impl fmt::Debug for ParamBitmap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ParamBitmap({:#034b})", self.0)
    }
}

impl From<u32> for ParamBitmap {
    fn from(bits: u32) -> Self {
        Self(bits)
    }
}

/// A typed parameter value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ParamValue {
    /// Signed 32-bit integer.
    Int32(i32),
    /// Single precision float.
    Float32(f32),
    /// Boolean.
    Bool(bool),
}

impl ParamValue {
    /// Data type of this value.
    #[must_use]
    pub const fn data_type(&self) -> DataType {
        match self {
            Self::Int32(_) => DataType::Int32,
            Self::Float32(_) => DataType::Float32,
            Self::Bool(_) => DataType::Bool,
        }
    }
}

/// Sparse set of parameter values keyed by index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParamValues {
    values: BTreeMap<u8, ParamValue>,
}

impl ParamValues {
    /// Creates an empty set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Sets the value at `index`, replacing any previous value.
    pub fn insert(&mut self, index: u8, value: ParamValue) {
        if usize::from(index) < MAX_PARAMS {
            self.values.insert(index, value);
        }
    }

    /// Builder form of [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, index: u8, value: ParamValue) -> Self {
        self.insert(index, value);
        self
    }

    /// Returns the value at `index`.
    #[must_use]
    pub fn get(&self, index: u8) -> Option<ParamValue> {
        self.values.get(&index).copied()
    }

    /// Bitmap of indices that carry a value.
    #[must_use]
    pub fn bitmap(&self) -> ParamBitmap {
        ParamBitmap::from_indices(self.values.keys().copied())
    }

    /// Number of values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns true if there are no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Iterates values in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = (u8, ParamValue)> + '_ {
        self.values.iter().map(|(&i, &v)| (i, v))
    }

    /// Copies every value from `other` into this set.
    pub fn merge(&mut self, other: &Self) {
        for (index, value) in other.iter() {
            self.insert(index, value);
        }
    }
}

impl FromIterator<(u8, ParamValue)> for ParamValues {
    fn from_iter<I: IntoIterator<Item = (u8, ParamValue)>>(iter: I) -> Self {
        let mut values = Self::new();
        for (index, value) in iter {
            values.insert(index, value);
        }
        values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bitmap_indices() {
        let bitmap = ParamBitmap(0b1010_0101);
        assert_eq!(bitmap.indices().collect::<Vec<_>>(), vec![0, 2, 5, 7]);
        assert_eq!(ParamBitmap(1 << 31).indices().collect::<Vec<_>>(), vec![31]);
        assert_eq!(ParamBitmap::EMPTY.indices().count(), 0);
    }

    #[test]
    fn test_bitmap_ignores_out_of_range() {
        let bitmap = ParamBitmap::from_indices([0, 3, 40]);
        assert_eq!(bitmap.bits(), 0b1001);
        assert!(!bitmap.contains(40));
    }

    #[test]
    fn test_schema_lookup_by_index() {
        let schema = DeviceSchema::new(6, "servo")
            .with_param(ParamDescriptor::new(4, DataType::Float32).readable())
            .with_param(ParamDescriptor::new(1, DataType::Bool).writable());

        assert_eq!(schema.param(4).unwrap().data_type, DataType::Float32);
        assert_eq!(schema.param(1).unwrap().data_type, DataType::Bool);
        assert!(schema.param(0).is_none());
        assert_eq!(schema.mask(Access::Read).bits(), 0b1_0000);
        assert_eq!(schema.mask(Access::Write).bits(), 0b10);
    }

    #[test]
    fn test_values_bitmap() {
        let values = ParamValues::new()
            .with(2, ParamValue::Bool(true))
            .with(0, ParamValue::Int32(-7));
        assert_eq!(values.bitmap().bits(), 0b101);
        assert_eq!(
            values.iter().map(|(i, _)| i).collect::<Vec<_>>(),
            vec![0, 2]
        );
    }

    #[test]
    fn test_schema_from_json() {
        let json = r#"{
            "device_type": 6,
            "name": "ServoControl",
            "params": [
                {"index": 0, "name": "servo0", "type": "float32",
                 "readable": true, "writable": true},
                {"index": 1, "name": "enabled", "type": "bool", "readable": true}
            ]
        }"#;
        let schema: DeviceSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.device_type, 6);
        assert_eq!(schema.params.len(), 2);
        assert!(!schema.param(1).unwrap().writable);
    }
}
