//! Per-device-type schema lookup.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{Error, Result};
use crate::types::{DeviceSchema, MAX_PARAMS};

/// Supplies the parameter table for a device type.
pub trait SchemaProvider: Send + Sync {
    /// Returns the schema for `device_type`, if known.
    fn schema(&self, device_type: u16) -> Option<Arc<DeviceSchema>>;
}

/// Schema table keyed by device type.
///
/// Tables are usually loaded from a JSON array of device schemas:
/// ```json
/// [
///   {
///     "device_type": 6,
///     "name": "ServoControl",
///     "params": [
///       {"index": 0, "name": "servo0", "type": "float32", "readable": true, "writable": true}
///     ]
///   }
/// ]
/// ```
#[derive(Debug, Default)]
pub struct SchemaTable {
    schemas: RwLock<HashMap<u16, Arc<DeviceSchema>>>,
}

impl SchemaTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a schema.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if an index is out of range or declared
    /// twice.
    pub fn insert(&self, schema: DeviceSchema) -> Result<()> {
        validate(&schema)?;
        self.schemas
            .write()
            .insert(schema.device_type, Arc::new(schema));
        Ok(())
    }

    /// Builder form of [`insert`](Self::insert).
    pub fn with_schema(self, schema: DeviceSchema) -> Result<Self> {
        self.insert(schema)?;
        Ok(self)
    }

    /// Parses a JSON array of schemas.
    pub fn from_json(json: &str) -> Result<Self> {
        let schemas: Vec<DeviceSchema> = serde_json::from_str(json)?;
        let table = Self::new();
        for schema in schemas {
            table.insert(schema)?;
        }
        Ok(table)
    }

    /// Loads a JSON schema file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path.as_ref())?;
        let table = Self::from_json(&json)?;
        tracing::info!(
            "loaded {} device schemas from {}",
            table.len(),
            path.as_ref().display()
        );
        Ok(table)
    }

    /// Number of device types known.
    #[must_use]
    pub fn len(&self) -> usize {
        self.schemas.read().len()
    }

    /// Returns true if no schema is loaded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.schemas.read().is_empty()
    }
}

impl SchemaProvider for SchemaTable {
    fn schema(&self, device_type: u16) -> Option<Arc<DeviceSchema>> {
        self.schemas.read().get(&device_type).cloned()
    }
}

fn validate(schema: &DeviceSchema) -> Result<()> {
    let mut seen = 0u32;
    for param in &schema.params {
        if usize::from(param.index) >= MAX_PARAMS {
            return Err(Error::Protocol {
                message: format!(
                    "device type {}: parameter index {} out of range",
                    schema.device_type, param.index
                ),
            });
        }
        let bit = 1u32 << param.index;
        if seen & bit != 0 {
            return Err(Error::Protocol {
                message: format!(
                    "device type {}: parameter index {} declared twice",
                    schema.device_type, param.index
                ),
            });
        }
        seen |= bit;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DataType, ParamDescriptor};

    const TABLE: &str = r#"[
        {
            "device_type": 0,
            "name": "LimitSwitch",
            "params": [
                {"index": 0, "name": "switch0", "type": "bool", "readable": true},
                {"index": 1, "name": "switch1", "type": "bool", "readable": true}
            ]
        },
        {
            "device_type": 6,
            "name": "ServoControl",
            "params": [
                {"index": 0, "name": "servo0", "type": "float32",
                 "readable": true, "writable": true},
                {"index": 1, "name": "enable0", "type": "bool", "readable": true, "writable": true},
                {"index": 2, "name": "count", "type": "int32", "readable": true}
            ]
        }
    ]"#;

    #[test]
    fn test_from_json() {
        let table = SchemaTable::from_json(TABLE).unwrap();
        assert_eq!(table.len(), 2);

        let servo = table.schema(6).unwrap();
        assert_eq!(servo.name, "ServoControl");
        assert_eq!(servo.param(2).unwrap().data_type, DataType::Int32);
        assert!(table.schema(99).is_none());
    }

    #[test]
    fn test_rejects_out_of_range_index() {
        let schema =
            DeviceSchema::new(1, "bad").with_param(ParamDescriptor::new(32, DataType::Bool));
        assert!(matches!(
            SchemaTable::new().insert(schema),
            Err(Error::Protocol { .. })
        ));
    }

    #[test]
    fn test_rejects_duplicate_index() {
        let schema = DeviceSchema::new(1, "bad")
            .with_param(ParamDescriptor::new(3, DataType::Bool))
            .with_param(ParamDescriptor::new(3, DataType::Int32));
        assert!(SchemaTable::new().insert(schema).is_err());
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            SchemaTable::from_json("{not json"),
            Err(Error::Schema(_))
        ));
    }
}
