//! Data types shared across the protocol core.
//!
//! This module contains:
//! - Device identity
//! - Parameter schemas, bitmaps and values
//! - Session statistics

pub mod device;
pub mod param;
pub mod stats;

pub use device::{DeviceHandle, DeviceIdentifier};
pub use param::{
    Access, DataType, DeviceSchema, MAX_PARAMS, ParamBitmap, ParamDescriptor, ParamValue,
    ParamValues,
};
pub use stats::SessionStats;
