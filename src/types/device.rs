//! Device identity types.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity a device reports in its handshake acknowledgement.
///
/// Assigned when the device firmware is flashed and never changes for the
/// lifetime of the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier {
    /// Device type, selects the parameter schema.
    pub device_type: u16,
    /// Hardware revision year.
    pub hardware_year: u8,
    /// Unique id of this unit.
    pub uid: u64,
}

impl DeviceIdentifier {
    /// Encoded size on the wire.
    pub const WIRE_SIZE: usize = 11;

    /// Creates a new identifier.
    #[must_use]
    pub const fn new(device_type: u16, hardware_year: u8, uid: u64) -> Self {
        Self {
            device_type,
            hardware_year,
            uid,
        }
    }
}

impl fmt::Display for DeviceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:016x}",
            self.device_type, self.hardware_year, self.uid
        )
    }
}

/// Opaque handle the parameter store hands out on registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub u64);
