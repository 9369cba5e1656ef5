//! Parameter store collaborator.
//!
//! Sessions publish decoded device data to, and read outgoing values from,
//! a [`ParamStore`]. The store is shared by every session on the host and
//! must synchronize internally; each session only ever touches the entry it
//! registered.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;

use crate::types::{DeviceHandle, DeviceIdentifier, ParamBitmap, ParamValues};

/// Shared parameter store / device catalog.
pub trait ParamStore: Send + Sync {
    /// Adds a newly identified device and returns its handle.
    fn register_device(&self, identifier: &DeviceIdentifier) -> DeviceHandle;

    /// Removes a device whose session ended.
    fn unregister_device(&self, handle: DeviceHandle);

    /// Returns current values for the indices in `bitmap`.
    fn read_params(&self, handle: DeviceHandle, bitmap: ParamBitmap) -> ParamValues;

    /// Applies host-requested writes. Values are already filtered to
    /// writable parameters.
    fn write_params(&self, handle: DeviceHandle, values: &ParamValues);

    /// Records values reported by the device.
    fn publish_params(&self, handle: DeviceHandle, values: &ParamValues);

    /// Periodic hook to resample device state.
    fn refresh(&self, _handle: DeviceHandle) {}

    /// Called when a connection ends without the device identifying itself.
    fn device_unidentified(&self) {}
}

#[derive(Debug, Clone)]
struct DeviceEntry {
    identifier: DeviceIdentifier,
    values: ParamValues,
    refreshes: u64,
}

/// In-memory [`ParamStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    devices: RwLock<HashMap<DeviceHandle, DeviceEntry>>,
    next_handle: AtomicU64,
    unidentified: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the identifier registered under `handle`.
    #[must_use]
    pub fn identifier(&self, handle: DeviceHandle) -> Option<DeviceIdentifier> {
        self.devices.read().get(&handle).map(|e| e.identifier)
    }

    /// Looks up the handle of a registered device.
    #[must_use]
    pub fn handle_of(&self, identifier: &DeviceIdentifier) -> Option<DeviceHandle> {
        self.devices
            .read()
            .iter()
            .find(|(_, e)| e.identifier == *identifier)
            .map(|(&h, _)| h)
    }

    /// Returns a copy of every stored value for a device.
    #[must_use]
    pub fn values(&self, handle: DeviceHandle) -> Option<ParamValues> {
        self.devices.read().get(&handle).map(|e| e.values.clone())
    }

    /// Overwrites stored values, as local sampling would.
    pub fn set_values(&self, handle: DeviceHandle, values: &ParamValues) {
        if let Some(entry) = self.devices.write().get_mut(&handle) {
            entry.values.merge(values);
        }
    }

    /// Identifiers of all registered devices.
    #[must_use]
    pub fn devices(&self) -> Vec<DeviceIdentifier> {
        self.devices.read().values().map(|e| e.identifier).collect()
    }

    /// Number of refresh calls a device received.
    #[must_use]
    pub fn refresh_count(&self, handle: DeviceHandle) -> u64 {
        self.devices.read().get(&handle).map_or(0, |e| e.refreshes)
    }

    /// Number of connections that ended unidentified.
    #[must_use]
    pub fn unidentified_count(&self) -> u64 {
        self.unidentified.load(Ordering::Relaxed)
    }
}

impl ParamStore for MemoryStore {
    fn register_device(&self, identifier: &DeviceIdentifier) -> DeviceHandle {
        let handle = DeviceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.devices.write().insert(
            handle,
            DeviceEntry {
                identifier: *identifier,
                values: ParamValues::new(),
                refreshes: 0,
            },
        );
        tracing::debug!(%identifier, ?handle, "device registered");
        handle
    }

    fn unregister_device(&self, handle: DeviceHandle) {
        if self.devices.write().remove(&handle).is_some() {
            tracing::debug!(?handle, "device unregistered");
        }
    }

    fn read_params(&self, handle: DeviceHandle, bitmap: ParamBitmap) -> ParamValues {
        self.devices.read().get(&handle).map_or_else(ParamValues::new, |e| {
            e.values
                .iter()
                .filter(|&(i, _)| bitmap.contains(i))
                .collect()
        })
    }

    fn write_params(&self, handle: DeviceHandle, values: &ParamValues) {
        self.set_values(handle, values);
    }

    fn publish_params(&self, handle: DeviceHandle, values: &ParamValues) {
        self.set_values(handle, values);
    }

    fn refresh(&self, handle: DeviceHandle) {
        if let Some(entry) = self.devices.write().get_mut(&handle) {
            entry.refreshes += 1;
        }
    }

    fn device_unidentified(&self) {
        self.unidentified.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ParamValue;

    #[test]
    fn test_register_and_unregister() {
        let store = MemoryStore::new();
        let id = DeviceIdentifier::new(6, 1, 42);
        let handle = store.register_device(&id);

        assert_eq!(store.identifier(handle), Some(id));
        assert_eq!(store.handle_of(&id), Some(handle));

        store.unregister_device(handle);
        assert!(store.devices().is_empty());
    }

    #[test]
    fn test_handles_are_unique() {
        let store = MemoryStore::new();
        let a = store.register_device(&DeviceIdentifier::new(1, 1, 1));
        let b = store.register_device(&DeviceIdentifier::new(1, 1, 2));
        assert_ne!(a, b);
    }

    #[test]
    fn test_read_filters_bitmap() {
        let store = MemoryStore::new();
        let handle = store.register_device(&DeviceIdentifier::new(6, 1, 42));
        store.set_values(
            handle,
            &ParamValues::new()
                .with(0, ParamValue::Int32(1))
                .with(1, ParamValue::Int32(2))
                .with(2, ParamValue::Int32(3)),
        );

        let read = store.read_params(handle, ParamBitmap(0b101));
        assert_eq!(read.bitmap().bits(), 0b101);
        assert_eq!(read.get(2), Some(ParamValue::Int32(3)));
    }

    #[test]
    fn test_unknown_handle_is_noop() {
        let store = MemoryStore::new();
        let ghost = DeviceHandle(99);
        store.write_params(ghost, &ParamValues::new().with(0, ParamValue::Bool(true)));
        assert!(store.values(ghost).is_none());
        assert!(store.read_params(ghost, ParamBitmap(1)).is_empty());
    }
}
