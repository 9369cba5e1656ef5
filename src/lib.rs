//! # perilink
//!
//! Host side of a framed serial protocol for small peripherals such as limit
//! switches and servo controllers.
//!
//! Each device is reached over its own byte stream (usually a USB serial
//! adapter). Messages travel in COBS-stuffed, checksummed frames. After a
//! ping/acknowledgement handshake the host keeps a heartbeat running,
//! exchanges parameter values described by a per-device-type schema, and
//! reports everything that happens as [`Event`]s.
//!
//! ## Features
//!
//! - Async/await based API using Tokio
//! - Sans-IO [`Session`] state machine, testable without a runtime
//! - Stream resynchronization after line noise or truncated frames
//! - Schema tables loaded from JSON
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use perilink::{Host, MemoryStore, ParamBitmap, SchemaTable, SerialConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), perilink::Error> {
//!     let store = Arc::new(MemoryStore::new());
//!     let schemas = Arc::new(SchemaTable::load("devices.json")?);
//!     let host = Host::new(store.clone(), schemas);
//!     let mut events = host.subscribe();
//!
//!     let device = host.attach_serial(&SerialConfig::new("/dev/ttyUSB0")).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let perilink::Event::Identified(id) = event {
//!             println!("found {id}");
//!             device
//!                 .handle
//!                 .subscribe(ParamBitmap::from_indices([0, 1]), Duration::from_millis(100))
//!                 .await?;
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`protocol`] - COBS, frames, message kinds and parameter packing
//! - [`types`] - Device identity, schemas, parameter values, statistics
//! - [`session`] - Per-device protocol state machine
//! - [`connection`] - Async driver running a session over a transport
//! - [`transport`] - Byte transports (serial ports, generic streams)
//! - [`store`] / [`schema`] - Collaborators shared by all sessions
//! - [`event`] - Lifecycle and telemetry notifications
//! - [`host`] - One task per attached device

pub mod connection;
pub mod error;
pub mod event;
pub mod host;
pub mod protocol;
pub mod schema;
pub mod session;
pub mod store;
pub mod transport;
pub mod types;

// Re-exports for convenience
pub use connection::{Connection, ConnectionHandle};
pub use error::{Error, FrameError, Result};
pub use event::{Event, EventDispatcher, EventFilter, Subscription};
pub use host::{AttachedDevice, Host};
pub use protocol::{FrameDecoder, Message, MessageKind};
pub use schema::{SchemaProvider, SchemaTable};
pub use session::{DisconnectReason, Session, SessionConfig, SessionState};
pub use store::{MemoryStore, ParamStore};
pub use transport::{SerialConfig, SerialTransport, StreamTransport, Transport, list_ports};
pub use types::{
    Access, DataType, DeviceHandle, DeviceIdentifier, DeviceSchema, ParamBitmap, ParamDescriptor,
    ParamValue, ParamValues, SessionStats,
};
