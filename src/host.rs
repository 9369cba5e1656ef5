//! Multi-device host.
//!
//! A [`Host`] owns the collaborators every session shares and spawns one
//! [`Connection`] task per attached transport. Sessions never talk to each
//! other; a failing device only ends its own task.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::connection::{Connection, ConnectionHandle};
use crate::error::Result;
use crate::event::{EventDispatcher, Subscription};
use crate::schema::SchemaProvider;
use crate::session::{DisconnectReason, Session, SessionConfig};
use crate::store::ParamStore;
use crate::transport::{Transport, serial};

/// A connection running on its own task.
pub struct AttachedDevice {
    /// Command handle for the connection.
    pub handle: ConnectionHandle,
    /// Resolves when the session ends.
    pub task: JoinHandle<Result<DisconnectReason>>,
}

/// Shared state for all device sessions.
pub struct Host {
    config: SessionConfig,
    store: Arc<dyn ParamStore>,
    schemas: Arc<dyn SchemaProvider>,
    events: EventDispatcher,
}

impl Host {
    /// Creates a host with default session timing.
    pub fn new(store: Arc<dyn ParamStore>, schemas: Arc<dyn SchemaProvider>) -> Self {
        Self {
            config: SessionConfig::default(),
            store,
            schemas,
            events: EventDispatcher::default(),
        }
    }

    /// Sets the timing used for sessions attached from now on.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Session timing.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Dispatcher shared by every session.
    #[must_use]
    pub const fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Subscribes to events from every session.
    #[must_use]
    pub fn subscribe(&self) -> Subscription {
        self.events.subscribe()
    }

    /// Starts a session on `transport`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach<T>(&self, transport: T) -> AttachedDevice
    where
        T: Transport + 'static,
    {
        let session = Session::new(
            self.config.clone(),
            Arc::clone(&self.store),
            Arc::clone(&self.schemas),
            Instant::now(),
        )
        .with_dispatcher(self.events.clone());
        let connection = Connection::new(transport, session);
        let handle = connection.handle();
        let config = self.config.clone();

        let task = tokio::spawn(async move {
            let result = connection.run().await;
            match &result {
                Ok(reason) => {
                    if let Some(err) = reason.into_error(&config) {
                        tracing::info!("session ended: {err}");
                    } else {
                        tracing::debug!("session closed");
                    }
                }
                Err(e) => tracing::warn!("session failed to start: {e}"),
            }
            result
        });

        AttachedDevice { handle, task }
    }

    /// Opens a serial port and starts a session on it.
    ///
    /// # Errors
    ///
    /// Returns an error if the port cannot be opened.
    pub async fn attach_serial(&self, config: &serial::SerialConfig) -> Result<AttachedDevice> {
        let transport = serial::open(config).await?;
        Ok(self.attach(transport))
    }
}
