//! Serial port transport.
//!
//! Peripherals hang off USB-serial adapters or UART pins. Opening a port
//! returns a [`StreamTransport`] over the native async serial stream.

use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio_serial::{SerialPortBuilderExt, SerialStream};

use crate::error::{Error, Result};
use crate::transport::StreamTransport;

/// Default baud rate for peripherals.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Default delay after opening before the port is used.
pub const DEFAULT_CONNECTION_DELAY: Duration = Duration::from_millis(100);

/// Default window for discarding bytes left over from a previous session.
pub const DEFAULT_DRAIN_WINDOW: Duration = Duration::from_millis(200);

/// Transport over a serial port.
pub type SerialTransport = StreamTransport<SerialStream>;

/// Configuration for a serial port.
#[derive(Debug, Clone)]
pub struct SerialConfig {
    /// Serial port path (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Delay after opening before the port is used.
    pub connection_delay: Duration,
    /// How long to discard stale input after the delay.
    pub drain_window: Duration,
}

impl SerialConfig {
    /// Creates a new serial configuration with default settings.
    #[must_use]
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: DEFAULT_BAUD_RATE,
            connection_delay: DEFAULT_CONNECTION_DELAY,
            drain_window: DEFAULT_DRAIN_WINDOW,
        }
    }

    /// Sets the baud rate.
    #[must_use]
    pub const fn baud_rate(mut self, rate: u32) -> Self {
        self.baud_rate = rate;
        self
    }

    /// Sets the connection delay.
    #[must_use]
    pub const fn connection_delay(mut self, delay: Duration) -> Self {
        self.connection_delay = delay;
        self
    }

    /// Sets the drain window. Zero skips draining.
    #[must_use]
    pub const fn drain_window(mut self, window: Duration) -> Self {
        self.drain_window = window;
        self
    }
}

/// Opens a serial port.
///
/// # Errors
///
/// Returns [`Error::Serial`] if the port cannot be opened.
pub async fn open(config: &SerialConfig) -> Result<SerialTransport> {
    tracing::info!(
        "opening serial port {} at {} baud",
        config.port,
        config.baud_rate
    );

    let mut stream = tokio_serial::new(&config.port, config.baud_rate)
        .open_native_async()
        .map_err(Error::Serial)?;

    // Some adapters hold the MCU in reset while RTS is asserted.
    if let Err(e) = tokio_serial::SerialPort::write_request_to_send(&mut stream, false) {
        tracing::warn!("failed to clear RTS: {e}");
    }

    tokio::time::sleep(config.connection_delay).await;

    let drained = drain(&mut stream, config.drain_window).await;
    if drained > 0 {
        tracing::debug!("drained {drained} stale bytes from {}", config.port);
    }

    tracing::info!("serial port {} open", config.port);
    Ok(StreamTransport::new(stream))
}

async fn drain(stream: &mut SerialStream, window: Duration) -> usize {
    let mut buf = [0u8; 256];
    let mut total = 0usize;
    let deadline = tokio::time::Instant::now() + window;

    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(20), stream.read(&mut buf)).await {
            Ok(Ok(n)) if n > 0 => total += n,
            _ => tokio::time::sleep(Duration::from_millis(10)).await,
        }
    }
    total
}

/// Lists available serial ports.
///
/// # Errors
///
/// Returns an error if the port list cannot be retrieved.
pub fn list_ports() -> Result<Vec<String>> {
    let ports = tokio_serial::available_ports().map_err(Error::Serial)?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}
