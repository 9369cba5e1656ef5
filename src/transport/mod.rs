//! Byte transports a session runs over.
//!
//! A [`Transport`] moves raw bytes and knows nothing about frames. Serial
//! ports are opened through [`serial::open`]; any other async byte stream,
//! such as a TCP socket or an in-memory pipe, can be wrapped in a
//! [`StreamTransport`].

pub mod serial;

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Error, Result};

/// Size of the buffer a single read fills.
pub const READ_BUFFER_SIZE: usize = 1024;

/// Trait for transport implementations.
pub trait Transport: Send {
    /// Reads whatever bytes arrive within `timeout`. `Ok(None)` means the
    /// timeout expired with nothing received.
    fn read(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + '_>>;

    /// Writes all of `data`.
    fn write(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns true until the peer hangs up or [`close`](Self::close) is
    /// called.
    fn is_open(&self) -> bool;

    /// Closes the transport.
    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// [`Transport`] over any async byte stream.
pub struct StreamTransport<S> {
    stream: Option<S>,
}

impl<S> StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wraps an open stream.
    pub const fn new(stream: S) -> Self {
        Self {
            stream: Some(stream),
        }
    }
}

impl<S> Transport for StreamTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    fn read(
        &mut self,
        timeout: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Bytes>>> + Send + '_>> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
            let mut buf = [0u8; READ_BUFFER_SIZE];

            let result = tokio::time::timeout(timeout, stream.read(&mut buf)).await;
            match result {
                Err(_) => Ok(None),
                Ok(Ok(0)) => {
                    tracing::debug!("stream closed by peer");
                    self.stream = None;
                    Err(Error::Io(io::Error::new(
                        io::ErrorKind::ConnectionReset,
                        "stream closed",
                    )))
                }
                Ok(Ok(n)) => {
                    tracing::trace!("received {n} bytes");
                    Ok(Some(Bytes::copy_from_slice(&buf[..n])))
                }
                Ok(Err(e)) => {
                    tracing::error!("read error: {e}");
                    self.stream = None;
                    Err(Error::Io(e))
                }
            }
        })
    }

    fn write(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let stream = self.stream.as_mut().ok_or(Error::NotConnected)?;
            tracing::trace!("sending {} bytes", data.len());

            stream.write_all(&data).await?;
            stream.flush().await?;
            Ok(())
        })
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn close(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(mut stream) = self.stream.take() {
                tracing::debug!("closing stream");
                stream.shutdown().await?;
            }
            Ok(())
        })
    }
}

pub use serial::{SerialConfig, SerialTransport, list_ports};

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_and_write() {
        let (a, b) = tokio::io::duplex(64);
        let mut left = StreamTransport::new(a);
        let mut right = StreamTransport::new(b);

        left.write(Bytes::from_static(b"\x00\x03\x01\x01\x01"))
            .await
            .unwrap();
        let got = right.read(Duration::from_millis(100)).await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"\x00\x03\x01\x01\x01"[..]));
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout() {
        let (a, _b) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(a);

        let got = transport.read(Duration::from_millis(20)).await.unwrap();
        assert!(got.is_none());
        assert!(transport.is_open());
    }

    #[tokio::test]
    async fn test_peer_hangup_closes() {
        let (a, b) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(a);
        drop(b);

        let result = transport.read(Duration::from_millis(100)).await;
        assert!(matches!(result, Err(Error::Io(_))));
        assert!(!transport.is_open());
        assert!(matches!(
            transport.write(Bytes::from_static(b"x")).await,
            Err(Error::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (a, _b) = tokio::io::duplex(64);
        let mut transport = StreamTransport::new(a);
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        assert!(!transport.is_open());
    }
}
