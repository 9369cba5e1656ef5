//! Async driver that runs one [`Session`] over one [`Transport`].
//!
//! Each iteration polls the session timers, applies queued host commands,
//! writes pending frames and then waits up to the configured read timeout
//! for input. The read is the only place the loop suspends.

use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::protocol::FrameDecoder;
use crate::session::{DisconnectReason, Session, SessionState};
use crate::transport::Transport;
use crate::types::{ParamBitmap, ParamValues};

/// Capacity of the host command channel.
const COMMAND_CHANNEL_SIZE: usize = 32;

enum Command {
    Subscribe {
        bitmap: ParamBitmap,
        interval: Duration,
        reply: oneshot::Sender<Result<()>>,
    },
    Write {
        values: ParamValues,
        reply: oneshot::Sender<Result<()>>,
    },
    Disable {
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Cloneable handle for sending host commands to a running [`Connection`].
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<Command>,
}

impl ConnectionHandle {
    /// Asks the device to report `bitmap` every `interval`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotIdentified`] before the handshake and
    /// [`Error::ChannelClosed`] once the connection has stopped.
    pub async fn subscribe(&self, bitmap: ParamBitmap, interval: Duration) -> Result<()> {
        self.request(|reply| Command::Subscribe {
            bitmap,
            interval,
            reply,
        })
        .await
    }

    /// Writes parameter values to the device.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub async fn write_params(&self, values: ParamValues) -> Result<()> {
        self.request(|reply| Command::Write { values, reply }).await
    }

    /// Tells the device to stop its outputs.
    ///
    /// # Errors
    ///
    /// See [`subscribe`](Self::subscribe).
    pub async fn disable(&self) -> Result<()> {
        self.request(|reply| Command::Disable { reply }).await
    }

    /// Closes the connection. Does nothing if it already stopped.
    pub async fn close(&self) {
        let _ = self.tx.send(Command::Close).await;
    }

    async fn request<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Command,
    {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| Error::ChannelClosed)?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }
}

/// Runs a session over a transport until the session ends.
pub struct Connection<T> {
    transport: T,
    decoder: FrameDecoder,
    session: Session,
    commands: mpsc::Receiver<Command>,
    handle: ConnectionHandle,
}

impl<T: Transport> Connection<T> {
    /// Creates a connection for a fresh session.
    pub fn new(transport: T, session: Session) -> Self {
        let (tx, commands) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        Self {
            transport,
            decoder: FrameDecoder::new(),
            session,
            commands,
            handle: ConnectionHandle { tx },
        }
    }

    /// Returns a handle for issuing host commands.
    #[must_use]
    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// The session being driven.
    #[must_use]
    pub const fn session(&self) -> &Session {
        &self.session
    }

    /// Runs until the session disconnects and returns why.
    ///
    /// Transport failures end the session with
    /// [`DisconnectReason::TransportClosed`]; they are not returned as
    /// errors.
    ///
    /// # Errors
    ///
    /// Returns [`Error::NotConnected`] if the transport is already closed.
    pub async fn run(mut self) -> Result<DisconnectReason> {
        if !self.transport.is_open() {
            return Err(Error::NotConnected);
        }
        let read_timeout = self.session.config().read_timeout;

        while self.session.poll(Instant::now()) != SessionState::Disconnected {
            self.apply_commands();

            if let Err(e) = self.flush().await {
                tracing::warn!("write failed: {e}");
                self.session.close(DisconnectReason::TransportClosed);
                break;
            }

            match self.transport.read(read_timeout).await {
                Ok(Some(data)) => self.receive(&data),
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!("read failed: {e}");
                    self.session.close(DisconnectReason::TransportClosed);
                }
            }
        }

        self.decoder.clear();
        if let Err(e) = self.transport.close().await {
            tracing::debug!("error closing transport: {e}");
        }

        let reason = self
            .session
            .disconnect_reason()
            .unwrap_or(DisconnectReason::Closed);
        let stats = self.session.stats();
        tracing::debug!(
            ?reason,
            received = stats.frames_received,
            sent = stats.frames_sent,
            dropped = stats.dropped(),
            "connection finished"
        );
        Ok(reason)
    }

    fn receive(&mut self, data: &Bytes) {
        self.decoder.feed(data);
        loop {
            match self.decoder.decode() {
                Ok(Some(msg)) => self.session.handle_message(msg, Instant::now()),
                Ok(None) => break,
                Err(e) => self.session.handle_frame_error(&e),
            }
        }
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::Subscribe {
                    bitmap,
                    interval,
                    reply,
                } => {
                    let _ = reply.send(self.session.request_subscription(bitmap, interval));
                }
                Command::Write { values, reply } => {
                    let _ = reply.send(self.session.write_params(&values));
                }
                Command::Disable { reply } => {
                    let _ = reply.send(self.session.disable());
                }
                Command::Close => self.session.close(DisconnectReason::Closed),
            }
        }
    }

    async fn flush(&mut self) -> Result<()> {
        while let Some(msg) = self.session.next_outgoing() {
            // An oversize message is dropped whole, never partially written.
            let frame = match msg.to_frame() {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::warn!(kind = %msg.kind(), "dropping outgoing message: {e}");
                    continue;
                }
            };
            tracing::trace!(kind = %msg.kind(), "sending frame: {} bytes", frame.len());
            self.transport.write(frame).await?;
            self.session.record_sent();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::io::{AsyncWriteExt, DuplexStream};

    use super::*;
    use crate::event::Event;
    use crate::protocol::{Message, MessageKind, read_message};
    use crate::schema::SchemaTable;
    use crate::session::SessionConfig;
    use crate::store::MemoryStore;
    use crate::transport::StreamTransport;
    use crate::types::{DataType, DeviceIdentifier, DeviceSchema, ParamDescriptor, ParamValue};

    const ID: DeviceIdentifier = DeviceIdentifier::new(6, 1, 42);

    struct Device {
        stream: DuplexStream,
        decoder: FrameDecoder,
    }

    impl Device {
        async fn recv(&mut self) -> Message {
            read_message(&mut self.stream, &mut self.decoder)
                .await
                .unwrap()
        }

        async fn recv_kind(&mut self, kind: MessageKind) -> Message {
            loop {
                let msg = self.recv().await;
                if msg.kind() == kind {
                    return msg;
                }
            }
        }

        async fn send(&mut self, msg: &Message) {
            self.stream
                .write_all(&msg.to_frame().unwrap())
                .await
                .unwrap();
        }
    }

    fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }

    fn setup(
        config: SessionConfig,
    ) -> (Connection<StreamTransport<DuplexStream>>, Device, Arc<MemoryStore>) {
        init_tracing();
        let (host_side, device_side) = tokio::io::duplex(1024);
        let store = Arc::new(MemoryStore::new());
        let schemas = Arc::new(
            SchemaTable::new()
                .with_schema(
                    DeviceSchema::new(6, "ServoControl")
                        .with_param(
                            ParamDescriptor::new(0, DataType::Float32)
                                .readable()
                                .writable(),
                        )
                        .with_param(ParamDescriptor::new(1, DataType::Bool).readable()),
                )
                .unwrap(),
        );
        let session = Session::new(config, store.clone(), schemas, Instant::now());
        let connection = Connection::new(StreamTransport::new(host_side), session);
        let device = Device {
            stream: device_side,
            decoder: FrameDecoder::new(),
        };
        (connection, device, store)
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_over_wire() {
        let (connection, mut device, store) = setup(SessionConfig::default());
        let mut events = connection.session().events().subscribe();
        let task = tokio::spawn(connection.run());

        assert_eq!(device.recv().await, Message::ping());
        device.send(&Message::acknowledgement(&ID)).await;

        assert!(matches!(events.recv().await, Some(Event::Identified(id)) if id == ID));
        assert_eq!(store.devices(), vec![ID]);

        drop(device);
        let reason = task.await.unwrap().unwrap();
        assert_eq!(reason, DisconnectReason::TransportClosed);
        assert!(store.devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_resyncs_after_garbage() {
        let (connection, mut device, _store) = setup(SessionConfig::default());
        let mut events = connection.session().events().subscribe();
        let _task = tokio::spawn(connection.run());

        device.recv().await;
        device
            .stream
            .write_all(&[0x13, 0x37, 0x00, 0x05, 0xff])
            .await
            .unwrap();
        device.send(&Message::acknowledgement(&ID)).await;

        assert!(matches!(events.recv().await, Some(Event::Identified(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_timeout() {
        let (connection, mut device, store) = setup(SessionConfig::default());
        let task = tokio::spawn(connection.run());

        device.recv().await;
        device.send(&Message::acknowledgement(&ID)).await;
        let start = Instant::now();

        let reason = task.await.unwrap().unwrap();
        assert_eq!(reason, DisconnectReason::HeartbeatTimeout);
        assert!(start.elapsed() >= Duration::from_millis(1900));
        assert!(store.devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_handshake_timeout() {
        let (connection, _device, store) = setup(SessionConfig::default());
        let reason = connection.run().await.unwrap();

        assert_eq!(reason, DisconnectReason::HandshakeTimeout);
        assert_eq!(store.unidentified_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_commands() {
        let (connection, mut device, _store) = setup(SessionConfig::default());
        let handle = connection.handle();
        let mut events = connection.session().events().subscribe();
        let task = tokio::spawn(connection.run());

        assert!(matches!(handle.disable().await, Err(Error::NotIdentified)));

        device.recv().await;
        device.send(&Message::acknowledgement(&ID)).await;
        events.recv().await;

        handle
            .subscribe(ParamBitmap(0b11), Duration::from_millis(50))
            .await
            .unwrap();
        assert_eq!(
            device.recv_kind(MessageKind::SubscriptionRequest).await,
            Message::subscription_request(ParamBitmap(0b11), 50)
        );

        handle
            .write_params(ParamValues::new().with(0, ParamValue::Float32(0.5)))
            .await
            .unwrap();
        let write = device.recv_kind(MessageKind::DeviceWrite).await;
        assert_eq!(&write.payload()[..4], &1u32.to_le_bytes());

        handle.close().await;
        assert_eq!(task.await.unwrap().unwrap(), DisconnectReason::Closed);
        assert!(matches!(handle.disable().await, Err(Error::ChannelClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_data_reaches_store() {
        let (connection, mut device, store) = setup(SessionConfig::default());
        let mut events = connection.session().events().subscribe();
        let _task = tokio::spawn(connection.run());

        device.recv().await;
        device.send(&Message::acknowledgement(&ID)).await;
        events.recv().await;

        let schema = DeviceSchema::new(6, "ServoControl")
            .with_param(ParamDescriptor::new(1, DataType::Bool).readable());
        let reported = ParamValues::new().with(1, ParamValue::Bool(true));
        device.send(&Message::device_data(&reported, &schema)).await;

        assert!(matches!(events.recv().await, Some(Event::Data { .. })));
        let handle = store.handle_of(&ID).unwrap();
        assert_eq!(store.values(handle).unwrap().get(1), Some(ParamValue::Bool(true)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sent_counter_tracks_writes() {
        let (mut connection, mut device, _store) = setup(SessionConfig::default());
        let t0 = Instant::now();

        connection.session.poll(t0);
        connection.flush().await.unwrap();
        assert_eq!(connection.session.stats().frames_sent, 1);
        assert_eq!(device.recv().await, Message::ping());

        connection.transport.close().await.unwrap();
        connection.session.poll(t0 + Duration::from_millis(500));
        assert!(connection.flush().await.is_err());
        assert_eq!(connection.session.stats().frames_sent, 1);
    }

    #[tokio::test]
    async fn test_closed_transport_rejected() {
        let (mut connection, _device, _store) = setup(SessionConfig::default());
        connection.transport.close().await.unwrap();
        assert!(matches!(connection.run().await, Err(Error::NotConnected)));
    }
}
