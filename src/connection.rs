//! One socket, one decoder: the connection abstraction.
//!
//! A [`Connection`] binds a [`TcpStream`] to a [`FrameDecoder`] for its
//! lifetime. A spawned read task drives the decoder and surfaces decoded
//! envelopes and the disconnect through [`ConnectionEvents`]; the send path
//! serializes outgoing envelopes under the same framing convention.
//! Connections are created when a socket becomes connected (the accept loop
//! and outbound connect are external collaborators) and are never pooled or
//! reused.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::envelope::Envelope;
use crate::error::ConnectionError;
use crate::frame::{DEFAULT_BUFFER_CAPACITY, FrameDecoder, FrameFormat};
use crate::serializer::Serializer;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier assigned to a connection for its lifetime.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Return the inner `u64` representation.
    #[must_use]
    pub fn as_u64(&self) -> u64 { self.0 }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "conn-{}", self.0) }
}

/// Owner callbacks invoked by a connection's read task.
///
/// `on_envelope` typically forwards to
/// [`MessageRouter::enqueue`](crate::router::MessageRouter::enqueue) so
/// decoding never blocks on application logic. Both callbacks run on the
/// connection's read task and must not block.
pub trait ConnectionEvents: Send + Sync + 'static {
    /// A frame was decoded into `envelope` on `connection`.
    fn on_envelope(&self, connection: &Arc<Connection>, envelope: Envelope);

    /// The connection closed; fired exactly once per connection.
    fn on_disconnect(&self, connection: &Arc<Connection>) { let _ = connection; }
}

/// A live connection owning one socket and one frame decoder.
pub struct Connection {
    id: ConnectionId,
    peer_addr: Option<SocketAddr>,
    writer: Mutex<Option<BufWriter<OwnedWriteHalf>>>,
    format: FrameFormat,
    serializer: Arc<dyn Serializer>,
    events: Arc<dyn ConnectionEvents>,
    cancel: CancellationToken,
    disconnected: AtomicBool,
}

impl Connection {
    /// Bind `stream` to a new connection using the default wire framing (a
    /// stripped 4-byte little-endian prefix) and spawn its read task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        stream: TcpStream,
        serializer: Arc<dyn Serializer>,
        events: Arc<dyn ConnectionEvents>,
    ) -> Arc<Self> {
        Self::spawn_with_format(
            stream,
            serializer,
            events,
            FrameFormat::default(),
            DEFAULT_BUFFER_CAPACITY,
        )
    }

    /// [`spawn`](Connection::spawn) with explicit framing parameters and
    /// receive buffer capacity.
    pub fn spawn_with_format(
        stream: TcpStream,
        serializer: Arc<dyn Serializer>,
        events: Arc<dyn ConnectionEvents>,
        format: FrameFormat,
        buffer_capacity: usize,
    ) -> Arc<Self> {
        let peer_addr = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        let connection = Arc::new(Self {
            id: ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)),
            peer_addr,
            writer: Mutex::new(Some(BufWriter::new(writer))),
            format,
            serializer,
            events,
            cancel: CancellationToken::new(),
            disconnected: AtomicBool::new(false),
        });
        let decoder = FrameDecoder::with_capacity(format, buffer_capacity);
        tokio::spawn(Self::read_loop(Arc::clone(&connection), reader, decoder));
        debug!(id = %connection.id, peer = ?connection.peer_addr, "connection established");
        connection
    }

    /// This connection's process-unique identifier.
    #[must_use]
    pub fn id(&self) -> ConnectionId { self.id }

    /// The peer address, if it was known at establishment.
    #[must_use]
    pub fn peer_addr(&self) -> Option<SocketAddr> { self.peer_addr }

    /// Whether the connection has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool { self.disconnected.load(Ordering::SeqCst) }

    /// Serialize `envelope`, prefix it with its encoded length, and write it
    /// to the socket.
    ///
    /// Write failures are surfaced but never retried at this layer; a caller
    /// monitoring the connection may decide to close it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] after [`close`](Connection::close),
    /// a [`CodecError`](crate::error::CodecError) if serialization fails, or
    /// the underlying I/O error.
    pub async fn send(&self, envelope: &Envelope) -> Result<(), ConnectionError> {
        let payload = self.serializer.serialize(envelope)?;
        let mut framed = BytesMut::with_capacity(self.format.length_field_length() + payload.len());
        self.format.encode(&payload, &mut framed)?;
        self.send_raw(&framed).await
    }

    /// Write pre-framed bytes to the socket.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectionError::Closed`] after [`close`](Connection::close)
    /// or the underlying I/O error.
    pub async fn send_raw(&self, bytes: &[u8]) -> Result<(), ConnectionError> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(ConnectionError::Closed)?;
        sink.write_all(bytes).await?;
        sink.flush().await?;
        Ok(())
    }

    /// Shut the connection down and notify the owner.
    ///
    /// Serialized with concurrent sends through the writer lock. Shutdown
    /// errors from an already torn-down peer are swallowed. The disconnect
    /// callback fires exactly once no matter how many paths reach here.
    pub async fn close(self: &Arc<Self>) {
        {
            let mut writer = self.writer.lock().await;
            if let Some(mut sink) = writer.take() {
                if let Err(error) = sink.shutdown().await {
                    debug!(id = %self.id, %error, "socket shutdown failed");
                }
            }
        }
        self.cancel.cancel();
        if !self.disconnected.swap(true, Ordering::SeqCst) {
            debug!(id = %self.id, "connection closed");
            self.events.on_disconnect(self);
        }
    }

    async fn read_loop(connection: Arc<Self>, mut reader: OwnedReadHalf, mut decoder: FrameDecoder) {
        'read: loop {
            let spare = decoder.spare_capacity_mut();
            if spare.is_empty() {
                // only reachable with a format whose header outgrows the buffer
                error!(id = %connection.id, "receive buffer full without a frame boundary");
                break 'read;
            }
            let read = tokio::select! {
                () = connection.cancel.cancelled() => return,
                result = reader.read(spare) => match result {
                    Ok(0) => {
                        debug!(id = %connection.id, "peer closed the connection");
                        break 'read;
                    }
                    Ok(read) => read,
                    Err(error) => {
                        debug!(id = %connection.id, %error, "socket read failed");
                        break 'read;
                    }
                },
            };
            let frames = match decoder.commit(read) {
                Ok(frames) => frames,
                Err(error) => {
                    error!(id = %connection.id, %error, "framing error, closing connection");
                    break 'read;
                }
            };
            for frame in frames {
                match connection.serializer.deserialize(&frame) {
                    Ok(envelope) => connection.events.on_envelope(&connection, envelope),
                    Err(error) => {
                        error!(id = %connection.id, %error, "envelope decode failed, closing connection");
                        break 'read;
                    }
                }
            }
        }
        connection.close().await;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}
