//! Shared utilities for integration tests.
//!
//! Provides the business message types the core itself never sees, a
//! registry-backed serializer fixture, connection event adapters, and a
//! helper producing a connected localhost socket pair.

// Items in this shared module may not be used by all test binaries that import it.
#![allow(
    dead_code,
    reason = "shared test utilities are not used by all test binaries"
)]

use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use wirebus::{
    BincodeSerializer,
    Connection,
    ConnectionEvents,
    Envelope,
    MessageRegistry,
    MessageRouter,
    WirePayload,
};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// Install a fmt subscriber once so failing tests show transport logs.
pub fn init_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

impl WirePayload for LoginRequest {
    const KIND: &'static str = "auth.LoginRequest";
}

#[derive(bincode::Encode, bincode::Decode, Debug, Clone, PartialEq, Eq)]
pub struct LoginResponse {
    pub ok: bool,
    pub motd: String,
}

impl WirePayload for LoginResponse {
    const KIND: &'static str = "auth.LoginResponse";
}

/// Serializer over a registry holding both test message types.
pub fn serializer() -> Arc<BincodeSerializer> {
    let registry = MessageRegistry::new();
    registry.register::<LoginRequest>();
    registry.register::<LoginResponse>();
    Arc::new(BincodeSerializer::new(Arc::new(registry)))
}

/// Connection events forwarded into plain channels for assertions.
pub struct ChannelEvents {
    envelopes: mpsc::UnboundedSender<Envelope>,
    disconnects: mpsc::UnboundedSender<()>,
}

impl ConnectionEvents for ChannelEvents {
    fn on_envelope(&self, _connection: &Arc<Connection>, envelope: Envelope) {
        let _ = self.envelopes.send(envelope);
    }

    fn on_disconnect(&self, _connection: &Arc<Connection>) {
        let _ = self.disconnects.send(());
    }
}

pub fn channel_events() -> (
    Arc<ChannelEvents>,
    mpsc::UnboundedReceiver<Envelope>,
    mpsc::UnboundedReceiver<()>,
) {
    let (envelopes, envelope_rx) = mpsc::unbounded_channel();
    let (disconnects, disconnect_rx) = mpsc::unbounded_channel();
    (
        Arc::new(ChannelEvents {
            envelopes,
            disconnects,
        }),
        envelope_rx,
        disconnect_rx,
    )
}

/// Connection events forwarding every envelope into a router, the way a
/// production owner wires its data-received callback.
pub struct RouterEvents {
    pub router: Arc<MessageRouter>,
}

impl ConnectionEvents for RouterEvents {
    fn on_envelope(&self, connection: &Arc<Connection>, envelope: Envelope) {
        if let Err(error) = self.router.enqueue(Arc::clone(connection), envelope) {
            eprintln!("enqueue failed: {error}");
        }
    }
}

/// Receive one value or fail the test after five seconds.
pub async fn recv_one<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> TestResult<T> {
    let value = tokio::time::timeout(std::time::Duration::from_secs(5), rx.recv()).await?;
    value.ok_or_else(|| "channel closed".into())
}

/// A connected localhost socket pair: `(accepted, client)`.
pub async fn socket_pair() -> TestResult<(TcpStream, TcpStream)> {
    init_logging();
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let (accepted, client) = tokio::join!(listener.accept(), TcpStream::connect(addr));
    Ok((accepted?.0, client?))
}
