//! Error types shared across the transport and dispatch layers.

use std::io;

use thiserror::Error;

/// Errors raised while extracting frames from the byte stream.
///
/// Every variant is fatal for the connection that produced it: the stream
/// position can no longer be trusted once framing arithmetic fails.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum FrameError {
    /// The configured length field width is not 1, 2, 4, or 8 bytes.
    #[error("unsupported length field width of {0} bytes")]
    UnsupportedLengthWidth(usize),
    /// The declared body length produced an impossible frame length.
    #[error("corrupt length field: declared body {declared}, frame total {total}")]
    CorruptLength { declared: i64, total: i64 },
    /// A frame longer than the receive buffer can never be reassembled.
    #[error("frame of {total} bytes exceeds the {capacity}-byte receive buffer")]
    FrameTooLarge { total: usize, capacity: usize },
    /// An outgoing payload does not fit the configured length field.
    #[error("payload of {len} bytes does not fit the length field")]
    LengthOverflow { len: usize },
}

/// Errors raised while encoding or decoding envelopes.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CodecError {
    /// Serialising a message or envelope failed.
    #[error("encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    /// The payload bytes do not decode to a valid value.
    #[error("decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    /// An inbound section names a kind no decoder was registered for.
    #[error("message kind {0:?} is not registered")]
    UnknownKind(String),
    /// An outbound section holds a type no encoder was registered for.
    #[error("message type {0} is not registered for encoding")]
    UnregisteredType(&'static str),
}

/// Errors surfaced by [`Connection`](crate::connection::Connection)
/// operations.
///
/// Write failures are observed, not retried; callers monitoring a connection
/// may react by closing it.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The connection has already been closed.
    #[error("connection is closed")]
    Closed,
    /// Serialising the outgoing envelope failed.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
    /// Framing the outgoing payload failed.
    #[error("framing error: {0}")]
    Frame(#[from] FrameError),
    /// The underlying socket write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Errors returned by [`MessageRouter`](crate::router::MessageRouter)
/// lifecycle operations.
#[derive(Debug, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum RouterError {
    /// `start` was called while the worker pool was already running.
    #[error("router workers are already running")]
    AlreadyRunning,
    /// `enqueue` was called without a running worker pool.
    #[error("router is not running")]
    NotRunning,
}
