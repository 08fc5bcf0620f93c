//! Transport and dispatch core for a client/server messaging framework.
//!
//! `wirebus` turns a raw, unbounded TCP byte stream into discrete
//! application envelopes and routes each decoded envelope to interested
//! handlers, including handlers for message values nested inside it.
//!
//! Three pieces cooperate:
//!
//! - [`FrameDecoder`] incrementally reconstructs length-field frames from an
//!   arbitrary split of bytes across socket reads, using a fixed receive
//!   buffer that bounds the maximum frame size.
//! - [`Connection`] binds one socket to one decoder, translates frames to
//!   and from [`Envelope`] values, and serializes outgoing envelopes under
//!   the same framing convention.
//! - [`MessageRouter`] drains a shared FIFO queue with a bounded worker pool
//!   and dispatches every message found in an envelope's nested tree to the
//!   handlers subscribed to its runtime type, without ever blocking the
//!   network I/O path.

pub mod connection;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod message;
pub mod router;
pub mod serializer;

pub use connection::{Connection, ConnectionEvents, ConnectionId};
pub use envelope::{Envelope, Request, Response};
pub use error::{CodecError, ConnectionError, FrameError, RouterError};
pub use frame::{DEFAULT_BUFFER_CAPACITY, Endianness, FrameDecoder, FrameFormat};
pub use message::{Message, MessageRegistry, WirePayload};
pub use router::{HandlerId, MAX_WORKERS, MIN_WORKERS, MessageRouter};
pub use serializer::{BincodeSerializer, Serializer};
