//! Message traits and the type-tag registry.
//!
//! Dispatch is keyed by the runtime type of each message. Rather than
//! reflecting over fields, concrete payloads implement [`WirePayload`] with a
//! stable wire tag and an explicit traversal of any message-valued fields; a
//! blanket implementation lifts them into the object-safe [`Message`] trait
//! the router and serializer work with.

use std::any::{Any, TypeId};
use std::fmt;

use dashmap::DashMap;

use crate::error::CodecError;

/// Object-safe view of a dispatchable message.
///
/// Implemented for every [`WirePayload`] via a blanket impl, and manually for
/// the envelope wrapper types so the dispatch tree-walk can treat the whole
/// nested structure uniformly.
pub trait Message: Any + Send + Sync + fmt::Debug {
    /// Stable identifier for this message shape, used as the wire tag and in
    /// diagnostics.
    fn kind(&self) -> &'static str;

    /// Upcast for runtime type identification and downcasting.
    fn as_any(&self) -> &dyn Any;

    /// Visit every nested message value held by this one.
    fn visit_nested(&self, visit: &mut dyn FnMut(&dyn Message));
}

/// A concrete business message that can travel inside an envelope section.
///
/// Implementors supply bincode encoding plus a globally unique [`KIND`]
/// string. Payloads that themselves carry message-valued fields override
/// [`visit_fields`] so handlers for the inner types fire during dispatch.
///
/// [`KIND`]: WirePayload::KIND
/// [`visit_fields`]: WirePayload::visit_fields
///
/// # Example
///
/// ```
/// use wirebus::WirePayload;
///
/// #[derive(bincode::Encode, bincode::Decode, Debug)]
/// struct Ping {
///     sequence: u32,
/// }
///
/// impl WirePayload for Ping {
///     const KIND: &'static str = "example.Ping";
/// }
/// ```
pub trait WirePayload:
    bincode::Encode + bincode::Decode<()> + fmt::Debug + Send + Sync + 'static
{
    /// Stable, globally unique wire tag for this message shape.
    const KIND: &'static str;

    /// Visit message-valued fields of this payload. Defaults to a leaf.
    fn visit_fields(&self, visit: &mut dyn FnMut(&dyn Message)) { let _ = visit; }
}

impl<T: WirePayload> Message for T {
    fn kind(&self) -> &'static str { T::KIND }

    fn as_any(&self) -> &dyn Any { self }

    fn visit_nested(&self, visit: &mut dyn FnMut(&dyn Message)) { self.visit_fields(visit); }
}

type DecodeFn = fn(&[u8]) -> Result<Box<dyn Message>, CodecError>;
type EncodeFn = fn(&dyn Message) -> Result<Vec<u8>, CodecError>;

struct EncodeEntry {
    kind: &'static str,
    encode: EncodeFn,
}

/// Registry mapping wire tags to message codecs.
///
/// Populated once per concrete payload type via [`register`], usually at
/// startup alongside handler subscriptions. Registration is idempotent and
/// safe during traffic.
///
/// [`register`]: MessageRegistry::register
#[derive(Default)]
pub struct MessageRegistry {
    decoders: DashMap<&'static str, DecodeFn>,
    encoders: DashMap<TypeId, EncodeEntry>,
}

impl MessageRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register the codec for payload type `M` under [`WirePayload::KIND`].
    pub fn register<M: WirePayload>(&self) {
        self.decoders.insert(M::KIND, |payload| {
            let (value, _) =
                bincode::decode_from_slice::<M, _>(payload, bincode::config::standard())?;
            Ok(Box::new(value))
        });
        self.encoders.insert(
            TypeId::of::<M>(),
            EncodeEntry {
                kind: M::KIND,
                encode: |message| {
                    let value = message
                        .as_any()
                        .downcast_ref::<M>()
                        .ok_or(CodecError::UnregisteredType(M::KIND))?;
                    Ok(bincode::encode_to_vec(value, bincode::config::standard())?)
                },
            },
        );
    }

    /// Decode the payload registered under `kind`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownKind`] if no decoder was registered for
    /// `kind`, or the bincode error when the payload bytes are invalid.
    pub fn decode(&self, kind: &str, payload: &[u8]) -> Result<Box<dyn Message>, CodecError> {
        let decode = self
            .decoders
            .get(kind)
            .ok_or_else(|| CodecError::UnknownKind(kind.to_owned()))?;
        (decode)(payload)
    }

    /// Encode `message`, returning its wire tag and payload bytes.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnregisteredType`] if the concrete type was
    /// never registered, or the bincode error when encoding fails.
    pub fn encode(&self, message: &dyn Message) -> Result<(&'static str, Vec<u8>), CodecError> {
        let entry = self
            .encoders
            .get(&message.as_any().type_id())
            .ok_or(CodecError::UnregisteredType(message.kind()))?;
        let payload = (entry.encode)(message)?;
        Ok((entry.kind, payload))
    }
}

impl fmt::Debug for MessageRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageRegistry")
            .field("registered", &self.decoders.len())
            .finish()
    }
}
