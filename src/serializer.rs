//! Envelope serialization.
//!
//! The core treats envelope encoding as opaque: anything satisfying
//! [`Serializer`] may be plugged into a connection. [`BincodeSerializer`] is
//! the default, encoding each populated section as a `(kind, payload)` pair
//! resolved through a [`MessageRegistry`].

use std::sync::Arc;

use crate::envelope::Envelope;
use crate::error::CodecError;
use crate::message::MessageRegistry;

/// Converts envelopes to and from wire bytes.
pub trait Serializer: Send + Sync {
    /// Serialize `envelope` into a byte vector.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if any carried message cannot be encoded.
    fn serialize(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError>;

    /// Deserialize an envelope from `bytes`.
    ///
    /// # Errors
    ///
    /// Returns a [`CodecError`] if the bytes do not decode to a valid
    /// envelope or name an unregistered message kind.
    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope, CodecError>;
}

#[derive(bincode::Encode, bincode::Decode, Debug)]
struct WireMessage {
    kind: String,
    payload: Vec<u8>,
}

#[derive(bincode::Encode, bincode::Decode, Debug)]
struct WireSection {
    message: Option<WireMessage>,
}

#[derive(bincode::Encode, bincode::Decode, Debug)]
struct WireEnvelope {
    request: Option<WireSection>,
    response: Option<WireSection>,
}

/// Serializer using `bincode` with its standard configuration.
#[derive(Clone, Debug)]
pub struct BincodeSerializer {
    registry: Arc<MessageRegistry>,
}

impl BincodeSerializer {
    /// Create a serializer resolving message kinds through `registry`.
    #[must_use]
    pub fn new(registry: Arc<MessageRegistry>) -> Self { Self { registry } }

    /// The message registry this serializer resolves kinds through.
    #[must_use]
    pub fn registry(&self) -> &Arc<MessageRegistry> { &self.registry }
}

impl Serializer for BincodeSerializer {
    fn serialize(&self, envelope: &Envelope) -> Result<Vec<u8>, CodecError> {
        let encode_section = |message: Option<&dyn crate::message::Message>| -> Result<WireSection, CodecError> {
            message
                .map(|message| {
                    let (kind, payload) = self.registry.encode(message)?;
                    Ok(WireMessage {
                        kind: kind.to_owned(),
                        payload,
                    })
                })
                .transpose()
                .map(|message| WireSection { message })
        };

        let wire = WireEnvelope {
            request: envelope
                .request()
                .map(|section| encode_section(section.message()))
                .transpose()?,
            response: envelope
                .response()
                .map(|section| encode_section(section.message()))
                .transpose()?,
        };
        Ok(bincode::encode_to_vec(&wire, bincode::config::standard())?)
    }

    fn deserialize(&self, bytes: &[u8]) -> Result<Envelope, CodecError> {
        let (wire, _) =
            bincode::decode_from_slice::<WireEnvelope, _>(bytes, bincode::config::standard())?;
        let mut envelope = Envelope::new();
        if let Some(section) = wire.request {
            let out = envelope.request_mut();
            if let Some(message) = section.message {
                out.set_boxed(self.registry.decode(&message.kind, &message.payload)?);
            }
        }
        if let Some(section) = wire.response {
            let out = envelope.response_mut();
            if let Some(message) = section.message {
                out.set_boxed(self.registry.decode(&message.kind, &message.payload)?);
            }
        }
        Ok(envelope)
    }
}
