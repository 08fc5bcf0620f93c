//! The decoded application unit carried by one frame.
//!
//! An [`Envelope`] wraps an optional request section and an optional response
//! section; each section wraps at most one concrete business message. The
//! sender decides which sections to populate, and an envelope with neither
//! section is valid on the wire but dispatches nothing.
//!
//! Envelopes double as the outbound builder: callers lazily materialise the
//! section they want with [`Envelope::request_mut`] or
//! [`Envelope::response_mut`], populate it, and hand the finished value to
//! [`Connection::send`](crate::connection::Connection::send).

use std::any::Any;

use crate::message::Message;

/// Outer container for one request and/or one response section.
#[derive(Debug, Default)]
pub struct Envelope {
    request: Option<Request>,
    response: Option<Response>,
}

impl Envelope {
    /// Create an envelope with no sections.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// The request section, if populated.
    #[must_use]
    pub fn request(&self) -> Option<&Request> { self.request.as_ref() }

    /// The response section, if populated.
    #[must_use]
    pub fn response(&self) -> Option<&Response> { self.response.as_ref() }

    /// Lazily materialise and return the mutable request section.
    pub fn request_mut(&mut self) -> &mut Request { self.request.get_or_insert_default() }

    /// Lazily materialise and return the mutable response section.
    pub fn response_mut(&mut self) -> &mut Response { self.response.get_or_insert_default() }
}

impl Message for Envelope {
    fn kind(&self) -> &'static str { "wirebus.Envelope" }

    fn as_any(&self) -> &dyn Any { self }

    fn visit_nested(&self, visit: &mut dyn FnMut(&dyn Message)) {
        if let Some(request) = &self.request {
            visit(request);
        }
        if let Some(response) = &self.response {
            visit(response);
        }
    }
}

macro_rules! section {
    ($name:ident, $kind:literal, $doc:literal) => {
        #[doc = $doc]
        #[derive(Debug, Default)]
        pub struct $name {
            message: Option<Box<dyn Message>>,
        }

        impl $name {
            /// The wrapped message, if any.
            #[must_use]
            pub fn message(&self) -> Option<&dyn Message> { self.message.as_deref() }

            /// The wrapped message downcast to a concrete type.
            #[must_use]
            pub fn message_as<M: Any>(&self) -> Option<&M> {
                self.message
                    .as_deref()
                    .and_then(|message| message.as_any().downcast_ref::<M>())
            }

            /// Place `message` in this section, replacing any previous value.
            pub fn set_message(&mut self, message: impl Message) {
                self.message = Some(Box::new(message));
            }

            /// Place an already boxed message in this section.
            pub fn set_boxed(&mut self, message: Box<dyn Message>) { self.message = Some(message); }
        }

        impl Message for $name {
            fn kind(&self) -> &'static str { $kind }

            fn as_any(&self) -> &dyn Any { self }

            fn visit_nested(&self, visit: &mut dyn FnMut(&dyn Message)) {
                if let Some(message) = self.message.as_deref() {
                    visit(message);
                }
            }
        }
    };
}

section!(
    Request,
    "wirebus.Request",
    "Request section: wraps at most one concrete request message."
);
section!(
    Response,
    "wirebus.Response",
    "Response section: wraps at most one concrete response message."
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WirePayload;

    #[derive(bincode::Encode, bincode::Decode, Debug, PartialEq, Eq)]
    struct Ping {
        sequence: u32,
    }

    impl WirePayload for Ping {
        const KIND: &'static str = "test.Ping";
    }

    fn nested_kinds(message: &dyn Message) -> Vec<&'static str> {
        let mut kinds = vec![message.kind()];
        message.visit_nested(&mut |nested| kinds.extend(nested_kinds(nested)));
        kinds
    }

    #[test]
    fn empty_envelope_has_no_sections() {
        let envelope = Envelope::new();
        assert!(envelope.request().is_none());
        assert!(envelope.response().is_none());
        assert_eq!(nested_kinds(&envelope), vec!["wirebus.Envelope"]);
    }

    #[test]
    fn request_mut_materialises_the_section_once() {
        let mut envelope = Envelope::new();
        envelope.request_mut();
        assert!(envelope.request().is_some());
        assert!(envelope.request().and_then(Request::message).is_none());

        envelope.request_mut().set_message(Ping { sequence: 7 });
        let ping = envelope
            .request()
            .and_then(Request::message_as::<Ping>)
            .expect("message should be set");
        assert_eq!(ping.sequence, 7);
    }

    #[test]
    fn tree_walk_reaches_every_layer() {
        let mut envelope = Envelope::new();
        envelope.request_mut().set_message(Ping { sequence: 1 });
        envelope.response_mut();
        assert_eq!(
            nested_kinds(&envelope),
            vec![
                "wirebus.Envelope",
                "wirebus.Request",
                "test.Ping",
                "wirebus.Response"
            ]
        );
    }
}
