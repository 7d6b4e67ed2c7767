//! ---
//! mfp_section: "02-messaging-envelope-model"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Cross-context transport primitives."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Receiver-side checks on raw events.
//!
//! Events are checked by sender origin first and by transport tag second; only
//! then is the envelope decoded. Rejected events are dropped without logging.
use mfp_messaging::{MessageEnvelope, MessagingTransport, TopicMessage};
use serde::Deserialize;

use crate::window::MessageEvent;

/// Whether the event was posted from `origin`.
pub fn filter_by_origin(event: &MessageEvent, origin: &str) -> bool {
    event.origin == origin
}

/// Whether the event declares the given transport tag. Only the tag is read;
/// every spelling the decoder accepts is recognised.
pub fn filter_by_transport(event: &MessageEvent, transport: MessagingTransport) -> bool {
    event
        .data
        .get("transport")
        .and_then(|tag| MessagingTransport::deserialize(tag).ok())
        .is_some_and(|tag| tag == transport)
}

/// Decode the envelope carried by the event, `None` if it is malformed.
pub fn pluck_envelope(event: MessageEvent) -> Option<MessageEnvelope> {
    MessageEnvelope::from_value(event.data).ok()
}

/// Topic message of the envelope if it was published to exactly `topic`.
pub fn filter_by_topic<'a>(envelope: &'a MessageEnvelope, topic: &str) -> Option<&'a TopicMessage> {
    envelope
        .topic_message()
        .filter(|message| message.topic == topic)
}

/// Origin and transport check applied in that order, followed by decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeFilter {
    origin: String,
    transport: MessagingTransport,
}

impl EnvelopeFilter {
    /// Accept envelopes posted from `origin` on `transport`.
    pub fn new(origin: impl Into<String>, transport: MessagingTransport) -> Self {
        Self {
            origin: origin.into(),
            transport,
        }
    }

    /// Expected sender origin.
    pub fn origin(&self) -> &str {
        &self.origin
    }

    /// Expected transport tag.
    pub fn transport(&self) -> MessagingTransport {
        self.transport
    }

    /// Run the checks; `None` means the event must be ignored.
    pub fn accept(&self, event: MessageEvent) -> Option<MessageEnvelope> {
        if !filter_by_origin(&event, &self.origin) {
            return None;
        }
        if !filter_by_transport(&event, self.transport) {
            return None;
        }
        pluck_envelope(event)
    }
}
