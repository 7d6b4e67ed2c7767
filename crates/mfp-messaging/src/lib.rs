//! ---
//! mfp_section: "02-messaging-envelope-model"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Envelope, channel, and handshake definitions."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Protocol model for cross-context messaging.
//!
//! Every message crossing a context boundary is wrapped into a
//! [`MessageEnvelope`]. The envelope's transport tag names the leg the message
//! travels on (client to gateway, gateway to broker, ...) and the channel tells
//! the receiver how to read the payload.
#![warn(missing_docs)]

pub mod bootstrap;
pub mod envelope;
pub mod handshake;
pub mod messages;
pub mod topics;

use std::fmt;

/// Shared result type for envelope operations.
pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Errors raised while building or decoding envelopes.
#[derive(Debug, thiserror::Error)]
pub enum EnvelopeError {
    /// The transport leg never carries the given channel.
    #[error("transport {transport} does not carry channel {channel}")]
    ChannelNotAdmitted {
        /// Declared transport of the envelope.
        transport: MessagingTransport,
        /// Declared channel of the envelope.
        channel: MessagingChannel,
    },
    /// Subscribe and unsubscribe commands always need a message.
    #[error("channel {0} requires a message")]
    MissingMessage(MessagingChannel),
    /// Topic is empty, has empty segments, or misuses wildcards.
    #[error("invalid topic '{topic}': {reason}")]
    InvalidTopic {
        /// The offending topic.
        topic: String,
        /// Why the topic was rejected.
        reason: &'static str,
    },
    /// Gateway info reply did not carry the fields its `ok` flag requires.
    #[error("malformed gateway info reply: {0}")]
    MalformedReply(&'static str),
    /// Gateway frame document lacks a well-formed bootstrap block.
    #[error("malformed bootstrap document: {0}")]
    MalformedBootstrap(&'static str),
    /// Wrapper for JSON serialization or deserialization problems.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub use bootstrap::BootstrapParams;
pub use envelope::{Message, MessageEnvelope, MessagingChannel, MessagingTransport};
pub use handshake::{
    ConnackMessage, ConnectMessage, GatewayInfoResponse, MessageDeliveryStatus, ReturnCode,
};
pub use messages::{IntentMessage, TopicMessage, TopicSubscribeCommand, TopicUnsubscribeCommand};
pub use topics::{validate_topic, PlatformTopics, TopicMatcher};

impl fmt::Display for MessagingTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for MessagingChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
