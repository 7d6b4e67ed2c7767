//! ---
//! mfp_section: "05-client-api"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Broker-facing client API on top of the gateway."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Messaging API used by microfrontends.
//!
//! A [`MessageClient`] owns one broker gateway and turns topic and intent
//! operations into envelopes posted through it. Everything the broker sends
//! back is read from the gateway's message stream, so it already passed the
//! broker origin check.
#![warn(missing_docs)]

use std::time::Duration;

use mfp_gateway::GatewayError;
use mfp_messaging::EnvelopeError;

pub mod client;
pub mod subscription;

/// Shared result type for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors surfaced by the messaging client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The gateway failed to discover the broker or to post.
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The topic or payload was rejected before posting.
    #[error("invalid message: {0}")]
    Envelope(#[from] EnvelopeError),
    /// No reply arrived within the requested time.
    #[error("no reply received on '{topic}' within {}ms", .timeout.as_millis())]
    Timeout {
        /// Topic the request was published to.
        topic: String,
        /// Requested timeout.
        timeout: Duration,
    },
    /// A reply arrived but its payload could not be read.
    #[error("unexpected reply on '{topic}': {reason}")]
    UnexpectedReply {
        /// Topic the request was published to.
        topic: String,
        /// What was wrong with the reply.
        reason: String,
    },
}

pub use client::{MessageClient, PublishOptions, RequestOptions};
pub use subscription::{IntentStream, ReceivedIntent, TopicSubscription};
