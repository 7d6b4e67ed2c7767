//! ---
//! mfp_section: "04-broker-gateway"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Broker gateway and discovery protocol."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Client side of the broker gateway.
//!
//! A [`BrokerGateway`] mounts a hidden frame into the client's document, asks
//! the frame which broker it connected to, and from then on posts the client's
//! envelopes to the frame and republishes envelopes the broker sends back.
//! Every envelope reaching subscribers passed the broker origin check and the
//! transport check first.
#![warn(missing_docs)]

use std::time::Duration;

use mfp_messaging::EnvelopeError;
use mfp_transport::TransportError;

pub mod config;
pub mod discovery;
pub mod gateway;
pub mod metrics;

/// Shared result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Errors surfaced by the broker gateway.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    /// No gateway info reply arrived in time.
    #[error(
        "[BrokerDiscoverTimeoutError] Message broker not discovered within the {}ms timeout. Messages cannot be published or received.",
        .timeout.as_millis()
    )]
    DiscoveryTimeout {
        /// Configured discovery timeout.
        timeout: Duration,
    },
    /// The gateway answered with `ok: false`.
    #[error("{0}")]
    DiscoveryRefused(String),
    /// The gateway answered with a reply that could not be read.
    #[error("malformed gateway info reply: {0}")]
    MalformedReply(String),
    /// The gateway frame could not be mounted.
    #[error("failed to mount gateway frame: {0}")]
    Mount(TransportError),
    /// Posting to the gateway window failed.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    /// The envelope could not be encoded.
    #[error("invalid envelope: {0}")]
    Envelope(String),
    /// The broker is unreachable and the gateway is configured to reject.
    #[error("not connected to the message broker: {0}")]
    NotConnected(String),
}

impl From<EnvelopeError> for GatewayError {
    fn from(err: EnvelopeError) -> Self {
        GatewayError::Envelope(err.to_string())
    }
}

pub use config::GatewayConfig;
pub use discovery::{DiscoveryState, GatewayInfo};
pub use gateway::{BrokerGateway, MessageStream};
pub use metrics::{GatewayMetrics, GatewayMetricsExporter};
