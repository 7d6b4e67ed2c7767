//! ---
//! mfp_section: "04-broker-gateway"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Broker gateway and discovery protocol."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Gateway info request/reply.
//!
//! Once the gateway frame loaded, the client posts a gateway info request to
//! the frame window and listens on its own window for the reply. Only events
//! posted from the frame's origin on the gateway-to-client leg are considered;
//! the reply is the first topic message published to the request's reply
//! topic. The listener is removed as soon as the exchange ends.
use std::fmt;
use std::time::Duration;

use mfp_messaging::{GatewayInfoResponse, MessageEnvelope, MessagingTransport, PlatformTopics, TopicMessage};
use mfp_transport::{filter_by_topic, EnvelopeFilter, MessageEvent, WindowRef};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::GatewayError;

/// Result of a successful discovery.
#[derive(Clone)]
pub struct GatewayInfo {
    /// Content window of the gateway frame.
    pub window: WindowRef,
    /// Origin of the broker the gateway connected to.
    pub broker_origin: String,
}

impl fmt::Debug for GatewayInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayInfo")
            .field("window", &self.window.id())
            .field("broker_origin", &self.broker_origin)
            .finish()
    }
}

/// Lifecycle of a gateway.
///
/// `Connected` and `Failed` are final until the gateway is destroyed;
/// `Destroyed` is final.
#[derive(Debug, Clone)]
pub enum DiscoveryState {
    /// Nothing started yet.
    Unstarted,
    /// Waiting for the gateway frame to load.
    Mounting,
    /// Frame loaded, gateway info requested.
    Discovering,
    /// Gateway info received.
    Connected(GatewayInfo),
    /// Discovery failed; the error is reported to every waiter.
    Failed(GatewayError),
    /// The gateway was destroyed.
    Destroyed,
}

impl DiscoveryState {
    /// Short name for logs and assertions.
    pub fn name(&self) -> &'static str {
        match self {
            DiscoveryState::Unstarted => "unstarted",
            DiscoveryState::Mounting => "mounting",
            DiscoveryState::Discovering => "discovering",
            DiscoveryState::Connected(_) => "connected",
            DiscoveryState::Failed(_) => "failed",
            DiscoveryState::Destroyed => "destroyed",
        }
    }

    /// Whether discovery finished, one way or the other.
    pub fn is_settled(&self) -> bool {
        matches!(
            self,
            DiscoveryState::Connected(_) | DiscoveryState::Failed(_) | DiscoveryState::Destroyed
        )
    }
}

/// Resolve once the shutdown flag is raised or its sender is gone.
pub(crate) async fn wait_for_shutdown(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}

/// Ask the gateway frame for the broker it connected to.
///
/// Returns `None` if the gateway was shut down before the exchange finished.
/// The timer starts when the request is posted.
pub(crate) async fn request_gateway_info(
    client_window: &WindowRef,
    client_origin: &str,
    gateway_window: WindowRef,
    timeout: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> Option<Result<(GatewayInfo, Duration), GatewayError>> {
    let reply_to = Uuid::new_v4().to_string();
    let request = MessageEnvelope::topic(
        MessagingTransport::ClientToGateway,
        TopicMessage::new(PlatformTopics::REQUEST_GATEWAY_INFO).with_reply_to(&reply_to),
    );
    let data = match request.to_value() {
        Ok(data) => data,
        Err(err) => return Some(Err(err.into())),
    };

    let filter = EnvelopeFilter::new(gateway_window.origin(), MessagingTransport::GatewayToClient);
    // listen before asking so a prompt reply cannot slip through
    let mut replies = client_window.subscribe();
    let started = Instant::now();
    let event = MessageEvent::new(client_origin, data).with_source(client_window.clone());
    if let Err(err) = gateway_window.post_message(event, gateway_window.origin()) {
        return Some(Err(GatewayError::Transport(err)));
    }
    tracing::debug!(reply_to = %reply_to, gateway_window = gateway_window.id(), "gateway info requested");

    let deadline = sleep(timeout);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            biased;
            _ = wait_for_shutdown(shutdown) => return None,
            _ = &mut deadline => return Some(Err(GatewayError::DiscoveryTimeout { timeout })),
            received = replies.recv() => {
                let event = match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "gateway info listener lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let Some(envelope) = filter.accept(event) else {
                    continue;
                };
                let Some(reply) = filter_by_topic(&envelope, &reply_to) else {
                    continue;
                };
                let response = match reply.payload_as::<GatewayInfoResponse>() {
                    Ok(Some(response)) => response,
                    Ok(None) => {
                        return Some(Err(GatewayError::MalformedReply("reply without payload".to_owned())))
                    }
                    Err(err) => return Some(Err(GatewayError::MalformedReply(err.to_string()))),
                };
                return Some(match response {
                    GatewayInfoResponse::Ok { broker_origin } => Ok((
                        GatewayInfo {
                            window: gateway_window,
                            broker_origin,
                        },
                        started.elapsed(),
                    )),
                    GatewayInfoResponse::Err { error } => Err(GatewayError::DiscoveryRefused(error)),
                });
            }
        }
    }

    // nothing can reach the client window any more; only the timer or a shutdown ends the wait
    tokio::select! {
        biased;
        _ = wait_for_shutdown(shutdown) => None,
        _ = &mut deadline => Some(Err(GatewayError::DiscoveryTimeout { timeout })),
    }
}
