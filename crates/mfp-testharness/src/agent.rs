//! ---
//! mfp_section: "11-simulation"
//! mfp_subsection: "04-gateway-agent"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Content of the gateway frame: broker handshake and relay."
//! mfp_version: "v0.1.0"
//! mfp_owner: "tbd"
//! ---
//! What runs inside the gateway frame.
//!
//! The agent reads its bootstrap parameters, broadcasts a connect request to
//! every window that may host the broker, and waits for the broker's connack.
//! Afterwards it answers the client's gateway info requests and relays the
//! client's broker-bound envelopes. Unmounting the frame sends a disconnect.
use std::sync::Arc;

use mfp_logging::{log_system_event, mfp_debug, mfp_warn, LogContext, SystemEventOutcome};
use mfp_messaging::{
    BootstrapParams, ConnackMessage, ConnectMessage, GatewayInfoResponse, MessageEnvelope,
    MessagingTransport, PlatformTopics, TopicMessage,
};
use mfp_transport::{
    filter_by_origin, filter_by_topic, filter_by_transport, pluck_envelope, MessageEvent, Window,
    WindowRef, ANY_ORIGIN,
};
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use uuid::Uuid;

use crate::host::{FrameContext, FrameRuntime};

/// Decides which windows a connect request is broadcast to.
pub trait BrokerLocator: Send + Sync {
    /// Candidate broker windows for a client living in `client_window`.
    fn candidates(&self, client_window: &WindowRef) -> Vec<WindowRef>;
}

/// The client window itself followed by all of its ancestors.
#[derive(Debug, Default, Clone, Copy)]
pub struct AncestorLocator;

impl BrokerLocator for AncestorLocator {
    fn candidates(&self, client_window: &WindowRef) -> Vec<WindowRef> {
        let mut candidates = vec![client_window.clone()];
        let mut current = client_window.parent();
        while let Some(window) = current {
            current = window.parent();
            candidates.push(window);
        }
        candidates
    }
}

/// Gateway frame content connecting to a real (simulated) broker.
#[derive(Clone)]
pub struct GatewayAgent {
    locator: Arc<dyn BrokerLocator>,
}

impl GatewayAgent {
    /// Agent searching the client window and its ancestors.
    pub fn new() -> Self {
        Self::with_locator(Arc::new(AncestorLocator))
    }

    /// Agent using a custom locator.
    pub fn with_locator(locator: Arc<dyn BrokerLocator>) -> Self {
        Self { locator }
    }
}

impl Default for GatewayAgent {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameRuntime for GatewayAgent {
    fn start(&self, frame: FrameContext) -> JoinHandle<()> {
        tokio::spawn(run_agent(self.locator.clone(), frame))
    }
}

struct Session {
    broker_window: WindowRef,
    broker_origin: String,
    client_id: String,
}

/// Sends the disconnect when the agent stops, including when its task is aborted.
struct DisconnectGuard {
    window: WindowRef,
    client_origin: String,
    broker_window: WindowRef,
    broker_origin: String,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        let disconnect = MessageEnvelope::topic(
            MessagingTransport::GatewayToBroker,
            TopicMessage::new(PlatformTopics::CLIENT_DISCONNECT),
        );
        let Ok(data) = disconnect.to_value() else {
            return;
        };
        let event = MessageEvent::new(self.client_origin.clone(), data).with_source(self.window.clone());
        // the broker may already be gone
        let _ = self.broker_window.post_message(event, &self.broker_origin);
    }
}

struct Agent {
    params: BootstrapParams,
    window: WindowRef,
    client_window: WindowRef,
}

async fn run_agent(locator: Arc<dyn BrokerLocator>, frame: FrameContext) {
    let params = match BootstrapParams::parse(&frame.document) {
        Ok(params) => params,
        Err(err) => {
            mfp_warn!("gateway frame document not understood: {}", err);
            return;
        }
    };
    let agent = Agent {
        params,
        window: frame.window.clone(),
        client_window: frame.client_window.clone(),
    };
    let mut inbox = frame.window.subscribe();
    let _ = frame.loaded.send(agent.window.clone());

    let mut early_requests = Vec::new();
    let session = agent
        .connect(locator.as_ref(), &mut inbox, &mut early_requests)
        .await;
    let status = match &session {
        Ok(session) => GatewayInfoResponse::ok(session.broker_origin.clone()),
        Err(error) => GatewayInfoResponse::error(error.clone()),
    };
    for reply_to in early_requests {
        agent.answer_info_request(&reply_to, &status);
    }

    let ctx = LogContext::new().with_app(&agent.params.client_app_name);
    let _disconnect = match &session {
        Ok(session) => {
            log_system_event(
                Some(&ctx
                    .clone()
                    .with_client_id(&session.client_id)
                    .with_broker_origin(&session.broker_origin)),
                "gateway.connect",
                "connected to the message broker",
                SystemEventOutcome::Success,
            );
            Some(DisconnectGuard {
                window: agent.window.clone(),
                client_origin: agent.params.client_origin.clone(),
                broker_window: session.broker_window.clone(),
                broker_origin: session.broker_origin.clone(),
            })
        }
        Err(error) => {
            log_system_event(Some(&ctx), "gateway.connect", error, SystemEventOutcome::Fault);
            None
        }
    };

    loop {
        let event = match inbox.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                mfp_warn!(context = ctx, "gateway inbox lagged by {} events", skipped);
                continue;
            }
            Err(RecvError::Closed) => break,
        };
        if !filter_by_origin(&event, &agent.params.client_origin) {
            continue;
        }
        if let Some(reply_to) = info_request(&event) {
            agent.answer_info_request(&reply_to, &status);
            continue;
        }
        if !filter_by_transport(&event, MessagingTransport::ClientToBroker) {
            continue;
        }
        let Some(envelope) = pluck_envelope(event) else {
            continue;
        };
        match &session {
            Ok(session) => agent.relay(session, envelope),
            Err(_) => mfp_debug!(
                context = ctx,
                "dropping envelope {}: not connected",
                envelope.message_id
            ),
        }
    }
}

/// Reply topic of a gateway info request, if the event is one.
fn info_request(event: &MessageEvent) -> Option<String> {
    if !filter_by_transport(event, MessagingTransport::ClientToGateway) {
        return None;
    }
    let envelope = pluck_envelope(event.clone())?;
    filter_by_topic(&envelope, PlatformTopics::REQUEST_GATEWAY_INFO)?
        .reply_to
        .clone()
}

impl Agent {
    async fn connect(
        &self,
        locator: &dyn BrokerLocator,
        inbox: &mut broadcast::Receiver<MessageEvent>,
        early_requests: &mut Vec<String>,
    ) -> Result<Session, String> {
        let reply_to = Uuid::new_v4().to_string();
        let connect = ConnectMessage {
            symbolic_app_name: self.params.client_app_name.clone(),
        };
        let payload = serde_json::to_value(connect).map_err(|err| err.to_string())?;
        let request = MessageEnvelope::topic(
            MessagingTransport::GatewayToBroker,
            TopicMessage::new(PlatformTopics::CLIENT_CONNECT)
                .with_payload(payload)
                .with_reply_to(&reply_to),
        );
        let data = request.to_value().map_err(|err| err.to_string())?;
        for candidate in locator.candidates(&self.client_window) {
            let event = MessageEvent::new(self.params.client_origin.clone(), data.clone())
                .with_source(self.window.clone());
            let _ = candidate.post_message(event, ANY_ORIGIN);
        }

        let timeout = self.params.discovery_timeout();
        let deadline = sleep(timeout);
        tokio::pin!(deadline);
        loop {
            let event = tokio::select! {
                _ = &mut deadline => {
                    return Err(format!(
                        "[BrokerDiscoverTimeoutError] Message broker not discovered within the {}ms timeout. Messages cannot be published or received.",
                        timeout.as_millis()
                    ));
                }
                received = inbox.recv() => match received {
                    Ok(event) => event,
                    Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => return Err("gateway window closed".to_owned()),
                },
            };
            if filter_by_origin(&event, &self.params.client_origin) {
                if let Some(reply_to) = info_request(&event) {
                    early_requests.push(reply_to);
                    continue;
                }
            }
            if !filter_by_transport(&event, MessagingTransport::BrokerToGateway) {
                continue;
            }
            let Some(broker_window) = event.source.clone() else {
                continue;
            };
            let broker_origin = event.origin.clone();
            let Some(envelope) = pluck_envelope(event) else {
                continue;
            };
            let Some(reply) = filter_by_topic(&envelope, &reply_to) else {
                continue;
            };
            let connack = match reply.payload_as::<ConnackMessage>() {
                Ok(Some(connack)) => connack,
                Ok(None) => return Err("broker sent an empty connack".to_owned()),
                Err(err) => return Err(format!("broker sent a malformed connack: {}", err)),
            };
            if !connack.is_accepted() {
                return Err(format!(
                    "Client connect attempt refused by the message broker ({:?}): {}",
                    connack.return_code,
                    connack.return_message.unwrap_or_default()
                ));
            }
            return Ok(Session {
                broker_window,
                broker_origin,
                client_id: connack.client_id.unwrap_or_default(),
            });
        }
    }

    fn answer_info_request(&self, reply_to: &str, status: &GatewayInfoResponse) {
        let Ok(payload) = serde_json::to_value(status.clone()) else {
            return;
        };
        let reply = MessageEnvelope::topic(
            MessagingTransport::GatewayToClient,
            TopicMessage::new(reply_to).with_payload(payload),
        );
        let Ok(data) = reply.to_value() else {
            return;
        };
        let event = MessageEvent::new(self.window.origin(), data).with_source(self.window.clone());
        let _ = self
            .client_window
            .post_message(event, &self.params.client_origin);
    }

    fn relay(&self, session: &Session, envelope: MessageEnvelope) {
        let message_id = envelope.message_id.clone();
        let data = match envelope.relay(MessagingTransport::GatewayToBroker).to_value() {
            Ok(data) => data,
            Err(err) => {
                mfp_warn!("envelope {} not relayed: {}", message_id, err);
                return;
            }
        };
        let event = MessageEvent::new(self.params.client_origin.clone(), data)
            .with_source(self.window.clone());
        if let Err(err) = session
            .broker_window
            .post_message(event, &session.broker_origin)
        {
            mfp_warn!("envelope {} not relayed: {}", message_id, err);
        }
    }
}
