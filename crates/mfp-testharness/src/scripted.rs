//! ---
//! mfp_section: "11-simulation"
//! mfp_subsection: "03-scripted-gateway"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Gateway frame content with scripted timing and replies."
//! mfp_version: "v0.1.0"
//! mfp_owner: "tbd"
//! ---
//! Gateway frame content that follows a script instead of talking to a broker.
//!
//! Used to pin down the client side of discovery: when the frame loads, what
//! (and from which origin) it answers to gateway info requests, and how long
//! it takes to do so.
use std::sync::Arc;
use std::time::Duration;

use mfp_messaging::{
    GatewayInfoResponse, MessageEnvelope, MessagingTransport, PlatformTopics, TopicMessage,
};
use mfp_transport::{filter_by_topic, EnvelopeFilter, MessageEvent, Window, WindowRef};
use parking_lot::Mutex;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::host::{FrameContext, FrameRuntime};

/// Scripted gateway frame content.
#[derive(Clone)]
pub struct ScriptedGateway {
    load_after: Option<Duration>,
    reply: Option<GatewayInfoResponse>,
    reply_after: Duration,
    reply_origin: Option<String>,
    requests: Arc<Mutex<Vec<MessageEnvelope>>>,
}

impl ScriptedGateway {
    /// Loads immediately and reports `broker_origin` right away.
    pub fn connected_to(broker_origin: impl Into<String>) -> Self {
        Self {
            load_after: Some(Duration::ZERO),
            reply: Some(GatewayInfoResponse::ok(broker_origin)),
            reply_after: Duration::ZERO,
            reply_origin: None,
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Loads immediately and reports a failed broker connection.
    pub fn failing_with(error: impl Into<String>) -> Self {
        Self {
            reply: Some(GatewayInfoResponse::error(error)),
            ..Self::connected_to("")
        }
    }

    /// Loads immediately but never answers.
    pub fn silent() -> Self {
        Self {
            reply: None,
            ..Self::connected_to("")
        }
    }

    /// Signal load only after `delay`.
    pub fn loading_after(mut self, delay: Duration) -> Self {
        self.load_after = Some(delay);
        self
    }

    /// Never signal load.
    pub fn never_loading(mut self) -> Self {
        self.load_after = None;
        self
    }

    /// Answer each request `delay` after receiving it.
    pub fn replying_after(mut self, delay: Duration) -> Self {
        self.reply_after = delay;
        self
    }

    /// Post replies as if they came from `origin`.
    pub fn replying_from(mut self, origin: impl Into<String>) -> Self {
        self.reply_origin = Some(origin.into());
        self
    }

    /// Gateway info requests received so far.
    pub fn requests(&self) -> Vec<MessageEnvelope> {
        self.requests.lock().clone()
    }
}

impl FrameRuntime for ScriptedGateway {
    fn start(&self, frame: FrameContext) -> JoinHandle<()> {
        tokio::spawn(run_script(self.clone(), frame))
    }
}

async fn run_script(script: ScriptedGateway, frame: FrameContext) {
    let FrameContext {
        window,
        client_window,
        loaded,
        ..
    } = frame;
    let mut inbox = window.subscribe();

    // holding on to the sender keeps the frame loading forever
    let _never_loaded = match script.load_after {
        Some(delay) => {
            sleep(delay).await;
            let _ = loaded.send(window.clone());
            None
        }
        None => Some(loaded),
    };

    let filter = EnvelopeFilter::new(client_window.origin(), MessagingTransport::ClientToGateway);
    let reply_origin = script
        .reply_origin
        .clone()
        .unwrap_or_else(|| window.origin().to_owned());
    let source: WindowRef = window.clone();
    loop {
        let event = match inbox.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => break,
        };
        let Some(request) = filter.accept(event) else {
            continue;
        };
        let Some(reply_to) = filter_by_topic(&request, PlatformTopics::REQUEST_GATEWAY_INFO)
            .and_then(|message| message.reply_to.clone())
        else {
            continue;
        };
        script.requests.lock().push(request);

        let Some(response) = script.reply.clone() else {
            continue;
        };
        sleep(script.reply_after).await;
        let payload = match serde_json::to_value(response) {
            Ok(payload) => payload,
            Err(err) => {
                tracing::warn!(error = %err, "gateway info reply not encodable");
                continue;
            }
        };
        let reply = MessageEnvelope::topic(
            MessagingTransport::GatewayToClient,
            TopicMessage::new(reply_to).with_payload(payload),
        );
        let data = match reply.to_value() {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(error = %err, "gateway info reply not encodable");
                continue;
            }
        };
        let event = MessageEvent::new(reply_origin.clone(), data).with_source(source.clone());
        if let Err(err) = client_window.post_message(event, client_window.origin()) {
            tracing::debug!(error = %err, "client window gone");
            break;
        }
    }
}
