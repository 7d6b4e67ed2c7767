//! ---
//! mfp_section: "05-client-api"
//! mfp_subsection: "subscriptions"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Topic subscriptions and intent streams."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::sync::Arc;

use mfp_gateway::{BrokerGateway, DiscoveryState, MessageStream};
use mfp_logging::{mfp_debug, LogContext};
use mfp_messaging::{
    IntentMessage, Message, MessageEnvelope, MessagingTransport, TopicMatcher, TopicMessage,
    TopicUnsubscribeCommand,
};
use tokio::runtime::Handle;

use crate::Result;

/// Messages the broker delivers for one `observe` call.
///
/// Dropping the subscription cancels it at the broker.
pub struct TopicSubscription {
    gateway: Arc<BrokerGateway>,
    stream: MessageStream,
    matcher: TopicMatcher,
    subscriber_id: String,
    active: bool,
}

impl TopicSubscription {
    pub(crate) fn new(
        gateway: Arc<BrokerGateway>,
        stream: MessageStream,
        matcher: TopicMatcher,
        subscriber_id: String,
    ) -> Self {
        Self {
            gateway,
            stream,
            matcher,
            subscriber_id,
            active: true,
        }
    }

    /// Topic or pattern this subscription was created for.
    pub fn topic(&self) -> &str {
        self.matcher.pattern()
    }

    /// Id the broker tags deliveries for this subscription with.
    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Next message, or `None` once the gateway is destroyed.
    ///
    /// Wildcard segment values of the pattern are available in
    /// [`TopicMessage::params`].
    pub async fn recv(&mut self) -> Option<TopicMessage> {
        loop {
            let envelope = self.stream.recv().await?;
            let Some(Message::Topic(message)) = envelope.message else {
                continue;
            };
            if self.accepts(&message) {
                return Some(message);
            }
        }
    }

    fn accepts(&self, message: &TopicMessage) -> bool {
        let tagged = message
            .headers
            .get(TopicMessage::SUBSCRIBER_ID_HEADER)
            .and_then(|value| value.as_str());
        tagged == Some(self.subscriber_id.as_str()) && self.matcher.is_match(&message.topic)
    }

    /// Cancel the subscription at the broker.
    pub async fn unsubscribe(mut self) -> Result<()> {
        self.active = false;
        let envelope = unsubscribe_envelope(self.matcher.pattern(), &self.subscriber_id);
        self.gateway.post_message(envelope).await?;
        Ok(())
    }
}

fn unsubscribe_envelope(topic: &str, subscriber_id: &str) -> MessageEnvelope {
    MessageEnvelope::new(
        MessagingTransport::ClientToBroker,
        Message::TopicUnsubscribe(TopicUnsubscribeCommand::new(topic, subscriber_id)),
    )
}

impl Drop for TopicSubscription {
    fn drop(&mut self) {
        if !self.active || !matches!(self.gateway.state(), DiscoveryState::Connected(_)) {
            return;
        }
        // without a runtime nobody could post anyway
        let Ok(handle) = Handle::try_current() else {
            return;
        };
        let gateway = self.gateway.clone();
        let envelope = unsubscribe_envelope(self.matcher.pattern(), &self.subscriber_id);
        let subscriber_id = self.subscriber_id.clone();
        handle.spawn(async move {
            if let Err(err) = gateway.post_message(envelope).await {
                mfp_debug!(
                    context = LogContext::new().with_app(gateway.client_app_name()),
                    "unsubscribe of {} not posted: {}",
                    subscriber_id,
                    err
                );
            }
        });
    }
}

/// An intent the broker dispatched to this client.
#[derive(Debug, Clone, PartialEq)]
pub struct ReceivedIntent {
    /// Client id of the issuer, as stamped by the broker.
    pub sender_id: Option<String>,
    /// The intent itself.
    pub intent: IntentMessage,
}

/// Intents dispatched to this client.
pub struct IntentStream {
    stream: MessageStream,
}

impl IntentStream {
    pub(crate) fn new(stream: MessageStream) -> Self {
        Self { stream }
    }

    /// Next intent, or `None` once the gateway is destroyed.
    pub async fn recv(&mut self) -> Option<ReceivedIntent> {
        loop {
            let envelope = self.stream.recv().await?;
            let sender_id = envelope.sender_id.clone();
            if let Some(Message::Intent(intent)) = envelope.message {
                return Some(ReceivedIntent { sender_id, intent });
            }
        }
    }
}
