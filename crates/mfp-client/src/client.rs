//! ---
//! mfp_section: "05-client-api"
//! mfp_subsection: "client"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Publish, observe, request, and intent operations."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::collections::BTreeMap;
use std::future::pending;
use std::sync::Arc;
use std::time::Duration;

use mfp_common::ClientConfig;
use mfp_gateway::{BrokerGateway, GatewayConfig, GatewayInfo, GatewayMetricsExporter};
use mfp_logging::{mfp_debug, mfp_info, mfp_warn, LogContext};
use mfp_messaging::{
    validate_topic, IntentMessage, Message, MessageEnvelope, MessagingTransport, PlatformTopics,
    TopicMatcher, TopicMessage, TopicSubscribeCommand,
};
use mfp_transport::FrameHost;
use serde_json::{json, Value as JsonValue};
use uuid::Uuid;

use crate::subscription::{IntentStream, TopicSubscription};
use crate::{ClientError, Result};

/// Options for [`MessageClient::publish`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishOptions {
    /// Headers to send along with the payload.
    pub headers: BTreeMap<String, JsonValue>,
    /// Ask the broker to retain the message for later subscribers.
    pub retain: bool,
}

impl PublishOptions {
    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Retain the message. Publishing a retained message without payload
    /// clears what the broker retained for the topic.
    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }
}

/// Options for [`MessageClient::request`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestOptions {
    /// Headers to send along with the request.
    pub headers: BTreeMap<String, JsonValue>,
    /// Give up if no reply arrives in time. Without a timeout the request
    /// waits indefinitely.
    pub timeout: Option<Duration>,
}

impl RequestOptions {
    /// Add a header.
    pub fn with_header(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Bound the wait for the reply.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// Messaging client of one microfrontend.
///
/// Every operation waits until the broker has been discovered. What happens
/// when it never is depends on the gateway's unreachable broker policy.
/// Dropping the client destroys its gateway.
pub struct MessageClient {
    gateway: Arc<BrokerGateway>,
}

impl MessageClient {
    /// Connect `app` to the broker through a gateway mounted in `host`.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect(app: impl Into<String>, config: GatewayConfig, host: Arc<dyn FrameHost>) -> Self {
        Self::from_gateway(BrokerGateway::new(app, config, host))
    }

    /// Like [`MessageClient::connect`], additionally reporting gateway metrics.
    pub fn with_metrics(
        app: impl Into<String>,
        config: GatewayConfig,
        host: Arc<dyn FrameHost>,
        exporter: Arc<GatewayMetricsExporter>,
    ) -> Self {
        Self::from_gateway(BrokerGateway::with_metrics(app, config, host, exporter))
    }

    /// Connect using the `[client]` section of the platform configuration.
    pub fn from_config(config: &ClientConfig, host: Arc<dyn FrameHost>) -> Self {
        if host.origin() != config.origin {
            mfp_warn!(
                context = LogContext::new().with_app(&config.symbolic_name),
                "configured origin {} differs from the document origin {}",
                config.origin,
                host.origin()
            );
        }
        Self::connect(config.symbolic_name.clone(), GatewayConfig::from(config), host)
    }

    fn from_gateway(gateway: BrokerGateway) -> Self {
        mfp_info!(
            context = LogContext::new().with_app(gateway.client_app_name()),
            "messaging client started (discovery timeout {}ms)",
            gateway.config().discovery_timeout.as_millis()
        );
        Self {
            gateway: Arc::new(gateway),
        }
    }

    /// The gateway carrying this client's traffic.
    pub fn gateway(&self) -> &BrokerGateway {
        &self.gateway
    }

    /// Wait until the broker is discovered.
    pub async fn when_connected(&self) -> Result<GatewayInfo> {
        Ok(self.gateway.gateway_info().await?)
    }

    /// Publish `payload` to `topic`.
    ///
    /// The topic must not contain wildcard segments.
    pub async fn publish(
        &self,
        topic: &str,
        payload: Option<JsonValue>,
        options: PublishOptions,
    ) -> Result<()> {
        validate_topic(topic, false)?;
        let message = TopicMessage {
            topic: topic.to_owned(),
            payload,
            headers: options.headers,
            retain: options.retain,
            ..TopicMessage::default()
        };
        self.post(Message::Topic(message)).await
    }

    /// Subscribe to messages published to `topic`.
    ///
    /// `topic` may contain named wildcard segments such as `:city`. Retained
    /// messages matching the topic are delivered first.
    pub async fn observe(&self, topic: &str) -> Result<TopicSubscription> {
        let matcher = TopicMatcher::new(topic)?;
        let subscriber_id = Uuid::new_v4().to_string();
        // listen before subscribing so a replayed retained message is not missed
        let stream = self.gateway.messages();
        self.post(Message::TopicSubscribe(TopicSubscribeCommand::new(
            topic,
            subscriber_id.as_str(),
        )))
        .await?;
        mfp_debug!(
            context = self.log_context(),
            "subscribed to {} as {}",
            topic,
            subscriber_id
        );
        Ok(TopicSubscription::new(
            self.gateway.clone(),
            stream,
            matcher,
            subscriber_id,
        ))
    }

    /// Publish a request and wait for the first reply.
    ///
    /// Replies are correlated through a reply topic unique to this request.
    /// If the gateway is destroyed before a reply arrives, the request only
    /// ends through its timeout.
    pub async fn request(
        &self,
        topic: &str,
        payload: Option<JsonValue>,
        options: RequestOptions,
    ) -> Result<TopicMessage> {
        validate_topic(topic, false)?;
        let reply_to = Uuid::new_v4().to_string();
        let mut replies = self.observe(&reply_to).await?;
        let message = TopicMessage {
            topic: topic.to_owned(),
            payload,
            headers: options.headers,
            reply_to: Some(reply_to),
            ..TopicMessage::default()
        };
        self.post(Message::Topic(message)).await?;

        let reply = async {
            match replies.recv().await {
                Some(reply) => reply,
                None => pending().await,
            }
        };
        match options.timeout {
            Some(timeout) => tokio::time::timeout(timeout, reply)
                .await
                .map_err(|_| ClientError::Timeout {
                    topic: topic.to_owned(),
                    timeout,
                }),
            None => Ok(reply.await),
        }
    }

    /// Issue an intent; `payload`, if given, replaces the intent's payload.
    pub async fn issue_intent(&self, intent: IntentMessage, payload: Option<JsonValue>) -> Result<()> {
        let intent = match payload {
            Some(payload) => intent.with_payload(payload),
            None => intent,
        };
        self.post(Message::Intent(intent)).await
    }

    /// Intents the broker dispatches to this client from now on.
    pub fn handle_intents(&self) -> IntentStream {
        IntentStream::new(self.gateway.messages())
    }

    /// Ask the broker how many subscriptions currently match `topic`.
    pub async fn subscriber_count(&self, topic: &str) -> Result<u64> {
        validate_topic(topic, false)?;
        let reply = self
            .request(
                PlatformTopics::REQUEST_SUBSCRIBER_COUNT,
                Some(json!(topic)),
                RequestOptions::default(),
            )
            .await?;
        match reply.payload_as::<u64>()? {
            Some(count) => Ok(count),
            None => Err(ClientError::UnexpectedReply {
                topic: PlatformTopics::REQUEST_SUBSCRIBER_COUNT.to_owned(),
                reason: "subscriber count missing".to_owned(),
            }),
        }
    }

    /// Destroy the gateway. Idempotent.
    ///
    /// The broker is told about the disconnect by the gateway frame as it is
    /// unmounted. Subscriptions and intent streams end.
    pub fn destroy(&self) {
        self.gateway.destroy();
    }

    async fn post(&self, message: Message) -> Result<()> {
        let envelope = MessageEnvelope::new(MessagingTransport::ClientToBroker, message);
        self.gateway.post_message(envelope).await?;
        Ok(())
    }

    fn log_context(&self) -> LogContext<'_> {
        LogContext::new().with_app(self.gateway.client_app_name())
    }
}

impl Drop for MessageClient {
    fn drop(&mut self) {
        self.gateway.destroy();
    }
}
