//! ---
//! mfp_section: "02-messaging-envelope-model"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Envelope, channel, and handshake definitions."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::messages::{
    IntentMessage, TopicMessage, TopicSubscribeCommand, TopicUnsubscribeCommand,
};
use crate::{EnvelopeError, Result};

/// Logical leg a message travels on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessagingTransport {
    /// Clients talking to the broker (relayed by their gateway).
    #[serde(
        rename = "sci://microfrontend-platform/client-to-broker",
        alias = "client→broker"
    )]
    ClientToBroker,
    /// Broker talking to its clients.
    #[serde(
        rename = "sci://microfrontend-platform/broker-to-client",
        alias = "broker→client"
    )]
    BrokerToClient,
    /// Client talking to its own gateway.
    #[serde(
        rename = "sci://microfrontend-platform/client-to-gateway",
        alias = "client→gateway"
    )]
    ClientToGateway,
    /// Gateway answering its client.
    #[serde(
        rename = "sci://microfrontend-platform/gateway-to-client",
        alias = "gateway→client"
    )]
    GatewayToClient,
    /// Gateway talking to the broker (handshake and relayed client traffic).
    #[serde(
        rename = "sci://microfrontend-platform/gateway-to-broker",
        alias = "gateway→broker"
    )]
    GatewayToBroker,
    /// Broker answering a gateway.
    #[serde(
        rename = "sci://microfrontend-platform/broker-to-gateway",
        alias = "broker→gateway"
    )]
    BrokerToGateway,
}

impl MessagingTransport {
    /// Wire value of the transport tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagingTransport::ClientToBroker => "sci://microfrontend-platform/client-to-broker",
            MessagingTransport::BrokerToClient => "sci://microfrontend-platform/broker-to-client",
            MessagingTransport::ClientToGateway => "sci://microfrontend-platform/client-to-gateway",
            MessagingTransport::GatewayToClient => "sci://microfrontend-platform/gateway-to-client",
            MessagingTransport::GatewayToBroker => "sci://microfrontend-platform/gateway-to-broker",
            MessagingTransport::BrokerToGateway => "sci://microfrontend-platform/broker-to-gateway",
        }
    }

    /// Whether envelopes on this leg may carry the given channel.
    ///
    /// Subscription commands only flow towards the broker. The gateway legs
    /// only carry topic messages.
    pub fn admits(&self, channel: MessagingChannel) -> bool {
        use MessagingChannel as C;
        use MessagingTransport as T;
        match (self, channel) {
            (T::ClientToBroker | T::GatewayToBroker, _) => true,
            (T::BrokerToClient | T::BrokerToGateway, C::Topic | C::Intent) => true,
            (T::BrokerToClient | T::BrokerToGateway, C::TopicSubscribe | C::TopicUnsubscribe) => {
                false
            }
            (T::ClientToGateway | T::GatewayToClient, C::Topic) => true,
            (
                T::ClientToGateway | T::GatewayToClient,
                C::Intent | C::TopicSubscribe | C::TopicUnsubscribe,
            ) => false,
        }
    }
}

/// Channel an envelope is addressed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessagingChannel {
    /// Subscribe to a topic.
    #[serde(rename = "topic-subscribe")]
    TopicSubscribe,
    /// Unsubscribe from a topic.
    #[serde(rename = "topic-unsubscribe")]
    TopicUnsubscribe,
    /// Publish to a topic.
    #[serde(rename = "topic-publish", alias = "topic")]
    Topic,
    /// Issue an intent.
    #[serde(rename = "intent")]
    Intent,
}

impl MessagingChannel {
    /// Wire value of the channel tag.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessagingChannel::TopicSubscribe => "topic-subscribe",
            MessagingChannel::TopicUnsubscribe => "topic-unsubscribe",
            MessagingChannel::Topic => "topic-publish",
            MessagingChannel::Intent => "intent",
        }
    }
}

/// Payload carried by an envelope. The variant always agrees with the
/// envelope's channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Message {
    /// Topic publication or reply.
    Topic(TopicMessage),
    /// Intent issued by a client.
    Intent(IntentMessage),
    /// Subscription request.
    TopicSubscribe(TopicSubscribeCommand),
    /// Subscription cancellation.
    TopicUnsubscribe(TopicUnsubscribeCommand),
}

impl Message {
    /// Channel implied by the payload variant.
    pub fn channel(&self) -> MessagingChannel {
        match self {
            Message::Topic(_) => MessagingChannel::Topic,
            Message::Intent(_) => MessagingChannel::Intent,
            Message::TopicSubscribe(_) => MessagingChannel::TopicSubscribe,
            Message::TopicUnsubscribe(_) => MessagingChannel::TopicUnsubscribe,
        }
    }

    fn decode(
        transport: MessagingTransport,
        channel: MessagingChannel,
        raw: Option<JsonValue>,
    ) -> Result<Option<Self>> {
        if !transport.admits(channel) {
            return Err(EnvelopeError::ChannelNotAdmitted { transport, channel });
        }
        let Some(raw) = raw else {
            return match channel {
                MessagingChannel::TopicSubscribe | MessagingChannel::TopicUnsubscribe => {
                    Err(EnvelopeError::MissingMessage(channel))
                }
                MessagingChannel::Topic | MessagingChannel::Intent => Ok(None),
            };
        };
        let message = match channel {
            MessagingChannel::Topic => Message::Topic(serde_json::from_value(raw)?),
            MessagingChannel::Intent => Message::Intent(serde_json::from_value(raw)?),
            MessagingChannel::TopicSubscribe => {
                Message::TopicSubscribe(serde_json::from_value(raw)?)
            }
            MessagingChannel::TopicUnsubscribe => {
                Message::TopicUnsubscribe(serde_json::from_value(raw)?)
            }
        };
        Ok(Some(message))
    }
}

/// Wrapper around every message crossing a context boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", try_from = "WireEnvelope")]
pub struct MessageEnvelope {
    /// Opaque identity of the sender, stamped by the broker.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<String>,
    /// Unique identifier generated per envelope.
    pub message_id: String,
    /// Leg the envelope travels on.
    pub transport: MessagingTransport,
    /// How the payload is to be read.
    pub channel: MessagingChannel,
    /// Payload, interpreted according to `transport` and `channel`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Message>,
}

impl MessageEnvelope {
    /// Wrap a message into a fresh envelope with a unique message id.
    pub fn new(transport: MessagingTransport, message: Message) -> Self {
        Self {
            sender_id: None,
            message_id: Uuid::new_v4().to_string(),
            transport,
            channel: message.channel(),
            message: Some(message),
        }
    }

    /// Convenience constructor for topic messages.
    pub fn topic(transport: MessagingTransport, message: TopicMessage) -> Self {
        Self::new(transport, Message::Topic(message))
    }

    /// Convenience constructor for intent messages.
    pub fn intent(transport: MessagingTransport, message: IntentMessage) -> Self {
        Self::new(transport, Message::Intent(message))
    }

    /// Attach the sender identity.
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// Re-address the envelope to another leg, keeping its id and payload.
    pub fn relay(mut self, transport: MessagingTransport) -> Self {
        self.transport = transport;
        self
    }

    /// Check that the transport admits the channel and the payload agrees with it.
    pub fn validate(&self) -> Result<()> {
        if !self.transport.admits(self.channel) {
            return Err(EnvelopeError::ChannelNotAdmitted {
                transport: self.transport,
                channel: self.channel,
            });
        }
        match &self.message {
            Some(message) if message.channel() != self.channel => {
                Err(EnvelopeError::ChannelNotAdmitted {
                    transport: self.transport,
                    channel: message.channel(),
                })
            }
            None if matches!(
                self.channel,
                MessagingChannel::TopicSubscribe | MessagingChannel::TopicUnsubscribe
            ) =>
            {
                Err(EnvelopeError::MissingMessage(self.channel))
            }
            _ => Ok(()),
        }
    }

    /// Decode an envelope from its wire representation.
    pub fn from_value(value: JsonValue) -> Result<Self> {
        let wire: WireEnvelope = serde_json::from_value(value)?;
        Self::try_from(wire)
    }

    /// Encode the envelope into its wire representation.
    pub fn to_value(&self) -> Result<JsonValue> {
        self.validate()?;
        Ok(serde_json::to_value(self)?)
    }

    /// Topic payload, if the envelope is on the topic channel.
    pub fn topic_message(&self) -> Option<&TopicMessage> {
        match &self.message {
            Some(Message::Topic(message)) => Some(message),
            _ => None,
        }
    }

    /// Intent payload, if the envelope is on the intent channel.
    pub fn intent_message(&self) -> Option<&IntentMessage> {
        match &self.message {
            Some(Message::Intent(message)) => Some(message),
            _ => None,
        }
    }

    /// Unwrap the payload.
    pub fn into_message(self) -> Option<Message> {
        self.message
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEnvelope {
    #[serde(default)]
    sender_id: Option<String>,
    message_id: String,
    transport: MessagingTransport,
    channel: MessagingChannel,
    #[serde(default)]
    message: Option<JsonValue>,
}

impl TryFrom<WireEnvelope> for MessageEnvelope {
    type Error = EnvelopeError;

    fn try_from(wire: WireEnvelope) -> Result<Self> {
        let message = Message::decode(wire.transport, wire.channel, wire.message)?;
        Ok(Self {
            sender_id: wire.sender_id,
            message_id: wire.message_id,
            transport: wire.transport,
            channel: wire.channel,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fresh_envelopes_get_distinct_ids() {
        let a = MessageEnvelope::topic(
            MessagingTransport::ClientToBroker,
            TopicMessage::new("a/b"),
        );
        let b = MessageEnvelope::topic(
            MessagingTransport::ClientToBroker,
            TopicMessage::new("a/b"),
        );
        assert_ne!(a.message_id, b.message_id);
        assert_eq!(a.channel, MessagingChannel::Topic);
    }

    #[test]
    fn decodes_payload_by_channel() {
        let value = json!({
            "messageId": "m-1",
            "transport": "sci://microfrontend-platform/client-to-broker",
            "channel": "topic-subscribe",
            "message": { "topic": "weather/:city" }
        });
        let envelope = MessageEnvelope::from_value(value).expect("decode");
        assert_eq!(
            envelope.message,
            Some(Message::TopicSubscribe(TopicSubscribeCommand {
                topic: "weather/:city".into(),
                subscriber_id: None,
            }))
        );
    }

    #[test]
    fn same_shape_is_read_differently_per_channel() {
        // `{ topic }` is a valid topic message and a valid subscribe command;
        // only the channel tag decides.
        let topic = json!({
            "messageId": "m-1",
            "transport": "client→broker",
            "channel": "topic",
            "message": { "topic": "a" }
        });
        let envelope = MessageEnvelope::from_value(topic).expect("decode");
        assert!(matches!(envelope.message, Some(Message::Topic(_))));
        assert_eq!(envelope.transport, MessagingTransport::ClientToBroker);
    }

    #[test]
    fn rejects_channel_not_admitted_by_transport() {
        let value = json!({
            "messageId": "m-1",
            "transport": "sci://microfrontend-platform/broker-to-client",
            "channel": "topic-subscribe",
            "message": { "topic": "a" }
        });
        let err = MessageEnvelope::from_value(value).unwrap_err();
        assert!(matches!(err, EnvelopeError::ChannelNotAdmitted { .. }));

        let intent_on_gateway_leg = json!({
            "messageId": "m-2",
            "transport": "sci://microfrontend-platform/client-to-gateway",
            "channel": "intent",
        });
        assert!(MessageEnvelope::from_value(intent_on_gateway_leg).is_err());
    }

    #[test]
    fn subscribe_without_message_is_rejected() {
        let value = json!({
            "messageId": "m-1",
            "transport": "sci://microfrontend-platform/client-to-broker",
            "channel": "topic-unsubscribe",
        });
        let err = MessageEnvelope::from_value(value).unwrap_err();
        assert!(matches!(
            err,
            EnvelopeError::MissingMessage(MessagingChannel::TopicUnsubscribe)
        ));
    }

    #[test]
    fn wire_shape_uses_camel_case_and_omits_empty_fields() {
        let envelope = MessageEnvelope::topic(
            MessagingTransport::ClientToGateway,
            TopicMessage::new("ɵGATEWAY_INFO").with_reply_to("reply-1"),
        );
        let value = envelope.to_value().expect("encode");
        assert_eq!(value["channel"], "topic-publish");
        assert_eq!(
            value["transport"],
            "sci://microfrontend-platform/client-to-gateway"
        );
        assert_eq!(value["message"]["replyTo"], "reply-1");
        assert!(value.get("senderId").is_none());
        assert!(value["message"].get("retain").is_none());

        let decoded = MessageEnvelope::from_value(value).expect("decode");
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn to_value_refuses_inconsistent_envelopes() {
        let mut envelope = MessageEnvelope::topic(
            MessagingTransport::ClientToBroker,
            TopicMessage::new("a"),
        );
        envelope.channel = MessagingChannel::Intent;
        assert!(envelope.to_value().is_err());
    }

    #[test]
    fn unknown_transport_is_a_decode_error() {
        let value = json!({
            "messageId": "m-1",
            "transport": "sci://elsewhere/foo",
            "channel": "topic",
        });
        assert!(matches!(
            MessageEnvelope::from_value(value),
            Err(EnvelopeError::Json(_))
        ));
    }
}
