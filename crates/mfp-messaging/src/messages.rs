//! ---
//! mfp_section: "02-messaging-envelope-model"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Envelope, channel, and handshake definitions."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::collections::BTreeMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::Result;

/// Message published to a topic.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicMessage {
    /// Destination topic (or the matched topic on delivery).
    pub topic: String,
    /// Application payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,
    /// Arbitrary headers travelling with the payload.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, JsonValue>,
    /// Values of named wildcard segments, filled in on delivery.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
    /// Ask the broker to keep the message and replay it to later subscribers.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub retain: bool,
    /// Topic to send correlated replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl TopicMessage {
    /// Header the broker uses to tell which subscription a delivery is for.
    pub const SUBSCRIBER_ID_HEADER: &'static str = "ɵTOPIC_SUBSCRIBER_ID";

    /// Create a message without payload.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Attach a header.
    pub fn with_header(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Request correlated replies on the given topic.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }

    /// Mark the message as retained.
    pub fn retained(mut self) -> Self {
        self.retain = true;
        self
    }

    /// Deserialize the payload into a typed value.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.payload
            .clone()
            .map(serde_json::from_value)
            .transpose()
            .map_err(Into::into)
    }
}

/// Intent issued towards whichever application provides the capability.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntentMessage {
    /// Capability type the intent is addressed to.
    #[serde(rename = "type")]
    pub intent_type: String,
    /// Qualifier narrowing the capability.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<BTreeMap<String, String>>,
    /// Application payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<JsonValue>,
    /// Arbitrary headers travelling with the payload.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, JsonValue>,
    /// Topic to send correlated replies to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply_to: Option<String>,
}

impl IntentMessage {
    /// Create an unqualified intent of the given type.
    pub fn new(intent_type: impl Into<String>) -> Self {
        Self {
            intent_type: intent_type.into(),
            ..Self::default()
        }
    }

    /// Add a qualifier entry.
    pub fn with_qualifier(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.qualifier
            .get_or_insert_with(BTreeMap::new)
            .insert(key.into(), value.into());
        self
    }

    /// Attach a payload.
    pub fn with_payload(mut self, payload: JsonValue) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Request correlated replies on the given topic.
    pub fn with_reply_to(mut self, reply_to: impl Into<String>) -> Self {
        self.reply_to = Some(reply_to.into());
        self
    }
}

/// Command asking the broker to deliver messages published to `topic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicSubscribeCommand {
    /// Topic or topic pattern.
    pub topic: String,
    /// Client-chosen id; the broker echoes it in the
    /// [`TopicMessage::SUBSCRIBER_ID_HEADER`] header of every delivery.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_id: Option<String>,
}

impl TopicSubscribeCommand {
    /// Subscribe to `topic` under the given subscriber id.
    pub fn new(topic: impl Into<String>, subscriber_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscriber_id: Some(subscriber_id.into()),
        }
    }
}

/// Command cancelling a previous subscription.
///
/// With a subscriber id only that subscription is cancelled, otherwise every
/// subscription of the client to `topic`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicUnsubscribeCommand {
    /// Topic or topic pattern given when subscribing.
    pub topic: String,
    /// Id given when subscribing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscriber_id: Option<String>,
}

impl TopicUnsubscribeCommand {
    /// Cancel the subscription registered under `subscriber_id`.
    pub fn new(topic: impl Into<String>, subscriber_id: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            subscriber_id: Some(subscriber_id.into()),
        }
    }
}
