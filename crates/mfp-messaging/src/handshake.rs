//! ---
//! mfp_section: "02-messaging-envelope-model"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Envelope, channel, and handshake definitions."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Payloads exchanged while a gateway discovers and connects to the broker.
use serde::{Deserialize, Serialize};

use crate::{EnvelopeError, Result};

/// Sent by a gateway to initiate a connection to the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectMessage {
    /// Symbolic name of the connecting application.
    pub symbolic_app_name: String,
}

/// Outcome of a connect request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnCode {
    /// The client is connected.
    #[serde(rename = "accepted")]
    Accepted,
    /// The connect request was malformed.
    #[serde(rename = "refused:bad-request")]
    BadRequest,
    /// The application is unknown to the broker.
    #[serde(rename = "refused:rejected")]
    Rejected,
    /// The application is known but connected from an unexpected origin.
    #[serde(rename = "refused:blocked")]
    Blocked,
}

/// Broker reply to a [`ConnectMessage`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnackMessage {
    /// Outcome of the request.
    pub return_code: ReturnCode,
    /// Human-readable reason for a refusal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_message: Option<String>,
    /// Id the broker assigned to the client. Only set when accepted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ConnackMessage {
    /// Acceptance carrying the assigned client id.
    pub fn accepted(client_id: impl Into<String>) -> Self {
        Self {
            return_code: ReturnCode::Accepted,
            return_message: None,
            client_id: Some(client_id.into()),
        }
    }

    /// Refusal with the given code and reason.
    pub fn refused(return_code: ReturnCode, reason: impl Into<String>) -> Self {
        Self {
            return_code,
            return_message: Some(reason.into()),
            client_id: None,
        }
    }

    /// Whether the connection was accepted.
    pub fn is_accepted(&self) -> bool {
        self.return_code == ReturnCode::Accepted
    }

    /// Enforce that a client id is present exactly when accepted.
    pub fn validate(&self) -> Result<()> {
        match (self.return_code, &self.client_id) {
            (ReturnCode::Accepted, None) => {
                Err(EnvelopeError::MalformedReply("accepted connack without client id"))
            }
            (ReturnCode::Accepted, Some(_)) | (_, None) => Ok(()),
            (_, Some(_)) => Err(EnvelopeError::MalformedReply(
                "refused connack carries a client id",
            )),
        }
    }
}

/// Gateway reply to a gateway info request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "WireGatewayInfo", into = "WireGatewayInfo")]
pub enum GatewayInfoResponse {
    /// The gateway is connected to the broker at `broker_origin`.
    Ok {
        /// Origin of the broker window.
        broker_origin: String,
    },
    /// The gateway could not connect.
    Err {
        /// Reason reported by the gateway.
        error: String,
    },
}

impl GatewayInfoResponse {
    /// Successful reply.
    pub fn ok(broker_origin: impl Into<String>) -> Self {
        GatewayInfoResponse::Ok {
            broker_origin: broker_origin.into(),
        }
    }

    /// Failed reply.
    pub fn error(error: impl Into<String>) -> Self {
        GatewayInfoResponse::Err {
            error: error.into(),
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireGatewayInfo {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    broker_origin: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl TryFrom<WireGatewayInfo> for GatewayInfoResponse {
    type Error = EnvelopeError;

    fn try_from(wire: WireGatewayInfo) -> Result<Self> {
        if wire.ok {
            let broker_origin = wire
                .broker_origin
                .ok_or(EnvelopeError::MalformedReply("ok reply without brokerOrigin"))?;
            Ok(GatewayInfoResponse::Ok { broker_origin })
        } else {
            Ok(GatewayInfoResponse::Err {
                error: wire
                    .error
                    .unwrap_or_else(|| "gateway reported an unspecified error".to_owned()),
            })
        }
    }
}

impl From<GatewayInfoResponse> for WireGatewayInfo {
    fn from(response: GatewayInfoResponse) -> Self {
        match response {
            GatewayInfoResponse::Ok { broker_origin } => WireGatewayInfo {
                ok: true,
                broker_origin: Some(broker_origin),
                error: None,
            },
            GatewayInfoResponse::Err { error } => WireGatewayInfo {
                ok: false,
                broker_origin: None,
                error: Some(error),
            },
        }
    }
}

/// Delivery receipt returned by the broker for publications and intents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageDeliveryStatus {
    /// Whether the message was accepted for delivery.
    pub ok: bool,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn return_codes_use_wire_names() {
        let connack = ConnackMessage::refused(ReturnCode::Blocked, "origin mismatch");
        let value = serde_json::to_value(&connack).expect("encode");
        assert_eq!(value["returnCode"], "refused:blocked");
        assert!(value.get("clientId").is_none());
        connack.validate().expect("refusal without client id is valid");
    }

    #[test]
    fn client_id_only_on_accept() {
        ConnackMessage::accepted("c-1").validate().expect("valid");
        let mut bad = ConnackMessage::accepted("c-1");
        bad.return_code = ReturnCode::Rejected;
        assert!(bad.validate().is_err());
        bad.return_code = ReturnCode::Accepted;
        bad.client_id = None;
        assert!(bad.validate().is_err());
    }

    #[test]
    fn gateway_info_wire_shapes() {
        let ok: GatewayInfoResponse =
            serde_json::from_value(json!({"ok": true, "brokerOrigin": "https://broker.example"}))
                .expect("decode ok");
        assert_eq!(ok, GatewayInfoResponse::ok("https://broker.example"));

        let err: GatewayInfoResponse =
            serde_json::from_value(json!({"ok": false, "error": "X"})).expect("decode err");
        assert_eq!(err, GatewayInfoResponse::error("X"));

        let value = serde_json::to_value(GatewayInfoResponse::error("X")).expect("encode");
        assert_eq!(value, json!({"ok": false, "error": "X"}));
    }

    #[test]
    fn ok_reply_requires_broker_origin() {
        let result = serde_json::from_value::<GatewayInfoResponse>(json!({"ok": true}));
        assert!(result.is_err());
    }

    #[test]
    fn delivery_status_omits_missing_details() {
        let delivered = MessageDeliveryStatus { ok: true, details: None };
        assert_eq!(serde_json::to_value(&delivered).expect("encode"), json!({"ok": true}));
        let failed: MessageDeliveryStatus =
            serde_json::from_value(json!({"ok": false, "details": "no subscriber"})).expect("decode");
        assert_eq!(failed.details.as_deref(), Some("no subscriber"));
    }
}
