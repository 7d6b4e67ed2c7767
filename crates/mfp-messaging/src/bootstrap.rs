//! ---
//! mfp_section: "02-messaging-envelope-model"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Envelope, channel, and handshake definitions."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Document loaded into the hidden gateway frame.
//!
//! The document embeds the parameters the gateway needs (client name, client
//! origin, discovery timeout) as a JSON script block, so whatever runs inside
//! the frame can recover them with [`BootstrapParams::parse`].
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::{EnvelopeError, Result};

const SCRIPT_OPEN: &str = r#"<script type="application/json" id="mfp-gateway-bootstrap">"#;
const SCRIPT_CLOSE: &str = "</script>";

/// Parameters the gateway frame is started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BootstrapParams {
    /// Symbolic name of the client application.
    pub client_app_name: String,
    /// Origin of the client document.
    pub client_origin: String,
    /// Broker discovery timeout in milliseconds.
    pub discover_timeout: u64,
}

impl BootstrapParams {
    /// Collect the parameters for a client.
    pub fn new(
        client_app_name: impl Into<String>,
        client_origin: impl Into<String>,
        discovery_timeout: Duration,
    ) -> Self {
        Self {
            client_app_name: client_app_name.into(),
            client_origin: client_origin.into(),
            discover_timeout: u64::try_from(discovery_timeout.as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Discovery timeout as a duration.
    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discover_timeout)
    }

    /// Render the HTML document for the gateway frame.
    pub fn render(&self) -> String {
        let params = json!({
            "clientAppName": self.client_app_name,
            "clientOrigin": self.client_origin,
            "discoverTimeout": self.discover_timeout,
        })
        .to_string()
        // keep an app name containing `</script>` from closing the block early
        .replace("</", "<\\/");
        format!(
            "<html><head>{open}{params}{close}</head><body>Message Broker Gateway for '{name}'</body></html>",
            open = SCRIPT_OPEN,
            params = params,
            close = SCRIPT_CLOSE,
            name = escape_html(&self.client_app_name),
        )
    }

    /// Recover the parameters from a rendered document.
    pub fn parse(document: &str) -> Result<Self> {
        let start = document
            .find(SCRIPT_OPEN)
            .ok_or(EnvelopeError::MalformedBootstrap("missing bootstrap script block"))?
            + SCRIPT_OPEN.len();
        let len = document[start..]
            .find(SCRIPT_CLOSE)
            .ok_or(EnvelopeError::MalformedBootstrap("unterminated bootstrap script block"))?;
        Ok(serde_json::from_str(&document[start..start + len])?)
    }
}

fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&#39;"),
            '"' => escaped.push_str("&quot;"),
            other => escaped.push(other),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rendered_document_carries_parameters() {
        let params = BootstrapParams::new("app-1", "https://app-1.example", Duration::from_millis(1000));
        let document = params.render();
        assert!(document.contains("Message Broker Gateway for 'app-1'"));
        assert_eq!(BootstrapParams::parse(&document).expect("parse"), params);
        assert_eq!(params.discovery_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn hostile_app_names_stay_inside_the_script_block() {
        let params = BootstrapParams::new(
            "</script><script>alert(1)</script>",
            "https://app.example",
            Duration::from_secs(1),
        );
        let document = params.render();
        assert_eq!(document.matches(SCRIPT_CLOSE).count(), 1);
        assert!(document.contains("&lt;/script&gt;"));
        assert_eq!(BootstrapParams::parse(&document).expect("parse"), params);
    }

    #[test]
    fn parse_rejects_foreign_documents() {
        assert!(matches!(
            BootstrapParams::parse("<html></html>"),
            Err(EnvelopeError::MalformedBootstrap(_))
        ));
    }
}
