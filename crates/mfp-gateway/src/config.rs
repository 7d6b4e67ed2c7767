//! ---
//! mfp_section: "04-broker-gateway"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Broker gateway and discovery protocol."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::time::Duration;

use mfp_common::{ClientConfig, UnreachableBrokerPolicy};

/// Runtime settings of a [`crate::BrokerGateway`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GatewayConfig {
    /// How long to wait for the gateway info reply once the frame loaded.
    pub discovery_timeout: Duration,
    /// What posting does after discovery failed or the gateway was destroyed.
    pub unreachable_broker: UnreachableBrokerPolicy,
}

impl GatewayConfig {
    /// Override the discovery timeout.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Override the unreachable broker policy.
    pub fn with_unreachable_broker(mut self, policy: UnreachableBrokerPolicy) -> Self {
        self.unreachable_broker = policy;
        self
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

impl From<&ClientConfig> for GatewayConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            discovery_timeout: config.discovery_timeout,
            unreachable_broker: config.unreachable_broker,
        }
    }
}
