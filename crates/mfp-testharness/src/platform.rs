//! ---
//! mfp_section: "11-simulation"
//! mfp_subsection: "06-platform"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Host page with a broker and embedded microfrontends."
//! mfp_version: "v0.1.0"
//! mfp_owner: "tbd"
//! ---
use std::sync::Arc;

use mfp_common::BrokerConfig;
use mfp_transport::{InMemoryWindow, WindowRef};

use crate::agent::GatewayAgent;
use crate::broker::SimulatedBroker;
use crate::host::HarnessFrameHost;

/// Frame host whose gateway frames run a [`GatewayAgent`].
pub type GatewayHost = HarnessFrameHost<GatewayAgent>;

/// Top-level host page running the broker, with microfrontends embedded in it.
pub struct PlatformHarness {
    top: Arc<InMemoryWindow>,
    broker: SimulatedBroker,
}

impl PlatformHarness {
    /// Start a broker in a fresh top-level window at the configured origin.
    pub fn start(config: &BrokerConfig) -> Self {
        let top = InMemoryWindow::top(config.origin.clone());
        let broker = SimulatedBroker::from_config(top.clone(), config);
        Self { top, broker }
    }

    /// The running broker.
    pub fn broker(&self) -> &SimulatedBroker {
        &self.broker
    }

    /// Window of the host page.
    pub fn top_window(&self) -> Arc<InMemoryWindow> {
        self.top.clone()
    }

    /// Frame host of the host page itself, sharing the broker's window.
    pub fn host_app(&self) -> Arc<GatewayHost> {
        HarnessFrameHost::new(self.top.clone(), GatewayAgent::new())
    }

    /// Embed a microfrontend loaded from `origin` into the host page.
    pub fn embed(&self, origin: &str) -> Arc<GatewayHost> {
        self.embed_in(self.top.clone(), origin)
    }

    /// Embed a microfrontend loaded from `origin` into `parent`.
    pub fn embed_in(&self, parent: WindowRef, origin: &str) -> Arc<GatewayHost> {
        HarnessFrameHost::new(InMemoryWindow::child(parent, origin), GatewayAgent::new())
    }
}
