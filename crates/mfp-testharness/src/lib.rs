//! ---
//! mfp_section: "11-simulation"
//! mfp_subsection: "01-bootstrap"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Test harness orchestrator scaffolding and shared exports."
//! mfp_version: "v0.1.0"
//! mfp_owner: "tbd"
//! ---
//! In-process stand-ins for the browser side of the platform.
//!
//! [`HarnessFrameHost`] mounts frames as in-memory windows and starts a
//! [`FrameRuntime`] inside each one. Two runtimes exist: [`ScriptedGateway`]
//! answers gateway info requests from a script, and [`GatewayAgent`] performs
//! the real broker handshake against a [`SimulatedBroker`].
#![warn(missing_docs)]

pub mod agent;
pub mod broker;
pub mod host;
pub mod platform;
pub mod scripted;

pub use agent::{AncestorLocator, BrokerLocator, GatewayAgent};
pub use broker::{ConnectedClient, SimulatedBroker};
pub use host::{FrameContext, FrameRuntime, HarnessFrameHost};
pub use platform::{GatewayHost, PlatformHarness};
pub use scripted::ScriptedGateway;

/// Frame host whose gateway frames follow a [`ScriptedGateway`].
pub type ScriptedHost = HarnessFrameHost<ScriptedGateway>;
