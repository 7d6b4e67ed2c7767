//! ---
//! mfp_section: "01-core-functionality"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Shared configuration and tracing primitives."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Shared primitives for the microfrontend messaging workspace.
//! This crate exposes configuration loading and tracing initialisation
//! consumed by the gateway, the client, and the control CLI.

pub mod config;
pub mod logging;

pub use config::{
    ApplicationConfig, BrokerConfig, ClientConfig, LoggingConfig, PlatformConfig,
    UnreachableBrokerPolicy,
};
pub use logging::{init_tracing, LogFormat};
