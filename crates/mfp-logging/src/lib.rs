//! ---
//! mfp_section: "03-logging"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Structured logging adapters and sinks."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
//! Gateway-aware logging.
//!
//! Events emitted through this crate always carry the same four keys (`app`,
//! `client_id`, `broker_origin`, `transport`) so logs of several microfrontends
//! sharing one page can be told apart. Processes install their subscriber with
//! `mfp_common::logging::init_tracing`; [`init`] is the quick variant for tools
//! and tests.
#![warn(missing_docs)]

use tracing::Level;
use tracing_subscriber::EnvFilter;

pub mod capture;
pub mod macros;

#[doc(hidden)]
pub use tracing as __tracing;

/// Install a plain stderr subscriber filtered by `RUST_LOG` (default `info`).
/// Later calls are no-ops.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

/// Who is logging: a client, optionally bound to a broker and a transport leg.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LogContext<'a> {
    /// Symbolic application name.
    pub app: Option<&'a str>,
    /// Broker-assigned id, known once connected.
    pub client_id: Option<&'a str>,
    /// Broker origin, known once discovered.
    pub broker_origin: Option<&'a str>,
    /// Transport tag.
    pub transport: Option<&'a str>,
}

impl<'a> LogContext<'a> {
    /// Context with no field set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for the named application.
    pub fn for_app(app: &'a str) -> Self {
        Self {
            app: Some(app),
            ..Self::default()
        }
    }

    /// Set the application name.
    pub fn with_app(self, app: &'a str) -> Self {
        Self { app: Some(app), ..self }
    }

    /// Set the broker-assigned id.
    pub fn with_client_id(self, client_id: &'a str) -> Self {
        Self {
            client_id: Some(client_id),
            ..self
        }
    }

    /// Set the broker origin.
    pub fn with_broker_origin(self, broker_origin: &'a str) -> Self {
        Self {
            broker_origin: Some(broker_origin),
            ..self
        }
    }

    /// Set the transport tag.
    pub fn with_transport(self, transport: &'a str) -> Self {
        Self {
            transport: Some(transport),
            ..self
        }
    }
}

/// How a lifecycle step ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEventOutcome {
    /// Logged at info.
    Success,
    /// Logged at error.
    Fault,
}

impl SystemEventOutcome {
    /// Level the outcome is logged at.
    pub const fn level(self) -> Level {
        match self {
            SystemEventOutcome::Success => Level::INFO,
            SystemEventOutcome::Fault => Level::ERROR,
        }
    }

    fn label(self) -> &'static str {
        match self {
            SystemEventOutcome::Success => "success",
            SystemEventOutcome::Fault => "fault",
        }
    }
}

/// Log one lifecycle step (frame mounted, broker discovered, client connected,
/// ...) under a dotted `event` name such as `gateway.discovery`.
pub fn log_system_event(
    context: Option<&LogContext>,
    event: &str,
    message: &str,
    outcome: SystemEventOutcome,
) {
    let ctx = context.copied().unwrap_or_default();
    // event! needs a constant level
    macro_rules! emit {
        ($level:expr) => {
            tracing::event!(
                $level,
                event,
                outcome = outcome.label(),
                app = ctx.app.unwrap_or(""),
                client_id = ctx.client_id.unwrap_or(""),
                broker_origin = ctx.broker_origin.unwrap_or(""),
                transport = ctx.transport.unwrap_or(""),
                message = %message
            )
        };
    }
    match outcome {
        SystemEventOutcome::Success => emit!(Level::INFO),
        SystemEventOutcome::Fault => emit!(Level::ERROR),
    }
}
