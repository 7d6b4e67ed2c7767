//! ---
//! mfp_section: "06-control-cli"
//! mfp_subsection: "binary"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Configuration validation command."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use mfp_common::PlatformConfig;
use mfp_logging::{log_system_event, LogContext, SystemEventOutcome};

#[derive(Debug, Args)]
pub struct ValidateCommand {
    /// Configuration file to check (defaults to `MFP_CONFIG` or configs/platform.toml).
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

pub fn run(command: ValidateCommand) -> Result<()> {
    let loaded = match crate::load_config(command.config.as_deref()) {
        Ok(loaded) => loaded,
        Err(err) => {
            log_system_event(None, "config.validate", &format!("{:#}", err), SystemEventOutcome::Fault);
            return Err(err);
        }
    };
    log_system_event(
        Some(&LogContext::new().with_app(&loaded.config.client.symbolic_name)),
        "config.validate",
        &format!("{} is valid", loaded.source.display()),
        SystemEventOutcome::Success,
    );
    print!("{}", summary(&loaded.config));
    Ok(())
}

fn summary(config: &PlatformConfig) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "client: {} at {} (discovery timeout {}ms, unreachable broker: {:?})\n",
        config.client.symbolic_name,
        config.client.origin,
        config.client.discovery_timeout.as_millis(),
        config.client.unreachable_broker
    ));
    out.push_str(&format!("broker: {}\n", config.broker.origin));
    for (name, application) in &config.broker.applications {
        out.push_str(&format!("  trusts {} at {}\n", name, application.origin));
    }
    if !config
        .broker
        .applications
        .contains_key(&config.client.symbolic_name)
    {
        out.push_str(&format!(
            "warning: the broker does not trust client '{}'\n",
            config.client.symbolic_name
        ));
    }
    out
}
