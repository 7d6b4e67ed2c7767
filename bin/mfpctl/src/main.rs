//! ---
//! mfp_section: "06-control-cli"
//! mfp_subsection: "binary"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Control CLI for operators of the messaging platform."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::{Parser, Subcommand};
use mfp_common::config::LoadedPlatformConfig;
use mfp_common::PlatformConfig;
use mfp_logging as logging;

mod simulate;
mod validate;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Microfrontend messaging platform control utility",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Load a platform configuration and check it.
    Validate(validate::ValidateCommand),
    /// Run the configured applications against an in-process broker.
    Simulate(simulate::SimulateCommand),
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Validate(cmd) => {
            logging::init();
            validate::run(cmd)?
        }
        Commands::Simulate(cmd) => simulate::run(cmd)?,
    }
    Ok(())
}

/// Explicit path first, then the usual locations.
pub(crate) fn load_config(explicit: Option<&Path>) -> Result<LoadedPlatformConfig> {
    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.to_path_buf());
    }
    candidates.push(PathBuf::from("configs/platform.toml"));
    candidates.push(PathBuf::from("configs/platform.example.toml"));
    PlatformConfig::load_with_source(&candidates)
}
