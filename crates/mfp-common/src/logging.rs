//! ---
//! mfp_section: "01-core-functionality"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Tracing subscriber setup for platform processes."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};
use tracing::info;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::daily;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

const LOG_ENV: &str = "MFP_LOG";
const DEFAULT_DIRECTIVE: &str = "info";

// flushed on drop, so they live as long as the process
static WRITER_GUARDS: OnceCell<Vec<WorkerGuard>> = OnceCell::new();

/// Shape of the stdout log.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Install the process-wide tracing subscriber.
///
/// The filter comes from `MFP_LOG`, then `RUST_LOG`, then defaults to `info`.
/// Stdout gets JSON or pretty output per [`LoggingConfig::format`]; with
/// [`LoggingConfig::file_output`] a daily rolling JSON file named after the
/// file prefix (or `service_name`) is written to the configured directory.
/// Installing twice keeps the first subscriber.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<()> {
    let mut guards = Vec::new();
    let (stdout, guard) = tracing_appender::non_blocking(std::io::stdout());
    guards.push(guard);
    let file = if config.file_output {
        let (writer, guard) = rolling_file(service_name, config)?;
        guards.push(guard);
        Some(writer)
    } else {
        None
    };
    let _ = WRITER_GUARDS.set(guards);

    let stdout_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(stdout)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(stdout)
            .boxed(),
    };
    let file_layer = file.map(|writer| {
        fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(writer)
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter())
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .is_ok();

    if installed {
        info!(
            service = %service_name,
            format = ?config.format,
            log_dir = %config.directory.display(),
            file_output = config.file_output,
            "tracing initialised"
        );
    }
    Ok(())
}

fn rolling_file(service_name: &str, config: &LoggingConfig) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!("unable to create log directory {}", config.directory.display())
    })?;
    let prefix = config.file_prefix.as_deref().unwrap_or(service_name);
    let appender = daily(&config.directory, format!("{}.log", prefix));
    Ok(tracing_appender::non_blocking(appender))
}

fn env_filter() -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directive) => EnvFilter::try_new(&directive).unwrap_or_else(|err| {
            eprintln!(
                "invalid {} directive '{}' ({}); using {}",
                LOG_ENV, directive, err, DEFAULT_DIRECTIVE
            );
            EnvFilter::new(DEFAULT_DIRECTIVE)
        }),
        Err(_) => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_DIRECTIVE)),
    }
}
