//! ---
//! mfp_section: "01-core-functionality"
//! mfp_subsection: "module"
//! mfp_type: "source"
//! mfp_scope: "code"
//! mfp_description: "Shared configuration and tracing primitives."
//! mfp_version: "v0.0.0-prealpha"
//! mfp_owner: "tbd"
//! ---
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_symbolic_name() -> String {
    "app".to_owned()
}

fn default_origin() -> String {
    "http://localhost:4200".to_owned()
}

fn default_discovery_timeout() -> Duration {
    Duration::from_millis(10_000)
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_file_output() -> bool {
    true
}

/// Primary configuration object for a messaging client and its broker.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Metadata describing where a [`PlatformConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedPlatformConfig {
    pub config: PlatformConfig,
    pub source: PathBuf,
}

impl PlatformConfig {
    pub const ENV_CONFIG_PATH: &str = "MFP_CONFIG";

    /// Load configuration from disk, respecting the `MFP_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedPlatformConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(&path)?;
                return Ok(LoadedPlatformConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(&path)?;
                return Ok(LoadedPlatformConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    /// Read, parse, and validate a single configuration file.
    pub fn from_path(path: &Path) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<PlatformConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.client.validate()?;
        self.broker.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for PlatformConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: PlatformConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// What publishing does once the broker is known to be unreachable.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum UnreachableBrokerPolicy {
    /// Leave the publish pending forever.
    #[default]
    Pend,
    /// Fail the publish with a "not connected" error.
    Reject,
}

/// Settings of the messaging client embedded in an application.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_symbolic_name")]
    pub symbolic_name: String,
    #[serde(default = "default_origin")]
    pub origin: String,
    #[serde(default = "default_discovery_timeout")]
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub discovery_timeout: Duration,
    #[serde(default)]
    pub unreachable_broker: UnreachableBrokerPolicy,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            symbolic_name: default_symbolic_name(),
            origin: default_origin(),
            discovery_timeout: default_discovery_timeout(),
            unreachable_broker: UnreachableBrokerPolicy::default(),
        }
    }
}

impl ClientConfig {
    pub fn validate(&self) -> Result<()> {
        if self.symbolic_name.trim().is_empty() {
            return Err(anyhow!("client symbolic_name must not be empty"));
        }
        if self.discovery_timeout.is_zero() {
            return Err(anyhow!("client discovery_timeout must be greater than zero"));
        }
        validate_origin("client origin", &self.origin)
    }
}

/// Settings of the broker the clients connect to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_origin")]
    pub origin: String,
    /// Applications allowed to connect, keyed by symbolic name.
    #[serde(default)]
    pub applications: IndexMap<String, ApplicationConfig>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            origin: default_origin(),
            applications: IndexMap::new(),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        validate_origin("broker origin", &self.origin)?;
        for (name, application) in &self.applications {
            validate_origin(&format!("origin of application '{}'", name), &application.origin)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApplicationConfig {
    pub origin: String,
}

/// Where tracing output goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    /// File name prefix of the rolling log; the service name when unset.
    #[serde(default)]
    pub file_prefix: Option<String>,
    /// Also write a rolling JSON log to `directory`.
    #[serde(default = "default_file_output")]
    pub file_output: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
            file_output: default_file_output(),
        }
    }
}

/// An origin is scheme, host, and optional port, with nothing else.
fn validate_origin(what: &str, origin: &str) -> Result<()> {
    let url = Url::parse(origin).with_context(|| format!("{} '{}' is not a url", what, origin))?;
    let serialized = url.origin().ascii_serialization();
    if serialized != origin {
        return Err(anyhow!(
            "{} '{}' is not an origin (expected '{}')",
            what,
            origin,
            serialized
        ));
    }
    Ok(())
}
