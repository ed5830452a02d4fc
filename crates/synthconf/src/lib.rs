//! Configuration loading for synthwire.
//!
//! Configuration is split into two categories:
//!
//! - **Infrastructure** (`InfraConfig`): paths, bind address, telemetry.
//!   Fixed for the life of the process.
//!
//! - **Session** (`SessionConfig`): ICE servers and timing, synth process
//!   supervision, and the encoding pipeline. Read once per session when it
//!   is created.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/synthwire/config.toml` (system)
//! 2. `~/.config/synthwire/config.toml` (user)
//! 3. `./synthwire.toml` or `--config <path>` (local override)
//! 4. Environment variables (`SYNTHWIRE_*`, `TURN_*`)
//!
//! # Example Config
//!
//! ```toml
//! environment = "production"
//!
//! [paths]
//! log_dir = "~/.local/state/synthwire/logs"
//! synthdef_dir = "/app/sc/synthdefs"
//!
//! [bind]
//! http_port = 8080
//!
//! [ice]
//! stun_urls = ["stun:stun.l.google.com:19302"]
//! turn_urls = ["turn:turn.example.net:3478?transport=udp"]
//! turn_username = "synthwire"
//! turn_credential = "secret"
//!
//! [synth]
//! readiness_marker = "JackDriver: client name is"
//! ```

pub mod infra;
pub mod loader;
pub mod session;

pub use infra::{BindConfig, InfraConfig, PathsConfig, TelemetryConfig};
pub use loader::{discover_config_files_with_override, ConfigSources};
pub use session::{IceConfig, PipelineConfig, SessionConfig, SynthConfig};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Deployment environment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

impl FromStr for Environment {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(ConfigError::Invalid(format!(
                "environment must be either development or production, got: {}",
                other
            ))),
        }
    }
}

/// Complete synthwire configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SynthwireConfig {
    #[serde(default)]
    pub environment: Environment,

    #[serde(flatten)]
    pub infra: InfraConfig,

    #[serde(flatten)]
    pub session: SessionConfig,
}

impl SynthwireConfig {
    /// Load configuration from all sources.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration with an optional CLI-provided file, then apply env overrides.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report which files and env vars contributed.
    ///
    /// The result is validated; an invalid config is an error.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut table = toml::Table::new();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_table = loader::read_table(&path)?;
            loader::merge_tables(&mut table, file_table);
            sources.files.push(path);
        }

        let mut config = loader::from_table(table, &sources)?;
        loader::apply_env_overrides(&mut config, &mut sources)?;
        config.validate()?;

        Ok((config, sources))
    }

    /// Check cross-field constraints that serde defaults cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let ice = &self.session.ice;

        if ice.port_min == 0 || ice.port_min > ice.port_max {
            return Err(ConfigError::Invalid(format!(
                "ice port range {}-{} is empty",
                ice.port_min, ice.port_max
            )));
        }
        if ice.candidate_attempts == 0 {
            return Err(ConfigError::Invalid(
                "ice.candidate_attempts must be at least 1".to_string(),
            ));
        }
        if let Some(url) = ice
            .stun_urls
            .iter()
            .find(|u| !(u.starts_with("stun:") || u.starts_with("stuns:")))
        {
            return Err(ConfigError::Invalid(format!("not a STUN url: {}", url)));
        }
        if let Some(url) = ice
            .turn_urls
            .iter()
            .find(|u| !(u.starts_with("turn:") || u.starts_with("turns:")))
        {
            return Err(ConfigError::Invalid(format!("not a TURN url: {}", url)));
        }

        if self.environment == Environment::Production {
            if ice.turn_urls.is_empty() {
                return Err(ConfigError::Invalid(
                    "production requires at least one TURN url".to_string(),
                ));
            }
            if ice.turn_username.is_none() || ice.turn_credential.is_none() {
                return Err(ConfigError::Invalid(
                    "production requires TURN username and credential".to_string(),
                ));
            }
        }

        let synth = &self.session.synth;
        if synth.channels == 0 {
            return Err(ConfigError::Invalid("synth.channels must be at least 1".to_string()));
        }
        if synth.readiness_marker.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "synth.readiness_marker must not be empty".to_string(),
            ));
        }
        if synth.poll_interval_ms == 0 || synth.status_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "synth poll and status intervals must be non-zero".to_string(),
            ));
        }

        let pipeline = &self.session.pipeline;
        if !pipeline.source_template.contains("{session_id}") {
            return Err(ConfigError::Invalid(
                "pipeline.source_template must contain {session_id}".to_string(),
            ));
        }
        if pipeline.client_prefix.is_empty() {
            return Err(ConfigError::Invalid(
                "pipeline.client_prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Serialize config to a TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}
