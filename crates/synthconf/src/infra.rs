//! Process-level settings: filesystem paths, listen address, telemetry.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Filesystem locations used by the server and the synth processes it spawns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Directory for per-session synth logs (`scsynth_<id>.log`).
    /// Default: ~/.local/state/synthwire/logs
    #[serde(default = "PathsConfig::default_log_dir")]
    pub log_dir: PathBuf,

    /// Compiled synth definitions (`*.scsyndef`).
    /// Default: /app/sc/synthdefs
    #[serde(default = "PathsConfig::default_synthdef_dir")]
    pub synthdef_dir: PathBuf,

    /// Synth sources (`*.scd`) served back to the browser.
    /// Default: ./supercollider/src
    #[serde(default = "PathsConfig::default_synth_source_dir")]
    pub synth_source_dir: PathBuf,
}

impl PathsConfig {
    fn default_log_dir() -> PathBuf {
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".local/state/synthwire/logs"))
            .unwrap_or_else(|| PathBuf::from("logs"))
    }

    fn default_synthdef_dir() -> PathBuf {
        PathBuf::from("/app/sc/synthdefs")
    }

    fn default_synth_source_dir() -> PathBuf {
        PathBuf::from("supercollider/src")
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            log_dir: Self::default_log_dir(),
            synthdef_dir: Self::default_synthdef_dir(),
            synth_source_dir: Self::default_synth_source_dir(),
        }
    }
}

/// HTTP listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BindConfig {
    /// Default: 0.0.0.0
    #[serde(default = "BindConfig::default_host")]
    pub host: String,

    /// Default: 8080
    #[serde(default = "BindConfig::default_http_port")]
    pub http_port: u16,
}

impl BindConfig {
    fn default_host() -> String {
        "0.0.0.0".to_string()
    }

    fn default_http_port() -> u16 {
        8080
    }

    /// `host:port` suitable for `TcpListener::bind`.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }
}

impl Default for BindConfig {
    fn default() -> Self {
        Self {
            host: Self::default_host(),
            http_port: Self::default_http_port(),
        }
    }
}

/// Log filtering and optional OTLP export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log filter directive (trace, debug, info, warn, error, or a full
    /// `EnvFilter` string).
    /// Default: info,synthwire=debug
    #[serde(default = "TelemetryConfig::default_log_level")]
    pub log_level: String,

    /// OTLP gRPC endpoint. Export is disabled when unset.
    #[serde(default)]
    pub otlp_endpoint: Option<String>,
}

impl TelemetryConfig {
    fn default_log_level() -> String {
        "info,synthwire=debug".to_string()
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Self::default_log_level(),
            otlp_endpoint: None,
        }
    }
}

/// Settings fixed for the life of the process.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InfraConfig {
    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub bind: BindConfig,

    #[serde(default)]
    pub telemetry: TelemetryConfig,
}
