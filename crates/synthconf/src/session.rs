//! Per-session tuning: ICE negotiation, synth process supervision, and the
//! encoding pipeline.
//!
//! Every timeout is stored in milliseconds so the TOML stays flat; the
//! accessor methods hand out `Duration`s.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rendezvous servers and connection timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceConfig {
    /// Default: ["stun:stun.l.google.com:19302"]
    #[serde(default = "IceConfig::default_stun_urls")]
    pub stun_urls: Vec<String>,

    /// TURN relays handed to browsers via `/config`.
    #[serde(default)]
    pub turn_urls: Vec<String>,

    #[serde(default)]
    pub turn_username: Option<String>,

    #[serde(default)]
    pub turn_credential: Option<String>,

    /// Ephemeral UDP range for the server side of the connection.
    /// Default: 49152..=49252
    #[serde(default = "IceConfig::default_port_min")]
    pub port_min: u16,

    #[serde(default = "IceConfig::default_port_max")]
    pub port_max: u16,

    /// Default: 45000
    #[serde(default = "IceConfig::default_disconnected_timeout_ms")]
    pub disconnected_timeout_ms: u64,

    /// Default: 60000
    #[serde(default = "IceConfig::default_failed_timeout_ms")]
    pub failed_timeout_ms: u64,

    /// Default: 1000
    #[serde(default = "IceConfig::default_keepalive_interval_ms")]
    pub keepalive_interval_ms: u64,

    /// How long an offer waits for candidate gathering.
    /// Default: 15000
    #[serde(default = "IceConfig::default_gathering_timeout_ms")]
    pub gathering_timeout_ms: u64,

    /// Grace period after `disconnected` before the session is torn down.
    /// Default: 30000
    #[serde(default = "IceConfig::default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,

    /// Attempts for a trickled candidate.
    /// Default: 3
    #[serde(default = "IceConfig::default_candidate_attempts")]
    pub candidate_attempts: u32,

    /// Backoff unit between candidate attempts (multiplied by the attempt).
    /// Default: 100
    #[serde(default = "IceConfig::default_candidate_backoff_ms")]
    pub candidate_backoff_ms: u64,
}

impl IceConfig {
    fn default_stun_urls() -> Vec<String> {
        vec!["stun:stun.l.google.com:19302".to_string()]
    }

    fn default_port_min() -> u16 {
        49152
    }

    fn default_port_max() -> u16 {
        49252
    }

    fn default_disconnected_timeout_ms() -> u64 {
        45_000
    }

    fn default_failed_timeout_ms() -> u64 {
        60_000
    }

    fn default_keepalive_interval_ms() -> u64 {
        1_000
    }

    fn default_gathering_timeout_ms() -> u64 {
        15_000
    }

    fn default_disconnect_grace_ms() -> u64 {
        30_000
    }

    fn default_candidate_attempts() -> u32 {
        3
    }

    fn default_candidate_backoff_ms() -> u64 {
        100
    }

    pub fn disconnected_timeout(&self) -> Duration {
        Duration::from_millis(self.disconnected_timeout_ms)
    }

    pub fn failed_timeout(&self) -> Duration {
        Duration::from_millis(self.failed_timeout_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn gathering_timeout(&self) -> Duration {
        Duration::from_millis(self.gathering_timeout_ms)
    }

    pub fn disconnect_grace(&self) -> Duration {
        Duration::from_millis(self.disconnect_grace_ms)
    }

    pub fn candidate_backoff(&self) -> Duration {
        Duration::from_millis(self.candidate_backoff_ms)
    }
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_urls: Self::default_stun_urls(),
            turn_urls: Vec::new(),
            turn_username: None,
            turn_credential: None,
            port_min: Self::default_port_min(),
            port_max: Self::default_port_max(),
            disconnected_timeout_ms: Self::default_disconnected_timeout_ms(),
            failed_timeout_ms: Self::default_failed_timeout_ms(),
            keepalive_interval_ms: Self::default_keepalive_interval_ms(),
            gathering_timeout_ms: Self::default_gathering_timeout_ms(),
            disconnect_grace_ms: Self::default_disconnect_grace_ms(),
            candidate_attempts: Self::default_candidate_attempts(),
            candidate_backoff_ms: Self::default_candidate_backoff_ms(),
        }
    }
}

/// Synthesis engine process settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SynthConfig {
    /// Default: scsynth
    #[serde(default = "SynthConfig::default_binary")]
    pub binary: String,

    /// Text preceding the quoted client name in the engine's startup output.
    /// Default: "JackDriver: client name is"
    #[serde(default = "SynthConfig::default_readiness_marker")]
    pub readiness_marker: String,

    /// Output channels wired into the pipeline.
    /// Default: 2
    #[serde(default = "SynthConfig::default_channels")]
    pub channels: u8,

    /// Engine block size; larger tolerates more jitter.
    /// Default: 16
    #[serde(default = "SynthConfig::default_block_size")]
    pub block_size: u32,

    /// Port discovery poll interval.
    /// Default: 100
    #[serde(default = "SynthConfig::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Port discovery timeout.
    /// Default: 10000
    #[serde(default = "SynthConfig::default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,

    /// Default: 10000
    #[serde(default = "SynthConfig::default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,

    /// Interval between `/status` queries while waiting for readiness.
    /// Default: 100
    #[serde(default = "SynthConfig::default_status_interval_ms")]
    pub status_interval_ms: u64,
}

impl SynthConfig {
    fn default_binary() -> String {
        "scsynth".to_string()
    }

    fn default_readiness_marker() -> String {
        "JackDriver: client name is".to_string()
    }

    fn default_channels() -> u8 {
        2
    }

    fn default_block_size() -> u32 {
        16
    }

    fn default_poll_interval_ms() -> u64 {
        100
    }

    fn default_poll_timeout_ms() -> u64 {
        10_000
    }

    fn default_readiness_timeout_ms() -> u64 {
        10_000
    }

    fn default_status_interval_ms() -> u64 {
        100
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_millis(self.status_interval_ms)
    }
}

impl Default for SynthConfig {
    fn default() -> Self {
        Self {
            binary: Self::default_binary(),
            readiness_marker: Self::default_readiness_marker(),
            channels: Self::default_channels(),
            block_size: Self::default_block_size(),
            poll_interval_ms: Self::default_poll_interval_ms(),
            poll_timeout_ms: Self::default_poll_timeout_ms(),
            readiness_timeout_ms: Self::default_readiness_timeout_ms(),
            status_interval_ms: Self::default_status_interval_ms(),
        }
    }
}

/// Encoding pipeline and port-graph tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Default: gst-launch-1.0
    #[serde(default = "PipelineConfig::default_gst_launch")]
    pub gst_launch: String,

    /// Port-graph client name used by every pipeline. Concurrent pipelines
    /// get a numeric suffix from the daemon (`pipeline-2`).
    /// Default: pipeline
    #[serde(default = "PipelineConfig::default_client_prefix")]
    pub client_prefix: String,

    /// Source half of the pipeline. `{session_id}` and `{client}` are
    /// substituted per session.
    #[serde(default = "PipelineConfig::default_source_template")]
    pub source_template: String,

    /// Default: jack_lsp
    #[serde(default = "PipelineConfig::default_jack_lsp")]
    pub jack_lsp: String,

    /// Default: jack_connect
    #[serde(default = "PipelineConfig::default_jack_connect")]
    pub jack_connect: String,

    /// Default: jack_disconnect
    #[serde(default = "PipelineConfig::default_jack_disconnect")]
    pub jack_disconnect: String,
}

impl PipelineConfig {
    fn default_gst_launch() -> String {
        "gst-launch-1.0".to_string()
    }

    fn default_client_prefix() -> String {
        "pipeline".to_string()
    }

    fn default_source_template() -> String {
        "jackaudiosrc name={session_id} client-name={client} connect=0 \
         ! audio/x-raw,rate=48000,channels=2 ! audioconvert \
         ! audioresample quality=10 ! audio/x-raw,rate=48000,channels=2"
            .to_string()
    }

    fn default_jack_lsp() -> String {
        "jack_lsp".to_string()
    }

    fn default_jack_connect() -> String {
        "jack_connect".to_string()
    }

    fn default_jack_disconnect() -> String {
        "jack_disconnect".to_string()
    }

    /// Render the audio source for one session.
    pub fn render_source(&self, session_id: &str) -> String {
        self.source_template
            .replace("{session_id}", session_id)
            .replace("{client}", &self.client_prefix)
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            gst_launch: Self::default_gst_launch(),
            client_prefix: Self::default_client_prefix(),
            source_template: Self::default_source_template(),
            jack_lsp: Self::default_jack_lsp(),
            jack_connect: Self::default_jack_connect(),
            jack_disconnect: Self::default_jack_disconnect(),
        }
    }
}

/// Everything that shapes a single streaming session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default)]
    pub ice: IceConfig,

    #[serde(default)]
    pub synth: SynthConfig,

    #[serde(default)]
    pub pipeline: PipelineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ice_defaults() {
        let ice = IceConfig::default();
        assert_eq!(ice.gathering_timeout(), Duration::from_secs(15));
        assert_eq!(ice.disconnect_grace(), Duration::from_secs(30));
        assert_eq!(ice.candidate_attempts, 3);
        assert_eq!((ice.port_min, ice.port_max), (49152, 49252));
    }

    #[test]
    fn test_synth_defaults() {
        let synth = SynthConfig::default();
        assert_eq!(synth.poll_interval(), Duration::from_millis(100));
        assert_eq!(synth.poll_timeout(), Duration::from_secs(10));
        assert_eq!(synth.readiness_timeout(), Duration::from_secs(10));
        assert_eq!(synth.readiness_marker, "JackDriver: client name is");
    }

    #[test]
    fn test_render_source_contains_session() {
        let pipeline = PipelineConfig::default();
        let source = pipeline.render_source("abc123");
        assert!(source.contains("name=abc123"));
        assert!(source.contains("client-name=pipeline"));
        assert!(!source.contains('{'));
    }
}
