//! Immutable, validated description of one synth process launch.

use crate::error::SessionError;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use synthconf::{SynthConfig, SynthwireConfig};
use tokio::process::Command;

/// Synth settings shared by every session.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthSettings {
    pub synth: SynthConfig,
    pub synthdef_dir: PathBuf,
    pub synth_source_dir: PathBuf,
    pub log_dir: PathBuf,
}

impl SynthSettings {
    pub fn from_config(config: &SynthwireConfig) -> Self {
        Self {
            synth: config.session.synth.clone(),
            synthdef_dir: config.infra.paths.synthdef_dir.clone(),
            synth_source_dir: config.infra.paths.synth_source_dir.clone(),
            log_dir: config.infra.paths.log_dir.clone(),
        }
    }

    pub fn readiness_timeout(&self) -> Duration {
        self.synth.readiness_timeout()
    }

    pub fn status_interval(&self) -> Duration {
        self.synth.status_interval()
    }
}

/// Everything needed to spawn the synth for one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthLaunchConfig {
    program: String,
    args: Vec<String>,
    env: Vec<(String, String)>,
    log_path: PathBuf,
    control_port: u16,
    channels: u8,
}

impl SynthLaunchConfig {
    pub fn new(
        settings: &SynthSettings,
        session_id: &str,
        control_port: u16,
    ) -> Result<Self, SessionError> {
        let synth = &settings.synth;

        if synth.binary.trim().is_empty() {
            return Err(SessionError::LaunchConfig("synth binary is empty".to_string()));
        }
        if control_port == 0 {
            return Err(SessionError::LaunchConfig("control port not allocated".to_string()));
        }
        if synth.channels == 0 {
            return Err(SessionError::LaunchConfig("at least one output channel required".to_string()));
        }
        if synth.block_size == 0 {
            return Err(SessionError::LaunchConfig("block size must be non-zero".to_string()));
        }
        if session_id.is_empty() || session_id.contains(['/', '\\']) {
            return Err(SessionError::LaunchConfig(format!(
                "session id unusable in a log file name: {:?}",
                session_id
            )));
        }
        if settings.log_dir.as_os_str().is_empty() {
            return Err(SessionError::LaunchConfig("log dir is empty".to_string()));
        }

        let args = [
            ("-u", control_port.to_string()),
            ("-H", "0.0.0.0".to_string()),
            ("-a", "1024".to_string()),
            ("-i", "0".to_string()),
            ("-o", synth.channels.to_string()),
            ("-b", "1026".to_string()),
            ("-R", "0".to_string()),
            ("-C", "0".to_string()),
            ("-l", "1".to_string()),
            ("-z", synth.block_size.to_string()),
            ("-P", "70".to_string()),
            ("-V", "0".to_string()),
        ]
        .into_iter()
        .flat_map(|(flag, value)| [flag.to_string(), value])
        .collect();

        let env = vec![
            (
                "SC_SYNTHDEF_PATH".to_string(),
                settings.synthdef_dir.to_string_lossy().into_owned(),
            ),
            ("JACK_START_SERVER".to_string(), "false".to_string()),
            ("JACK_NO_START_SERVER".to_string(), "true".to_string()),
        ];

        Ok(Self {
            program: synth.binary.clone(),
            args,
            env,
            log_path: settings.log_dir.join(format!("scsynth_{}.log", session_id)),
            control_port,
            channels: synth.channels,
        })
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn env(&self) -> &[(String, String)] {
        &self.env
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn control_port(&self) -> u16 {
        self.control_port
    }

    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Command with stdout and stderr piped for the readiness scanner.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .envs(self.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}
