//! Access to the port-graph daemon.
//!
//! The daemon is driven through its command-line tools; `PortGraph` is the
//! seam so the router can be exercised against a scripted graph.

use anyhow::{Context, Result};
use async_trait::async_trait;
use synthconf::PipelineConfig;
use tokio::process::Command;
use tracing::debug;

#[async_trait]
pub trait PortGraph: Send + Sync {
    /// One line per port.
    async fn list_ports(&self) -> Result<String>;

    /// Each port followed by its indented peers.
    async fn list_connections(&self) -> Result<String>;

    async fn connect(&self, from: &str, to: &str) -> Result<()>;

    async fn disconnect(&self, a: &str, b: &str) -> Result<()>;
}

/// JACK command-line tools (`jack_lsp`, `jack_connect`, `jack_disconnect`).
#[derive(Debug, Clone)]
pub struct JackCli {
    lsp: String,
    connect: String,
    disconnect: String,
}

impl JackCli {
    pub fn new(config: &PipelineConfig) -> Self {
        Self {
            lsp: config.jack_lsp.clone(),
            connect: config.jack_connect.clone(),
            disconnect: config.jack_disconnect.clone(),
        }
    }

    async fn run(program: &str, args: &[&str]) -> Result<String> {
        debug!("running {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .with_context(|| format!("failed to run {}", program))?;

        if !output.status.success() {
            anyhow::bail!(
                "{} {} exited with {}: {}",
                program,
                args.join(" "),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[async_trait]
impl PortGraph for JackCli {
    async fn list_ports(&self) -> Result<String> {
        Self::run(&self.lsp, &[]).await
    }

    async fn list_connections(&self) -> Result<String> {
        Self::run(&self.lsp, &["-c"]).await
    }

    async fn connect(&self, from: &str, to: &str) -> Result<()> {
        Self::run(&self.connect, &[from, to]).await.map(|_| ())
    }

    async fn disconnect(&self, a: &str, b: &str) -> Result<()> {
        Self::run(&self.disconnect, &[a, b]).await.map(|_| ())
    }
}
