//! Audio port routing between the encoding pipeline and the synth.
//!
//! Neither process announces its ports, so everything here is discovered by
//! listing the graph:
//!
//! - **Upstream ports**: the pipeline's inputs, named
//!   `<prefix>[-N]:in_<session>_<channel>`
//! - **Synth ports**: `<client>:out_<channel>` once the synth reports its client name
//! - **Teardown**: every connection touching this session's ports is removed,
//!   each undirected pair exactly once

pub mod graph;
pub mod listing;
pub mod poll;

pub use graph::{JackCli, PortGraph};
pub use poll::{poll_until, PollTimeout};

use crate::error::SessionError;
use regex::Regex;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub struct PortRouter {
    graph: Arc<dyn PortGraph>,
    client_prefix: String,
    poll_interval: Duration,
    poll_timeout: Duration,
}

impl PortRouter {
    pub fn new(
        graph: Arc<dyn PortGraph>,
        client_prefix: impl Into<String>,
        poll_interval: Duration,
        poll_timeout: Duration,
    ) -> Self {
        Self {
            graph,
            client_prefix: client_prefix.into(),
            poll_interval,
            poll_timeout,
        }
    }

    pub fn graph(&self) -> Arc<dyn PortGraph> {
        self.graph.clone()
    }

    async fn ports(&self) -> Result<Vec<String>, SessionError> {
        let listing = self
            .graph
            .list_ports()
            .await
            .map_err(|e| SessionError::PortGraph(format!("{:#}", e)))?;
        Ok(listing::parse_ports(&listing))
    }

    /// Pipeline ports that belong to `session_id`.
    pub async fn list_upstream_ports(&self, session_id: &str) -> Result<Vec<String>, SessionError> {
        let ports = self.ports().await?;
        Ok(upstream_ports(&ports, &self.client_prefix, session_id))
    }

    /// Poll until the pipeline for `session_id` has registered its inputs.
    pub async fn wait_for_upstream_ports(&self, session_id: &str) -> Result<Vec<String>, SessionError> {
        let found = poll_until(self.poll_interval, self.poll_timeout, move || async move {
            match self.list_upstream_ports(session_id).await {
                Ok(ports) if !ports.is_empty() => Some(ports),
                Ok(_) => None,
                Err(e) => {
                    debug!("port listing failed while waiting for {}: {}", session_id, e);
                    None
                }
            }
        })
        .await
        .map_err(|t| SessionError::UpstreamPortsTimeout {
            session_id: session_id.to_string(),
            waited: t.waited,
        })?;

        debug!("upstream ports for {}: {:?}", session_id, found);
        Ok(found)
    }

    /// Poll until `client` has registered its output ports.
    pub async fn wait_for_client_ports(&self, client: &str) -> Result<Vec<String>, SessionError> {
        let prefix = format!("{}:out_", client);
        let prefix = prefix.as_str();
        poll_until(self.poll_interval, self.poll_timeout, move || async move {
            match self.ports().await {
                Ok(ports) => {
                    let outputs: Vec<String> =
                        ports.into_iter().filter(|p| p.starts_with(prefix)).collect();
                    (!outputs.is_empty()).then_some(outputs)
                }
                Err(e) => {
                    debug!("port listing failed while waiting for {}: {}", client, e);
                    None
                }
            }
        })
        .await
        .map_err(|t| SessionError::SynthPortsTimeout {
            client: client.to_string(),
            waited: t.waited,
        })
    }

    /// The pipeline's actual client name for `session_id`, including any
    /// numeric suffix the daemon assigned.
    pub async fn resolve_pipeline_client(&self, session_id: &str) -> Result<Option<String>, SessionError> {
        let ports = self.ports().await?;
        Ok(pipeline_client(&ports, &self.client_prefix, session_id))
    }

    /// Connect `<synth>:out_i` to the session's pipeline `in_<session>_i`
    /// for each channel. The first failing pair aborts.
    pub async fn connect_synth_outputs(
        &self,
        session_id: &str,
        synth_client: &str,
        channels: u8,
    ) -> Result<(), SessionError> {
        let pipeline = self
            .resolve_pipeline_client(session_id)
            .await?
            .ok_or_else(|| SessionError::PortWireFailure {
                from: format!("{}:out_1", synth_client),
                to: format!("{}:in_{}_1", self.client_prefix, session_id),
                reason: "no pipeline client found for session".to_string(),
            })?;

        for channel in 1..=channels {
            let from = format!("{}:out_{}", synth_client, channel);
            let to = format!("{}:in_{}_{}", pipeline, session_id, channel);
            self.graph
                .connect(&from, &to)
                .await
                .map_err(|e| SessionError::PortWireFailure {
                    from: from.clone(),
                    to: to.clone(),
                    reason: format!("{:#}", e),
                })?;
            info!("🔌 [{}] connected {} -> {}", session_id, from, to);
        }

        Ok(())
    }

    /// Remove every connection touching this session's pipeline inputs or
    /// the synth's ports. Returns the number of pairs disconnected.
    ///
    /// The synth client is only matched when its name contains the session
    /// id; a shared name would reach into other sessions.
    pub async fn disconnect_session_ports(
        &self,
        session_id: &str,
        synth_client: Option<&str>,
    ) -> Result<usize, SessionError> {
        let listing = self
            .graph
            .list_connections()
            .await
            .map_err(|e| SessionError::PortGraph(format!("{:#}", e)))?;
        let graph = listing::parse_connections(&listing);

        let synth_prefix = synth_client
            .filter(|client| client.contains(session_id))
            .map(|client| format!("{}:", client));

        let belongs = |port: &str| {
            is_session_input(port, &self.client_prefix, session_id)
                || synth_prefix
                    .as_deref()
                    .is_some_and(|prefix| port.starts_with(prefix))
        };

        let mut disconnected = 0;
        let mut failures = Vec::new();
        for (a, b) in listing::unique_pairs(&graph) {
            if !(belongs(&a) || belongs(&b)) {
                continue;
            }
            match self.graph.disconnect(&a, &b).await {
                Ok(()) => {
                    debug!("[{}] disconnected {} <-> {}", session_id, a, b);
                    disconnected += 1;
                }
                Err(e) => {
                    warn!("[{}] failed to disconnect {} <-> {}: {:#}", session_id, a, b, e);
                    failures.push(format!("{} <-> {}: {:#}", a, b, e));
                }
            }
        }

        if failures.is_empty() {
            Ok(disconnected)
        } else {
            Err(SessionError::PortDisconnectFailures(failures))
        }
    }
}

fn client_part(port: &str) -> &str {
    port.split_once(':').map(|(client, _)| client).unwrap_or(port)
}

/// `<prefix>` or `<prefix>-<digits>`.
fn is_pipeline_client(client: &str, prefix: &str) -> bool {
    match client.strip_prefix(prefix) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('-')
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit())),
        None => false,
    }
}

/// `<prefix>[-N]:in_<session>_<channel>`. The trailing `_` keeps `abc` from
/// matching the ports of `abc123`.
fn is_session_input(port: &str, prefix: &str, session_id: &str) -> bool {
    is_pipeline_client(client_part(port), prefix)
        && port.contains(&format!(":in_{}_", session_id))
}

/// The pipeline's input ports for this session.
pub fn upstream_ports(ports: &[String], prefix: &str, session_id: &str) -> Vec<String> {
    ports
        .iter()
        .filter(|p| is_session_input(p, prefix, session_id))
        .cloned()
        .collect()
}

/// Client name owning this session's pipeline inputs.
pub fn pipeline_client(ports: &[String], prefix: &str, session_id: &str) -> Option<String> {
    let pattern = format!(
        r"^({}(?:-\d+)?):in_{}_",
        regex::escape(prefix),
        regex::escape(session_id)
    );
    let re = Regex::new(&pattern).ok()?;
    ports
        .iter()
        .find_map(|p| re.captures(p).map(|c| c[1].to_string()))
}
