//! Synthesis engine supervision.
//!
//! One synth process runs per session. It is launched with a fixed argument
//! set, declared ready once its startup output names its audio client and it
//! answers a status query, then wired into the session's pipeline.
//!
//! ## Lifecycle
//!
//! ```text
//! NotStarted → PortAllocated → WaitingForUpstreamPorts → ProcessSpawned
//!   → WaitingForReadySignal → WaitingForOwnPorts → PortsConnected → Running
//!   → Stopping → Stopped
//! ```
//!
//! A stopped supervisor can be started again for the next offer.

pub mod catalog;
pub mod control;
pub mod launch;
pub mod readiness;
pub mod supervisor;

pub use catalog::SynthCatalog;
pub use control::OscControl;
pub use launch::{SynthLaunchConfig, SynthSettings};
pub use readiness::{MarkerMatcher, ReadinessMatcher};
pub use supervisor::{SupervisorFactory, SynthSupervisor};

use crate::error::SessionError;
use crate::session::SessionId;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    NotStarted,
    PortAllocated,
    WaitingForUpstreamPorts,
    ProcessSpawned,
    WaitingForReadySignal,
    WaitingForOwnPorts,
    PortsConnected,
    Running,
    Stopping,
    Stopped,
}

impl SupervisorState {
    /// Nothing to release in this state.
    pub fn is_idle(self) -> bool {
        matches!(self, SupervisorState::NotStarted | SupervisorState::Stopped)
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What a session needs from its synth.
#[async_trait]
pub trait Synth: Send + Sync {
    /// Launch, wait for readiness, and wire into the pipeline.
    async fn start(&self) -> Result<(), SessionError>;

    /// Release everything. Safe on a synth that never started.
    async fn stop(&self) -> Result<(), SessionError>;

    /// UDP port of the control protocol, once allocated.
    fn control_port(&self) -> Option<u16>;

    /// Start a randomly chosen synthdef sounding; returns its id.
    async fn send_play_message(&self) -> Result<String, SessionError>;

    /// Resolves once the running process reports its audio client name.
    fn client_name(&self) -> ClientName;

    /// Id of the synthdef last started by `send_play_message`.
    fn current_synth(&self) -> Option<String>;

    fn state(&self) -> SupervisorState;
}

/// Builds the synth handle for a new session.
pub trait SynthFactory: Send + Sync {
    fn build(&self, session_id: &SessionId) -> Arc<dyn Synth>;
}

/// Write side of the client-name handshake.
///
/// Resolves at most once per run; `reset` re-arms it for the next start.
#[derive(Debug)]
pub struct ClientNameSlot {
    tx: watch::Sender<Option<String>>,
}

impl ClientNameSlot {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    /// Returns false if the slot was already resolved.
    pub fn resolve(&self, name: impl Into<String>) -> bool {
        let name = name.into();
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(name);
            true
        })
    }

    pub fn reset(&self) {
        self.tx.send_replace(None);
    }

    pub fn subscribe(&self) -> ClientName {
        ClientName {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for ClientNameSlot {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of the client-name handshake.
#[derive(Debug, Clone)]
pub struct ClientName {
    rx: watch::Receiver<Option<String>>,
}

impl ClientName {
    /// The name, if already known.
    pub fn current(&self) -> Option<String> {
        self.rx.borrow().clone()
    }

    /// Wait until the name is known. `None` if the synth went away first.
    pub async fn wait(&mut self) -> Option<String> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(name) => name.clone(),
            Err(_) => None,
        }
    }
}
