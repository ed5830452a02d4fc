//! Error taxonomy for session setup and teardown.
//!
//! Startup-path variants abort the current offer and reach the caller.
//! `NoTURNConfigured` and `CleanupError` are only ever logged.

use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("no session id provided (X-Session-ID header required)")]
    MissingIdentifier,

    #[error("invalid session id: {0}")]
    InvalidIdentifier(String),

    #[error("no STUN server configured")]
    NoSTUNConfigured,

    #[error("no TURN server configured")]
    NoTURNConfigured,

    #[error("failed to create peer connection: {0}")]
    ConnectionCreateFailed(String),

    #[error("failed to attach media track: {0}")]
    MediaAttachFailed(String),

    #[error("failed to set remote description: {0}")]
    RemoteDescriptionFailed(String),

    #[error("failed to create answer: {0}")]
    AnswerCreateFailed(String),

    #[error("timed out after {waited:?} waiting for pipeline ports of session {session_id}")]
    UpstreamPortsTimeout { session_id: String, waited: Duration },

    #[error("synth did not become ready within {0:?}")]
    ReadinessTimeout(Duration),

    #[error("timed out after {waited:?} waiting for output ports of {client}")]
    SynthPortsTimeout { client: String, waited: Duration },

    #[error("failed to connect {from} -> {to}: {reason}")]
    PortWireFailure {
        from: String,
        to: String,
        reason: String,
    },

    #[error("ICE gathering timed out after {0:?} with no succeeded candidate pairs")]
    GatheringTimeoutNoCandidates(Duration),

    #[error("failed to add ICE candidate after {attempts} attempts: {reason}")]
    CandidateAddFailed { attempts: u32, reason: String },

    #[error("cleanup failed: {0}")]
    CleanupError(String),

    #[error("failed to disconnect {} port pair(s): {}", .0.len(), .0.join("; "))]
    PortDisconnectFailures(Vec<String>),

    #[error("port graph command failed: {0}")]
    PortGraph(String),

    #[error("invalid synth launch config: {0}")]
    LaunchConfig(String),

    #[error("failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("no synthdefs found in {}", .0.display())]
    NoSynthDefs(PathBuf),

    #[error("synth control message failed: {0}")]
    ControlFailed(String),

    #[error("pipeline failed: {0}")]
    PipelineFailed(String),

    #[error("invalid session description: {0}")]
    InvalidDescription(String),

    #[error("no peer connection for session {0}")]
    NoConnection(String),

    #[error("no synth code found for {0}")]
    SynthCodeNotFound(String),
}

impl SessionError {
    /// True for errors caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            SessionError::MissingIdentifier
                | SessionError::InvalidIdentifier(_)
                | SessionError::NoSTUNConfigured
                | SessionError::InvalidDescription(_)
        )
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SessionError::NoConnection(_) | SessionError::SynthCodeNotFound(_)
        )
    }
}
