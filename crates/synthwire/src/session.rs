//! Per-user session state and teardown.
//!
//! A session outlives individual offers: each new offer binds a fresh peer
//! connection and re-arms the teardown signal, while the synth handle and
//! audio source stay with the session for its lifetime.

use crate::error::SessionError;
use crate::negotiation::NegotiationState;
use crate::peer::PeerLink;
use crate::pipeline::PipelineHandle;
use crate::synth::Synth;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Longest identifier accepted from a client.
pub const MAX_SESSION_ID_LEN: usize = 64;

/// Client-chosen session identifier.
///
/// The id is spliced into the pipeline description, port names and log file
/// names, so it is limited to ASCII letters, digits, `-` and `_`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Result<Self, SessionError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(SessionError::MissingIdentifier);
        }
        if id.len() > MAX_SESSION_ID_LEN {
            return Err(SessionError::InvalidIdentifier(format!(
                "longer than {} characters",
                MAX_SESSION_ID_LEN
            )));
        }
        if let Some(c) = id
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '-' || *c == '_'))
        {
            return Err(SessionError::InvalidIdentifier(format!(
                "character {:?} not allowed",
                c
            )));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fires once per arming; background tasks of the current connection watch it.
#[derive(Debug)]
pub struct TeardownSignal {
    token: StdMutex<CancellationToken>,
    closed: AtomicBool,
}

impl TeardownSignal {
    fn new() -> Self {
        Self {
            token: StdMutex::new(CancellationToken::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn token(&self) -> CancellationToken {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Returns true for the caller that actually closed it.
    pub fn close(&self) -> bool {
        if self
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.token().cancel();
        true
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Install a fresh token for the next connection.
    pub fn rearm(&self) {
        let mut token = self.token.lock().unwrap_or_else(PoisonError::into_inner);
        *token = CancellationToken::new();
        self.closed.store(false, Ordering::Release);
    }
}

struct SessionState {
    phase: NegotiationState,
    connection: Option<Arc<dyn PeerLink>>,
    pipeline: Option<Box<dyn PipelineHandle>>,
    client_name: Option<String>,
    synth_started: bool,
}

pub struct Session {
    id: SessionId,
    audio_source: String,
    synth: Arc<dyn Synth>,
    state: RwLock<SessionState>,
    signal: TeardownSignal,
    succeeded_pairs: AtomicUsize,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("audio_source", &self.audio_source)
            .finish_non_exhaustive()
    }
}

impl Session {
    pub fn new(id: SessionId, audio_source: impl Into<String>, synth: Arc<dyn Synth>) -> Self {
        Self {
            id,
            audio_source: audio_source.into(),
            synth,
            state: RwLock::new(SessionState {
                phase: NegotiationState::Idle,
                connection: None,
                pipeline: None,
                client_name: None,
                synth_started: false,
            }),
            signal: TeardownSignal::new(),
            succeeded_pairs: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn audio_source(&self) -> &str {
        &self.audio_source
    }

    pub fn synth(&self) -> Arc<dyn Synth> {
        self.synth.clone()
    }

    pub fn signal(&self) -> &TeardownSignal {
        &self.signal
    }

    pub async fn phase(&self) -> NegotiationState {
        self.state.read().await.phase
    }

    pub async fn set_phase(&self, phase: NegotiationState) {
        let mut state = self.state.write().await;
        if state.phase != phase {
            debug!("[{}] negotiation {} -> {}", self.id, state.phase, phase);
            state.phase = phase;
        }
    }

    pub async fn connection(&self) -> Option<Arc<dyn PeerLink>> {
        self.state.read().await.connection.clone()
    }

    pub async fn is_bound_to(&self, link: &Arc<dyn PeerLink>) -> bool {
        self.state
            .read()
            .await
            .connection
            .as_ref()
            .is_some_and(|bound| Arc::ptr_eq(bound, link))
    }

    /// Make `link` the session's connection. Anything left from a previous
    /// offer is torn down first.
    pub async fn bind_connection(&self, link: Arc<dyn PeerLink>) {
        if self.has_resources().await {
            info!("[{}] replacing previous connection", self.id);
            self.teardown().await;
        }
        self.signal.rearm();
        self.succeeded_pairs.store(0, Ordering::Release);

        let mut state = self.state.write().await;
        state.connection = Some(link);
        state.phase = NegotiationState::SessionBound;
    }

    async fn has_resources(&self) -> bool {
        let state = self.state.read().await;
        state.connection.is_some() || state.pipeline.is_some() || state.synth_started
    }

    pub async fn set_pipeline(&self, pipeline: Box<dyn PipelineHandle>) {
        self.state.write().await.pipeline = Some(pipeline);
    }

    /// Called before the synth starts so a partial start still gets stopped.
    pub async fn mark_synth_started(&self) {
        self.state.write().await.synth_started = true;
    }

    pub async fn set_client_name(&self, name: String) {
        self.state.write().await.client_name = Some(name);
    }

    pub async fn client_name(&self) -> Option<String> {
        self.state.read().await.client_name.clone()
    }

    pub fn succeeded_pairs(&self) -> usize {
        self.succeeded_pairs.load(Ordering::Acquire)
    }

    pub fn record_succeeded_pairs(&self, count: usize) {
        self.succeeded_pairs.fetch_max(count, Ordering::AcqRel);
    }

    /// Release everything the current offer acquired, in order: signal,
    /// pipeline, synth, connection. Safe to call any number of times.
    pub async fn teardown(&self) {
        let closed_now = self.signal.close();

        let (pipeline, connection, synth_started) = {
            let mut state = self.state.write().await;
            state.client_name = None;
            (
                state.pipeline.take(),
                state.connection.take(),
                std::mem::take(&mut state.synth_started),
            )
        };

        if pipeline.is_none() && connection.is_none() && !synth_started {
            if closed_now {
                debug!("[{}] teardown: nothing to release", self.id);
            }
            return;
        }

        info!("🧹 [{}] tearing down session", self.id);

        if let Some(mut pipeline) = pipeline {
            if let Err(e) = pipeline.stop().await {
                warn!("[{}] {}", self.id, SessionError::CleanupError(format!("pipeline: {}", e)));
            }
        }

        if synth_started {
            if let Err(e) = self.synth.stop().await {
                warn!("[{}] {}", self.id, SessionError::CleanupError(format!("synth: {}", e)));
            }
        }

        if let Some(connection) = connection {
            if let Err(e) = connection.close().await {
                warn!("[{}] {}", self.id, SessionError::CleanupError(format!("connection: {:#}", e)));
            }
        }

        info!("[{}] teardown complete", self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_rejects_empty() {
        assert!(matches!(SessionId::new(""), Err(SessionError::MissingIdentifier)));
        assert!(matches!(SessionId::new("   "), Err(SessionError::MissingIdentifier)));
        assert_eq!(SessionId::new("abc123").unwrap().as_str(), "abc123");
    }

    #[test]
    fn test_session_id_rejects_pipeline_syntax() {
        for hostile in [
            "x ! filesink location=/tmp/out ! fakesrc name=y",
            "abc;rm",
            "../../etc",
            "abc:in_1",
            "caf\u{e9}",
        ] {
            assert!(
                matches!(SessionId::new(hostile), Err(SessionError::InvalidIdentifier(_))),
                "{:?} accepted",
                hostile
            );
        }
        let too_long = "a".repeat(MAX_SESSION_ID_LEN + 1);
        assert!(matches!(SessionId::new(too_long), Err(SessionError::InvalidIdentifier(_))));
        assert!(SessionId::new("a".repeat(MAX_SESSION_ID_LEN)).is_ok());
        assert!(SessionId::new("Sess_01-xyz").is_ok());
    }

    #[test]
    fn test_signal_closes_once_per_arming() {
        let signal = TeardownSignal::new();
        let token = signal.token();

        assert!(signal.close());
        assert!(!signal.close());
        assert!(token.is_cancelled());
        assert!(signal.is_closed());

        signal.rearm();
        assert!(!signal.is_closed());
        assert!(!signal.token().is_cancelled());
        assert!(signal.close());
    }

    #[test]
    fn test_concurrent_close_has_one_winner() {
        let signal = Arc::new(TeardownSignal::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let signal = signal.clone();
                std::thread::spawn(move || signal.close())
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }
}
