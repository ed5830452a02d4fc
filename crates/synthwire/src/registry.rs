//! Session registry: one `Session` per client-supplied id.

use crate::error::SessionError;
use crate::session::{Session, SessionId};
use crate::synth::SynthFactory;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use synthconf::PipelineConfig;
use tracing::info;

pub struct SessionRegistry {
    sessions: Mutex<HashMap<SessionId, Arc<Session>>>,
    pipeline: PipelineConfig,
    synths: Arc<dyn SynthFactory>,
}

impl SessionRegistry {
    pub fn new(pipeline: PipelineConfig, synths: Arc<dyn SynthFactory>) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            pipeline,
            synths,
        }
    }

    /// The session for `id`, created on first use.
    ///
    /// Sessions are never removed; a returning client gets the same
    /// instance back.
    pub fn get_or_create(&self, id: Option<&str>) -> Result<Arc<Session>, SessionError> {
        let id = SessionId::new(id.ok_or(SessionError::MissingIdentifier)?)?;

        let mut sessions = self.sessions.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(session) = sessions.get(&id) {
            return Ok(session.clone());
        }

        let audio_source = self.pipeline.render_source(id.as_str());
        let synth = self.synths.build(&id);
        let session = Arc::new(Session::new(id.clone(), audio_source, synth));
        sessions.insert(id.clone(), session.clone());

        info!("📋 [{}] session created ({} total)", id, sessions.len());
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let id = SessionId::new(id).ok()?;
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of every session, for shutdown.
    pub fn sessions(&self) -> Vec<Arc<Session>> {
        self.sessions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }
}
