//! Offer/answer handling for a session.
//!
//! ## Offer flow
//!
//! ```text
//! Idle → OfferReceived → ConnectionCreated → SessionBound → MediaAttached
//!   → RemoteSet → AnswerCreated → SubsystemsStarting → GatheringCandidates
//!   → Answered
//! ```
//!
//! Any failure after the connection exists moves the session to `Aborted`
//! and tears down whatever was acquired.

pub mod listener;
pub mod state;

pub use listener::spawn_state_listener;
pub use state::NegotiationState;

use crate::error::SessionError;
use crate::monitor::Monitor;
use crate::peer::{IceCandidate, IceServer, MediaSink, PeerConnector, PeerLink, SessionDescription};
use crate::pipeline::{PipelineLauncher, OPUS};
use crate::session::Session;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use synthconf::IceConfig;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

const STUN_SCHEMES: &[&str] = &["stun:", "stuns:"];
const TURN_SCHEMES: &[&str] = &["turn:", "turns:"];

/// Body of `POST /offer`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferRequest {
    pub sdp: String,
    #[serde(rename = "type")]
    pub sdp_type: String,
    #[serde(default, rename = "iceServers")]
    pub ice_servers: Vec<IceServer>,
}

/// ICE servers described by configuration, in browser shape.
pub fn configured_ice_servers(ice: &IceConfig) -> Vec<IceServer> {
    let mut servers = Vec::new();
    if !ice.stun_urls.is_empty() {
        servers.push(IceServer {
            urls: ice.stun_urls.clone(),
            ..Default::default()
        });
    }
    if !ice.turn_urls.is_empty() {
        servers.push(IceServer {
            urls: ice.turn_urls.clone(),
            username: ice.turn_username.clone(),
            credential: ice.turn_credential.clone(),
        });
    }
    servers
}

/// STUN is required; missing TURN is only worth a warning.
pub fn validate_ice_servers(servers: &[IceServer]) -> Result<(), SessionError> {
    if !servers.iter().any(|s| s.has_scheme(STUN_SCHEMES)) {
        return Err(SessionError::NoSTUNConfigured);
    }
    if !servers.iter().any(|s| s.has_scheme(TURN_SCHEMES)) {
        warn!("{}; clients behind symmetric NAT may not connect", SessionError::NoTURNConfigured);
    }
    Ok(())
}

pub struct Orchestrator {
    connector: Arc<dyn PeerConnector>,
    pipelines: Arc<dyn PipelineLauncher>,
    ice: IceConfig,
    monitor: Option<Monitor>,
}

impl Orchestrator {
    pub fn new(
        connector: Arc<dyn PeerConnector>,
        pipelines: Arc<dyn PipelineLauncher>,
        ice: IceConfig,
    ) -> Self {
        Self {
            connector,
            pipelines,
            ice,
            monitor: None,
        }
    }

    pub fn with_monitor(mut self, monitor: Monitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn ice(&self) -> &IceConfig {
        &self.ice
    }

    pub async fn handle_offer(
        &self,
        session: &Arc<Session>,
        offer: OfferRequest,
    ) -> Result<SessionDescription, SessionError> {
        let id = session.id().clone();
        session.set_phase(NegotiationState::OfferReceived).await;
        info!("📨 [{}] offer received", id);

        if offer.sdp_type != "offer" {
            session.set_phase(NegotiationState::Aborted).await;
            return Err(SessionError::InvalidDescription(format!(
                "expected type \"offer\", got {:?}",
                offer.sdp_type
            )));
        }
        if offer.sdp.trim().is_empty() {
            session.set_phase(NegotiationState::Aborted).await;
            return Err(SessionError::InvalidDescription("empty SDP".to_string()));
        }

        let servers = if offer.ice_servers.is_empty() {
            configured_ice_servers(&self.ice)
        } else {
            offer.ice_servers
        };
        if let Err(e) = validate_ice_servers(&servers) {
            session.set_phase(NegotiationState::Aborted).await;
            return Err(e);
        }

        let link = match self.connector.connect(&servers).await {
            Ok(link) => link,
            Err(e) => {
                session.set_phase(NegotiationState::Aborted).await;
                return Err(SessionError::ConnectionCreateFailed(format!("{:#}", e)));
            }
        };
        session.set_phase(NegotiationState::ConnectionCreated).await;

        match self.negotiate(session, link.clone(), offer.sdp).await {
            Ok(answer) => {
                session.set_phase(NegotiationState::Answered).await;
                info!("✅ [{}] answered", id);
                Ok(answer)
            }
            Err(e) => {
                warn!("[{}] offer aborted: {}", id, e);
                session.set_phase(NegotiationState::Aborted).await;
                if session.is_bound_to(&link).await {
                    session.teardown().await;
                } else if let Err(close) = link.close().await {
                    debug!("[{}] closing unbound connection: {:#}", id, close);
                }
                Err(e)
            }
        }
    }

    async fn negotiate(
        &self,
        session: &Arc<Session>,
        link: Arc<dyn PeerLink>,
        sdp: String,
    ) -> Result<SessionDescription, SessionError> {
        session.bind_connection(link.clone()).await;

        let sink = link
            .add_audio_track()
            .await
            .map_err(|e| SessionError::MediaAttachFailed(format!("{:#}", e)))?;
        session.set_phase(NegotiationState::MediaAttached).await;

        spawn_state_listener(session.clone(), link.clone(), self.ice.disconnect_grace());

        link.set_remote_description(&SessionDescription::offer(sdp))
            .await
            .map_err(|e| SessionError::RemoteDescriptionFailed(format!("{:#}", e)))?;
        session.set_phase(NegotiationState::RemoteSet).await;

        let answer = link
            .create_answer()
            .await
            .map_err(|e| SessionError::AnswerCreateFailed(format!("{:#}", e)))?;
        link.set_local_description(&answer)
            .await
            .map_err(|e| SessionError::AnswerCreateFailed(format!("{:#}", e)))?;
        session.set_phase(NegotiationState::AnswerCreated).await;

        session.set_phase(NegotiationState::SubsystemsStarting).await;
        self.start_subsystems(session, sink).await?;

        if let Some(monitor) = &self.monitor {
            monitor.spawn(session.clone(), link.clone());
        }

        session.set_phase(NegotiationState::GatheringCandidates).await;
        self.await_gathering(session, &link).await?;

        Ok(link.local_description().await.unwrap_or(answer))
    }

    /// Pipeline and synth start together; the synth waits on the
    /// pipeline's ports, so neither can go first. The first failure wins and
    /// drops the other start; teardown reclaims whatever either left behind.
    async fn start_subsystems(
        &self,
        session: &Arc<Session>,
        sink: Arc<dyn MediaSink>,
    ) -> Result<(), SessionError> {
        let synth = session.synth();
        session.mark_synth_started().await;

        let pipeline = async {
            let mut pipeline = self.pipelines.create(OPUS, sink, session.audio_source())?;
            let started = pipeline.start().await;
            session.set_pipeline(pipeline).await;
            started
        };

        tokio::try_join!(pipeline, synth.start())?;

        if let Some(name) = synth.client_name().wait().await {
            session.set_client_name(name).await;
        }

        let synthdef = synth.send_play_message().await?;
        info!("🎶 [{}] subsystems up, playing {}", session.id(), synthdef);
        Ok(())
    }

    async fn await_gathering(
        &self,
        session: &Arc<Session>,
        link: &Arc<dyn PeerLink>,
    ) -> Result<(), SessionError> {
        let wait = self.ice.gathering_timeout();
        if timeout(wait, link.gathering_complete()).await.is_ok() {
            debug!("[{}] candidate gathering complete", session.id());
            return Ok(());
        }

        session.record_succeeded_pairs(link.succeeded_pairs().await);
        let pairs = session.succeeded_pairs();
        if pairs == 0 {
            return Err(SessionError::GatheringTimeoutNoCandidates(wait));
        }
        warn!(
            "[{}] gathering timed out after {:?}, continuing with {} succeeded pair(s)",
            session.id(),
            wait,
            pairs
        );
        Ok(())
    }

    /// Apply a trickled candidate, retrying while the connection settles.
    pub async fn add_candidate(
        &self,
        session: &Arc<Session>,
        candidate: IceCandidate,
    ) -> Result<(), SessionError> {
        let attempts = self.ice.candidate_attempts.max(1);
        let mut reason = String::new();

        for attempt in 1..=attempts {
            match session.connection().await {
                Some(link) => match link.add_ice_candidate(&candidate).await {
                    Ok(()) => {
                        debug!("[{}] candidate added on attempt {}", session.id(), attempt);
                        return Ok(());
                    }
                    Err(e) => reason = format!("{:#}", e),
                },
                None => reason = "no connection bound".to_string(),
            }

            if attempt < attempts {
                debug!("[{}] candidate attempt {} failed: {}", session.id(), attempt, reason);
                sleep(self.ice.candidate_backoff() * attempt).await;
            }
        }

        Err(SessionError::CandidateAddFailed { attempts, reason })
    }

    /// Client-requested stop. Never fails.
    pub async fn stop(&self, session: &Arc<Session>) {
        info!("🛑 [{}] stop requested", session.id());
        session.teardown().await;
        session.set_phase(NegotiationState::Idle).await;
    }
}
