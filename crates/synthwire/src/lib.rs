//! synthwire - per-session WebRTC audio from a supervised synth.
//!
//! Library exposing the session machinery for the binary and for tests.

pub mod error;
pub mod monitor;
pub mod negotiation;
pub mod peer;
pub mod pipeline;
pub mod ports;
pub mod registry;
pub mod session;
pub mod synth;
pub mod telemetry;
pub mod web;

pub use error::SessionError;
pub use negotiation::{NegotiationState, OfferRequest, Orchestrator};
pub use registry::SessionRegistry;
pub use session::{Session, SessionId};

use std::sync::Arc;
use std::time::Duration;
use synthconf::SynthwireConfig;

/// Wire the production collaborators together from configuration.
pub fn build_web_state(config: &SynthwireConfig) -> web::WebState {
    let session = &config.session;

    let graph: Arc<dyn ports::PortGraph> = Arc::new(ports::JackCli::new(&session.pipeline));
    let router = Arc::new(ports::PortRouter::new(
        graph.clone(),
        session.pipeline.client_prefix.clone(),
        session.synth.poll_interval(),
        session.synth.poll_timeout(),
    ));

    let settings = Arc::new(synth::SynthSettings::from_config(config));
    let matcher = Arc::new(synth::MarkerMatcher::new(session.synth.readiness_marker.clone()));
    let synths = Arc::new(synth::SupervisorFactory::new(settings, router, matcher));
    let registry = Arc::new(SessionRegistry::new(session.pipeline.clone(), synths));

    let orchestrator = Orchestrator::new(
        Arc::new(peer::WebRtcConnector::new(session.ice.clone())),
        Arc::new(pipeline::GstLauncher::new(session.pipeline.gst_launch.clone())),
        session.ice.clone(),
    )
    .with_monitor(monitor::Monitor::new(graph));

    web::WebState {
        registry,
        orchestrator: Arc::new(orchestrator),
        catalog: synth::SynthCatalog::new(
            &config.infra.paths.synthdef_dir,
            &config.infra.paths.synth_source_dir,
        ),
        environment: config.environment,
    }
}

/// Tear down every session, giving up after `limit`.
pub async fn shutdown_sessions(registry: &SessionRegistry, limit: Duration) {
    let sessions = registry.sessions();
    if sessions.is_empty() {
        return;
    }
    tracing::info!("🧹 tearing down {} session(s)", sessions.len());

    let all = async {
        for session in &sessions {
            session.teardown().await;
        }
    };
    if tokio::time::timeout(limit, all).await.is_err() {
        tracing::warn!("session teardown did not finish within {:?}", limit);
    }
}
