//! Fakes for the external collaborators of a session.

#![allow(dead_code)]

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use synthconf::{IceConfig, PipelineConfig};
use synthwire::error::SessionError;
use synthwire::negotiation::{OfferRequest, Orchestrator};
use synthwire::peer::{
    IceCandidate, IceServer, LinkState, MediaSink, PeerConnector, PeerLink, SessionDescription,
};
use synthwire::pipeline::{PipelineHandle, PipelineLauncher};
use synthwire::registry::SessionRegistry;
use synthwire::session::SessionId;
use synthwire::synth::{ClientName, ClientNameSlot, SupervisorState, Synth, SynthFactory};
use tokio::sync::broadcast;

pub const OFFER_SDP: &str = "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n";

pub fn offer() -> OfferRequest {
    OfferRequest {
        sdp: OFFER_SDP.to_string(),
        sdp_type: "offer".to_string(),
        ice_servers: vec![IceServer {
            urls: vec!["stun:stun.l.google.com:19302".to_string()],
            ..Default::default()
        }],
    }
}

struct NullSink;

#[async_trait]
impl MediaSink for NullSink {
    async fn write_rtp(&self, _packet: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct LinkBehaviour {
    pub gather_forever: AtomicBool,
    pub fail_remote: AtomicBool,
    pub fail_connect: AtomicBool,
    pub pairs: AtomicUsize,
    pub candidate_failures: AtomicUsize,
}

pub struct FakeLink {
    behaviour: Arc<LinkBehaviour>,
    events: broadcast::Sender<LinkState>,
    state: Mutex<LinkState>,
    local: Mutex<Option<SessionDescription>>,
    pub closes: AtomicUsize,
    pub candidates: Mutex<Vec<IceCandidate>>,
    candidate_failures: AtomicUsize,
}

impl FakeLink {
    fn new(behaviour: Arc<LinkBehaviour>) -> Self {
        let candidate_failures = behaviour.candidate_failures.load(Ordering::SeqCst);
        Self {
            behaviour,
            events: broadcast::channel(16).0,
            state: Mutex::new(LinkState::New),
            local: Mutex::new(None),
            closes: AtomicUsize::new(0),
            candidates: Mutex::new(Vec::new()),
            candidate_failures: AtomicUsize::new(candidate_failures),
        }
    }

    /// Drive a state change as the network would.
    pub fn set_state(&self, state: LinkState) {
        *self.state.lock().unwrap() = state;
        let _ = self.events.send(state);
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerLink for FakeLink {
    async fn add_audio_track(&self) -> Result<Arc<dyn MediaSink>> {
        Ok(Arc::new(NullSink))
    }

    async fn set_remote_description(&self, offer: &SessionDescription) -> Result<()> {
        if self.behaviour.fail_remote.load(Ordering::SeqCst) {
            return Err(anyhow!("unparseable offer"));
        }
        assert_eq!(offer.sdp_type, "offer");
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        Ok(SessionDescription::answer("v=0 fake-answer"))
    }

    async fn set_local_description(&self, answer: &SessionDescription) -> Result<()> {
        *self.local.lock().unwrap() = Some(answer.clone());
        Ok(())
    }

    async fn gathering_complete(&self) {
        if self.behaviour.gather_forever.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.local.lock().unwrap().clone().map(|mut desc| {
            desc.sdp.push_str(" with-candidates");
            desc
        })
    }

    async fn succeeded_pairs(&self) -> usize {
        self.behaviour.pairs.load(Ordering::SeqCst)
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        let remaining = self.candidate_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.candidate_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow!("remote description not set"));
        }
        self.candidates.lock().unwrap().push(candidate.clone());
        Ok(())
    }

    fn state(&self) -> LinkState {
        *self.state.lock().unwrap()
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkState> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        self.set_state(LinkState::Closed);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeConnector {
    pub behaviour: Arc<LinkBehaviour>,
    pub links: Mutex<Vec<Arc<FakeLink>>>,
}

impl FakeConnector {
    pub fn link(&self, n: usize) -> Arc<FakeLink> {
        self.links.lock().unwrap()[n].clone()
    }

    pub fn count(&self) -> usize {
        self.links.lock().unwrap().len()
    }
}

#[async_trait]
impl PeerConnector for FakeConnector {
    async fn connect(&self, _servers: &[IceServer]) -> Result<Arc<dyn PeerLink>> {
        if self.behaviour.fail_connect.load(Ordering::SeqCst) {
            return Err(anyhow!("no network"));
        }
        let link = Arc::new(FakeLink::new(self.behaviour.clone()));
        self.links.lock().unwrap().push(link.clone());
        Ok(link)
    }
}

pub struct FakeSynth {
    id: SessionId,
    fail_start: bool,
    slow_start: bool,
    slot: ClientNameSlot,
    state: Mutex<SupervisorState>,
    current: Mutex<Option<String>>,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
}

impl FakeSynth {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Synth for FakeSynth {
    async fn start(&self) -> Result<(), SessionError> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.slow_start {
            // As long as a full upstream-port wait.
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
        if self.fail_start {
            *self.state.lock().unwrap() = SupervisorState::WaitingForUpstreamPorts;
            return Err(SessionError::UpstreamPortsTimeout {
                session_id: self.id.to_string(),
                waited: Duration::from_secs(10),
            });
        }
        self.slot.resolve(format!("SuperCollider-{}", self.id));
        *self.state.lock().unwrap() = SupervisorState::Running;
        Ok(())
    }

    async fn stop(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        if state.is_idle() {
            return Ok(());
        }
        self.stops.fetch_add(1, Ordering::SeqCst);
        *state = SupervisorState::Stopped;
        self.slot.reset();
        *self.current.lock().unwrap() = None;
        Ok(())
    }

    fn control_port(&self) -> Option<u16> {
        (*self.state.lock().unwrap() == SupervisorState::Running).then_some(57110)
    }

    async fn send_play_message(&self) -> Result<String, SessionError> {
        *self.current.lock().unwrap() = Some("romero_1".to_string());
        Ok("romero_1".to_string())
    }

    fn client_name(&self) -> ClientName {
        self.slot.subscribe()
    }

    fn current_synth(&self) -> Option<String> {
        self.current.lock().unwrap().clone()
    }

    fn state(&self) -> SupervisorState {
        *self.state.lock().unwrap()
    }
}

#[derive(Default)]
pub struct FakeSynthFactory {
    pub fail_start: AtomicBool,
    pub slow_start: AtomicBool,
    pub built: Mutex<Vec<Arc<FakeSynth>>>,
}

impl FakeSynthFactory {
    pub fn synth(&self, n: usize) -> Arc<FakeSynth> {
        self.built.lock().unwrap()[n].clone()
    }
}

impl SynthFactory for FakeSynthFactory {
    fn build(&self, session_id: &SessionId) -> Arc<dyn Synth> {
        let synth = Arc::new(FakeSynth {
            id: session_id.clone(),
            fail_start: self.fail_start.load(Ordering::SeqCst),
            slow_start: self.slow_start.load(Ordering::SeqCst),
            slot: ClientNameSlot::new(),
            state: Mutex::new(SupervisorState::NotStarted),
            current: Mutex::new(None),
            starts: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
        });
        self.built.lock().unwrap().push(synth.clone());
        synth
    }
}

#[derive(Default)]
pub struct PipelineCounters {
    pub fail_start: AtomicBool,
    pub created: AtomicUsize,
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub sources: Mutex<Vec<String>>,
}

#[derive(Default)]
pub struct FakeLauncher {
    pub counters: Arc<PipelineCounters>,
}

struct FakePipeline {
    counters: Arc<PipelineCounters>,
    running: bool,
}

#[async_trait]
impl PipelineHandle for FakePipeline {
    async fn start(&mut self) -> Result<(), SessionError> {
        self.counters.starts.fetch_add(1, Ordering::SeqCst);
        if self.counters.fail_start.load(Ordering::SeqCst) {
            return Err(SessionError::PipelineFailed("gst-launch-1.0 not found".to_string()));
        }
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        if self.running {
            self.running = false;
            self.counters.stops.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl PipelineLauncher for FakeLauncher {
    fn create(
        &self,
        codec: &str,
        _sink: Arc<dyn MediaSink>,
        source: &str,
    ) -> Result<Box<dyn PipelineHandle>, SessionError> {
        assert_eq!(codec, "opus");
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        self.counters.sources.lock().unwrap().push(source.to_string());
        Ok(Box::new(FakePipeline {
            counters: self.counters.clone(),
            running: false,
        }))
    }
}

impl PipelineCounters {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

/// Registry and orchestrator wired to fakes.
pub struct Harness {
    pub registry: Arc<SessionRegistry>,
    pub orchestrator: Arc<Orchestrator>,
    pub connector: Arc<FakeConnector>,
    pub synths: Arc<FakeSynthFactory>,
    pub pipelines: Arc<PipelineCounters>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(FakeConnector::default(), FakeSynthFactory::default())
    }

    pub fn with(connector: FakeConnector, synths: FakeSynthFactory) -> Self {
        let connector = Arc::new(connector);
        let synths = Arc::new(synths);
        let launcher = FakeLauncher::default();
        let pipelines = launcher.counters.clone();

        let registry = Arc::new(SessionRegistry::new(PipelineConfig::default(), synths.clone()));
        let orchestrator = Arc::new(Orchestrator::new(
            connector.clone(),
            Arc::new(launcher),
            IceConfig::default(),
        ));

        Self {
            registry,
            orchestrator,
            connector,
            synths,
            pipelines,
        }
    }
}

/// Yield until `check` holds, failing after a generous number of rounds.
pub async fn eventually(mut check: impl FnMut() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached");
}
