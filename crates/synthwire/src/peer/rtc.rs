//! webrtc-rs backed peer connections.

use super::{
    IceCandidate, IceServer, LinkState, MediaSink, PeerConnector, PeerLink, SessionDescription,
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use synthconf::IceConfig;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_OPUS};
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice::candidate::CandidatePairState;
use webrtc::ice::udp_network::{EphemeralUDP, UDPNetwork};
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_connection_state::RTCIceConnectionState;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::stats::StatsReportType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};

const STATE_CHANNEL_CAPACITY: usize = 32;

/// Creates webrtc-rs peer connections with the configured ICE policy.
pub struct WebRtcConnector {
    ice: IceConfig,
}

impl WebRtcConnector {
    pub fn new(ice: IceConfig) -> Self {
        Self { ice }
    }

    fn setting_engine(&self) -> Result<SettingEngine> {
        let mut settings = SettingEngine::default();
        settings.set_ice_timeouts(
            Some(self.ice.disconnected_timeout()),
            Some(self.ice.failed_timeout()),
            Some(self.ice.keepalive_interval()),
        );
        let udp = EphemeralUDP::new(self.ice.port_min, self.ice.port_max)
            .with_context(|| format!("invalid ICE port range {}-{}", self.ice.port_min, self.ice.port_max))?;
        settings.set_udp_network(UDPNetwork::Ephemeral(udp));
        Ok(settings)
    }
}

fn rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

#[async_trait]
impl PeerConnector for WebRtcConnector {
    async fn connect(&self, servers: &[IceServer]) -> Result<Arc<dyn PeerLink>> {
        let mut media = MediaEngine::default();
        media
            .register_default_codecs()
            .context("failed to register codecs")?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .context("failed to register interceptors")?;

        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .with_setting_engine(self.setting_engine()?)
            .build();

        let config = RTCConfiguration {
            ice_servers: servers.iter().map(rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .context("failed to create peer connection")?,
        );

        Ok(Arc::new(RtcLink::new(pc)))
    }
}

/// One webrtc-rs peer connection.
pub struct RtcLink {
    pc: Arc<RTCPeerConnection>,
    state: Arc<watch::Sender<LinkState>>,
    events: broadcast::Sender<LinkState>,
    gathering: Mutex<Option<mpsc::Receiver<()>>>,
}

impl RtcLink {
    fn new(pc: Arc<RTCPeerConnection>) -> Self {
        let state = Arc::new(watch::channel(LinkState::New).0);
        let (events, _) = broadcast::channel(STATE_CHANNEL_CAPACITY);

        {
            let state = state.clone();
            let events = events.clone();
            pc.on_peer_connection_state_change(Box::new(move |s: RTCPeerConnectionState| {
                let mapped = match s {
                    RTCPeerConnectionState::New => Some(LinkState::New),
                    RTCPeerConnectionState::Connecting => Some(LinkState::Connecting),
                    RTCPeerConnectionState::Connected => Some(LinkState::Connected),
                    RTCPeerConnectionState::Disconnected => Some(LinkState::Disconnected),
                    RTCPeerConnectionState::Failed => Some(LinkState::Failed),
                    RTCPeerConnectionState::Closed => Some(LinkState::Closed),
                    _ => None,
                };
                if let Some(mapped) = mapped {
                    state.send_replace(mapped);
                    // No subscribers yet is fine.
                    let _ = events.send(mapped);
                }
                Box::pin(async {})
            }));
        }

        {
            let events = events.clone();
            pc.on_ice_connection_state_change(Box::new(move |s: RTCIceConnectionState| {
                debug!("ICE connection state: {}", s);
                if s == RTCIceConnectionState::Checking {
                    let _ = events.send(LinkState::Checking);
                }
                Box::pin(async {})
            }));
        }

        Self {
            pc,
            state,
            events,
            gathering: Mutex::new(None),
        }
    }
}

/// Outbound Opus track.
struct RtcTrack {
    track: Arc<TrackLocalStaticRTP>,
}

#[async_trait]
impl MediaSink for RtcTrack {
    async fn write_rtp(&self, packet: &[u8]) -> Result<()> {
        self.track
            .write(packet)
            .await
            .context("failed to write RTP packet")?;
        Ok(())
    }
}

#[async_trait]
impl PeerLink for RtcLink {
    async fn add_audio_track(&self) -> Result<Arc<dyn MediaSink>> {
        let track = Arc::new(TrackLocalStaticRTP::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_OPUS.to_owned(),
                ..Default::default()
            },
            "audio".to_owned(),
            "synthwire".to_owned(),
        ));

        let sender = self
            .pc
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .context("failed to add audio track")?;

        // RTCP has to be drained for the interceptors to run.
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while sender.read(&mut buf).await.is_ok() {}
        });

        Ok(Arc::new(RtcTrack { track }))
    }

    async fn set_remote_description(&self, offer: &SessionDescription) -> Result<()> {
        let desc = RTCSessionDescription::offer(offer.sdp.clone()).context("malformed offer SDP")?;
        self.pc
            .set_remote_description(desc)
            .await
            .context("remote description rejected")?;
        Ok(())
    }

    async fn create_answer(&self) -> Result<SessionDescription> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .context("failed to create answer")?;
        Ok(SessionDescription::answer(answer.sdp))
    }

    async fn set_local_description(&self, answer: &SessionDescription) -> Result<()> {
        let desc = RTCSessionDescription::answer(answer.sdp.clone()).context("malformed answer SDP")?;
        // The promise must exist before gathering starts.
        let done = self.pc.gathering_complete_promise().await;
        *self.gathering.lock().await = Some(done);
        self.pc
            .set_local_description(desc)
            .await
            .context("local description rejected")?;
        Ok(())
    }

    async fn gathering_complete(&self) {
        let done = self.gathering.lock().await.take();
        if let Some(mut done) = done {
            let _ = done.recv().await;
        }
    }

    async fn local_description(&self) -> Option<SessionDescription> {
        self.pc.local_description().await.map(|desc| SessionDescription {
            sdp_type: desc.sdp_type.to_string(),
            sdp: desc.sdp,
        })
    }

    async fn succeeded_pairs(&self) -> usize {
        let stats = self.pc.get_stats().await;
        stats
            .reports
            .values()
            .filter(|report| {
                matches!(report, StatsReportType::CandidatePair(pair) if pair.state == CandidatePairState::Succeeded)
            })
            .count()
    }

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()> {
        self.pc
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate.clone(),
                sdp_mid: candidate.sdp_mid.clone(),
                sdp_mline_index: candidate.sdp_m_line_index,
                username_fragment: candidate.username_fragment.clone(),
            })
            .await
            .context("candidate rejected")?;
        Ok(())
    }

    fn state(&self) -> LinkState {
        *self.state.borrow()
    }

    fn subscribe(&self) -> broadcast::Receiver<LinkState> {
        self.events.subscribe()
    }

    async fn close(&self) -> Result<()> {
        if let Err(e) = self.pc.close().await {
            warn!("peer connection close reported: {}", e);
            return Err(e).context("failed to close peer connection");
        }
        self.state.send_replace(LinkState::Closed);
        let _ = self.events.send(LinkState::Closed);
        Ok(())
    }
}
