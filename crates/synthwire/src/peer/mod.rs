//! Peer connection abstraction.
//!
//! The orchestrator only talks to these traits; `rtc` backs them with
//! webrtc-rs and the integration tests back them with fakes.

pub mod rtc;

pub use rtc::WebRtcConnector;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::broadcast;

/// SDP offer or answer as exchanged with the browser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub sdp_type: String,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "offer".to_string(),
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            sdp_type: "answer".to_string(),
            sdp: sdp.into(),
        }
    }
}

/// STUN/TURN server entry in browser `RTCIceServer` shape.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServer {
    #[serde(deserialize_with = "one_or_many")]
    pub urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

impl IceServer {
    pub fn has_scheme(&self, schemes: &[&str]) -> bool {
        self.urls
            .iter()
            .any(|url| schemes.iter().any(|scheme| url.starts_with(scheme)))
    }
}

/// Browsers send `urls` as either a string or a list.
fn one_or_many<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(url) => vec![url],
        OneOrMany::Many(urls) => urls,
    })
}

/// Trickled ICE candidate from the browser.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    New,
    Checking,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LinkState::New => "new",
            LinkState::Checking => "checking",
            LinkState::Connecting => "connecting",
            LinkState::Connected => "connected",
            LinkState::Disconnected => "disconnected",
            LinkState::Failed => "failed",
            LinkState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Where encoded media packets go.
#[async_trait]
pub trait MediaSink: Send + Sync {
    /// Write one RTP packet.
    async fn write_rtp(&self, packet: &[u8]) -> Result<()>;
}

/// One negotiated peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Attach the single outbound Opus track.
    async fn add_audio_track(&self) -> Result<Arc<dyn MediaSink>>;

    async fn set_remote_description(&self, offer: &SessionDescription) -> Result<()>;

    async fn create_answer(&self) -> Result<SessionDescription>;

    async fn set_local_description(&self, answer: &SessionDescription) -> Result<()>;

    /// Completes when candidate gathering for the local description is done.
    async fn gathering_complete(&self);

    /// Local description including gathered candidates.
    async fn local_description(&self) -> Option<SessionDescription>;

    /// Candidate pairs currently in the succeeded state.
    async fn succeeded_pairs(&self) -> usize;

    async fn add_ice_candidate(&self, candidate: &IceCandidate) -> Result<()>;

    fn state(&self) -> LinkState;

    /// Connection and ICE state changes, merged.
    fn subscribe(&self) -> broadcast::Receiver<LinkState>;

    async fn close(&self) -> Result<()>;
}

/// Creates peer connections.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, servers: &[IceServer]) -> Result<Arc<dyn PeerLink>>;
}
