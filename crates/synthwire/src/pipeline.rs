//! Media-encoding pipeline per session.
//!
//! The pipeline pulls audio from the session's audio source (its JACK input
//! ports), encodes Opus, and pushes RTP to a local UDP port. A forwarder task
//! copies those datagrams into the peer connection's track.

use crate::error::SessionError;
use crate::peer::MediaSink;
use async_trait::async_trait;
use std::net::Ipv4Addr;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::UdpSocket;
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const OPUS: &str = "opus";

/// Opus payload type negotiated for the outbound track.
const OPUS_PAYLOAD_TYPE: u8 = 111;
const MAX_DATAGRAM: usize = 1500;

#[async_trait]
pub trait PipelineHandle: Send + Sync {
    async fn start(&mut self) -> Result<(), SessionError>;

    /// Idempotent.
    async fn stop(&mut self) -> Result<(), SessionError>;
}

pub trait PipelineLauncher: Send + Sync {
    fn create(
        &self,
        codec: &str,
        sink: Arc<dyn MediaSink>,
        source: &str,
    ) -> Result<Box<dyn PipelineHandle>, SessionError>;
}

/// Runs pipelines as `gst-launch-1.0` subprocesses.
#[derive(Debug, Clone)]
pub struct GstLauncher {
    program: String,
}

impl GstLauncher {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

impl PipelineLauncher for GstLauncher {
    fn create(
        &self,
        codec: &str,
        sink: Arc<dyn MediaSink>,
        source: &str,
    ) -> Result<Box<dyn PipelineHandle>, SessionError> {
        if !codec.eq_ignore_ascii_case(OPUS) {
            return Err(SessionError::PipelineFailed(format!("unsupported codec {}", codec)));
        }
        if source.trim().is_empty() {
            return Err(SessionError::PipelineFailed("empty audio source".to_string()));
        }
        Ok(Box::new(GstPipeline {
            program: self.program.clone(),
            source: source.to_string(),
            sink,
            child: None,
            tasks: Vec::new(),
        }))
    }
}

/// Elements after the source, ending in a UDP sink on `port`.
pub fn opus_rtp_tail(port: u16) -> String {
    format!(
        "opusenc frame-size=20 complexity=10 bitrate=128000 ! rtpopuspay pt={} ! udpsink host=127.0.0.1 port={}",
        OPUS_PAYLOAD_TYPE, port
    )
}

/// Full `gst-launch-1.0` argument list.
pub fn launch_args(source: &str, port: u16) -> Vec<String> {
    let description = format!("{} ! {}", source, opus_rtp_tail(port));
    std::iter::once("-q".to_string())
        .chain(description.split_whitespace().map(str::to_string))
        .collect()
}

struct GstPipeline {
    program: String,
    source: String,
    sink: Arc<dyn MediaSink>,
    child: Option<Child>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for GstPipeline {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

#[async_trait]
impl PipelineHandle for GstPipeline {
    async fn start(&mut self) -> Result<(), SessionError> {
        if self.child.is_some() {
            return Ok(());
        }

        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| SessionError::PipelineFailed(format!("rtp socket: {}", e)))?;
        let port = socket
            .local_addr()
            .map_err(|e| SessionError::PipelineFailed(format!("rtp socket: {}", e)))?
            .port();

        let args = launch_args(&self.source, port);
        debug!("{} {}", self.program, args.join(" "));

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::PipelineFailed(format!("spawn {}: {}", self.program, e)))?;

        info!("🎚️ pipeline started (pid {:?}), RTP on 127.0.0.1:{}", child.id(), port);

        if let Some(stderr) = child.stderr.take() {
            self.tasks.push(tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    warn!("pipeline: {}", line);
                }
            }));
        }

        let sink = self.sink.clone();
        self.tasks.push(tokio::spawn(forward_rtp(socket, sink)));
        self.child = Some(child);
        Ok(())
    }

    async fn stop(&mut self) -> Result<(), SessionError> {
        for task in self.tasks.drain(..) {
            task.abort();
        }
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };
        child
            .kill()
            .await
            .map_err(|e| SessionError::PipelineFailed(format!("kill: {}", e)))?;
        info!("🎚️ pipeline stopped");
        Ok(())
    }
}

/// Copy RTP datagrams into the sink until the socket fails.
async fn forward_rtp(socket: UdpSocket, sink: Arc<dyn MediaSink>) {
    let mut buf = [0u8; MAX_DATAGRAM];
    let mut write_errors = 0u64;
    loop {
        let len = match socket.recv(&mut buf).await {
            Ok(len) => len,
            Err(e) => {
                warn!("RTP forwarder stopped: {}", e);
                return;
            }
        };
        if let Err(e) = sink.write_rtp(&buf[..len]).await {
            write_errors += 1;
            if write_errors == 1 || write_errors % 1000 == 0 {
                debug!("RTP write failed ({} so far): {:#}", write_errors, e);
            }
        }
    }
}
