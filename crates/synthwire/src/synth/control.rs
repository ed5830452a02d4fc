//! OSC control channel to the synth process.
//!
//! Messages are fire-and-forget over UDP. Only `/status` expects an answer
//! (`/status.reply`), which is what readiness polling relies on.

use crate::error::SessionError;
use rosc::{OscMessage, OscPacket, OscType};
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;
use tracing::debug;

/// Add-to-head action for `/s_new`.
const ADD_TO_HEAD: i32 = 0;
/// Default group.
const ROOT_GROUP: i32 = 0;

#[derive(Debug, Clone, Copy)]
pub struct OscControl {
    target: SocketAddr,
}

impl OscControl {
    /// Control channel to a synth listening on localhost.
    pub fn new(port: u16) -> Self {
        Self {
            target: SocketAddr::from((Ipv4Addr::LOCALHOST, port)),
        }
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }

    async fn send(&self, addr: &str, args: Vec<OscType>) -> Result<UdpSocket, SessionError> {
        let packet = OscPacket::Message(OscMessage {
            addr: addr.to_string(),
            args,
        });
        let bytes = rosc::encoder::encode(&packet)
            .map_err(|e| SessionError::ControlFailed(format!("encode {}: {:?}", addr, e)))?;

        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(|e| SessionError::ControlFailed(format!("bind: {}", e)))?;
        socket
            .send_to(&bytes, self.target)
            .await
            .map_err(|e| SessionError::ControlFailed(format!("send {} to {}: {}", addr, self.target, e)))?;

        debug!("sent {} to {}", addr, self.target);
        Ok(socket)
    }

    /// `/s_new <synthdef> <node_id> 0 0`
    pub async fn new_synth(&self, synthdef: &str, node_id: i32) -> Result<(), SessionError> {
        self.send(
            "/s_new",
            vec![
                OscType::String(synthdef.to_string()),
                OscType::Int(node_id),
                OscType::Int(ADD_TO_HEAD),
                OscType::Int(ROOT_GROUP),
            ],
        )
        .await
        .map(|_| ())
    }

    pub async fn quit(&self) -> Result<(), SessionError> {
        self.send("/quit", Vec::new()).await.map(|_| ())
    }

    /// Send `/status` and wait up to `wait` for `/status.reply`.
    pub async fn status(&self, wait: Duration) -> Result<(), SessionError> {
        let socket = self.send("/status", Vec::new()).await?;
        let mut buf = [0u8; rosc::decoder::MTU];

        timeout(wait, async {
            loop {
                let (len, from) = match socket.recv_from(&mut buf).await {
                    Ok(received) => received,
                    Err(e) => {
                        return Err(SessionError::ControlFailed(format!("recv: {}", e)));
                    }
                };
                if from.port() != self.target.port() {
                    continue;
                }
                if let Ok((_, OscPacket::Message(msg))) = rosc::decoder::decode_udp(&buf[..len]) {
                    if msg.addr == "/status.reply" {
                        return Ok::<(), SessionError>(());
                    }
                }
            }
        })
        .await
        .map_err(|_| SessionError::ControlFailed(format!("no /status.reply from {}", self.target)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn responder() -> (UdpSocket, u16) {
        let socket = UdpSocket::bind((Ipv4Addr::LOCALHOST, 0)).await.unwrap();
        let port = socket.local_addr().unwrap().port();
        (socket, port)
    }

    async fn recv_message(socket: &UdpSocket) -> (OscMessage, SocketAddr) {
        let mut buf = [0u8; rosc::decoder::MTU];
        let (len, from) = socket.recv_from(&mut buf).await.unwrap();
        match rosc::decoder::decode_udp(&buf[..len]).unwrap().1 {
            OscPacket::Message(msg) => (msg, from),
            other => panic!("unexpected packet {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_new_synth_message_shape() {
        let (server, port) = responder().await;
        OscControl::new(port).new_synth("romero_1", 1).await.unwrap();

        let (msg, _) = recv_message(&server).await;
        assert_eq!(msg.addr, "/s_new");
        assert_eq!(
            msg.args,
            vec![
                OscType::String("romero_1".to_string()),
                OscType::Int(1),
                OscType::Int(0),
                OscType::Int(0),
            ]
        );
    }

    #[tokio::test]
    async fn test_status_waits_for_reply() {
        let (server, port) = responder().await;
        let reply = tokio::spawn(async move {
            let (msg, from) = recv_message(&server).await;
            assert_eq!(msg.addr, "/status");
            let packet = OscPacket::Message(OscMessage {
                addr: "/status.reply".to_string(),
                args: vec![OscType::Int(1)],
            });
            server
                .send_to(&rosc::encoder::encode(&packet).unwrap(), from)
                .await
                .unwrap();
        });

        OscControl::new(port).status(Duration::from_secs(2)).await.unwrap();
        reply.await.unwrap();
    }

    #[tokio::test]
    async fn test_status_times_out_without_reply() {
        let (_server, port) = responder().await;
        let result = OscControl::new(port).status(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(SessionError::ControlFailed(_))));
    }
}
