//! The WebRTC signaling relay socket.

use crate::{
    config::SessionConfig,
    error::Result,
    protocol::{IceCandidate, SessionDescription, SignalingInbound, SignalingOutbound},
    socket::{Outbound, Socket, SocketEvent},
};
use tracing::{debug, info};

pub struct SignalingChannel {
    socket: Socket,
    target_session_id: String,
}

impl SignalingChannel {
    /// Opens the signaling socket. The `create` registration is sent by the
    /// session once the socket reports [`SocketEvent::Opened`].
    pub fn connect<F>(config: &SessionConfig, on_event: F) -> Self
    where
        F: Fn(SocketEvent<SignalingInbound>) + Send + Sync + 'static,
    {
        let url = config.signaling_url();
        info!(host = %config.host, "Opening signaling socket");
        Self {
            socket: Socket::open("signaling", url, on_event),
            target_session_id: config.target_session_id().to_string(),
        }
    }

    pub fn outbound(&self) -> Outbound {
        self.socket.outbound()
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }

    pub fn target_session_id(&self) -> &str {
        &self.target_session_id
    }

    pub fn register(&self) -> Result<bool> {
        debug!("Registering with signaling relay");
        self.socket.outbound().send_if_open(&SignalingOutbound::Create {
            target_session_id: self.target_session_id.clone(),
        })
    }

    pub fn close(&self) -> Result<()> {
        self.socket.close()
    }
}

/// Sends the local answer, echoing the offer's target id.
pub fn send_answer(
    outbound: &Outbound,
    target_session_id: &str,
    answer: SessionDescription,
) -> Result<bool> {
    outbound.send_if_open(&SignalingOutbound::Answer {
        target_session_id: target_session_id.to_string(),
        sdp: answer,
    })
}

/// Forwards one locally gathered ICE candidate; dropped while the socket is
/// not open.
pub fn send_candidate(
    outbound: &Outbound,
    target_session_id: &str,
    candidate: IceCandidate,
) -> Result<bool> {
    outbound.send_if_open(&SignalingOutbound::IceCandidate {
        target_session_id: target_session_id.to_string(),
        candidate,
    })
}
