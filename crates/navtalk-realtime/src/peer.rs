//! Peer connection seam and its webrtc-rs implementation.
//!
//! The session only ever talks to [`PeerFactory`] and [`PeerLink`]; callbacks
//! from the WebRTC stack come back as [`PeerEvent`]s through a
//! [`PeerEventSink`] the session tags with the connection's generation.

use crate::{
    error::Result,
    ice::{IceConfiguration, IceServer},
    protocol::{IceCandidate, SessionDescription},
};
use async_trait::async_trait;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::{
    api::{
        APIBuilder, API, interceptor_registry::register_default_interceptors,
        media_engine::MediaEngine,
    },
    ice_transport::{
        ice_candidate::{RTCIceCandidate, RTCIceCandidateInit},
        ice_server::RTCIceServer,
    },
    interceptor::registry::Registry,
    peer_connection::{
        RTCPeerConnection, configuration::RTCConfiguration,
        peer_connection_state::RTCPeerConnectionState,
        sdp::session_description::RTCSessionDescription,
    },
    track::track_remote::TrackRemote,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            _ => PeerState::New,
        }
    }
}

pub enum PeerEvent {
    LocalCandidate(IceCandidate),
    Track(Arc<TrackRemote>),
    StateChanged(PeerState),
}

impl std::fmt::Debug for PeerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PeerEvent::LocalCandidate(candidate) => {
                f.debug_tuple("LocalCandidate").field(candidate).finish()
            }
            PeerEvent::Track(track) => f.debug_tuple("Track").field(&track.id()).finish(),
            PeerEvent::StateChanged(state) => f.debug_tuple("StateChanged").field(state).finish(),
        }
    }
}

pub type PeerEventSink = Arc<dyn Fn(PeerEvent) + Send + Sync>;

#[async_trait]
pub trait PeerFactory: Send + Sync {
    async fn create(
        &self,
        ice: &IceConfiguration,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerLink>>;
}

/// One live peer connection.
#[async_trait]
pub trait PeerLink: Send + Sync {
    /// Applies the remote offer, then creates and applies the local answer.
    /// Returns the local description to send back.
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription>;

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()>;

    /// Detaches every callback, then closes the connection.
    async fn close(&self) -> Result<()>;
}

/// Receives the remote media tracks of the current peer connection.
pub trait MediaSink: Send + Sync {
    fn attach(&self, track: Arc<TrackRemote>);
    fn play(&self) -> Result<()>;
    fn detach(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcPeerFactory;

impl WebRtcPeerFactory {
    pub fn new() -> Self {
        Self
    }

    fn build_api() -> Result<API> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;
        Ok(APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build())
    }
}

fn to_rtc_ice_server(server: &IceServer) -> RTCIceServer {
    RTCIceServer {
        urls: server.urls.clone(),
        username: server.username.clone().unwrap_or_default(),
        credential: server.credential.clone().unwrap_or_default(),
        ..Default::default()
    }
}

fn to_ice_candidate(candidate: &RTCIceCandidate) -> Result<IceCandidate> {
    let init = candidate.to_json()?;
    Ok(IceCandidate {
        candidate: init.candidate,
        sdp_mid: init.sdp_mid,
        sdp_m_line_index: init.sdp_mline_index,
        username_fragment: init.username_fragment,
    })
}

#[async_trait]
impl PeerFactory for WebRtcPeerFactory {
    async fn create(
        &self,
        ice: &IceConfiguration,
        events: PeerEventSink,
    ) -> Result<Arc<dyn PeerLink>> {
        let api = Self::build_api()?;
        let config = RTCConfiguration {
            ice_servers: ice.servers().iter().map(to_rtc_ice_server).collect(),
            ..Default::default()
        };
        let pc = Arc::new(api.new_peer_connection(config).await?);
        debug!(servers = ice.servers().len(), "Created peer connection");

        let sink = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
            if let Some(candidate) = candidate {
                match to_ice_candidate(&candidate) {
                    Ok(candidate) => sink(PeerEvent::LocalCandidate(candidate)),
                    Err(e) => warn!(error = %e, "Failed to serialize local ICE candidate"),
                }
            }
            Box::pin(async {})
        }));

        let sink = events.clone();
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            info!(kind = %track.kind(), id = %track.id(), "Remote track received");
            sink(PeerEvent::Track(track));
            Box::pin(async {})
        }));

        let sink = events;
        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            info!(%state, "Peer connection state changed");
            sink(PeerEvent::StateChanged(state.into()));
            Box::pin(async {})
        }));

        Ok(Arc::new(WebRtcPeer { pc }))
    }
}

struct WebRtcPeer {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl PeerLink for WebRtcPeer {
    async fn accept_offer(&self, offer: SessionDescription) -> Result<SessionDescription> {
        let offer = RTCSessionDescription::offer(offer.sdp)?;
        self.pc.set_remote_description(offer).await?;
        let answer = self.pc.create_answer(None).await?;
        self.pc.set_local_description(answer.clone()).await?;
        let local = self.pc.local_description().await.unwrap_or(answer);
        Ok(SessionDescription {
            sdp_type: local.sdp_type.to_string(),
            sdp: local.sdp,
        })
    }

    async fn add_remote_candidate(&self, candidate: IceCandidate) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate,
            sdp_mid: candidate.sdp_mid,
            sdp_mline_index: candidate.sdp_m_line_index,
            username_fragment: candidate.username_fragment,
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pc.on_ice_candidate(Box::new(|_| Box::pin(async {})));
        self.pc.on_track(Box::new(|_, _, _| Box::pin(async {})));
        self.pc
            .on_peer_connection_state_change(Box::new(|_| Box::pin(async {})));
        self.pc.close().await?;
        Ok(())
    }
}

/// A sink that reads and discards remote RTP, logging how much arrived.
/// Useful for headless sessions where only the transcripts matter.
#[derive(Default)]
pub struct RtpDrainSink {
    pending: Mutex<Vec<Arc<TrackRemote>>>,
    draining: Mutex<Vec<JoinHandle<()>>>,
}

impl RtpDrainSink {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MediaSink for RtpDrainSink {
    fn attach(&self, track: Arc<TrackRemote>) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(track);
    }

    fn play(&self) -> Result<()> {
        let tracks: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        let mut draining = self.draining.lock().unwrap_or_else(PoisonError::into_inner);
        for track in tracks {
            draining.push(tokio::spawn(drain_track(track)));
        }
        Ok(())
    }

    fn detach(&self) {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        for task in self
            .draining
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
        {
            task.abort();
        }
    }
}

async fn drain_track(track: Arc<TrackRemote>) {
    let kind = track.kind();
    let mut packets: u64 = 0;
    while let Ok((_packet, _attributes)) = track.read_rtp().await {
        packets += 1;
        if packets % 1000 == 0 {
            debug!(%kind, packets, "Draining remote track");
        }
    }
    info!(%kind, packets, "Remote track ended");
}
