//! Error types for the realtime session.
//!
//! None of these reach the embedding application directly: the session actor
//! logs them and, where the failure matters to a user, emits a human-readable
//! [`SessionEvent::Error`](crate::event::SessionEvent::Error) instead.

use tokio_tungstenite::tungstenite;

/// Failures raised while talking to the remote relay or the WebRTC stack.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error("invalid JSON payload: {0}")]
    Json(#[from] serde_json::Error),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("webrtc error: {0}")]
    WebRtc(#[from] webrtc::Error),
    #[error("audio error: {0}")]
    Audio(#[from] AudioError),
    #[error("ice server discovery returned status {0}")]
    DiscoveryStatus(u16),
    #[error("ice server discovery returned no servers")]
    NoIceServers,
    #[error("{0} channel is closed")]
    ChannelClosed(&'static str),
    #[error("session task has exited")]
    SessionGone,
}

/// Failures raised while acquiring or running the microphone.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AudioError {
    #[error("no input device available")]
    NoInputDevice,
    #[error("microphone access denied: {0}")]
    PermissionDenied(String),
    #[error("unsupported sample format: {0}")]
    UnsupportedFormat(String),
    #[error("audio device error: {0}")]
    Device(String),
    #[error("resampler error: {0}")]
    Resampler(String),
}

impl From<cpal::DefaultStreamConfigError> for AudioError {
    fn from(err: cpal::DefaultStreamConfigError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::BuildStreamError> for AudioError {
    fn from(err: cpal::BuildStreamError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::PlayStreamError> for AudioError {
    fn from(err: cpal::PlayStreamError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<cpal::PauseStreamError> for AudioError {
    fn from(err: cpal::PauseStreamError) -> Self {
        AudioError::Device(err.to_string())
    }
}

impl From<rubato::ResamplerConstructionError> for AudioError {
    fn from(err: rubato::ResamplerConstructionError) -> Self {
        AudioError::Resampler(err.to_string())
    }
}

pub type Result<T, E = RealtimeError> = std::result::Result<T, E>;
