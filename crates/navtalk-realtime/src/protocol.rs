//! JSON wire formats for the control socket and the signaling socket.

use crate::ice::IceServer;
use serde::{Deserialize, Serialize};

pub const TRANSCRIPTION_MODEL: &str = "whisper-1";
pub const VAD_THRESHOLD: f32 = 0.5;
pub const VAD_PREFIX_PADDING_MS: u32 = 300;
pub const VAD_SILENCE_DURATION_MS: u32 = 500;
pub const TEMPERATURE: f32 = 1.0;
pub const MAX_RESPONSE_OUTPUT_TOKENS: u32 = 4096;

// --- Control socket ---

/// Messages sent from this client to the realtime control socket.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate { session: SessionParameters },
    #[serde(rename = "response.create")]
    ResponseCreate,
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend { audio: String },
}

/// Model configuration carried by `session.update`.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SessionParameters {
    pub instructions: String,
    pub turn_detection: TurnDetection,
    pub voice: String,
    pub temperature: f32,
    pub max_response_output_tokens: u32,
    pub modalities: Vec<Modality>,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub input_audio_transcription: AudioTranscription,
}

impl SessionParameters {
    pub fn new(instructions: impl Into<String>, voice: impl Into<String>) -> Self {
        Self {
            instructions: instructions.into(),
            turn_detection: TurnDetection::ServerVad {
                threshold: VAD_THRESHOLD,
                prefix_padding_ms: VAD_PREFIX_PADDING_MS,
                silence_duration_ms: VAD_SILENCE_DURATION_MS,
            },
            voice: voice.into(),
            temperature: TEMPERATURE,
            max_response_output_tokens: MAX_RESPONSE_OUTPUT_TOKENS,
            modalities: vec![Modality::Text, Modality::Audio],
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            input_audio_transcription: AudioTranscription {
                model: TRANSCRIPTION_MODEL.to_string(),
            },
        }
    }
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        threshold: f32,
        prefix_padding_ms: u32,
        silence_duration_ms: u32,
    },
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    Text,
    Audio,
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    Pcm16,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct AudioTranscription {
    pub model: String,
}

/// Messages received from the realtime control socket.
///
/// Anything not listed here deserializes to [`ServerEvent::Unknown`] and is
/// ignored, so new server events never break an older client.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated,
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped,
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    InputTranscriptionCompleted {
        #[serde(default)]
        transcript: Option<String>,
    },
    #[serde(rename = "response.audio_transcript.delta")]
    AudioTranscriptDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        delta: Option<String>,
    },
    #[serde(rename = "response.audio_transcript.done")]
    AudioTranscriptDone {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },
    #[serde(rename = "session.gpu_full")]
    GpuFull,
    #[serde(rename = "session.insufficient_balance")]
    InsufficientBalance,
    #[serde(other)]
    Unknown,
}

// --- Signaling socket ---

/// A session description as browsers serialize `RTCSessionDescription`.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
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

/// Relays send the offer either as a description object or as bare SDP text.
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum OfferPayload {
    Description(SessionDescription),
    Raw(String),
}

impl OfferPayload {
    pub fn into_description(self) -> SessionDescription {
        match self {
            OfferPayload::Description(description) => description,
            OfferPayload::Raw(sdp) => SessionDescription::offer(sdp),
        }
    }
}

/// An ICE candidate in the `RTCIceCandidateInit` JSON shape.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_m_line_index: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username_fragment: Option<String>,
}

/// Messages sent from this client to the signaling relay.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalingOutbound {
    Create {
        #[serde(rename = "targetSessionId")]
        target_session_id: String,
    },
    Answer {
        #[serde(rename = "targetSessionId")]
        target_session_id: String,
        sdp: SessionDescription,
    },
    IceCandidate {
        #[serde(rename = "targetSessionId")]
        target_session_id: String,
        candidate: IceCandidate,
    },
}

/// Messages received from the signaling relay.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SignalingInbound {
    Offer {
        sdp: OfferPayload,
        #[serde(rename = "targetSessionId", default)]
        target_session_id: Option<String>,
    },
    IceCandidate {
        #[serde(default)]
        candidate: Option<IceCandidate>,
    },
    #[serde(other)]
    Other,
}

// --- ICE discovery ---

/// Body of `generate-ice-servers`; the list may sit at the top level or
/// under `data`.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct IceServersResponse {
    #[serde(default)]
    pub ice_servers: Option<Vec<IceServer>>,
    #[serde(default)]
    pub data: Option<IceServersData>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct IceServersData {
    #[serde(default)]
    pub ice_servers: Option<Vec<IceServer>>,
}

impl IceServersResponse {
    /// The nested list wins over the top-level one, matching how the relay
    /// wraps newer responses.
    pub fn into_servers(self) -> Vec<IceServer> {
        self.data
            .and_then(|data| data.ice_servers)
            .or(self.ice_servers)
            .unwrap_or_default()
    }
}
