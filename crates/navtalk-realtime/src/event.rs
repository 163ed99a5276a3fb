//! Events emitted from a running session to the presentation layer.

use crate::status::SessionStatus;

pub const GPU_BUSY_MESSAGE: &str = "GPU resources are currently busy. Please try again later.";
pub const INSUFFICIENT_BALANCE_MESSAGE: &str =
    "Account balance is insufficient. Please top up to continue.";
pub const CONNECTION_ERROR_MESSAGE: &str = "Realtime connection error. Please try again.";
pub const SIGNALING_ERROR_MESSAGE: &str = "Media signaling connection error.";
pub const MEDIA_FAILED_MESSAGE: &str = "Media connection failed.";
pub const MICROPHONE_ERROR_MESSAGE: &str =
    "Unable to access the microphone. Please enable audio input permissions.";

/// Everything a caller can observe about a session, in emission order.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    /// Final transcription of what the local user said.
    UserTranscript { text: String },
    /// The assistant's transcript so far for one streamed response.
    AssistantPartial { response_id: String, text: String },
    /// The assistant's full transcript for one response.
    AssistantComplete { response_id: String, text: String },
    Error { message: String },
}

impl SessionEvent {
    pub(crate) fn error(message: impl Into<String>) -> Self {
        SessionEvent::Error {
            message: message.into(),
        }
    }
}
