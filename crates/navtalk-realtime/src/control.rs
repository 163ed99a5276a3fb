//! The realtime control socket: session configuration, turn events, and
//! transcripts.

use crate::{
    config::SessionConfig,
    error::Result,
    event::{GPU_BUSY_MESSAGE, INSUFFICIENT_BALANCE_MESSAGE, SessionEvent},
    protocol::{ClientEvent, ServerEvent, SessionParameters},
    socket::{Outbound, Socket, SocketEvent},
    status::SessionStatus,
    transcript::ResponseAccumulator,
};
use tracing::{debug, info};

/// What the session should do in response to one server event, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction {
    SendSessionUpdate,
    RequestResponse,
    StartAudio,
    SetStatus(SessionStatus),
    Emit(SessionEvent),
}

pub struct ControlChannel {
    socket: Socket,
}

impl ControlChannel {
    /// Opens the control socket for `config`. Events arrive through `on_event`
    /// on the socket task.
    pub fn connect<F>(config: &SessionConfig, on_event: F) -> Self
    where
        F: Fn(SocketEvent<ServerEvent>) + Send + Sync + 'static,
    {
        let url = config.control_url();
        info!(host = %config.host, character = %config.character_name, "Opening control socket");
        Self {
            socket: Socket::open("control", url, on_event),
        }
    }

    pub fn outbound(&self) -> Outbound {
        self.socket.outbound()
    }

    pub fn is_open(&self) -> bool {
        self.socket.is_open()
    }

    pub fn send_session_update(&self, config: &SessionConfig) -> Result<bool> {
        let event = ClientEvent::SessionUpdate {
            session: SessionParameters::new(config.instructions.clone(), config.voice.clone()),
        };
        self.socket.outbound().send_if_open(&event)
    }

    /// Sends `response.create`; a no-op while the socket is not open.
    pub fn request_response(&self) -> Result<bool> {
        self.socket.outbound().send_if_open(&ClientEvent::ResponseCreate)
    }

    pub fn close(&self) -> Result<()> {
        self.socket.close()
    }
}

/// Maps one inbound server event to session actions, updating the open
/// response transcripts along the way.
pub fn actions_for(event: ServerEvent, responses: &mut ResponseAccumulator) -> Vec<ControlAction> {
    match event {
        ServerEvent::SessionCreated => vec![ControlAction::SendSessionUpdate],
        ServerEvent::SessionUpdated => vec![
            ControlAction::SetStatus(SessionStatus::Ready),
            ControlAction::RequestResponse,
            ControlAction::StartAudio,
        ],
        ServerEvent::SpeechStarted => vec![ControlAction::SetStatus(SessionStatus::Listening)],
        ServerEvent::SpeechStopped => vec![ControlAction::SetStatus(SessionStatus::Connected)],
        ServerEvent::InputTranscriptionCompleted { transcript } => match transcript {
            Some(text) if !text.is_empty() => {
                vec![ControlAction::Emit(SessionEvent::UserTranscript { text })]
            }
            _ => Vec::new(),
        },
        ServerEvent::AudioTranscriptDelta {
            response_id: Some(response_id),
            delta: Some(delta),
        } if !response_id.is_empty() => {
            let text = responses.append(&response_id, &delta).to_string();
            vec![
                ControlAction::Emit(SessionEvent::AssistantPartial { response_id, text }),
                ControlAction::SetStatus(SessionStatus::Speaking),
            ]
        }
        ServerEvent::AudioTranscriptDone {
            response_id: Some(response_id),
            transcript,
        } if !response_id.is_empty() => {
            let text = responses.finish(&response_id, transcript);
            vec![ControlAction::Emit(SessionEvent::AssistantComplete { response_id, text })]
        }
        ServerEvent::GpuFull => vec![ControlAction::Emit(SessionEvent::error(GPU_BUSY_MESSAGE))],
        ServerEvent::InsufficientBalance => vec![ControlAction::Emit(SessionEvent::error(
            INSUFFICIENT_BALANCE_MESSAGE,
        ))],
        other => {
            debug!(event = ?other, "Ignoring control event");
            Vec::new()
        }
    }
}
