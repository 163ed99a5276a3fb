//! Renders session events as terminal lines.

use navtalk_realtime::{SessionEvent, SessionStatus};

#[derive(Debug, Default, Clone, Copy)]
pub struct Presenter {
    show_partials: bool,
}

impl Presenter {
    pub fn new(show_partials: bool) -> Self {
        Self { show_partials }
    }

    /// Returns the line to print for `event`, if any.
    pub fn render(&self, event: &SessionEvent) -> Option<String> {
        match event {
            SessionEvent::StatusChanged { to, .. } => Some(status_line(*to)),
            SessionEvent::UserTranscript { text } => Some(format!("You: {}", text.trim())),
            SessionEvent::AssistantPartial { text, .. } if self.show_partials => {
                Some(format!("  ... {}", text.trim()))
            }
            SessionEvent::AssistantPartial { .. } => None,
            SessionEvent::AssistantComplete { text, .. } => {
                let text = text.trim();
                (!text.is_empty()).then(|| format!("Avatar: {text}"))
            }
            SessionEvent::Error { message } => Some(format!("Error: {message}")),
        }
    }

    /// Whether the event ends the session from the caller's point of view.
    pub fn is_terminal(event: &SessionEvent) -> bool {
        matches!(
            event,
            SessionEvent::StatusChanged {
                to: SessionStatus::Stopped,
                ..
            }
        )
    }
}

fn status_line(status: SessionStatus) -> String {
    let detail = match status {
        SessionStatus::Idle => "idle",
        SessionStatus::Connecting => "connecting to the relay",
        SessionStatus::Connected => "connected, configuring session",
        SessionStatus::Ready => "ready",
        SessionStatus::Listening => "listening",
        SessionStatus::Speaking => "avatar speaking",
        SessionStatus::Stopped => "session ended",
        SessionStatus::Error => "connection error",
    };
    format!("[{status}] {detail}")
}
