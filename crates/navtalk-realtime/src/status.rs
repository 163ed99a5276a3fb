//! Session status and the guarded state machine that owns it.

use serde::Serialize;
use std::fmt;

/// The single lifecycle value exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    #[default]
    Idle,
    Connecting,
    Connected,
    Ready,
    Listening,
    Speaking,
    Stopped,
    Error,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Idle => "idle",
            SessionStatus::Connecting => "connecting",
            SessionStatus::Connected => "connected",
            SessionStatus::Ready => "ready",
            SessionStatus::Listening => "listening",
            SessionStatus::Speaking => "speaking",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Error => "error",
        }
    }

    /// Whether a session in this status owns live resources.
    pub fn is_active(&self) -> bool {
        !matches!(
            self,
            SessionStatus::Idle | SessionStatus::Stopped | SessionStatus::Error
        )
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single write to the [`StatusMachine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Changed {
        from: SessionStatus,
        to: SessionStatus,
    },
    Unchanged,
    Rejected {
        from: SessionStatus,
        to: SessionStatus,
    },
}

/// Owns the current [`SessionStatus`].
///
/// Several independent sources (control socket, peer connection, caller
/// commands) write here without any priority rule, so the last accepted write
/// wins. A small set of guards keeps a finished session from being revived by
/// a late event:
///
/// * nothing moves back into `Idle` once the machine has left it;
/// * `Stopped` is only left by a new start (`Connecting`);
/// * `Error` is only left by a new start or by the stop that follows it.
#[derive(Debug, Default)]
pub struct StatusMachine {
    current: SessionStatus,
}

impl StatusMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> SessionStatus {
        self.current
    }

    pub fn apply(&mut self, to: SessionStatus) -> Transition {
        let from = self.current;
        if from == to {
            return Transition::Unchanged;
        }
        if !Self::allowed(from, to) {
            return Transition::Rejected { from, to };
        }
        self.current = to;
        Transition::Changed { from, to }
    }

    fn allowed(from: SessionStatus, to: SessionStatus) -> bool {
        match (from, to) {
            (_, SessionStatus::Idle) => false,
            (SessionStatus::Stopped, next) => next == SessionStatus::Connecting,
            (SessionStatus::Error, next) => {
                matches!(next, SessionStatus::Connecting | SessionStatus::Stopped)
            }
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use SessionStatus::*;

    #[test]
    fn test_happy_path_transitions() {
        let mut machine = StatusMachine::new();
        assert_eq!(machine.current(), Idle);
        for next in [Connecting, Connected, Ready, Listening, Connected, Speaking, Stopped] {
            let from = machine.current();
            assert_eq!(machine.apply(next), Transition::Changed { from, to: next });
        }
        assert_eq!(machine.current(), Stopped);
    }

    #[test]
    fn test_same_status_is_unchanged() {
        let mut machine = StatusMachine::new();
        machine.apply(Connecting);
        machine.apply(Speaking);
        assert_eq!(machine.apply(Speaking), Transition::Unchanged);
        assert_eq!(machine.current(), Speaking);
    }

    #[test]
    fn test_idle_is_never_reentered() {
        let mut machine = StatusMachine::new();
        machine.apply(Connecting);
        assert_eq!(
            machine.apply(Idle),
            Transition::Rejected { from: Connecting, to: Idle }
        );
        machine.apply(Stopped);
        assert!(matches!(machine.apply(Idle), Transition::Rejected { .. }));
        assert_eq!(machine.current(), Stopped);
    }

    #[test]
    fn test_stopped_only_leaves_through_a_new_start() {
        let mut machine = StatusMachine::new();
        machine.apply(Connecting);
        machine.apply(Stopped);
        for late in [Connected, Ready, Listening, Speaking, Error] {
            assert!(matches!(machine.apply(late), Transition::Rejected { .. }));
        }
        assert_eq!(
            machine.apply(Connecting),
            Transition::Changed { from: Stopped, to: Connecting }
        );
    }

    #[test]
    fn test_error_allows_stop_and_restart_only() {
        let mut machine = StatusMachine::new();
        machine.apply(Connecting);
        machine.apply(Error);
        assert!(matches!(machine.apply(Ready), Transition::Rejected { .. }));
        assert_eq!(
            machine.apply(Stopped),
            Transition::Changed { from: Error, to: Stopped }
        );
    }

    #[test]
    fn test_last_write_wins_between_active_states() {
        let mut machine = StatusMachine::new();
        machine.apply(Connecting);
        machine.apply(Ready);
        machine.apply(Connected);
        assert_eq!(machine.current(), Connected);
        machine.apply(Ready);
        assert_eq!(machine.current(), Ready);
    }

    #[test]
    fn test_is_active_and_display() {
        assert!(!Idle.is_active());
        assert!(!Stopped.is_active());
        assert!(!Error.is_active());
        assert!(Listening.is_active());
        assert_eq!(Speaking.to_string(), "speaking");
        assert_eq!(serde_json::to_string(&Ready).unwrap(), "\"ready\"");
    }
}
