use std::fmt;

use serde::Serialize;

/// # Session phase machine
///
/// Exactly one phase is active at a time and only the controller moves it.
///
/// ```text
///   ┌──────┐  connect()  ┌────────────┐   link up   ┌──────────────┐
///   │ Idle ├────────────►│ Connecting ├────────────►│ Initializing │
///   └──────┘             └──▲──────┬──┘◄────────────┴──┬───────────┘
///                           │      │   next attempt    │ all groups read
///                 reconnect │      │ attempts          ▼
///                  (delay)  │      │ exhausted  ┌──────────────┐ write ┌───────────────┐
///                        ┌──┴──────▼────┐       │ SessionReady ├──────►│ OptionalWrite │
///                        │ Disconnected │       │              │◄──────┤               │
///                        └──────▲───────┘       └──────┬───────┘ done  └───────┬───────┘
///                               │   ┌────────────────┐ │ disconnect()          │
///                               └───┤ SessionClosing │◄┴───────────────────────┘
///                                   └────────────────┘
/// ```
///
/// Polling runs only in `SessionReady` and `OptionalWrite`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No session has been started.
    #[default]
    Idle,
    /// Opening the link and negotiating.
    Connecting,
    /// Link is up; reading every group once.
    Initializing,
    /// Polling.
    SessionReady,
    /// Polling at degraded cadence while writes hold the transport.
    OptionalWrite,
    /// Caller-initiated teardown in progress.
    SessionClosing,
    /// No link. A reconnect may be pending unless the caller disconnected.
    Disconnected,
}

impl SessionPhase {
    /// Whether the polling loop is allowed to issue reads.
    pub fn is_polling(self) -> bool {
        matches!(self, SessionPhase::SessionReady | SessionPhase::OptionalWrite)
    }

    /// Whether a link is held or being built.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionPhase::Connecting
                | SessionPhase::Initializing
                | SessionPhase::SessionReady
                | SessionPhase::OptionalWrite
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Connecting => "connecting",
            SessionPhase::Initializing => "initializing",
            SessionPhase::SessionReady => "session_ready",
            SessionPhase::OptionalWrite => "optional_write",
            SessionPhase::SessionClosing => "session_closing",
            SessionPhase::Disconnected => "disconnected",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn polling_phases() {
        let polling: Vec<_> = [
            SessionPhase::Idle,
            SessionPhase::Connecting,
            SessionPhase::Initializing,
            SessionPhase::SessionReady,
            SessionPhase::OptionalWrite,
            SessionPhase::SessionClosing,
            SessionPhase::Disconnected,
        ]
        .into_iter()
        .filter(|p| p.is_polling())
        .collect();
        assert_eq!(polling, vec![SessionPhase::SessionReady, SessionPhase::OptionalWrite]);
    }

    #[test]
    fn closing_is_not_active() {
        assert!(!SessionPhase::SessionClosing.is_active());
        assert!(SessionPhase::Initializing.is_active());
        assert_eq!(SessionPhase::default(), SessionPhase::Idle);
    }
}
