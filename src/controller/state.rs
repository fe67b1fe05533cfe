//! Session state of the conversation loop

use std::fmt;

/// What the conversation loop is doing right now
///
/// Exactly one value at any instant. Capture is only ever active in
/// `Listening`; playback only ever in `Busy`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No capture, no playback, no run
    #[default]
    Idle,
    /// Microphone is recording the next utterance
    Listening,
    /// A pipeline run is in flight (including playback of its reply)
    Busy,
    /// A stage failed; left only through `clear()`
    Error(String),
}

impl SessionState {
    /// Whether the microphone is recording
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        matches!(self, Self::Listening)
    }

    /// Whether a run is in flight
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        matches!(self, Self::Busy)
    }

    /// Whether the loop is idle
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Failure cause, if in the error state
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Error(message) => Some(message),
            _ => None,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Listening => f.write_str("listening"),
            Self::Busy => f.write_str("busy"),
            Self::Error(message) => write!(f, "error: {message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_is_idle() {
        assert_eq!(SessionState::default(), SessionState::Idle);
    }

    #[test]
    fn test_error_exposes_cause() {
        let state = SessionState::Error("no input".to_string());
        assert_eq!(state.error(), Some("no input"));
        assert_eq!(state.to_string(), "error: no input");
        assert!(SessionState::Listening.error().is_none());
    }

    #[test]
    fn test_predicates() {
        assert!(SessionState::Listening.is_listening());
        assert!(SessionState::Busy.is_busy());
        assert!(SessionState::Idle.is_idle());
        assert!(!SessionState::Busy.is_listening());
    }
}
