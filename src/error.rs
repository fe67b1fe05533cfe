//! Error types for LUMI

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for LUMI operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the conversation loop
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Microphone access not authorized
    #[error("microphone permission denied: {0}")]
    Permission(String),

    /// Commit with nothing recorded (or nothing recognized)
    #[error("no input")]
    NoInput,

    /// Audio capture device error
    #[error("capture error: {0}")]
    Capture(String),

    /// Audio playback device or decode error
    #[error("playback error: {0}")]
    Playback(String),

    /// A remote pipeline stage failed
    #[error("{stage} failed: {source}")]
    Remote {
        /// Stage that failed
        stage: Stage,
        /// Underlying failure
        #[source]
        source: RemoteError,
    },

    /// The turn controller task is no longer running
    #[error("turn controller is no longer running")]
    ControllerClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Wrap a remote failure with the stage it came from
    #[must_use]
    pub const fn remote(stage: Stage, source: RemoteError) -> Self {
        Self::Remote { stage, source }
    }
}

/// Remote pipeline stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Speech-to-text
    Transcribe,
    /// Reply generation
    GenerateReply,
    /// Text-to-speech
    Synthesize,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transcribe => "transcribe",
            Self::GenerateReply => "generate reply",
            Self::Synthesize => "synthesize",
        };
        f.write_str(name)
    }
}

/// Failure of a single remote call
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// Service unreachable or connection dropped
    #[error("transport error: {0}")]
    Transport(String),

    /// Service answered with a non-2xx status
    #[error("service error {status}: {message}")]
    Service {
        /// HTTP status code
        status: u16,
        /// Response body or service message
        message: String,
    },

    /// Response body could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// Call exceeded its time bound
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Call abandoned by the caller
    #[error("cancelled")]
    Cancelled,
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Decode(e.to_string())
        } else if e.is_timeout() {
            Self::Transport(format!("request timed out: {e}"))
        } else {
            Self::Transport(e.to_string())
        }
    }
}
