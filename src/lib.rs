//! LUMI - Voice conversation loop
//!
//! Listens to the microphone, sends each utterance through a remote
//! speech-to-text → chat → text-to-speech pipeline, plays the reply and
//! listens again.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │              Presentation (CLI / UI)                 │
//! │   commit  │  clear  │  state  │  transcript         │
//! └────────────────────┬────────────────────────────────┘
//!                      │ ControllerHandle
//! ┌────────────────────▼────────────────────────────────┐
//! │                 Turn Controller                      │
//! │   Capture  │  Pipeline run  │  Playback  │ Transcript│
//! └────────────────────┬────────────────────────────────┘
//!                      │
//! ┌────────────────────▼────────────────────────────────┐
//! │              Remote pipeline (OpenAI)                │
//! │   STT  │  Chat  │  TTS                              │
//! └─────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod controller;
pub mod error;
pub mod remote;
pub mod transcript;
pub mod voice;

pub use config::Config;
pub use controller::{ControllerHandle, Notice, SessionState, TurnController};
pub use error::{Error, RemoteError, Result, Stage};
pub use remote::{ChatRole, ChatTurn, OpenAiClient, RemotePipeline, WithTimeout};
pub use transcript::{Role, Transcript, Utterance};
pub use voice::{AudioBuffer, AudioFormat, CaptureSource, PlaybackSink};
