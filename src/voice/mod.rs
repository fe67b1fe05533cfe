//! Voice I/O module
//!
//! Handles microphone capture and speaker playback. Both sides are exposed
//! as traits so the turn controller can be driven by real devices or by
//! scripted collaborators in tests.

mod capture;
mod playback;

pub use capture::{
    CaptureSource, DeviceFault, FaultSignal, MicCapture, SAMPLE_RATE, samples_to_wav,
};
pub use playback::{
    Completion, CompletionSignal, PLAYBACK_SAMPLE_RATE, PlaybackSink, SpeakerPlayback, decode_audio,
};

/// Encoding of an [`AudioBuffer`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    /// 16-bit PCM WAV (captured speech)
    Wav,
    /// MPEG layer 3 (synthesized speech)
    Mp3,
}

impl AudioFormat {
    /// MIME type used when uploading
    #[must_use]
    pub const fn mime(self) -> &'static str {
        match self {
            Self::Wav => "audio/wav",
            Self::Mp3 => "audio/mpeg",
        }
    }

    /// File name used for multipart uploads
    #[must_use]
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Wav => "audio.wav",
            Self::Mp3 => "audio.mp3",
        }
    }
}

/// Opaque audio payload passed between capture, remote services and playback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioBuffer {
    /// Encoded bytes
    pub data: Vec<u8>,
    /// Encoding of `data`
    pub format: AudioFormat,
}

impl AudioBuffer {
    /// Create a new buffer
    #[must_use]
    pub const fn new(data: Vec<u8>, format: AudioFormat) -> Self {
        Self { data, format }
    }

    /// Byte length of the payload
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
