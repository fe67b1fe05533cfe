//! Audio capture from microphone

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::oneshot;

use super::{AudioBuffer, AudioFormat};
use crate::{Error, Result};

/// Sample rate for audio capture (16kHz for speech)
pub const SAMPLE_RATE: u32 = 16000;

/// Source of one recorded utterance at a time
///
/// The turn controller is the only caller. It never calls `start` while
/// playback is active and never twice without an intervening `stop`.
pub trait CaptureSource {
    /// Ask for microphone authorization
    ///
    /// Hosts without a permission model grant access unconditionally.
    fn request_permission(&mut self) -> bool {
        true
    }

    /// Begin recording, taking exclusive ownership of the input device
    ///
    /// The returned [`DeviceFault`] resolves if the device fails while
    /// recording; it stays pending otherwise.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Permission`] if access is not authorized and
    /// [`Error::Capture`] if the device is busy or unavailable
    fn start(&mut self) -> Result<DeviceFault>;

    /// Stop recording and hand back what was captured
    ///
    /// Returns `None` if nothing was captured or capture was already stopped.
    fn stop(&mut self) -> Option<AudioBuffer>;

    /// Whether a recording is in progress
    fn is_active(&self) -> bool;
}

/// Raising half of a [`DeviceFault`]; consumed when raised
#[derive(Debug)]
pub struct FaultSignal {
    tx: oneshot::Sender<Error>,
}

impl FaultSignal {
    /// Report a device failure
    pub fn raise(self, error: Error) {
        let _ = self.tx.send(error);
    }
}

/// Resolves with the error that broke a recording
///
/// Never resolves if the [`FaultSignal`] is dropped unraised.
#[derive(Debug)]
pub struct DeviceFault {
    rx: Option<oneshot::Receiver<Error>>,
}

impl DeviceFault {
    /// Create a connected signal/fault pair
    #[must_use]
    pub fn channel() -> (FaultSignal, Self) {
        let (tx, rx) = oneshot::channel();
        (FaultSignal { tx }, Self { rx: Some(rx) })
    }

    /// A fault that never fires
    #[must_use]
    pub const fn none() -> Self {
        Self { rx: None }
    }
}

impl Future for DeviceFault {
    type Output = Error;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Error> {
        let Some(rx) = self.rx.as_mut() else {
            return Poll::Pending;
        };
        match Pin::new(rx).poll(cx) {
            Poll::Ready(Ok(error)) => {
                self.rx = None;
                Poll::Ready(error)
            }
            Poll::Ready(Err(_)) => {
                // Signal dropped: the recording ended cleanly
                self.rx = None;
                Poll::Pending
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Captures audio from the default input device
pub struct MicCapture {
    device: Device,
    config: StreamConfig,
    buffer: Arc<Mutex<Vec<f32>>>,
    stream: Option<Stream>,
}

impl MicCapture {
    /// Create a new audio capture instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_input_device()
            .ok_or_else(|| Error::Capture("no input device available".to_string()))?;

        let supported_config = device
            .supported_input_configs()
            .map_err(|e| Error::Capture(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
            })
            .ok_or_else(|| Error::Capture("no suitable audio config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = SAMPLE_RATE,
            channels = config.channels,
            "audio capture initialized"
        );

        Ok(Self {
            device,
            config,
            buffer: Arc::new(Mutex::new(Vec::new())),
            stream: None,
        })
    }

    /// Get captured samples without clearing
    #[must_use]
    pub fn peek_buffer(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|buf| buf.clone())
            .unwrap_or_default()
    }

    /// Clear the sample buffer
    pub fn clear_buffer(&self) {
        if let Ok(mut buf) = self.buffer.lock() {
            buf.clear();
        }
    }

    /// Take captured samples and clear the buffer
    fn take_samples(&self) -> Vec<f32> {
        self.buffer
            .lock()
            .map(|mut buf| std::mem::take(&mut *buf))
            .unwrap_or_default()
    }
}

impl CaptureSource for MicCapture {
    fn start(&mut self) -> Result<DeviceFault> {
        if self.stream.is_some() {
            return Ok(DeviceFault::none());
        }

        // Each recording is one utterance
        self.clear_buffer();

        let buffer = Arc::clone(&self.buffer);
        let (signal, fault) = DeviceFault::channel();
        let mut signal = Some(signal);
        let stream = self
            .device
            .build_input_stream(
                &self.config,
                move |data: &[f32], _: &cpal::InputCallbackInfo| {
                    if let Ok(mut buf) = buffer.lock() {
                        buf.extend_from_slice(data);
                    }
                },
                move |err| {
                    tracing::error!(error = %err, "audio capture error");
                    if let Some(signal) = signal.take() {
                        signal.raise(Error::Capture(err.to_string()));
                    }
                },
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => {
                    Error::Capture("input device not available".to_string())
                }
                other => Error::Capture(other.to_string()),
            })?;

        stream.play().map_err(|e| Error::Capture(e.to_string()))?;
        self.stream = Some(stream);

        tracing::debug!("audio capture started");
        Ok(fault)
    }

    fn stop(&mut self) -> Option<AudioBuffer> {
        let stream = self.stream.take()?;
        drop(stream);

        let samples = self.take_samples();
        tracing::debug!(samples = samples.len(), "audio capture stopped");

        if samples.is_empty() {
            return None;
        }

        match samples_to_wav(&samples, SAMPLE_RATE) {
            Ok(wav) => Some(AudioBuffer::new(wav, AudioFormat::Wav)),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode recording");
                None
            }
        }
    }

    fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

/// Convert f32 samples to WAV bytes for STT APIs
///
/// # Errors
///
/// Returns error if WAV encoding fails
pub fn samples_to_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Capture(e.to_string()))?;

        for &sample in samples {
            // Convert f32 [-1.0, 1.0] to i16
            #[allow(clippy::cast_possible_truncation)]
            let sample_i16 = (sample * 32767.0).clamp(-32768.0, 32767.0) as i16;
            writer
                .write_sample(sample_i16)
                .map_err(|e| Error::Capture(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Capture(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}
