//! Audio playback to speakers

use std::future::Future;
use std::io::Cursor;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::task::{Context, Poll};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, SampleRate, Stream, StreamConfig};
use tokio::sync::oneshot;

use super::{AudioBuffer, AudioFormat};
use crate::{Error, Result};

/// Sample rate for playback (matches common TTS output)
pub const PLAYBACK_SAMPLE_RATE: u32 = 24000;

/// Input frames per resampler call
const RESAMPLE_CHUNK: usize = 1024;

/// FFT sub-chunks per resampler chunk
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Sink that plays one buffer at a time
pub trait PlaybackSink {
    /// Begin playing `buffer` asynchronously
    ///
    /// The returned [`Completion`] resolves exactly once: `Ok` when the audio
    /// finishes or is stopped early, `Err` if the output device fails while
    /// playing.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Playback`] immediately if the audio cannot be decoded
    /// or the output device cannot be opened
    fn play(&mut self, buffer: AudioBuffer) -> Result<Completion>;

    /// Stop playback; safe to call when nothing is playing
    fn stop(&mut self);

    /// Whether audio is currently playing
    fn is_active(&self) -> bool;
}

/// Sending half of a playback completion; consumed when fired
#[derive(Debug)]
pub struct CompletionSignal {
    tx: oneshot::Sender<Result<()>>,
}

impl CompletionSignal {
    /// Notify the waiter that playback is over
    pub fn fire(self) {
        // Receiver may already be gone (run cleared)
        let _ = self.tx.send(Ok(()));
    }

    /// Notify the waiter that the device failed mid-playback
    pub fn fail(self, error: Error) {
        let _ = self.tx.send(Err(error));
    }
}

/// Single-fire notification that a `play` call has finished
///
/// Dropping the [`CompletionSignal`] without firing resolves it with `Ok`.
#[derive(Debug)]
pub struct Completion {
    rx: oneshot::Receiver<Result<()>>,
}

impl Completion {
    /// Create a connected signal/completion pair
    #[must_use]
    pub fn channel() -> (CompletionSignal, Self) {
        let (tx, rx) = oneshot::channel();
        (CompletionSignal { tx }, Self { rx })
    }
}

impl Future for Completion {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Pin::new(&mut self.rx).poll(cx).map(|r| r.unwrap_or(Ok(())))
    }
}

/// Stream that is currently playing
struct ActivePlayback {
    stream: Stream,
    stopped: Arc<AtomicBool>,
    finished: Arc<AtomicBool>,
    watcher: JoinHandle<()>,
}

/// Plays audio to the default output device
pub struct SpeakerPlayback {
    device: Device,
    config: StreamConfig,
    active: Option<ActivePlayback>,
}

impl SpeakerPlayback {
    /// Create a new audio playback instance
    ///
    /// # Errors
    ///
    /// Returns error if audio device cannot be opened
    pub fn new() -> Result<Self> {
        let host = cpal::default_host();

        let device = host
            .default_output_device()
            .ok_or_else(|| Error::Playback("no output device available".to_string()))?;

        let supported_config = device
            .supported_output_configs()
            .map_err(|e| Error::Playback(e.to_string()))?
            .find(|c| {
                c.channels() == 1
                    && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                    && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
            })
            .or_else(|| {
                // Fallback: try stereo
                device.supported_output_configs().ok()?.find(|c| {
                    c.channels() == 2
                        && c.min_sample_rate() <= SampleRate(PLAYBACK_SAMPLE_RATE)
                        && c.max_sample_rate() >= SampleRate(PLAYBACK_SAMPLE_RATE)
                })
            })
            .ok_or_else(|| Error::Playback("no suitable output config found".to_string()))?;

        let config = supported_config
            .with_sample_rate(SampleRate(PLAYBACK_SAMPLE_RATE))
            .config();

        tracing::debug!(
            device = device.name().unwrap_or_default(),
            sample_rate = PLAYBACK_SAMPLE_RATE,
            channels = config.channels,
            "audio playback initialized"
        );

        Ok(Self {
            device,
            config,
            active: None,
        })
    }
}

impl PlaybackSink for SpeakerPlayback {
    fn play(&mut self, buffer: AudioBuffer) -> Result<Completion> {
        self.stop();

        let samples = decode_audio(&buffer)?;
        if samples.is_empty() {
            return Err(Error::Playback("audio contains no samples".to_string()));
        }

        let channels = usize::from(self.config.channels);
        let sample_count = samples.len();
        let samples = Arc::new(samples);
        let position = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicBool::new(false));
        let stopped = Arc::new(AtomicBool::new(false));
        let fault: Arc<Mutex<Option<String>>> = Arc::default();

        let stream = {
            let samples = Arc::clone(&samples);
            let finished = Arc::clone(&finished);
            let fault = Arc::clone(&fault);
            self.device
                .build_output_stream(
                    &self.config,
                    move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                        for frame in data.chunks_mut(channels) {
                            let pos = position.load(Ordering::Relaxed);
                            let sample = samples.get(pos).copied().unwrap_or_else(|| {
                                finished.store(true, Ordering::Release);
                                0.0
                            });

                            for out in frame.iter_mut() {
                                *out = sample;
                            }

                            if pos < samples.len() {
                                position.store(pos + 1, Ordering::Relaxed);
                            }
                        }
                    },
                    move |err| {
                        tracing::error!(error = %err, "audio playback error");
                        if let Ok(mut slot) = fault.lock() {
                            slot.get_or_insert_with(|| err.to_string());
                        }
                    },
                    None,
                )
                .map_err(|e| Error::Playback(e.to_string()))?
        };

        stream.play().map_err(|e| Error::Playback(e.to_string()))?;

        let (signal, completion) = Completion::channel();
        let duration_ms = (sample_count as u64 * 1000) / u64::from(PLAYBACK_SAMPLE_RATE);
        let watcher = spawn_completion_watcher(
            PlaybackFlags {
                finished: Arc::clone(&finished),
                stopped: Arc::clone(&stopped),
                fault,
            },
            Duration::from_millis(duration_ms + 500),
            signal,
        )?;

        self.active = Some(ActivePlayback {
            stream,
            stopped,
            finished,
            watcher,
        });

        tracing::debug!(samples = sample_count, "playback started");
        Ok(completion)
    }

    fn stop(&mut self) {
        if let Some(active) = self.active.take() {
            active.stopped.store(true, Ordering::Release);
            drop(active.stream);
            if active.watcher.join().is_err() {
                tracing::warn!("playback watcher panicked");
            }
            tracing::debug!("playback stopped");
        }
    }

    fn is_active(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|a| !a.finished.load(Ordering::Acquire))
    }
}

/// State shared between the output callback and the watcher
struct PlaybackFlags {
    finished: Arc<AtomicBool>,
    stopped: Arc<AtomicBool>,
    fault: Arc<Mutex<Option<String>>>,
}

impl PlaybackFlags {
    fn fault(&self) -> Option<String> {
        self.fault.lock().ok().and_then(|slot| slot.clone())
    }
}

/// Watch for the end of playback and resolve the completion once
///
/// A device error or a stream that never drains resolves it with
/// [`Error::Playback`].
fn spawn_completion_watcher(
    flags: PlaybackFlags,
    timeout: Duration,
    signal: CompletionSignal,
) -> Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("playback-watch".into())
        .spawn(move || {
            let start = Instant::now();
            let mut stalled = false;
            while !flags.finished.load(Ordering::Acquire)
                && !flags.stopped.load(Ordering::Acquire)
                && flags.fault().is_none()
            {
                if start.elapsed() > timeout {
                    stalled = true;
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }

            if flags.stopped.load(Ordering::Acquire) {
                signal.fire();
            } else if let Some(fault) = flags.fault() {
                signal.fail(Error::Playback(fault));
            } else if stalled {
                tracing::warn!("playback did not report completion in time");
                signal.fail(Error::Playback("output device stopped responding".to_string()));
            } else {
                // Let the device drain its last period
                std::thread::sleep(Duration::from_millis(100));
                signal.fire();
            }
        })
        .map_err(|e| Error::Playback(format!("failed to spawn playback watcher: {e}")))
}

/// Decode an audio buffer to mono f32 samples at [`PLAYBACK_SAMPLE_RATE`]
///
/// # Errors
///
/// Returns error if the payload is not valid audio of its declared format
pub fn decode_audio(buffer: &AudioBuffer) -> Result<Vec<f32>> {
    let (samples, rate) = match buffer.format {
        AudioFormat::Mp3 => decode_mp3(&buffer.data)?,
        AudioFormat::Wav => decode_wav(&buffer.data)?,
    };
    resample(samples, rate, PLAYBACK_SAMPLE_RATE)
}

/// Decode MP3 bytes to f32 samples
fn decode_mp3(mp3_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut decoder = minimp3::Decoder::new(Cursor::new(mp3_data));
    let mut samples = Vec::new();
    let mut sample_rate = PLAYBACK_SAMPLE_RATE;

    loop {
        match decoder.next_frame() {
            Ok(frame) => {
                if let Ok(rate) = u32::try_from(frame.sample_rate) {
                    sample_rate = rate;
                }

                // Convert i16 samples to f32 and handle stereo to mono
                if frame.channels == 2 {
                    samples.extend(frame.data.chunks(2).map(|chunk| {
                        let left = f32::from(chunk[0]) / 32768.0;
                        let right = f32::from(chunk.get(1).copied().unwrap_or(chunk[0])) / 32768.0;
                        f32::midpoint(left, right)
                    }));
                } else {
                    samples.extend(frame.data.iter().map(|&s| f32::from(s) / 32768.0));
                }
            }
            Err(minimp3::Error::Eof) => break,
            Err(e) => return Err(Error::Playback(format!("MP3 decode error: {e}"))),
        }
    }

    Ok((samples, sample_rate))
}

/// Decode 16-bit PCM WAV bytes to f32 samples
fn decode_wav(wav_data: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(wav_data))
        .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved = reader
        .samples::<i16>()
        .map(|s| s.map(|v| f32::from(v) / 32768.0))
        .collect::<std::result::Result<Vec<f32>, _>>()
        .map_err(|e| Error::Playback(format!("WAV decode error: {e}")))?;

    #[allow(clippy::cast_precision_loss)]
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();

    Ok((mono, spec.sample_rate))
}

/// Resample mono audio using rubato
///
/// Full chunks go through `process`, the tail through `process_partial`, and
/// the resampler's delay is trimmed from the front.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn resample(samples: Vec<f32>, from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{FftFixedIn, Resampler};

    if from_rate == to_rate || samples.is_empty() {
        return Ok(samples);
    }

    let mut resampler = FftFixedIn::<f64>::new(
        from_rate as usize,
        to_rate as usize,
        RESAMPLE_CHUNK,
        RESAMPLE_SUB_CHUNKS,
        1,
    )
    .map_err(|e| Error::Playback(format!("resampler init failed: {e}")))?;

    let input: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let expected = (input.len() as f64 * f64::from(to_rate) / f64::from(from_rate)) as usize;
    let delay = resampler.output_delay();
    let mut output = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);

    let mut chunks = input.chunks_exact(RESAMPLE_CHUNK);
    for chunk in &mut chunks {
        let result = resampler
            .process(&[chunk], None)
            .map_err(|e| Error::Playback(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let result = resampler
            .process_partial(Some(&[tail][..]), None)
            .map_err(|e| Error::Playback(format!("resample failed: {e}")))?;
        output.extend_from_slice(&result[0]);
    }

    // Flush what is still buffered behind the delay
    while output.len() < expected + delay {
        let result = resampler
            .process_partial(None::<&[Vec<f64>]>, None)
            .map_err(|e| Error::Playback(format!("resample failed: {e}")))?;
        if result[0].is_empty() {
            break;
        }
        output.extend_from_slice(&result[0]);
    }

    Ok(output
        .iter()
        .skip(delay)
        .take(expected)
        .map(|&s| s as f32)
        .collect())
}
