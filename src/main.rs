use std::io::BufRead;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use lumi::voice::{
    AudioBuffer, AudioFormat, MicCapture, PLAYBACK_SAMPLE_RATE, SpeakerPlayback, samples_to_wav,
};
use lumi::{
    CaptureSource, Config, ControllerHandle, Notice, OpenAiClient, PlaybackSink, RemotePipeline,
    SessionState, TurnController, WithTimeout,
};

/// LUMI - Talk to a chat model with your voice
#[derive(Parser)]
#[command(name = "lumi", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory)
    #[arg(short, long, env = "LUMI_CONFIG")]
    config: Option<PathBuf>,

    /// Language hint for transcription (e.g. "ja", "en")
    #[arg(short, long)]
    language: Option<String>,

    /// Stay idle after each reply instead of listening again
    #[arg(long)]
    manual_listen: bool,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
#[allow(clippy::enum_variant_names)]
enum Command {
    /// Test microphone input
    TestMic {
        /// Duration in seconds
        #[arg(short, long, default_value = "5")]
        duration: u64,
    },
    /// Test speaker output
    TestSpeaker,
    /// Test TTS output
    TestTts {
        /// Text to speak
        #[arg(default_value = "Hello! This is a test of the text to speech system.")]
        text: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Before parsing so .env can supply clap's env fallbacks
    let dotenv = dotenvy::dotenv();
    let cli = Cli::parse();

    // Set up logging based on verbosity
    let filter = match cli.verbose {
        0 => "warn,lumi=info",
        1 => "info,lumi=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_writer(std::io::stderr)
        .init();

    // Process environment wins over .env
    if let Ok(path) = dotenv {
        tracing::debug!(path = %path.display(), "loaded .env");
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

#[allow(clippy::future_not_send)]
async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::TestMic { duration }) = cli.command {
        return test_mic(duration).await;
    }
    if let Some(Command::TestSpeaker) = cli.command {
        return test_speaker().await;
    }

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(language) = cli.language {
        config.conversation.language = Some(language);
    }
    if cli.manual_listen {
        config.conversation.auto_rearm = false;
    }
    tracing::debug!(?config, "loaded configuration");

    if let Some(Command::TestTts { text }) = cli.command {
        return test_tts(&config, &text).await;
    }

    converse(config).await
}

#[allow(clippy::future_not_send)]
async fn converse(config: Config) -> anyhow::Result<()> {
    let client = OpenAiClient::new(&config.remote)?;
    let remote: Arc<dyn RemotePipeline> =
        Arc::new(WithTimeout::new(client, config.remote.request_timeout));

    let capture = MicCapture::new()?;
    let playback = SpeakerPlayback::new()?;

    let (controller, handle) = TurnController::new(capture, playback, remote, config.conversation);

    println!("LUMI - speak, then press Enter to send.");
    println!("Commands: [Enter] send | c clear | l listen | q quit\n");

    tokio::spawn(print_events(handle.clone()));
    tokio::spawn(shutdown_on_ctrl_c(handle.clone()));
    spawn_input_reader(handle);

    // Audio streams are not Send; drive the controller on this task
    controller.run().await;
    Ok(())
}

/// Forward stdin lines to the controller
///
/// Runs on a plain thread so a pending read never blocks runtime shutdown.
fn spawn_input_reader(handle: ControllerHandle) {
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let sent = match line.trim() {
                "" => handle.commit(),
                "c" | "clear" => handle.clear(),
                "l" | "listen" => handle.listen(),
                "q" | "quit" => {
                    let _ = handle.shutdown();
                    return;
                }
                other => {
                    println!("Unknown command: {other}");
                    Ok(())
                }
            };
            if sent.is_err() {
                return;
            }
        }
        // stdin closed
        let _ = handle.shutdown();
    });
}

async fn shutdown_on_ctrl_c(handle: ControllerHandle) {
    if tokio::signal::ctrl_c().await.is_ok() {
        tracing::info!("interrupted");
        let _ = handle.shutdown();
    }
}

async fn print_events(handle: ControllerHandle) {
    let mut states = handle.subscribe_state();
    let mut utterances = handle.subscribe_transcript();
    let mut notices = handle.subscribe_notices();

    loop {
        tokio::select! {
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = states.borrow_and_update().clone();
                print_state(&state);
            }
            utterance = utterances.recv() => match utterance {
                Ok(utterance) => println!("{}: {}", utterance.role, utterance.text),
                Err(RecvError::Lagged(n)) => tracing::warn!(skipped = n, "transcript display lagged"),
                Err(RecvError::Closed) => break,
            },
            Ok(notice) = notices.recv() => match notice {
                Notice::PermissionDenied(reason) => {
                    println!("Microphone access denied ({reason}).");
                    println!("Grant access to the microphone, then type 'l' to listen.");
                }
            },
        }
    }
}

fn print_state(state: &SessionState) {
    match state {
        SessionState::Idle => println!("[idle] type 'l' to listen"),
        SessionState::Listening => println!("[listening] press Enter when done speaking"),
        SessionState::Busy => println!("[thinking]"),
        SessionState::Error(message) => println!("[error] {message} (type 'c' to retry)"),
    }
}

/// Test microphone input
#[allow(clippy::future_not_send)]
async fn test_mic(duration: u64) -> anyhow::Result<()> {
    println!("Testing microphone for {duration} seconds...");
    println!("Speak into your microphone!\n");

    let mut capture = MicCapture::new()?;
    let _fault = capture.start()?;
    println!("---");

    for i in 0..duration {
        tokio::time::sleep(Duration::from_secs(1)).await;

        let samples = capture.peek_buffer();
        let energy = calculate_rms(&samples);
        let peak = samples.iter().map(|s| s.abs()).fold(0.0f32, f32::max);

        // Visual meter
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let meter_len = (energy * 100.0).min(50.0) as usize;
        let meter: String = "█".repeat(meter_len) + &" ".repeat(50 - meter_len);

        println!(
            "[{:2}s] RMS: {:.4} | Peak: {:.4} | [{}]",
            i + 1,
            energy,
            peak,
            meter
        );

        capture.clear_buffer();
    }

    let _ = capture.stop();

    println!("\n---");
    println!("If you saw movement in the meter, your mic is working!");
    println!("If RMS stayed near 0, check that the input device is connected and unmuted.");

    Ok(())
}

/// Calculate RMS energy of audio samples
#[allow(clippy::cast_precision_loss)]
fn calculate_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Test speaker output with a sine wave
#[allow(clippy::future_not_send)]
async fn test_speaker() -> anyhow::Result<()> {
    println!("Testing speaker output...");
    println!("You should hear a 440Hz tone for 2 seconds\n");

    let frequency = 440.0_f32;
    let num_samples = PLAYBACK_SAMPLE_RATE as usize * 2;

    #[allow(clippy::cast_precision_loss)]
    let samples: Vec<f32> = (0..num_samples)
        .map(|i| {
            let t = i as f32 / PLAYBACK_SAMPLE_RATE as f32;
            (2.0 * std::f32::consts::PI * frequency * t).sin() * 0.3
        })
        .collect();

    let wav = samples_to_wav(&samples, PLAYBACK_SAMPLE_RATE)?;
    play_to_end(AudioBuffer::new(wav, AudioFormat::Wav)).await?;

    println!("\n---");
    println!("If you heard the tone, your speakers are working!");

    Ok(())
}

/// Test TTS output
#[allow(clippy::future_not_send)]
async fn test_tts(config: &Config, text: &str) -> anyhow::Result<()> {
    println!("Testing TTS with text: \"{text}\"\n");

    let client = WithTimeout::new(
        OpenAiClient::new(&config.remote)?,
        config.remote.request_timeout,
    );

    println!("Synthesizing speech...");
    let audio = client
        .synthesize(text, &CancellationToken::new())
        .await
        .map_err(|e| anyhow::anyhow!("TTS synthesis failed: {e}"))?;
    println!("Got {} bytes of audio data", audio.len());

    println!("Playing audio...");
    play_to_end(audio).await?;
    println!("Done!");

    Ok(())
}

#[allow(clippy::future_not_send)]
async fn play_to_end(audio: AudioBuffer) -> anyhow::Result<()> {
    let mut playback = SpeakerPlayback::new()?;
    let completion = playback.play(audio)?;
    let outcome = completion.await;
    playback.stop();
    Ok(outcome?)
}
