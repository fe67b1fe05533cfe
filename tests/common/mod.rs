//! Shared test utilities
//!
//! Recording stand-ins for the microphone, the speaker and the remote
//! pipeline, so the turn controller can be driven without audio hardware or
//! network access.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use lumi::config::ConversationConfig;
use lumi::remote::RemoteResult;
use lumi::voice::{Completion, CompletionSignal, DeviceFault, FaultSignal};
use lumi::{
    AudioBuffer, AudioFormat, CaptureSource, ChatTurn, ControllerHandle, Error, PlaybackSink,
    RemoteError, RemotePipeline, Stage, TurnController,
};

/// Upper bound for anything a test waits on
pub const WAIT: Duration = Duration::from_secs(5);

/// Await `fut`, failing the test if it takes longer than [`WAIT`]
pub async fn within<F: Future>(fut: F) -> F::Output {
    tokio::time::timeout(WAIT, fut)
        .await
        .expect("timed out waiting")
}

/// What the fake devices have been asked to do
#[derive(Default)]
pub struct DeviceLog {
    pub permission_denied: bool,
    pub silent: bool,
    pub fail_playback: bool,
    pub capture_active: bool,
    pub playback_active: bool,
    pub capture_starts: usize,
    pub capture_double_starts: usize,
    pub plays: usize,
    /// Set if capture and playback were ever active together
    pub overlap_seen: bool,
    pending_signal: Option<CompletionSignal>,
    stopped_signals: Vec<CompletionSignal>,
    capture_fault: Option<FaultSignal>,
}

/// Shared view of both fake devices
#[derive(Clone, Default)]
pub struct Devices {
    log: Arc<Mutex<DeviceLog>>,
    playback_started: Arc<Notify>,
}

impl Devices {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn capture(&self) -> MockCapture {
        MockCapture {
            devices: self.clone(),
        }
    }

    #[must_use]
    pub fn playback(&self) -> MockPlayback {
        MockPlayback {
            devices: self.clone(),
        }
    }

    /// Inspect or tweak the log
    pub fn with<T>(&self, f: impl FnOnce(&mut DeviceLog) -> T) -> T {
        f(&mut self.log.lock().expect("device log poisoned"))
    }

    /// Wait until the speaker starts playing a reply
    pub async fn playback_started(&self) {
        within(self.playback_started.notified()).await;
    }

    /// Let the current reply play to its end
    pub fn finish_playback(&self) {
        let signal = self
            .with(|log| log.pending_signal.take())
            .expect("no reply is playing");
        signal.fire();
    }

    /// Break the speaker while the current reply plays
    pub fn break_speaker(&self, reason: &str) {
        let signal = self
            .with(|log| log.pending_signal.take())
            .expect("no reply is playing");
        signal.fail(Error::Playback(reason.to_string()));
    }

    /// Break the microphone while it records
    pub fn break_microphone(&self, reason: &str) {
        let signal = self
            .with(|log| log.capture_fault.take())
            .expect("microphone is not recording");
        signal.raise(Error::Capture(reason.to_string()));
    }

    /// Fire completion for replies that were stopped early
    pub fn fire_stopped_completions(&self) {
        let signals = self.with(|log| std::mem::take(&mut log.stopped_signals));
        for signal in signals {
            signal.fire();
        }
    }

    #[must_use]
    pub fn capture_starts(&self) -> usize {
        self.with(|log| log.capture_starts)
    }

    #[must_use]
    pub fn capture_active(&self) -> bool {
        self.with(|log| log.capture_active)
    }

    #[must_use]
    pub fn playback_active(&self) -> bool {
        self.with(|log| log.playback_active)
    }

    /// Neither overlap nor a double start was ever observed
    pub fn assert_exclusive(&self) {
        self.with(|log| {
            assert!(!log.overlap_seen, "capture and playback overlapped");
            assert_eq!(log.capture_double_starts, 0, "capture started twice");
        });
    }
}

/// Fake microphone
pub struct MockCapture {
    devices: Devices,
}

impl CaptureSource for MockCapture {
    fn request_permission(&mut self) -> bool {
        !self.devices.with(|log| log.permission_denied)
    }

    fn start(&mut self) -> lumi::Result<DeviceFault> {
        self.devices.with(|log| {
            if log.permission_denied {
                return Err(Error::Permission("denied by test".to_string()));
            }
            if log.capture_active {
                log.capture_double_starts += 1;
            }
            if log.playback_active {
                log.overlap_seen = true;
            }
            log.capture_active = true;
            log.capture_starts += 1;
            let (signal, fault) = DeviceFault::channel();
            log.capture_fault = Some(signal);
            Ok(fault)
        })
    }

    fn stop(&mut self) -> Option<AudioBuffer> {
        self.devices.with(|log| {
            if !log.capture_active {
                return None;
            }
            log.capture_active = false;
            log.capture_fault = None;
            if log.silent {
                None
            } else {
                Some(AudioBuffer::new(vec![0; 64], AudioFormat::Wav))
            }
        })
    }

    fn is_active(&self) -> bool {
        self.devices.capture_active()
    }
}

/// Fake speaker; replies play until [`Devices::finish_playback`]
pub struct MockPlayback {
    devices: Devices,
}

impl PlaybackSink for MockPlayback {
    fn play(&mut self, _buffer: AudioBuffer) -> lumi::Result<Completion> {
        let completion = self.devices.with(|log| {
            if log.fail_playback {
                return Err(Error::Playback("speaker unplugged".to_string()));
            }
            if log.capture_active {
                log.overlap_seen = true;
            }
            let (signal, completion) = Completion::channel();
            log.pending_signal = Some(signal);
            log.playback_active = true;
            log.plays += 1;
            Ok(completion)
        })?;
        self.devices.playback_started.notify_one();
        Ok(completion)
    }

    fn stop(&mut self) {
        self.devices.with(|log| {
            log.playback_active = false;
            if let Some(signal) = log.pending_signal.take() {
                log.stopped_signals.push(signal);
            }
        });
    }

    fn is_active(&self) -> bool {
        self.devices.playback_active()
    }
}

/// Scripted remote pipeline
///
/// Transcripts and replies are popped from queues, falling back to
/// numbered defaults. A stage can be held open until released or cancelled.
#[derive(Default)]
pub struct ScriptedRemote {
    transcripts: Mutex<VecDeque<String>>,
    replies: Mutex<VecDeque<String>>,
    failure: Mutex<Option<(Stage, RemoteError)>>,
    hold: Mutex<Option<Stage>>,
    ignore_cancel: Mutex<bool>,
    entered: Notify,
    released: Notify,
    pub contexts: Mutex<Vec<Vec<ChatTurn>>>,
    pub languages: Mutex<Vec<Option<String>>>,
    pub transcribe_calls: AtomicUsize,
    pub reply_calls: AtomicUsize,
    pub synthesize_calls: AtomicUsize,
    pub cancellations: AtomicUsize,
}

impl ScriptedRemote {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn push_transcript(&self, text: &str) {
        self.transcripts.lock().unwrap().push_back(text.to_string());
    }

    pub fn push_reply(&self, text: &str) {
        self.replies.lock().unwrap().push_back(text.to_string());
    }

    /// Make `stage` fail with `error`
    pub fn fail(&self, stage: Stage, error: RemoteError) {
        *self.failure.lock().unwrap() = Some((stage, error));
    }

    /// Hold `stage` open until [`release`](Self::release) or cancellation
    pub fn hold(&self, stage: Stage) {
        *self.hold.lock().unwrap() = Some(stage);
    }

    /// Keep held stages open even after cancellation
    pub fn ignore_cancel(&self) {
        *self.ignore_cancel.lock().unwrap() = true;
    }

    /// Let a held stage finish
    pub fn release(&self) {
        *self.hold.lock().unwrap() = None;
        self.released.notify_one();
    }

    /// Wait until a call reaches the held stage
    pub async fn entered(&self) {
        within(self.entered.notified()).await;
    }

    pub fn context(&self, index: usize) -> Vec<ChatTurn> {
        self.contexts.lock().unwrap()[index].clone()
    }

    async fn stage(&self, stage: Stage, cancel: &CancellationToken) -> RemoteResult<()> {
        let held = *self.hold.lock().unwrap() == Some(stage);
        if held {
            self.entered.notify_one();
            if *self.ignore_cancel.lock().unwrap() {
                self.released.notified().await;
            } else {
                tokio::select! {
                    () = cancel.cancelled() => {
                        self.cancellations.fetch_add(1, Ordering::SeqCst);
                        return Err(RemoteError::Cancelled);
                    }
                    () = self.released.notified() => {}
                }
            }
        }

        match &*self.failure.lock().unwrap() {
            Some((failing, error)) if *failing == stage => Err(error.clone()),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RemotePipeline for ScriptedRemote {
    async fn transcribe(
        &self,
        _audio: &AudioBuffer,
        language: Option<&str>,
        cancel: &CancellationToken,
    ) -> RemoteResult<String> {
        let n = self.transcribe_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.languages
            .lock()
            .unwrap()
            .push(language.map(ToString::to_string));
        self.stage(Stage::Transcribe, cancel).await?;
        Ok(self
            .transcripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("user {n}")))
    }

    async fn generate_reply(
        &self,
        context: &[ChatTurn],
        cancel: &CancellationToken,
    ) -> RemoteResult<String> {
        let n = self.reply_calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.contexts.lock().unwrap().push(context.to_vec());
        self.stage(Stage::GenerateReply, cancel).await?;
        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| format!("reply {n}")))
    }

    async fn synthesize(&self, text: &str, cancel: &CancellationToken) -> RemoteResult<AudioBuffer> {
        self.synthesize_calls.fetch_add(1, Ordering::SeqCst);
        self.stage(Stage::Synthesize, cancel).await?;
        Ok(AudioBuffer::new(text.as_bytes().to_vec(), AudioFormat::Mp3))
    }
}

/// A controller running on its own task
pub struct Harness {
    pub devices: Devices,
    pub remote: Arc<ScriptedRemote>,
    pub handle: ControllerHandle,
    pub task: JoinHandle<()>,
}

impl Harness {
    /// Start a controller with default settings and wait until it listens
    pub async fn start() -> Self {
        let harness = Self::spawn(Devices::new(), ConversationConfig::default());
        harness.wait_listening().await;
        harness
    }

    /// Start a controller without waiting for any state
    #[must_use]
    pub fn spawn(devices: Devices, settings: ConversationConfig) -> Self {
        let remote = ScriptedRemote::new();
        let (controller, handle) = TurnController::new(
            devices.capture(),
            devices.playback(),
            Arc::clone(&remote) as Arc<dyn RemotePipeline>,
            settings,
        );
        let task = tokio::spawn(controller.run());
        Self {
            devices,
            remote,
            handle,
            task,
        }
    }

    pub async fn wait_listening(&self) {
        within(self.handle.wait_for(lumi::SessionState::is_listening))
            .await
            .expect("controller stopped");
    }

    pub async fn wait_idle(&self) {
        within(self.handle.wait_for(lumi::SessionState::is_idle))
            .await
            .expect("controller stopped");
    }

    pub async fn wait_error(&self) -> String {
        let state = within(self.handle.wait_for(|s| s.error().is_some()))
            .await
            .expect("controller stopped");
        state.error().unwrap_or_default().to_string()
    }

    /// Commit and wait until the reply starts playing
    pub async fn turn_until_playback(&self) {
        self.handle.commit().unwrap();
        self.devices.playback_started().await;
    }

    /// One complete turn ending back in listening
    pub async fn full_turn(&self) {
        self.turn_until_playback().await;
        self.devices.finish_playback();
        self.wait_listening().await;
    }

    /// Let the controller drain queued work
    pub async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
