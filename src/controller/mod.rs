//! Turn controller
//!
//! Owns the session state and sequences capture, the remote pipeline and
//! playback. Runs as a single task; the presentation layer drives it through
//! a [`ControllerHandle`]. Every state change happens on this task, so
//! `commit`, `clear` and stage completions are applied one at a time in the
//! order they arrive.

mod handle;
mod run;
mod state;

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::ConversationConfig;
use crate::remote::{ChatTurn, RemotePipeline};
use crate::transcript::{Role, Transcript};
use crate::voice::{AudioBuffer, CaptureSource, Completion, DeviceFault, PlaybackSink};
use crate::{Error, Result};

use handle::Command;
use run::{RunEvent, RunEventKind, RunRequest, spawn_run};

pub use handle::{ControllerHandle, Notice};
pub use run::RunId;
pub use state::SessionState;

/// Channel capacity for notices
const NOTICE_CAPACITY: usize = 16;

/// The pipeline run the controller is currently waiting on
struct ActiveRun {
    id: RunId,
    cancel: CancellationToken,
    /// Set once the reply audio started playing
    playback: Option<Completion>,
}

/// Conversation state machine
///
/// Generic over the devices so tests can substitute recorders for the
/// microphone and speaker.
pub struct TurnController<C, P> {
    capture: C,
    playback: P,
    remote: Arc<dyn RemotePipeline>,
    settings: ConversationConfig,
    transcript: Transcript,
    state: watch::Sender<SessionState>,
    notices: broadcast::Sender<Notice>,
    commands: mpsc::UnboundedReceiver<Command>,
    events_tx: mpsc::UnboundedSender<RunEvent>,
    events_rx: mpsc::UnboundedReceiver<RunEvent>,
    active: Option<ActiveRun>,
    /// Fires if the microphone fails while listening
    capture_fault: Option<DeviceFault>,
    next_run: RunId,
}

impl<C: CaptureSource, P: PlaybackSink> TurnController<C, P> {
    /// Create a controller and the handle that drives it
    ///
    /// Nothing happens until [`run`](Self::run) is awaited.
    #[must_use]
    pub fn new(
        capture: C,
        playback: P,
        remote: Arc<dyn RemotePipeline>,
        settings: ConversationConfig,
    ) -> (Self, ControllerHandle) {
        let (commands_tx, commands) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state, state_rx) = watch::channel(SessionState::Idle);
        let (notices, _) = broadcast::channel(NOTICE_CAPACITY);
        let transcript = Transcript::new();

        let handle = ControllerHandle::new(
            commands_tx,
            state_rx,
            transcript.clone(),
            notices.clone(),
        );

        let controller = Self {
            capture,
            playback,
            remote,
            settings,
            transcript,
            state,
            notices,
            commands,
            events_tx,
            events_rx,
            active: None,
            capture_fault: None,
            next_run: 1,
        };

        (controller, handle)
    }

    /// Drive the conversation until shutdown
    ///
    /// Asks for microphone access first and starts listening if granted.
    /// Returns after [`ControllerHandle::shutdown`] or once every handle is
    /// dropped, with both devices released.
    pub async fn run(mut self) {
        tracing::info!(auto_rearm = self.settings.auto_rearm, "turn controller started");

        if self.capture.request_permission() {
            self.start_listening();
        } else {
            self.permission_denied("microphone access was not granted".to_string());
        }

        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle_command(command),
                },
                Some(event) = self.events_rx.recv() => self.handle_run_event(event),
                (run, outcome) = playback_finished(self.active.as_mut()) => {
                    self.on_playback_finished(run, outcome);
                }
                error = device_fault(self.capture_fault.as_mut()) => {
                    self.capture_fault = None;
                    self.fail(error);
                }
            }
        }

        self.release();
        self.set_state(SessionState::Idle);
        tracing::info!("turn controller stopped");
    }

    fn handle_command(&mut self, command: Command) {
        tracing::debug!(?command, state = %self.session(), "command received");
        match command {
            Command::Commit => self.commit(),
            Command::Clear => self.clear(),
            Command::Listen => self.listen(),
            Command::Shutdown => {}
        }
    }

    fn session(&self) -> SessionState {
        self.state.borrow().clone()
    }

    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next.clone());
        if previous != next {
            tracing::info!(from = %previous, to = %next, "session state changed");
        }
    }

    /// Listening → Busy
    fn commit(&mut self) {
        if !self.session().is_listening() {
            tracing::debug!(state = %self.session(), "commit ignored");
            return;
        }

        let Some(audio) = self.stop_capture() else {
            self.fail(Error::NoInput);
            return;
        };

        let id = self.next_run;
        self.next_run += 1;
        let cancel = CancellationToken::new();

        tracing::info!(run = id, audio_bytes = audio.len(), "utterance committed");

        spawn_run(
            Arc::clone(&self.remote),
            RunRequest {
                id,
                audio,
                context: self.reply_context(),
                language: self.settings.language.clone(),
            },
            cancel.clone(),
            self.events_tx.clone(),
        );

        self.active = Some(ActiveRun {
            id,
            cancel,
            playback: None,
        });
        self.set_state(SessionState::Busy);
    }

    /// Any state → Listening
    ///
    /// Cancels the run before touching the devices so its completion can
    /// no longer be observed.
    fn clear(&mut self) {
        tracing::info!(state = %self.session(), "clearing session");
        self.release();
        self.start_listening();
    }

    /// Idle → Listening
    fn listen(&mut self) {
        if !self.session().is_idle() {
            tracing::debug!(state = %self.session(), "listen ignored");
            return;
        }
        self.start_listening();
    }

    fn handle_run_event(&mut self, event: RunEvent) {
        let current = self.active.as_ref().map(|run| run.id);
        if current != Some(event.run) {
            tracing::debug!(run = event.run, "discarding result of abandoned run");
            return;
        }

        match event.kind {
            RunEventKind::Transcribed(text) => {
                self.transcript.append(Role::User, text);
            }
            RunEventKind::Replied(text) => {
                self.transcript.append(Role::Assistant, text);
            }
            RunEventKind::Synthesized(audio) => match self.playback.play(audio) {
                Ok(completion) => {
                    if let Some(run) = self.active.as_mut() {
                        run.playback = Some(completion);
                    }
                }
                Err(e) => self.fail(e),
            },
            RunEventKind::Failed(e) => self.fail(e),
        }
    }

    /// Busy → Listening (or Idle without auto re-arm)
    fn on_playback_finished(&mut self, run: RunId, outcome: Result<()>) {
        self.active = None;
        if let Err(e) = outcome {
            self.fail(e);
            return;
        }
        self.playback.stop();
        tracing::info!(run, "reply played");

        if self.settings.auto_rearm {
            self.start_listening();
        } else {
            self.set_state(SessionState::Idle);
        }
    }

    fn start_listening(&mut self) {
        if self.playback.is_active() {
            tracing::warn!("playback still active; stopping before capture");
            self.playback.stop();
        }

        if self.capture.is_active() {
            self.set_state(SessionState::Listening);
            return;
        }

        match self.capture.start() {
            Ok(fault) => {
                self.capture_fault = Some(fault);
                self.set_state(SessionState::Listening);
            }
            Err(Error::Permission(reason)) => self.permission_denied(reason),
            Err(e) => self.fail(e),
        }
    }

    fn permission_denied(&self, reason: String) {
        tracing::warn!(%reason, "microphone permission denied");
        self.set_state(SessionState::Idle);
        // No subscribers is fine
        let _ = self.notices.send(Notice::PermissionDenied(reason));
    }

    fn fail(&mut self, error: Error) {
        tracing::warn!(error = %error, "turn failed");
        self.release();
        self.set_state(SessionState::Error(error.to_string()));
    }

    /// Cancel the active run and stop both devices
    fn release(&mut self) {
        if let Some(run) = self.active.take() {
            tracing::debug!(run = run.id, "cancelling run");
            run.cancel.cancel();
        }
        self.playback.stop();
        if self.stop_capture().is_some() {
            tracing::debug!("discarded partial recording");
        }
    }

    fn stop_capture(&mut self) -> Option<AudioBuffer> {
        self.capture_fault = None;
        self.capture.stop()
    }

    /// System prompt followed by the most recent utterances
    fn reply_context(&self) -> Vec<ChatTurn> {
        let history = self.transcript.recent(self.settings.history_limit);
        let mut context = Vec::with_capacity(history.len() + 2);
        if !self.settings.system_prompt.trim().is_empty() {
            context.push(ChatTurn::system(self.settings.system_prompt.as_str()));
        }
        context.extend(history.iter().map(ChatTurn::from));
        context
    }
}

/// Resolves with the run id once the active run's reply stops playing
async fn playback_finished(active: Option<&mut ActiveRun>) -> (RunId, Result<()>) {
    match active {
        Some(ActiveRun {
            id,
            playback: Some(completion),
            ..
        }) => {
            let outcome = completion.await;
            (*id, outcome)
        }
        _ => std::future::pending().await,
    }
}

/// Resolves with the microphone's error if it fails while listening
async fn device_fault(fault: Option<&mut DeviceFault>) -> Error {
    match fault {
        Some(fault) => fault.await,
        None => std::future::pending().await,
    }
}
