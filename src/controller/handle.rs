//! Cloneable front door to a running turn controller

use tokio::sync::{broadcast, mpsc, watch};

use super::SessionState;
use crate::transcript::{Transcript, Utterance};
use crate::{Error, Result};

/// Requests delivered to the controller task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Command {
    Commit,
    Clear,
    Listen,
    Shutdown,
}

/// Out-of-band events for the presentation layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// Microphone access was refused; the loop stays idle
    PermissionDenied(String),
}

/// Handle used by the presentation layer
///
/// Commands are queued and applied in order by the controller task. State
/// and transcript are observable without going through the queue.
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionState>,
    transcript: Transcript,
    notices: broadcast::Sender<Notice>,
}

impl ControllerHandle {
    pub(super) const fn new(
        commands: mpsc::UnboundedSender<Command>,
        state: watch::Receiver<SessionState>,
        transcript: Transcript,
        notices: broadcast::Sender<Notice>,
    ) -> Self {
        Self {
            commands,
            state,
            transcript,
            notices,
        }
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::ControllerClosed)
    }

    /// End the current utterance and start a pipeline run
    ///
    /// Ignored unless the loop is listening.
    ///
    /// # Errors
    ///
    /// Returns error if the controller has stopped
    pub fn commit(&self) -> Result<()> {
        self.send(Command::Commit)
    }

    /// Abandon whatever is in progress and start listening again
    ///
    /// # Errors
    ///
    /// Returns error if the controller has stopped
    pub fn clear(&self) -> Result<()> {
        self.send(Command::Clear)
    }

    /// Start listening from idle
    ///
    /// # Errors
    ///
    /// Returns error if the controller has stopped
    pub fn listen(&self) -> Result<()> {
        self.send(Command::Listen)
    }

    /// Release the devices and stop the controller
    ///
    /// # Errors
    ///
    /// Returns error if the controller has already stopped
    pub fn shutdown(&self) -> Result<()> {
        self.send(Command::Shutdown)
    }

    /// Current session state
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }

    /// Watch session state changes
    #[must_use]
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.clone()
    }

    /// Wait until the session state satisfies `predicate`
    ///
    /// # Errors
    ///
    /// Returns error if the controller stops before the state matches
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&SessionState) -> bool,
    ) -> Result<SessionState> {
        let mut rx = self.state.clone();
        let state = rx
            .wait_for(predicate)
            .await
            .map_err(|_| Error::ControllerClosed)?;
        Ok(state.clone())
    }

    /// Copy of the transcript in order
    #[must_use]
    pub fn transcript(&self) -> Vec<Utterance> {
        self.transcript.snapshot()
    }

    /// Subscribe to transcript appends
    #[must_use]
    pub fn subscribe_transcript(&self) -> broadcast::Receiver<Utterance> {
        self.transcript.subscribe()
    }

    /// Subscribe to notices
    #[must_use]
    pub fn subscribe_notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }
}
