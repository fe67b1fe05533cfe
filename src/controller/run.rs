//! One traversal of transcribe → generate reply → synthesize
//!
//! Runs as its own task and reports each completed stage back to the
//! controller. The controller decides what, if anything, to do with them.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{RemoteError, Stage};
use crate::remote::{ChatTurn, RemotePipeline};
use crate::voice::AudioBuffer;
use crate::{Error, Result};

/// Monotonic pipeline run identifier
pub type RunId = u64;

/// Stage outcome reported by a run
#[derive(Debug)]
pub(super) struct RunEvent {
    pub run: RunId,
    pub kind: RunEventKind,
}

#[derive(Debug)]
pub(super) enum RunEventKind {
    /// Stage 1 produced the user's text
    Transcribed(String),
    /// Stage 2 produced the reply text
    Replied(String),
    /// Stage 3 produced the reply audio
    Synthesized(AudioBuffer),
    /// A stage failed; later stages did not run
    Failed(Error),
}

/// Inputs of one run
pub(super) struct RunRequest {
    pub id: RunId,
    pub audio: AudioBuffer,
    /// System prompt and prior utterances; the new user text is appended
    pub context: Vec<ChatTurn>,
    pub language: Option<String>,
}

/// Start a run on its own task
pub(super) fn spawn_run(
    remote: Arc<dyn RemotePipeline>,
    request: RunRequest,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<RunEvent>,
) {
    tokio::spawn(async move {
        let id = request.id;
        let outcome = execute(remote.as_ref(), request, &cancel, &events).await;

        if cancel.is_cancelled() {
            tracing::debug!(run = id, "run cancelled");
            return;
        }

        let kind = match outcome {
            Ok(audio) => RunEventKind::Synthesized(audio),
            Err(e) => RunEventKind::Failed(e),
        };
        // Controller gone means shutdown
        let _ = events.send(RunEvent { run: id, kind });
    });
}

async fn execute(
    remote: &dyn RemotePipeline,
    request: RunRequest,
    cancel: &CancellationToken,
    events: &mpsc::UnboundedSender<RunEvent>,
) -> Result<AudioBuffer> {
    let RunRequest {
        id,
        audio,
        mut context,
        language,
    } = request;

    let emit = |kind| {
        let _ = events.send(RunEvent { run: id, kind });
    };

    let text = remote
        .transcribe(&audio, language.as_deref(), cancel)
        .await
        .map_err(|e| Error::remote(Stage::Transcribe, e))?;
    let text = text.trim().to_string();
    if text.is_empty() {
        return Err(Error::NoInput);
    }
    emit(RunEventKind::Transcribed(text.clone()));

    context.push(ChatTurn::user(text));
    still_wanted(cancel, Stage::GenerateReply)?;
    let reply = remote
        .generate_reply(&context, cancel)
        .await
        .map_err(|e| Error::remote(Stage::GenerateReply, e))?;
    emit(RunEventKind::Replied(reply.clone()));

    still_wanted(cancel, Stage::Synthesize)?;
    remote
        .synthesize(&reply, cancel)
        .await
        .map_err(|e| Error::remote(Stage::Synthesize, e))
}

/// Stop between stages once the run has been abandoned
fn still_wanted(cancel: &CancellationToken, next: Stage) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::remote(next, RemoteError::Cancelled));
    }
    Ok(())
}
