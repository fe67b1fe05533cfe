//! Transcript store
//!
//! Append-only log of the utterances exchanged in the conversation. The turn
//! controller is the only writer; the presentation layer reads snapshots and
//! subscribes to appends.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Channel capacity for transcript appends
const CHANNEL_CAPACITY: usize = 64;

/// Who produced an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// The person speaking into the microphone
    User,
    /// The generated reply
    Assistant,
}

impl Role {
    /// Wire name used by chat APIs
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One turn of text, immutable once created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Utterance {
    /// Unique identifier
    pub id: Uuid,
    /// Speaker
    pub role: Role,
    /// Text content
    pub text: String,
    /// When the stage that produced it completed
    pub produced_at: DateTime<Utc>,
}

impl Utterance {
    /// Create an utterance stamped with the current time
    #[must_use]
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            produced_at: Utc::now(),
        }
    }
}

/// Shared, append-only utterance log
///
/// Clones share the same log.
#[derive(Clone)]
pub struct Transcript {
    entries: Arc<RwLock<Vec<Utterance>>>,
    tx: broadcast::Sender<Utterance>,
}

impl Default for Transcript {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Transcript {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transcript")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

impl Transcript {
    /// Create an empty transcript
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(Vec::new())),
            tx,
        }
    }

    /// Subscribe to appended utterances
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Utterance> {
        self.tx.subscribe()
    }

    /// Append a new utterance and notify subscribers
    pub fn append(&self, role: Role, text: impl Into<String>) -> Utterance {
        let utterance = Utterance::new(role, text);
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(utterance.clone());

        // Ignore errors if no subscribers
        let _ = self.tx.send(utterance.clone());

        tracing::debug!(role = %utterance.role, chars = utterance.text.len(), "utterance appended");
        utterance
    }

    /// Copy of every utterance in order
    #[must_use]
    pub fn snapshot(&self) -> Vec<Utterance> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The most recent `limit` utterances in order
    #[must_use]
    pub fn recent(&self, limit: usize) -> Vec<Utterance> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let start = entries.len().saturating_sub(limit);
        entries[start..].to_vec()
    }

    /// Number of utterances
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no utterance has been appended yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
