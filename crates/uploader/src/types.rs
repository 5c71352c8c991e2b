//! Queue data types.

use std::fmt;
use std::sync::Arc;

use ingest_protocol::UploadItem;

/// Position of an entry in admission order.
///
/// Indices are never reused within one queue; they render as decimal
/// strings (`"0"`, `"1"`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueIndex(pub u64);

impl fmt::Display for QueueIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scheduler state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueState {
    /// Not processing; `add` is accepted.
    Idle,
    /// Processing entries in admission order.
    Running,
    /// A stop was requested; the active entry is finishing.
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Queued,
    Active,
}

/// One admitted item.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub index: QueueIndex,
    pub item: UploadItem,
    pub status: EntryStatus,
}

/// Notification emitted by the queue.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// An item was admitted.
    Announced {
        index: QueueIndex,
        item: Arc<UploadItem>,
    },
    /// An entry became active.
    Started { index: QueueIndex },
    Progress { index: QueueIndex, percent: u8 },
    /// Informational; the entry keeps running.
    Warning { index: QueueIndex, message: String },
    /// Terminal success. Batched entries share one response.
    Success {
        index: QueueIndex,
        response: Arc<serde_json::Value>,
    },
    /// Terminal failure.
    Error { index: QueueIndex, message: String },
    /// The queue went back to idle.
    Complete,
}

impl QueueEvent {
    /// Index the event refers to, if any.
    pub fn index(&self) -> Option<QueueIndex> {
        match self {
            QueueEvent::Announced { index, .. }
            | QueueEvent::Started { index }
            | QueueEvent::Progress { index, .. }
            | QueueEvent::Warning { index, .. }
            | QueueEvent::Success { index, .. }
            | QueueEvent::Error { index, .. } => Some(*index),
            QueueEvent::Complete => None,
        }
    }

    /// Whether the event ends an entry.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueEvent::Success { .. } | QueueEvent::Error { .. })
    }
}
