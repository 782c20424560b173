//! Change events flowing from the event listener to the reconciler.
//!
//! Every event carries a sequence number assigned by the listener. Sequence
//! numbers start at 1 and strictly increase; the reconciler uses them to
//! decide whether a completed fetch is still current.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier of a spool in the inventory service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpoolId(pub u64);

impl fmt::Display for SpoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SpoolId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Kind of change that triggered a reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The host became operational for the first time
    Ready,

    /// The active spool changed (including to "no spool selected")
    RecordChanged,
}

/// A single sequenced change notification.
///
/// Immutable once produced; consumed exactly once by the reconciler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    /// Strictly increasing sequence number (first event is 1)
    pub sequence: u64,

    /// Active spool, or `None` when no spool is selected
    pub record_id: Option<SpoolId>,

    /// What triggered the event
    pub kind: ChangeKind,
}

impl ChangeEvent {
    /// Create a `Ready` event
    pub fn ready(sequence: u64, record_id: Option<SpoolId>) -> Self {
        Self {
            sequence,
            record_id,
            kind: ChangeKind::Ready,
        }
    }

    /// Create a `RecordChanged` event
    pub fn record_changed(sequence: u64, record_id: Option<SpoolId>) -> Self {
        Self {
            sequence,
            record_id,
            kind: ChangeKind::RecordChanged,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.kind == ChangeKind::Ready
    }
}
