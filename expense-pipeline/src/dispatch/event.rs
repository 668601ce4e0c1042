//! Pipeline work items

use expense_common::models::Record;
use std::fmt;

/// Message kind of an [`Event`]; selects the stage handler
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    New,
    Processed,
    Transformed,
    Done,
    Failed,
    /// Anything else; handled as a failure
    Unknown(String),
}

impl EventKind {
    pub fn as_str(&self) -> &str {
        match self {
            EventKind::New => "new",
            EventKind::Processed => "processed",
            EventKind::Transformed => "transformed",
            EventKind::Done => "done",
            EventKind::Failed => "failed",
            EventKind::Unknown(kind) => kind,
        }
    }
}

impl From<&str> for EventKind {
    fn from(kind: &str) -> Self {
        match kind {
            "new" => EventKind::New,
            "processed" => EventKind::Processed,
            "transformed" => EventKind::Transformed,
            "done" => EventKind::Done,
            "failed" => EventKind::Failed,
            other => EventKind::Unknown(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One queued unit of pipeline work
#[derive(Debug, Clone)]
pub struct Event {
    /// Snapshot taken when the event was submitted
    pub record: Record,
    pub kind: EventKind,
    /// Schema name on `processed`, error text on `failed`
    pub payload: Option<String>,
    /// Sequence token the receiving handler must present to write the Record
    pub token: u64,
}

impl Event {
    pub fn new(record: Record, kind: EventKind, payload: Option<String>, token: u64) -> Self {
        Self {
            record,
            kind,
            payload,
            token,
        }
    }

    pub fn failed(record: Record, error: impl Into<String>, token: u64) -> Self {
        Self::new(record, EventKind::Failed, Some(error.into()), token)
    }
}
