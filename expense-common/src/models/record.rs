//! Record lifecycle state machine
//!
//! A Record progresses PENDING → PROCESSED → TRANSFORMED → DONE, and may drop
//! to FAILED from any non-terminal state. It never regresses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::Error;

/// Pipeline stage a Record has reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Created at upload, waiting for extraction
    Pending,
    /// Raw provider JSON stored at the Record's JSON path
    Processed,
    /// Canonical Expense stored at the Record's JSON path
    Transformed,
    /// Enriched Expense stored; terminal success
    Done,
    /// Terminal failure
    Failed,
}

impl Status {
    /// Position on the success path; `Failed` sits outside it
    fn rank(self) -> Option<u8> {
        match self {
            Status::Pending => Some(0),
            Status::Processed => Some(1),
            Status::Transformed => Some(2),
            Status::Done => Some(3),
            Status::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Status::Done | Status::Failed)
    }

    /// Whether a persisted status of `self` may be replaced by `next`.
    ///
    /// Re-writing the same state is allowed so a re-delivered event can re-run
    /// its handler. Otherwise only the next step on the success path, or
    /// `Failed` from a non-terminal state, is valid.
    pub fn can_transition_to(self, next: Status) -> bool {
        if self == next {
            return true;
        }
        if self.is_terminal() {
            return false;
        }
        match (self.rank(), next.rank()) {
            (_, None) => true,
            (Some(from), Some(to)) => to == from + 1,
            (None, Some(_)) => false,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Processed => "processed",
            Status::Transformed => "transformed",
            Status::Done => "done",
            Status::Failed => "failed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Status::Pending),
            "processed" => Ok(Status::Processed),
            "transformed" => Ok(Status::Transformed),
            "done" => Ok(Status::Done),
            "failed" => Ok(Status::Failed),
            other => Err(Error::InvalidInput(format!("unknown status '{}'", other))),
        }
    }
}

/// One uploaded document tracked through the pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Assigned at upload
    pub id: Uuid,

    /// Original filename as uploaded
    pub filename: String,

    pub mime_type: String,

    /// Blob path of the raw upload (`<id><ext>`)
    pub path: String,

    /// Blob path of the derived JSON artifact (`<id>.json`), set by extraction
    pub json_path: Option<String>,

    pub status: Status,

    /// Error text captured when the Record failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record {
    /// New pending Record for an upload; the raw blob path is derived from the id
    pub fn new(filename: impl Into<String>, mime_type: impl Into<String>, extension: &str) -> Self {
        let id = Uuid::new_v4();
        let now = Utc::now();
        Self {
            id,
            filename: filename.into(),
            mime_type: mime_type.into(),
            path: upload_path(id, extension),
            json_path: None,
            status: Status::Pending,
            failure: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`, stamping `updated_at`. Returns the previous status.
    pub fn transition_to(&mut self, next: Status) -> Status {
        let old = self.status;
        self.status = next;
        self.updated_at = Utc::now();
        old
    }
}

/// Raw upload artifact: `<id><ext>` (the extension keeps its leading dot)
pub fn upload_path(id: Uuid, extension: &str) -> String {
    if extension.is_empty() || extension.starts_with('.') {
        format!("{}{}", id, extension)
    } else {
        format!("{}.{}", id, extension)
    }
}

/// Extracted, later normalized, JSON artifact: `<id>.json`
pub fn json_path(id: Uuid) -> String {
    format!("{}.json", id)
}

/// Final enriched artifact: `<id>-expense.json`
pub fn expense_path(id: Uuid) -> String {
    format!("{}-expense.json", id)
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 5] = [
        Status::Pending,
        Status::Processed,
        Status::Transformed,
        Status::Done,
        Status::Failed,
    ];

    #[test]
    fn test_success_path_advances_one_step() {
        assert!(Status::Pending.can_transition_to(Status::Processed));
        assert!(Status::Processed.can_transition_to(Status::Transformed));
        assert!(Status::Transformed.can_transition_to(Status::Done));

        assert!(!Status::Pending.can_transition_to(Status::Transformed));
        assert!(!Status::Pending.can_transition_to(Status::Done));
        assert!(!Status::Processed.can_transition_to(Status::Done));
    }

    #[test]
    fn test_never_regresses() {
        assert!(!Status::Processed.can_transition_to(Status::Pending));
        assert!(!Status::Transformed.can_transition_to(Status::Processed));
        assert!(!Status::Done.can_transition_to(Status::Transformed));
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        for status in ALL {
            let expected = !status.is_terminal() || status == Status::Failed;
            assert_eq!(status.can_transition_to(Status::Failed), expected, "{status}");
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        for next in ALL {
            if next != Status::Done {
                assert!(!Status::Done.can_transition_to(next));
            }
            if next != Status::Failed {
                assert!(!Status::Failed.can_transition_to(next));
            }
        }
    }

    #[test]
    fn test_same_state_rewrite_allowed() {
        for status in ALL {
            assert!(status.can_transition_to(status));
        }
    }

    #[test]
    fn test_status_text_round_trip() {
        for status in ALL {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("ready".parse::<Status>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Transformed).unwrap(), "\"transformed\"");
    }

    #[test]
    fn test_artifact_naming() {
        let record = Record::new("receipt.pdf", "application/pdf", ".pdf");
        let id = record.id;

        assert_eq!(record.path, format!("{}.pdf", id));
        assert_eq!(upload_path(id, "png"), format!("{}.png", id));
        assert_eq!(upload_path(id, ""), id.to_string());
        assert_eq!(json_path(id), format!("{}.json", id));
        assert_eq!(expense_path(id), format!("{}-expense.json", id));
    }

    #[test]
    fn test_new_record_is_pending() {
        let record = Record::new("scan.jpg", "image/jpeg", ".jpg");
        assert_eq!(record.status, Status::Pending);
        assert!(record.json_path.is_none());
        assert!(record.failure.is_none());
    }

    #[test]
    fn test_transition_returns_previous_status() {
        let mut record = Record::new("scan.jpg", "image/jpeg", ".jpg");
        let before = record.updated_at;
        let old = record.transition_to(Status::Processed);

        assert_eq!(old, Status::Pending);
        assert_eq!(record.status, Status::Processed);
        assert!(record.updated_at >= before);
    }
}
