//! Upload intake
//!
//! Validates an uploaded document, stores it, creates its `pending` Record and
//! starts the pipeline with a `new` event.

use chrono::Utc;
use expense_common::blob::BlobStore;
use expense_common::db::RecordStore;
use expense_common::events::{EventBus, ExpenseEvent};
use expense_common::models::Record;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

use crate::dispatch::{DispatchError, Dispatcher, EventKind};

/// Accepted MIME types and the extension used when the filename has none
pub const ALLOWED_MIME_TYPES: [(&str, &str); 7] = [
    ("application/pdf", ".pdf"),
    ("image/gif", ".gif"),
    ("image/tiff", ".tiff"),
    ("image/jpeg", ".jpg"),
    ("image/png", ".png"),
    ("image/bmp", ".bmp"),
    ("image/webp", ".webp"),
];

#[derive(Debug, Error)]
pub enum IntakeError {
    #[error("Unsupported media type '{0}'")]
    UnsupportedMediaType(String),

    #[error("Empty upload")]
    Empty,

    #[error(transparent)]
    Storage(#[from] expense_common::Error),

    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Default extension for `mime`, or `None` when the type is not accepted.
/// Parameters such as `; charset=` are ignored.
pub fn allowed_extension(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or_default().trim();
    ALLOWED_MIME_TYPES
        .iter()
        .find(|(allowed, _)| allowed.eq_ignore_ascii_case(essence))
        .map(|(_, ext)| *ext)
}

/// `.ext` of `filename` (lowercased), falling back to `default`
fn extension_for(filename: &str, default: &str) -> String {
    Path::new(filename)
        .extension()
        .and_then(|ext| ext.to_str())
        .filter(|ext| !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(|ext| format!(".{}", ext.to_ascii_lowercase()))
        .unwrap_or_else(|| default.to_string())
}

/// Collaborators needed to accept an upload
#[derive(Clone)]
pub struct Intake {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub events: EventBus,
}

/// Accept one upload. Nothing is stored when validation fails.
pub async fn accept_upload(
    intake: &Intake,
    filename: &str,
    mime: &str,
    bytes: &[u8],
) -> Result<Record, IntakeError> {
    let default_ext = allowed_extension(mime)
        .ok_or_else(|| IntakeError::UnsupportedMediaType(mime.to_string()))?;
    if bytes.is_empty() {
        return Err(IntakeError::Empty);
    }
    if intake.dispatcher.is_shutting_down() {
        return Err(DispatchError::ShuttingDown.into());
    }

    let record = Record::new(filename, mime, &extension_for(filename, default_ext));
    intake.blobs.store(&record.path, bytes).await?;
    intake.records.create(&record).await?;

    info!(
        record_id = %record.id,
        filename = %record.filename,
        mime_type = %record.mime_type,
        size = bytes.len(),
        "Upload accepted"
    );
    intake.events.emit_lossy(ExpenseEvent::RecordCreated {
        record_id: record.id,
        filename: record.filename.clone(),
        timestamp: Utc::now(),
    });

    intake
        .dispatcher
        .submit(EventKind::New, record.clone(), None)?;
    Ok(record)
}
