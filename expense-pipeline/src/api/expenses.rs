//! Expense API handlers
//!
//! POST /expenses, GET /expenses/:id, GET /expenses/:id/expense

use axum::{
    extract::{Multipart, Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use expense_common::models::{expense_path, Expense, Record, Status};
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::intake::accept_upload;
use crate::AppState;

/// Multipart field carrying the document
pub const UPLOAD_FIELD: &str = "file";

const FALLBACK_MIME: &str = "application/octet-stream";

/// POST /expenses
///
/// Accepts one document in the `file` multipart field and starts the
/// pipeline. Returns 201 with the pending Record.
pub async fn upload_expense(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> ApiResult<(StatusCode, Json<Record>)> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {}", e)))?
    {
        if field.name() != Some(UPLOAD_FIELD) {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let mime = field.content_type().unwrap_or(FALLBACK_MIME).to_string();
        let bytes = field
            .bytes()
            .await
            .map_err(|e| ApiError::BadRequest(format!("Cannot read upload: {}", e)))?;

        let record = accept_upload(&state.intake(), &filename, &mime, &bytes).await?;
        return Ok((StatusCode::CREATED, Json(record)));
    }

    Err(ApiError::BadRequest(format!(
        "Missing multipart field '{}'",
        UPLOAD_FIELD
    )))
}

/// GET /expenses/:id
pub async fn get_record(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Record>> {
    Ok(Json(state.records.get(id).await?))
}

/// GET /expenses/:id/expense
///
/// The enriched Expense; 409 until the Record is `done`.
pub async fn get_expense(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> ApiResult<Json<Expense>> {
    let record = state.records.get(id).await?;
    if record.status != Status::Done {
        return Err(ApiError::Conflict(format!(
            "Record {} is {}, expense not available",
            id, record.status
        )));
    }

    let bytes = state.blobs.get(&expense_path(id)).await?;
    let expense: Expense = serde_json::from_slice(&bytes)
        .map_err(|e| ApiError::Internal(format!("Stored expense is unreadable: {}", e)))?;
    Ok(Json(expense))
}

/// Build expense routes
pub fn expense_routes() -> Router<AppState> {
    Router::new()
        .route("/expenses", post(upload_expense))
        .route("/expenses/:id", get(get_record))
        .route("/expenses/:id/expense", get(get_expense))
}
