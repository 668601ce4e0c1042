//! expense-pipeline library interface
//!
//! Receipt processing pipeline: extraction, normalization and enrichment of
//! uploaded documents, driven by the event [`dispatch::Dispatcher`], plus the
//! HTTP front end that accepts uploads.

pub mod api;
pub mod dispatch;
pub mod enrich;
pub mod error;
pub mod extraction;
pub mod intake;
pub mod normalize;
pub mod schema;

pub use crate::error::{ApiError, ApiResult};

use axum::extract::DefaultBodyLimit;
use axum::Router;
use chrono::{DateTime, Utc};
use expense_common::blob::BlobStore;
use expense_common::db::RecordStore;
use expense_common::events::EventBus;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::dispatch::Dispatcher;
use crate::intake::Intake;

/// Default request body limit for uploads
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub records: Arc<dyn RecordStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub event_bus: EventBus,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    pub max_upload_bytes: usize,
}

impl AppState {
    pub fn new(
        records: Arc<dyn RecordStore>,
        blobs: Arc<dyn BlobStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        let event_bus = dispatcher.event_bus().clone();
        Self {
            records,
            blobs,
            dispatcher,
            event_bus,
            startup_time: Utc::now(),
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }

    pub fn with_max_upload_bytes(mut self, max_upload_bytes: usize) -> Self {
        self.max_upload_bytes = max_upload_bytes;
        self
    }

    pub fn intake(&self) -> Intake {
        Intake {
            records: self.records.clone(),
            blobs: self.blobs.clone(),
            dispatcher: self.dispatcher.clone(),
            events: self.event_bus.clone(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    let body_limit = state.max_upload_bytes;

    Router::new()
        .merge(api::expense_routes())
        .merge(api::health_routes())
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
