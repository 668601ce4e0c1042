//! Extraction providers
//!
//! A provider turns a stored upload into raw, provider-specific JSON at
//! `<id>.json`. Synchronous providers have stored it by the time `process`
//! returns; asynchronous providers only submit a job, and the
//! [`ResultPoller`] later fetches the result through [`ExtractionProvider::poll`].
//!
//! The concrete provider is chosen once at startup from
//! [`ProcessorConfig`] by [`build_provider`].

pub mod docu_intel;
pub mod document_ai;
pub mod poller;

pub use docu_intel::DocuIntelProvider;
pub use document_ai::DocumentAiProvider;
pub use poller::ResultPoller;

use async_trait::async_trait;
use expense_common::blob::BlobStore;
use expense_common::config::ProcessorConfig;
use expense_common::models::Record;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::schema::Schema;

/// Timeout for a single provider HTTP request
pub(crate) const PROVIDER_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ExtractionError {
    /// Transport failure or timeout
    #[error("Network error: {0}")]
    Network(String),

    /// Provider answered with a status other than the expected one
    #[error("Unexpected provider status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Provider response carries no job id")]
    MissingJobId,

    /// Provider reports the job itself failed
    #[error("Provider job failed: {0}")]
    JobFailed(String),

    /// Result Poller ran out of attempts
    #[error("Result polling exhausted after {attempts} attempts (last error: {last_error})")]
    Exhausted { attempts: u32, last_error: String },

    #[error("Cannot decode provider response: {0}")]
    Decode(String),

    #[error("Storage error: {0}")]
    Storage(#[from] expense_common::Error),

    #[error("Provider configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for ExtractionError {
    fn from(e: reqwest::Error) -> Self {
        ExtractionError::Network(e.to_string())
    }
}

/// Result of [`ExtractionProvider::process`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submission {
    /// Raw JSON is already stored at `<id>.json`
    Stored,
    /// Job accepted; the result must be polled
    Submitted { job_id: String },
}

/// One status query against an asynchronous job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobPoll {
    Running,
    /// Final raw payload
    Succeeded(Vec<u8>),
}

#[async_trait]
pub trait ExtractionProvider: Send + Sync {
    /// Schema of the raw payloads this provider produces
    fn schema(&self) -> Schema;

    /// Start extraction for `record`
    async fn process(&self, record: &Record) -> Result<Submission, ExtractionError>;

    /// Query an asynchronous job. Synchronous providers never hand out job ids.
    async fn poll(&self, job_id: &str) -> Result<JobPoll, ExtractionError> {
        Err(ExtractionError::Config(format!(
            "{} provider does not run asynchronous jobs (job {})",
            self.schema(),
            job_id
        )))
    }
}

/// Build the configured provider
pub fn build_provider(
    config: &ProcessorConfig,
    blobs: Arc<dyn BlobStore>,
) -> Result<Arc<dyn ExtractionProvider>, ExtractionError> {
    match config {
        ProcessorConfig::DocuIntel(c) => {
            let key = c.key.clone().ok_or_else(|| {
                ExtractionError::Config("docu-intel requires a subscription key".to_string())
            })?;
            tracing::info!(endpoint = %c.endpoint, model = %c.model_id, "Using Document Intelligence provider");
            Ok(Arc::new(DocuIntelProvider::new(
                &c.endpoint,
                &c.model_id,
                &c.api_version,
                key,
                blobs,
            )?))
        }
        ProcessorConfig::DocumentAi(c) => {
            let token = c.access_token.clone().ok_or_else(|| {
                ExtractionError::Config("document-ai requires an access token".to_string())
            })?;
            tracing::info!(endpoint = %c.endpoint, processor = %c.processor_id, "Using Document AI provider");
            Ok(Arc::new(DocumentAiProvider::new(
                &c.endpoint,
                &c.project_id,
                &c.location,
                &c.processor_id,
                token,
                blobs,
            )?))
        }
    }
}

pub(crate) fn http_client() -> Result<reqwest::Client, ExtractionError> {
    reqwest::Client::builder()
        .timeout(PROVIDER_TIMEOUT)
        .build()
        .map_err(|e| ExtractionError::Config(format!("Failed to create HTTP client: {}", e)))
}
