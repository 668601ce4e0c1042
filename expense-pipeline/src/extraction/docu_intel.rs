//! Azure Document Intelligence provider (asynchronous job)
//!
//! The service fetches the document itself from a public URL, so the Blob
//! Store must be able to hand one out.
//!
//! # API Reference
//! - Submit: `POST {endpoint}/formrecognizer/documentModels/{model}:analyze?api-version={v}`
//!   answers 202 with the job id in the `apim-request-id` header
//! - Poll: `GET {endpoint}/formrecognizer/documentModels/{model}/analyzeResults/{job}?api-version={v}`
//!   answers 200 with `status` = `notStarted` | `running` | `succeeded` | `failed`

use async_trait::async_trait;
use expense_common::blob::BlobStore;
use expense_common::models::Record;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::{http_client, ExtractionError, ExtractionProvider, JobPoll, Submission};
use crate::schema::Schema;

const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";
const JOB_ID_HEADER: &str = "apim-request-id";

pub struct DocuIntelProvider {
    http: Client,
    endpoint: String,
    model_id: String,
    api_version: String,
    key: String,
    blobs: Arc<dyn BlobStore>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeStatus {
    status: String,
    #[serde(default)]
    error: Option<AnalyzeError>,
}

#[derive(Debug, Deserialize)]
struct AnalyzeError {
    #[serde(default)]
    code: String,
    #[serde(default)]
    message: String,
}

impl DocuIntelProvider {
    pub fn new(
        endpoint: &str,
        model_id: &str,
        api_version: &str,
        key: String,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self, ExtractionError> {
        Ok(Self {
            http: http_client()?,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            model_id: model_id.to_string(),
            api_version: api_version.to_string(),
            key,
            blobs,
        })
    }

    fn analyze_url(&self) -> String {
        format!(
            "{}/formrecognizer/documentModels/{}:analyze?api-version={}",
            self.endpoint, self.model_id, self.api_version
        )
    }

    fn result_url(&self, job_id: &str) -> String {
        format!(
            "{}/formrecognizer/documentModels/{}/analyzeResults/{}?api-version={}",
            self.endpoint, self.model_id, job_id, self.api_version
        )
    }
}

#[async_trait]
impl ExtractionProvider for DocuIntelProvider {
    fn schema(&self) -> Schema {
        Schema::DocuIntel
    }

    async fn process(&self, record: &Record) -> Result<Submission, ExtractionError> {
        let document_url = self.blobs.public_url(&record.path)?;
        debug!(record_id = %record.id, url = %document_url, "Submitting analyze job");

        let response = self
            .http
            .post(self.analyze_url())
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .json(&json!({ "urlSource": document_url }))
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::ACCEPTED {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let job_id = response
            .headers()
            .get(JOB_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .ok_or(ExtractionError::MissingJobId)?
            .to_string();

        Ok(Submission::Submitted { job_id })
    }

    async fn poll(&self, job_id: &str) -> Result<JobPoll, ExtractionError> {
        let response = self
            .http
            .get(self.result_url(job_id))
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .send()
            .await?;

        let status = response.status();
        let body = response.bytes().await?;
        if status != StatusCode::OK {
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let parsed: AnalyzeStatus =
            serde_json::from_slice(&body).map_err(|e| ExtractionError::Decode(e.to_string()))?;

        match parsed.status.as_str() {
            "succeeded" => Ok(JobPoll::Succeeded(body.to_vec())),
            "failed" => {
                let detail = parsed
                    .error
                    .map(|e| format!("{}: {}", e.code, e.message))
                    .unwrap_or_else(|| "no error detail".to_string());
                Err(ExtractionError::JobFailed(detail))
            }
            _ => Ok(JobPoll::Running),
        }
    }
}
