//! Google Document AI provider (synchronous call)
//!
//! Sends the raw upload inline and stores the returned `document` object at
//! `<id>.json` before returning.
//!
//! # API Reference
//! - `POST {endpoint}/v1/projects/{project}/locations/{location}/processors/{id}:process`
//!   with `{"rawDocument": {"content": <base64>, "mimeType": ...}}`

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use expense_common::blob::BlobStore;
use expense_common::models::{json_path, Record};
use reqwest::Client;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::{http_client, ExtractionError, ExtractionProvider, Submission};
use crate::schema::Schema;

pub struct DocumentAiProvider {
    http: Client,
    process_url: String,
    access_token: String,
    blobs: Arc<dyn BlobStore>,
}

impl DocumentAiProvider {
    pub fn new(
        endpoint: &str,
        project_id: &str,
        location: &str,
        processor_id: &str,
        access_token: String,
        blobs: Arc<dyn BlobStore>,
    ) -> Result<Self, ExtractionError> {
        let process_url = format!(
            "{}/v1/projects/{}/locations/{}/processors/{}:process",
            endpoint.trim_end_matches('/'),
            project_id,
            location,
            processor_id
        );
        Ok(Self {
            http: http_client()?,
            process_url,
            access_token,
            blobs,
        })
    }
}

#[async_trait]
impl ExtractionProvider for DocumentAiProvider {
    fn schema(&self) -> Schema {
        Schema::DocumentAi
    }

    async fn process(&self, record: &Record) -> Result<Submission, ExtractionError> {
        let content = self.blobs.get(&record.path).await?;
        debug!(record_id = %record.id, bytes = content.len(), "Sending document for processing");

        let response = self
            .http
            .post(&self.process_url)
            .bearer_auth(&self.access_token)
            .json(&json!({
                "rawDocument": {
                    "content": BASE64.encode(&content),
                    "mimeType": record.mime_type,
                }
            }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let mut body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ExtractionError::Decode(e.to_string()))?;
        let document = match body.get_mut("document") {
            Some(doc) if doc.is_object() => doc.take(),
            _ => {
                return Err(ExtractionError::Decode(
                    "response has no document object".to_string(),
                ))
            }
        };

        let bytes = serde_json::to_vec(&document)
            .map_err(|e| ExtractionError::Decode(e.to_string()))?;
        self.blobs.store(&json_path(record.id), &bytes).await?;

        Ok(Submission::Stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use expense_common::blob::InMemoryBlobStore;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PROCESS_PATH: &str = "/v1/projects/demo/locations/eu/processors/p1:process";

    async fn setup(server: &MockServer) -> (DocumentAiProvider, Arc<InMemoryBlobStore>, Record) {
        let blobs = Arc::new(InMemoryBlobStore::new());
        let record = Record::new("r.png", "image/png", ".png");
        blobs.store(&record.path, b"png-bytes").await.unwrap();

        let provider = DocumentAiProvider::new(
            &server.uri(),
            "demo",
            "eu",
            "p1",
            "token".to_string(),
            blobs.clone(),
        )
        .unwrap();
        (provider, blobs, record)
    }

    #[tokio::test]
    async fn test_process_stores_document() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(PROCESS_PATH))
            .and(header("authorization", "Bearer token"))
            .and(body_partial_json(json!({
                "rawDocument": { "content": BASE64.encode(b"png-bytes"), "mimeType": "image/png" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "document": { "entities": [ { "type": "currency", "mentionText": "EUR" } ] }
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (provider, blobs, record) = setup(&server).await;
        assert_eq!(provider.process(&record).await.unwrap(), Submission::Stored);

        let stored = blobs.get(&json_path(record.id)).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&stored).unwrap();
        assert_eq!(value["entities"][0]["mentionText"], "EUR");
    }

    #[tokio::test]
    async fn test_error_status_stores_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (provider, blobs, record) = setup(&server).await;
        let err = provider.process(&record).await.unwrap_err();

        assert!(matches!(err, ExtractionError::Status { status: 503, .. }));
        assert!(!blobs.contains(&json_path(record.id)).await);
    }

    #[tokio::test]
    async fn test_missing_upload_is_storage_error() {
        let server = MockServer::start().await;
        let (provider, _, _) = setup(&server).await;
        let other = Record::new("missing.pdf", "application/pdf", ".pdf");

        let err = provider.process(&other).await.unwrap_err();
        assert!(matches!(err, ExtractionError::Storage(_)));
    }

    #[tokio::test]
    async fn test_poll_is_not_supported() {
        let server = MockServer::start().await;
        let (provider, _, _) = setup(&server).await;
        assert!(matches!(provider.poll("job").await, Err(ExtractionError::Config(_))));
    }
}
