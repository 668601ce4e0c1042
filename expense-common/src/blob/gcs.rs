//! Google Cloud Storage Blob Store
//!
//! Objects live flat in one bucket and are read and written through the
//! Cloud Storage JSON API. Objects are expected to be publicly readable, so
//! `public_url` is the plain object URL that URL-fetching providers download
//! from.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use std::time::Duration;

use super::{join_url, validate_name, BlobStore};
use crate::{Error, Result};

pub const DEFAULT_GCS_ENDPOINT: &str = "https://storage.googleapis.com";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct GcsBlobStore {
    client: Client,
    endpoint: String,
    bucket: String,
    access_token: Option<String>,
    public_base_url: String,
}

impl GcsBlobStore {
    pub fn new(bucket: impl Into<String>, access_token: Option<String>) -> Result<Self> {
        let bucket = bucket.into();
        if bucket.trim().is_empty() {
            return Err(Error::Config("gcloud store requires a bucket".to_string()));
        }
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| Error::Remote(format!("Cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: DEFAULT_GCS_ENDPOINT.to_string(),
            public_base_url: join_url(DEFAULT_GCS_ENDPOINT, &bucket),
            bucket,
            access_token,
        })
    }

    /// API base URL; public URLs are not affected
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = base_url.into();
        self
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| Error::Config(format!("Invalid storage endpoint '{}': {}", self.endpoint, e)))?;
        url.path_segments_mut()
            .map_err(|_| Error::Config(format!("Invalid storage endpoint '{}'", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

fn content_type(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("jpg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("tiff") => "image/tiff",
        Some("bmp") => "image/bmp",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

fn remote_error(action: &str, name: &str, e: reqwest::Error) -> Error {
    Error::Remote(format!("{} '{}': {}", action, name, e))
}

#[async_trait]
impl BlobStore for GcsBlobStore {
    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        validate_name(name)?;
        let url = self.url(&["storage", "v1", "b", self.bucket.as_str(), "o", name])?;

        let response = self
            .authorized(self.client.get(url).query(&[("alt", "media")]))
            .send()
            .await
            .map_err(|e| remote_error("Cannot fetch", name, e))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("blob {}", name))),
            status if status.is_success() => Ok(response
                .bytes()
                .await
                .map_err(|e| remote_error("Cannot read", name, e))?
                .to_vec()),
            status => Err(Error::Remote(format!(
                "Fetching '{}' from bucket {} answered {}",
                name, self.bucket, status
            ))),
        }
    }

    async fn store(&self, name: &str, bytes: &[u8]) -> Result<()> {
        validate_name(name)?;
        let url = self.url(&["upload", "storage", "v1", "b", self.bucket.as_str(), "o"])?;

        let response = self
            .authorized(
                self.client
                    .post(url)
                    .query(&[("uploadType", "media"), ("name", name)])
                    .header(reqwest::header::CONTENT_TYPE, content_type(name))
                    .body(bytes.to_vec()),
            )
            .send()
            .await
            .map_err(|e| remote_error("Cannot upload", name, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Remote(format!(
                "Uploading '{}' to bucket {} answered {}: {}",
                name, self.bucket, status, body
            )));
        }
        tracing::debug!(blob = name, bucket = %self.bucket, bytes = bytes.len(), "Stored blob");
        Ok(())
    }

    fn public_url(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        Ok(join_url(&self.public_base_url, name))
    }
}
