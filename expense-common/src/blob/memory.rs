//! In-memory Blob Store

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::{join_url, validate_name, BlobStore};
use crate::{Error, Result};

#[derive(Default)]
pub struct InMemoryBlobStore {
    blobs: RwLock<HashMap<String, Vec<u8>>>,
    public_base_url: Option<String>,
}

impl InMemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = Some(base_url.into());
        self
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.blobs.read().await.contains_key(name)
    }

    /// Stored names, sorted
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.blobs.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

#[async_trait]
impl BlobStore for InMemoryBlobStore {
    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        self.blobs
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("blob {}", name)))
    }

    async fn store(&self, name: &str, bytes: &[u8]) -> Result<()> {
        validate_name(name)?;
        self.blobs
            .write()
            .await
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn public_url(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        self.public_base_url
            .as_deref()
            .map(|base| join_url(base, name))
            .ok_or_else(|| Error::Unsupported(format!("no public URL for '{}'", name)))
    }
}
