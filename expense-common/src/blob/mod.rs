//! Blob Store collaborator
//!
//! Name-addressed storage of raw uploads and JSON artifacts. Names are flat
//! (`<id>.pdf`, `<id>.json`, `<id>-expense.json`). Backends: local
//! filesystem, a Cloud Storage bucket, and memory.

mod filesystem;
mod gcs;
mod memory;

pub use filesystem::FileSystemBlobStore;
pub use gcs::{GcsBlobStore, DEFAULT_GCS_ENDPOINT};
pub use memory::InMemoryBlobStore;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::StoreConfig;
use crate::{Error, Result};

#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Read a blob; `Error::NotFound` when absent
    async fn get(&self, name: &str) -> Result<Vec<u8>>;

    /// Write (or overwrite) a blob
    async fn store(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// URL from which an external service can fetch the blob
    fn public_url(&self, name: &str) -> Result<String> {
        Err(Error::Unsupported(format!(
            "blob store has no public URL for '{}'",
            name
        )))
    }
}

/// Reject names that are empty or could leave the store's namespace
pub(crate) fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidInput("empty blob name".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(Error::InvalidInput(format!("invalid blob name '{}'", name)));
    }
    Ok(())
}

pub(crate) fn join_url(base: &str, name: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), name)
}

/// Open the configured Blob Store backend
pub async fn open_blob_store(config: &StoreConfig) -> Result<Arc<dyn BlobStore>> {
    match config {
        StoreConfig::Filesystem {
            location,
            public_base_url,
        } => {
            tracing::info!(location = %location.display(), "Using filesystem blob store");
            let store = FileSystemBlobStore::open(location).await?;
            Ok(Arc::new(match public_base_url {
                Some(url) => store.with_public_base_url(url.clone()),
                None => store,
            }))
        }
        StoreConfig::Gcloud {
            bucket,
            endpoint,
            access_token,
            public_base_url,
        } => {
            tracing::info!(bucket = %bucket, "Using Cloud Storage blob store");
            let store = GcsBlobStore::new(bucket.clone(), access_token.clone())?
                .with_endpoint(endpoint.clone());
            Ok(Arc::new(match public_base_url {
                Some(url) => store.with_public_base_url(url.clone()),
                None => store,
            }))
        }
        StoreConfig::Memory { public_base_url } => {
            tracing::info!("Using in-memory blob store");
            let store = InMemoryBlobStore::new();
            Ok(Arc::new(match public_base_url {
                Some(url) => store.with_public_base_url(url.clone()),
                None => store,
            }))
        }
    }
}
