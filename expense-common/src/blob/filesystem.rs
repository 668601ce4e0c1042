//! Local filesystem Blob Store

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{join_url, validate_name, BlobStore};
use crate::{Error, Result};

/// Stores each blob as a file directly under `base`
#[derive(Debug, Clone)]
pub struct FileSystemBlobStore {
    base: PathBuf,
    public_base_url: Option<String>,
}

impl FileSystemBlobStore {
    /// Use `base` as the store root, creating it if missing
    pub async fn open(base: impl AsRef<Path>) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&base).await?;
        Ok(Self {
            base,
            public_base_url: None,
        })
    }

    /// Serve `public_url` from `<base_url>/<name>`
    pub fn with_public_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.public_base_url = Some(base_url.into());
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_name(name)?;
        Ok(self.base.join(name))
    }
}

#[async_trait]
impl BlobStore for FileSystemBlobStore {
    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.path_for(name)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("blob {}", name)))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn store(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(name)?;
        // Readers never observe a partially written blob
        let tmp = self.base.join(format!(".{}.tmp", name));
        tokio::fs::write(&tmp, bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        tracing::debug!(blob = name, bytes = bytes.len(), "Stored blob");
        Ok(())
    }

    fn public_url(&self, name: &str) -> Result<String> {
        validate_name(name)?;
        match &self.public_base_url {
            Some(base) => Ok(join_url(base, name)),
            None => Err(Error::Unsupported(format!(
                "no public base URL configured for '{}'",
                name
            ))),
        }
    }
}
