//! services/api/src/adapters/blob_fs.rs
//!
//! A `BlobStore` keeping uploaded files under a local directory. The service
//! serves them back under `/files/`, which is what resolved URLs point at.

use async_trait::async_trait;
use bytes::Bytes;
use course_catalog_core::ports::{BlobStore, PortError, PortResult};
use reqwest::Url;
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// The route prefix blobs are served under.
pub const FILES_ROUTE: &str = "files";

pub struct FilesystemBlobStore {
    base_path: PathBuf,
    public_base_url: Url,
}

impl FilesystemBlobStore {
    /// Creates the store, making sure its directories exist.
    pub async fn new(base_path: PathBuf, public_base_url: &str) -> PortResult<Self> {
        let public_base_url = Url::parse(public_base_url)
            .map_err(|e| PortError::Unexpected(format!("invalid public base URL: {}", e)))?;
        if public_base_url.cannot_be_a_base() {
            return Err(PortError::Unexpected(format!(
                "public base URL {} cannot carry a path",
                public_base_url
            )));
        }
        fs::create_dir_all(base_path.join(".tmp"))
            .await
            .map_err(io_error)?;
        Ok(Self {
            base_path,
            public_base_url,
        })
    }

    /// Maps a storage path onto the filesystem. Only plain relative paths are
    /// accepted.
    fn blob_path(&self, path: &str) -> PortResult<PathBuf> {
        let relative = Path::new(path);
        let plain = !path.is_empty()
            && relative
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !plain || path.starts_with(".tmp") {
            return Err(PortError::Rejected(format!("invalid storage path: {}", path)));
        }
        Ok(self.base_path.join(relative))
    }

    fn temp_path(&self) -> PathBuf {
        self.base_path
            .join(".tmp")
            .join(uuid::Uuid::new_v4().to_string())
    }
}

fn io_error(e: std::io::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

#[async_trait]
impl BlobStore for FilesystemBlobStore {
    async fn upload(&self, path: &str, data: Bytes) -> PortResult<()> {
        let blob_path = self.blob_path(path)?;
        if let Some(parent) = blob_path.parent() {
            fs::create_dir_all(parent).await.map_err(io_error)?;
        }

        let temp_path = self.temp_path();
        if let Err(e) = fs::write(&temp_path, &data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_error(e));
        }
        if let Err(e) = fs::rename(&temp_path, &blob_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(io_error(e));
        }

        debug!("Stored {} bytes at {}", data.len(), path);
        Ok(())
    }

    async fn resolve_url(&self, path: &str) -> PortResult<String> {
        let blob_path = self.blob_path(path)?;
        if !fs::try_exists(&blob_path).await.map_err(io_error)? {
            return Err(PortError::NotFound(path.to_string()));
        }

        let mut url = self.public_base_url.clone();
        url.path_segments_mut()
            .map_err(|_| PortError::Unexpected("public base URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .push(FILES_ROUTE)
            .extend(path.split('/'));
        Ok(url.to_string())
    }

    async fn delete(&self, path: &str) -> PortResult<()> {
        let blob_path = self.blob_path(path)?;
        match fs::remove_file(&blob_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error(e)),
        }
    }

    async fn read(&self, path: &str) -> PortResult<Bytes> {
        let blob_path = self.blob_path(path)?;
        match fs::read(&blob_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(PortError::NotFound(path.to_string()))
            }
            Err(e) => Err(io_error(e)),
        }
    }
}
