//! services/api/src/adapters/local_file.rs
//!
//! `LocalStorage` backed by a single JSON object on disk.

use async_trait::async_trait;
use course_catalog_core::ports::{LocalStorage, PortError, PortResult};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::Mutex;

type Entries = BTreeMap<String, String>;

pub struct JsonFileStorage {
    path: PathBuf,
    // Serializes read-modify-write cycles.
    lock: Mutex<()>,
}

impl JsonFileStorage {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            lock: Mutex::new(()),
        }
    }

    async fn load(&self) -> PortResult<Entries> {
        match fs::read(&self.path).await {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                PortError::Unexpected(format!("{} is not a JSON object: {}", self.path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Entries::new()),
            Err(e) => Err(PortError::Unexpected(e.to_string())),
        }
    }

    /// Writes the whole map to a sibling temp file and renames it into place.
    async fn store(&self, entries: &Entries) -> PortResult<()> {
        let raw = serde_json::to_vec_pretty(entries)
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| PortError::Unexpected(e.to_string()))?;
        }

        let mut temp_name = self.path.as_os_str().to_owned();
        temp_name.push(".tmp");
        let temp_path = PathBuf::from(temp_name);

        if let Err(e) = fs::write(&temp_path, &raw).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(PortError::Unexpected(e.to_string()));
        }
        if let Err(e) = fs::rename(&temp_path, &self.path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(PortError::Unexpected(e.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl LocalStorage for JsonFileStorage {
    async fn get(&self, key: &str) -> PortResult<Option<String>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: &str) -> PortResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await.unwrap_or_default();
        entries.insert(key.to_string(), value.to_string());
        self.store(&entries).await
    }

    async fn remove(&self, key: &str) -> PortResult<()> {
        let _guard = self.lock.lock().await;
        let mut entries = self.load().await.unwrap_or_default();
        if entries.remove(key).is_some() {
            self.store(&entries).await?;
        }
        Ok(())
    }
}
