//! Local Device Record Persistence
//!
//! The device record is written to disk after every successful resolve or
//! registration so that the next start can look the frame up by id instead of
//! registering a duplicate.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

use crate::device::DeviceRecord;

/// Errors reading or writing the stored record
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem failure
    #[error("device store I/O error at {path}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// The underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// The stored file is not a valid record
    #[error("device store contains invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Persistence for the device record
#[async_trait]
pub trait DeviceStore: Send + Sync {
    /// Load the stored record, `None` if nothing was stored yet
    async fn load(&self) -> Result<Option<DeviceRecord>, StoreError>;

    /// Replace the stored record
    async fn save(&self, device: &DeviceRecord) -> Result<(), StoreError>;
}

/// Stores the record as pretty-printed JSON
#[derive(Clone, Debug)]
pub struct JsonDeviceStore {
    path: PathBuf,
}

impl JsonDeviceStore {
    /// Store at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at `device.json` inside `state_dir`
    pub fn in_dir(state_dir: impl AsRef<Path>) -> Self {
        Self::new(state_dir.as_ref().join("device.json"))
    }

    /// File backing this store
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> StoreError {
        StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

#[async_trait]
impl DeviceStore for JsonDeviceStore {
    async fn load(&self) -> Result<Option<DeviceRecord>, StoreError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(self.io_error(e)),
        }
    }

    async fn save(&self, device: &DeviceRecord) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.io_error(e))?;
        }

        // Write beside the target and rename so readers never see a torn file
        let content = serde_json::to_string_pretty(device)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, content)
            .await
            .map_err(|e| self.io_error(e))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| self.io_error(e))?;

        tracing::debug!(path = %self.path.display(), "Device record saved");
        Ok(())
    }
}

/// Keeps the record in memory only
#[derive(Debug, Default)]
pub struct MemoryDeviceStore {
    record: Mutex<Option<DeviceRecord>>,
}

impl MemoryDeviceStore {
    /// Empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The last saved record
    #[must_use]
    pub fn snapshot(&self) -> Option<DeviceRecord> {
        self.record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl DeviceStore for MemoryDeviceStore {
    async fn load(&self) -> Result<Option<DeviceRecord>, StoreError> {
        Ok(self.snapshot())
    }

    async fn save(&self, device: &DeviceRecord) -> Result<(), StoreError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(device.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_load_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDeviceStore::in_dir(dir.path());
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDeviceStore::in_dir(dir.path().join("nested"));

        let mut device = DeviceRecord::new("Kitchen");
        device.id = Some("frame-3".to_string());
        device
            .plugins
            .insert("frame-image".to_string(), "^0.1.0".to_string());
        store.save(&device).await.unwrap();

        assert!(store.path().exists());
        assert_eq!(store.load().await.unwrap(), Some(device));
    }

    #[tokio::test]
    async fn test_corrupt_file_is_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonDeviceStore::in_dir(dir.path());
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(store.load().await, Err(StoreError::Json(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = MemoryDeviceStore::new();
        assert!(store.load().await.unwrap().is_none());
        store.save(&DeviceRecord::new("Den")).await.unwrap();
        assert_eq!(store.snapshot().unwrap().name, "Den");
    }
}
