//! Persistence adapters for job records.
//!
//! The queue only needs a key/record store with four operations. Two
//! adapters ship with the crate: [`MemoryStorage`] for tests and embedded use,
//! and [`FileStorage`] which keeps one JSON document per key in a directory.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::StorageError;
use crate::types::Job;

const FILE_EXTENSION: &str = "json";

/// Durable read/write/list of job records by key.
#[async_trait]
pub trait JobStorage: Send + Sync {
    /// Write a record under `key`, replacing any existing one.
    async fn save(&self, key: &str, job: &Job) -> Result<(), StorageError>;

    /// Read the record stored under `key`.
    async fn read(&self, key: &str) -> Result<Option<Job>, StorageError>;

    /// List keys starting with `prefix`, in lexical order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Remove the record under `key`. Missing keys are not an error.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory storage. Clones share the same underlying map, so a clone can
/// stand in for "the same store" across queue instances.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    records: Arc<RwLock<BTreeMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl JobStorage for MemoryStorage {
    async fn save(&self, key: &str, job: &Job) -> Result<(), StorageError> {
        // Records are kept serialized so reads never alias live queue state.
        let encoded = serde_json::to_string(job)?;
        self.records.write().await.insert(key.to_owned(), encoded);
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Job>, StorageError> {
        let records = self.records.read().await;
        match records.get(key) {
            Some(encoded) => Ok(Some(serde_json::from_str(encoded)?)),
            None => Ok(None),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let records = self.records.read().await;
        Ok(records
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.records.write().await.remove(key);
        Ok(())
    }
}

/// Directory-backed storage: each key is a `<key>.json` file.
#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    /// Open (and create if needed) a storage directory.
    pub async fn open<P: Into<PathBuf>>(root: P) -> Result<Self, StorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        if key.is_empty() || key.contains(['/', '\\']) || key.starts_with('.') {
            return Err(StorageError::Backend(format!("invalid storage key `{key}`")));
        }
        Ok(self.root.join(format!("{key}.{FILE_EXTENSION}")))
    }
}

#[async_trait]
impl JobStorage for FileStorage {
    async fn save(&self, key: &str, job: &Job) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let encoded = serde_json::to_vec_pretty(job)?;

        // Write then rename so readers never observe a partial record.
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, &encoded).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    async fn read(&self, key: &str) -> Result<Option<Job>, StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut keys = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if let Some(key) = name
                .strip_suffix(FILE_EXTENSION)
                .and_then(|s| s.strip_suffix('.'))
            {
                if key.starts_with(prefix) {
                    keys.push(key.to_owned());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobStatus;
    use serde_json::json;

    async fn exercise(storage: &dyn JobStorage) {
        let job = Job::new("email", json!({"to": "a@x.com"}), 2, 3);
        let key = job.queue_key();

        assert!(storage.read(&key).await.unwrap().is_none());
        storage.save(&key, &job).await.unwrap();
        assert_eq!(storage.read(&key).await.unwrap(), Some(job.clone()));

        let mut updated = job.clone();
        updated.start();
        storage.save(&key, &updated).await.unwrap();
        let stored = storage.read(&key).await.unwrap().unwrap();
        assert_eq!(stored.status, JobStatus::Processing);

        storage.save("failed_x_1", &job).await.unwrap();
        assert_eq!(storage.list("queue_").await.unwrap(), vec![key.clone()]);
        assert_eq!(storage.list("failed_").await.unwrap(), vec!["failed_x_1"]);

        storage.delete(&key).await.unwrap();
        storage.delete(&key).await.unwrap();
        assert!(storage.read(&key).await.unwrap().is_none());
        assert!(storage.list("queue_").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();
        exercise(&storage).await;
        assert_eq!(storage.len().await, 1);
    }

    #[tokio::test]
    async fn test_memory_storage_clones_share_records() {
        let a = MemoryStorage::new();
        let b = a.clone();
        let job = Job::new("email", json!({}), 0, 3);
        a.save(&job.queue_key(), &job).await.unwrap();
        assert!(b.read(&job.queue_key()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_file_storage() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::open(dir.path().join("jobs")).await.unwrap();
        exercise(&storage).await;
    }

    #[tokio::test]
    async fn test_file_storage_rejects_path_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let storage = FileStorage::open(dir.path()).await.unwrap();
        let job = Job::new("email", json!({}), 0, 3);
        assert!(storage.save("../escape", &job).await.is_err());
        assert!(storage.read("").await.is_err());
    }

    #[tokio::test]
    async fn test_file_storage_ignores_foreign_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("queue_notes.txt"), "hello").unwrap();
        let storage = FileStorage::open(dir.path()).await.unwrap();
        assert!(storage.list("queue_").await.unwrap().is_empty());
    }
}
