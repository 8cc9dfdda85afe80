use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;

use super::{ObjectMetadata, ObjectStore, StorageError, StorageResult};
use crate::progress::ProgressReporter;

/// An object held by [`MemoryObjectStore`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    /// Object body
    pub data: Vec<u8>,
    /// User metadata
    pub metadata: ObjectMetadata,
}

/// A request seen by [`MemoryObjectStore`], in order of arrival
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreCall {
    Put { key: String },
    List { prefix: String },
    Delete { key: String },
}

#[derive(Debug, Default)]
struct FaultPlan {
    failing_puts: usize,
    fail_listing: bool,
    failing_deletes: HashSet<String>,
}

/// In-memory object store with failure injection
#[derive(Clone)]
pub struct MemoryObjectStore {
    bucket: String,
    objects: Arc<DashMap<String, StoredObject>>,
    faults: Arc<Mutex<FaultPlan>>,
    calls: Arc<Mutex<Vec<StoreCall>>>,
}

impl MemoryObjectStore {
    /// Create an empty store
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            objects: Arc::new(DashMap::new()),
            faults: Arc::new(Mutex::new(FaultPlan::default())),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Seed an object directly, bypassing the journal
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.objects.insert(
            key.into(),
            StoredObject {
                data: data.into(),
                metadata: ObjectMetadata::new(),
            },
        );
    }

    /// Make the next `count` uploads fail
    pub fn fail_next_puts(&self, count: usize) {
        self.faults.lock().failing_puts = count;
    }

    /// Make every listing fail
    pub fn fail_listing(&self) {
        self.faults.lock().fail_listing = true;
    }

    /// Make deleting `key` fail
    pub fn fail_delete(&self, key: impl Into<String>) {
        self.faults.lock().failing_deletes.insert(key.into());
    }

    /// All keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.objects.contains_key(key)
    }

    /// A copy of the stored object
    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.get(key).map(|e| e.value().clone())
    }

    /// Requests received so far
    pub fn calls(&self) -> Vec<StoreCall> {
        self.calls.lock().clone()
    }

    /// Number of upload attempts, failed ones included
    pub fn put_attempts(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, StoreCall::Put { .. }))
            .count()
    }

    /// Keys deleted so far, in order
    pub fn deleted_keys(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|c| match c {
                StoreCall::Delete { key } => Some(key.clone()),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: StoreCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put_object(
        &self,
        key: &str,
        source: &Path,
        metadata: &ObjectMetadata,
        progress: &dyn ProgressReporter,
    ) -> StorageResult<u64> {
        self.record(StoreCall::Put {
            key: key.to_string(),
        });

        {
            let mut faults = self.faults.lock();
            if faults.failing_puts > 0 {
                faults.failing_puts -= 1;
                return Err(StorageError::Request(format!(
                    "injected upload failure for {}",
                    key
                )));
            }
        }

        let data = tokio::fs::read(source).await?;
        let size = data.len() as u64;
        progress.transfer(size, size);

        self.objects.insert(
            key.to_string(),
            StoredObject {
                data,
                metadata: metadata.clone(),
            },
        );
        Ok(size)
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        self.record(StoreCall::List {
            prefix: prefix.to_string(),
        });

        if self.faults.lock().fail_listing {
            return Err(StorageError::Request("injected listing failure".to_string()));
        }

        let mut keys: Vec<String> = self
            .objects
            .iter()
            .filter(|e| e.key().starts_with(prefix))
            .map(|e| e.key().clone())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.record(StoreCall::Delete {
            key: key.to_string(),
        });

        if self.faults.lock().failing_deletes.contains(key) {
            return Err(StorageError::Request(format!(
                "injected delete failure for {}",
                key
            )));
        }

        // S3 reports success for missing keys as well
        self.objects.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::SilentReporter;

    #[tokio::test]
    async fn test_put_list_delete() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blob");
        std::fs::write(&file, b"payload").unwrap();

        let store = MemoryObjectStore::new("bucket");
        store.insert("other/x.tar.gz.gpg", b"x".to_vec());

        let mut metadata = ObjectMetadata::new();
        metadata.insert("sha256".to_string(), "abc".to_string());
        let size = store
            .put_object("host/a.tar.gz.gpg", &file, &metadata, &SilentReporter)
            .await
            .unwrap();
        assert_eq!(size, 7);
        assert_eq!(store.get("host/a.tar.gz.gpg").unwrap().metadata["sha256"], "abc");

        let listed = store.list_objects("host/").await.unwrap();
        assert_eq!(listed, vec!["host/a.tar.gz.gpg"]);

        store.delete_object("host/a.tar.gz.gpg").await.unwrap();
        assert_eq!(store.keys(), vec!["other/x.tar.gz.gpg"]);
        assert_eq!(store.deleted_keys(), vec!["host/a.tar.gz.gpg"]);
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("blob");
        std::fs::write(&file, b"payload").unwrap();

        let store = MemoryObjectStore::new("bucket");
        store.fail_next_puts(2);
        store.fail_delete("k");

        let metadata = ObjectMetadata::new();
        assert!(store.put_object("k", &file, &metadata, &SilentReporter).await.is_err());
        assert!(store.put_object("k", &file, &metadata, &SilentReporter).await.is_err());
        assert!(store.put_object("k", &file, &metadata, &SilentReporter).await.is_ok());
        assert_eq!(store.put_attempts(), 3);

        assert!(store.delete_object("k").await.is_err());
        assert!(store.contains("k"));

        store.fail_listing();
        assert!(store.list_objects("").await.is_err());
    }
}
