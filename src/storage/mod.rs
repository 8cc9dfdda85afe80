//! Object storage abstraction
//!
//! The pipeline only needs three operations from the bucket: upload a file
//! under a key, list keys under a prefix and delete a key. [`ObjectStore`]
//! captures exactly that so the S3 client can be swapped for
//! [`MemoryObjectStore`] in tests.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

use crate::progress::ProgressReporter;

pub mod memory;
#[cfg(feature = "s3")]
pub mod s3;

pub use memory::{MemoryObjectStore, StoreCall};
#[cfg(feature = "s3")]
pub use s3::S3ObjectStore;

/// User metadata attached to an uploaded object
pub type ObjectMetadata = HashMap<String, String>;

/// Errors returned by an object store
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage request failed: {0}")]
    Request(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Minimal object storage used by the upload and retention stages
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket name, for logging
    fn bucket(&self) -> &str;

    /// Upload the file at `source` under `key`, returning the number of bytes sent
    async fn put_object(
        &self,
        key: &str,
        source: &Path,
        metadata: &ObjectMetadata,
        progress: &dyn ProgressReporter,
    ) -> StorageResult<u64>;

    /// Every key starting with `prefix`, across all pages
    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>>;

    /// Delete a single key
    async fn delete_object(&self, key: &str) -> StorageResult<()>;
}
