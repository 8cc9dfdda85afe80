use std::path::Path;
use std::sync::Arc;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;
use tracing::{error, info};

use super::artifact::{format_timestamp, BackupArtifact};
use crate::progress::ProgressReporter;
use crate::resilience::{RetryConfig, RetryExecutor};
use crate::storage::{ObjectMetadata, ObjectStore};
use crate::{BackupError, Result};

/// Metadata key holding the creation timestamp
pub const CREATED_AT_METADATA: &str = "created-at";

/// Metadata key holding the hex SHA-256 of the uploaded file
pub const SHA256_METADATA: &str = "sha256";

/// Outcome of a successful upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReceipt {
    pub key: String,
    pub size_bytes: u64,
    pub sha256: String,
    /// Attempts used, including the successful one
    pub attempts: usize,
}

/// Uploads the encrypted artifact with bounded retry
pub struct Uploader {
    store: Arc<dyn ObjectStore>,
    retry: RetryExecutor,
}

impl Uploader {
    pub fn new(store: Arc<dyn ObjectStore>, retry_config: RetryConfig) -> Self {
        Self {
            store,
            retry: RetryExecutor::new(retry_config),
        }
    }

    /// Upload `artifact`'s encrypted file under its remote key
    pub async fn upload(
        &self,
        artifact: &BackupArtifact,
        progress: &dyn ProgressReporter,
    ) -> Result<UploadReceipt> {
        let source = artifact.encrypted_path();
        let key = artifact.remote_key();
        let sha256 = file_sha256(&source).await?;

        let mut metadata = ObjectMetadata::new();
        metadata.insert(
            CREATED_AT_METADATA.to_string(),
            format_timestamp(artifact.created_at()),
        );
        metadata.insert(SHA256_METADATA.to_string(), sha256.clone());

        let store = self.store.as_ref();
        let key_ref = key.as_str();
        let source_ref = source.as_path();
        let metadata_ref = &metadata;

        let outcome = self
            .retry
            .execute("Upload", move |attempt| async move {
                progress.start("Uploading backup");
                let sent = store
                    .put_object(key_ref, source_ref, metadata_ref, progress)
                    .await;
                progress.finish();
                sent.map(|size| (size, attempt))
            })
            .await;

        match outcome {
            Ok((size_bytes, attempts)) => {
                info!(
                    bucket = store.bucket(),
                    key = %key,
                    size_bytes,
                    attempts,
                    "Backup uploaded"
                );
                Ok(UploadReceipt {
                    key,
                    size_bytes,
                    sha256,
                    attempts,
                })
            }
            Err(e) => {
                error!(key = %key, attempts = e.attempts, error = %e.last_error, "Error uploading backup");
                Err(BackupError::Upload {
                    attempts: e.attempts,
                    source: e.last_error,
                })
            }
        }
    }
}

/// Hex SHA-256 of a file, streamed
pub async fn file_sha256(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
