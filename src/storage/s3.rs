//! S3 (and S3-compatible) object store

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use super::{ObjectMetadata, ObjectStore, StorageError, StorageResult};
use crate::config::StorageSettings;
use crate::progress::ProgressReporter;

/// Files above this size are sent as a multipart upload
pub const MULTIPART_THRESHOLD: u64 = 5 * 1024 * 1024;

/// Size of every multipart part but the last
pub const PART_SIZE: usize = 5 * 1024 * 1024;

fn request_error<E>(context: &str, err: E) -> StorageError
where
    E: std::error::Error,
{
    StorageError::Request(format!("{}: {}", context, DisplayErrorContext(&err)))
}

/// Object store backed by the AWS SDK
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from explicit endpoint, region and static credentials
    pub async fn new(settings: &StorageSettings) -> Self {
        let credentials = Credentials::new(
            settings.access_key_id.clone(),
            settings.secret_access_key.clone(),
            None,
            None,
            "sss-backup-env",
        );

        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_types::region::Region::new(settings.region.clone()))
            .endpoint_url(settings.endpoint.clone())
            .credentials_provider(credentials)
            .load()
            .await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&aws_config);
        if settings.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        Self::from_client(
            Client::from_conf(s3_config_builder.build()),
            settings.bucket.clone(),
        )
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    async fn put_single(
        &self,
        key: &str,
        source: &Path,
        metadata: &ObjectMetadata,
    ) -> StorageResult<()> {
        let body = ByteStream::from_path(source)
            .await
            .map_err(|e| request_error("Failed to read upload body", e))?;

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .set_metadata(Some(metadata.clone()))
            .body(body)
            .send()
            .await
            .map_err(|e| request_error("Failed to upload object", e))?;

        Ok(())
    }

    async fn put_multipart(
        &self,
        key: &str,
        source: &Path,
        total: u64,
        metadata: &ObjectMetadata,
        progress: &dyn ProgressReporter,
    ) -> StorageResult<()> {
        let multipart_upload = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .set_metadata(Some(metadata.clone()))
            .send()
            .await
            .map_err(|e| request_error("Failed to create multipart upload", e))?;

        let upload_id = multipart_upload
            .upload_id()
            .ok_or_else(|| StorageError::Request("No upload ID returned".to_string()))?
            .to_string();

        let parts = match self
            .upload_parts(key, &upload_id, source, total, progress)
            .await
        {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_multipart(key, &upload_id).await;
                return Err(e);
            }
        };

        let completed_multipart = CompletedMultipartUpload::builder()
            .set_parts(Some(parts))
            .build();

        if let Err(e) = self
            .client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(completed_multipart)
            .send()
            .await
        {
            self.abort_multipart(key, &upload_id).await;
            return Err(request_error("Failed to complete multipart upload", e));
        }

        Ok(())
    }

    async fn upload_parts(
        &self,
        key: &str,
        upload_id: &str,
        source: &Path,
        total: u64,
        progress: &dyn ProgressReporter,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut file = tokio::fs::File::open(source).await?;
        let mut parts = Vec::new();
        let mut loaded = 0u64;
        let mut part_number = 1i32;

        loop {
            let chunk = read_part(&mut file).await?;
            if chunk.is_empty() {
                break;
            }
            let chunk_len = chunk.len() as u64;

            let part_response = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(ByteStream::from(chunk))
                .send()
                .await
                .map_err(|e| request_error("Failed to upload part", e))?;

            parts.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .e_tag(part_response.e_tag().unwrap_or_default())
                    .build(),
            );

            loaded += chunk_len;
            progress.transfer(loaded, total);
            debug!(part_number, loaded, total, "Uploaded part");
            part_number += 1;
        }

        Ok(parts)
    }

    async fn abort_multipart(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            warn!(key, error = %DisplayErrorContext(&e), "Failed to abort multipart upload");
        }
    }
}

/// Read up to [`PART_SIZE`] bytes; shorter only at end of file
async fn read_part(file: &mut tokio::fs::File) -> std::io::Result<Vec<u8>> {
    let mut buffer = vec![0u8; PART_SIZE];
    let mut filled = 0;
    while filled < PART_SIZE {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
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
        let size = tokio::fs::metadata(source).await?.len();

        if size > MULTIPART_THRESHOLD {
            self.put_multipart(key, source, size, metadata, progress)
                .await?;
        } else {
            self.put_single(key, source, metadata).await?;
            progress.transfer(size, size);
        }

        Ok(size)
    }

    async fn list_objects(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut pages = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .set_prefix((!prefix.is_empty()).then(|| prefix.to_string()))
            .into_paginator()
            .send();

        let mut keys = Vec::new();
        while let Some(page) = pages.next().await {
            let page = page.map_err(|e| request_error("Failed to list objects", e))?;
            keys.extend(
                page.contents()
                    .iter()
                    .filter_map(|object| object.key().map(str::to_string)),
            );
        }

        Ok(keys)
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| request_error("Failed to delete object", e))?;

        Ok(())
    }
}
