// dbdump/src/storage/remote.rs
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use super::multipart::upload_with_retry;
use super::{Artifact, StorageBackend, sort_oldest_first};
use crate::backup::naming::is_artifact_name;
use crate::config::UploadSettings;
use crate::errors::StorageError;
use crate::utils::backoff::Backoff;

/// An acknowledged part of a multipart upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartReceipt {
    pub part_number: i32,
    pub etag: String,
}

/// One page of a listing. `next_token` is set while more pages remain.
#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub entries: Vec<Artifact>,
    pub next_token: Option<String>,
}

/// Object storage operations the remote backend relies on.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Starts a multipart upload and returns its upload id.
    async fn create_multipart_upload(&self, key: &str) -> Result<String, StorageError>;

    /// Uploads one part and returns its ETag.
    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String, StorageError>;

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartReceipt],
    ) -> Result<(), StorageError>;

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StorageError>;

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError>;

    /// Deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> Result<(), StorageError>;
}

/// Artifacts live in object storage under `prefix`. Dumps are staged in a
/// local directory and removed once uploaded.
pub struct RemoteBackend {
    store: Arc<dyn ObjectStore>,
    prefix: String,
    staging_dir: PathBuf,
    upload: UploadSettings,
    backoff: Backoff,
}

impl RemoteBackend {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        prefix: String,
        staging_dir: PathBuf,
        upload: UploadSettings,
        backoff: Backoff,
    ) -> Self {
        Self {
            store,
            prefix,
            staging_dir,
            upload,
            backoff,
        }
    }
}

#[async_trait]
impl StorageBackend for RemoteBackend {
    fn name(&self) -> &'static str {
        "s3"
    }

    fn prefix(&self) -> &str {
        &self.prefix
    }

    async fn staging_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        tokio::fs::create_dir_all(&self.staging_dir)
            .await
            .map_err(|e| StorageError::io(&self.staging_dir, e))?;
        Ok(self.staging_dir.join(name))
    }

    async fn place(&self, source: &Path, key: &str) -> Result<(), StorageError> {
        upload_with_retry(self.store.as_ref(), source, key, &self.upload, &self.backoff).await?;
        tracing::info!("✅ Uploaded {} as {}", source.display(), key);
        Ok(())
    }

    /// Follows continuation tokens until the listing is exhausted. Only
    /// artifacts directly under `prefix` are returned.
    async fn list(&self, prefix: &str) -> Result<Vec<Artifact>, StorageError> {
        let mut artifacts = Vec::new();
        let mut continuation = None;
        let mut pages = 0usize;

        loop {
            let page = self.store.list_page(prefix, continuation).await?;
            pages += 1;
            artifacts.extend(page.entries.into_iter().filter(|artifact| {
                artifact
                    .key
                    .strip_prefix(prefix)
                    .is_some_and(|name| !name.contains('/') && is_artifact_name(name))
            }));
            match page.next_token {
                Some(token) => continuation = Some(token),
                None => break,
            }
        }

        tracing::debug!("Listed {} artifacts under '{}' in {} pages", artifacts.len(), prefix, pages);
        sort_oldest_first(&mut artifacts);
        Ok(artifacts)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.store.delete_object(key).await
    }

    async fn release_staged(&self, staged: &Path) -> Result<(), StorageError> {
        tokio::fs::remove_file(staged)
            .await
            .map_err(|e| StorageError::io(staged, e))
    }
}
