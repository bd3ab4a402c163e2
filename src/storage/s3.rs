// dbdump/src/storage/s3.rs
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use chrono::{TimeZone, Utc};
use s3::config::Region;
use s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use s3::primitives::ByteStream;
use s3::types::{CompletedMultipartUpload, CompletedPart};

use super::Artifact;
use super::remote::{ListPage, ObjectStore, PartReceipt};
use crate::config::RemoteConfig;
use crate::errors::StorageError;

/// S3 (or an S3-compatible service such as DigitalOcean Spaces).
pub struct S3ObjectStore {
    client: s3::Client,
    bucket: String,
}

fn remote_error<E>(action: &str, key: &str, err: SdkError<E>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let code = err.code().map(str::to_string);
    let message = format!("{} {}: {}", action, key, DisplayErrorContext(err));
    classify_error(status, code.as_deref(), message)
}

/// Splits SDK failures into transient ones worth retrying and permanent
/// ones.
///
/// - `NoSuchUpload`: the upload id is gone, start a new upload
/// - 408, 429, `RequestTimeout`, `SlowDown`: transient
/// - other 4xx (403 AccessDenied, 404 NoSuchBucket, bad credentials): permanent
/// - 5xx and failures without a response (timeouts, dispatch errors): transient
fn classify_error(status: Option<u16>, code: Option<&str>, message: String) -> StorageError {
    match (status, code) {
        (_, Some("NoSuchUpload")) => StorageError::UploadExpired(message),
        (_, Some("RequestTimeout" | "SlowDown")) => StorageError::Remote(message),
        (Some(408 | 429), _) => StorageError::Remote(message),
        (Some(400..=499), _) => StorageError::Rejected(message),
        _ => StorageError::Remote(message),
    }
}

impl S3ObjectStore {
    pub async fn connect(remote: &RemoteConfig) -> Self {
        let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
            .region(Region::new(remote.region.clone()))
            .credentials_provider(s3::config::Credentials::new(
                &remote.access_key_id,
                &remote.secret_access_key,
                None, // session_token
                None, // expiry
                "Static", // provider_name
            ));
        if let Some(endpoint) = &remote.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;

        tracing::debug!(
            "S3 client ready for bucket {} in {}",
            remote.bucket,
            remote.region
        );
        Self {
            client: s3::Client::new(&sdk_config),
            bucket: remote.bucket.clone(),
        }
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn create_multipart_upload(&self, key: &str) -> Result<String, StorageError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type("application/gzip")
            .send()
            .await
            .map_err(|e| remote_error("Failed to start multipart upload for", key, e))?;

        output
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::Remote(format!("No upload id returned for {}", key)))
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String, StorageError> {
        let output = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| remote_error(&format!("Failed to upload part {} of", part_number), key, e))?;

        output.e_tag().map(str::to_string).ok_or_else(|| {
            StorageError::Remote(format!("No ETag returned for part {} of {}", part_number, key))
        })
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartReceipt],
    ) -> Result<(), StorageError> {
        let completed: Vec<CompletedPart> = parts
            .iter()
            .map(|p| {
                CompletedPart::builder()
                    .part_number(p.part_number)
                    .e_tag(&p.etag)
                    .build()
            })
            .collect();

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|e| remote_error("Failed to complete multipart upload for", key, e))?;
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(|e| remote_error("Failed to abort multipart upload for", key, e))?;
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError> {
        let output = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| remote_error("Failed to list objects under", prefix, e))?;

        let entries = output
            .contents()
            .iter()
            .filter_map(|object| {
                let key = object.key()?.to_string();
                let modified = object
                    .last_modified()
                    .and_then(|t| Utc.timestamp_opt(t.secs(), t.subsec_nanos()).single());
                Some(Artifact { key, modified })
            })
            .collect();

        let next_token = if output.is_truncated().unwrap_or(false) {
            output.next_continuation_token().map(str::to_string)
        } else {
            None
        };
        Ok(ListPage {
            entries,
            next_token,
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| remote_error("Failed to delete", key, e))?;
        Ok(())
    }
}
