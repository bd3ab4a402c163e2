// dbdump/src/storage/multipart.rs
//! Resumable multipart upload.
//!
//! Each attempt uploads only the parts not yet acknowledged, reusing the
//! upload id from earlier attempts, so a transient failure resumes from the
//! last good part instead of from zero.

use std::collections::BTreeMap;
use std::io::SeekFrom;
use std::path::Path;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};

use super::remote::{ObjectStore, PartReceipt};
use crate::config::UploadSettings;
use crate::errors::StorageError;
use crate::utils::backoff::Backoff;

const MAX_PARTS: u64 = 10_000;

/// Progress carried from one attempt to the next.
#[derive(Debug, Clone, Default)]
pub struct UploadState {
    pub upload_id: Option<String>,
    /// Acknowledged parts: part number to ETag.
    pub completed: BTreeMap<i32, String>,
}

impl UploadState {
    fn receipts(&self) -> Vec<PartReceipt> {
        self.completed
            .iter()
            .map(|(part_number, etag)| PartReceipt {
                part_number: *part_number,
                etag: etag.clone(),
            })
            .collect()
    }
}

/// Part size actually used: the configured size, grown if the file would
/// otherwise need more parts than S3 accepts.
fn effective_part_size(file_size: u64, configured: u64) -> u64 {
    configured.max(file_size.div_ceil(MAX_PARTS)).max(1)
}

fn part_count(file_size: u64, part_size: u64) -> i32 {
    file_size.div_ceil(part_size).max(1) as i32
}

/// One pass over the remaining parts, recording progress in `state`.
pub async fn upload_attempt(
    store: &dyn ObjectStore,
    source: &Path,
    key: &str,
    part_size: u64,
    state: &mut UploadState,
) -> Result<(), StorageError> {
    let mut file = File::open(source)
        .await
        .map_err(|e| StorageError::io(source, e))?;
    let file_size = file
        .metadata()
        .await
        .map_err(|e| StorageError::io(source, e))?
        .len();
    let part_size = effective_part_size(file_size, part_size);

    let upload_id = match &state.upload_id {
        Some(id) => id.clone(),
        None => {
            let id = store.create_multipart_upload(key).await?;
            tracing::debug!("Started multipart upload {} for {}", id, key);
            state.upload_id = Some(id.clone());
            id
        }
    };

    for part_number in 1..=part_count(file_size, part_size) {
        if state.completed.contains_key(&part_number) {
            continue;
        }
        let offset = (part_number as u64 - 1) * part_size;
        let mut body = vec![0u8; part_size.min(file_size - offset) as usize];
        file.seek(SeekFrom::Start(offset))
            .await
            .map_err(|e| StorageError::io(source, e))?;
        file.read_exact(&mut body)
            .await
            .map_err(|e| StorageError::io(source, e))?;

        let etag = store.upload_part(key, &upload_id, part_number, body).await?;
        state.completed.insert(part_number, etag);
    }

    store
        .complete_multipart_upload(key, &upload_id, &state.receipts())
        .await
}

/// Uploads `source` to `key`, resuming after transient failures up to
/// `settings.max_attempts` times. A failed upload is aborted so no orphaned
/// parts stay behind.
pub async fn upload_with_retry(
    store: &dyn ObjectStore,
    source: &Path,
    key: &str,
    settings: &UploadSettings,
    backoff: &Backoff,
) -> Result<(), StorageError> {
    let mut state = UploadState::default();
    let mut attempts = 0u32;

    loop {
        attempts += 1;
        let error = match upload_attempt(store, source, key, settings.part_size_bytes, &mut state).await {
            Ok(()) => {
                if attempts > 1 {
                    tracing::info!("Upload of {} succeeded on attempt {}", key, attempts);
                }
                return Ok(());
            }
            Err(e) => e,
        };

        if let StorageError::UploadExpired(_) = &error {
            // Acknowledged parts died with the upload id.
            tracing::warn!(
                "Multipart upload for {} expired after {} parts, starting a new upload",
                key,
                state.completed.len()
            );
            state = UploadState::default();
        }

        let retryable = error.is_retryable();
        if !retryable || attempts >= settings.max_attempts {
            abort(store, key, &state).await;
            return Err(if retryable {
                StorageError::UploadFailed {
                    attempts,
                    last_error: error.to_string(),
                }
            } else {
                error
            });
        }

        let delay = backoff.delay_for_attempt(attempts - 1);
        tracing::warn!(
            "Upload of {} failed on attempt {}/{} with {} parts acknowledged: {}. Resuming in {:?}",
            key,
            attempts,
            settings.max_attempts,
            state.completed.len(),
            error,
            delay
        );
        tokio::time::sleep(delay).await;
    }
}

async fn abort(store: &dyn ObjectStore, key: &str, state: &UploadState) {
    let Some(upload_id) = &state.upload_id else {
        return;
    };
    if let Err(e) = store.abort_multipart_upload(key, upload_id).await {
        tracing::warn!("Failed to abort multipart upload {} for {}: {}", upload_id, key, e);
    }
}
