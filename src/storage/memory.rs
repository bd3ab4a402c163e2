// dbdump/src/storage/memory.rs
//! In-memory object store with failure injection, for tests.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::Artifact;
use super::remote::{ListPage, ObjectStore, PartReceipt};
use crate::errors::StorageError;

const BASE_TIME: i64 = 1_700_000_000;

struct StoredObject {
    body: Vec<u8>,
    modified: i64,
}

struct PendingUpload {
    key: String,
    parts: BTreeMap<i32, Vec<u8>>,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<String, StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    created_uploads: usize,
    clock: i64,
    part_failures: HashMap<i32, u32>,
    complete_failures: u32,
    fail_list: bool,
    rejected_parts: HashSet<i32>,
    expire_at_part: Option<i32>,
    fail_deletes: HashSet<String>,
    part_calls: Vec<i32>,
    list_calls: usize,
    aborted: Vec<String>,
    deleted: Vec<String>,
}

pub struct MemoryStore {
    inner: Mutex<Inner>,
    page_size: usize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::with_page_size(1000)
    }
}

impl MemoryStore {
    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                clock: BASE_TIME,
                ..Inner::default()
            }),
            page_size,
        }
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("memory store lock poisoned")
    }

    /// Seeds an object modified `offset_secs` after the base time.
    pub fn insert_object(&self, key: &str, offset_secs: i64) {
        let mut inner = self.inner();
        let modified = BASE_TIME + offset_secs;
        inner.clock = inner.clock.max(modified);
        inner.objects.insert(
            key.to_string(),
            StoredObject {
                body: b"seeded".to_vec(),
                modified,
            },
        );
    }

    /// Makes the next `times` uploads of `part_number` fail.
    pub fn fail_part(&self, part_number: i32, times: u32) {
        self.inner().part_failures.insert(part_number, times);
    }

    /// Makes every upload of `part_number` fail with a permanent error.
    pub fn reject_part(&self, part_number: i32) {
        self.inner().rejected_parts.insert(part_number);
    }

    /// Drops the pending upload the first time `part_number` is sent, as a
    /// server does when an upload id expires.
    pub fn expire_upload_at_part(&self, part_number: i32) {
        self.inner().expire_at_part = Some(part_number);
    }

    pub fn fail_completes(&self, times: u32) {
        self.inner().complete_failures = times;
    }

    pub fn fail_listing(&self) {
        self.inner().fail_list = true;
    }

    pub fn fail_delete(&self, key: &str) {
        self.inner().fail_deletes.insert(key.to_string());
    }

    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.inner().objects.get(key).map(|o| o.body.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        self.inner().objects.keys().cloned().collect()
    }

    pub fn part_calls(&self) -> Vec<i32> {
        self.inner().part_calls.clone()
    }

    pub fn created_uploads(&self) -> usize {
        self.inner().created_uploads
    }

    pub fn pending_uploads(&self) -> usize {
        self.inner().uploads.len()
    }

    pub fn list_calls(&self) -> usize {
        self.inner().list_calls
    }

    pub fn aborted(&self) -> Vec<String> {
        self.inner().aborted.clone()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.inner().deleted.clone()
    }
}

fn no_such_upload(upload_id: &str) -> StorageError {
    StorageError::UploadExpired(format!("NoSuchUpload: {}", upload_id))
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn create_multipart_upload(&self, key: &str) -> Result<String, StorageError> {
        let mut inner = self.inner();
        inner.created_uploads += 1;
        let upload_id = format!("upload-{}", inner.created_uploads);
        inner.uploads.insert(
            upload_id.clone(),
            PendingUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn upload_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        body: Vec<u8>,
    ) -> Result<String, StorageError> {
        let mut inner = self.inner();
        inner.part_calls.push(part_number);
        if inner.rejected_parts.contains(&part_number) {
            return Err(StorageError::Rejected(format!(
                "AccessDenied for part {}",
                part_number
            )));
        }
        if inner.expire_at_part == Some(part_number) {
            inner.expire_at_part = None;
            inner.uploads.remove(upload_id);
            return Err(no_such_upload(upload_id));
        }
        if let Some(remaining) = inner.part_failures.get_mut(&part_number) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(StorageError::Remote(format!(
                    "injected failure for part {}",
                    part_number
                )));
            }
        }
        let upload = inner
            .uploads
            .get_mut(upload_id)
            .filter(|u| u.key == key)
            .ok_or_else(|| no_such_upload(upload_id))?;
        upload.parts.insert(part_number, body);
        Ok(format!("etag-{}-{}", upload_id, part_number))
    }

    async fn complete_multipart_upload(
        &self,
        key: &str,
        upload_id: &str,
        parts: &[PartReceipt],
    ) -> Result<(), StorageError> {
        let mut inner = self.inner();
        if inner.complete_failures > 0 {
            inner.complete_failures -= 1;
            return Err(StorageError::Remote("injected completion failure".to_string()));
        }
        let upload = inner
            .uploads
            .remove(upload_id)
            .ok_or_else(|| no_such_upload(upload_id))?;

        let stored: Vec<i32> = upload.parts.keys().copied().collect();
        let listed: Vec<i32> = parts.iter().map(|p| p.part_number).collect();
        let etags_match = parts
            .iter()
            .all(|p| p.etag == format!("etag-{}-{}", upload_id, p.part_number));
        if upload.key != key || stored != listed || !etags_match {
            return Err(StorageError::Rejected("InvalidPart".to_string()));
        }

        let body = upload.parts.into_values().flatten().collect();
        inner.clock += 1;
        let modified = inner.clock;
        inner
            .objects
            .insert(key.to_string(), StoredObject { body, modified });
        Ok(())
    }

    async fn abort_multipart_upload(&self, key: &str, upload_id: &str) -> Result<(), StorageError> {
        let mut inner = self.inner();
        inner.uploads.remove(upload_id);
        inner.aborted.push(key.to_string());
        Ok(())
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, StorageError> {
        let mut inner = self.inner();
        inner.list_calls += 1;
        if inner.fail_list {
            return Err(StorageError::Remote("injected listing failure".to_string()));
        }

        let start: usize = match continuation {
            Some(token) => token
                .parse()
                .map_err(|_| StorageError::Remote(format!("bad continuation token {}", token)))?,
            None => 0,
        };
        let matching: Vec<Artifact> = inner
            .objects
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, object)| Artifact {
                key: key.clone(),
                modified: Utc.timestamp_opt(object.modified, 0).single(),
            })
            .collect();

        let end = (start + self.page_size).min(matching.len());
        Ok(ListPage {
            entries: matching[start.min(end)..end].to_vec(),
            next_token: (end < matching.len()).then(|| end.to_string()),
        })
    }

    async fn delete_object(&self, key: &str) -> Result<(), StorageError> {
        let mut inner = self.inner();
        inner.deleted.push(key.to_string());
        if inner.fail_deletes.contains(key) {
            return Err(StorageError::Rejected(format!("AccessDenied: {}", key)));
        }
        inner.objects.remove(key);
        Ok(())
    }
}
