//! Storage backends holding dump artifacts.
//!
//! A backend owns one namespace (a directory, or a bucket prefix) and knows
//! how to place, enumerate and remove artifacts in it.

pub(crate) mod local;
#[cfg(test)]
pub(crate) mod memory;
pub(crate) mod multipart;
pub(crate) mod remote;
pub(crate) mod s3;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{AppConfig, BackendConfig};
use crate::errors::StorageError;
use crate::utils::backoff::Backoff;

pub use local::LocalBackend;
pub use remote::RemoteBackend;

/// One stored dump. `key` is relative to the backend, `modified` is the
/// backend's modification time when it reports one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub key: String,
    pub modified: Option<DateTime<Utc>>,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Namespace prefix prepended to artifact names to form keys.
    fn prefix(&self) -> &str;

    fn artifact_key(&self, name: &str) -> String {
        format!("{}{}", self.prefix(), name)
    }

    /// Local path the producer writes the dump to before `place` is called.
    async fn staging_path(&self, name: &str) -> Result<PathBuf, StorageError>;

    async fn place(&self, source: &Path, key: &str) -> Result<(), StorageError>;

    /// All artifacts under `prefix`, oldest first.
    async fn list(&self, prefix: &str) -> Result<Vec<Artifact>, StorageError>;

    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// Releases the staged copy once the artifact has been placed.
    async fn release_staged(&self, _staged: &Path) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Orders artifacts oldest first by modification time, ties broken by key.
/// If any entry lacks a modification time the whole listing falls back to
/// key order, which is time order for generated names.
pub fn sort_oldest_first(artifacts: &mut [Artifact]) {
    if artifacts.iter().all(|a| a.modified.is_some()) {
        artifacts.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.key.cmp(&b.key)));
    } else {
        artifacts.sort_by(|a, b| a.key.cmp(&b.key));
    }
}

/// Selects the backend once, from configuration.
pub async fn build_backend(config: &AppConfig) -> Box<dyn StorageBackend> {
    match &config.backend {
        BackendConfig::Local { path } => Box::new(LocalBackend::new(path.clone())),
        BackendConfig::Remote(remote) => {
            let store = s3::S3ObjectStore::connect(remote).await;
            Box::new(RemoteBackend::new(
                Arc::new(store),
                remote.key_prefix.clone(),
                std::env::temp_dir(),
                config.upload.clone(),
                Backoff::default(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(secs, 0).single()
    }

    #[test]
    fn test_sort_by_modified_then_key() {
        let mut artifacts = vec![
            Artifact { key: "c".into(), modified: at(30) },
            Artifact { key: "b".into(), modified: at(10) },
            Artifact { key: "a".into(), modified: at(10) },
            Artifact { key: "d".into(), modified: at(5) },
        ];
        sort_oldest_first(&mut artifacts);

        let keys: Vec<&str> = artifacts.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(keys, vec!["d", "a", "b", "c"]);
    }

    #[test]
    fn test_missing_modified_time_falls_back_to_key_order() {
        let mut artifacts = vec![
            Artifact { key: "2024-01-03 00_00_00.sql.gz".into(), modified: at(1) },
            Artifact { key: "2024-01-01 00_00_00.sql.gz".into(), modified: None },
            Artifact { key: "2024-01-02 00_00_00.sql.gz".into(), modified: at(99) },
        ];
        sort_oldest_first(&mut artifacts);

        let keys: Vec<&str> = artifacts.iter().map(|a| a.key.as_str()).collect();
        assert_eq!(
            keys,
            vec![
                "2024-01-01 00_00_00.sql.gz",
                "2024-01-02 00_00_00.sql.gz",
                "2024-01-03 00_00_00.sql.gz",
            ]
        );
    }
}
