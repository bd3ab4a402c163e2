// dbdump/src/storage/local.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use super::{Artifact, StorageBackend, sort_oldest_first};
use crate::backup::naming::is_artifact_name;
use crate::errors::StorageError;

const PARTIAL_SUFFIX: &str = ".partial";

/// Keeps artifacts as files directly under `root`. Keys are file names.
pub struct LocalBackend {
    root: PathBuf,
}

impl LocalBackend {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let plain = !key.is_empty()
            && !key.contains(['/', '\\'])
            && key != "."
            && key != "..";
        if !plain {
            return Err(StorageError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }

    async fn ensure_root(&self) -> Result<(), StorageError> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))
    }
}

#[async_trait]
impl StorageBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "local"
    }

    fn prefix(&self) -> &str {
        ""
    }

    /// Dumps are written next to their final location under a suffix that
    /// listings ignore, then renamed into place.
    async fn staging_path(&self, name: &str) -> Result<PathBuf, StorageError> {
        self.ensure_root().await?;
        let target = self.path_for(name)?;
        let mut staged = target.into_os_string();
        staged.push(PARTIAL_SUFFIX);
        Ok(PathBuf::from(staged))
    }

    async fn place(&self, source: &Path, key: &str) -> Result<(), StorageError> {
        let destination = self.path_for(key)?;
        self.ensure_root().await?;
        if source == destination {
            return Ok(());
        }

        match tokio::fs::rename(source, &destination).await {
            Ok(()) => {}
            // Crossing filesystems: copy, then drop the source.
            Err(e) if e.kind() == ErrorKind::CrossesDevices => {
                tokio::fs::copy(source, &destination)
                    .await
                    .map_err(|e| StorageError::io(&destination, e))?;
                tokio::fs::remove_file(source)
                    .await
                    .map_err(|e| StorageError::io(source, e))?;
            }
            Err(e) => return Err(StorageError::io(&destination, e)),
        }
        tracing::info!("Stored {} in {}", key, self.root.display());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<Artifact>, StorageError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StorageError::io(&self.root, e))?;

        let mut artifacts = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.root, e))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                continue;
            };
            if !name.starts_with(prefix) || !is_artifact_name(&name) {
                continue;
            }
            let metadata = entry
                .metadata()
                .await
                .map_err(|e| StorageError::io(entry.path(), e))?;
            if !metadata.is_file() {
                continue;
            }
            artifacts.push(Artifact {
                key: name,
                modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            });
        }

        sort_oldest_first(&mut artifacts);
        Ok(artifacts)
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(StorageError::NotFound(key.to_string())),
            Err(e) => Err(StorageError::io(&path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn write_with_mtime(dir: &Path, name: &str, age_secs: u64) -> anyhow::Result<()> {
        let path = dir.join(name);
        std::fs::write(&path, b"dump")?;
        let file = std::fs::File::options().write(true).open(&path)?;
        file.set_modified(SystemTime::now() - Duration::from_secs(age_secs))?;
        Ok(())
    }

    #[tokio::test]
    async fn test_place_creates_root_and_moves_file() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let root = tmp.path().join("nested").join("dumps");
        let backend = LocalBackend::new(root.clone());

        let staged = backend.staging_path("2024-05-01 10_00_00.sql.gz").await?;
        assert!(root.is_dir());
        std::fs::write(&staged, b"compressed")?;

        backend.place(&staged, "2024-05-01 10_00_00.sql.gz").await?;
        assert!(!staged.exists());
        assert_eq!(
            std::fs::read(root.join("2024-05-01 10_00_00.sql.gz"))?,
            b"compressed"
        );
        Ok(())
    }

    #[tokio::test]
    async fn test_list_orders_oldest_first_and_skips_other_files() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        // Modification time decides, not the name.
        write_with_mtime(tmp.path(), "b.sql.gz", 300)?;
        write_with_mtime(tmp.path(), "a.sql.gz", 100)?;
        write_with_mtime(tmp.path(), "c.sql.gz", 200)?;
        write_with_mtime(tmp.path(), "c.sql.gz.partial", 500)?;
        write_with_mtime(tmp.path(), "README", 900)?;
        std::fs::create_dir(tmp.path().join("old.sql.gz"))?;

        let backend = LocalBackend::new(tmp.path().to_path_buf());
        let keys: Vec<String> = backend.list("").await?.into_iter().map(|a| a.key).collect();
        assert_eq!(keys, vec!["b.sql.gz", "c.sql.gz", "a.sql.gz"]);
        Ok(())
    }

    #[tokio::test]
    async fn test_delete_missing_file_is_reported() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let backend = LocalBackend::new(tmp.path().to_path_buf());

        let err = backend.delete("gone.sql.gz").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
        Ok(())
    }

    #[tokio::test]
    async fn test_keys_cannot_escape_root() -> anyhow::Result<()> {
        let tmp = TempDir::new()?;
        let backend = LocalBackend::new(tmp.path().to_path_buf());

        for key in ["../etc.sql.gz", "sub/x.sql.gz", ".."] {
            let err = backend.delete(key).await.unwrap_err();
            assert!(matches!(err, StorageError::InvalidKey(_)), "{}", key);
        }
        Ok(())
    }
}
