// dbdump/src/utils/lock.rs
use std::fs::{self, File, OpenOptions, TryLockError};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::errors::BackupError;

/// Advisory lock serialising runs that share a namespace.
///
/// The exclusion comes from an OS lock on the open handle, not from the file
/// existing, so the kernel releases it when the process exits for any reason.
/// A file left behind by a killed run is simply locked again by the next one.
/// The holder's pid is written into the file for diagnostics.
#[derive(Debug)]
pub struct RunLock {
    file: File,
    path: PathBuf,
}

impl RunLock {
    pub fn acquire(path: &Path) -> Result<Self, BackupError> {
        let lock_error = |reason: String| BackupError::Lock {
            path: path.display().to_string(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| lock_error(e.to_string()))?;
        }

        // Never truncate on open: the current holder's pid must survive a
        // failed attempt.
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .map_err(|e| lock_error(e.to_string()))?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                let holder = fs::read_to_string(path).unwrap_or_default();
                let holder = holder.trim();
                return Err(lock_error(format!(
                    "another run is in progress (pid {})",
                    if holder.is_empty() { "unknown" } else { holder }
                )));
            }
            Err(TryLockError::Error(e)) => return Err(lock_error(e.to_string())),
        }

        file.set_len(0)
            .and_then(|()| file.seek(SeekFrom::Start(0)))
            .and_then(|_| writeln!(file, "{}", std::process::id()))
            .map_err(|e| lock_error(e.to_string()))?;

        tracing::debug!("Acquired run lock {}", path.display());
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // The file stays: unlinking it would let a waiter lock a stale inode
        // while a newcomer locks a fresh file.
        if let Err(e) = self.file.set_len(0) {
            tracing::debug!("Failed to clear run lock {}: {}", self.path.display(), e);
        }
        if let Err(e) = self.file.unlock() {
            tracing::warn!("Failed to release run lock {}: {}", self.path.display(), e);
        }
    }
}
