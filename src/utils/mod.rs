pub mod backoff;
pub mod lock;

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use which::which;

/// Resolves the mysqldump executable: an explicit path wins, otherwise PATH.
pub fn find_mysqldump_executable(explicit: Option<&Path>) -> Result<PathBuf> {
    match explicit {
        Some(path) if path.is_file() => Ok(path.to_path_buf()),
        Some(path) => anyhow::bail!("MYSQLDUMP_BIN points to {}, which is not a file", path.display()),
        None => which("mysqldump").context("mysqldump executable not found in PATH. Please ensure MySQL client tools are installed and in your PATH."),
    }
}
