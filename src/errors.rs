use std::process::ExitCode;
use thiserror::Error;

/// Errors that abort a run. Anything raised after the new artifact has been
/// placed is reported through [`crate::backup::RunReport`] instead.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Another run holds the lock {path}: {reason}")]
    Lock { path: String, reason: String },

    #[error("Database dump failed: {0:#}")]
    Producer(anyhow::Error),

    #[error("Placing artifact {key} failed: {source}")]
    Placement {
        key: String,
        #[source]
        source: StorageError,
    },
}

impl BackupError {
    /// Process exit code for each fatal error kind.
    pub fn exit_code(&self) -> ExitCode {
        match self {
            BackupError::Config(_) => ExitCode::from(2),
            BackupError::Lock { .. } => ExitCode::from(3),
            BackupError::Producer(_) => ExitCode::from(4),
            BackupError::Placement { .. } => ExitCode::from(5),
        }
    }
}

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Artifact not found: {0}")]
    NotFound(String),

    #[error("Object storage error: {0}")]
    Remote(String),

    /// The service refused the request outright (bad credentials, missing
    /// bucket, denied access). Repeating it cannot help.
    #[error("Object storage rejected the request: {0}")]
    Rejected(String),

    /// The multipart upload id is no longer known to the service.
    #[error("Multipart upload no longer exists: {0}")]
    UploadExpired(String),

    #[error("Upload failed after {attempts} attempts: {last_error}")]
    UploadFailed { attempts: u32, last_error: String },

    #[error("Invalid artifact key: {0}")]
    InvalidKey(String),
}

impl StorageError {
    /// Transient object-storage failures are worth another attempt. An
    /// expired upload is retried from scratch. Rejections, local I/O
    /// problems and bad keys are not retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Remote(_) | StorageError::UploadExpired(_))
    }

    pub(crate) fn io(path: impl AsRef<std::path::Path>, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.as_ref().display().to_string(),
            source,
        }
    }
}

pub type Result<T, E = BackupError> = std::result::Result<T, E>;
