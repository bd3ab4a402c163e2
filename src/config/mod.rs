// dbdump/src/config/mod.rs
use std::fmt;
use std::path::PathBuf;

use crate::errors::{BackupError, Result};

pub const DEFAULT_RETENTION: usize = 3;
pub const DEFAULT_UPLOAD_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_PART_SIZE_MB: u64 = 8;
/// S3 rejects non-final multipart parts smaller than 5 MiB.
pub const MIN_PART_SIZE_MB: u64 = 5;
/// Keeps derived lock file names well under common file name limits.
const MAX_LOCK_SLUG_LEN: usize = 160;

const REQUIRED_KEYS: &[&str] = &[
    "DB_HOST",
    "DB_NAME",
    "DB_USER",
    "DB_PASS",
    "DB_PORT",
    "DUMP_STORAGE",
    "DUMP_PATH",
];
const REQUIRED_S3_KEYS: &[&str] = &["AWS_KEY", "AWS_REGION", "AWS_SECRET", "AWS_BUCKET"];

/// Database connection parameters handed to the dump producer.
#[derive(Clone)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

#[derive(Clone)]
pub struct RemoteConfig {
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub endpoint_url: Option<String>,
    pub key_prefix: String,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("endpoint_url", &self.endpoint_url)
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub enum BackendConfig {
    Local { path: PathBuf },
    Remote(RemoteConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadSettings {
    pub max_attempts: u32,
    pub part_size_bytes: u64,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_UPLOAD_MAX_ATTEMPTS,
            part_size_bytes: DEFAULT_PART_SIZE_MB * 1024 * 1024,
        }
    }
}

/// Immutable run configuration, built once in `main` and passed by reference.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub connection: ConnectionParams,
    pub backend: BackendConfig,
    pub retention: usize,
    pub upload: UploadSettings,
    pub lock_path: PathBuf,
    pub mysqldump_bin: Option<PathBuf>,
}

impl AppConfig {
    /// Reads an optional `.env` file, then the process environment.
    pub fn load() -> Result<Self> {
        match dotenv::dotenv() {
            Ok(path) => tracing::debug!("Loaded settings from {}", path.display()),
            Err(e) if e.not_found() => tracing::debug!("No .env file found, using process environment"),
            Err(e) => {
                return Err(BackupError::Config(format!("Failed to read .env file: {}", e)));
            }
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let missing: Vec<&str> = REQUIRED_KEYS
            .iter()
            .copied()
            .filter(|key| get(key).is_none())
            .collect();
        if !missing.is_empty() {
            return Err(missing_keys(&missing));
        }
        let required = |key: &str| get(key).unwrap_or_default();

        let port = required("DB_PORT").parse::<u16>().map_err(|_| {
            BackupError::Config(format!("DB_PORT must be a port number, got '{}'", required("DB_PORT")))
        })?;
        let connection = ConnectionParams {
            host: required("DB_HOST"),
            port,
            database: required("DB_NAME"),
            user: required("DB_USER"),
            password: required("DB_PASS"),
        };

        let dump_path = required("DUMP_PATH");
        let backend = match required("DUMP_STORAGE").to_ascii_lowercase().as_str() {
            "local" => BackendConfig::Local {
                path: PathBuf::from(dump_path),
            },
            "s3" => {
                let missing: Vec<&str> = REQUIRED_S3_KEYS
                    .iter()
                    .copied()
                    .filter(|key| get(key).is_none())
                    .collect();
                if !missing.is_empty() {
                    return Err(missing_keys(&missing));
                }
                BackendConfig::Remote(RemoteConfig {
                    bucket: required("AWS_BUCKET"),
                    region: required("AWS_REGION"),
                    access_key_id: required("AWS_KEY"),
                    secret_access_key: required("AWS_SECRET"),
                    endpoint_url: get("AWS_ENDPOINT"),
                    key_prefix: dump_path,
                })
            }
            other => {
                return Err(BackupError::Config(format!(
                    "DUMP_STORAGE must be 'local' or 's3', got '{}'",
                    other
                )));
            }
        };

        let retention = parse_optional(&get, "DUMP_RETENTION", DEFAULT_RETENTION)?;
        if retention == 0 {
            return Err(BackupError::Config(
                "DUMP_RETENTION must be at least 1".to_string(),
            ));
        }

        let max_attempts = parse_optional(&get, "UPLOAD_MAX_ATTEMPTS", DEFAULT_UPLOAD_MAX_ATTEMPTS)?;
        if max_attempts == 0 {
            return Err(BackupError::Config(
                "UPLOAD_MAX_ATTEMPTS must be at least 1".to_string(),
            ));
        }
        let part_size_mb = parse_optional(&get, "UPLOAD_PART_SIZE_MB", DEFAULT_PART_SIZE_MB)?;
        if part_size_mb < MIN_PART_SIZE_MB {
            return Err(BackupError::Config(format!(
                "UPLOAD_PART_SIZE_MB must be at least {}, got {}",
                MIN_PART_SIZE_MB, part_size_mb
            )));
        }

        let lock_path = get("DUMP_LOCK_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join(default_lock_file_name(&backend)));

        Ok(AppConfig {
            connection,
            backend,
            retention,
            upload: UploadSettings {
                max_attempts,
                part_size_bytes: part_size_mb * 1024 * 1024,
            },
            lock_path,
            mysqldump_bin: get("MYSQLDUMP_BIN").map(PathBuf::from),
        })
    }
}

/// Lock file name for a namespace, so runs only exclude each other when they
/// prune the same directory or bucket prefix.
fn default_lock_file_name(backend: &BackendConfig) -> String {
    let namespace = match backend {
        BackendConfig::Local { path } => format!("local-{}", path.display()),
        BackendConfig::Remote(remote) => format!("s3-{}-{}", remote.bucket, remote.key_prefix),
    };
    let slug: String = namespace
        .trim_end_matches(['/', '\\'])
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .take(MAX_LOCK_SLUG_LEN)
        .collect();
    format!("dbdump-{}.lock", slug)
}

fn missing_keys(keys: &[&str]) -> BackupError {
    BackupError::Config(format!(
        "Required settings missing or empty: {}",
        keys.join(", ")
    ))
}

fn parse_optional<T, F>(get: &F, key: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|_| BackupError::Config(format!("{} has an invalid value '{}'", key, raw))),
        None => Ok(default),
    }
}
