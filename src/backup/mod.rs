mod logic;
pub(crate) mod db_dump;
pub(crate) mod naming;
pub(crate) mod retention;

use crate::config::AppConfig;
use crate::errors::{BackupError, Result};
use crate::storage::build_backend;
use crate::utils::lock::RunLock;
use db_dump::MysqldumpProducer;
use naming::ArtifactNamer;

pub use logic::{RunReport, run_pipeline};

/// Public entry point for a backup run. Holds the run lock for the whole
/// pipeline so overlapping invocations cannot race on the same namespace.
pub async fn run_backup_flow(config: &AppConfig) -> Result<RunReport> {
    let _lock = RunLock::acquire(&config.lock_path)?;

    let producer = MysqldumpProducer::locate(config.mysqldump_bin.as_deref())
        .map_err(BackupError::Producer)?;
    let backend = build_backend(config).await;
    let namer = ArtifactNamer::system();

    run_pipeline(config, &producer, backend.as_ref(), &namer).await
}
