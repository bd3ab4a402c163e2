// dbdump/src/backup/logic.rs
use std::path::Path;

use super::db_dump::{DumpOptions, DumpProducer};
use super::naming::ArtifactNamer;
use super::retention::select_for_deletion;
use crate::config::AppConfig;
use crate::errors::{BackupError, Result};
use crate::storage::StorageBackend;

/// Outcome of a run that placed its artifact. Prune and cleanup problems are
/// recorded here rather than failing the run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub artifact_key: String,
    pub deleted: Vec<String>,
    pub prune_failures: Vec<String>,
    pub cleanup_error: Option<String>,
}

impl RunReport {
    pub fn is_clean(&self) -> bool {
        self.prune_failures.is_empty() && self.cleanup_error.is_none()
    }
}

/// produce -> place -> list -> prune -> release staged copy.
pub async fn run_pipeline(
    config: &AppConfig,
    producer: &dyn DumpProducer,
    backend: &dyn StorageBackend,
    namer: &ArtifactNamer,
) -> Result<RunReport> {
    let name = namer.next_name();
    let key = backend.artifact_key(&name);
    let placement_error = |source| BackupError::Placement {
        key: key.clone(),
        source,
    };

    let staged = backend.staging_path(&name).await.map_err(placement_error)?;

    tracing::info!(
        "Dumping database {} from {}:{} to {}",
        config.connection.database,
        config.connection.host,
        config.connection.port,
        staged.display()
    );
    if let Err(e) = producer
        .produce(&config.connection, &staged, &DumpOptions::full())
        .await
    {
        discard_partial(&staged).await;
        return Err(BackupError::Producer(e));
    }

    tracing::info!("Placing {} on {} backend", key, backend.name());
    if let Err(e) = backend.place(&staged, &key).await {
        if staged.exists() {
            tracing::warn!("Dump left at {} after failed placement", staged.display());
        }
        return Err(placement_error(e));
    }

    let mut report = RunReport {
        artifact_key: key,
        ..RunReport::default()
    };
    prune(backend, config.retention, &mut report).await;

    if let Err(e) = backend.release_staged(&staged).await {
        tracing::warn!("Failed to remove staged dump {}: {}", staged.display(), e);
        report.cleanup_error = Some(e.to_string());
    }
    Ok(report)
}

/// Deletes the oldest artifacts beyond the retention window, oldest first.
/// Failures are logged and recorded; they never abort the run.
async fn prune(backend: &dyn StorageBackend, keep: usize, report: &mut RunReport) {
    let listing = match backend.list(backend.prefix()).await {
        Ok(listing) => listing,
        Err(e) => {
            tracing::warn!("Skipping retention, listing existing dumps failed: {}", e);
            report.prune_failures.push(format!("list: {}", e));
            return;
        }
    };

    // The new dump always counts as one of the kept ones, wherever a skewed
    // clock or a future-dated file ranks it, so the others get `keep - 1`.
    let total = listing.len();
    let others: Vec<_> = listing
        .into_iter()
        .filter(|artifact| artifact.key != report.artifact_key)
        .collect();
    if others.len() == total {
        tracing::warn!("{} is missing from the listing", report.artifact_key);
    }
    let doomed = select_for_deletion(&others, keep.saturating_sub(1));
    tracing::info!(
        "Found {} dumps, keeping newest {}, deleting {}",
        total,
        keep,
        doomed.len()
    );

    for key in doomed {
        match backend.delete(&key).await {
            Ok(()) => {
                tracing::info!("🗑 Deleted old dump {}", key);
                report.deleted.push(key);
            }
            Err(e) => {
                tracing::warn!("Failed to delete old dump {}: {}", key, e);
                report.prune_failures.push(format!("{}: {}", key, e));
            }
        }
    }
}

async fn discard_partial(staged: &Path) {
    match tokio::fs::remove_file(staged).await {
        Ok(()) => tracing::debug!("Removed partial dump {}", staged.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => tracing::warn!("Failed to remove partial dump {}: {}", staged.display(), e),
    }
}
