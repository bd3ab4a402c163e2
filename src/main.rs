//! Database dump tool
//!
//! Dumps a MySQL database, stores the compressed dump locally or in S3 and
//! keeps only the most recent dumps. Meant to be run from a scheduler.

// dbdump/src/main.rs
mod backup;
mod config;
mod errors;
mod storage;
mod utils;

use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use backup::RunReport;
use config::{AppConfig, BackendConfig};
use errors::Result;

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    match run_app().await {
        Ok(report) => {
            if report.is_clean() {
                tracing::info!(
                    "✅ Backup {} completed successfully, {} old dump(s) removed.",
                    report.artifact_key,
                    report.deleted.len()
                );
            } else {
                tracing::warn!(
                    "✅ Backup {} completed with {} retention problem(s){}.",
                    report.artifact_key,
                    report.prune_failures.len(),
                    if report.cleanup_error.is_some() { " and a leftover staged file" } else { "" }
                );
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("❌ Error: {}", e);
            e.exit_code()
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("dbdump=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_app() -> Result<RunReport> {
    let config = AppConfig::load()?;
    tracing::info!(
        "🚀 Starting backup of {} ({} storage, keeping {})",
        config.connection.database,
        match &config.backend {
            BackendConfig::Local { .. } => "local",
            BackendConfig::Remote(_) => "s3",
        },
        config.retention
    );
    backup::run_backup_flow(&config).await
}
