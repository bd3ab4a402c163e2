// dbdump/src/backup/db_dump.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use flate2::Compression;
use flate2::write::GzEncoder;
use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::config::ConnectionParams;
use crate::utils::find_mysqldump_executable;

/// What goes into a dump besides the table data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DumpOptions {
    pub compress: bool,
    pub drop_table_statements: bool,
    pub hold_locks: bool,
    pub include_events: bool,
    pub include_routines: bool,
}

impl DumpOptions {
    /// Schema-preserving, gzip-compressed dump. The only options used by runs.
    pub fn full() -> Self {
        Self {
            compress: true,
            drop_table_statements: true,
            hold_locks: true,
            include_events: true,
            include_routines: true,
        }
    }

    fn mysqldump_flags(&self) -> Vec<&'static str> {
        let mut flags = Vec::new();
        if self.drop_table_statements {
            flags.push("--add-drop-table");
        } else {
            flags.push("--skip-add-drop-table");
        }
        if self.hold_locks {
            flags.extend(["--add-locks", "--lock-tables"]);
        } else {
            flags.extend(["--skip-add-locks", "--skip-lock-tables"]);
        }
        if self.include_routines {
            flags.push("--routines");
        }
        if self.include_events {
            flags.push("--events");
        }
        flags
    }
}

/// Writes a dump of the database described by `connection` to `output`.
#[async_trait]
pub trait DumpProducer: Send + Sync {
    async fn produce(
        &self,
        connection: &ConnectionParams,
        output: &Path,
        options: &DumpOptions,
    ) -> Result<()>;
}

/// Runs the `mysqldump` client and streams its output through gzip.
#[derive(Debug)]
pub struct MysqldumpProducer {
    binary: PathBuf,
}

impl MysqldumpProducer {
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    pub fn locate(explicit: Option<&Path>) -> Result<Self> {
        let binary = find_mysqldump_executable(explicit)?;
        tracing::debug!("Using mysqldump at {}", binary.display());
        Ok(Self::new(binary))
    }
}

#[async_trait]
impl DumpProducer for MysqldumpProducer {
    async fn produce(
        &self,
        connection: &ConnectionParams,
        output: &Path,
        options: &DumpOptions,
    ) -> Result<()> {
        let binary = self.binary.clone();
        let connection = connection.clone();
        let output = output.to_path_buf();
        let options = *options;

        let bytes = tokio::task::spawn_blocking(move || run_mysqldump(&binary, &connection, &output, &options))
            .await
            .context("mysqldump task panicked")??;
        tracing::info!("Dump finished, {} bytes of SQL written", bytes);
        Ok(())
    }
}

fn run_mysqldump(
    binary: &Path,
    connection: &ConnectionParams,
    output: &Path,
    options: &DumpOptions,
) -> Result<u64> {
    let mut command = Command::new(binary);
    command
        .arg(format!("--host={}", connection.host))
        .arg(format!("--port={}", connection.port))
        .arg(format!("--user={}", connection.user))
        .args(options.mysqldump_flags())
        .arg(&connection.database)
        // Keeps the password out of the process list.
        .env("MYSQL_PWD", &connection.password)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command
        .spawn()
        .with_context(|| format!("Failed to execute {} for database {}", binary.display(), connection.database))?;

    let mut stderr = child.stderr.take().context("mysqldump stderr was not captured")?;
    let stderr_reader = std::thread::spawn(move || {
        let mut text = String::new();
        let _ = stderr.read_to_string(&mut text);
        text
    });

    let written = child
        .stdout
        .take()
        .context("mysqldump stdout was not captured")
        .and_then(|mut stdout| write_output(&mut stdout, output, options.compress));

    let written = match written {
        Ok(n) => n,
        Err(e) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(e);
        }
    };

    let status = child.wait().context("Failed to wait for mysqldump")?;
    let stderr_text = stderr_reader.join().unwrap_or_default();
    if !status.success() {
        anyhow::bail!(
            "mysqldump for database {} failed with status: {}\nStderr: {}",
            connection.database,
            status,
            stderr_text.trim()
        );
    }
    if !stderr_text.trim().is_empty() {
        tracing::warn!("mysqldump reported: {}", stderr_text.trim());
    }
    Ok(written)
}

fn write_output(source: &mut impl Read, output: &Path, compress: bool) -> Result<u64> {
    let file = File::create(output)
        .with_context(|| format!("Failed to create dump file: {}", output.display()))?;

    let (written, file) = if compress {
        let mut encoder = GzEncoder::new(file, Compression::default());
        let written = io::copy(source, &mut encoder)
            .with_context(|| format!("Failed to write dump to {}", output.display()))?;
        let file = encoder
            .finish()
            .with_context(|| format!("Failed to finish gzip stream for {}", output.display()))?;
        (written, file)
    } else {
        let mut file = file;
        let written = io::copy(source, &mut file)
            .with_context(|| format!("Failed to write dump to {}", output.display()))?;
        (written, file)
    };

    file.sync_all()
        .with_context(|| format!("Failed to flush dump file: {}", output.display()))?;
    Ok(written)
}
