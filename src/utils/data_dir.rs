//! Global data directory for the transfer log and file logs.
//!
//! Defaults to `~/.ghoststream/` but can be overridden via `--data-dir`.
//! Initialized once at startup via `init()`.

use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

static DATA_DIR: OnceLock<PathBuf> = OnceLock::new();

/// Resolve and store the global data directory, creating it if absent.
///
/// If `custom` is `Some`, uses that path. Otherwise falls back to `~/.ghoststream/`.
pub fn init(custom: Option<&Path>) -> Result<&'static Path> {
    let dir = match custom {
        Some(p) => p.to_path_buf(),
        None => dirs::home_dir()
            .context("no home directory found, pass --data-dir")?
            .join(".ghoststream"),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create data directory {}", dir.display()))?;
    DATA_DIR
        .set(dir)
        .map_err(|_| anyhow!("data directory initialized twice"))?;
    get()
}

/// Returns the global data directory path.
pub fn get() -> Result<&'static Path> {
    DATA_DIR
        .get()
        .map(PathBuf::as_path)
        .context("data directory not initialized")
}

/// Append-only transfer history, one JSON record per line.
pub fn transfer_log_path(base: &Path) -> PathBuf {
    base.join("transfers.jsonl")
}

pub fn log_file_path(base: &Path) -> PathBuf {
    base.join("logs").join("ghoststream.log")
}
