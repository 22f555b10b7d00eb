//! Where finished transfers go: verified payloads to a [`DeliverySink`],
//! one [`TransferRecord`] per finished file to a [`TransferLog`].

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use crate::utils::atomic_write::atomic_write;

/// Final status of one file, as written to the transfer log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Sent,
    Received,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub file_name: String,
    pub file_size: u64,
    /// MiB per second over the whole transfer.
    pub speed: f64,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub status: TransferStatus,
}

impl TransferRecord {
    pub fn new(file_name: &str, file_size: u64, speed: f64, status: TransferStatus) -> Self {
        Self {
            file_name: file_name.to_string(),
            file_size,
            speed,
            timestamp: chrono::Utc::now().timestamp_millis(),
            status,
        }
    }
}

/// Receives verified payloads. Called on the blocking pool, see [`deliver`].
pub trait DeliverySink: Send + Sync {
    /// Store `data` under (a sanitized form of) `name`; returns where it went.
    fn deliver(&self, name: &str, data: &[u8]) -> Result<PathBuf>;
}

/// Hand `data` to `sink` without blocking the calling task.
pub async fn deliver(sink: &Arc<dyn DeliverySink>, name: &str, data: Vec<u8>) -> Result<PathBuf> {
    let sink = Arc::clone(sink);
    let name = name.to_string();
    tokio::task::spawn_blocking(move || sink.deliver(&name, &data))
        .await
        .map_err(|e| anyhow!("delivery task failed: {e}"))?
}

/// External logger for finished transfers. Write-only.
pub trait TransferLog: Send {
    fn record(&mut self, record: &TransferRecord);
}

// ── Directory sink ───────────────────────────────────────────────────────────

/// Saves payloads into a download directory, never overwriting.
pub struct DirectorySink {
    dir: PathBuf,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

impl DeliverySink for DirectorySink {
    fn deliver(&self, name: &str, data: &[u8]) -> Result<PathBuf> {
        let path = unique_path(&self.dir, &sanitize_file_name(name));
        atomic_write(&path, data)
            .with_context(|| format!("failed to save {}", path.display()))?;
        info!(event = "file_saved", path = %path.display(), bytes = data.len(), "File saved");
        Ok(path)
    }
}

/// Reduce a peer-supplied name to one safe path component.
///
/// Separators and traversal segments are dropped; only the final component
/// survives, filtered to a conservative character set.
pub fn sanitize_file_name(name: &str) -> String {
    let normalized = name.replace('\\', "/");
    let last = normalized
        .split('/')
        .filter(|part| !part.is_empty() && !matches!(*part, "." | ".."))
        .next_back()
        .unwrap_or_default();
    let safe: String = last
        .chars()
        .filter(|c| c.is_alphanumeric() || matches!(c, '.' | '-' | '_' | ' ' | '(' | ')'))
        .collect();
    let safe = safe.trim_matches(|c| c == '.' || c == ' ');
    if safe.is_empty() {
        "file".to_string()
    } else {
        safe.to_string()
    }
}

/// `dir/name`, or `dir/stem (n).ext` for the first free `n`.
fn unique_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    let path = Path::new(name);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());
    (1u32..)
        .map(|n| match &ext {
            Some(ext) => dir.join(format!("{stem} ({n}).{ext}")),
            None => dir.join(format!("{stem} ({n})")),
        })
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

// ── JSON-lines transfer log ──────────────────────────────────────────────────

/// Appends one JSON object per line. Failures are logged, never raised:
/// losing a history line must not affect the transfer itself.
pub struct JsonlTransferLog {
    path: PathBuf,
}

impl JsonlTransferLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn append(&self, record: &TransferRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        Ok(())
    }
}

impl TransferLog for JsonlTransferLog {
    fn record(&mut self, record: &TransferRecord) {
        if let Err(e) = self.append(record) {
            warn!(event = "transfer_log_failure", path = %self.path.display(), error = %e, "Could not record transfer");
        }
    }
}

// ── In-memory sinks (tests) ──────────────────────────────────────────────────


#[cfg(test)]
mod tests {
    use super::*;

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("ghoststream_test").join("sink").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        let _ = std::fs::create_dir_all(&dir);
        dir
    }

    #[test]
    fn sanitize_strips_traversal_and_separators() {
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name("C:\\Users\\me\\report.pdf"), "report.pdf");
        assert_eq!(sanitize_file_name("a<b>c.txt"), "abc.txt");
        assert_eq!(sanitize_file_name(".."), "file");
        assert_eq!(sanitize_file_name(""), "file");
    }

    #[test]
    fn directory_sink_never_overwrites() {
        let dir = test_dir("no_overwrite");
        let sink = DirectorySink::new(&dir);

        let first = sink.deliver("photo.jpg", b"one").unwrap();
        let second = sink.deliver("photo.jpg", b"two").unwrap();
        let third = sink.deliver("photo.jpg", b"three").unwrap();

        assert_eq!(first, dir.join("photo.jpg"));
        assert_eq!(second, dir.join("photo (1).jpg"));
        assert_eq!(third, dir.join("photo (2).jpg"));
        assert_eq!(std::fs::read(&first).unwrap(), b"one");
        assert_eq!(std::fs::read(&third).unwrap(), b"three");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn delivery_runs_off_the_session_task() {
        let dir = test_dir("blocking_pool");
        let sink: Arc<dyn DeliverySink> = Arc::new(DirectorySink::new(&dir));

        let data = vec![0xabu8; 3 * 1024 * 1024];
        let path = deliver(&sink, "../big.bin", data.clone()).await.unwrap();
        assert_eq!(path, dir.join("big.bin"));
        assert_eq!(std::fs::read(&path).unwrap(), data);

        std::fs::write(dir.join("blocker"), b"file in the way").unwrap();
        let blocked: Arc<dyn DeliverySink> = Arc::new(DirectorySink::new(dir.join("blocker")));
        assert!(deliver(&blocked, "x.txt", b"x".to_vec()).await.is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn jsonl_log_appends_camel_case_lines() {
        let dir = test_dir("jsonl");
        let path = dir.join("transfers.jsonl");
        let mut log = JsonlTransferLog::new(&path);

        log.record(&TransferRecord::new("a.txt", 10, 1.5, TransferStatus::Sent));
        log.record(&TransferRecord::new("b.txt", 20, 0.5, TransferStatus::Failed));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: serde_json::Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["fileName"], "a.txt");
        assert_eq!(first["fileSize"], 10);
        assert_eq!(first["status"], "sent");
        let second: TransferRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(second.status, TransferStatus::Failed);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
