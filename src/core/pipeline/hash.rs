//! SHA3-256 content hashing, hex-encoded for the `hash` header field.

use anyhow::{Context, Result};
use sha3::{Digest, Sha3_256};
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::core::config::HASH_READ_BUFFER;

/// Hash a file on disk without loading it whole.
pub async fn hash_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path)
        .await
        .with_context(|| format!("failed to open {} for hashing", path.display()))?;
    let mut hasher = Sha3_256::new();
    let mut buf = vec![0u8; HASH_READ_BUFFER];
    loop {
        let n = file.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Hash an assembled payload. CPU-bound; callers on the session task run
/// it through `spawn_blocking`.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha3_256::digest(data))
}
