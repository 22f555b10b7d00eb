//! Centralized configuration constants for GhostStream.
//!
//! All tunable parameters live here so they can be reviewed and adjusted
//! in a single place. Wire-format constants (frame tag bytes) stay in
//! the codec module.

use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use std::time::Duration;

// ── Transfer profiles ────────────────────────────────────────────────────────

/// Named transfer profile. Selected manually or from measured latency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Max throughput. Best for LAN / fiber.
    Speed,
    /// Standard reliability.
    Balanced,
    /// High reliability. Best for mobile / bad Wi-Fi.
    Stable,
}

/// Chunk size and UI cadence bound to a [`TransferMode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProfile {
    pub mode: TransferMode,
    /// Bytes read from the source file per binary frame.
    pub chunk_size: usize,
    /// Minimum spacing between two progress updates.
    pub ui_update_interval: Duration,
    pub label: &'static str,
}

pub const SPEED_PROFILE: TransferProfile = TransferProfile {
    mode: TransferMode::Speed,
    chunk_size: 256 * 1024,
    ui_update_interval: Duration::from_millis(200),
    label: "Speed",
};

pub const BALANCED_PROFILE: TransferProfile = TransferProfile {
    mode: TransferMode::Balanced,
    chunk_size: 64 * 1024,
    ui_update_interval: Duration::from_millis(500),
    label: "Balanced",
};

pub const STABLE_PROFILE: TransferProfile = TransferProfile {
    mode: TransferMode::Stable,
    chunk_size: 16 * 1024,
    ui_update_interval: Duration::from_millis(1000),
    label: "Stable",
};

impl TransferMode {
    pub const fn profile(self) -> TransferProfile {
        match self {
            TransferMode::Speed => SPEED_PROFILE,
            TransferMode::Balanced => BALANCED_PROFILE,
            TransferMode::Stable => STABLE_PROFILE,
        }
    }
}

impl Display for TransferMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.profile().label)
    }
}

// ── Latency → profile thresholds ─────────────────────────────────────────────

/// Round trips at or below this select [`SPEED_PROFILE`].
pub const SPEED_MAX_LATENCY: Duration = Duration::from_millis(50);

/// Round trips at or below this (and above [`SPEED_MAX_LATENCY`]) select
/// [`BALANCED_PROFILE`]. Anything slower selects [`STABLE_PROFILE`].
pub const BALANCED_MAX_LATENCY: Duration = Duration::from_millis(200);

// ── Session lifecycle ────────────────────────────────────────────────────────

/// Session is torn down after this long without any frame in either direction.
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Countdown armed once a transfer queue fully completes.
pub const DESTRUCT_COUNTDOWN: Duration = Duration::from_secs(30);

// ── Transport ────────────────────────────────────────────────────────────────

/// Outbound bytes queued on a transport above which `write` reports "full".
/// Sized to hold a handful of the largest chunks.
pub const TRANSPORT_HIGH_WATER: usize = 1024 * 1024;

/// Queued bytes at or below which a paused writer is told to resume (`drain`).
pub const TRANSPORT_LOW_WATER: usize = 256 * 1024;

/// Largest frame accepted from the wire (largest chunk plus envelope, with headroom).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Timeout for establishing an outbound TCP transport.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default TCP address the responder listens on.
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:7878";

/// Pause between redial attempts after a dropped connection.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);

/// Redial attempts before giving up on a lost peer.
pub const MAX_RECONNECT_ATTEMPTS: u32 = 10;

// ── Integrity ────────────────────────────────────────────────────────────────

/// Read buffer used when hashing a source file before its header is sent.
pub const HASH_READ_BUFFER: usize = 8 * 1024 * 1024;

// ── Chat ─────────────────────────────────────────────────────────────────────

/// Longest chat message accepted for sending, in bytes.
pub const MAX_CHAT_MESSAGE_BYTES: usize = 16 * 1024;

/// Chat entries kept in session history.
pub const MAX_CHAT_HISTORY: usize = 200;

// ── UI / Misc ────────────────────────────────────────────────────────────────

/// Maximum log entries kept in the in-memory ring buffer.
pub const MAX_LOG_ENTRIES: usize = 500;

/// Activity log entries shown by the console `/log` command.
pub const ACTIVITY_LOG_VISIBLE: usize = 10;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn profiles_shrink_chunks_as_stability_grows() {
        assert!(SPEED_PROFILE.chunk_size > BALANCED_PROFILE.chunk_size);
        assert!(BALANCED_PROFILE.chunk_size > STABLE_PROFILE.chunk_size);
        assert!(SPEED_PROFILE.ui_update_interval < STABLE_PROFILE.ui_update_interval);
    }

    #[test]
    fn largest_chunk_fits_in_a_frame() {
        assert!(SPEED_PROFILE.chunk_size + 1 <= MAX_FRAME_SIZE);
        assert!(TRANSPORT_LOW_WATER < TRANSPORT_HIGH_WATER);
    }
}
