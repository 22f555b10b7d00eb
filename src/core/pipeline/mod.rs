//! Transfer pipeline: the per-file sender and receiver state machines.
//!
//! Both halves report progress the same way: a [`ProgressThrottle`] gates
//! updates to the active profile's UI cadence, and each update carries a
//! percentage plus a speed label.

pub mod hash;
pub mod receiver;
pub mod sender;

use std::time::Duration;
use tokio::time::Instant;

use crate::utils::formatters::{format_speed, speed_mib_per_sec};

/// One throttled progress report for the active transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub file_name: String,
    /// 0–100.
    pub percent: u8,
    pub speed_label: String,
}

/// Whole-percent completion; an empty file is complete by definition.
pub fn percent(done: u64, total: u64) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) as u128 * 100) / total as u128) as u8
}

/// Rate-limits progress reports to one per `interval`.
#[derive(Debug, Clone)]
pub struct ProgressThrottle {
    interval: Duration,
    last: Option<Instant>,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: None,
        }
    }

    /// `true` on the first call and then at most once per interval.
    pub fn ready(&mut self, now: Instant) -> bool {
        match self.last {
            Some(last) if now.duration_since(last) < self.interval => false,
            _ => {
                self.last = Some(now);
                true
            }
        }
    }
}

/// Speed label for `bytes` moved since `started`.
pub(crate) fn speed_label(bytes: u64, started: Instant) -> String {
    format_speed(speed_mib_per_sec(bytes, started.elapsed()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percent_is_clamped_and_handles_empty_files() {
        assert_eq!(percent(0, 0), 100);
        assert_eq!(percent(50, 200), 25);
        assert_eq!(percent(300, 200), 100);
        assert_eq!(percent(u64::MAX / 2, u64::MAX), 49);
    }

    #[tokio::test(start_paused = true)]
    async fn throttle_allows_one_update_per_interval() {
        let mut throttle = ProgressThrottle::new(Duration::from_millis(500));
        let start = Instant::now();
        assert!(throttle.ready(start));
        assert!(!throttle.ready(start + Duration::from_millis(100)));
        assert!(throttle.ready(start + Duration::from_millis(500)));
        assert!(!throttle.ready(start + Duration::from_millis(900)));
    }
}
