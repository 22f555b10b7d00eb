//! Latency probing and latency-driven profile selection.
//!
//! `Ping{time}` carries the sender's wall clock in milliseconds; the peer
//! echoes it verbatim in `Pong{time}`, so only the prober's own clock is
//! involved in the round-trip figure.

use std::time::Duration;
use tracing::{debug, info};

use crate::core::config::{BALANCED_MAX_LATENCY, SPEED_MAX_LATENCY, TransferMode, TransferProfile};
use crate::core::protocol::ControlMessage;

/// Wall clock in milliseconds, as carried by ping/pong.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Debug, Default)]
pub struct LatencyProbe {
    last: Option<Duration>,
    outstanding: u32,
}

impl LatencyProbe {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a ping stamped `now_ms`.
    pub fn ping(&mut self, now_ms: i64) -> ControlMessage {
        self.outstanding += 1;
        ControlMessage::Ping { time: now_ms }
    }

    /// Round trip for an echoed `time`. A timestamp from the future (clock
    /// step between ping and pong) reads as zero.
    pub fn on_pong(&mut self, time: i64, now_ms: i64) -> Duration {
        self.outstanding = self.outstanding.saturating_sub(1);
        let rtt = Duration::from_millis(now_ms.saturating_sub(time).max(0) as u64);
        self.last = Some(rtt);
        debug!(event = "latency_sample", rtt_ms = rtt.as_millis() as u64, "Pong received");
        rtt
    }

    pub fn last(&self) -> Option<Duration> {
        self.last
    }

    /// Pings sent without a pong yet.
    pub fn outstanding(&self) -> u32 {
        self.outstanding
    }
}

/// Reply to a peer's ping.
pub fn pong_for(time: i64) -> ControlMessage {
    ControlMessage::Pong { time }
}

/// Fixed threshold table: fast links get the largest chunks.
pub fn mode_for_latency(rtt: Duration) -> TransferMode {
    if rtt <= SPEED_MAX_LATENCY {
        TransferMode::Speed
    } else if rtt <= BALANCED_MAX_LATENCY {
        TransferMode::Balanced
    } else {
        TransferMode::Stable
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModePolicy {
    /// Follow latency samples, starting from Balanced.
    Auto,
    /// Pinned by the user; samples are ignored.
    Fixed(TransferMode),
}

/// Owns the current profile. Only this type changes it.
#[derive(Debug)]
pub struct ModeSelector {
    policy: ModePolicy,
    current: TransferMode,
}

impl ModeSelector {
    pub fn new(policy: ModePolicy) -> Self {
        let current = match policy {
            ModePolicy::Auto => TransferMode::Balanced,
            ModePolicy::Fixed(mode) => mode,
        };
        Self { policy, current }
    }

    pub fn current(&self) -> TransferMode {
        self.current
    }

    pub fn profile(&self) -> TransferProfile {
        self.current.profile()
    }

    /// Feed a latency sample. Returns the new mode when it changed.
    pub fn observe(&mut self, rtt: Duration) -> Option<TransferMode> {
        if self.policy != ModePolicy::Auto {
            return None;
        }
        let next = mode_for_latency(rtt);
        if next == self.current {
            return None;
        }
        info!(
            event = "mode_changed",
            from = %self.current,
            to = %next,
            rtt_ms = rtt.as_millis() as u64,
            "Transfer profile switched"
        );
        self.current = next;
        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_uses_echoed_time() {
        let mut probe = LatencyProbe::new();
        let ping = probe.ping(1_000);
        assert_eq!(ping, ControlMessage::Ping { time: 1_000 });
        assert_eq!(probe.outstanding(), 1);

        assert_eq!(probe.on_pong(1_000, 1_042), Duration::from_millis(42));
        assert_eq!(probe.last(), Some(Duration::from_millis(42)));
        assert_eq!(probe.outstanding(), 0);
    }

    #[test]
    fn clock_step_backwards_reads_as_zero() {
        let mut probe = LatencyProbe::new();
        assert_eq!(probe.on_pong(5_000, 4_000), Duration::ZERO);
    }

    #[test]
    fn thresholds_are_inclusive() {
        assert_eq!(mode_for_latency(Duration::from_millis(50)), TransferMode::Speed);
        assert_eq!(mode_for_latency(Duration::from_millis(51)), TransferMode::Balanced);
        assert_eq!(mode_for_latency(Duration::from_millis(200)), TransferMode::Balanced);
        assert_eq!(mode_for_latency(Duration::from_millis(201)), TransferMode::Stable);
    }

    #[test]
    fn auto_selector_reports_only_changes() {
        let mut selector = ModeSelector::new(ModePolicy::Auto);
        assert_eq!(selector.current(), TransferMode::Balanced);
        assert_eq!(selector.observe(Duration::from_millis(120)), None);
        assert_eq!(
            selector.observe(Duration::from_millis(10)),
            Some(TransferMode::Speed)
        );
        assert_eq!(selector.profile().chunk_size, 256 * 1024);
        assert_eq!(
            selector.observe(Duration::from_millis(900)),
            Some(TransferMode::Stable)
        );
    }

    #[test]
    fn fixed_selector_ignores_samples() {
        let mut selector = ModeSelector::new(ModePolicy::Fixed(TransferMode::Stable));
        assert_eq!(selector.observe(Duration::from_millis(1)), None);
        assert_eq!(selector.current(), TransferMode::Stable);
    }
}
