//! Session lifecycle: the idle timer and the post-completion destruct timer.
//!
//! Both are plain [`Countdown`] values; the session loop sleeps until
//! [`SessionLifecycle::next_deadline`] and then asks which one expired.

use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Countdown {
    Idle,
    Armed(Instant),
}

impl Countdown {
    pub fn deadline(self) -> Option<Instant> {
        match self {
            Countdown::Idle => None,
            Countdown::Armed(at) => Some(at),
        }
    }

    pub fn is_armed(self) -> bool {
        matches!(self, Countdown::Armed(_))
    }

    fn expired(self, now: Instant) -> bool {
        matches!(self, Countdown::Armed(at) if now >= at)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    Idle,
    Destruct,
}

#[derive(Debug)]
pub struct SessionLifecycle {
    idle_timeout: Duration,
    destruct_after: Duration,
    idle: Countdown,
    destruct: Countdown,
}

impl SessionLifecycle {
    /// Starts with the idle timer running from `now`.
    pub fn new(idle_timeout: Duration, destruct_after: Duration, now: Instant) -> Self {
        Self {
            idle_timeout,
            destruct_after,
            idle: Countdown::Armed(now + idle_timeout),
            destruct: Countdown::Idle,
        }
    }

    /// Any frame in or out.
    pub fn touch(&mut self, now: Instant) {
        if self.idle.is_armed() {
            self.idle = Countdown::Armed(now + self.idle_timeout);
        }
    }

    /// Arm the destruct timer. An already armed timer keeps its deadline;
    /// returns the new deadline only when this call armed it.
    pub fn arm_destruct(&mut self, now: Instant) -> Option<Instant> {
        if self.destruct.is_armed() {
            return None;
        }
        let at = now + self.destruct_after;
        self.destruct = Countdown::Armed(at);
        info!(
            event = "destruct_armed",
            secs = self.destruct_after.as_secs(),
            "Session will close unless cancelled"
        );
        Some(at)
    }

    /// Single cancel entry point for local and remote cancellation.
    /// Returns whether a timer was actually armed.
    pub fn cancel_destruct(&mut self) -> bool {
        let was_armed = self.destruct.is_armed();
        self.destruct = Countdown::Idle;
        if was_armed {
            info!(event = "destruct_cancelled", "Self-destruct cancelled");
        }
        was_armed
    }

    pub fn destruct(&self) -> Countdown {
        self.destruct
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.idle.deadline(), self.destruct.deadline()) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Which timer has run out at `now`, destruct first.
    pub fn poll_expired(&self, now: Instant) -> Option<Expiry> {
        if self.destruct.expired(now) {
            Some(Expiry::Destruct)
        } else if self.idle.expired(now) {
            Some(Expiry::Idle)
        } else {
            None
        }
    }

    /// Session teardown: stop both timers.
    pub fn clear(&mut self) {
        self.idle = Countdown::Idle;
        self.destruct = Countdown::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const IDLE: Duration = Duration::from_secs(600);
    const DESTRUCT: Duration = Duration::from_secs(30);

    #[tokio::test(start_paused = true)]
    async fn touch_pushes_idle_deadline() {
        let start = Instant::now();
        let mut lifecycle = SessionLifecycle::new(IDLE, DESTRUCT, start);
        assert_eq!(lifecycle.next_deadline(), Some(start + IDLE));

        tokio::time::advance(Duration::from_secs(300)).await;
        lifecycle.touch(Instant::now());
        assert_eq!(lifecycle.poll_expired(start + IDLE), None);
        assert_eq!(
            lifecycle.poll_expired(start + IDLE + Duration::from_secs(300)),
            Some(Expiry::Idle)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn destruct_cancel_then_rearm() {
        let start = Instant::now();
        let mut lifecycle = SessionLifecycle::new(IDLE, DESTRUCT, start);

        assert_eq!(lifecycle.arm_destruct(start), Some(start + DESTRUCT));
        assert_eq!(
            lifecycle.arm_destruct(start + Duration::from_secs(10)),
            None,
            "pending countdown is not re-armed"
        );
        assert_eq!(lifecycle.next_deadline(), Some(start + DESTRUCT));

        assert!(lifecycle.cancel_destruct());
        assert!(!lifecycle.cancel_destruct());
        assert_eq!(lifecycle.destruct(), Countdown::Idle);

        let later = start + Duration::from_secs(20);
        assert_eq!(lifecycle.arm_destruct(later), Some(later + DESTRUCT));
    }

    #[tokio::test(start_paused = true)]
    async fn destruct_wins_when_both_expire() {
        let start = Instant::now();
        let mut lifecycle = SessionLifecycle::new(Duration::from_secs(5), DESTRUCT, start);
        lifecycle.arm_destruct(start);
        assert_eq!(
            lifecycle.poll_expired(start + Duration::from_secs(60)),
            Some(Expiry::Destruct)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clear_stops_everything() {
        let start = Instant::now();
        let mut lifecycle = SessionLifecycle::new(IDLE, DESTRUCT, start);
        lifecycle.arm_destruct(start);
        lifecycle.clear();
        assert_eq!(lifecycle.next_deadline(), None);
        lifecycle.touch(start);
        assert_eq!(lifecycle.next_deadline(), None, "touch does not revive a cleared timer");
    }
}
