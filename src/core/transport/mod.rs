//! Transport: the reliable, ordered duplex channel a session runs over.
//!
//! Establishing the channel is someone else's job; the engine only needs:
//!
//! - `send(frame)`: control path, always queued.
//! - `write(frame) -> bool`: bulk path; `false` means the outbound buffer is
//!   above its high-water mark and the writer must wait for
//!   [`TransportEvent::Drain`] before writing again.
//! - An event stream: `Connect`, `Data`, `Drain`, `Close`, `Error`.
//!
//! Frames are delivered in send order, so chunk order needs no sequence
//! numbers.

pub mod tcp;

#[cfg(test)]
pub mod memory;

use bytes::Bytes;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::mpsc;

use crate::core::error::EngineResult;

pub use tcp::TcpTransport;

/// Events raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Channel is usable.
    Connect,
    /// One complete inbound frame.
    Data(Bytes),
    /// Outbound buffer fell back below the low-water mark after a `write`
    /// returned `false`. Raised once per pause.
    Drain,
    /// Channel is gone. Raised at most once.
    Close,
    Error(String),
}

/// Receiving half of a transport's event stream.
pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

pub trait Transport: Send {
    /// Queue a control frame. Never refused for buffer reasons.
    fn send(&mut self, frame: Bytes) -> EngineResult<()>;

    /// Queue a bulk frame. `Ok(false)` = buffer full, wait for `Drain`.
    fn write(&mut self, frame: Bytes) -> EngineResult<bool>;

    /// Stop sending and release the channel. Idempotent.
    fn close(&mut self);

    /// Human-readable remote end, for logs.
    fn peer_label(&self) -> String;
}

// ── Outbound accounting ───────────────────────────────────────────────────────

/// Byte accounting for an outbound frame queue, shared between the
/// transport handle and its writer task.
#[derive(Debug)]
pub(crate) struct Backlog {
    queued: AtomicUsize,
    paused: AtomicBool,
    high_water: usize,
    low_water: usize,
}

impl Backlog {
    pub(crate) fn new(high_water: usize, low_water: usize) -> Arc<Self> {
        Arc::new(Self {
            queued: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            high_water,
            low_water,
        })
    }

    /// Account for a frame entering the queue. Returns `false` when the
    /// queue is now above the high-water mark; the writer is then paused.
    pub(crate) fn push(&self, len: usize) -> bool {
        let total = self.queued.fetch_add(len, Ordering::AcqRel) + len;
        let below = total <= self.high_water;
        if !below {
            self.paused.store(true, Ordering::Release);
        }
        below
    }

    /// Account for a frame leaving the queue. Returns `true` exactly once
    /// per pause, when the queue reaches the low-water mark.
    pub(crate) fn pop(&self, len: usize) -> bool {
        let remaining = self.queued.fetch_sub(len, Ordering::AcqRel).saturating_sub(len);
        remaining <= self.low_water && self.paused.swap(false, Ordering::AcqRel)
    }

    /// Undo a `push` whose frame never made it into the queue.
    pub(crate) fn release(&self, len: usize) {
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| Some(q.saturating_sub(len)));
    }

    pub(crate) fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }
}

/// Ensures `Close` reaches the event stream once, whichever task notices first.
#[derive(Debug, Clone)]
pub(crate) struct EventSink {
    tx: mpsc::UnboundedSender<TransportEvent>,
    closed: Arc<AtomicBool>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<TransportEvent>) -> Self {
        Self {
            tx,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    pub(crate) fn emit(&self, event: TransportEvent) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        let _ = self.tx.send(event);
    }

    pub(crate) fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let _ = self.tx.send(TransportEvent::Close);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backlog_pauses_above_high_water() {
        let backlog = Backlog::new(100, 20);
        assert!(backlog.push(60));
        assert!(backlog.push(40));
        assert!(!backlog.push(1));
        assert_eq!(backlog.queued(), 101);
    }

    #[test]
    fn drain_fires_once_per_pause() {
        let backlog = Backlog::new(100, 20);
        backlog.push(80);
        assert!(!backlog.push(80));
        assert!(!backlog.pop(80), "still above low water");
        assert!(backlog.pop(70));
        assert!(!backlog.pop(10), "already drained");
    }

    #[test]
    fn release_undoes_a_push() {
        let backlog = Backlog::new(100, 20);
        backlog.push(30);
        backlog.push(50);
        backlog.release(50);
        assert_eq!(backlog.queued(), 30);
        backlog.release(500);
        assert_eq!(backlog.queued(), 0);
    }

    #[test]
    fn no_drain_without_pause() {
        let backlog = Backlog::new(100, 20);
        backlog.push(50);
        assert!(!backlog.pop(50));
    }

    #[tokio::test]
    async fn event_sink_reports_close_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        sink.emit(TransportEvent::Connect);
        sink.close();
        sink.close();
        sink.emit(TransportEvent::Drain);
        drop(sink);

        assert_eq!(rx.recv().await, Some(TransportEvent::Connect));
        assert_eq!(rx.recv().await, Some(TransportEvent::Close));
        assert_eq!(rx.recv().await, None);
    }
}
