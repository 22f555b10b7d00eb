//! In-process transport pair for driving two sessions against each other.
//!
//! Each direction has a pump task that moves one frame per scheduler turn
//! from the writer's queue to the reader's event stream, so a fast writer
//! really does run into the high-water mark. Cancelling the returned
//! [`SignalOfStop`] cuts the link as a network drop would.

use bytes::Bytes;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::{Backlog, EventSink, Transport, TransportEvent, TransportEvents};
use crate::core::error::{EngineError, EngineResult};
use crate::utils::sos::SignalOfStop;

pub struct MemoryTransport {
    out_tx: Option<mpsc::UnboundedSender<Bytes>>,
    backlog: Arc<Backlog>,
    label: &'static str,
}

pub type MemoryEnd = (MemoryTransport, TransportEvents);

/// Build a connected pair. Both ends see `Connect` immediately.
pub fn pair(high_water: usize, low_water: usize) -> (MemoryEnd, MemoryEnd, SignalOfStop) {
    let cut = SignalOfStop::new();

    let (a_event_tx, a_events) = mpsc::unbounded_channel();
    let (b_event_tx, b_events) = mpsc::unbounded_channel();
    let a_sink = EventSink::new(a_event_tx);
    let b_sink = EventSink::new(b_event_tx);

    let (a_out_tx, a_out_rx) = mpsc::unbounded_channel();
    let (b_out_tx, b_out_rx) = mpsc::unbounded_channel();
    let a_backlog = Backlog::new(high_water, low_water);
    let b_backlog = Backlog::new(high_water, low_water);

    tokio::spawn(pump(a_out_rx, a_backlog.clone(), a_sink.clone(), b_sink.clone(), cut.clone()));
    tokio::spawn(pump(b_out_rx, b_backlog.clone(), b_sink.clone(), a_sink.clone(), cut.clone()));

    a_sink.emit(TransportEvent::Connect);
    b_sink.emit(TransportEvent::Connect);

    let a = MemoryTransport {
        out_tx: Some(a_out_tx),
        backlog: a_backlog,
        label: "memory-a",
    };
    let b = MemoryTransport {
        out_tx: Some(b_out_tx),
        backlog: b_backlog,
        label: "memory-b",
    };
    ((a, a_events), (b, b_events), cut)
}

async fn pump(
    mut from_rx: mpsc::UnboundedReceiver<Bytes>,
    backlog: Arc<Backlog>,
    from: EventSink,
    to: EventSink,
    cut: SignalOfStop,
) {
    loop {
        tokio::select! {
            biased;
            _ = cut.wait() => break,
            frame = from_rx.recv() => match frame {
                Some(frame) => {
                    let len = frame.len();
                    to.emit(TransportEvent::Data(frame));
                    if backlog.pop(len) {
                        from.emit(TransportEvent::Drain);
                    }
                    tokio::task::yield_now().await;
                }
                None => break,
            },
        }
    }
    to.close();
    from.close();
}

impl MemoryTransport {
    fn enqueue(&self, frame: Bytes) -> EngineResult<()> {
        self.out_tx
            .as_ref()
            .ok_or(EngineError::TransportClosed)?
            .send(frame)
            .map_err(|_| EngineError::TransportClosed)
    }
}

impl Transport for MemoryTransport {
    fn send(&mut self, frame: Bytes) -> EngineResult<()> {
        self.write(frame).map(|_| ())
    }

    fn write(&mut self, frame: Bytes) -> EngineResult<bool> {
        // Counted before the writer task can see the frame and pop it.
        let len = frame.len();
        let below = self.backlog.push(len);
        if let Err(e) = self.enqueue(frame) {
            self.backlog.release(len);
            return Err(e);
        }
        Ok(below)
    }

    fn close(&mut self) {
        self.out_tx = None;
    }

    fn peer_label(&self) -> String {
        self.label.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_cross_the_link() {
        let ((mut a, mut a_events), (_b, mut b_events), _cut) = pair(1024, 256);
        assert_eq!(a_events.recv().await, Some(TransportEvent::Connect));
        assert_eq!(b_events.recv().await, Some(TransportEvent::Connect));

        a.send(Bytes::from_static(b"one")).unwrap();
        a.write(Bytes::from_static(b"two")).unwrap();
        assert_eq!(b_events.recv().await, Some(TransportEvent::Data(Bytes::from_static(b"one"))));
        assert_eq!(b_events.recv().await, Some(TransportEvent::Data(Bytes::from_static(b"two"))));
    }

    #[tokio::test]
    async fn full_buffer_drains_once() {
        let ((mut a, mut a_events), (_b, _b_events), _cut) = pair(10, 0);
        a_events.recv().await;

        assert!(a.write(Bytes::from(vec![0u8; 8])).unwrap());
        assert!(!a.write(Bytes::from(vec![0u8; 8])).unwrap());
        assert_eq!(a_events.recv().await, Some(TransportEvent::Drain));
    }

    #[tokio::test]
    async fn refused_frames_are_not_counted() {
        let ((mut a, _a_events), (_b, _b_events), _cut) = pair(1024, 256);
        a.close();
        assert!(a.send(Bytes::from_static(b"late")).is_err());
        assert!(a.write(Bytes::from(vec![0u8; 64])).is_err());
        assert_eq!(a.backlog.queued(), 0);
    }

    #[tokio::test]
    async fn backlog_settles_at_zero_once_delivered() {
        let ((mut a, _a_events), (_b, mut b_events), _cut) = pair(1 << 20, 1 << 10);
        b_events.recv().await;
        for _ in 0..50 {
            a.write(Bytes::from(vec![1u8; 100])).unwrap();
        }
        for _ in 0..50 {
            assert!(matches!(b_events.recv().await, Some(TransportEvent::Data(_))));
        }
        tokio::task::yield_now().await;
        assert_eq!(a.backlog.queued(), 0);
    }

    #[tokio::test]
    async fn cutting_the_link_closes_both_ends() {
        let ((_a, mut a_events), (_b, mut b_events), cut) = pair(1024, 256);
        a_events.recv().await;
        b_events.recv().await;

        cut.cancel();
        assert_eq!(a_events.recv().await, Some(TransportEvent::Close));
        assert_eq!(b_events.recv().await, Some(TransportEvent::Close));
    }
}
