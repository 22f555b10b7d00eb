//! TCP transport: length-prefixed frames over one `TcpStream`.
//!
//! Wire format per frame: `[4 bytes: len BE][len bytes: frame]`.
//!
//! ```text
//! Session ──send/write──► out queue ──► writer task ──► socket
//! Session ◄──events────── reader task ◄──────────────── socket
//! ```
//!
//! The out queue is unbounded; the [`Backlog`] byte counter is what makes
//! `write` report "full" and later raise `Drain`.

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::{Backlog, EventSink, Transport, TransportEvent, TransportEvents};
use crate::core::config::{
    CONNECT_TIMEOUT, MAX_FRAME_SIZE, TRANSPORT_HIGH_WATER, TRANSPORT_LOW_WATER,
};
use crate::core::error::{EngineError, EngineResult};

pub struct TcpTransport {
    out_tx: Option<mpsc::UnboundedSender<Bytes>>,
    backlog: Arc<Backlog>,
    peer: SocketAddr,
}

impl TcpTransport {
    /// Dial `addr`. Any failure is a [`EngineError::TransportSetup`].
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> EngineResult<(Self, TransportEvents)> {
        let stream = tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| EngineError::TransportSetup("connection timed out".into()))?
            .map_err(|e| EngineError::TransportSetup(e.to_string()))?;
        Self::from_stream(stream)
    }

    /// Wrap an established stream and spawn its reader/writer tasks.
    pub fn from_stream(stream: TcpStream) -> EngineResult<(Self, TransportEvents)> {
        let peer = stream
            .peer_addr()
            .map_err(|e| EngineError::TransportSetup(e.to_string()))?;
        stream
            .set_nodelay(true)
            .map_err(|e| EngineError::TransportSetup(e.to_string()))?;

        let (read_half, write_half) = stream.into_split();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let events = EventSink::new(event_tx);
        let backlog = Backlog::new(TRANSPORT_HIGH_WATER, TRANSPORT_LOW_WATER);

        tokio::spawn(read_loop(read_half, events.clone(), peer));
        tokio::spawn(write_loop(write_half, out_rx, backlog.clone(), events.clone(), peer));

        info!(event = "transport_open", %peer, "TCP transport established");
        events.emit(TransportEvent::Connect);

        Ok((
            Self {
                out_tx: Some(out_tx),
                backlog,
                peer,
            },
            event_rx,
        ))
    }

    fn enqueue(&self, frame: Bytes) -> EngineResult<()> {
        self.out_tx
            .as_ref()
            .ok_or(EngineError::TransportClosed)?
            .send(frame)
            .map_err(|_| EngineError::TransportClosed)
    }
}

impl Transport for TcpTransport {
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
        if self.out_tx.take().is_some() {
            debug!(event = "transport_close", peer = %self.peer, "Closing TCP transport");
        }
    }

    fn peer_label(&self) -> String {
        self.peer.to_string()
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

// ── Tasks ─────────────────────────────────────────────────────────────────────

async fn read_loop(mut reader: OwnedReadHalf, events: EventSink, peer: SocketAddr) {
    loop {
        let len = match reader.read_u32().await {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                info!(event = "transport_eof", %peer, "Peer closed the connection");
                break;
            }
            Err(e) => {
                error!(event = "transport_read_error", %peer, %e, "Read failed");
                events.emit(TransportEvent::Error(e.to_string()));
                break;
            }
        };

        if len > MAX_FRAME_SIZE {
            warn!(event = "frame_too_large", %peer, len, max = MAX_FRAME_SIZE, "Dropping connection");
            events.emit(TransportEvent::Error(format!("frame of {len} bytes exceeds limit")));
            break;
        }

        let mut buf = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut buf).await {
            error!(event = "transport_read_error", %peer, %e, "Truncated frame");
            events.emit(TransportEvent::Error(e.to_string()));
            break;
        }
        events.emit(TransportEvent::Data(Bytes::from(buf)));
    }
    events.close();
}

async fn write_loop(
    writer: OwnedWriteHalf,
    mut out_rx: mpsc::UnboundedReceiver<Bytes>,
    backlog: Arc<Backlog>,
    events: EventSink,
    peer: SocketAddr,
) {
    let mut writer = BufWriter::new(writer);
    while let Some(frame) = out_rx.recv().await {
        let len = frame.len();
        let result = async {
            writer.write_u32(len as u32).await?;
            writer.write_all(&frame).await?;
            // Coalesce whatever else is already queued into one flush.
            if out_rx.is_empty() {
                writer.flush().await?;
            }
            Ok::<_, std::io::Error>(())
        }
        .await;

        if let Err(e) = result {
            error!(event = "transport_write_error", %peer, %e, "Write failed");
            events.emit(TransportEvent::Error(e.to_string()));
            events.close();
            return;
        }
        if backlog.pop(len) {
            events.emit(TransportEvent::Drain);
        }
    }

    // Handle closed locally: flush and half-close so the peer sees EOF.
    let _ = writer.flush().await;
    let _ = writer.shutdown().await;
    events.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::protocol::{ControlMessage, encode_control_frame};
    use tokio::net::TcpListener;

    async fn connected_pair() -> ((TcpTransport, TransportEvents), (TcpTransport, TransportEvents)) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (client, accepted) = tokio::join!(TcpTransport::connect(addr), listener.accept());
        let server = TcpTransport::from_stream(accepted.unwrap().0).unwrap();
        (client.unwrap(), server)
    }

    #[tokio::test]
    async fn frames_arrive_in_order() {
        let ((mut a, mut a_events), (_b, mut b_events)) = connected_pair().await;
        assert_eq!(a_events.recv().await, Some(TransportEvent::Connect));
        assert_eq!(b_events.recv().await, Some(TransportEvent::Connect));

        let ping = encode_control_frame(&ControlMessage::Ping { time: 1 }).unwrap();
        a.send(ping.clone()).unwrap();
        assert!(a.write(Bytes::from_static(b"\x02chunk")).unwrap());

        assert_eq!(b_events.recv().await, Some(TransportEvent::Data(ping)));
        assert_eq!(
            b_events.recv().await,
            Some(TransportEvent::Data(Bytes::from_static(b"\x02chunk")))
        );
    }

    #[tokio::test]
    async fn close_is_seen_by_both_sides() {
        let ((mut a, mut a_events), (_b, mut b_events)) = connected_pair().await;
        a_events.recv().await;
        b_events.recv().await;

        a.close();
        assert_eq!(b_events.recv().await, Some(TransportEvent::Close));
        assert!(matches!(a.send(Bytes::from_static(b"x")), Err(EngineError::TransportClosed)));
    }

    #[tokio::test]
    async fn connect_failure_is_transport_setup() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        match TcpTransport::connect(addr).await {
            Err(err) => assert!(err.is_fatal()),
            Ok(_) => panic!("connect to a closed port should fail"),
        }
    }
}
