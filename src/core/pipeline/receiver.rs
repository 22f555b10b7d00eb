//! Receiver: drives one inbound file through
//! `AwaitingHeader → Pending → Receiving → Verifying → Complete | Failed`.
//!
//! A header first becomes a pending [`IncomingRequest`]; nothing is
//! acknowledged until the user (or auto-accept) decides. On accept the
//! receiver answers `ResumeAck{offset}`, resuming a [`SuspendedTransfer`]
//! when the header's id (`name-size`) matches the snapshot.
//!
//! Chunks are buffered in memory in arrival order; the transport preserves
//! send order, so no sequence numbers are needed. `received` never exceeds
//! the declared size: overflow bytes are dropped with a warning.

use bytes::Bytes;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::hash::hash_bytes;
use super::{Progress, ProgressThrottle, percent, speed_label};
use crate::core::config::{BALANCED_PROFILE, TransferProfile};
use crate::core::protocol::ControlMessage;
use crate::utils::formatters::speed_mib_per_sec;

/// Descriptor of an announced file, shown to the user before accepting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingRequest {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
    pub hash: String,
    pub sender_label: String,
    pub is_last: bool,
    /// Bytes already held from an earlier, interrupted attempt.
    pub resumable_from: Option<u64>,
}

impl IncomingRequest {
    /// Build from a `Header` control message; `None` for any other message.
    pub fn from_header(msg: &ControlMessage) -> Option<Self> {
        match msg {
            ControlMessage::Header {
                name,
                size,
                mime_type,
                hash,
                sender_label,
                is_last,
            } => Some(Self {
                name: name.clone(),
                size: *size,
                mime_type: mime_type.clone(),
                hash: hash.clone(),
                sender_label: sender_label.clone(),
                is_last: *is_last,
                resumable_from: None,
            }),
            _ => None,
        }
    }

    pub fn id(&self) -> String {
        transfer_id(&self.name, self.size)
    }
}

/// Resumption key. A best-effort match, not an identity proof.
pub fn transfer_id(name: &str, size: u64) -> String {
    format!("{name}-{size}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundTransfer {
    pub id: String,
    pub name: String,
    pub size: u64,
    pub received: u64,
    pub chunks: Vec<Bytes>,
    pub expected_hash: String,
    pub is_last: bool,
}

impl InboundTransfer {
    fn fresh(request: &IncomingRequest) -> Self {
        Self {
            id: request.id(),
            name: request.name.clone(),
            size: request.size,
            received: 0,
            chunks: Vec::new(),
            expected_hash: request.hash.clone(),
            is_last: request.is_last,
        }
    }

    fn assemble(self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.received as usize);
        for chunk in &self.chunks {
            payload.extend_from_slice(chunk);
        }
        payload
    }
}

/// Partial receive kept across a transport loss. Consumed at most once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendedTransfer(InboundTransfer);

impl SuspendedTransfer {
    pub fn id(&self) -> &str {
        &self.0.id
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn received(&self) -> u64 {
        self.0.received
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    /// Transport not yet connected.
    Idle,
    AwaitingHeader,
    /// Header received, waiting for accept/reject.
    Pending,
    Receiving,
    Verifying,
    Complete,
    Failed,
}

/// What [`Receiver::accept`] decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub ack: ControlMessage,
    pub offset: u64,
    /// Nothing left to receive (empty file, or a fully held snapshot).
    pub verify_now: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkOutcome {
    /// Not receiving; the chunk was dropped.
    Ignored,
    Stored(Option<Progress>),
    /// Declared size reached; call [`Receiver::finalize`].
    ReadyToVerify,
}

/// Result of verification.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Delivered {
        file_name: String,
        data: Vec<u8>,
        is_last: bool,
        /// MiB/s over the bytes received in this session.
        speed: f64,
    },
    IntegrityFailed {
        file_name: String,
        size: u64,
        is_last: bool,
    },
}

pub struct Receiver {
    state: ReceiverState,
    verify: bool,
    pending: Option<IncomingRequest>,
    active: Option<InboundTransfer>,
    suspended: Option<SuspendedTransfer>,
    throttle: ProgressThrottle,
    started: Instant,
    resumed_from: u64,
}

impl Receiver {
    pub fn new(verify: bool, suspended: Option<SuspendedTransfer>) -> Self {
        Self {
            state: ReceiverState::Idle,
            verify,
            pending: None,
            active: None,
            suspended,
            throttle: ProgressThrottle::new(BALANCED_PROFILE.ui_update_interval),
            started: Instant::now(),
            resumed_from: 0,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    pub fn on_connect(&mut self) {
        if self.state == ReceiverState::Idle {
            self.state = ReceiverState::AwaitingHeader;
        }
    }

    pub fn is_receiving(&self) -> bool {
        self.state == ReceiverState::Receiving
    }

    /// An offer is waiting, or a file is arriving or being verified.
    pub fn is_busy(&self) -> bool {
        matches!(
            self.state,
            ReceiverState::Pending | ReceiverState::Receiving | ReceiverState::Verifying
        )
    }

    pub fn pending(&self) -> Option<&IncomingRequest> {
        self.pending.as_ref()
    }

    pub fn active(&self) -> Option<&InboundTransfer> {
        self.active.as_ref()
    }

    pub fn suspended(&self) -> Option<&SuspendedTransfer> {
        self.suspended.as_ref()
    }

    pub fn percent(&self) -> u8 {
        self.active
            .as_ref()
            .map(|a| percent(a.received, a.size))
            .unwrap_or(0)
    }

    /// Register an announced file. Returns the descriptor to show the user.
    pub fn on_header(&mut self, mut request: IncomingRequest) -> IncomingRequest {
        if let Some(active) = self.active.take() {
            warn!(
                event = "transfer_superseded",
                name = %active.name,
                received = active.received,
                "New header while receiving, dropping current transfer"
            );
        }

        let id = request.id();
        if let Some(snapshot) = self.suspended.take() {
            if snapshot.id() == id {
                request.resumable_from = Some(snapshot.received());
                self.suspended = Some(snapshot);
            } else {
                info!(
                    event = "suspended_discarded",
                    stale = %snapshot.id(),
                    incoming = %id,
                    "Different file announced, discarding suspended transfer"
                );
            }
        }

        info!(
            event = "incoming_request",
            name = %request.name,
            size = request.size,
            from = %request.sender_label,
            resumable_from = ?request.resumable_from,
            "Incoming file"
        );
        self.pending = Some(request.clone());
        self.state = ReceiverState::Pending;
        request
    }

    /// Accept the pending file. Always yields a `ResumeAck`, even at offset 0.
    pub fn accept(&mut self, profile: TransferProfile) -> Option<Accepted> {
        let request = self.pending.take()?;
        let id = request.id();

        let transfer = match self.suspended.take() {
            Some(SuspendedTransfer(mut snapshot)) if snapshot.id == id => {
                snapshot.expected_hash = request.hash.clone();
                snapshot.is_last = request.is_last;
                info!(event = "transfer_resumed", %id, offset = snapshot.received, "Resuming transfer");
                snapshot
            }
            _ => InboundTransfer::fresh(&request),
        };

        let offset = transfer.received;
        let verify_now = offset >= transfer.size;
        self.resumed_from = offset;
        self.started = Instant::now();
        self.throttle = ProgressThrottle::new(profile.ui_update_interval);
        self.active = Some(transfer);
        self.state = if verify_now {
            ReceiverState::Verifying
        } else {
            ReceiverState::Receiving
        };

        Some(Accepted {
            ack: ControlMessage::ResumeAck { offset },
            offset,
            verify_now,
        })
    }

    /// Decline the pending file.
    pub fn reject(&mut self) -> Option<ControlMessage> {
        let request = self.pending.take()?;
        self.state = ReceiverState::AwaitingHeader;
        info!(event = "incoming_rejected", name = %request.name, "Rejected incoming file");
        Some(ControlMessage::TransferRejected {
            file_name: request.name,
        })
    }

    /// The sender withdrew `file_name`. Drops a matching pending offer or
    /// in-progress receive without suspending it; returns whether one was
    /// dropped.
    pub fn on_cancelled(&mut self, file_name: &str) -> bool {
        let pending = self.pending.as_ref().is_some_and(|p| p.name == file_name);
        let receiving = self.state == ReceiverState::Receiving
            && self.active.as_ref().is_some_and(|a| a.name == file_name);
        if !pending && !receiving {
            return false;
        }
        if pending {
            self.pending = None;
        }
        if receiving {
            self.active = None;
        }
        self.state = ReceiverState::AwaitingHeader;
        info!(event = "incoming_withdrawn", file_name, "Sender cancelled the transfer");
        true
    }

    pub fn on_chunk(&mut self, payload: Bytes) -> ChunkOutcome {
        if self.state != ReceiverState::Receiving {
            debug!(event = "chunk_ignored", len = payload.len(), state = ?self.state, "Chunk outside a transfer");
            return ChunkOutcome::Ignored;
        }
        let Some(active) = self.active.as_mut() else {
            return ChunkOutcome::Ignored;
        };

        let room = active.size - active.received;
        let payload = if payload.len() as u64 > room {
            warn!(
                event = "chunk_overflow",
                name = %active.name,
                extra = payload.len() as u64 - room,
                "Chunk runs past the declared size, truncating"
            );
            payload.slice(..room as usize)
        } else {
            payload
        };

        active.received += payload.len() as u64;
        if !payload.is_empty() {
            active.chunks.push(payload);
        }

        if active.received >= active.size {
            self.state = ReceiverState::Verifying;
            return ChunkOutcome::ReadyToVerify;
        }

        let progress = self.throttle.ready(Instant::now()).then(|| Progress {
            file_name: active.name.clone(),
            percent: percent(active.received, active.size),
            speed_label: speed_label(active.received - self.resumed_from, self.started),
        });
        ChunkOutcome::Stored(progress)
    }

    /// Assemble and verify the completed transfer.
    pub async fn finalize(&mut self) -> Option<Verdict> {
        if self.state != ReceiverState::Verifying {
            return None;
        }
        let transfer = self.active.take()?;
        let elapsed = self.started.elapsed();
        let speed = speed_mib_per_sec(transfer.received - self.resumed_from, elapsed);
        let file_name = transfer.name.clone();
        let size = transfer.size;
        let is_last = transfer.is_last;
        let expected = transfer.expected_hash.clone();
        let data = transfer.assemble();

        let (data, matches) = if expected.is_empty() {
            warn!(event = "integrity_unverified", name = %file_name, "Sender supplied no hash, accepting unverified");
            (data, true)
        } else if !self.verify {
            warn!(event = "integrity_unverified", name = %file_name, "Verification disabled, accepting unverified");
            (data, true)
        } else {
            match tokio::task::spawn_blocking(move || {
                let actual = hash_bytes(&data);
                (data, actual)
            })
            .await
            {
                Ok((data, actual)) => {
                    let ok = actual == expected;
                    (data, ok)
                }
                Err(e) => {
                    warn!(event = "verify_task_failed", error = %e, "Hash task failed");
                    (Vec::new(), false)
                }
            }
        };

        if matches {
            self.state = ReceiverState::Complete;
            info!(event = "file_received", name = %file_name, size, "File received");
            Some(Verdict::Delivered {
                file_name,
                data,
                is_last,
                speed,
            })
        } else {
            self.state = ReceiverState::Failed;
            warn!(event = "integrity_failure", name = %file_name, size, "Hash mismatch, discarding file");
            Some(Verdict::IntegrityFailed {
                file_name,
                size,
                is_last,
            })
        }
    }

    /// Transport dropped. Snapshots an in-progress receive; returns whether
    /// anything was suspended.
    pub fn suspend(&mut self) -> bool {
        self.pending = None;
        let was_receiving = self.state == ReceiverState::Receiving;
        self.state = ReceiverState::Idle;
        match self.active.take() {
            Some(transfer) if was_receiving => {
                info!(
                    event = "transfer_suspended",
                    id = %transfer.id,
                    received = transfer.received,
                    size = transfer.size,
                    "Transfer suspended"
                );
                self.suspended = Some(SuspendedTransfer(transfer));
                true
            }
            _ => false,
        }
    }

    /// Hand the snapshot to the session owner for the next connection.
    pub fn take_suspended(&mut self) -> Option<SuspendedTransfer> {
        self.suspended.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(name: &str, data: &[u8], hash: String, is_last: bool) -> IncomingRequest {
        IncomingRequest {
            name: name.into(),
            size: data.len() as u64,
            mime_type: "application/octet-stream".into(),
            hash,
            sender_label: "ghost".into(),
            is_last,
            resumable_from: None,
        }
    }

    fn connected(suspended: Option<SuspendedTransfer>) -> Receiver {
        let mut receiver = Receiver::new(true, suspended);
        receiver.on_connect();
        receiver
    }

    fn feed(receiver: &mut Receiver, data: &[u8], chunk: usize) -> ChunkOutcome {
        let mut last = ChunkOutcome::Ignored;
        for piece in data.chunks(chunk) {
            last = receiver.on_chunk(Bytes::copy_from_slice(piece));
        }
        last
    }

    #[tokio::test]
    async fn fresh_transfer_acks_zero_and_delivers() {
        let data = b"hello ghost".to_vec();
        let mut receiver = connected(None);
        receiver.on_header(request("a.txt", &data, hash_bytes(&data), true));
        assert_eq!(receiver.state(), ReceiverState::Pending);

        let accepted = receiver.accept(BALANCED_PROFILE).unwrap();
        assert_eq!(accepted.ack, ControlMessage::ResumeAck { offset: 0 });
        assert!(!accepted.verify_now);

        assert_eq!(feed(&mut receiver, &data, 4), ChunkOutcome::ReadyToVerify);
        match receiver.finalize().await.unwrap() {
            Verdict::Delivered { data: got, is_last, .. } => {
                assert_eq!(got, data);
                assert!(is_last);
            }
            other => panic!("expected delivery, got {other:?}"),
        }
        assert_eq!(receiver.state(), ReceiverState::Complete);
    }

    #[tokio::test]
    async fn suspended_transfer_resumes_at_received_offset() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 256) as u8).collect();
        let hash = hash_bytes(&data);
        let mut receiver = connected(None);
        receiver.on_header(request("r.bin", &data, hash.clone(), false));
        receiver.accept(BALANCED_PROFILE).unwrap();
        feed(&mut receiver, &data[..4_000], 1_000);

        assert!(receiver.suspend());
        let snapshot = receiver.take_suspended().unwrap();
        assert_eq!(snapshot.received(), 4_000);

        let mut next = connected(Some(snapshot));
        let shown = next.on_header(request("r.bin", &data, hash, true));
        assert_eq!(shown.resumable_from, Some(4_000));

        let accepted = next.accept(BALANCED_PROFILE).unwrap();
        assert_eq!(accepted.ack, ControlMessage::ResumeAck { offset: 4_000 });
        assert!(next.suspended().is_none(), "snapshot consumed once");

        assert_eq!(feed(&mut next, &data[4_000..], 1_000), ChunkOutcome::ReadyToVerify);
        match next.finalize().await.unwrap() {
            Verdict::Delivered { data: got, is_last, .. } => {
                assert_eq!(got, data);
                assert!(is_last, "flags refreshed from the new header");
            }
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn withdrawn_offer_cannot_be_accepted() {
        let data = b"offer".to_vec();
        let mut receiver = connected(None);
        receiver.on_header(request("w.txt", &data, String::new(), true));

        assert!(!receiver.on_cancelled("other.txt"));
        assert!(receiver.on_cancelled("w.txt"));
        assert_eq!(receiver.state(), ReceiverState::AwaitingHeader);
        assert!(receiver.pending().is_none());
        assert!(receiver.accept(BALANCED_PROFILE).is_none());
    }

    #[test]
    fn withdrawn_receive_is_not_suspended() {
        let data = vec![7u8; 8_000];
        let mut receiver = connected(None);
        receiver.on_header(request("half.bin", &data, String::new(), true));
        receiver.accept(BALANCED_PROFILE).unwrap();
        feed(&mut receiver, &data[..3_000], 1_000);

        assert!(receiver.on_cancelled("half.bin"));
        assert!(receiver.active().is_none());
        assert_eq!(receiver.on_chunk(Bytes::from_static(b"late")), ChunkOutcome::Ignored);
        assert!(!receiver.suspend());
        assert!(receiver.take_suspended().is_none());
    }

    #[tokio::test]
    async fn different_header_discards_snapshot() {
        let data = vec![7u8; 100];
        let mut receiver = connected(None);
        receiver.on_header(request("old.bin", &data, String::new(), false));
        receiver.accept(BALANCED_PROFILE).unwrap();
        feed(&mut receiver, &data[..50], 10);
        receiver.suspend();
        assert!(receiver.suspended().is_some());

        receiver.on_connect();
        let shown = receiver.on_header(request("new.bin", &data, String::new(), false));
        assert_eq!(shown.resumable_from, None);
        assert!(receiver.suspended().is_none());
        assert_eq!(receiver.accept(BALANCED_PROFILE).unwrap().offset, 0);
    }

    #[tokio::test]
    async fn hash_mismatch_fails_without_delivery() {
        let data = b"original bytes".to_vec();
        let mut receiver = connected(None);
        receiver.on_header(request("bad.txt", &data, hash_bytes(b"something else"), false));
        receiver.accept(BALANCED_PROFILE).unwrap();
        feed(&mut receiver, &data, 5);

        assert_eq!(
            receiver.finalize().await,
            Some(Verdict::IntegrityFailed {
                file_name: "bad.txt".into(),
                size: data.len() as u64,
                is_last: false,
            })
        );
        assert_eq!(receiver.state(), ReceiverState::Failed);
        assert!(receiver.active().is_none());
    }

    #[tokio::test]
    async fn empty_expected_hash_is_accepted() {
        let data = b"unverified".to_vec();
        let mut receiver = connected(None);
        receiver.on_header(request("u.txt", &data, String::new(), false));
        receiver.accept(BALANCED_PROFILE).unwrap();
        feed(&mut receiver, &data, 100);
        assert!(matches!(
            receiver.finalize().await,
            Some(Verdict::Delivered { .. })
        ));
    }

    #[tokio::test]
    async fn overflow_is_truncated_to_declared_size() {
        let data = b"0123456789".to_vec();
        let mut receiver = connected(None);
        receiver.on_header(request("o.txt", &data, String::new(), false));
        receiver.accept(BALANCED_PROFILE).unwrap();

        assert_eq!(
            receiver.on_chunk(Bytes::from_static(b"0123456789EXTRA")),
            ChunkOutcome::ReadyToVerify
        );
        assert_eq!(receiver.active().unwrap().received, 10);
        match receiver.finalize().await.unwrap() {
            Verdict::Delivered { data: got, .. } => assert_eq!(got, data),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn empty_file_verifies_immediately() {
        let mut receiver = connected(None);
        receiver.on_header(request("empty", &[], hash_bytes(&[]), true));
        let accepted = receiver.accept(BALANCED_PROFILE).unwrap();
        assert!(accepted.verify_now);
        assert!(matches!(
            receiver.finalize().await,
            Some(Verdict::Delivered { ref data, .. }) if data.is_empty()
        ));
    }

    #[test]
    fn reject_names_the_file_and_chunks_are_ignored() {
        let mut receiver = connected(None);
        receiver.on_header(request("no.txt", b"abc", String::new(), false));
        assert_eq!(
            receiver.reject(),
            Some(ControlMessage::TransferRejected {
                file_name: "no.txt".into()
            })
        );
        assert_eq!(receiver.state(), ReceiverState::AwaitingHeader);
        assert_eq!(
            receiver.on_chunk(Bytes::from_static(b"abc")),
            ChunkOutcome::Ignored
        );
        assert!(receiver.accept(BALANCED_PROFILE).is_none());
    }

    #[test]
    fn suspend_outside_receiving_keeps_nothing() {
        let mut receiver = connected(None);
        receiver.on_header(request("p.txt", b"abc", String::new(), false));
        assert!(!receiver.suspend());
        assert!(receiver.suspended().is_none());
        assert!(receiver.pending().is_none());
    }
}
