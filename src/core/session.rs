//! Session: the multiplexer and composition root for one transport.
//!
//! A [`Session`] exclusively owns the transport, its event stream, the
//! sender, the receiver, the queue, chat, probing and lifecycle timers.
//! Everything runs on one task inside a single `select!` loop:
//!
//! ```text
//!             ┌──────────── transport events (Data / Drain / Close)
//!             │  ┌───────── background hash result
//!             │  │  ┌────── presentation commands (SessionHandle)
//!             │  │  │  ┌─── next lifecycle deadline
//!             ▼  ▼  ▼  ▼  ┌ one outbound chunk, while the sender wants one
//!          ┌──────────────▼┐
//!          │  Session loop │──► SessionView (watch) + SessionEvent (mpsc)
//!          └───────────────┘
//! ```
//!
//! Inbound frames are classified by their envelope tag: chunks go to the
//! receiver, control messages are decoded and routed by type. Outbound
//! control messages go through [`Transport::send`]; only the sender
//! touches [`Transport::write`].

use bytes::Bytes;
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::core::chat::{ChatChannel, ChatEntry};
use crate::core::config::{DESTRUCT_COUNTDOWN, IDLE_TIMEOUT, TransferMode};
use crate::core::lifecycle::{Expiry, SessionLifecycle};
use crate::core::pipeline::Progress;
use crate::core::pipeline::receiver::{
    ChunkOutcome, IncomingRequest, Receiver, SuspendedTransfer, Verdict,
};
use crate::core::pipeline::sender::{ChunkStep, OutgoingFile, SendOutcome, Sender};
use crate::core::probe::{LatencyProbe, ModePolicy, ModeSelector, now_millis, pong_for};
use crate::core::protocol::{ControlMessage, Frame, classify, decode_control, encode_control_frame};
use crate::core::queue::{QueueStep, TransferQueue};
use crate::core::sink::{DeliverySink, TransferLog, TransferRecord, TransferStatus, deliver};
use crate::core::transport::{Transport, TransportEvent, TransportEvents};

// ── Configuration ────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Sent as `senderLabel` in every header.
    pub label: String,
    pub mode: ModePolicy,
    /// Hash outgoing files and verify incoming ones.
    pub verify: bool,
    /// Accept incoming files without asking.
    pub auto_accept: bool,
    pub idle_timeout: Duration,
    pub destruct_after: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            label: "ghost".into(),
            mode: ModePolicy::Auto,
            verify: true,
            auto_accept: false,
            idle_timeout: IDLE_TIMEOUT,
            destruct_after: DESTRUCT_COUNTDOWN,
        }
    }
}

// ── Presentation interface ───────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    EnqueueFiles(Vec<PathBuf>),
    SendChat(String),
    AcceptIncoming,
    RejectIncoming,
    CancelDestruct,
    Ping,
    /// Stop the file in flight and drop the rest of the queue.
    CancelTransfer,
    Close,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Connected { peer: String },
    IncomingRequest(IncomingRequest),
    ChatReceived(ChatEntry),
    FileSent { name: String },
    FileRejectedByPeer { name: String },
    SendFailed { name: String, reason: String },
    FileDelivered { name: String, path: PathBuf },
    IntegrityFailed { name: String },
    /// The peer withdrew a file it had offered or was sending.
    IncomingCancelled { name: String },
    TransferCancelled { name: Option<String>, dropped: usize },
    QueueComplete,
    LatencyMeasured(Duration),
    ModeChanged(TransferMode),
    DestructArmed { after: Duration },
    DestructCancelled { by_peer: bool },
    Error(String),
    Closed(TeardownReason),
}

/// Countdown descriptor shown while the destruct timer is armed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DestructWarning {
    pub deadline: Instant,
    pub after: Duration,
}

impl DestructWarning {
    pub fn remaining(&self, now: Instant) -> Duration {
        self.deadline.saturating_duration_since(now)
    }
}

/// Observable session state, published through a `watch` channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionView {
    pub connected: bool,
    pub peer: String,
    /// 0–100 for the file currently moving in either direction.
    pub progress: u8,
    pub transfer_name: Option<String>,
    pub speed_label: String,
    pub queue_depth: usize,
    pub incoming: Option<IncomingRequest>,
    pub chat: Vec<ChatEntry>,
    pub latency: Option<Duration>,
    pub mode: TransferMode,
    pub warning: Option<DestructWarning>,
}

impl SessionView {
    fn new(mode: TransferMode) -> Self {
        Self {
            connected: false,
            peer: String::new(),
            progress: 0,
            transfer_name: None,
            speed_label: String::new(),
            queue_depth: 0,
            incoming: None,
            chat: Vec::new(),
            latency: None,
            mode,
            warning: None,
        }
    }
}

/// Cloneable remote control for whichever session currently owns the ports.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
    view: watch::Receiver<SessionView>,
}

impl SessionHandle {
    pub fn send(&self, command: SessionCommand) -> anyhow::Result<()> {
        self.commands
            .send(command)
            .map_err(|_| anyhow::anyhow!("session has shut down"))
    }

    pub fn enqueue_files(&self, files: Vec<PathBuf>) -> anyhow::Result<()> {
        self.send(SessionCommand::EnqueueFiles(files))
    }

    pub fn send_chat(&self, text: impl Into<String>) -> anyhow::Result<()> {
        self.send(SessionCommand::SendChat(text.into()))
    }

    pub fn accept_incoming(&self) -> anyhow::Result<()> {
        self.send(SessionCommand::AcceptIncoming)
    }

    pub fn reject_incoming(&self) -> anyhow::Result<()> {
        self.send(SessionCommand::RejectIncoming)
    }

    pub fn cancel_destruct(&self) -> anyhow::Result<()> {
        self.send(SessionCommand::CancelDestruct)
    }

    pub fn close(&self) -> anyhow::Result<()> {
        self.send(SessionCommand::Close)
    }

    /// Snapshot of the current state.
    pub fn view(&self) -> SessionView {
        self.view.borrow().clone()
    }

    /// Resolves when the view changes; `Err` once the ports are gone.
    pub async fn changed(&mut self) -> anyhow::Result<()> {
        self.view.changed().await.map_err(anyhow::Error::from)
    }
}

/// Session-side ends of the presentation channels plus the sinks. Outlives
/// individual sessions so one handle can follow reconnects.
pub struct SessionPorts {
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    view: watch::Sender<SessionView>,
    events: mpsc::UnboundedSender<SessionEvent>,
    sink: Arc<dyn DeliverySink>,
    log: Box<dyn TransferLog>,
}

pub fn channels(
    mode: TransferMode,
    sink: Arc<dyn DeliverySink>,
    log: Box<dyn TransferLog>,
) -> (SessionHandle, SessionPorts, mpsc::UnboundedReceiver<SessionEvent>) {
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (view_tx, view_rx) = watch::channel(SessionView::new(mode));
    let (event_tx, event_rx) = mpsc::unbounded_channel();
    (
        SessionHandle {
            commands: command_tx,
            view: view_rx,
        },
        SessionPorts {
            commands: command_rx,
            view: view_tx,
            events: event_tx,
            sink,
            log,
        },
        event_rx,
    )
}

// ── Teardown ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReason {
    IdleTimeout,
    SelfDestruct,
    TransportClosed,
    TransportError(String),
    LocalClose,
}

impl TeardownReason {
    /// Whether the link dropped under us, as opposed to a deliberate close.
    pub fn is_transport_loss(&self) -> bool {
        matches!(
            self,
            TeardownReason::TransportClosed | TeardownReason::TransportError(_)
        )
    }
}

impl Display for TeardownReason {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TeardownReason::IdleTimeout => f.write_str("idle timeout"),
            TeardownReason::SelfDestruct => f.write_str("self-destruct"),
            TeardownReason::TransportClosed => f.write_str("connection closed"),
            TeardownReason::TransportError(e) => write!(f, "connection error: {e}"),
            TeardownReason::LocalClose => f.write_str("closed locally"),
        }
    }
}

/// State carried from one session into the next.
#[derive(Debug, Default)]
pub struct Carryover {
    pub suspended: Option<SuspendedTransfer>,
    /// Files to send once the new session connects, in order.
    pub unsent: Vec<OutgoingFile>,
}

#[derive(Debug)]
pub struct SessionOutcome {
    pub reason: TeardownReason,
    pub carryover: Carryover,
}

// ── Session ──────────────────────────────────────────────────────────────────

pub struct Session<'p, T: Transport> {
    config: SessionConfig,
    transport: T,
    events: TransportEvents,
    ports: &'p mut SessionPorts,
    sender: Sender,
    receiver: Receiver,
    queue: TransferQueue,
    chat: ChatChannel,
    probe: LatencyProbe,
    modes: ModeSelector,
    lifecycle: SessionLifecycle,
    carried: Vec<OutgoingFile>,
    /// The file in flight went out flagged `is_last`.
    announced_last: bool,
    commands_open: bool,
}

impl<'p, T: Transport> Session<'p, T> {
    pub fn new(
        config: SessionConfig,
        transport: T,
        events: TransportEvents,
        ports: &'p mut SessionPorts,
        carryover: Carryover,
    ) -> Self {
        let modes = ModeSelector::new(config.mode);
        let mut view = SessionView::new(modes.current());
        view.peer = transport.peer_label();
        ports.view.send_replace(view);

        Self {
            sender: Sender::new(config.verify, config.label.clone()),
            receiver: Receiver::new(config.verify, carryover.suspended),
            queue: TransferQueue::new(),
            chat: ChatChannel::new(),
            probe: LatencyProbe::new(),
            modes,
            lifecycle: SessionLifecycle::new(
                config.idle_timeout,
                config.destruct_after,
                Instant::now(),
            ),
            carried: carryover.unsent,
            announced_last: false,
            commands_open: true,
            config,
            transport,
            events,
            ports,
        }
    }

    /// Drive the session until teardown.
    pub async fn run(mut self) -> SessionOutcome {
        info!(event = "session_start", peer = %self.transport.peer_label(), "Session started");
        let reason = loop {
            let deadline = self.lifecycle.next_deadline();
            let sleep_until = deadline.unwrap_or_else(|| Instant::now() + IDLE_TIMEOUT);

            tokio::select! {
                biased;

                event = self.events.recv() => match event {
                    Some(event) => {
                        if let Some(reason) = self.on_transport_event(event).await {
                            break reason;
                        }
                    }
                    None => break TeardownReason::TransportClosed,
                },

                hashed = self.sender.wait_hash(), if self.sender.is_hashing() => {
                    match self.sender.on_hashed(hashed) {
                        Ok(header) => self.send_control(&header),
                        Err(outcome) => self.on_send_outcome(outcome),
                    }
                }

                command = self.ports.commands.recv(), if self.commands_open => match command {
                    Some(command) => {
                        if let Some(reason) = self.on_command(command).await {
                            break reason;
                        }
                    }
                    None => self.commands_open = false,
                },

                _ = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                    match self.lifecycle.poll_expired(Instant::now()) {
                        Some(Expiry::Destruct) => break TeardownReason::SelfDestruct,
                        Some(Expiry::Idle) => break TeardownReason::IdleTimeout,
                        None => {}
                    }
                }

                _ = std::future::ready(()), if self.sender.wants_chunk() => {
                    self.pump_chunk().await;
                }
            }
        };
        self.teardown(reason)
    }

    // ── Transport side ───────────────────────────────────────────────────────

    async fn on_transport_event(&mut self, event: TransportEvent) -> Option<TeardownReason> {
        match event {
            TransportEvent::Connect => {
                self.on_connect();
                None
            }
            TransportEvent::Data(frame) => {
                self.lifecycle.touch(Instant::now());
                self.on_frame(frame).await;
                None
            }
            TransportEvent::Drain => {
                self.sender.on_drain();
                None
            }
            TransportEvent::Close => Some(TeardownReason::TransportClosed),
            TransportEvent::Error(e) => {
                error!(event = "transport_error", error = %e, "Transport failed");
                self.emit(SessionEvent::Error(e.clone()));
                Some(TeardownReason::TransportError(e))
            }
        }
    }

    fn on_connect(&mut self) {
        let peer = self.transport.peer_label();
        info!(event = "session_connected", %peer, "Transport connected");
        self.receiver.on_connect();
        self.update_view(|v| v.connected = true);
        self.emit(SessionEvent::Connected { peer });
        self.ping();

        let carried = std::mem::take(&mut self.carried);
        if !carried.is_empty() {
            info!(event = "queue_restored", count = carried.len(), "Re-queueing unsent files");
            self.enqueue(carried);
        }
    }

    async fn on_frame(&mut self, frame: Bytes) {
        match classify(frame) {
            Ok(Frame::Chunk(payload)) => self.on_chunk(payload).await,
            Ok(Frame::Control(payload)) => match decode_control(&payload) {
                Ok(msg) => self.on_control(msg).await,
                Err(e) => {
                    warn!(event = "control_decode_failed", error = %e, "Dropping malformed control message")
                }
            },
            Err(e) => warn!(event = "frame_dropped", error = %e, "Dropping unrecognised frame"),
        }
    }

    async fn on_chunk(&mut self, payload: Bytes) {
        match self.receiver.on_chunk(payload) {
            ChunkOutcome::Ignored => {}
            ChunkOutcome::Stored(progress) => {
                if let Some(progress) = progress {
                    self.show_progress(progress);
                }
            }
            ChunkOutcome::ReadyToVerify => self.finish_receive().await,
        }
    }

    async fn on_control(&mut self, msg: ControlMessage) {
        debug!(event = "control_received", kind = msg.kind(), "Control message");
        if let Some(request) = IncomingRequest::from_header(&msg) {
            self.on_header(request).await;
            return;
        }

        match msg {
            ControlMessage::Header { .. } => {}
            ControlMessage::ResumeAck { offset } => {
                let profile = self.modes.profile();
                match self.sender.on_resume_ack(offset, profile).await {
                    Some(outcome) => self.on_send_outcome(outcome),
                    None => {
                        let progress = self.sender.percent();
                        self.update_view(|v| v.progress = progress);
                    }
                }
            }
            ControlMessage::TransferRejected { file_name } => {
                if let Some(outcome) = self.sender.on_rejected(&file_name) {
                    self.on_send_outcome(outcome);
                } else if self.receiver.on_cancelled(&file_name) {
                    self.update_view(|v| {
                        v.incoming = None;
                        v.progress = 0;
                        v.speed_label = "Cancelled by peer".into();
                    });
                    self.emit(SessionEvent::IncomingCancelled { name: file_name });
                }
            }
            ControlMessage::Chat { text, timestamp } => {
                let entry = self.chat.on_message(text, timestamp);
                self.publish_chat();
                self.emit(SessionEvent::ChatReceived(entry));
            }
            ControlMessage::Ping { time } => self.send_control(&pong_for(time)),
            ControlMessage::Pong { time } => {
                let rtt = self.probe.on_pong(time, now_millis());
                self.update_view(|v| v.latency = Some(rtt));
                self.emit(SessionEvent::LatencyMeasured(rtt));
                if let Some(mode) = self.modes.observe(rtt) {
                    self.update_view(|v| v.mode = mode);
                    self.emit(SessionEvent::ModeChanged(mode));
                }
            }
            ControlMessage::CancelDestruct => self.clear_destruct(true),
        }
    }

    async fn on_header(&mut self, request: IncomingRequest) {
        // More files are coming, so the peer's queue is not finished.
        self.clear_destruct(true);
        let shown = self.receiver.on_header(request);
        self.ping();
        if self.config.auto_accept {
            self.accept_incoming().await;
        } else {
            self.update_view(|v| v.incoming = Some(shown.clone()));
            self.emit(SessionEvent::IncomingRequest(shown));
        }
    }

    async fn accept_incoming(&mut self) {
        let Some(accepted) = self.receiver.accept(self.modes.profile()) else {
            self.emit(SessionEvent::Error("no incoming file to accept".into()));
            return;
        };
        let name = self.receiver.active().map(|a| a.name.clone());
        let progress = self.receiver.percent();
        self.update_view(|v| {
            v.incoming = None;
            v.transfer_name = name;
            v.progress = progress;
            v.speed_label = "Receiving...".into();
        });
        self.send_control(&accepted.ack);
        if accepted.verify_now {
            self.finish_receive().await;
        }
    }

    fn reject_incoming(&mut self) {
        match self.receiver.reject() {
            Some(msg) => {
                self.send_control(&msg);
                self.update_view(|v| v.incoming = None);
            }
            None => self.emit(SessionEvent::Error("no incoming file to reject".into())),
        }
    }

    async fn finish_receive(&mut self) {
        let Some(verdict) = self.receiver.finalize().await else {
            return;
        };
        match verdict {
            Verdict::Delivered {
                file_name,
                data,
                is_last,
                speed,
            } => {
                let size = data.len() as u64;
                match deliver(&self.ports.sink, &file_name, data).await {
                    Ok(path) => {
                        self.record(TransferRecord::new(&file_name, size, speed, TransferStatus::Received));
                        self.update_view(|v| {
                            v.progress = 100;
                            v.speed_label = "Finished".into();
                        });
                        self.emit(SessionEvent::FileDelivered {
                            name: file_name,
                            path,
                        });
                    }
                    Err(e) => {
                        error!(event = "delivery_failed", name = %file_name, error = %e, "Could not save file");
                        self.record(TransferRecord::new(&file_name, size, speed, TransferStatus::Failed));
                        self.emit(SessionEvent::Error(format!("could not save {file_name}: {e:#}")));
                    }
                }
                if is_last {
                    self.arm_destruct();
                }
            }
            Verdict::IntegrityFailed {
                file_name,
                size,
                is_last,
            } => {
                self.record(TransferRecord::new(&file_name, size, 0.0, TransferStatus::Failed));
                self.update_view(|v| {
                    v.progress = 0;
                    v.speed_label = "Integrity check failed".into();
                });
                self.emit(SessionEvent::IntegrityFailed { name: file_name });
                if is_last {
                    self.arm_destruct();
                }
            }
        }
    }

    // ── Outbound side ────────────────────────────────────────────────────────

    async fn pump_chunk(&mut self) {
        let step = self.sender.step(&mut self.transport).await;
        match step {
            ChunkStep::Idle => {}
            ChunkStep::Continue(progress) | ChunkStep::Paused(progress) => {
                self.lifecycle.touch(Instant::now());
                if let Some(progress) = progress {
                    self.show_progress(progress);
                }
            }
            ChunkStep::Finished(outcome) => {
                self.lifecycle.touch(Instant::now());
                self.on_send_outcome(outcome);
            }
        }
        // Let transport tasks and peers run between chunks.
        tokio::task::yield_now().await;
    }

    fn on_send_outcome(&mut self, outcome: SendOutcome) {
        match outcome {
            SendOutcome::Completed(record) => {
                let name = record.file_name.clone();
                self.record(record);
                self.update_view(|v| {
                    v.progress = 100;
                    v.speed_label = "Finished".into();
                });
                self.emit(SessionEvent::FileSent { name });
            }
            SendOutcome::Rejected { file_name } => {
                self.emit(SessionEvent::FileRejectedByPeer { name: file_name });
            }
            SendOutcome::Failed { record, reason } => {
                let name = record.file_name.clone();
                self.record(record);
                self.emit(SessionEvent::SendFailed { name, reason });
            }
        }

        match self.queue.on_finished() {
            QueueStep::Start { file, is_last } => {
                self.update_view(|v| v.speed_label = "Waiting for next...".into());
                self.start_file(file, is_last);
            }
            QueueStep::Drained => {
                self.announced_last = false;
                self.update_view(|v| {
                    v.queue_depth = 0;
                    v.speed_label = "Complete".into();
                });
                self.emit(SessionEvent::QueueComplete);
                self.arm_destruct();
            }
        }
    }

    fn enqueue(&mut self, files: Vec<OutgoingFile>) {
        if files.is_empty() {
            return;
        }
        // New work keeps the session alive on both ends.
        self.cancel_destruct_local();
        if let Some(QueueStep::Start { file, is_last }) = self.queue.enqueue(files) {
            self.start_file(file, is_last);
        }
        let depth = self.queue.depth();
        self.update_view(|v| v.queue_depth = depth);
    }

    fn start_file(&mut self, file: OutgoingFile, is_last: bool) {
        let name = file.name.clone();
        let depth = self.queue.depth();
        self.update_view(|v| {
            v.transfer_name = Some(name);
            v.progress = 0;
            v.queue_depth = depth;
        });
        self.ping();
        // The previous file told the peer it was the last one.
        if std::mem::replace(&mut self.announced_last, is_last) {
            self.send_control(&ControlMessage::CancelDestruct);
        }
        if let Some(header) = self.sender.start(file, is_last) {
            self.send_control(&header);
        }
    }

    fn cancel_transfer(&mut self) {
        let announced = self.sender.announced().map(str::to_string);
        let interrupted = self.sender.cancel().map(|f| f.name);
        if let Some(file_name) = announced {
            self.send_control(&ControlMessage::TransferRejected { file_name });
        }
        self.announced_last = false;
        let dropped = self.queue.drain_unsent().len();
        info!(event = "transfer_cancelled", name = ?interrupted, dropped, "Outgoing transfer cancelled");
        self.update_view(|v| {
            v.queue_depth = 0;
            v.progress = 0;
            v.speed_label = "Cancelled".into();
        });
        self.emit(SessionEvent::TransferCancelled {
            name: interrupted,
            dropped,
        });
    }

    fn ping(&mut self) {
        let ping = self.probe.ping(now_millis());
        self.send_control(&ping);
    }

    fn send_control(&mut self, msg: &ControlMessage) {
        let frame = match encode_control_frame(msg) {
            Ok(frame) => frame,
            Err(e) => {
                error!(event = "control_encode_failed", kind = msg.kind(), error = %e, "Cannot encode");
                return;
            }
        };
        match self.transport.send(frame) {
            Ok(()) => {
                self.lifecycle.touch(Instant::now());
                debug!(event = "control_sent", kind = msg.kind(), "Control message sent");
            }
            Err(e) => warn!(event = "control_send_failed", kind = msg.kind(), error = %e, "Send failed"),
        }
    }

    // ── Commands ─────────────────────────────────────────────────────────────

    async fn on_command(&mut self, command: SessionCommand) -> Option<TeardownReason> {
        match command {
            SessionCommand::EnqueueFiles(paths) => {
                let mut files = Vec::with_capacity(paths.len());
                for path in paths {
                    match OutgoingFile::from_path(&path).await {
                        Ok(file) => files.push(file),
                        Err(e) => {
                            warn!(event = "enqueue_skipped", path = %path.display(), error = %e, "Skipping file");
                            self.emit(SessionEvent::Error(format!("{e:#}")));
                        }
                    }
                }
                self.enqueue(files);
            }
            SessionCommand::SendChat(text) => match self.chat.compose(&text, now_millis()) {
                Ok((msg, _entry)) => {
                    self.send_control(&msg);
                    self.publish_chat();
                }
                Err(e) => self.emit(SessionEvent::Error(e.to_string())),
            },
            SessionCommand::AcceptIncoming => self.accept_incoming().await,
            SessionCommand::RejectIncoming => self.reject_incoming(),
            SessionCommand::CancelDestruct => self.cancel_destruct_local(),
            SessionCommand::Ping => self.ping(),
            SessionCommand::CancelTransfer => self.cancel_transfer(),
            SessionCommand::Close => return Some(TeardownReason::LocalClose),
        }
        None
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Arms only when nothing is moving in either direction.
    fn arm_destruct(&mut self) {
        if self.sender.is_busy() || self.receiver.is_busy() || !self.queue.is_idle() {
            debug!(event = "destruct_deferred", "Transfer still active, not arming");
            return;
        }
        if let Some(deadline) = self.lifecycle.arm_destruct(Instant::now()) {
            let after = self.config.destruct_after;
            self.update_view(|v| v.warning = Some(DestructWarning { deadline, after }));
            self.emit(SessionEvent::DestructArmed { after });
        }
    }

    fn clear_destruct(&mut self, by_peer: bool) {
        if self.lifecycle.cancel_destruct() {
            self.update_view(|v| v.warning = None);
            self.emit(SessionEvent::DestructCancelled { by_peer });
        }
    }

    /// Local cancel: clear our timer and always tell the peer, whose timer
    /// may be armed even when ours is not.
    fn cancel_destruct_local(&mut self) {
        self.clear_destruct(false);
        self.send_control(&ControlMessage::CancelDestruct);
    }

    fn teardown(mut self, reason: TeardownReason) -> SessionOutcome {
        let mut unsent: Vec<OutgoingFile> = self.sender.cancel().into_iter().collect();
        unsent.extend(self.queue.drain_unsent());
        unsent.extend(std::mem::take(&mut self.carried));
        self.receiver.suspend();
        self.lifecycle.clear();
        self.transport.close();

        let suspended = self.receiver.take_suspended();
        info!(
            event = "session_closed",
            reason = %reason,
            unsent = unsent.len(),
            suspended = ?suspended.as_ref().map(|s| s.id().to_string()),
            "Session closed"
        );
        self.update_view(|v| {
            v.connected = false;
            v.warning = None;
            v.incoming = None;
        });
        self.emit(SessionEvent::Closed(reason.clone()));

        SessionOutcome {
            reason,
            carryover: Carryover { suspended, unsent },
        }
    }

    // ── Helpers ──────────────────────────────────────────────────────────────

    fn show_progress(&self, progress: Progress) {
        self.update_view(|v| {
            v.transfer_name = Some(progress.file_name);
            v.progress = progress.percent;
            v.speed_label = progress.speed_label;
        });
    }

    fn publish_chat(&self) {
        let chat: Vec<ChatEntry> = self.chat.history().cloned().collect();
        self.update_view(|v| v.chat = chat);
    }

    fn record(&mut self, record: TransferRecord) {
        self.ports.log.record(&record);
    }

    fn update_view(&self, f: impl FnOnce(&mut SessionView)) {
        self.ports.view.send_modify(f);
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.ports.events.send(event);
    }
}
