//! Sender: drives one outbound file through
//! `Idle → Hashing → AwaitingAck → Streaming → Completed | Rejected | Failed`.
//!
//! ```text
//! start ──► hash task ──► Header ──► (peer) ResumeAck{offset}
//!                                          │
//!            ┌─────────────────────────────┘
//!            ▼
//!   step: read chunk ──► transport.write ──► true:  next step
//!                                        └─► false: paused until on_drain
//! ```
//!
//! The sender is the only component that calls [`Transport::write`]. It
//! never loops on its own: the session calls [`Sender::step`] once per
//! event-loop turn while [`Sender::wants_chunk`] holds, so inbound frames
//! keep being serviced between chunks.

use anyhow::{Context, Result, anyhow, bail};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncReadExt, AsyncSeekExt, SeekFrom};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::hash::hash_file;
use super::{Progress, ProgressThrottle, percent, speed_label};
use crate::core::config::{BALANCED_PROFILE, TransferProfile};
use crate::core::protocol::{ControlMessage, encode_chunk_frame};
use crate::core::sink::{TransferRecord, TransferStatus};
use crate::core::transport::Transport;
use crate::utils::formatters::speed_mib_per_sec;

/// A local file queued for sending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingFile {
    pub path: PathBuf,
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

impl OutgoingFile {
    pub async fn from_path(path: &Path) -> Result<Self> {
        let meta = tokio::fs::metadata(path)
            .await
            .with_context(|| format!("cannot read {}", path.display()))?;
        if !meta.is_file() {
            bail!("{} is not a regular file", path.display());
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .context("path has no file name")?;
        let mime_type = mime_guess::from_path(path)
            .first_or_octet_stream()
            .essence_str()
            .to_string();
        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: meta.len(),
            mime_type,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SenderState {
    Idle,
    Hashing,
    AwaitingAck,
    Streaming,
    Completed,
    Rejected,
    Failed,
}

impl SenderState {
    fn is_busy(self) -> bool {
        matches!(
            self,
            SenderState::Hashing | SenderState::AwaitingAck | SenderState::Streaming
        )
    }
}

/// The one file currently owned by the sender.
#[derive(Debug)]
pub struct OutboundTransfer {
    pub file: OutgoingFile,
    /// Hex SHA3-256; empty when integrity checking is off.
    pub hash: String,
    pub is_last: bool,
    /// Next byte to send. Only ever moves forward.
    pub offset: u64,
    /// Cleared by [`Sender::cancel`]; checked before every write.
    pub streaming: bool,
}

/// How a file left the sender.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    Completed(TransferRecord),
    Rejected { file_name: String },
    Failed { record: TransferRecord, reason: String },
}

/// Result of one [`Sender::step`].
#[derive(Debug)]
pub enum ChunkStep {
    /// Nothing to do (not streaming, paused, or cancelled).
    Idle,
    /// A chunk went out; keep going.
    Continue(Option<Progress>),
    /// A chunk went out and the transport is now full. Wait for drain.
    Paused(Option<Progress>),
    Finished(SendOutcome),
}

pub struct Sender {
    state: SenderState,
    active: Option<OutboundTransfer>,
    verify: bool,
    sender_label: String,
    hashing: Option<JoinHandle<Result<String>>>,
    reader: Option<tokio::fs::File>,
    /// Fixed when streaming starts; profile changes apply to the next file.
    chunk_size: usize,
    paused: bool,
    throttle: ProgressThrottle,
    started: Instant,
    sent_bytes: u64,
    chunks_sent: u64,
}

impl Sender {
    pub fn new(verify: bool, sender_label: impl Into<String>) -> Self {
        Self {
            state: SenderState::Idle,
            active: None,
            verify,
            sender_label: sender_label.into(),
            hashing: None,
            reader: None,
            chunk_size: BALANCED_PROFILE.chunk_size,
            paused: false,
            throttle: ProgressThrottle::new(BALANCED_PROFILE.ui_update_interval),
            started: Instant::now(),
            sent_bytes: 0,
            chunks_sent: 0,
        }
    }

    pub fn state(&self) -> SenderState {
        self.state
    }

    pub fn active(&self) -> Option<&OutboundTransfer> {
        self.active.as_ref()
    }

    pub fn is_hashing(&self) -> bool {
        self.state == SenderState::Hashing
    }

    /// A file is between `start` and its outcome.
    pub fn is_busy(&self) -> bool {
        self.state.is_busy()
    }

    /// Name of the active file once its header has gone out.
    pub fn announced(&self) -> Option<&str> {
        match self.state {
            SenderState::AwaitingAck | SenderState::Streaming => {
                self.active.as_ref().map(|a| a.file.name.as_str())
            }
            _ => None,
        }
    }

    /// Chunks written since the current file started streaming.
    pub fn chunks_sent(&self) -> u64 {
        self.chunks_sent
    }

    pub fn percent(&self) -> u8 {
        if self.state == SenderState::Completed {
            return 100;
        }
        self.active
            .as_ref()
            .map(|a| percent(a.offset, a.file.size))
            .unwrap_or(0)
    }

    /// Take ownership of `file`. With integrity on, hashing starts in the
    /// background and the header follows from [`Sender::on_hashed`];
    /// otherwise the header is returned right away with an empty hash.
    pub fn start(&mut self, file: OutgoingFile, is_last: bool) -> Option<ControlMessage> {
        if self.state.is_busy() {
            warn!(event = "sender_superseded", state = ?self.state, "Sender restarted while busy");
            self.cancel();
        }
        info!(
            event = "file_send_prepare",
            name = %file.name,
            size = file.size,
            is_last,
            "Preparing file"
        );

        let path = file.path.clone();
        self.active = Some(OutboundTransfer {
            file,
            hash: String::new(),
            is_last,
            offset: 0,
            streaming: false,
        });
        self.chunks_sent = 0;

        if self.verify {
            self.state = SenderState::Hashing;
            self.hashing = Some(tokio::spawn(async move { hash_file(&path).await }));
            None
        } else {
            warn!(
                event = "integrity_downgraded",
                "Integrity checking disabled, sending without a content hash"
            );
            self.state = SenderState::AwaitingAck;
            self.header()
        }
    }

    /// Resolves when the background hash finishes. Pending forever when
    /// nothing is being hashed, so it can sit in a `select!`.
    pub async fn wait_hash(&mut self) -> Result<String> {
        match self.hashing.as_mut() {
            Some(handle) => match handle.await {
                Ok(result) => result,
                Err(e) => Err(anyhow!("hash task failed: {e}")),
            },
            None => std::future::pending().await,
        }
    }

    /// Feed the hash result back in. `Ok` carries the header to send.
    pub fn on_hashed(&mut self, result: Result<String>) -> Result<ControlMessage, SendOutcome> {
        self.hashing = None;
        if self.state != SenderState::Hashing {
            return Err(self.fail("hash result without a pending file".into()));
        }
        match result {
            Ok(hash) => {
                if let Some(active) = self.active.as_mut() {
                    active.hash = hash;
                }
                self.state = SenderState::AwaitingAck;
                self.header().ok_or_else(|| self.fail("no active transfer".into()))
            }
            Err(e) => Err(self.fail(format!("{e:#}"))),
        }
    }

    fn header(&self) -> Option<ControlMessage> {
        self.active.as_ref().map(|active| ControlMessage::Header {
            name: active.file.name.clone(),
            size: active.file.size,
            mime_type: active.file.mime_type.clone(),
            hash: active.hash.clone(),
            sender_label: self.sender_label.clone(),
            is_last: active.is_last,
        })
    }

    /// Peer's go-ahead. Opens the file at `offset` and starts streaming
    /// with `profile`'s chunk size.
    pub async fn on_resume_ack(
        &mut self,
        offset: u64,
        profile: TransferProfile,
    ) -> Option<SendOutcome> {
        if self.state != SenderState::AwaitingAck {
            warn!(event = "unexpected_resume_ack", offset, state = ?self.state, "Ignoring resume_ack");
            return None;
        }
        let active = self.active.as_mut()?;
        let size = active.file.size;
        let offset = if offset > size {
            warn!(event = "resume_offset_clamped", offset, size, "Resume offset beyond end of file");
            size
        } else {
            offset
        };
        let path = active.file.path.clone();

        let reader = match open_at(&path, offset).await {
            Ok(reader) => reader,
            Err(e) => return Some(self.fail(format!("cannot read {}: {e}", path.display()))),
        };

        if let Some(active) = self.active.as_mut() {
            active.offset = offset;
            active.streaming = true;
            info!(
                event = "file_send_start",
                name = %active.file.name,
                size,
                offset,
                chunk_size = profile.chunk_size,
                mode = %profile.mode,
                "Streaming file"
            );
        }
        self.reader = Some(reader);
        self.chunk_size = profile.chunk_size;
        self.throttle = ProgressThrottle::new(profile.ui_update_interval);
        self.started = Instant::now();
        self.sent_bytes = 0;
        self.paused = false;
        self.state = SenderState::Streaming;
        None
    }

    /// Whether the session should call [`Sender::step`] this turn.
    pub fn wants_chunk(&self) -> bool {
        self.state == SenderState::Streaming
            && !self.paused
            && self.active.as_ref().is_some_and(|a| a.streaming)
    }

    /// Send one chunk.
    pub async fn step(&mut self, transport: &mut dyn Transport) -> ChunkStep {
        if !self.wants_chunk() {
            return ChunkStep::Idle;
        }
        let (Some(active), Some(reader)) = (self.active.as_mut(), self.reader.as_mut()) else {
            return ChunkStep::Idle;
        };

        let size = active.file.size;
        let remaining = size - active.offset;
        if remaining == 0 {
            return ChunkStep::Finished(self.complete());
        }

        let len = remaining.min(self.chunk_size as u64) as usize;
        let mut buf = vec![0u8; len];
        if let Err(e) = reader.read_exact(&mut buf).await {
            return ChunkStep::Finished(self.fail(format!("read failed: {e}")));
        }

        let accepted = match transport.write(encode_chunk_frame(&buf)) {
            Ok(accepted) => accepted,
            Err(e) => return ChunkStep::Finished(self.fail(e.to_string())),
        };

        active.offset += len as u64;
        let offset = active.offset;
        self.sent_bytes += len as u64;
        self.chunks_sent += 1;

        if offset >= size {
            return ChunkStep::Finished(self.complete());
        }

        let progress = self.throttle.ready(Instant::now()).then(|| Progress {
            file_name: active.file.name.clone(),
            percent: percent(offset, size),
            speed_label: speed_label(self.sent_bytes, self.started),
        });

        if accepted {
            ChunkStep::Continue(progress)
        } else {
            debug!(event = "backpressure_pause", offset, "Transport full, waiting for drain");
            self.paused = true;
            ChunkStep::Paused(progress)
        }
    }

    /// Transport drained. Returns `true` if this un-paused the sender.
    pub fn on_drain(&mut self) -> bool {
        if !self.paused {
            return false;
        }
        self.paused = false;
        debug!(event = "backpressure_resume", "Transport drained");
        self.state == SenderState::Streaming
    }

    /// Peer declined `file_name`. Ignored unless it names the active file.
    pub fn on_rejected(&mut self, file_name: &str) -> Option<SendOutcome> {
        let matches = self.state.is_busy()
            && self.active.as_ref().is_some_and(|a| a.file.name == file_name);
        if !matches {
            warn!(event = "stale_rejection", file_name, "Rejection for a file we are not sending");
            return None;
        }
        self.stop_io();
        self.active = None;
        self.state = SenderState::Rejected;
        info!(event = "file_rejected", file_name, "Peer rejected file");
        Some(SendOutcome::Rejected {
            file_name: file_name.to_string(),
        })
    }

    /// Stop immediately; no further frames are written. Returns the file
    /// that was in flight, if any. Idempotent.
    pub fn cancel(&mut self) -> Option<OutgoingFile> {
        if !self.state.is_busy() {
            return None;
        }
        self.stop_io();
        self.state = SenderState::Idle;
        let mut active = self.active.take()?;
        active.streaming = false;
        info!(
            event = "file_send_cancelled",
            name = %active.file.name,
            offset = active.offset,
            "Send stopped"
        );
        Some(active.file)
    }

    fn stop_io(&mut self) {
        if let Some(handle) = self.hashing.take() {
            handle.abort();
        }
        if let Some(active) = self.active.as_mut() {
            active.streaming = false;
        }
        self.reader = None;
        self.paused = false;
    }

    fn complete(&mut self) -> SendOutcome {
        let Some(active) = self.active.take() else {
            return self.fail("completed without an active transfer".into());
        };
        self.stop_io();
        self.state = SenderState::Completed;
        let speed = speed_mib_per_sec(self.sent_bytes, self.started.elapsed());
        info!(
            event = "file_sent",
            name = %active.file.name,
            size = active.file.size,
            chunks = self.chunks_sent,
            speed_mib_s = speed,
            "File sent"
        );
        SendOutcome::Completed(TransferRecord::new(
            &active.file.name,
            active.file.size,
            speed,
            TransferStatus::Sent,
        ))
    }

    fn fail(&mut self, reason: String) -> SendOutcome {
        self.stop_io();
        self.state = SenderState::Failed;
        let (name, size) = self
            .active
            .take()
            .map(|a| (a.file.name, a.file.size))
            .unwrap_or_default();
        warn!(event = "file_send_failed", name = %name, reason = %reason, "Send failed");
        SendOutcome::Failed {
            record: TransferRecord::new(&name, size, 0.0, TransferStatus::Failed),
            reason,
        }
    }
}

async fn open_at(path: &Path, offset: u64) -> std::io::Result<tokio::fs::File> {
    let mut file = tokio::fs::File::open(path).await?;
    file.seek(SeekFrom::Start(offset)).await?;
    Ok(file)
}
