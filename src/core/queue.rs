//! Transfer queue: the FIFO of files waiting for the one sender.
//!
//! The queue is the only caller of [`Sender::start`](crate::core::pipeline::sender::Sender::start):
//! it hands out one file at a time, marks the final entry `is_last`, and
//! advances on every sender outcome (sent, rejected, failed) so a single
//! bad file never blocks the rest.

use std::collections::VecDeque;
use tracing::{debug, info};

use crate::core::pipeline::sender::OutgoingFile;

/// Next thing the session should do with the sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueStep {
    Start { file: OutgoingFile, is_last: bool },
    /// Nothing left; the queue as a whole is complete.
    Drained,
}

#[derive(Debug, Default)]
pub struct TransferQueue {
    pending: VecDeque<OutgoingFile>,
    in_flight: bool,
    /// Files finished (any outcome) since the queue last went idle.
    finished: usize,
}

impl TransferQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append files. Returns the first file to start when the queue was idle.
    pub fn enqueue(&mut self, files: Vec<OutgoingFile>) -> Option<QueueStep> {
        info!(event = "files_enqueued", count = files.len(), "Files queued");
        self.pending.extend(files);
        if self.in_flight {
            return None;
        }
        self.finished = 0;
        match self.process_next() {
            QueueStep::Drained => None,
            step => Some(step),
        }
    }

    /// Pop the front file. `is_last` is true when it was the only one left.
    pub fn process_next(&mut self) -> QueueStep {
        let is_last = self.pending.len() == 1;
        match self.pending.pop_front() {
            Some(file) => {
                self.in_flight = true;
                debug!(event = "queue_next", name = %file.name, is_last, remaining = self.pending.len(), "Starting next file");
                QueueStep::Start { file, is_last }
            }
            None => {
                self.in_flight = false;
                QueueStep::Drained
            }
        }
    }

    /// The in-flight file finished, however it ended.
    pub fn on_finished(&mut self) -> QueueStep {
        if self.in_flight {
            self.finished += 1;
        }
        self.in_flight = false;
        let step = self.process_next();
        if step == QueueStep::Drained {
            info!(event = "queue_complete", files = self.finished, "Transfer queue complete");
        }
        step
    }

    /// Files waiting, plus the one in flight.
    pub fn depth(&self) -> usize {
        self.pending.len() + usize::from(self.in_flight)
    }

    pub fn is_idle(&self) -> bool {
        !self.in_flight && self.pending.is_empty()
    }

    /// Stop: forget the in-flight marker and hand back everything unsent.
    pub fn drain_unsent(&mut self) -> Vec<OutgoingFile> {
        self.in_flight = false;
        self.pending.drain(..).collect()
    }
}
