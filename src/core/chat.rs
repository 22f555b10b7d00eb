//! Chat channel: short text messages sharing the transport with file data.

use serde::Serialize;
use std::collections::VecDeque;
use tracing::debug;
use uuid::Uuid;

use crate::core::config::{MAX_CHAT_HISTORY, MAX_CHAT_MESSAGE_BYTES};
use crate::core::error::{EngineError, EngineResult};
use crate::core::protocol::ControlMessage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatEntry {
    pub id: Uuid,
    pub text: String,
    pub is_me: bool,
    /// Unix milliseconds, as stamped by the author.
    pub timestamp: i64,
}

#[derive(Debug, Default)]
pub struct ChatChannel {
    history: VecDeque<ChatEntry>,
}

impl ChatChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and record an outgoing message; returns the frame to send.
    pub fn compose(&mut self, text: &str, now_ms: i64) -> EngineResult<(ControlMessage, ChatEntry)> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EngineError::EmptyChat);
        }
        if text.len() > MAX_CHAT_MESSAGE_BYTES {
            return Err(EngineError::ChatTooLong(text.len()));
        }
        let entry = self.push(text.to_string(), true, now_ms);
        Ok((
            ControlMessage::Chat {
                text: entry.text.clone(),
                timestamp: now_ms,
            },
            entry,
        ))
    }

    /// Record a message from the peer.
    pub fn on_message(&mut self, text: String, timestamp: i64) -> ChatEntry {
        debug!(event = "chat_received", len = text.len(), "Chat message");
        self.push(text, false, timestamp)
    }

    fn push(&mut self, text: String, is_me: bool, timestamp: i64) -> ChatEntry {
        let entry = ChatEntry {
            id: Uuid::new_v4(),
            text,
            is_me,
            timestamp,
        };
        if self.history.len() >= MAX_CHAT_HISTORY {
            self.history.pop_front();
        }
        self.history.push_back(entry.clone());
        entry
    }

    pub fn history(&self) -> impl Iterator<Item = &ChatEntry> {
        self.history.iter()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }
}
