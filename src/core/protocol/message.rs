//! Control messages: the typed half of the wire protocol.
//!
//! Every control message is one JSON object carrying a `type`
//! discriminator. Field names are camelCase on the wire.

use serde::{Deserialize, Serialize};

/// Control messages multiplexed over the transport next to binary chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    // ── File transfer ─────────────────────────────────────────────────────────
    /// Announces one file. Sent before any chunk of it (sender → receiver).
    #[serde(rename_all = "camelCase")]
    Header {
        name: String,
        size: u64,
        #[serde(default)]
        mime_type: String,
        /// Hex SHA3-256 of the whole file; empty when the sender could not hash.
        #[serde(default)]
        hash: String,
        #[serde(default)]
        sender_label: String,
        /// Final entry of the sender's queue.
        #[serde(default)]
        is_last: bool,
    },
    /// Receiver's go-ahead: stream from `offset` (receiver → sender).
    ResumeAck { offset: u64 },
    /// Receiver declined the announced file (receiver → sender).
    #[serde(rename_all = "camelCase")]
    TransferRejected { file_name: String },

    // ── Chat ──────────────────────────────────────────────────────────────────
    Chat { text: String, timestamp: i64 },

    // ── Latency probing ───────────────────────────────────────────────────────
    /// `time` is the sender's clock in milliseconds.
    Ping { time: i64 },
    /// Echo of [`ControlMessage::Ping`], `time` returned verbatim.
    Pong { time: i64 },

    // ── Session lifecycle ─────────────────────────────────────────────────────
    /// Either party asks both sides to stop the self-destruct countdown.
    #[serde(rename = "system_cancel_destruct")]
    CancelDestruct,
}

impl ControlMessage {
    /// Wire discriminator, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ControlMessage::Header { .. } => "header",
            ControlMessage::ResumeAck { .. } => "resume_ack",
            ControlMessage::TransferRejected { .. } => "transfer_rejected",
            ControlMessage::Chat { .. } => "chat",
            ControlMessage::Ping { .. } => "ping",
            ControlMessage::Pong { .. } => "pong",
            ControlMessage::CancelDestruct => "system_cancel_destruct",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_uses_camel_case_fields() {
        let msg = ControlMessage::Header {
            name: "a.txt".into(),
            size: 3,
            mime_type: "text/plain".into(),
            hash: "ab".into(),
            sender_label: "ghost-1".into(),
            is_last: true,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "header",
                "name": "a.txt",
                "size": 3,
                "mimeType": "text/plain",
                "hash": "ab",
                "senderLabel": "ghost-1",
                "isLast": true
            })
        );
    }

    #[test]
    fn cancel_destruct_has_system_tag_and_no_fields() {
        let value = serde_json::to_value(ControlMessage::CancelDestruct).unwrap();
        assert_eq!(value, json!({ "type": "system_cancel_destruct" }));
    }

    #[test]
    fn rejected_uses_file_name_field() {
        let parsed: ControlMessage =
            serde_json::from_str(r#"{"type":"transfer_rejected","fileName":"b.bin"}"#).unwrap();
        assert_eq!(
            parsed,
            ControlMessage::TransferRejected {
                file_name: "b.bin".into()
            }
        );
    }

    #[test]
    fn header_tolerates_missing_optional_fields() {
        let parsed: ControlMessage =
            serde_json::from_str(r#"{"type":"header","name":"x","size":10}"#).unwrap();
        match parsed {
            ControlMessage::Header { hash, is_last, .. } => {
                assert!(hash.is_empty());
                assert!(!is_last);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(serde_json::from_str::<ControlMessage>(r#"{"type":"nope"}"#).is_err());
    }
}
