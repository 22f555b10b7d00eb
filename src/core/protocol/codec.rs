//! Frame codec: the one-byte envelope shared by control and chunk frames.
//!
//! Every frame on the transport is:
//!
//!   [1 byte: frame_type] [N bytes: payload]
//!
//! Frame types:
//!   0x01 = Control (JSON-encoded ControlMessage)
//!   0x02 = Chunk   (raw file bytes, in stream order)
//!
//! The tag is fixed at encode time, so a chunk whose bytes happen to look
//! like JSON is never mistaken for a control message.

use bytes::{BufMut, Bytes, BytesMut};

use super::message::ControlMessage;
use crate::core::error::{EngineError, EngineResult};

/// Frame type marker for control messages.
pub const FRAME_CONTROL: u8 = 0x01;

/// Frame type marker for binary chunk data.
pub const FRAME_CHUNK: u8 = 0x02;

/// An inbound frame with its envelope removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Still-encoded control payload; see [`decode_control`].
    Control(Bytes),
    /// Raw file bytes.
    Chunk(Bytes),
}

/// Encode a control frame: `[0x01][json bytes]`.
pub fn encode_control_frame(msg: &ControlMessage) -> EngineResult<Bytes> {
    let json = serde_json::to_vec(msg)?;
    let mut buf = BytesMut::with_capacity(1 + json.len());
    buf.put_u8(FRAME_CONTROL);
    buf.extend_from_slice(&json);
    Ok(buf.freeze())
}

/// Encode a chunk frame: `[0x02][payload]`.
pub fn encode_chunk_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + payload.len());
    buf.put_u8(FRAME_CHUNK);
    buf.extend_from_slice(payload);
    buf.freeze()
}

/// Split the envelope off an inbound frame without copying the payload.
pub fn classify(frame: Bytes) -> EngineResult<Frame> {
    let tag = *frame.first().ok_or(EngineError::EmptyFrame)?;
    let payload = frame.slice(1..);
    match tag {
        FRAME_CONTROL => Ok(Frame::Control(payload)),
        FRAME_CHUNK => Ok(Frame::Chunk(payload)),
        other => Err(EngineError::UnknownFrameTag(other)),
    }
}

/// Decode the payload of a [`Frame::Control`].
pub fn decode_control(payload: &[u8]) -> EngineResult<ControlMessage> {
    Ok(serde_json::from_slice(payload)?)
}
