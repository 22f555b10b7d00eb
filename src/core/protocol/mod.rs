//! Wire protocol: control messages and the frame envelope.
//!
//! Control messages are JSON objects with a `type` discriminator; file
//! bytes travel as untyped binary chunks. Both share one transport and are
//! told apart by a one-byte tag (see [`codec`]).

pub mod codec;
pub mod message;

pub use codec::{Frame, classify, decode_control, encode_chunk_frame, encode_control_frame};
pub use message::ControlMessage;
