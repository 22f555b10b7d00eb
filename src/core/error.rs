//! Engine error taxonomy.
//!
//! Only [`EngineError::TransportSetup`] ends a session attempt for good.
//! Everything else is reported, logged, and the session carries on (or,
//! for a closed transport, tears down its room state).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// The transport could not be constructed. Surfaced to the user, no retry.
    #[error("could not establish transport: {0}")]
    TransportSetup(String),

    /// A send or write was attempted on a transport that is already closed.
    #[error("transport closed")]
    TransportClosed,

    /// Inbound frame carried no bytes at all.
    #[error("empty frame")]
    EmptyFrame,

    /// Inbound frame started with a tag byte we do not know.
    #[error("unknown frame tag 0x{0:02x}")]
    UnknownFrameTag(u8),

    /// Control frame payload was not a valid control message.
    #[error("malformed control message: {0}")]
    MalformedControl(#[from] serde_json::Error),

    /// Chat text was empty after trimming.
    #[error("chat message is empty")]
    EmptyChat,

    /// Chat text exceeded the size limit.
    #[error("chat message too long ({0} bytes)")]
    ChatTooLong(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Whether this error ends the session attempt instead of being absorbed.
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::TransportSetup(_))
    }
}

pub type EngineResult<T> = Result<T, EngineError>;
