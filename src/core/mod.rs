pub mod chat;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod pipeline;
pub mod probe;
pub mod protocol;
pub mod queue;
pub mod rendezvous;
pub mod session;
pub mod sink;
pub mod transport;
