use std::time::Duration;

use rowmesh_codec::ChannelError;
use rowmesh_core::{CodecError, MessageType, ProtocolError, TransportError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("No WORKER_ACK within {0:?}")]
    RegistrationTimeout(Duration),

    #[error("Worker not registered with coordinator")]
    NotRegistered,

    #[error("Unexpected message from coordinator: {0}")]
    UnexpectedMessage(MessageType),

    #[error("Row has {row_len} values but the right-hand matrix has {rhs_rows} rows")]
    DimensionMismatch { row_len: usize, rhs_rows: usize },

    #[error("Arithmetic overflow computing column {column}")]
    Overflow { column: usize },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::RegistrationTimeout(_))
    }
}

impl From<ChannelError> for WorkerError {
    fn from(err: ChannelError) -> Self {
        match err {
            ChannelError::Transport(e) => Self::Transport(e),
            ChannelError::Codec(e) => Self::Codec(e),
        }
    }
}
