use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{CodecError, ProtocolError};

pub const PROTOCOL_MAGIC: &str = "CSM218";
pub const PROTOCOL_VERSION: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    RegisterWorker,
    WorkerAck,
    RpcRequest,
    TaskComplete,
    Heartbeat,
    HeartbeatAck,
}

impl MessageType {
    pub const ALL: [Self; 6] = [
        Self::RegisterWorker,
        Self::WorkerAck,
        Self::RpcRequest,
        Self::TaskComplete,
        Self::Heartbeat,
        Self::HeartbeatAck,
    ];

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::RegisterWorker => "REGISTER_WORKER",
            Self::WorkerAck => "WORKER_ACK",
            Self::RpcRequest => "RPC_REQUEST",
            Self::TaskComplete => "TASK_COMPLETE",
            Self::Heartbeat => "HEARTBEAT",
            Self::HeartbeatAck => "HEARTBEAT_ACK",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageType {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| CodecError::UnknownMessageType(s.to_string()))
    }
}

/// One protocol message. Construction through [`Frame::new`] always yields a
/// valid frame; frames read off the wire must pass [`Frame::validate`] before
/// they are acted upon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub magic: String,
    pub version: i32,
    pub message_type: MessageType,
    pub sender: String,
    pub timestamp: i64,
    pub payload: Vec<u8>,
}

impl Frame {
    #[must_use]
    pub fn new(message_type: MessageType, sender: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            magic: PROTOCOL_MAGIC.to_string(),
            version: PROTOCOL_VERSION,
            message_type,
            sender: sender.into(),
            timestamp: now_millis(),
            payload,
        }
    }

    #[must_use]
    pub fn empty(message_type: MessageType, sender: impl Into<String>) -> Self {
        Self::new(message_type, sender, Vec::new())
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn validate(&self) -> Result<(), ProtocolError> {
        if self.magic != PROTOCOL_MAGIC {
            return Err(ProtocolError::InvalidMagic(self.magic.clone()));
        }
        if self.version != PROTOCOL_VERSION {
            return Err(ProtocolError::UnsupportedVersion(self.version));
        }
        if self.sender.is_empty() {
            return Err(ProtocolError::EmptySender);
        }
        if self.timestamp <= 0 {
            return Err(ProtocolError::InvalidTimestamp(self.timestamp));
        }
        Ok(())
    }
}

fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(1, |d| i64::try_from(d.as_millis()).unwrap_or(i64::MAX))
}
