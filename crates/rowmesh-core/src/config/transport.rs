use serde::{Deserialize, Serialize};

use super::env_parse;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfigFile {
    pub max_message_size: usize,
    pub connect_timeout_ms: u64,
    /// Zero disables the timeout.
    pub read_timeout_ms: u64,
    /// Zero disables the timeout.
    pub write_timeout_ms: u64,
    pub nodelay: bool,
}

impl Default for TransportConfigFile {
    fn default() -> Self {
        Self {
            max_message_size: 16 * 1024 * 1024,
            connect_timeout_ms: 5_000,
            read_timeout_ms: 0,
            write_timeout_ms: 10_000,
            nodelay: true,
        }
    }
}

impl TransportConfigFile {
    pub fn apply_env_overrides(&mut self) {
        if let Some(v) = env_parse("ROWMESH_TRANSPORT_MAX_MESSAGE_SIZE") {
            self.max_message_size = v;
        }
        if let Some(v) = env_parse("ROWMESH_TRANSPORT_CONNECT_TIMEOUT_MS") {
            self.connect_timeout_ms = v;
        }
        if let Some(v) = env_parse("ROWMESH_TRANSPORT_READ_TIMEOUT_MS") {
            self.read_timeout_ms = v;
        }
        if let Some(v) = env_parse("ROWMESH_TRANSPORT_WRITE_TIMEOUT_MS") {
            self.write_timeout_ms = v;
        }
        if let Some(v) = env_parse("ROWMESH_TRANSPORT_NODELAY") {
            self.nodelay = v;
        }
    }
}
