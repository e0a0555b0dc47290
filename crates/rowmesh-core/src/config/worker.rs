use serde::{Deserialize, Serialize};

use super::env_parse;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfigFile {
    pub coordinator_addr: String,
    /// Empty means a generated `worker-<uuid>` id.
    pub worker_id: String,
    pub register_timeout_ms: u64,
}

impl Default for WorkerConfigFile {
    fn default() -> Self {
        Self {
            coordinator_addr: "127.0.0.1:5000".to_string(),
            worker_id: String::new(),
            register_timeout_ms: 5_000,
        }
    }
}

impl WorkerConfigFile {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ROWMESH_COORDINATOR_ADDR") {
            self.coordinator_addr = val;
        }
        if let Ok(val) = std::env::var("ROWMESH_WORKER_ID") {
            self.worker_id = val;
        }
        if let Some(v) = env_parse("ROWMESH_REGISTER_TIMEOUT_MS") {
            self.register_timeout_ms = v;
        }
    }
}
