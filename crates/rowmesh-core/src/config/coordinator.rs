use serde::{Deserialize, Serialize};

use super::env_parse;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfigFile {
    pub listen_addr: String,
    pub node_tag: String,
    pub heartbeat_interval_ms: u64,
    pub liveness_timeout_ms: u64,
    pub task_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub connect_wait_ms: u64,
    pub job_deadline_ms: u64,
    pub max_connections: usize,
}

impl Default for CoordinatorConfigFile {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5000".to_string(),
            node_tag: "coordinator".to_string(),
            heartbeat_interval_ms: 5_000,
            liveness_timeout_ms: 10_000,
            task_timeout_ms: 10_000,
            sweep_interval_ms: 1_000,
            connect_wait_ms: 5_000,
            job_deadline_ms: 30_000,
            max_connections: 64,
        }
    }
}

impl CoordinatorConfigFile {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ROWMESH_LISTEN_ADDR") {
            self.listen_addr = val;
        }
        if let Ok(val) = std::env::var("ROWMESH_NODE_TAG") {
            self.node_tag = val;
        }
        if let Some(v) = env_parse("ROWMESH_HEARTBEAT_INTERVAL_MS") {
            self.heartbeat_interval_ms = v;
        }
        if let Some(v) = env_parse("ROWMESH_LIVENESS_TIMEOUT_MS") {
            self.liveness_timeout_ms = v;
        }
        if let Some(v) = env_parse("ROWMESH_TASK_TIMEOUT_MS") {
            self.task_timeout_ms = v;
        }
        if let Some(v) = env_parse("ROWMESH_CONNECT_WAIT_MS") {
            self.connect_wait_ms = v;
        }
        if let Some(v) = env_parse("ROWMESH_JOB_DEADLINE_MS") {
            self.job_deadline_ms = v;
        }
        if let Some(v) = env_parse("ROWMESH_MAX_CONNECTIONS") {
            self.max_connections = v;
        }
    }
}
