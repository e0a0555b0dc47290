use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfigFile {
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
}

impl Default for LoggingConfigFile {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl LoggingConfigFile {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("ROWMESH_LOG") {
            self.level = val;
        }
        if let Ok(val) = std::env::var("ROWMESH_LOG_FORMAT") {
            self.format = val;
        }
    }
}
