mod coordinator;
mod logging;
mod transport;
mod worker;

pub use coordinator::CoordinatorConfigFile;
pub use logging::LoggingConfigFile;
pub use transport::TransportConfigFile;
pub use worker::WorkerConfigFile;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RowmeshConfig {
    pub coordinator: CoordinatorConfigFile,
    pub worker: WorkerConfigFile,
    pub transport: TransportConfigFile,
    pub logging: LoggingConfigFile,
}

impl RowmeshConfig {
    pub fn apply_env_overrides(&mut self) {
        self.coordinator.apply_env_overrides();
        self.worker.apply_env_overrides();
        self.transport.apply_env_overrides();
        self.logging.apply_env_overrides();
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let parsed: RowmeshConfig = toml::from_str(
            r#"
            [coordinator]
            listen_addr = "127.0.0.1:6000"

            [logging]
            level = "debug"
            "#,
        )
        .unwrap();
        assert_eq!(parsed.coordinator.listen_addr, "127.0.0.1:6000");
        assert_eq!(parsed.coordinator.heartbeat_interval_ms, 5_000);
        assert_eq!(parsed.logging.level, "debug");
        assert_eq!(parsed.logging.format, "pretty");
        assert_eq!(parsed.worker.coordinator_addr, "127.0.0.1:5000");
    }

    #[test]
    fn empty_file_is_default() {
        let parsed: RowmeshConfig = toml::from_str("").unwrap();
        let default = RowmeshConfig::default();
        assert_eq!(parsed.coordinator.job_deadline_ms, default.coordinator.job_deadline_ms);
        assert_eq!(parsed.transport.max_message_size, default.transport.max_message_size);
    }
}
