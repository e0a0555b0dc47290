use std::net::SocketAddr;
use std::time::Duration;

use rowmesh_core::{ConfigError, CoordinatorConfigFile, TransportConfigFile};
use rowmesh_transport_tcp::TcpConfig;

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    pub listen_addr: SocketAddr,
    /// Sender tag stamped on every frame the coordinator emits.
    pub node_tag: String,
    pub heartbeat_interval: Duration,
    pub liveness_timeout: Duration,
    pub task_timeout: Duration,
    pub sweep_interval: Duration,
    pub connect_wait: Duration,
    pub job_deadline: Duration,
    pub max_connections: usize,
    pub tcp: TcpConfig,
}

impl CoordinatorConfig {
    #[must_use]
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Self::default()
        }
    }

    pub fn from_file(
        coordinator: &CoordinatorConfigFile,
        transport: &TransportConfigFile,
    ) -> Result<Self, ConfigError> {
        let listen_addr =
            coordinator
                .listen_addr
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "coordinator.listen_addr".to_string(),
                    reason: format!(
                        "'{}' is not a valid socket address",
                        coordinator.listen_addr
                    ),
                })?;

        Ok(Self::new(listen_addr)
            .with_node_tag(coordinator.node_tag.as_str())
            .with_heartbeat_interval(Duration::from_millis(coordinator.heartbeat_interval_ms))
            .with_liveness_timeout(Duration::from_millis(coordinator.liveness_timeout_ms))
            .with_task_timeout(Duration::from_millis(coordinator.task_timeout_ms))
            .with_sweep_interval(Duration::from_millis(coordinator.sweep_interval_ms))
            .with_connect_wait(Duration::from_millis(coordinator.connect_wait_ms))
            .with_job_deadline(Duration::from_millis(coordinator.job_deadline_ms))
            .with_max_connections(coordinator.max_connections)
            .with_tcp(TcpConfig::from(transport)))
    }

    #[must_use]
    pub const fn with_listen_addr(mut self, addr: SocketAddr) -> Self {
        self.listen_addr = addr;
        self
    }

    #[must_use]
    pub fn with_node_tag(mut self, tag: impl Into<String>) -> Self {
        self.node_tag = tag.into();
        self
    }

    #[must_use]
    pub const fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_liveness_timeout(mut self, timeout: Duration) -> Self {
        self.liveness_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_task_timeout(mut self, timeout: Duration) -> Self {
        self.task_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = interval;
        self
    }

    #[must_use]
    pub const fn with_connect_wait(mut self, wait: Duration) -> Self {
        self.connect_wait = wait;
        self
    }

    #[must_use]
    pub const fn with_job_deadline(mut self, deadline: Duration) -> Self {
        self.job_deadline = deadline;
        self
    }

    #[must_use]
    pub const fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    #[must_use]
    pub fn with_tcp(mut self, tcp: TcpConfig) -> Self {
        self.tcp = tcp;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let non_zero = [
            ("heartbeat_interval", self.heartbeat_interval),
            ("task_timeout", self.task_timeout),
            ("sweep_interval", self.sweep_interval),
            ("job_deadline", self.job_deadline),
        ];
        for (key, value) in non_zero {
            if value.is_zero() {
                return Err(ConfigError::InvalidValue {
                    key: key.to_string(),
                    reason: "must be greater than zero".to_string(),
                });
            }
        }
        if self.liveness_timeout < self.heartbeat_interval * 2 {
            return Err(ConfigError::InvalidValue {
                key: "liveness_timeout".to_string(),
                reason: format!(
                    "{:?} is less than twice the heartbeat interval {:?}",
                    self.liveness_timeout, self.heartbeat_interval
                ),
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::InvalidValue {
                key: "max_connections".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if self.node_tag.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "node_tag".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 5000)),
            node_tag: "coordinator".to_string(),
            heartbeat_interval: Duration::from_secs(5),
            liveness_timeout: Duration::from_secs(10),
            task_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(1),
            connect_wait: Duration::from_secs(5),
            job_deadline: Duration::from_secs(30),
            max_connections: 64,
            tcp: TcpConfig::default(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = CoordinatorConfig::default();
        assert_eq!(config.listen_addr.port(), 5000);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(5));
        assert_eq!(config.liveness_timeout, Duration::from_secs(10));
        assert_eq!(config.connect_wait, Duration::from_secs(5));
        assert_eq!(config.job_deadline, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn builder_pattern() {
        let addr = SocketAddr::from(([127, 0, 0, 1], 8080));
        let config = CoordinatorConfig::new(addr)
            .with_node_tag("master")
            .with_heartbeat_interval(Duration::from_millis(100))
            .with_liveness_timeout(Duration::from_millis(250))
            .with_max_connections(2);

        assert_eq!(config.listen_addr, addr);
        assert_eq!(config.node_tag, "master");
        assert_eq!(config.heartbeat_interval, Duration::from_millis(100));
        assert_eq!(config.max_connections, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn liveness_must_cover_two_heartbeats() {
        let config = CoordinatorConfig::default()
            .with_heartbeat_interval(Duration::from_secs(5))
            .with_liveness_timeout(Duration::from_secs(9));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key, .. }) if key == "liveness_timeout"
        ));
    }

    #[test]
    fn from_file_defaults_match_runtime_defaults() {
        let config = CoordinatorConfig::from_file(
            &CoordinatorConfigFile::default(),
            &TransportConfigFile::default(),
        )
        .expect("defaults are valid");
        let runtime = CoordinatorConfig::default();

        assert_eq!(config.listen_addr, runtime.listen_addr);
        assert_eq!(config.node_tag, runtime.node_tag);
        assert_eq!(config.heartbeat_interval, runtime.heartbeat_interval);
        assert_eq!(config.liveness_timeout, runtime.liveness_timeout);
        assert_eq!(config.task_timeout, runtime.task_timeout);
        assert_eq!(config.job_deadline, runtime.job_deadline);
        assert_eq!(config.max_connections, runtime.max_connections);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn from_file_rejects_bad_address() {
        let file = CoordinatorConfigFile {
            listen_addr: "localhost".to_string(),
            ..CoordinatorConfigFile::default()
        };
        assert!(matches!(
            CoordinatorConfig::from_file(&file, &TransportConfigFile::default()),
            Err(ConfigError::InvalidValue { key, .. }) if key == "coordinator.listen_addr"
        ));
    }

    #[test]
    fn zero_connections_rejected() {
        let config = CoordinatorConfig::default().with_max_connections(0);
        assert!(config.validate().is_err());
    }
}
