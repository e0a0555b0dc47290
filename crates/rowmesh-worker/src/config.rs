use std::net::SocketAddr;
use std::time::Duration;

use rowmesh_core::{ConfigError, TransportConfigFile, WorkerConfigFile};
use rowmesh_transport_tcp::TcpConfig;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub coordinator_addr: SocketAddr,
    pub worker_id: String,
    /// How long to wait for `WORKER_ACK` after sending `REGISTER_WORKER`.
    pub register_timeout: Duration,
    pub tcp: TcpConfig,
}

impl WorkerConfig {
    #[must_use]
    pub fn new(coordinator_addr: SocketAddr) -> Self {
        Self {
            coordinator_addr,
            ..Self::default()
        }
    }

    /// Builds a runtime config from the `[worker]` and `[transport]` file
    /// sections. An empty `worker_id` keeps the generated one.
    pub fn from_file(
        worker: &WorkerConfigFile,
        transport: &TransportConfigFile,
    ) -> Result<Self, ConfigError> {
        let coordinator_addr =
            worker
                .coordinator_addr
                .parse()
                .map_err(|_| ConfigError::InvalidValue {
                    key: "worker.coordinator_addr".to_string(),
                    reason: format!(
                        "'{}' is not a valid socket address",
                        worker.coordinator_addr
                    ),
                })?;

        let mut config = Self::new(coordinator_addr)
            .with_register_timeout(Duration::from_millis(worker.register_timeout_ms))
            .with_tcp(TcpConfig::from(transport));
        if !worker.worker_id.is_empty() {
            config = config.with_worker_id(worker.worker_id.as_str());
        }
        Ok(config)
    }

    #[must_use]
    pub const fn with_coordinator_addr(mut self, addr: SocketAddr) -> Self {
        self.coordinator_addr = addr;
        self
    }

    #[must_use]
    pub fn with_worker_id(mut self, worker_id: impl Into<String>) -> Self {
        self.worker_id = worker_id.into();
        self
    }

    #[must_use]
    pub const fn with_register_timeout(mut self, timeout: Duration) -> Self {
        self.register_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_tcp(mut self, tcp: TcpConfig) -> Self {
        self.tcp = tcp;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_id.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "worker_id".to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if self.worker_id.len() > usize::from(u16::MAX) {
            return Err(ConfigError::InvalidValue {
                key: "worker_id".to_string(),
                reason: "longer than a frame string field allows".to_string(),
            });
        }
        if self.register_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "register_timeout".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            coordinator_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            worker_id: format!("worker-{}", uuid::Uuid::new_v4().simple()),
            register_timeout: Duration::from_secs(5),
            tcp: TcpConfig::default(),
        }
    }
}
