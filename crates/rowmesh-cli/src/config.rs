use std::path::{Path, PathBuf};

use rowmesh_coordinator::CoordinatorConfig;
use rowmesh_core::{ConfigError, RowmeshConfig};
use rowmesh_worker::WorkerConfig;

pub trait RowmeshConfigLoader: Sized {
    /// Load configuration from the given path, or from default locations if `None`.
    fn load(path: Option<&Path>) -> Result<Self, ConfigError>;

    /// Load configuration from a specific file path.
    fn from_file(path: &Path) -> Result<Self, ConfigError>;

    /// Validate the configuration values.
    fn validate(&self) -> Result<(), ConfigError>;

    fn to_toml(&self) -> Result<String, ConfigError>;

    /// Generate a default configuration file with a header comment.
    fn generate_default_config() -> String;
}

impl RowmeshConfigLoader for RowmeshConfig {
    fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(p) = path {
            Self::from_file(p)?
        } else {
            load_from_default_locations()?
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.to_path_buf())
            } else {
                ConfigError::ParseError(format!("Failed to read config file: {e}"))
            }
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        CoordinatorConfig::from_file(&self.coordinator, &self.transport)?.validate()?;
        WorkerConfig::from_file(&self.worker, &self.transport)?.validate()?;

        if self.transport.max_message_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "transport.max_message_size".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }

        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                reason: format!("'{}' is not a valid log filter", self.logging.level),
            });
        }

        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                reason: format!("must be one of: {}", valid_formats.join(", ")),
            });
        }

        Ok(())
    }

    fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    fn generate_default_config() -> String {
        let config = Self::default();
        let toml_str = toml::to_string_pretty(&config).unwrap_or_default();

        format!(
            "# rowmesh configuration file\n\
             # Durations are in milliseconds. Every key can be overridden\n\
             # with a ROWMESH_* environment variable.\n\
             \n\
             {toml_str}"
        )
    }
}

fn load_from_default_locations() -> Result<RowmeshConfig, ConfigError> {
    let local_config = PathBuf::from("rowmesh.toml");
    if local_config.exists() {
        return RowmeshConfig::from_file(&local_config);
    }

    if let Some(config_dir) = dirs::config_dir() {
        let user_config = config_dir.join("rowmesh").join("config.toml");
        if user_config.exists() {
            return RowmeshConfig::from_file(&user_config);
        }
    }

    Ok(RowmeshConfig::default())
}
