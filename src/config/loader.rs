use super::types::DetectorConfig;
use anyhow::{Context, Result};
use config::{Config, Environment, File};

/// Environment variable prefix, e.g. `FAD_WINDOW_SECONDS=30`, `FAD_KAFKA__ANOMALY_TOPIC=x`
pub const ENV_PREFIX: &str = "FAD";

/// Configuration loader with builder pattern
pub struct ConfigLoader {
    config_file: Option<String>,
    load_env: bool,
    env_prefix: String,
}

impl ConfigLoader {
    /// Create a new configuration loader
    pub fn new() -> Self {
        Self {
            config_file: None,
            load_env: false,
            env_prefix: ENV_PREFIX.to_string(),
        }
    }

    /// Load configuration from file
    pub fn load_from_file(mut self, path: Option<&str>) -> Self {
        self.config_file = path.map(String::from);
        self
    }

    /// Load configuration from environment variables
    pub fn load_from_env(mut self) -> Self {
        self.load_env = true;
        self
    }

    /// Read environment variables under `prefix` instead of [`ENV_PREFIX`]
    pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.env_prefix = prefix.into();
        self
    }

    /// Build and validate the final configuration
    pub fn build(self) -> Result<DetectorConfig> {
        // Defaults come from `#[serde(default)]`. Source keys contain dots and
        // must not go through key-path parsing.
        let mut builder = Config::builder();

        if let Some(config_path) = &self.config_file {
            // An explicitly named file must exist
            builder = builder.add_source(File::with_name(config_path).required(true));
        } else {
            builder = builder
                .add_source(File::with_name("firewall-anomaly-detector").required(false))
                .add_source(File::with_name("config/firewall-anomaly-detector").required(false));
        }

        if self.load_env {
            builder = builder.add_source(
                Environment::with_prefix(&self.env_prefix)
                    .prefix_separator("_")
                    .separator("__"),
            );
        }

        let config: DetectorConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config
            .validate_all()
            .context("Configuration failed validation")?;

        Ok(config)
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
