use config::{builder::DefaultState, ConfigBuilder, ConfigError, Environment, File};
use serde::Deserialize;
use std::time::Duration;

use shared::messaging::BrokerSettings;
use shared::observability::LogConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    pub pulsar: BrokerSettings,
    #[serde(default)]
    pub consumers: ConsumerConfig,
    #[serde(default)]
    pub logging: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub single_enabled: bool,
    pub multi_enabled: bool,
    /// Pause after a failed fan-out iteration before receiving again
    pub error_backoff_ms: u64,
    /// How long shutdown waits for the consumer loops to exit
    pub shutdown_grace_secs: u64,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            single_enabled: true,
            multi_enabled: true,
            error_backoff_ms: 1000,
            shutdown_grace_secs: 10,
        }
    }
}

impl ConsumerConfig {
    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

impl Config {
    /// Load `config/default`, then the file named by `CONFIG_FILE`, then
    /// `APP__`-prefixed environment variables such as `APP__PULSAR__URL`.
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder()
            .add_source(File::with_name("config/default").required(false));

        if let Ok(path) = std::env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&path));
        }

        Self::from_builder(builder.add_source(Environment::with_prefix("APP").separator("__")))
    }

    fn from_builder(builder: ConfigBuilder<DefaultState>) -> Result<Self, ConfigError> {
        let config: Self = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Refuse to start without a usable broker configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        let required = [
            ("pulsar.url", &self.pulsar.url),
            ("pulsar.topic", &self.pulsar.topic),
            ("pulsar.subscription_name", &self.pulsar.subscription_name),
            ("pulsar.topic1", &self.pulsar.topic1),
            ("pulsar.topic2", &self.pulsar.topic2),
        ];

        for (key, value) in required {
            if value.trim().is_empty() {
                return Err(ConfigError::Message(format!("{} must not be empty", key)));
            }
        }

        Ok(())
    }
}
