//! Application configuration.
//!
//! One `Config` covers both binaries. Each reads only the sections it needs.
//! Loaded from YAML files and `ORDERSTREAM__`-prefixed environment variables.

use std::time::Duration;

use serde::Deserialize;

use crate::bus::StartOffset;
use crate::order::{Catalog, CatalogError};
use crate::producer::PublisherLimits;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "orderstream.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "ORDERSTREAM_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "ORDERSTREAM";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "ORDERSTREAM_LOG";
/// Environment variable selecting the log output format (`json` or text).
pub const LOG_FORMAT_ENV_VAR: &str = "ORDERSTREAM_LOG_FORMAT";

/// Errors loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Invalid catalog: {0}")]
    Catalog(#[from] CatalogError),
}

/// Main application configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Broker connection settings.
    pub kafka: KafkaConfig,
    /// Producer cadence and buffering.
    pub producer: ProducerConfig,
    /// Consumer cursor settings.
    pub consumer: ConsumerConfig,
    /// Overrides for the built-in users/items.
    pub catalog: Option<CatalogConfig>,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `orderstream.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.kafka.bootstrap_servers.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "kafka.bootstrap_servers must not be empty".to_string(),
            ));
        }
        if self.producer.topic.is_empty() || self.consumer.topic.is_empty() {
            return Err(ConfigError::Invalid("topic must not be empty".to_string()));
        }
        if self.producer.interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "producer.interval_secs must be at least 1".to_string(),
            ));
        }
        let limits = self.producer.limits();
        if limits.input_buffer == 0 || limits.max_in_flight == 0 || limits.completion_buffer == 0 {
            return Err(ConfigError::Invalid(
                "producer buffers must be non-zero".to_string(),
            ));
        }
        if self.consumer.partition < 0 {
            return Err(ConfigError::Invalid(
                "consumer.partition must not be negative".to_string(),
            ));
        }
        if self.consumer.buffer == 0 {
            return Err(ConfigError::Invalid(
                "consumer.buffer must be non-zero".to_string(),
            ));
        }
        self.catalog()?;
        Ok(())
    }

    /// Catalog to generate orders from.
    pub fn catalog(&self) -> Result<Catalog, CatalogError> {
        match &self.catalog {
            Some(c) => Catalog::new(c.users.clone(), c.items.clone()),
            None => Ok(Catalog::default()),
        }
    }
}

/// Kafka connection configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct KafkaConfig {
    /// Kafka bootstrap servers (comma-separated).
    pub bootstrap_servers: String,
    /// Client id reported to the brokers.
    pub client_id: String,
    /// Bound on the startup metadata probe.
    pub connect_timeout_ms: u64,
    /// How long librdkafka keeps retrying a write before reporting failure.
    pub message_timeout_ms: u64,
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL).
    pub security_protocol: Option<String>,
    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512).
    pub sasl_mechanism: Option<String>,
    /// SASL username (optional, for authenticated clusters).
    pub sasl_username: Option<String>,
    /// SASL password (optional, for authenticated clusters).
    pub sasl_password: Option<String>,
    /// SSL CA certificate path (for SSL connections).
    pub ssl_ca_location: Option<String>,
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            client_id: "orderstream".to_string(),
            connect_timeout_ms: 5000,
            message_timeout_ms: 5000,
            security_protocol: None,
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
        }
    }
}

impl KafkaConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Producer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProducerConfig {
    /// Topic orders are published to.
    pub topic: String,
    /// Seconds between generated orders.
    pub interval_secs: u64,
    /// Requests buffered ahead of the dispatcher.
    pub input_buffer: usize,
    /// Deliveries awaiting acknowledgement at once.
    pub max_in_flight: usize,
    /// Outcomes buffered per completion channel.
    pub completion_buffer: usize,
    /// Bound on publisher close and reporter join, each.
    pub shutdown_grace_secs: u64,
    /// Key each message by its order id.
    pub key_by_order_id: bool,
}

impl Default for ProducerConfig {
    fn default() -> Self {
        let limits = PublisherLimits::default();
        Self {
            topic: "orders".to_string(),
            interval_secs: 5,
            input_buffer: limits.input_buffer,
            max_in_flight: limits.max_in_flight,
            completion_buffer: limits.completion_buffer,
            shutdown_grace_secs: 10,
            key_by_order_id: false,
        }
    }
}

impl ProducerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn limits(&self) -> PublisherLimits {
        PublisherLimits {
            input_buffer: self.input_buffer,
            max_in_flight: self.max_in_flight,
            completion_buffer: self.completion_buffer,
        }
    }
}

/// Consumer configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    /// Topic to read.
    pub topic: String,
    /// Partition index to read.
    pub partition: i32,
    /// Where the cursor starts. Nothing is ever committed.
    pub start_offset: StartOffset,
    /// Group id handed to librdkafka. Partitions are assigned manually.
    pub group_id: String,
    /// Messages/errors buffered between the broker client and the loop.
    pub buffer: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            topic: "orders".to_string(),
            partition: 0,
            start_offset: StartOffset::Newest,
            group_id: "orderstream-consumer".to_string(),
            buffer: 256,
        }
    }
}

/// User/item lists for the order generator.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub users: Vec<String>,
    pub items: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.kafka.bootstrap_servers, "localhost:9092");
        assert_eq!(config.producer.topic, "orders");
        assert_eq!(config.producer.interval(), Duration::from_secs(5));
        assert_eq!(config.consumer.partition, 0);
        assert_eq!(config.consumer.start_offset, StartOffset::Newest);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_interval() {
        let mut config = Config::default();
        config.producer.interval_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_validate_rejects_empty_catalog() {
        let config = Config {
            catalog: Some(CatalogConfig {
                users: vec![],
                items: vec!["pad thai".to_string()],
            }),
            ..Config::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Catalog(CatalogError::NoUsers))
        ));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "kafka:\n  bootstrap_servers: broker-1:9092,broker-2:9092\n\
             producer:\n  interval_secs: 2\n  key_by_order_id: true\n\
             consumer:\n  partition: 3\n  start_offset: oldest\n\
             catalog:\n  users: [alice]\n  items: [ramen bowl]"
        )
        .unwrap();

        let config = Config::load(file.path().to_str()).unwrap();
        assert_eq!(config.kafka.bootstrap_servers, "broker-1:9092,broker-2:9092");
        assert_eq!(config.producer.interval_secs, 2);
        assert!(config.producer.key_by_order_id);
        assert_eq!(config.consumer.partition, 3);
        assert_eq!(config.consumer.start_offset, StartOffset::Oldest);
        assert_eq!(config.catalog().unwrap().users(), ["alice".to_string()]);
    }

    #[test]
    #[serial]
    fn test_env_overrides_defaults() {
        std::env::set_var("ORDERSTREAM__CONSUMER__TOPIC", "payments");
        let config = Config::load(None);
        std::env::remove_var("ORDERSTREAM__CONSUMER__TOPIC");

        assert_eq!(config.unwrap().consumer.topic, "payments");
    }
}
