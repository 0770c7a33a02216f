//! Configuration management for the ksession CLI
//!
//! This module handles loading, parsing, validating, and merging the
//! application configuration from a YAML file, environment variables, and
//! CLI overrides. [`AppConfig::consumer_builder`] turns it into a
//! [`ConsumerConfigurationBuilder`] for the session.

use crate::configuration::security::{
    SaslConfig, SaslMechanism, SecurityProtocol, SecuritySettings, SslConfig,
};
use crate::configuration::{
    AutoOffsetReset, ConsumerConfigurationBuilder, ConsumerInitialState, OffsetStoreMode,
    DEFAULT_AUTO_COMMIT_INTERVAL, DEFAULT_BROKERS, DEFAULT_BUFFER_SIZE,
    DEFAULT_MAX_POLL_INTERVAL, DEFAULT_WORKERS_COUNT,
};
use crate::error::{ConfigError, Result};
use crate::session::{SessionOptions, DEFAULT_FATAL_ERROR_BACKOFF};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Kafka connection and consumer settings
    #[serde(default)]
    pub kafka: KafkaConfig,

    /// Worker pool settings carried on the consumer configuration
    #[serde(default)]
    pub workers: WorkersConfig,

    /// Session lifecycle settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Kafka consumer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    /// Comma-separated bootstrap servers
    #[serde(default = "default_brokers")]
    pub brokers: String,

    /// Topics to subscribe to
    #[serde(default)]
    pub topics: Vec<String>,

    /// Consumer group id
    #[serde(default)]
    pub group_id: Option<String>,

    /// Unique consumer name; generated when absent
    #[serde(default)]
    pub name: Option<String>,

    /// Offset reset policy (earliest, latest, error)
    #[serde(default)]
    pub auto_offset_reset: Option<AutoOffsetReset>,

    /// Automatic commit interval in milliseconds
    #[serde(default = "default_auto_commit_interval_ms")]
    pub auto_commit_interval_ms: u64,

    /// Maximum poll interval in milliseconds
    #[serde(default = "default_max_poll_interval_ms")]
    pub max_poll_interval_ms: u64,

    /// Statistics interval in milliseconds; statistics are off when absent
    #[serde(default)]
    pub statistics_interval_ms: Option<u64>,

    /// Who stores offsets (auto, manual)
    #[serde(default)]
    pub offset_store: OffsetStoreMode,

    /// Whether assigned partitions start running or paused
    #[serde(default)]
    pub initial_state: ConsumerInitialState,

    /// Connection security
    #[serde(default)]
    pub security: Option<KafkaSecurityConfig>,

    /// Raw client properties, applied last
    #[serde(default)]
    pub properties: BTreeMap<String, String>,
}

fn default_brokers() -> String {
    DEFAULT_BROKERS.to_string()
}

fn default_auto_commit_interval_ms() -> u64 {
    DEFAULT_AUTO_COMMIT_INTERVAL.as_millis() as u64
}

fn default_max_poll_interval_ms() -> u64 {
    DEFAULT_MAX_POLL_INTERVAL.as_millis() as u64
}

impl Default for KafkaConfig {
    fn default() -> Self {
        Self {
            brokers: default_brokers(),
            topics: Vec::new(),
            group_id: None,
            name: None,
            auto_offset_reset: None,
            auto_commit_interval_ms: default_auto_commit_interval_ms(),
            max_poll_interval_ms: default_max_poll_interval_ms(),
            statistics_interval_ms: None,
            offset_store: OffsetStoreMode::default(),
            initial_state: ConsumerInitialState::default(),
            security: None,
            properties: BTreeMap::new(),
        }
    }
}

/// Kafka security settings as written in the config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaSecurityConfig {
    /// Security protocol (PLAINTEXT, SSL, SASL_PLAINTEXT, SASL_SSL)
    pub protocol: String,

    /// SASL mechanism (PLAIN, SCRAM-SHA-256, SCRAM-SHA-512)
    #[serde(default)]
    pub sasl_mechanism: Option<String>,

    /// SASL username
    #[serde(default)]
    pub sasl_username: Option<String>,

    /// SASL password; falls back to KAFKA_SASL_PASSWORD
    #[serde(default)]
    pub sasl_password: Option<String>,

    /// CA certificate path
    #[serde(default)]
    pub ssl_ca_location: Option<String>,
}

impl KafkaSecurityConfig {
    /// Converts the file settings into validated security settings.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] for unknown protocols or mechanisms, or
    /// missing SASL credentials.
    pub fn to_settings(&self) -> std::result::Result<SecuritySettings, ConfigError> {
        let protocol: SecurityProtocol = self.protocol.parse()?;

        let sasl = if protocol.uses_sasl() {
            let mechanism = match &self.sasl_mechanism {
                Some(mechanism) => mechanism.parse()?,
                None => SaslMechanism::default(),
            };
            let username = self
                .sasl_username
                .clone()
                .ok_or_else(|| ConfigError::MissingConfig("kafka.security.sasl_username".to_string()))?;
            let password = self
                .sasl_password
                .clone()
                .or_else(|| std::env::var("KAFKA_SASL_PASSWORD").ok())
                .ok_or_else(|| ConfigError::MissingConfig("kafka.security.sasl_password".to_string()))?;
            Some(SaslConfig {
                mechanism,
                username,
                password,
            })
        } else {
            None
        };

        let ssl = self.ssl_ca_location.as_ref().map(|ca| SslConfig {
            ca_location: Some(ca.clone()),
            ..Default::default()
        });

        let settings = SecuritySettings {
            protocol,
            sasl,
            ssl,
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkersConfig {
    /// Number of workers
    #[serde(default = "default_workers_count")]
    pub count: usize,

    /// Per-worker buffer size
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

fn default_workers_count() -> usize {
    DEFAULT_WORKERS_COUNT
}

fn default_buffer_size() -> usize {
    DEFAULT_BUFFER_SIZE
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            count: default_workers_count(),
            buffer_size: default_buffer_size(),
        }
    }
}

/// Session lifecycle settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Wait after a fatal error before recreating the consumer
    #[serde(default = "default_fatal_error_backoff_ms")]
    pub fatal_error_backoff_ms: u64,
}

fn default_fatal_error_backoff_ms() -> u64 {
    DEFAULT_FATAL_ERROR_BACKOFF.as_millis() as u64
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            fatal_error_backoff_ms: default_fatal_error_backoff_ms(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON-formatted logs
    #[serde(default)]
    pub json_format: bool,

    /// Also append logs to this file
    #[serde(default)]
    pub file_path: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
            file_path: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// A missing file is not an error; defaults are used instead.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ConfigError::MissingConfig(format!("failed to read config file {}: {}", path, e))
        })?;
        let config = serde_yaml::from_str(&contents).map_err(|e| ConfigError::InvalidValue {
            field: path.to_string(),
            message: e.to_string(),
        })?;
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        if let Ok(brokers) = std::env::var("KSESSION_BROKERS") {
            tracing::debug!(brokers = %brokers, "Env override: KSESSION_BROKERS");
            self.kafka.brokers = brokers;
        }

        if let Ok(topics) = std::env::var("KSESSION_TOPICS") {
            self.kafka.topics = topics
                .split(',')
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty())
                .collect();
            tracing::debug!(topics = ?self.kafka.topics, "Env override: KSESSION_TOPICS");
        }

        if let Ok(group_id) = std::env::var("KSESSION_GROUP_ID") {
            tracing::debug!(group_id = %group_id, "Env override: KSESSION_GROUP_ID");
            self.kafka.group_id = Some(group_id);
        }

        if let Ok(reset) = std::env::var("KSESSION_AUTO_OFFSET_RESET") {
            match reset.parse::<AutoOffsetReset>() {
                Ok(v) => {
                    self.kafka.auto_offset_reset = Some(v);
                    tracing::debug!(reset = %reset, "Env override: KSESSION_AUTO_OFFSET_RESET");
                }
                Err(_) => {
                    tracing::warn!("Invalid value for KSESSION_AUTO_OFFSET_RESET: {}", reset);
                }
            }
        }

        if let Ok(workers) = std::env::var("KSESSION_WORKERS") {
            match workers.parse::<usize>() {
                Ok(v) => {
                    self.workers.count = v;
                    tracing::debug!(workers = v, "Env override: KSESSION_WORKERS");
                }
                Err(_) => {
                    tracing::warn!("Invalid value for KSESSION_WORKERS: {}", workers);
                }
            }
        }

        if let Ok(level) = std::env::var("KSESSION_LOG_LEVEL") {
            tracing::debug!(level = %level, "Env override: KSESSION_LOG_LEVEL");
            self.logging.level = level;
        }

        if let Ok(json_logs) = std::env::var("KSESSION_JSON_LOGS") {
            match json_logs.parse::<bool>() {
                Ok(v) => {
                    self.logging.json_format = v;
                    tracing::debug!(json_logs = v, "Env override: KSESSION_JSON_LOGS");
                }
                Err(_) => {
                    tracing::warn!("Invalid value for KSESSION_JSON_LOGS: {}", json_logs);
                }
            }
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            self.logging.level = "debug".to_string();
        }
    }

    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns error if any value is out of range or security settings are
    /// inconsistent
    pub fn validate(&self) -> Result<()> {
        if self.kafka.brokers.trim().is_empty() {
            return Err(ConfigError::MissingConfig("kafka.brokers".to_string()).into());
        }

        if self.workers.count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers.count".to_string(),
                message: "must be greater than 0".to_string(),
            }
            .into());
        }

        if self.workers.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers.buffer_size".to_string(),
                message: "must be greater than 0".to_string(),
            }
            .into());
        }

        if self.session.fatal_error_backoff_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "session.fatal_error_backoff_ms".to_string(),
                message: "must be greater than 0".to_string(),
            }
            .into());
        }

        if let Some(security) = &self.kafka.security {
            security.to_settings()?;
        }

        Ok(())
    }

    /// Creates a consumer configuration builder from these settings.
    ///
    /// Topics are added but not required here; the builder enforces them
    /// at build time.
    ///
    /// # Errors
    ///
    /// Returns error if the security settings are invalid
    pub fn consumer_builder(&self) -> Result<ConsumerConfigurationBuilder> {
        let kafka = &self.kafka;
        let mut builder = ConsumerConfigurationBuilder::new()
            .with_brokers(kafka.brokers.clone())
            .topics(kafka.topics.iter().cloned())
            .with_auto_commit_interval_ms(kafka.auto_commit_interval_ms)
            .with_max_poll_interval_ms(kafka.max_poll_interval_ms)
            .with_workers_count(self.workers.count)
            .with_buffer_size(self.workers.buffer_size)
            .with_initial_state(kafka.initial_state);

        builder = match kafka.offset_store {
            OffsetStoreMode::Auto => builder.with_auto_store_offsets(),
            OffsetStoreMode::Manual => builder.with_manual_store_offsets(),
        };

        if let Some(group_id) = &kafka.group_id {
            builder = builder.with_group_id(group_id.clone());
        }
        if let Some(name) = &kafka.name {
            builder = builder.with_name(name.clone());
        }
        if let Some(reset) = kafka.auto_offset_reset {
            builder = builder.with_auto_offset_reset(reset);
        }
        if let Some(interval) = kafka.statistics_interval_ms {
            builder = builder.with_statistics_interval_ms(interval);
        }

        if let Some(security) = &kafka.security {
            let settings = security.to_settings()?;
            builder = builder.with_security_protocol(settings.protocol.clone());
            if let Some(sasl) = &settings.sasl {
                builder = builder.with_sasl(sasl.mechanism.clone(), &sasl.username, &sasl.password);
            }
            if let Some(ca) = settings.ssl.as_ref().and_then(|s| s.ca_location.as_deref()) {
                builder = builder.with_ssl(ca);
            }
        }

        for (key, value) in &kafka.properties {
            builder = builder.with_property(key.clone(), value.clone());
        }

        Ok(builder)
    }

    /// Session options derived from these settings.
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            fatal_error_backoff: Duration::from_millis(self.session.fatal_error_backoff_ms),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{Cli, Commands};
    use crate::test_utils::{temp_config_file, test_cli};
    use serial_test::serial;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.kafka.brokers, "localhost:9092");
        assert!(config.kafka.topics.is_empty());
        assert_eq!(config.workers.count, 1);
        assert_eq!(config.workers.buffer_size, 100);
        assert_eq!(config.session.fatal_error_backoff_ms, 5000);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_yaml() {
        let yaml = r#"
kafka:
  brokers: kafka1:9092,kafka2:9092
  topics: [orders, payments]
  group_id: order-processors
  auto_offset_reset: earliest
  statistics_interval_ms: 10000
  offset_store: manual
  initial_state: paused
  properties:
    fetch.min.bytes: "1024"
workers:
  count: 4
  buffer_size: 50
session:
  fatal_error_backoff_ms: 2000
logging:
  level: debug
  json_format: true
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.kafka.topics, vec!["orders", "payments"]);
        assert_eq!(config.kafka.auto_offset_reset, Some(AutoOffsetReset::Earliest));
        assert_eq!(config.kafka.offset_store, OffsetStoreMode::Manual);
        assert_eq!(config.kafka.initial_state, ConsumerInitialState::Paused);
        assert_eq!(config.workers.count, 4);
        assert!(config.logging.json_format);

        let configuration = config.consumer_builder().unwrap().build().unwrap();
        let settings: BTreeMap<_, _> = configuration.client_settings().into_iter().collect();
        assert_eq!(settings.get("group.id").unwrap(), "order-processors");
        assert_eq!(settings.get("statistics.interval.ms").unwrap(), "10000");
        assert_eq!(settings.get("enable.auto.offset.store").unwrap(), "false");
        assert_eq!(settings.get("fetch.min.bytes").unwrap(), "1024");
        assert_eq!(configuration.workers_count(), 4);
        assert_eq!(
            config.session_options().fatal_error_backoff,
            Duration::from_secs(2)
        );
    }

    #[test]
    fn test_validate_rejects_zero_workers() {
        let mut config = AppConfig::default();
        config.workers.count = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("workers.count"));
    }

    #[test]
    fn test_validate_rejects_zero_backoff() {
        let mut config = AppConfig::default();
        config.session.fatal_error_backoff_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_bad_protocol() {
        let mut config = AppConfig::default();
        config.kafka.security = Some(KafkaSecurityConfig {
            protocol: "TLS".to_string(),
            sasl_mechanism: None,
            sasl_username: None,
            sasl_password: None,
            ssl_ca_location: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_security_settings_with_password_fallback() {
        std::env::set_var("KAFKA_SASL_PASSWORD", "from-env");
        let security = KafkaSecurityConfig {
            protocol: "SASL_SSL".to_string(),
            sasl_mechanism: Some("SCRAM-SHA-512".to_string()),
            sasl_username: Some("consumer".to_string()),
            sasl_password: None,
            ssl_ca_location: Some("/etc/ssl/ca.pem".to_string()),
        };
        let settings = security.to_settings();
        std::env::remove_var("KAFKA_SASL_PASSWORD");

        let settings = settings.unwrap();
        assert_eq!(settings.protocol, SecurityProtocol::SaslSsl);
        let sasl = settings.sasl.unwrap();
        assert_eq!(sasl.mechanism, SaslMechanism::ScramSha512);
        assert_eq!(sasl.password, "from-env");
        assert_eq!(settings.ssl.unwrap().ca_location.as_deref(), Some("/etc/ssl/ca.pem"));
    }

    #[test]
    #[serial]
    fn test_security_settings_missing_password() {
        std::env::remove_var("KAFKA_SASL_PASSWORD");
        let security = KafkaSecurityConfig {
            protocol: "SASL_PLAINTEXT".to_string(),
            sasl_mechanism: None,
            sasl_username: Some("consumer".to_string()),
            sasl_password: None,
            ssl_ca_location: None,
        };
        assert!(matches!(
            security.to_settings(),
            Err(ConfigError::MissingConfig(_))
        ));
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let cli = test_cli(None);
        let config = AppConfig::load("/nonexistent/ksession.yaml", &cli).unwrap();
        assert_eq!(config.kafka.brokers, "localhost:9092");
    }

    #[test]
    #[serial]
    fn test_load_applies_env_overrides() {
        let (_dir, path) = temp_config_file("kafka:\n  brokers: file:9092\n  topics: [orders]\n");
        std::env::set_var("KSESSION_BROKERS", "env:9092");
        std::env::set_var("KSESSION_TOPICS", "audit, payments,");
        std::env::set_var("KSESSION_WORKERS", "not-a-number");

        let config = AppConfig::load(path.to_str().unwrap(), &test_cli(None));

        std::env::remove_var("KSESSION_BROKERS");
        std::env::remove_var("KSESSION_TOPICS");
        std::env::remove_var("KSESSION_WORKERS");

        let config = config.unwrap();
        assert_eq!(config.kafka.brokers, "env:9092");
        assert_eq!(config.kafka.topics, vec!["audit", "payments"]);
        assert_eq!(config.workers.count, 1);
    }

    #[test]
    #[serial]
    fn test_load_invalid_yaml_fails() {
        let (_dir, path) = temp_config_file("kafka: [not, a, map]\n");
        assert!(AppConfig::load(path.to_str().unwrap(), &test_cli(None)).is_err());
    }

    #[test]
    #[serial]
    fn test_verbose_raises_log_level() {
        let cli = Cli {
            config: None,
            verbose: true,
            command: Commands::ShowConfig,
        };
        let config = AppConfig::load("/nonexistent/ksession.yaml", &cli).unwrap();
        assert_eq!(config.logging.level, "debug");
    }
}
