//! Consumer configuration schema and fluent builder.
//!
//! [`ConsumerConfigurationBuilder`] accumulates settings and validates them
//! once in [`ConsumerConfigurationBuilder::build`]. The resulting
//! [`ConsumerConfiguration`] is immutable and is what a
//! [`crate::session::ConsumerSession`] consumes.
//!
//! # Example
//!
//! ```rust
//! use ksession::configuration::{AutoOffsetReset, ConsumerConfigurationBuilder};
//!
//! let configuration = ConsumerConfigurationBuilder::new()
//!     .with_brokers("localhost:9092")
//!     .topic("orders")
//!     .with_group_id("order-processors")
//!     .with_workers_count(4)
//!     .with_auto_offset_reset(AutoOffsetReset::Earliest)
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(configuration.topics(), ["orders".to_string()]);
//! assert_eq!(configuration.workers_count(), 4);
//! ```

pub mod distribution;
pub mod middleware;
pub mod security;

use rdkafka::config::ClientConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::resolver::DependencyResolver;
use crate::types::{TopicPartition, TopicPartitionOffset};

use self::distribution::DistributionStrategyFactory;
use self::middleware::{Middleware, MiddlewareConfigurationBuilder};
use self::security::{SaslConfig, SaslMechanism, SecurityProtocol, SecuritySettings, SslConfig};

/// Default bootstrap servers.
pub const DEFAULT_BROKERS: &str = "localhost:9092";

/// Default interval between automatic offset commits.
pub const DEFAULT_AUTO_COMMIT_INTERVAL: Duration = Duration::from_secs(5);

/// Default maximum time between polls before the group evicts the member.
pub const DEFAULT_MAX_POLL_INTERVAL: Duration = Duration::from_secs(300);

/// Default number of workers.
pub const DEFAULT_WORKERS_COUNT: usize = 1;

/// Default per-worker buffer size.
pub const DEFAULT_BUFFER_SIZE: usize = 100;

/// Handler for raw statistics JSON declared on the configuration.
pub type StatisticsCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// Handler for assigned partitions declared on the configuration.
pub type PartitionsAssignedCallback =
    Arc<dyn Fn(&DependencyResolver, &[TopicPartition]) + Send + Sync>;

/// Handler for revoked partitions declared on the configuration.
pub type PartitionsRevokedCallback =
    Arc<dyn Fn(&DependencyResolver, &[TopicPartitionOffset]) + Send + Sync>;

/// What to do when the group has no committed offset for a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AutoOffsetReset {
    /// Start from the oldest available record.
    Earliest,
    /// Start from the next produced record.
    Latest,
    /// Fail the consumer.
    Error,
}

impl AutoOffsetReset {
    /// Returns the Kafka configuration string for this policy.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Earliest => "earliest",
            Self::Latest => "latest",
            Self::Error => "error",
        }
    }
}

impl FromStr for AutoOffsetReset {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "earliest" => Ok(Self::Earliest),
            "latest" => Ok(Self::Latest),
            "error" => Ok(Self::Error),
            _ => Err(ConfigError::InvalidOffsetReset(s.to_string())),
        }
    }
}

/// Who stores consumed offsets for the periodic commit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OffsetStoreMode {
    /// The client stores the offset of every record it hands out.
    #[default]
    Auto,
    /// The application stores or commits offsets itself.
    Manual,
}

/// Whether partitions start flowing as soon as they are assigned.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConsumerInitialState {
    /// Assigned partitions are consumed immediately.
    #[default]
    Running,
    /// Assigned partitions start paused.
    Paused,
}

/// Immutable, validated consumer configuration.
#[derive(Clone)]
pub struct ConsumerConfiguration {
    brokers: String,
    topics: Vec<String>,
    name: String,
    management_disabled: bool,
    group_id: Option<String>,
    auto_offset_reset: Option<AutoOffsetReset>,
    auto_commit_interval: Duration,
    max_poll_interval: Duration,
    statistics_interval: Option<Duration>,
    workers_count: usize,
    buffer_size: usize,
    distribution_strategy: Option<DistributionStrategyFactory>,
    offset_store_mode: OffsetStoreMode,
    initial_state: ConsumerInitialState,
    middlewares: Vec<Arc<dyn Middleware>>,
    statistics_handlers: Vec<StatisticsCallback>,
    partitions_assigned_handlers: Vec<PartitionsAssignedCallback>,
    partitions_revoked_handlers: Vec<PartitionsRevokedCallback>,
    security: SecuritySettings,
    properties: Vec<(String, String)>,
}

impl ConsumerConfiguration {
    /// Bootstrap servers.
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Subscribed topics, in configuration order.
    pub fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Unique consumer name, used as the client id.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the consumer opted out of external management.
    pub fn management_disabled(&self) -> bool {
        self.management_disabled
    }

    /// Consumer group id.
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// Offset reset policy, if set.
    pub fn auto_offset_reset(&self) -> Option<AutoOffsetReset> {
        self.auto_offset_reset
    }

    /// Interval between automatic commits.
    pub fn auto_commit_interval(&self) -> Duration {
        self.auto_commit_interval
    }

    /// Maximum interval between polls.
    pub fn max_poll_interval(&self) -> Duration {
        self.max_poll_interval
    }

    /// Statistics emission interval, if statistics are enabled.
    pub fn statistics_interval(&self) -> Option<Duration> {
        self.statistics_interval
    }

    /// Number of workers.
    pub fn workers_count(&self) -> usize {
        self.workers_count
    }

    /// Per-worker buffer size.
    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Work distribution strategy factory, if one was configured.
    pub fn distribution_strategy(&self) -> Option<&DistributionStrategyFactory> {
        self.distribution_strategy.as_ref()
    }

    /// Offset store mode.
    pub fn offset_store_mode(&self) -> OffsetStoreMode {
        self.offset_store_mode
    }

    /// Initial run state of newly assigned partitions.
    pub fn initial_state(&self) -> ConsumerInitialState {
        self.initial_state
    }

    /// Middlewares in registration order.
    pub fn middlewares(&self) -> &[Arc<dyn Middleware>] {
        &self.middlewares
    }

    /// Statistics handlers in registration order.
    pub fn statistics_handlers(&self) -> &[StatisticsCallback] {
        &self.statistics_handlers
    }

    /// Partition assignment handlers in registration order.
    pub fn partitions_assigned_handlers(&self) -> &[PartitionsAssignedCallback] {
        &self.partitions_assigned_handlers
    }

    /// Partition revocation handlers in registration order.
    pub fn partitions_revoked_handlers(&self) -> &[PartitionsRevokedCallback] {
        &self.partitions_revoked_handlers
    }

    /// Connection security settings.
    pub fn security(&self) -> &SecuritySettings {
        &self.security
    }

    /// Low-level client settings derived from this configuration.
    ///
    /// Raw properties set with
    /// [`ConsumerConfigurationBuilder::with_property`] come last so they
    /// override derived values.
    pub fn client_settings(&self) -> Vec<(String, String)> {
        let mut settings = vec![
            ("bootstrap.servers".to_string(), self.brokers.clone()),
            ("client.id".to_string(), self.name.clone()),
        ];

        if let Some(group_id) = &self.group_id {
            settings.push(("group.id".to_string(), group_id.clone()));
        }

        if let Some(reset) = self.auto_offset_reset {
            settings.push(("auto.offset.reset".to_string(), reset.as_str().to_string()));
        }

        settings.push(("enable.auto.commit".to_string(), "true".to_string()));
        settings.push((
            "auto.commit.interval.ms".to_string(),
            self.auto_commit_interval.as_millis().to_string(),
        ));
        settings.push((
            "max.poll.interval.ms".to_string(),
            self.max_poll_interval.as_millis().to_string(),
        ));
        settings.push((
            "enable.auto.offset.store".to_string(),
            (self.offset_store_mode == OffsetStoreMode::Auto).to_string(),
        ));

        if let Some(interval) = self.statistics_interval {
            settings.push((
                "statistics.interval.ms".to_string(),
                interval.as_millis().to_string(),
            ));
        }

        self.security.write_settings(&mut settings);
        settings.extend(self.properties.iter().cloned());
        settings
    }

    /// Builds an `rdkafka` client configuration from [`Self::client_settings`].
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new();
        for (key, value) in self.client_settings() {
            config.set(key, value);
        }
        config
    }
}

impl fmt::Debug for ConsumerConfiguration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerConfiguration")
            .field("brokers", &self.brokers)
            .field("topics", &self.topics)
            .field("name", &self.name)
            .field("group_id", &self.group_id)
            .field("workers_count", &self.workers_count)
            .field("buffer_size", &self.buffer_size)
            .field("offset_store_mode", &self.offset_store_mode)
            .field("initial_state", &self.initial_state)
            .field("middlewares", &self.middlewares.len())
            .finish_non_exhaustive()
    }
}

/// Fluent builder for [`ConsumerConfiguration`].
///
/// Every method takes and returns the builder by value so calls chain.
pub struct ConsumerConfigurationBuilder {
    brokers: String,
    topics: Vec<String>,
    name: Option<String>,
    management_disabled: bool,
    group_id: Option<String>,
    auto_offset_reset: Option<AutoOffsetReset>,
    auto_commit_interval: Duration,
    max_poll_interval: Duration,
    statistics_interval: Option<Duration>,
    workers_count: usize,
    buffer_size: usize,
    distribution_strategy: Option<DistributionStrategyFactory>,
    offset_store_mode: OffsetStoreMode,
    initial_state: ConsumerInitialState,
    middlewares: MiddlewareConfigurationBuilder,
    statistics_handlers: Vec<StatisticsCallback>,
    partitions_assigned_handlers: Vec<PartitionsAssignedCallback>,
    partitions_revoked_handlers: Vec<PartitionsRevokedCallback>,
    security: SecuritySettings,
    properties: Vec<(String, String)>,
}

impl Default for ConsumerConfigurationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ConsumerConfigurationBuilder {
    /// Creates a builder with default settings and no topics.
    pub fn new() -> Self {
        Self {
            brokers: DEFAULT_BROKERS.to_string(),
            topics: Vec::new(),
            name: None,
            management_disabled: false,
            group_id: None,
            auto_offset_reset: None,
            auto_commit_interval: DEFAULT_AUTO_COMMIT_INTERVAL,
            max_poll_interval: DEFAULT_MAX_POLL_INTERVAL,
            statistics_interval: None,
            workers_count: DEFAULT_WORKERS_COUNT,
            buffer_size: DEFAULT_BUFFER_SIZE,
            distribution_strategy: None,
            offset_store_mode: OffsetStoreMode::default(),
            initial_state: ConsumerInitialState::default(),
            middlewares: MiddlewareConfigurationBuilder::new(),
            statistics_handlers: Vec::new(),
            partitions_assigned_handlers: Vec::new(),
            partitions_revoked_handlers: Vec::new(),
            security: SecuritySettings::default(),
            properties: Vec::new(),
        }
    }

    /// Sets the bootstrap servers (comma-separated).
    pub fn with_brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = brokers.into();
        self
    }

    /// Adds a topic to the subscription. Duplicates are ignored.
    pub fn topic(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if !self.topics.contains(&name) {
            self.topics.push(name);
        }
        self
    }

    /// Adds several topics to the subscription.
    pub fn topics<I, S>(self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().fold(self, |builder, name| builder.topic(name))
    }

    /// Sets the unique consumer name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Opts the consumer out of external management.
    pub fn disable_management(mut self) -> Self {
        self.management_disabled = true;
        self
    }

    /// Sets the consumer group id.
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = Some(group_id.into());
        self
    }

    /// Sets the offset reset policy.
    pub fn with_auto_offset_reset(mut self, policy: AutoOffsetReset) -> Self {
        self.auto_offset_reset = Some(policy);
        self
    }

    /// Sets the automatic commit interval.
    pub fn with_auto_commit_interval_ms(mut self, interval_ms: u64) -> Self {
        self.auto_commit_interval = Duration::from_millis(interval_ms);
        self
    }

    /// Sets the maximum interval between polls.
    pub fn with_max_poll_interval_ms(mut self, interval_ms: u64) -> Self {
        self.max_poll_interval = Duration::from_millis(interval_ms);
        self
    }

    /// Sets the number of workers. Must be positive.
    pub fn with_workers_count(mut self, workers_count: usize) -> Self {
        self.workers_count = workers_count;
        self
    }

    /// Sets the per-worker buffer size. Must be positive.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size;
        self
    }

    /// Sets the work distribution strategy factory.
    pub fn with_work_distribution_strategy(mut self, factory: DistributionStrategyFactory) -> Self {
        self.distribution_strategy = Some(factory);
        self
    }

    /// Lets the client store offsets automatically. Overrides
    /// [`Self::with_manual_store_offsets`].
    pub fn with_auto_store_offsets(mut self) -> Self {
        self.offset_store_mode = OffsetStoreMode::Auto;
        self
    }

    /// Leaves offset storage to the application. Overrides
    /// [`Self::with_auto_store_offsets`].
    pub fn with_manual_store_offsets(mut self) -> Self {
        self.offset_store_mode = OffsetStoreMode::Manual;
        self
    }

    /// Sets the initial run state of assigned partitions.
    pub fn with_initial_state(mut self, state: ConsumerInitialState) -> Self {
        self.initial_state = state;
        self
    }

    /// Registers middlewares through a configurator closure.
    ///
    /// ```rust
    /// use ksession::configuration::ConsumerConfigurationBuilder;
    /// use ksession::configuration::middleware::{Middleware, MiddlewareError};
    /// use ksession::types::ConsumedRecord;
    ///
    /// struct Noop;
    ///
    /// #[async_trait::async_trait]
    /// impl Middleware for Noop {
    ///     async fn handle(&self, _: &ConsumedRecord) -> Result<(), MiddlewareError> {
    ///         Ok(())
    ///     }
    /// }
    ///
    /// let configuration = ConsumerConfigurationBuilder::new()
    ///     .topic("orders")
    ///     .add_middlewares(|m| {
    ///         m.add(Noop).add(Noop);
    ///     })
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(configuration.middlewares().len(), 2);
    /// ```
    pub fn add_middlewares<F>(mut self, configure: F) -> Self
    where
        F: FnOnce(&mut MiddlewareConfigurationBuilder),
    {
        configure(&mut self.middlewares);
        self
    }

    /// Registers a handler for raw statistics JSON.
    ///
    /// Statistics are only emitted once an interval is set with
    /// [`Self::with_statistics_interval_ms`].
    pub fn with_statistics_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.statistics_handlers.push(Arc::new(handler));
        self
    }

    /// Sets the statistics emission interval.
    pub fn with_statistics_interval_ms(mut self, interval_ms: u64) -> Self {
        self.statistics_interval = Some(Duration::from_millis(interval_ms));
        self
    }

    /// Registers a handler for partition assignments.
    pub fn with_partitions_assigned_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&DependencyResolver, &[TopicPartition]) + Send + Sync + 'static,
    {
        self.partitions_assigned_handlers.push(Arc::new(handler));
        self
    }

    /// Registers a handler for partition revocations.
    pub fn with_partitions_revoked_handler<F>(mut self, handler: F) -> Self
    where
        F: Fn(&DependencyResolver, &[TopicPartitionOffset]) + Send + Sync + 'static,
    {
        self.partitions_revoked_handlers.push(Arc::new(handler));
        self
    }

    /// Sets the security protocol.
    pub fn with_security_protocol(mut self, protocol: SecurityProtocol) -> Self {
        self.security.protocol = protocol;
        self
    }

    /// Configures SASL/SCRAM-SHA-256 authentication over TLS.
    pub fn with_sasl_scram_sha256(self, username: &str, password: &str) -> Self {
        self.with_sasl(SaslMechanism::ScramSha256, username, password)
    }

    /// Configures SASL/SCRAM-SHA-512 authentication over TLS.
    pub fn with_sasl_scram_sha512(self, username: &str, password: &str) -> Self {
        self.with_sasl(SaslMechanism::ScramSha512, username, password)
    }

    /// Configures SASL authentication with the given mechanism.
    ///
    /// Switches the protocol to `SASL_SSL` unless a SASL protocol is
    /// already selected.
    pub fn with_sasl(mut self, mechanism: SaslMechanism, username: &str, password: &str) -> Self {
        if !self.security.protocol.uses_sasl() {
            self.security.protocol = SecurityProtocol::SaslSsl;
        }
        self.security.sasl = Some(SaslConfig {
            mechanism,
            username: username.to_string(),
            password: password.to_string(),
        });
        self
    }

    /// Configures TLS with a CA certificate.
    pub fn with_ssl(mut self, ca_location: &str) -> Self {
        self.security.ssl = Some(SslConfig {
            ca_location: Some(ca_location.to_string()),
            ..Default::default()
        });
        self
    }

    /// Sets a raw client property. Later values win.
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push((key.into(), value.into()));
        self
    }

    /// Validates the accumulated settings and builds the configuration.
    ///
    /// A consumer name is generated when none was set.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::NoTopics` if no topic was added,
    /// `ConfigError::MissingConfig` if brokers or SASL credentials are
    /// missing, and `ConfigError::InvalidValue` for non-positive sizes.
    pub fn build(self) -> Result<ConsumerConfiguration, ConfigError> {
        if self.topics.is_empty() {
            return Err(ConfigError::NoTopics);
        }

        if self.topics.iter().any(|topic| topic.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "topics".to_string(),
                message: "topic names cannot be empty".to_string(),
            });
        }

        if self.brokers.trim().is_empty() {
            return Err(ConfigError::MissingConfig("brokers".to_string()));
        }

        if self.workers_count == 0 {
            return Err(ConfigError::InvalidValue {
                field: "workers_count".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        if self.buffer_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "buffer_size".to_string(),
                message: "must be greater than 0".to_string(),
            });
        }

        self.security.validate()?;

        let name = self
            .name
            .unwrap_or_else(|| format!("ksession-{}", uuid::Uuid::new_v4()));

        Ok(ConsumerConfiguration {
            brokers: self.brokers,
            topics: self.topics,
            name,
            management_disabled: self.management_disabled,
            group_id: self.group_id,
            auto_offset_reset: self.auto_offset_reset,
            auto_commit_interval: self.auto_commit_interval,
            max_poll_interval: self.max_poll_interval,
            statistics_interval: self.statistics_interval,
            workers_count: self.workers_count,
            buffer_size: self.buffer_size,
            distribution_strategy: self.distribution_strategy,
            offset_store_mode: self.offset_store_mode,
            initial_state: self.initial_state,
            middlewares: self.middlewares.into_inner(),
            statistics_handlers: self.statistics_handlers,
            partitions_assigned_handlers: self.partitions_assigned_handlers,
            partitions_revoked_handlers: self.partitions_revoked_handlers,
            security: self.security,
            properties: self.properties,
        })
    }
}

impl fmt::Debug for ConsumerConfigurationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerConfigurationBuilder")
            .field("brokers", &self.brokers)
            .field("topics", &self.topics)
            .field("group_id", &self.group_id)
            .finish_non_exhaustive()
    }
}
