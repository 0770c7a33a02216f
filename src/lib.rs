//! KSession - resilient Kafka consumer session library
//!
//! This library wraps a Kafka consumer in a session that creates the client
//! lazily, recreates it after fatal errors, and fans partition lifecycle
//! events out to registered handlers.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//!
//! - `session`: The consumer session, its derived status and handler traits
//! - `transport`: Transport abstraction and the rdkafka implementation
//! - `flow`: Per-assignment pause/resume flow controllers
//! - `configuration`: Consumer configuration builder, security and middlewares
//! - `config`: File, environment and CLI configuration for the binary
//! - `error`: Error types and result aliases
//! - `cli`: Command-line interface definition
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ksession::resolver::DependencyResolver;
//! use ksession::transport::kafka::KafkaTransportFactory;
//! use ksession::{ConsumerConfigurationBuilder, ConsumerSession};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let configuration = ConsumerConfigurationBuilder::new()
//!         .with_brokers("localhost:9092")
//!         .topic("orders")
//!         .with_group_id("processors")
//!         .build()?;
//!
//!     let session = ConsumerSession::new(
//!         configuration,
//!         DependencyResolver::empty(),
//!         Arc::new(KafkaTransportFactory::new()),
//!     );
//!
//!     let cancel = CancellationToken::new();
//!     let record = session.consume(&cancel).await?;
//!     println!("{}", record.to_json());
//!
//!     session.dispose();
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod commands;
pub mod config;
pub mod configuration;
pub mod error;
pub mod flow;
pub mod logging;
pub mod resolver;
pub mod session;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use configuration::{ConsumerConfiguration, ConsumerConfigurationBuilder};
pub use error::{ConfigError, Result, SessionError, TransportError};
pub use session::{ConsumerSession, ConsumerStatus, SessionOptions};
pub use types::{ConsumedRecord, Offset, TopicPartition, TopicPartitionOffset};

#[cfg(test)]
pub mod test_utils;
