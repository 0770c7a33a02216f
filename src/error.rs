//! Error types for KSession
//!
//! This module defines the error types used throughout the crate,
//! using `thiserror` for ergonomic error handling.
//!
//! - [`ConfigError`] covers builder and file configuration validation.
//! - [`TransportError`] covers failures reported by the Kafka client.
//! - [`SessionError`] is what the consumer session surface returns.

use thiserror::Error;

use crate::types::TopicPartition;

/// Errors that can occur while assembling consumer configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Missing required configuration value.
    #[error("Missing required configuration: {0}")]
    MissingConfig(String),

    /// The topic set was empty at build time.
    #[error("At least one topic must be configured")]
    NoTopics,

    /// A numeric or enumerated value was out of range.
    #[error("Invalid value for {field}: {message}")]
    InvalidValue {
        /// Name of the offending setting
        field: String,
        /// Why the value was rejected
        message: String,
    },

    /// Invalid security protocol specified.
    #[error("Invalid security protocol: {0}")]
    InvalidSecurityProtocol(String),

    /// Invalid SASL mechanism specified.
    #[error("Invalid SASL mechanism: {0}")]
    InvalidSaslMechanism(String),

    /// Invalid auto offset reset policy specified.
    #[error("Invalid auto offset reset policy: {0}")]
    InvalidOffsetReset(String),
}

/// Errors reported by the underlying consumer transport.
///
/// The `fatal` classification decides whether the session tears the
/// transport down and recreates it, or simply retries the pull.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Error from the Kafka client.
    #[error("Kafka error: {message}")]
    Kafka {
        /// Client-provided description
        message: String,
        /// Whether the client can no longer be used in place
        fatal: bool,
    },

    /// The transport has been closed.
    #[error("Transport closed")]
    Closed,

    /// The partition is not known to the transport.
    #[error("Partition not found: {0}")]
    PartitionNotFound(TopicPartition),
}

impl TransportError {
    /// Creates a fatal Kafka error.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::Kafka {
            message: message.into(),
            fatal: true,
        }
    }

    /// Creates a non-fatal Kafka error.
    pub fn retriable(message: impl Into<String>) -> Self {
        Self::Kafka {
            message: message.into(),
            fatal: false,
        }
    }

    /// Returns true when the transport must be recreated.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::Kafka { fatal, .. } => *fatal,
            Self::Closed => true,
            Self::PartitionNotFound(_) => false,
        }
    }
}

/// Errors returned by [`crate::session::ConsumerSession`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The caller cancelled the operation.
    #[error("Operation cancelled")]
    Cancelled,

    /// No transport is currently active.
    #[error("Consumer is not connected")]
    NotConnected,

    /// No partitions are assigned, so there is no flow controller.
    #[error("Consumer has no partitions assigned")]
    NotAssigned,

    /// A pass-through call failed in the transport.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Result type alias for application-level operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = ConfigError::MissingConfig("brokers".to_string());
        assert_eq!(error.to_string(), "Missing required configuration: brokers");
    }

    #[test]
    fn test_invalid_value_display() {
        let error = ConfigError::InvalidValue {
            field: "workers_count".to_string(),
            message: "must be greater than 0".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "Invalid value for workers_count: must be greater than 0"
        );
    }

    #[test]
    fn test_transport_error_fatality() {
        assert!(TransportError::fatal("broker fenced").is_fatal());
        assert!(!TransportError::retriable("timed out").is_fatal());
        assert!(TransportError::Closed.is_fatal());
        assert!(!TransportError::PartitionNotFound(TopicPartition::new("orders", 0)).is_fatal());
    }

    #[test]
    fn test_transport_error_display() {
        let error = TransportError::retriable("Local: Timed out");
        assert_eq!(error.to_string(), "Kafka error: Local: Timed out");

        let error = TransportError::PartitionNotFound(TopicPartition::new("orders", 3));
        assert_eq!(error.to_string(), "Partition not found: orders[3]");
    }

    #[test]
    fn test_session_error_from_transport() {
        let error: SessionError = TransportError::Closed.into();
        assert!(matches!(error, SessionError::Transport(TransportError::Closed)));
        assert_eq!(error.to_string(), "Transport error: Transport closed");
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConfigError>();
        assert_send_sync::<TransportError>();
        assert_send_sync::<SessionError>();
    }
}
