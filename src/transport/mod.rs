//! Consumer transport abstraction and implementations
//!
//! The [`Transport`] trait is the low-level consumer client the session
//! drives: it pulls records, reports partition and offset information and
//! accepts commits and flow control. Implementations:
//!
//! - [`kafka::KafkaTransport`] -- backed by an `rdkafka` stream consumer.
//! - [`fake::FakeTransport`] -- scripted in-process fake used in tests
//!   (cfg(test) only).
//!
//! Transports are created by a [`TransportFactory`]. Each creation receives
//! a fresh [`events::EventSink`] through which the transport reports
//! partition assignments, revocations, client errors and statistics back to
//! the session that owns it.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::configuration::ConsumerConfiguration;
use crate::error::TransportError;
use crate::types::{
    ConsumedRecord, TopicPartition, TopicPartitionOffset, TopicPartitionTimestamp,
    WatermarkOffsets,
};

pub mod events;
pub mod kafka;

#[cfg(test)]
pub mod fake;

pub use events::{EventSink, SessionEvent};

/// A connected consumer client.
///
/// Everything except [`Transport::recv`] is synchronous and may block for up
/// to the given timeout while the client talks to the cluster.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Transport: Send + Sync {
    /// Subscribes to `topics`, replacing any previous subscription.
    fn subscribe(&self, topics: &[String]) -> Result<(), TransportError>;

    /// Waits for the next record.
    ///
    /// Partition events are delivered through the event sink while this
    /// call is pending.
    async fn recv(&self) -> Result<ConsumedRecord, TransportError>;

    /// Current topic subscription.
    fn subscription(&self) -> Vec<String>;

    /// Group member id assigned by the coordinator, if joined.
    fn member_id(&self) -> Option<String>;

    /// Client instance name.
    fn name(&self) -> String;

    /// Current consume positions of `partitions`.
    fn position(
        &self,
        partitions: &[TopicPartition],
    ) -> Result<Vec<TopicPartitionOffset>, TransportError>;

    /// Last known watermarks of `partition`, without a broker round trip.
    fn watermark_offsets(&self, partition: &TopicPartition) -> Option<WatermarkOffsets>;

    /// Watermarks of `partition` as reported by the broker.
    fn query_watermark_offsets(
        &self,
        partition: &TopicPartition,
        timeout: Duration,
    ) -> Result<WatermarkOffsets, TransportError>;

    /// Earliest offsets whose timestamps are at or after the given ones.
    fn offsets_for_times(
        &self,
        timestamps: &[TopicPartitionTimestamp],
        timeout: Duration,
    ) -> Result<Vec<TopicPartitionOffset>, TransportError>;

    /// Synchronously commits `offsets`.
    fn commit(&self, offsets: &[TopicPartitionOffset]) -> Result<(), TransportError>;

    /// Stops fetching from `partitions`.
    fn pause(&self, partitions: &[TopicPartition]) -> Result<(), TransportError>;

    /// Resumes fetching from `partitions`.
    fn resume(&self, partitions: &[TopicPartition]) -> Result<(), TransportError>;

    /// Leaves the group and stops the client.
    ///
    /// May synchronously report a revocation through the event sink.
    fn close(&self);
}

/// Creates transports for a session.
pub trait TransportFactory: Send + Sync {
    /// Builds a new, unsubscribed transport.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the client cannot be created.
    fn create(
        &self,
        configuration: &ConsumerConfiguration,
        sink: EventSink,
    ) -> Result<Arc<dyn Transport>, TransportError>;
}
