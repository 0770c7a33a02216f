//! Session event handler traits.
//!
//! Handlers are plain synchronous callbacks invoked on whichever thread the
//! transport reports the event from. Closures with the matching signature
//! implement each trait.

use crate::configuration::{
    PartitionsAssignedCallback, PartitionsRevokedCallback, StatisticsCallback,
};
use crate::resolver::DependencyResolver;
use crate::transport::Transport;
use crate::types::{BrokerError, TopicPartition, TopicPartitionOffset};

/// Called after partitions are assigned.
pub trait PartitionsAssignedHandler: Send + Sync {
    fn on_partitions_assigned(
        &self,
        resolver: &DependencyResolver,
        transport: &dyn Transport,
        partitions: &[TopicPartition],
    );
}

impl<F> PartitionsAssignedHandler for F
where
    F: Fn(&DependencyResolver, &dyn Transport, &[TopicPartition]) + Send + Sync,
{
    fn on_partitions_assigned(
        &self,
        resolver: &DependencyResolver,
        transport: &dyn Transport,
        partitions: &[TopicPartition],
    ) {
        self(resolver, transport, partitions)
    }
}

/// Called when partitions are revoked, before the flow controller is
/// released.
pub trait PartitionsRevokedHandler: Send + Sync {
    fn on_partitions_revoked(
        &self,
        resolver: &DependencyResolver,
        transport: &dyn Transport,
        partitions: &[TopicPartitionOffset],
    );
}

impl<F> PartitionsRevokedHandler for F
where
    F: Fn(&DependencyResolver, &dyn Transport, &[TopicPartitionOffset]) + Send + Sync,
{
    fn on_partitions_revoked(
        &self,
        resolver: &DependencyResolver,
        transport: &dyn Transport,
        partitions: &[TopicPartitionOffset],
    ) {
        self(resolver, transport, partitions)
    }
}

/// Called for every client error report.
pub trait ErrorHandler: Send + Sync {
    fn on_error(&self, transport: &dyn Transport, error: &BrokerError);
}

impl<F> ErrorHandler for F
where
    F: Fn(&dyn Transport, &BrokerError) + Send + Sync,
{
    fn on_error(&self, transport: &dyn Transport, error: &BrokerError) {
        self(transport, error)
    }
}

/// Called with every raw statistics document.
pub trait StatisticsHandler: Send + Sync {
    fn on_statistics(&self, transport: &dyn Transport, json: &str);
}

impl<F> StatisticsHandler for F
where
    F: Fn(&dyn Transport, &str) + Send + Sync,
{
    fn on_statistics(&self, transport: &dyn Transport, json: &str) {
        self(transport, json)
    }
}

/// Adapts a configuration-declared assignment callback.
pub(crate) struct ConfiguredAssignedHandler(pub(crate) PartitionsAssignedCallback);

impl PartitionsAssignedHandler for ConfiguredAssignedHandler {
    fn on_partitions_assigned(
        &self,
        resolver: &DependencyResolver,
        _transport: &dyn Transport,
        partitions: &[TopicPartition],
    ) {
        (self.0)(resolver, partitions)
    }
}

/// Adapts a configuration-declared revocation callback.
pub(crate) struct ConfiguredRevokedHandler(pub(crate) PartitionsRevokedCallback);

impl PartitionsRevokedHandler for ConfiguredRevokedHandler {
    fn on_partitions_revoked(
        &self,
        resolver: &DependencyResolver,
        _transport: &dyn Transport,
        partitions: &[TopicPartitionOffset],
    ) {
        (self.0)(resolver, partitions)
    }
}

/// Adapts a configuration-declared statistics callback.
pub(crate) struct ConfiguredStatisticsHandler(pub(crate) StatisticsCallback);

impl StatisticsHandler for ConfiguredStatisticsHandler {
    fn on_statistics(&self, _transport: &dyn Transport, json: &str) {
        (self.0)(json)
    }
}
