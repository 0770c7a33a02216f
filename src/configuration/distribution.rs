//! Work distribution strategy plug-in contract.
//!
//! A strategy decides which worker a record goes to. No strategy is shipped
//! here; applications provide one through a [`DistributionStrategyFactory`].

use std::fmt;
use std::sync::Arc;

use crate::types::ConsumedRecord;

/// Picks a worker for each record.
pub trait DistributionStrategy: Send + Sync {
    /// Called once with the configured worker count before any record.
    fn initialize(&mut self, workers_count: usize);

    /// Returns the worker index for `record`, or `None` to drop it.
    fn worker_for(&self, record: &ConsumedRecord) -> Option<usize>;
}

/// Produces fresh strategy instances.
#[derive(Clone)]
pub struct DistributionStrategyFactory {
    create: Arc<dyn Fn() -> Box<dyn DistributionStrategy> + Send + Sync>,
}

impl DistributionStrategyFactory {
    /// Wraps a constructor closure.
    ///
    /// # Example
    ///
    /// ```rust
    /// use ksession::configuration::distribution::{
    ///     DistributionStrategy, DistributionStrategyFactory,
    /// };
    /// use ksession::types::ConsumedRecord;
    ///
    /// struct ByPartition(usize);
    ///
    /// impl DistributionStrategy for ByPartition {
    ///     fn initialize(&mut self, workers_count: usize) {
    ///         self.0 = workers_count;
    ///     }
    ///
    ///     fn worker_for(&self, record: &ConsumedRecord) -> Option<usize> {
    ///         Some(record.partition as usize % self.0)
    ///     }
    /// }
    ///
    /// let factory = DistributionStrategyFactory::new(|| Box::new(ByPartition(1)));
    /// let strategy = factory.create(4);
    /// assert_eq!(strategy.worker_for(&ConsumedRecord::new("t", 6, 0, b"")), Some(2));
    /// ```
    pub fn new<F>(create: F) -> Self
    where
        F: Fn() -> Box<dyn DistributionStrategy> + Send + Sync + 'static,
    {
        Self {
            create: Arc::new(create),
        }
    }

    /// Creates and initializes a strategy for `workers_count` workers.
    pub fn create(&self, workers_count: usize) -> Box<dyn DistributionStrategy> {
        let mut strategy = (self.create)();
        strategy.initialize(workers_count);
        strategy
    }
}

impl fmt::Debug for DistributionStrategyFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("DistributionStrategyFactory")
    }
}
