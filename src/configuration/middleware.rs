//! Middleware registration.
//!
//! Middlewares are the per-record processing steps a worker runs, in the
//! order they were registered. The session only carries them; executing
//! them is up to whoever owns the records.

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

use crate::types::ConsumedRecord;

/// Error type returned by middlewares.
pub type MiddlewareError = Box<dyn std::error::Error + Send + Sync>;

/// A processing step applied to consumed records.
///
/// # Example
///
/// ```rust
/// use ksession::configuration::middleware::{Middleware, MiddlewareError};
/// use ksession::types::ConsumedRecord;
///
/// struct Audit;
///
/// #[async_trait::async_trait]
/// impl Middleware for Audit {
///     async fn handle(&self, record: &ConsumedRecord) -> Result<(), MiddlewareError> {
///         println!("{} @ {}", record.topic, record.offset);
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Processes a record.
    ///
    /// Returning `Err` stops the remaining middlewares for this record.
    async fn handle(&self, record: &ConsumedRecord) -> Result<(), MiddlewareError>;
}

/// Accumulates middlewares in registration order.
#[derive(Default, Clone)]
pub struct MiddlewareConfigurationBuilder {
    middlewares: Vec<Arc<dyn Middleware>>,
}

impl MiddlewareConfigurationBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a middleware.
    pub fn add<M: Middleware + 'static>(&mut self, middleware: M) -> &mut Self {
        self.middlewares.push(Arc::new(middleware));
        self
    }

    /// Appends an already shared middleware.
    pub fn add_shared(&mut self, middleware: Arc<dyn Middleware>) -> &mut Self {
        self.middlewares.push(middleware);
        self
    }

    /// Number of registered middlewares.
    pub fn len(&self) -> usize {
        self.middlewares.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.middlewares.is_empty()
    }

    pub(crate) fn into_inner(self) -> Vec<Arc<dyn Middleware>> {
        self.middlewares
    }
}

impl fmt::Debug for MiddlewareConfigurationBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareConfigurationBuilder")
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// Runs `middlewares` over `record` in order, stopping at the first error.
pub async fn run_middlewares(
    middlewares: &[Arc<dyn Middleware>],
    record: &ConsumedRecord,
) -> Result<(), MiddlewareError> {
    for middleware in middlewares {
        middleware.handle(record).await?;
    }
    Ok(())
}
