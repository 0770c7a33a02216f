//! Opaque dependency-resolution context.
//!
//! The session never interprets the resolver; it only passes it through to
//! partition assignment and revocation handlers so they can reach
//! application services.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

/// Shared, type-erased handle to application dependencies.
///
/// # Example
///
/// ```rust
/// use ksession::resolver::DependencyResolver;
///
/// struct OffsetsRepository {
///     table: String,
/// }
///
/// let resolver = DependencyResolver::new(OffsetsRepository {
///     table: "offsets".to_string(),
/// });
/// let repo = resolver.resolve::<OffsetsRepository>().unwrap();
/// assert_eq!(repo.table, "offsets");
/// ```
#[derive(Clone, Default)]
pub struct DependencyResolver {
    inner: Option<Arc<dyn Any + Send + Sync>>,
}

impl DependencyResolver {
    /// Wraps a value as the resolution context.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            inner: Some(Arc::new(value)),
        }
    }

    /// Wraps an already shared value.
    pub fn from_arc(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self { inner: Some(value) }
    }

    /// A resolver with nothing in it.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Returns the context as `T` if that is what it holds.
    pub fn resolve<T: Any>(&self) -> Option<&T> {
        self.inner.as_ref().and_then(|value| value.downcast_ref::<T>())
    }

    /// Returns true when no context was supplied.
    pub fn is_empty(&self) -> bool {
        self.inner.is_none()
    }
}

impl fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("empty", &self.is_empty())
            .finish()
    }
}
