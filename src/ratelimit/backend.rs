//! Limiter trait for abstracting over permit sources.

use std::sync::Arc;

use super::bucket::TokenBucket;

/// Trait for rate limiter implementations.
///
/// Callers that only need to ask "may I proceed?" (such as the demo driver)
/// work against this trait rather than a concrete bucket.
pub trait Limiter: Send + Sync {
    /// Take one permit if available, without blocking.
    fn try_acquire(&self) -> bool;
}

impl Limiter for TokenBucket {
    fn try_acquire(&self) -> bool {
        TokenBucket::try_acquire(self)
    }
}

impl<L: Limiter + ?Sized> Limiter for Arc<L> {
    fn try_acquire(&self) -> bool {
        (**self).try_acquire()
    }
}
