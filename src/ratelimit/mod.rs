//! Token bucket rate limiting and its replenishment task.

mod backend;
mod bucket;
mod refill;

pub use backend::Limiter;
pub use bucket::{TokenBucket, DEFAULT_TICK_INTERVAL};
