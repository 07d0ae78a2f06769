//! Trickle - Token Bucket Rate Limiting
//!
//! This crate implements a token bucket rate limiter. A bucket holds a capped
//! number of permits that callers take one at a time; a background tokio task
//! refills it on a fixed interval until the bucket is stopped.

pub mod config;
pub mod driver;
pub mod error;
pub mod ratelimit;
