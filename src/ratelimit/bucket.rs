//! Token bucket implementation.

use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::config::{check_bucket_params, BucketConfig};
use crate::error::{Result, TrickleError};

use super::refill;

/// Default time between replenishment ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Mutable bucket state. Only ever touched while holding `Shared::state`.
#[derive(Debug)]
pub(crate) struct BucketState {
    /// Currently available permits, always within `[0, capacity]`
    pub(crate) tokens: u64,
    /// Cleared once by `stop`; never set again
    pub(crate) running: bool,
}

/// State shared between the bucket handle and its replenishment task.
#[derive(Debug)]
pub(crate) struct Shared {
    pub(crate) state: Mutex<BucketState>,
    refill_rate: u64,
    capacity: u64,
}

impl Shared {
    /// Add one tick's worth of tokens, clamped to capacity.
    ///
    /// Returns `false` once the bucket has been stopped, telling the
    /// replenishment task to exit.
    pub(crate) fn replenish(&self) -> bool {
        let (before, after) = {
            let mut state = self.state.lock();
            if !state.running {
                return false;
            }
            let before = state.tokens;
            state.tokens = before.saturating_add(self.refill_rate).min(self.capacity);
            (before, state.tokens)
        };

        if after != before {
            debug!(before, after, capacity = self.capacity, "Replenished token bucket");
        }
        true
    }
}

/// A token bucket rate limiter.
///
/// The bucket starts full. Every tick interval a background task adds
/// `refill_rate` tokens up to `capacity`; each successful
/// [`try_acquire`](Self::try_acquire) removes one. All reads and writes of
/// the token count go through a single mutex, so concurrent callers never
/// share the last token.
///
/// The replenishment task lives on the tokio runtime that was current when
/// the bucket was created. It stops on [`stop`](Self::stop), on
/// [`shutdown`](Self::shutdown), or when the bucket is dropped.
pub struct TokenBucket {
    shared: Arc<Shared>,
    tick_interval: Duration,
    /// Taken by the first `stop`; later calls find `None`
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for TokenBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenBucket")
            .field("refill_rate", &self.shared.refill_rate)
            .field("capacity", &self.shared.capacity)
            .field("tick_interval", &self.tick_interval)
            .field("state", &*self.shared.state.lock())
            .finish()
    }
}

impl TokenBucket {
    /// Create a bucket that replenishes once per second.
    pub fn new(refill_rate: u64, capacity: u64) -> Result<Self> {
        Self::with_interval(refill_rate, capacity, DEFAULT_TICK_INTERVAL)
    }

    /// Create a bucket from configuration.
    pub fn from_config(config: &BucketConfig) -> Result<Self> {
        Self::with_interval(config.refill_rate, config.capacity, config.tick_interval())
    }

    /// Create a bucket with an explicit tick interval.
    ///
    /// Must be called from within a tokio runtime, which hosts the
    /// replenishment task. The task is running before this returns.
    pub fn with_interval(refill_rate: u64, capacity: u64, tick_interval: Duration) -> Result<Self> {
        check_bucket_params(refill_rate, capacity, tick_interval)?;

        let runtime = Handle::try_current().map_err(|e| TrickleError::Runtime(e.to_string()))?;

        let shared = Arc::new(Shared {
            state: Mutex::new(BucketState {
                tokens: capacity,
                running: true,
            }),
            refill_rate,
            capacity,
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let start = tokio::time::Instant::now() + tick_interval;
        let task = runtime.spawn(refill::run(shared.clone(), start, tick_interval, shutdown_rx));

        info!(
            refill_rate,
            capacity,
            tick_interval = ?tick_interval,
            "Token bucket created"
        );

        Ok(Self {
            shared,
            tick_interval,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            task: Mutex::new(Some(task)),
        })
    }

    /// Take one permit if any are available.
    ///
    /// Never blocks waiting for tokens; callers that want to wait must retry.
    pub fn try_acquire(&self) -> bool {
        let (observed, granted) = {
            let mut state = self.shared.state.lock();
            let observed = state.tokens;
            let granted = observed > 0;
            if granted {
                state.tokens -= 1;
            }
            (observed, granted)
        };

        trace!(tokens = observed, granted, "Checked token bucket");
        if !granted {
            debug!(capacity = self.shared.capacity, "Token bucket empty, permit denied");
        }
        granted
    }

    /// Stop replenishment permanently.
    ///
    /// Safe to call any number of times. Once this returns no tick adds
    /// tokens; `try_acquire` keeps working against the frozen count.
    pub fn stop(&self) {
        let tokens = {
            let mut state = self.shared.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            state.tokens
        };

        if let Some(tx) = self.shutdown_tx.lock().take() {
            // The task may already be gone if its runtime shut down.
            let _ = tx.send(());
        }

        info!(tokens, "Token bucket stopped");
    }

    /// Stop replenishment and wait for the background task to exit.
    pub async fn shutdown(&self) {
        self.stop();

        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "Replenishment task did not exit cleanly");
            }
        }
    }

    /// Tokens currently available.
    pub fn available(&self) -> u64 {
        self.shared.state.lock().tokens
    }

    /// Whether the bucket is still replenishing.
    pub fn is_running(&self) -> bool {
        self.shared.state.lock().running
    }

    /// Tokens added per tick.
    pub fn refill_rate(&self) -> u64 {
        self.shared.refill_rate
    }

    /// Maximum number of tokens the bucket holds.
    pub fn capacity(&self) -> u64 {
        self.shared.capacity
    }

    /// Time between replenishment ticks.
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }
}

impl Drop for TokenBucket {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    const FAST_TICK: Duration = Duration::from_millis(50);
    const NO_TICK: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_burst_capacity() {
        let bucket = TokenBucket::new(2, 3).unwrap();

        for i in 1..=3 {
            assert!(bucket.try_acquire(), "Request {} should be allowed", i);
        }

        // All tokens are exhausted now
        assert!(!bucket.try_acquire());
        bucket.stop();
    }

    #[tokio::test]
    async fn test_allow_then_deny() {
        let bucket = TokenBucket::new(2, 5).unwrap();

        for i in 1..=5 {
            assert!(bucket.try_acquire(), "Request {} should be allowed", i);
        }

        assert!(!bucket.try_acquire());
        assert_eq!(bucket.available(), 0);
    }

    #[tokio::test]
    async fn test_starts_full() {
        let bucket = TokenBucket::new(1, 7).unwrap();
        assert_eq!(bucket.available(), 7);
        assert_eq!(bucket.capacity(), 7);
        assert_eq!(bucket.refill_rate(), 1);
        assert_eq!(bucket.tick_interval(), DEFAULT_TICK_INTERVAL);
        assert!(bucket.is_running());
    }

    #[tokio::test]
    async fn test_replenishes_after_exhaustion() {
        let bucket = TokenBucket::with_interval(1, 2, FAST_TICK).unwrap();

        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert!(!bucket.try_acquire());

        sleep(FAST_TICK + Duration::from_millis(30)).await;

        assert!(bucket.try_acquire());
    }

    #[tokio::test]
    async fn test_refill_adds_rate_tokens_per_tick() {
        let tick = Duration::from_millis(100);
        let bucket = TokenBucket::with_interval(3, 10, tick).unwrap();

        for _ in 0..10 {
            assert!(bucket.try_acquire());
        }
        assert_eq!(bucket.available(), 0);

        // Land between the first and second tick
        sleep(tick + tick / 2).await;

        assert_eq!(bucket.available(), 3);
    }

    #[tokio::test]
    async fn test_refill_clamps_to_capacity() {
        let bucket = TokenBucket::with_interval(4, 5, Duration::from_millis(20)).unwrap();

        assert!(bucket.try_acquire());
        assert!(bucket.try_acquire());
        assert_eq!(bucket.available(), 3);

        sleep(Duration::from_millis(60)).await;

        assert_eq!(bucket.available(), 5);
    }

    #[tokio::test]
    async fn test_idle_bucket_never_exceeds_capacity() {
        let bucket = TokenBucket::with_interval(3, 4, Duration::from_millis(10)).unwrap();

        for _ in 0..10 {
            sleep(Duration::from_millis(15)).await;
            let available = bucket.available();
            assert!(available <= bucket.capacity(), "{} tokens exceeds capacity", available);
        }

        assert_eq!(bucket.available(), 4);
    }

    #[tokio::test]
    async fn test_stop_halts_replenishment() {
        let bucket = TokenBucket::with_interval(1, 2, Duration::from_millis(20)).unwrap();

        bucket.try_acquire();
        bucket.try_acquire();

        bucket.stop();
        assert!(!bucket.is_running());

        // Drain anything a tick slipped in before the stop
        while bucket.try_acquire() {}

        sleep(Duration::from_millis(120)).await;

        assert!(!bucket.try_acquire());
        assert_eq!(bucket.available(), 0);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let bucket = TokenBucket::with_interval(1, 2, FAST_TICK).unwrap();

        bucket.stop();
        bucket.stop();
        bucket.shutdown().await;
        bucket.shutdown().await;

        assert!(!bucket.is_running());
    }

    #[tokio::test]
    async fn test_acquire_after_stop_uses_frozen_count() {
        let bucket = TokenBucket::new(1, 3).unwrap();
        bucket.stop();

        for _ in 0..3 {
            assert!(bucket.try_acquire());
        }
        assert!(!bucket.try_acquire());
    }

    #[tokio::test]
    async fn test_shutdown_joins_task() {
        let bucket = TokenBucket::with_interval(1, 2, FAST_TICK).unwrap();
        assert_eq!(Arc::strong_count(&bucket.shared), 2);

        bucket.shutdown().await;

        // The task held the only other reference
        assert_eq!(Arc::strong_count(&bucket.shared), 1);
    }

    #[tokio::test]
    async fn test_drop_stops_task() {
        let bucket = TokenBucket::with_interval(1, 2, FAST_TICK).unwrap();
        let shared = bucket.shared.clone();

        drop(bucket);
        sleep(Duration::from_millis(20)).await;

        assert!(!shared.state.lock().running);
        assert_eq!(Arc::strong_count(&shared), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_callers_never_over_grant() {
        let bucket = Arc::new(TokenBucket::with_interval(1, 100, NO_TICK).unwrap());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move {
                let mut granted = 0u64;
                for _ in 0..50 {
                    if bucket.try_acquire() {
                        granted += 1;
                    }
                }
                granted
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }

        assert_eq!(total, 100);
        assert_eq!(bucket.available(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 8)]
    async fn test_concurrent_callers_with_refill() {
        let tick = Duration::from_millis(5);
        let rate = 2;
        let capacity = 10;
        let bucket = Arc::new(TokenBucket::with_interval(rate, capacity, tick).unwrap());
        let started = tokio::time::Instant::now();
        let deadline = started + Duration::from_millis(60);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let bucket = bucket.clone();
            handles.push(tokio::spawn(async move {
                let mut granted = 0u64;
                while tokio::time::Instant::now() < deadline {
                    if bucket.try_acquire() {
                        granted += 1;
                    }
                    let available = bucket.available();
                    assert!(available <= capacity, "{} tokens exceeds capacity", available);
                    tokio::task::yield_now().await;
                }
                granted
            }));
        }

        let mut granted = 0;
        for handle in handles {
            granted += handle.await.unwrap();
        }
        bucket.stop();

        let remaining = bucket.available();
        let elapsed_ticks = (started.elapsed().as_millis() / tick.as_millis()) as u64 + 1;
        assert!(remaining <= capacity);
        assert!(
            granted + remaining <= capacity + rate * elapsed_ticks,
            "granted={} remaining={} ticks<={}",
            granted,
            remaining,
            elapsed_ticks
        );
        // Refills landed while callers were competing
        assert!(granted > capacity, "granted={}", granted);
    }

    #[tokio::test]
    async fn test_config_and_direct_construction_reject_alike() {
        let config = BucketConfig {
            refill_rate: 0,
            capacity: 4,
            tick_interval_ms: 250,
        };
        let from_config = TokenBucket::from_config(&config).unwrap_err().to_string();
        let direct = TokenBucket::new(0, 4).unwrap_err().to_string();

        assert_eq!(from_config, direct);
        assert_eq!(config.validate().unwrap_err().to_string(), direct);
    }

    #[tokio::test]
    async fn test_rejects_zero_rate() {
        let err = TokenBucket::new(0, 5).unwrap_err();
        assert!(matches!(err, TrickleError::Config(_)));
    }

    #[tokio::test]
    async fn test_rejects_zero_capacity() {
        let err = TokenBucket::new(5, 0).unwrap_err();
        assert!(matches!(err, TrickleError::Config(_)));
    }

    #[tokio::test]
    async fn test_rejects_zero_interval() {
        let err = TokenBucket::with_interval(1, 1, Duration::ZERO).unwrap_err();
        assert!(matches!(err, TrickleError::Config(_)));
    }

    #[test]
    fn test_requires_runtime() {
        let err = TokenBucket::new(1, 1).unwrap_err();
        assert!(matches!(err, TrickleError::Runtime(_)));
    }

    #[tokio::test]
    async fn test_from_config() {
        let config = BucketConfig {
            refill_rate: 2,
            capacity: 4,
            tick_interval_ms: 250,
        };
        let bucket = TokenBucket::from_config(&config).unwrap();

        assert_eq!(bucket.refill_rate(), 2);
        assert_eq!(bucket.capacity(), 4);
        assert_eq!(bucket.tick_interval(), Duration::from_millis(250));
        assert_eq!(bucket.available(), 4);
    }
}
