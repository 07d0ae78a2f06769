//! Background replenishment task.
//!
//! One task is spawned per bucket. It wakes once per tick interval and tops
//! the bucket up until the bucket is stopped.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

use super::bucket::Shared;

/// Run the replenishment loop until the shutdown signal fires.
///
/// `start` is the instant of the first tick; the bucket passes
/// construction time plus one interval so a fresh bucket is not topped up
/// immediately.
pub(crate) async fn run(
    shared: Arc<Shared>,
    start: Instant,
    tick_interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut ticker = interval_at(start, tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    trace!(tick_interval = ?tick_interval, "Replenishment task started");

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if !shared.replenish() {
                    break;
                }
            }
            // A dropped sender means the bucket is gone, which is also a stop.
            _ = &mut shutdown => {
                break;
            }
        }
    }

    debug!("Replenishment task exiting");
}
