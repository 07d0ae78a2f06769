//! Demonstration driver.
//!
//! Polls a limiter at a fixed pace and writes one allow/deny line per request.

use std::io::Write;
use std::time::Duration;
use tracing::debug;

use crate::error::Result;
use crate::ratelimit::Limiter;

/// Outcome of a driver run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DriverReport {
    /// Requests that were granted a permit
    pub allowed: u32,
    /// Requests that were turned away
    pub denied: u32,
}

/// Issue `requests` requests against `limiter`, pausing `pace` between them.
pub async fn run<L, W>(
    limiter: &L,
    requests: u32,
    pace: Duration,
    out: &mut W,
) -> Result<DriverReport>
where
    L: Limiter + ?Sized,
    W: Write,
{
    let mut report = DriverReport::default();

    for i in 1..=requests {
        if limiter.try_acquire() {
            report.allowed += 1;
            writeln!(out, "Request {} allowed", i)?;
        } else {
            report.denied += 1;
            writeln!(out, "Request {} denied", i)?;
        }

        debug!(request = i, allowed = report.allowed, denied = report.denied, "Driver step");

        if i < requests && !pace.is_zero() {
            tokio::time::sleep(pace).await;
        }
    }

    out.flush()?;
    Ok(report)
}
