use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use trickle::config::TrickleConfig;
use trickle::driver;
use trickle::ratelimit::TokenBucket;

/// Drive a token bucket at a fixed pace and print each decision.
#[derive(Debug, Parser)]
#[command(name = "trickle", version, about)]
struct Args {
    /// Path to a YAML configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Tokens added per tick
    #[arg(long)]
    rate: Option<u64>,

    /// Maximum tokens held by the bucket
    #[arg(long)]
    capacity: Option<u64>,

    /// Milliseconds between replenishment ticks
    #[arg(long)]
    tick_ms: Option<u64>,

    /// Number of requests to issue
    #[arg(long)]
    requests: Option<u32>,

    /// Milliseconds to wait between requests
    #[arg(long)]
    pace_ms: Option<u64>,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .init();

    info!("Starting Trickle demo");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => TrickleConfig::from_file(path)?,
        None => TrickleConfig::default(),
    };
    apply_overrides(&mut config, &args);
    config.validate()?;

    info!(
        refill_rate = config.bucket.refill_rate,
        capacity = config.bucket.capacity,
        tick_interval_ms = config.bucket.tick_interval_ms,
        "Configuration loaded"
    );

    // Dropping the bucket stops it, so early returns below still clean up.
    let bucket = TokenBucket::from_config(&config.bucket)?;

    let mut stdout = std::io::stdout();
    let report = driver::run(&bucket, config.demo.requests, config.demo.pace(), &mut stdout).await?;

    info!(allowed = report.allowed, denied = report.denied, "Demo finished");

    bucket.shutdown().await;
    Ok(())
}

fn apply_overrides(config: &mut TrickleConfig, args: &Args) {
    if let Some(rate) = args.rate {
        config.bucket.refill_rate = rate;
    }
    if let Some(capacity) = args.capacity {
        config.bucket.capacity = capacity;
    }
    if let Some(tick_ms) = args.tick_ms {
        config.bucket.tick_interval_ms = tick_ms;
    }
    if let Some(requests) = args.requests {
        config.demo.requests = requests;
    }
    if let Some(pace_ms) = args.pace_ms {
        config.demo.pace_ms = pace_ms;
    }
}
