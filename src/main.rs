//! redis-tap: a Redis proxy that correlates GET/SET requests with their
//! responses and reports per-key statistics.

use redis_tap::config::Config;
use redis_tap::runtime::{Dispatcher, EventEmitter, TransactionStore};
use redis_tap::stats::{self, StatsAggregator};
use redis_tap::tap::Tap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        upstream = %config.upstream,
        capture = ?config.capture,
        workers = ?config.workers,
        report_interval = config.report_interval,
        "Starting redis-tap"
    );

    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_all();
    if let Some(workers) = config.workers {
        builder.worker_threads(workers);
    }
    let runtime = builder.build()?;

    runtime.block_on(run(config))
}

async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    let (emitter, receiver) = EventEmitter::channel();
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(TransactionStore::new()), emitter));

    let servers = match tokio::net::lookup_host(&config.upstream).await {
        Ok(addrs) => addrs.collect(),
        Err(e) => {
            warn!(upstream = %config.upstream, error = %e, "Failed to resolve upstream for stats");
            Vec::new()
        }
    };
    let (stop_stats, shutdown) = oneshot::channel();
    let consumer = tokio::spawn(stats::run_consumer(
        receiver,
        StatsAggregator::new(config.max_keys).with_servers(servers),
        Duration::from_secs(config.report_interval),
        shutdown,
    ));

    let tap = Tap::new(config, Arc::clone(&dispatcher));

    tokio::select! {
        result = tap.run() => result?,
        _ = tokio::signal::ctrl_c() => info!("Received shutdown signal"),
    }

    info!(
        emitted = dispatcher.emitter().emitted(),
        dropped = dispatcher.emitter().dropped(),
        pending = dispatcher.store().len(),
        active = tap.active_connections(),
        proxying = tap.proxying_connections(),
        "Shutting down"
    );
    drop(tap);
    drop(dispatcher);

    // Connection tasks may still hold senders; stop the consumer explicitly.
    if stop_stats.send(()).is_err() {
        warn!("Stats consumer already stopped");
    }
    let consumed = consumer.await?;
    info!(consumed, "Stats consumer finished");

    Ok(())
}
