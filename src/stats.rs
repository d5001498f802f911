//! Aggregation of emitted events into per-key request statistics.
//!
//! The consumer task drains the event channel, groups transactions by
//! server endpoint, command, key and outcome, and logs a report every
//! interval before starting over.
//!
//! Socket-captured tuples are normalized by port, so either side may be the
//! server. The aggregator is told which addresses are servers and falls back
//! to the destination, the server side of library-captured tuples.

use crate::protocols::redis::Command;
use crate::runtime::{ConnTuple, Event, EventReceiver};
use chrono::Utc;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

/// Grouping key for statistics.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StatKey {
    pub server: SocketAddr,
    pub command: Command,
    pub key: String,
    pub truncated: bool,
    pub is_error: bool,
}

impl StatKey {
    fn from_event(event: &Event, servers: &[SocketAddr]) -> Self {
        Self {
            server: server_endpoint(&event.tuple, servers),
            command: event.tx.command,
            key: String::from_utf8_lossy(event.tx.key()).into_owned(),
            truncated: event.tx.truncated,
            is_error: event.tx.is_error,
        }
    }
}

/// The side of `tuple` that is a known server, else the destination.
fn server_endpoint(tuple: &ConnTuple, servers: &[SocketAddr]) -> SocketAddr {
    let source = tuple.source();
    if servers.contains(&source) {
        source
    } else {
        tuple.destination()
    }
}

/// Counters for one `StatKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestStats {
    pub count: u64,
    pub latency_sum_ns: u64,
    pub latency_min_ns: u64,
    pub latency_max_ns: u64,
}

impl RequestStats {
    fn new(latency_ns: u64) -> Self {
        Self {
            count: 1,
            latency_sum_ns: latency_ns,
            latency_min_ns: latency_ns,
            latency_max_ns: latency_ns,
        }
    }

    fn record(&mut self, latency_ns: u64) {
        self.count += 1;
        self.latency_sum_ns = self.latency_sum_ns.saturating_add(latency_ns);
        self.latency_min_ns = self.latency_min_ns.min(latency_ns);
        self.latency_max_ns = self.latency_max_ns.max(latency_ns);
    }

    pub fn mean_latency_ns(&self) -> u64 {
        if self.count == 0 {
            0
        } else {
            self.latency_sum_ns / self.count
        }
    }
}

/// One interval's worth of statistics.
#[derive(Debug, Default)]
pub struct StatsReport {
    /// Entries ordered by descending count.
    pub entries: Vec<(StatKey, RequestStats)>,
    /// Events not tracked because `max_keys` was reached.
    pub overflow: u64,
    /// Records that failed to decode.
    pub decode_errors: u64,
}

impl StatsReport {
    pub fn total(&self) -> u64 {
        self.entries.iter().map(|(_, stats)| stats.count).sum()
    }
}

/// Accumulates events until drained.
pub struct StatsAggregator {
    max_keys: usize,
    servers: Vec<SocketAddr>,
    entries: HashMap<StatKey, RequestStats>,
    overflow: u64,
    decode_errors: u64,
}

impl StatsAggregator {
    pub fn new(max_keys: usize) -> Self {
        Self {
            max_keys,
            servers: Vec::new(),
            entries: HashMap::new(),
            overflow: 0,
            decode_errors: 0,
        }
    }

    /// Addresses known to be servers, used to orient normalized tuples.
    pub fn with_servers(mut self, servers: Vec<SocketAddr>) -> Self {
        self.servers = servers;
        self
    }

    pub fn record(&mut self, event: &Event) {
        let latency = event.tx.latency_ns();
        let key = StatKey::from_event(event, &self.servers);

        if let Some(stats) = self.entries.get_mut(&key) {
            stats.record(latency);
        } else if self.entries.len() < self.max_keys {
            self.entries.insert(key, RequestStats::new(latency));
        } else {
            self.overflow += 1;
        }
    }

    /// Decode and record one raw event record.
    pub fn record_raw(&mut self, record: &[u8]) {
        match Event::decode(record) {
            Ok(event) => self.record(&event),
            Err(e) => {
                self.decode_errors += 1;
                warn!(error = %e, "Failed to decode event record");
            }
        }
    }

    /// Number of distinct keys tracked.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Take the accumulated statistics and reset.
    pub fn drain(&mut self) -> StatsReport {
        let mut entries: Vec<_> = self.entries.drain().collect();
        entries.sort_by(|a, b| b.1.count.cmp(&a.1.count).then_with(|| a.0.key.cmp(&b.0.key)));

        StatsReport {
            entries,
            overflow: std::mem::take(&mut self.overflow),
            decode_errors: std::mem::take(&mut self.decode_errors),
        }
    }
}

fn log_report(report: &StatsReport) {
    if report.entries.is_empty() && report.overflow == 0 && report.decode_errors == 0 {
        return;
    }

    info!(
        at = %Utc::now().to_rfc3339(),
        transactions = report.total(),
        keys = report.entries.len(),
        overflow = report.overflow,
        decode_errors = report.decode_errors,
        "Redis statistics"
    );

    for (key, stats) in &report.entries {
        debug!(
            server = %key.server,
            command = %key.command,
            key = %key.key,
            truncated = key.truncated,
            error = key.is_error,
            count = stats.count,
            mean_us = stats.mean_latency_ns() / 1_000,
            min_us = stats.latency_min_ns / 1_000,
            max_us = stats.latency_max_ns / 1_000,
            "Key statistics"
        );
    }
}

/// Consume event records, reporting every `interval`, until every emitter
/// is gone or `shutdown` fires. Records already queued at shutdown are
/// still counted and the final partial interval is reported. Returns the
/// number of records consumed.
pub async fn run_consumer(
    mut receiver: EventReceiver,
    mut aggregator: StatsAggregator,
    interval: Duration,
    mut shutdown: oneshot::Receiver<()>,
) -> u64 {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    let mut consumed = 0;
    loop {
        tokio::select! {
            record = receiver.recv() => match record {
                Some(record) => {
                    consumed += 1;
                    aggregator.record_raw(&record);
                }
                None => {
                    debug!(consumed, "Event channel closed");
                    break;
                }
            },
            _ = &mut shutdown => {
                while let Ok(record) = receiver.try_recv() {
                    consumed += 1;
                    aggregator.record_raw(&record);
                }
                debug!(consumed, "Stats consumer stopping");
                break;
            }
            _ = ticker.tick() => log_report(&aggregator.drain()),
        }
    }

    log_report(&aggregator.drain());
    consumed
}
