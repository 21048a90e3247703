//! Daemon runtime counters.
//!
//! Tracks how much work the daemon has done since it started. The daemon
//! itself is single-tasked, but counters are atomics so tests and companion
//! tooling can read them from other tasks while the daemon runs.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Monotonic event counter
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    /// Create a new counter
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment the counter by 1
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// Up/down gauge for tracking a current quantity
#[derive(Debug, Default)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    /// Create a new gauge
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    /// Increment the gauge
    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    /// Decrement the gauge
    pub fn dec(&self) {
        self.value.fetch_sub(1, Ordering::Relaxed);
    }

    /// Get the current value
    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// All counters exposed by the daemon
#[derive(Debug)]
pub struct DaemonStats {
    /// Records appended to the log file, drained records included
    pub messages: Counter,
    /// Append retries after a failed log file write
    pub retries: Counter,
    /// Configuration reloads that were applied
    pub reloads: Counter,
    /// Explicit syncs of the log file to stable storage
    pub syncs: Counter,
    /// Currently connected producers
    pub clients: Gauge,
    started_unix: u64,
}

impl DaemonStats {
    /// Create new stats, stamping the start time
    pub fn new() -> Self {
        let started_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            messages: Counter::new(),
            retries: Counter::new(),
            reloads: Counter::new(),
            syncs: Counter::new(),
            clients: Gauge::new(),
            started_unix,
        }
    }

    /// Create a shareable stats instance
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Unix timestamp (seconds) at which the daemon started
    pub fn started_unix(&self) -> u64 {
        self.started_unix
    }

    /// Take a point-in-time snapshot of all counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages: self.messages.get(),
            retries: self.retries.get(),
            reloads: self.reloads.get(),
            syncs: self.syncs.get(),
            clients: self.clients.get(),
            started_unix: self.started_unix,
        }
    }
}

impl Default for DaemonStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of all daemon counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Records appended to the log file
    pub messages: u64,
    /// Append retries after a failed write
    pub retries: u64,
    /// Configuration reloads applied
    pub reloads: u64,
    /// Explicit log file syncs
    pub syncs: u64,
    /// Currently connected producers
    pub clients: u64,
    /// Unix timestamp at daemon start
    pub started_unix: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.inc();
        assert_eq!(counter.get(), 2);
    }

    #[test]
    fn test_gauge() {
        let gauge = Gauge::new();
        assert_eq!(gauge.get(), 0);

        gauge.inc();
        gauge.inc();
        assert_eq!(gauge.get(), 2);

        gauge.dec();
        assert_eq!(gauge.get(), 1);
    }

    #[test]
    fn test_snapshot() {
        let stats = DaemonStats::new();
        stats.messages.inc();
        stats.messages.inc();
        stats.syncs.inc();
        stats.clients.inc();

        let snapshot = stats.snapshot();
        assert_eq!(snapshot.messages, 2);
        assert_eq!(snapshot.syncs, 1);
        assert_eq!(snapshot.clients, 1);
        assert_eq!(snapshot.retries, 0);
        assert_eq!(snapshot.started_unix, stats.started_unix());
    }

    #[test]
    fn test_start_time_stamped() {
        let stats = DaemonStats::new();
        assert!(stats.started_unix() > 0);
    }
}
