//! Process-wide counters for snapshot runs.
//!
//! Incremented silently at the call site and emitted as one
//! `tracing::info!` event by [`Metrics::flush`] when a run ends.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    events_received: AtomicU64,
    records_dropped: AtomicU64,
    relists: AtomicU64,
    watch_restarts: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            events_received: AtomicU64::new(0),
            records_dropped: AtomicU64::new(0),
            relists: AtomicU64::new(0),
            watch_restarts: AtomicU64::new(0),
        }
    }

    /// A raw event reached the normalizer.
    pub fn inc_events_received(&self) {
        self.events_received.fetch_add(1, Ordering::Relaxed);
    }

    /// The normalizer rejected a payload.
    pub fn inc_records_dropped(&self) {
        self.records_dropped.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "records_dropped", "counter incremented");
    }

    /// A watcher listed a scope again after its first list.
    pub fn inc_relists(&self) {
        self.relists.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "relists", "counter incremented");
    }

    /// A watch stream was reopened from the last version.
    pub fn inc_watch_restarts(&self) {
        self.watch_restarts.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(metric = "watch_restarts", "counter incremented");
    }

    pub fn flush(&self) {
        tracing::info!(
            metric = "flush",
            events_received = self.events_received(),
            records_dropped = self.records_dropped(),
            relists = self.relists(),
            watch_restarts = self.watch_restarts(),
        );
    }

    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    pub fn records_dropped(&self) -> u64 {
        self.records_dropped.load(Ordering::Relaxed)
    }

    pub fn relists(&self) -> u64 {
        self.relists.load(Ordering::Relaxed)
    }

    pub fn watch_restarts(&self) -> u64 {
        self.watch_restarts.load(Ordering::Relaxed)
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        self.events_received.store(0, Ordering::Relaxed);
        self.records_dropped.store(0, Ordering::Relaxed);
        self.relists.store(0, Ordering::Relaxed);
        self.watch_restarts.store(0, Ordering::Relaxed);
    }
}
