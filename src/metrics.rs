//! Fan-out engine metrics.
//!
//! Counters are atomic so a host can park an `Arc<TreeMetrics>` reader in
//! its telemetry loop while the tree itself stays single-threaded.

use std::sync::atomic::{AtomicU64, Ordering};

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Monotonic counter.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, value: u64) {
        self.0.fetch_add(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Clone for Counter {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.get()))
    }
}

/// Current-value gauge.
#[derive(Debug, Default)]
pub struct Gauge(AtomicU64);

impl Gauge {
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    pub fn set(&self, value: u64) {
        self.0.store(value, Ordering::Relaxed);
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Clone for Gauge {
    fn clone(&self) -> Self {
        Self(AtomicU64::new(self.get()))
    }
}

// ---------------------------------------------------------------------------
// Tree metrics
// ---------------------------------------------------------------------------

/// Counters and gauges maintained by the topic tree.
#[derive(Debug, Default, Clone)]
pub struct TreeMetrics {
    /// Publish calls accepted.
    pub publishes: Counter,
    /// Messages copied into per-topic buffers (one publish can buffer into
    /// several matching topics).
    pub messages_buffered: Counter,
    /// Drain cycles that swept at least one triggered topic.
    pub drains: Counter,
    /// Sink invocations.
    pub deliveries: Counter,
    /// Payloads served from the intersection cache.
    pub cache_hits: Counter,
    /// Payloads materialized for a new intersection.
    pub cache_misses: Counter,
    /// Topic nodes released by trimming.
    pub nodes_trimmed: Counter,
    /// Live topic nodes, root excluded.
    pub live_nodes: Gauge,
    /// Registered subscribers.
    pub subscribers: Gauge,
}

impl TreeMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> TreeMetricsSnapshot {
        TreeMetricsSnapshot {
            publishes: self.publishes.get(),
            messages_buffered: self.messages_buffered.get(),
            drains: self.drains.get(),
            deliveries: self.deliveries.get(),
            cache_hits: self.cache_hits.get(),
            cache_misses: self.cache_misses.get(),
            nodes_trimmed: self.nodes_trimmed.get(),
            live_nodes: self.live_nodes.get(),
            subscribers: self.subscribers.get(),
        }
    }
}

/// Point-in-time export of [`TreeMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeMetricsSnapshot {
    pub publishes: u64,
    pub messages_buffered: u64,
    pub drains: u64,
    pub deliveries: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub nodes_trimmed: u64,
    pub live_nodes: u64,
    pub subscribers: u64,
}
