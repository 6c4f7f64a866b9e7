//! Run metrics recorded by the sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use chainpipe_core::types::Height;

#[derive(Debug, Default)]
struct Counters {
    heights_processed: AtomicU64,
    last_height: AtomicU64,
    total_duration_ms: AtomicU64,
    rpc_requests: AtomicU64,
}

/// Cloneable handle; every clone records into the same counters.
#[derive(Debug, Clone, Default)]
pub struct IndexerMetrics {
    counters: Arc<Counters>,
}

/// Point-in-time copy of [`IndexerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub heights_processed: u64,
    pub last_height: Height,
    pub total_duration_ms: u64,
    pub rpc_requests: u64,
}

impl MetricsSnapshot {
    pub fn avg_duration_ms(&self) -> u64 {
        self.total_duration_ms
            .checked_div(self.heights_processed)
            .unwrap_or_default()
    }
}

impl IndexerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one committed height.
    pub fn record_height(&self, height: Height, duration_ms: u64, requests: u64) {
        let c = &self.counters;
        c.heights_processed.fetch_add(1, Ordering::Relaxed);
        c.last_height.fetch_max(height, Ordering::Relaxed);
        c.total_duration_ms.fetch_add(duration_ms, Ordering::Relaxed);
        c.rpc_requests.fetch_add(requests, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let c = &self.counters;
        MetricsSnapshot {
            heights_processed: c.heights_processed.load(Ordering::Relaxed),
            last_height: c.last_height.load(Ordering::Relaxed),
            total_duration_ms: c.total_duration_ms.load(Ordering::Relaxed),
            rpc_requests: c.rpc_requests.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_counters() {
        let metrics = IndexerMetrics::new();
        let other = metrics.clone();
        metrics.record_height(10, 100, 4);
        other.record_height(9, 300, 2);

        let snap = metrics.snapshot();
        assert_eq!(snap.heights_processed, 2);
        assert_eq!(snap.last_height, 10);
        assert_eq!(snap.rpc_requests, 6);
        assert_eq!(snap.avg_duration_ms(), 200);
    }

    #[test]
    fn empty_snapshot_has_zero_average() {
        assert_eq!(IndexerMetrics::new().snapshot().avg_duration_ms(), 0);
    }
}
