//! Observability and metrics for a collector pipeline
//!
//! Counters are plain atomics so the control path can read them while the
//! delivery task writes. Every per-tick failure bumps `errors` plus exactly
//! one cause-specific counter, so the breakdown always sums to `errors`.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

/// Why a tick or bar was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Tick for a token that was never registered.
    UnknownInstrument,
    /// Tick older than the open bar of its instrument.
    LateTick,
    /// Storage rejected a tick or bar write.
    StorageFailure,
    /// Bounded delivery queue was full.
    QueueOverflow,
    /// Transport-level error reported by the ticker.
    Transport,
}

/// Core metrics for one collector.
pub struct CollectorMetrics {
    pub ticks_received: AtomicU64,
    pub bars_created: AtomicU64,
    pub errors: AtomicU64,

    // Error breakdown
    pub unknown_instruments: AtomicU64,
    pub late_ticks: AtomicU64,
    pub storage_failures: AtomicU64,
    pub queue_overflows: AtomicU64,
    pub transport_errors: AtomicU64,

    pub tick_processing_ns: Mutex<LatencyTracker>,
}

impl CollectorMetrics {
    pub fn new(latency_window: usize) -> Self {
        Self {
            ticks_received: AtomicU64::new(0),
            bars_created: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            unknown_instruments: AtomicU64::new(0),
            late_ticks: AtomicU64::new(0),
            storage_failures: AtomicU64::new(0),
            queue_overflows: AtomicU64::new(0),
            transport_errors: AtomicU64::new(0),
            tick_processing_ns: Mutex::new(LatencyTracker::new(latency_window)),
        }
    }

    /// Record a tick entering the delivery path.
    pub fn record_tick(&self) {
        self.ticks_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a completed bar persisted to storage.
    pub fn record_bars(&self, count: u64) {
        self.bars_created.fetch_add(count, Ordering::Relaxed);
    }

    /// Record a dropped tick or failed write.
    pub fn record_error(&self, reason: DropReason) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let counter = match reason {
            DropReason::UnknownInstrument => &self.unknown_instruments,
            DropReason::LateTick => &self.late_ticks,
            DropReason::StorageFailure => &self.storage_failures,
            DropReason::QueueOverflow => &self.queue_overflows,
            DropReason::Transport => &self.transport_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long one tick spent in the delivery path.
    pub fn record_latency(&self, latency_ns: u64) {
        if let Ok(mut tracker) = self.tick_processing_ns.lock() {
            tracker.record(latency_ns);
        }
    }

    /// Point-in-time view combined with collector lifecycle facts.
    pub fn snapshot(&self, running: bool, subscribed_tokens: usize) -> MetricsSnapshot {
        let (p50, p99) = match self.tick_processing_ns.lock() {
            Ok(tracker) => (tracker.percentile(50), tracker.percentile(99)),
            Err(_) => (None, None),
        };

        MetricsSnapshot {
            running,
            subscribed_tokens,
            ticks_received: self.ticks_received.load(Ordering::Relaxed),
            bars_created: self.bars_created.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            unknown_instruments: self.unknown_instruments.load(Ordering::Relaxed),
            late_ticks: self.late_ticks.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            queue_overflows: self.queue_overflows.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
            tick_processing_p50_ns: p50,
            tick_processing_p99_ns: p99,
        }
    }
}

impl Default for CollectorMetrics {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Serializable metrics for one collector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub running: bool,
    pub subscribed_tokens: usize,
    pub ticks_received: u64,
    pub bars_created: u64,
    pub errors: u64,
    pub unknown_instruments: u64,
    pub late_ticks: u64,
    pub storage_failures: u64,
    pub queue_overflows: u64,
    pub transport_errors: u64,
    pub tick_processing_p50_ns: Option<u64>,
    pub tick_processing_p99_ns: Option<u64>,
}

impl MetricsSnapshot {
    /// Export counters as a BTreeMap for Prometheus-style exposition.
    pub fn export(&self) -> BTreeMap<String, u64> {
        let mut m = BTreeMap::new();
        m.insert("running".to_string(), u64::from(self.running));
        m.insert("subscribed_tokens".to_string(), self.subscribed_tokens as u64);
        m.insert("ticks_received".to_string(), self.ticks_received);
        m.insert("bars_created".to_string(), self.bars_created);
        m.insert("errors".to_string(), self.errors);
        m.insert("unknown_instruments".to_string(), self.unknown_instruments);
        m.insert("late_ticks".to_string(), self.late_ticks);
        m.insert("storage_failures".to_string(), self.storage_failures);
        m.insert("queue_overflows".to_string(), self.queue_overflows);
        m.insert("transport_errors".to_string(), self.transport_errors);
        m
    }
}

/// Tracks latency samples for percentile calculation.
pub struct LatencyTracker {
    samples: VecDeque<u64>,
    max_samples: usize,
}

impl LatencyTracker {
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples: max_samples.max(1),
        }
    }

    /// Record a latency sample.
    pub fn record(&mut self, value: u64) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(value);
    }

    /// Get a percentile value (0-100).
    pub fn percentile(&self, p: usize) -> Option<u64> {
        if self.samples.is_empty() {
            return None;
        }

        let mut sorted: Vec<u64> = self.samples.iter().copied().collect();
        sorted.sort_unstable();

        let idx = (p.min(100) as f64 / 100.0 * (sorted.len() - 1) as f64) as usize;
        Some(sorted[idx.min(sorted.len() - 1)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = CollectorMetrics::default();

        for _ in 0..100 {
            metrics.record_tick();
        }
        metrics.record_bars(10);
        metrics.record_error(DropReason::UnknownInstrument);
        metrics.record_error(DropReason::LateTick);

        let snap = metrics.snapshot(false, 3);
        assert_eq!(snap.ticks_received, 100);
        assert_eq!(snap.bars_created, 10);
        assert_eq!(snap.errors, 2);
        assert_eq!(snap.unknown_instruments, 1);
        assert_eq!(snap.late_ticks, 1);
        assert_eq!(snap.subscribed_tokens, 3);
        assert!(!snap.running);
    }

    #[test]
    fn test_error_breakdown_sums_to_errors() {
        let metrics = CollectorMetrics::default();
        metrics.record_error(DropReason::StorageFailure);
        metrics.record_error(DropReason::StorageFailure);
        metrics.record_error(DropReason::QueueOverflow);
        metrics.record_error(DropReason::Transport);

        let snap = metrics.snapshot(true, 0);
        let breakdown = snap.unknown_instruments
            + snap.late_ticks
            + snap.storage_failures
            + snap.queue_overflows
            + snap.transport_errors;
        assert_eq!(snap.errors, 4);
        assert_eq!(breakdown, snap.errors);
    }

    #[test]
    fn test_snapshot_export() {
        let metrics = CollectorMetrics::default();
        metrics.record_tick();
        metrics.record_bars(1);

        let exported = metrics.snapshot(true, 2).export();
        assert_eq!(exported["running"], 1);
        assert_eq!(exported["ticks_received"], 1);
        assert_eq!(exported["bars_created"], 1);
        assert_eq!(exported["subscribed_tokens"], 2);
        assert_eq!(exported["errors"], 0);
    }

    #[test]
    fn test_latency_tracker_percentile() {
        let mut tracker = LatencyTracker::new(100);

        for i in 1..=100 {
            tracker.record(i);
        }

        let p50 = tracker.percentile(50).unwrap();
        assert!((49..=51).contains(&p50));

        let p99 = tracker.percentile(99).unwrap();
        assert!((98..=100).contains(&p99));
    }

    #[test]
    fn test_latency_tracker_window_eviction() {
        let mut tracker = LatencyTracker::new(3);

        tracker.record(10);
        tracker.record(20);
        tracker.record(30);
        tracker.record(40); // Should evict 10

        assert_eq!(tracker.percentile(0), Some(20));
        assert_eq!(tracker.percentile(100), Some(40));
    }

    #[test]
    fn test_snapshot_latency_percentiles() {
        let metrics = CollectorMetrics::new(10);
        assert_eq!(metrics.snapshot(false, 0).tick_processing_p99_ns, None);

        metrics.record_latency(1_000);
        metrics.record_latency(3_000);
        let snap = metrics.snapshot(false, 0);
        assert_eq!(snap.tick_processing_p50_ns, Some(1_000));
        assert_eq!(snap.tick_processing_p99_ns, Some(1_000));
    }
}
