// Scan metrics module
//
// Lightweight counters for monitoring the arbitration pipeline

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Pipeline counters
///
/// Uses atomic operations for thread-safe metric tracking without locks.
/// The arbiter task writes them; anyone holding the `Arc` may read them.
#[derive(Debug)]
pub struct ScanMetrics {
    /// Detections pushed into the arbiter
    pub detections_received: AtomicU64,

    /// Detections ignored because a cycle was in progress
    pub detections_debounced: AtomicU64,

    /// Lookups handed to the lookup client
    pub lookups_started: AtomicU64,

    /// Lookups that resolved their cycle
    pub lookups_succeeded: AtomicU64,

    /// Lookups that failed their cycle
    pub lookups_failed: AtomicU64,

    /// Lookup results discarded because their cycle was superseded
    pub stale_results_dropped: AtomicU64,

    /// Outcomes accepted by the record sink
    pub outcomes_recorded: AtomicU64,

    /// Outcomes the record sink rejected
    pub persist_failures: AtomicU64,

    /// Explicit resets
    pub resets: AtomicU64,

    /// Cooldown re-arms
    pub rearms: AtomicU64,

    start_time: Instant,
}

impl ScanMetrics {
    pub fn new() -> Self {
        Self {
            detections_received: AtomicU64::new(0),
            detections_debounced: AtomicU64::new(0),
            lookups_started: AtomicU64::new(0),
            lookups_succeeded: AtomicU64::new(0),
            lookups_failed: AtomicU64::new(0),
            stale_results_dropped: AtomicU64::new(0),
            outcomes_recorded: AtomicU64::new(0),
            persist_failures: AtomicU64::new(0),
            resets: AtomicU64::new(0),
            rearms: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_detection(&self) {
        self.detections_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_debounced(&self) {
        self.detections_debounced.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_started(&self) {
        self.lookups_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_succeeded(&self) {
        self.lookups_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_lookup_failed(&self) {
        self.lookups_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_stale_result(&self) {
        self.stale_results_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_outcome_recorded(&self) {
        self.outcomes_recorded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persist_failure(&self) {
        self.persist_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reset(&self) {
        self.resets.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rearm(&self) {
        self.rearms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Share of detections absorbed by the debounce lock, 0.0 to 1.0
    pub fn debounce_ratio(&self) -> f64 {
        let received = self.detections_received.load(Ordering::Relaxed);
        if received > 0 {
            self.detections_debounced.load(Ordering::Relaxed) as f64 / received as f64
        } else {
            0.0
        }
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Scan Metrics Summary ===");
        tracing::info!("Uptime: {:.2}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Detections: {} received, {} debounced ({:.1}%)",
            self.detections_received.load(Ordering::Relaxed),
            self.detections_debounced.load(Ordering::Relaxed),
            self.debounce_ratio() * 100.0
        );
        tracing::info!(
            "Lookups: {} started, {} succeeded, {} failed, {} stale",
            self.lookups_started.load(Ordering::Relaxed),
            self.lookups_succeeded.load(Ordering::Relaxed),
            self.lookups_failed.load(Ordering::Relaxed),
            self.stale_results_dropped.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Records: {} saved, {} failed; resets: {}, re-arms: {}",
            self.outcomes_recorded.load(Ordering::Relaxed),
            self.persist_failures.load(Ordering::Relaxed),
            self.resets.load(Ordering::Relaxed),
            self.rearms.load(Ordering::Relaxed)
        );
    }
}

impl Default for ScanMetrics {
    fn default() -> Self {
        Self::new()
    }
}
