//! Rate-limited backpressure logging
//!
//! A saturated queue can drop thousands of chunks per second. Logging each
//! drop would flood the output, so drops are accumulated and reported at most
//! once per interval.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Minimum time between two reports
const LOG_INTERVAL_MS: u64 = 1000;

/// Drops per interval above which the report is an error instead of a warning
const CRITICAL_DROP_THRESHOLD: u64 = 100;

/// Accumulates drops and logs them at most once per interval
pub struct BackpressureTracker {
    label: String,
    epoch: Instant,
    interval_drops: AtomicU64,
    interval_bytes: AtomicU64,
    /// Milliseconds since `epoch` of the last report
    last_log_ms: AtomicU64,
}

impl BackpressureTracker {
    /// Create a tracker reporting under `label`
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            epoch: Instant::now(),
            interval_drops: AtomicU64::new(0),
            interval_bytes: AtomicU64::new(0),
            last_log_ms: AtomicU64::new(0),
        }
    }

    /// Record one dropped chunk. Returns true if a report was emitted.
    pub fn record_drop(&self, bytes: u64) -> bool {
        self.interval_drops.fetch_add(1, Ordering::Relaxed);
        self.interval_bytes.fetch_add(bytes, Ordering::Relaxed);

        self.maybe_log()
    }

    /// Drops recorded since the last report
    pub fn pending(&self) -> u64 {
        self.interval_drops.load(Ordering::Relaxed)
    }

    /// Report held-back drops once the interval has passed. Cheap when
    /// nothing is pending, so it can sit on the delivery path.
    pub fn report_pending(&self) -> bool {
        if self.pending() == 0 {
            return false;
        }
        self.maybe_log()
    }

    /// Report held-back drops now, ignoring the interval
    pub fn flush(&self) -> bool {
        let now = self.epoch.elapsed().as_millis() as u64;
        self.last_log_ms.store(now.max(1), Ordering::SeqCst);
        self.emit()
    }

    fn maybe_log(&self) -> bool {
        let now = self.epoch.elapsed().as_millis() as u64;
        let last = self.last_log_ms.load(Ordering::Relaxed);

        // First drop is always reported; afterwards once per interval
        if last != 0 && now.saturating_sub(last) < LOG_INTERVAL_MS {
            return false;
        }

        // Claim the slot so concurrent callers don't both log
        if self
            .last_log_ms
            .compare_exchange(last, now.max(1), Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return false;
        }

        self.emit()
    }

    fn emit(&self) -> bool {
        let drops = self.interval_drops.swap(0, Ordering::Relaxed);
        let bytes = self.interval_bytes.swap(0, Ordering::Relaxed);
        if drops == 0 {
            return false;
        }

        if drops >= CRITICAL_DROP_THRESHOLD {
            tracing::error!(
                destination = %self.label,
                dropped_chunks = drops,
                dropped_bytes = bytes,
                "Destination saturated, dropping chunks"
            );
        } else {
            tracing::warn!(
                destination = %self.label,
                dropped_chunks = drops,
                dropped_bytes = bytes,
                "Backpressure: chunks dropped"
            );
        }

        true
    }
}

impl std::fmt::Debug for BackpressureTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackpressureTracker")
            .field("label", &self.label)
            .field(
                "interval_drops",
                &self.interval_drops.load(Ordering::Relaxed),
            )
            .finish()
    }
}
