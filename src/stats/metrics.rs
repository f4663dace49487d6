//! Statistics for edges and destinations
//!
//! Counters are plain atomics updated on the hot path; snapshots are taken on
//! demand for logging and tests.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use super::backpressure::BackpressureTracker;

/// Per-destination counters
#[derive(Debug)]
pub struct DestinationStats {
    sink_id: String,
    chunks_queued: AtomicU64,
    chunks_dropped: AtomicU64,
    chunks_written: AtomicU64,
    bytes_written: AtomicU64,
    write_errors: AtomicU64,
    stopped: AtomicBool,
    backpressure: BackpressureTracker,
}

impl DestinationStats {
    /// Create counters for a destination
    pub fn new(source_id: &str, sink_id: impl Into<String>) -> Self {
        let sink_id = sink_id.into();
        let label = format!("{}->{}", source_id, sink_id);
        Self {
            sink_id,
            chunks_queued: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            chunks_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            write_errors: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
            backpressure: BackpressureTracker::new(label),
        }
    }

    /// Sink id of this destination
    pub fn sink_id(&self) -> &str {
        &self.sink_id
    }

    pub(crate) fn record_queued(&self) {
        self.chunks_queued.fetch_add(1, Ordering::Relaxed);
        self.backpressure.report_pending();
    }

    pub(crate) fn record_drop(&self, bytes: usize) {
        self.chunks_dropped.fetch_add(1, Ordering::Relaxed);
        self.backpressure.record_drop(bytes as u64);
    }

    pub(crate) fn record_write(&self, bytes: usize) {
        self.chunks_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn record_write_error(&self) {
        self.write_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Report drops still held back by the rate limiter
    pub(crate) fn flush_backpressure(&self) -> bool {
        self.backpressure.flush()
    }

    pub(crate) fn mark_stopped(&self) {
        self.stopped.store(true, Ordering::Relaxed);
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> DestinationSnapshot {
        DestinationSnapshot {
            sink_id: self.sink_id.clone(),
            chunks_queued: self.chunks_queued.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            chunks_written: self.chunks_written.load(Ordering::Relaxed),
            bytes_written: self.bytes_written.load(Ordering::Relaxed),
            write_errors: self.write_errors.load(Ordering::Relaxed),
            stopped: self.stopped.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of [`DestinationStats`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationSnapshot {
    /// Sink id
    pub sink_id: String,
    /// Chunks accepted into the queue
    pub chunks_queued: u64,
    /// Chunks dropped because the queue was full
    pub chunks_dropped: u64,
    /// Chunks written to the sink
    pub chunks_written: u64,
    /// Bytes written to the sink
    pub bytes_written: u64,
    /// Failed write attempts
    pub write_errors: u64,
    /// Whether the destination pump has exited
    pub stopped: bool,
}

/// Per-edge counters
#[derive(Debug)]
pub struct EdgeStats {
    source_id: String,
    started_at: Instant,
    chunks_read: AtomicU64,
    bytes_read: AtomicU64,
    destinations: Vec<Arc<DestinationStats>>,
}

impl EdgeStats {
    /// Create counters for an edge and its destinations
    pub fn new(source_id: impl Into<String>, destinations: Vec<Arc<DestinationStats>>) -> Self {
        Self {
            source_id: source_id.into(),
            started_at: Instant::now(),
            chunks_read: AtomicU64::new(0),
            bytes_read: AtomicU64::new(0),
            destinations,
        }
    }

    /// Source id of this edge
    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Destination counters, in pipe declaration order
    pub fn destinations(&self) -> &[Arc<DestinationStats>] {
        &self.destinations
    }

    pub(crate) fn record_read(&self, bytes: usize) {
        self.chunks_read.fetch_add(1, Ordering::Relaxed);
        self.bytes_read.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    /// Time since the edge was built
    pub fn duration(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Incoming bitrate in bits per second
    pub fn bitrate(&self) -> u64 {
        let secs = self.duration().as_secs();
        if secs > 0 {
            (self.bytes_read.load(Ordering::Relaxed) * 8) / secs
        } else {
            0
        }
    }

    /// Log the edge and each of its destinations at info level
    pub fn log(&self) {
        for dest in &self.destinations {
            dest.flush_backpressure();
        }

        let edge = self.snapshot();
        tracing::info!(
            source = %edge.source_id,
            chunks = edge.chunks_read,
            bytes = edge.bytes_read,
            bitrate = edge.bitrate,
            "Edge stats"
        );
        for dest in &edge.destinations {
            tracing::info!(
                source = %edge.source_id,
                sink = %dest.sink_id,
                written = dest.chunks_written,
                dropped = dest.chunks_dropped,
                errors = dest.write_errors,
                stopped = dest.stopped,
                "Destination stats"
            );
        }
    }

    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> EdgeSnapshot {
        EdgeSnapshot {
            source_id: self.source_id.clone(),
            chunks_read: self.chunks_read.load(Ordering::Relaxed),
            bytes_read: self.bytes_read.load(Ordering::Relaxed),
            bitrate: self.bitrate(),
            destinations: self.destinations.iter().map(|d| d.snapshot()).collect(),
        }
    }
}

/// Snapshot of [`EdgeStats`]
#[derive(Debug, Clone, Default)]
pub struct EdgeSnapshot {
    /// Source id
    pub source_id: String,
    /// Chunks read from the source
    pub chunks_read: u64,
    /// Bytes read from the source
    pub bytes_read: u64,
    /// Incoming bitrate estimate (bits/sec)
    pub bitrate: u64,
    /// Per-destination snapshots
    pub destinations: Vec<DestinationSnapshot>,
}

impl EdgeSnapshot {
    /// Snapshot of one destination by sink id
    pub fn destination(&self, sink_id: &str) -> Option<&DestinationSnapshot> {
        self.destinations.iter().find(|d| d.sink_id == sink_id)
    }
}

/// Relay-wide statistics
///
/// Edges are registered when the pipe graph is built. The handle stays valid
/// after the relay starts running.
#[derive(Debug, Default)]
pub struct RelayStats {
    edges: RwLock<Vec<Arc<EdgeStats>>>,
}

impl RelayStats {
    /// Create an empty stats registry
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn register_edge(&self, edge: Arc<EdgeStats>) {
        self.edges
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(edge);
    }

    /// Snapshot of every edge
    pub fn snapshot(&self) -> Vec<EdgeSnapshot> {
        self.edges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|e| e.snapshot())
            .collect()
    }

    /// Snapshot of the edge reading from `source_id`
    pub fn edge(&self, source_id: &str) -> Option<EdgeSnapshot> {
        self.edges
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|e| e.source_id() == source_id)
            .map(|e| e.snapshot())
    }

    /// Log one line per edge and destination
    pub fn log(&self) {
        for edge in self.edges.read().unwrap_or_else(PoisonError::into_inner).iter() {
            edge.log();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_destination_counters() {
        let stats = DestinationStats::new("cam", "viewers");
        stats.record_queued();
        stats.record_queued();
        stats.record_drop(100);
        stats.record_write(1316);
        stats.record_write_error();

        let snap = stats.snapshot();
        assert_eq!(snap.sink_id, "viewers");
        assert_eq!(snap.chunks_queued, 2);
        assert_eq!(snap.chunks_dropped, 1);
        assert_eq!(snap.chunks_written, 1);
        assert_eq!(snap.bytes_written, 1316);
        assert_eq!(snap.write_errors, 1);
        assert!(!snap.stopped);

        stats.mark_stopped();
        assert!(stats.snapshot().stopped);
    }

    #[test]
    fn test_edge_snapshot() {
        let dest = Arc::new(DestinationStats::new("cam", "viewers"));
        let edge = EdgeStats::new("cam", vec![Arc::clone(&dest)]);
        edge.record_read(188);
        edge.record_read(188);
        dest.record_write(188);

        let snap = edge.snapshot();
        assert_eq!(snap.source_id, "cam");
        assert_eq!(snap.chunks_read, 2);
        assert_eq!(snap.bytes_read, 376);
        assert_eq!(snap.destination("viewers").unwrap().chunks_written, 1);
        assert!(snap.destination("other").is_none());
    }

    #[test]
    fn test_edge_log_flushes_held_back_drops() {
        let dest = Arc::new(DestinationStats::new("cam", "viewers"));
        let edge = EdgeStats::new("cam", vec![Arc::clone(&dest)]);
        for _ in 0..20 {
            dest.record_drop(188);
        }
        assert_eq!(dest.backpressure.pending(), 19);

        edge.log();
        assert_eq!(dest.backpressure.pending(), 0);
        assert_eq!(dest.snapshot().chunks_dropped, 20);
    }

    #[test]
    fn test_relay_stats_lookup() {
        let relay = RelayStats::new();
        assert!(relay.snapshot().is_empty());

        relay.register_edge(Arc::new(EdgeStats::new("a", Vec::new())));
        relay.register_edge(Arc::new(EdgeStats::new("b", Vec::new())));

        assert_eq!(relay.snapshot().len(), 2);
        assert_eq!(relay.edge("b").unwrap().source_id, "b");
        assert!(relay.edge("c").is_none());
    }

    #[test]
    fn test_bitrate_zero_duration() {
        let edge = EdgeStats::new("cam", Vec::new());
        edge.record_read(1_000_000);

        // Less than a second has passed
        assert_eq!(edge.bitrate(), 0);
    }
}
