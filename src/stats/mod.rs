//! Relay statistics

pub mod backpressure;
pub mod metrics;

pub use backpressure::BackpressureTracker;
pub use metrics::{DestinationSnapshot, DestinationStats, EdgeSnapshot, EdgeStats, RelayStats};
