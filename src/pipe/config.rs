//! Engine configuration

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ConfigError, Result};

/// Default read buffer size per source pump
pub const DEFAULT_CHUNK_SIZE: usize = 10240;

/// Default per-destination queue capacity, in chunks
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Default time destinations get to flush their queues on shutdown
pub const DEFAULT_DRAIN_TIMEOUT_MS: u64 = 5000;

/// What the supervisor does when a pump fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop only the failing destination; siblings keep running
    #[default]
    Isolate,
    /// Stop every pump of the edge the failing destination belongs to
    DropEdge,
    /// Stop the whole engine and return the error
    Abort,
    /// Retry a failed write, then isolate the destination
    Retry {
        /// Retries per chunk before giving up
        attempts: u32,
        /// Fixed delay between retries, in milliseconds
        backoff_ms: u64,
    },
}

impl FailurePolicy {
    /// Number of extra write attempts per chunk
    pub fn retry_attempts(&self) -> u32 {
        match self {
            FailurePolicy::Retry { attempts, .. } => *attempts,
            _ => 0,
        }
    }

    /// Delay between write retries
    pub fn retry_backoff(&self) -> Duration {
        match self {
            FailurePolicy::Retry { backoff_ms, .. } => Duration::from_millis(*backoff_ms),
            _ => Duration::ZERO,
        }
    }
}

/// Engine configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Read buffer size per source pump (one network unit of data)
    pub chunk_size: usize,

    /// Default per-destination queue capacity, in chunks
    pub queue_capacity: usize,

    /// Pump failure handling
    pub failure_policy: FailurePolicy,

    /// Stats logging interval in seconds (0 = disabled)
    pub stats_interval_secs: u64,

    /// How long destinations may keep flushing after shutdown, in milliseconds
    pub drain_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            failure_policy: FailurePolicy::Isolate,
            stats_interval_secs: 0,
            drain_timeout_ms: DEFAULT_DRAIN_TIMEOUT_MS,
        }
    }
}

impl EngineConfig {
    /// Set the read buffer size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the default queue capacity
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Set the failure policy
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    /// Set the stats logging interval
    pub fn stats_interval(mut self, interval: Duration) -> Self {
        self.stats_interval_secs = interval.as_secs();
        self
    }

    /// Set the drain timeout
    pub fn drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Drain timeout as a duration
    pub fn drain_timeout_duration(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    /// Stats logging interval, if enabled
    pub fn stats_interval_duration(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }

    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.chunk_size".into(),
                reason: "must be greater than zero".into(),
            }
            .into());
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: "engine.queue_capacity".into(),
                reason: "must be greater than zero".into(),
            }
            .into());
        }
        Ok(())
    }
}
