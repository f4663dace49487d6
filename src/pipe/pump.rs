//! Source and destination pumps
//!
//! ```text
//!                         ┌─► [queue d1] ──► DestinationPump ──► d1.write()
//!  src.read() ─► SourcePump ─► [queue d2] ──► DestinationPump ──► d2.write()
//!                         └─► [queue d3] ──► DestinationPump ──► d3.write()
//! ```
//!
//! The source pump never waits on a queue: a full queue loses the new chunk
//! for that destination only, so one stalled sink cannot slow the source or
//! its siblings.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

use crate::component::{Sink, Source};
use crate::error::Result;
use crate::stats::{DestinationStats, EdgeStats};

use super::config::FailurePolicy;

/// Which pump of an edge exited
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PumpKind {
    /// The read pump
    Source,
    /// A write pump
    Destination {
        /// Sink id the pump writes to
        sink_id: String,
    },
}

/// Exit value every pump reports to the supervisor
#[derive(Debug)]
pub struct PumpExit {
    /// Index of the edge in the graph
    pub edge: usize,
    /// Source id of the edge
    pub source_id: String,
    /// Which pump exited
    pub kind: PumpKind,
    /// Why it exited
    pub result: Result<()>,
}

/// Producer half of a destination queue
pub(crate) struct DestinationQueue {
    pub(crate) tx: mpsc::Sender<Bytes>,
    pub(crate) stats: Arc<DestinationStats>,
}

/// Reads from one source and fans out to its destination queues
pub(crate) struct SourcePump {
    pub(crate) source_id: String,
    pub(crate) source: Arc<dyn Source>,
    pub(crate) queues: Vec<DestinationQueue>,
    pub(crate) chunk_size: usize,
    pub(crate) stats: Arc<EdgeStats>,
}

impl SourcePump {
    /// Run until `stop` or `halt` fires, the source fails, or every
    /// destination has gone away.
    pub(crate) async fn run(self, stop: CancellationToken, halt: CancellationToken) -> Result<()> {
        let mut buf = BytesMut::zeroed(self.chunk_size);

        loop {
            // A cancelled read can leave the buffer with the producer
            if buf.len() != self.chunk_size {
                buf = BytesMut::zeroed(self.chunk_size);
            }

            let n = tokio::select! {
                biased;
                _ = halt.cancelled() => return Ok(()),
                _ = stop.cancelled() => return Ok(()),
                result = self.source.read(&mut buf) => result?,
            };

            if n == 0 {
                tokio::task::yield_now().await;
                continue;
            }

            self.stats.record_read(n);

            // One owned copy per read; queues share it by reference count
            let chunk = Bytes::copy_from_slice(&buf[..n]);
            if self.fan_out(chunk) == 0 {
                tracing::info!(source = %self.source_id, "All destinations stopped");
                return Ok(());
            }
        }
    }

    /// Offer `chunk` to every queue without waiting. Returns how many
    /// destinations are still alive.
    fn fan_out(&self, chunk: Bytes) -> usize {
        let mut alive = 0;

        for queue in &self.queues {
            match queue.tx.try_send(chunk.clone()) {
                Ok(()) => {
                    queue.stats.record_queued();
                    alive += 1;
                }
                Err(TrySendError::Full(dropped)) => {
                    queue.stats.record_drop(dropped.len());
                    alive += 1;
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }

        alive
    }
}

/// Drains one destination queue into its sink
pub(crate) struct DestinationPump {
    pub(crate) sink_id: String,
    pub(crate) sink: Arc<dyn Sink>,
    pub(crate) rx: mpsc::Receiver<Bytes>,
    pub(crate) policy: FailurePolicy,
    pub(crate) stats: Arc<DestinationStats>,
}

impl DestinationPump {
    /// Run until the queue closes and is empty, `halt` fires, or a write
    /// fails for good.
    pub(crate) async fn run(mut self, halt: CancellationToken) -> Result<()> {
        loop {
            let chunk = tokio::select! {
                biased;
                _ = halt.cancelled() => return Ok(()),
                chunk = self.rx.recv() => match chunk {
                    Some(chunk) => chunk,
                    None => return Ok(()),
                },
            };

            tokio::select! {
                biased;
                _ = halt.cancelled() => return Ok(()),
                result = self.write_chunk(chunk) => result?,
            }
        }
    }

    async fn write_chunk(&self, chunk: Bytes) -> Result<()> {
        let attempts = self.policy.retry_attempts();
        let mut attempt = 0;

        loop {
            match self.sink.write(chunk.clone()).await {
                Ok(n) => {
                    self.stats.record_write(n);
                    return Ok(());
                }
                Err(e) => {
                    self.stats.record_write_error();

                    // Usage errors never succeed on retry
                    if e.is_config() || attempt >= attempts {
                        return Err(e);
                    }

                    attempt += 1;
                    tracing::warn!(
                        sink = %self.sink_id,
                        attempt = attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Write failed, retrying"
                    );
                    tokio::time::sleep(self.policy.retry_backoff()).await;
                }
            }
        }
    }
}
