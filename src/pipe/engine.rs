//! Fan-out scheduler
//!
//! The engine turns a [`PipeGraph`] into running pumps: one source pump per
//! edge and one destination pump per destination, each on its own task. It
//! returns once every pump has exited.
//!
//! Shutdown is two-staged. Cancelling the `shutdown` token stops the source
//! pumps; their queues close and the destination pumps flush what is already
//! queued. Destinations still busy after the drain timeout are stopped hard.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::stats::EdgeStats;

use super::config::EngineConfig;
use super::graph::PipeGraph;
use super::pump::{DestinationPump, DestinationQueue, PumpExit, PumpKind, SourcePump};
use super::supervisor::Supervisor;

/// Runs a pipe graph to completion
#[derive(Debug, Clone, Default)]
pub struct Engine {
    config: EngineConfig,
}

impl Engine {
    /// Create an engine
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Start every pump of `graph` and supervise them until they all exit.
    ///
    /// Returns the first fatal error under [`FailurePolicy::Abort`], `Ok`
    /// otherwise.
    ///
    /// [`FailurePolicy::Abort`]: super::config::FailurePolicy::Abort
    pub async fn run(&self, graph: PipeGraph, shutdown: CancellationToken) -> Result<()> {
        self.config.validate()?;

        let abort = CancellationToken::new();
        let mut supervisor =
            Supervisor::new(self.config.failure_policy, abort.clone(), graph.edges.len());
        let edge_stats = graph.stats();
        let mut pumps = JoinSet::new();

        for (index, edge) in graph.edges.into_iter().enumerate() {
            let halt = supervisor.halt(index);
            let mut queues = Vec::with_capacity(edge.destinations.len());

            for dest in edge.destinations {
                let (tx, rx) = mpsc::channel(dest.capacity);
                queues.push(DestinationQueue {
                    tx,
                    stats: Arc::clone(&dest.stats),
                });

                let stats = dest.stats;
                let sink_id = dest.sink_id;
                let pump = DestinationPump {
                    sink_id: sink_id.clone(),
                    sink: dest.sink,
                    rx,
                    policy: self.config.failure_policy,
                    stats: Arc::clone(&stats),
                };
                let source_id = edge.source_id.clone();
                let halt = halt.clone();

                pumps.spawn(async move {
                    let result = pump.run(halt).await;
                    stats.mark_stopped();
                    PumpExit {
                        edge: index,
                        source_id,
                        kind: PumpKind::Destination { sink_id },
                        result,
                    }
                });
            }

            tracing::info!(
                source = %edge.source_id,
                destinations = queues.len(),
                "Edge started"
            );

            let pump = SourcePump {
                source_id: edge.source_id.clone(),
                source: edge.source,
                queues,
                chunk_size: self.config.chunk_size,
                stats: edge.stats,
            };
            let stop = shutdown.clone();
            let source_id = edge.source_id;

            pumps.spawn(async move {
                let result = pump.run(stop, halt).await;
                PumpExit {
                    edge: index,
                    source_id,
                    kind: PumpKind::Source,
                    result,
                }
            });
        }

        let watchdog = tokio::spawn(drain_watchdog(
            shutdown,
            abort.clone(),
            self.config.drain_timeout_duration(),
        ));
        let reporter = self
            .config
            .stats_interval_duration()
            .map(|period| tokio::spawn(report_stats(edge_stats.clone(), period)));

        while let Some(joined) = pumps.join_next().await {
            match joined {
                Ok(exit) => supervisor.handle(exit),
                Err(e) => supervisor.handle_join_error(e),
            }
        }

        watchdog.abort();
        if let Some(reporter) = reporter {
            reporter.abort();
        }

        for edge in &edge_stats {
            edge.log();
        }
        tracing::info!(
            isolated = supervisor.isolated(),
            aborted = supervisor.aborted(),
            "Engine stopped"
        );

        supervisor.finish()
    }
}

/// Stop every pump if the drain outlasts `timeout`
async fn drain_watchdog(
    shutdown: CancellationToken,
    abort: CancellationToken,
    timeout: std::time::Duration,
) {
    shutdown.cancelled().await;

    tokio::select! {
        _ = abort.cancelled() => {}
        _ = tokio::time::sleep(timeout) => {
            tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Drain timed out, stopping destinations");
            abort.cancel();
        }
    }
}

async fn report_stats(edges: Vec<Arc<EdgeStats>>, period: std::time::Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    // First tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        for edge in &edges {
            edge.log();
        }
    }
}
