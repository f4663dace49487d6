//! Pump supervision
//!
//! Every pump reports a [`PumpExit`]. The supervisor decides what a failure
//! means for the rest of the graph according to the [`FailurePolicy`].

use std::io;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

use super::config::FailurePolicy;
use super::pump::{PumpExit, PumpKind};

pub(crate) struct Supervisor {
    policy: FailurePolicy,
    /// Cancels every pump
    abort: CancellationToken,
    /// One hard-stop token per edge, children of `abort`
    halts: Vec<CancellationToken>,
    failure: Option<Error>,
    isolated: usize,
}

impl Supervisor {
    pub(crate) fn new(policy: FailurePolicy, abort: CancellationToken, edges: usize) -> Self {
        let halts = (0..edges).map(|_| abort.child_token()).collect();
        Self {
            policy,
            abort,
            halts,
            failure: None,
            isolated: 0,
        }
    }

    /// Hard-stop token of edge `edge`
    pub(crate) fn halt(&self, edge: usize) -> CancellationToken {
        self.halts[edge].clone()
    }

    /// Destinations stopped by a failure so far
    pub(crate) fn isolated(&self) -> usize {
        self.isolated
    }

    pub(crate) fn handle(&mut self, exit: PumpExit) {
        let PumpExit {
            edge,
            source_id,
            kind,
            result,
        } = exit;

        let err = match result {
            Ok(()) => {
                match &kind {
                    PumpKind::Source => {
                        tracing::debug!(source = %source_id, "Source pump stopped")
                    }
                    PumpKind::Destination { sink_id } => {
                        tracing::debug!(source = %source_id, sink = %sink_id, "Destination pump stopped")
                    }
                }
                return;
            }
            Err(e) => e,
        };

        match kind {
            PumpKind::Source => {
                tracing::error!(source = %source_id, error = %err, "Source failed, edge draining");
                if self.policy == FailurePolicy::Abort {
                    self.fail(err);
                }
            }
            PumpKind::Destination { sink_id } => match self.policy {
                FailurePolicy::Isolate | FailurePolicy::Retry { .. } => {
                    self.isolated += 1;
                    tracing::error!(
                        source = %source_id,
                        sink = %sink_id,
                        error = %err,
                        "Destination failed, isolated"
                    );
                }
                FailurePolicy::DropEdge => {
                    self.isolated += 1;
                    tracing::error!(
                        source = %source_id,
                        sink = %sink_id,
                        error = %err,
                        "Destination failed, dropping edge"
                    );
                    if let Some(halt) = self.halts.get(edge) {
                        halt.cancel();
                    }
                }
                FailurePolicy::Abort => {
                    tracing::error!(
                        source = %source_id,
                        sink = %sink_id,
                        error = %err,
                        "Destination failed, aborting"
                    );
                    self.fail(err);
                }
            },
        }
    }

    /// A pump task panicked or was cancelled by the runtime
    pub(crate) fn handle_join_error(&mut self, err: JoinError) {
        if err.is_cancelled() {
            return;
        }

        tracing::error!(error = %err, "Pump task panicked");
        if self.policy == FailurePolicy::Abort {
            self.fail(Error::Io(io::Error::other(err.to_string())));
        }
    }

    fn fail(&mut self, err: Error) {
        if self.failure.is_none() {
            self.failure = Some(err);
        }
        self.abort.cancel();
    }

    /// Whether the engine has been told to stop every pump
    pub(crate) fn aborted(&self) -> bool {
        self.abort.is_cancelled()
    }

    /// First fatal error, if any
    pub(crate) fn finish(self) -> Result<()> {
        match self.failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
