//! Pipe graph
//!
//! Pipes are declared as `(source id, [sink id, ...])` and resolved against
//! the [`ComponentTable`] in one pass. Resolution is all-or-nothing: any
//! unknown id fails the build and no edge is produced.
//!
//! There is no cycle check. An edge only ever connects a source to sinks;
//! chains through a duplex are two independent edges sharing an id.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::component::{Sink, Source};
use crate::error::{ConfigError, Result};
use crate::registry::ComponentTable;
use crate::stats::{DestinationStats, EdgeStats, RelayStats};

use super::config::EngineConfig;

/// One destination of a pipe declaration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    /// Sink id
    pub sink_id: String,
    /// Queue capacity override (engine default when `None`)
    pub queue_capacity: Option<usize>,
}

impl Destination {
    /// Destination using the engine's default queue capacity
    pub fn new(sink_id: impl Into<String>) -> Self {
        Self {
            sink_id: sink_id.into(),
            queue_capacity: None,
        }
    }

    /// Destination with its own queue capacity
    pub fn with_capacity(sink_id: impl Into<String>, capacity: usize) -> Self {
        Self {
            sink_id: sink_id.into(),
            queue_capacity: Some(capacity),
        }
    }
}

impl From<&str> for Destination {
    fn from(sink_id: &str) -> Self {
        Destination::new(sink_id)
    }
}

impl From<String> for Destination {
    fn from(sink_id: String) -> Self {
        Destination::new(sink_id)
    }
}

/// A declared, unresolved pipe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSpec {
    /// Source id
    pub source_id: String,
    /// Destinations, in declaration order
    pub outs: Vec<Destination>,
}

/// Collects pipe declarations until the graph is built
#[derive(Debug, Default)]
pub struct PipeGraphBuilder {
    pipes: Vec<PipeSpec>,
}

impl PipeGraphBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a pipe.
    ///
    /// Declaring a second pipe for the same source replaces the destination
    /// set of the first one.
    pub fn add_pipe<I, D>(&mut self, source_id: impl Into<String>, outs: I)
    where
        I: IntoIterator<Item = D>,
        D: Into<Destination>,
    {
        let spec = PipeSpec {
            source_id: source_id.into(),
            outs: outs.into_iter().map(Into::into).collect(),
        };

        if let Some(existing) = self
            .pipes
            .iter_mut()
            .find(|p| p.source_id == spec.source_id)
        {
            tracing::warn!(
                source = %spec.source_id,
                previous = existing.outs.len(),
                replacement = spec.outs.len(),
                "Pipe redeclared, replacing destinations"
            );
            *existing = spec;
        } else {
            self.pipes.push(spec);
        }
    }

    /// Declared pipes
    pub fn pipes(&self) -> &[PipeSpec] {
        &self.pipes
    }

    /// Resolve every pipe against `table`.
    ///
    /// Edge statistics are registered on `stats` only when the whole graph
    /// resolves.
    pub fn build(
        &self,
        table: &ComponentTable,
        config: &EngineConfig,
        stats: &RelayStats,
    ) -> Result<PipeGraph> {
        config.validate()?;

        let mut edges = Vec::with_capacity(self.pipes.len());
        for pipe in &self.pipes {
            edges.push(resolve(pipe, table, config)?);
        }

        for edge in &edges {
            stats.register_edge(Arc::clone(&edge.stats));
        }

        Ok(PipeGraph { edges })
    }
}

fn resolve(pipe: &PipeSpec, table: &ComponentTable, config: &EngineConfig) -> Result<Edge> {
    if pipe.outs.is_empty() {
        return Err(ConfigError::EmptyPipe(pipe.source_id.clone()).into());
    }

    let source = table
        .source(&pipe.source_id)
        .ok_or_else(|| ConfigError::UnknownSource(pipe.source_id.clone()))?;

    let mut seen = HashSet::new();
    let mut destinations = Vec::with_capacity(pipe.outs.len());
    for out in &pipe.outs {
        if !seen.insert(out.sink_id.as_str()) {
            tracing::warn!(
                source = %pipe.source_id,
                sink = %out.sink_id,
                "Duplicate destination ignored"
            );
            continue;
        }

        let sink = table
            .sink(&out.sink_id)
            .ok_or_else(|| ConfigError::UnknownSink(out.sink_id.clone()))?;

        let capacity = out.queue_capacity.unwrap_or(config.queue_capacity);
        if capacity == 0 {
            return Err(ConfigError::InvalidValue {
                field: format!("pipes[{}].{}.queue_capacity", pipe.source_id, out.sink_id),
                reason: "must be greater than zero".into(),
            }
            .into());
        }

        destinations.push(EdgeDestination {
            stats: Arc::new(DestinationStats::new(&pipe.source_id, &out.sink_id)),
            sink_id: out.sink_id.clone(),
            sink,
            capacity,
        });
    }

    let stats = Arc::new(EdgeStats::new(
        &pipe.source_id,
        destinations.iter().map(|d| Arc::clone(&d.stats)).collect(),
    ));

    Ok(Edge {
        source_id: pipe.source_id.clone(),
        source,
        destinations,
        stats,
    })
}

/// Resolved, immutable routing graph
pub struct PipeGraph {
    pub(crate) edges: Vec<Edge>,
}

impl PipeGraph {
    /// Number of edges
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Number of destination pumps the graph needs
    pub fn destination_count(&self) -> usize {
        self.edges.iter().map(|e| e.destinations.len()).sum()
    }

    /// Source ids with their sink ids, in declaration order
    pub fn routes(&self) -> Vec<(&str, Vec<&str>)> {
        self.edges
            .iter()
            .map(|e| {
                (
                    e.source_id.as_str(),
                    e.destinations.iter().map(|d| d.sink_id.as_str()).collect(),
                )
            })
            .collect()
    }

    /// Statistics handles, valid after the graph is consumed by the engine
    pub fn stats(&self) -> Vec<Arc<EdgeStats>> {
        self.edges.iter().map(|e| Arc::clone(&e.stats)).collect()
    }
}

impl fmt::Debug for PipeGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipeGraph")
            .field("routes", &self.routes())
            .finish()
    }
}

/// One source with its destinations
pub(crate) struct Edge {
    pub(crate) source_id: String,
    pub(crate) source: Arc<dyn Source>,
    pub(crate) destinations: Vec<EdgeDestination>,
    pub(crate) stats: Arc<EdgeStats>,
}

pub(crate) struct EdgeDestination {
    pub(crate) sink_id: String,
    pub(crate) sink: Arc<dyn Sink>,
    pub(crate) capacity: usize,
    pub(crate) stats: Arc<DestinationStats>,
}
