//! Relay server
//!
//! Owns the registry, the component table and the pipe declarations, and
//! drives them through one lifecycle:
//!
//! ```text
//!   Created ──► Initialized ──► Running ──► Draining ──► Stopped
//!    add_*()     init() each     engine      sources      shutdown() each,
//!    add_pipe()  in order        pumping     stopped      reverse order
//! ```

use std::fmt;
use std::future::Future;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::component::Role;
use crate::error::{ConfigError, Error, Result};
use crate::pipe::{Destination, Engine, EngineConfig, PipeGraphBuilder};
use crate::registry::{ComponentTable, Registry};
use crate::stats::RelayStats;
use crate::{inbound, outbound, process};

use super::document::RelayDocument;

/// Lifecycle state of a [`Relay`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayState {
    /// Components and pipes may still be added
    Created,
    /// Every component has been initialized
    Initialized,
    /// Pumps are moving data
    Running,
    /// Sources stopped, destinations flushing
    Draining,
    /// Components shut down
    Stopped,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelayState::Created => "created",
            RelayState::Initialized => "initialized",
            RelayState::Running => "running",
            RelayState::Draining => "draining",
            RelayState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Byte-stream relay
pub struct Relay {
    config: EngineConfig,
    registry: Registry,
    table: ComponentTable,
    pipes: PipeGraphBuilder,
    stats: Arc<RelayStats>,
    state: watch::Sender<RelayState>,
}

impl Relay {
    /// Create a relay with an empty registry
    pub fn new(config: EngineConfig) -> Self {
        let (state, _) = watch::channel(RelayState::Created);
        Self {
            config,
            registry: Registry::new(),
            table: ComponentTable::new(),
            pipes: PipeGraphBuilder::new(),
            stats: Arc::new(RelayStats::new()),
            state,
        }
    }

    /// Create a relay with the built-in adapters registered
    pub fn with_builtin_adapters(config: EngineConfig) -> Self {
        let mut relay = Self::new(config);
        inbound::register(&mut relay.registry);
        outbound::register(&mut relay.registry);
        process::register(&mut relay.registry);
        relay
    }

    /// Build a relay from a startup document.
    ///
    /// Components are added in the order inbounds, outbounds, processes, then
    /// the pipes are declared. Fails on the first bad declaration.
    pub fn from_document(doc: RelayDocument) -> Result<Self> {
        let mut relay = Self::with_builtin_adapters(doc.engine);

        for spec in doc.inbounds {
            relay.add_source(&spec.id, &spec.type_tag, spec.options)?;
        }
        for spec in doc.outbounds {
            relay.add_sink(&spec.id, &spec.type_tag, spec.options)?;
        }
        for spec in doc.processes {
            relay.add_duplex(&spec.id, &spec.type_tag, spec.options)?;
        }
        for pipe in doc.pipes {
            relay.add_pipe(pipe.source, pipe.outs.into_iter().map(Destination::from));
        }

        Ok(relay)
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registry, for adding custom adapter types
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Live components
    pub fn table(&self) -> &ComponentTable {
        &self.table
    }

    /// Live components, for adding ready-made instances
    pub fn table_mut(&mut self) -> &mut ComponentTable {
        &mut self.table
    }

    /// Construct a component through the registry and add it to the table
    pub fn add_component(
        &mut self,
        role: Role,
        id: &str,
        type_tag: &str,
        options: Value,
    ) -> Result<()> {
        let instance = self.registry.instantiate(role, type_tag, id, options)?;
        self.table.insert(id, instance)?;
        tracing::info!(id = id, role = %role, type_tag = type_tag, "Component registered");
        Ok(())
    }

    /// Add a source of type `type_tag`
    pub fn add_source(&mut self, id: &str, type_tag: &str, options: Value) -> Result<()> {
        self.add_component(Role::Source, id, type_tag, options)
    }

    /// Add a sink of type `type_tag`
    pub fn add_sink(&mut self, id: &str, type_tag: &str, options: Value) -> Result<()> {
        self.add_component(Role::Sink, id, type_tag, options)
    }

    /// Add a duplex of type `type_tag`
    pub fn add_duplex(&mut self, id: &str, type_tag: &str, options: Value) -> Result<()> {
        self.add_component(Role::Duplex, id, type_tag, options)
    }

    /// Declare a pipe from `source_id` to `outs`
    pub fn add_pipe<I, D>(&mut self, source_id: impl Into<String>, outs: I)
    where
        I: IntoIterator<Item = D>,
        D: Into<Destination>,
    {
        self.pipes.add_pipe(source_id, outs);
    }

    /// Statistics handle; edges appear once the relay starts
    pub fn stats(&self) -> Arc<RelayStats> {
        Arc::clone(&self.stats)
    }

    /// Current lifecycle state
    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Run until every edge has finished
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending()).await
    }

    /// Run until `shutdown` completes or every edge has finished.
    ///
    /// On shutdown the sources stop, destinations flush their queues, and
    /// components are shut down in reverse order of registration.
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if self.state() != RelayState::Created {
            return Err(ConfigError::InvalidValue {
                field: "relay".into(),
                reason: format!("cannot start from state '{}'", self.state()),
            }
            .into());
        }

        // Nothing is started unless the whole graph resolves
        let graph = self.pipes.build(&self.table, &self.config, &self.stats)?;

        let mut initialized = 0;
        for (id, component) in self.table.components() {
            if let Err(e) = component.init().await {
                tracing::error!(id = id, kind = component.kind(), error = %e, "Init failed");
                self.shutdown_components(initialized).await;
                self.set_state(RelayState::Stopped);
                return Err(match e {
                    Error::Factory { .. } => e,
                    other => Error::factory(id, other),
                });
            }
            tracing::debug!(id = id, kind = component.kind(), "Component initialized");
            initialized += 1;
        }
        self.set_state(RelayState::Initialized);

        let idle = graph.edge_count() == 0;
        if idle {
            tracing::warn!("No pipes declared, waiting for shutdown");
        }

        let stop = CancellationToken::new();
        let engine = Engine::new(self.config.clone());
        let run = engine.run(graph, stop.clone());
        tokio::pin!(run);
        tokio::pin!(shutdown);

        self.set_state(RelayState::Running);

        let result = tokio::select! {
            result = &mut run, if !idle => {
                tracing::info!("All edges finished");
                self.set_state(RelayState::Draining);
                result
            }
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                self.set_state(RelayState::Draining);
                stop.cancel();
                run.await
            }
        };

        if let Err(e) = &result {
            tracing::error!(error = %e, "Engine stopped with error");
        }

        self.shutdown_components(self.table.len()).await;
        self.set_state(RelayState::Stopped);

        result
    }

    /// Shut down the first `count` components in reverse order
    async fn shutdown_components(&self, count: usize) {
        let started: Vec<_> = self.table.components().take(count).collect();
        for (id, component) in started.into_iter().rev() {
            if let Err(e) = component.shutdown().await {
                tracing::warn!(id = id, kind = component.kind(), error = %e, "Shutdown failed");
            }
        }
    }

    fn set_state(&self, state: RelayState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::info!(from = %previous, to = %state, "Relay state changed");
        }
    }
}
