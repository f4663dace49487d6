//! Pipe graph and fan-out scheduler
//!
//! A pipe connects one source id to a set of sink ids. The
//! [`PipeGraphBuilder`] resolves pipes against the component table once, and
//! the [`Engine`] runs the resulting [`PipeGraph`]:
//!
//! ```text
//!                 ┌────────────── Supervisor ◄──── PumpExit ─────┐
//!                 │                                              │
//!   Source ─► SourcePump ─try_send─► [bounded queue] ─► DestinationPump ─► Sink
//!                        └─try_send─► [bounded queue] ─► DestinationPump ─► Sink
//! ```
//!
//! Queues drop the newest chunk when full. Bytes from one source reach each
//! destination in read order; there is no ordering across destinations.

pub mod config;
pub mod engine;
pub mod graph;
pub mod pump;
mod supervisor;

pub use config::{EngineConfig, FailurePolicy};
pub use engine::Engine;
pub use graph::{Destination, PipeGraph, PipeGraphBuilder, PipeSpec};
pub use pump::{PumpExit, PumpKind};
