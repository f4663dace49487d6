//! Runtime-configurable byte-stream relay
//!
//! Data enters through sources (network listeners, subprocess output) and
//! leaves through sinks (stream servers, real-time track sinks, subprocess
//! input). A declarative routing table connects each source to any number of
//! sinks, and a fan-out scheduler moves the bytes with bounded, drop-on-full
//! queues so one slow sink never holds back the others.
//!
//! # Example
//!
//! ```no_run
//! use relay_rs::{EngineConfig, Relay};
//! use serde_json::json;
//!
//! # async fn example() -> relay_rs::Result<()> {
//! let mut relay = Relay::with_builtin_adapters(EngineConfig::default());
//! relay.add_source("cam", "udp", json!({ "address": "0.0.0.0:5000" }))?;
//! relay.add_sink("viewers", "tcp", json!({ "address": "0.0.0.0:6000" }))?;
//! relay.add_pipe("cam", ["viewers"]);
//!
//! relay
//!     .run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! # }
//! ```
//!
//! # Modules
//!
//! - [`component`]: the Source / Sink / Duplex contracts
//! - [`bridge`]: pull-style reads over push-driven receive loops
//! - [`registry`]: type tag to constructor mapping and the component table
//! - [`pipe`]: pipe graph, fan-out scheduler and failure policy
//! - [`inbound`], [`outbound`], [`process`]: built-in adapters
//! - [`server`]: the [`Relay`] lifecycle and the JSON startup document

pub mod bridge;
pub mod component;
pub mod error;
pub mod inbound;
pub mod outbound;
pub mod pipe;
pub mod process;
pub mod registry;
pub mod server;
pub mod stats;

pub use bridge::{AsyncReadBridge, PendingRead};
pub use component::{Component, Duplex, Role, Sink, Source};
pub use error::{ConfigError, ConnectionError, Error, Result};
pub use pipe::{Destination, Engine, EngineConfig, FailurePolicy, PipeGraph, PipeGraphBuilder};
pub use registry::{BuildContext, ComponentTable, Factory, Instance, Registry};
pub use server::{Relay, RelayDocument, RelayState};
pub use stats::{DestinationSnapshot, EdgeSnapshot, RelayStats};
