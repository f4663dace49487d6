//! Relay server and startup document

pub mod document;
pub mod relay;

pub use document::{ComponentSpec, LogConfig, LogFormat, OutSpec, PipeConfig, RelayDocument};
pub use relay::{Relay, RelayState};
