//! Subprocess components

pub mod exec;

pub use exec::{ExecFactory, ExecOptions, ExecProcess};

use crate::registry::Registry;

/// Register the built-in process types
pub fn register(registry: &mut Registry) {
    registry.register_duplex("exec", ExecFactory);
}
