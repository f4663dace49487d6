//! Capability contracts for relay components
//!
//! A component plays one of three roles:
//!
//! - [`Source`]: produces bytes through `read`
//! - [`Sink`]: consumes bytes through `write`
//! - Duplex: both at once under one id (a subprocess, for example)
//!
//! All components share the [`Component`] lifecycle hooks. `init` runs once
//! before any pump touches the component and may start background tasks
//! (accept loops, child processes). `shutdown` runs once after the pumps have
//! stopped.

use std::fmt;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};

use crate::error::Result;

/// Role namespace a component id lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Produces bytes
    Source,
    /// Consumes bytes
    Sink,
    /// Produces and consumes bytes under one id
    Duplex,
}

impl Role {
    /// Whether ids of this role live in the source namespace
    pub fn is_source(self) -> bool {
        matches!(self, Role::Source | Role::Duplex)
    }

    /// Whether ids of this role live in the sink namespace
    pub fn is_sink(self) -> bool {
        matches!(self, Role::Sink | Role::Duplex)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Source => write!(f, "source"),
            Role::Sink => write!(f, "sink"),
            Role::Duplex => write!(f, "duplex"),
        }
    }
}

/// Lifecycle hooks shared by every component
#[async_trait]
pub trait Component: Send + Sync {
    /// Short adapter name used in log lines
    fn kind(&self) -> &'static str {
        "component"
    }

    /// Bind, listen, connect or spawn. May start background activity.
    async fn init(&self) -> Result<()>;

    /// Release sockets and child processes.
    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}

/// A component that produces a byte stream
#[async_trait]
pub trait Source: Component {
    /// Read into `buf`, returning the number of bytes written to its front.
    ///
    /// `Ok(0)` means no data this time and the caller should simply retry.
    /// Implementations keep `buf.len()` unchanged.
    async fn read(&self, buf: &mut BytesMut) -> Result<usize>;
}

/// A component that consumes a byte stream
#[async_trait]
pub trait Sink: Component {
    /// Write one chunk, returning the number of bytes accepted.
    async fn write(&self, chunk: Bytes) -> Result<usize>;
}

/// Marker for components that act as both source and sink
pub trait Duplex: Source + Sink {}

impl<T: Source + Sink> Duplex for T {}
