//! Network sources
//!
//! | type  | adapter        | read returns                          |
//! |-------|----------------|---------------------------------------|
//! | `tcp` | [`TcpInbound`] | bytes of the active connection        |
//! | `udp` | [`UdpInbound`] | one datagram                          |
//!
//! Both are listeners: connection problems are logged and absorbed, the pump
//! only ever sees data or an empty read.

pub mod tcp;
pub mod udp;

pub use tcp::{TcpInbound, TcpInboundFactory, TcpInboundOptions};
pub use udp::{UdpInbound, UdpInboundFactory, UdpInboundOptions};

use crate::registry::Registry;

/// Register the built-in inbound types
pub fn register(registry: &mut Registry) {
    registry.register_source("tcp", TcpInboundFactory);
    registry.register_source("udp", UdpInboundFactory);
}
