//! Network sinks
//!
//! | type  | adapter         | peers                                     |
//! |-------|-----------------|-------------------------------------------|
//! | `tcp` | [`TcpOutbound`] | every accepted connection                 |
//! | `rtp` | [`RtpOutbound`] | UDP addresses subscribed over HTTP        |
//!
//! Both keep a bounded queue per peer ([`PeerFanout`]), so one slow peer
//! never stalls the destination pump.

pub mod peers;
pub mod rtp;
pub mod tcp;

pub use peers::PeerFanout;
pub use rtp::{RtpOutbound, RtpOutboundFactory, RtpOutboundOptions, RtpTrack, TrackOptions};
pub use tcp::{TcpOutbound, TcpOutboundFactory, TcpOutboundOptions};

use crate::registry::Registry;

/// Register the built-in outbound types
pub fn register(registry: &mut Registry) {
    registry.register_sink("tcp", TcpOutboundFactory);
    registry.register_sink("rtp", RtpOutboundFactory);
}
