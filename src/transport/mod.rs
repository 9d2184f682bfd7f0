//! Transport module - network selection, dialing and the datagram wrapper.
//!
//! Provides:
//! - [`Network`] - transport kind named by the caller (`udp`, `tcp4`, ...)
//! - [`Dialer`] - opens a socket within a timeout and a cancellation scope
//! - [`UdpConn`] - heartbeat-bounded reads and writes on a connected socket

mod dialer;
mod udp;

pub use dialer::{Dialer, Network, Socket, DEFAULT_DIAL_TIMEOUT};
pub use udp::UdpConn;
