//! CHIRP — UDP multicast service discovery.
//!
//! Two cooperating roles share one multicast socket: a [`listener::Listener`]
//! that decodes inbound datagrams and dispatches discovery/request
//! callbacks, and a [`manager::Manager`] that additionally tracks which
//! services this process has registered and broadcasts on its behalf.

pub mod listener;
pub mod manager;
pub mod message;
pub mod service;
pub mod socket;

pub use listener::{DiscoveredEvent, DiscoveryKind, Listener};
pub use manager::{ChirpError, Manager};
pub use message::ChirpMessage;
pub use service::{ServiceDescriptor, ServiceIdentifier};
pub use socket::ChirpSocket;

use std::net::Ipv4Addr;

/// Fixed multicast group CHIRP datagrams are exchanged on.
pub const MULTICAST_ADDRESS: Ipv4Addr = Ipv4Addr::new(239, 192, 49, 192);
/// UDP port of the CHIRP multicast group.
pub const MULTICAST_PORT: u16 = 49192;
/// Multicast TTL every CHIRP datagram is sent with.
pub const MULTICAST_TTL: u32 = 8;
/// Upper bound on a single CHIRP datagram.
pub const BUFFER_SIZE: usize = 1024;
/// Leading tag every CHIRP datagram must carry.
pub const PROTOCOL_ID: &str = "CHIRP2";

fn md5_digest(input: &str) -> [u8; 16] {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    let result = hasher.finalize();
    let mut out = [0u8; 16];
    out.copy_from_slice(&result);
    out
}
