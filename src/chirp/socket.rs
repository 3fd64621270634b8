//! The shared UDP multicast socket CHIRP datagrams are sent and received
//! on: bound to the fixed group, reuse-address on, loopback enabled, TTL 8,
//! joined to the group on a configurable outbound interface.

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use socket2::{Domain, Protocol, Socket, Type};

use super::{MULTICAST_ADDRESS, MULTICAST_PORT, MULTICAST_TTL};

/// A bound, group-joined CHIRP multicast socket.
///
/// Wraps a `std::net::UdpSocket` rather than exposing the raw `socket2`
/// handle, so callers outside this module never juggle two socket types.
pub struct ChirpSocket {
    socket: std::net::UdpSocket,
}

impl ChirpSocket {
    /// Binds to `239.192.49.192:49192` and joins the multicast group on
    /// `interface` (the default route if `None`).
    pub fn bind(interface: Option<Ipv4Addr>) -> io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        #[cfg(unix)]
        socket.set_reuse_port(true)?;
        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, MULTICAST_PORT);
        socket.bind(&bind_addr.into())?;
        socket.set_multicast_loop_v4(true)?;
        socket.set_multicast_ttl_v4(MULTICAST_TTL)?;
        let iface = interface.unwrap_or(Ipv4Addr::UNSPECIFIED);
        socket.join_multicast_v4(&MULTICAST_ADDRESS, &iface)?;
        if let Some(iface) = interface {
            socket.set_multicast_if_v4(&iface)?;
        }
        let socket: std::net::UdpSocket = socket.into();
        Ok(ChirpSocket { socket })
    }

    /// Broadcasts `bytes` to the multicast group.
    pub fn send(&self, bytes: &[u8]) -> io::Result<usize> {
        self.socket.send_to(bytes, (MULTICAST_ADDRESS, MULTICAST_PORT))
    }

    /// Blocks up to `timeout` for one datagram, returning `None` on timeout.
    pub fn recv(&self, buf: &mut [u8], timeout: Duration) -> io::Result<Option<(usize, SocketAddr)>> {
        self.socket.set_read_timeout(Some(timeout))?;
        match self.socket.recv_from(buf) {
            Ok((n, addr)) => Ok(Some((n, addr))),
            Err(e) if is_timeout(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bind_succeeds_on_loopback_interface() {
        // Two processes in the same test run would collide on the fixed
        // port with SO_REUSEADDR+SO_REUSEPORT, which is exactly what lets
        // multiple satellites on one host share the group.
        let a = ChirpSocket::bind(Some(Ipv4Addr::LOCALHOST));
        assert!(a.is_ok());
    }
}
