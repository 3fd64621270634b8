//! Transport and port helpers shared by every protocol: ephemeral binding,
//! the process-wide messaging context, and the length-prefixed multipart
//! framing used by CSCP, CDTP, CMDP, and CHP sockets.
//!
//! CHIRP is the one protocol that talks raw UDP multicast rather than this
//! module's TCP multipart framing; its socket lives in [`crate::chirp`].

pub mod context;
pub mod multipart;

pub use context::MessagingContext;
pub use multipart::{MultipartError, MultipartResult, MultipartStream};

use std::fmt;
use std::io;
use std::net::{TcpListener, TcpStream};

/// The three timeout-driven failures a blocking wait can raise. Shared by
/// CDTP's sender/receiver and CHIRP-backed discovery waits; not used for
/// protocol-level decode failures, which stay `CodecError`/`ProtocolError`
/// and are logged and dropped rather than propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No matching service was discovered via CHIRP within the timeout.
    ChirpTimeoutError,
    /// A send did not complete within its configured timeout.
    SendTimeoutError,
    /// A receive did not complete within its configured timeout.
    RecvTimeoutError,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ChirpTimeoutError => write!(f, "no producer discovered via CHIRP in time"),
            TransportError::SendTimeoutError => write!(f, "send did not complete in time"),
            TransportError::RecvTimeoutError => write!(f, "receive did not complete in time"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Port number for a network connection. Most ports in this crate are
/// ephemeral: allocated by the operating system at bind time.
pub type Port = u16;

/// Binds a `TcpListener` to the wildcard address with an OS-chosen port,
/// returning both. Used for CMDP publisher, CSCP reply, and CDTP push
/// sockets.
pub fn bind_ephemeral() -> io::Result<(TcpListener, Port)> {
    let listener = TcpListener::bind("0.0.0.0:0")?;
    let port = listener.local_addr()?.port();
    Ok((listener, port))
}

/// Connects a `TcpStream` to `host:port`, disabling Nagle's algorithm so
/// that small control frames are not delayed.
pub fn connect(host: &str, port: Port) -> io::Result<TcpStream> {
    let stream = TcpStream::connect((host, port))?;
    stream.set_nodelay(true)?;
    Ok(stream)
}
