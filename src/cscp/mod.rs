//! The satellite command and state protocol: command verbs in, a typed
//! reply out, over a length-prefixed TCP stream rather than a native
//! ZeroMQ REQ/REP socket.

mod dispatcher;
mod message;

pub use dispatcher::Dispatcher;
pub use message::{CscpHeader, CscpMessage, MessageType, PROTOCOL_ID};
