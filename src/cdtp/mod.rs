//! CDTP — the data-transmission protocol: a strictly-ordered
//! push/pull stream between one sender and one receiver, framed as
//! BOR/DATA/EOR.

mod error;
mod message;
mod receiver;
mod sender;

pub use error::{CdtpError, CdtpResult};
pub use message::{CdtpHeader, CdtpMessage, MessageType, PROTOCOL_ID};
pub use receiver::{DataOutcome, Receiver};
pub use sender::Sender;
