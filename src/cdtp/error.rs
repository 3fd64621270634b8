use std::fmt;

use crate::codec::CodecError;
use crate::net::TransportError;

#[derive(Debug, Clone, PartialEq)]
pub enum CdtpError {
    /// A call was made in a state the sender/receiver state machine does
    /// not permit it in (e.g. `starting` while already `IN_RUN`).
    NotInExpectedState { expected: &'static str, actual: &'static str },
    /// A frame carried a message type the calling step doesn't accept.
    InvalidMessageType,
    Transport(TransportError),
    Codec(CodecError),
    Io(String),
}

impl fmt::Display for CdtpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CdtpError::NotInExpectedState { expected, actual } => {
                write!(f, "expected state {expected}, was {actual}")
            }
            CdtpError::InvalidMessageType => write!(f, "unexpected CDTP message type"),
            CdtpError::Transport(e) => write!(f, "{e}"),
            CdtpError::Codec(e) => write!(f, "{e}"),
            CdtpError::Io(msg) => write!(f, "i/o error: {msg}"),
        }
    }
}

impl std::error::Error for CdtpError {}

impl From<TransportError> for CdtpError {
    fn from(e: TransportError) -> Self {
        CdtpError::Transport(e)
    }
}

impl From<CodecError> for CdtpError {
    fn from(e: CodecError) -> Self {
        CdtpError::Codec(e)
    }
}

pub type CdtpResult<T> = Result<T, CdtpError>;
