//! Length-prefixed multipart framing over a `TcpStream`.
//!
//! A message is `[frame_count: u32][len: u32][bytes]*`, little-endian.
//! This stands in for the multipart messages a ZeroMQ REQ/REP, PUSH/PULL,
//! or PUB/SUB socket would exchange natively; every protocol module above
//! this one (CSCP, CDTP, CMDP, CHP) builds its header/payload frames on
//! top of it.

use std::fmt;
use std::io::{self, ErrorKind, Read, Write};
use std::net::TcpStream;
use std::time::Duration;

/// Hard ceiling on a single frame's length, guarding against a corrupted
/// or adversarial length prefix causing an unbounded allocation.
const MAX_FRAME_LEN: u32 = 64 * 1024 * 1024;

#[derive(Debug)]
pub enum MultipartError {
    Io(io::Error),
    FrameTooLarge { len: u32 },
}

impl fmt::Display for MultipartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MultipartError::Io(e) => write!(f, "i/o error: {e}"),
            MultipartError::FrameTooLarge { len } => write!(f, "frame of {len} bytes exceeds limit"),
        }
    }
}

impl std::error::Error for MultipartError {}

impl From<io::Error> for MultipartError {
    fn from(e: io::Error) -> Self {
        MultipartError::Io(e)
    }
}

pub type MultipartResult<T> = Result<T, MultipartError>;

/// A `TcpStream` wrapped with multipart send/receive helpers.
pub struct MultipartStream {
    stream: TcpStream,
}

impl MultipartStream {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        Ok(MultipartStream { stream })
    }

    pub fn into_inner(self) -> TcpStream {
        self.stream
    }

    pub fn try_clone(&self) -> io::Result<Self> {
        Ok(MultipartStream { stream: self.stream.try_clone()? })
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_read_timeout(timeout)
    }

    pub fn set_write_timeout(&self, timeout: Option<Duration>) -> io::Result<()> {
        self.stream.set_write_timeout(timeout)
    }

    pub fn send_multipart(&mut self, frames: &[Vec<u8>]) -> MultipartResult<()> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(frames.len() as u32).to_le_bytes());
        for frame in frames {
            buf.extend_from_slice(&(frame.len() as u32).to_le_bytes());
            buf.extend_from_slice(frame);
        }
        self.stream.write_all(&buf)?;
        self.stream.flush()?;
        Ok(())
    }

    /// Receives one multipart message, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` if no message starts arriving before `timeout`
    /// elapses. A timeout that interrupts a message already in progress is
    /// surfaced as `Err` rather than `Ok(None)`, since the stream is then
    /// in an indeterminate, non-resumable state for this simple framing.
    pub fn recv_multipart(&mut self, timeout: Duration) -> MultipartResult<Option<Vec<Vec<u8>>>> {
        self.stream.set_read_timeout(Some(timeout))?;
        let mut count_buf = [0u8; 4];
        match self.stream.read_exact(&mut count_buf) {
            Ok(()) => {}
            Err(e) if is_timeout(&e) => return Ok(None),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let count = u32::from_le_bytes(count_buf);
        let mut frames = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let mut len_buf = [0u8; 4];
            self.stream.read_exact(&mut len_buf)?;
            let len = u32::from_le_bytes(len_buf);
            if len > MAX_FRAME_LEN {
                return Err(MultipartError::FrameTooLarge { len });
            }
            let mut frame = vec![0u8; len as usize];
            self.stream.read_exact(&mut frame)?;
            frames.push(frame);
        }
        Ok(Some(frames))
    }
}

fn is_timeout(e: &io::Error) -> bool {
    matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn roundtrips_multipart_message() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut server = MultipartStream::new(stream).unwrap();
            let frames = server.recv_multipart(Duration::from_secs(2)).unwrap().unwrap();
            assert_eq!(frames, vec![b"header".to_vec(), b"payload".to_vec()]);
            server.send_multipart(&[b"ack".to_vec()]).unwrap();
        });
        let client_stream = TcpStream::connect(addr).unwrap();
        let mut client = MultipartStream::new(client_stream).unwrap();
        client.send_multipart(&[b"header".to_vec(), b"payload".to_vec()]).unwrap();
        let reply = client.recv_multipart(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(reply, vec![b"ack".to_vec()]);
        handle.join().unwrap();
    }

    #[test]
    fn recv_times_out_with_no_message() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            // Keep the connection open without sending anything.
            thread::sleep(Duration::from_millis(200));
            drop(stream);
        });
        let client_stream = TcpStream::connect(addr).unwrap();
        let mut client = MultipartStream::new(client_stream).unwrap();
        let result = client.recv_multipart(Duration::from_millis(50)).unwrap();
        assert!(result.is_none());
        handle.join().unwrap();
    }
}
