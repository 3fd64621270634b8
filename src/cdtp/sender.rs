//! The CDTP push side: `BEFORE_BOR → IN_RUN → BEFORE_BOR`.

use std::net::TcpListener;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::chirp::{Manager as ChirpManager, ServiceIdentifier};
use crate::codec;
use crate::config::Configuration;
use crate::dictionary::Dictionary;
use crate::net::{MultipartStream, TransportError};

use super::error::{CdtpError, CdtpResult};
use super::message::{CdtpHeader, MessageType};

pub const DEFAULT_BOR_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_EOR_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SenderState {
    BeforeBor,
    InRun,
}

struct Accepted {
    stream: Mutex<Option<MultipartStream>>,
    arrived: Condvar,
}

/// Owns the listening socket advertised via CHIRP as `DATA`, accepts
/// exactly one receiver connection, and pushes BOR/DATA/EOR frames to it.
pub struct Sender {
    sender_name: String,
    accepted: Arc<Accepted>,
    accept_stop: Arc<AtomicBool>,
    accept_handle: Mutex<Option<JoinHandle<()>>>,
    state: Mutex<SenderState>,
    seq: Mutex<u64>,
    bor_timeout: Duration,
    eor_timeout: Duration,
}

impl Sender {
    pub fn spawn(manager: &ChirpManager, sender_name: impl Into<String>) -> std::io::Result<Self> {
        let sender_name = sender_name.into();
        let listener = TcpListener::bind("0.0.0.0:0")?;
        let port = listener.local_addr()?.port();
        manager
            .register_service(ServiceIdentifier::Data, port)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::AddrInUse, e.to_string()))?;

        let accepted = Arc::new(Accepted { stream: Mutex::new(None), arrived: Condvar::new() });
        let stop = Arc::new(AtomicBool::new(false));
        let accept_thread_accepted = Arc::clone(&accepted);
        let accept_thread_stop = Arc::clone(&stop);
        listener.set_nonblocking(true)?;
        let handle = thread::spawn(move || accept_loop(listener, accept_thread_accepted, accept_thread_stop));

        Ok(Sender {
            sender_name,
            accepted,
            accept_stop: stop,
            accept_handle: Mutex::new(Some(handle)),
            state: Mutex::new(SenderState::BeforeBor),
            seq: Mutex::new(0),
            bor_timeout: DEFAULT_BOR_TIMEOUT,
            eor_timeout: DEFAULT_EOR_TIMEOUT,
        })
    }

    pub fn with_timeouts(mut self, bor_timeout: Duration, eor_timeout: Duration) -> Self {
        self.bor_timeout = bor_timeout;
        self.eor_timeout = eor_timeout;
        self
    }

    /// Sends BOR carrying `config`'s used-key dictionary, resets `seq` to
    /// 0, and transitions to `IN_RUN`.
    pub fn starting(&self, config: &Configuration) -> CdtpResult<()> {
        self.require(SenderState::BeforeBor)?;
        *self.seq.lock().unwrap() = 0;
        let header = CdtpHeader::new(self.sender_name.clone(), MessageType::Bor, 0);
        let payload = codec::encode_dictionary(&config.get_used());
        self.send_with_timeout(vec![header.encode(), payload], self.bor_timeout)?;
        *self.state.lock().unwrap() = SenderState::InRun;
        Ok(())
    }

    /// Builds the header for the next DATA message, incrementing `seq`.
    pub fn new_data_message(&self, frames: Vec<Vec<u8>>) -> CdtpResult<(CdtpHeader, Vec<Vec<u8>>)> {
        self.require(SenderState::InRun)?;
        let seq = {
            let mut seq = self.seq.lock().unwrap();
            *seq += 1;
            *seq
        };
        Ok((CdtpHeader::new(self.sender_name.clone(), MessageType::Data, seq), frames))
    }

    /// Non-blocking send: `Ok(true)` if the frames were handed to the
    /// socket, `Ok(false)` if the send would have blocked (the receiver
    /// isn't keeping up or hasn't connected yet).
    pub fn send_data_message(&self, header: CdtpHeader, frames: Vec<Vec<u8>>) -> CdtpResult<bool> {
        self.require(SenderState::InRun)?;
        let mut parts = Vec::with_capacity(1 + frames.len());
        parts.push(header.encode());
        parts.extend(frames);
        match self.send_with_timeout(parts, Duration::from_millis(10)) {
            Ok(()) => Ok(true),
            Err(CdtpError::Transport(TransportError::SendTimeoutError)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Sends EOR with `metadata` and returns to `BEFORE_BOR`.
    pub fn stopping(&self, metadata: Dictionary) -> CdtpResult<()> {
        self.require(SenderState::InRun)?;
        let seq = {
            let mut seq = self.seq.lock().unwrap();
            *seq += 1;
            *seq
        };
        let header = CdtpHeader::new(self.sender_name.clone(), MessageType::Eor, seq);
        let payload = codec::encode_dictionary(&metadata);
        self.send_with_timeout(vec![header.encode(), payload], self.eor_timeout)?;
        *self.state.lock().unwrap() = SenderState::BeforeBor;
        Ok(())
    }

    fn require(&self, expected: SenderState) -> CdtpResult<()> {
        let actual = *self.state.lock().unwrap();
        if actual != expected {
            return Err(CdtpError::NotInExpectedState { expected: state_name(expected), actual: state_name(actual) });
        }
        Ok(())
    }

    fn send_with_timeout(&self, parts: Vec<Vec<u8>>, timeout: Duration) -> CdtpResult<()> {
        let mut guard = self.accepted.stream.lock().unwrap();
        let deadline = std::time::Instant::now() + timeout;
        loop {
            if guard.is_some() {
                break;
            }
            let now = std::time::Instant::now();
            if now >= deadline {
                return Err(CdtpError::Transport(TransportError::SendTimeoutError));
            }
            let (g, _timed_out) = self.accepted.arrived.wait_timeout(guard, deadline - now).unwrap();
            guard = g;
        }
        let stream = guard.as_mut().unwrap();
        stream.set_write_timeout(Some(Duration::from_millis(20))).map_err(|e| CdtpError::Io(e.to_string()))?;
        stream
            .send_multipart(&parts)
            .map_err(|e| classify_send_error(e, timeout))
    }
}

fn classify_send_error(e: crate::net::MultipartError, _timeout: Duration) -> CdtpError {
    if let crate::net::MultipartError::Io(io_err) = &e {
        if matches!(io_err.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) {
            return CdtpError::Transport(TransportError::SendTimeoutError);
        }
    }
    CdtpError::Io(e.to_string())
}

fn state_name(state: SenderState) -> &'static str {
    match state {
        SenderState::BeforeBor => "BEFORE_BOR",
        SenderState::InRun => "IN_RUN",
    }
}

fn accept_loop(listener: TcpListener, accepted: Arc<Accepted>, stop: Arc<AtomicBool>) {
    while !stop.load(Ordering::Relaxed) {
        match listener.accept() {
            Ok((stream, _addr)) => {
                stream.set_nonblocking(false).ok();
                if let Ok(wrapped) = MultipartStream::new(stream) {
                    *accepted.stream.lock().unwrap() = Some(wrapped);
                    accepted.arrived.notify_all();
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(50));
            }
            Err(_) => thread::sleep(Duration::from_millis(50)),
        }
    }
}

impl Drop for Sender {
    fn drop(&mut self) {
        self.accept_stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.accept_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn starting_before_connection_times_out() {
        let manager = ChirpManager::new("cdtp-sender-test", "producer", Some(Ipv4Addr::LOCALHOST)).unwrap();
        let sender = Sender::spawn(&manager, "producer")
            .unwrap()
            .with_timeouts(Duration::from_millis(100), Duration::from_millis(100));
        let config = Configuration::new(Dictionary::new());
        assert_eq!(sender.starting(&config), Err(CdtpError::Transport(TransportError::SendTimeoutError)));
    }

    #[test]
    fn data_message_requires_in_run() {
        let manager = ChirpManager::new("cdtp-sender-test2", "producer2", Some(Ipv4Addr::LOCALHOST)).unwrap();
        let sender = Sender::spawn(&manager, "producer2").unwrap();
        assert!(sender.new_data_message(vec![]).is_err());
    }
}
