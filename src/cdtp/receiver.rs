//! The CDTP pull side: `BEFORE_BOR → IN_RUN → STOPPING → GOT_EOR →
//! BEFORE_BOR`.

use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::chirp::{Listener as ChirpListener, ServiceIdentifier};
use crate::dictionary::Dictionary;
use crate::net::{self, MultipartStream, TransportError};

use super::error::{CdtpError, CdtpResult};
use super::message::{CdtpMessage, MessageType};

pub const DEFAULT_CHIRP_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_BOR_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_DATA_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_EOR_TIMEOUT: Duration = Duration::from_secs(10);

const DISCOVERY_POLL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    BeforeBor,
    InRun,
    Stopping,
    GotEor,
}

/// A DATA message surfaced to the caller by `recv_data`, or a plain
/// timeout while still `IN_RUN` (not yet an error: the run may simply be
/// between sends).
pub enum DataOutcome {
    Data { sequence: u64, frames: Vec<Vec<u8>> },
    TimedOut,
}

pub struct Receiver {
    state: Mutex<State>,
    stream: Mutex<Option<MultipartStream>>,
    last_seq: Mutex<u64>,
    eor: Mutex<Option<Dictionary>>,
    chirp_timeout: Duration,
    bor_timeout: Duration,
    data_timeout: Duration,
    eor_timeout: Duration,
}

impl Receiver {
    pub fn new() -> Self {
        Receiver {
            state: Mutex::new(State::BeforeBor),
            stream: Mutex::new(None),
            last_seq: Mutex::new(0),
            eor: Mutex::new(None),
            chirp_timeout: DEFAULT_CHIRP_TIMEOUT,
            bor_timeout: DEFAULT_BOR_TIMEOUT,
            data_timeout: DEFAULT_DATA_TIMEOUT,
            eor_timeout: DEFAULT_EOR_TIMEOUT,
        }
    }

    pub fn with_timeouts(mut self, chirp: Duration, bor: Duration, data: Duration, eor: Duration) -> Self {
        self.chirp_timeout = chirp;
        self.bor_timeout = bor;
        self.data_timeout = data;
        self.eor_timeout = eor;
        self
    }

    /// Polls `listener`'s discovered DATA services for one whose host is
    /// `data_sender_name`, every 100 ms up to `chirp_timeout`. Connects and
    /// returns once found.
    pub fn launching(&self, listener: &ChirpListener, data_sender_name: &str) -> CdtpResult<()> {
        let deadline = Instant::now() + self.chirp_timeout;
        loop {
            if let Some(service) = listener
                .discovered_services()
                .into_iter()
                .find(|s| s.service_id == ServiceIdentifier::Data && s.host_name == data_sender_name)
            {
                let addr: Ipv4Addr = service.address;
                let stream = net::connect(&addr.to_string(), service.port).map_err(|e| CdtpError::Io(e.to_string()))?;
                *self.stream.lock().unwrap() = Some(MultipartStream::new(stream).map_err(|e| CdtpError::Io(e.to_string()))?);
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(CdtpError::Transport(TransportError::ChirpTimeoutError));
            }
            std::thread::sleep(DISCOVERY_POLL);
        }
    }

    /// Receives BOR within `bor_timeout` and transitions to `IN_RUN`.
    pub fn starting(&self) -> CdtpResult<Dictionary> {
        let msg = self.recv_one(self.bor_timeout, TransportError::RecvTimeoutError)?;
        if msg.header.msg_type != MessageType::Bor {
            return Err(CdtpError::InvalidMessageType);
        }
        let dict = msg.decode_dictionary_payload()?;
        *self.last_seq.lock().unwrap() = msg.header.sequence;
        *self.state.lock().unwrap() = State::InRun;
        Ok(dict)
    }

    /// Blocks up to `data_timeout` for the next message. A DATA message
    /// with a non-monotonic sequence is still surfaced (after a logged
    /// warning); an EOR moves straight to `GOT_EOR`.
    pub fn recv_data(&self) -> CdtpResult<DataOutcome> {
        self.require(State::InRun)?;
        let msg = match self.try_recv_one(self.data_timeout) {
            Ok(Some(msg)) => msg,
            Ok(None) => return Ok(DataOutcome::TimedOut),
            Err(e) => return Err(e),
        };
        match msg.header.msg_type {
            MessageType::Data => {
                let mut last = self.last_seq.lock().unwrap();
                if msg.header.sequence != *last + 1 {
                    log::warn!(
                        "CDTP sequence gap: expected {}, got {}",
                        *last + 1,
                        msg.header.sequence
                    );
                }
                *last = msg.header.sequence;
                Ok(DataOutcome::Data { sequence: msg.header.sequence, frames: msg.frames })
            }
            MessageType::Eor => {
                let dict = msg.decode_dictionary_payload()?;
                *self.eor.lock().unwrap() = Some(dict);
                *self.state.lock().unwrap() = State::GotEor;
                Ok(DataOutcome::TimedOut)
            }
            MessageType::Bor => Err(CdtpError::InvalidMessageType),
        }
    }

    /// Moves to `STOPPING` and waits up to `eor_timeout` for EOR, draining
    /// any trailing DATA messages in the meantime.
    pub fn stopping(&self) -> CdtpResult<()> {
        {
            let mut state = self.state.lock().unwrap();
            if *state == State::GotEor {
                return Ok(());
            }
            if *state != State::InRun {
                return Err(CdtpError::NotInExpectedState { expected: "IN_RUN", actual: state_name(*state) });
            }
            *state = State::Stopping;
        }
        let deadline = Instant::now() + self.eor_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(CdtpError::Transport(TransportError::RecvTimeoutError));
            }
            let msg = match self.try_recv_one(remaining)? {
                Some(msg) => msg,
                None => return Err(CdtpError::Transport(TransportError::RecvTimeoutError)),
            };
            match msg.header.msg_type {
                MessageType::Eor => {
                    let dict = msg.decode_dictionary_payload()?;
                    *self.eor.lock().unwrap() = Some(dict);
                    *self.state.lock().unwrap() = State::GotEor;
                    return Ok(());
                }
                MessageType::Data => continue,
                MessageType::Bor => return Err(CdtpError::InvalidMessageType),
            }
        }
    }

    /// Whether EOR has been received.
    pub fn got_eor(&self) -> bool {
        *self.state.lock().unwrap() == State::GotEor
    }

    /// Returns the stored EOR metadata and resets to `BEFORE_BOR`, closing
    /// the connection.
    pub fn get_eor(&self) -> CdtpResult<Dictionary> {
        self.require(State::GotEor)?;
        let dict = self.eor.lock().unwrap().take().expect("GOT_EOR implies eor metadata is present");
        *self.stream.lock().unwrap() = None;
        *self.state.lock().unwrap() = State::BeforeBor;
        Ok(dict)
    }

    fn require(&self, expected: State) -> CdtpResult<()> {
        let actual = *self.state.lock().unwrap();
        if actual != expected {
            return Err(CdtpError::NotInExpectedState { expected: state_name(expected), actual: state_name(actual) });
        }
        Ok(())
    }

    fn recv_one(&self, timeout: Duration, on_timeout: TransportError) -> CdtpResult<CdtpMessage> {
        self.try_recv_one(timeout)?.ok_or(CdtpError::Transport(on_timeout))
    }

    fn try_recv_one(&self, timeout: Duration) -> CdtpResult<Option<CdtpMessage>> {
        let mut guard = self.stream.lock().unwrap();
        let stream = guard.as_mut().ok_or_else(|| CdtpError::Io("not connected".into()))?;
        match stream.recv_multipart(timeout) {
            Ok(Some(parts)) => Ok(Some(CdtpMessage::from_multipart(parts)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(CdtpError::Io(e.to_string())),
        }
    }
}

impl Default for Receiver {
    fn default() -> Self {
        Self::new()
    }
}

fn state_name(state: State) -> &'static str {
    match state {
        State::BeforeBor => "BEFORE_BOR",
        State::InRun => "IN_RUN",
        State::Stopping => "STOPPING",
        State::GotEor => "GOT_EOR",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr as V4;

    #[test]
    fn launching_without_a_producer_times_out() {
        let manager = crate::chirp::Manager::new("cdtp-recv-test", "consumer", Some(V4::LOCALHOST)).unwrap();
        let receiver = Receiver::new().with_timeouts(
            Duration::from_millis(150),
            DEFAULT_BOR_TIMEOUT,
            DEFAULT_DATA_TIMEOUT,
            DEFAULT_EOR_TIMEOUT,
        );
        let result = receiver.launching(manager.listener(), "nonexistent-producer");
        assert_eq!(result, Err(CdtpError::Transport(TransportError::ChirpTimeoutError)));
    }

    #[test]
    fn stopping_before_in_run_is_rejected() {
        let receiver = Receiver::new();
        assert!(receiver.stopping().is_err());
    }
}
