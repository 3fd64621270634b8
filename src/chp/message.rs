//! The CHP1 wire message: `(sender, state, interval, time, flags, status?)`
//!.

use crate::codec::{self, CodecError, CodecResult};
use crate::dictionary::Dictionary;
use crate::fsm::State;
use crate::value::{Timestamp, Value};

pub const PROTOCOL_ID: &str = "CHP1";

pub const IS_EXTRASYSTOLE: u8 = 0x01;
pub const IS_AUTONOMOUS: u8 = 0x02;
pub const HAS_STATUS: u8 = 0x04;

fn state_to_code(state: State) -> i64 {
    match state {
        State::New => 0,
        State::Initializing => 1,
        State::Init => 2,
        State::Launching => 3,
        State::Orbit => 4,
        State::Landing => 5,
        State::Reconfiguring => 6,
        State::Starting => 7,
        State::Run => 8,
        State::Stopping => 9,
        State::Interrupting => 10,
        State::Safe => 11,
        State::Error => 12,
    }
}

fn code_to_state(code: i64) -> Option<State> {
    Some(match code {
        0 => State::New,
        1 => State::Initializing,
        2 => State::Init,
        3 => State::Launching,
        4 => State::Orbit,
        5 => State::Landing,
        6 => State::Reconfiguring,
        7 => State::Starting,
        8 => State::Run,
        9 => State::Stopping,
        10 => State::Interrupting,
        11 => State::Safe,
        12 => State::Error,
        _ => return None,
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatMessage {
    pub sender: String,
    pub time: Timestamp,
    pub state: State,
    pub interval: std::time::Duration,
    pub flags: u8,
    pub status: Option<String>,
}

impl HeartbeatMessage {
    pub fn new(sender: impl Into<String>, state: State, interval: std::time::Duration) -> Self {
        HeartbeatMessage {
            sender: sender.into(),
            time: Timestamp::now(),
            state,
            interval,
            flags: 0,
            status: None,
        }
    }

    pub fn with_flags(mut self, flags: u8) -> Self {
        self.flags = flags;
        self
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self.flags |= HAS_STATUS;
        self
    }

    pub fn is_extrasystole(&self) -> bool {
        self.flags & IS_EXTRASYSTOLE != 0
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut dict = Dictionary::new();
        dict.insert("protocol", PROTOCOL_ID);
        dict.insert("sender", self.sender.clone());
        dict.insert("time", Value::Time(self.time));
        dict.insert("state", state_to_code(self.state));
        dict.insert("interval_ms", self.interval.as_millis() as i64);
        dict.insert("flags", self.flags as i64);
        if let Some(status) = &self.status {
            dict.insert("status", status.clone());
        }
        codec::encode_dictionary(&dict)
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let dict = codec::decode_dictionary(bytes)?;
        let protocol = expect_text(&dict, "protocol")?;
        if protocol != PROTOCOL_ID {
            return Err(CodecError::MalformedPayload {
                reason: format!("expected protocol '{PROTOCOL_ID}', found '{protocol}'"),
            });
        }
        let sender = expect_text(&dict, "sender")?;
        let time = match dict.get("time") {
            Some(Value::Time(t)) => *t,
            _ => return Err(CodecError::MalformedPayload { reason: "CHP message missing 'time'".into() }),
        };
        let state = match dict.get("state") {
            Some(Value::Int(n)) => {
                code_to_state(*n).ok_or_else(|| CodecError::MalformedPayload { reason: format!("unknown CHP state code {n}") })?
            }
            _ => return Err(CodecError::MalformedPayload { reason: "CHP message missing 'state'".into() }),
        };
        let interval_ms = match dict.get("interval_ms") {
            Some(Value::Int(n)) => *n as u64,
            _ => return Err(CodecError::MalformedPayload { reason: "CHP message missing 'interval_ms'".into() }),
        };
        let flags = match dict.get("flags") {
            Some(Value::Int(n)) => *n as u8,
            _ => 0,
        };
        let status = match dict.get("status") {
            Some(Value::Text(s)) => Some(s.clone()),
            _ => None,
        };
        Ok(HeartbeatMessage {
            sender,
            time,
            state,
            interval: std::time::Duration::from_millis(interval_ms),
            flags,
            status,
        })
    }
}

fn expect_text(dict: &Dictionary, key: &str) -> CodecResult<String> {
    match dict.get(key) {
        Some(Value::Text(s)) => Ok(s.clone()),
        _ => Err(CodecError::MalformedPayload { reason: format!("CHP message missing '{key}'") }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_with_status() {
        let msg = HeartbeatMessage::new("sat1", State::Error, std::time::Duration::from_millis(1000))
            .with_status("detector offline");
        let bytes = msg.encode();
        let decoded = HeartbeatMessage::decode(&bytes).unwrap();
        assert_eq!(decoded.state, State::Error);
        assert_eq!(decoded.status.as_deref(), Some("detector offline"));
        assert_eq!(decoded.flags & HAS_STATUS, HAS_STATUS);
    }

    #[test]
    fn extrasystole_flag_roundtrips() {
        let msg = HeartbeatMessage::new("sat1", State::Run, std::time::Duration::from_millis(1000))
            .with_flags(IS_EXTRASYSTOLE);
        let decoded = HeartbeatMessage::decode(&msg.encode()).unwrap();
        assert!(decoded.is_extrasystole());
    }
}
