//! The CSCP1 wire message: a header carrying the reply/request type and the
//! verb text, plus an optional single payload frame.

use crate::codec::{self, CodecError, CodecResult};
use crate::dictionary::{Dictionary, List};
use crate::value::{Timestamp, Value};

pub const PROTOCOL_ID: &str = "CSCP1";

/// The outer message kind, carried alongside the verb text rather than
/// replacing it: a `REQUEST` carries a command name in `verb`, every other
/// type carries a human-readable reply message there.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Success,
    NotImplemented,
    Incomplete,
    Invalid,
    Unknown,
    Error,
}

impl MessageType {
    pub fn to_byte(self) -> u8 {
        match self {
            MessageType::Request => 0x00,
            MessageType::Success => 0x01,
            MessageType::NotImplemented => 0x02,
            MessageType::Incomplete => 0x03,
            MessageType::Invalid => 0x04,
            MessageType::Unknown => 0x05,
            MessageType::Error => 0x06,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(MessageType::Request),
            0x01 => Some(MessageType::Success),
            0x02 => Some(MessageType::NotImplemented),
            0x03 => Some(MessageType::Incomplete),
            0x04 => Some(MessageType::Invalid),
            0x05 => Some(MessageType::Unknown),
            0x06 => Some(MessageType::Error),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MessageType::Request => "REQUEST",
            MessageType::Success => "SUCCESS",
            MessageType::NotImplemented => "NOTIMPLEMENTED",
            MessageType::Incomplete => "INCOMPLETE",
            MessageType::Invalid => "INVALID",
            MessageType::Unknown => "UNKNOWN",
            MessageType::Error => "ERROR",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CscpHeader {
    pub sender: String,
    pub time: Timestamp,
    pub msg_type: MessageType,
    pub verb: String,
    pub tags: Dictionary,
}

impl CscpHeader {
    pub fn new(sender: impl Into<String>, msg_type: MessageType, verb: impl Into<String>) -> Self {
        CscpHeader {
            sender: sender.into(),
            time: Timestamp::now(),
            msg_type,
            verb: verb.into(),
            tags: Dictionary::new(),
        }
    }

    fn to_dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("protocol", PROTOCOL_ID);
        dict.insert("sender", self.sender.clone());
        dict.insert("time", Value::Time(self.time));
        dict.insert("type", self.msg_type.to_byte() as i64);
        dict.insert("verb", self.verb.clone());
        dict.insert("tags", Value::List(tags_to_list(&self.tags)));
        dict
    }

    pub fn encode(&self) -> Vec<u8> {
        codec::encode_dictionary(&self.to_dictionary())
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
            _ => return Err(CodecError::MalformedPayload { reason: "CSCP header missing 'time'".into() }),
        };
        let msg_type = match dict.get("type") {
            Some(Value::Int(n)) => MessageType::from_byte(*n as u8)
                .ok_or_else(|| CodecError::MalformedPayload { reason: format!("unknown CSCP message type {n}") })?,
            _ => return Err(CodecError::MalformedPayload { reason: "CSCP header missing 'type'".into() }),
        };
        let verb = expect_text(&dict, "verb")?;
        let tags = match dict.get("tags") {
            Some(Value::List(list)) => list_to_tags(list)?,
            _ => Dictionary::new(),
        };
        Ok(CscpHeader { sender, time, msg_type, verb, tags })
    }
}

fn expect_text(dict: &Dictionary, key: &str) -> CodecResult<String> {
    match dict.get(key) {
        Some(Value::Text(s)) => Ok(s.clone()),
        _ => Err(CodecError::MalformedPayload { reason: format!("CSCP header missing '{key}'") }),
    }
}

fn tags_to_list(tags: &Dictionary) -> List {
    let mut items = Vec::with_capacity(tags.len() * 2);
    for (k, v) in tags.iter() {
        items.push(Value::Text(k.clone()));
        items.push(v.clone());
    }
    List(items)
}

fn list_to_tags(list: &List) -> CodecResult<Dictionary> {
    let mut dict = Dictionary::new();
    let items: Vec<&Value> = list.iter().collect();
    if items.len() % 2 != 0 {
        return Err(CodecError::MalformedPayload { reason: "tag list has an odd number of entries".into() });
    }
    for pair in items.chunks(2) {
        let key = match pair[0] {
            Value::Text(s) => s.clone(),
            _ => return Err(CodecError::MalformedPayload { reason: "tag key is not text".into() }),
        };
        dict.insert(key, pair[1].clone());
    }
    Ok(dict)
}

/// A full CSCP message: header plus an optional raw payload frame. Empty
/// `payload` means the message carries none.
#[derive(Debug, Clone, PartialEq)]
pub struct CscpMessage {
    pub header: CscpHeader,
    pub payload: Vec<u8>,
}

impl CscpMessage {
    pub fn new(header: CscpHeader) -> Self {
        CscpMessage { header, payload: Vec::new() }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = payload;
        self
    }

    pub fn has_payload(&self) -> bool {
        !self.payload.is_empty()
    }

    pub fn into_multipart(self) -> Vec<Vec<u8>> {
        vec![self.header.encode(), self.payload]
    }

    pub fn from_multipart(parts: Vec<Vec<u8>>) -> CodecResult<Self> {
        if parts.len() != 2 {
            return Err(CodecError::MalformedPayload { reason: format!("CSCP message has {} frames, expected 2", parts.len()) });
        }
        let mut parts = parts;
        let payload = parts.remove(1);
        let header = CscpHeader::decode(&parts[0])?;
        Ok(CscpMessage { header, payload })
    }

    pub fn decode_dictionary_payload(&self) -> CodecResult<Dictionary> {
        if self.payload.is_empty() {
            return Ok(Dictionary::new());
        }
        codec::decode_dictionary(&self.payload)
    }

    pub fn decode_list_payload(&self) -> CodecResult<List> {
        if self.payload.is_empty() {
            return Ok(List::new());
        }
        codec::decode_list(&self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips() {
        let header = CscpHeader::new("ctrl1", MessageType::Request, "get_state");
        let bytes = header.encode();
        let decoded = CscpHeader::decode(&bytes).unwrap();
        assert_eq!(decoded.sender, "ctrl1");
        assert_eq!(decoded.msg_type, MessageType::Request);
        assert_eq!(decoded.verb, "get_state");
    }

    #[test]
    fn message_without_payload_roundtrips() {
        let header = CscpHeader::new("sat1", MessageType::Success, "ORBIT");
        let msg = CscpMessage::new(header);
        let parts = msg.clone().into_multipart();
        let decoded = CscpMessage::from_multipart(parts).unwrap();
        assert_eq!(decoded, msg);
        assert!(!decoded.has_payload());
    }

    #[test]
    fn message_with_dictionary_payload_roundtrips() {
        let header = CscpHeader::new("sat1", MessageType::Success, "Configuration attached");
        let mut dict = Dictionary::new();
        dict.insert("threshold", 7_i64);
        let msg = CscpMessage::new(header).with_payload(codec::encode_dictionary(&dict));
        let decoded = CscpMessage::from_multipart(msg.clone().into_multipart()).unwrap();
        let roundtripped = decoded.decode_dictionary_payload().unwrap();
        assert_eq!(roundtripped.get("threshold"), Some(&Value::Int(7)));
    }

    #[test]
    fn wrong_protocol_is_rejected() {
        let mut dict = Dictionary::new();
        dict.insert("protocol", "CDTP1");
        dict.insert("sender", "x");
        dict.insert("time", Value::Time(Timestamp::now()));
        dict.insert("type", 0_i64);
        dict.insert("verb", "get_state");
        let bytes = codec::encode_dictionary(&dict);
        assert!(CscpHeader::decode(&bytes).is_err());
    }
}
