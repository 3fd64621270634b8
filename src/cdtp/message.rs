//! The CDTP1 wire message: a header carrying the message type and sequence
//! number, plus zero or more raw payload frames.

use crate::codec::{self, CodecError, CodecResult};
use crate::dictionary::{Dictionary, List};
use crate::value::{Timestamp, Value};

pub const PROTOCOL_ID: &str = "CDTP1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Data,
    Bor,
    Eor,
}

impl MessageType {
    pub fn to_byte(self) -> u8 {
        match self {
            MessageType::Data => 0x00,
            MessageType::Bor => 0x01,
            MessageType::Eor => 0x02,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(MessageType::Data),
            0x01 => Some(MessageType::Bor),
            0x02 => Some(MessageType::Eor),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CdtpHeader {
    pub sender: String,
    pub time: Timestamp,
    pub msg_type: MessageType,
    pub sequence: u64,
    pub tags: Dictionary,
}

impl CdtpHeader {
    pub fn new(sender: impl Into<String>, msg_type: MessageType, sequence: u64) -> Self {
        CdtpHeader {
            sender: sender.into(),
            time: Timestamp::now(),
            msg_type,
            sequence,
            tags: Dictionary::new(),
        }
    }

    fn to_dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("protocol", PROTOCOL_ID);
        dict.insert("sender", self.sender.clone());
        dict.insert("time", Value::Time(self.time));
        dict.insert("type", self.msg_type.to_byte() as i64);
        dict.insert("seq", self.sequence as i64);
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
            _ => return Err(CodecError::MalformedPayload { reason: "header missing 'time'".into() }),
        };
        let msg_type = match dict.get("type") {
            Some(Value::Int(n)) => MessageType::from_byte(*n as u8)
                .ok_or_else(|| CodecError::MalformedPayload { reason: format!("unknown CDTP message type {n}") })?,
            _ => return Err(CodecError::MalformedPayload { reason: "header missing 'type'".into() }),
        };
        let sequence = match dict.get("seq") {
            Some(Value::Int(n)) => *n as u64,
            _ => return Err(CodecError::MalformedPayload { reason: "header missing 'seq'".into() }),
        };
        let tags = match dict.get("tags") {
            Some(Value::List(list)) => list_to_tags(list)?,
            _ => Dictionary::new(),
        };
        Ok(CdtpHeader { sender, time, msg_type, sequence, tags })
    }
}

fn expect_text(dict: &Dictionary, key: &str) -> CodecResult<String> {
    match dict.get(key) {
        Some(Value::Text(s)) => Ok(s.clone()),
        _ => Err(CodecError::MalformedPayload { reason: format!("header missing '{key}'") }),
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

/// A full CDTP message: header plus its raw payload frames. BOR and EOR
/// carry exactly one frame, which is itself an encoded `Dictionary`; DATA
/// carries whatever frames the sender built.
#[derive(Debug, Clone, PartialEq)]
pub struct CdtpMessage {
    pub header: CdtpHeader,
    pub frames: Vec<Vec<u8>>,
}

impl CdtpMessage {
    pub fn into_multipart(self) -> Vec<Vec<u8>> {
        let mut parts = Vec::with_capacity(1 + self.frames.len());
        parts.push(self.header.encode());
        parts.extend(self.frames);
        parts
    }

    pub fn from_multipart(mut parts: Vec<Vec<u8>>) -> CodecResult<Self> {
        if parts.is_empty() {
            return Err(CodecError::MalformedPayload { reason: "empty CDTP message".into() });
        }
        let header_bytes = parts.remove(0);
        let header = CdtpHeader::decode(&header_bytes)?;
        Ok(CdtpMessage { header, frames: parts })
    }

    /// Decodes a BOR/EOR's single payload frame as a `Dictionary`.
    pub fn decode_dictionary_payload(&self) -> CodecResult<Dictionary> {
        let frame = self.frames.first().ok_or_else(|| CodecError::MalformedPayload {
            reason: "BOR/EOR message has no payload frame".into(),
        })?;
        codec::decode_dictionary(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips() {
        let header = CdtpHeader::new("producer", MessageType::Data, 7);
        let bytes = header.encode();
        let decoded = CdtpHeader::decode(&bytes).unwrap();
        assert_eq!(decoded.sender, "producer");
        assert_eq!(decoded.msg_type, MessageType::Data);
        assert_eq!(decoded.sequence, 7);
    }

    #[test]
    fn wrong_protocol_is_rejected() {
        let mut dict = Dictionary::new();
        dict.insert("protocol", "CSCP1");
        dict.insert("sender", "x");
        dict.insert("time", Value::Time(Timestamp::now()));
        dict.insert("type", 0_i64);
        dict.insert("seq", 0_i64);
        let bytes = codec::encode_dictionary(&dict);
        assert!(CdtpHeader::decode(&bytes).is_err());
    }
}
