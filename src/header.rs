//! The `(protocol, sender, time, tags)` header shared by CSCP, CDTP, and
//! CMDP frames (CHP carries its own flatter layout, see [`crate::chp`]).
//!
//! Mirrors `core/message/BaseHeader` across the four message headers: a
//! protocol identifier tag, the sending satellite's name, a timestamp, and
//! a free-form tag dictionary the core never interprets but round-trips
//! faithfully.

use crate::codec::{self, CodecError, CodecResult};
use crate::dictionary::Dictionary;
use crate::value::{Timestamp, Value};

/// A message header, generic over the protocol tag (`"CSCP1"`, `"CDTP1"`,
/// `"CMDP1"`).
#[derive(Debug, Clone, PartialEq)]
pub struct Header {
    pub protocol: String,
    pub sender: String,
    pub time: Timestamp,
    pub tags: Dictionary,
}

impl Header {
    pub fn new(protocol: impl Into<String>, sender: impl Into<String>) -> Self {
        Header {
            protocol: protocol.into(),
            sender: sender.into(),
            time: Timestamp::now(),
            tags: Dictionary::new(),
        }
    }

    pub fn with_tags(mut self, tags: Dictionary) -> Self {
        self.tags = tags;
        self
    }

    pub fn to_dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("protocol", self.protocol.clone());
        dict.insert("sender", self.sender.clone());
        dict.insert("time", Value::Time(self.time));
        dict.insert("tags", Value::List(tags_to_list(&self.tags)));
        dict
    }

    pub fn encode(&self) -> Vec<u8> {
        codec::encode_dictionary(&self.to_dictionary())
    }

    pub fn decode(bytes: &[u8]) -> CodecResult<Self> {
        let dict = codec::decode_dictionary(bytes)?;
        Self::from_dictionary(&dict)
    }

    pub fn from_dictionary(dict: &Dictionary) -> CodecResult<Self> {
        let protocol = expect_text(dict, "protocol")?;
        let sender = expect_text(dict, "sender")?;
        let time = match dict.get("time") {
            Some(Value::Time(t)) => *t,
            _ => {
                return Err(CodecError::MalformedPayload {
                    reason: "header missing 'time'".into(),
                })
            }
        };
        let tags = match dict.get("tags") {
            Some(Value::List(list)) => list_to_tags(list)?,
            Some(Value::None) | None => Dictionary::new(),
            _ => {
                return Err(CodecError::MalformedPayload {
                    reason: "header 'tags' is not a list".into(),
                })
            }
        };
        Ok(Header { protocol, sender, time, tags })
    }

    /// Rejects headers whose protocol tag is not `expected`.
    pub fn expect_protocol(&self, expected: &str) -> CodecResult<()> {
        if self.protocol != expected {
            return Err(CodecError::MalformedPayload {
                reason: format!("expected protocol '{expected}', found '{}'", self.protocol),
            });
        }
        Ok(())
    }
}

fn expect_text(dict: &Dictionary, key: &str) -> CodecResult<String> {
    match dict.get(key) {
        Some(Value::Text(s)) => Ok(s.clone()),
        _ => Err(CodecError::MalformedPayload {
            reason: format!("header missing '{key}'"),
        }),
    }
}

/// Tag dictionaries round-trip as a flat `[key, value, key, value, ...]`
/// list so the header itself stays a single homogeneous-free `Dictionary`.
fn tags_to_list(tags: &Dictionary) -> crate::dictionary::List {
    let mut items = Vec::with_capacity(tags.len() * 2);
    for (k, v) in tags.iter() {
        items.push(Value::Text(k.clone()));
        items.push(v.clone());
    }
    crate::dictionary::List(items)
}

fn list_to_tags(list: &crate::dictionary::List) -> CodecResult<Dictionary> {
    let mut dict = Dictionary::new();
    let items: Vec<&Value> = list.iter().collect();
    if items.len() % 2 != 0 {
        return Err(CodecError::MalformedPayload {
            reason: "tag list has an odd number of entries".into(),
        });
    }
    for pair in items.chunks(2) {
        let key = match pair[0] {
            Value::Text(s) => s.clone(),
            _ => {
                return Err(CodecError::MalformedPayload {
                    reason: "tag key is not text".into(),
                })
            }
        };
        dict.insert(key, pair[1].clone());
    }
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_roundtrips_with_tags() {
        let mut tags = Dictionary::new();
        tags.insert("thread_id", 42_i64);
        let header = Header::new("CSCP1", "sat1").with_tags(tags);
        let encoded = header.encode();
        let decoded = Header::decode(&encoded).unwrap();
        assert_eq!(decoded.protocol, "CSCP1");
        assert_eq!(decoded.sender, "sat1");
        assert_eq!(decoded.tags.get("thread_id"), Some(&Value::Int(42)));
    }

    #[test]
    fn expect_protocol_rejects_mismatch() {
        let header = Header::new("CDTP1", "sat1");
        assert!(header.expect_protocol("CSCP1").is_err());
        assert!(header.expect_protocol("CDTP1").is_ok());
    }
}
