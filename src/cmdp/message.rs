//! The CMDP1 wire message: a topic string plus a `(sender, time, tags)`
//! header and a payload.

use crate::codec::{self, CodecError, CodecResult};
use crate::dictionary::Dictionary;
use crate::value::{Timestamp, Value};

pub const PROTOCOL_ID: &str = "CMDP1";

#[derive(Debug, Clone, PartialEq)]
pub struct CmdpMessage {
    pub topic: String,
    pub sender: String,
    pub time: Timestamp,
    pub tags: Dictionary,
    pub payload: Value,
}

impl CmdpMessage {
    pub fn new(topic: impl Into<String>, sender: impl Into<String>, payload: impl Into<Value>) -> Self {
        CmdpMessage {
            topic: topic.into(),
            sender: sender.into(),
            time: Timestamp::now(),
            tags: Dictionary::new(),
            payload: payload.into(),
        }
    }

    pub fn with_tags(mut self, tags: Dictionary) -> Self {
        self.tags = tags;
        self
    }

    fn header_dictionary(&self) -> Dictionary {
        let mut dict = Dictionary::new();
        dict.insert("protocol", PROTOCOL_ID);
        dict.insert("sender", self.sender.clone());
        dict.insert("time", Value::Time(self.time));
        dict.insert("tags", Value::List(tags_to_list(&self.tags)));
        dict
    }

    /// `[topic, header, payload]`, matching the XPUB-SUB framing where the
    /// topic leads so a raw SUB socket could prefix-match on it alone.
    pub fn into_multipart(self) -> Vec<Vec<u8>> {
        vec![
            self.topic.clone().into_bytes(),
            codec::encode_dictionary(&self.header_dictionary()),
            codec::encode_value(&self.payload),
        ]
    }

    pub fn from_multipart(parts: Vec<Vec<u8>>) -> CodecResult<Self> {
        if parts.len() != 3 {
            return Err(CodecError::MalformedPayload { reason: format!("CMDP message has {} frames, expected 3", parts.len()) });
        }
        let topic = String::from_utf8(parts[0].clone())
            .map_err(|_| CodecError::MalformedPayload { reason: "CMDP topic is not valid utf-8".into() })?;
        let header = codec::decode_dictionary(&parts[1])?;
        let protocol = match header.get("protocol") {
            Some(Value::Text(s)) => s.clone(),
            _ => return Err(CodecError::MalformedPayload { reason: "CMDP header missing 'protocol'".into() }),
        };
        if protocol != PROTOCOL_ID {
            return Err(CodecError::MalformedPayload {
                reason: format!("expected protocol '{PROTOCOL_ID}', found '{protocol}'"),
            });
        }
        let sender = match header.get("sender") {
            Some(Value::Text(s)) => s.clone(),
            _ => return Err(CodecError::MalformedPayload { reason: "CMDP header missing 'sender'".into() }),
        };
        let time = match header.get("time") {
            Some(Value::Time(t)) => *t,
            _ => return Err(CodecError::MalformedPayload { reason: "CMDP header missing 'time'".into() }),
        };
        let tags = match header.get("tags") {
            Some(Value::List(list)) => list_to_tags(list)?,
            _ => Dictionary::new(),
        };
        let payload = codec::decode_value(&parts[2])?;
        Ok(CmdpMessage { topic, sender, time, tags, payload })
    }

    /// `"LOG"` or `"STAT"`.
    pub fn kind(&self) -> &str {
        self.topic.split('/').next().unwrap_or("")
    }
}

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

/// Builds the `LOG/<LEVEL>[/<LOGGER_UC>]` topic for a log record.
pub fn log_topic(level: crate::level::Level, logger: Option<&str>) -> String {
    match logger {
        Some(name) if !name.is_empty() => format!("LOG/{}/{}", level.name(), name.to_ascii_uppercase()),
        _ => format!("LOG/{}", level.name()),
    }
}

/// Builds the `STAT/<NAME>` topic for a metric.
pub fn stat_topic(name: &str) -> String {
    format!("STAT/{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_message_roundtrips() {
        let msg = CmdpMessage::new(log_topic(crate::level::Level::Info, Some("fsm")), "sat1", "hello");
        let parts = msg.clone().into_multipart();
        let decoded = CmdpMessage::from_multipart(parts).unwrap();
        assert_eq!(decoded.topic, "LOG/INFO/FSM");
        assert_eq!(decoded.sender, "sat1");
        assert_eq!(decoded.payload, Value::Text("hello".into()));
        assert_eq!(decoded.kind(), "LOG");
    }

    #[test]
    fn stat_topic_has_no_level() {
        assert_eq!(stat_topic("cpu_load"), "STAT/cpu_load");
    }
}
