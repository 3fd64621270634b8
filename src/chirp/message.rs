//! CHIRP datagram wire format: `"CHIRP2"`, group name, host name, message
//! type byte, service identifier byte, port.

use std::fmt;

use super::service::ServiceIdentifier;
use super::{BUFFER_SIZE, PROTOCOL_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Request,
    Offer,
    Depart,
}

impl MessageType {
    fn to_byte(self) -> u8 {
        match self {
            MessageType::Request => 0x00,
            MessageType::Offer => 0x01,
            MessageType::Depart => 0x02,
        }
    }

    fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x00 => Some(MessageType::Request),
            0x01 => Some(MessageType::Offer),
            0x02 => Some(MessageType::Depart),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChirpMessage {
    pub group_name: String,
    pub host_name: String,
    pub msg_type: MessageType,
    pub service_id: ServiceIdentifier,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChirpDecodeError {
    TooShort,
    InvalidProtocolTag,
    InvalidMessageType(u8),
    InvalidServiceIdentifier(u8),
    InvalidUtf8,
    Truncated,
}

impl fmt::Display for ChirpDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChirpDecodeError::TooShort => write!(f, "datagram too short"),
            ChirpDecodeError::InvalidProtocolTag => write!(f, "missing or wrong CHIRP2 protocol tag"),
            ChirpDecodeError::InvalidMessageType(b) => write!(f, "unknown message type byte 0x{b:02x}"),
            ChirpDecodeError::InvalidServiceIdentifier(b) => {
                write!(f, "unknown service identifier byte 0x{b:02x}")
            }
            ChirpDecodeError::InvalidUtf8 => write!(f, "non-utf8 string field"),
            ChirpDecodeError::Truncated => write!(f, "datagram truncated mid-field"),
        }
    }
}

impl std::error::Error for ChirpDecodeError {}

impl ChirpMessage {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(BUFFER_SIZE.min(64));
        write_str(&mut buf, PROTOCOL_ID);
        write_str(&mut buf, &self.group_name);
        write_str(&mut buf, &self.host_name);
        buf.push(self.msg_type.to_byte());
        buf.push(self.service_id.to_byte());
        buf.extend_from_slice(&self.port.to_le_bytes());
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ChirpDecodeError> {
        let mut offset = 0usize;
        let protocol = read_str(bytes, &mut offset)?;
        if protocol != PROTOCOL_ID {
            return Err(ChirpDecodeError::InvalidProtocolTag);
        }
        let group_name = read_str(bytes, &mut offset)?;
        let host_name = read_str(bytes, &mut offset)?;
        let type_byte = *bytes.get(offset).ok_or(ChirpDecodeError::Truncated)?;
        offset += 1;
        let msg_type = MessageType::from_byte(type_byte).ok_or(ChirpDecodeError::InvalidMessageType(type_byte))?;
        let service_byte = *bytes.get(offset).ok_or(ChirpDecodeError::Truncated)?;
        offset += 1;
        let service_id =
            ServiceIdentifier::from_byte(service_byte).ok_or(ChirpDecodeError::InvalidServiceIdentifier(service_byte))?;
        let port_bytes = bytes.get(offset..offset + 2).ok_or(ChirpDecodeError::Truncated)?;
        let port = u16::from_le_bytes([port_bytes[0], port_bytes[1]]);
        Ok(ChirpMessage {
            group_name,
            host_name,
            msg_type,
            service_id,
            port,
        })
    }
}

fn write_str(buf: &mut Vec<u8>, s: &str) {
    buf.push(s.len() as u8);
    buf.extend_from_slice(s.as_bytes());
}

fn read_str(bytes: &[u8], offset: &mut usize) -> Result<String, ChirpDecodeError> {
    let len = *bytes.get(*offset).ok_or(ChirpDecodeError::TooShort)? as usize;
    *offset += 1;
    let slice = bytes.get(*offset..*offset + len).ok_or(ChirpDecodeError::Truncated)?;
    *offset += len;
    String::from_utf8(slice.to_vec()).map_err(|_| ChirpDecodeError::InvalidUtf8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrips_a_request() {
        let msg = ChirpMessage {
            group_name: "test".into(),
            host_name: "satA".into(),
            msg_type: MessageType::Request,
            service_id: ServiceIdentifier::Any,
            port: 0,
        };
        let encoded = msg.encode();
        assert!(encoded.len() <= BUFFER_SIZE);
        let decoded = ChirpMessage::decode(&encoded).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn rejects_wrong_protocol_tag() {
        let mut buf = Vec::new();
        write_str(&mut buf, "NOPE!!");
        write_str(&mut buf, "g");
        write_str(&mut buf, "h");
        buf.push(0);
        buf.push(0);
        buf.extend_from_slice(&0u16.to_le_bytes());
        assert_eq!(ChirpMessage::decode(&buf), Err(ChirpDecodeError::InvalidProtocolTag));
    }

    #[test]
    fn rejects_truncated_datagram() {
        assert_eq!(ChirpMessage::decode(&[]), Err(ChirpDecodeError::TooShort));
    }
}
