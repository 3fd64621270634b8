//! Self-describing binary codec for [`Value`], [`Dictionary`], and [`List`].
//!
//! The wire format is a small tag-byte scheme rather than an external
//! MessagePack dependency: every encoded item starts with a one-byte tag,
//! followed by a tag-specific body. Multi-byte integers are little-endian.
//! This mirrors the bounds-checked cursor style used elsewhere in the
//! codebase for wire encoding, generalised to a growable buffer on the
//! write side since payload sizes are not known up front.

use std::fmt;

use crate::dictionary::{Dictionary, List};
use crate::value::{Timestamp, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// A tag byte or structural field did not decode to a known shape.
    MalformedPayload { reason: String },
    /// A sequence was declared to be a homogeneous vector-of-T but its
    /// elements were not all of the same scalar kind.
    TypeMismatch { reason: String },
    /// Read cursor ran past the end of the buffer.
    UnexpectedEof { offset: usize },
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::MalformedPayload { reason } => write!(f, "malformed payload: {reason}"),
            CodecError::TypeMismatch { reason } => write!(f, "type mismatch: {reason}"),
            CodecError::UnexpectedEof { offset } => {
                write!(f, "unexpected end of buffer at offset {offset}")
            }
        }
    }
}

impl std::error::Error for CodecError {}

pub type CodecResult<T> = Result<T, CodecError>;

mod tag {
    pub const NONE: u8 = 0x00;
    pub const BOOL: u8 = 0x01;
    pub const INT: u8 = 0x02;
    pub const FLOAT: u8 = 0x03;
    pub const BYTES: u8 = 0x04;
    pub const TEXT: u8 = 0x05;
    pub const TIME: u8 = 0x06;
    pub const BOOL_VEC: u8 = 0x07;
    pub const INT_VEC: u8 = 0x08;
    pub const FLOAT_VEC: u8 = 0x09;
    pub const BYTES_VEC: u8 = 0x0A;
    pub const TEXT_VEC: u8 = 0x0B;
    pub const TIME_VEC: u8 = 0x0C;
    pub const LIST: u8 = 0x0D;
    pub const DICT: u8 = 0x0E;
}

/// Growable little-endian write buffer.
struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { buf: Vec::new() }
    }

    fn u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    fn u32(&mut self, v: u32) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn i64(&mut self, v: i64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    fn f64(&mut self, v: f64) {
        self.buf.extend_from_slice(&v.to_bits().to_le_bytes());
    }

    fn bytes(&mut self, v: &[u8]) {
        self.u32(v.len() as u32);
        self.buf.extend_from_slice(v);
    }

    fn text(&mut self, v: &str) {
        self.bytes(v.as_bytes());
    }
}

/// Bounds-checked read cursor over a borrowed byte slice.
struct Reader<'a> {
    buf: &'a [u8],
    offset: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf, offset: 0 }
    }

    fn u8(&mut self) -> CodecResult<u8> {
        let b = *self
            .buf
            .get(self.offset)
            .ok_or(CodecError::UnexpectedEof { offset: self.offset })?;
        self.offset += 1;
        Ok(b)
    }

    fn u32(&mut self) -> CodecResult<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn i64(&mut self) -> CodecResult<i64> {
        let bytes = self.take(8)?;
        Ok(i64::from_le_bytes(bytes.try_into().unwrap()))
    }

    fn f64(&mut self) -> CodecResult<f64> {
        let bytes = self.take(8)?;
        Ok(f64::from_bits(u64::from_le_bytes(bytes.try_into().unwrap())))
    }

    fn bytes(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn text(&mut self) -> CodecResult<String> {
        let bytes = self.bytes()?;
        String::from_utf8(bytes).map_err(|e| CodecError::MalformedPayload {
            reason: format!("invalid utf-8: {e}"),
        })
    }

    fn take(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        let end = self.offset + len;
        if end > self.buf.len() {
            return Err(CodecError::UnexpectedEof { offset: self.offset });
        }
        let slice = &self.buf[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn at_end(&self) -> bool {
        self.offset >= self.buf.len()
    }
}

/// Encodes a [`Value`] into its tagged binary representation.
///
/// Any vector variant (`BoolVec`, `IntVec`, ...) with zero elements encodes
/// to the `none` tag, per the "empty containers encode to none" rule.
pub fn encode_value(value: &Value) -> Vec<u8> {
    let mut w = Writer::new();
    write_value(&mut w, value);
    w.buf
}

fn write_value(w: &mut Writer, value: &Value) {
    match value {
        Value::None => w.u8(tag::NONE),
        Value::Bool(b) => {
            w.u8(tag::BOOL);
            w.u8(u8::from(*b));
        }
        Value::Int(v) => {
            w.u8(tag::INT);
            w.i64(*v);
        }
        Value::Float(v) => {
            w.u8(tag::FLOAT);
            w.f64(*v);
        }
        Value::Bytes(v) => {
            w.u8(tag::BYTES);
            w.bytes(v);
        }
        Value::Text(v) => {
            w.u8(tag::TEXT);
            w.text(v);
        }
        Value::Time(t) => {
            w.u8(tag::TIME);
            w.i64(t.as_unix_nanos());
        }
        Value::BoolVec(v) if v.is_empty() => w.u8(tag::NONE),
        Value::BoolVec(v) => {
            w.u8(tag::BOOL_VEC);
            w.u32(v.len() as u32);
            for b in v {
                w.u8(u8::from(*b));
            }
        }
        Value::IntVec(v) if v.is_empty() => w.u8(tag::NONE),
        Value::IntVec(v) => {
            w.u8(tag::INT_VEC);
            w.u32(v.len() as u32);
            for x in v {
                w.i64(*x);
            }
        }
        Value::FloatVec(v) if v.is_empty() => w.u8(tag::NONE),
        Value::FloatVec(v) => {
            w.u8(tag::FLOAT_VEC);
            w.u32(v.len() as u32);
            for x in v {
                w.f64(*x);
            }
        }
        Value::BytesVec(v) if v.is_empty() => w.u8(tag::NONE),
        Value::BytesVec(v) => {
            w.u8(tag::BYTES_VEC);
            w.u32(v.len() as u32);
            for x in v {
                w.bytes(x);
            }
        }
        Value::TextVec(v) if v.is_empty() => w.u8(tag::NONE),
        Value::TextVec(v) => {
            w.u8(tag::TEXT_VEC);
            w.u32(v.len() as u32);
            for x in v {
                w.text(x);
            }
        }
        Value::TimeVec(v) if v.is_empty() => w.u8(tag::NONE),
        Value::TimeVec(v) => {
            w.u8(tag::TIME_VEC);
            w.u32(v.len() as u32);
            for x in v {
                w.i64(x.as_unix_nanos());
            }
        }
        Value::List(l) => write_list(w, l),
    }
}

fn write_list(w: &mut Writer, list: &List) {
    w.u8(tag::LIST);
    w.u32(list.len() as u32);
    for item in list.iter() {
        write_value(w, item);
    }
}

fn write_dictionary(w: &mut Writer, dict: &Dictionary) {
    w.u8(tag::DICT);
    w.u32(dict.len() as u32);
    for (k, v) in dict.iter() {
        w.text(k);
        write_value(w, v);
    }
}

/// Decodes a single [`Value`] from the front of `bytes`, requiring the
/// entire buffer to be consumed.
pub fn decode_value(bytes: &[u8]) -> CodecResult<Value> {
    let mut r = Reader::new(bytes);
    let v = read_value(&mut r)?;
    if !r.at_end() {
        return Err(CodecError::MalformedPayload {
            reason: "trailing bytes after value".into(),
        });
    }
    Ok(v)
}

fn read_value(r: &mut Reader<'_>) -> CodecResult<Value> {
    let t = r.u8()?;
    match t {
        tag::NONE => Ok(Value::None),
        tag::BOOL => Ok(Value::Bool(r.u8()? != 0)),
        tag::INT => Ok(Value::Int(r.i64()?)),
        tag::FLOAT => Ok(Value::Float(r.f64()?)),
        tag::BYTES => Ok(Value::Bytes(r.bytes()?)),
        tag::TEXT => Ok(Value::Text(r.text()?)),
        tag::TIME => Ok(Value::Time(Timestamp::from_unix_nanos(r.i64()?))),
        tag::BOOL_VEC => {
            let n = r.u32()? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.u8()? != 0);
            }
            Ok(Value::BoolVec(v))
        }
        tag::INT_VEC => {
            let n = r.u32()? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.i64()?);
            }
            Ok(Value::IntVec(v))
        }
        tag::FLOAT_VEC => {
            let n = r.u32()? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.f64()?);
            }
            Ok(Value::FloatVec(v))
        }
        tag::BYTES_VEC => {
            let n = r.u32()? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.bytes()?);
            }
            Ok(Value::BytesVec(v))
        }
        tag::TEXT_VEC => {
            let n = r.u32()? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(r.text()?);
            }
            Ok(Value::TextVec(v))
        }
        tag::TIME_VEC => {
            let n = r.u32()? as usize;
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(Timestamp::from_unix_nanos(r.i64()?));
            }
            Ok(Value::TimeVec(v))
        }
        tag::LIST => Ok(Value::List(read_list(r)?)),
        other => Err(CodecError::MalformedPayload {
            reason: format!("unknown value tag 0x{other:02x}"),
        }),
    }
}

fn read_list(r: &mut Reader<'_>) -> CodecResult<List> {
    let n = r.u32()? as usize;
    let mut items = Vec::with_capacity(n);
    for _ in 0..n {
        items.push(read_value(r)?);
    }
    Ok(List(items))
}

fn read_dictionary(r: &mut Reader<'_>) -> CodecResult<Dictionary> {
    let n = r.u32()? as usize;
    let mut dict = Dictionary::new();
    for _ in 0..n {
        let key = r.text()?;
        let value = read_value(r)?;
        // Last-wins on duplicate keys (`Dictionary::insert` already does this).
        dict.insert(key, value);
    }
    Ok(dict)
}

pub fn encode_list(list: &List) -> Vec<u8> {
    let mut w = Writer::new();
    write_list(&mut w, list);
    w.buf
}

pub fn decode_list(bytes: &[u8]) -> CodecResult<List> {
    let mut r = Reader::new(bytes);
    let t = r.u8()?;
    if t != tag::LIST {
        return Err(CodecError::MalformedPayload {
            reason: format!("expected list tag, found 0x{t:02x}"),
        });
    }
    let list = read_list(&mut r)?;
    if !r.at_end() {
        return Err(CodecError::MalformedPayload {
            reason: "trailing bytes after list".into(),
        });
    }
    Ok(list)
}

pub fn encode_dictionary(dict: &Dictionary) -> Vec<u8> {
    let mut w = Writer::new();
    write_dictionary(&mut w, dict);
    w.buf
}

pub fn decode_dictionary(bytes: &[u8]) -> CodecResult<Dictionary> {
    let mut r = Reader::new(bytes);
    let t = r.u8()?;
    if t != tag::DICT {
        return Err(CodecError::MalformedPayload {
            reason: format!("expected dictionary tag, found 0x{t:02x}"),
        });
    }
    let dict = read_dictionary(&mut r)?;
    if !r.at_end() {
        return Err(CodecError::MalformedPayload {
            reason: "trailing bytes after dictionary".into(),
        });
    }
    Ok(dict)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(v: Value) {
        let encoded = encode_value(&v);
        let decoded = decode_value(&encoded).expect("decode");
        assert_eq!(decoded, v);
    }

    #[test]
    fn scalars_roundtrip() {
        roundtrip(Value::None);
        roundtrip(Value::Bool(true));
        roundtrip(Value::Bool(false));
        roundtrip(Value::Int(-42));
        roundtrip(Value::Float(3.5));
        roundtrip(Value::Bytes(vec![1, 2, 3]));
        roundtrip(Value::Text("hello".into()));
        roundtrip(Value::Time(Timestamp::from_unix_nanos(123_456_789)));
    }

    #[test]
    fn vectors_roundtrip() {
        roundtrip(Value::IntVec(vec![1, 2, 3]));
        roundtrip(Value::TextVec(vec!["a".into(), "b".into()]));
        roundtrip(Value::BoolVec(vec![true, false, true]));
    }

    #[test]
    fn empty_vector_encodes_to_none() {
        let encoded = encode_value(&Value::IntVec(vec![]));
        assert_eq!(decode_value(&encoded).unwrap(), Value::None);
    }

    #[test]
    fn heterogeneous_sequence_is_a_list() {
        let list = List(vec![Value::Int(1), Value::Text("x".into())]);
        let encoded = encode_list(&list);
        let decoded = decode_list(&encoded).unwrap();
        assert_eq!(decoded, list);
    }

    #[test]
    fn dictionary_roundtrip_preserves_order() {
        let mut dict = Dictionary::new();
        dict.insert("z", 1_i64);
        dict.insert("a", "text");
        let encoded = encode_dictionary(&dict);
        let decoded = decode_dictionary(&encoded).unwrap();
        let keys: Vec<_> = decoded.keys().cloned().collect();
        assert_eq!(keys, vec!["z".to_string(), "a".to_string()]);
    }

    #[test]
    fn duplicate_keys_last_wins() {
        let mut w = Writer::new();
        w.u8(tag::DICT);
        w.u32(2);
        w.text("k");
        write_value(&mut w, &Value::Int(1));
        w.text("k");
        write_value(&mut w, &Value::Int(2));
        let decoded = decode_dictionary(&w.buf).unwrap();
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("k"), Some(&Value::Int(2)));
    }

    #[test]
    fn truncated_buffer_is_malformed() {
        let err = decode_value(&[tag::INT, 0, 0]).unwrap_err();
        assert!(matches!(err, CodecError::UnexpectedEof { .. }));
    }
}
