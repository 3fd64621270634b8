//! The scalar [`Value`] tagged union shared by every wire protocol payload.
//!
//! Mirrors the variant set of the upstream `config::Value` class: a scalar
//! kind, a homogeneous vector of that scalar kind, or (since the codec must
//! be able to decode a heterogeneous array found inside a dictionary slot)
//! a nested [`crate::dictionary::List`].

use std::fmt;

/// Nanosecond-precision point on a monotonically-defined wall clock,
/// represented as nanoseconds since the Unix epoch.
///
/// A hand-rolled civil calendar conversion is used for [`Display`] rather
/// than pulling in a date/time crate, since nothing else in the dependency
/// stack needs one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn from_unix_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    pub fn as_unix_nanos(&self) -> i64 {
        self.0
    }

    pub fn now() -> Self {
        let dur = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(dur.as_nanos() as i64)
    }

    /// Splits into `(days since epoch, nanoseconds within the day)`, the days
    /// component always rounding toward negative infinity.
    fn days_and_nanos(&self) -> (i64, i64) {
        let secs = self.0.div_euclid(1_000_000_000);
        let nanos = self.0.rem_euclid(1_000_000_000);
        let days = secs.div_euclid(86_400);
        let secs_of_day = secs.rem_euclid(86_400);
        (days, secs_of_day * 1_000_000_000 + nanos)
    }

    /// Howard Hinnant's `civil_from_days` algorithm, converting a day count
    /// relative to the Unix epoch into a `(year, month, day)` civil date.
    fn civil_from_days(z: i64) -> (i64, u32, u32) {
        let z = z + 719_468;
        let era = if z >= 0 { z } else { z - 146_096 } / 146_097;
        let doe = (z - era * 146_097) as u64;
        let yoe = (doe - doe / 1460 + doe / 36524 - doe / 146096) / 365;
        let y = yoe as i64 + era * 400;
        let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
        let mp = (5 * doy + 2) / 153;
        let d = (doy - (153 * mp + 2) / 5 + 1) as u32;
        let m = if mp < 10 { mp + 3 } else { mp - 9 } as u32;
        let year = if m <= 2 { y + 1 } else { y };
        (year, m, d)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (days, nanos_of_day) = self.days_and_nanos();
        let (year, month, day) = Self::civil_from_days(days);
        let secs_of_day = nanos_of_day / 1_000_000_000;
        let sub_nanos = nanos_of_day % 1_000_000_000;
        let h = secs_of_day / 3600;
        let m = (secs_of_day % 3600) / 60;
        let s = secs_of_day % 60;
        write!(
            f,
            "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:09}",
            year, month, day, h, m, s, sub_nanos
        )
    }
}

/// A self-describing scalar or homogeneous-vector value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Bytes(Vec<u8>),
    Text(String),
    Time(Timestamp),
    BoolVec(Vec<bool>),
    IntVec(Vec<i64>),
    FloatVec(Vec<f64>),
    BytesVec(Vec<Vec<u8>>),
    TextVec(Vec<String>),
    TimeVec(Vec<Timestamp>),
    /// A heterogeneous sequence, produced when the codec finds an array
    /// whose elements are not all the same scalar kind.
    List(crate::dictionary::List),
}

/// The scalar kind tag of a [`Value`], independent of whether it is a
/// scalar or the corresponding vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    None,
    Bool,
    Int,
    Float,
    Bytes,
    Text,
    Time,
    List,
}

impl Value {
    pub fn kind(&self) -> Kind {
        match self {
            Value::None => Kind::None,
            Value::Bool(_) | Value::BoolVec(_) => Kind::Bool,
            Value::Int(_) | Value::IntVec(_) => Kind::Int,
            Value::Float(_) | Value::FloatVec(_) => Kind::Float,
            Value::Bytes(_) | Value::BytesVec(_) => Kind::Bytes,
            Value::Text(_) | Value::TextVec(_) => Kind::Text,
            Value::Time(_) | Value::TimeVec(_) => Kind::Time,
            Value::List(_) => Kind::List,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b.as_slice()),
            _ => None,
        }
    }

    pub fn as_time(&self) -> Option<Timestamp> {
        match self {
            Value::Time(t) => Some(*t),
            _ => None,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}
impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}
impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}
impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}
impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}
impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}
impl From<Timestamp> for Value {
    fn from(v: Timestamp) -> Self {
        Value::Time(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fn list_body<T>(f: &mut fmt::Formatter<'_>, items: &[T], render: impl Fn(&T) -> String) -> fmt::Result {
            write!(f, "[")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", render(item))?;
            }
            write!(f, "]")
        }

        match self {
            Value::None => write!(f, "NIL"),
            Value::Bool(b) => write!(f, "{}", if *b { "true" } else { "false" }),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bytes(b) => write!(f, "{}", hex_string(b)),
            Value::Text(s) => write!(f, "{s}"),
            Value::Time(t) => write!(f, "{t}"),
            Value::BoolVec(v) => list_body(f, v, |b| (if *b { "true" } else { "false" }).to_string()),
            Value::IntVec(v) => list_body(f, v, |x| x.to_string()),
            Value::FloatVec(v) => list_body(f, v, |x| x.to_string()),
            Value::BytesVec(v) => list_body(f, v, |x| hex_string(x)),
            Value::TextVec(v) => list_body(f, v, |x| x.clone()),
            Value::TimeVec(v) => list_body(f, v, |x| x.to_string()),
            Value::List(l) => write!(f, "{l}"),
        }
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        out.push_str(&format!("{b:02x}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_canonical_forms() {
        assert_eq!(Value::None.to_string(), "NIL");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::Int(-7).to_string(), "-7");
        assert_eq!(Value::IntVec(vec![1, 2, 3]).to_string(), "[1, 2, 3]");
    }

    #[test]
    fn timestamp_renders_canonical_utc() {
        // 2024-01-02T03:04:05.000000006Z
        let nanos = 1_704_165_845_000_000_006_i64;
        let ts = Timestamp::from_unix_nanos(nanos);
        assert_eq!(ts.to_string(), "2024-01-02 03:04:05.000000006");
    }

    #[test]
    fn timestamp_epoch_is_midnight() {
        let ts = Timestamp::from_unix_nanos(0);
        assert_eq!(ts.to_string(), "1970-01-01 00:00:00.000000000");
    }

    #[test]
    fn kind_groups_scalar_and_vector() {
        assert_eq!(Value::Int(1).kind(), Kind::Int);
        assert_eq!(Value::IntVec(vec![1]).kind(), Kind::Int);
    }
}
