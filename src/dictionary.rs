//! [`Dictionary`] (ordered, unique-key string map) and [`List`] (ordered,
//! heterogeneous sequence): the two payload container types every protocol
//! frame above the raw byte level is expressed in.

use std::fmt;

use crate::value::Value;

/// An insertion-ordered mapping from text keys to [`Value`]s with enforced
/// key uniqueness. Re-inserting an existing key replaces its value in place,
/// preserving the original position.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dictionary {
    entries: Vec<(String, Value)>,
}

impl Dictionary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Inserts or replaces `key`, preserving its original position on
    /// replacement and appending on insertion.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        let idx = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(idx).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.entries.iter().map(|(k, _)| k)
    }

    /// All entries whose key does not start with `_`.
    pub fn visible(&self) -> Dictionary {
        Dictionary {
            entries: self
                .entries
                .iter()
                .filter(|(k, _)| !k.starts_with('_'))
                .cloned()
                .collect(),
        }
    }

    /// `other` overwrites `self` on key collision; keys unique to `self`
    /// are retained as-is.
    pub fn merge(&self, other: &Dictionary) -> Dictionary {
        let mut out = self.clone();
        for (k, v) in other.iter() {
            out.insert(k.clone(), v.clone());
        }
        out
    }
}

impl FromIterator<(String, Value)> for Dictionary {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut dict = Dictionary::new();
        for (k, v) in iter {
            dict.insert(k, v);
        }
        dict
    }
}

impl fmt::Display for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (k, v)) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{k}: {v}")?;
        }
        write!(f, "}}")
    }
}

/// An ordered, heterogeneous sequence of [`Value`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct List(pub Vec<Value>);

impl List {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.0.push(value.into());
    }

    pub fn iter(&self) -> impl Iterator<Item = &Value> {
        self.0.iter()
    }

    pub fn get(&self, idx: usize) -> Option<&Value> {
        self.0.get(idx)
    }
}

impl From<Vec<Value>> for List {
    fn from(v: Vec<Value>) -> Self {
        List(v)
    }
}

impl fmt::Display for List {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{v}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertion_order_preserved_on_replace() {
        let mut d = Dictionary::new();
        d.insert("a", 1_i64);
        d.insert("b", 2_i64);
        d.insert("a", 9_i64);
        let keys: Vec<_> = d.keys().cloned().collect();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(d.get("a"), Some(&Value::Int(9)));
    }

    #[test]
    fn visible_excludes_underscore_keys() {
        let mut d = Dictionary::new();
        d.insert("normal", 1_i64);
        d.insert("_internal", 2_i64);
        let v = d.visible();
        assert_eq!(v.len(), 1);
        assert!(v.contains_key("normal"));
    }

    #[test]
    fn merge_prefers_other() {
        let mut a = Dictionary::new();
        a.insert("x", 1_i64);
        a.insert("y", 1_i64);
        let mut b = Dictionary::new();
        b.insert("y", 2_i64);
        let merged = a.merge(&b);
        assert_eq!(merged.get("x"), Some(&Value::Int(1)));
        assert_eq!(merged.get("y"), Some(&Value::Int(2)));
    }
}
