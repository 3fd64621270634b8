//! [`Configuration`]: a [`Dictionary`] plus per-key access tracking, typed
//! getters, and the path-resolution helpers satellites use to locate
//! companion files.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crate::dictionary::Dictionary;
use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    MissingKey { key: String },
    InvalidType { key: String, expected: &'static str },
    InvalidValue { key: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::MissingKey { key } => write!(f, "missing configuration key '{key}'"),
            ConfigError::InvalidType { key, expected } => {
                write!(f, "key '{key}' is not of expected type {expected}")
            }
            ConfigError::InvalidValue { key, reason } => {
                write!(f, "invalid value for key '{key}': {reason}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// A Dictionary plus a per-key "has this been read" marker.
///
/// The marker set is kept behind a `Mutex<Vec<String>>` rather than, say,
/// an `AtomicBool` per key, because keys are added to the dictionary after
/// construction and the marker set must grow with it; callers that only
/// ever read are the common case and the lock is uncontended.
pub struct Configuration {
    dict: Dictionary,
    used: Mutex<Vec<String>>,
    /// Fast low-contention check used by `is_used` without locking when the
    /// configuration has not been touched at all yet.
    touched: AtomicBool,
}

impl Clone for Configuration {
    fn clone(&self) -> Self {
        Configuration {
            dict: self.dict.clone(),
            used: Mutex::new(self.used.lock().unwrap().clone()),
            touched: AtomicBool::new(self.touched.load(Ordering::Relaxed)),
        }
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Configuration").field("dict", &self.dict).finish()
    }
}

impl Configuration {
    pub fn new(dict: Dictionary) -> Self {
        Configuration {
            dict,
            used: Mutex::new(Vec::new()),
            touched: AtomicBool::new(false),
        }
    }

    pub fn empty() -> Self {
        Self::new(Dictionary::new())
    }

    fn mark_used(&self, key: &str) {
        self.touched.store(true, Ordering::Relaxed);
        let mut used = self.used.lock().unwrap();
        if !used.iter().any(|k| k == key) {
            used.push(key.to_string());
        }
    }

    pub fn is_used(&self, key: &str) -> bool {
        if !self.touched.load(Ordering::Relaxed) {
            return false;
        }
        self.used.lock().unwrap().iter().any(|k| k == key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.dict.contains_key(key)
    }

    /// Counts how many of `keys` are present, for either/or validation.
    pub fn count(&self, keys: &[&str]) -> usize {
        keys.iter().filter(|k| self.dict.contains_key(k)).count()
    }

    fn get_raw(&self, key: &str) -> ConfigResult<&Value> {
        self.dict.get(key).ok_or_else(|| ConfigError::MissingKey { key: key.to_string() })
    }

    pub fn get_int(&self, key: &str) -> ConfigResult<i64> {
        let v = self.get_raw(key)?;
        let out = v.as_i64().ok_or(ConfigError::InvalidType { key: key.to_string(), expected: "int" })?;
        self.mark_used(key);
        Ok(out)
    }

    pub fn get_int_or(&self, key: &str, default: i64) -> i64 {
        self.get_int(key).unwrap_or(default)
    }

    pub fn get_float(&self, key: &str) -> ConfigResult<f64> {
        let v = self.get_raw(key)?;
        let out = v.as_f64().ok_or(ConfigError::InvalidType { key: key.to_string(), expected: "float" })?;
        self.mark_used(key);
        Ok(out)
    }

    pub fn get_bool(&self, key: &str) -> ConfigResult<bool> {
        let v = self.get_raw(key)?;
        let out = v.as_bool().ok_or(ConfigError::InvalidType { key: key.to_string(), expected: "bool" })?;
        self.mark_used(key);
        Ok(out)
    }

    pub fn get_str(&self, key: &str) -> ConfigResult<String> {
        let v = self.get_raw(key)?;
        let out = v
            .as_str()
            .map(str::to_string)
            .ok_or(ConfigError::InvalidType { key: key.to_string(), expected: "string" })?;
        self.mark_used(key);
        Ok(out)
    }

    pub fn get_str_or(&self, key: &str, default: &str) -> String {
        self.get_str(key).unwrap_or_else(|_| default.to_string())
    }

    /// Canonical textual rendering of a value, independent of its typed
    /// getter; used for CSCP `get_config` assembly and for logging.
    pub fn get_text(&self, key: &str) -> ConfigResult<String> {
        let v = self.get_raw(key)?;
        let out = v.to_string();
        self.mark_used(key);
        Ok(out)
    }

    pub fn get_int_array(&self, key: &str) -> ConfigResult<Vec<i64>> {
        let v = self.get_raw(key)?;
        let out = match v {
            Value::IntVec(items) => items.clone(),
            Value::None => Vec::new(),
            _ => return Err(ConfigError::InvalidType { key: key.to_string(), expected: "int[]" }),
        };
        self.mark_used(key);
        Ok(out)
    }

    pub fn get_str_array(&self, key: &str) -> ConfigResult<Vec<String>> {
        let v = self.get_raw(key)?;
        let out = match v {
            Value::TextVec(items) => items.clone(),
            Value::None => Vec::new(),
            _ => return Err(ConfigError::InvalidType { key: key.to_string(), expected: "string[]" }),
        };
        self.mark_used(key);
        Ok(out)
    }

    /// Resolves `key` as a filesystem path, relative paths taken against
    /// the current working directory. When `check_exists` is set the path
    /// is canonicalised and missing files are rejected.
    pub fn get_path(&self, key: &str, check_exists: bool) -> ConfigResult<PathBuf> {
        let raw = self.get_str(key)?;
        resolve_path(key, &raw, None, check_exists)
    }

    /// As [`Configuration::get_path`], but appends `extension` if the raw
    /// value has none.
    pub fn get_path_with_extension(&self, key: &str, extension: &str, check_exists: bool) -> ConfigResult<PathBuf> {
        let raw = self.get_str(key)?;
        resolve_path(key, &raw, Some(extension), check_exists)
    }

    pub fn get_path_array(&self, key: &str, check_exists: bool) -> ConfigResult<Vec<PathBuf>> {
        let raw = self.get_str_array(key)?;
        raw.iter()
            .map(|p| resolve_path(key, p, None, check_exists))
            .collect()
    }

    /// If `old` is present and `new` is absent, copies `old`'s value to
    /// `new` and marks `old` used; otherwise a no-op that never overwrites
    /// an existing `new`.
    pub fn set_alias(&mut self, new_key: &str, old_key: &str) {
        if self.dict.contains_key(new_key) {
            return;
        }
        if let Some(v) = self.dict.get(old_key).cloned() {
            self.dict.insert(new_key.to_string(), v);
            self.mark_used(old_key);
        }
    }

    /// `other` overwrites `self` on key collision.
    pub fn merge(&self, other: &Configuration) -> Configuration {
        Configuration::new(self.dict.merge(&other.dict))
    }

    /// The dictionary with keys starting with `_` excluded.
    pub fn get_all(&self) -> Dictionary {
        self.dict.visible()
    }

    /// The subset of the dictionary whose keys have been consulted via a
    /// typed getter, used for CSCP `get_config` and CDTP's BOR payload so
    /// neither leaks unconsulted configuration.
    pub fn get_used(&self) -> Dictionary {
        let used = self.used.lock().unwrap();
        let mut out = Dictionary::new();
        for key in self.dict.keys() {
            if used.iter().any(|u| u == key) {
                out.insert(key.clone(), self.dict.get(key).cloned().unwrap());
            }
        }
        out
    }

    pub fn get_unused_keys(&self) -> Vec<String> {
        let used = self.used.lock().unwrap();
        self.dict
            .keys()
            .filter(|k| !used.iter().any(|u| u == *k))
            .cloned()
            .collect()
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dict
    }
}

fn resolve_path(key: &str, raw: &str, extension: Option<&str>, check_exists: bool) -> ConfigResult<PathBuf> {
    let mut path = PathBuf::from(raw);
    if let Some(ext) = extension {
        if path.extension().is_none() {
            path.set_extension(ext.trim_start_matches('.'));
        }
    }
    let path = if path.is_absolute() {
        path
    } else {
        std::env::current_dir()
            .map_err(|e| ConfigError::InvalidValue { key: key.to_string(), reason: e.to_string() })?
            .join(path)
    };
    if check_exists {
        return Path::new(&path)
            .canonicalize()
            .map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                reason: format!("path '{}' does not exist", path.display()),
            });
    }
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(pairs: &[(&str, Value)]) -> Configuration {
        let mut dict = Dictionary::new();
        for (k, v) in pairs {
            dict.insert(*k, v.clone());
        }
        Configuration::new(dict)
    }

    #[test]
    fn typed_get_marks_key_used() {
        let cfg = config_with(&[("a", Value::Int(1)), ("b", Value::Int(2))]);
        assert!(cfg.get_unused_keys().contains(&"a".to_string()));
        cfg.get_int("a").unwrap();
        let unused = cfg.get_unused_keys();
        assert!(!unused.contains(&"a".to_string()));
        assert!(unused.contains(&"b".to_string()));
    }

    #[test]
    fn set_alias_does_not_overwrite_existing_new() {
        let mut cfg = config_with(&[("new", Value::Int(1)), ("old", Value::Int(2))]);
        cfg.set_alias("new", "old");
        assert_eq!(cfg.dictionary().get("new"), Some(&Value::Int(1)));
    }

    #[test]
    fn set_alias_noop_if_old_absent() {
        let mut cfg = config_with(&[]);
        cfg.set_alias("new", "old");
        assert!(!cfg.has("new"));
    }

    #[test]
    fn set_alias_copies_and_marks_old_used() {
        let mut cfg = config_with(&[("old", Value::Int(7))]);
        cfg.set_alias("new", "old");
        assert_eq!(cfg.dictionary().get("new"), Some(&Value::Int(7)));
        assert!(cfg.is_used("old"));
    }

    #[test]
    fn merge_other_overwrites() {
        let a = config_with(&[("x", Value::Int(1)), ("y", Value::Int(1))]);
        let b = config_with(&[("y", Value::Int(2))]);
        let merged = a.merge(&b);
        assert_eq!(merged.dictionary().get("x"), Some(&Value::Int(1)));
        assert_eq!(merged.dictionary().get("y"), Some(&Value::Int(2)));
    }

    #[test]
    fn get_all_excludes_internal_keys() {
        let cfg = config_with(&[("visible", Value::Int(1)), ("_hidden", Value::Int(2))]);
        let all = cfg.get_all();
        assert!(all.contains_key("visible"));
        assert!(!all.contains_key("_hidden"));
    }

    #[test]
    fn get_used_returns_only_consulted_keys() {
        let cfg = config_with(&[("a", Value::Int(1)), ("b", Value::Int(2)), ("_hidden", Value::Int(3))]);
        cfg.get_int("a").unwrap();
        let used = cfg.get_used();
        assert!(used.contains_key("a"));
        assert!(!used.contains_key("b"));
        assert!(!used.contains_key("_hidden"));
    }

    #[test]
    fn count_either_or_validation() {
        let cfg = config_with(&[("a", Value::Int(1))]);
        assert_eq!(cfg.count(&["a", "b"]), 1);
        assert_eq!(cfg.count(&["b", "c"]), 0);
    }

    #[test]
    fn get_path_relative_resolves_against_cwd() {
        let cfg = config_with(&[("p", Value::Text("relative/foo.cfg".into()))]);
        let resolved = cfg.get_path("p", false).unwrap();
        assert!(resolved.is_absolute());
    }

    #[test]
    fn get_path_check_exists_fails_on_missing_file() {
        let cfg = config_with(&[("p", Value::Text("/does/not/exist/anywhere.cfg".into()))]);
        let err = cfg.get_path("p", true).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn get_path_check_exists_succeeds_on_tempfile() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let cfg = config_with(&[("p", Value::Text(file.path().to_string_lossy().into_owned()))]);
        let resolved = cfg.get_path("p", true).unwrap();
        assert!(resolved.exists());
    }
}
