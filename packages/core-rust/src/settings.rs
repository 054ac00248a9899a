//! Configuration values that bootstrappers read, scope and restore.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Well-known setting keys, grouped by owning subsystem.
pub mod keys {
    pub const CACHE_PREFIX: &str = "cache.prefix";

    pub const SESSION_CONNECTION: &str = "session.connection";
    pub const SESSION_COOKIE: &str = "session.cookie";

    pub const FILESYSTEM_ROOT: &str = "filesystem.root";

    pub const STORE_DATABASE: &str = "store.database";
    pub const STORE_PREFIX: &str = "store.prefix";

    pub const QUEUE_NAME: &str = "queue.name";
}

/// A single configuration value.
///
/// Equality is structural, which is what the round-trip guarantee is
/// checked against: after revert every key compares equal to its
/// pre-apply value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum SettingValue {
    Text(String),
    Integer(i64),
    Flag(bool),
    Path(PathBuf),
}

impl SettingValue {
    /// Returns the text payload, if this is a `Text` value.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            SettingValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer payload, if this is an `Integer` value.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            SettingValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Returns the path payload, if this is a `Path` value.
    #[must_use]
    pub fn as_path(&self) -> Option<&std::path::Path> {
        match self {
            SettingValue::Path(p) => Some(p),
            _ => None,
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Text(s) => f.write_str(s),
            SettingValue::Integer(i) => write!(f, "{i}"),
            SettingValue::Flag(b) => write!(f, "{b}"),
            SettingValue::Path(p) => write!(f, "{}", p.display()),
        }
    }
}

impl From<&str> for SettingValue {
    fn from(s: &str) -> Self {
        SettingValue::Text(s.to_string())
    }
}

impl From<String> for SettingValue {
    fn from(s: String) -> Self {
        SettingValue::Text(s)
    }
}

impl From<i64> for SettingValue {
    fn from(i: i64) -> Self {
        SettingValue::Integer(i)
    }
}

impl From<bool> for SettingValue {
    fn from(b: bool) -> Self {
        SettingValue::Flag(b)
    }
}

impl From<PathBuf> for SettingValue {
    fn from(p: PathBuf) -> Self {
        SettingValue::Path(p)
    }
}

/// The set of values one subsystem writes for one tenant.
///
/// Backed by a `BTreeMap` so iteration, serialization and therefore the
/// fingerprint are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopedSettings(BTreeMap<String, SettingValue>);

impl ScopedSettings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a value, builder style.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<SettingValue>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.0.get(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical JSON encoding, the input to connection-pool fingerprints.
    #[must_use]
    pub fn canonical_json(&self) -> String {
        // BTreeMap keys are strings and every value serializes, so this cannot fail.
        serde_json::to_string(&self.0).unwrap_or_default()
    }
}

impl fmt::Display for ScopedSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (k, v) in &self.0 {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{k}={v}")?;
        }
        Ok(())
    }
}

impl FromIterator<(String, SettingValue)> for ScopedSettings {
    fn from_iter<I: IntoIterator<Item = (String, SettingValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}
