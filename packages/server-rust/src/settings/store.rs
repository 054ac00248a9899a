use std::collections::BTreeMap;

use parking_lot::RwLock;
use switchyard_core::SettingValue;

use crate::config::NeutralSettings;

/// The process-wide configuration the application reads from.
///
/// Bootstrappers are the only writers while a tenant context is active. Each
/// one touches only the keys inside its own subsystem slice.
#[derive(Debug, Default)]
pub struct ConfigStore {
    values: RwLock<BTreeMap<String, SettingValue>>,
}

impl ConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with the neutral values.
    #[must_use]
    pub fn from_neutral(neutral: &NeutralSettings) -> Self {
        let store = Self::new();
        for (key, value) in neutral.entries() {
            store.set(key, value);
        }
        store
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<SettingValue> {
        self.values.read().get(key).cloned()
    }

    /// Writes a value, returning the one it replaced.
    pub fn set(&self, key: &str, value: SettingValue) -> Option<SettingValue> {
        self.values.write().insert(key.to_string(), value)
    }

    pub fn remove(&self, key: &str) -> Option<SettingValue> {
        self.values.write().remove(key)
    }

    /// Writes `value` back, removing the key when it was previously absent.
    pub fn restore(&self, key: &str, value: Option<SettingValue>) {
        let mut values = self.values.write();
        match value {
            Some(v) => {
                values.insert(key.to_string(), v);
            }
            None => {
                values.remove(key);
            }
        }
    }

    /// Copy of every key and value.
    #[must_use]
    pub fn snapshot(&self) -> BTreeMap<String, SettingValue> {
        self.values.read().clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}
