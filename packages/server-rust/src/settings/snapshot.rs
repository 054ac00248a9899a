use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use switchyard_core::SettingValue;

use super::store::ConfigStore;

/// Write-once record of the neutral value of each key.
///
/// A key is captured at most once for the lifetime of the process; later
/// captures are ignored, so a value written under a tenant can never replace
/// the neutral one. Absent keys are captured as `None`.
#[derive(Debug, Default)]
pub struct SnapshotStore {
    captured: DashMap<String, Option<SettingValue>>,
}

impl SnapshotStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records `read()` for `key` unless a value was already captured.
    ///
    /// Returns `true` if this call captured the key.
    pub fn capture_if_absent(
        &self,
        key: &str,
        read: impl FnOnce() -> Option<SettingValue>,
    ) -> bool {
        match self.captured.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(read());
                true
            }
        }
    }

    /// Captures every key in `keys` from `store`. Returns how many were new.
    pub fn capture_all<'a>(
        &self,
        store: &ConfigStore,
        keys: impl IntoIterator<Item = &'a str>,
    ) -> usize {
        keys.into_iter()
            .filter(|key| self.capture_if_absent(key, || store.get(key)))
            .count()
    }

    /// The neutral value of `key`.
    ///
    /// `None` means the key was never captured; `Some(None)` means it was
    /// captured while absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Option<SettingValue>> {
        self.captured.get(key).map(|entry| entry.value().clone())
    }

    #[must_use]
    pub fn is_captured(&self, key: &str) -> bool {
        self.captured.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.captured.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.captured.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_capture_wins() {
        let snapshot = SnapshotStore::new();
        assert!(snapshot.capture_if_absent("cache.prefix", || Some("app_".into())));
        assert!(!snapshot.capture_if_absent("cache.prefix", || Some("tenant_acme_".into())));
        assert_eq!(
            snapshot.get("cache.prefix"),
            Some(Some(SettingValue::from("app_")))
        );
    }

    #[test]
    fn absent_key_captured_as_none() {
        let snapshot = SnapshotStore::new();
        snapshot.capture_if_absent("queue.name", || None);
        assert!(snapshot.is_captured("queue.name"));
        assert_eq!(snapshot.get("queue.name"), Some(None));
        assert_eq!(snapshot.get("store.prefix"), None);
    }

    #[test]
    fn capture_all_counts_new_keys() {
        let store = ConfigStore::new();
        store.set("cache.prefix", "app_".into());
        let snapshot = SnapshotStore::new();

        assert_eq!(snapshot.capture_all(&store, ["cache.prefix", "queue.name"]), 2);
        store.set("cache.prefix", "tenant_acme_".into());
        assert_eq!(snapshot.capture_all(&store, ["cache.prefix"]), 0);
        assert_eq!(snapshot.len(), 2);
        assert_eq!(
            snapshot.get("cache.prefix"),
            Some(Some(SettingValue::from("app_")))
        );
    }
}
