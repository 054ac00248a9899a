use std::fmt;

use serde::{Deserialize, Serialize};

/// A shared subsystem whose configuration is scoped per tenant.
///
/// Declaration order is the documented bootstrap order: later subsystems may
/// assume earlier ones are already tenant-scoped when they share a backend.
/// Exit runs in the reverse order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    /// Key-value cache (key prefix).
    Cache,
    /// Session store (connection alias, cookie name).
    Session,
    /// Object storage paths (storage root).
    Filesystem,
    /// In-memory data store (database index, key prefix).
    Store,
    /// Background job queues (queue name).
    Queue,
}

impl Subsystem {
    /// Every subsystem in bootstrap order.
    pub const ALL: [Subsystem; 5] = [
        Subsystem::Cache,
        Subsystem::Session,
        Subsystem::Filesystem,
        Subsystem::Store,
        Subsystem::Queue,
    ];

    /// Stable lowercase name, also the prefix of every setting key this
    /// subsystem owns (`cache.prefix`, `store.database`, ...).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Subsystem::Cache => "cache",
            Subsystem::Session => "session",
            Subsystem::Filesystem => "filesystem",
            Subsystem::Store => "store",
            Subsystem::Queue => "queue",
        }
    }

    /// Returns `true` if `key` lies inside this subsystem's configuration slice.
    #[must_use]
    pub fn owns_key(self, key: &str) -> bool {
        key.strip_prefix(self.as_str())
            .is_some_and(|rest| rest.starts_with('.'))
    }
}

impl fmt::Display for Subsystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_in_bootstrap_order() {
        let mut sorted = Subsystem::ALL;
        sorted.sort();
        assert_eq!(sorted, Subsystem::ALL);
        assert_eq!(Subsystem::ALL[0], Subsystem::Cache);
        assert_eq!(Subsystem::ALL[4], Subsystem::Queue);
    }

    #[test]
    fn owns_key_requires_dot_boundary() {
        assert!(Subsystem::Store.owns_key("store.database"));
        assert!(!Subsystem::Store.owns_key("storefront.database"));
        assert!(!Subsystem::Store.owns_key("cache.prefix"));
        assert!(!Subsystem::Store.owns_key("store"));
    }

    #[test]
    fn serde_uses_snake_case() {
        let json = serde_json::to_string(&Subsystem::Filesystem).unwrap();
        assert_eq!(json, "\"filesystem\"");
    }
}
