use std::collections::BTreeMap;
use std::path::Path;

use crate::settings::{keys, ScopedSettings, SettingValue};
use crate::subsystem::Subsystem;
use crate::tenant::TenantId;

/// The tenant-scoped resources in effect for one request.
///
/// Returned by entering a tenant context and threaded explicitly through the
/// application code that needs tenant-isolated resources, so callers never
/// have to read process-wide configuration to learn which prefix, index or
/// path applies to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantResourceContext {
    /// Tenant this context is scoped to.
    pub tenant: TenantId,
    /// Unique identifier of this enter/exit cycle, for log correlation.
    pub context_id: String,
    scoped: BTreeMap<Subsystem, ScopedSettings>,
}

impl TenantResourceContext {
    #[must_use]
    pub fn new(tenant: TenantId, context_id: impl Into<String>) -> Self {
        Self {
            tenant,
            context_id: context_id.into(),
            scoped: BTreeMap::new(),
        }
    }

    /// Records the settings one subsystem applied.
    pub fn insert(&mut self, subsystem: Subsystem, settings: ScopedSettings) {
        self.scoped.insert(subsystem, settings);
    }

    /// Settings applied by `subsystem`, if it took part in this context.
    #[must_use]
    pub fn settings(&self, subsystem: Subsystem) -> Option<&ScopedSettings> {
        self.scoped.get(&subsystem)
    }

    /// Subsystems scoped in this context, in bootstrap order.
    pub fn subsystems(&self) -> impl Iterator<Item = Subsystem> + '_ {
        self.scoped.keys().copied()
    }

    fn value(&self, subsystem: Subsystem, key: &str) -> Option<&SettingValue> {
        self.scoped.get(&subsystem).and_then(|s| s.get(key))
    }

    #[must_use]
    pub fn cache_prefix(&self) -> Option<&str> {
        self.value(Subsystem::Cache, keys::CACHE_PREFIX)
            .and_then(SettingValue::as_text)
    }

    #[must_use]
    pub fn session_cookie(&self) -> Option<&str> {
        self.value(Subsystem::Session, keys::SESSION_COOKIE)
            .and_then(SettingValue::as_text)
    }

    #[must_use]
    pub fn storage_root(&self) -> Option<&Path> {
        self.value(Subsystem::Filesystem, keys::FILESYSTEM_ROOT)
            .and_then(SettingValue::as_path)
    }

    #[must_use]
    pub fn store_index(&self) -> Option<i64> {
        self.value(Subsystem::Store, keys::STORE_DATABASE)
            .and_then(SettingValue::as_integer)
    }

    #[must_use]
    pub fn store_prefix(&self) -> Option<&str> {
        self.value(Subsystem::Store, keys::STORE_PREFIX)
            .and_then(SettingValue::as_text)
    }

    #[must_use]
    pub fn queue_name(&self) -> Option<&str> {
        self.value(Subsystem::Queue, keys::QUEUE_NAME)
            .and_then(SettingValue::as_text)
    }
}
