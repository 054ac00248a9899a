//! Configuration types for the tenant context switcher.

use std::path::PathBuf;
use std::time::Duration;

use switchyard_core::settings::{keys, SettingValue};
use switchyard_core::tenant::TENANT_PLACEHOLDER;

use crate::error::ConfigError;

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct SwitchyardConfig {
    /// Values seeded into the live configuration at startup.
    pub neutral: NeutralSettings,
    pub cache: CacheScopeConfig,
    pub session: SessionScopeConfig,
    pub filesystem: FilesystemScopeConfig,
    pub store: StoreScopeConfig,
    pub queue: QueueScopeConfig,
    pub pool: PoolConfig,
    pub guard: GuardConfig,
    pub resolver: ResolverConfig,
    /// Upper bound on a single bootstrapper's apply, including backend reconnects.
    pub apply_timeout: Duration,
}

impl Default for SwitchyardConfig {
    fn default() -> Self {
        Self {
            neutral: NeutralSettings::default(),
            cache: CacheScopeConfig::default(),
            session: SessionScopeConfig::default(),
            filesystem: FilesystemScopeConfig::default(),
            store: StoreScopeConfig::default(),
            queue: QueueScopeConfig::default(),
            pool: PoolConfig::default(),
            guard: GuardConfig::default(),
            resolver: ResolverConfig::default(),
            apply_timeout: Duration::from_secs(5),
        }
    }
}

impl SwitchyardConfig {
    /// Checks every invariant the bootstrappers rely on.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_placeholder("cache.prefix_pattern", &self.cache.prefix_pattern)?;
        require_placeholder("session.cookie_suffix_pattern", &self.session.cookie_suffix_pattern)?;
        require_placeholder("store.prefix_pattern", &self.store.prefix_pattern)?;
        require_placeholder("queue.name_pattern", &self.queue.name_pattern)?;

        if self.store.pool_size == 0 {
            return Err(ConfigError::ZeroPoolSize);
        }
        if self
            .store
            .base_offset
            .checked_add(i64::from(self.store.pool_size))
            .is_none()
        {
            return Err(ConfigError::IndexOverflow {
                base_offset: self.store.base_offset,
                pool_size: self.store.pool_size,
            });
        }
        if self.guard.tenant_alias.is_empty() {
            return Err(ConfigError::EmptyTenantAlias);
        }
        if self.guard.tenant_alias == self.guard.default_alias {
            return Err(ConfigError::AliasCollision(self.guard.tenant_alias.clone()));
        }
        if self.apply_timeout.is_zero() {
            return Err(ConfigError::ZeroApplyTimeout);
        }
        Ok(())
    }
}

fn require_placeholder(field: &'static str, pattern: &str) -> Result<(), ConfigError> {
    if pattern.contains(TENANT_PLACEHOLDER) {
        Ok(())
    } else {
        Err(ConfigError::MissingPlaceholder {
            field,
            pattern: pattern.to_string(),
        })
    }
}

/// Configuration in effect when no tenant context is active.
#[derive(Debug, Clone)]
pub struct NeutralSettings {
    pub cache_prefix: String,
    pub session_connection: String,
    pub session_cookie: String,
    pub filesystem_root: PathBuf,
    pub store_database: i64,
    pub store_prefix: String,
    pub queue_name: String,
}

impl Default for NeutralSettings {
    fn default() -> Self {
        Self {
            cache_prefix: "app_cache_".to_string(),
            session_connection: "default".to_string(),
            session_cookie: "app_session".to_string(),
            filesystem_root: PathBuf::from("storage"),
            store_database: 0,
            store_prefix: "app_database_".to_string(),
            queue_name: "default".to_string(),
        }
    }
}

impl NeutralSettings {
    /// Key/value pairs used to seed the live configuration store.
    #[must_use]
    pub fn entries(&self) -> Vec<(&'static str, SettingValue)> {
        vec![
            (keys::CACHE_PREFIX, self.cache_prefix.clone().into()),
            (keys::SESSION_CONNECTION, self.session_connection.clone().into()),
            (keys::SESSION_COOKIE, self.session_cookie.clone().into()),
            (keys::FILESYSTEM_ROOT, self.filesystem_root.clone().into()),
            (keys::STORE_DATABASE, self.store_database.into()),
            (keys::STORE_PREFIX, self.store_prefix.clone().into()),
            (keys::QUEUE_NAME, self.queue_name.clone().into()),
        ]
    }
}

/// Cache key prefix scoping.
#[derive(Debug, Clone)]
pub struct CacheScopeConfig {
    /// Prefix with `{tenant}` substituted, e.g. `tenant_{tenant}_`.
    pub prefix_pattern: String,
}

impl Default for CacheScopeConfig {
    fn default() -> Self {
        Self {
            prefix_pattern: "tenant_{tenant}_".to_string(),
        }
    }
}

/// Session store scoping.
#[derive(Debug, Clone)]
pub struct SessionScopeConfig {
    /// Appended to the neutral cookie name, e.g. `_{tenant}`.
    pub cookie_suffix_pattern: String,
}

impl Default for SessionScopeConfig {
    fn default() -> Self {
        Self {
            cookie_suffix_pattern: "_{tenant}".to_string(),
        }
    }
}

/// Object storage path scoping.
#[derive(Debug, Clone)]
pub struct FilesystemScopeConfig {
    /// Directory name prefix under the neutral root: `{root}/{suffix_base}{tenant}`.
    pub suffix_base: String,
    /// Create the tenant root on apply if it does not exist.
    pub create_roots: bool,
    /// Owner assigned to a newly created root, via the ownership sync.
    pub root_owner: Option<String>,
    /// Container a newly created root is linked into, via the ownership sync.
    pub root_container: Option<String>,
}

impl Default for FilesystemScopeConfig {
    fn default() -> Self {
        Self {
            suffix_base: "tenant".to_string(),
            create_roots: false,
            root_owner: None,
            root_container: None,
        }
    }
}

/// In-memory data store index and prefix scoping.
///
/// Tenants map onto `[base_offset, base_offset + pool_size)`. With the
/// defaults, index 0 stays neutral and tenants share indices 1..=15.
#[derive(Debug, Clone)]
pub struct StoreScopeConfig {
    pub base_offset: i64,
    /// Ceiling on distinct backend indices; collisions past it are accepted.
    pub pool_size: u32,
    pub prefix_pattern: String,
}

impl Default for StoreScopeConfig {
    fn default() -> Self {
        Self {
            base_offset: 1,
            pool_size: 15,
            prefix_pattern: "tenant_{tenant}_".to_string(),
        }
    }
}

/// Background queue name scoping.
#[derive(Debug, Clone)]
pub struct QueueScopeConfig {
    /// `{queue}` is the neutral queue name, `{tenant}` the tenant id.
    pub name_pattern: String,
}

impl Default for QueueScopeConfig {
    fn default() -> Self {
        Self {
            name_pattern: "{queue}-{tenant}".to_string(),
        }
    }
}

/// Client handle pool settings.
#[derive(Debug, Clone, Default)]
pub struct PoolConfig {
    /// Keep physical connections open when handles are invalidated.
    ///
    /// This is the persistent-connection misconfiguration: tenant-scoped
    /// connections outlive their context and the guard has to purge them.
    pub persistent: bool,
}

/// Connection lifecycle guard settings.
#[derive(Debug, Clone)]
pub struct GuardConfig {
    /// Alias carried by every connection opened under tenant-scoped settings.
    pub tenant_alias: String,
    /// Alias carried by connections opened under neutral settings.
    pub default_alias: String,
    /// Force-close tenant-alias connections still open after exit.
    pub purge_tenant_connections: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            tenant_alias: "tenant".to_string(),
            default_alias: "default".to_string(),
            purge_tenant_connections: true,
        }
    }
}

/// Tenant resolution settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Honor the query-parameter override. Development only.
    pub dev_override: bool,
    /// Query parameter carrying the override.
    pub override_param: String,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            dev_override: false,
            override_param: "tenant".to_string(),
        }
    }
}
