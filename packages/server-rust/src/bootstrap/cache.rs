use async_trait::async_trait;
use switchyard_core::{keys, ScopedSettings, Subsystem, TenantId};

use super::{BootstrapContext, Bootstrapper, ScopedSlice};
use crate::config::CacheScopeConfig;
use crate::error::{ApplyError, ApplyFailure, RevertError};

/// Scopes the key-value cache by key prefix.
#[derive(Debug)]
pub struct CacheBootstrapper {
    slice: ScopedSlice,
    prefix_pattern: String,
}

impl CacheBootstrapper {
    pub const KEYS: &'static [&'static str] = &[keys::CACHE_PREFIX];

    #[must_use]
    pub fn new(ctx: BootstrapContext, config: &CacheScopeConfig) -> Self {
        Self {
            slice: ScopedSlice::new(Subsystem::Cache, Self::KEYS, ctx),
            prefix_pattern: config.prefix_pattern.clone(),
        }
    }
}

#[async_trait]
impl Bootstrapper for CacheBootstrapper {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Cache
    }

    fn owned_keys(&self) -> &'static [&'static str] {
        Self::KEYS
    }

    fn scope(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyFailure> {
        Ok(ScopedSettings::new().with(keys::CACHE_PREFIX, tenant.substitute(&self.prefix_pattern)))
    }

    async fn apply(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyError> {
        self.slice.apply(tenant, self.scope(tenant), true).await
    }

    async fn revert(&self) -> Result<(), RevertError> {
        self.slice.revert().await
    }
}
