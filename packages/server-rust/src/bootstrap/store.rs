//! In-memory data store bootstrapper.
//!
//! Selects the backend index with [`scoped_index`] and scopes the key
//! prefix. Two tenants can land on the same index once there are more
//! tenants than `pool_size`; the per-tenant prefix still separates their
//! keys, so a collision only weakens isolation of whole-index operations such as flush.

use async_trait::async_trait;
use switchyard_core::hash::scoped_index;
use switchyard_core::{keys, ScopedSettings, Subsystem, TenantId};

use super::{BootstrapContext, Bootstrapper, ScopedSlice};
use crate::config::StoreScopeConfig;
use crate::error::{ApplyError, ApplyFailure, RevertError};

#[derive(Debug)]
pub struct StoreBootstrapper {
    slice: ScopedSlice,
    base_offset: i64,
    pool_size: u32,
    prefix_pattern: String,
}

impl StoreBootstrapper {
    pub const KEYS: &'static [&'static str] = &[keys::STORE_DATABASE, keys::STORE_PREFIX];

    #[must_use]
    pub fn new(ctx: BootstrapContext, config: &StoreScopeConfig) -> Self {
        Self {
            slice: ScopedSlice::new(Subsystem::Store, Self::KEYS, ctx),
            base_offset: config.base_offset,
            pool_size: config.pool_size,
            prefix_pattern: config.prefix_pattern.clone(),
        }
    }
}

#[async_trait]
impl Bootstrapper for StoreBootstrapper {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Store
    }

    fn owned_keys(&self) -> &'static [&'static str] {
        Self::KEYS
    }

    fn scope(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyFailure> {
        let index = scoped_index(tenant, self.base_offset, self.pool_size).ok_or_else(|| {
            ApplyFailure::InvalidScopedValue {
                key: keys::STORE_DATABASE,
                detail: format!(
                    "no index for base_offset {} and pool_size {}",
                    self.base_offset, self.pool_size
                ),
            }
        })?;
        Ok(ScopedSettings::new()
            .with(keys::STORE_DATABASE, index)
            .with(keys::STORE_PREFIX, tenant.substitute(&self.prefix_pattern)))
    }

    async fn apply(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyError> {
        self.slice.apply(tenant, self.scope(tenant), true).await
    }

    async fn revert(&self) -> Result<(), RevertError> {
        self.slice.revert().await
    }
}
