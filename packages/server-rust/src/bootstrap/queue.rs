use async_trait::async_trait;
use switchyard_core::{keys, ScopedSettings, Subsystem, TenantId};

use super::{neutral_text, BootstrapContext, Bootstrapper, ScopedSlice};
use crate::config::QueueScopeConfig;
use crate::error::{ApplyError, ApplyFailure, RevertError};

const QUEUE_PLACEHOLDER: &str = "{queue}";

/// Scopes background job queue names.
///
/// No client is opened on apply; the dispatcher picks up the new name on
/// its next acquire because the cached handle was invalidated.
#[derive(Debug)]
pub struct QueueBootstrapper {
    slice: ScopedSlice,
    name_pattern: String,
}

impl QueueBootstrapper {
    pub const KEYS: &'static [&'static str] = &[keys::QUEUE_NAME];

    #[must_use]
    pub fn new(ctx: BootstrapContext, config: &QueueScopeConfig) -> Self {
        Self {
            slice: ScopedSlice::new(Subsystem::Queue, Self::KEYS, ctx),
            name_pattern: config.name_pattern.clone(),
        }
    }
}

#[async_trait]
impl Bootstrapper for QueueBootstrapper {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Queue
    }

    fn owned_keys(&self) -> &'static [&'static str] {
        Self::KEYS
    }

    fn scope(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyFailure> {
        let queue = neutral_text(&self.slice, keys::QUEUE_NAME)?;
        let name = tenant
            .substitute(&self.name_pattern)
            .replace(QUEUE_PLACEHOLDER, &queue);
        Ok(ScopedSettings::new().with(keys::QUEUE_NAME, name))
    }

    async fn apply(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyError> {
        self.slice.apply(tenant, self.scope(tenant), false).await
    }

    async fn revert(&self) -> Result<(), RevertError> {
        self.slice.revert().await
    }
}
