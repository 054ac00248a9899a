use async_trait::async_trait;
use switchyard_core::{keys, ScopedSettings, Subsystem, TenantId};

use super::{neutral_text, BootstrapContext, Bootstrapper, ScopedSlice};
use crate::config::SessionScopeConfig;
use crate::error::{ApplyError, ApplyFailure, RevertError};

/// Scopes the session store: points it at the tenant connection alias and
/// gives the session cookie a per-tenant name, so a cookie issued for one
/// tenant is never presented to another.
#[derive(Debug)]
pub struct SessionBootstrapper {
    slice: ScopedSlice,
    cookie_suffix_pattern: String,
}

impl SessionBootstrapper {
    pub const KEYS: &'static [&'static str] = &[keys::SESSION_CONNECTION, keys::SESSION_COOKIE];

    #[must_use]
    pub fn new(ctx: BootstrapContext, config: &SessionScopeConfig) -> Self {
        Self {
            slice: ScopedSlice::new(Subsystem::Session, Self::KEYS, ctx),
            cookie_suffix_pattern: config.cookie_suffix_pattern.clone(),
        }
    }
}

#[async_trait]
impl Bootstrapper for SessionBootstrapper {
    fn subsystem(&self) -> Subsystem {
        Subsystem::Session
    }

    fn owned_keys(&self) -> &'static [&'static str] {
        Self::KEYS
    }

    fn scope(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyFailure> {
        let cookie = neutral_text(&self.slice, keys::SESSION_COOKIE)?;
        Ok(ScopedSettings::new()
            .with(
                keys::SESSION_CONNECTION,
                self.slice.context().tenant_alias.as_str(),
            )
            .with(
                keys::SESSION_COOKIE,
                format!("{cookie}{}", tenant.substitute(&self.cookie_suffix_pattern)),
            ))
    }

    async fn apply(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyError> {
        self.slice.apply(tenant, self.scope(tenant), true).await
    }

    async fn revert(&self) -> Result<(), RevertError> {
        self.slice.revert().await
    }
}
