//! Resource bootstrappers.
//!
//! One [`Bootstrapper`] per shared subsystem. Each owns a slice of the live
//! configuration (the keys under its subsystem prefix), rewrites it to a
//! tenant-scoped value on apply, and writes the previous values back on
//! revert. The common state handling lives in [`ScopedSlice`].

pub mod cache;
pub mod chain;
pub mod filesystem;
pub mod queue;
pub mod session;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use switchyard_core::{ScopedSettings, SettingValue, Subsystem, TenantId};
use tracing::warn;

use crate::connection::{ClientPool, ConnectTarget};
use crate::error::{ApplyError, ApplyFailure, RevertError, RevertFailure};
use crate::settings::{ConfigStore, SnapshotStore};
use crate::telemetry::{self, Action};

pub use cache::CacheBootstrapper;
pub use chain::BootstrapperChain;
pub use filesystem::FilesystemBootstrapper;
pub use queue::QueueBootstrapper;
pub use session::SessionBootstrapper;
pub use store::StoreBootstrapper;

// ---------------------------------------------------------------------------
// BootstrapContext
// ---------------------------------------------------------------------------

/// Shared collaborators handed to every bootstrapper.
#[derive(Debug, Clone)]
pub struct BootstrapContext {
    pub store: Arc<ConfigStore>,
    pub snapshot: Arc<SnapshotStore>,
    pub pool: Arc<ClientPool>,
    pub apply_timeout: Duration,
    /// Connection alias used for tenant-scoped client handles.
    pub tenant_alias: String,
}

// ---------------------------------------------------------------------------
// Bootstrapper trait
// ---------------------------------------------------------------------------

/// Scopes one shared subsystem to a tenant and back.
#[async_trait]
pub trait Bootstrapper: Send + Sync {
    fn subsystem(&self) -> Subsystem;

    /// Configuration keys this bootstrapper writes.
    fn owned_keys(&self) -> &'static [&'static str];

    /// Scoped settings for `tenant`. Pure: same tenant, same result.
    ///
    /// # Errors
    ///
    /// Fails when the neutral value the scoped one derives from is unusable.
    fn scope(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyFailure>;

    /// Writes the scoped settings and rebuilds the subsystem's client handle.
    ///
    /// # Errors
    ///
    /// On failure the bootstrapper has already reverted itself.
    async fn apply(&self, tenant: &TenantId) -> Result<ScopedSettings, ApplyError>;

    /// Restores the values this bootstrapper overwrote. Idempotent, and safe
    /// to call without a prior apply.
    ///
    /// # Errors
    ///
    /// Configuration is always restored; an error means a cached client
    /// could not be released.
    async fn revert(&self) -> Result<(), RevertError>;
}

// ---------------------------------------------------------------------------
// ScopedSlice
// ---------------------------------------------------------------------------

#[derive(Debug)]
enum SliceState {
    Idle,
    Applied {
        tenant: TenantId,
        previous: Vec<(&'static str, Option<SettingValue>)>,
        /// Neutral handles open before apply, reopened on revert.
        reopen: Vec<ConnectTarget>,
    },
}

/// State and write path shared by every bootstrapper.
#[derive(Debug)]
pub struct ScopedSlice {
    subsystem: Subsystem,
    keys: &'static [&'static str],
    ctx: BootstrapContext,
    state: Mutex<SliceState>,
}

impl ScopedSlice {
    #[must_use]
    pub fn new(subsystem: Subsystem, keys: &'static [&'static str], ctx: BootstrapContext) -> Self {
        debug_assert!(keys.iter().all(|k| subsystem.owns_key(k)));
        Self {
            subsystem,
            keys,
            ctx,
            state: Mutex::new(SliceState::Idle),
        }
    }

    #[must_use]
    pub fn keys(&self) -> &'static [&'static str] {
        self.keys
    }

    #[must_use]
    pub fn context(&self) -> &BootstrapContext {
        &self.ctx
    }

    /// The neutral value of `key`: the snapshot if captured, else the live value.
    #[must_use]
    pub fn neutral(&self, key: &str) -> Option<SettingValue> {
        self.ctx
            .snapshot
            .get(key)
            .unwrap_or_else(|| self.ctx.store.get(key))
    }

    /// Tenant this slice is currently applied for.
    #[must_use]
    pub fn applied_tenant(&self) -> Option<TenantId> {
        match &*self.state.lock() {
            SliceState::Idle => None,
            SliceState::Applied { tenant, .. } => Some(tenant.clone()),
        }
    }

    /// Records previous values and writes `settings` into the live store.
    pub fn write(&self, tenant: &TenantId, settings: &ScopedSettings) {
        for key in self.keys {
            self.ctx
                .snapshot
                .capture_if_absent(key, || self.ctx.store.get(key));
        }

        {
            let mut state = self.state.lock();
            let (previous, reopen) = match std::mem::replace(&mut *state, SliceState::Idle) {
                // A second apply without revert keeps the oldest values.
                SliceState::Applied { previous, reopen, .. } => (previous, reopen),
                SliceState::Idle => (
                    self.keys
                        .iter()
                        .map(|key| (*key, self.ctx.store.get(key)))
                        .collect(),
                    self.ctx.pool.neutral_targets(self.subsystem),
                ),
            };
            *state = SliceState::Applied {
                tenant: tenant.clone(),
                previous,
                reopen,
            };
        }

        for (key, value) in settings.iter() {
            debug_assert!(self.keys.iter().any(|k| *k == key), "{key} is outside the slice");
            self.ctx.store.set(key, value.clone());
        }
    }

    /// Writes back the recorded values, or the snapshot when nothing is recorded.
    fn restore(&self) -> (Option<TenantId>, ScopedSettings, Vec<ConnectTarget>) {
        let state = std::mem::replace(&mut *self.state.lock(), SliceState::Idle);
        let (tenant, values, reopen): (Option<TenantId>, Vec<(&str, Option<SettingValue>)>, _) =
            match state {
                SliceState::Applied {
                    tenant,
                    previous,
                    reopen,
                } => (Some(tenant), previous, reopen),
                SliceState::Idle => (
                    None,
                    self.keys
                        .iter()
                        .filter_map(|key| self.ctx.snapshot.get(key).map(|value| (*key, value)))
                        .collect(),
                    Vec::new(),
                ),
            };

        let mut restored = ScopedSettings::new();
        for (key, value) in values {
            if let Some(v) = &value {
                restored = restored.with(key, v.clone());
            }
            self.ctx.store.restore(key, value);
        }
        (tenant, restored, reopen)
    }

    fn timeout_ms(&self) -> u64 {
        u64::try_from(self.ctx.apply_timeout.as_millis()).unwrap_or(u64::MAX)
    }

    /// Opens the tenant-scoped client handle, bounded by the apply timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ApplyFailure::Unreachable`] or [`ApplyFailure::Timeout`].
    pub async fn reconnect(
        &self,
        tenant: &TenantId,
        settings: &ScopedSettings,
    ) -> Result<(), ApplyFailure> {
        let target = ConnectTarget::new(
            self.subsystem,
            self.ctx.tenant_alias.clone(),
            Some(tenant.clone()),
            settings.clone(),
        );
        match tokio::time::timeout(self.ctx.apply_timeout, self.ctx.pool.acquire(target)).await {
            Ok(Ok(_handle)) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ApplyFailure::Timeout {
                timeout_ms: self.timeout_ms(),
            }),
        }
    }

    /// Rebuilds a neutral handle that apply invalidated.
    async fn reopen(&self, target: ConnectTarget) -> Result<(), RevertFailure> {
        match tokio::time::timeout(self.ctx.apply_timeout, self.ctx.pool.acquire(target)).await {
            Ok(Ok(_handle)) => Ok(()),
            Ok(Err(e)) => Err(RevertFailure::Reopen(e)),
            Err(_) => Err(RevertFailure::Timeout {
                timeout_ms: self.timeout_ms(),
            }),
        }
    }

    /// Drops the subsystem's cached handles so the next use reconnects.
    /// Used on apply, where a failed disconnect of the neutral handle is not fatal.
    pub async fn invalidate(&self) {
        if let Err(e) = self.ctx.pool.invalidate(self.subsystem).await {
            warn!(subsystem = %self.subsystem, error = %e, "failed to release neutral client handle");
        }
    }

    /// Standard apply: write, invalidate, optionally reconnect.
    ///
    /// # Errors
    ///
    /// Any failure reverts the slice before it is returned.
    pub async fn apply(
        &self,
        tenant: &TenantId,
        scoped: Result<ScopedSettings, ApplyFailure>,
        reconnect: bool,
    ) -> Result<ScopedSettings, ApplyError> {
        let settings = match scoped {
            Ok(settings) => settings,
            Err(failure) => return Err(self.abort(tenant, failure).await),
        };
        self.write(tenant, &settings);
        self.invalidate().await;
        if reconnect {
            if let Err(failure) = self.reconnect(tenant, &settings).await {
                return Err(self.abort(tenant, failure).await);
            }
        }
        self.applied(tenant, &settings);
        Ok(settings)
    }

    /// Logs a successful apply.
    pub fn applied(&self, tenant: &TenantId, settings: &ScopedSettings) {
        telemetry::log_transition(Some(tenant), self.subsystem, Action::Apply, Ok(()), settings);
    }

    /// Logs a failed apply, reverts, and builds the error to propagate.
    pub async fn abort(&self, tenant: &TenantId, failure: ApplyFailure) -> ApplyError {
        telemetry::log_transition(
            Some(tenant),
            self.subsystem,
            Action::Apply,
            Err(&failure),
            &"-",
        );
        // Revert logs its own failure; the apply failure is the one reported.
        let rollback = match self.revert().await {
            Ok(()) => None,
            Err(e) => {
                telemetry::record_revert_failure(self.subsystem);
                Some(e)
            }
        };
        ApplyError::new(self.subsystem, tenant.clone(), failure).with_rollback(rollback)
    }

    /// Restores configuration, releases tenant-scoped handles, then reopens
    /// the neutral handles that were open before apply.
    ///
    /// # Errors
    ///
    /// Returns [`RevertError`] with the first handle that could not be
    /// released or reopened. Every handle is attempted.
    pub async fn revert(&self) -> Result<(), RevertError> {
        let (tenant, restored, reopen) = self.restore();
        let mut result = self
            .ctx
            .pool
            .invalidate(self.subsystem)
            .await
            .map(|_| ())
            .map_err(RevertFailure::from);
        for target in reopen {
            if let Err(failure) = self.reopen(target).await {
                result = result.and(Err(failure));
            }
        }
        let result = result.map_err(|reason| RevertError {
            subsystem: self.subsystem,
            reason,
        });
        match &result {
            Ok(()) => telemetry::log_transition(
                tenant.as_ref(),
                self.subsystem,
                Action::Revert,
                Ok(()),
                &restored,
            ),
            Err(e) => telemetry::log_transition(
                tenant.as_ref(),
                self.subsystem,
                Action::Revert,
                Err(e),
                &restored,
            ),
        }
        result
    }
}

/// Text value of a neutral setting.
pub(crate) fn neutral_text(slice: &ScopedSlice, key: &'static str) -> Result<String, ApplyFailure> {
    match slice.neutral(key) {
        Some(SettingValue::Text(s)) => Ok(s),
        Some(other) => Err(ApplyFailure::InvalidScopedValue {
            key,
            detail: format!("expected text, found {other:?}"),
        }),
        None => Err(ApplyFailure::InvalidScopedValue {
            key,
            detail: "no neutral value".to_string(),
        }),
    }
}
