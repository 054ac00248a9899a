//! Tenant context manager.
//!
//! Owns the context state machine:
//!
//! ```text
//! Neutral -> Entering(t) -> Active(t) -> Exiting(t) -> Neutral
//!                 |
//!                 +-> Neutral (enter failed, already rolled back)
//! ```
//!
//! Every enter/exit cycle is wrapped by the connection guard: a census is
//! taken before the chain is applied and compared after it is reverted
//! (or after a failed enter).
//!
//! [`TenantContextManager::scoped`] admits one unit of work at a time. If its
//! future is dropped before the exit ran, a [`ReleaseGuard`] finishes the
//! exit on the runtime and holds the admission permit until it is done.

use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use switchyard_core::{ScopedSettings, Subsystem, TenantId, TenantResourceContext};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::bootstrap::{BootstrapContext, BootstrapperChain};
use crate::config::SwitchyardConfig;
use crate::connection::{
    ClientHandle, ClientPool, ConnectTarget, ConnectionCensus, ConnectionGuard,
    ConnectionRegistry, Connector, LeakReport,
};
use crate::error::{ConfigError, ConnectError, ContextError, RevertError};
use crate::ownership::OwnershipSync;
use crate::settings::{ConfigStore, SnapshotStore};
use crate::telemetry::{self, TRANSITION_TARGET};

// ---------------------------------------------------------------------------
// ContextState
// ---------------------------------------------------------------------------

/// Where the manager is in the enter/exit cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextState {
    Neutral,
    Entering(TenantId),
    Active(TenantId),
    Exiting(TenantId),
}

impl ContextState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ContextState::Neutral => "neutral",
            ContextState::Entering(_) => "entering",
            ContextState::Active(_) => "active",
            ContextState::Exiting(_) => "exiting",
        }
    }

    #[must_use]
    pub fn tenant(&self) -> Option<&TenantId> {
        match self {
            ContextState::Neutral => None,
            ContextState::Entering(t) | ContextState::Active(t) | ContextState::Exiting(t) => {
                Some(t)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ExitReport
// ---------------------------------------------------------------------------

/// What happened while leaving a tenant context. Exit never fails; problems
/// are reported here and logged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExitReport {
    /// Tenant that was exited; `None` if no context was active.
    pub tenant: Option<TenantId>,
    #[serde(skip)]
    pub revert_failures: Vec<RevertError>,
    pub leak: LeakReport,
}

impl ExitReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.revert_failures.is_empty() && self.leak.is_clean()
    }
}

// ---------------------------------------------------------------------------
// TenantContextManager
// ---------------------------------------------------------------------------

/// Enters and exits tenant contexts, one at a time.
pub struct TenantContextManager {
    ctx: BootstrapContext,
    chain: BootstrapperChain,
    guard: ConnectionGuard,
    state: Mutex<ContextState>,
    census: Mutex<Option<ConnectionCensus>>,
    admission: Arc<Semaphore>,
}

impl TenantContextManager {
    /// Validates `config` and builds the standard five-bootstrapper manager.
    ///
    /// The live configuration is seeded from `config.neutral` and the neutral
    /// snapshot of every owned key is captured before this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if `config` is invalid.
    pub fn new(
        config: &SwitchyardConfig,
        connector: Arc<dyn Connector>,
        ownership: Arc<dyn OwnershipSync>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let registry = Arc::new(ConnectionRegistry::new());
        let ctx = BootstrapContext {
            store: Arc::new(ConfigStore::from_neutral(&config.neutral)),
            snapshot: Arc::new(SnapshotStore::new()),
            pool: Arc::new(ClientPool::new(
                config.pool.clone(),
                connector,
                Arc::clone(&registry),
            )),
            apply_timeout: config.apply_timeout,
            tenant_alias: config.guard.tenant_alias.clone(),
        };
        let chain = BootstrapperChain::standard(&ctx, config, ownership);
        let guard = ConnectionGuard::new(registry, config.guard.clone());
        Ok(Self::with_chain(ctx, chain, guard))
    }

    /// Builds a manager around an already assembled chain.
    ///
    /// Captures the neutral snapshot of every key the chain owns.
    #[must_use]
    pub fn with_chain(ctx: BootstrapContext, chain: BootstrapperChain, guard: ConnectionGuard) -> Self {
        let captured = ctx
            .snapshot
            .capture_all(&ctx.store, chain.owned_keys());
        debug!(captured, subsystems = ?chain.subsystems(), "captured neutral snapshot");
        Self {
            ctx,
            chain,
            guard,
            state: Mutex::new(ContextState::Neutral),
            census: Mutex::new(None),
            admission: Arc::new(Semaphore::new(1)),
        }
    }

    #[must_use]
    pub fn state(&self) -> ContextState {
        self.state.lock().clone()
    }

    /// Tenant of the active context, if one is fully entered.
    #[must_use]
    pub fn active_tenant(&self) -> Option<TenantId> {
        match &*self.state.lock() {
            ContextState::Active(t) => Some(t.clone()),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_neutral(&self) -> bool {
        matches!(*self.state.lock(), ContextState::Neutral)
    }

    #[must_use]
    pub fn config_store(&self) -> &Arc<ConfigStore> {
        &self.ctx.store
    }

    #[must_use]
    pub fn snapshot(&self) -> &Arc<SnapshotStore> {
        &self.ctx.snapshot
    }

    #[must_use]
    pub fn pool(&self) -> &Arc<ClientPool> {
        &self.ctx.pool
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.ctx.pool.registry()
    }

    #[must_use]
    pub fn chain(&self) -> &BootstrapperChain {
        &self.chain
    }

    /// Alias tenant-scoped connections are opened under.
    #[must_use]
    pub fn tenant_alias(&self) -> &str {
        self.guard.tenant_alias()
    }

    /// Stops admitting [`scoped`](Self::scoped) work. Work already admitted
    /// runs to its exit.
    pub fn close(&self) {
        self.admission.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.admission.is_closed()
    }

    /// Scopes every subsystem to `tenant`.
    ///
    /// # Errors
    ///
    /// - [`ContextError::AlreadyActive`] / [`ContextError::Busy`] if a context
    ///   is already active or mid-transition; state is left unchanged.
    /// - [`ContextError::Apply`] if a bootstrapper failed; every subsystem has
    ///   been reverted and the manager is back to neutral.
    pub async fn enter(&self, tenant: TenantId) -> Result<TenantResourceContext, ContextError> {
        {
            let mut state = self.state.lock();
            match &*state {
                ContextState::Neutral => {}
                ContextState::Active(active) => {
                    return Err(ContextError::AlreadyActive {
                        active: active.clone(),
                        requested: tenant,
                    });
                }
                other => {
                    return Err(ContextError::Busy {
                        state: other.name(),
                        requested: tenant,
                    });
                }
            }
            *state = ContextState::Entering(tenant.clone());
        }

        let started = Instant::now();
        let census = self.guard.before_enter();
        // Kept on the manager so an abandoned enter can still be checked.
        *self.census.lock() = Some(census.clone());

        match self.chain.enter(&tenant).await {
            Ok(applied) => {
                let mut context = TenantResourceContext::new(tenant.clone(), Uuid::new_v4().to_string());
                for (subsystem, settings) in applied {
                    context.insert(subsystem, settings);
                }
                *self.state.lock() = ContextState::Active(tenant);
                telemetry::record_enter("ok", started.elapsed());
                info!(
                    target: TRANSITION_TARGET,
                    tenant = %context.tenant,
                    context_id = %context.context_id,
                    elapsed = ?started.elapsed(),
                    "entered tenant context"
                );
                Ok(context)
            }
            Err(err) => {
                // Handles opened before the failing apply are purged here.
                self.census.lock().take();
                let leak = self.guard.after_exit(&census);
                *self.state.lock() = ContextState::Neutral;
                telemetry::record_enter("error", started.elapsed());
                error!(
                    target: TRANSITION_TARGET,
                    tenant = %tenant,
                    subsystem = %err.subsystem,
                    error = %err,
                    purged = leak.purged.len(),
                    "tenant context enter failed"
                );
                Err(err.into())
            }
        }
    }

    /// Reverts every subsystem to neutral and checks for leaked connections.
    ///
    /// A no-op returning an empty report when no context is active.
    pub async fn exit(&self) -> ExitReport {
        let tenant = {
            let mut state = self.state.lock();
            let tenant = match &*state {
                ContextState::Active(t) => t.clone(),
                other => {
                    debug!(state = other.name(), "exit without an active context");
                    return ExitReport::default();
                }
            };
            *state = ContextState::Exiting(tenant.clone());
            tenant
        };
        self.finish_exit(tenant).await
    }

    /// Returns a context abandoned in any state to neutral.
    ///
    /// `None` if the manager is not holding a context for `tenant`.
    async fn recover(&self, tenant: &TenantId) -> Option<ExitReport> {
        {
            let mut state = self.state.lock();
            if state.tenant() != Some(tenant) {
                return None;
            }
            warn!(
                target: TRANSITION_TARGET,
                tenant = %tenant,
                state = state.name(),
                "releasing abandoned tenant context"
            );
            *state = ContextState::Exiting(tenant.clone());
        }
        Some(self.finish_exit(tenant.clone()).await)
    }

    async fn finish_exit(&self, tenant: TenantId) -> ExitReport {
        let revert_failures = self.chain.exit().await;
        for failure in &revert_failures {
            warn!(
                target: TRANSITION_TARGET,
                tenant = %tenant,
                subsystem = %failure.subsystem,
                error = %failure,
                "revert failed"
            );
        }

        let census = self.census.lock().take();
        let leak = census
            .map(|census| self.guard.after_exit(&census))
            .unwrap_or_default();

        *self.state.lock() = ContextState::Neutral;
        telemetry::record_exit();
        info!(
            target: TRANSITION_TARGET,
            tenant = %tenant,
            revert_failures = revert_failures.len(),
            purged = leak.purged.len(),
            leaked = leak.leak.as_ref().map_or(0, |l| l.delta),
            "exited tenant context"
        );

        ExitReport {
            tenant: Some(tenant),
            revert_failures,
            leak,
        }
    }

    /// Runs `work` inside a context for `tenant`, with exactly one exit per
    /// successful enter.
    ///
    /// Calls are admitted one at a time. A panic in `work` still exits before
    /// unwinding. Dropping the returned future after admission spawns the
    /// exit on the current runtime; the next call waits for it.
    ///
    /// # Errors
    ///
    /// - [`ContextError::Closed`] after [`close`](Self::close).
    /// - The enter error otherwise; `work` does not run in either case.
    pub async fn scoped<F, Fut, T>(
        self: &Arc<Self>,
        tenant: TenantId,
        work: F,
    ) -> Result<T, ContextError>
    where
        F: FnOnce(TenantResourceContext) -> Fut,
        Fut: Future<Output = T>,
    {
        let Ok(permit) = Arc::clone(&self.admission).acquire_owned().await else {
            return Err(ContextError::Closed { requested: tenant });
        };
        let mut release = ReleaseGuard {
            manager: Some(Arc::clone(self)),
            tenant: tenant.clone(),
            permit: Some(permit),
        };

        let context = match self.enter(tenant).await {
            Ok(context) => context,
            Err(e) => {
                // Rejected or already rolled back: nothing to release.
                release.disarm();
                return Err(e);
            }
        };
        let outcome = AssertUnwindSafe(async move { work(context).await })
            .catch_unwind()
            .await;
        self.exit().await;
        release.disarm();
        match outcome {
            Ok(value) => Ok(value),
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }

    /// Client handle for `subsystem` under the context's scoped settings.
    ///
    /// # Errors
    ///
    /// Propagates a refused connection.
    pub async fn client(
        &self,
        context: &TenantResourceContext,
        subsystem: Subsystem,
    ) -> Result<Arc<ClientHandle>, ConnectError> {
        let settings = context.settings(subsystem).cloned().unwrap_or_default();
        let target = ConnectTarget::new(
            subsystem,
            self.guard.tenant_alias(),
            Some(context.tenant.clone()),
            settings,
        );
        self.ctx.pool.acquire(target).await
    }

    /// Client handle for `subsystem` under the live neutral settings.
    ///
    /// # Errors
    ///
    /// Propagates a refused connection.
    pub async fn neutral_client(&self, subsystem: Subsystem) -> Result<Arc<ClientHandle>, ConnectError> {
        let keys = self
            .chain
            .get(subsystem)
            .map(|b| b.owned_keys())
            .unwrap_or_default();
        let settings: ScopedSettings = keys
            .iter()
            .filter_map(|key| self.ctx.store.get(key).map(|v| ((*key).to_string(), v)))
            .collect();
        let target = ConnectTarget::new(subsystem, self.guard.default_alias(), None, settings);
        self.ctx.pool.acquire(target).await
    }
}

// ---------------------------------------------------------------------------
// ReleaseGuard
// ---------------------------------------------------------------------------

/// RAII guard held by [`TenantContextManager::scoped`] from admission to exit.
///
/// Dropped while armed (the scoped future was cancelled or unwound), it
/// spawns [`TenantContextManager::recover`] and keeps the admission permit
/// until the manager is neutral again.
struct ReleaseGuard {
    manager: Option<Arc<TenantContextManager>>,
    tenant: TenantId,
    permit: Option<OwnedSemaphorePermit>,
}

impl ReleaseGuard {
    fn disarm(&mut self) {
        self.manager = None;
    }
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        let Some(manager) = self.manager.take() else {
            return;
        };
        if manager.state().tenant() != Some(&self.tenant) {
            return;
        }
        let tenant = self.tenant.clone();
        let permit = self.permit.take();
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    manager.recover(&tenant).await;
                    drop(permit);
                });
            }
            Err(_) => error!(
                target: TRANSITION_TARGET,
                tenant = %tenant,
                state = manager.state().name(),
                "tenant context abandoned outside a runtime"
            ),
        }
    }
}

impl std::fmt::Debug for TenantContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantContextManager")
            .field("state", &self.state())
            .field("chain", &self.chain)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use switchyard_core::{keys, SettingValue};

    use super::*;
    use crate::bootstrap::test_support::ScriptedConnector;
    use crate::connection::NullConnector;
    use crate::ownership::NoopOwnershipSync;

    fn manager() -> TenantContextManager {
        TenantContextManager::new(
            &SwitchyardConfig::default(),
            Arc::new(NullConnector),
            Arc::new(NoopOwnershipSync),
        )
        .unwrap()
    }

    fn tenant(id: &str) -> TenantId {
        TenantId::new(id).unwrap()
    }

    #[test]
    fn invalid_config_rejected() {
        let mut config = SwitchyardConfig::default();
        config.store.pool_size = 0;
        let err = TenantContextManager::new(&config, Arc::new(NullConnector), Arc::new(NoopOwnershipSync))
            .unwrap_err();
        assert_eq!(err, ConfigError::ZeroPoolSize);
    }

    #[test]
    fn snapshot_captured_at_construction() {
        let manager = manager();
        assert_eq!(manager.snapshot().len(), 7);
        assert_eq!(
            manager.snapshot().get(keys::QUEUE_NAME),
            Some(Some(SettingValue::from("default")))
        );
        assert!(manager.is_neutral());
    }

    #[tokio::test]
    async fn enter_returns_scoped_context() {
        let manager = manager();
        let ctx = manager.enter(tenant("acme")).await.unwrap();

        assert_eq!(ctx.tenant, tenant("acme"));
        assert_eq!(ctx.cache_prefix(), Some("tenant_acme_"));
        assert_eq!(ctx.session_cookie(), Some("app_session_acme"));
        assert_eq!(ctx.queue_name(), Some("default-acme"));
        assert_eq!(ctx.subsystems().count(), 5);
        assert!(Uuid::parse_str(&ctx.context_id).is_ok());
        assert_eq!(manager.active_tenant(), Some(tenant("acme")));
        assert_eq!(manager.state(), ContextState::Active(tenant("acme")));

        let report = manager.exit().await;
        assert_eq!(report.tenant, Some(tenant("acme")));
        assert!(report.is_clean());
        assert!(manager.is_neutral());
    }

    #[tokio::test]
    async fn reentry_rejected_and_state_unchanged() {
        let manager = manager();
        manager.enter(tenant("acme")).await.unwrap();
        let live = manager.config_store().snapshot();

        let err = manager.enter(tenant("globex")).await.unwrap_err();
        assert!(matches!(
            err,
            ContextError::AlreadyActive { ref active, ref requested }
                if *active == tenant("acme") && *requested == tenant("globex")
        ));
        assert_eq!(manager.active_tenant(), Some(tenant("acme")));
        assert_eq!(manager.config_store().snapshot(), live);
        manager.exit().await;
    }

    #[tokio::test]
    async fn exit_without_enter_is_noop() {
        let manager = manager();
        let before = manager.config_store().snapshot();
        let report = manager.exit().await;
        assert_eq!(report, ExitReport::default());
        assert_eq!(manager.config_store().snapshot(), before);
    }

    #[tokio::test]
    async fn failed_enter_returns_to_neutral() {
        let manager = TenantContextManager::new(
            &SwitchyardConfig::default(),
            Arc::new(ScriptedConnector::refusing_on("acme", Subsystem::Store)),
            Arc::new(NoopOwnershipSync),
        )
        .unwrap();
        let before = manager.config_store().snapshot();

        let err = manager.enter(tenant("acme")).await.unwrap_err();
        assert!(matches!(err, ContextError::Apply(ref e) if e.subsystem == Subsystem::Store));
        assert!(manager.is_neutral());
        assert_eq!(manager.config_store().snapshot(), before);
        assert_eq!(manager.registry().count(), 0);

        // Another tenant is served normally afterwards.
        manager.enter(tenant("globex")).await.unwrap();
        assert!(manager.exit().await.is_clean());
    }

    #[tokio::test]
    async fn scoped_exits_after_work() {
        let manager = Arc::new(manager());
        let before = manager.config_store().snapshot();
        let prefix = manager
            .scoped(tenant("acme"), |ctx| async move { ctx.store_prefix().map(str::to_string) })
            .await
            .unwrap();
        assert_eq!(prefix.as_deref(), Some("tenant_acme_"));
        assert!(manager.is_neutral());
        assert_eq!(manager.config_store().snapshot(), before);
    }

    #[tokio::test]
    async fn scoped_exits_when_work_panics() {
        let manager = Arc::new(manager());
        let inner = Arc::clone(&manager);
        let result = tokio::spawn(async move {
            inner
                .scoped(tenant("acme"), |_ctx| async move {
                    panic!("handler blew up");
                })
                .await
        })
        .await;
        assert!(result.unwrap_err().is_panic());
        assert!(manager.is_neutral());
    }

    #[tokio::test]
    async fn client_handles_follow_context_alias() {
        let manager = manager();
        manager.neutral_client(Subsystem::Store).await.unwrap();
        assert_eq!(manager.registry().count_by_alias("default"), 1);

        let ctx = manager.enter(tenant("acme")).await.unwrap();
        // Applying the store invalidated the neutral handle.
        assert_eq!(manager.registry().count_by_alias("default"), 0);
        let handle = manager.client(&ctx, Subsystem::Store).await.unwrap();
        assert_eq!(handle.target.alias, "tenant");
        // Same settings the store bootstrapper connected with: pool hit.
        assert!(manager.pool().stats().hits >= 1);

        let report = manager.exit().await;
        assert!(report.leak.leak.is_none());
        assert!(!handle.is_open());
        // Revert reopened the neutral handle.
        assert_eq!(manager.registry().count_by_alias("default"), 1);
        assert_eq!(manager.registry().count_by_alias("tenant"), 0);
    }

    /// Waits for a spawned release to bring `manager` back to neutral.
    async fn wait_neutral(manager: &TenantContextManager) {
        tokio::time::timeout(Duration::from_secs(1), async {
            while !manager.is_neutral() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("manager returned to neutral");
    }

    #[tokio::test]
    async fn dropped_scoped_work_still_exits() {
        let manager = Arc::new(manager());
        let before = manager.config_store().snapshot();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            manager.scoped(tenant("acme"), |_ctx| async move {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }),
        )
        .await;
        assert!(cancelled.is_err());

        wait_neutral(&manager).await;
        assert_eq!(manager.config_store().snapshot(), before);
        assert_eq!(manager.registry().count_by_alias("tenant"), 0);

        // The next caller is admitted once the release finished.
        let prefix = manager
            .scoped(tenant("globex"), |ctx| async move {
                ctx.cache_prefix().map(str::to_string)
            })
            .await
            .unwrap();
        assert_eq!(prefix.as_deref(), Some("tenant_globex_"));
    }

    #[tokio::test]
    async fn dropped_enter_is_rolled_back() {
        let connector = ScriptedConnector {
            stall: true,
            ..ScriptedConnector::default()
        };
        let mut config = SwitchyardConfig::default();
        config.apply_timeout = Duration::from_secs(5);
        let manager = Arc::new(
            TenantContextManager::new(&config, Arc::new(connector), Arc::new(NoopOwnershipSync))
                .unwrap(),
        );
        let before = manager.config_store().snapshot();

        let cancelled = tokio::time::timeout(
            Duration::from_millis(20),
            manager.scoped(tenant("acme"), |_ctx| async move {}),
        )
        .await;
        assert!(cancelled.is_err());

        wait_neutral(&manager).await;
        assert_eq!(manager.config_store().snapshot(), before);
    }

    #[tokio::test]
    async fn closed_manager_rejects_scoped_work() {
        let manager = Arc::new(manager());
        manager.close();
        assert!(manager.is_closed());

        let err = manager
            .scoped(tenant("acme"), |_ctx| async move {})
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::Closed { ref requested } if *requested == tenant("acme")));
        assert!(manager.is_neutral());
    }

    #[tokio::test]
    async fn rejected_scoped_call_leaves_active_context_alone() {
        let manager = Arc::new(manager());
        manager.enter(tenant("acme")).await.unwrap();

        let err = manager
            .scoped(tenant("globex"), |_ctx| async move {})
            .await
            .unwrap_err();
        assert!(matches!(err, ContextError::AlreadyActive { .. }));
        tokio::task::yield_now().await;
        assert_eq!(manager.active_tenant(), Some(tenant("acme")));
        assert!(manager.exit().await.is_clean());
    }
}
