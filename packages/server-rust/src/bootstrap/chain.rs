use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use switchyard_core::{ScopedSettings, Subsystem, TenantId};
use tracing::warn;

use super::{
    BootstrapContext, Bootstrapper, CacheBootstrapper, FilesystemBootstrapper, QueueBootstrapper,
    SessionBootstrapper, StoreBootstrapper,
};
use crate::config::SwitchyardConfig;
use crate::error::{ApplyError, DuplicateSubsystem, RevertError};
use crate::ownership::OwnershipSync;
use crate::telemetry;

// ---------------------------------------------------------------------------
// BootstrapperChain
// ---------------------------------------------------------------------------

/// Ordered set of bootstrappers, at most one per subsystem.
///
/// Enter applies in [`Subsystem`] order (cache, session, filesystem, store,
/// queue) regardless of registration order, and is all-or-nothing: when one
/// apply fails, the ones already applied are reverted in reverse order and
/// the apply failure is returned. Exit reverts every bootstrapper in
/// reverse order and collects failures instead of stopping at the first.
pub struct BootstrapperChain {
    bootstrappers: RwLock<BTreeMap<Subsystem, Arc<dyn Bootstrapper>>>,
}

impl BootstrapperChain {
    /// Creates an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bootstrappers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Builds the five standard bootstrappers from `config`.
    #[must_use]
    pub fn standard(
        ctx: &BootstrapContext,
        config: &SwitchyardConfig,
        ownership: Arc<dyn OwnershipSync>,
    ) -> Self {
        let chain = Self::new();
        let all: [Arc<dyn Bootstrapper>; 5] = [
            Arc::new(CacheBootstrapper::new(ctx.clone(), &config.cache)),
            Arc::new(SessionBootstrapper::new(ctx.clone(), &config.session)),
            Arc::new(FilesystemBootstrapper::new(
                ctx.clone(),
                &config.filesystem,
                ownership,
            )),
            Arc::new(StoreBootstrapper::new(ctx.clone(), &config.store)),
            Arc::new(QueueBootstrapper::new(ctx.clone(), &config.queue)),
        ];
        for bootstrapper in all {
            chain
                .bootstrappers
                .write()
                .insert(bootstrapper.subsystem(), bootstrapper);
        }
        chain
    }

    /// Registers a bootstrapper.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateSubsystem`] if its subsystem is already covered.
    pub fn register(&self, bootstrapper: impl Bootstrapper + 'static) -> Result<(), DuplicateSubsystem> {
        self.register_arc(Arc::new(bootstrapper))
    }

    /// Registers a shared bootstrapper.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateSubsystem`] if its subsystem is already covered.
    pub fn register_arc(&self, bootstrapper: Arc<dyn Bootstrapper>) -> Result<(), DuplicateSubsystem> {
        let subsystem = bootstrapper.subsystem();
        let mut map = self.bootstrappers.write();
        if map.contains_key(&subsystem) {
            return Err(DuplicateSubsystem(subsystem));
        }
        map.insert(subsystem, bootstrapper);
        Ok(())
    }

    /// Retrieve a bootstrapper by subsystem.
    pub fn get(&self, subsystem: Subsystem) -> Option<Arc<dyn Bootstrapper>> {
        self.bootstrappers.read().get(&subsystem).cloned()
    }

    /// Registered subsystems in apply order.
    #[must_use]
    pub fn subsystems(&self) -> Vec<Subsystem> {
        self.bootstrappers.read().keys().copied().collect()
    }

    /// Every configuration key owned by a registered bootstrapper.
    #[must_use]
    pub fn owned_keys(&self) -> Vec<&'static str> {
        self.bootstrappers
            .read()
            .values()
            .flat_map(|b| b.owned_keys().iter().copied())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bootstrappers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bootstrappers.read().is_empty()
    }

    fn ordered(&self) -> Vec<Arc<dyn Bootstrapper>> {
        self.bootstrappers.read().values().cloned().collect()
    }

    /// Applies every bootstrapper for `tenant`, in order.
    ///
    /// # Errors
    ///
    /// Returns the first [`ApplyError`]; every bootstrapper applied before
    /// it has been reverted by then.
    pub async fn enter(&self, tenant: &TenantId) -> Result<Vec<(Subsystem, ScopedSettings)>, ApplyError> {
        let order = self.ordered();
        let mut applied: Vec<(Subsystem, ScopedSettings)> = Vec::with_capacity(order.len());

        for (position, bootstrapper) in order.iter().enumerate() {
            match bootstrapper.apply(tenant).await {
                Ok(settings) => applied.push((bootstrapper.subsystem(), settings)),
                Err(err) => {
                    for earlier in order[..position].iter().rev() {
                        if let Err(revert_err) = earlier.revert().await {
                            telemetry::record_revert_failure(revert_err.subsystem);
                            warn!(error = %revert_err, "rollback revert failed");
                        }
                    }
                    return Err(err);
                }
            }
        }
        Ok(applied)
    }

    /// Reverts every bootstrapper in reverse order, collecting failures.
    pub async fn exit(&self) -> Vec<RevertError> {
        let order = self.ordered();
        let mut failures = Vec::new();
        for bootstrapper in order.iter().rev() {
            if let Err(err) = bootstrapper.revert().await {
                telemetry::record_revert_failure(err.subsystem);
                failures.push(err);
            }
        }
        failures
    }
}

impl Default for BootstrapperChain {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BootstrapperChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BootstrapperChain")
            .field("subsystems", &self.subsystems())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
