//! Enter/exit stress harness.
//!
//! Cycles a manager through many tenant contexts and checks that the number
//! of open backend connections after the run equals the number before it:
//! no growth from leaked tenant handles, no shrinkage from neutral handles
//! that were never reopened.

use std::time::Instant;

use serde::Serialize;
use switchyard_core::{Subsystem, TenantId, TenantIdError};
use tracing::{info, warn};

use crate::manager::TenantContextManager;

/// How many cycles to run and over which tenants.
#[derive(Debug, Clone)]
pub struct StressOptions {
    pub cycles: usize,
    /// Tenants are visited round-robin.
    pub tenants: Vec<TenantId>,
    /// Open one raw tenant-alias connection per cycle that nothing closes.
    pub simulate_leak: bool,
}

/// `count` tenant ids named `{prefix}{n}`, starting at 0.
///
/// # Errors
///
/// Returns [`TenantIdError`] if `prefix` produces an invalid id.
pub fn tenant_ids(prefix: &str, count: usize) -> Result<Vec<TenantId>, TenantIdError> {
    (0..count).map(|n| TenantId::new(format!("{prefix}{n}"))).collect()
}

/// Outcome of one stress run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StressReport {
    pub cycles: usize,
    pub tenants: usize,
    pub persistent: bool,
    pub baseline_connections: usize,
    pub final_connections: usize,
    pub apply_failures: usize,
    pub client_failures: usize,
    pub revert_failures: usize,
    pub leak_events: usize,
    pub purged: usize,
    pub pool_hits: u64,
    pub pool_misses: u64,
    pub elapsed_ms: u64,
}

impl StressReport {
    /// Open connections after the run match the baseline exactly.
    #[must_use]
    pub fn leak_bound_held(&self) -> bool {
        self.final_connections == self.baseline_connections
    }

    /// Share of client acquisitions served from the pool.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn reuse_ratio(&self) -> f64 {
        let total = self.pool_hits + self.pool_misses;
        if total == 0 {
            return 0.0;
        }
        self.pool_hits as f64 / total as f64
    }
}

/// Runs `options.cycles` enter/work/exit cycles against `manager`.
pub async fn run(manager: &TenantContextManager, options: &StressOptions) -> StressReport {
    let started = Instant::now();
    let mut report = StressReport {
        tenants: options.tenants.len(),
        persistent: manager.pool().is_persistent(),
        baseline_connections: manager.registry().count(),
        ..StressReport::default()
    };
    let before = manager.pool().stats();

    for (cycle, tenant) in options
        .tenants
        .iter()
        .cycle()
        .take(options.cycles)
        .enumerate()
    {
        let context = match manager.enter(tenant.clone()).await {
            Ok(context) => context,
            Err(e) => {
                warn!(cycle, tenant = %tenant, error = %e, "enter failed");
                report.apply_failures += 1;
                report.cycles += 1;
                continue;
            }
        };

        for subsystem in [Subsystem::Cache, Subsystem::Store, Subsystem::Cache] {
            if let Err(e) = manager.client(&context, subsystem).await {
                warn!(cycle, tenant = %tenant, %subsystem, error = %e, "client acquisition failed");
                report.client_failures += 1;
            }
        }
        if options.simulate_leak {
            manager
                .registry()
                .register(Subsystem::Store, manager.tenant_alias(), "unpooled");
        }

        let exit = manager.exit().await;
        report.revert_failures += exit.revert_failures.len();
        report.purged += exit.leak.purged.len();
        if exit.leak.leak.is_some() {
            report.leak_events += 1;
        }
        report.cycles += 1;

        if (cycle + 1) % 1000 == 0 {
            info!(cycles = cycle + 1, open = manager.registry().count(), "stress progress");
        }
    }

    let after = manager.pool().stats();
    report.final_connections = manager.registry().count();
    report.pool_hits = after.hits - before.hits;
    report.pool_misses = after.misses - before.misses;
    report.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    report
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::SwitchyardConfig;
    use crate::connection::NullConnector;
    use crate::ownership::NoopOwnershipSync;

    fn manager(config: &SwitchyardConfig) -> TenantContextManager {
        TenantContextManager::new(config, Arc::new(NullConnector), Arc::new(NoopOwnershipSync))
            .unwrap()
    }

    fn options(cycles: usize, simulate_leak: bool) -> StressOptions {
        StressOptions {
            cycles,
            tenants: tenant_ids("tenant", 3).unwrap(),
            simulate_leak,
        }
    }

    #[test]
    fn tenant_ids_are_numbered() {
        let ids = tenant_ids("t", 3).unwrap();
        let names: Vec<&str> = ids.iter().map(TenantId::as_str).collect();
        assert_eq!(names, ["t0", "t1", "t2"]);
        assert!(tenant_ids("bad prefix", 1).is_err());
    }

    #[tokio::test]
    async fn clean_run_holds_bound() {
        let manager = manager(&SwitchyardConfig::default());
        let report = run(&manager, &options(30, false)).await;

        assert_eq!(report.cycles, 30);
        assert_eq!(report.apply_failures, 0);
        assert_eq!(report.leak_events, 0);
        assert_eq!(report.purged, 0);
        assert!(report.leak_bound_held());
        assert!(report.pool_hits > 0);
        assert!(report.reuse_ratio() > 0.0);
        assert!(manager.is_neutral());
    }

    #[tokio::test]
    async fn simulated_leak_is_purged() {
        let manager = manager(&SwitchyardConfig::default());
        let report = run(&manager, &options(12, true)).await;

        assert_eq!(report.purged, 12);
        assert_eq!(report.leak_events, 0);
        assert!(report.leak_bound_held());
    }

    #[tokio::test]
    async fn simulated_leak_reported_without_purge() {
        let mut config = SwitchyardConfig::default();
        config.guard.purge_tenant_connections = false;
        let manager = manager(&config);
        let report = run(&manager, &options(5, true)).await;

        assert_eq!(report.leak_events, 5);
        assert_eq!(report.final_connections, report.baseline_connections + 5);
        assert!(!report.leak_bound_held());
    }

    #[tokio::test]
    async fn persistent_pool_purged_each_cycle() {
        let mut config = SwitchyardConfig::default();
        config.pool.persistent = true;
        let manager = manager(&config);
        let report = run(&manager, &options(20, false)).await;

        assert!(report.persistent);
        assert!(report.purged > 0);
        assert_eq!(report.leak_events, 0);
        assert!(report.leak_bound_held());
    }

    async fn open_neutral_clients(manager: &TenantContextManager) {
        for subsystem in [Subsystem::Cache, Subsystem::Session, Subsystem::Store] {
            manager.neutral_client(subsystem).await.unwrap();
        }
    }

    #[tokio::test]
    async fn neutral_baseline_survives_the_run() {
        let manager = manager(&SwitchyardConfig::default());
        open_neutral_clients(&manager).await;

        let report = run(&manager, &options(30, false)).await;
        assert_eq!(report.baseline_connections, 3);
        assert_eq!(report.final_connections, 3);
        assert_eq!(report.leak_events, 0);
        assert_eq!(report.revert_failures, 0);
        assert!(report.leak_bound_held());
        assert_eq!(manager.registry().count_by_alias("default"), 3);
    }

    #[tokio::test]
    async fn persistent_neutral_baseline_is_adopted_not_duplicated() {
        let mut config = SwitchyardConfig::default();
        config.pool.persistent = true;
        let manager = manager(&config);
        open_neutral_clients(&manager).await;

        let report = run(&manager, &options(30, false)).await;
        assert_eq!(report.baseline_connections, 3);
        assert_eq!(report.final_connections, 3);
        assert!(report.leak_bound_held());
    }

    #[test]
    fn shrinking_below_baseline_breaks_bound() {
        let report = StressReport {
            baseline_connections: 3,
            final_connections: 0,
            ..StressReport::default()
        };
        assert!(!report.leak_bound_held());
    }

    #[tokio::test]
    async fn no_tenants_runs_nothing() {
        let manager = manager(&SwitchyardConfig::default());
        let report = run(
            &manager,
            &StressOptions {
                cycles: 10,
                tenants: Vec::new(),
                simulate_leak: false,
            },
        )
        .await;
        assert_eq!(report.cycles, 0);
        assert_eq!(report.reuse_ratio(), 0.0);
    }
}
