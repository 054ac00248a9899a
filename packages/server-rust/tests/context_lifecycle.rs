//! End-to-end enter/exit behavior of the tenant context manager.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use switchyard_core::{keys, SettingValue, Subsystem, TenantId};
use switchyard_server::config::SwitchyardConfig;
use switchyard_server::connection::{ConnectTarget, Connector, NullConnector};
use switchyard_server::error::{ApplyFailure, ConnectError};
use switchyard_server::ownership::NoopOwnershipSync;
use switchyard_server::stress::{self, StressOptions};
use switchyard_server::{ContextError, ContextState, TenantContextManager};

/// Refuses every connection scoped to one tenant.
struct RefuseTenant(&'static str);

#[async_trait]
impl Connector for RefuseTenant {
    async fn connect(&self, target: &ConnectTarget) -> Result<(), ConnectError> {
        match &target.tenant {
            Some(t) if t.as_str() == self.0 => Err(ConnectError::Refused {
                target: format!("{}/{}", target.subsystem, target.alias),
                reason: "connection refused".to_string(),
            }),
            _ => Ok(()),
        }
    }
}

fn tenant(id: &str) -> TenantId {
    TenantId::new(id).unwrap()
}

fn manager_with(config: &SwitchyardConfig, connector: Arc<dyn Connector>) -> TenantContextManager {
    TenantContextManager::new(config, connector, Arc::new(NoopOwnershipSync)).unwrap()
}

fn manager() -> TenantContextManager {
    manager_with(&SwitchyardConfig::default(), Arc::new(NullConnector))
}

#[tokio::test]
async fn thousand_cycles_over_ten_tenants_hold_leak_bound() {
    let manager = manager();
    let report = stress::run(
        &manager,
        &StressOptions {
            cycles: 1000,
            tenants: stress::tenant_ids("tenant", 10).unwrap(),
            simulate_leak: false,
        },
    )
    .await;

    assert_eq!(report.cycles, 1000);
    assert_eq!(report.apply_failures, 0);
    assert_eq!(report.revert_failures, 0);
    assert_eq!(report.leak_events, 0);
    assert_eq!(report.final_connections, report.baseline_connections);
    assert!(manager.is_neutral());
}

#[tokio::test]
async fn persistent_connections_do_not_accumulate() {
    let mut config = SwitchyardConfig::default();
    config.pool.persistent = true;
    let manager = manager_with(&config, Arc::new(NullConnector));

    let report = stress::run(
        &manager,
        &StressOptions {
            cycles: 200,
            tenants: stress::tenant_ids("tenant", 10).unwrap(),
            simulate_leak: true,
        },
    )
    .await;

    assert!(report.purged >= 200);
    assert_eq!(report.leak_events, 0);
    assert!(report.leak_bound_held());
    assert_eq!(manager.registry().count_by_alias(manager.tenant_alias()), 0);
}

#[tokio::test]
async fn neutral_connections_are_restored_after_every_cycle() {
    for persistent in [false, true] {
        let mut config = SwitchyardConfig::default();
        config.pool.persistent = persistent;
        let manager = manager_with(&config, Arc::new(NullConnector));
        for subsystem in [Subsystem::Cache, Subsystem::Session, Subsystem::Store] {
            manager.neutral_client(subsystem).await.unwrap();
        }

        let report = stress::run(
            &manager,
            &StressOptions {
                cycles: 100,
                tenants: stress::tenant_ids("tenant", 10).unwrap(),
                simulate_leak: false,
            },
        )
        .await;

        assert_eq!(report.baseline_connections, 3, "persistent={persistent}");
        assert_eq!(report.final_connections, 3, "persistent={persistent}");
        assert_eq!(report.leak_events, 0);
        assert_eq!(report.revert_failures, 0);
        assert!(report.leak_bound_held());
    }
}

#[tokio::test]
async fn abandoned_scoped_work_is_released() {
    let manager = Arc::new(manager());
    let before = manager.config_store().snapshot();

    let abandoned = tokio::time::timeout(
        Duration::from_millis(20),
        manager.scoped(tenant("acme"), |_ctx| async move {
            tokio::time::sleep(Duration::from_secs(5)).await;
        }),
    )
    .await;
    assert!(abandoned.is_err());

    // Admission waits for the release, so this runs under neutral-derived values.
    let prefix = manager
        .scoped(tenant("globex"), |ctx| async move {
            ctx.cache_prefix().map(str::to_string)
        })
        .await
        .unwrap();
    assert_eq!(prefix.as_deref(), Some("tenant_globex_"));
    assert!(manager.is_neutral());
    assert_eq!(manager.config_store().snapshot(), before);
    assert_eq!(manager.registry().count(), 0);
}

#[tokio::test]
async fn refused_backend_leaves_configuration_neutral() {
    let manager = manager_with(&SwitchyardConfig::default(), Arc::new(RefuseTenant("acme")));
    let before = manager.config_store().snapshot();

    let err = manager.enter(tenant("acme")).await.unwrap_err();
    match err {
        ContextError::Apply(e) => {
            // Cache is the first subsystem that connects.
            assert_eq!(e.subsystem, Subsystem::Cache);
            assert!(matches!(e.reason, ApplyFailure::Unreachable(ConnectError::Refused { .. })));
        }
        other => panic!("unexpected error: {other}"),
    }

    // No exit call: enter already rolled everything back.
    assert_eq!(manager.state(), ContextState::Neutral);
    assert_eq!(manager.config_store().snapshot(), before);
    assert_eq!(manager.registry().count(), 0);

    let ctx = manager.enter(tenant("globex")).await.unwrap();
    assert_eq!(ctx.cache_prefix(), Some("tenant_globex_"));
    assert!(manager.exit().await.is_clean());
}

#[tokio::test]
async fn second_enter_is_rejected_while_active() {
    let manager = manager();
    manager.enter(tenant("acme")).await.unwrap();

    let err = manager.enter(tenant("acme")).await.unwrap_err();
    assert!(matches!(err, ContextError::AlreadyActive { .. }));
    assert_eq!(manager.active_tenant(), Some(tenant("acme")));

    manager.exit().await;
    assert!(manager.is_neutral());
    // A second exit is a no-op.
    assert_eq!(manager.exit().await.tenant, None);
}

#[tokio::test]
async fn reference_tenants_get_known_store_indices() {
    let mut config = SwitchyardConfig::default();
    config.store.base_offset = 10;
    config.store.pool_size = 100;
    let manager = Arc::new(manager_with(&config, Arc::new(NullConnector)));

    let acme = manager
        .scoped(tenant("acme"), |ctx| async move { ctx.store_index() })
        .await
        .unwrap();
    let globex = manager
        .scoped(tenant("globex"), |ctx| async move { ctx.store_index() })
        .await
        .unwrap();
    assert_eq!(acme, Some(24));
    assert_eq!(globex, Some(28));
    assert_eq!(
        manager.config_store().get(keys::STORE_DATABASE),
        Some(SettingValue::from(0_i64))
    );
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn enter_exit_restores_every_owned_key(
        ids in proptest::collection::vec("[a-zA-Z0-9_-]{1,24}", 1..6),
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let manager = manager();
        let before = manager.config_store().snapshot();

        for id in ids {
            let tenant = TenantId::new(id).unwrap();
            let ctx = rt.block_on(manager.enter(tenant.clone())).unwrap();
            prop_assert_eq!(ctx.subsystems().count(), 5);
            let index = ctx.store_index().unwrap();
            prop_assert!((1..16).contains(&index));

            let report = rt.block_on(manager.exit());
            prop_assert_eq!(report.tenant, Some(tenant));
            prop_assert!(report.revert_failures.is_empty());
            prop_assert_eq!(manager.config_store().snapshot(), before.clone());
        }
    }
}
