//! Connection lifecycle guard.
//!
//! Takes a census of open backend connections before a tenant context is
//! entered and compares against it after the context exits. Connections
//! opened under the tenant alias that are still open after exit are
//! force-closed; any growth over the census is reported as a leak.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use super::registry::{ConnectionId, ConnectionRegistry};
use crate::config::GuardConfig;
use crate::telemetry;

/// Open connections at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionCensus {
    pub total: usize,
    pub by_alias: BTreeMap<String, usize>,
    pub ids: BTreeSet<ConnectionId>,
}

/// More connections are open after exit than before enter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeakDetected {
    /// Connections over the pre-enter count.
    pub delta: usize,
    /// Names of connections opened during the context and still open.
    pub connections: Vec<String>,
}

impl fmt::Display for LeakDetected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} connection(s) leaked: {}",
            self.delta,
            self.connections.join(", ")
        )
    }
}

/// Outcome of one post-exit check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LeakReport {
    /// Tenant-alias connections force-closed by the guard.
    pub purged: Vec<String>,
    /// Growth that survived the purge, if any.
    pub leak: Option<LeakDetected>,
}

impl LeakReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.purged.is_empty() && self.leak.is_none()
    }
}

/// Wraps every enter/exit cycle with a before/after connection census.
#[derive(Debug)]
pub struct ConnectionGuard {
    registry: Arc<ConnectionRegistry>,
    config: GuardConfig,
}

impl ConnectionGuard {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, config: GuardConfig) -> Self {
        Self { registry, config }
    }

    #[must_use]
    pub fn tenant_alias(&self) -> &str {
        &self.config.tenant_alias
    }

    #[must_use]
    pub fn default_alias(&self) -> &str {
        &self.config.default_alias
    }

    #[must_use]
    pub fn census(&self) -> ConnectionCensus {
        let connections = self.registry.connections();
        ConnectionCensus {
            total: connections.len(),
            by_alias: self.registry.counts_by_alias(),
            ids: connections.iter().map(|c| c.id).collect(),
        }
    }

    /// Records the connection count before a context is entered.
    #[must_use]
    pub fn before_enter(&self) -> ConnectionCensus {
        self.census()
    }

    /// Purges tenant-alias connections and reports growth over `before`.
    pub fn after_exit(&self, before: &ConnectionCensus) -> LeakReport {
        let purged: Vec<String> = if self.config.purge_tenant_connections {
            self.registry
                .close_alias(&self.config.tenant_alias)
                .iter()
                .map(|c| c.name())
                .collect()
        } else {
            Vec::new()
        };
        if !purged.is_empty() {
            telemetry::record_purged(purged.len());
            warn!(
                target: telemetry::TRANSITION_TARGET,
                count = purged.len(),
                connections = %purged.join(", "),
                "force-closed tenant-scoped connections after exit"
            );
        }

        let remaining = self.registry.connections();
        let delta = remaining.len().saturating_sub(before.total);
        let leak = (delta > 0).then(|| LeakDetected {
            delta,
            connections: remaining
                .iter()
                .filter(|c| !before.ids.contains(&c.id))
                .map(|c| c.name())
                .collect(),
        });
        if let Some(leak) = &leak {
            telemetry::record_leak();
            warn!(
                target: telemetry::TRANSITION_TARGET,
                delta = leak.delta,
                connections = %leak.connections.join(", "),
                "connection count grew across tenant context"
            );
        }

        LeakReport { purged, leak }
    }
}
