//! Cached client handles keyed by subsystem and settings fingerprint.
//!
//! A handle opened under one tenant's settings is never returned for another
//! tenant's settings: the fingerprint covers every scoped value and the
//! connection alias. Bootstrappers invalidate a subsystem's handles on both
//! apply and revert so the next acquire reconnects with current settings.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use switchyard_core::{ScopedSettings, Subsystem, TenantId};
use tracing::{debug, warn};

use super::registry::{BackendConnection, ConnectionRegistry};
use crate::config::PoolConfig;
use crate::error::ConnectError;

/// Everything needed to open a connection for one subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectTarget {
    pub subsystem: Subsystem,
    pub alias: String,
    /// Tenant the settings are scoped to; `None` under neutral settings.
    pub tenant: Option<TenantId>,
    pub settings: ScopedSettings,
    pub fingerprint: String,
}

impl ConnectTarget {
    #[must_use]
    pub fn new(
        subsystem: Subsystem,
        alias: impl Into<String>,
        tenant: Option<TenantId>,
        settings: ScopedSettings,
    ) -> Self {
        let alias = alias.into();
        let fingerprint = fingerprint(subsystem, &alias, &settings);
        Self {
            subsystem,
            alias,
            tenant,
            settings,
            fingerprint,
        }
    }
}

/// Stable fingerprint of a subsystem's connection settings.
#[must_use]
pub fn fingerprint(subsystem: Subsystem, alias: &str, settings: &ScopedSettings) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(subsystem.as_str().as_bytes());
    hasher.update(b"|");
    hasher.update(alias.as_bytes());
    hasher.update(b"|");
    hasher.update(settings.canonical_json().as_bytes());
    hex::encode(&hasher.finalize().as_bytes()[..8])
}

/// Opens and closes physical connections to a backend.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a connection for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Refused`] when the backend is unreachable.
    async fn connect(&self, target: &ConnectTarget) -> Result<(), ConnectError>;

    /// Closes a connection previously opened for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectError::Disconnect`] when the close fails.
    async fn disconnect(&self, _target: &ConnectTarget) -> Result<(), ConnectError> {
        Ok(())
    }
}

/// Connector that accepts every target.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullConnector;

#[async_trait]
impl Connector for NullConnector {
    async fn connect(&self, _target: &ConnectTarget) -> Result<(), ConnectError> {
        Ok(())
    }
}

/// A cached client bound to one set of settings.
#[derive(Debug)]
pub struct ClientHandle {
    pub target: ConnectTarget,
    connection: Arc<BackendConnection>,
}

impl ClientHandle {
    #[must_use]
    pub fn connection(&self) -> &Arc<BackendConnection> {
        &self.connection
    }

    /// `false` once the underlying connection was closed or purged.
    #[must_use]
    pub fn is_open(&self) -> bool {
        self.connection.is_open()
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub hits: u64,
    pub misses: u64,
    pub pooled: usize,
}

type HandleKey = (Subsystem, String);

/// Cache of client handles shared by the bootstrappers and application code.
pub struct ClientPool {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    registry: Arc<ConnectionRegistry>,
    handles: DashMap<HandleKey, Arc<ClientHandle>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ClientPool {
    #[must_use]
    pub fn new(
        config: PoolConfig,
        connector: Arc<dyn Connector>,
        registry: Arc<ConnectionRegistry>,
    ) -> Self {
        Self {
            config,
            connector,
            registry,
            handles: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        self.config.persistent
    }

    /// Returns the cached handle for `target`, connecting if there is none.
    ///
    /// A persistent pool first adopts an open registry connection with the
    /// same fingerprint before opening a new one.
    ///
    /// # Errors
    ///
    /// Propagates the connector's error when a new connection is refused.
    pub async fn acquire(&self, target: ConnectTarget) -> Result<Arc<ClientHandle>, ConnectError> {
        let key = (target.subsystem, target.fingerprint.clone());
        if let Some(handle) = self.cached(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(handle);
        }

        let adopted = if self.config.persistent {
            self.registry.find_open(&target.fingerprint)
        } else {
            None
        };
        let opened = adopted.is_none();
        let connection = if let Some(connection) = adopted {
            self.hits.fetch_add(1, Ordering::Relaxed);
            connection
        } else {
            self.connector.connect(&target).await?;
            self.misses.fetch_add(1, Ordering::Relaxed);
            self.registry
                .register(target.subsystem, &target.alias, &target.fingerprint)
        };
        let fresh = Arc::new(ClientHandle { target, connection });

        let winner = match self.handles.entry(key) {
            Entry::Occupied(mut slot) => {
                if slot.get().is_open() {
                    Some(Arc::clone(slot.get()))
                } else {
                    slot.insert(Arc::clone(&fresh));
                    None
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&fresh));
                None
            }
        };

        if let Some(winner) = winner {
            // Lost a race with a concurrent acquire; keep the winner.
            if opened && !Arc::ptr_eq(&winner.connection, &fresh.connection) {
                self.registry.close(fresh.connection.id);
                if let Err(e) = self.connector.disconnect(&fresh.target).await {
                    warn!(connection = %fresh.connection.name(), error = %e, "failed to close duplicate connection");
                }
            }
            return Ok(winner);
        }

        if opened {
            debug!(connection = %fresh.connection.name(), "opened backend connection");
        } else {
            debug!(connection = %fresh.connection.name(), "adopted persistent connection");
        }
        Ok(fresh)
    }

    /// Targets of the open handles under neutral settings for `subsystem`.
    #[must_use]
    pub fn neutral_targets(&self, subsystem: Subsystem) -> Vec<ConnectTarget> {
        self.handles
            .iter()
            .filter(|entry| {
                entry.key().0 == subsystem
                    && entry.value().target.tenant.is_none()
                    && entry.value().is_open()
            })
            .map(|entry| entry.value().target.clone())
            .collect()
    }

    fn cached(&self, key: &HandleKey) -> Option<Arc<ClientHandle>> {
        self.handles
            .get(key)
            .map(|entry| Arc::clone(entry.value()))
            .filter(|handle| handle.is_open())
    }

    /// Drops every cached handle for `subsystem`.
    ///
    /// Connections are closed unless the pool is persistent, in which case
    /// they stay registered and open. Returns the number of handles dropped.
    ///
    /// # Errors
    ///
    /// Returns the first disconnect failure after attempting every handle.
    pub async fn invalidate(&self, subsystem: Subsystem) -> Result<usize, ConnectError> {
        let keys: Vec<HandleKey> = self
            .handles
            .iter()
            .filter(|entry| entry.key().0 == subsystem)
            .map(|entry| entry.key().clone())
            .collect();
        let dropped: Vec<Arc<ClientHandle>> = keys
            .iter()
            .filter_map(|key| self.handles.remove(key).map(|(_, handle)| handle))
            .collect();

        if self.config.persistent {
            return Ok(dropped.len());
        }

        let mut first_error = None;
        for handle in &dropped {
            self.registry.close(handle.connection.id);
            if let Err(e) = self.connector.disconnect(&handle.target).await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(dropped.len()),
        }
    }

    #[must_use]
    pub fn stats(&self) -> PoolStats {
        PoolStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            pooled: self.handles.len(),
        }
    }
}

impl std::fmt::Debug for ClientPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientPool")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
