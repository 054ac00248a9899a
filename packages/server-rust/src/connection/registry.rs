//! Registry of open backend connections.
//!
//! Every physical connection a client handle opens is registered here with
//! the alias it was opened under, so the lifecycle guard can count them and
//! force-close the ones that belong to a tenant scope.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use switchyard_core::Subsystem;

/// Unique identifier for a backend connection, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One open connection to a shared backend.
#[derive(Debug)]
pub struct BackendConnection {
    pub id: ConnectionId,
    pub subsystem: Subsystem,
    /// `tenant` for connections opened under scoped settings, `default` otherwise.
    pub alias: String,
    /// Fingerprint of the settings the connection was opened with.
    pub fingerprint: String,
    pub opened_at: Instant,
    closed: AtomicBool,
}

impl BackendConnection {
    /// Human-readable identity, e.g. `store/tenant#12`.
    #[must_use]
    pub fn name(&self) -> String {
        format!("{}/{}{}", self.subsystem, self.alias, self.id)
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

/// Thread-safe registry of open backend connections.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<BackendConnection>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    ///
    /// Connection IDs start at 1 (0 is reserved as "no connection").
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a newly opened connection.
    pub fn register(
        &self,
        subsystem: Subsystem,
        alias: &str,
        fingerprint: &str,
    ) -> Arc<BackendConnection> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Arc::new(BackendConnection {
            id,
            subsystem,
            alias: alias.to_string(),
            fingerprint: fingerprint.to_string(),
            opened_at: Instant::now(),
            closed: AtomicBool::new(false),
        });
        self.connections.insert(id, Arc::clone(&connection));
        connection
    }

    /// Closes and removes a connection, returning it if it was open.
    pub fn close(&self, id: ConnectionId) -> Option<Arc<BackendConnection>> {
        self.connections.remove(&id).map(|(_, connection)| {
            connection.close();
            connection
        })
    }

    pub fn get(&self, id: ConnectionId) -> Option<Arc<BackendConnection>> {
        self.connections.get(&id).map(|r| r.value().clone())
    }

    /// Returns the total number of open connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    #[must_use]
    pub fn count_by_alias(&self, alias: &str) -> usize {
        self.connections
            .iter()
            .filter(|entry| entry.value().alias == alias)
            .count()
    }

    /// Open connection counts keyed by alias.
    #[must_use]
    pub fn counts_by_alias(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in &self.connections {
            *counts.entry(entry.value().alias.clone()).or_insert(0) += 1;
        }
        counts
    }

    /// Oldest open connection with `fingerprint`, if any.
    #[must_use]
    pub fn find_open(&self, fingerprint: &str) -> Option<Arc<BackendConnection>> {
        self.connections
            .iter()
            .filter(|entry| entry.value().fingerprint == fingerprint && entry.value().is_open())
            .map(|entry| entry.value().clone())
            .min_by_key(|c| c.id)
    }

    /// Returns all open connections, ordered by id.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<BackendConnection>> {
        let mut all: Vec<_> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        all.sort_by_key(|c| c.id);
        all
    }

    /// Closes and returns every connection opened under `alias`.
    pub fn close_alias(&self, alias: &str) -> Vec<Arc<BackendConnection>> {
        let ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|entry| entry.value().alias == alias)
            .map(|entry| *entry.key())
            .collect();
        ids.into_iter().filter_map(|id| self.close(id)).collect()
    }

    /// Closes and returns all connections. Used during shutdown.
    pub fn drain_all(&self) -> Vec<Arc<BackendConnection>> {
        let ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect();
        ids.into_iter().filter_map(|id| self.close(id)).collect()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
