//! Error taxonomy for tenant context switching.
//!
//! - [`ResolutionError`]: no tenant for the request; the caller decides.
//! - [`ApplyError`]: a bootstrapper could not scope its subsystem; fatal to
//!   the request, already rolled back when it reaches the caller.
//! - [`RevertError`]: a bootstrapper could not return to neutral; collected,
//!   never blocks the other bootstrappers.
//! - Leaks are reported as [`LeakDetected`](crate::connection::LeakDetected)
//!   values, not errors.

use switchyard_core::{Subsystem, TenantId, TenantIdError};

/// Rejected configuration, reported before any tenant is served.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("store pool_size must be greater than zero")]
    ZeroPoolSize,
    #[error("store base_offset {base_offset} + pool_size {pool_size} overflows i64")]
    IndexOverflow { base_offset: i64, pool_size: u32 },
    #[error("{field} pattern {pattern:?} does not contain {{tenant}}")]
    MissingPlaceholder { field: &'static str, pattern: String },
    #[error("tenant connection alias must not be empty")]
    EmptyTenantAlias,
    #[error("tenant and default connection aliases must differ: {0:?}")]
    AliasCollision(String),
    #[error("apply_timeout must be greater than zero")]
    ZeroApplyTimeout,
}

/// The tenant could not be derived from the request.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("no tenant is mapped to host {host:?}")]
    NotFound { host: String },
    #[error("override names unknown tenant {tenant:?}")]
    UnknownOverride { tenant: String },
    #[error("override is not a valid tenant id: {0}")]
    InvalidOverride(#[from] TenantIdError),
}

/// A backend refused or dropped a connection.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectError {
    #[error("connection to {target} refused: {reason}")]
    Refused { target: String, reason: String },
    #[error("disconnect from {target} failed: {reason}")]
    Disconnect { target: String, reason: String },
}

/// Why a bootstrapper could not apply its tenant-scoped configuration.
#[derive(Debug, thiserror::Error)]
pub enum ApplyFailure {
    #[error("backend unreachable: {0}")]
    Unreachable(#[from] ConnectError),
    #[error("timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
    #[error("invalid scoped value for {key}: {detail}")]
    InvalidScopedValue { key: &'static str, detail: String },
    #[error("storage root provisioning failed: {0}")]
    Provision(#[from] std::io::Error),
}

/// A bootstrapper failed to apply; names the failing subsystem.
#[derive(Debug, thiserror::Error)]
#[error("{subsystem} bootstrapper failed to apply tenant {tenant}: {reason}")]
pub struct ApplyError {
    pub subsystem: Subsystem,
    pub tenant: TenantId,
    #[source]
    pub reason: ApplyFailure,
    /// Set when the failing bootstrapper could not fully roll itself back.
    pub rollback: Option<RevertError>,
}

impl ApplyError {
    #[must_use]
    pub fn new(subsystem: Subsystem, tenant: TenantId, reason: impl Into<ApplyFailure>) -> Self {
        Self {
            subsystem,
            tenant,
            reason: reason.into(),
            rollback: None,
        }
    }

    #[must_use]
    pub fn with_rollback(mut self, rollback: Option<RevertError>) -> Self {
        self.rollback = rollback;
        self
    }
}

/// Why a bootstrapper could not fully restore neutral configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RevertFailure {
    #[error("failed to release cached client: {0}")]
    Release(#[from] ConnectError),
    #[error("failed to reopen neutral client: {0}")]
    Reopen(ConnectError),
    #[error("reopening neutral client timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

/// A bootstrapper failed (partially) to revert.
///
/// Configuration keys are always written back before handles are touched,
/// so this reports a backend handle problem, not a mis-scoped key.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{subsystem} bootstrapper failed to revert: {reason}")]
pub struct RevertError {
    pub subsystem: Subsystem,
    #[source]
    pub reason: RevertFailure,
}

/// A second bootstrapper was registered for an already-owned subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("subsystem {0} already has a bootstrapper")]
pub struct DuplicateSubsystem(pub Subsystem);

/// Errors returned by the tenant context manager.
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("context already active for tenant {active}; refusing to enter {requested}")]
    AlreadyActive { active: TenantId, requested: TenantId },
    #[error("context is {state}; refusing to enter {requested}")]
    Busy {
        state: &'static str,
        requested: TenantId,
    },
    #[error(transparent)]
    Apply(#[from] ApplyError),
    #[error("context manager is closed; refusing to enter {requested}")]
    Closed { requested: TenantId },
}
