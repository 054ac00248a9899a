//! Logging setup and metric names.
//!
//! Transition events are emitted on the [`TRANSITION_TARGET`] tracing target
//! with `tenant`, `subsystem`, `action`, `outcome` and `scoped_value` fields,
//! so they can be filtered independently of the rest of the crate.
//! Counters go through the `metrics` facade; without an installed recorder
//! they are no-ops.

use std::fmt::Display;
use std::time::Duration;

use switchyard_core::{Subsystem, TenantId};
use tracing::{debug, warn};

/// Tracing target for bootstrapper and context transitions.
pub const TRANSITION_TARGET: &str = "switchyard::transition";

pub const CONTEXT_ENTER_TOTAL: &str = "switchyard_context_enter_total";
pub const CONTEXT_EXIT_TOTAL: &str = "switchyard_context_exit_total";
pub const CONTEXT_ENTER_SECONDS: &str = "switchyard_context_enter_seconds";
pub const REVERT_FAILURES_TOTAL: &str = "switchyard_revert_failures_total";
pub const CONNECTION_LEAKS_TOTAL: &str = "switchyard_connection_leaks_total";
pub const CONNECTIONS_PURGED_TOTAL: &str = "switchyard_connections_purged_total";

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Installs the global tracing subscriber.
///
/// The filter comes from `RUST_LOG`, falling back to `default_directive`.
///
/// # Errors
///
/// Fails if a global subscriber is already installed.
pub fn init_tracing(format: LogFormat, default_directive: &str) -> anyhow::Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));

    match format {
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()?,
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()?,
    }
    Ok(())
}

/// Step of a bootstrapper transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Apply,
    Revert,
}

impl Action {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Action::Apply => "apply",
            Action::Revert => "revert",
        }
    }
}

/// Logs one bootstrapper transition. Failures are logged at WARN.
pub fn log_transition(
    tenant: Option<&TenantId>,
    subsystem: Subsystem,
    action: Action,
    outcome: Result<(), &dyn Display>,
    scoped_value: &dyn Display,
) {
    let tenant = tenant.map_or("-", TenantId::as_str);
    match outcome {
        Ok(()) => debug!(
            target: TRANSITION_TARGET,
            tenant,
            subsystem = subsystem.as_str(),
            action = action.as_str(),
            outcome = "ok",
            scoped_value = %scoped_value,
            "bootstrapper transition"
        ),
        Err(error) => warn!(
            target: TRANSITION_TARGET,
            tenant,
            subsystem = subsystem.as_str(),
            action = action.as_str(),
            outcome = "error",
            scoped_value = %scoped_value,
            error = %error,
            "bootstrapper transition failed"
        ),
    }
}

pub(crate) fn record_enter(outcome: &'static str, elapsed: Duration) {
    metrics::counter!(CONTEXT_ENTER_TOTAL, "outcome" => outcome).increment(1);
    metrics::histogram!(CONTEXT_ENTER_SECONDS).record(elapsed.as_secs_f64());
}

pub(crate) fn record_exit() {
    metrics::counter!(CONTEXT_EXIT_TOTAL).increment(1);
}

pub(crate) fn record_revert_failure(subsystem: Subsystem) {
    metrics::counter!(REVERT_FAILURES_TOTAL, "subsystem" => subsystem.as_str()).increment(1);
}

pub(crate) fn record_leak() {
    metrics::counter!(CONNECTION_LEAKS_TOTAL).increment(1);
}

pub(crate) fn record_purged(count: usize) {
    metrics::counter!(CONNECTIONS_PURGED_TOTAL).increment(u64::try_from(count).unwrap_or(u64::MAX));
}
