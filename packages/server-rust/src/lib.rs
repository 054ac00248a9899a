//! Switchyard Server: tenant context manager, resource bootstrappers, and connection lifecycle guard.

pub mod bootstrap;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod ownership;
pub mod pipeline;
pub mod resolver;
pub mod settings;
pub mod stress;
pub mod telemetry;

pub use bootstrap::{Bootstrapper, BootstrapperChain};
pub use config::SwitchyardConfig;
pub use error::{ApplyError, ConfigError, ContextError, ResolutionError, RevertError};
pub use manager::{ContextState, ExitReport, TenantContextManager};
pub use pipeline::{TenantContextLayer, TenantContextService};
pub use resolver::{InMemoryDirectory, TenantDirectory, TenantResolver};
