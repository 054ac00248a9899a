//! Live configuration and the neutral snapshot.
//!
//! [`ConfigStore`] holds the values the application reads at any moment.
//! [`SnapshotStore`] holds the values that were in effect before any tenant
//! context was ever entered, and is the fallback source for revert.

pub mod snapshot;
pub mod store;

pub use snapshot::SnapshotStore;
pub use store::ConfigStore;
