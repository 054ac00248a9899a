//! Backend connections: the registry of open connections, the client handle
//! pool, and the lifecycle guard that keeps tenant connections from
//! outliving their context.

pub mod guard;
pub mod pool;
pub mod registry;

pub use guard::{ConnectionCensus, ConnectionGuard, LeakDetected, LeakReport};
pub use pool::{fingerprint, ClientHandle, ClientPool, ConnectTarget, Connector, NullConnector, PoolStats};
pub use registry::{BackendConnection, ConnectionId, ConnectionRegistry};
