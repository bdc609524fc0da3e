//! 租户连接管理

pub mod connector;
pub mod directory;
pub mod key;
pub mod registry;
pub mod sweeper;

pub use connector::{ConnectError, PgConnector, TenantConnector};
pub use directory::{TenantDirectory, TenantSource};
pub use key::TenantKey;
pub use registry::{
    ConnectionInfo, EvictOutcome, RegistryError, RegistryStats, TenantLease, TenantRegistry,
};
pub use sweeper::spawn_sweeper;
