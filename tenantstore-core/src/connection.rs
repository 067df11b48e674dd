//! Collaborator contracts
//!
//! The cache never talks to a database directly. Applications inject:
//!
//! - a [`ConnectionFactory`] that opens the master connection and
//!   partition-scoped tenant connections,
//! - a [`PartitionProvisioner`] that creates the tenant partition,
//! - optionally a [`SchemaMigrator`] that syncs models on a fresh connection.
//!
//! ```rust,ignore
//! struct MyFactory { pool_options: PoolOptions }
//!
//! #[async_trait]
//! impl ConnectionFactory for MyFactory {
//!     type Connection = MyConnection;
//!
//!     async fn connect_master(&self, target: &str) -> Result<MyConnection, BackendError> {
//!         MyConnection::open(target).await
//!     }
//!
//!     async fn open(&self, key: &TenantKey) -> Result<MyConnection, BackendError> {
//!         MyConnection::open_with_search_path(key.as_str()).await
//!     }
//! }
//! ```

use crate::error::BackendError;
use crate::key::TenantKey;
use async_trait::async_trait;

/// A live connection handle.
///
/// The cache shares handles between callers, so closing goes through `&self`.
/// Pool-backed connections satisfy this naturally.
#[async_trait]
pub trait TenantConnection: Send + Sync + 'static {
    /// Lightweight liveness check.
    async fn ping(&self) -> Result<(), BackendError>;

    /// Release the underlying resources.
    async fn close(&self) -> Result<(), BackendError>;
}

/// Opens connections for the master target and for tenant partitions.
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// The connection type handed out by the cache.
    type Connection: TenantConnection;

    /// Open the control-plane connection.
    async fn connect_master(&self, target: &str) -> Result<Self::Connection, BackendError>;

    /// Open a connection restricted to the partition named by `key`.
    ///
    /// Must fail rather than fall back to an unscoped connection.
    async fn open(&self, key: &TenantKey) -> Result<Self::Connection, BackendError>;
}

/// Creates tenant partitions (schemas, namespaces, databases).
///
/// `ensure` runs while the cache holds its exclusive lock, so it must not call
/// back into the cache.
#[async_trait]
pub trait PartitionProvisioner<C: TenantConnection>: Send + Sync {
    /// Create the partition if it does not exist yet. Idempotent.
    async fn ensure(&self, master: &C, key: &TenantKey) -> Result<(), BackendError>;
}

/// One-time model sync run on every freshly opened tenant connection.
#[async_trait]
pub trait SchemaMigrator<C: TenantConnection>: Send + Sync {
    /// Bring the tenant partition up to date.
    async fn migrate(&self, connection: &C, key: &TenantKey) -> Result<(), BackendError>;
}

/// Provisioner for backends where partitions need no setup, or that are
/// provisioned out of band.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProvisioner;

#[async_trait]
impl<C: TenantConnection> PartitionProvisioner<C> for NoopProvisioner {
    async fn ensure(&self, _master: &C, _key: &TenantKey) -> Result<(), BackendError> {
        Ok(())
    }
}
