//! SeaORM-backed tenant connection.

use crate::error::backend_error;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, DatabaseConnection};
use tenantstore_core::{BackendError, TenantConnection, TenantKey};
use tracing::debug;

/// A pooled SeaORM connection, scoped to one tenant or to the master.
///
/// Derefs to [`DatabaseConnection`], so entities can be queried directly:
///
/// ```rust,ignore
/// let conn = cache.get("acme").await?;
/// let users = user::Entity::find().all(conn.as_ref()).await?;
/// ```
#[derive(Debug, Clone)]
pub struct SeaOrmConnection {
    conn: DatabaseConnection,
    tenant: Option<TenantKey>,
}

impl SeaOrmConnection {
    /// Wrap a master connection.
    pub fn master(conn: DatabaseConnection) -> Self {
        Self { conn, tenant: None }
    }

    /// Wrap a connection scoped to `tenant`.
    pub fn tenant(conn: DatabaseConnection, tenant: TenantKey) -> Self {
        Self {
            conn,
            tenant: Some(tenant),
        }
    }

    /// The tenant this connection is scoped to; `None` for the master.
    pub fn tenant_key(&self) -> Option<&TenantKey> {
        self.tenant.as_ref()
    }

    /// Get a reference to the underlying connection.
    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// The SQL dialect of the connection.
    pub fn backend(&self) -> DatabaseBackend {
        self.conn.get_database_backend()
    }
}

#[async_trait]
impl TenantConnection for SeaOrmConnection {
    async fn ping(&self) -> Result<(), BackendError> {
        self.conn.ping().await.map_err(backend_error)
    }

    async fn close(&self) -> Result<(), BackendError> {
        match &self.tenant {
            Some(tenant) => debug!(tenant = %tenant, "Closing tenant pool"),
            None => debug!("Closing master pool"),
        }
        // Clones share the pool, so closing one closes them all.
        self.conn.clone().close().await.map_err(backend_error)
    }
}

impl std::ops::Deref for SeaOrmConnection {
    type Target = DatabaseConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl AsRef<DatabaseConnection> for SeaOrmConnection {
    fn as_ref(&self) -> &DatabaseConnection {
        &self.conn
    }
}
