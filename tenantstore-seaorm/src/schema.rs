//! Schema-per-tenant provisioning
//!
//! Each tenant lives in its own PostgreSQL schema named after the tenant
//! key. On MySQL the closest equivalent, a database, is used instead.

use crate::connection::SeaOrmConnection;
use crate::error::backend_error;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend};
use tenantstore_core::{BackendError, PartitionProvisioner, TenantKey};
use tracing::{debug, info};

/// Quote `name` as a PostgreSQL identifier, doubling embedded quotes.
///
/// ```
/// use tenantstore_seaorm::quote_identifier;
///
/// assert_eq!(quote_identifier("acme"), "\"acme\"");
/// assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
/// ```
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn quote_mysql_identifier(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Creates the tenant's schema through the master connection.
#[derive(Debug, Clone, Default)]
pub struct SchemaProvisioner {
    cascade_drop: bool,
}

impl SchemaProvisioner {
    /// Create a provisioner. Drops are restrictive by default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop schemas together with everything in them.
    pub fn cascade_drop(mut self, cascade: bool) -> Self {
        self.cascade_drop = cascade;
        self
    }

    /// The statement creating `key`'s partition on `backend`.
    pub fn create_statement(
        &self,
        backend: DatabaseBackend,
        key: &TenantKey,
    ) -> Result<String, BackendError> {
        match backend {
            DatabaseBackend::Postgres => Ok(format!(
                "CREATE SCHEMA IF NOT EXISTS {}",
                quote_identifier(key.as_str())
            )),
            DatabaseBackend::MySql => Ok(format!(
                "CREATE DATABASE IF NOT EXISTS {}",
                quote_mysql_identifier(key.as_str())
            )),
            DatabaseBackend::Sqlite => Err(unsupported(backend)),
        }
    }

    /// The statement dropping `key`'s partition on `backend`.
    pub fn drop_statement(
        &self,
        backend: DatabaseBackend,
        key: &TenantKey,
    ) -> Result<String, BackendError> {
        match backend {
            DatabaseBackend::Postgres => Ok(format!(
                "DROP SCHEMA IF EXISTS {}{}",
                quote_identifier(key.as_str()),
                if self.cascade_drop { " CASCADE" } else { "" }
            )),
            DatabaseBackend::MySql => Ok(format!(
                "DROP DATABASE IF EXISTS {}",
                quote_mysql_identifier(key.as_str())
            )),
            DatabaseBackend::Sqlite => Err(unsupported(backend)),
        }
    }

    /// Drop `key`'s partition. Remove the tenant from the cache first.
    pub async fn drop_partition(
        &self,
        master: &SeaOrmConnection,
        key: &TenantKey,
    ) -> Result<(), BackendError> {
        let statement = self.drop_statement(master.backend(), key)?;
        master
            .execute_unprepared(&statement)
            .await
            .map_err(backend_error)?;
        info!(tenant = %key, "Tenant partition dropped");
        Ok(())
    }
}

fn unsupported(backend: DatabaseBackend) -> BackendError {
    BackendError::Unsupported(format!("{:?} has no schema-level partitions", backend))
}

#[async_trait]
impl PartitionProvisioner<SeaOrmConnection> for SchemaProvisioner {
    async fn ensure(&self, master: &SeaOrmConnection, key: &TenantKey) -> Result<(), BackendError> {
        let statement = self.create_statement(master.backend(), key)?;
        debug!(tenant = %key, statement = %statement, "Ensuring tenant schema");
        master
            .execute_unprepared(&statement)
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> TenantKey {
        TenantKey::new(raw).unwrap()
    }

    #[test]
    fn test_postgres_statements() {
        let provisioner = SchemaProvisioner::new();
        assert_eq!(
            provisioner
                .create_statement(DatabaseBackend::Postgres, &key("acme"))
                .unwrap(),
            "CREATE SCHEMA IF NOT EXISTS \"acme\""
        );
        assert_eq!(
            provisioner
                .drop_statement(DatabaseBackend::Postgres, &key("acme"))
                .unwrap(),
            "DROP SCHEMA IF EXISTS \"acme\""
        );
        assert_eq!(
            provisioner
                .cascade_drop(true)
                .drop_statement(DatabaseBackend::Postgres, &key("acme"))
                .unwrap(),
            "DROP SCHEMA IF EXISTS \"acme\" CASCADE"
        );
    }

    #[test]
    fn test_hostile_key_stays_quoted() {
        let statement = SchemaProvisioner::new()
            .create_statement(DatabaseBackend::Postgres, &key("x\"; DROP SCHEMA public; --"))
            .unwrap();
        assert_eq!(
            statement,
            "CREATE SCHEMA IF NOT EXISTS \"x\"\"; DROP SCHEMA public; --\""
        );
    }

    #[test]
    fn test_mysql_uses_databases() {
        let statement = SchemaProvisioner::new()
            .create_statement(DatabaseBackend::MySql, &key("acme"))
            .unwrap();
        assert_eq!(statement, "CREATE DATABASE IF NOT EXISTS `acme`");
    }

    #[test]
    fn test_sqlite_unsupported() {
        let err = SchemaProvisioner::new()
            .create_statement(DatabaseBackend::Sqlite, &key("acme"))
            .unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
    }
}
