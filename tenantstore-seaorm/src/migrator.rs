//! Schema migrators run on every new tenant connection.

use crate::connection::SeaOrmConnection;
use crate::error::backend_error;
use crate::schema::quote_identifier;
use async_trait::async_trait;
use sea_orm::{ConnectionTrait, DatabaseBackend, EntityTrait, Schema, Statement};
use sea_query::TableCreateStatement;
use tenantstore_core::{BackendError, SchemaMigrator, TenantKey};
use tracing::debug;

type TableFn = Box<dyn Fn(&Schema) -> TableCreateStatement + Send + Sync>;

/// Creates tables for registered SeaORM entities.
///
/// Tables are created with `IF NOT EXISTS` on the tenant connection, so they
/// land in the tenant schema through its search path. Columns added to an
/// entity later are not applied to existing tables.
///
/// ```rust,ignore
/// let migrator = EntityMigrator::new()
///     .register::<user::Entity>()
///     .register::<post::Entity>();
/// ```
#[derive(Default)]
pub struct EntityMigrator {
    tables: Vec<(String, TableFn)>,
}

impl EntityMigrator {
    /// Create a migrator with no entities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create `E`'s table on every tenant. Registration order is creation
    /// order, so register referenced tables first.
    pub fn register<E: EntityTrait + 'static>(mut self) -> Self {
        let name = E::default().table_name().to_string();
        self.tables.push((
            name,
            Box::new(|schema: &Schema| schema.create_table_from_entity(E::default())),
        ));
        self
    }

    /// Registered table names in creation order.
    pub fn tables(&self) -> Vec<&str> {
        self.tables.iter().map(|(name, _)| name.as_str()).collect()
    }

    /// The statements a migration runs on `backend`.
    pub fn statements(&self, backend: DatabaseBackend) -> Vec<Statement> {
        let schema = Schema::new(backend);
        self.tables
            .iter()
            .map(|(_, table)| {
                let mut statement = table(&schema);
                statement.if_not_exists();
                backend.build(&statement)
            })
            .collect()
    }
}

impl std::fmt::Debug for EntityMigrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityMigrator")
            .field("tables", &self.tables())
            .finish()
    }
}

#[async_trait]
impl SchemaMigrator<SeaOrmConnection> for EntityMigrator {
    async fn migrate(&self, connection: &SeaOrmConnection, key: &TenantKey) -> Result<(), BackendError> {
        for statement in self.statements(connection.backend()) {
            connection.execute(statement).await.map_err(backend_error)?;
        }
        debug!(tenant = %key, tables = self.tables.len(), "Tenant tables ensured");
        Ok(())
    }
}

/// Runs raw SQL statements on every tenant.
///
/// `{tenant}` in a statement is replaced by the quoted tenant schema.
#[derive(Debug, Clone, Default)]
pub struct StatementMigrator {
    statements: Vec<String>,
}

impl StatementMigrator {
    /// Create a migrator with no statements.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement.
    pub fn statement(mut self, sql: impl Into<String>) -> Self {
        self.statements.push(sql.into());
        self
    }

    /// The statements for `key`, placeholders filled in.
    pub fn render(&self, key: &TenantKey) -> Vec<String> {
        let schema = quote_identifier(key.as_str());
        self.statements
            .iter()
            .map(|sql| sql.replace("{tenant}", &schema))
            .collect()
    }
}

#[async_trait]
impl SchemaMigrator<SeaOrmConnection> for StatementMigrator {
    async fn migrate(&self, connection: &SeaOrmConnection, key: &TenantKey) -> Result<(), BackendError> {
        for sql in self.render(key) {
            connection
                .execute_unprepared(&sql)
                .await
                .map_err(backend_error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod post {
        use sea_orm::entity::prelude::*;

        #[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
        #[sea_orm(table_name = "post")]
        pub struct Model {
            #[sea_orm(primary_key)]
            pub id: i32,
            pub title: String,
        }

        #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
        pub enum Relation {}

        impl ActiveModelBehavior for ActiveModel {}
    }

    #[test]
    fn test_entity_statements() {
        let migrator = EntityMigrator::new().register::<post::Entity>();
        assert_eq!(migrator.tables(), vec!["post"]);

        let statements = migrator.statements(DatabaseBackend::Postgres);
        assert_eq!(statements.len(), 1);
        assert!(
            statements[0]
                .sql
                .starts_with("CREATE TABLE IF NOT EXISTS \"post\"")
        );
    }

    #[test]
    fn test_statement_placeholders() {
        let migrator = StatementMigrator::new()
            .statement("CREATE TABLE IF NOT EXISTS {tenant}.audit (id serial PRIMARY KEY)")
            .statement("SELECT 1");

        let rendered = migrator.render(&TenantKey::new("acme").unwrap());
        assert_eq!(
            rendered,
            vec![
                "CREATE TABLE IF NOT EXISTS \"acme\".audit (id serial PRIMARY KEY)".to_string(),
                "SELECT 1".to_string(),
            ]
        );
    }
}
