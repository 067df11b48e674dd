//! Connection factory opening one SeaORM pool per tenant.

use crate::config::PoolOptions;
use crate::connection::SeaOrmConnection;
use crate::error::backend_error;
use crate::schema::quote_identifier;
use async_trait::async_trait;
use once_cell::sync::OnceCell;
use sea_orm::{ConnectOptions, ConnectionTrait, DatabaseBackend};
use std::fmt;
use std::sync::Arc;
use tenantstore_core::{BackendError, ConnectionFactory, TenantKey};
use tracing::{debug, info};

/// Placeholder for the quoted tenant schema in a search path template.
pub const TENANT_PLACEHOLDER: &str = "{tenant}";

/// Default search path: the tenant schema, then `public`.
pub const DEFAULT_SEARCH_PATH: &str = "{tenant},public";

type TenantUrlFn = dyn Fn(&str, &TenantKey) -> String + Send + Sync;

#[derive(Debug)]
struct MasterTarget {
    url: String,
    backend: DatabaseBackend,
}

/// Opens SeaORM connections for the master and for each tenant.
///
/// By default every tenant shares the master database and gets its own
/// PostgreSQL `search_path`. With [`database_per_tenant`](Self::database_per_tenant)
/// each tenant gets a URL of its own instead.
///
/// Only PostgreSQL honours a search path. On MySQL and SQLite the default
/// mode refuses to open tenant connections with [`BackendError::Unsupported`];
/// use `database_per_tenant` there.
///
/// # Examples
///
/// ```
/// use tenantstore_seaorm::{PoolOptions, SeaOrmFactory};
///
/// let factory = SeaOrmFactory::new()
///     .pool(PoolOptions::new().max_connections(3))
///     .search_path("{tenant},shared,public");
/// ```
#[derive(Clone)]
pub struct SeaOrmFactory {
    pool: PoolOptions,
    search_path: Option<String>,
    tenant_url: Option<Arc<TenantUrlFn>>,
    master: Arc<OnceCell<MasterTarget>>,
}

impl Default for SeaOrmFactory {
    fn default() -> Self {
        Self {
            pool: PoolOptions::default(),
            search_path: Some(DEFAULT_SEARCH_PATH.to_string()),
            tenant_url: None,
            master: Arc::new(OnceCell::new()),
        }
    }
}

impl SeaOrmFactory {
    /// Create a schema-per-tenant factory with default pool options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `pool` for master and tenant pools.
    pub fn pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }

    /// Set the search path template. `{tenant}` is replaced by the quoted
    /// tenant schema.
    pub fn search_path(mut self, template: impl Into<String>) -> Self {
        self.search_path = Some(template.into());
        self
    }

    /// Derive a separate database URL per tenant from the master URL.
    ///
    /// No search path is set on tenant connections in this mode.
    ///
    /// ```
    /// use tenantstore_seaorm::SeaOrmFactory;
    ///
    /// let factory = SeaOrmFactory::new().database_per_tenant(|master, key| {
    ///     format!("{}/tenant_{}", master.rsplit_once('/').map_or(master, |(base, _)| base), key)
    /// });
    /// ```
    pub fn database_per_tenant<U>(mut self, url: U) -> Self
    where
        U: Fn(&str, &TenantKey) -> String + Send + Sync + 'static,
    {
        self.tenant_url = Some(Arc::new(url));
        self.search_path = None;
        self
    }

    /// Pool options in use.
    pub fn pool_options(&self) -> &PoolOptions {
        &self.pool
    }

    /// Render the search path for `key`, if this factory sets one.
    pub fn search_path_for(&self, key: &TenantKey) -> Option<String> {
        self.search_path
            .as_ref()
            .map(|template| template.replace(TENANT_PLACEHOLDER, &quote_identifier(key.as_str())))
    }

    /// Connect options for a tenant connection.
    ///
    /// Fails if the master connection has not been opened yet, since tenant
    /// URLs are derived from it, and if a search path is configured for a
    /// backend that ignores it.
    pub fn tenant_options(&self, key: &TenantKey) -> Result<ConnectOptions, BackendError> {
        let master = self.master.get().ok_or_else(|| {
            BackendError::Other("master connection must be opened before tenant connections".into())
        })?;

        if self.search_path.is_some() && master.backend != DatabaseBackend::Postgres {
            return Err(BackendError::Unsupported(format!(
                "{:?} has no schema search path; tenant '{}' needs database_per_tenant",
                master.backend, key
            )));
        }

        let url = match &self.tenant_url {
            Some(url) => url(&master.url, key),
            None => master.url.clone(),
        };

        let mut options = self.pool.to_connect_options(&url);
        if let Some(search_path) = self.search_path_for(key) {
            options.set_schema_search_path(search_path);
        }
        Ok(options)
    }
}

impl fmt::Debug for SeaOrmFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeaOrmFactory")
            .field("pool", &self.pool)
            .field("search_path", &self.search_path)
            .field("database_per_tenant", &self.tenant_url.is_some())
            .field("master", &self.master.get().map(|m| m.backend))
            .finish()
    }
}

#[async_trait]
impl ConnectionFactory for SeaOrmFactory {
    type Connection = SeaOrmConnection;

    async fn connect_master(&self, target: &str) -> Result<SeaOrmConnection, BackendError> {
        info!(url = %redact(target), "Connecting to master database");
        let conn = sea_orm::Database::connect(self.pool.to_connect_options(target))
            .await
            .map_err(backend_error)?;

        // The first master wins; later calls only open another pool.
        let _ = self.master.set(MasterTarget {
            url: target.to_string(),
            backend: conn.get_database_backend(),
        });
        Ok(SeaOrmConnection::master(conn))
    }

    async fn open(&self, key: &TenantKey) -> Result<SeaOrmConnection, BackendError> {
        let options = self.tenant_options(key)?;
        debug!(tenant = %key, url = %redact(options.get_url()), "Opening tenant pool");

        let conn = sea_orm::Database::connect(options)
            .await
            .map_err(backend_error)?;
        Ok(SeaOrmConnection::tenant(conn, key.clone()))
    }
}

/// Strip credentials from a database URL for logging.
fn redact(url: &str) -> String {
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
