//! Tenant Connection Cache
//!
//! Keeps one live connection per tenant and hands it to every unit of work
//! addressed to that tenant.
//!
//! # Usage
//!
//! ```rust,ignore
//! let config = TenantStoreConfig::new("postgres://localhost/app");
//!
//! let cache = TenantConnectionCache::builder(factory, SchemaProvisioner::new())
//!     .migrator(EntityMigrator::new().register::<user::Entity>())
//!     .config(config)
//!     .connect()
//!     .await?;
//!
//! // First call provisions the schema and opens the connection,
//! // later calls return the cached handle.
//! let conn = cache.get("acme").await?;
//! ```
//!
//! # Locking
//!
//! A single reader/writer lock covers the whole map. Hits only take the shared
//! lock. A miss takes the exclusive lock and performs provisioning, connect
//! and migration while holding it, so cache misses for different tenants
//! serialize. Misses are expected once per tenant per process, which keeps
//! this cheap in practice.

use crate::config::TenantStoreConfig;
use crate::connection::{
    ConnectionFactory, PartitionProvisioner, SchemaMigrator, TenantConnection,
};
use crate::error::{CloseFailure, Result, TenantStoreError};
use crate::key::{KeyPolicy, TenantKey};
use crate::probe::{self, ProbeOutcome, ProbeSnapshot, ProbeState};
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

type Connection<F> = <F as ConnectionFactory>::Connection;

struct TenantRecord<C> {
    key: TenantKey,
    connection: Arc<C>,
    probe: Arc<ProbeState>,
}

impl<C: TenantConnection> TenantRecord<C> {
    fn new(key: TenantKey, connection: Arc<C>) -> Self {
        Self {
            key,
            connection,
            probe: Arc::new(ProbeState::new()),
        }
    }
}

/// Concurrent tenant → connection cache.
///
/// Share it between tasks behind an `Arc`. Every instance owns its own map
/// and master connection.
pub struct TenantConnectionCache<F: ConnectionFactory> {
    factory: Arc<F>,
    provisioner: Arc<dyn PartitionProvisioner<Connection<F>>>,
    migrator: Option<Arc<dyn SchemaMigrator<Connection<F>>>>,
    master: Arc<Connection<F>>,
    records: RwLock<HashMap<TenantKey, TenantRecord<Connection<F>>>>,
    config: TenantStoreConfig,
    key_policy: KeyPolicy,
    closed: AtomicBool,
}

impl<F: ConnectionFactory> TenantConnectionCache<F> {
    /// Start building a cache from its two required collaborators.
    pub fn builder<P>(factory: F, provisioner: P) -> TenantConnectionCacheBuilder<F>
    where
        P: PartitionProvisioner<Connection<F>> + 'static,
    {
        TenantConnectionCacheBuilder {
            factory: Arc::new(factory),
            provisioner: Arc::new(provisioner),
            migrator: None,
            config: None,
            key_policy: None,
        }
    }

    /// Get the connection for `key`, creating it on first use.
    ///
    /// A hit returns immediately and may kick off a background liveness
    /// probe. A miss provisions the partition, opens the connection and runs
    /// the migrator; if any step fails nothing is cached and the next call
    /// starts over.
    pub async fn get(&self, key: &str) -> Result<Arc<Connection<F>>> {
        self.get_with_cancel(key, std::future::pending::<()>())
            .await
    }

    /// Like [`get`](Self::get), but abandons construction when `cancel`
    /// completes first. Construction is also bounded by
    /// [`TenantStoreConfig::construct_timeout`].
    ///
    /// `cancel` is consulted while waiting for the lock and during every
    /// setup step; a hit that gets the lock right away never looks at it. A
    /// connection opened before the interruption is closed again.
    pub async fn get_with_cancel<S>(&self, key: &str, cancel: S) -> Result<Arc<Connection<F>>>
    where
        S: Future<Output = ()>,
    {
        let key = self.key_policy.validate(key)?;
        tokio::pin!(cancel);

        {
            // Readers only wait while another tenant is being set up.
            let records = tokio::select! {
                biased;
                records = self.records.read() => records,
                _ = cancel.as_mut() => return Err(lock_wait_cancelled(&key)),
            };
            if let Some(record) = records.get(&key) {
                self.schedule_probe(record);
                return Ok(Arc::clone(&record.connection));
            }
        }

        let mut records = tokio::select! {
            biased;
            _ = cancel.as_mut() => return Err(lock_wait_cancelled(&key)),
            records = self.records.write() => records,
        };

        // Another caller may have finished construction while we waited.
        if let Some(record) = records.get(&key) {
            return Ok(Arc::clone(&record.connection));
        }

        if self.closed.load(Ordering::Acquire) {
            return Err(TenantStoreError::StoreClosed);
        }

        let deadline = Instant::now() + self.config.construct_timeout;
        let connection = match self.construct(&key, cancel, deadline).await {
            Ok(connection) => Arc::new(connection),
            Err(error) => {
                match &error {
                    TenantStoreError::Cancelled { .. } => {
                        warn!(tenant = %key, "Tenant connection setup cancelled")
                    }
                    TenantStoreError::TimedOut { after, .. } => {
                        warn!(tenant = %key, timeout = ?after, "Tenant connection setup timed out")
                    }
                    _ => {}
                }
                return Err(error);
            }
        };

        records.insert(
            key.clone(),
            TenantRecord::new(key.clone(), Arc::clone(&connection)),
        );
        info!(tenant = %key, tenants = records.len(), "Tenant connection established");

        Ok(connection)
    }

    /// Provision, open and migrate. Called with the exclusive lock held.
    async fn construct<S>(
        &self,
        key: &TenantKey,
        mut cancel: Pin<&mut S>,
        deadline: Instant,
    ) -> Result<Connection<F>>
    where
        S: Future<Output = ()>,
    {
        debug!(tenant = %key, "Ensuring tenant partition");
        self.step(key, self.provisioner.ensure(&self.master, key), cancel.as_mut(), deadline)
            .await?
            .map_err(|source| TenantStoreError::ProvisioningFailed {
                key: key.to_string(),
                source,
            })?;

        debug!(tenant = %key, "Opening tenant connection");
        let connection = self
            .step(key, self.factory.open(key), cancel.as_mut(), deadline)
            .await?
            .map_err(|source| TenantStoreError::ConnectionFailed {
                key: key.to_string(),
                source,
            })?;

        if let Some(migrator) = self.migrator.as_ref().filter(|_| self.config.auto_migrate) {
            debug!(tenant = %key, "Migrating tenant schema");
            let migrated = self
                .step(key, migrator.migrate(&connection, key), cancel.as_mut(), deadline)
                .await
                .and_then(|result| {
                    result.map_err(|source| TenantStoreError::MigrationFailed {
                        key: key.to_string(),
                        source,
                    })
                });

            if let Err(error) = migrated {
                if let Err(e) = connection.close().await {
                    warn!(tenant = %key, error = %e, "Failed to close abandoned tenant connection");
                }
                return Err(error);
            }
        }

        Ok(connection)
    }

    /// Run one setup step unless `cancel` fires or `deadline` passes first.
    async fn step<T, S>(
        &self,
        key: &TenantKey,
        work: impl Future<Output = T>,
        cancel: Pin<&mut S>,
        deadline: Instant,
    ) -> Result<T>
    where
        S: Future<Output = ()>,
    {
        tokio::select! {
            biased;
            _ = cancel => Err(TenantStoreError::Cancelled { key: key.to_string() }),
            value = work => Ok(value),
            _ = tokio::time::sleep_until(deadline) => Err(TenantStoreError::TimedOut {
                key: key.to_string(),
                after: self.config.construct_timeout,
            }),
        }
    }

    fn schedule_probe(&self, record: &TenantRecord<Connection<F>>) {
        if !self.config.probes_enabled {
            return;
        }
        probe::schedule(
            &record.key,
            &record.connection,
            &record.probe,
            self.config.probe_interval,
            self.config.probe_timeout,
        );
    }

    /// Close and forget the connection for `key`.
    ///
    /// Absent keys are a no-op. If closing fails the record is still
    /// dropped and the failure is returned as
    /// [`TenantStoreError::CloseFailed`].
    pub async fn remove(&self, key: &str) -> Result<()> {
        let mut records = self.records.write().await;

        let Some(record) = records.remove(key) else {
            return Ok(());
        };

        let result = record.connection.close().await;
        drop(records);

        match result {
            Ok(()) => {
                info!(tenant = %key, "Tenant connection removed");
                Ok(())
            }
            Err(error) => {
                warn!(tenant = %key, error = %error, "Tenant connection removed but close failed");
                Err(TenantStoreError::CloseFailed {
                    failures: vec![CloseFailure::tenant(key, error)],
                })
            }
        }
    }

    /// Snapshot of all cached tenant keys, in no particular order.
    pub async fn list_keys(&self) -> HashSet<TenantKey> {
        self.records.read().await.keys().cloned().collect()
    }

    /// Close every tenant connection and the master connection.
    ///
    /// Every close is attempted; all failures are collected into a single
    /// [`TenantStoreError::CloseFailed`]. The map is emptied either way and
    /// the cache refuses new tenants afterwards. Calling it again is a no-op.
    pub async fn close_all(&self) -> Result<()> {
        let mut records = self.records.write().await;

        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let mut failures = Vec::new();
        let count = records.len();

        for (key, record) in records.drain() {
            if let Err(error) = record.connection.close().await {
                warn!(tenant = %key, error = %error, "Failed to close tenant connection");
                failures.push(CloseFailure::tenant(key.into_inner(), error));
            }
        }

        if let Err(error) = self.master.close().await {
            warn!(error = %error, "Failed to close master connection");
            failures.push(CloseFailure::master(error));
        }

        info!(tenants = count, failures = failures.len(), "Tenant store closed");

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TenantStoreError::CloseFailed { failures })
        }
    }

    /// The control-plane connection, for explicitly cross-tenant work.
    pub fn master(&self) -> &Arc<Connection<F>> {
        &self.master
    }

    /// Whether a connection for `key` is cached.
    pub async fn contains(&self, key: &str) -> bool {
        self.records.read().await.contains_key(key)
    }

    /// Number of cached tenant connections.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Whether no tenant connection is cached.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Probe state of the record for `key`.
    pub async fn probe(&self, key: &str) -> Option<ProbeSnapshot> {
        self.records
            .read()
            .await
            .get(key)
            .map(|record| record.probe.snapshot())
    }

    /// Outcome of the last completed probe for `key`.
    ///
    /// `None` if the key is not cached or has not been probed yet.
    pub async fn health(&self, key: &str) -> Option<ProbeOutcome> {
        self.probe(key).await.and_then(|snapshot| snapshot.last_outcome)
    }

    /// Whether `close_all` has run.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The configuration the cache was built with.
    pub fn config(&self) -> &TenantStoreConfig {
        &self.config
    }

    /// The factory used to open tenant connections.
    pub fn factory(&self) -> &F {
        &self.factory
    }
}

fn lock_wait_cancelled(key: &TenantKey) -> TenantStoreError {
    warn!(tenant = %key, "Cancelled while waiting for the tenant store lock");
    TenantStoreError::Cancelled {
        key: key.to_string(),
    }
}

/// Builder for [`TenantConnectionCache`].
pub struct TenantConnectionCacheBuilder<F: ConnectionFactory> {
    factory: Arc<F>,
    provisioner: Arc<dyn PartitionProvisioner<Connection<F>>>,
    migrator: Option<Arc<dyn SchemaMigrator<Connection<F>>>>,
    config: Option<TenantStoreConfig>,
    key_policy: Option<KeyPolicy>,
}

impl<F: ConnectionFactory> TenantConnectionCacheBuilder<F> {
    /// Run `migrator` on every new tenant connection.
    pub fn migrator<M>(mut self, migrator: M) -> Self
    where
        M: SchemaMigrator<Connection<F>> + 'static,
    {
        self.migrator = Some(Arc::new(migrator));
        self
    }

    /// Use `config` instead of reading it from the environment.
    pub fn config(mut self, config: TenantStoreConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Override the key policy derived from the configuration.
    pub fn key_policy(mut self, policy: KeyPolicy) -> Self {
        self.key_policy = Some(policy);
        self
    }

    /// Open the master connection and build the cache.
    ///
    /// Without an explicit configuration, [`TenantStoreConfig::from_env`] is
    /// used.
    pub async fn connect(self) -> Result<TenantConnectionCache<F>> {
        let config = match self.config {
            Some(config) => {
                config.validate()?;
                config
            }
            None => TenantStoreConfig::from_env()?,
        };
        let key_policy = match self.key_policy {
            Some(policy) => policy,
            None => config.key_policy()?,
        };

        info!("Connecting to master database");
        let master = self
            .factory
            .connect_master(&config.master_url)
            .await
            .map_err(TenantStoreError::MasterConnectionFailed)?;
        info!(
            probe_interval = ?config.probe_interval,
            probes = config.probes_enabled,
            "Tenant store ready"
        );

        Ok(TenantConnectionCache {
            factory: self.factory,
            provisioner: self.provisioner,
            migrator: self.migrator,
            master: Arc::new(master),
            records: RwLock::new(HashMap::new()),
            config,
            key_policy,
            closed: AtomicBool::new(false),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NoopProvisioner;
    use crate::error::BackendError;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct StubConnection;

    #[async_trait]
    impl TenantConnection for StubConnection {
        async fn ping(&self) -> std::result::Result<(), BackendError> {
            Ok(())
        }

        async fn close(&self) -> std::result::Result<(), BackendError> {
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubFactory {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionFactory for StubFactory {
        type Connection = StubConnection;

        async fn connect_master(&self, _target: &str) -> std::result::Result<StubConnection, BackendError> {
            Ok(StubConnection)
        }

        async fn open(&self, _key: &TenantKey) -> std::result::Result<StubConnection, BackendError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(StubConnection)
        }
    }

    async fn stub_cache() -> TenantConnectionCache<StubFactory> {
        let config = TenantStoreConfig::new("stub://master").disable_probes();
        match TenantConnectionCache::builder(StubFactory::default(), NoopProvisioner)
            .config(config)
            .connect()
            .await
        {
            Ok(cache) => cache,
            Err(e) => panic!("stub cache failed to connect: {e}"),
        }
    }

    fn opens(cache: &TenantConnectionCache<StubFactory>) -> usize {
        cache.factory().opens.load(Ordering::SeqCst)
    }

    #[tokio::test]
    async fn test_queued_writers_recheck_before_constructing() {
        let cache = Arc::new(stub_cache().await);

        // Both callers queue on the shared lock, miss, then contend for the
        // exclusive one.
        let guard = cache.records.write().await;
        let tasks: Vec<_> = (0..2)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get("acme").await.map_err(|e| e.to_string()) })
            })
            .collect();
        tokio::task::yield_now().await;
        drop(guard);

        let mut connections = Vec::new();
        for task in tasks {
            connections.push(task.await.unwrap().unwrap());
        }

        assert!(Arc::ptr_eq(&connections[0], &connections[1]));
        assert_eq!(opens(&cache), 1);
        assert_eq!(cache.len().await, 1);
    }

    #[tokio::test]
    async fn test_closed_cache_refuses_misses() {
        let cache = stub_cache().await;
        cache.get("acme").await.unwrap();
        cache.close_all().await.unwrap();

        assert!(cache.is_closed());
        assert!(matches!(
            cache.get("beta").await,
            Err(TenantStoreError::StoreClosed)
        ));
        assert!(matches!(
            cache.get("acme").await,
            Err(TenantStoreError::StoreClosed)
        ));
        assert_eq!(opens(&cache), 1);
    }

    #[tokio::test]
    async fn test_cancel_while_lock_is_held() {
        let cache = stub_cache().await;
        let _guard = cache.records.write().await;

        let result = cache
            .get_with_cancel("acme", std::future::ready(()))
            .await;

        assert!(matches!(result, Err(TenantStoreError::Cancelled { ref key }) if key == "acme"));
        assert_eq!(opens(&cache), 0);
    }
}
