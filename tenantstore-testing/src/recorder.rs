// Recording provisioner and migrator doubles

use crate::memory::MemoryConnection;
use crate::script::FailureScript;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tenantstore_core::{BackendError, PartitionProvisioner, SchemaMigrator, TenantKey};

#[derive(Debug, Default)]
struct ProvisionerState {
    script: FailureScript,
    partitions: Mutex<BTreeSet<String>>,
    created: Mutex<Vec<String>>,
    delay: Mutex<Option<Duration>>,
}

/// Provisioner double that keeps an in-memory set of partitions.
///
/// `ensure` is idempotent: the partition is recorded as created only once.
#[derive(Debug, Clone, Default)]
pub struct MemoryProvisioner {
    state: Arc<ProvisionerState>,
}

impl MemoryProvisioner {
    /// Create a provisioner where everything succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` ensures of `key`.
    pub fn fail_ensure(&self, key: &str, times: usize) -> &Self {
        self.state.script.fail(key, times);
        self
    }

    /// Sleep this long inside every ensure.
    pub fn delay(&self, delay: Duration) -> &Self {
        *self.state.delay.lock() = Some(delay);
        self
    }

    /// Ensure calls for `key`, failed ones included.
    pub fn ensure_count(&self, key: &str) -> usize {
        self.state.script.attempts(key)
    }

    /// Ensure calls across all keys.
    pub fn total_ensures(&self) -> usize {
        self.state.script.total_attempts()
    }

    /// Partitions that currently exist.
    pub fn partitions(&self) -> Vec<String> {
        self.state.partitions.lock().iter().cloned().collect()
    }

    /// Partitions in creation order. A partition appears once no matter how
    /// often it was ensured.
    pub fn created(&self) -> Vec<String> {
        self.state.created.lock().clone()
    }
}

#[async_trait]
impl PartitionProvisioner<MemoryConnection> for MemoryProvisioner {
    async fn ensure(&self, _master: &MemoryConnection, key: &TenantKey) -> Result<(), BackendError> {
        let fail = self.state.script.attempt(key.as_str());

        let delay = *self.state.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(BackendError::query(format!(
                "scripted provisioning failure for {}",
                key
            )));
        }

        if self.state.partitions.lock().insert(key.to_string()) {
            self.state.created.lock().push(key.to_string());
        }
        Ok(())
    }
}

/// Migrator double counting runs per tenant.
#[derive(Debug, Clone, Default)]
pub struct MemoryMigrator {
    script: Arc<FailureScript>,
    delay: Arc<Mutex<Option<Duration>>>,
}

impl MemoryMigrator {
    /// Create a migrator where everything succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` migrations of `key`.
    pub fn fail_migrate(&self, key: &str, times: usize) -> &Self {
        self.script.fail(key, times);
        self
    }

    /// Sleep this long inside every migration.
    pub fn delay(&self, delay: Duration) -> &Self {
        *self.delay.lock() = Some(delay);
        self
    }

    /// Migration runs for `key`, failed ones included.
    pub fn migrate_count(&self, key: &str) -> usize {
        self.script.attempts(key)
    }
}

#[async_trait]
impl SchemaMigrator<MemoryConnection> for MemoryMigrator {
    async fn migrate(&self, _connection: &MemoryConnection, key: &TenantKey) -> Result<(), BackendError> {
        let fail = self.script.attempt(key.as_str());

        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(BackendError::query(format!(
                "scripted migration failure for {}",
                key
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryFactory;
    use tenantstore_core::ConnectionFactory;

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let factory = MemoryFactory::new();
        let master = factory.connect_master("memory://master").await.unwrap();
        let provisioner = MemoryProvisioner::new();
        let key = TenantKey::new("acme").unwrap();

        provisioner.ensure(&master, &key).await.unwrap();
        provisioner.ensure(&master, &key).await.unwrap();

        assert_eq!(provisioner.ensure_count("acme"), 2);
        assert_eq!(provisioner.created(), vec!["acme".to_string()]);
    }

    #[tokio::test]
    async fn test_failed_ensure_creates_nothing() {
        let factory = MemoryFactory::new();
        let master = factory.connect_master("memory://master").await.unwrap();
        let provisioner = MemoryProvisioner::new();
        provisioner.fail_ensure("acme", 1);

        let key = TenantKey::new("acme").unwrap();
        assert!(provisioner.ensure(&master, &key).await.is_err());
        assert!(provisioner.partitions().is_empty());
    }
}
