// In-memory connection and factory

use crate::script::FailureScript;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tenantstore_core::{BackendError, ConnectionFactory, TenantConnection, TenantKey};

/// How a [`MemoryConnection`] answers pings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PingMode {
    /// Answer immediately.
    #[default]
    Healthy,
    /// Return an error immediately.
    Fail,
    /// Never answer.
    Hang,
}

/// Call counters of one connection, shared with the factory that opened it.
#[derive(Debug, Default)]
pub struct ConnectionStats {
    pings: AtomicUsize,
    closes: AtomicUsize,
}

impl ConnectionStats {
    /// Number of `ping` calls.
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Number of `close` calls.
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Connection double that only counts what happens to it.
#[derive(Debug)]
pub struct MemoryConnection {
    id: u64,
    target: String,
    stats: Arc<ConnectionStats>,
    ping_mode: PingMode,
    fail_close: bool,
}

impl MemoryConnection {
    /// Unique id assigned by the factory.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Tenant key, or the master target for master connections.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Counters of this connection.
    pub fn stats(&self) -> &ConnectionStats {
        &self.stats
    }
}

#[async_trait]
impl TenantConnection for MemoryConnection {
    async fn ping(&self) -> Result<(), BackendError> {
        self.stats.pings.fetch_add(1, Ordering::SeqCst);
        match self.ping_mode {
            PingMode::Healthy => Ok(()),
            PingMode::Fail => Err(BackendError::connection("connection reset by peer")),
            PingMode::Hang => std::future::pending().await,
        }
    }

    async fn close(&self) -> Result<(), BackendError> {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Err(BackendError::connection(format!("failed to close {}", self.target)))
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Default)]
struct FactoryState {
    next_id: AtomicU64,
    opened: Mutex<Vec<(String, Arc<ConnectionStats>)>>,
    master: Mutex<Option<Arc<ConnectionStats>>>,
    open_failures: FailureScript,
    close_failures: Mutex<HashSet<String>>,
    fail_master: AtomicBool,
    fail_master_close: AtomicBool,
    open_delay: Mutex<Option<Duration>>,
    ping_mode: Mutex<PingMode>,
}

/// Factory double handing out [`MemoryConnection`]s.
///
/// Clones share state, so keep one clone for assertions and give the other
/// to the cache.
///
/// ```
/// use tenantstore_testing::MemoryFactory;
///
/// let factory = MemoryFactory::new();
/// factory.fail_open("beta", 1);
/// assert_eq!(factory.open_count("beta"), 0);
/// ```
#[derive(Debug, Clone, Default)]
pub struct MemoryFactory {
    state: Arc<FactoryState>,
}

impl MemoryFactory {
    /// Create a factory where everything succeeds.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `times` opens of `key`.
    pub fn fail_open(&self, key: &str, times: usize) -> &Self {
        self.state.open_failures.fail(key, times);
        self
    }

    /// Fail every open of `key`.
    pub fn fail_open_always(&self, key: &str) -> &Self {
        self.state.open_failures.fail_always(key);
        self
    }

    /// Make connections for `key` fail on close.
    pub fn fail_close(&self, key: &str) -> &Self {
        self.state.close_failures.lock().insert(key.to_string());
        self
    }

    /// Refuse to open the master connection.
    pub fn fail_master(&self) -> &Self {
        self.state.fail_master.store(true, Ordering::SeqCst);
        self
    }

    /// Make the master connection fail on close.
    pub fn fail_master_close(&self) -> &Self {
        self.state.fail_master_close.store(true, Ordering::SeqCst);
        self
    }

    /// Sleep this long inside every tenant open.
    pub fn open_delay(&self, delay: Duration) -> &Self {
        *self.state.open_delay.lock() = Some(delay);
        self
    }

    /// Ping behavior of connections opened from now on.
    pub fn ping_mode(&self, mode: PingMode) -> &Self {
        *self.state.ping_mode.lock() = mode;
        self
    }

    /// Open attempts for `key`, failed ones included.
    pub fn open_count(&self, key: &str) -> usize {
        self.state.open_failures.attempts(key)
    }

    /// Open attempts across all keys.
    pub fn total_opens(&self) -> usize {
        self.state.open_failures.total_attempts()
    }

    /// Connections successfully opened for `key`.
    pub fn connections(&self, key: &str) -> Vec<Arc<ConnectionStats>> {
        self.state
            .opened
            .lock()
            .iter()
            .filter(|(k, _)| k == key)
            .map(|(_, stats)| Arc::clone(stats))
            .collect()
    }

    /// Close calls across all connections opened for `key`.
    pub fn close_count(&self, key: &str) -> usize {
        self.connections(key).iter().map(|s| s.closes()).sum()
    }

    /// Ping calls across all connections opened for `key`.
    pub fn ping_count(&self, key: &str) -> usize {
        self.connections(key).iter().map(|s| s.pings()).sum()
    }

    /// Close calls on the master connection.
    pub fn master_close_count(&self) -> usize {
        self.state
            .master
            .lock()
            .as_ref()
            .map_or(0, |stats| stats.closes())
    }

    fn connection(&self, target: &str, fail_close: bool) -> (MemoryConnection, Arc<ConnectionStats>) {
        let stats = Arc::new(ConnectionStats::default());
        let connection = MemoryConnection {
            id: self.state.next_id.fetch_add(1, Ordering::SeqCst),
            target: target.to_string(),
            stats: Arc::clone(&stats),
            ping_mode: *self.state.ping_mode.lock(),
            fail_close,
        };
        (connection, stats)
    }
}

#[async_trait]
impl ConnectionFactory for MemoryFactory {
    type Connection = MemoryConnection;

    async fn connect_master(&self, target: &str) -> Result<MemoryConnection, BackendError> {
        if self.state.fail_master.load(Ordering::SeqCst) {
            return Err(BackendError::connection(format!("cannot reach {}", target)));
        }
        let fail_close = self.state.fail_master_close.load(Ordering::SeqCst);
        let (connection, stats) = self.connection(target, fail_close);
        *self.state.master.lock() = Some(stats);
        Ok(connection)
    }

    async fn open(&self, key: &TenantKey) -> Result<MemoryConnection, BackendError> {
        let fail = self.state.open_failures.attempt(key.as_str());

        let delay = *self.state.open_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if fail {
            return Err(BackendError::connection(format!(
                "scripted open failure for {}",
                key
            )));
        }

        let fail_close = self.state.close_failures.lock().contains(key.as_str());
        let (connection, stats) = self.connection(key.as_str(), fail_close);
        self.state.opened.lock().push((key.to_string(), stats));
        Ok(connection)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_open_failure() {
        let factory = MemoryFactory::new();
        factory.fail_open("beta", 1);
        let key = TenantKey::new("beta").unwrap();

        assert!(factory.open(&key).await.is_err());
        let conn = factory.open(&key).await.unwrap();

        assert_eq!(conn.target(), "beta");
        assert_eq!(factory.open_count("beta"), 2);
        assert_eq!(factory.connections("beta").len(), 1);
    }

    #[tokio::test]
    async fn test_close_counting() {
        let factory = MemoryFactory::new();
        factory.fail_close("acme");
        let conn = factory.open(&TenantKey::new("acme").unwrap()).await.unwrap();

        assert!(conn.close().await.is_err());
        assert_eq!(factory.close_count("acme"), 1);
    }

    #[tokio::test]
    async fn test_master_failure() {
        let factory = MemoryFactory::new();
        factory.fail_master();
        assert!(factory.connect_master("memory://master").await.is_err());
        assert_eq!(factory.master_close_count(), 0);
    }

    #[tokio::test]
    async fn test_ping_modes() {
        let factory = MemoryFactory::new();
        factory.ping_mode(PingMode::Fail);
        let conn = factory.open(&TenantKey::new("acme").unwrap()).await.unwrap();

        assert!(conn.ping().await.is_err());
        assert_eq!(conn.stats().pings(), 1);
    }
}
