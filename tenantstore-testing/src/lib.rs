//! Testing utilities for tenantstore.
//!
//! In-memory doubles for every collaborator of
//! [`TenantConnectionCache`](tenantstore_core::TenantConnectionCache), each
//! recording how often it was called and able to fail on demand.
//!
//! ## Quick Start
//!
//! ```
//! use tenantstore_core::{TenantConnectionCache, TenantStoreConfig};
//! use tenantstore_testing::*;
//!
//! # tokio_test::block_on(async {
//! let factory = MemoryFactory::new();
//! let provisioner = MemoryProvisioner::new();
//!
//! let cache = TenantConnectionCache::builder(factory.clone(), provisioner.clone())
//!     .config(TenantStoreConfig::new("memory://master"))
//!     .connect()
//!     .await
//!     .unwrap();
//!
//! cache.get("acme").await.unwrap();
//! cache.get("acme").await.unwrap();
//!
//! assert_eq!(provisioner.ensure_count("acme"), 1);
//! assert_eq!(factory.open_count("acme"), 1);
//! # });
//! ```

mod memory;
mod recorder;
mod script;

pub use memory::{ConnectionStats, MemoryConnection, MemoryFactory, PingMode};
pub use recorder::{MemoryMigrator, MemoryProvisioner};
pub use script::FailureScript;

use tenantstore_core::{TenantConnectionCache, TenantStoreConfig};

/// Master target used by [`memory_cache`].
pub const MEMORY_MASTER: &str = "memory://master";

/// Build a cache over the given doubles with probes disabled.
pub async fn memory_cache(
    factory: &MemoryFactory,
    provisioner: &MemoryProvisioner,
) -> TenantConnectionCache<MemoryFactory> {
    let config = TenantStoreConfig::new(MEMORY_MASTER).disable_probes();
    memory_cache_with(factory, provisioner, config).await
}

/// Build a cache over the given doubles with a custom configuration.
///
/// # Panics
///
/// Panics if the factory is scripted to refuse the master connection.
pub async fn memory_cache_with(
    factory: &MemoryFactory,
    provisioner: &MemoryProvisioner,
    config: TenantStoreConfig,
) -> TenantConnectionCache<MemoryFactory> {
    TenantConnectionCache::builder(factory.clone(), provisioner.clone())
        .config(config)
        .connect()
        .await
        .expect("memory master connection")
}
