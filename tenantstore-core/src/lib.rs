//! Tenant Connection Cache
//!
//! One live database connection per tenant partition, created on first use
//! and reused for every later unit of work addressed to the same tenant.
//!
//! # Features
//!
//! - **At most one construction per tenant** - concurrent first requests for
//!   a tenant share a single provisioning + connect sequence
//! - **Lazy provisioning** - the tenant's partition is created on first access
//! - **Optional migration** - sync models on every freshly opened connection
//! - **Non-blocking liveness probes** - debounced background pings on hits
//! - **Clean rollback** - failed, cancelled or timed-out setups leave nothing
//!   behind
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tenantstore_core::*;
//!
//! let cache = TenantConnectionCache::builder(MyFactory::new(), MyProvisioner)
//!     .config(TenantStoreConfig::new("postgres://localhost/app"))
//!     .connect()
//!     .await?;
//!
//! let conn = cache.get("acme").await?;
//! assert!(cache.list_keys().await.iter().any(|k| k.as_str() == "acme"));
//!
//! cache.remove("acme").await?;
//! cache.close_all().await?;
//! ```

pub mod cache;
pub mod config;
pub mod connection;
pub mod error;
pub mod key;
pub mod probe;

pub use cache::{TenantConnectionCache, TenantConnectionCacheBuilder};
pub use config::TenantStoreConfig;
pub use connection::{
    ConnectionFactory, NoopProvisioner, PartitionProvisioner, SchemaMigrator, TenantConnection,
};
pub use error::{BackendError, CloseFailure, CloseTarget, Result, TenantStoreError};
pub use key::{IDENTIFIER_PATTERN, KeyPolicy, TenantKey};
pub use probe::{ProbeOutcome, ProbeSnapshot};

// Re-exported so implementors don't need their own dependency.
pub use async_trait::async_trait;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::cache::TenantConnectionCache;
    pub use crate::config::TenantStoreConfig;
    pub use crate::connection::{
        ConnectionFactory, NoopProvisioner, PartitionProvisioner, SchemaMigrator,
        TenantConnection,
    };
    pub use crate::error::{BackendError, TenantStoreError};
    pub use crate::key::{KeyPolicy, TenantKey};
    pub use async_trait::async_trait;
}
