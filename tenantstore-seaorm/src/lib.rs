//! # tenantstore SeaORM backend
//!
//! Schema-per-tenant PostgreSQL connections for
//! [`TenantConnectionCache`](tenantstore_core::TenantConnectionCache),
//! built on SeaORM.
//!
//! ## Features
//!
//! - **Schema Provisioning**: `CREATE SCHEMA IF NOT EXISTS` through the master
//! - **Scoped Pools**: one pool per tenant with its `search_path` preset
//! - **Database per Tenant**: derive a tenant URL from the master URL instead
//! - **Entity Migrations**: create registered entity tables on first use
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tenantstore_core::{TenantConnectionCache, TenantStoreConfig};
//! use tenantstore_seaorm::{EntityMigrator, PoolOptions, SchemaProvisioner, SeaOrmFactory};
//!
//! let factory = SeaOrmFactory::new().pool(PoolOptions::new().max_connections(5));
//!
//! let cache = TenantConnectionCache::builder(factory, SchemaProvisioner::new())
//!     .migrator(EntityMigrator::new().register::<user::Entity>())
//!     .config(TenantStoreConfig::from_env()?)
//!     .connect()
//!     .await?;
//!
//! let conn = cache.get("acme").await?;
//! let users = user::Entity::find().all(conn.as_ref()).await?;
//! ```

#![warn(missing_docs)]

mod config;
mod connection;
mod error;
mod factory;
mod migrator;
mod schema;

pub use config::*;
pub use connection::*;
pub use error::*;
pub use factory::*;
pub use migrator::*;
pub use schema::*;

// Re-export sea-orm types for convenience
pub use sea_orm;
pub use sea_query;

/// Prelude module for commonly used types.
pub mod prelude {
    pub use super::{
        EntityMigrator, PoolOptions, SchemaProvisioner, SeaOrmConnection, SeaOrmFactory,
        StatementMigrator,
    };
    pub use sea_orm::entity::prelude::*;
}
