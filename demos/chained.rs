//! Chained Resolver Example
//!
//! Dispatches a handful of simulated requests through a header, subdomain
//! and query-parameter resolver chain, backed by the in-memory doubles.
//!
//! Run with:
//! ```bash
//! RUST_LOG=debug cargo run --example chained
//! ```

use std::sync::Arc;
use tenantstore::dispatch::*;
use tenantstore::{TenantConnectionCache, TenantStoreConfig};
use tenantstore_testing::{MemoryFactory, MemoryMigrator, MemoryProvisioner};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let factory = MemoryFactory::new();
    let provisioner = MemoryProvisioner::new();

    let cache = TenantConnectionCache::builder(factory.clone(), provisioner.clone())
        .migrator(MemoryMigrator::new())
        .config(TenantStoreConfig::new("memory://master"))
        .connect()
        .await?;
    let cache = Arc::new(cache);

    // 1. X-Tenant-ID header, 2. subdomain, 3. ?tenant= query parameter
    let dispatcher = TenantDispatcher::new(Arc::clone(&cache))
        .with_resolver(
            ChainResolver::new()
                .with(HeaderResolver::new("X-Tenant-ID"))
                .with(SubdomainResolver::new())
                .with(QueryParamResolver::new("tenant")),
        )
        .skip(|request| request.path() == "/health")
        .on_resolved(|request, tenant| {
            info!(tenant = %tenant, path = request.path(), "Tenant resolved");
            Ok(())
        });

    let requests = [
        RequestParts::new("/products").with_header("X-Tenant-ID", "tenant1"),
        RequestParts::from_uri("http://tenant2.localhost:3000/products")?,
        RequestParts::from_uri("http://localhost:3000/products?tenant=tenant3")?,
        RequestParts::from_uri("http://tenant2.localhost:3000/orders")?,
        RequestParts::from_uri("http://localhost:3000/health")?,
        RequestParts::from_uri("http://www.example.com/products")?,
    ];

    for request in &requests {
        match dispatcher.dispatch(request).await {
            Ok(Some(scope)) => info!(
                tenant = %scope.key,
                connection = scope.connection.id(),
                "Serving request"
            ),
            Ok(None) => info!(path = request.path(), "Serving request without tenant"),
            Err(e) => warn!(status = %e.status(), body = %e.to_json(), "Rejecting request"),
        }
    }

    let mut tenants: Vec<_> = cache.list_keys().await.into_iter().collect();
    tenants.sort();
    info!(tenants = ?tenants, partitions = ?provisioner.created(), "Cached tenants");
    info!(opens = factory.total_opens(), "Connections opened");

    cache.close_all().await?;
    Ok(())
}
