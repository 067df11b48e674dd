//! Integration tests for tenantstore-dispatch

use std::sync::Arc;
use std::time::Duration;
use tenantstore_core::{TenantConnectionCache, TenantStoreError};
use tenantstore_dispatch::*;
use tenantstore_testing::*;

async fn setup() -> (MemoryFactory, Arc<TenantConnectionCache<MemoryFactory>>) {
    let factory = MemoryFactory::new();
    let cache = memory_cache(&factory, &MemoryProvisioner::new()).await;
    (factory, Arc::new(cache))
}

#[tokio::test]
async fn test_subdomain_dispatch_by_default() {
    let (factory, cache) = setup().await;
    let dispatcher = TenantDispatcher::new(cache);

    let request = RequestParts::from_uri("http://acme.localhost:3000/users").unwrap();
    let scope = dispatcher.dispatch(&request).await.unwrap().unwrap();

    assert_eq!(scope.key.as_str(), "acme");
    assert_eq!(scope.connection.target(), "acme");
    assert_eq!(factory.open_count("acme"), 1);
}

#[tokio::test]
async fn test_same_tenant_shares_connection() {
    let (factory, cache) = setup().await;
    let dispatcher = TenantDispatcher::new(cache).with_resolver(
        ChainResolver::new()
            .with(HeaderResolver::default())
            .with(SubdomainResolver::new()),
    );

    let by_header = RequestParts::new("/").with_header("X-Tenant-ID", "acme");
    let by_host = RequestParts::new("/").with_host("acme.example.com");

    let first = dispatcher.dispatch(&by_header).await.unwrap().unwrap();
    let second = dispatcher.dispatch(&by_host).await.unwrap().unwrap();

    assert!(Arc::ptr_eq(&first.connection, &second.connection));
    assert_eq!(factory.open_count("acme"), 1);
}

#[tokio::test]
async fn test_skip_predicate() {
    let (factory, cache) = setup().await;
    let dispatcher = TenantDispatcher::new(cache).skip(|request| request.path() == "/health");

    let request = RequestParts::new("/health");
    assert!(dispatcher.dispatch(&request).await.unwrap().is_none());
    assert_eq!(factory.total_opens(), 0);
}

#[tokio::test]
async fn test_resolution_failure() {
    let (factory, cache) = setup().await;
    let dispatcher = TenantDispatcher::new(cache);

    let err = dispatcher
        .dispatch(&RequestParts::new("/").with_host("www.example.com"))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Resolution(_)));
    assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    assert_eq!(err.to_json()["error"], "tenant_resolution_failed");
    assert_eq!(err.to_json()["message"], "No valid tenant subdomain found");
    assert_eq!(factory.total_opens(), 0);
}

#[tokio::test]
async fn test_malformed_header_is_rejected_before_the_cache() {
    let (factory, cache) = setup().await;
    let dispatcher = TenantDispatcher::new(cache).with_resolver(HeaderResolver::default());

    let err = dispatcher
        .dispatch(&RequestParts::new("/").with_header("X-Tenant-ID", "acme corp"))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Resolution(ResolutionError::Invalid(_))));
    assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
    assert_eq!(err.to_json()["message"], "Invalid tenant identifier: acme corp");
    assert_eq!(factory.total_opens(), 0);
}

#[tokio::test]
async fn test_optional_dispatch() {
    let (_factory, cache) = setup().await;
    let dispatcher = TenantDispatcher::new(cache)
        .with_resolver(HeaderResolver::default())
        .with_optional(true);

    assert!(dispatcher.dispatch(&RequestParts::new("/")).await.unwrap().is_none());

    let request = RequestParts::new("/").with_header("X-Tenant-ID", "acme");
    assert!(dispatcher.dispatch(&request).await.unwrap().is_some());
}

#[tokio::test]
async fn test_invalid_key_reaches_cache_validation() {
    let (factory, cache) = setup().await;
    let dispatcher = TenantDispatcher::new(cache).with_resolver(PathPrefixResolver);

    let err = dispatcher
        .dispatch(&RequestParts::new("/acme-corp/users"))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Store(TenantStoreError::InvalidKey { .. })));
    assert_eq!(err.code(), "tenant_resolution_failed");
    assert_eq!(factory.total_opens(), 0);
}

#[tokio::test]
async fn test_cache_failure_surfaces() {
    let (factory, cache) = setup().await;
    factory.fail_open("beta", 1);
    let dispatcher = TenantDispatcher::new(cache).with_resolver(QueryParamResolver::default());
    let request = RequestParts::from_uri("/?tenant=beta").unwrap();

    let err = dispatcher.dispatch(&request).await.unwrap_err();
    assert!(matches!(err, DispatchError::Store(TenantStoreError::ConnectionFailed { .. })));
    assert_eq!(err.code(), "tenant_unavailable");
    assert_eq!(err.status(), http::StatusCode::SERVICE_UNAVAILABLE);

    assert!(dispatcher.dispatch(&request).await.unwrap().is_some());
}

#[tokio::test]
async fn test_hook_rejection_keeps_connection_cached() {
    let (_factory, cache) = setup().await;
    let dispatcher = TenantDispatcher::new(Arc::clone(&cache))
        .with_resolver(HeaderResolver::default())
        .on_resolved(|_, key| {
            if key.as_str() == "suspended" {
                Err("account suspended".to_string())
            } else {
                Ok(())
            }
        });

    let request = RequestParts::new("/").with_header("X-Tenant-ID", "suspended");
    let err = dispatcher.dispatch(&request).await.unwrap_err();

    assert!(matches!(err, DispatchError::Rejected { ref tenant, .. } if tenant == "suspended"));
    assert_eq!(err.to_json()["error"], "tenant_rejected");
    assert!(cache.contains("suspended").await);

    let request = RequestParts::new("/").with_header("X-Tenant-ID", "acme");
    assert!(dispatcher.dispatch(&request).await.unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_dispatch_cancellation() {
    let (factory, cache) = setup().await;
    factory.open_delay(Duration::from_secs(30));
    let dispatcher = TenantDispatcher::new(Arc::clone(&cache));

    let request = RequestParts::new("/").with_host("acme.localhost");
    let err = dispatcher
        .dispatch_with_cancel(&request, tokio::time::sleep(Duration::from_secs(1)))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Store(TenantStoreError::Cancelled { .. })));
    assert_eq!(err.status(), http::StatusCode::REQUEST_TIMEOUT);
    assert!(cache.is_empty().await);
}

#[tokio::test]
async fn test_dispatch_from_http_request() {
    let (_factory, cache) = setup().await;
    let dispatcher = TenantDispatcher::new(cache)
        .with_resolver(PathPatternResolver::new(r"^/tenants/([^/]+)", 1).unwrap());

    let request = http::Request::builder()
        .uri("/tenants/acme/orders")
        .body(())
        .unwrap();

    let scope = dispatcher
        .dispatch(&RequestParts::from(&request))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(scope.key.as_str(), "acme");
}
