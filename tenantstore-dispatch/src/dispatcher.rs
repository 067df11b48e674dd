//! Tenant Dispatcher
//!
//! Turns a request into the tenant's connection: skip check, resolution,
//! cache lookup and an optional acceptance hook, in that order.

use crate::request::RequestParts;
use crate::resolver::{ResolutionError, SubdomainResolver, TenantKeyResolver};
use http::StatusCode;
use std::future::Future;
use std::sync::Arc;
use tenantstore_core::{ConnectionFactory, TenantConnectionCache, TenantKey, TenantStoreError};
use tracing::{debug, warn};

type SkipFn = dyn Fn(&RequestParts) -> bool + Send + Sync;
type ResolvedFn = dyn Fn(&RequestParts, &TenantKey) -> Result<(), String> + Send + Sync;

/// Dispatch errors
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No tenant key could be extracted from the request.
    #[error(transparent)]
    Resolution(#[from] ResolutionError),

    /// The cache refused or failed to produce a connection.
    #[error(transparent)]
    Store(#[from] TenantStoreError),

    /// The `on_resolved` hook rejected the tenant.
    #[error("Tenant '{tenant}' rejected: {message}")]
    Rejected { tenant: String, message: String },
}

impl DispatchError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            DispatchError::Resolution(_) => "tenant_resolution_failed",
            DispatchError::Store(TenantStoreError::InvalidKey { .. }) => "tenant_resolution_failed",
            DispatchError::Store(_) => "tenant_unavailable",
            DispatchError::Rejected { .. } => "tenant_rejected",
        }
    }

    /// HTTP status to answer with.
    pub fn status(&self) -> StatusCode {
        match self {
            DispatchError::Resolution(_) => StatusCode::BAD_REQUEST,
            DispatchError::Store(TenantStoreError::InvalidKey { .. }) => StatusCode::BAD_REQUEST,
            DispatchError::Store(TenantStoreError::Cancelled { .. }) => StatusCode::REQUEST_TIMEOUT,
            DispatchError::Store(TenantStoreError::TimedOut { .. }) => StatusCode::GATEWAY_TIMEOUT,
            DispatchError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
            DispatchError::Rejected { .. } => StatusCode::FORBIDDEN,
        }
    }

    /// Response body: `{"error": <code>, "message": <display>}`.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        })
    }
}

/// A resolved tenant and its connection.
#[derive(Debug)]
pub struct TenantScope<C> {
    pub key: TenantKey,
    pub connection: Arc<C>,
}

impl<C> Clone for TenantScope<C> {
    fn clone(&self) -> Self {
        Self {
            key: self.key.clone(),
            connection: Arc::clone(&self.connection),
        }
    }
}

/// Resolves tenants from requests and fetches their connections.
///
/// # Examples
///
/// ```rust,ignore
/// let dispatcher = TenantDispatcher::new(cache)
///     .with_resolver(HeaderResolver::new("X-Tenant-ID"))
///     .skip(|request| request.path() == "/health");
///
/// if let Some(scope) = dispatcher.dispatch(&RequestParts::from(&request)).await? {
///     handle(scope.key, scope.connection).await;
/// }
/// ```
pub struct TenantDispatcher<F: ConnectionFactory> {
    cache: Arc<TenantConnectionCache<F>>,
    resolver: Arc<dyn TenantKeyResolver>,
    skip: Option<Arc<SkipFn>>,
    on_resolved: Option<Arc<ResolvedFn>>,
    optional: bool,
}

impl<F: ConnectionFactory> TenantDispatcher<F> {
    /// Create a dispatcher resolving tenants by subdomain.
    pub fn new(cache: Arc<TenantConnectionCache<F>>) -> Self {
        Self {
            cache,
            resolver: Arc::new(SubdomainResolver::new()),
            skip: None,
            on_resolved: None,
            optional: false,
        }
    }

    /// Use `resolver` instead of the subdomain resolver.
    pub fn with_resolver<R: TenantKeyResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolver = Arc::new(resolver);
        self
    }

    /// Bypass dispatch for requests matching `predicate`.
    pub fn skip<P>(mut self, predicate: P) -> Self
    where
        P: Fn(&RequestParts) -> bool + Send + Sync + 'static,
    {
        self.skip = Some(Arc::new(predicate));
        self
    }

    /// Run `hook` after the connection is obtained. An `Err` rejects the
    /// request; the connection stays cached.
    pub fn on_resolved<H>(mut self, hook: H) -> Self
    where
        H: Fn(&RequestParts, &TenantKey) -> Result<(), String> + Send + Sync + 'static,
    {
        self.on_resolved = Some(Arc::new(hook));
        self
    }

    /// Make tenant resolution optional
    ///
    /// If true, requests without a resolvable tenant dispatch to `None`
    /// instead of failing. Cache failures still surface.
    pub fn with_optional(mut self, optional: bool) -> Self {
        self.optional = optional;
        self
    }

    /// The cache this dispatcher hands connections out of.
    pub fn cache(&self) -> &Arc<TenantConnectionCache<F>> {
        &self.cache
    }

    /// Resolve the tenant for `request` and fetch its connection.
    ///
    /// Returns `Ok(None)` for skipped requests, and for unresolvable ones
    /// when the dispatcher is optional.
    pub async fn dispatch(
        &self,
        request: &RequestParts,
    ) -> Result<Option<TenantScope<F::Connection>>, DispatchError> {
        self.dispatch_with_cancel(request, std::future::pending::<()>())
            .await
    }

    /// Like [`dispatch`](Self::dispatch), abandoning connection setup when
    /// `cancel` completes first.
    pub async fn dispatch_with_cancel<S>(
        &self,
        request: &RequestParts,
        cancel: S,
    ) -> Result<Option<TenantScope<F::Connection>>, DispatchError>
    where
        S: Future<Output = ()>,
    {
        if self.skip.as_ref().is_some_and(|skip| skip(request)) {
            debug!(path = request.path(), "Tenant dispatch skipped");
            return Ok(None);
        }

        let raw = match self.resolver.resolve(request).await {
            Ok(raw) => raw,
            Err(e) if self.optional => {
                debug!(path = request.path(), error = %e, "No tenant resolved, continuing without one");
                return Ok(None);
            }
            Err(e) => {
                warn!(path = request.path(), error = %e, "Tenant resolution failed");
                return Err(e.into());
            }
        };

        let connection = self.cache.get_with_cancel(&raw, cancel).await?;
        let key = TenantKey::new(raw)?;

        if let Some(hook) = &self.on_resolved {
            hook(request, &key).map_err(|message| {
                warn!(tenant = %key, reason = %message, "Tenant rejected by hook");
                DispatchError::Rejected {
                    tenant: key.to_string(),
                    message,
                }
            })?;
        }

        debug!(tenant = %key, path = request.path(), "Tenant dispatched");
        Ok(Some(TenantScope { key, connection }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_json() {
        let err = DispatchError::from(ResolutionError::NotFound(
            "No valid tenant subdomain found".to_string(),
        ));
        assert_eq!(err.code(), "tenant_resolution_failed");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            err.to_json(),
            serde_json::json!({
                "error": "tenant_resolution_failed",
                "message": "No valid tenant subdomain found",
            })
        );
    }

    #[test]
    fn test_store_error_codes() {
        let invalid = DispatchError::from(TenantStoreError::InvalidKey {
            key: "acme-corp".into(),
            reason: "bad".into(),
        });
        assert_eq!(invalid.code(), "tenant_resolution_failed");
        assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);

        let timed_out = DispatchError::from(TenantStoreError::TimedOut {
            key: "acme".into(),
            after: Duration::from_secs(10),
        });
        assert_eq!(timed_out.code(), "tenant_unavailable");
        assert_eq!(timed_out.status(), StatusCode::GATEWAY_TIMEOUT);

        let closed = DispatchError::from(TenantStoreError::StoreClosed);
        assert_eq!(closed.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_rejected_message() {
        let err = DispatchError::Rejected {
            tenant: "acme".into(),
            message: "suspended".into(),
        };
        assert_eq!(err.to_string(), "Tenant 'acme' rejected: suspended");
        assert_eq!(err.status(), StatusCode::FORBIDDEN);
    }
}
