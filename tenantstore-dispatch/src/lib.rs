//! Request-to-tenant dispatch for tenantstore.
//!
//! Pulls a tenant key out of an incoming request and fetches that tenant's
//! connection from a [`TenantConnectionCache`](tenantstore_core::TenantConnectionCache).
//!
//! ## Features
//!
//! - **Resolvers**: subdomain, header, query parameter, path prefix, path
//!   regex, chains and closures
//! - **Dispatcher**: skip predicate, optional tenancy, post-resolution hook
//! - **Error bodies**: `{"error", "message"}` JSON with an HTTP status
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tenantstore_dispatch::*;
//!
//! let dispatcher = TenantDispatcher::new(cache).with_resolver(
//!     ChainResolver::new()
//!         .with(HeaderResolver::new("X-Tenant-ID"))
//!         .with(SubdomainResolver::new()),
//! );
//!
//! match dispatcher.dispatch(&RequestParts::from(&request)).await {
//!     Ok(Some(scope)) => serve(scope).await,
//!     Ok(None) => serve_public().await,
//!     Err(e) => respond(e.status(), e.to_json()),
//! }
//! ```

pub mod dispatcher;
pub mod request;
pub mod resolver;

pub use dispatcher::{DispatchError, TenantDispatcher, TenantScope};
pub use request::RequestParts;
pub use resolver::{
    ChainResolver, FnResolver, HeaderResolver, PathPatternResolver, PathPrefixResolver,
    QueryParamResolver, ResolutionError, SubdomainResolver, TenantKeyResolver,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::dispatcher::{DispatchError, TenantDispatcher, TenantScope};
    pub use crate::request::RequestParts;
    pub use crate::resolver::{
        ChainResolver, HeaderResolver, ResolutionError, SubdomainResolver, TenantKeyResolver,
    };
}
