//! Tenant Key Resolution
//!
//! Strategies for extracting a raw tenant key from a request. Resolvers only
//! produce strings; validation happens when the key reaches the cache.

use crate::request::RequestParts;
use async_trait::async_trait;
use regex::Regex;
use std::fmt;
use std::sync::Arc;

/// Tenant resolution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolutionError {
    #[error("{0}")]
    NotFound(String),

    #[error("Invalid tenant identifier: {0}")]
    Invalid(String),

    #[error("No tenant found using any resolver")]
    NoTenant,

    #[error("Tenant resolution failed: {0}")]
    Failed(String),
}

/// Tenant key resolver trait
///
/// Implement this trait to teach the dispatcher where tenant keys live.
#[async_trait]
pub trait TenantKeyResolver: Send + Sync {
    /// Extract the raw tenant key from `request`.
    async fn resolve(&self, request: &RequestParts) -> Result<String, ResolutionError>;
}

#[async_trait]
impl<R: TenantKeyResolver + ?Sized> TenantKeyResolver for Arc<R> {
    async fn resolve(&self, request: &RequestParts) -> Result<String, ResolutionError> {
        (**self).resolve(request).await
    }
}

/// Subdomain-based resolver
///
/// `acme.example.com` and `acme.localhost` resolve to `acme`.
///
/// Without a base domain, the host needs at least three labels, or two
/// when the second is `localhost`. With a base domain, exactly one label
/// in front of it is accepted.
#[derive(Debug, Clone)]
pub struct SubdomainResolver {
    base_domain: Option<String>,
    ignored: Vec<String>,
}

impl Default for SubdomainResolver {
    fn default() -> Self {
        Self {
            base_domain: None,
            ignored: vec!["www".into(), "api".into(), "localhost".into()],
        }
    }
}

impl SubdomainResolver {
    /// Create a resolver that ignores `www`, `api` and `localhost`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept subdomains directly under `base_domain`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tenantstore_dispatch::{RequestParts, SubdomainResolver, TenantKeyResolver};
    ///
    /// # tokio_test::block_on(async {
    /// let resolver = SubdomainResolver::new().with_base_domain("example.com");
    /// let request = RequestParts::new("/").with_host("acme.example.com");
    /// assert_eq!(resolver.resolve(&request).await.unwrap(), "acme");
    /// # });
    /// ```
    pub fn with_base_domain(mut self, base_domain: impl Into<String>) -> Self {
        self.base_domain = Some(base_domain.into().to_ascii_lowercase());
        self
    }

    /// Also reject `label` as a tenant.
    pub fn ignore(mut self, label: impl Into<String>) -> Self {
        self.ignored.push(label.into().to_ascii_lowercase());
        self
    }

    /// Replace the list of rejected labels.
    pub fn with_ignored<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ignored = labels
            .into_iter()
            .map(|label| label.into().to_ascii_lowercase())
            .collect();
        self
    }

    fn extract_subdomain(&self, host: &str) -> Option<String> {
        // Remove port if present
        let host = host.split(':').next().unwrap_or(host).to_ascii_lowercase();

        let subdomain = match &self.base_domain {
            Some(base) => {
                let subdomain = host.strip_suffix(base.as_str())?.strip_suffix('.')?;
                if subdomain.contains('.') {
                    return None;
                }
                subdomain.to_string()
            }
            None => {
                let labels: Vec<&str> = host.split('.').collect();
                if labels.len() < 2 || (labels.len() == 2 && labels[1] != "localhost") {
                    return None;
                }
                labels[0].to_string()
            }
        };

        if subdomain.is_empty() || self.ignored.iter().any(|label| *label == subdomain) {
            return None;
        }
        Some(subdomain)
    }
}

#[async_trait]
impl TenantKeyResolver for SubdomainResolver {
    async fn resolve(&self, request: &RequestParts) -> Result<String, ResolutionError> {
        let host = request
            .host()
            .ok_or_else(|| ResolutionError::NotFound("Missing Host header".to_string()))?;

        self.extract_subdomain(host)
            .ok_or_else(|| ResolutionError::NotFound("No valid tenant subdomain found".to_string()))
    }
}

/// Header-based resolver
///
/// Reads the key from a request header, `X-Tenant-ID` by default.
#[derive(Debug, Clone)]
pub struct HeaderResolver {
    header_name: String,
}

impl HeaderResolver {
    /// Create a resolver reading `header_name`.
    pub fn new(header_name: impl Into<String>) -> Self {
        Self {
            header_name: header_name.into(),
        }
    }
}

impl Default for HeaderResolver {
    fn default() -> Self {
        Self::new("X-Tenant-ID")
    }
}

#[async_trait]
impl TenantKeyResolver for HeaderResolver {
    async fn resolve(&self, request: &RequestParts) -> Result<String, ResolutionError> {
        clean_value(request.header(&self.header_name), || {
            format!("Missing header: {}", self.header_name)
        })
    }
}

/// Query-parameter-based resolver
///
/// Reads the key from a query parameter, `tenant` by default.
#[derive(Debug, Clone)]
pub struct QueryParamResolver {
    param_name: String,
}

impl QueryParamResolver {
    /// Create a resolver reading `param_name`.
    pub fn new(param_name: impl Into<String>) -> Self {
        Self {
            param_name: param_name.into(),
        }
    }
}

impl Default for QueryParamResolver {
    fn default() -> Self {
        Self::new("tenant")
    }
}

#[async_trait]
impl TenantKeyResolver for QueryParamResolver {
    async fn resolve(&self, request: &RequestParts) -> Result<String, ResolutionError> {
        clean_value(request.query(&self.param_name), || {
            format!("Missing query parameter: {}", self.param_name)
        })
    }
}

/// Trim a client-supplied value. Blank values count as missing; embedded
/// whitespace or control characters make the value invalid.
fn clean_value(
    raw: Option<&str>,
    missing: impl FnOnce() -> String,
) -> Result<String, ResolutionError> {
    let value = raw
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ResolutionError::NotFound(missing()))?;

    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ResolutionError::Invalid(value.escape_debug().to_string()));
    }
    Ok(value.to_string())
}

/// Path-prefix resolver
///
/// Takes the first path segment: `/acme/users` resolves to `acme`.
#[derive(Debug, Clone, Copy, Default)]
pub struct PathPrefixResolver;

#[async_trait]
impl TenantKeyResolver for PathPrefixResolver {
    async fn resolve(&self, request: &RequestParts) -> Result<String, ResolutionError> {
        request
            .path()
            .trim_start_matches('/')
            .split('/')
            .next()
            .filter(|segment| !segment.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolutionError::NotFound("No tenant found in path".to_string()))
    }
}

/// Path-pattern resolver
///
/// Resolves the key from a regex capture group (e.g., `/tenants/acme/users`).
#[derive(Debug, Clone)]
pub struct PathPatternResolver {
    pattern: Regex,
    group_index: usize,
}

impl PathPatternResolver {
    /// Create a resolver matching `pattern` and reading capture group
    /// `group_index`.
    ///
    /// # Examples
    ///
    /// ```
    /// use tenantstore_dispatch::PathPatternResolver;
    ///
    /// let resolver = PathPatternResolver::new(r"^/tenants/([^/]+)", 1).unwrap();
    /// ```
    pub fn new(pattern: &str, group_index: usize) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
            group_index,
        })
    }
}

#[async_trait]
impl TenantKeyResolver for PathPatternResolver {
    async fn resolve(&self, request: &RequestParts) -> Result<String, ResolutionError> {
        let captures = self
            .pattern
            .captures(request.path())
            .ok_or_else(|| ResolutionError::NotFound("Path pattern not matched".to_string()))?;

        captures
            .get(self.group_index)
            .map(|m| m.as_str())
            .filter(|key| !key.is_empty())
            .map(str::to_string)
            .ok_or_else(|| ResolutionError::NotFound("Capture group not found".to_string()))
    }
}

/// Tries resolvers in order; the first non-empty key wins.
#[derive(Clone, Default)]
pub struct ChainResolver {
    resolvers: Vec<Arc<dyn TenantKeyResolver>>,
}

impl ChainResolver {
    /// Create an empty chain. An empty chain never resolves.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a resolver.
    pub fn with<R: TenantKeyResolver + 'static>(mut self, resolver: R) -> Self {
        self.resolvers.push(Arc::new(resolver));
        self
    }

    /// Number of resolvers in the chain.
    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    /// Whether the chain has no resolvers.
    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl fmt::Debug for ChainResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChainResolver")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}

#[async_trait]
impl TenantKeyResolver for ChainResolver {
    async fn resolve(&self, request: &RequestParts) -> Result<String, ResolutionError> {
        for resolver in &self.resolvers {
            match resolver.resolve(request).await {
                Ok(key) if !key.is_empty() => return Ok(key),
                Ok(_) => {}
                Err(e) => tracing::trace!(error = %e, "Resolver in chain did not match"),
            }
        }
        Err(ResolutionError::NoTenant)
    }
}

/// Resolver backed by a closure.
///
/// ```
/// use tenantstore_dispatch::{FnResolver, ResolutionError};
///
/// let resolver = FnResolver::new(|request| {
///     request
///         .header("authorization")
///         .and_then(|value| value.strip_prefix("Tenant "))
///         .map(str::to_string)
///         .ok_or_else(|| ResolutionError::NotFound("Missing tenant credentials".into()))
/// });
/// ```
pub struct FnResolver<F> {
    resolve: F,
}

impl<F> FnResolver<F>
where
    F: Fn(&RequestParts) -> Result<String, ResolutionError> + Send + Sync,
{
    /// Wrap `resolve`.
    pub fn new(resolve: F) -> Self {
        Self { resolve }
    }
}

#[async_trait]
impl<F> TenantKeyResolver for FnResolver<F>
where
    F: Fn(&RequestParts) -> Result<String, ResolutionError> + Send + Sync,
{
    async fn resolve(&self, request: &RequestParts) -> Result<String, ResolutionError> {
        (self.resolve)(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(host: &str) -> RequestParts {
        RequestParts::new("/").with_host(host)
    }

    #[tokio::test]
    async fn test_subdomain_rules() {
        let resolver = SubdomainResolver::new();

        let accepted = [
            ("acme.localhost", "acme"),
            ("acme.localhost:3000", "acme"),
            ("acme.example.com", "acme"),
            ("ACME.Example.com", "acme"),
            ("beta.app.example.com", "beta"),
        ];
        for (h, expected) in accepted {
            assert_eq!(resolver.resolve(&host(h)).await.unwrap(), expected, "host {}", h);
        }

        let rejected = [
            "localhost",
            "localhost:3000",
            "example.com",
            "www.example.com",
            "api.example.com",
            "localhost.localhost",
            ".example.com",
        ];
        for h in rejected {
            assert!(resolver.resolve(&host(h)).await.is_err(), "host {}", h);
        }
    }

    #[tokio::test]
    async fn test_subdomain_with_base_domain() {
        let resolver = SubdomainResolver::new().with_base_domain("example.com");

        assert_eq!(resolver.resolve(&host("acme.example.com:8080")).await.unwrap(), "acme");
        assert!(resolver.resolve(&host("a.b.example.com")).await.is_err());
        assert!(resolver.resolve(&host("acme.other.com")).await.is_err());
        assert!(resolver.resolve(&host("notexample.com")).await.is_err());
        assert!(resolver.resolve(&host("www.example.com")).await.is_err());
    }

    #[tokio::test]
    async fn test_subdomain_custom_ignore_list() {
        let resolver = SubdomainResolver::new().ignore("admin");
        assert!(resolver.resolve(&host("admin.example.com")).await.is_err());

        let resolver = SubdomainResolver::new().with_ignored(Vec::<String>::new());
        assert_eq!(resolver.resolve(&host("www.example.com")).await.unwrap(), "www");
    }

    #[tokio::test]
    async fn test_subdomain_missing_host() {
        let err = SubdomainResolver::new()
            .resolve(&RequestParts::new("/"))
            .await
            .unwrap_err();
        assert_eq!(err, ResolutionError::NotFound("Missing Host header".to_string()));
    }

    #[tokio::test]
    async fn test_header_resolver() {
        let resolver = HeaderResolver::default();
        let request = RequestParts::new("/").with_header("x-tenant-id", "acme");
        assert_eq!(resolver.resolve(&request).await.unwrap(), "acme");

        let empty = RequestParts::new("/").with_header("X-Tenant-ID", "  ");
        assert!(matches!(
            resolver.resolve(&empty).await,
            Err(ResolutionError::NotFound(_))
        ));

        let padded = RequestParts::new("/").with_header("X-Tenant-ID", " acme ");
        assert_eq!(resolver.resolve(&padded).await.unwrap(), "acme");
    }

    #[tokio::test]
    async fn test_malformed_values_are_invalid() {
        let request = RequestParts::new("/").with_header("X-Tenant-ID", "acme corp");
        assert_eq!(
            HeaderResolver::default().resolve(&request).await.unwrap_err(),
            ResolutionError::Invalid("acme corp".to_string())
        );

        let request = RequestParts::from_uri("/users?tenant=ac%0Ame").unwrap();
        assert_eq!(
            QueryParamResolver::default().resolve(&request).await.unwrap_err(),
            ResolutionError::Invalid("ac\\nme".to_string())
        );
    }

    #[tokio::test]
    async fn test_query_param_resolver() {
        let resolver = QueryParamResolver::new("org");
        let request = RequestParts::from_uri("/users?org=acme").unwrap();
        assert_eq!(resolver.resolve(&request).await.unwrap(), "acme");
        assert!(
            resolver
                .resolve(&RequestParts::from_uri("/users?tenant=acme").unwrap())
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_path_prefix_resolver() {
        let resolver = PathPrefixResolver;
        assert_eq!(resolver.resolve(&RequestParts::new("/acme/users")).await.unwrap(), "acme");
        assert_eq!(resolver.resolve(&RequestParts::new("beta")).await.unwrap(), "beta");
        assert!(resolver.resolve(&RequestParts::new("/")).await.is_err());
        assert!(resolver.resolve(&RequestParts::new("")).await.is_err());
    }

    #[tokio::test]
    async fn test_path_pattern_resolver() {
        let resolver = PathPatternResolver::new(r"^/tenants/([^/]+)", 1).unwrap();
        let request = RequestParts::new("/tenants/acme/users");
        assert_eq!(resolver.resolve(&request).await.unwrap(), "acme");
        assert!(resolver.resolve(&RequestParts::new("/users")).await.is_err());

        let out_of_range = PathPatternResolver::new(r"^/tenants/([^/]+)", 2).unwrap();
        assert!(out_of_range.resolve(&request).await.is_err());

        assert!(PathPatternResolver::new(r"^/tenants/(", 1).is_err());
    }

    #[tokio::test]
    async fn test_chain_first_match_wins() {
        let chain = ChainResolver::new()
            .with(HeaderResolver::default())
            .with(QueryParamResolver::default())
            .with(SubdomainResolver::new());

        let request = RequestParts::from_uri("http://gamma.localhost/?tenant=beta").unwrap();
        assert_eq!(chain.resolve(&request).await.unwrap(), "beta");

        let request = request.with_header("X-Tenant-ID", "acme");
        assert_eq!(chain.resolve(&request).await.unwrap(), "acme");

        let request = RequestParts::from_uri("http://gamma.localhost/").unwrap();
        assert_eq!(chain.resolve(&request).await.unwrap(), "gamma");
    }

    #[tokio::test]
    async fn test_chain_skips_empty_keys() {
        let chain = ChainResolver::new()
            .with(FnResolver::new(|_| Ok(String::new())))
            .with(PathPrefixResolver);
        assert_eq!(chain.resolve(&RequestParts::new("/acme")).await.unwrap(), "acme");
    }

    #[tokio::test]
    async fn test_chain_exhausted() {
        let chain = ChainResolver::new().with(HeaderResolver::default());
        assert_eq!(
            chain.resolve(&RequestParts::new("/")).await.unwrap_err(),
            ResolutionError::NoTenant
        );
        assert_eq!(
            ChainResolver::new().resolve(&RequestParts::new("/")).await.unwrap_err(),
            ResolutionError::NoTenant
        );
    }

    #[tokio::test]
    async fn test_fn_resolver() {
        let resolver = FnResolver::new(|request: &RequestParts| {
            request
                .header("authorization")
                .and_then(|value| value.strip_prefix("Tenant "))
                .map(str::to_string)
                .ok_or_else(|| ResolutionError::Failed("no credentials".into()))
        });

        let request = RequestParts::new("/").with_header("Authorization", "Tenant acme");
        assert_eq!(resolver.resolve(&request).await.unwrap(), "acme");
        assert!(resolver.resolve(&RequestParts::new("/")).await.is_err());
    }
}
