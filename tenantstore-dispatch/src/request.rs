//! Framework-neutral view of an incoming request.

use std::collections::HashMap;
use url::Url;
use url::form_urlencoded;

/// The parts of a request that tenant resolvers look at.
///
/// Header names are stored lowercased, so lookups are case-insensitive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestParts {
    host: Option<String>,
    path: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
}

impl RequestParts {
    /// Create a request for `path` with no host, headers or query.
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    /// Build from an absolute URL (`https://acme.example.com/users?x=1`) or
    /// an origin-form target (`/users?x=1`).
    ///
    /// # Examples
    ///
    /// ```
    /// use tenantstore_dispatch::RequestParts;
    ///
    /// let request = RequestParts::from_uri("http://acme.localhost:3000/users?tenant=beta").unwrap();
    /// assert_eq!(request.host(), Some("acme.localhost:3000"));
    /// assert_eq!(request.path(), "/users");
    /// assert_eq!(request.query("tenant"), Some("beta"));
    /// ```
    pub fn from_uri(uri: &str) -> Result<Self, url::ParseError> {
        match Url::parse(uri) {
            Ok(url) => {
                let host = url.host_str().map(|host| match url.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                });
                let mut request = Self::new(url.path());
                request.host = host;
                request.extend_query(url.query().unwrap_or_default());
                Ok(request)
            }
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
                let mut request = Self::new(if path.is_empty() { "/" } else { path });
                request.extend_query(query);
                Ok(request)
            }
            Err(e) => Err(e),
        }
    }

    /// Set the host, optionally with a port.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Add a header. Later values for the same name replace earlier ones.
    pub fn with_header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Add a query parameter.
    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    /// The request host. Falls back to the `Host` header.
    pub fn host(&self) -> Option<&str> {
        self.host.as_deref().or_else(|| self.header("host"))
    }

    /// The request path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// Decoded query parameter. The first occurrence wins.
    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    fn extend_query(&mut self, query: &str) {
        for (name, value) in form_urlencoded::parse(query.as_bytes()) {
            self.query
                .entry(name.into_owned())
                .or_insert_with(|| value.into_owned());
        }
    }
}

impl<B> From<&http::Request<B>> for RequestParts {
    fn from(request: &http::Request<B>) -> Self {
        let uri = request.uri();
        let mut parts = Self::new(uri.path());

        parts.host = uri.authority().map(|authority| authority.as_str().to_string());
        parts.extend_query(uri.query().unwrap_or_default());

        for (name, value) in request.headers() {
            if let Ok(value) = value.to_str() {
                parts
                    .headers
                    .entry(name.as_str().to_string())
                    .or_insert_with(|| value.to_string());
            }
        }

        parts
    }
}
