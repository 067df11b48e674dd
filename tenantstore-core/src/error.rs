//! Error types for the tenant connection cache.

use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a collaborator (connection factory, provisioner,
/// migrator or a connection handle itself).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Could not reach or talk to the database.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A statement was rejected by the database.
    #[error("Query error: {0}")]
    Query(String),

    /// The backend cannot perform the requested operation.
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Anything else.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Shorthand for a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection(msg.into())
    }

    /// Shorthand for a query error.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query(msg.into())
    }
}

/// Which handle a close failure belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseTarget {
    /// A cached tenant connection.
    Tenant(String),
    /// The control-plane connection.
    Master,
}

impl fmt::Display for CloseTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseTarget::Tenant(key) => write!(f, "tenant '{}'", key),
            CloseTarget::Master => write!(f, "master connection"),
        }
    }
}

/// A single failed close.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseFailure {
    pub target: CloseTarget,
    pub error: BackendError,
}

impl CloseFailure {
    pub(crate) fn tenant(key: impl Into<String>, error: BackendError) -> Self {
        Self {
            target: CloseTarget::Tenant(key.into()),
            error,
        }
    }

    pub(crate) fn master(error: BackendError) -> Self {
        Self {
            target: CloseTarget::Master,
            error,
        }
    }
}

impl fmt::Display for CloseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.target, self.error)
    }
}

fn join_failures(failures: &[CloseFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Errors surfaced by [`TenantConnectionCache`](crate::TenantConnectionCache).
#[derive(Error, Debug)]
pub enum TenantStoreError {
    /// The tenant key is empty or violates the key policy.
    #[error("Invalid tenant key '{key}': {reason}")]
    InvalidKey { key: String, reason: String },

    /// The tenant partition could not be created.
    #[error("Failed to provision partition for tenant '{key}': {source}")]
    ProvisioningFailed {
        key: String,
        #[source]
        source: BackendError,
    },

    /// The tenant-scoped connection could not be opened.
    #[error("Failed to connect to tenant '{key}': {source}")]
    ConnectionFailed {
        key: String,
        #[source]
        source: BackendError,
    },

    /// The post-open schema sync failed.
    #[error("Failed to migrate tenant '{key}': {source}")]
    MigrationFailed {
        key: String,
        #[source]
        source: BackendError,
    },

    /// One or more connections failed to close. The affected records were
    /// still dropped from the cache.
    #[error("Failed to close {} connection(s): {}", failures.len(), join_failures(failures))]
    CloseFailed { failures: Vec<CloseFailure> },

    /// The master connection could not be opened while building the cache.
    #[error("Failed to connect to master database: {0}")]
    MasterConnectionFailed(#[source] BackendError),

    /// The caller's cancellation signal fired during construction.
    #[error("Connection setup for tenant '{key}' was cancelled")]
    Cancelled { key: String },

    /// Construction exceeded the configured timeout.
    #[error("Connection setup for tenant '{key}' timed out after {after:?}")]
    TimedOut { key: String, after: Duration },

    /// `close_all` has already run on this cache.
    #[error("Tenant store is closed")]
    StoreClosed,

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl TenantStoreError {
    /// Whether calling again may succeed without any change on the caller's
    /// side. Construction failures leave no state behind, so they qualify.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TenantStoreError::ProvisioningFailed { .. }
                | TenantStoreError::ConnectionFailed { .. }
                | TenantStoreError::MigrationFailed { .. }
                | TenantStoreError::Cancelled { .. }
                | TenantStoreError::TimedOut { .. }
        )
    }

    /// The tenant key the error refers to, if any.
    pub fn tenant(&self) -> Option<&str> {
        match self {
            TenantStoreError::InvalidKey { key, .. }
            | TenantStoreError::ProvisioningFailed { key, .. }
            | TenantStoreError::ConnectionFailed { key, .. }
            | TenantStoreError::MigrationFailed { key, .. }
            | TenantStoreError::Cancelled { key }
            | TenantStoreError::TimedOut { key, .. } => Some(key),
            _ => None,
        }
    }
}

/// Result type alias for cache operations.
pub type Result<T> = std::result::Result<T, TenantStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_failed_lists_every_target() {
        let err = TenantStoreError::CloseFailed {
            failures: vec![
                CloseFailure::tenant("acme", BackendError::connection("reset")),
                CloseFailure::master(BackendError::Other("busy".into())),
            ],
        };

        let msg = err.to_string();
        assert!(msg.starts_with("Failed to close 2 connection(s)"));
        assert!(msg.contains("tenant 'acme': Connection error: reset"));
        assert!(msg.contains("master connection: busy"));
    }

    #[test]
    fn test_retryable_classification() {
        let open = TenantStoreError::ConnectionFailed {
            key: "beta".into(),
            source: BackendError::connection("refused"),
        };
        assert!(open.is_retryable());
        assert_eq!(open.tenant(), Some("beta"));

        assert!(!TenantStoreError::StoreClosed.is_retryable());
        assert!(
            !TenantStoreError::MasterConnectionFailed(BackendError::connection("down"))
                .is_retryable()
        );
        assert_eq!(TenantStoreError::StoreClosed.tenant(), None);
    }
}
