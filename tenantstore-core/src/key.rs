//! Tenant keys and the policy used to validate them.
//!
//! Keys end up inside provisioning statements (e.g. `CREATE SCHEMA`), so the
//! default policy only admits plain SQL identifiers.

use crate::error::{Result, TenantStoreError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// PostgreSQL identifier rules: leading letter or underscore, at most 63 bytes.
pub const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]{0,62}$";

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(IDENTIFIER_PATTERN).expect("identifier pattern is valid"));

/// Identifier of a tenant partition.
///
/// Always non-empty. Whether it also satisfies a stricter naming rule depends
/// on the [`KeyPolicy`] that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TenantKey(String);

impl TenantKey {
    /// Create a key, rejecting only the empty string.
    ///
    /// # Examples
    ///
    /// ```
    /// use tenantstore_core::TenantKey;
    ///
    /// let key = TenantKey::new("acme").unwrap();
    /// assert_eq!(key.as_str(), "acme");
    /// assert!(TenantKey::new("").is_err());
    /// ```
    pub fn new(key: impl Into<String>) -> Result<Self> {
        let key = key.into();
        if key.is_empty() {
            return Err(TenantStoreError::InvalidKey {
                key,
                reason: "tenant key cannot be empty".to_string(),
            });
        }
        Ok(Self(key))
    }

    /// Borrow the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consume the key, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for TenantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for TenantKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for TenantKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for TenantKey {
    type Error = TenantStoreError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TenantKey> for String {
    fn from(key: TenantKey) -> Self {
        key.0
    }
}

/// Rule a raw key must pass before the cache acts on it.
#[derive(Debug, Clone)]
pub enum KeyPolicy {
    /// Any non-empty string.
    Permissive,
    /// Non-empty and matching the regex.
    Pattern(Regex),
}

impl KeyPolicy {
    /// The default: a bare SQL identifier (see [`IDENTIFIER_PATTERN`]).
    pub fn identifier() -> Self {
        KeyPolicy::Pattern(IDENTIFIER.clone())
    }

    /// Accept any non-empty key. Only use this when keys never come from
    /// untrusted input or the provisioner does its own escaping.
    pub fn permissive() -> Self {
        KeyPolicy::Permissive
    }

    /// Accept keys matching a custom pattern.
    pub fn pattern(pattern: &str) -> Result<Self> {
        Regex::new(pattern)
            .map(KeyPolicy::Pattern)
            .map_err(|e| TenantStoreError::Config(format!("invalid key pattern: {}", e)))
    }

    /// Validate a raw key.
    pub fn validate(&self, raw: &str) -> Result<TenantKey> {
        let key = TenantKey::new(raw)?;
        if let KeyPolicy::Pattern(re) = self {
            if !re.is_match(key.as_str()) {
                return Err(TenantStoreError::InvalidKey {
                    key: key.into_inner(),
                    reason: format!("must match {}", re.as_str()),
                });
            }
        }
        Ok(key)
    }
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self::identifier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_key_rejected() {
        let err = TenantKey::new("").unwrap_err();
        assert!(matches!(err, TenantStoreError::InvalidKey { .. }));
    }

    #[test]
    fn test_identifier_policy() {
        let policy = KeyPolicy::default();

        assert!(policy.validate("acme").is_ok());
        assert!(policy.validate("test_tenant_1700000000").is_ok());
        assert!(policy.validate("_private").is_ok());

        assert!(policy.validate("").is_err());
        assert!(policy.validate("9lives").is_err());
        assert!(policy.validate("acme-corp").is_err());
        assert!(policy.validate("acme; DROP SCHEMA public").is_err());
        assert!(policy.validate(&"a".repeat(64)).is_err());
        assert!(policy.validate(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_permissive_policy() {
        let policy = KeyPolicy::permissive();
        assert!(policy.validate("acme-corp.example").is_ok());
        assert!(policy.validate("").is_err());
    }

    #[test]
    fn test_custom_pattern() {
        let policy = KeyPolicy::pattern(r"^tenant_[0-9]+$").unwrap();
        assert!(policy.validate("tenant_42").is_ok());
        assert!(policy.validate("acme").is_err());

        assert!(matches!(
            KeyPolicy::pattern("(").unwrap_err(),
            TenantStoreError::Config(_)
        ));
    }

    #[test]
    fn test_key_serde_rejects_empty() {
        let key: TenantKey = key_from_toml("\"acme\"").unwrap();
        assert_eq!(key.as_str(), "acme");
        assert!(key_from_toml("\"\"").is_err());
    }

    fn key_from_toml(s: &str) -> std::result::Result<TenantKey, toml::de::Error> {
        #[derive(Deserialize)]
        struct Wrapper {
            key: TenantKey,
        }
        toml::from_str::<Wrapper>(&format!("key = {}", s)).map(|w| w.key)
    }
}
