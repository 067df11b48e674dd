//! Configuration for the tenant connection cache.

use crate::error::{Result, TenantStoreError};
use crate::key::KeyPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for a [`TenantConnectionCache`](crate::TenantConnectionCache).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TenantStoreConfig {
    /// Connection target of the master (control-plane) database.
    pub master_url: String,

    /// Minimum time between two liveness probes of the same tenant.
    #[serde(default = "default_probe_interval")]
    #[serde(with = "duration_secs")]
    pub probe_interval: Duration,

    /// Upper bound for a single liveness probe.
    #[serde(default = "default_probe_timeout")]
    #[serde(with = "duration_secs")]
    pub probe_timeout: Duration,

    /// Whether hits schedule liveness probes at all.
    #[serde(default = "default_true")]
    pub probes_enabled: bool,

    /// Upper bound for provisioning + open + migration of one tenant.
    #[serde(default = "default_construct_timeout")]
    #[serde(with = "duration_secs")]
    pub construct_timeout: Duration,

    /// Run the configured migrator on freshly opened tenant connections.
    #[serde(default = "default_true")]
    pub auto_migrate: bool,

    /// Regex tenant keys must match. `None` selects the identifier policy.
    #[serde(default)]
    pub key_pattern: Option<String>,

    /// Accept any non-empty key, ignoring `key_pattern`.
    #[serde(default)]
    pub permissive_keys: bool,
}

fn default_probe_interval() -> Duration {
    Duration::from_secs(5 * 60) // 5 minutes
}

fn default_probe_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_construct_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_true() -> bool {
    true
}

impl TenantStoreConfig {
    /// Create a configuration for the given master target.
    pub fn new(master_url: impl Into<String>) -> Self {
        Self {
            master_url: master_url.into(),
            probe_interval: default_probe_interval(),
            probe_timeout: default_probe_timeout(),
            probes_enabled: true,
            construct_timeout: default_construct_timeout(),
            auto_migrate: true,
            key_pattern: None,
            permissive_keys: false,
        }
    }

    /// Create configuration from environment variables.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    ///
    /// - `DATABASE_URL`: required master target
    /// - `TENANTSTORE_PROBE_INTERVAL`: seconds between probes (default: 300)
    /// - `TENANTSTORE_PROBE_TIMEOUT`: probe timeout in seconds (default: 5)
    /// - `TENANTSTORE_PROBES`: enable probes (true/false)
    /// - `TENANTSTORE_CONSTRUCT_TIMEOUT`: setup timeout in seconds (default: 10)
    /// - `TENANTSTORE_AUTO_MIGRATE`: run the migrator (true/false)
    /// - `TENANTSTORE_KEY_PATTERN`: custom key regex
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let master_url = std::env::var("DATABASE_URL")
            .map_err(|_| TenantStoreError::Config("DATABASE_URL not set".into()))?;

        let mut config = Self::new(master_url);

        if let Some(secs) = env_secs("TENANTSTORE_PROBE_INTERVAL")? {
            config.probe_interval = secs;
        }
        if let Some(secs) = env_secs("TENANTSTORE_PROBE_TIMEOUT")? {
            config.probe_timeout = secs;
        }
        if let Some(secs) = env_secs("TENANTSTORE_CONSTRUCT_TIMEOUT")? {
            config.construct_timeout = secs;
        }
        if let Ok(v) = std::env::var("TENANTSTORE_PROBES") {
            config.probes_enabled = parse_flag(&v);
        }
        if let Ok(v) = std::env::var("TENANTSTORE_AUTO_MIGRATE") {
            config.auto_migrate = parse_flag(&v);
        }
        if let Ok(pattern) = std::env::var("TENANTSTORE_KEY_PATTERN") {
            config.key_pattern = Some(pattern);
        }

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a TOML document.
    ///
    /// ```
    /// use tenantstore_core::TenantStoreConfig;
    ///
    /// let config = TenantStoreConfig::from_toml_str(r#"
    ///     master_url = "postgres://localhost/app"
    ///     probe_interval = 60
    /// "#).unwrap();
    ///
    /// assert_eq!(config.probe_interval.as_secs(), 60);
    /// assert!(config.auto_migrate);
    /// ```
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(s).map_err(|e| TenantStoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check for values the cache cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.master_url.is_empty() {
            return Err(TenantStoreError::Config("master_url is empty".into()));
        }
        if self.probe_timeout.is_zero() {
            return Err(TenantStoreError::Config("probe_timeout must be positive".into()));
        }
        if self.construct_timeout.is_zero() {
            return Err(TenantStoreError::Config(
                "construct_timeout must be positive".into(),
            ));
        }
        self.key_policy().map(|_| ())
    }

    /// Build the key policy this configuration describes.
    pub fn key_policy(&self) -> Result<KeyPolicy> {
        if self.permissive_keys {
            return Ok(KeyPolicy::permissive());
        }
        match &self.key_pattern {
            Some(pattern) => KeyPolicy::pattern(pattern),
            None => Ok(KeyPolicy::identifier()),
        }
    }

    /// Set the probe interval.
    pub fn probe_interval(mut self, interval: Duration) -> Self {
        self.probe_interval = interval;
        self
    }

    /// Set the probe timeout.
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Turn off liveness probes.
    pub fn disable_probes(mut self) -> Self {
        self.probes_enabled = false;
        self
    }

    /// Set the construction timeout.
    pub fn construct_timeout(mut self, timeout: Duration) -> Self {
        self.construct_timeout = timeout;
        self
    }

    /// Enable or disable the post-open migration.
    pub fn auto_migrate(mut self, enabled: bool) -> Self {
        self.auto_migrate = enabled;
        self
    }

    /// Require keys to match a custom regex.
    pub fn key_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.key_pattern = Some(pattern.into());
        self
    }

    /// Accept any non-empty key.
    pub fn permissive_keys(mut self) -> Self {
        self.permissive_keys = true;
        self
    }
}

fn env_secs(name: &str) -> Result<Option<Duration>> {
    match std::env::var(name) {
        Ok(v) => v
            .parse::<u64>()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| TenantStoreError::Config(format!("Invalid {}", name))),
        Err(_) => Ok(None),
    }
}

fn parse_flag(v: &str) -> bool {
    v == "1" || v.eq_ignore_ascii_case("true")
}

/// Durations are written as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
