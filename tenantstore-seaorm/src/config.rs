//! Pool configuration applied to every connection the factory opens.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;
use tenantstore_core::TenantStoreError;

/// Pool settings for master and tenant connections.
///
/// Each tenant gets a pool of its own, so `max_connections` bounds the
/// connections per tenant, not in total. Missing fields deserialize to the
/// defaults; durations are whole seconds.
///
/// ```
/// use tenantstore_seaorm::PoolOptions;
///
/// let options: PoolOptions = toml::from_str("max_connections = 3").unwrap();
/// assert_eq!(options.min_connections, 1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolOptions {
    /// Upper bound per pool.
    pub max_connections: u32,
    /// Connections kept open per pool.
    pub min_connections: u32,
    /// How long to wait for a new connection.
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,
    /// Idle connections older than this are closed.
    #[serde(with = "duration_secs")]
    pub idle_timeout: Duration,
    /// Connections are recycled after this long.
    #[serde(with = "duration_secs")]
    pub max_lifetime: Duration,
    /// Log every statement through SQLx.
    pub sqlx_logging: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_connections: 5,
            min_connections: 1,
            connect_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(600),
            max_lifetime: Duration::from_secs(1800),
            sqlx_logging: false,
        }
    }
}

impl PoolOptions {
    /// Pool options with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read overrides from `DATABASE_MAX_CONNECTIONS`,
    /// `DATABASE_MIN_CONNECTIONS`, `DATABASE_CONNECT_TIMEOUT`,
    /// `DATABASE_IDLE_TIMEOUT`, `DATABASE_MAX_LIFETIME` (seconds) and
    /// `DATABASE_SQLX_LOGGING` (true/false).
    pub fn from_env() -> Result<Self, TenantStoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<L>(lookup: L) -> Result<Self, TenantStoreError>
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut options = Self::new();

        for (name, count) in [
            ("DATABASE_MAX_CONNECTIONS", &mut options.max_connections),
            ("DATABASE_MIN_CONNECTIONS", &mut options.min_connections),
        ] {
            if let Some(value) = parse_var(&lookup, name)? {
                *count = value;
            }
        }

        for (name, duration) in [
            ("DATABASE_CONNECT_TIMEOUT", &mut options.connect_timeout),
            ("DATABASE_IDLE_TIMEOUT", &mut options.idle_timeout),
            ("DATABASE_MAX_LIFETIME", &mut options.max_lifetime),
        ] {
            if let Some(secs) = parse_var::<u64, _>(&lookup, name)? {
                *duration = Duration::from_secs(secs);
            }
        }

        if let Some(logging) = parse_var(&lookup, "DATABASE_SQLX_LOGGING")? {
            options.sqlx_logging = logging;
        }

        Ok(options)
    }

    /// Cap each pool at `max` connections.
    pub fn max_connections(mut self, max: u32) -> Self {
        self.max_connections = max;
        self
    }

    /// Toggle SQLx statement logging.
    pub fn sqlx_logging(mut self, enabled: bool) -> Self {
        self.sqlx_logging = enabled;
        self
    }

    /// SeaORM connect options for `url` carrying these pool settings.
    pub fn to_connect_options(&self, url: &str) -> sea_orm::ConnectOptions {
        let mut options = sea_orm::ConnectOptions::new(url);
        options
            .max_connections(self.max_connections)
            .min_connections(self.min_connections)
            .connect_timeout(self.connect_timeout)
            .idle_timeout(self.idle_timeout)
            .max_lifetime(self.max_lifetime)
            .sqlx_logging(self.sqlx_logging);
        options
    }
}

fn parse_var<T, L>(lookup: &L, name: &str) -> Result<Option<T>, TenantStoreError>
where
    T: FromStr,
    L: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|raw| {
            raw.trim()
                .parse()
                .map_err(|_| TenantStoreError::Config(format!("{name} has an invalid value: {raw}")))
        })
        .transpose()
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}
