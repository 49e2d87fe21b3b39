use std::time::Duration;

use serde::Deserialize;
use tokio::sync::Semaphore;

use crate::proto::error::{Error, Result};

/// Connection and pool settings for one persistence class.
///
/// Field names follow the camelCase configuration shape, so a JSON document
/// such as `{"addresses": ["10.0.0.1:6379"], "poolMaxActive": 20}` deserializes
/// directly. Missing fields fall back to the defaults below.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolConfig {
    /// Backend addresses in failover order.
    pub addresses: Vec<String>,
    /// Timeout for establishing a TCP connection.
    pub connect_timeout_ms: u64,
    /// Timeout for reading one reply.
    pub read_timeout_ms: u64,
    /// Timeout for writing buffered requests.
    pub write_timeout_ms: u64,
    /// Connections dialed when the pool starts.
    pub pool_min_active: usize,
    /// Upper bound on concurrently checked-out connections.
    pub pool_max_active: usize,
    /// Idle connections older than this are closed instead of reused.
    pub pool_idle_timeout_ms: u64,
    /// How long `acquire` waits for a free connection.
    pub pool_wait_timeout_ms: u64,
    /// Namespace prefix prepended to every key.
    pub key_prefix: String,
    /// Expiry applied to writes that do not pass one explicitly. 0 disables it.
    pub default_expire_seconds: u64,
    /// Password sent with `AUTH` after connecting.
    pub password: Option<String>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            addresses: vec!["127.0.0.1:6379".to_string()],
            connect_timeout_ms: 1000,
            read_timeout_ms: 1000,
            write_timeout_ms: 1000,
            pool_min_active: 2,
            pool_max_active: 100,
            pool_idle_timeout_ms: 180_000,
            pool_wait_timeout_ms: 1000,
            key_prefix: "prefix".to_string(),
            default_expire_seconds: 604_800,
            password: None,
        }
    }
}

impl PoolConfig {
    /// Creates a config for `addresses` with every other field defaulted.
    pub fn with_addresses<I, S>(addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            addresses: addresses.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Connect timeout as a [`Duration`].
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    /// Read timeout as a [`Duration`], `None` when disabled.
    pub fn read_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.read_timeout_ms)
    }

    /// Write timeout as a [`Duration`], `None` when disabled.
    pub fn write_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.write_timeout_ms)
    }

    /// Idle timeout as a [`Duration`], `None` when idle connections never expire.
    pub fn idle_timeout(&self) -> Option<Duration> {
        non_zero_ms(self.pool_idle_timeout_ms)
    }

    /// Acquire deadline as a [`Duration`].
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.pool_wait_timeout_ms)
    }

    /// Checks the invariants the pool relies on.
    pub fn validate(&self) -> Result<()> {
        if self.addresses.is_empty() {
            return Err(invalid("at least one address is required"));
        }
        if self.pool_max_active == 0 {
            return Err(invalid("poolMaxActive must be greater than zero"));
        }
        if self.pool_max_active > Semaphore::MAX_PERMITS {
            return Err(invalid(format!(
                "poolMaxActive must not exceed {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.pool_min_active > self.pool_max_active {
            return Err(invalid(format!(
                "poolMinActive ({}) exceeds poolMaxActive ({})",
                self.pool_min_active, self.pool_max_active
            )));
        }
        if self.connect_timeout_ms == 0 {
            return Err(invalid("connectTimeoutMs must be greater than zero"));
        }
        Ok(())
    }
}

/// Settings for both persistence classes.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// Pool used for non-durable data.
    #[serde(alias = "unpersist")]
    pub ephemeral: PoolConfig,
    /// Pool backed by persistent servers.
    #[serde(alias = "persist")]
    pub durable: PoolConfig,
}

impl RedisConfig {
    /// Uses the same settings for both classes.
    pub fn uniform(config: PoolConfig) -> Self {
        Self {
            ephemeral: config.clone(),
            durable: config,
        }
    }

    /// Parses a JSON document.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| invalid(format!("invalid redis config: {e}")))
    }
}

fn non_zero_ms(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}

fn invalid(message: impl Into<String>) -> Error {
    Error::InvalidArgument {
        message: message.into(),
    }
}
