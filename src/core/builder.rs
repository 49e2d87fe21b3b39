use std::time::Duration;

use crate::core::config::{PoolConfig, RedisConfig};
use crate::{Client, Error};

/// Builder for configuring and creating a [`Client`].
///
/// Each persistence class starts from [`PoolConfig::default`]. Setters
/// without a class in their name apply to both pools.
///
/// # Example
///
/// ```no_run
/// use kvpool::core::builder::ClientBuilder;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = ClientBuilder::new()
///     .addresses(["10.0.0.1:6379", "10.0.0.2:6379"])
///     .key_prefix("shop")
///     .max_active(20)
///     .build()
///     .await?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Default)]
pub struct ClientBuilder {
    config: RedisConfig,
    warm_up: Option<bool>,
}

impl ClientBuilder {
    /// Creates a new [`ClientBuilder`] instance.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces both pool configs.
    #[inline]
    pub fn config(mut self, config: RedisConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the ephemeral pool config.
    #[inline]
    pub fn ephemeral(mut self, config: PoolConfig) -> Self {
        self.config.ephemeral = config;
        self
    }

    /// Sets the durable pool config.
    #[inline]
    pub fn durable(mut self, config: PoolConfig) -> Self {
        self.config.durable = config;
        self
    }

    /// Sets the backend addresses, in failover order.
    #[inline]
    pub fn addresses<I, S>(mut self, addresses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let addresses: Vec<String> = addresses.into_iter().map(Into::into).collect();
        self.config.ephemeral.addresses = addresses.clone();
        self.config.durable.addresses = addresses;
        self
    }

    /// Sets the password sent with `AUTH`.
    #[inline]
    pub fn password(mut self, password: impl Into<String>) -> Self {
        let password = password.into();
        self.config.ephemeral.password = Some(password.clone());
        self.config.durable.password = Some(password);
        self
    }

    /// Sets the key namespace prefix.
    #[inline]
    pub fn key_prefix(mut self, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        self.config.ephemeral.key_prefix = prefix.clone();
        self.config.durable.key_prefix = prefix;
        self
    }

    /// Sets the expiry applied to writes without an explicit one.
    ///
    /// # Arguments
    ///
    /// * `seconds` - Expiry in seconds; 0 disables the default expiry
    #[inline]
    pub fn default_expire_seconds(mut self, seconds: u64) -> Self {
        self.config.ephemeral.default_expire_seconds = seconds;
        self.config.durable.default_expire_seconds = seconds;
        self
    }

    /// Sets the connection timeout.
    #[inline]
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        let ms = millis(timeout);
        self.config.ephemeral.connect_timeout_ms = ms;
        self.config.durable.connect_timeout_ms = ms;
        self
    }

    /// Sets the read timeout for replies. `None` means no timeout.
    #[inline]
    pub fn read_timeout(mut self, timeout: Option<Duration>) -> Self {
        let ms = timeout.map_or(0, millis);
        self.config.ephemeral.read_timeout_ms = ms;
        self.config.durable.read_timeout_ms = ms;
        self
    }

    /// Sets the write timeout for requests. `None` means no timeout.
    #[inline]
    pub fn write_timeout(mut self, timeout: Option<Duration>) -> Self {
        let ms = timeout.map_or(0, millis);
        self.config.ephemeral.write_timeout_ms = ms;
        self.config.durable.write_timeout_ms = ms;
        self
    }

    /// Sets how many connections each pool dials up front.
    #[inline]
    pub fn min_active(mut self, count: usize) -> Self {
        self.config.ephemeral.pool_min_active = count;
        self.config.durable.pool_min_active = count;
        self
    }

    /// Sets how many connections each pool hands out at once.
    #[inline]
    pub fn max_active(mut self, count: usize) -> Self {
        self.config.ephemeral.pool_max_active = count;
        self.config.durable.pool_max_active = count;
        self
    }

    /// Sets how long an acquire waits for a free connection.
    #[inline]
    pub fn wait_timeout(mut self, timeout: Duration) -> Self {
        let ms = millis(timeout);
        self.config.ephemeral.pool_wait_timeout_ms = ms;
        self.config.durable.pool_wait_timeout_ms = ms;
        self
    }

    /// Whether `build` dials `poolMinActive` connections before returning.
    /// Defaults to `true`.
    #[inline]
    pub fn warm_up(mut self, enabled: bool) -> Self {
        self.warm_up = Some(enabled);
        self
    }

    /// Builds the [`Client`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if either config is invalid.
    /// Returns [`Error::DialFailed`] if warm-up cannot reach any endpoint.
    #[inline]
    pub async fn build(self) -> Result<Client, Error> {
        if self.warm_up.unwrap_or(true) {
            Client::connect(self.config).await
        } else {
            Client::new(self.config)
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_new() {
        let builder = ClientBuilder::new();
        assert_eq!(builder.config, RedisConfig::default());
        assert!(builder.warm_up.is_none());
    }

    #[test]
    fn test_builder_set_addresses() {
        let builder = ClientBuilder::new().addresses(["10.0.0.1:6379", "10.0.0.2:6379"]);
        assert_eq!(builder.config.ephemeral.addresses.len(), 2);
        assert_eq!(
            builder.config.durable.addresses,
            ["10.0.0.1:6379", "10.0.0.2:6379"]
        );
    }

    #[test]
    fn test_builder_set_password() {
        let builder = ClientBuilder::new().password("secret");
        assert_eq!(builder.config.ephemeral.password, Some("secret".to_string()));
        assert_eq!(builder.config.durable.password, Some("secret".to_string()));
    }

    #[test]
    fn test_builder_timeouts() {
        let builder = ClientBuilder::new()
            .connection_timeout(Duration::from_millis(250))
            .read_timeout(None)
            .write_timeout(Some(Duration::from_secs(2)));
        assert_eq!(builder.config.ephemeral.connect_timeout_ms, 250);
        assert_eq!(builder.config.ephemeral.read_timeout_ms, 0);
        assert_eq!(builder.config.durable.write_timeout_ms, 2000);
    }

    #[test]
    fn test_builder_per_class_config() {
        let durable = PoolConfig {
            key_prefix: "store".to_string(),
            ..PoolConfig::default()
        };
        let builder = ClientBuilder::new().durable(durable).max_active(5);
        assert_eq!(builder.config.durable.key_prefix, "store");
        assert_eq!(builder.config.ephemeral.key_prefix, "prefix");
        assert_eq!(builder.config.durable.pool_max_active, 5);
    }

    #[tokio::test]
    async fn test_builder_build_with_invalid_pool() {
        let result = ClientBuilder::new().max_active(0).warm_up(false).build().await;
        match result {
            Err(Error::InvalidArgument { message }) => {
                assert!(message.contains("poolMaxActive"));
            }
            other => panic!("Expected InvalidArgument error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_builder_build_without_warm_up() {
        let client = ClientBuilder::new()
            .addresses(["127.0.0.1:1"])
            .warm_up(false)
            .build()
            .await
            .unwrap();
        assert_eq!(client.pool(crate::Persistence::Ephemeral).status().open, 0);
    }
}
