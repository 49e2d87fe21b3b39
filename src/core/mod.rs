//! # Core
//!
//! Client handle, command model and execution.
//!
//! ## Modules
//!
//! - [`builder`] - Client builder
//! - [`command`] - Closed command set and reply helpers
//! - [`config`] - Pool configuration shape
//! - [`connection`] - Single connection framing
//! - [`keyspace`] - Typed operations on a namespaced key
//! - [`namespace`] - Wire key derivation
//! - [`value`] - JSON value envelope

use std::sync::Arc;

pub use crate::proto::error::{Error, ErrorKind, Result};

/// Client builder configuration.
pub mod builder;
/// Command construction helpers.
pub mod command;
/// Pool configuration.
pub mod config;
/// Low-level connection management.
pub mod connection;
mod executor;
/// Typed operations.
pub mod keyspace;
/// Key namespacing.
pub mod namespace;
/// Value encoding.
pub mod value;

use crate::pool::{ConnectionPool, Persistence};
use config::{PoolConfig, RedisConfig};
use keyspace::Keyspace;
use namespace::KeyNamespacer;

/// Pool plus the per-class settings commands need.
#[derive(Debug)]
pub(crate) struct ClassPool {
    pub(crate) pool: ConnectionPool,
    pub(crate) namespacer: KeyNamespacer,
    pub(crate) default_expire_seconds: u64,
}

impl ClassPool {
    fn new(class: Persistence, config: &PoolConfig) -> Result<Self> {
        Ok(Self {
            pool: ConnectionPool::new(class, config)?,
            namespacer: KeyNamespacer::new(config.key_prefix.clone()),
            default_expire_seconds: config.default_expire_seconds,
        })
    }
}

#[derive(Debug)]
struct Pools {
    ephemeral: ClassPool,
    durable: ClassPool,
}

/// Handle to the ephemeral and durable pools.
///
/// Build it once at startup and pass clones to whoever needs it; clones
/// share the same pools.
///
/// # Example
///
/// ```no_run
/// use kvpool::{Client, Persistence, PoolConfig, RedisConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = RedisConfig::uniform(PoolConfig::with_addresses(["127.0.0.1:6379"]));
///     let client = Client::connect(config).await?;
///     let users = client.keyspace("user", Persistence::Ephemeral);
///     users.set("42", &"alice").await?;
///     let name: Option<String> = users.get("42").await?.found();
///     assert_eq!(name.as_deref(), Some("alice"));
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct Client {
    pools: Arc<Pools>,
}

impl Client {
    /// Builds both pools and dials their `poolMinActive` connections.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an invalid config and
    /// [`Error::DialFailed`] if a pool cannot reach any endpoint.
    pub async fn connect(config: RedisConfig) -> Result<Self> {
        let client = Self::new(config)?;
        client.pools.ephemeral.pool.warm_up().await?;
        client.pools.durable.pool.warm_up().await?;
        Ok(client)
    }

    /// Builds both pools without dialing anything.
    pub fn new(config: RedisConfig) -> Result<Self> {
        Ok(Self {
            pools: Arc::new(Pools {
                ephemeral: ClassPool::new(Persistence::Ephemeral, &config.ephemeral)?,
                durable: ClassPool::new(Persistence::Durable, &config.durable)?,
            }),
        })
    }

    /// Returns a [`builder::ClientBuilder`].
    pub fn builder() -> builder::ClientBuilder {
        builder::ClientBuilder::new()
    }

    /// Typed operations on `instance_key` in the given persistence class.
    pub fn keyspace(&self, instance_key: impl Into<String>, class: Persistence) -> Keyspace {
        Keyspace::new(self.clone(), instance_key.into(), class)
    }

    /// The pool serving `class`.
    pub fn pool(&self, class: Persistence) -> &ConnectionPool {
        &self.class_pool(class).pool
    }

    pub(crate) fn class_pool(&self, class: Persistence) -> &ClassPool {
        match class {
            Persistence::Ephemeral => &self.pools.ephemeral,
            Persistence::Durable => &self.pools.durable,
        }
    }

    /// Shuts down both pools.
    pub async fn shutdown(&self) {
        self.pools.ephemeral.pool.shutdown().await;
        self.pools.durable.pool.shutdown().await;
    }
}
