//! # kvpool
//!
//! Pooled, failover-aware Redis client with typed JSON values.
//!
//! Two independent pools, one per [`Persistence`] class, dial through an
//! ordered list of endpoints and fail over to the next one when a connection
//! goes bad. Values are stored as JSON and keys are namespaced as
//! `prefix:instance[:sub_key]`.
//!
//! ## Example
//!
//! ```no_run
//! use kvpool::{Client, Persistence};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .addresses(["127.0.0.1:6379"])
//!         .key_prefix("shop")
//!         .build()
//!         .await?;
//!
//!     let carts = client.keyspace("cart", Persistence::Ephemeral);
//!     carts.hset("u1", "sku-9", &3).await?;
//!     let qty: Option<u32> = carts.hget("u1", "sku-9").await?.found();
//!     assert_eq!(qty, Some(3));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod core;
pub mod pool;
pub mod proto;

pub use crate::core::builder::ClientBuilder;
pub use crate::core::command::Command;
pub use crate::core::config::{PoolConfig, RedisConfig};
pub use crate::core::keyspace::Keyspace;
pub use crate::core::value::{Expiry, Lookup};
pub use crate::core::{Client, Error, ErrorKind, Result};
pub use crate::pool::{ConnectionPool, Persistence, PoolStatus, PooledConnection};
pub use crate::proto::error::PipelineStage;
pub use crate::proto::frame::{Frame, Reply};
