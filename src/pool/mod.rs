//! Bounded connection pooling with health checks and failover.
//!
//! Each persistence class owns one [`ConnectionPool`]. A pool hands out at
//! most `poolMaxActive` connections at a time; callers beyond that wait for a
//! release or give up with [`Error::PoolExhausted`]. Connections come back
//! through the [`PooledConnection`] guard, so every exit path releases.
//!
//! A connection whose transport failed while checked out goes back to the
//! idle queue unchanged. The next acquire that picks it up closes it and
//! dials the endpoint after the one it was connected to.

mod dialer;

pub use dialer::{Dialer, EndpointSet};

use std::collections::VecDeque;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, error, info};

use crate::core::config::PoolConfig;
use crate::core::connection::Connection;
use crate::proto::error::{Error, Result};

/// Persistence class of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Persistence {
    /// Non-durable servers, the default for cache data.
    Ephemeral,
    /// Servers with persistence enabled.
    Durable,
}

impl Persistence {
    /// Lower-case name used in logs and errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            Persistence::Ephemeral => "ephemeral",
            Persistence::Durable => "durable",
        }
    }
}

impl fmt::Display for Persistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Connections waiting in the idle queue.
    pub idle: usize,
    /// Connections currently checked out.
    pub in_use: usize,
    /// Live connections, idle or checked out.
    pub open: usize,
    /// Upper bound on checked-out connections.
    pub max_active: usize,
}

struct IdleConnection {
    conn: Connection,
    endpoint: usize,
    idle_since: Instant,
}

struct Shared {
    class: Persistence,
    dialer: Dialer,
    min_active: usize,
    max_active: usize,
    idle_timeout: Option<Duration>,
    wait_timeout: Duration,
    idle: Mutex<VecDeque<IdleConnection>>,
    permits: Arc<Semaphore>,
    open: AtomicUsize,
    preferred: AtomicUsize,
    closed: AtomicBool,
}

impl Shared {
    fn idle(&self) -> MutexGuard<'_, VecDeque<IdleConnection>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_expired(&self, idle: &IdleConnection) -> bool {
        self.idle_timeout
            .is_some_and(|limit| idle.idle_since.elapsed() > limit)
    }

    fn put_back(&self, conn: Connection, endpoint: usize) {
        if self.closed.load(Ordering::Acquire) {
            self.open.fetch_sub(1, Ordering::AcqRel);
            debug!(class = %self.class, "pool closed, dropping released connection");
            return;
        }
        self.idle().push_back(IdleConnection {
            conn,
            endpoint,
            idle_since: Instant::now(),
        });
    }

    fn discard(&self, conn: Connection) {
        self.open.fetch_sub(1, Ordering::AcqRel);
        drop(conn);
    }

    async fn dial(&self, start: usize) -> Result<(Connection, usize)> {
        let (conn, index) = self.dialer.dial(start).await?;
        self.open.fetch_add(1, Ordering::AcqRel);
        self.preferred.store(index, Ordering::Release);
        Ok((conn, index))
    }
}

/// Bounded pool of connections for one persistence class.
///
/// Cheap to clone; clones share the same connections.
#[derive(Clone)]
pub struct ConnectionPool {
    shared: Arc<Shared>,
}

impl ConnectionPool {
    /// Creates an empty pool. Nothing is dialed until the first acquire or
    /// [`warm_up`](ConnectionPool::warm_up).
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] if `config` fails validation.
    pub fn new(class: Persistence, config: &PoolConfig) -> Result<Self> {
        config.validate()?;
        let endpoints = EndpointSet::new(&config.addresses)?;
        let dialer = Dialer::new(endpoints, config);

        Ok(Self {
            shared: Arc::new(Shared {
                class,
                dialer,
                min_active: config.pool_min_active,
                max_active: config.pool_max_active,
                idle_timeout: config.idle_timeout(),
                wait_timeout: config.wait_timeout(),
                idle: Mutex::new(VecDeque::new()),
                permits: Arc::new(Semaphore::new(config.pool_max_active)),
                open: AtomicUsize::new(0),
                preferred: AtomicUsize::new(0),
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Persistence class served by this pool.
    pub fn class(&self) -> Persistence {
        self.shared.class
    }

    /// Endpoints this pool dials.
    pub fn endpoints(&self) -> &EndpointSet {
        self.shared.dialer.endpoints()
    }

    /// Dials connections until `poolMinActive` are open.
    ///
    /// # Errors
    ///
    /// Returns the first dial failure; connections that did dial stay
    /// pooled.
    pub async fn warm_up(&self) -> Result<()> {
        let open = self.shared.open.load(Ordering::Acquire);
        let missing = self.shared.min_active.saturating_sub(open);
        if missing == 0 {
            return Ok(());
        }

        let start = self.shared.preferred.load(Ordering::Acquire);
        let dials = (0..missing).map(|_| self.shared.dial(start));
        let mut warmed = 0;
        let mut first_error = None;
        for outcome in join_all(dials).await {
            match outcome {
                Ok((conn, endpoint)) => {
                    self.shared.put_back(conn, endpoint);
                    warmed += 1;
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        info!(class = %self.shared.class, count = warmed, missing, "warmed redis pool");
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Checks out a connection, waiting up to `poolWaitTimeoutMs`.
    pub async fn acquire(&self) -> Result<PooledConnection> {
        self.acquire_timeout(self.shared.wait_timeout).await
    }

    /// Checks out a connection, waiting up to `wait` for one to free up.
    ///
    /// Dropping the returned future abandons the wait.
    ///
    /// # Errors
    ///
    /// - [`Error::PoolUnavailable`] after [`shutdown`](ConnectionPool::shutdown)
    /// - [`Error::PoolExhausted`] if no connection frees up within `wait`
    /// - [`Error::DialFailed`] if a new connection was needed and no endpoint
    ///   answered
    pub async fn acquire_timeout(&self, wait: Duration) -> Result<PooledConnection> {
        let shared = &self.shared;
        if shared.closed.load(Ordering::Acquire) {
            return Err(self.unavailable());
        }

        let started = Instant::now();
        let permit = match tokio::time::timeout(wait, shared.permits.clone().acquire_owned()).await
        {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(self.unavailable()),
            Err(_) => {
                return Err(Error::PoolExhausted {
                    class: shared.class.as_str(),
                    waited_ms: started.elapsed().as_millis() as u64,
                })
            }
        };

        loop {
            let candidate = shared.idle().pop_back();
            let Some(idle) = candidate else {
                let start = shared.preferred.load(Ordering::Acquire);
                let (conn, endpoint) = shared.dial(start).await?;
                return Ok(self.guard(conn, endpoint, permit));
            };

            if shared.is_expired(&idle) {
                debug!(class = %shared.class, endpoint = idle.endpoint, "evicting expired idle connection");
                shared.discard(idle.conn);
                continue;
            }

            if let Some(reason) = idle.conn.err() {
                error!(
                    class = %shared.class,
                    endpoint = idle.endpoint,
                    reason = %reason,
                    "redis connection failed health check, redialing"
                );
                let failed = idle.endpoint;
                shared.discard(idle.conn);
                let (conn, endpoint) = shared.dial(failed + 1).await?;
                return Ok(self.guard(conn, endpoint, permit));
            }

            return Ok(self.guard(idle.conn, idle.endpoint, permit));
        }
    }

    /// Closes idle connections that exceeded the idle timeout.
    ///
    /// Returns how many were closed.
    pub fn evict_idle(&self) -> usize {
        let shared = &self.shared;
        let expired = {
            let mut idle = shared.idle();
            let (keep, expired): (VecDeque<_>, VecDeque<_>) =
                idle.drain(..).partition(|conn| !shared.is_expired(conn));
            *idle = keep;
            expired
        };
        let count = expired.len();
        for idle in expired {
            shared.discard(idle.conn);
        }
        if count > 0 {
            debug!(class = %shared.class, count, "evicted idle connections");
        }
        count
    }

    /// Current pool counters.
    pub fn status(&self) -> PoolStatus {
        let shared = &self.shared;
        PoolStatus {
            idle: shared.idle().len(),
            in_use: shared.max_active - shared.permits.available_permits(),
            open: shared.open.load(Ordering::Acquire),
            max_active: shared.max_active,
        }
    }

    /// Closes the pool.
    ///
    /// Waiting and future acquires fail with [`Error::PoolUnavailable`].
    /// Idle connections are closed now; checked-out ones when released.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        if shared.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        shared.permits.close();

        let drained: Vec<IdleConnection> = shared.idle().drain(..).collect();
        for idle in drained {
            shared.open.fetch_sub(1, Ordering::AcqRel);
            idle.conn.close().await;
        }
        info!(class = %shared.class, "redis pool shut down");
    }

    fn guard(&self, conn: Connection, endpoint: usize, permit: OwnedSemaphorePermit) -> PooledConnection {
        PooledConnection {
            conn: Some(conn),
            endpoint,
            shared: self.shared.clone(),
            _permit: permit,
        }
    }

    fn unavailable(&self) -> Error {
        Error::PoolUnavailable {
            class: self.shared.class.as_str(),
        }
    }
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("class", &self.shared.class)
            .field("endpoints", self.endpoints())
            .field("status", &self.status())
            .finish()
    }
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Dereferences to [`Connection`]. Dropping the guard returns the connection
/// to its pool and frees its slot, whatever path the caller leaves by.
pub struct PooledConnection {
    conn: Option<Connection>,
    endpoint: usize,
    shared: Arc<Shared>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Index of the endpoint this connection is connected to.
    pub fn endpoint(&self) -> usize {
        self.endpoint
    }

    /// Address of the endpoint this connection is connected to.
    pub fn address(&self) -> &str {
        self.shared.dialer.endpoints().get(self.endpoint)
    }

    /// Returns the connection to the pool now.
    pub fn release(self) {}
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        // Only `Drop` takes the connection out.
        self.conn.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Connection {
        self.conn.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.shared.put_back(conn, self.endpoint);
        }
    }
}

impl fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledConnection")
            .field("class", &self.shared.class)
            .field("endpoint", &self.endpoint)
            .field("conn", &self.conn)
            .finish()
    }
}
