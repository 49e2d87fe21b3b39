//! Endpoint list and failover dialing.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::core::command::{frame_to_ok, Command};
use crate::core::config::PoolConfig;
use crate::core::connection::Connection;
use crate::proto::error::{Error, Result};

const DEFAULT_PORT: u16 = 6379;

/// Immutable, non-empty, ordered list of `host:port` addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EndpointSet {
    addresses: Arc<[String]>,
}

impl EndpointSet {
    /// Parses and normalizes `addresses`.
    ///
    /// Entries may be `host:port`, `host` (port 6379) or `redis://host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidArgument`] for an empty list or an entry that
    /// cannot be parsed.
    pub fn new<I, S>(addresses: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let addresses = addresses
            .into_iter()
            .map(|addr| normalize(addr.as_ref()))
            .collect::<Result<Vec<_>>>()?;

        if addresses.is_empty() {
            return Err(Error::InvalidArgument {
                message: "endpoint set must contain at least one address".to_string(),
            });
        }

        Ok(Self {
            addresses: addresses.into(),
        })
    }

    /// Number of endpoints.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Always false; kept for API symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Address at `index`, wrapping around the list.
    pub fn get(&self, index: usize) -> &str {
        &self.addresses[index % self.addresses.len()]
    }

    /// Iterates over the addresses in failover order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.addresses.iter().map(String::as_str)
    }
}

fn normalize(raw: &str) -> Result<String> {
    let raw = raw.trim();
    let invalid = |reason: &str| Error::InvalidArgument {
        message: format!("invalid endpoint {raw:?}: {reason}"),
    };

    if raw.is_empty() {
        return Err(invalid("empty address"));
    }

    let candidate = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("redis://{raw}")
    };
    let parsed = url::Url::parse(&candidate).map_err(|_| invalid("invalid address format"))?;

    if parsed.scheme() != "redis" {
        return Err(invalid("expected redis:// scheme"));
    }
    let host = parsed.host_str().ok_or_else(|| invalid("missing host"))?;
    let port = parsed.port().unwrap_or(DEFAULT_PORT);

    Ok(format!("{host}:{port}"))
}

/// Opens connections, failing over through an [`EndpointSet`].
#[derive(Debug, Clone)]
pub struct Dialer {
    endpoints: EndpointSet,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    password: Option<String>,
}

impl Dialer {
    /// Creates a dialer for `endpoints` with the timeouts and credential of
    /// `config`.
    pub fn new(endpoints: EndpointSet, config: &PoolConfig) -> Self {
        Self {
            endpoints,
            connect_timeout: config.connect_timeout(),
            read_timeout: config.read_timeout(),
            write_timeout: config.write_timeout(),
            password: config.password.clone().filter(|p| !p.is_empty()),
        }
    }

    /// The endpoints this dialer fails over through.
    pub fn endpoints(&self) -> &EndpointSet {
        &self.endpoints
    }

    /// Connects to the first reachable endpoint, starting at `start`.
    ///
    /// Endpoints are tried in order from `start % len`, wrapping once
    /// around the list, with no delay between attempts. Returns the
    /// connection and the index of the endpoint it reached.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DialFailed`] carrying the last attempt's failure
    /// once every endpoint has been tried.
    pub async fn dial(&self, start: usize) -> Result<(Connection, usize)> {
        let count = self.endpoints.len();
        let mut last_error = None;

        for offset in 0..count {
            let index = (start + offset) % count;
            let address = self.endpoints.get(index);
            match self.dial_one(address).await {
                Ok(conn) => {
                    debug!(address, index, "dialed endpoint");
                    return Ok((conn, index));
                }
                Err(e) => {
                    warn!(address, index, error = %e, "dial redis endpoint failed");
                    last_error = Some(e);
                }
            }
        }

        let source = last_error.unwrap_or_else(|| Error::InvalidArgument {
            message: "no endpoints to dial".to_string(),
        });
        Err(Error::DialFailed {
            attempts: count,
            source: Box::new(source),
        })
    }

    async fn dial_one(&self, address: &str) -> Result<Connection> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(address))
            .await
            .map_err(|_| Error::Io {
                source: io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!(
                        "connect to {address} timed out after {}ms",
                        self.connect_timeout.as_millis()
                    ),
                ),
            })??;
        stream.set_nodelay(true)?;

        let mut conn = Connection::new(stream).with_timeouts(self.read_timeout, self.write_timeout);

        if let Some(password) = &self.password {
            let auth = Command::Auth {
                password: password.clone(),
            };
            let reply = conn.call(&auth.into_frame()).await?;
            frame_to_ok("AUTH", reply)?;
        }

        Ok(conn)
    }
}
