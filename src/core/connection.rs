use std::fmt;
use std::future::Future;
use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::proto::codec::{Decoder, Encoder};
use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

const READ_CHUNK: usize = 4096;

/// A connection to a single backend server.
///
/// Wraps an async stream and handles RESP framing. Requests are buffered by
/// [`send`](Connection::send), written by [`flush`](Connection::flush) and
/// answered by [`receive`](Connection::receive), which is all a pipeline
/// needs; [`call`](Connection::call) does the three in one go.
///
/// Any transport failure poisons the connection: [`err`](Connection::err)
/// then reports why, and the pool replaces it on the next acquire instead of
/// handing it out again.
pub struct Connection<S = TcpStream> {
    stream: S,
    decoder: Decoder,
    encoder: Encoder,
    read_timeout: Option<Duration>,
    write_timeout: Option<Duration>,
    queued: usize,
    in_flight: usize,
    broken: Option<String>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Creates a new connection with no timeouts configured.
    pub fn new(stream: S) -> Self {
        Self {
            stream,
            decoder: Decoder::new(),
            encoder: Encoder::new(),
            read_timeout: None,
            write_timeout: None,
            queued: 0,
            in_flight: 0,
            broken: None,
        }
    }

    /// Configures read and write timeouts for this connection.
    pub fn with_timeouts(
        mut self,
        read_timeout: Option<Duration>,
        write_timeout: Option<Duration>,
    ) -> Self {
        self.read_timeout = read_timeout;
        self.write_timeout = write_timeout;
        self
    }

    /// Reports the prior failure of this connection, if any.
    ///
    /// A connection with requests written but replies never read is out of
    /// sync with the server and is reported as failed too. That happens when
    /// a caller is cancelled mid-call.
    pub fn err(&self) -> Option<String> {
        if let Some(reason) = &self.broken {
            return Some(reason.clone());
        }
        if self.queued > 0 || self.in_flight > 0 {
            return Some(format!(
                "{} request(s) left unanswered",
                self.queued + self.in_flight
            ));
        }
        if self.decoder.has_buffered() {
            return Some("unexpected data buffered from server".to_string());
        }
        None
    }

    /// Buffers a request without writing it.
    pub fn send(&mut self, frame: &Frame) -> Result<()> {
        self.ensure_usable()?;
        self.encoder.encode(frame);
        self.queued += 1;
        Ok(())
    }

    /// Writes every buffered request to the socket.
    pub async fn flush(&mut self) -> Result<()> {
        self.ensure_usable()?;
        let write_timeout = self.write_timeout;
        let data = self.encoder.take();
        let stream = &mut self.stream;
        let write = async move {
            stream.write_all(&data).await?;
            stream.flush().await
        };
        let outcome = with_timeout(write_timeout, "write", write)
            .await
            .and_then(|written| written);
        match outcome {
            Ok(()) => {
                self.in_flight += self.queued;
                self.queued = 0;
                Ok(())
            }
            Err(e) => Err(self.poison(Error::Io { source: e })),
        }
    }

    /// Reads the reply to the oldest unanswered request.
    pub async fn receive(&mut self) -> Result<Frame> {
        self.ensure_usable()?;
        let outcome = match with_timeout(self.read_timeout, "read", self.read_frame()).await {
            Ok(result) => result,
            Err(e) => Err(Error::Io { source: e }),
        };
        match outcome {
            Ok(frame) => {
                self.in_flight = self.in_flight.saturating_sub(1);
                debug!(reply = frame.kind_name(), "received frame");
                Ok(frame)
            }
            Err(e) => Err(self.poison(e)),
        }
    }

    /// Sends one request and waits for its reply.
    pub async fn call(&mut self, frame: &Frame) -> Result<Frame> {
        self.send(frame)?;
        self.flush().await?;
        self.receive().await
    }

    /// Shuts down the write half of the stream.
    pub async fn close(mut self) {
        let _ = self.stream.shutdown().await;
    }

    async fn read_frame(&mut self) -> Result<Frame> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            if let Some(frame) = self.decoder.decode()? {
                return Ok(frame);
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(Error::Protocol {
                    message: "connection closed".to_string(),
                });
            }
            self.decoder.append(&buf[..n]);
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        match &self.broken {
            Some(reason) => Err(Error::Protocol {
                message: format!("connection unusable: {reason}"),
            }),
            None => Ok(()),
        }
    }

    fn poison(&mut self, error: Error) -> Error {
        self.broken = Some(error.to_string());
        error
    }
}

async fn with_timeout<F, T>(limit: Option<Duration>, op: &str, fut: F) -> io::Result<T>
where
    F: Future<Output = T>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("{op} timed out after {}ms", limit.as_millis()),
            )
        }),
        None => Ok(fut.await),
    }
}

impl<S> fmt::Debug for Connection<S>
where
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("stream", &self.stream)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("in_flight", &self.in_flight)
            .field("broken", &self.broken)
            .finish()
    }
}
