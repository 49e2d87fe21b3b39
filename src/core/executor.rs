//! Command execution against a pooled connection.
//!
//! Every call checks a connection out, runs, and hands it back through the
//! guard. Calls are traced under `redis:<COMMAND>:<instance key>` and the
//! connection checkout under `redis:conn:<instance key>`.

use std::future::Future;

use tracing::{debug, error, field, info_span, warn, Instrument, Span};

use super::command::{frame_to_int, parse_frame_response, Command};
use super::keyspace::Keyspace;
use crate::pool::PooledConnection;
use crate::proto::error::{Error, PipelineStage, Result};
use crate::proto::frame::Frame;

impl Keyspace {
    /// Runs one command and returns its raw reply.
    ///
    /// An error reply from the server comes back as
    /// [`Error::CommandFailed`].
    ///
    /// # Errors
    ///
    /// Pool, transport and server errors.
    pub async fn do_command(&self, command: Command) -> Result<Frame> {
        let name = command.name();
        let write = command.is_write();
        self.traced(name, write, async move {
            let mut conn = self.connection().await?;
            call(&mut conn, command).await
        })
        .await
    }

    /// Runs `command`, then sets `expire_seconds` on the key it wrote.
    ///
    /// Both run on the same connection. A failed `EXPIRE` is logged and does
    /// not fail the write.
    pub(crate) async fn write_with_expiry(
        &self,
        command: Command,
        expire_seconds: Option<u64>,
    ) -> Result<Frame> {
        let name = command.name();
        let write = command.is_write();
        let target = expire_seconds
            .zip(command.expiry_target().map(str::to_owned));
        self.traced(name, write, async move {
            let mut conn = self.connection().await?;
            let reply = call(&mut conn, command).await?;
            if let Some((seconds, key)) = target {
                let expire = Command::Expire {
                    key: key.clone(),
                    seconds,
                };
                let outcome = call(&mut conn, expire)
                    .await
                    .and_then(|frame| frame_to_int("EXPIRE", frame));
                if let Err(e) = outcome {
                    warn!(command = name, key = %key, seconds, error = %e, "set expiry failed");
                }
            }
            Ok(reply)
        })
        .await
    }

    /// Runs `commands` as one pipeline on a single connection.
    ///
    /// All requests are buffered, written in one flush, and the replies read
    /// back in request order. Error replies from the server stay in the
    /// result as [`Frame::Error`]; only transport-level failures abort.
    ///
    /// # Errors
    ///
    /// [`Error::Pipeline`] naming the failed stage and how many replies had
    /// arrived, or a pool error if no connection could be checked out.
    pub async fn pipe_do(&self, commands: Vec<Command>) -> Result<Vec<Frame>> {
        let requested = commands.len();
        if requested == 0 {
            return Ok(Vec::new());
        }
        let name = commands.first().map_or("PIPELINE", Command::name);
        let write = commands.iter().any(Command::is_write);

        self.traced(name, write, async move {
            let mut conn = self.connection().await?;
            for command in commands {
                conn.send(&command.into_frame())
                    .map_err(|e| pipeline_error(PipelineStage::Send, 0, requested, e))?;
            }
            conn.flush()
                .await
                .map_err(|e| pipeline_error(PipelineStage::Flush, 0, requested, e))?;

            let mut replies = Vec::with_capacity(requested);
            for _ in 0..requested {
                let frame = conn.receive().await.map_err(|e| {
                    pipeline_error(PipelineStage::Receive, replies.len(), requested, e)
                })?;
                replies.push(frame);
            }
            Ok(replies)
        })
        .await
    }

    async fn connection(&self) -> Result<PooledConnection> {
        let span = info_span!(
            "redis:conn",
            otel.name = %format!("redis:conn:{}", self.instance_key()),
            class = %self.class(),
            error = field::Empty,
        );
        let pool = self.pool();
        async move {
            let result = pool.acquire().await;
            if let Err(e) = &result {
                Span::current().record("error", field::display(e));
                error!(class = %pool.class(), error = %e, "get redis connection failed");
            }
            result
        }
        .instrument(span)
        .await
    }

    async fn traced<T, F>(&self, command: &'static str, write: bool, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let span = info_span!(
            "redis:command",
            otel.name = %format!("redis:{}:{}", command, self.instance_key()),
            command,
            write,
            class = %self.class(),
            error = field::Empty,
        );
        async move {
            let result = fut.await;
            if let Err(e) = &result {
                Span::current().record("error", field::display(e));
                error!(
                    command,
                    key = %self.instance_key(),
                    kind = ?e.kind(),
                    error = %e,
                    "run redis command failed"
                );
            }
            result
        }
        .instrument(span)
        .await
    }
}

async fn call(conn: &mut PooledConnection, command: Command) -> Result<Frame> {
    debug!(
        command = command.name(),
        key = command.key().unwrap_or_default(),
        address = conn.address(),
        "sending redis command"
    );
    let reply = conn.call(&command.into_frame()).await?;
    parse_frame_response(reply)
}

fn pipeline_error(stage: PipelineStage, received: usize, requested: usize, source: Error) -> Error {
    Error::Pipeline {
        stage,
        received,
        requested,
        source: Box::new(source),
    }
}
