use std::fmt;
use std::io;

use thiserror::Error;

/// Result type alias for kvpool operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of an [`Error`].
///
/// Call sites that only care about the failure category (retry on
/// `PoolExhausted`, alert on `DialFailed`, ...) match on this instead of the
/// full error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The pool was shut down or never initialized.
    PoolUnavailable,
    /// No connection became free before the pool deadline.
    PoolExhausted,
    /// Every endpoint in the endpoint set was unreachable.
    DialFailed,
    /// A value could not be encoded to its wire form.
    SerializeFailed,
    /// Reply bytes could not be decoded into the destination type.
    DeserializeFailed,
    /// The reply had an unexpected shape for the command.
    ReplyTypeMismatch,
    /// The server answered with an error reply.
    CommandFailed,
    /// Transport level I/O failure.
    Io,
    /// Malformed RESP data or a closed connection.
    Protocol,
    /// Invalid configuration or call argument.
    InvalidArgument,
}

/// Stage of a pipeline at which it was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStage {
    /// Buffering a request.
    Send,
    /// Writing the buffered requests to the socket.
    Flush,
    /// Reading a reply.
    Receive,
    /// Decoding a received reply.
    Decode,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let stage = match self {
            PipelineStage::Send => "send",
            PipelineStage::Flush => "flush",
            PipelineStage::Receive => "receive",
            PipelineStage::Decode => "decode",
        };
        f.write_str(stage)
    }
}

/// Errors that can occur when talking to the key-value backend.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An IO error occurred.
    #[error("IO error: {source}")]
    Io {
        /// The underlying IO error.
        #[from]
        source: io::Error,
    },

    /// A protocol error occurred.
    #[error("protocol error: {message}")]
    Protocol {
        /// Description of the error.
        message: String,
    },

    /// Invalid argument provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of invalid argument.
        message: String,
    },

    /// The pool for the persistence class is not available.
    #[error("{class} pool is unavailable")]
    PoolUnavailable {
        /// Persistence class of the pool.
        class: &'static str,
    },

    /// No connection was released before the wait deadline.
    #[error("{class} pool exhausted after waiting {waited_ms}ms")]
    PoolExhausted {
        /// Persistence class of the pool.
        class: &'static str,
        /// How long the caller waited.
        waited_ms: u64,
    },

    /// No endpoint accepted a connection.
    #[error("dial failed after trying {attempts} endpoint(s): {source}")]
    DialFailed {
        /// Number of endpoints tried.
        attempts: usize,
        /// Failure of the last attempt.
        #[source]
        source: Box<Error>,
    },

    /// A value could not be serialized.
    #[error("failed to serialize value for {command}: {source}")]
    SerializeFailed {
        /// Command being prepared.
        command: &'static str,
        /// Underlying serializer error.
        #[source]
        source: serde_json::Error,
    },

    /// A reply could not be deserialized into the destination type.
    #[error("failed to deserialize {command} reply: {source}")]
    DeserializeFailed {
        /// Command whose reply was decoded.
        command: &'static str,
        /// Underlying deserializer error.
        #[source]
        source: serde_json::Error,
    },

    /// The reply had an unexpected shape.
    #[error("unexpected reply to {command}: expected {expected}, got {actual}")]
    ReplyTypeMismatch {
        /// Command whose reply was checked.
        command: &'static str,
        /// Shape the command requires.
        expected: &'static str,
        /// Shape actually received.
        actual: String,
    },

    /// The server returned an error reply.
    #[error("server error: {message}")]
    CommandFailed {
        /// Error message from server.
        message: String,
    },

    /// A pipeline was aborted part way through.
    #[error("pipeline aborted at {stage} after {received} of {requested} replies: {source}")]
    Pipeline {
        /// Stage that failed.
        stage: PipelineStage,
        /// Replies successfully received before the failure.
        received: usize,
        /// Number of requests in the batch.
        requested: usize,
        /// What went wrong.
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Returns the category of this error.
    ///
    /// A pipeline error reports the kind of the failure that aborted it.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io { .. } => ErrorKind::Io,
            Error::Protocol { .. } => ErrorKind::Protocol,
            Error::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Error::PoolUnavailable { .. } => ErrorKind::PoolUnavailable,
            Error::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Error::DialFailed { .. } => ErrorKind::DialFailed,
            Error::SerializeFailed { .. } => ErrorKind::SerializeFailed,
            Error::DeserializeFailed { .. } => ErrorKind::DeserializeFailed,
            Error::ReplyTypeMismatch { .. } => ErrorKind::ReplyTypeMismatch,
            Error::CommandFailed { .. } => ErrorKind::CommandFailed,
            Error::Pipeline { source, .. } => source.kind(),
        }
    }

    /// Returns true when the failure left the transport unusable.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Error::Io { .. } | Error::Protocol { .. } => true,
            Error::Pipeline { source, .. } => source.is_connection_error(),
            _ => false,
        }
    }

    /// Builds a [`Error::CommandFailed`] from the payload of an error reply.
    pub fn from_server_reply(payload: &[u8]) -> Self {
        let message = String::from_utf8_lossy(payload);
        Error::CommandFailed {
            message: message.trim().to_string(),
        }
    }
}
