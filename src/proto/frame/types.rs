use bytes::Bytes;

/// A RESP (Redis Serialization Protocol) frame.
///
/// This enum represents the RESP2 frame types a client sends and receives:
/// - SimpleString: Status responses like "OK"
/// - Error: Error responses from the server
/// - Integer: Numeric responses
/// - BulkString: Binary-safe string data
/// - Array: Command arguments and array responses
/// - Null: NULL value
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Simple string (+OK).
    SimpleString(Vec<u8>),
    /// Error (-ERR).
    Error(Vec<u8>),
    /// Integer (:1000).
    Integer(i64),
    /// Bulk string ($6\r\nfoobar).
    BulkString(Option<Bytes>),
    /// Array (*2\r\n...).
    Array(Vec<Frame>),
    /// Null ($-1 or *-1).
    Null,
}

impl Frame {
    /// Builds a bulk string frame from anything convertible to [`Bytes`].
    pub fn bulk(data: impl Into<Bytes>) -> Self {
        Frame::BulkString(Some(data.into()))
    }

    /// Short name of the frame shape, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Frame::SimpleString(_) => "simple string",
            Frame::Error(_) => "error",
            Frame::Integer(_) => "integer",
            Frame::BulkString(Some(_)) => "bulk string",
            Frame::BulkString(None) | Frame::Null => "nil",
            Frame::Array(_) => "array",
        }
    }

    /// Returns true if this frame is Null or a nil bulk string.
    pub fn is_null(&self) -> bool {
        matches!(self, Frame::Null | Frame::BulkString(None))
    }

    /// Returns true if the server replied with `+OK`.
    pub fn is_ok(&self) -> bool {
        matches!(self, Frame::SimpleString(s) if s.as_slice() == b"OK")
    }

    /// Attempts to extract an integer from this frame.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Frame::Integer(i) => Some(*i),
            _ => None,
        }
    }
}
