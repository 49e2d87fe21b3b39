use bytes::Bytes;

use super::types::Frame;
use crate::proto::error::{Error, Result};

/// Stored payload marking a key that exists but holds an empty collection.
pub const EMPTY_COLLECTION: &[u8] = b"[]";

/// A single-value reply with sentinels decoded into tags.
///
/// Higher layers switch on the tag instead of comparing reply bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// The key or field does not exist.
    Absent,
    /// The key exists and holds the empty-collection marker.
    EmptyCollection,
    /// A user payload.
    Value(Bytes),
}

impl Reply {
    /// Classifies a reply frame for `command`.
    ///
    /// Error frames become [`Error::CommandFailed`]; integers and arrays are
    /// not single values and yield [`Error::ReplyTypeMismatch`].
    pub fn from_frame(command: &'static str, frame: Frame) -> Result<Self> {
        match frame {
            Frame::Null | Frame::BulkString(None) => Ok(Reply::Absent),
            Frame::BulkString(Some(data)) => Ok(Self::from_payload(data)),
            Frame::SimpleString(data) => Ok(Self::from_payload(Bytes::from(data))),
            Frame::Error(message) => Err(Error::from_server_reply(&message)),
            other => Err(Error::ReplyTypeMismatch {
                command,
                expected: "bulk string",
                actual: other.kind_name().to_string(),
            }),
        }
    }

    fn from_payload(data: Bytes) -> Self {
        if data.as_ref() == EMPTY_COLLECTION {
            Reply::EmptyCollection
        } else {
            Reply::Value(data)
        }
    }

    /// Returns true unless the reply is [`Reply::Absent`].
    pub fn exists(&self) -> bool {
        !matches!(self, Reply::Absent)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nil_is_absent() {
        assert_eq!(Reply::from_frame("GET", Frame::Null).unwrap(), Reply::Absent);
        assert_eq!(
            Reply::from_frame("GET", Frame::BulkString(None)).unwrap(),
            Reply::Absent
        );
    }

    #[test]
    fn test_empty_collection_marker() {
        let reply = Reply::from_frame("GET", Frame::bulk("[]")).unwrap();
        assert_eq!(reply, Reply::EmptyCollection);
        assert!(reply.exists());
    }

    #[test]
    fn test_payload_with_brackets_is_value() {
        let reply = Reply::from_frame("GET", Frame::bulk("[1]")).unwrap();
        assert_eq!(reply, Reply::Value(Bytes::from("[1]")));
    }

    #[test]
    fn test_error_frame_is_command_failed() {
        let err = Reply::from_frame("GET", Frame::Error(b"WRONGTYPE".to_vec())).unwrap_err();
        assert!(matches!(err, Error::CommandFailed { .. }));
    }

    #[test]
    fn test_integer_is_mismatch() {
        let err = Reply::from_frame("HGET", Frame::Integer(3)).unwrap_err();
        match err {
            Error::ReplyTypeMismatch {
                command, actual, ..
            } => {
                assert_eq!(command, "HGET");
                assert_eq!(actual, "integer");
            }
            other => panic!("expected mismatch, got {other:?}"),
        }
    }
}
