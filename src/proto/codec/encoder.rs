use bytes::{BufMut, BytesMut};

use crate::proto::frame::Frame;

/// A RESP encoder that converts [`Frame`] types to bytes.
///
/// Frames accumulate in an internal buffer until [`take`](Encoder::take) is
/// called, which is what lets a pipeline buffer many requests and write them
/// with a single flush.
///
/// # Example
///
/// ```
/// use kvpool::proto::codec::Encoder;
/// use kvpool::proto::frame::Frame;
///
/// let mut encoder = Encoder::new();
/// encoder.encode(&Frame::SimpleString(b"OK".to_vec()));
/// assert_eq!(encoder.take().as_ref(), b"+OK\r\n");
/// ```
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes a frame into the internal buffer.
    pub fn encode(&mut self, frame: &Frame) {
        match frame {
            Frame::SimpleString(s) => self.line(b'+', s),
            Frame::Error(e) => self.line(b'-', e),
            Frame::Integer(n) => self.line(b':', n.to_string().as_bytes()),
            Frame::BulkString(Some(data)) => {
                self.line(b'$', data.len().to_string().as_bytes());
                self.buf.extend_from_slice(data);
                self.buf.extend_from_slice(b"\r\n");
            }
            Frame::BulkString(None) | Frame::Null => self.line(b'$', b"-1"),
            Frame::Array(items) => {
                self.line(b'*', items.len().to_string().as_bytes());
                for item in items {
                    self.encode(item);
                }
            }
        }
    }

    fn line(&mut self, prefix: u8, body: &[u8]) {
        self.buf.put_u8(prefix);
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\r\n");
    }

    /// Number of encoded bytes waiting to be taken.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Takes the encoded data from the buffer, leaving it empty.
    pub fn take(&mut self) -> BytesMut {
        self.buf.split()
    }
}
