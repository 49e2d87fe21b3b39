use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::{Error, Result};
use crate::proto::frame::Frame;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024; // 512 MB default

/// A RESP decoder that converts bytes to [`Frame`] types.
///
/// The decoder handles streaming input. Call [`append`](Decoder::append) to
/// add data, then [`decode`](Decoder::decode) to parse frames. A frame is only
/// consumed from the buffer once it is complete, so a reply split across
/// several reads is decoded correctly.
///
/// Incomplete input is first checked by a scan that copies nothing and
/// resumes where the previous call stopped, so a large reply arriving in
/// many reads is walked once before it is materialized.
///
/// # Example
///
/// ```
/// use kvpool::proto::codec::Decoder;
/// use kvpool::proto::frame::Frame;
///
/// let mut decoder = Decoder::new();
/// decoder.append(b"+OK\r\n");
/// let frame = decoder.decode().unwrap().unwrap();
/// assert_eq!(frame, Frame::SimpleString(b"OK".to_vec()));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
    scan: Scan,
}

/// Progress of the completeness scan over the frame at the buffer head.
#[derive(Debug, Default)]
struct Scan {
    /// Offset of the first element not yet known to be complete.
    pos: usize,
    /// Elements still missing from each open array, outermost first.
    pending: Vec<usize>,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
            scan: Scan::default(),
        }
    }

    /// Appends raw bytes received from the network.
    pub fn append(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns true if undecoded bytes remain in the buffer.
    pub fn has_buffered(&self) -> bool {
        !self.buf.is_empty()
    }

    /// Attempts to decode one frame from the buffer.
    ///
    /// Returns `Ok(None)` if more data is needed and
    /// [`Error::Protocol`] if the data is malformed.
    pub fn decode(&mut self) -> Result<Option<Frame>> {
        if self.buf.is_empty() {
            return Ok(None);
        }

        if self.buf.len() > self.max_frame_size {
            return Err(protocol("buffer size exceeded maximum frame size"));
        }

        let Some(end) = self.scan_complete()? else {
            return Ok(None);
        };
        self.scan = Scan::default();
        match self.parse(0)? {
            Some((frame, consumed)) if consumed == end => {
                self.buf.advance(consumed);
                Ok(Some(frame))
            }
            _ => Err(protocol("frame boundary mismatch")),
        }
    }

    /// Advances the scan over whatever is buffered.
    ///
    /// Returns the length of the head frame once all of it is buffered.
    fn scan_complete(&mut self) -> Result<Option<usize>> {
        loop {
            let pos = self.scan.pos;
            let Some(&marker) = self.buf.get(pos) else {
                return Ok(None);
            };
            let Some(end) = self.find_crlf(pos + 1) else {
                return Ok(None);
            };
            let line = &self.buf[pos + 1..end];
            let next = end + 2;

            let after = match marker {
                b'+' | b'-' => next,
                b':' => {
                    parse_int(line)?;
                    next
                }
                b'$' => {
                    let len = parse_int(line)?;
                    if len < 0 {
                        next
                    } else {
                        let len = len as usize;
                        if len > self.max_frame_size {
                            return Err(protocol("bulk string length exceeds maximum frame size"));
                        }
                        if self.buf.len() < next + len + 2 {
                            return Ok(None);
                        }
                        next + len + 2
                    }
                }
                b'*' => {
                    let len = parse_int(line)?;
                    if len > 0 {
                        let len = len as usize;
                        if len > self.max_frame_size / 16 {
                            return Err(protocol("array length exceeds reasonable maximum"));
                        }
                        self.scan.pending.push(len);
                        self.scan.pos = next;
                        continue;
                    }
                    next
                }
                other => return Err(protocol(format!("unknown frame type: {}", other as char))),
            };

            self.scan.pos = after;
            loop {
                match self.scan.pending.last_mut() {
                    None => return Ok(Some(after)),
                    Some(missing) if *missing > 1 => {
                        *missing -= 1;
                        break;
                    }
                    Some(_) => {
                        self.scan.pending.pop();
                    }
                }
            }
        }
    }

    /// Parses the frame starting at `pos` without consuming it.
    ///
    /// Returns the frame and the offset just past it.
    fn parse(&self, pos: usize) -> Result<Option<(Frame, usize)>> {
        let Some(&marker) = self.buf.get(pos) else {
            return Ok(None);
        };
        let Some(end) = self.find_crlf(pos + 1) else {
            return Ok(None);
        };
        let line = &self.buf[pos + 1..end];
        let next = end + 2;

        match marker {
            b'+' => Ok(Some((Frame::SimpleString(line.to_vec()), next))),
            b'-' => Ok(Some((Frame::Error(line.to_vec()), next))),
            b':' => Ok(Some((Frame::Integer(parse_int(line)?), next))),
            b'$' => {
                let len = parse_int(line)?;
                if len < 0 {
                    return Ok(Some((Frame::BulkString(None), next)));
                }
                let len = len as usize;
                if len > self.max_frame_size {
                    return Err(protocol("bulk string length exceeds maximum frame size"));
                }
                if self.buf.len() < next + len + 2 {
                    return Ok(None);
                }
                if &self.buf[next + len..next + len + 2] != b"\r\n" {
                    return Err(protocol("bulk string not terminated by CRLF"));
                }
                let data = Bytes::copy_from_slice(&self.buf[next..next + len]);
                Ok(Some((Frame::BulkString(Some(data)), next + len + 2)))
            }
            b'*' => {
                let len = parse_int(line)?;
                if len < 0 {
                    return Ok(Some((Frame::Null, next)));
                }
                let len = len as usize;
                // assume at least 16 bytes per element
                if len > self.max_frame_size / 16 {
                    return Err(protocol("array length exceeds reasonable maximum"));
                }
                let mut items = Vec::with_capacity(len);
                let mut cursor = next;
                for _ in 0..len {
                    match self.parse(cursor)? {
                        Some((item, after)) => {
                            items.push(item);
                            cursor = after;
                        }
                        None => return Ok(None),
                    }
                }
                Ok(Some((Frame::Array(items), cursor)))
            }
            other => Err(protocol(format!("unknown frame type: {}", other as char))),
        }
    }

    /// Index of the next `\r\n` at or after `from`.
    fn find_crlf(&self, from: usize) -> Option<usize> {
        self.buf
            .get(from..)?
            .windows(2)
            .position(|w| w == b"\r\n")
            .map(|i| from + i)
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_int(line: &[u8]) -> Result<i64> {
    std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| protocol(format!("invalid integer: {}", String::from_utf8_lossy(line))))
}

fn protocol(message: impl Into<String>) -> Error {
    Error::Protocol {
        message: message.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::codec::Encoder;

    #[test]
    fn test_decode_error() {
        let mut decoder = Decoder::new();
        decoder.append(b"-ERR some error\r\n");
        let frame = decoder.decode().unwrap().unwrap();
        assert_eq!(frame, Frame::Error(b"ERR some error".to_vec()));
    }

    #[test]
    fn test_decode_integer() {
        let mut decoder = Decoder::new();
        decoder.append(b":-42\r\n");
        assert_eq!(decoder.decode().unwrap().unwrap(), Frame::Integer(-42));
    }

    #[test]
    fn test_decode_bulk_string_null() {
        let mut decoder = Decoder::new();
        decoder.append(b"$-1\r\n");
        assert_eq!(decoder.decode().unwrap().unwrap(), Frame::BulkString(None));
    }

    #[test]
    fn test_decode_array_with_nil() {
        let mut decoder = Decoder::new();
        decoder.append(b"*3\r\n$3\r\nfoo\r\n$-1\r\n:7\r\n");
        assert_eq!(
            decoder.decode().unwrap().unwrap(),
            Frame::Array(vec![
                Frame::bulk("foo"),
                Frame::BulkString(None),
                Frame::Integer(7),
            ])
        );
        assert!(!decoder.has_buffered());
    }

    #[test]
    fn test_decode_partial_bulk_keeps_header() {
        let mut decoder = Decoder::new();
        decoder.append(b"$5\r\nhel");
        assert!(decoder.decode().unwrap().is_none());
        decoder.append(b"lo\r\n");
        assert_eq!(decoder.decode().unwrap().unwrap(), Frame::bulk("hello"));
    }

    #[test]
    fn test_decode_partial_array_keeps_elements() {
        let mut decoder = Decoder::new();
        decoder.append(b"*2\r\n$1\r\na\r\n$1");
        assert!(decoder.decode().unwrap().is_none());
        decoder.append(b"\r\nb\r\n");
        assert_eq!(
            decoder.decode().unwrap().unwrap(),
            Frame::Array(vec![Frame::bulk("a"), Frame::bulk("b")])
        );
    }

    #[test]
    fn test_decode_nested_arrays() {
        let mut decoder = Decoder::new();
        decoder.append(b"*3\r\n*1\r\n:1\r\n*0\r\n*-1\r\n+OK\r\n");
        assert_eq!(
            decoder.decode().unwrap().unwrap(),
            Frame::Array(vec![
                Frame::Array(vec![Frame::Integer(1)]),
                Frame::Array(vec![]),
                Frame::Null,
            ])
        );
        assert_eq!(
            decoder.decode().unwrap().unwrap(),
            Frame::SimpleString(b"OK".to_vec())
        );
    }

    #[test]
    fn test_decode_large_array_in_chunks() {
        let items: Vec<Frame> = (0..50_000)
            .map(|i| Frame::bulk(format!("member-{i}")))
            .collect();
        let mut encoder = Encoder::new();
        encoder.encode(&Frame::Array(items.clone()));
        let wire = encoder.take();

        let mut decoder = Decoder::new();
        let mut appended = 0;
        let mut decoded = None;
        for chunk in wire.chunks(4096) {
            assert!(decoded.is_none());
            decoder.append(chunk);
            appended += chunk.len();
            decoded = decoder.decode().unwrap();
            if decoded.is_none() {
                // The scan stops at most one element short of the input.
                assert!(appended - decoder.scan.pos < 64);
            }
        }
        assert_eq!(decoded, Some(Frame::Array(items)));
        assert!(!decoder.has_buffered());
        assert_eq!(decoder.scan.pos, 0);
    }

    #[test]
    fn test_decode_consecutive_frames() {
        let mut decoder = Decoder::new();
        decoder.append(b"+OK\r\n:1\r\n");
        assert_eq!(
            decoder.decode().unwrap().unwrap(),
            Frame::SimpleString(b"OK".to_vec())
        );
        assert_eq!(decoder.decode().unwrap().unwrap(), Frame::Integer(1));
        assert!(decoder.decode().unwrap().is_none());
    }

    #[test]
    fn test_decoder_bulk_string_exceeds_max_size() {
        let mut decoder = Decoder::with_max_frame_size(10);
        decoder.append(b"$100\r\n");
        let err = decoder.decode().unwrap_err();
        assert!(err.to_string().contains("bulk string length exceeds maximum"));
    }

    #[test]
    fn test_decoder_unknown_marker() {
        let mut decoder = Decoder::new();
        decoder.append(b"?x\r\n");
        assert!(matches!(decoder.decode(), Err(Error::Protocol { .. })));
    }

    #[test]
    fn test_decoder_bad_integer() {
        let mut decoder = Decoder::new();
        decoder.append(b":abc\r\n");
        assert!(decoder.decode().is_err());
    }
}
