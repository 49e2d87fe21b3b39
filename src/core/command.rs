use bytes::Bytes;

use crate::proto::error::{Error, Result};
use crate::proto::frame::{Frame, Reply};

/// Raw argument list of a request, name first.
///
/// # Example
///
/// ```
/// use kvpool::core::command::Cmd;
///
/// let frame = Cmd::new("SET").arg("key").arg("value").into_frame();
/// ```
#[derive(Debug, Clone)]
pub struct Cmd {
    args: Vec<Bytes>,
}

impl Cmd {
    /// Creates a new command with the given name.
    #[inline]
    pub fn new(name: impl Into<Bytes>) -> Self {
        Self {
            args: vec![name.into()],
        }
    }

    /// Appends an argument to the command.
    #[inline]
    pub fn arg<T: Into<Bytes>>(mut self, arg: T) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Appends every argument from `args`.
    #[inline]
    pub fn args<I, T>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Bytes>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Converts the command to a RESP Array frame.
    #[inline]
    pub fn into_frame(self) -> Frame {
        Frame::Array(
            self.args
                .into_iter()
                .map(|b| Frame::BulkString(Some(b)))
                .collect(),
        )
    }
}

/// Whether `SET` overwrites an existing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetCondition {
    /// Plain `SET`.
    Always,
    /// `SET ... NX`.
    IfAbsent,
}

/// End of a list a push or pop works on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListEnd {
    /// Head of the list (`LPUSH` / `LPOP`).
    Left,
    /// Tail of the list (`RPUSH` / `RPOP`).
    Right,
}

/// Sort direction of a sorted-set range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOrder {
    /// Lowest score first (`ZRANGE`).
    Ascending,
    /// Highest score first (`ZREVRANGE`).
    Descending,
}

/// Every command the client can issue.
///
/// Keys are wire keys, already namespaced. Payload arguments are the encoded
/// bytes sent as-is.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
#[allow(missing_docs)]
pub enum Command {
    /// `PING`
    Ping,
    /// `AUTH password`
    Auth { password: String },
    /// `GET key`
    Get { key: String },
    /// `SET key value [NX] [EX seconds]`
    Set {
        key: String,
        value: Bytes,
        expire_seconds: Option<u64>,
        condition: SetCondition,
    },
    /// `MSET key value [key value ...]`
    MSet { pairs: Vec<(String, Bytes)> },
    /// `MGET key [key ...]`
    MGet { keys: Vec<String> },
    /// `INCRBY key delta`
    IncrBy { key: String, delta: i64 },
    /// `DEL key [key ...]`
    Del { keys: Vec<String> },
    /// `EXPIRE key seconds`
    Expire { key: String, seconds: u64 },
    /// `HGET key field`
    HGet { key: String, field: String },
    /// `HSET key field value`
    HSet {
        key: String,
        field: String,
        value: Bytes,
    },
    /// `HSETNX key field value`
    HSetNx {
        key: String,
        field: String,
        value: Bytes,
    },
    /// `HMSET key field value [field value ...]`
    HMSet {
        key: String,
        pairs: Vec<(String, Bytes)>,
    },
    /// `HMGET key field [field ...]`
    HMGet { key: String, fields: Vec<String> },
    /// `HDEL key field [field ...]`
    HDel { key: String, fields: Vec<String> },
    /// `HLEN key`
    HLen { key: String },
    /// `HINCRBY key field delta`
    HIncrBy {
        key: String,
        field: String,
        delta: i64,
    },
    /// `HGETALL key`
    HGetAll { key: String },
    /// `ZADD key score member [score member ...]`
    ZAdd {
        key: String,
        members: Vec<(f64, Bytes)>,
    },
    /// `ZRANGE` / `ZREVRANGE key start stop`
    ZRange {
        key: String,
        start: i64,
        stop: i64,
        order: RangeOrder,
    },
    /// `ZREM key member [member ...]`
    ZRem { key: String, members: Vec<Bytes> },
    /// `LPUSH` / `RPUSH key value [value ...]`
    Push {
        key: String,
        end: ListEnd,
        values: Vec<Bytes>,
    },
    /// `LPOP` / `RPOP key`
    Pop { key: String, end: ListEnd },
    /// `LRANGE key start stop`
    LRange { key: String, start: i64, stop: i64 },
    /// `LLEN key`
    LLen { key: String },
    /// `LREM key count value`
    LRem {
        key: String,
        count: i64,
        value: Bytes,
    },
    /// `SADD key member [member ...]`
    SAdd { key: String, members: Vec<Bytes> },
    /// `SISMEMBER key member`
    SIsMember { key: String, member: Bytes },
    /// `SREM key member [member ...]`
    SRem { key: String, members: Vec<Bytes> },
}

impl Command {
    /// Wire name of the command.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Ping => "PING",
            Command::Auth { .. } => "AUTH",
            Command::Get { .. } => "GET",
            Command::Set { .. } => "SET",
            Command::MSet { .. } => "MSET",
            Command::MGet { .. } => "MGET",
            Command::IncrBy { .. } => "INCRBY",
            Command::Del { .. } => "DEL",
            Command::Expire { .. } => "EXPIRE",
            Command::HGet { .. } => "HGET",
            Command::HSet { .. } => "HSET",
            Command::HSetNx { .. } => "HSETNX",
            Command::HMSet { .. } => "HMSET",
            Command::HMGet { .. } => "HMGET",
            Command::HDel { .. } => "HDEL",
            Command::HLen { .. } => "HLEN",
            Command::HIncrBy { .. } => "HINCRBY",
            Command::HGetAll { .. } => "HGETALL",
            Command::ZAdd { .. } => "ZADD",
            Command::ZRange {
                order: RangeOrder::Ascending,
                ..
            } => "ZRANGE",
            Command::ZRange {
                order: RangeOrder::Descending,
                ..
            } => "ZREVRANGE",
            Command::ZRem { .. } => "ZREM",
            Command::Push {
                end: ListEnd::Left, ..
            } => "LPUSH",
            Command::Push {
                end: ListEnd::Right,
                ..
            } => "RPUSH",
            Command::Pop {
                end: ListEnd::Left, ..
            } => "LPOP",
            Command::Pop {
                end: ListEnd::Right,
                ..
            } => "RPOP",
            Command::LRange { .. } => "LRANGE",
            Command::LLen { .. } => "LLEN",
            Command::LRem { .. } => "LREM",
            Command::SAdd { .. } => "SADD",
            Command::SIsMember { .. } => "SISMEMBER",
            Command::SRem { .. } => "SREM",
        }
    }

    /// The key a follow-up `EXPIRE` applies to, for commands that write a
    /// single key without taking a TTL themselves.
    pub fn expiry_target(&self) -> Option<&str> {
        match self {
            Command::IncrBy { key, .. }
            | Command::HSet { key, .. }
            | Command::HSetNx { key, .. }
            | Command::HIncrBy { key, .. }
            | Command::ZAdd { key, .. }
            | Command::Push { key, .. }
            | Command::SAdd { key, .. } => Some(key),
            _ => None,
        }
    }

    /// First key the command touches.
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Ping | Command::Auth { .. } => None,
            Command::MSet { pairs } => pairs.first().map(|(key, _)| key.as_str()),
            Command::MGet { keys } | Command::Del { keys } => keys.first().map(String::as_str),
            Command::Get { key }
            | Command::Set { key, .. }
            | Command::IncrBy { key, .. }
            | Command::Expire { key, .. }
            | Command::HGet { key, .. }
            | Command::HSet { key, .. }
            | Command::HSetNx { key, .. }
            | Command::HMSet { key, .. }
            | Command::HMGet { key, .. }
            | Command::HDel { key, .. }
            | Command::HLen { key }
            | Command::HIncrBy { key, .. }
            | Command::HGetAll { key }
            | Command::ZAdd { key, .. }
            | Command::ZRange { key, .. }
            | Command::ZRem { key, .. }
            | Command::Push { key, .. }
            | Command::Pop { key, .. }
            | Command::LRange { key, .. }
            | Command::LLen { key }
            | Command::LRem { key, .. }
            | Command::SAdd { key, .. }
            | Command::SIsMember { key, .. }
            | Command::SRem { key, .. } => Some(key),
        }
    }

    /// Whether the command modifies data.
    pub fn is_write(&self) -> bool {
        !matches!(
            self,
            Command::Ping
                | Command::Auth { .. }
                | Command::Get { .. }
                | Command::MGet { .. }
                | Command::HGet { .. }
                | Command::HMGet { .. }
                | Command::HLen { .. }
                | Command::HGetAll { .. }
                | Command::ZRange { .. }
                | Command::LRange { .. }
                | Command::LLen { .. }
                | Command::SIsMember { .. }
        )
    }

    /// Converts the command into its request frame.
    pub fn into_frame(self) -> Frame {
        let name = self.name();
        let cmd = Cmd::new(name);
        let cmd = match self {
            Command::Ping => cmd,
            Command::Auth { password } => cmd.arg(password),
            Command::Get { key }
            | Command::HLen { key }
            | Command::HGetAll { key }
            | Command::Pop { key, .. }
            | Command::LLen { key } => cmd.arg(key),
            Command::Set {
                key,
                value,
                expire_seconds,
                condition,
            } => {
                let mut cmd = cmd.arg(key).arg(value);
                if condition == SetCondition::IfAbsent {
                    cmd = cmd.arg("NX");
                }
                if let Some(seconds) = expire_seconds {
                    cmd = cmd.arg("EX").arg(seconds.to_string());
                }
                cmd
            }
            Command::MSet { pairs } => pairs
                .into_iter()
                .fold(cmd, |cmd, (key, value)| cmd.arg(key).arg(value)),
            Command::MGet { keys } | Command::Del { keys } => cmd.args(keys),
            Command::IncrBy { key, delta } => cmd.arg(key).arg(delta.to_string()),
            Command::Expire { key, seconds } => cmd.arg(key).arg(seconds.to_string()),
            Command::HGet { key, field } => cmd.arg(key).arg(field),
            Command::HSet { key, field, value } | Command::HSetNx { key, field, value } => {
                cmd.arg(key).arg(field).arg(value)
            }
            Command::HMSet { key, pairs } => pairs
                .into_iter()
                .fold(cmd.arg(key), |cmd, (field, value)| cmd.arg(field).arg(value)),
            Command::HMGet { key, fields } | Command::HDel { key, fields } => {
                cmd.arg(key).args(fields)
            }
            Command::HIncrBy { key, field, delta } => {
                cmd.arg(key).arg(field).arg(delta.to_string())
            }
            Command::ZAdd { key, members } => members
                .into_iter()
                .fold(cmd.arg(key), |cmd, (score, member)| {
                    cmd.arg(score.to_string()).arg(member)
                }),
            Command::ZRange {
                key, start, stop, ..
            }
            | Command::LRange { key, start, stop } => cmd
                .arg(key)
                .arg(start.to_string())
                .arg(stop.to_string()),
            Command::ZRem { key, members }
            | Command::SAdd { key, members }
            | Command::SRem { key, members } => cmd.arg(key).args(members),
            Command::Push { key, values, .. } => cmd.arg(key).args(values),
            Command::LRem { key, count, value } => {
                cmd.arg(key).arg(count.to_string()).arg(value)
            }
            Command::SIsMember { key, member } => cmd.arg(key).arg(member),
        };
        cmd.into_frame()
    }
}

/// Turns an error frame into [`Error::CommandFailed`], passing others through.
#[inline]
pub fn parse_frame_response(frame: Frame) -> Result<Frame> {
    match frame {
        Frame::Error(e) => Err(Error::from_server_reply(&e)),
        _ => Ok(frame),
    }
}

fn mismatch(command: &'static str, expected: &'static str, frame: &Frame) -> Error {
    Error::ReplyTypeMismatch {
        command,
        expected,
        actual: frame.kind_name().to_string(),
    }
}

/// Requires an integer reply.
#[inline]
pub fn frame_to_int(command: &'static str, frame: Frame) -> Result<i64> {
    match parse_frame_response(frame)? {
        Frame::Integer(i) => Ok(i),
        other => Err(mismatch(command, "integer", &other)),
    }
}

/// Requires an integer reply of 0 or 1.
#[inline]
pub fn frame_to_bool(command: &'static str, frame: Frame) -> Result<bool> {
    match parse_frame_response(frame)? {
        Frame::Integer(0) => Ok(false),
        Frame::Integer(1) => Ok(true),
        other => Err(mismatch(command, "integer 0 or 1", &other)),
    }
}

/// Requires a `+OK` status reply.
#[inline]
pub fn frame_to_ok(command: &'static str, frame: Frame) -> Result<()> {
    let frame = parse_frame_response(frame)?;
    if frame.is_ok() {
        Ok(())
    } else {
        Err(mismatch(command, "OK", &frame))
    }
}

/// Decodes an array reply into one [`Reply`] per element.
///
/// A nil array (missing key for some commands) yields no elements.
#[inline]
pub fn frame_to_replies(command: &'static str, frame: Frame) -> Result<Vec<Reply>> {
    match parse_frame_response(frame)? {
        Frame::Array(items) => items
            .into_iter()
            .map(|item| Reply::from_frame(command, item))
            .collect(),
        Frame::Null => Ok(Vec::new()),
        other => Err(mismatch(command, "array", &other)),
    }
}

/// Decodes a flat field/value array (`HGETALL`) into pairs.
#[inline]
pub fn frame_to_field_pairs(command: &'static str, frame: Frame) -> Result<Vec<(String, Reply)>> {
    let items = match parse_frame_response(frame)? {
        Frame::Array(items) => items,
        other => return Err(mismatch(command, "array", &other)),
    };
    if items.len() % 2 != 0 {
        return Err(Error::ReplyTypeMismatch {
            command,
            expected: "even number of elements",
            actual: format!("{} elements", items.len()),
        });
    }
    let mut pairs = Vec::with_capacity(items.len() / 2);
    let mut items = items.into_iter();
    while let (Some(field), Some(value)) = (items.next(), items.next()) {
        let field = match field {
            Frame::BulkString(Some(b)) => String::from_utf8_lossy(&b).into_owned(),
            Frame::SimpleString(s) => String::from_utf8_lossy(&s).into_owned(),
            other => return Err(mismatch(command, "bulk string field", &other)),
        };
        pairs.push((field, Reply::from_frame(command, value)?));
    }
    Ok(pairs)
}
