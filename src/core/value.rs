//! JSON value envelope.
//!
//! Every stored value is JSON. Reads go through [`decode`], which keeps one
//! compatibility escape hatch: a value that is not valid JSON for a text
//! destination (`String`, `Box<str>`, ...) is handed over as raw UTF-8 text.
//! Keys written by older producers as bare strings stay readable that way.
//! No other destination type gets the fallback.

use bytes::Bytes;
use serde::de::{self, DeserializeOwned, Visitor};
use serde::Serialize;

use crate::proto::error::{Error, Result};
use crate::proto::frame::Reply;

/// Outcome of a single-value read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup<T> {
    /// The key or field does not exist.
    Absent,
    /// The key exists and holds an empty collection.
    Empty,
    /// The decoded value.
    Found(T),
}

impl<T> Lookup<T> {
    /// Returns true unless the lookup is [`Lookup::Absent`].
    pub fn exists(&self) -> bool {
        !matches!(self, Lookup::Absent)
    }

    /// The decoded value, if one was found.
    pub fn found(self) -> Option<T> {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Absent | Lookup::Empty => None,
        }
    }

    /// The decoded value, or `T::default()` for an empty collection.
    pub fn or_default(self) -> Option<T>
    where
        T: Default,
    {
        match self {
            Lookup::Found(value) => Some(value),
            Lookup::Empty => Some(T::default()),
            Lookup::Absent => None,
        }
    }
}

/// Expiry to apply on a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// The pool's `defaultExpireSeconds`.
    #[default]
    Default,
    /// An explicit number of seconds.
    Seconds(u64),
    /// No expiry, whatever the pool default.
    Never,
}

impl Expiry {
    /// Resolves to a number of seconds, `None` when no expiry applies.
    pub fn resolve(self, default_seconds: u64) -> Option<u64> {
        match self {
            Expiry::Default if default_seconds > 0 => Some(default_seconds),
            Expiry::Seconds(seconds) if seconds > 0 => Some(seconds),
            Expiry::Seconds(_) => None,
            Expiry::Default | Expiry::Never => None,
        }
    }
}

/// Encodes a value as JSON.
pub fn encode<T: Serialize + ?Sized>(command: &'static str, value: &T) -> Result<Bytes> {
    serde_json::to_vec(value)
        .map(Bytes::from)
        .map_err(|source| Error::SerializeFailed { command, source })
}

/// Decodes a JSON payload, falling back to raw text for text destinations.
pub fn decode<T: DeserializeOwned>(command: &'static str, payload: &[u8]) -> Result<T> {
    match serde_json::from_slice(payload) {
        Ok(value) => Ok(value),
        Err(source) => {
            let text = std::str::from_utf8(payload).ok();
            match text.and_then(|text| T::deserialize(RawText(text)).ok()) {
                Some(value) => Ok(value),
                None => Err(Error::DeserializeFailed { command, source }),
            }
        }
    }
}

/// Decodes a tagged reply.
pub fn decode_reply<T: DeserializeOwned>(command: &'static str, reply: Reply) -> Result<Lookup<T>> {
    match reply {
        Reply::Absent => Ok(Lookup::Absent),
        Reply::EmptyCollection => Ok(Lookup::Empty),
        Reply::Value(payload) => decode(command, &payload).map(Lookup::Found),
    }
}

/// Decodes a reply that sits in a multi-value result.
///
/// Absent entries and empty collections both come back as `None`.
pub fn decode_optional<T: DeserializeOwned>(command: &'static str, reply: Reply) -> Result<Option<T>> {
    decode_reply(command, reply).map(Lookup::found)
}

/// Deserializer that only yields a string.
///
/// Every other request, including `deserialize_any`, fails, so structs,
/// numbers, enums and options never pick up the fallback.
struct RawText<'a>(&'a str);

impl<'de, 'a> de::Deserializer<'de> for RawText<'a> {
    type Error = de::value::Error;

    fn deserialize_any<V: Visitor<'de>>(self, _visitor: V) -> std::result::Result<V::Value, Self::Error> {
        Err(de::Error::custom("raw text only decodes into strings"))
    }

    fn deserialize_str<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_str(self.0)
    }

    fn deserialize_string<V: Visitor<'de>>(self, visitor: V) -> std::result::Result<V::Value, Self::Error> {
        visitor.visit_string(self.0.to_owned())
    }

    serde::forward_to_deserialize_any! {
        bool i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char bytes byte_buf
        option unit unit_struct newtype_struct seq tuple tuple_struct map struct
        enum identifier ignored_any
    }
}
