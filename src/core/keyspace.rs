//! Typed operations on one namespaced key.
//!
//! A [`Keyspace`] pairs an instance key with a persistence class. Every
//! operation takes a sub-key that is appended to the instance key; pass `""`
//! to address the instance key itself. Values and collection members are
//! stored as JSON.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::command::{
    frame_to_bool, frame_to_field_pairs, frame_to_int, frame_to_ok, frame_to_replies, Command,
    ListEnd, RangeOrder, SetCondition,
};
use super::value::{decode, decode_optional, decode_reply, encode, Expiry, Lookup};
use super::{ClassPool, Client};
use crate::pool::{ConnectionPool, Persistence};
use crate::proto::error::{Error, PipelineStage, Result};
use crate::proto::frame::{Frame, Reply, EMPTY_COLLECTION};

/// Operations on `prefix:instance_key[:sub_key]` in one persistence class.
///
/// Created by [`Client::keyspace`]. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Keyspace {
    client: Client,
    instance_key: String,
    class: Persistence,
}

impl Keyspace {
    pub(crate) fn new(client: Client, instance_key: String, class: Persistence) -> Self {
        Self {
            client,
            instance_key,
            class,
        }
    }

    /// The instance key.
    pub fn instance_key(&self) -> &str {
        &self.instance_key
    }

    /// The persistence class.
    pub fn class(&self) -> Persistence {
        self.class
    }

    /// Wire key for `key`.
    pub fn wire_key(&self, key: &str) -> String {
        self.class_pool()
            .namespacer
            .namespace(&self.instance_key, Some(key))
    }

    pub(crate) fn pool(&self) -> &ConnectionPool {
        &self.class_pool().pool
    }

    fn class_pool(&self) -> &ClassPool {
        self.client.class_pool(self.class)
    }

    fn expiry(&self, expiry: Expiry) -> Option<u64> {
        expiry.resolve(self.class_pool().default_expire_seconds)
    }

    fn wire_keys<I, K>(&self, keys: I) -> Vec<String>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        keys.into_iter()
            .map(|key| self.wire_key(key.as_ref()))
            .collect()
    }

    // Strings and keys

    /// Stores `value` under `key` with the default expiry.
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<()> {
        self.set_with_expiry(key, value, Expiry::Default).await
    }

    /// Stores `value` under `key`, expiring after `seconds`.
    pub async fn set_ex<T: Serialize + ?Sized>(&self, key: &str, value: &T, seconds: u64) -> Result<()> {
        self.set_with_expiry(key, value, Expiry::Seconds(seconds)).await
    }

    /// Stores `value` under `key` with an explicit [`Expiry`].
    pub async fn set_with_expiry<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        expiry: Expiry,
    ) -> Result<()> {
        let command = Command::Set {
            key: self.wire_key(key),
            value: encode("SET", value)?,
            expire_seconds: self.expiry(expiry),
            condition: SetCondition::Always,
        };
        let reply = self.do_command(command).await?;
        frame_to_ok("SET", reply)
    }

    /// Stores `value` only if `key` does not exist yet.
    ///
    /// Returns `true` when the key already existed; its value is left
    /// untouched.
    pub async fn set_nx<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<bool> {
        let command = Command::Set {
            key: self.wire_key(key),
            value: encode("SET", value)?,
            expire_seconds: self.expiry(Expiry::Default),
            condition: SetCondition::IfAbsent,
        };
        match self.do_command(command).await? {
            Frame::Null | Frame::BulkString(None) => Ok(true),
            reply => frame_to_ok("SET", reply).map(|()| false),
        }
    }

    /// Stores several values in one `MSET`. No expiry is applied.
    pub async fn mset<I, K, V>(&self, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Serialize,
    {
        let pairs = entries
            .into_iter()
            .map(|(key, value)| Ok((self.wire_key(key.as_ref()), encode("MSET", &value)?)))
            .collect::<Result<Vec<_>>>()?;
        if pairs.is_empty() {
            return Ok(());
        }
        let reply = self.do_command(Command::MSet { pairs }).await?;
        frame_to_ok("MSET", reply)
    }

    /// Sets the expiry of `key`. Returns `false` if the key does not exist.
    pub async fn expire(&self, key: &str, seconds: u64) -> Result<bool> {
        let command = Command::Expire {
            key: self.wire_key(key),
            seconds,
        };
        let reply = self.do_command(command).await?;
        frame_to_bool("EXPIRE", reply)
    }

    /// Reads `key`.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Lookup<T>> {
        let reply = self
            .do_command(Command::Get {
                key: self.wire_key(key),
            })
            .await?;
        decode_reply("GET", Reply::from_frame("GET", reply)?)
    }

    /// Reads several keys in one `MGET`, in request order.
    ///
    /// Absent keys and empty collections come back as `None`.
    pub async fn mget<T, I, K>(&self, keys: I) -> Result<Vec<Option<T>>>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys = self.wire_keys(keys);
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let reply = self.do_command(Command::MGet { keys }).await?;
        frame_to_replies("MGET", reply)?
            .into_iter()
            .map(|reply| decode_optional("MGET", reply))
            .collect()
    }

    /// Increments `key` by one and returns the new value.
    pub async fn incr(&self, key: &str) -> Result<i64> {
        self.incr_by(key, 1).await
    }

    /// Increments `key` by `delta` and returns the new value.
    ///
    /// The default expiry is applied after the increment.
    pub async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let command = Command::IncrBy {
            key: self.wire_key(key),
            delta,
        };
        let reply = self
            .write_with_expiry(command, self.expiry(Expiry::Default))
            .await?;
        frame_to_int("INCRBY", reply)
    }

    /// Deletes `key`. Returns how many keys were removed.
    pub async fn del(&self, key: &str) -> Result<i64> {
        self.mdel([key]).await
    }

    /// Deletes several keys. Returns how many were removed.
    pub async fn mdel<I, K>(&self, keys: I) -> Result<i64>
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        let keys = self.wire_keys(keys);
        if keys.is_empty() {
            return Ok(0);
        }
        let reply = self.do_command(Command::Del { keys }).await?;
        frame_to_int("DEL", reply)
    }

    // Hashes

    /// Reads `field` of hash `key`.
    pub async fn hget<T: DeserializeOwned>(&self, key: &str, field: &str) -> Result<Lookup<T>> {
        let command = Command::HGet {
            key: self.wire_key(key),
            field: field.to_string(),
        };
        let reply = self.do_command(command).await?;
        decode_reply("HGET", Reply::from_frame("HGET", reply)?)
    }

    /// Sets `field` of hash `key`, then applies the default expiry to the
    /// hash. Returns `true` if the field is new.
    pub async fn hset<T: Serialize + ?Sized>(&self, key: &str, field: &str, value: &T) -> Result<bool> {
        let command = Command::HSet {
            key: self.wire_key(key),
            field: field.to_string(),
            value: encode("HSET", value)?,
        };
        let reply = self
            .write_with_expiry(command, self.expiry(Expiry::Default))
            .await?;
        frame_to_bool("HSET", reply)
    }

    /// Sets `field` only if it does not exist yet.
    ///
    /// Returns `true` when the field already existed.
    pub async fn hset_nx<T: Serialize + ?Sized>(&self, key: &str, field: &str, value: &T) -> Result<bool> {
        let command = Command::HSetNx {
            key: self.wire_key(key),
            field: field.to_string(),
            value: encode("HSETNX", value)?,
        };
        let reply = self
            .write_with_expiry(command, self.expiry(Expiry::Default))
            .await?;
        frame_to_bool("HSETNX", reply).map(|set| !set)
    }

    /// Sets several fields of hash `key` in one `HMSET`. No expiry is
    /// applied.
    pub async fn hmset<I, F, V>(&self, key: &str, entries: I) -> Result<()>
    where
        I: IntoIterator<Item = (F, V)>,
        F: Into<String>,
        V: Serialize,
    {
        let pairs = entries
            .into_iter()
            .map(|(field, value)| Ok((field.into(), encode("HMSET", &value)?)))
            .collect::<Result<Vec<_>>>()?;
        if pairs.is_empty() {
            return Ok(());
        }
        let command = Command::HMSet {
            key: self.wire_key(key),
            pairs,
        };
        let reply = self.do_command(command).await?;
        frame_to_ok("HMSET", reply)
    }

    /// Reads several fields of hash `key`, in request order.
    pub async fn hmget<T, I, F>(&self, key: &str, fields: I) -> Result<Vec<Option<T>>>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return Ok(Vec::new());
        }
        let command = Command::HMGet {
            key: self.wire_key(key),
            fields,
        };
        let reply = self.do_command(command).await?;
        frame_to_replies("HMGET", reply)?
            .into_iter()
            .map(|reply| decode_optional("HMGET", reply))
            .collect()
    }

    /// Removes fields from hash `key`. Returns how many were removed.
    pub async fn hdel<I, F>(&self, key: &str, fields: I) -> Result<i64>
    where
        I: IntoIterator<Item = F>,
        F: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        if fields.is_empty() {
            return Ok(0);
        }
        let command = Command::HDel {
            key: self.wire_key(key),
            fields,
        };
        let reply = self.do_command(command).await?;
        frame_to_int("HDEL", reply)
    }

    /// Number of fields in hash `key`.
    pub async fn hlen(&self, key: &str) -> Result<i64> {
        let reply = self
            .do_command(Command::HLen {
                key: self.wire_key(key),
            })
            .await?;
        frame_to_int("HLEN", reply)
    }

    /// Increments `field` of hash `key` by `delta` and returns the new value.
    pub async fn hincr_by(&self, key: &str, field: &str, delta: i64) -> Result<i64> {
        let command = Command::HIncrBy {
            key: self.wire_key(key),
            field: field.to_string(),
            delta,
        };
        let reply = self
            .write_with_expiry(command, self.expiry(Expiry::Default))
            .await?;
        frame_to_int("HINCRBY", reply)
    }

    /// Reads every field of hash `key`.
    ///
    /// Meant for small hashes; the whole hash comes back in one reply.
    pub async fn hgetall<T: DeserializeOwned>(&self, key: &str) -> Result<HashMap<String, T>> {
        let reply = self
            .do_command(Command::HGetAll {
                key: self.wire_key(key),
            })
            .await?;
        frame_to_field_pairs("HGETALL", reply)?
            .into_iter()
            .map(|(field, reply)| Ok((field, decode_element("HGETALL", reply)?)))
            .collect()
    }

    // Sorted sets

    /// Adds `member` with `score` to sorted set `key`. Returns how many
    /// members were new.
    pub async fn zadd<T: Serialize + ?Sized>(&self, key: &str, score: f64, member: &T) -> Result<i64> {
        let command = Command::ZAdd {
            key: self.wire_key(key),
            members: vec![(score, encode("ZADD", member)?)],
        };
        let reply = self.do_command(command).await?;
        frame_to_int("ZADD", reply)
    }

    /// Adds several scored members in one `ZADD`.
    pub async fn zadd_many<I, T>(&self, key: &str, members: I) -> Result<i64>
    where
        I: IntoIterator<Item = (f64, T)>,
        T: Serialize,
    {
        let members = members
            .into_iter()
            .map(|(score, member)| Ok((score, encode("ZADD", &member)?)))
            .collect::<Result<Vec<_>>>()?;
        if members.is_empty() {
            return Ok(0);
        }
        let command = Command::ZAdd {
            key: self.wire_key(key),
            members,
        };
        let reply = self.do_command(command).await?;
        frame_to_int("ZADD", reply)
    }

    /// Members ranked `start..=stop`, lowest score first.
    pub async fn zrange<T: DeserializeOwned>(&self, key: &str, start: i64, stop: i64) -> Result<Vec<T>> {
        self.zrange_ordered(key, start, stop, RangeOrder::Ascending)
            .await
    }

    /// Members ranked `start..=stop`, highest score first.
    pub async fn zrevrange<T: DeserializeOwned>(&self, key: &str, start: i64, stop: i64) -> Result<Vec<T>> {
        self.zrange_ordered(key, start, stop, RangeOrder::Descending)
            .await
    }

    async fn zrange_ordered<T: DeserializeOwned>(
        &self,
        key: &str,
        start: i64,
        stop: i64,
        order: RangeOrder,
    ) -> Result<Vec<T>> {
        let command = Command::ZRange {
            key: self.wire_key(key),
            start,
            stop,
            order,
        };
        let name = command.name();
        let reply = self.do_command(command).await?;
        decode_elements(name, reply)
    }

    /// Removes members from sorted set `key`. Returns how many were removed.
    pub async fn zrem<I, T>(&self, key: &str, members: I) -> Result<i64>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let members = encode_all("ZREM", members)?;
        if members.is_empty() {
            return Ok(0);
        }
        let command = Command::ZRem {
            key: self.wire_key(key),
            members,
        };
        let reply = self.do_command(command).await?;
        frame_to_int("ZREM", reply)
    }

    // Lists

    /// Pushes `value` onto the head of list `key`. Returns the new length.
    pub async fn lpush<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<i64> {
        self.push(key, ListEnd::Left, value).await
    }

    /// Pushes `value` onto the tail of list `key`. Returns the new length.
    pub async fn rpush<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> Result<i64> {
        self.push(key, ListEnd::Right, value).await
    }

    async fn push<T: Serialize + ?Sized>(&self, key: &str, end: ListEnd, value: &T) -> Result<i64> {
        let command = Command::Push {
            key: self.wire_key(key),
            end,
            values: vec![encode("PUSH", value)?],
        };
        let name = command.name();
        // Lists never expire.
        let reply = self
            .write_with_expiry(command, self.expiry(Expiry::Never))
            .await?;
        frame_to_int(name, reply)
    }

    /// Pops from the head of list `key`.
    pub async fn lpop<T: DeserializeOwned>(&self, key: &str) -> Result<Lookup<T>> {
        self.pop(key, ListEnd::Left).await
    }

    /// Pops from the tail of list `key`.
    pub async fn rpop<T: DeserializeOwned>(&self, key: &str) -> Result<Lookup<T>> {
        self.pop(key, ListEnd::Right).await
    }

    async fn pop<T: DeserializeOwned>(&self, key: &str, end: ListEnd) -> Result<Lookup<T>> {
        let command = Command::Pop {
            key: self.wire_key(key),
            end,
        };
        let name = command.name();
        let reply = self.do_command(command).await?;
        decode_reply(name, Reply::from_frame(name, reply)?)
    }

    /// Elements `start..=stop` of list `key`.
    pub async fn lrange<T: DeserializeOwned>(&self, key: &str, start: i64, stop: i64) -> Result<Vec<T>> {
        let command = Command::LRange {
            key: self.wire_key(key),
            start,
            stop,
        };
        let reply = self.do_command(command).await?;
        decode_elements("LRANGE", reply)
    }

    /// Length of list `key`.
    pub async fn llen(&self, key: &str) -> Result<i64> {
        let reply = self
            .do_command(Command::LLen {
                key: self.wire_key(key),
            })
            .await?;
        frame_to_int("LLEN", reply)
    }

    /// Removes up to `count` elements equal to `value` (all of them when
    /// `count` is 0, from the tail when negative). Returns how many were
    /// removed.
    pub async fn lrem<T: Serialize + ?Sized>(&self, key: &str, count: i64, value: &T) -> Result<i64> {
        let command = Command::LRem {
            key: self.wire_key(key),
            count,
            value: encode("LREM", value)?,
        };
        let reply = self.do_command(command).await?;
        frame_to_int("LREM", reply)
    }

    // Sets

    /// Adds members to set `key`. Returns how many were new.
    pub async fn sadd<I, T>(&self, key: &str, members: I) -> Result<i64>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let members = encode_all("SADD", members)?;
        if members.is_empty() {
            return Ok(0);
        }
        let command = Command::SAdd {
            key: self.wire_key(key),
            members,
        };
        let reply = self.do_command(command).await?;
        frame_to_int("SADD", reply)
    }

    /// Whether `member` belongs to set `key`.
    pub async fn sismember<T: Serialize + ?Sized>(&self, key: &str, member: &T) -> Result<bool> {
        let command = Command::SIsMember {
            key: self.wire_key(key),
            member: encode("SISMEMBER", member)?,
        };
        let reply = self.do_command(command).await?;
        frame_to_bool("SISMEMBER", reply)
    }

    /// Removes members from set `key`. Returns how many were removed.
    pub async fn srem<I, T>(&self, key: &str, members: I) -> Result<i64>
    where
        I: IntoIterator<Item = T>,
        T: Serialize,
    {
        let members = encode_all("SREM", members)?;
        if members.is_empty() {
            return Ok(0);
        }
        let command = Command::SRem {
            key: self.wire_key(key),
            members,
        };
        let reply = self.do_command(command).await?;
        frame_to_int("SREM", reply)
    }

    // Pipelines

    /// Reads one hash field per `(key, field)` pair in a single pipeline.
    ///
    /// Results are in request order.
    ///
    /// # Errors
    ///
    /// [`Error::Pipeline`] if the batch failed part way, including a reply
    /// that could not be decoded (stage `decode`, with the index of that
    /// reply as the received count).
    pub async fn pipeline_hget<T, I, K, F>(&self, requests: I) -> Result<Vec<Lookup<T>>>
    where
        T: DeserializeOwned,
        I: IntoIterator<Item = (K, F)>,
        K: AsRef<str>,
        F: Into<String>,
    {
        let commands: Vec<Command> = requests
            .into_iter()
            .map(|(key, field)| Command::HGet {
                key: self.wire_key(key.as_ref()),
                field: field.into(),
            })
            .collect();
        let requested = commands.len();

        let replies = self.pipe_do(commands).await?;
        replies
            .into_iter()
            .enumerate()
            .map(|(index, frame)| {
                Reply::from_frame("HGET", frame)
                    .and_then(|reply| decode_reply("HGET", reply))
                    .map_err(|e| Error::Pipeline {
                        stage: PipelineStage::Decode,
                        received: index,
                        requested,
                        source: Box::new(e),
                    })
            })
            .collect()
    }
}

fn encode_all<I, T>(command: &'static str, values: I) -> Result<Vec<bytes::Bytes>>
where
    I: IntoIterator<Item = T>,
    T: Serialize,
{
    values
        .into_iter()
        .map(|value| encode(command, &value))
        .collect()
}

/// Decodes one element of a collection reply. Elements are never nil.
fn decode_element<T: DeserializeOwned>(command: &'static str, reply: Reply) -> Result<T> {
    match reply {
        Reply::Value(payload) => decode(command, &payload),
        Reply::EmptyCollection => decode(command, EMPTY_COLLECTION),
        Reply::Absent => Err(Error::ReplyTypeMismatch {
            command,
            expected: "bulk string",
            actual: "nil".to_string(),
        }),
    }
}

fn decode_elements<T: DeserializeOwned>(command: &'static str, frame: Frame) -> Result<Vec<T>> {
    frame_to_replies(command, frame)?
        .into_iter()
        .map(|reply| decode_element(command, reply))
        .collect()
}
