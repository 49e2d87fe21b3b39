//! In-process RESP server for integration tests.
//!
//! Speaks enough of the protocol for every command the client issues and
//! keeps its data in memory, with lazy expiry. Tests can count accepted
//! connections, drop live connections, or stop the server to force a
//! failover.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use kvpool::proto::codec::{Decoder, Encoder};
use kvpool::{Client, Frame, PoolConfig, RedisConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

enum Value {
    Str(Bytes),
    Hash(HashMap<Bytes, Bytes>),
    List(VecDeque<Bytes>),
    Set(HashSet<Bytes>),
    ZSet(Vec<(f64, Bytes)>),
}

struct Entry {
    value: Value,
    expires_at: Option<Instant>,
}

#[derive(Default)]
struct Store {
    entries: HashMap<Bytes, Entry>,
}

impl Store {
    fn live(&mut self, key: &Bytes) -> Option<&mut Entry> {
        let expired = self
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .is_some_and(|at| Instant::now() >= at);
        if expired {
            self.entries.remove(key);
        }
        self.entries.get_mut(key)
    }

    fn exists(&mut self, key: &Bytes) -> bool {
        self.live(key).is_some()
    }
}

struct State {
    store: Mutex<Store>,
    password: Option<String>,
    accepted: AtomicUsize,
    commands: AtomicUsize,
    failing: Mutex<HashSet<String>>,
    connections: Mutex<Vec<JoinHandle<()>>>,
}

/// A running mock server.
pub struct MockServer {
    addr: String,
    state: Arc<State>,
    acceptor: JoinHandle<()>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::start_with_password(None).await
    }

    pub async fn start_with_password(password: Option<&str>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(State {
            store: Mutex::new(Store::default()),
            password: password.map(str::to_string),
            accepted: AtomicUsize::new(0),
            commands: AtomicUsize::new(0),
            failing: Mutex::new(HashSet::new()),
            connections: Mutex::new(Vec::new()),
        });

        let accept_state = state.clone();
        let acceptor = tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.accepted.fetch_add(1, Ordering::SeqCst);
                let conn_state = accept_state.clone();
                let handle = tokio::spawn(serve(socket, conn_state));
                accept_state.connections.lock().unwrap().push(handle);
            }
        });

        Self {
            addr,
            state,
            acceptor,
        }
    }

    pub fn addr(&self) -> String {
        self.addr.clone()
    }

    /// Connections accepted so far.
    pub fn accepted(&self) -> usize {
        self.state.accepted.load(Ordering::SeqCst)
    }

    /// Commands executed so far, `AUTH` included.
    pub fn commands(&self) -> usize {
        self.state.commands.load(Ordering::SeqCst)
    }

    /// Answers every later `name` command with an error reply.
    pub fn fail_command(&self, name: &str) {
        self.state
            .failing
            .lock()
            .unwrap()
            .insert(name.to_ascii_uppercase());
    }

    /// Drops every live connection but keeps listening.
    pub async fn kill_connections(&self) {
        let handles: Vec<_> = self.state.connections.lock().unwrap().drain(..).collect();
        for handle in handles {
            handle.abort();
            let _ = handle.await;
        }
    }

    /// Stops listening and drops every live connection.
    pub async fn stop(&mut self) {
        self.acceptor.abort();
        let _ = (&mut self.acceptor).await;
        self.kill_connections().await;
    }

    /// Stores raw bytes under a wire key, bypassing JSON encoding.
    pub fn put_raw(&self, key: &str, value: &[u8]) {
        self.state.store.lock().unwrap().entries.insert(
            Bytes::copy_from_slice(key.as_bytes()),
            Entry {
                value: Value::Str(Bytes::copy_from_slice(value)),
                expires_at: None,
            },
        );
    }

    /// Raw bytes stored under a wire key.
    pub fn get_raw(&self, key: &str) -> Option<Bytes> {
        let mut store = self.state.store.lock().unwrap();
        match store.live(&Bytes::copy_from_slice(key.as_bytes())) {
            Some(Entry {
                value: Value::Str(value),
                ..
            }) => Some(value.clone()),
            _ => None,
        }
    }

    /// Remaining time to live of a wire key, `None` without expiry.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let mut store = self.state.store.lock().unwrap();
        store
            .live(&Bytes::copy_from_slice(key.as_bytes()))
            .and_then(|e| e.expires_at)
            .map(|at| at.saturating_duration_since(Instant::now()))
    }

    pub fn contains(&self, key: &str) -> bool {
        let mut store = self.state.store.lock().unwrap();
        store.exists(&Bytes::copy_from_slice(key.as_bytes()))
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.acceptor.abort();
        for handle in self.state.connections.lock().unwrap().drain(..) {
            handle.abort();
        }
    }
}

/// Pool config pointing at `addresses` with small, test-friendly limits.
pub fn pool_config(addresses: Vec<String>) -> PoolConfig {
    PoolConfig {
        addresses,
        pool_min_active: 1,
        pool_max_active: 8,
        pool_wait_timeout_ms: 500,
        key_prefix: "test".to_string(),
        ..PoolConfig::default()
    }
}

/// Client with both classes on one mock server.
pub async fn client_for(server: &MockServer) -> Client {
    let config = RedisConfig::uniform(pool_config(vec![server.addr()]));
    Client::connect(config).await.unwrap()
}

async fn serve(mut socket: TcpStream, state: Arc<State>) {
    let mut decoder = Decoder::new();
    let mut encoder = Encoder::new();
    let mut authed = state.password.is_none();
    let mut buf = [0u8; 4096];

    loop {
        let n = match socket.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        decoder.append(&buf[..n]);
        while let Ok(Some(frame)) = decoder.decode() {
            state.commands.fetch_add(1, Ordering::SeqCst);
            let reply = match args(frame) {
                Some(args) => execute(&state, &mut authed, args),
                None => error("ERR protocol error"),
            };
            encoder.encode(&reply);
        }
        if socket.write_all(&encoder.take()).await.is_err() {
            return;
        }
    }
}

fn args(frame: Frame) -> Option<Vec<Bytes>> {
    match frame {
        Frame::Array(items) => items
            .into_iter()
            .map(|item| match item {
                Frame::BulkString(Some(b)) => Some(b),
                _ => None,
            })
            .collect(),
        _ => None,
    }
}

fn ok() -> Frame {
    Frame::SimpleString(b"OK".to_vec())
}

fn error(message: &str) -> Frame {
    Frame::Error(message.as_bytes().to_vec())
}

fn wrong_type() -> Frame {
    error("WRONGTYPE Operation against a key holding the wrong kind of value")
}

fn int(n: usize) -> Frame {
    Frame::Integer(n as i64)
}

fn text(b: &Bytes) -> Option<&str> {
    std::str::from_utf8(b).ok()
}

fn parse_i64(b: &Bytes) -> Option<i64> {
    text(b)?.parse().ok()
}

/// Resolves Redis-style inclusive range indices against `len`.
fn range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

fn execute(state: &State, authed: &mut bool, args: Vec<Bytes>) -> Frame {
    let Some((name, rest)) = args.split_first() else {
        return error("ERR empty command");
    };
    let name = String::from_utf8_lossy(name).to_ascii_uppercase();

    if name == "AUTH" {
        return match (&state.password, rest.first().and_then(text)) {
            (Some(expected), Some(given)) if expected == given => {
                *authed = true;
                ok()
            }
            _ => error("WRONGPASS invalid username-password pair"),
        };
    }
    if !*authed {
        return error("NOAUTH Authentication required.");
    }
    if state.failing.lock().unwrap().contains(&name) {
        return error("ERR command disabled");
    }

    let mut store = state.store.lock().unwrap();
    run(&mut store, &name, rest).unwrap_or_else(|| error("ERR wrong number of arguments"))
}

fn run(store: &mut Store, name: &str, args: &[Bytes]) -> Option<Frame> {
    let key = args.first().cloned();
    let reply = match name {
        "PING" => Frame::SimpleString(b"PONG".to_vec()),
        "SET" => {
            let key = key?;
            let value = args.get(1)?.clone();
            let mut nx = false;
            let mut ttl = None;
            let mut opts = args[2..].iter();
            while let Some(opt) = opts.next() {
                match text(opt)?.to_ascii_uppercase().as_str() {
                    "NX" => nx = true,
                    "EX" => ttl = Some(Duration::from_secs(parse_i64(opts.next()?)? as u64)),
                    _ => return Some(error("ERR syntax error")),
                }
            }
            if nx && store.exists(&key) {
                return Some(Frame::BulkString(None));
            }
            store.entries.insert(
                key,
                Entry {
                    value: Value::Str(value),
                    expires_at: ttl.map(|ttl| Instant::now() + ttl),
                },
            );
            ok()
        }
        "GET" => match store.live(&key?) {
            None => Frame::BulkString(None),
            Some(Entry {
                value: Value::Str(v),
                ..
            }) => Frame::BulkString(Some(v.clone())),
            Some(_) => wrong_type(),
        },
        "MSET" => {
            if args.is_empty() || args.len() % 2 != 0 {
                return None;
            }
            for pair in args.chunks(2) {
                store.entries.insert(
                    pair[0].clone(),
                    Entry {
                        value: Value::Str(pair[1].clone()),
                        expires_at: None,
                    },
                );
            }
            ok()
        }
        "MGET" => Frame::Array(
            args.iter()
                .map(|key| match store.live(key) {
                    Some(Entry {
                        value: Value::Str(v),
                        ..
                    }) => Frame::BulkString(Some(v.clone())),
                    _ => Frame::BulkString(None),
                })
                .collect(),
        ),
        "INCRBY" => {
            let key = key?;
            let delta = parse_i64(args.get(1)?)?;
            let current = match store.live(&key) {
                None => 0,
                Some(Entry {
                    value: Value::Str(v),
                    ..
                }) => match parse_i64(v) {
                    Some(n) => n,
                    None => return Some(error("ERR value is not an integer or out of range")),
                },
                Some(_) => return Some(wrong_type()),
            };
            let next = current + delta;
            let value = Value::Str(Bytes::from(next.to_string()));
            match store.live(&key) {
                Some(entry) => entry.value = value,
                None => {
                    store.entries.insert(
                        key,
                        Entry {
                            value,
                            expires_at: None,
                        },
                    );
                }
            }
            Frame::Integer(next)
        }
        "DEL" => {
            let mut removed = 0;
            for key in args {
                if store.exists(key) {
                    store.entries.remove(key);
                    removed += 1;
                }
            }
            int(removed)
        }
        "EXPIRE" => {
            let seconds = parse_i64(args.get(1)?)?;
            match store.live(&key?) {
                Some(entry) => {
                    entry.expires_at = Some(Instant::now() + Duration::from_secs(seconds as u64));
                    int(1)
                }
                None => int(0),
            }
        }
        "HSET" | "HSETNX" | "HGET" | "HMSET" | "HMGET" | "HDEL" | "HLEN" | "HINCRBY"
        | "HGETALL" => return hash(store, name, key?, &args[1..]),
        "ZADD" | "ZRANGE" | "ZREVRANGE" | "ZREM" => return zset(store, name, key?, &args[1..]),
        "LPUSH" | "RPUSH" | "LPOP" | "RPOP" | "LRANGE" | "LLEN" | "LREM" => {
            return list(store, name, key?, &args[1..])
        }
        "SADD" | "SISMEMBER" | "SREM" => return set(store, name, key?, &args[1..]),
        other => error(&format!("ERR unknown command '{other}'")),
    };
    Some(reply)
}

/// Fetches the collection under `key`, creating an empty one when `$create`.
macro_rules! collection {
    ($store:expr, $key:expr, $variant:ident, $create:expr) => {{
        if $create && !$store.exists(&$key) {
            $store.entries.insert(
                $key.clone(),
                Entry {
                    value: Value::$variant(Default::default()),
                    expires_at: None,
                },
            );
        }
        match $store.live(&$key) {
            Some(Entry {
                value: Value::$variant(c),
                ..
            }) => Some(c),
            Some(_) => return Some(wrong_type()),
            None => None,
        }
    }};
}

fn hash(store: &mut Store, name: &str, key: Bytes, args: &[Bytes]) -> Option<Frame> {
    let create = matches!(name, "HSET" | "HSETNX" | "HMSET" | "HINCRBY");
    let hash = collection!(store, key, Hash, create);
    let reply = match (name, hash) {
        ("HSET", Some(h)) => int(usize::from(
            h.insert(args.first()?.clone(), args.get(1)?.clone()).is_none(),
        )),
        ("HSETNX", Some(h)) => {
            let field = args.first()?.clone();
            if h.contains_key(&field) {
                int(0)
            } else {
                h.insert(field, args.get(1)?.clone());
                int(1)
            }
        }
        ("HMSET", Some(h)) => {
            if args.is_empty() || args.len() % 2 != 0 {
                return None;
            }
            for pair in args.chunks(2) {
                h.insert(pair[0].clone(), pair[1].clone());
            }
            ok()
        }
        ("HINCRBY", Some(h)) => {
            let field = args.first()?.clone();
            let delta = parse_i64(args.get(1)?)?;
            let current = match h.get(&field) {
                Some(v) => match parse_i64(v) {
                    Some(n) => n,
                    None => return Some(error("ERR hash value is not an integer")),
                },
                None => 0,
            };
            h.insert(field, Bytes::from((current + delta).to_string()));
            Frame::Integer(current + delta)
        }
        ("HGET", h) => Frame::BulkString(h.and_then(|h| h.get(args.first()?).cloned())),
        ("HMGET", h) => Frame::Array(
            args.iter()
                .map(|field| Frame::BulkString(h.as_ref().and_then(|h| h.get(field).cloned())))
                .collect(),
        ),
        ("HDEL", h) => int(h.map_or(0, |h| {
            args.iter().filter(|field| h.remove(*field).is_some()).count()
        })),
        ("HLEN", h) => int(h.map_or(0, |h| h.len())),
        ("HGETALL", h) => Frame::Array(
            h.map(|h| {
                h.iter()
                    .flat_map(|(f, v)| [Frame::BulkString(Some(f.clone())), Frame::BulkString(Some(v.clone()))])
                    .collect()
            })
            .unwrap_or_default(),
        ),
        _ => return None,
    };
    Some(reply)
}

fn zset(store: &mut Store, name: &str, key: Bytes, args: &[Bytes]) -> Option<Frame> {
    let zset = collection!(store, key, ZSet, name == "ZADD");
    let reply = match (name, zset) {
        ("ZADD", Some(z)) => {
            if args.is_empty() || args.len() % 2 != 0 {
                return None;
            }
            let mut added = 0;
            for pair in args.chunks(2) {
                let score: f64 = text(&pair[0])?.parse().ok()?;
                match z.iter_mut().find(|(_, m)| *m == pair[1]) {
                    Some(existing) => existing.0 = score,
                    None => {
                        z.push((score, pair[1].clone()));
                        added += 1;
                    }
                }
            }
            z.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.cmp(&b.1)));
            int(added)
        }
        ("ZRANGE" | "ZREVRANGE", z) => {
            let mut members: Vec<Bytes> = z
                .map(|z| z.iter().map(|(_, m)| m.clone()).collect())
                .unwrap_or_default();
            if name == "ZREVRANGE" {
                members.reverse();
            }
            let start = parse_i64(args.first()?)?;
            let stop = parse_i64(args.get(1)?)?;
            Frame::Array(match range(members.len(), start, stop) {
                Some((from, to)) => members[from..=to]
                    .iter()
                    .map(|m| Frame::BulkString(Some(m.clone())))
                    .collect(),
                None => Vec::new(),
            })
        }
        ("ZREM", z) => int(z.map_or(0, |z| {
            let before = z.len();
            z.retain(|(_, m)| !args.contains(m));
            before - z.len()
        })),
        _ => return None,
    };
    Some(reply)
}

fn list(store: &mut Store, name: &str, key: Bytes, args: &[Bytes]) -> Option<Frame> {
    let list = collection!(store, key, List, matches!(name, "LPUSH" | "RPUSH"));
    let reply = match (name, list) {
        ("LPUSH", Some(l)) => {
            for value in args {
                l.push_front(value.clone());
            }
            int(l.len())
        }
        ("RPUSH", Some(l)) => {
            l.extend(args.iter().cloned());
            int(l.len())
        }
        ("LPOP", l) => Frame::BulkString(l.and_then(VecDeque::pop_front)),
        ("RPOP", l) => Frame::BulkString(l.and_then(VecDeque::pop_back)),
        ("LRANGE", l) => {
            let start = parse_i64(args.first()?)?;
            let stop = parse_i64(args.get(1)?)?;
            Frame::Array(match l {
                Some(l) => match range(l.len(), start, stop) {
                    Some((from, to)) => l
                        .range(from..=to)
                        .map(|v| Frame::BulkString(Some(v.clone())))
                        .collect(),
                    None => Vec::new(),
                },
                None => Vec::new(),
            })
        }
        ("LLEN", l) => int(l.map_or(0, |l| l.len())),
        ("LREM", l) => {
            let count = parse_i64(args.first()?)?;
            let value = args.get(1)?;
            int(l.map_or(0, |l| remove_matching(l, count, value)))
        }
        _ => return None,
    };
    Some(reply)
}

fn remove_matching(list: &mut VecDeque<Bytes>, count: i64, value: &Bytes) -> usize {
    let limit = if count == 0 { usize::MAX } else { count.unsigned_abs() as usize };
    let mut removed = 0;
    if count >= 0 {
        let mut i = 0;
        while i < list.len() && removed < limit {
            if list[i] == *value {
                list.remove(i);
                removed += 1;
            } else {
                i += 1;
            }
        }
    } else {
        let mut i = list.len();
        while i > 0 && removed < limit {
            i -= 1;
            if list[i] == *value {
                list.remove(i);
                removed += 1;
            }
        }
    }
    removed
}

fn set(store: &mut Store, name: &str, key: Bytes, args: &[Bytes]) -> Option<Frame> {
    let set = collection!(store, key, Set, name == "SADD");
    let reply = match (name, set) {
        ("SADD", Some(s)) => int(args.iter().filter(|m| s.insert((*m).clone())).count()),
        ("SISMEMBER", s) => int(usize::from(
            s.is_some_and(|s| s.contains(args.first().unwrap_or(&Bytes::new()))),
        )),
        ("SREM", s) => int(s.map_or(0, |s| args.iter().filter(|m| s.remove(*m)).count())),
        _ => return None,
    };
    Some(reply)
}
