//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing commands to the
//! key-value server over RESP2.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KVClient` hides pooling and protocol details.
//! 2. **Fail Fast**: Protocol violations surface immediately as errors.
//! 3. **Performance First**: Prefer direct TCP writes and buffer reuse.

use std::fmt;
use std::time::Duration;

use crate::pool::{ConnectionPool, PoolConfig};
use crate::resp::RespValue;

/// Result type for the sync client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the sync client.
#[derive(Debug)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    Io(std::io::Error),
    /// RESP2 framing or parse error.
    Protocol,
    /// Server returned an error reply.
    Server { message: Vec<u8> },
    /// A bulk reply was not valid UTF-8.
    NotUtf8,
    /// Response type did not match the expected command response.
    UnexpectedResponse,
    /// Pool is at capacity and no idle connections are available.
    PoolExhausted,
    /// Address could not be parsed into a socket address.
    InvalidAddress,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "io error: {}", err),
            ClientError::Protocol => write!(f, "protocol error"),
            ClientError::Server { message } => {
                write!(f, "server error: {}", String::from_utf8_lossy(message))
            }
            ClientError::NotUtf8 => write!(f, "reply was not valid utf-8"),
            ClientError::UnexpectedResponse => write!(f, "unexpected response"),
            ClientError::PoolExhausted => write!(f, "connection pool exhausted"),
            ClientError::InvalidAddress => write!(f, "invalid address"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err)
    }
}

/// Configuration for the synchronous client and its pool.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// Maximum idle connections kept in the pool.
    pub max_idle: usize,
    /// Maximum total connections (idle + in-use).
    pub max_total: usize,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            max_idle: 8,
            max_total: 16,
            read_timeout: None,
            write_timeout: None,
            connect_timeout: None,
        }
    }
}

/// Synchronous client with connection pooling.
///
/// This is a facade over the pool and RESP encoder/decoder. Each call acquires
/// a connection, executes one command, and returns the connection to the pool.
pub struct KVClient {
    pool: ConnectionPool,
}

impl KVClient {
    /// Creates a client with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let mut config = ClientConfig::default();
        config.addr = addr.into();
        Self::with_config(config)
    }

    /// Creates a client with a custom configuration.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let pool = ConnectionPool::new(PoolConfig {
            addr: config.addr,
            max_idle: config.max_idle,
            max_total: config.max_total,
            read_timeout: config.read_timeout,
            write_timeout: config.write_timeout,
            connect_timeout: config.connect_timeout,
        })?;
        Ok(KVClient { pool })
    }

    fn exec(&self, args: &[&[u8]]) -> ClientResult<RespValue> {
        let mut conn = self.pool.acquire()?;
        conn.exec(args)
    }

    /// Fetches a string value by key. Returns `Ok(None)` when the key is
    /// missing.
    pub fn get(&self, key: &str) -> ClientResult<Option<String>> {
        match self.exec(&[b"GET", key.as_bytes()])? {
            RespValue::Bulk(Some(data)) => Ok(Some(to_utf8(data)?)),
            RespValue::Bulk(None) => Ok(None),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a string value for a key, with no expiration option.
    pub fn set(&self, key: &str, value: &str) -> ClientResult<()> {
        match self.exec(&[b"SET", key.as_bytes(), value.as_bytes()])? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a string value and attaches an expiration in seconds.
    pub fn set_with_ttl(&self, key: &str, value: &str, ttl: Duration) -> ClientResult<()> {
        let seconds = ttl.as_secs().to_string();
        match self.exec(&[b"SET", key.as_bytes(), value.as_bytes(), b"EX", seconds.as_bytes()])? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes any number of keys. Returns how many were actually removed.
    pub fn del(&self, keys: &[&str]) -> ClientResult<i64> {
        let mut args: Vec<&[u8]> = vec![b"DEL"];
        args.extend(keys.iter().map(|k| k.as_bytes()));
        match self.exec(&args)? {
            RespValue::Integer(count) => Ok(count),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Lists keys matching a glob-style pattern.
    pub fn keys(&self, pattern: &str) -> ClientResult<Vec<String>> {
        match self.exec(&[b"KEYS", pattern.as_bytes()])? {
            RespValue::Array(items) => items.into_iter().map(expect_bulk_string).collect(),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Reads an inclusive slice `[start, stop]` of a list, Redis-style
    /// negative indices allowed.
    pub fn lrange(&self, key: &str, start: i64, stop: i64) -> ClientResult<Vec<String>> {
        let start = start.to_string();
        let stop = stop.to_string();
        match self.exec(&[b"LRANGE", key.as_bytes(), start.as_bytes(), stop.as_bytes()])? {
            RespValue::Array(items) => items.into_iter().map(expect_bulk_string).collect(),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Prepends values to a list, creating it if absent. Returns the new
    /// length.
    pub fn lpush(&self, key: &str, values: &[&str]) -> ClientResult<i64> {
        self.push(b"LPUSH", key, values)
    }

    /// Appends values to a list, creating it if absent. Returns the new
    /// length.
    pub fn rpush(&self, key: &str, values: &[&str]) -> ClientResult<i64> {
        self.push(b"RPUSH", key, values)
    }

    fn push(&self, cmd: &'static [u8], key: &str, values: &[&str]) -> ClientResult<i64> {
        let mut args: Vec<&[u8]> = vec![cmd, key.as_bytes()];
        args.extend(values.iter().map(|v| v.as_bytes()));
        match self.exec(&args)? {
            RespValue::Integer(len) => Ok(len),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Overwrites the element at `index` in a list.
    pub fn lset(&self, key: &str, index: i64, value: &str) -> ClientResult<()> {
        let index = index.to_string();
        match self.exec(&[b"LSET", key.as_bytes(), index.as_bytes(), value.as_bytes()])? {
            RespValue::Simple(_) => Ok(()),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Reads a single element from a list by index.
    pub fn lget(&self, key: &str, index: i64) -> ClientResult<String> {
        let index = index.to_string();
        match self.exec(&[b"LGET", key.as_bytes(), index.as_bytes()])? {
            RespValue::Bulk(Some(data)) => to_utf8(data),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets one field in a hash, creating it if absent. Returns the number
    /// of fields that were newly added (as opposed to overwritten).
    pub fn hset(&self, key: &str, field: &str, value: &str) -> ClientResult<i64> {
        match self.exec(&[b"HSET", key.as_bytes(), field.as_bytes(), value.as_bytes()])? {
            RespValue::Integer(added) => Ok(added),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Reads one field from a hash. Returns `Ok(None)` when the key or the
    /// field is missing.
    pub fn hget(&self, key: &str, field: &str) -> ClientResult<Option<String>> {
        match self.exec(&[b"HGET", key.as_bytes(), field.as_bytes()])? {
            RespValue::Bulk(Some(data)) => Ok(Some(to_utf8(data)?)),
            RespValue::Bulk(None) => Ok(None),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &str, ttl: Duration) -> ClientResult<bool> {
        let seconds = ttl.as_secs().to_string();
        match self.exec(&[b"EXPIRE", key.as_bytes(), seconds.as_bytes()])? {
            RespValue::Integer(value) => Ok(value == 1),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Removes any TTL on a key. Returns true when a TTL was actually
    /// cleared.
    pub fn persist(&self, key: &str) -> ClientResult<bool> {
        match self.exec(&[b"PERSIST", key.as_bytes()])? {
            RespValue::Integer(value) => Ok(value == 1),
            RespValue::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}

fn to_utf8(data: Vec<u8>) -> ClientResult<String> {
    String::from_utf8(data).map_err(|_| ClientError::NotUtf8)
}

fn expect_bulk_string(value: RespValue) -> ClientResult<String> {
    match value {
        RespValue::Bulk(Some(data)) => to_utf8(data),
        _ => Err(ClientError::UnexpectedResponse),
    }
}
