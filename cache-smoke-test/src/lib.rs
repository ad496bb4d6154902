//! Testing support for cache-smoke
//!
//! This crate provides:
//!
//! * [`MockConnection`], which implements `redis::ConnectionLike` and checks that the
//!   client submits an expected sequence of commands, so `RedisCache` can be tested
//!   without a server;
//! * [`InMemoryCache`], a `CacheClient` backed by a map, with fault injection;
//! * [`FakeMemcached`], a tiny memcached endpoint (text and binary protocols) for
//!   exercising `MemcachedCache` through the real `memcache` client;
//! * helpers in [`server`] and [`cluster`] that spawn real `redis-server` and
//!   `memcached` processes for opt-in integration tests.
//!
//! # Example
//!
//! ```rust
//! use cache_smoke::{Backend, CacheClient, RedisCache};
//! use cache_smoke_test::{MockCmd, MockConnection};
//!
//! let con = MockConnection::new(vec![
//!     MockCmd::new(redis::cmd("GET").arg("foo"), Ok("bar")),
//! ]);
//! let mut cache = RedisCache::new(con, Backend::Redis);
//!
//! assert_eq!(cache.get("foo").unwrap().as_deref(), Some("bar"));
//! ```

pub mod cluster;
mod fake_memcached;
mod memory;
pub mod server;
pub mod utils;

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use redis::{Cmd, ConnectionLike, ErrorKind, Pipeline, RedisError, RedisResult, Value};

pub use crate::fake_memcached::FakeMemcached;
pub use crate::memory::{Fault, InMemoryCache};

/// Helper trait for converting test values into a `redis::Value` returned from a
/// `MockConnection`.
pub trait IntoRedisValue {
    /// Convert a value into `redis::Value`.
    fn into_redis_value(self) -> Value;
}

impl IntoRedisValue for String {
    fn into_redis_value(self) -> Value {
        Value::BulkString(self.into_bytes())
    }
}

impl IntoRedisValue for &str {
    fn into_redis_value(self) -> Value {
        Value::BulkString(self.as_bytes().to_vec())
    }
}

impl IntoRedisValue for i64 {
    fn into_redis_value(self) -> Value {
        Value::Int(self)
    }
}

impl IntoRedisValue for Value {
    fn into_redis_value(self) -> Value {
        self
    }
}

impl<T: IntoRedisValue> IntoRedisValue for Option<T> {
    fn into_redis_value(self) -> Value {
        match self {
            Some(value) => value.into_redis_value(),
            None => Value::Nil,
        }
    }
}

/// Helper trait for converting `redis::Cmd` and `redis::Pipeline` instances into
/// encoded byte vectors.
pub trait IntoRedisCmdBytes {
    /// Convert a command into an encoded byte vector.
    fn into_redis_cmd_bytes(self) -> Vec<u8>;
}

impl IntoRedisCmdBytes for Cmd {
    fn into_redis_cmd_bytes(self) -> Vec<u8> {
        self.get_packed_command()
    }
}

impl IntoRedisCmdBytes for &Cmd {
    fn into_redis_cmd_bytes(self) -> Vec<u8> {
        self.get_packed_command()
    }
}

impl IntoRedisCmdBytes for &mut Cmd {
    fn into_redis_cmd_bytes(self) -> Vec<u8> {
        self.get_packed_command()
    }
}

impl IntoRedisCmdBytes for &Pipeline {
    fn into_redis_cmd_bytes(self) -> Vec<u8> {
        self.get_packed_pipeline()
    }
}

impl IntoRedisCmdBytes for &mut Pipeline {
    fn into_redis_cmd_bytes(self) -> Vec<u8> {
        self.get_packed_pipeline()
    }
}

/// A command expected by a `MockConnection`, paired with the reply to give.
pub struct MockCmd {
    cmd_bytes: Vec<u8>,
    responses: Result<Vec<Value>, RedisError>,
}

impl MockCmd {
    /// Create a new `MockCmd` given a Redis command and either a value convertible to
    /// a `redis::Value` or a `RedisError`.
    pub fn new<C, V>(cmd: C, response: Result<V, RedisError>) -> Self
    where
        C: IntoRedisCmdBytes,
        V: IntoRedisValue,
    {
        MockCmd {
            cmd_bytes: cmd.into_redis_cmd_bytes(),
            responses: response.map(|r| vec![r.into_redis_value()]),
        }
    }

    /// Create a new `MockCmd` for a pipeline, with one reply per queued command.
    pub fn with_values<C, V>(cmd: C, responses: Result<Vec<V>, RedisError>) -> Self
    where
        C: IntoRedisCmdBytes,
        V: IntoRedisValue,
    {
        MockCmd {
            cmd_bytes: cmd.into_redis_cmd_bytes(),
            responses: responses.map(|xs| xs.into_iter().map(|x| x.into_redis_value()).collect()),
        }
    }

    /// The usual `SET key value` / `OK` exchange.
    pub fn set(key: &str, value: &str) -> Self {
        MockCmd::new(redis::cmd("SET").arg(key).arg(value), Ok(Value::Okay))
    }

    /// A `GET key` answered with `reply`, or nil when `reply` is `None`.
    pub fn get(key: &str, reply: Option<&str>) -> Self {
        MockCmd::new(redis::cmd("GET").arg(key), Ok(reply))
    }
}

fn unexpected(expected: &[u8], actual: &[u8]) -> RedisError {
    RedisError::from((
        ErrorKind::ClientError,
        "TEST",
        format!(
            "unexpected command: expected={}, actual={}",
            String::from_utf8_lossy(expected),
            String::from_utf8_lossy(actual),
        ),
    ))
}

/// A mock Redis connection. `MockConnection` checks whether the client submits a
/// specific sequence of commands and generates an error if it does not.
#[derive(Clone)]
pub struct MockConnection {
    commands: Arc<Mutex<VecDeque<MockCmd>>>,
    assert_is_empty_on_drop: bool,
}

impl MockConnection {
    /// Construct a new from the given sequence of commands.
    pub fn new<I>(commands: I) -> Self
    where
        I: IntoIterator<Item = MockCmd>,
    {
        MockConnection {
            commands: Arc::new(Mutex::new(commands.into_iter().collect())),
            assert_is_empty_on_drop: false,
        }
    }

    /// Enable assertion to ensure all commands have been consumed
    pub fn assert_all_commands_consumed(mut self) -> Self {
        self.assert_is_empty_on_drop = true;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.lock().unwrap().is_empty()
    }

    fn next_cmd(&mut self, cmd: &[u8]) -> RedisResult<Vec<Value>> {
        let mut commands = self.commands.lock().unwrap();
        let Some(next_cmd) = commands.pop_front() else {
            self.assert_is_empty_on_drop = false;
            return Err(RedisError::from((
                ErrorKind::ClientError,
                "TEST",
                "unexpected command".to_owned(),
            )));
        };

        if cmd != next_cmd.cmd_bytes {
            self.assert_is_empty_on_drop = false;
            return Err(unexpected(&next_cmd.cmd_bytes, cmd));
        }
        next_cmd.responses
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        if self.assert_is_empty_on_drop && Arc::strong_count(&self.commands) == 1 {
            let commands = self.commands.lock().unwrap();
            assert!(
                commands.is_empty(),
                "{} expected command(s) were never sent",
                commands.len()
            );
        }
    }
}

impl ConnectionLike for MockConnection {
    fn req_packed_command(&mut self, cmd: &[u8]) -> RedisResult<Value> {
        let mut values = self.next_cmd(cmd)?;
        if values.len() == 1 {
            return Ok(values.remove(0));
        }
        self.assert_is_empty_on_drop = false;
        Err(RedisError::from((
            ErrorKind::ClientError,
            "expected exactly one value configured as response",
        )))
    }

    fn req_packed_commands(
        &mut self,
        cmd: &[u8],
        _offset: usize,
        _count: usize,
    ) -> RedisResult<Vec<Value>> {
        self.next_cmd(cmd)
    }

    fn get_db(&self) -> i64 {
        0
    }

    fn check_connection(&mut self) -> bool {
        true
    }

    fn is_open(&self) -> bool {
        true
    }
}
