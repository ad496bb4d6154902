use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{SmokeError, SmokeResult};

/// The kind of server a [`CacheClient`] talks to.
#[derive(PartialEq, Eq, Hash, Copy, Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Backend {
    /// A single Redis node.
    Redis,
    /// A Redis Cluster, addressed through one or more seed nodes.
    RedisCluster,
    /// One or more Memcached servers.
    Memcached,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::Redis, Backend::RedisCluster, Backend::Memcached];

    pub fn as_str(&self) -> &'static str {
        match self {
            Backend::Redis => "redis",
            Backend::RedisCluster => "redis-cluster",
            Backend::Memcached => "memcached",
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Backend {
    type Err = SmokeError;

    fn from_str(s: &str) -> SmokeResult<Backend> {
        Backend::ALL
            .into_iter()
            .find(|backend| backend.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| SmokeError::config(format!("unknown backend {s:?}")))
    }
}

/// The two operations every smoke check is built from.
///
/// Implementations are expected to be thin: all protocol work belongs to the
/// underlying client library, and values cross this boundary as UTF-8 text.
/// A `get` on a key that was never written must return `Ok(None)`.
pub trait CacheClient {
    /// Which kind of server this client is connected to.
    fn backend(&self) -> Backend;

    /// Store `value` under `key`, without expiration.
    fn set(&mut self, key: &str, value: &str) -> SmokeResult<()>;

    /// Read the value stored under `key`.
    fn get(&mut self, key: &str) -> SmokeResult<Option<String>>;
}

impl<T: CacheClient + ?Sized> CacheClient for Box<T> {
    fn backend(&self) -> Backend {
        (**self).backend()
    }

    fn set(&mut self, key: &str, value: &str) -> SmokeResult<()> {
        (**self).set(key, value)
    }

    fn get(&mut self, key: &str) -> SmokeResult<Option<String>> {
        (**self).get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_names_round_trip() {
        for backend in Backend::ALL {
            assert_eq!(backend.as_str().parse::<Backend>().unwrap(), backend);
        }
        assert_eq!("REDIS".parse::<Backend>().unwrap(), Backend::Redis);
    }

    #[test]
    fn unknown_backend_is_a_config_error() {
        let err = "etcd".parse::<Backend>().unwrap_err();
        assert!(matches!(err, SmokeError::Config(_)));
    }

    #[test]
    fn backend_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&Backend::RedisCluster).unwrap(),
            "\"redis-cluster\""
        );
    }
}
