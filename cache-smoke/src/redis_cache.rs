use log::debug;
use redis::ConnectionLike;

use crate::client::{Backend, CacheClient};
use crate::errors::{SmokeError, SmokeResult};

/// A [`CacheClient`] over anything that behaves like a Redis connection.
///
/// The same type serves a single node (`redis::Connection`), a cluster
/// (`redis::cluster::ClusterConnection`) and mock connections in tests; the
/// `backend` tag only affects how results are labelled.
///
/// ```rust,no_run
/// use cache_smoke::{Backend, CacheClient, RedisCache};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let client = redis::Client::open("redis://127.0.0.1/")?;
/// let mut cache = RedisCache::new(client.get_connection()?, Backend::Redis);
/// cache.set("foo", "bar")?;
/// assert_eq!(cache.get("foo")?.as_deref(), Some("bar"));
/// # Ok(()) }
/// ```
pub struct RedisCache<C> {
    con: C,
    backend: Backend,
}

impl<C: ConnectionLike> RedisCache<C> {
    pub fn new(con: C, backend: Backend) -> Self {
        RedisCache { con, backend }
    }

    /// Gives back the wrapped connection.
    pub fn into_inner(self) -> C {
        self.con
    }
}

impl<C: ConnectionLike> CacheClient for RedisCache<C> {
    fn backend(&self) -> Backend {
        self.backend
    }

    fn set(&mut self, key: &str, value: &str) -> SmokeResult<()> {
        debug!("{}: SET {key:?} {value:?}", self.backend);
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query::<()>(&mut self.con)
            .map_err(|err| SmokeError::backend(self.backend, err))
    }

    fn get(&mut self, key: &str) -> SmokeResult<Option<String>> {
        debug!("{}: GET {key:?}", self.backend);
        redis::cmd("GET")
            .arg(key)
            .query::<Option<String>>(&mut self.con)
            .map_err(|err| SmokeError::backend(self.backend, err))
    }
}
