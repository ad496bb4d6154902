use log::debug;

use crate::client::{Backend, CacheClient};
use crate::errors::{SmokeError, SmokeResult};

/// A [`CacheClient`] backed by the `memcache` crate.
///
/// Values are written with an expiration of zero, which memcached treats as
/// "never expire".
pub struct MemcachedCache {
    client: memcache::Client,
}

impl MemcachedCache {
    pub fn new(client: memcache::Client) -> Self {
        MemcachedCache { client }
    }

    pub fn client(&self) -> &memcache::Client {
        &self.client
    }
}

impl CacheClient for MemcachedCache {
    fn backend(&self) -> Backend {
        Backend::Memcached
    }

    fn set(&mut self, key: &str, value: &str) -> SmokeResult<()> {
        debug!("memcached: set {key:?} {value:?}");
        self.client
            .set(key, value, 0)
            .map_err(|err| SmokeError::backend(Backend::Memcached, err))
    }

    fn get(&mut self, key: &str) -> SmokeResult<Option<String>> {
        debug!("memcached: get {key:?}");
        self.client
            .get::<String>(key)
            .map_err(|err| SmokeError::backend(Backend::Memcached, err))
    }
}
