//! cache-smoke checks that a cache deployment answers `SET` and `GET` the way
//! a client expects. It speaks to a single Redis node, a Redis Cluster, or a
//! set of Memcached servers, always through the regular client libraries
//! (`redis` and `memcache`), and reports each check as passed, failed or
//! skipped.
//!
//! # Basic Operation
//!
//! Open a client from one of the configs, pick a suite and hand both to a
//! [`Runner`]:
//!
//! ```rust,no_run
//! use cache_smoke::{Backend, RedisConfig, Runner, Suite, SuiteOptions};
//!
//! # fn main() -> cache_smoke::SmokeResult<()> {
//! let config = RedisConfig::default();
//! let mut runner = Runner::new(config.open()?, config.target());
//! let report = runner.run(&Suite::for_backend(Backend::Redis, &SuiteOptions::default()));
//! assert!(report.is_success());
//! # Ok(()) }
//! ```
//!
//! # Checks
//!
//! Every [`Check`] is a short sequence of `set`/`get` calls followed by a
//! literal comparison:
//!
//! * a round trip (`SET foo bar`, then `GET foo` must be `bar`),
//! * a missing-key read (`GET bob` must be nil),
//! * a bulk write of `test0..test999`, each read back afterwards,
//! * a delayed round trip, and unchecked probe reads.
//!
//! Custom suites are assembled with [`Suite::new`] and [`Suite::check`].
//!
//! # Connection Parameters
//!
//! Redis targets accept the usual `redis://[<username>][:<password>@]<hostname>[:port][/<db>]`
//! URLs, or a bare `host:port`. The RESP version defaults to RESP3.
//! Memcached targets are `host:port` pairs or `memcache://` URLs; the binary
//! protocol is used unless ASCII is requested.

#![deny(non_camel_case_types)]

mod client;
mod config;
mod errors;
mod memcached;
mod redis_cache;
mod report;
mod runner;
mod scenario;

pub use crate::client::{Backend, CacheClient};
pub use crate::config::{
    ClusterConfig, MemcachedConfig, MemcachedProtocol, Protocol, RedisConfig, Target,
    DEFAULT_CLUSTER_NODE, DEFAULT_MEMCACHED_SERVER, DEFAULT_MEMCACHED_TIMEOUT, DEFAULT_REDIS_URL,
};
pub use crate::errors::{BackendError, ErrorKind, SmokeError, SmokeResult};
pub use crate::memcached::MemcachedCache;
pub use crate::redis_cache::RedisCache;
pub use crate::report::{render, render_json, render_text, CheckReport, Format, Status, SuiteReport};
pub use crate::runner::Runner;
pub use crate::scenario::{Check, CheckOutcome, Suite, SuiteOptions};
