//! Connection targets for the three supported backends.
//!
//! Each config knows how to describe its target for reports and how to open
//! a boxed [`CacheClient`] against it. Addresses may be given either as full
//! URLs (`redis://host:port`, `memcache://host:port`) or as bare `host:port`
//! pairs, in which case the scheme is filled in.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use log::info;
use redis::{ConnectionInfo, IntoConnectionInfo, ProtocolVersion};

use crate::client::{Backend, CacheClient};
use crate::errors::{SmokeError, SmokeResult};
use crate::memcached::MemcachedCache;
use crate::redis_cache::RedisCache;

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_CLUSTER_NODE: &str = "redis://127.0.0.1:7000";
pub const DEFAULT_MEMCACHED_SERVER: &str = "127.0.0.1:11211";
pub const DEFAULT_MEMCACHED_TIMEOUT: Duration = Duration::from_secs(60);

/// Which RESP version to negotiate with Redis.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub enum Protocol {
    Resp2,
    #[default]
    Resp3,
}

impl From<Protocol> for ProtocolVersion {
    fn from(protocol: Protocol) -> Self {
        match protocol {
            Protocol::Resp2 => ProtocolVersion::RESP2,
            Protocol::Resp3 => ProtocolVersion::RESP3,
        }
    }
}

impl FromStr for Protocol {
    type Err = SmokeError;

    fn from_str(s: &str) -> SmokeResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "resp2" | "2" => Ok(Protocol::Resp2),
            "resp3" | "3" => Ok(Protocol::Resp3),
            _ => Err(SmokeError::config(format!("unknown protocol {s:?}"))),
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Resp2 => f.write_str("resp2"),
            Protocol::Resp3 => f.write_str("resp3"),
        }
    }
}

/// Wire protocol spoken to memcached. The binary protocol is the default.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Default)]
pub enum MemcachedProtocol {
    #[default]
    Binary,
    Ascii,
}

impl FromStr for MemcachedProtocol {
    type Err = SmokeError;

    fn from_str(s: &str) -> SmokeResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(MemcachedProtocol::Binary),
            "ascii" | "text" => Ok(MemcachedProtocol::Ascii),
            _ => Err(SmokeError::config(format!(
                "unknown memcached protocol {s:?}"
            ))),
        }
    }
}

fn with_scheme(addr: &str, scheme: &str) -> String {
    if addr.contains("://") || addr.starts_with("unix:") {
        addr.to_owned()
    } else {
        format!("{scheme}://{addr}")
    }
}

fn connection_info(url: &str, protocol: Protocol) -> SmokeResult<ConnectionInfo> {
    let mut info = with_scheme(url, "redis")
        .into_connection_info()
        .map_err(|err| SmokeError::config(format!("bad redis url {url:?}: {err}")))?;
    info.redis.protocol = protocol.into();
    Ok(info)
}

/// A single Redis node.
#[derive(Clone, Debug, PartialEq)]
pub struct RedisConfig {
    pub url: String,
    pub protocol: Protocol,
    pub timeout: Option<Duration>,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: DEFAULT_REDIS_URL.to_owned(),
            protocol: Protocol::default(),
            timeout: None,
        }
    }
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        RedisConfig {
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn connection_info(&self) -> SmokeResult<ConnectionInfo> {
        connection_info(&self.url, self.protocol)
    }

    pub fn target(&self) -> String {
        with_scheme(&self.url, "redis")
    }

    /// Opens a connection and wraps it in a [`RedisCache`].
    pub fn connect(&self) -> SmokeResult<RedisCache<redis::Connection>> {
        let info = self.connection_info()?;
        let connect_err =
            |err: redis::RedisError| SmokeError::connect(Backend::Redis, self.target(), err);

        let client = redis::Client::open(info).map_err(connect_err)?;
        let con = match self.timeout {
            Some(timeout) => client.get_connection_with_timeout(timeout),
            None => client.get_connection(),
        }
        .map_err(connect_err)?;
        con.set_read_timeout(self.timeout).map_err(connect_err)?;
        con.set_write_timeout(self.timeout).map_err(connect_err)?;

        info!("connected to redis at {} ({})", self.target(), self.protocol);
        Ok(RedisCache::new(con, Backend::Redis))
    }

    pub fn open(&self) -> SmokeResult<Box<dyn CacheClient>> {
        Ok(Box::new(self.connect()?))
    }
}

/// A Redis Cluster, reached through its seed nodes.
#[derive(Clone, Debug, PartialEq)]
pub struct ClusterConfig {
    pub nodes: Vec<String>,
    pub protocol: Protocol,
    pub timeout: Option<Duration>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        ClusterConfig {
            nodes: vec![DEFAULT_CLUSTER_NODE.to_owned()],
            protocol: Protocol::default(),
            timeout: None,
        }
    }
}

impl ClusterConfig {
    pub fn new<I, S>(nodes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ClusterConfig {
            nodes: nodes.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn connection_infos(&self) -> SmokeResult<Vec<ConnectionInfo>> {
        if self.nodes.is_empty() {
            return Err(SmokeError::config("at least one cluster node is required"));
        }
        self.nodes
            .iter()
            .map(|node| connection_info(node, self.protocol))
            .collect()
    }

    pub fn target(&self) -> String {
        self.nodes
            .iter()
            .map(|node| with_scheme(node, "redis"))
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Builds the cluster client without contacting any node. The timeout
    /// bounds both connecting to a node and waiting for its reply.
    pub fn client(&self) -> SmokeResult<redis::cluster::ClusterClient> {
        let infos = self.connection_infos()?;
        let mut builder =
            redis::cluster::ClusterClientBuilder::new(infos).use_protocol(self.protocol.into());
        if let Some(timeout) = self.timeout {
            builder = builder
                .connection_timeout(timeout)
                .response_timeout(timeout);
        }
        builder
            .build()
            .map_err(|err| SmokeError::config(format!("bad cluster nodes {}: {err}", self.target())))
    }

    pub fn connect(&self) -> SmokeResult<RedisCache<redis::cluster::ClusterConnection>> {
        let con = self.client()?.get_connection().map_err(|err| {
            SmokeError::connect(Backend::RedisCluster, self.target(), err)
        })?;

        info!(
            "connected to redis cluster via {} ({})",
            self.target(),
            self.protocol
        );
        Ok(RedisCache::new(con, Backend::RedisCluster))
    }

    pub fn open(&self) -> SmokeResult<Box<dyn CacheClient>> {
        Ok(Box::new(self.connect()?))
    }
}

/// One or more memcached servers.
#[derive(Clone, Debug, PartialEq)]
pub struct MemcachedConfig {
    pub servers: Vec<String>,
    pub protocol: MemcachedProtocol,
    pub timeout: Option<Duration>,
}

impl Default for MemcachedConfig {
    fn default() -> Self {
        MemcachedConfig {
            servers: vec![DEFAULT_MEMCACHED_SERVER.to_owned()],
            protocol: MemcachedProtocol::default(),
            timeout: Some(DEFAULT_MEMCACHED_TIMEOUT),
        }
    }
}

impl MemcachedConfig {
    pub fn new<I, S>(servers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MemcachedConfig {
            servers: servers.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    /// The `memcache://` URLs handed to the client, one per server.
    pub fn urls(&self) -> SmokeResult<Vec<String>> {
        if self.servers.is_empty() {
            return Err(SmokeError::config(
                "at least one memcached server is required",
            ));
        }

        Ok(self
            .servers
            .iter()
            .map(|server| {
                let mut url = with_scheme(server, "memcache");
                if self.protocol == MemcachedProtocol::Ascii {
                    url.push(if url.contains('?') { '&' } else { '?' });
                    url.push_str("protocol=ascii");
                }
                url
            })
            .collect())
    }

    /// A client builder for every server. The timeout applies to the pool's
    /// connection attempts and to each socket read and write; the builder
    /// overwrites any `timeout=` given in a URL.
    pub fn builder(&self) -> SmokeResult<memcache::ClientBuilder> {
        let builder = memcache::Client::builder()
            .add_server(self.urls()?)
            .map_err(|err| SmokeError::config(format!("bad memcached servers: {err}")))?;
        Ok(match self.timeout {
            Some(timeout) => builder
                .with_connection_timeout(timeout)
                .with_read_timeout(timeout)
                .with_write_timeout(timeout),
            None => builder,
        })
    }

    pub fn target(&self) -> String {
        self.servers.join(",")
    }

    pub fn connect(&self) -> SmokeResult<MemcachedCache> {
        let client = self
            .builder()?
            .build()
            .map_err(|err| SmokeError::connect(Backend::Memcached, self.target(), err))?;

        info!("connected to memcached at {}", self.target());
        Ok(MemcachedCache::new(client))
    }

    pub fn open(&self) -> SmokeResult<Box<dyn CacheClient>> {
        Ok(Box::new(self.connect()?))
    }
}

/// Any one of the supported targets.
#[derive(Clone, Debug, PartialEq)]
pub enum Target {
    Redis(RedisConfig),
    Cluster(ClusterConfig),
    Memcached(MemcachedConfig),
}

impl Target {
    pub fn backend(&self) -> Backend {
        match self {
            Target::Redis(_) => Backend::Redis,
            Target::Cluster(_) => Backend::RedisCluster,
            Target::Memcached(_) => Backend::Memcached,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Target::Redis(config) => config.target(),
            Target::Cluster(config) => config.target(),
            Target::Memcached(config) => config.target(),
        }
    }

    pub fn open(&self) -> SmokeResult<Box<dyn CacheClient>> {
        match self {
            Target::Redis(config) => config.open(),
            Target::Cluster(config) => config.open(),
            Target::Memcached(config) => config.open(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("resp2", Protocol::Resp2)]
    #[case("RESP3", Protocol::Resp3)]
    #[case("2", Protocol::Resp2)]
    #[case("3", Protocol::Resp3)]
    fn parses_protocol_names(#[case] input: &str, #[case] expected: Protocol) {
        assert_eq!(input.parse::<Protocol>().unwrap(), expected);
    }

    #[test]
    fn rejects_unknown_protocols() {
        assert!(matches!(
            "resp4".parse::<Protocol>(),
            Err(SmokeError::Config(_))
        ));
        assert!(matches!(
            "udp".parse::<MemcachedProtocol>(),
            Err(SmokeError::Config(_))
        ));
    }

    #[test]
    fn redis_defaults_to_localhost_resp3() {
        let config = RedisConfig::default();
        let info = config.connection_info().unwrap();

        assert_eq!(
            info.addr,
            redis::ConnectionAddr::Tcp("127.0.0.1".to_owned(), 6379)
        );
        assert_eq!(info.redis.protocol, ProtocolVersion::RESP3);
    }

    #[test]
    fn bare_host_port_gets_a_redis_scheme() {
        let mut config = RedisConfig::new("localhost:6380");
        config.protocol = Protocol::Resp2;
        let info = config.connection_info().unwrap();

        assert_eq!(config.target(), "redis://localhost:6380");
        assert_eq!(
            info.addr,
            redis::ConnectionAddr::Tcp("localhost".to_owned(), 6380)
        );
        assert_eq!(info.redis.protocol, ProtocolVersion::RESP2);
    }

    #[test]
    fn malformed_redis_url_is_a_config_error() {
        let config = RedisConfig::new("http://localhost:6379");
        assert!(matches!(
            config.connection_info(),
            Err(SmokeError::Config(_))
        ));
    }

    #[test]
    fn cluster_requires_nodes() {
        let config = ClusterConfig::new(Vec::<String>::new());
        assert!(matches!(
            config.connection_infos(),
            Err(SmokeError::Config(_))
        ));
    }

    #[test]
    fn cluster_target_lists_every_seed() {
        let config = ClusterConfig::new(["127.0.0.1:7000", "redis://127.0.0.1:7001"]);

        assert_eq!(config.connection_infos().unwrap().len(), 2);
        assert_eq!(
            config.target(),
            "redis://127.0.0.1:7000,redis://127.0.0.1:7001"
        );
    }

    #[rstest]
    #[case(None)]
    #[case(Some(Duration::from_millis(250)))]
    fn cluster_client_builds_with_and_without_timeouts(#[case] timeout: Option<Duration>) {
        let config = ClusterConfig {
            nodes: vec!["127.0.0.1:7000".to_owned(), "127.0.0.1:7001".to_owned()],
            protocol: Protocol::Resp2,
            timeout,
        };

        assert!(config.client().is_ok());
    }

    #[rstest]
    #[case(MemcachedProtocol::Binary, None, "memcache://127.0.0.1:11211")]
    #[case(
        MemcachedProtocol::Ascii,
        None,
        "memcache://127.0.0.1:11211?protocol=ascii"
    )]
    #[case(
        MemcachedProtocol::Binary,
        Some(Duration::from_secs(60)),
        "memcache://127.0.0.1:11211"
    )]
    #[case(
        MemcachedProtocol::Ascii,
        Some(Duration::from_millis(1500)),
        "memcache://127.0.0.1:11211?protocol=ascii"
    )]
    fn memcached_urls(
        #[case] protocol: MemcachedProtocol,
        #[case] timeout: Option<Duration>,
        #[case] expected: &str,
    ) {
        let config = MemcachedConfig {
            servers: vec!["127.0.0.1:11211".to_owned()],
            protocol,
            timeout,
        };
        assert_eq!(config.urls().unwrap(), vec![expected.to_owned()]);
    }

    #[test]
    fn memcached_url_keeps_existing_query() {
        let config = MemcachedConfig {
            servers: vec!["memcache://cache:11211?tcp_nodelay=true".to_owned()],
            protocol: MemcachedProtocol::Ascii,
            timeout: None,
        };
        assert_eq!(
            config.urls().unwrap(),
            vec!["memcache://cache:11211?tcp_nodelay=true&protocol=ascii".to_owned()]
        );
    }

    #[test]
    fn memcached_defaults_match_the_usual_deployment() {
        let config = MemcachedConfig::default();
        assert_eq!(config.target(), "127.0.0.1:11211");
        assert_eq!(config.timeout, Some(Duration::from_secs(60)));
        assert_eq!(config.protocol, MemcachedProtocol::Binary);
    }

    #[test]
    fn target_reports_backend_and_address() {
        let target = Target::Cluster(ClusterConfig::default());
        assert_eq!(target.backend(), Backend::RedisCluster);
        assert_eq!(target.describe(), "redis://127.0.0.1:7000");

        let target = Target::Memcached(MemcachedConfig::default());
        assert_eq!(target.backend(), Backend::Memcached);
        assert_eq!(target.describe(), "127.0.0.1:11211");
    }

    #[test]
    fn opening_a_target_with_no_servers_fails_before_connecting() {
        let target = Target::Memcached(MemcachedConfig::new(Vec::<String>::new()));
        assert!(matches!(target.open(), Err(SmokeError::Config(_))));
    }

    #[test]
    fn memcached_requires_servers() {
        let config = MemcachedConfig::new(Vec::<String>::new());
        assert!(matches!(config.urls(), Err(SmokeError::Config(_))));
        assert!(matches!(config.builder(), Err(SmokeError::Config(_))));
    }
}
