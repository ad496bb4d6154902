use std::io;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use cache_smoke::{
    render, ClusterConfig, Format, MemcachedConfig, MemcachedProtocol, Protocol, RedisConfig,
    Runner, Suite, SuiteOptions, Target, DEFAULT_CLUSTER_NODE, DEFAULT_MEMCACHED_SERVER,
    DEFAULT_REDIS_URL,
};
use clap::{Args, Parser, Subcommand};
use log::{error, info, LevelFilter};

#[derive(Parser)]
#[command(name = "cache-smoke")]
#[command(about = "Smoke checks for Redis, Redis Cluster and Memcached", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = Format::Text)]
    format: Format,

    /// Run every check even after one fails
    #[arg(long, global = true)]
    keep_going: bool,

    /// RESP version to negotiate with Redis (resp2 or resp3)
    #[arg(long, global = true, env = "CACHE_SMOKE_PROTOCOL", default_value = "resp3", value_parser = parse_protocol)]
    protocol: Protocol,

    /// Milliseconds to wait between write and read in delayed checks
    #[arg(long, global = true, default_value_t = 1000)]
    delay_ms: u64,

    /// Number of keys written by the bulk check
    #[arg(long, global = true, default_value_t = 1000)]
    bulk_count: usize,

    /// Enable verbose logging (-v for info, -vv for debug, -vvv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Command {
    /// Check a single Redis node
    Redis(RedisArgs),
    /// Check a Redis Cluster through its seed nodes
    Cluster(ClusterArgs),
    /// Check one or more memcached servers
    Memcached(MemcachedArgs),
    /// Check all three with default timeouts
    All(AllArgs),
}

#[derive(Args)]
struct RedisArgs {
    /// Redis URL or host:port
    #[arg(long, env = "CACHE_SMOKE_REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    url: String,

    /// Connect, read and write timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Args)]
struct ClusterArgs {
    /// Seed node, repeatable or comma separated
    #[arg(long = "node", env = "CACHE_SMOKE_CLUSTER_NODES", value_delimiter = ',', default_value = DEFAULT_CLUSTER_NODE)]
    nodes: Vec<String>,

    /// Read and write timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,
}

#[derive(Args)]
struct MemcachedArgs {
    /// Server address, repeatable or comma separated
    #[arg(long = "server", env = "CACHE_SMOKE_MEMCACHED_SERVERS", value_delimiter = ',', default_value = DEFAULT_MEMCACHED_SERVER)]
    servers: Vec<String>,

    /// Wire protocol (binary or ascii)
    #[arg(long = "wire", default_value = "binary", value_parser = parse_memcached_protocol)]
    wire: MemcachedProtocol,

    /// Socket timeout in milliseconds
    #[arg(long, default_value_t = 60_000)]
    timeout_ms: u64,
}

#[derive(Args)]
struct AllArgs {
    #[arg(long, env = "CACHE_SMOKE_REDIS_URL", default_value = DEFAULT_REDIS_URL)]
    redis_url: String,

    #[arg(long = "cluster-node", env = "CACHE_SMOKE_CLUSTER_NODES", value_delimiter = ',', default_value = DEFAULT_CLUSTER_NODE)]
    cluster_nodes: Vec<String>,

    #[arg(long = "memcached-server", env = "CACHE_SMOKE_MEMCACHED_SERVERS", value_delimiter = ',', default_value = DEFAULT_MEMCACHED_SERVER)]
    memcached_servers: Vec<String>,
}

fn parse_protocol(s: &str) -> Result<Protocol, String> {
    s.parse().map_err(|err: cache_smoke::SmokeError| err.to_string())
}

fn parse_memcached_protocol(s: &str) -> Result<MemcachedProtocol, String> {
    s.parse().map_err(|err: cache_smoke::SmokeError| err.to_string())
}

impl Command {
    fn targets(&self, protocol: Protocol) -> Vec<Target> {
        match self {
            Command::Redis(args) => vec![Target::Redis(RedisConfig {
                url: args.url.clone(),
                protocol,
                timeout: args.timeout_ms.map(Duration::from_millis),
            })],
            Command::Cluster(args) => vec![Target::Cluster(ClusterConfig {
                nodes: args.nodes.clone(),
                protocol,
                timeout: args.timeout_ms.map(Duration::from_millis),
            })],
            Command::Memcached(args) => vec![Target::Memcached(MemcachedConfig {
                servers: args.servers.clone(),
                protocol: args.wire,
                timeout: Some(Duration::from_millis(args.timeout_ms)),
            })],
            Command::All(args) => vec![
                Target::Redis(RedisConfig {
                    url: args.redis_url.clone(),
                    protocol,
                    ..Default::default()
                }),
                Target::Cluster(ClusterConfig {
                    nodes: args.cluster_nodes.clone(),
                    protocol,
                    ..Default::default()
                }),
                Target::Memcached(MemcachedConfig::new(args.memcached_servers.clone())),
            ],
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn run(cli: &Cli) -> Result<ExitCode> {
    let options = SuiteOptions {
        delay: Duration::from_millis(cli.delay_ms),
        bulk_count: cli.bulk_count,
        ..Default::default()
    };

    let mut reports = Vec::new();
    let mut unreachable = false;
    for target in cli.command.targets(cli.protocol) {
        let client = match target.open() {
            Ok(client) => client,
            Err(err) => {
                error!("{err}");
                unreachable = true;
                continue;
            }
        };
        let suite = Suite::for_backend(target.backend(), &options);
        let mut runner = Runner::new(client, target.describe()).fail_fast(!cli.keep_going);
        reports.push(runner.run(&suite));
    }

    render(cli.format, &reports, &mut io::stdout().lock()).context("failed to write report")?;

    if unreachable {
        return Ok(ExitCode::from(2));
    }
    if reports.iter().all(|report| report.is_success()) {
        info!("done");
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(&cli) {
        Ok(code) => code,
        Err(err) => {
            error!("{err:#}");
            ExitCode::from(2)
        }
    }
}
