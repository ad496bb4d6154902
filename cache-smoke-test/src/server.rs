use std::path::PathBuf;
use std::process;
use std::time::Duration;

use tempfile::TempDir;

use crate::utils::{get_random_available_port, wait_for_port};

const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

/// A `redis-server` process listening on a random loopback port. The process
/// is killed when this value is dropped.
pub struct RedisServer {
    pub process: process::Child,
    pub tempdir: TempDir,
    pub log_file: PathBuf,
    pub port: u16,
}

impl RedisServer {
    pub fn new() -> RedisServer {
        RedisServer::with_spawner(get_random_available_port(), |cmd| {
            cmd.spawn()
                .unwrap_or_else(|err| panic!("Failed to run {cmd:?}: {err}"))
        })
    }

    /// Starts `redis-server` on `port`, letting `spawner` add arguments and
    /// launch the process.
    pub fn with_spawner<F>(port: u16, spawner: F) -> RedisServer
    where
        F: FnOnce(&mut process::Command) -> process::Child,
    {
        let tempdir = tempfile::Builder::new()
            .prefix("redis")
            .tempdir()
            .expect("failed to create tempdir");
        let log_file = Self::log_file(&tempdir);

        let mut redis_cmd = process::Command::new("redis-server");
        redis_cmd
            .stdout(process::Stdio::piped())
            .stderr(process::Stdio::piped())
            .arg("--logfile")
            .arg(&log_file)
            .arg("--port")
            .arg(port.to_string())
            .arg("--bind")
            .arg("127.0.0.1")
            .arg("--save")
            .arg("");

        let mut server = RedisServer {
            process: spawner(&mut redis_cmd),
            tempdir,
            log_file,
            port,
        };
        if !wait_for_port(port, STARTUP_TIMEOUT) {
            let log = server.log_file_contents();
            server.stop();
            panic!("redis-server did not start on port {port}, log: {log:?}");
        }
        server
    }

    pub fn url(&self) -> String {
        format!("redis://127.0.0.1:{}", self.port)
    }

    pub fn log_file_contents(&self) -> Option<String> {
        std::fs::read_to_string(&self.log_file).ok()
    }

    pub fn log_file(tempdir: &TempDir) -> PathBuf {
        tempdir.path().join("redis.log")
    }

    pub fn stop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

impl Default for RedisServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RedisServer {
    fn drop(&mut self) {
        self.stop()
    }
}

/// A `memcached` process listening on a random loopback port.
pub struct MemcachedServer {
    pub process: process::Child,
    pub port: u16,
}

impl MemcachedServer {
    pub fn new() -> MemcachedServer {
        let port = get_random_available_port();
        let process = process::Command::new("memcached")
            .arg("--listen=127.0.0.1")
            .arg(format!("--port={port}"))
            .arg("--udp-port=0")
            .stdout(process::Stdio::null())
            .stderr(process::Stdio::piped())
            .spawn()
            .unwrap_or_else(|err| panic!("Failed to run memcached: {err}"));

        let mut server = MemcachedServer { process, port };
        if !wait_for_port(port, STARTUP_TIMEOUT) {
            server.stop();
            panic!("memcached did not start on port {port}");
        }
        server
    }

    pub fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    pub fn stop(&mut self) {
        let _ = self.process.kill();
        let _ = self.process.wait();
    }
}

impl Default for MemcachedServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for MemcachedServer {
    fn drop(&mut self) {
        self.stop()
    }
}
