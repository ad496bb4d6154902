use std::collections::HashSet;
use std::process;
use std::thread::sleep;
use std::time::Duration;

use tempfile::TempDir;

use crate::server::RedisServer;
use crate::utils::get_random_available_port;

/// A throwaway Redis Cluster of `num_nodes` masters, built with
/// `redis-cli --cluster create`.
pub struct RedisCluster {
    pub servers: Vec<RedisServer>,
    pub folders: Vec<TempDir>,
}

impl RedisCluster {
    pub fn new(num_nodes: u16) -> RedisCluster {
        let mut folders = vec![];
        let mut chosen_ports = HashSet::new();

        let servers: Vec<RedisServer> = (0..num_nodes)
            .map(|_| {
                let port = loop {
                    let port = get_random_available_port();
                    if chosen_ports.insert(port) {
                        break port;
                    }
                };
                RedisServer::with_spawner(port, |cmd| {
                    let tempdir = tempfile::Builder::new()
                        .prefix("redis-cluster")
                        .tempdir()
                        .expect("failed to create tempdir");
                    cmd.arg("--cluster-enabled")
                        .arg("yes")
                        .arg("--cluster-config-file")
                        .arg(tempdir.path().join("nodes.conf"))
                        .arg("--cluster-node-timeout")
                        .arg("5000")
                        .current_dir(tempdir.path());
                    folders.push(tempdir);
                    cmd.spawn().unwrap()
                })
            })
            .collect();

        let addrs: Vec<String> = servers
            .iter()
            .map(|server| format!("127.0.0.1:{}", server.port))
            .collect();

        let mut cmd = process::Command::new("redis-cli");
        cmd.stdout(process::Stdio::piped())
            .arg("--cluster")
            .arg("create")
            .args(&addrs)
            .arg("--cluster-yes");

        let max_attempts = 5;
        let mut cur_attempts = 0;
        loop {
            let output = cmd.output().unwrap();
            if output.status.success() {
                break;
            }
            let err = format!("Cluster creation failed: {output:?}");
            if cur_attempts == max_attempts {
                panic!("{err}");
            }
            eprintln!("Retrying: {err}");
            sleep(Duration::from_millis(50));
            cur_attempts += 1;
        }

        let cluster = RedisCluster { servers, folders };
        cluster.wait_for_status_ok();
        cluster
    }

    /// Seed node URLs, one per master.
    pub fn nodes(&self) -> Vec<String> {
        self.servers.iter().map(RedisServer::url).collect()
    }

    fn wait_for_status_ok(&self) {
        'server: for server in &self.servers {
            for _ in 1..500 {
                let contents = server.log_file_contents().unwrap_or_default();
                if contents.contains("Cluster state changed: ok") {
                    continue 'server;
                }
                sleep(Duration::from_millis(20));
            }
            panic!("failed to reach state change: OK");
        }
    }

    pub fn stop(&mut self) {
        for server in &mut self.servers {
            server.stop();
        }
    }
}

impl Drop for RedisCluster {
    fn drop(&mut self) {
        self.stop()
    }
}
