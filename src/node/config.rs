// src/node/config.rs
// =============================================================================
// Node settings: the command line plus the peer config file.
//
// Config file format, one peer per line:
//   host:port,rootURL
//
// Example:
//   # the mesh
//   127.0.0.1:7001,http://www.a.org/
//   127.0.0.1:7002,http://www.b.org/
//
// Blank lines and lines starting with '#' are ignored. Every node can read the
// same file: the record for the node's own domain is skipped.
// =============================================================================

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use log::{debug, warn};

use crate::cli::Cli;
use crate::crawl::url::domain_key;

/// One other node of the mesh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerConfig {
    /// Domain key of the peer's root URL.
    pub domain: String,
    pub host: String,
    pub port: u16,
    pub root_url: String,
}

impl PeerConfig {
    /// The `host:port` the peer listens on.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Everything a node needs to run.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub port: u16,
    pub pool_size: usize,
    pub root_url: String,
    /// Domain key of `root_url`.
    pub home: String,
    pub max_depth: u32,
    pub delay: Duration,
    pub report_dir: PathBuf,
    pub poll_interval: Duration,
    pub connect_attempts: u32,
    pub fetch_timeout: Duration,
    pub peers: Vec<PeerConfig>,
}

impl NodeSettings {
    /// Builds the settings from parsed arguments, reading the config file.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let home = domain_key(&cli.root_url)
            .ok_or_else(|| anyhow!("root URL {} has no host", cli.root_url))?;

        let peers = load_peers(&cli.config_path, &home)?;

        Ok(NodeSettings {
            port: cli.port,
            pool_size: cli.pool_size,
            root_url: cli.root_url.clone(),
            home,
            max_depth: cli.max_depth,
            delay: Duration::from_millis(cli.delay_ms),
            report_dir: cli
                .report_dir
                .clone()
                .unwrap_or_else(|| std::env::temp_dir().join("link-harvester")),
            poll_interval: Duration::from_millis(cli.poll_ms.max(1)),
            connect_attempts: cli.connect_attempts,
            fetch_timeout: Duration::from_secs(cli.fetch_timeout_secs),
            peers,
        })
    }
}

/// Reads the peer list from `path`, skipping the record for `home`.
pub fn load_peers(path: &Path, home: &str) -> Result<Vec<PeerConfig>> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;

    parse_peers(&contents, home).with_context(|| format!("invalid config file {}", path.display()))
}

/// Parses config file contents. See the module docs for the format.
pub fn parse_peers(contents: &str, home: &str) -> Result<Vec<PeerConfig>> {
    let mut peers: Vec<PeerConfig> = Vec::new();

    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let peer = parse_record(line).with_context(|| format!("line {}: {:?}", index + 1, line))?;

        if peer.domain == home {
            debug!("Skipping own record {}", line);
            continue;
        }

        if peers.iter().any(|existing| existing.domain == peer.domain) {
            warn!("Duplicate peer {} on line {}, keeping the first", peer.domain, index + 1);
            continue;
        }

        peers.push(peer);
    }

    Ok(peers)
}

// Parses "host:port,rootURL"
fn parse_record(line: &str) -> Result<PeerConfig> {
    let (address, root_url) = line
        .split_once(',')
        .ok_or_else(|| anyhow!("expected host:port,rootURL"))?;

    let (host, port) = address
        .trim()
        .rsplit_once(':')
        .ok_or_else(|| anyhow!("address {:?} has no port", address))?;
    if host.is_empty() {
        bail!("address {:?} has no host", address);
    }
    let port = port
        .parse::<u16>()
        .with_context(|| format!("invalid port {:?}", port))?;

    let root_url = root_url.trim();
    let domain = domain_key(root_url).ok_or_else(|| anyhow!("invalid root URL {:?}", root_url))?;

    Ok(PeerConfig {
        domain,
        host: host.to_string(),
        port,
        root_url: root_url.to_string(),
    })
}
