// src/cli.rs
// =============================================================================
// This file defines the command-line interface of a crawler node using the
// `clap` crate.
//
// Usage:
//   crawler <port> <pool-size> <root-url> <config-path> [options]
//
// The four positional arguments are required. Everything else has a default.
// =============================================================================

use std::path::PathBuf;

use clap::Parser;

use crate::crawl::url::{domain_key, resolve};

// #[derive(Parser)] tells clap to generate the parsing code.
// The doc comments on the fields become the help text.
#[derive(Parser, Debug)]
#[command(
    name = "crawler",
    version,
    about = "A peer-to-peer web crawler node",
    long_about = "Crawls one web domain to a bounded depth and hands links into other \
                  configured domains to the peer nodes that own them. When every node \
                  of the mesh is finished, each one writes a link-graph report."
)]
pub struct Cli {
    /// Port this node listens on for its peers
    pub port: u16,

    /// Number of crawl workers
    #[arg(value_parser = parse_pool_size)]
    pub pool_size: usize,

    /// Root URL of the domain this node crawls (e.g., http://www.a.org/)
    #[arg(value_parser = parse_root_url)]
    pub root_url: String,

    /// Config file listing the nodes of the mesh, one "host:port,rootURL" per line
    pub config_path: PathBuf,

    /// How many links deep to crawl from the root page
    #[arg(long, default_value_t = 5)]
    pub max_depth: u32,

    /// Pause of each worker after a crawled page, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub delay_ms: u64,

    /// Where reports are written (default: <temp dir>/link-harvester)
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// How often the completion monitor runs, in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub poll_ms: u64,

    /// Connection attempts per peer at startup, 500 ms apart
    #[arg(long, default_value_t = 30)]
    pub connect_attempts: u32,

    /// Timeout of every HTTP request, in seconds
    #[arg(long, default_value_t = 10)]
    pub fetch_timeout_secs: u64,
}

fn parse_pool_size(value: &str) -> Result<usize, String> {
    match value.parse::<usize>() {
        Ok(0) => Err("pool size must be at least 1".to_string()),
        Ok(size) => Ok(size),
        Err(e) => Err(e.to_string()),
    }
}

// Accepts absolute http(s) URLs with a host and returns them normalized
fn parse_root_url(value: &str) -> Result<String, String> {
    let url = resolve(value, value).ok_or_else(|| format!("{:?} is not an http(s) URL", value))?;
    if domain_key(&url).is_none() {
        return Err(format!("{:?} has no host", value));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_positional_arguments_and_defaults() {
        let cli = Cli::try_parse_from(["crawler", "7001", "4", "http://www.a.org", "nodes.cfg"]).unwrap();

        assert_eq!(cli.port, 7001);
        assert_eq!(cli.pool_size, 4);
        assert_eq!(cli.root_url, "http://www.a.org/");
        assert_eq!(cli.config_path, PathBuf::from("nodes.cfg"));
        assert_eq!(cli.max_depth, 5);
        assert_eq!(cli.delay_ms, 1000);
        assert_eq!(cli.report_dir, None);
        assert_eq!(cli.connect_attempts, 30);
    }

    #[test]
    fn test_flags() {
        let cli = Cli::try_parse_from([
            "crawler",
            "7001",
            "4",
            "http://www.a.org/",
            "nodes.cfg",
            "--max-depth",
            "2",
            "--delay-ms",
            "0",
            "--report-dir",
            "/tmp/out",
        ])
        .unwrap();

        assert_eq!(cli.max_depth, 2);
        assert_eq!(cli.delay_ms, 0);
        assert_eq!(cli.report_dir, Some(PathBuf::from("/tmp/out")));
    }

    #[test]
    fn test_missing_arguments() {
        assert!(Cli::try_parse_from(["crawler", "7001", "4"]).is_err());
    }

    #[test]
    fn test_invalid_arguments() {
        assert!(Cli::try_parse_from(["crawler", "port", "4", "http://a.org/", "c"]).is_err());
        assert!(Cli::try_parse_from(["crawler", "7001", "0", "http://a.org/", "c"]).is_err());
        assert!(Cli::try_parse_from(["crawler", "7001", "4", "a.org", "c"]).is_err());
        assert!(Cli::try_parse_from(["crawler", "7001", "4", "ftp://a.org/", "c"]).is_err());
    }
}
