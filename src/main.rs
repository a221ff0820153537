// src/main.rs
// =============================================================================
// This is the entry point of a crawler node.
//
// What happens here:
// 1. Parse command-line arguments using clap
// 2. Read the peer config file
// 3. Bind the listening port and start the node (and its console)
// 4. Print a summary once the whole mesh has finished
//
// Exit codes: 0 on success and on bad arguments (usage is printed),
// 1 when the node cannot start or fails.
// =============================================================================

// Module declarations
mod checker; // src/checker/ - HTTP fetching and anchor extraction
mod cli; // src/cli.rs - command-line parsing
mod crawl; // src/crawl/ - crawl tasks and the worker pool
mod graph; // src/graph/ - link graph and report
mod node; // src/node/ - peers, termination detection, console
mod wire; // src/wire/ - node-to-node messages over TCP

use anyhow::{Context, Result};
use clap::Parser;
use flexi_logger::{Logger, LoggerHandle};
use log::error;
use tokio::net::TcpListener;

use cli::Cli;
use node::{Node, NodeSettings};

#[tokio::main]
async fn main() {
    // Bad or missing arguments print usage and do nothing else
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return;
        }
    };

    // Keep the handle alive so log output is not cut short
    let _logger = match set_up_logging() {
        Ok(handle) => handle,
        Err(e) => {
            eprintln!("Error: could not set up logging: {}", e);
            std::process::exit(1);
        }
    };

    // Exit explicitly: the console may still be blocked reading stdin
    let exit_code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            1
        }
    };

    std::process::exit(exit_code);
}

// Level comes from RUST_LOG, "info" when unset. Output goes to stderr.
fn set_up_logging() -> Result<LoggerHandle> {
    let handle = Logger::try_with_env_or_str("info")?.log_to_stderr().start()?;
    Ok(handle)
}

async fn run(cli: Cli) -> Result<()> {
    let settings = NodeSettings::from_cli(&cli)?;

    let listener = TcpListener::bind(("0.0.0.0", settings.port))
        .await
        .with_context(|| format!("failed to bind port {}", settings.port))?;

    println!("🔍 Node {} listening on port {}", settings.home, settings.port);
    println!("📊 Max crawl depth: {}, {} workers", settings.max_depth, settings.pool_size);
    println!("🌐 {} peer(s) configured", settings.peers.len());

    let node = Node::new(settings)?;
    tokio::spawn(node::console::run(node.mesh(), node.scheduler()));

    let summary = node.run(listener).await?;

    println!();
    println!("{}", summary);
    Ok(())
}
