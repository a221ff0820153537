// src/node/console.rs
// =============================================================================
// The operator console: a line-based command reader on stdin.
//
// Commands:
//   status        counters and peer flags as a table
//   status json   the same as JSON
//   evict <peer>  stop waiting for a peer that will never answer
//   help          this list
//
// Anything else prints "Command not recognized". Closing stdin ends the
// console but not the node.
// =============================================================================

use std::fmt::Write as _;
use std::sync::Arc;

use anyhow::Result;
use log::{debug, warn};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};

use super::mesh::{Mesh, MeshSnapshot};
use crate::crawl::{Scheduler, SchedulerStats};

const HELP: &str = "\
Commands:
  status        show the crawl pool and the peer counters
  status json   the same, as JSON
  evict <peer>  leave a peer out of the completion check
  help          show this list";

/// Everything `status` reports.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub pool: SchedulerStats,
    pub pool_complete: bool,
    pub pages: usize,
    pub broken_links: usize,
    #[serde(flatten)]
    pub mesh: MeshSnapshot,
}

impl StatusSnapshot {
    pub fn capture(mesh: &Mesh, scheduler: &Scheduler) -> Self {
        let graph = &scheduler.context().graph;
        StatusSnapshot {
            pool: scheduler.stats(),
            pool_complete: scheduler.pool_complete(),
            pages: graph.vertex_count(),
            broken_links: graph.broken_links().len(),
            mesh: mesh.snapshot(),
        }
    }
}

/// Reads commands from stdin until EOF.
pub async fn run(mesh: Arc<Mesh>, scheduler: Arc<Scheduler>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(output) = handle_line(&line, &mesh, &scheduler) {
                    println!("{}", output);
                }
            }
            Ok(None) => {
                debug!("Console input closed");
                return;
            }
            Err(e) => {
                warn!("Console read failed: {}", e);
                return;
            }
        }
    }
}

/// Runs one console command and returns what to print, if anything.
pub fn handle_line(line: &str, mesh: &Mesh, scheduler: &Scheduler) -> Option<String> {
    let words: Vec<&str> = line.split_whitespace().collect();

    let output = match words.as_slice() {
        [] => return None,
        ["status"] => render_table(&StatusSnapshot::capture(mesh, scheduler)),
        ["status", "json"] => match render_json(&StatusSnapshot::capture(mesh, scheduler)) {
            Ok(json) => json,
            Err(e) => format!("Could not render status: {}", e),
        },
        ["evict", peer] => {
            if mesh.evict(peer) {
                format!("Evicted {}", peer)
            } else {
                format!("Unknown peer {}", peer)
            }
        }
        ["help"] => HELP.to_string(),
        _ => "Command not recognized".to_string(),
    };

    Some(output)
}

fn render_json(status: &StatusSnapshot) -> Result<String> {
    Ok(serde_json::to_string_pretty(status)?)
}

// Prints the status as a human-readable table
fn render_table(status: &StatusSnapshot) -> String {
    let mut out = String::new();
    let pool = &status.pool;

    let _ = writeln!(out, "Node {}", status.mesh.home);
    let _ = writeln!(
        out,
        "   Pool: {} queued, {} in flight, {} workers ({})",
        pool.queued,
        pool.in_flight,
        pool.workers,
        if status.pool_complete { "idle" } else { "busy" }
    );
    let _ = writeln!(
        out,
        "   Crawled: {} executed, {} visited, {} pages, {} broken links",
        pool.executed, pool.visited, status.pages, status.broken_links
    );
    let _ = writeln!(out, "   Announced finished: {}", status.mesh.announced);
    let _ = writeln!(out);

    let _ = writeln!(
        out,
        "{:<30} {:<22} {:>10} {:>10} {:<9}",
        "PEER", "ADDRESS", "FORWARDED", "ACKED", "STATE"
    );
    let _ = writeln!(out, "{}", "=".repeat(85));

    for peer in &status.mesh.peers {
        let state = if peer.evicted {
            "evicted"
        } else if peer.finished {
            "finished"
        } else {
            "working"
        };
        let _ = writeln!(
            out,
            "{:<30} {:<22} {:>10} {:>10} {:<9}",
            peer.domain, peer.addr, peer.forwarded, peer.acknowledged, state
        );
    }

    out.trim_end().to_string()
}
