// src/node/mod.rs
// =============================================================================
// A crawler node: one process, one home domain.
//
// What happens here:
// 1. connect a sender to every peer and start the crawl workers
// 2. accept inbound peer connections; every event they carry, and every
//    "pool drained" signal from the workers, lands in one inbox
// 3. the node loop handles inbox messages in order and re-checks local
//    completion after each one
// 4. a periodic monitor checks global completion; once the whole mesh is
//    done the workers are stopped and the report is written
//
// Submodules:
// - config: command line and peer config file
// - mesh: peers and the termination-detection counters
// - console: operator commands on stdin
// =============================================================================

pub mod config;
pub mod console;
mod mesh;

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use tokio::net::TcpListener;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;

use crate::checker::Fetcher;
use crate::crawl::{CrawlContext, CrawlTask, Origin, Scheduler, Submission};
use crate::graph::{write_report, LinkGraph};
use crate::wire::{receive_loop, Event, PeerLink};

pub use config::NodeSettings;
pub use mesh::Mesh;

const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// What the node loop consumes.
#[derive(Debug)]
pub enum NodeMessage {
    /// An event received from a peer.
    Wire(Event),
    /// The worker pool went idle.
    PoolDrained,
}

/// Printed when a node shuts down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub home: String,
    pub executed: usize,
    pub pages: usize,
    pub edges: usize,
    pub broken_links: usize,
    pub components: usize,
    pub report: PathBuf,
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Crawl of {} complete", self.home)?;
        writeln!(f, "   Tasks executed: {}", self.executed)?;
        writeln!(f, "   Pages: {}", self.pages)?;
        writeln!(f, "   Links: {}", self.edges)?;
        writeln!(f, "   Broken links: {}", self.broken_links)?;
        writeln!(f, "   Disjoint subgraphs: {}", self.components)?;
        write!(f, "   Report: {}", self.report.display())
    }
}

pub struct Node {
    settings: NodeSettings,
    mesh: Arc<Mesh>,
    scheduler: Arc<Scheduler>,
    graph: Arc<LinkGraph>,
    inbox_tx: UnboundedSender<NodeMessage>,
    inbox: UnboundedReceiver<NodeMessage>,
}

impl Node {
    /// Sets up peers, the graph and the worker pool. Must run inside a tokio
    /// runtime: a sender task is spawned per peer.
    pub fn new(settings: NodeSettings) -> Result<Self> {
        let (inbox_tx, inbox) = mpsc::unbounded_channel();

        let peers = settings
            .peers
            .iter()
            .map(|peer| {
                info!("Peer {} ({}) at {}", peer.domain, peer.root_url, peer.addr());
                (peer.domain.clone(), PeerLink::spawn(peer.addr(), settings.connect_attempts))
            })
            .collect();
        let mesh = Arc::new(Mesh::new(settings.home.clone(), peers, inbox_tx.clone()));

        let graph = Arc::new(LinkGraph::new());
        let ctx = CrawlContext {
            home: settings.home.clone(),
            fetcher: Fetcher::new(settings.fetch_timeout).context("failed to build HTTP client")?,
            graph: Arc::clone(&graph),
            observer: mesh.clone(),
        };
        let scheduler = Scheduler::new(settings.pool_size, settings.delay, ctx);

        Ok(Node {
            settings,
            mesh,
            scheduler,
            graph,
            inbox_tx,
            inbox,
        })
    }

    pub fn mesh(&self) -> Arc<Mesh> {
        Arc::clone(&self.mesh)
    }

    pub fn scheduler(&self) -> Arc<Scheduler> {
        Arc::clone(&self.scheduler)
    }

    /// Crawls until the whole mesh is done, then writes the report.
    ///
    /// `listener` is the already-bound socket peers connect to.
    pub async fn run(mut self, listener: TcpListener) -> Result<RunSummary> {
        let root = CrawlTask::root(&self.settings.root_url, self.settings.max_depth)
            .ok_or_else(|| anyhow!("cannot crawl root URL {}", self.settings.root_url))?;

        let accept = tokio::spawn(accept_loop(listener, self.inbox_tx.clone()));

        self.scheduler.start();
        info!("Crawling {} to depth {}", self.settings.root_url, self.settings.max_depth);
        self.scheduler.submit(root);

        let mut monitor = tokio::time::interval(self.settings.poll_interval);
        monitor.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                Some(message) = self.inbox.recv() => {
                    self.handle(message);
                    self.mesh.check_local(self.scheduler.pool_complete());
                }
                _ = monitor.tick() => {
                    if self.mesh.check_global(self.scheduler.pool_complete()) {
                        break;
                    }
                }
            }
        }

        info!("Every node is finished, shutting down");
        self.scheduler.stop().await;
        accept.abort();

        // The last NodeFinished may still be queued for a peer
        if tokio::time::timeout(FLUSH_TIMEOUT, self.mesh.flush()).await.is_err() {
            warn!("Timed out sending the last events to peers");
        }

        // Plain std::fs work, kept off the runtime threads
        let graph = Arc::clone(&self.graph);
        let report_dir = self.settings.report_dir.clone();
        let root_url = self.settings.root_url.clone();
        let report = tokio::task::spawn_blocking(move || write_report(&graph, &report_dir, &root_url))
            .await
            .context("report writer did not finish")??;

        Ok(RunSummary {
            home: self.settings.home.clone(),
            executed: self.scheduler.stats().executed,
            pages: report.pages,
            edges: report.edges,
            broken_links: report.broken_links,
            components: report.components,
            report: report.root,
        })
    }

    // One handler per message kind
    fn handle(&self, message: NodeMessage) {
        let event = match message {
            NodeMessage::PoolDrained => {
                debug!("Crawl pool drained");
                return;
            }
            NodeMessage::Wire(event) => event,
        };

        if !self.mesh.is_peer(event.sender()) {
            warn!("Ignoring {} from unknown node", event);
            return;
        }

        match event {
            Event::TaskForward { url, origin } => self.accept_forward(url, origin),
            Event::TaskComplete { domain } => self.mesh.acknowledge(&domain),
            Event::NodeFinished { domain } => self.mesh.set_peer_finished(&domain, true),
            Event::NodeIncomplete { domain } => self.mesh.set_peer_finished(&domain, false),
        }
    }

    fn accept_forward(&self, url: String, origin: String) {
        self.mesh.reopen();

        let task = CrawlTask::new(
            &url,
            &url,
            &self.settings.root_url,
            self.settings.max_depth,
            Origin::Peer(origin.clone()),
        );

        let Some(task) = task else {
            // Still owed a TaskComplete, or the sender would wait forever
            warn!("Cannot crawl {} forwarded by {}", url, origin);
            self.mesh.settle(&origin);
            return;
        };

        if self.scheduler.submit(task) == Submission::Rejected {
            self.mesh.settle(&origin);
        }
    }
}

// Accepts peer connections and spawns a receiver for each
async fn accept_loop(listener: TcpListener, inbox: UnboundedSender<NodeMessage>) {
    loop {
        match listener.accept().await {
            Ok((socket, remote)) => {
                debug!("Accepted connection from {}", remote);
                let _ = socket.set_nodelay(true);
                let inbox = inbox.clone();
                tokio::spawn(receive_loop(socket, remote.to_string(), move |event| {
                    inbox.send(NodeMessage::Wire(event)).is_ok()
                }));
            }
            Err(e) => warn!("Failed to accept a peer connection: {}", e),
        }
    }
}
