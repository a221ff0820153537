// src/crawl/mod.rs
// =============================================================================
// This module handles the crawling done by a single node.
//
// Features:
// - A fixed-size worker pool draining a shared FIFO queue (scheduler)
// - Every URL is crawled at most once per node (visited set)
// - Configurable depth limit, counted down from the root
// - Polite crawling with a delay between tasks
// - Links into other domains are handed to an observer, which forwards them
//   to the peer node that owns the domain
//
// Submodules:
// - url: resolution, normalization and domain classification
// - task: one crawl task and its execution
// - scheduler: the queue, the visited set and the workers
// =============================================================================

mod scheduler;
mod task;
pub mod url;

use std::sync::Arc;

use crate::checker::Fetcher;
use crate::graph::LinkGraph;

pub use scheduler::{Scheduler, SchedulerStats, Submission};
pub use task::{CrawlTask, Origin};

/// What a crawl reports back to the node that owns it.
///
/// Called from worker tasks, so implementations must not block.
pub trait CrawlObserver: Send + Sync {
    /// A link into a foreign domain was found on one of our pages.
    fn forward_link(&self, url: &str);

    /// A task forwarded by `peer` has been dealt with, either crawled or found
    /// to be a duplicate.
    fn task_settled(&self, peer: &str);

    /// The queue is empty and no worker holds a task.
    fn pool_drained(&self);
}

/// Everything a task needs besides the scheduler.
#[derive(Clone)]
pub struct CrawlContext {
    /// Domain key of this node.
    pub home: String,
    pub fetcher: Fetcher,
    pub graph: Arc<LinkGraph>,
    pub observer: Arc<dyn CrawlObserver>,
}
