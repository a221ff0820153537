// src/crawl/scheduler.rs
// =============================================================================
// The worker pool of one node.
//
// How it works:
// 1. submit() checks the visited set and enqueues under one lock, so a URL
//    can never be queued twice
// 2. each worker pops the head of the queue, marking it in flight, or waits
//    until a submit (or stop) wakes it
// 3. after a task, the worker settles it with the peer that sent it, releases
//    its in-flight slot and, if nothing is queued or running anymore, tells
//    the node that the pool has drained
// 4. stop() discards what is still queued, wakes every idle worker and joins
//    them all; tasks already running finish first
//
// The pool is complete exactly when the queue is empty and nothing is in
// flight. That is derived from the state on demand, never polled.
// =============================================================================

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use log::{debug, error, info, warn};
use serde::Serialize;
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::task::{CrawlTask, Origin};
use super::CrawlContext;

/// What happened to a submitted task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    Queued,
    /// The crawl URL was already visited on this node.
    Duplicate,
    /// The scheduler has been stopped.
    Rejected,
}

/// Point-in-time counters for the status console.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub queued: usize,
    pub in_flight: usize,
    pub visited: usize,
    pub executed: usize,
    pub workers: usize,
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<CrawlTask>,
    // Crawl URLs ever accepted; never shrinks
    visited: HashSet<String>,
    in_flight: usize,
    executed: usize,
    shut_down: bool,
}

pub struct Scheduler {
    state: Mutex<QueueState>,
    available: Notify,
    pool_size: usize,
    delay: Duration,
    ctx: CrawlContext,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Scheduler {
    /// Creates a scheduler. No worker runs until `start` is called.
    pub fn new(pool_size: usize, delay: Duration, ctx: CrawlContext) -> Arc<Self> {
        Arc::new(Scheduler {
            state: Mutex::new(QueueState::default()),
            available: Notify::new(),
            pool_size: pool_size.max(1),
            delay,
            ctx,
            workers: Mutex::new(Vec::new()),
        })
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn context(&self) -> &CrawlContext {
        &self.ctx
    }

    /// Spawns the workers.
    pub fn start(self: &Arc<Self>) {
        let mut workers = self.workers.lock().unwrap_or_else(PoisonError::into_inner);
        if !workers.is_empty() {
            return;
        }

        info!("Starting {} crawl workers", self.pool_size);
        for id in 0..self.pool_size {
            let scheduler = Arc::clone(self);
            workers.push(tokio::spawn(scheduler.worker_loop(id)));
        }
    }

    /// Queues `task` unless its crawl URL was seen before or the scheduler is
    /// stopped.
    ///
    /// A duplicate sent by a peer is settled with that peer right away: the
    /// page is already covered, so the peer must not wait for it.
    pub fn submit(&self, task: CrawlTask) -> Submission {
        {
            let mut state = self.lock();

            if state.shut_down {
                debug!("Scheduler stopped, rejecting {}", task);
                return Submission::Rejected;
            }

            if state.visited.insert(task.crawl_url().to_string()) {
                state.queue.push_back(task);
                drop(state);
                self.available.notify_one();
                return Submission::Queued;
            }
        }

        debug!("Already visited {}", task.crawl_url());
        if let Origin::Peer(peer) = task.origin() {
            self.ctx.observer.task_settled(peer);
        }
        Submission::Duplicate
    }

    /// True when nothing is queued and no worker holds a task.
    pub fn pool_complete(&self) -> bool {
        let state = self.lock();
        state.queue.is_empty() && state.in_flight == 0
    }

    pub fn stats(&self) -> SchedulerStats {
        let state = self.lock();
        SchedulerStats {
            queued: state.queue.len(),
            in_flight: state.in_flight,
            visited: state.visited.len(),
            executed: state.executed,
            workers: self.pool_size,
        }
    }

    /// Stops accepting tasks and waits for every worker to exit.
    pub async fn stop(&self) {
        let discarded = {
            let mut state = self.lock();
            state.shut_down = true;
            let discarded = state.queue.len();
            state.queue.clear();
            discarded
        };
        if discarded > 0 {
            warn!("Discarding {} queued tasks at shutdown", discarded);
        }

        self.available.notify_waiters();

        let handles = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Crawl worker failed: {}", e);
            }
        }
        info!("All crawl workers stopped");
    }

    // Pops the next task, waiting while the queue is empty.
    // Returns None once the scheduler is stopped and nothing is left.
    async fn next_task(&self) -> Option<CrawlTask> {
        loop {
            // Register for a wakeup before looking at the queue, so a submit
            // between the check and the await is not missed
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(task) = state.queue.pop_front() {
                    state.in_flight += 1;
                    return Some(task);
                }
                if state.shut_down {
                    return None;
                }
            }

            notified.await;
        }
    }

    // Settles a task that a worker is done with
    //
    // The peer is told before the in-flight slot is released, so the node can
    // never look complete while an acknowledgement is still unsent.
    fn finish(&self, task: &CrawlTask) {
        if let Origin::Peer(peer) = task.origin() {
            self.ctx.observer.task_settled(peer);
        }

        let drained = {
            let mut state = self.lock();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.executed += 1;
            state.queue.is_empty() && state.in_flight == 0
        };

        if drained {
            self.ctx.observer.pool_drained();
        }
    }

    async fn worker_loop(self: Arc<Self>, id: usize) {
        debug!("Worker {} started", id);

        while let Some(task) = self.next_task().await {
            let outcome = AssertUnwindSafe(task.execute(&self, &self.ctx))
                .catch_unwind()
                .await;
            if outcome.is_err() {
                error!("Task panicked: {}", task);
            }

            self.finish(&task);

            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }

        debug!("Worker {} stopped", id);
    }

    #[cfg(test)]
    pub(crate) fn queued_tasks(&self) -> Vec<CrawlTask> {
        self.lock().queue.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawl::testing::{context_with_observer, RecordingObserver};
    use httpmock::prelude::*;

    fn peer_task(url: &str, peer: &str) -> CrawlTask {
        CrawlTask::new(url, url, url, 1, Origin::Peer(peer.to_string())).unwrap()
    }

    // Waits until the pool has executed `executed` tasks and gone idle
    async fn wait_for_idle(scheduler: &Scheduler, executed: usize) {
        tokio::time::timeout(Duration::from_secs(10), async {
            while !(scheduler.pool_complete() && scheduler.stats().executed >= executed) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("scheduler did not go idle");
    }

    #[test]
    fn test_duplicate_submissions_are_settled_each_time() {
        let observer = Arc::new(RecordingObserver::default());
        let ctx = context_with_observer("http://a.org/", observer.clone());
        let scheduler = Scheduler::new(2, Duration::ZERO, ctx);

        assert_eq!(scheduler.submit(peer_task("http://a.org/x", "b.org")), Submission::Queued);
        assert_eq!(scheduler.submit(peer_task("http://a.org/x", "b.org")), Submission::Duplicate);
        assert_eq!(scheduler.submit(peer_task("http://a.org/./x", "c.org")), Submission::Duplicate);

        // Only the duplicates are settled so far; the queued one is settled
        // when it runs
        assert_eq!(observer.settled(), vec!["b.org", "c.org"]);
        assert_eq!(scheduler.queued_tasks().len(), 1);
        assert_eq!(scheduler.stats().visited, 1);
    }

    #[test]
    fn test_internal_duplicate_is_not_settled() {
        let observer = Arc::new(RecordingObserver::default());
        let ctx = context_with_observer("http://a.org/", observer.clone());
        let scheduler = Scheduler::new(1, Duration::ZERO, ctx);

        let task = CrawlTask::root("http://a.org/", 2).unwrap();
        assert_eq!(scheduler.submit(task.clone()), Submission::Queued);
        assert_eq!(scheduler.submit(task), Submission::Duplicate);
        assert!(observer.settled().is_empty());
    }

    #[test]
    fn test_pool_complete_follows_queue() {
        let observer = Arc::new(RecordingObserver::default());
        let ctx = context_with_observer("http://a.org/", observer);
        let scheduler = Scheduler::new(1, Duration::ZERO, ctx);

        assert!(scheduler.pool_complete());
        scheduler.submit(CrawlTask::root("http://a.org/", 1).unwrap());
        assert!(!scheduler.pool_complete());
    }

    #[tokio::test]
    async fn test_task_body_runs_once_per_url() {
        let server = MockServer::start();
        let page = server.mock(|when, then| {
            when.method(GET).path("/page");
            then.status(200)
                .header("content-type", "text/html")
                .body("<p>no links</p>");
        });

        let observer = Arc::new(RecordingObserver::default());
        let ctx = context_with_observer(&server.base_url(), observer.clone());
        let scheduler = Scheduler::new(3, Duration::ZERO, ctx);
        scheduler.start();

        let url = server.url("/page");
        for _ in 0..4 {
            scheduler.submit(peer_task(&url, "b.org"));
        }
        wait_for_idle(&scheduler, 1).await;

        page.assert_hits(1);
        // One notice per submit: three duplicates plus the executed task
        assert_eq!(observer.settled().len(), 4);
        assert_eq!(scheduler.stats().executed, 1);
        assert!(observer.drained() >= 1);

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_workers_follow_local_links() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/");
            then.status(200)
                .header("content-type", "text/html")
                .body(r#"<a href="/a">A</a><a href="/b">B</a>"#);
        });
        server.mock(|when, then| {
            when.method(GET).path("/a");
            then.status(200)
                .header("content-type", "text/html")
                .body(r#"<a href="/b">B</a><a href="/">Home</a>"#);
        });
        let b = server.mock(|when, then| {
            when.method(GET).path("/b");
            then.status(200).header("content-type", "text/html").body("");
        });

        let observer = Arc::new(RecordingObserver::default());
        let ctx = context_with_observer(&server.base_url(), observer.clone());
        let graph = ctx.graph.clone();
        let scheduler = Scheduler::new(2, Duration::ZERO, ctx);
        scheduler.start();

        scheduler.submit(CrawlTask::root(&server.url("/"), 3).unwrap());
        wait_for_idle(&scheduler, 3).await;

        b.assert_hits(1);
        assert_eq!(graph.vertex_count(), 3);
        assert_eq!(scheduler.stats().visited, 3);
        assert!(observer.forwarded().is_empty());

        scheduler.stop().await;
    }

    #[tokio::test]
    async fn test_submit_after_stop_is_rejected() {
        let observer = Arc::new(RecordingObserver::default());
        let ctx = context_with_observer("http://a.org/", observer);
        let scheduler = Scheduler::new(2, Duration::ZERO, ctx);
        scheduler.start();

        scheduler.stop().await;

        let task = CrawlTask::root("http://a.org/", 1).unwrap();
        assert_eq!(scheduler.submit(task), Submission::Rejected);
        assert_eq!(scheduler.stats().visited, 0);
    }

    #[tokio::test]
    async fn test_stop_discards_queued_tasks() {
        let observer = Arc::new(RecordingObserver::default());
        let ctx = context_with_observer("http://a.org/", observer);
        let scheduler = Scheduler::new(1, Duration::ZERO, ctx);

        scheduler.submit(CrawlTask::root("http://a.org/", 1).unwrap());
        scheduler.stop().await;

        assert_eq!(scheduler.stats().queued, 0);
        assert!(scheduler.pool_complete());
    }

    #[tokio::test]
    async fn test_workers_pause_after_leaf_tasks() {
        let observer = Arc::new(RecordingObserver::default());
        let ctx = context_with_observer("http://a.org/", observer);
        let delay = Duration::from_millis(200);
        let scheduler = Scheduler::new(1, delay, ctx);

        scheduler.submit(CrawlTask::root("http://a.org/1", 0).unwrap());
        scheduler.submit(CrawlTask::root("http://a.org/2", 0).unwrap());

        let started = tokio::time::Instant::now();
        scheduler.start();
        wait_for_idle(&scheduler, 2).await;

        assert!(started.elapsed() >= delay);
        scheduler.stop().await;
    }
}
