// src/crawl/task.rs
// =============================================================================
// One unit of crawl work: a URL, how much deeper it may go, and who asked
// for it.
//
// A task is a plain value. Executing it needs the scheduler (to submit
// children) and the crawl context (fetcher, graph, observer), and both are
// passed in rather than stored in the task.
//
// execute():
// 1. depth 0 is a leaf: nothing is fetched
// 2. fetch the page, following redirects; on failure probe for a dead link.
//    A redirect into another domain hands the target over for forwarding
// 3. pull the hrefs out of the HTML
// 4. for each href: resolve it, record the edge, then either submit a child
//    task (same domain) or hand it to the observer for forwarding
// =============================================================================

use std::fmt;

use log::{debug, info};

use super::scheduler::Scheduler;
use super::url::{domain_key, is_local_href, resolve};
use super::CrawlContext;
use crate::checker::{extract_hrefs, Fetched};

/// Redirect hops followed before a page is given up on.
const MAX_REDIRECTS: usize = 5;

/// Who asked for a task to be crawled.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Origin {
    /// Discovered by this node.
    Internal,
    /// Forwarded by the peer with this domain key, which expects a
    /// `TaskComplete` once the task is done.
    Peer(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrawlTask {
    crawl_url: String,
    parent_url: String,
    root_url: String,
    depth: u32,
    origin: Origin,
}

impl CrawlTask {
    /// Builds a task for `href` as found on `parent_url`.
    ///
    /// The crawl URL is resolved and normalized here, so two hrefs naming the
    /// same page produce the same crawl URL. Returns None if `href` cannot be
    /// resolved to an http(s) URL.
    pub fn new(href: &str, parent_url: &str, root_url: &str, depth: u32, origin: Origin) -> Option<Self> {
        let crawl_url = resolve(parent_url, href)?;

        Some(CrawlTask {
            crawl_url,
            parent_url: parent_url.to_string(),
            root_url: root_url.to_string(),
            depth,
            origin,
        })
    }

    /// The first task of a node: its own root page.
    pub fn root(root_url: &str, depth: u32) -> Option<Self> {
        Self::new(root_url, root_url, root_url, depth, Origin::Internal)
    }

    pub fn crawl_url(&self) -> &str {
        &self.crawl_url
    }

    pub fn parent_url(&self) -> &str {
        &self.parent_url
    }

    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    // A child of this task for an already-resolved URL on `page_url`.
    // None for leaves, so depth can never go below zero.
    fn child(&self, crawl_url: String, page_url: &str) -> Option<CrawlTask> {
        Some(CrawlTask {
            crawl_url,
            parent_url: page_url.to_string(),
            root_url: self.root_url.clone(),
            depth: self.depth.checked_sub(1)?,
            origin: Origin::Internal,
        })
    }

    // True when `url` is neither in the home domain nor in the domain this
    // task was asked to crawl
    fn leaves_home(&self, url: &str, home: &str) -> bool {
        let domain = domain_key(url);
        domain.as_deref() != Some(home) && domain != domain_key(&self.crawl_url)
    }

    /// Runs the task. Never fails: every error is logged and swallowed.
    pub async fn execute(&self, scheduler: &Scheduler, ctx: &CrawlContext) {
        if self.depth == 0 {
            debug!("Leaf task for {}", self.crawl_url);
            return;
        }

        info!("Crawling [depth {}]: {}", self.depth, self.crawl_url);
        debug!("Linked from {} in the crawl of {}", self.parent_url(), self.root_url());

        let Some((page_url, html)) = self.fetch(ctx).await else {
            return;
        };

        ctx.graph.add_vertex(&page_url);

        // Documents such as PDFs are recorded but not parsed
        let Some(html) = html else {
            debug!("{} is not HTML, skipping links", page_url);
            return;
        };

        for href in extract_hrefs(&html) {
            let Some(link) = resolve(&page_url, &href) else {
                continue;
            };

            ctx.graph.add_edge(&page_url, &link);

            if is_local_href(&href, &link, &ctx.home) {
                if let Some(child) = self.child(link, &page_url) {
                    scheduler.submit(child);
                }
            } else {
                ctx.observer.forward_link(&link);
            }
        }
    }

    // Fetches the page, following up to MAX_REDIRECTS redirects.
    //
    // Returns the final URL and its HTML (None for non-HTML documents), or
    // None when nothing usable came back. A failed fetch is probed and, if
    // the link is dead, recorded as broken. A redirect that leaves this
    // node's domain is not followed: the target goes to the observer instead.
    async fn fetch(&self, ctx: &CrawlContext) -> Option<(String, Option<String>)> {
        let mut url = self.crawl_url.clone();

        for _ in 0..=MAX_REDIRECTS {
            match ctx.fetcher.fetch(&url).await {
                Ok(Fetched::Page { url, html }) => return Some((url, html)),
                Ok(Fetched::Redirect(location)) => match resolve(&url, &location) {
                    Some(next) if self.leaves_home(&next, &ctx.home) => {
                        info!("{} redirects off {} to {}", url, ctx.home, next);
                        ctx.observer.forward_link(&next);
                        return None;
                    }
                    Some(next) => {
                        debug!("{} redirects to {}", url, next);
                        url = next;
                    }
                    None => {
                        debug!("{} redirects to unusable location {}", url, location);
                        return None;
                    }
                },
                Err(e) => {
                    debug!("Fetch failed: {}", e);
                    let status = ctx.fetcher.probe(&url).await;
                    if status.is_dead() {
                        info!("Broken link: {} ({:?})", url, status);
                        ctx.graph.add_broken_link(&url);
                    }
                    return None;
                }
            }
        }

        debug!("Too many redirects starting at {}", self.crawl_url);
        None
    }
}

impl fmt::Display for CrawlTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [depth {}", self.crawl_url, self.depth)?;
        if let Origin::Peer(peer) = &self.origin {
            write!(f, ", from {}", peer)?;
        }
        write!(f, "]")
    }
}
