// src/node/mesh.rs
// =============================================================================
// The peers of a node and the termination-detection state it keeps about
// them.
//
// Counters, per peer:
// - forwarded:    TaskForward events this node sent to the peer
// - acknowledged: TaskComplete events the peer sent back
// - finished:     the last NodeFinished / NodeIncomplete the peer broadcast
//
// A node is locally complete when its pool is complete and, for every peer,
// forwarded == acknowledged. It broadcasts NodeFinished once on becoming
// locally complete ("announced") and NodeIncomplete whenever a peer hands it
// new work. The mesh is globally complete, from this node's point of view,
// when it is locally complete, has announced it, and every peer reports
// finished.
//
// Evicted peers are left out of both checks. Nothing is sent to them anymore.
// =============================================================================

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use futures::future::join_all;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

use super::NodeMessage;
use crate::crawl::url::domain_key;
use crate::crawl::CrawlObserver;
use crate::wire::{Event, PeerLink};

#[derive(Debug)]
struct Peer {
    domain: String,
    link: PeerLink,
}

#[derive(Debug, Default)]
struct Termination {
    forwarded: HashMap<String, u64>,
    acknowledged: HashMap<String, u64>,
    finished: HashMap<String, bool>,
    evicted: HashSet<String>,
    announced: bool,
}

impl Termination {
    fn balanced(&self) -> bool {
        self.forwarded.iter().all(|(peer, &sent)| {
            self.evicted.contains(peer) || self.acknowledged.get(peer).copied().unwrap_or(0) == sent
        })
    }
}

/// Per-peer counters as shown by the status console.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerSnapshot {
    pub domain: String,
    pub addr: String,
    pub forwarded: u64,
    pub acknowledged: u64,
    pub finished: bool,
    pub evicted: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MeshSnapshot {
    pub home: String,
    pub announced: bool,
    pub peers: Vec<PeerSnapshot>,
}

/// The outbound side of the node plus its termination state.
pub struct Mesh {
    home: String,
    // In config file order, which decides substring matches
    peers: Vec<Peer>,
    termination: Mutex<Termination>,
    inbox: UnboundedSender<NodeMessage>,
}

impl Mesh {
    /// `peers` pairs each peer's domain key with its sender.
    pub fn new(home: String, peers: Vec<(String, PeerLink)>, inbox: UnboundedSender<NodeMessage>) -> Self {
        let peers = peers
            .into_iter()
            .map(|(domain, link)| Peer { domain, link })
            .collect();

        Mesh {
            home,
            peers,
            termination: Mutex::new(Termination::default()),
            inbox,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Termination> {
        self.termination.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn peer(&self, domain: &str) -> Option<&Peer> {
        self.peers.iter().find(|peer| peer.domain == domain)
    }

    pub fn is_peer(&self, domain: &str) -> bool {
        self.peer(domain).is_some()
    }

    // The peer that owns `url`: an exact domain match, otherwise the first
    // peer whose domain appears anywhere in the URL
    fn owner_of(&self, url: &str) -> Option<&Peer> {
        if let Some(key) = domain_key(url) {
            if let Some(peer) = self.peer(&key) {
                return Some(peer);
            }
        }

        self.peers.iter().find(|peer| url.contains(peer.domain.as_str()))
    }

    /// Hands `url` to the peer that owns it.
    ///
    /// Returns false when no (non-evicted) peer owns the URL. The link stays
    /// in the graph but is not crawled anywhere.
    pub fn forward(&self, url: &str) -> bool {
        let Some(peer) = self.owner_of(url) else {
            debug!("No peer owns {}, not forwarding", url);
            return false;
        };

        {
            let mut state = self.lock();
            if state.evicted.contains(&peer.domain) {
                debug!("Peer {} is evicted, not forwarding {}", peer.domain, url);
                return false;
            }
            *state.forwarded.entry(peer.domain.clone()).or_default() += 1;
        }

        info!("Forwarding {} to {}", url, peer.domain);
        peer.link.send(Event::TaskForward {
            url: url.to_string(),
            origin: self.home.clone(),
        });
        true
    }

    /// Tells `peer` that one of the tasks it forwarded is done.
    pub fn settle(&self, peer: &str) {
        match self.peer(peer) {
            Some(peer) => {
                peer.link.send(Event::TaskComplete {
                    domain: self.home.clone(),
                });
            }
            None => warn!("Cannot settle task for unknown peer {}", peer),
        }
    }

    /// Records a TaskComplete from `peer`.
    pub fn acknowledge(&self, peer: &str) {
        let mut state = self.lock();
        if state.evicted.contains(peer) {
            return;
        }
        *state.acknowledged.entry(peer.to_string()).or_default() += 1;
    }

    /// Records a NodeFinished (true) or NodeIncomplete (false) from `peer`.
    pub fn set_peer_finished(&self, peer: &str, finished: bool) {
        self.lock().finished.insert(peer.to_string(), finished);
    }

    /// Called when a peer hands this node new work: withdraws any earlier
    /// NodeFinished by broadcasting NodeIncomplete.
    pub fn reopen(&self) {
        self.lock().announced = false;
        self.broadcast(|domain| Event::NodeIncomplete { domain });
    }

    /// Checks local completion given the state of the pool, and broadcasts
    /// NodeFinished the first time the node is found complete.
    pub fn check_local(&self, pool_complete: bool) -> bool {
        let announce = {
            let mut state = self.lock();
            if !(pool_complete && state.balanced()) {
                return false;
            }
            !std::mem::replace(&mut state.announced, true)
        };

        if announce {
            info!("{} is locally complete", self.home);
            self.broadcast(|domain| Event::NodeFinished { domain });
        }
        true
    }

    /// True when this node is locally complete, has said so, and every peer
    /// that is still part of the mesh has said so too.
    pub fn check_global(&self, pool_complete: bool) -> bool {
        if !self.check_local(pool_complete) {
            return false;
        }

        let state = self.lock();
        state.announced
            && self.peers.iter().all(|peer| {
                state.evicted.contains(&peer.domain)
                    || state.finished.get(&peer.domain).copied().unwrap_or(false)
            })
    }

    /// Removes `peer` from the completion checks and drops its counters.
    /// Returns false if no such peer is configured.
    pub fn evict(&self, peer: &str) -> bool {
        if !self.is_peer(peer) {
            return false;
        }

        let mut state = self.lock();
        state.evicted.insert(peer.to_string());
        state.forwarded.remove(peer);
        state.acknowledged.remove(peer);
        state.finished.remove(peer);
        warn!("Evicted peer {}", peer);
        true
    }

    pub fn snapshot(&self) -> MeshSnapshot {
        let state = self.lock();

        let peers = self
            .peers
            .iter()
            .map(|peer| PeerSnapshot {
                domain: peer.domain.clone(),
                addr: peer.link.addr().to_string(),
                forwarded: state.forwarded.get(&peer.domain).copied().unwrap_or(0),
                acknowledged: state.acknowledged.get(&peer.domain).copied().unwrap_or(0),
                finished: state.finished.get(&peer.domain).copied().unwrap_or(false),
                evicted: state.evicted.contains(&peer.domain),
            })
            .collect();

        MeshSnapshot {
            home: self.home.clone(),
            announced: state.announced,
            peers,
        }
    }

    /// Waits until everything queued for the peers has been sent.
    pub async fn flush(&self) {
        join_all(self.peers.iter().map(|peer| peer.link.flush())).await;
    }

    // Sends one event, built from this node's domain, to every peer that has
    // not been evicted
    fn broadcast(&self, event: impl Fn(String) -> Event) {
        let evicted = self.lock().evicted.clone();
        for peer in self.peers.iter().filter(|peer| !evicted.contains(&peer.domain)) {
            peer.link.send(event(self.home.clone()));
        }
    }
}

impl CrawlObserver for Mesh {
    fn forward_link(&self, url: &str) {
        self.forward(url);
    }

    fn task_settled(&self, peer: &str) {
        self.settle(peer);
    }

    fn pool_drained(&self) {
        // The node loop is gone once the node has shut down
        let _ = self.inbox.send(NodeMessage::PoolDrained);
    }
}
