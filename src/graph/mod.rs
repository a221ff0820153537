// src/graph/mod.rs
// =============================================================================
// The link graph a node builds while it crawls.
//
// - vertices are page URLs, edges point from a page to every link found on it
// - broken links are kept in a separate set
// - connected components are computed over the undirected view of the graph,
//   so a foreign URL that two pages link to joins them into one component
//
// Ordered maps keep the report output deterministic.
// =============================================================================

mod report;

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use report::write_report;

#[derive(Debug, Default)]
struct GraphState {
    adjacency: BTreeMap<String, BTreeSet<String>>,
    broken: BTreeSet<String>,
}

/// Thread-safe directed link graph plus the set of broken links.
#[derive(Debug, Default)]
pub struct LinkGraph {
    state: Mutex<GraphState>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, GraphState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Registers a crawled page, even if it turns out to have no links.
    pub fn add_vertex(&self, vertex: &str) {
        self.lock().adjacency.entry(vertex.to_string()).or_default();
    }

    /// Adds the edge vertex -> edge, creating the vertex if needed.
    pub fn add_edge(&self, vertex: &str, edge: &str) {
        self.lock()
            .adjacency
            .entry(vertex.to_string())
            .or_default()
            .insert(edge.to_string());
    }

    pub fn add_broken_link(&self, url: &str) {
        self.lock().broken.insert(url.to_string());
    }

    /// Every vertex that has an entry of its own (crawled pages).
    pub fn vertices(&self) -> Vec<String> {
        self.lock().adjacency.keys().cloned().collect()
    }

    pub fn out_edges(&self, vertex: &str) -> Vec<String> {
        self.lock()
            .adjacency
            .get(vertex)
            .map(|edges| edges.iter().cloned().collect())
            .unwrap_or_default()
    }

    // Found by scanning every adjacency set for `vertex`
    pub fn in_edges(&self, vertex: &str) -> Vec<String> {
        self.lock()
            .adjacency
            .iter()
            .filter(|(_, edges)| edges.contains(vertex))
            .map(|(source, _)| source.clone())
            .collect()
    }

    pub fn broken_links(&self) -> Vec<String> {
        self.lock().broken.iter().cloned().collect()
    }

    pub fn vertex_count(&self) -> usize {
        self.lock().adjacency.len()
    }

    pub fn edge_count(&self) -> usize {
        self.lock().adjacency.values().map(BTreeSet::len).sum()
    }

    /// Connected components of the undirected view of the graph.
    ///
    /// Repeatedly picks the smallest unvisited vertex and marks everything
    /// reachable from it with a breadth-first search. Each component is
    /// sorted, and components are returned in the order they were found.
    pub fn components(&self) -> Vec<Vec<String>> {
        let state = self.lock();

        // Undirected neighbour lists, including vertices that only appear as
        // edge targets
        let mut neighbours: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
        for (source, edges) in &state.adjacency {
            neighbours.entry(source.as_str()).or_default();
            for target in edges {
                neighbours.entry(source.as_str()).or_default().insert(target.as_str());
                neighbours.entry(target.as_str()).or_default().insert(source.as_str());
            }
        }

        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut components = Vec::new();

        for &start in neighbours.keys() {
            if !visited.insert(start) {
                continue;
            }

            let mut component = vec![start.to_string()];
            let mut queue = VecDeque::from([start]);

            while let Some(vertex) = queue.pop_front() {
                for &next in &neighbours[vertex] {
                    if visited.insert(next) {
                        component.push(next.to_string());
                        queue.push_back(next);
                    }
                }
            }

            component.sort();
            components.push(component);
        }

        components
    }
}
