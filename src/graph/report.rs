// src/graph/report.rs
// =============================================================================
// Writes the link graph of one node to disk once the whole crawl is over.
//
// Layout:
//   <report dir>/<root url>/
//       nodes/<page>/out          one outgoing link per line
//       nodes/<page>/in           one incoming link per line
//       broken-links              one dead URL per line
//       disjoint-subgraphs/graphN one member URL per line, per component
//
// Directory names are URLs with every character outside [A-Za-z0-9._-]
// replaced by '-'. Pages are named by their path relative to the root URL.
// =============================================================================

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::info;

use super::LinkGraph;

/// What `write_report` produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportSummary {
    pub root: PathBuf,
    pub pages: usize,
    pub edges: usize,
    pub broken_links: usize,
    pub components: usize,
}

/// Writes the report for the node crawling `root_url` under `report_dir`.
///
/// A previous report for the same root URL is replaced.
pub fn write_report(graph: &LinkGraph, report_dir: &Path, root_url: &str) -> Result<ReportSummary> {
    let node_root = report_dir.join(sanitize(root_url));
    info!("Writing report to {}", node_root.display());

    if node_root.exists() {
        fs::remove_dir_all(&node_root)
            .with_context(|| format!("failed to clear old report {}", node_root.display()))?;
    }

    let nodes_dir = node_root.join("nodes");
    fs::create_dir_all(&nodes_dir)
        .with_context(|| format!("failed to create {}", nodes_dir.display()))?;

    // Per-page in/out files
    let vertices = graph.vertices();
    let mut used_names = HashSet::new();
    for vertex in &vertices {
        let name = unique_name(vertex_dir_name(vertex, root_url), &mut used_names);
        let dir = nodes_dir.join(name);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;

        write_lines(&dir.join("out"), &graph.out_edges(vertex))?;
        write_lines(&dir.join("in"), &graph.in_edges(vertex))?;
    }

    let broken = graph.broken_links();
    write_lines(&node_root.join("broken-links"), &broken)?;

    // One file per connected component
    let subgraphs_dir = node_root.join("disjoint-subgraphs");
    fs::create_dir_all(&subgraphs_dir)
        .with_context(|| format!("failed to create {}", subgraphs_dir.display()))?;

    let components = graph.components();
    for (index, component) in components.iter().enumerate() {
        write_lines(&subgraphs_dir.join(format!("graph{}", index + 1)), component)?;
    }

    Ok(ReportSummary {
        root: node_root,
        pages: vertices.len(),
        edges: graph.edge_count(),
        broken_links: broken.len(),
        components: components.len(),
    })
}

fn write_lines(path: &Path, lines: &[String]) -> Result<()> {
    let mut contents = String::new();
    for line in lines {
        contents.push_str(line);
        contents.push('\n');
    }

    fs::write(path, contents).with_context(|| format!("failed to write {}", path.display()))
}

/// Replaces every character outside [A-Za-z0-9._-] with '-'.
pub fn sanitize(value: &str) -> String {
    value
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

// Names the directory of one page
//
// Examples (root_url = "http://a.org/"):
//   "http://a.org/"             -> "http---a.org-"
//   "http://a.org/docs/x.html"  -> "docs-x.html"
//   "http://b.org/y"            -> "b.org-y"
fn vertex_dir_name(vertex: &str, root_url: &str) -> String {
    let relative = strip_scheme(vertex)
        .strip_prefix(strip_scheme(root_url).trim_end_matches('/'))
        .unwrap_or_else(|| strip_scheme(vertex));

    let name = relative
        .split('/')
        .filter(|segment| !segment.is_empty())
        .map(sanitize)
        .collect::<Vec<_>>()
        .join("-");

    if name.is_empty() {
        sanitize(root_url)
    } else {
        name
    }
}

fn strip_scheme(url: &str) -> &str {
    url.split_once("://").map(|(_, rest)| rest).unwrap_or(url)
}

// Appends "-2", "-3", ... when two pages sanitize to the same name
fn unique_name(name: String, used: &mut HashSet<String>) -> String {
    if used.insert(name.clone()) {
        return name;
    }

    let mut counter = 2;
    loop {
        let candidate = format!("{}-{}", name, counter);
        if used.insert(candidate.clone()) {
            return candidate;
        }
        counter += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn scratch_dir(label: &str) -> PathBuf {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        std::env::temp_dir().join(format!("link-harvester-{}-{}-{}", label, std::process::id(), nanos))
    }

    fn read_lines(path: &Path) -> Vec<String> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_sanitize() {
        assert_eq!(sanitize("http://a.org/x?y=1"), "http---a.org-x-y-1");
        assert_eq!(sanitize("plain_name-1.0"), "plain_name-1.0");
    }

    #[test]
    fn test_vertex_dir_name() {
        let root = "http://a.org/";
        assert_eq!(vertex_dir_name("http://a.org/", root), "http---a.org-");
        assert_eq!(vertex_dir_name("http://a.org/docs/x.html", root), "docs-x.html");
        assert_eq!(vertex_dir_name("http://b.org/y", root), "b.org-y");
    }

    #[test]
    fn test_unique_name() {
        let mut used = HashSet::new();
        assert_eq!(unique_name("a".to_string(), &mut used), "a");
        assert_eq!(unique_name("a".to_string(), &mut used), "a-2");
        assert_eq!(unique_name("a".to_string(), &mut used), "a-3");
    }

    #[test]
    fn test_write_report_layout() {
        let root = "http://a.org/";
        let graph = LinkGraph::new();
        graph.add_edge("http://a.org/", "http://a.org/local");
        graph.add_edge("http://a.org/", "http://b.org/remote");
        graph.add_vertex("http://a.org/local");
        graph.add_vertex("http://a.org/lonely");
        graph.add_broken_link("http://a.org/gone");

        let dir = scratch_dir("layout");
        let summary = write_report(&graph, &dir, root).unwrap();

        let node_root = dir.join("http---a.org-");
        assert_eq!(summary.root, node_root);
        assert_eq!(summary.pages, 3);
        assert_eq!(summary.edges, 2);
        assert_eq!(summary.broken_links, 1);
        assert_eq!(summary.components, 2);

        let root_dir = node_root.join("nodes").join("http---a.org-");
        assert_eq!(
            read_lines(&root_dir.join("out")),
            vec!["http://a.org/local", "http://b.org/remote"]
        );
        assert!(read_lines(&root_dir.join("in")).is_empty());

        let local_dir = node_root.join("nodes").join("local");
        assert_eq!(read_lines(&local_dir.join("in")), vec!["http://a.org/"]);

        assert_eq!(
            read_lines(&node_root.join("broken-links")),
            vec!["http://a.org/gone"]
        );

        let subgraphs = node_root.join("disjoint-subgraphs");
        assert_eq!(
            read_lines(&subgraphs.join("graph1")),
            vec!["http://a.org/", "http://a.org/local", "http://b.org/remote"]
        );
        assert_eq!(read_lines(&subgraphs.join("graph2")), vec!["http://a.org/lonely"]);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn test_write_report_replaces_old_output() {
        let root = "http://a.org/";
        let dir = scratch_dir("replace");

        let first = LinkGraph::new();
        first.add_vertex("http://a.org/one");
        first.add_vertex("http://a.org/two");
        write_report(&first, &dir, root).unwrap();

        let second = LinkGraph::new();
        second.add_vertex("http://a.org/one");
        write_report(&second, &dir, root).unwrap();

        let subgraphs = dir.join("http---a.org-").join("disjoint-subgraphs");
        assert!(subgraphs.join("graph1").exists());
        assert!(!subgraphs.join("graph2").exists());

        fs::remove_dir_all(&dir).unwrap();
    }
}
