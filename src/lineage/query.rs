//! `query_lineage`: BFS traversal with depth limit and cycle protection,
//! plus partial-name resolution with edit-distance suggestions (spec §4.10).

use super::engine::BuiltGraph;
use crate::utils::{ApiError, ApiResult};
use petgraph::graph::NodeIndex;
use petgraph::visit::EdgeRef;
use petgraph::Direction as PetDirection;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Upstream,
    Downstream,
    Both,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    Text,
    Json,
    Dot,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineageQueryResult {
    pub root: String,
    pub nodes_by_depth: Vec<Vec<String>>,
    pub edges: Vec<super::LineageEdge>,
    pub rendered: Option<String>,
}

const SUGGESTION_COUNT: usize = 5;

/// Resolves `object` against the graph's node set. Exact fqn match wins;
/// otherwise a case-insensitive unqualified-name match; `Ambiguous` if more
/// than one catalog entry shares that name, `NotFound` with edit-distance
/// suggestions if none do.
fn resolve_start_node(graph: &BuiltGraph, object: &str) -> ApiResult<NodeIndex> {
    let upper = object.to_ascii_uppercase();
    if let Some(&idx) = graph.index_by_fqn.get(&upper) {
        return Ok(idx);
    }

    let matches: Vec<(&String, &NodeIndex)> =
        graph.index_by_fqn.iter().filter(|(fqn, _)| fqn.split('.').next_back() == Some(upper.as_str())).collect();

    match matches.len() {
        1 => Ok(*matches[0].1),
        0 => {
            let mut candidates: Vec<(String, f64)> =
                graph.index_by_fqn.keys().map(|fqn| (fqn.clone(), strsim::jaro_winkler(&upper, fqn))).collect();
            candidates.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
            let suggestions: Vec<String> = candidates.into_iter().take(SUGGESTION_COUNT).map(|(fqn, _)| fqn).collect();
            Err(ApiError::not_found(format!("no catalog object matches '{object}'"), suggestions))
        }
        _ => Err(ApiError::ambiguous(
            format!("'{object}' matches multiple catalog objects"),
            matches.into_iter().map(|(fqn, _)| fqn.clone()).collect(),
        )),
    }
}

/// BFS bounded by `depth`; a node already visited at a shallower or equal
/// depth is never re-expanded, which is sufficient cycle protection for a
/// directed graph traversed breadth-first.
pub fn query_lineage(graph: &BuiltGraph, object: &str, direction: Direction, depth: usize, format: OutputFormat) -> ApiResult<LineageQueryResult> {
    let start = resolve_start_node(graph, object)?;
    let root_fqn = graph.graph[start].fqn.clone();

    let mut visited_depth: HashMap<NodeIndex, usize> = HashMap::new();
    visited_depth.insert(start, 0);
    let mut queue = VecDeque::new();
    queue.push_back((start, 0usize));
    let mut nodes_by_depth: Vec<Vec<String>> = vec![vec![root_fqn.clone()]];
    let mut edges = Vec::new();

    while let Some((node, current_depth)) = queue.pop_front() {
        if current_depth >= depth {
            continue;
        }
        let directions: Vec<PetDirection> = match direction {
            Direction::Upstream => vec![PetDirection::Outgoing],
            Direction::Downstream => vec![PetDirection::Incoming],
            Direction::Both => vec![PetDirection::Outgoing, PetDirection::Incoming],
        };

        for dir in directions {
            for edge_ref in graph.graph.edges_directed(node, dir) {
                let (from, to) = (edge_ref.source(), edge_ref.target());
                let neighbor = if dir == PetDirection::Outgoing { to } else { from };
                edges.push(edge_ref.weight().clone());

                if visited_depth.contains_key(&neighbor) {
                    continue;
                }
                let next_depth = current_depth + 1;
                visited_depth.insert(neighbor, next_depth);
                if nodes_by_depth.len() <= next_depth {
                    nodes_by_depth.push(Vec::new());
                }
                nodes_by_depth[next_depth].push(graph.graph[neighbor].fqn.clone());
                queue.push_back((neighbor, next_depth));
            }
        }
    }

    let rendered = match format {
        OutputFormat::Text => Some(render_text(&root_fqn, &nodes_by_depth)),
        OutputFormat::Dot => Some(render_dot(&root_fqn, &nodes_by_depth, &edges)),
        OutputFormat::Json => None,
    };

    Ok(LineageQueryResult { root: root_fqn, nodes_by_depth, edges, rendered })
}

/// `build_dependency_graph`'s whole-graph DOT rendering, optionally scoped
/// to a database/schema prefix (spec §6). Unlike `query_lineage`, this has
/// no start node or depth bound.
pub fn render_scoped_dot(graph: &BuiltGraph, scope_prefix: Option<&str>) -> String {
    let in_scope = |fqn: &str| scope_prefix.is_none_or(|p| fqn.starts_with(&p.to_ascii_uppercase()));

    let mut out = String::from("digraph dependencies {\n");
    for node in graph.graph.node_weights() {
        if in_scope(&node.fqn) {
            out.push_str(&format!("  \"{}\";\n", node.fqn));
        }
    }
    for edge in graph.graph.edge_weights() {
        if in_scope(&edge.from) && in_scope(&edge.to) {
            out.push_str(&format!("  \"{}\" -> \"{}\" [confidence={:.2}];\n", edge.from, edge.to, edge.confidence));
        }
    }
    out.push_str("}\n");
    out
}

pub fn scoped_subgraph(graph: &BuiltGraph, scope_prefix: Option<&str>) -> (Vec<String>, Vec<super::LineageEdge>) {
    let in_scope = |fqn: &str| scope_prefix.is_none_or(|p| fqn.starts_with(&p.to_ascii_uppercase()));
    let nodes: Vec<String> = graph.graph.node_weights().map(|n| n.fqn.clone()).filter(|f| in_scope(f)).collect();
    let edges: Vec<super::LineageEdge> =
        graph.graph.edge_weights().filter(|e| in_scope(&e.from) && in_scope(&e.to)).cloned().collect();
    (nodes, edges)
}

fn render_text(root: &str, nodes_by_depth: &[Vec<String>]) -> String {
    let mut out = format!("{root}\n");
    for (depth, nodes) in nodes_by_depth.iter().enumerate().skip(1) {
        for node in nodes {
            out.push_str(&"  ".repeat(depth));
            out.push_str("-> ");
            out.push_str(node);
            out.push('\n');
        }
    }
    out
}

/// Supplemented output format (SPEC_FULL §11): Graphviz DOT, for piping
/// `build_dependency_graph`/`query_lineage` output straight into `dot`.
fn render_dot(root: &str, nodes_by_depth: &[Vec<String>], edges: &[super::LineageEdge]) -> String {
    let mut out = String::from("digraph lineage {\n");
    let all_nodes: Vec<&String> = nodes_by_depth.iter().flatten().collect();
    for node in &all_nodes {
        out.push_str(&format!("  \"{node}\";\n"));
    }
    for edge in edges {
        out.push_str(&format!("  \"{}\" -> \"{}\" [label=\"{:?}\" confidence={:.2}];\n", edge.from, edge.to, edge.kind, edge.confidence));
    }
    out.push_str("}\n");
    let _ = root;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogEntry, CatalogMetadata, ObjectKind, ObjectRef};
    use crate::lineage::engine::LineageEngine;

    fn seed_catalog(dir: &std::path::Path) {
        let summary = CatalogEntry {
            object_ref: ObjectRef::new("ANALYTICS", "REPORTING", "SUMMARY", ObjectKind::View),
            columns: vec![],
            ddl: Some("SELECT * FROM orders".to_string()),
            last_ddl: None,
            owner: None,
            comment: None,
            tags: vec![],
        };
        let orders =
            CatalogEntry { object_ref: ObjectRef::new("ANALYTICS", "RAW", "ORDERS", ObjectKind::Table), columns: vec![], ddl: None, last_ddl: None, owner: None, comment: None, tags: vec![] };
        crate::catalog::store::write_jsonl(dir, ObjectKind::View, &[summary]).unwrap();
        crate::catalog::store::write_jsonl(dir, ObjectKind::Table, &[orders]).unwrap();
        crate::catalog::store::write_metadata(
            dir,
            &CatalogMetadata {
                last_build: chrono::Utc::now(),
                last_full_refresh: chrono::Utc::now(),
                databases: vec!["ANALYTICS".to_string()],
                total_objects: 2,
                version: 1,
                schema_count: 2,
                table_count: 1,
            },
        )
        .unwrap();
    }

    #[test]
    fn upstream_query_finds_direct_source() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog(dir.path());
        let engine = LineageEngine::new();
        let graph = engine.get_or_build(dir.path()).unwrap();
        let result = query_lineage(&graph, "ANALYTICS.REPORTING.SUMMARY", Direction::Upstream, 3, OutputFormat::Json).unwrap();
        assert!(result.nodes_by_depth[1].contains(&"ANALYTICS.RAW.ORDERS".to_string()));
    }

    #[test]
    fn partial_name_resolves_when_unambiguous() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog(dir.path());
        let engine = LineageEngine::new();
        let graph = engine.get_or_build(dir.path()).unwrap();
        let result = query_lineage(&graph, "SUMMARY", Direction::Downstream, 2, OutputFormat::Text).unwrap();
        assert_eq!(result.root, "ANALYTICS.REPORTING.SUMMARY");
        assert!(result.rendered.is_some());
    }

    #[test]
    fn unknown_object_reports_not_found_with_suggestions() {
        let dir = tempfile::tempdir().unwrap();
        seed_catalog(dir.path());
        let engine = LineageEngine::new();
        let graph = engine.get_or_build(dir.path()).unwrap();
        let result = query_lineage(&graph, "SUMRY", Direction::Both, 1, OutputFormat::Json);
        assert!(matches!(result, Err(ApiError::NotFound { .. })));
    }
}
