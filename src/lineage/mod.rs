//! Lineage Engine (C10): a directed graph over catalog objects built by
//! scanning the SQL text each object carries (spec §3 "LineageGraph",
//! §4.10).

pub mod engine;
pub mod query;

pub use engine::LineageEngine;

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    ReadsFrom,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineageEdge {
    pub from: String,
    pub to: String,
    pub kind: EdgeKind,
    pub confidence: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct LineageNode {
    pub fqn: String,
    pub external: bool,
}

/// A built graph plus the bookkeeping spec §4.10 asks the build to surface
/// (`parse_failed` counts rather than aborting construction).
#[derive(Debug, Clone, Serialize)]
pub struct LineageGraph {
    pub nodes: Vec<LineageNode>,
    pub edges: Vec<LineageEdge>,
    pub parse_failed: Vec<String>,
}

impl LineageGraph {
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
