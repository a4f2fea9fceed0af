//! Graph construction and the `(catalog_dir, last_build)`-keyed cache
//! (spec §4.10). Reference extraction is regex-based, the same pragmatic
//! choice the safety gate makes for injection detection rather than
//! threading through `sqlparser`'s AST shape for every dialect quirk.

use super::{EdgeKind, LineageEdge, LineageGraph, LineageNode};
use crate::catalog::{store, CatalogEntry, ObjectRef};
use crate::utils::{ApiError, ApiResult};
use dashmap::DashMap;
use petgraph::graph::{DiGraph, NodeIndex};
use regex::Regex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

fn reference_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?i)\b(?:from|join)\s+([A-Za-z_][\w$]*(?:\s*\.\s*[A-Za-z_][\w$]*){0,2})").expect("static regex is valid")
    })
}

fn extract_referenced_names(sql: &str) -> Vec<String> {
    reference_pattern()
        .captures_iter(sql)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().split_whitespace().collect::<String>().to_ascii_uppercase())
        .collect()
}

/// The traversable form of a `LineageGraph`: a `petgraph` digraph plus an
/// fqn index, shared immutably once built (spec §5: "readers take a
/// reference; replacement on catalog refresh swaps the reference
/// atomically").
pub struct BuiltGraph {
    pub graph: DiGraph<LineageNode, LineageEdge>,
    pub index_by_fqn: HashMap<String, NodeIndex>,
    pub parse_failed: Vec<String>,
}

impl BuiltGraph {
    pub fn to_lineage_graph(&self) -> LineageGraph {
        LineageGraph {
            nodes: self.graph.node_weights().cloned().collect(),
            edges: self.graph.edge_weights().cloned().collect(),
            parse_failed: self.parse_failed.clone(),
        }
    }
}

struct CacheEntry {
    last_build: chrono::DateTime<chrono::Utc>,
    graph: Arc<BuiltGraph>,
}

pub struct LineageEngine {
    cache: DashMap<PathBuf, CacheEntry>,
}

impl Default for LineageEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LineageEngine {
    pub fn new() -> Self {
        Self { cache: DashMap::new() }
    }

    /// Returns the cached graph for `catalog_dir` if it is still fresh
    /// relative to the on-disk catalog's `last_build`, else rebuilds.
    pub fn get_or_build(&self, catalog_dir: &Path) -> ApiResult<Arc<BuiltGraph>> {
        let metadata = store::read_metadata(catalog_dir)
            .ok_or_else(|| ApiError::resource_unavailable("no catalog has been built yet", vec!["catalog".to_string()], vec![]))?;

        if let Some(entry) = self.cache.get(catalog_dir) {
            if entry.last_build >= metadata.last_build {
                return Ok(entry.graph.clone());
            }
        }

        let built = Arc::new(build_graph(catalog_dir)?);
        self.cache.insert(catalog_dir.to_path_buf(), CacheEntry { last_build: metadata.last_build, graph: built.clone() });
        Ok(built)
    }
}

fn build_graph(catalog_dir: &Path) -> ApiResult<BuiltGraph> {
    let entries = store::read_all_entries(catalog_dir)?;

    let mut graph = DiGraph::new();
    let mut index_by_fqn = HashMap::new();
    for entry in &entries {
        let fqn = entry.object_ref.fqn();
        let idx = graph.add_node(LineageNode { fqn: fqn.clone(), external: false });
        index_by_fqn.insert(fqn, idx);
    }

    let by_name: HashMap<String, Vec<ObjectRef>> = {
        let mut map: HashMap<String, Vec<ObjectRef>> = HashMap::new();
        for entry in &entries {
            map.entry(entry.object_ref.name.clone()).or_default().push(entry.object_ref.clone());
        }
        map
    };

    let mut parse_failed = Vec::new();

    for entry in &entries {
        if !entry.object_ref.object_kind.carries_sql() {
            continue;
        }
        let Some(sql) = &entry.ddl else { continue };
        if is_malformed(sql) {
            parse_failed.push(entry.object_ref.fqn());
            continue;
        }
        let references = extract_referenced_names(sql);
        if references.is_empty() && !sql.trim().is_empty() {
            // A SQL-carrying object whose text yielded no FROM/JOIN target
            // still parsed conceptually fine (e.g. a `SELECT 1` body); only
            // genuinely malformed text counts as parse_failed.
            continue;
        }

        for raw in references {
            match resolve_reference(&raw, &entry.object_ref, &by_name, &index_by_fqn) {
                Resolution::Resolved(fqn) => {
                    add_edge(&mut graph, &index_by_fqn, &entry.object_ref.fqn(), &fqn, 1.0);
                }
                Resolution::Ambiguous(candidates) => {
                    let confidence = 1.0 / candidates.len() as f64;
                    for candidate in candidates {
                        add_edge(&mut graph, &index_by_fqn, &entry.object_ref.fqn(), &candidate, confidence);
                    }
                }
                Resolution::Unresolved => {
                    let idx = *index_by_fqn.entry(raw.clone()).or_insert_with(|| graph.add_node(LineageNode { fqn: raw.clone(), external: true }));
                    if let Some(&from_idx) = index_by_fqn.get(&entry.object_ref.fqn()) {
                        graph.add_edge(from_idx, idx, LineageEdge { from: entry.object_ref.fqn(), to: raw, kind: EdgeKind::ReadsFrom, confidence: 1.0 });
                    }
                }
            }
        }
    }

    Ok(BuiltGraph { graph, index_by_fqn, parse_failed })
}

/// Sanity check run before reference extraction even attempts to scan a
/// DDL body: unbalanced parens or quotes mean the text was truncated or
/// corrupted in transit, not that it legitimately has no FROM/JOIN target.
fn is_malformed(sql: &str) -> bool {
    let mut depth: i32 = 0;
    let mut in_single_quote = false;
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\'' if in_single_quote && chars.peek() == Some(&'\'') => {
                chars.next();
            }
            '\'' => in_single_quote = !in_single_quote,
            '(' if !in_single_quote => depth += 1,
            ')' if !in_single_quote => depth -= 1,
            _ => {}
        }
        if depth < 0 {
            return true;
        }
    }
    depth != 0 || in_single_quote
}

fn add_edge(graph: &mut DiGraph<LineageNode, LineageEdge>, index_by_fqn: &HashMap<String, NodeIndex>, from: &str, to: &str, confidence: f64) {
    if let (Some(&from_idx), Some(&to_idx)) = (index_by_fqn.get(from), index_by_fqn.get(to)) {
        graph.add_edge(from_idx, to_idx, LineageEdge { from: from.to_string(), to: to.to_string(), kind: EdgeKind::ReadsFrom, confidence });
    }
}

enum Resolution {
    Resolved(String),
    Ambiguous(Vec<String>),
    Unresolved,
}

/// Resolution order per spec §4.10: exact canonical match, then default to
/// the referring object's database, then prefer same-schema on ambiguity.
fn resolve_reference(
    raw: &str,
    referring: &ObjectRef,
    by_name: &HashMap<String, Vec<ObjectRef>>,
    index_by_fqn: &HashMap<String, NodeIndex>,
) -> Resolution {
    let parts: Vec<&str> = raw.split('.').collect();

    match parts.len() {
        3 => {
            let candidate = format!("{}.{}.{}", parts[0], parts[1], parts[2]);
            if index_by_fqn.contains_key(&candidate) {
                Resolution::Resolved(candidate)
            } else {
                Resolution::Unresolved
            }
        }
        2 => {
            let candidate = format!("{}.{}.{}", referring.database, parts[0], parts[1]);
            if index_by_fqn.contains_key(&candidate) {
                Resolution::Resolved(candidate)
            } else {
                Resolution::Unresolved
            }
        }
        _ => {
            let name = parts[0];
            let Some(candidates) = by_name.get(name) else { return Resolution::Unresolved };
            let in_database: Vec<&ObjectRef> = candidates.iter().filter(|c| c.database == referring.database).collect();
            if in_database.is_empty() {
                return Resolution::Unresolved;
            }
            if in_database.len() == 1 {
                return Resolution::Resolved(in_database[0].fqn());
            }
            let same_schema: Vec<&&ObjectRef> = in_database.iter().filter(|c| c.schema == referring.schema).collect();
            if same_schema.len() == 1 {
                return Resolution::Resolved(same_schema[0].fqn());
            }
            Resolution::Ambiguous(in_database.iter().map(|c| c.fqn()).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ObjectKind;

    fn entry(db: &str, schema: &str, name: &str, kind: ObjectKind, ddl: Option<&str>) -> CatalogEntry {
        CatalogEntry {
            object_ref: ObjectRef::new(db, schema, name, kind),
            columns: vec![],
            ddl: ddl.map(|s| s.to_string()),
            last_ddl: None,
            owner: None,
            comment: None,
            tags: vec![],
        }
    }

    #[test]
    fn extracts_from_and_join_targets() {
        let refs = extract_referenced_names("SELECT a.x FROM orders a JOIN customers c ON a.cid = c.id");
        assert_eq!(refs, vec!["ORDERS".to_string(), "CUSTOMERS".to_string()]);
    }

    #[test]
    fn resolves_unqualified_name_within_referring_database() {
        use crate::catalog::ObjectKind;
        let referring = ObjectRef::new("analytics", "reporting", "daily_summary", ObjectKind::View);
        let orders = ObjectRef::new("analytics", "raw", "orders", ObjectKind::Table);
        let mut by_name: HashMap<String, Vec<ObjectRef>> = HashMap::new();
        by_name.insert("ORDERS".to_string(), vec![orders.clone()]);
        let mut index_by_fqn = HashMap::new();
        index_by_fqn.insert(orders.fqn(), NodeIndex::new(0));
        index_by_fqn.insert(referring.fqn(), NodeIndex::new(1));

        match resolve_reference("ORDERS", &referring, &by_name, &index_by_fqn) {
            Resolution::Resolved(fqn) => assert_eq!(fqn, "ANALYTICS.RAW.ORDERS"),
            _ => panic!("expected resolved"),
        }
    }

    #[test]
    fn builds_graph_with_external_node_for_unresolved_reference() {
        let dir = tempfile::tempdir().unwrap();
        let view = entry("ANALYTICS", "REPORTING", "SUMMARY", ObjectKind::View, Some("SELECT * FROM untracked_source"));
        crate::catalog::store::write_jsonl(dir.path(), ObjectKind::View, &[view]).unwrap();
        crate::catalog::store::write_metadata(
            dir.path(),
            &crate::catalog::CatalogMetadata {
                last_build: chrono::Utc::now(),
                last_full_refresh: chrono::Utc::now(),
                databases: vec!["ANALYTICS".to_string()],
                total_objects: 1,
                version: 1,
                schema_count: 1,
                table_count: 0,
            },
        )
        .unwrap();

        let built = build_graph(dir.path()).unwrap();
        assert!(built.index_by_fqn.contains_key("UNTRACKED_SOURCE"));
        let node = &built.graph[built.index_by_fqn["UNTRACKED_SOURCE"]];
        assert!(node.external);
    }

    #[test]
    fn malformed_ddl_is_recorded_as_parse_failed_without_halting_the_build() {
        let dir = tempfile::tempdir().unwrap();
        let broken = entry("ANALYTICS", "REPORTING", "BROKEN", ObjectKind::View, Some("SELECT * FROM (orders"));
        let fine = entry("ANALYTICS", "RAW", "ORDERS", ObjectKind::Table, None);
        crate::catalog::store::write_jsonl(dir.path(), ObjectKind::View, &[broken]).unwrap();
        crate::catalog::store::write_jsonl(dir.path(), ObjectKind::Table, &[fine]).unwrap();
        crate::catalog::store::write_metadata(
            dir.path(),
            &crate::catalog::CatalogMetadata {
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

        let built = build_graph(dir.path()).unwrap();
        assert_eq!(built.parse_failed, vec!["ANALYTICS.REPORTING.BROKEN".to_string()]);
    }

    #[test]
    fn balanced_parens_and_quotes_are_not_malformed() {
        assert!(!is_malformed("SELECT * FROM orders WHERE name = 'it''s fine' AND (a OR b)"));
        assert!(is_malformed("SELECT * FROM (orders"));
        assert!(is_malformed("SELECT * FROM orders WHERE name = 'unterminated"));
        assert!(is_malformed("SELECT * FROM orders)"));
    }
}
