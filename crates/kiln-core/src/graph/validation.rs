//! Graph Integrity Sweeps
//!
//! Read-only whole-graph audits for the invariants the write path enforces
//! incrementally. Useful after migrations or bulk imports; the CLI `validate`
//! command exits nonzero when a sweep reports anything.

use std::collections::HashSet;

use serde::Serialize;

use super::schema::{EdgeType, Lifecycle};
use super::store::{GraphError, GraphStore};

/// What a sweep found
#[derive(Debug, Clone, Default, Serialize)]
pub struct IntegrityReport {
    /// FROZEN intents with no outgoing `APPLIES_TO` edge
    pub frozen_without_scope: Vec<String>,
    /// Intents with no outgoing `DERIVED_FROM` edge
    pub orphan_intents: Vec<String>,
    /// First cycle found among `OVERRIDES` edges, if any
    pub overrides_cycle: Vec<String>,
    /// First cycle found among `SUPERSEDED_BY` edges, if any
    pub superseded_cycle: Vec<String>,
}

impl IntegrityReport {
    /// No violations at all
    pub fn is_clean(&self) -> bool {
        self.frozen_without_scope.is_empty()
            && self.orphan_intents.is_empty()
            && self.overrides_cycle.is_empty()
            && self.superseded_cycle.is_empty()
    }
}

/// Run every sweep
pub fn run_integrity_sweep(graph: &GraphStore) -> Result<IntegrityReport, GraphError> {
    Ok(IntegrityReport {
        frozen_without_scope: frozen_without_scope(graph)?,
        orphan_intents: orphan_intents(graph)?,
        overrides_cycle: find_cycle(graph, EdgeType::Overrides)?,
        superseded_cycle: find_cycle(graph, EdgeType::SupersededBy)?,
    })
}

/// FROZEN intent ids missing their scope edge
pub fn frozen_without_scope(graph: &GraphStore) -> Result<Vec<String>, GraphError> {
    let mut violations = Vec::new();
    for intent in graph.get_all_intents()? {
        if intent.lifecycle != Lifecycle::Frozen {
            continue;
        }
        let has_scope = graph
            .get_edges_for_node(&intent.id)?
            .iter()
            .any(|e| e.edge_type == EdgeType::AppliesTo && e.source_id == intent.id);
        if !has_scope {
            violations.push(intent.id);
        }
    }
    violations.sort();
    Ok(violations)
}

/// Intent ids with no `DERIVED_FROM` provenance
pub fn orphan_intents(graph: &GraphStore) -> Result<Vec<String>, GraphError> {
    let mut violations = Vec::new();
    for intent in graph.get_all_intents()? {
        let has_source = graph
            .get_edges_for_node(&intent.id)?
            .iter()
            .any(|e| e.edge_type == EdgeType::DerivedFrom && e.source_id == intent.id);
        if !has_source {
            violations.push(intent.id);
        }
    }
    violations.sort();
    Ok(violations)
}

/// First cycle among edges of `edge_type`, as the node path around the loop
pub fn find_cycle(graph: &GraphStore, edge_type: EdgeType) -> Result<Vec<String>, GraphError> {
    let edges: Vec<(String, String)> = graph
        .get_all_edges()?
        .into_iter()
        .filter(|e| e.edge_type == edge_type)
        .map(|e| (e.source_id, e.target_id))
        .collect();

    let mut visited: HashSet<String> = HashSet::new();
    let starts: Vec<String> = edges.iter().map(|(s, _)| s.clone()).collect();

    for start in starts {
        if visited.contains(&start) {
            continue;
        }
        let mut path: Vec<String> = Vec::new();
        if let Some(cycle) = walk(&edges, &start, &mut path, &mut visited) {
            return Ok(cycle);
        }
    }
    Ok(vec![])
}

fn walk(
    edges: &[(String, String)],
    node: &str,
    path: &mut Vec<String>,
    visited: &mut HashSet<String>,
) -> Option<Vec<String>> {
    if let Some(pos) = path.iter().position(|n| n == node) {
        return Some(path[pos..].to_vec());
    }
    if !visited.insert(node.to_string()) {
        return None;
    }

    path.push(node.to_string());
    for (src, dst) in edges {
        if src == node {
            if let Some(cycle) = walk(edges, dst, path, visited) {
                return Some(cycle);
            }
        }
    }
    path.pop();
    None
}

// ============================================================================
// TESTS
// ============================================================================
