//! Dependency Graph Analysis
//!
//! Cycle detection, path finding, impact analysis and aggregate statistics.
//! All queries are read-only and deterministic: neighbours are visited in
//! id order.

use petgraph::algo::{condensation, toposort};
use petgraph::graph::NodeIndex;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;

use super::{DependencyGraph, NodeId, NodeKind};
use crate::conflict::Conflict;

// =============================================================================
// Impact
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ImpactLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl ImpactLevel {
    /// 0-5 low, 6-15 medium, 16-30 high, above that critical
    pub fn from_affected(count: usize) -> Self {
        match count {
            0..=5 => Self::Low,
            6..=15 => Self::Medium,
            16..=30 => Self::High,
            _ => Self::Critical,
        }
    }
}

impl fmt::Display for ImpactLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Medium => write!(f, "MEDIUM"),
            Self::High => write!(f, "HIGH"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// What changing one element would affect
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImpactAnalysis {
    pub element: NodeId,
    /// Nodes with an edge straight into `element`
    pub direct_dependents: BTreeSet<NodeId>,
    pub transitive_dependents: BTreeSet<NodeId>,
    pub total_affected: usize,
    pub impact_level: ImpactLevel,
    /// One example path per transitive dependent, dependent first
    pub impact_paths: BTreeMap<NodeId, Vec<NodeId>>,
}

impl ImpactAnalysis {
    pub fn summary(&self) -> String {
        format!(
            "Impact analysis for {}: {} impact, {} direct and {} transitive dependent(s)",
            self.element,
            self.impact_level,
            self.direct_dependents.len(),
            self.transitive_dependents.len()
        )
    }
}

// =============================================================================
// Statistics
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependencyStatistics {
    pub total_nodes: usize,
    pub total_edges: usize,
    /// Nodes that depend on nothing
    pub leaf_nodes: usize,
    /// Nodes nothing depends on
    pub root_nodes: usize,
    /// Longest dependency chain, cycles collapsed
    pub max_depth: usize,
    pub average_depth: f64,
    pub nodes_by_kind: BTreeMap<NodeKind, usize>,
    pub circular_dependencies: usize,
}

impl fmt::Display for DependencyStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} nodes, {} edges, {} leaves, {} roots, max depth {}, avg depth {:.2}, {} cycle(s)",
            self.total_nodes,
            self.total_edges,
            self.leaf_nodes,
            self.root_nodes,
            self.max_depth,
            self.average_depth,
            self.circular_dependencies
        )
    }
}

// =============================================================================
// Queries
// =============================================================================

impl DependencyGraph {
    fn sorted_indices(&self) -> Vec<NodeIndex> {
        let mut ids: Vec<(&NodeId, NodeIndex)> = self.node_indices.iter().map(|(id, idx)| (id, *idx)).collect();
        ids.sort();
        ids.into_iter().map(|(_, idx)| idx).collect()
    }

    /// Successors in descending id order, so popping yields ascending
    fn successors_desc(&self, idx: NodeIndex) -> Vec<NodeIndex> {
        let mut next: Vec<NodeIndex> = self.graph.neighbors_directed(idx, Direction::Outgoing).collect();
        next.sort_by(|a, b| self.graph[*b].cmp(&self.graph[*a]));
        next.dedup();
        next
    }

    /// Every cycle reachable by a depth-first scan, as closed paths
    /// (`[A, B, A]`); a self-reference is reported as `[A, A]`
    pub fn detect_circular_dependencies(&self) -> Vec<Vec<NodeId>> {
        let mut cycles = Vec::new();
        let mut visited: HashSet<NodeIndex> = HashSet::new();
        let mut on_stack: HashSet<NodeIndex> = HashSet::new();

        for start in self.sorted_indices() {
            if !visited.insert(start) {
                continue;
            }
            on_stack.insert(start);
            let mut path: Vec<NodeIndex> = vec![start];
            let mut frames: Vec<Vec<NodeIndex>> = vec![self.successors_desc(start)];

            loop {
                let Some(pending) = frames.last_mut() else { break };
                match pending.pop() {
                    Some(next) if on_stack.contains(&next) => {
                        let pos = path.iter().position(|n| *n == next).unwrap_or(0);
                        let mut cycle: Vec<NodeId> = path[pos..].iter().map(|n| self.graph[*n].clone()).collect();
                        cycle.push(self.graph[next].clone());
                        cycles.push(cycle);
                    }
                    Some(next) => {
                        if visited.insert(next) {
                            on_stack.insert(next);
                            path.push(next);
                            frames.push(self.successors_desc(next));
                        }
                    }
                    None => {
                        frames.pop();
                        if let Some(done) = path.pop() {
                            on_stack.remove(&done);
                        }
                    }
                }
            }
        }

        for id in self.self_references() {
            cycles.push(vec![id.clone(), id.clone()]);
        }

        cycles
    }

    /// First path found from `from` to `to` (both ends included), or empty
    pub fn find_dependency_path(&self, from: &str, to: &str) -> Vec<NodeId> {
        let (Some(&start), Some(&goal)) = (self.node_indices.get(from), self.node_indices.get(to)) else {
            return Vec::new();
        };
        if start == goal {
            return vec![from.to_string()];
        }

        let mut visited: HashSet<NodeIndex> = HashSet::from([start]);
        let mut path: Vec<NodeIndex> = vec![start];
        let mut frames: Vec<Vec<NodeIndex>> = vec![self.successors_desc(start)];

        loop {
            let Some(pending) = frames.last_mut() else { break };
            match pending.pop() {
                Some(next) if next == goal => {
                    path.push(next);
                    return path.iter().map(|n| self.graph[*n].clone()).collect();
                }
                Some(next) => {
                    if visited.insert(next) {
                        path.push(next);
                        frames.push(self.successors_desc(next));
                    }
                }
                None => {
                    frames.pop();
                    path.pop();
                }
            }
        }

        Vec::new()
    }

    pub fn impact_analysis(&self, id: &str) -> ImpactAnalysis {
        let dependents = self.all_dependents(id);
        let direct: BTreeSet<NodeId> = self.refs_in(id).into_iter().cloned().collect();
        let transitive: BTreeSet<NodeId> = dependents.difference(&direct).cloned().collect();

        let impact_paths = transitive
            .iter()
            .map(|dependent| (dependent.clone(), self.find_dependency_path(dependent, id)))
            .filter(|(_, path)| !path.is_empty())
            .collect();

        ImpactAnalysis {
            element: id.to_string(),
            total_affected: dependents.len(),
            impact_level: ImpactLevel::from_affected(dependents.len()),
            direct_dependents: direct,
            transitive_dependents: transitive,
            impact_paths,
        }
    }

    pub fn statistics(&self) -> DependencyStatistics {
        let total_nodes = self.node_count();
        let mut stats = DependencyStatistics {
            total_nodes,
            total_edges: self.edge_count(),
            circular_dependencies: self.detect_circular_dependencies().len(),
            ..Default::default()
        };

        for node in self.nodes.values() {
            *stats.nodes_by_kind.entry(node.kind).or_default() += 1;
        }

        for idx in self.graph.node_indices() {
            if self.graph.neighbors_directed(idx, Direction::Outgoing).next().is_none() {
                stats.leaf_nodes += 1;
            }
            if self.graph.neighbors_directed(idx, Direction::Incoming).next().is_none() {
                stats.root_nodes += 1;
            }
        }

        if total_nodes > 0 {
            let depths = self.depths();
            stats.max_depth = depths.values().copied().max().unwrap_or(0);
            stats.average_depth = depths.values().sum::<usize>() as f64 / total_nodes as f64;
        }

        stats
    }

    /// Longest outgoing chain per node over the condensed (acyclic) graph
    fn depths(&self) -> HashMap<NodeId, usize> {
        let condensed = condensation(self.graph.clone(), true);
        let order = toposort(&condensed, None).unwrap_or_default();

        let mut depth: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in order.into_iter().rev() {
            let d = condensed
                .neighbors_directed(idx, Direction::Outgoing)
                .map(|succ| depth.get(&succ).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depth.insert(idx, d);
        }

        let mut result = HashMap::new();
        for idx in condensed.node_indices() {
            let d = depth.get(&idx).copied().unwrap_or(0);
            for id in &condensed[idx] {
                result.insert(id.clone(), d);
            }
        }
        result
    }

    // ========== Reporting ==========

    /// One CircularReference conflict per detected cycle
    pub fn cycle_conflicts(&self) -> Vec<Conflict> {
        self.detect_circular_dependencies()
            .into_iter()
            .map(|cycle| {
                let namespace = cycle
                    .first()
                    .and_then(|id| self.get(id))
                    .map(|n| n.namespace.clone())
                    .unwrap_or_default();
                let files: BTreeSet<String> = cycle
                    .iter()
                    .filter_map(|id| self.get(id))
                    .map(|n| n.source_file.clone())
                    .collect();
                Conflict::circular_reference(&namespace, &cycle, files.into_iter().collect())
            })
            .collect()
    }

    /// One MissingReference conflict per unresolved reference
    pub fn missing_reference_conflicts(&self) -> Vec<Conflict> {
        self.unresolved
            .iter()
            .map(|r| {
                Conflict::missing_reference(
                    &r.namespace,
                    &r.from,
                    &r.target,
                    Some(r.source_file.clone()),
                    r.suggestion.as_deref(),
                )
            })
            .collect()
    }
}
