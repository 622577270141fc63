//! Schema Dependency Graph
//!
//! Directed graph of element-to-element references built over petgraph.
//! Every top-level element is a node; every dependency-bearing part of an
//! element (property, navigation property, parameter, return type, base-type
//! slot, key reference) gets its own sub-node hanging off its owner:
//!
//! ```text
//! NS.Order ──contains──▶ NS.Order.Customer ──navigation──▶ NS.Customer
//! ```
//!
//! A graph is owned by one validation run. It is built once by
//! [`GraphBuilder`] and then only queried.

pub mod analysis;
pub mod builder;

pub use analysis::{DependencyStatistics, ImpactAnalysis, ImpactLevel};
pub use builder::{GraphBuilder, TypeRefParser};

use petgraph::algo::{kosaraju_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::Direction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::error::Result;
use crate::schema::SchemaElements;

/// FQN of an element, or FQN plus sub-path for sub-nodes
pub type NodeId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    EntityType,
    ComplexType,
    EnumType,
    TypeDefinition,
    EntityContainer,
    EntitySet,
    Singleton,
    ActionImport,
    FunctionImport,
    Action,
    Function,
    Term,
    Property,
    NavigationProperty,
    Parameter,
    ReturnType,
    BaseType,
    Key,
}

impl NodeKind {
    /// Sub-nodes belong to an owning element
    pub fn is_sub_node(&self) -> bool {
        matches!(
            self,
            Self::Property
                | Self::NavigationProperty
                | Self::Parameter
                | Self::ReturnType
                | Self::BaseType
                | Self::Key
        )
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Edge type in the dependency graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EdgeKind {
    /// Owner to its sub-node
    Contains,
    Property,
    Navigation,
    Parameter,
    ReturnType,
    BaseType,
    Key,
    EntitySetType,
    ImportTarget,
    TermType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyNode {
    pub id: NodeId,
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<NodeId>,
    pub namespace: String,
    pub source_file: String,
}

/// A non-primitive type reference with no matching node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedReference {
    pub from: NodeId,
    pub target: String,
    pub namespace: String,
    pub source_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// A type reference that could not be parsed at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub from: NodeId,
    pub reference: String,
    pub reason: String,
    pub source_file: String,
}

/// The element dependency graph
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Edges point from dependent to dependency
    pub(crate) graph: DiGraph<NodeId, EdgeKind>,

    pub(crate) nodes: HashMap<NodeId, DependencyNode>,

    /// Node index lookup: id -> NodeIndex
    pub(crate) node_indices: HashMap<NodeId, NodeIndex>,

    /// Index: unqualified name -> top-level ids (names can collide!)
    pub(crate) by_name: HashMap<String, Vec<NodeId>>,

    /// Schema alias -> namespace
    pub(crate) aliases: HashMap<String, String>,

    /// Edges that would have pointed a node at itself
    pub(crate) self_references: Vec<(NodeId, EdgeKind)>,

    pub(crate) unresolved: Vec<UnresolvedReference>,
    pub(crate) failures: Vec<ExtractionFailure>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build with default settings (primitive prefix `Edm.`)
    pub fn build(schemas: &[(String, Arc<SchemaElements>)]) -> Result<Self> {
        Ok(GraphBuilder::new()?.build(schemas))
    }

    // ========== Construction ==========

    /// Add a node unless one with the same id exists; true when added
    pub(crate) fn add_node(&mut self, node: DependencyNode) -> bool {
        if self.nodes.contains_key(&node.id) {
            return false;
        }
        let idx = self.graph.add_node(node.id.clone());
        self.node_indices.insert(node.id.clone(), idx);
        if !node.kind.is_sub_node() {
            self.by_name
                .entry(short_name(&node.id).to_string())
                .or_default()
                .push(node.id.clone());
        }
        self.nodes.insert(node.id.clone(), node);
        true
    }

    /// Add an edge with set semantics; self-edges are recorded, never added
    pub(crate) fn add_edge(&mut self, from: &str, to: &str, kind: EdgeKind) -> bool {
        if from == to {
            if !self.self_references.iter().any(|(id, _)| id == from) {
                self.self_references.push((from.to_string(), kind));
            }
            return false;
        }
        let (Some(&a), Some(&b)) = (self.node_indices.get(from), self.node_indices.get(to)) else {
            return false;
        };
        if self.graph.find_edge(a, b).is_some() {
            return false;
        }
        self.graph.add_edge(a, b, kind);
        true
    }

    // ========== Public API ==========

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&DependencyNode> {
        self.nodes.get(id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &DependencyNode> {
        self.nodes.values()
    }

    /// Resolve an id, an alias-qualified id or an unqualified element name
    pub fn resolve(&self, query: &str) -> Option<&NodeId> {
        if let Some(node) = self.nodes.get(query) {
            return Some(&node.id);
        }
        if let Some((alias, rest)) = query.split_once('.') {
            if let Some(namespace) = self.aliases.get(alias) {
                if let Some(node) = self.nodes.get(&format!("{}.{}", namespace, rest)) {
                    return Some(&node.id);
                }
            }
        }
        if let Some(ids) = self.by_name.get(query) {
            return ids.first();
        }
        let query_lower = query.to_lowercase();
        self.by_name
            .iter()
            .find(|(name, _)| name.to_lowercase() == query_lower)
            .and_then(|(_, ids)| ids.first())
    }

    pub fn unresolved_references(&self) -> &[UnresolvedReference] {
        &self.unresolved
    }

    pub fn extraction_failures(&self) -> &[ExtractionFailure] {
        &self.failures
    }

    pub fn self_references(&self) -> impl Iterator<Item = &NodeId> {
        self.self_references.iter().map(|(id, _)| id)
    }

    /// Immediate outgoing refs (dependencies), sorted
    pub fn refs_out(&self, id: &str) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Immediate incoming refs (dependents), sorted
    pub fn refs_in(&self, id: &str) -> Vec<&NodeId> {
        self.neighbors(id, Direction::Incoming)
    }

    fn neighbors(&self, id: &str, direction: Direction) -> Vec<&NodeId> {
        let Some(&node_idx) = self.node_indices.get(id) else {
            return Vec::new();
        };
        let mut ids: Vec<&NodeId> = self
            .graph
            .edges_directed(node_idx, direction)
            .filter_map(|e| {
                let other = match direction {
                    Direction::Outgoing => e.target(),
                    Direction::Incoming => e.source(),
                };
                self.graph.node_weight(other)
            })
            .collect();
        ids.sort();
        ids
    }

    /// Everything `id` transitively depends on
    pub fn all_dependencies(&self, id: &str) -> BTreeSet<NodeId> {
        self.closure(id, Direction::Outgoing)
    }

    /// Everything that transitively depends on `id`
    pub fn all_dependents(&self, id: &str) -> BTreeSet<NodeId> {
        self.closure(id, Direction::Incoming)
    }

    fn closure(&self, id: &str, direction: Direction) -> BTreeSet<NodeId> {
        let Some(&start_idx) = self.node_indices.get(id) else {
            return BTreeSet::new();
        };

        let mut result = BTreeSet::new();
        let mut visited = HashSet::new();
        let mut stack = vec![start_idx];

        while let Some(node_idx) = stack.pop() {
            if !visited.insert(node_idx) {
                continue;
            }
            if node_idx != start_idx {
                if let Some(node_id) = self.graph.node_weight(node_idx) {
                    result.insert(node_id.clone());
                }
            }
            stack.extend(self.graph.neighbors_directed(node_idx, direction));
        }

        result
    }

    /// Dependencies of `id` that themselves depend on nothing
    pub fn leaf_dependencies(&self, id: &str) -> BTreeSet<NodeId> {
        self.all_dependencies(id)
            .into_iter()
            .filter(|dep| self.refs_out(dep).is_empty())
            .collect()
    }

    /// Strongly connected components with more than one member
    pub fn scc_groups(&self) -> Vec<Vec<NodeId>> {
        let mut groups: Vec<Vec<NodeId>> = kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| scc.len() > 1)
            .map(|scc| {
                let mut ids: Vec<NodeId> = scc
                    .into_iter()
                    .filter_map(|idx| self.graph.node_weight(idx).cloned())
                    .collect();
                ids.sort();
                ids
            })
            .collect();
        groups.sort();
        groups
    }

    /// Dependencies before dependents; `None` when the graph has a cycle
    pub fn topological_order(&self) -> Option<Vec<NodeId>> {
        let order = toposort(&self.graph, None).ok()?;
        Some(
            order
                .into_iter()
                .rev()
                .filter_map(|idx| self.graph.node_weight(idx).cloned())
                .collect(),
        )
    }

    /// Export the dependency graph to GraphViz DOT format
    pub fn to_dot(&self) -> String {
        let mut output = String::new();

        output.push_str("digraph DependencyGraph {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box, style=\"filled,rounded\", fontname=\"Helvetica\", fontsize=10];\n");
        output.push_str("  edge [fontname=\"Helvetica\", fontsize=8, fontcolor=\"#808080\"];\n");
        output.push('\n');

        let mut ids: Vec<&NodeId> = self.nodes.keys().collect();
        ids.sort();

        for id in ids {
            let Some(node) = self.nodes.get(id) else { continue };
            let color = match node.kind {
                NodeKind::EntityType => "#00BCD4",
                NodeKind::ComplexType => "#4CAF50",
                NodeKind::EnumType => "#FF5722",
                NodeKind::TypeDefinition => "#607D8B",
                NodeKind::Action | NodeKind::Function => "#2196F3",
                NodeKind::Term => "#795548",
                NodeKind::EntityContainer
                | NodeKind::EntitySet
                | NodeKind::Singleton
                | NodeKind::ActionImport
                | NodeKind::FunctionImport => "#9C27B0",
                _ => "#E0E0E0",
            };
            let shape = if node.kind.is_sub_node() { ", shape=ellipse" } else { "" };
            output.push_str(&format!(
                "  \"{}\" [label=\"{}\", fillcolor=\"{}\"{}];\n",
                escape_dot(id),
                escape_dot(short_name(id)),
                color,
                shape
            ));
        }

        output.push('\n');

        let mut edges: Vec<(&NodeId, &NodeId, EdgeKind)> = self
            .graph
            .edge_references()
            .filter_map(|e| {
                let source = self.graph.node_weight(e.source())?;
                let target = self.graph.node_weight(e.target())?;
                Some((source, target, *e.weight()))
            })
            .collect();
        edges.sort_by(|a, b| (a.0, a.1).cmp(&(b.0, b.1)));

        for (source, target, kind) in edges {
            let style = match kind {
                EdgeKind::Contains => " [style=dotted]".to_string(),
                other => format!(" [label=\"{:?}\"]", other),
            };
            output.push_str(&format!(
                "  \"{}\" -> \"{}\"{};\n",
                escape_dot(source),
                escape_dot(target),
                style
            ));
        }

        output.push_str("}\n");
        output
    }
}

/// Last dotted segment, ignoring any operation signature
pub(crate) fn short_name(id: &str) -> &str {
    let base = id.split('(').next().unwrap_or(id);
    base.rsplit('.').next().unwrap_or(base)
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"")
}
