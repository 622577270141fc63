//! Dependency Graph Construction
//!
//! Two passes over the ingested schema blocks. Pass 1 creates every node and
//! collects the type references it declares; pass 2 resolves those references
//! into edges, so a property may name a type that appears later in iteration
//! order or in another file.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    DependencyGraph, DependencyNode, EdgeKind, ExtractionFailure, NodeId, NodeKind,
    UnresolvedReference,
};
use crate::config::GraphConfig;
use crate::error::{Result, ValidationError};
use crate::schema::{EntityContainer, Operation, SchemaElements, StructuredType};

// =============================================================================
// Type references
// =============================================================================

/// Parses declared type strings into element FQNs
#[derive(Debug, Clone)]
pub struct TypeRefParser {
    collection: Regex,
    qualified: Regex,
    primitive_prefix: String,
}

impl TypeRefParser {
    pub fn new(primitive_prefix: impl Into<String>) -> Result<Self> {
        Ok(Self {
            collection: Regex::new(r"^Collection\((?P<inner>.*)\)$")?,
            qualified: Regex::new(r"^[\p{L}_][\p{L}\p{Nd}_]*(?:\.[\p{L}_][\p{L}\p{Nd}_]*)*$")?,
            primitive_prefix: primitive_prefix.into(),
        })
    }

    /// Strip one `Collection(...)` wrapper
    pub fn element_type<'a>(&self, type_ref: &'a str) -> Result<&'a str> {
        let trimmed = type_ref.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::malformed_type(type_ref, "empty type reference"));
        }

        if let Some(caps) = self.collection.captures(trimmed) {
            let inner = caps.name("inner").map(|m| m.as_str().trim()).unwrap_or("");
            if inner.is_empty() {
                return Err(ValidationError::malformed_type(type_ref, "empty Collection()"));
            }
            if inner.starts_with("Collection(") {
                return Err(ValidationError::malformed_type(type_ref, "nested Collection()"));
            }
            return Ok(inner);
        }

        if trimmed.starts_with("Collection(") {
            return Err(ValidationError::malformed_type(type_ref, "unbalanced Collection("));
        }
        Ok(trimmed)
    }

    pub fn is_primitive(&self, name: &str) -> bool {
        name.starts_with(&self.primitive_prefix)
    }

    /// `Ok(None)`: primitive, no dependency. `Ok(Some)`: FQN of the target.
    /// `Err`: the reference cannot be read.
    pub fn resolve(
        &self,
        type_ref: &str,
        namespace: &str,
        aliases: &HashMap<String, String>,
    ) -> Result<Option<String>> {
        let name = self.element_type(type_ref)?;

        if self.is_primitive(name) {
            return Ok(None);
        }
        if !self.qualified.is_match(name) {
            return Err(ValidationError::malformed_type(type_ref, "not a qualified name"));
        }

        match name.split_once('.') {
            // An alias stands in for the whole namespace: `Alias.Name` only
            Some((head, rest)) if !rest.contains('.') => match aliases.get(head) {
                Some(target_ns) => Ok(Some(format!("{}.{}", target_ns, rest))),
                None => Ok(Some(name.to_string())),
            },
            Some(_) => Ok(Some(name.to_string())),
            // Unqualified: same namespace
            None => Ok(Some(format!("{}.{}", namespace, name))),
        }
    }
}

// =============================================================================
// Builder
// =============================================================================

#[derive(Debug, Clone)]
enum Target {
    /// Declared type string
    Type(String),
    /// Qualified action/function name; matches every overload
    Operation(String),
    /// Node id inside the same element
    Node(NodeId),
}

#[derive(Debug, Clone)]
struct PendingRef {
    from: NodeId,
    target: Target,
    kind: EdgeKind,
    namespace: String,
    source_file: String,
}

struct Scope<'a> {
    namespace: &'a str,
    file: &'a str,
}

/// Builds a [`DependencyGraph`] from ingested schema blocks
#[derive(Debug, Clone)]
pub struct GraphBuilder {
    parser: TypeRefParser,
    suggest_similar: bool,
}

impl GraphBuilder {
    pub fn new() -> Result<Self> {
        Self::from_config(&GraphConfig::default())
    }

    pub fn from_config(config: &GraphConfig) -> Result<Self> {
        Ok(Self {
            parser: TypeRefParser::new(config.primitive_prefix.clone())?,
            suggest_similar: config.suggest_similar,
        })
    }

    pub fn parser(&self) -> &TypeRefParser {
        &self.parser
    }

    pub fn build(&self, schemas: &[(String, Arc<SchemaElements>)]) -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        let mut pending: Vec<PendingRef> = Vec::new();
        let mut operations: HashMap<String, Vec<NodeId>> = HashMap::new();

        let aliases: HashMap<String, String> = schemas
            .iter()
            .filter_map(|(_, s)| Some((s.alias.clone()?, s.namespace.clone()?)))
            .collect();

        // Pass 1: nodes
        for (file, schema) in schemas {
            let Some(namespace) = schema.namespace.as_deref().filter(|ns| !ns.is_empty()) else {
                continue;
            };
            let scope = Scope { namespace, file };
            collect_schema(&mut graph, &mut pending, &mut operations, &scope, schema);
        }

        // Pass 2: edges
        for reference in pending {
            self.resolve_reference(&mut graph, &operations, &aliases, reference);
        }
        graph.aliases = aliases;

        debug!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            unresolved = graph.unresolved.len(),
            failures = graph.failures.len(),
            "built dependency graph"
        );

        graph
    }

    fn resolve_reference(
        &self,
        graph: &mut DependencyGraph,
        operations: &HashMap<String, Vec<NodeId>>,
        aliases: &HashMap<String, String>,
        reference: PendingRef,
    ) {
        let (raw, targets) = match &reference.target {
            Target::Node(id) => (id.clone(), Ok(Some(vec![id.clone()]))),
            Target::Type(type_ref) => (
                type_ref.clone(),
                self.parser
                    .resolve(type_ref, &reference.namespace, aliases)
                    .map(|fqn| fqn.map(|f| vec![f])),
            ),
            Target::Operation(name) => (
                name.clone(),
                self.parser
                    .resolve(name, &reference.namespace, aliases)
                    .map(|fqn| fqn.map(|f| operations.get(&f).cloned().unwrap_or_else(|| vec![f]))),
            ),
        };

        let targets = match targets {
            Ok(Some(targets)) => targets,
            Ok(None) => return,
            Err(e) => {
                warn!(from = %reference.from, reference = %raw, error = %e, "type reference extraction failed");
                graph.failures.push(ExtractionFailure {
                    from: reference.from,
                    reference: raw,
                    reason: e.to_string(),
                    source_file: reference.source_file,
                });
                return;
            }
        };

        for target in targets {
            if graph.contains(&target) {
                graph.add_edge(&reference.from, &target, reference.kind);
            } else {
                let suggestion = if self.suggest_similar {
                    suggest(graph, &target)
                } else {
                    None
                };
                graph.unresolved.push(UnresolvedReference {
                    from: reference.from.clone(),
                    target,
                    namespace: reference.namespace.clone(),
                    source_file: reference.source_file.clone(),
                    suggestion,
                });
            }
        }
    }
}

/// Closest top-level id by fuzzy score
fn suggest(graph: &DependencyGraph, target: &str) -> Option<String> {
    let matcher = SkimMatcherV2::default();
    let mut best: Option<(i64, &NodeId)> = None;

    for node in graph.nodes.values().filter(|n| !n.kind.is_sub_node()) {
        if let Some(score) = matcher.fuzzy_match(&node.id, target) {
            let better = match best {
                Some((best_score, best_id)) => score > best_score || (score == best_score && &node.id < best_id),
                None => true,
            };
            if better {
                best = Some((score, &node.id));
            }
        }
    }

    best.map(|(_, id)| id.clone())
}

fn element_node(scope: &Scope, id: &str, kind: NodeKind, parent: Option<&str>) -> DependencyNode {
    DependencyNode {
        id: id.to_string(),
        kind,
        parent_id: parent.map(str::to_string),
        namespace: scope.namespace.to_string(),
        source_file: scope.file.to_string(),
    }
}

/// `Owner.segment`; the segment leads with the member kind (`property.Name`,
/// `navigation.Name`, `baseType`)
fn sub_node_id(owner: &str, segment: &str) -> NodeId {
    format!("{}.{}", owner, segment)
}

/// Create a sub-node under `owner`, link it and queue its reference
#[allow(clippy::too_many_arguments)]
fn add_sub_node(
    graph: &mut DependencyGraph,
    pending: &mut Vec<PendingRef>,
    scope: &Scope,
    owner: &str,
    segment: &str,
    kind: NodeKind,
    target: Target,
    edge: EdgeKind,
) {
    let id = sub_node_id(owner, segment);
    // A redefinition in another file shares the sub-node and adds its references
    graph.add_node(element_node(scope, &id, kind, Some(owner)));
    graph.add_edge(owner, &id, EdgeKind::Contains);
    pending.push(PendingRef {
        from: id,
        target,
        kind: edge,
        namespace: scope.namespace.to_string(),
        source_file: scope.file.to_string(),
    });
}

fn queue(pending: &mut Vec<PendingRef>, scope: &Scope, from: &str, target: Target, kind: EdgeKind) {
    pending.push(PendingRef {
        from: from.to_string(),
        target,
        kind,
        namespace: scope.namespace.to_string(),
        source_file: scope.file.to_string(),
    });
}

fn collect_schema(
    graph: &mut DependencyGraph,
    pending: &mut Vec<PendingRef>,
    operations: &mut HashMap<String, Vec<NodeId>>,
    scope: &Scope,
    schema: &SchemaElements,
) {
    let ns = scope.namespace;

    for entity in &schema.entity_types {
        collect_structured(graph, pending, scope, entity, NodeKind::EntityType);
    }
    for complex in &schema.complex_types {
        collect_structured(graph, pending, scope, complex, NodeKind::ComplexType);
    }
    for enum_type in &schema.enum_types {
        let id = format!("{}.{}", ns, enum_type.name);
        graph.add_node(element_node(scope, &id, NodeKind::EnumType, None));
    }
    for typedef in &schema.type_definitions {
        let id = format!("{}.{}", ns, typedef.name);
        graph.add_node(element_node(scope, &id, NodeKind::TypeDefinition, None));
        queue(pending, scope, &id, Target::Type(typedef.underlying_type.clone()), EdgeKind::BaseType);
    }
    for action in &schema.actions {
        collect_operation(graph, pending, operations, scope, action, NodeKind::Action);
    }
    for function in &schema.functions {
        collect_operation(graph, pending, operations, scope, function, NodeKind::Function);
    }
    for term in &schema.terms {
        let id = format!("{}.{}", ns, term.name);
        graph.add_node(element_node(scope, &id, NodeKind::Term, None));
        queue(pending, scope, &id, Target::Type(term.type_name.clone()), EdgeKind::TermType);
        if let Some(base) = &term.base_term {
            queue(pending, scope, &id, Target::Type(base.clone()), EdgeKind::BaseType);
        }
    }
    if let Some(container) = &schema.entity_container {
        collect_container(graph, pending, scope, container);
    }
}

fn collect_structured(
    graph: &mut DependencyGraph,
    pending: &mut Vec<PendingRef>,
    scope: &Scope,
    structured: &StructuredType,
    kind: NodeKind,
) {
    let id = format!("{}.{}", scope.namespace, structured.name);
    graph.add_node(element_node(scope, &id, kind, None));

    if let Some(base) = &structured.base_type {
        add_sub_node(
            graph,
            pending,
            scope,
            &id,
            "baseType",
            NodeKind::BaseType,
            Target::Type(base.clone()),
            EdgeKind::BaseType,
        );
    }
    for property in &structured.properties {
        add_sub_node(
            graph,
            pending,
            scope,
            &id,
            &format!("property.{}", property.name),
            NodeKind::Property,
            Target::Type(property.type_name.clone()),
            EdgeKind::Property,
        );
    }
    for nav in &structured.navigation_properties {
        add_sub_node(
            graph,
            pending,
            scope,
            &id,
            &format!("navigation.{}", nav.name),
            NodeKind::NavigationProperty,
            Target::Type(nav.type_name.clone()),
            EdgeKind::Navigation,
        );
    }
    for key in &structured.key {
        let head = key.split('/').next().unwrap_or(key);
        add_sub_node(
            graph,
            pending,
            scope,
            &id,
            &format!("key.{}", key),
            NodeKind::Key,
            Target::Node(sub_node_id(&id, &format!("property.{}", head))),
            EdgeKind::Key,
        );
    }
}

fn collect_operation(
    graph: &mut DependencyGraph,
    pending: &mut Vec<PendingRef>,
    operations: &mut HashMap<String, Vec<NodeId>>,
    scope: &Scope,
    operation: &Operation,
    kind: NodeKind,
) {
    let id = format!("{}.{}", scope.namespace, operation.signature());
    if graph.add_node(element_node(scope, &id, kind, None)) {
        operations
            .entry(format!("{}.{}", scope.namespace, operation.name))
            .or_default()
            .push(id.clone());
    }

    for parameter in &operation.parameters {
        add_sub_node(
            graph,
            pending,
            scope,
            &id,
            &format!("parameter.{}", parameter.name),
            NodeKind::Parameter,
            Target::Type(parameter.type_name.clone()),
            EdgeKind::Parameter,
        );
    }
    if let Some(ret) = &operation.return_type {
        add_sub_node(
            graph,
            pending,
            scope,
            &id,
            "returnType",
            NodeKind::ReturnType,
            Target::Type(ret.type_name.clone()),
            EdgeKind::ReturnType,
        );
    }
}

fn collect_container(
    graph: &mut DependencyGraph,
    pending: &mut Vec<PendingRef>,
    scope: &Scope,
    container: &EntityContainer,
) {
    let id = format!("{}.{}", scope.namespace, container.name);
    graph.add_node(element_node(scope, &id, NodeKind::EntityContainer, None));

    if let Some(extends) = &container.extends {
        queue(pending, scope, &id, Target::Type(extends.clone()), EdgeKind::BaseType);
    }

    let mut child = |segment: String, kind: NodeKind, target: Target, edge: EdgeKind| {
        add_sub_node(graph, pending, scope, &id, &segment, kind, target, edge);
    };

    for set in &container.entity_sets {
        child(
            format!("entitySet.{}", set.name),
            NodeKind::EntitySet,
            Target::Type(set.entity_type.clone()),
            EdgeKind::EntitySetType,
        );
    }
    for singleton in &container.singletons {
        child(
            format!("singleton.{}", singleton.name),
            NodeKind::Singleton,
            Target::Type(singleton.type_name.clone()),
            EdgeKind::EntitySetType,
        );
    }
    for import in &container.action_imports {
        child(
            format!("actionImport.{}", import.name),
            NodeKind::ActionImport,
            Target::Operation(import.action.clone()),
            EdgeKind::ImportTarget,
        );
    }
    for import in &container.function_imports {
        child(
            format!("functionImport.{}", import.name),
            NodeKind::FunctionImport,
            Target::Operation(import.function.clone()),
            EdgeKind::ImportTarget,
        );
    }
}
