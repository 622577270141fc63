//! Cross-file Conflict Detection
//!
//! Read-only passes over a populated [`SchemaRegistry`]. Each pass is
//! independent of the others and yields conflicts in key order, so the same
//! registry always produces the same list.

pub mod report;

pub use report::ConflictDetectionReport;

use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::debug;

use crate::config::ConflictConfig;
use crate::registry::{ElementRecord, SchemaInfo, SchemaRegistry};
use crate::schema::ElementDefinition;

// =============================================================================
// Conflict Types
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConflictType {
    DuplicateElement,
    DuplicateNamespaceSchema,
    IncompatibleDefinition,
    AnnotationConflict,
    CircularReference,
    MissingReference,
    AliasConflict,
}

impl ConflictType {
    pub const ALL: [ConflictType; 7] = [
        Self::DuplicateElement,
        Self::DuplicateNamespaceSchema,
        Self::IncompatibleDefinition,
        Self::AnnotationConflict,
        Self::CircularReference,
        Self::MissingReference,
        Self::AliasConflict,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DuplicateElement => "C001",
            Self::DuplicateNamespaceSchema => "C002",
            Self::IncompatibleDefinition => "C003",
            Self::AnnotationConflict => "C004",
            Self::AliasConflict => "C005",
            Self::CircularReference => "W001",
            Self::MissingReference => "W002",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::DuplicateElement => "DUPLICATE_ELEMENT",
            Self::DuplicateNamespaceSchema => "DUPLICATE_NAMESPACE_SCHEMA",
            Self::IncompatibleDefinition => "INCOMPATIBLE_DEFINITION",
            Self::AnnotationConflict => "ANNOTATION_CONFLICT",
            Self::CircularReference => "CIRCULAR_REFERENCE",
            Self::MissingReference => "MISSING_REFERENCE",
            Self::AliasConflict => "ALIAS_CONFLICT",
        }
    }

    /// Reference-graph problems are warnings, everything else is an error
    pub fn severity(&self) -> Severity {
        match self {
            Self::DuplicateElement
            | Self::DuplicateNamespaceSchema
            | Self::IncompatibleDefinition
            | Self::AnnotationConflict
            | Self::AliasConflict => Severity::Error,

            Self::CircularReference | Self::MissingReference => Severity::Warning,
        }
    }
}

impl fmt::Display for ConflictType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Warning,
    Error,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Warning => write!(f, "warning"),
            Self::Error => write!(f, "error"),
        }
    }
}

// =============================================================================
// Conflict
// =============================================================================

/// A single cross-file problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub namespace: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub element_name: Option<String>,
    pub files: Vec<String>,
    pub description: String,
    pub details: String,
}

impl Conflict {
    pub fn duplicate_element(namespace: &str, element: &str, files: Vec<String>) -> Self {
        Self {
            conflict_type: ConflictType::DuplicateElement,
            namespace: namespace.to_string(),
            element_name: Some(element.to_string()),
            description: format!(
                "Element '{}' is defined multiple times in namespace '{}'",
                element, namespace
            ),
            details: format!("Found in files: {}", files.join(", ")),
            files,
        }
    }

    pub fn duplicate_namespace_schema(namespace: &str, files: Vec<String>) -> Self {
        Self {
            conflict_type: ConflictType::DuplicateNamespaceSchema,
            namespace: namespace.to_string(),
            element_name: None,
            description: format!("Namespace '{}' schema is defined in multiple files", namespace),
            details: format!("Complete schema definitions found in: {}", files.join(", ")),
            files,
        }
    }

    pub fn incompatible_definition(
        namespace: &str,
        element: &str,
        files: Vec<String>,
        details: String,
    ) -> Self {
        Self {
            conflict_type: ConflictType::IncompatibleDefinition,
            namespace: namespace.to_string(),
            element_name: Some(element.to_string()),
            description: format!(
                "Incompatible definitions for element '{}' in namespace '{}'",
                element, namespace
            ),
            details,
            files,
        }
    }

    pub fn annotation_conflict(
        namespace: &str,
        element: &str,
        term: &str,
        values: &[(String, String)],
    ) -> Self {
        let files: BTreeSet<String> = values.iter().map(|(_, file)| file.clone()).collect();
        let rendered: Vec<String> = values
            .iter()
            .map(|(value, file)| format!("'{}' in {}", value, file))
            .collect();
        Self {
            conflict_type: ConflictType::AnnotationConflict,
            namespace: namespace.to_string(),
            element_name: Some(element.to_string()),
            description: format!(
                "Conflicting annotation values for term '{}' on element '{}' in namespace '{}'",
                term, element, namespace
            ),
            details: format!("Values: {}", rendered.join(", ")),
            files: files.into_iter().collect(),
        }
    }

    /// `cycle` is the closed path, first id repeated at the end
    pub fn circular_reference(namespace: &str, cycle: &[String], files: Vec<String>) -> Self {
        let path = cycle.join(" -> ");
        Self {
            conflict_type: ConflictType::CircularReference,
            namespace: namespace.to_string(),
            element_name: cycle.first().cloned(),
            description: format!("Circular reference detected: {}", path),
            details: format!("Cycle of {} element(s): {}", cycle.len().saturating_sub(1), path),
            files,
        }
    }

    pub fn missing_reference(
        namespace: &str,
        source: &str,
        target: &str,
        file: Option<String>,
        suggestion: Option<&str>,
    ) -> Self {
        let mut details = format!("'{}' references '{}', which is not defined in any file", source, target);
        if let Some(s) = suggestion {
            details.push_str(&format!(" (did you mean '{}'?)", s));
        }
        Self {
            conflict_type: ConflictType::MissingReference,
            namespace: namespace.to_string(),
            element_name: Some(source.to_string()),
            description: format!("Missing reference to '{}' from '{}'", target, source),
            details,
            files: file.into_iter().collect(),
        }
    }

    pub fn alias_conflict(alias: &str, users: &[&SchemaInfo]) -> Self {
        let rendered: Vec<String> = users
            .iter()
            .map(|info| format!("namespace '{}' (in {})", info.namespace, info.source_file))
            .collect();
        let description = if rendered.len() == 2 {
            format!(
                "Cross-namespace alias conflict: Alias '{}' is used for both {} and {}",
                alias, rendered[0], rendered[1]
            )
        } else {
            format!(
                "Cross-namespace alias conflict: Alias '{}' is used for {}",
                alias,
                rendered.join(", ")
            )
        };
        let namespaces: BTreeSet<&str> = users.iter().map(|i| i.namespace.as_str()).collect();
        let files: BTreeSet<String> = users.iter().map(|i| i.source_file.clone()).collect();

        Self {
            conflict_type: ConflictType::AliasConflict,
            namespace: namespaces.iter().next().map(|s| s.to_string()).unwrap_or_default(),
            element_name: None,
            description,
            details: format!(
                "Alias '{}' maps to namespaces: {}",
                alias,
                namespaces.into_iter().collect::<Vec<_>>().join(", ")
            ),
            files: files.into_iter().collect(),
        }
    }

    pub fn severity(&self) -> Severity {
        self.conflict_type.severity()
    }
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.conflict_type.as_str(), self.conflict_type, self.description)?;
        if !self.details.is_empty() {
            write!(f, "\n  - {}", self.details)?;
        }
        Ok(())
    }
}

// =============================================================================
// Detector
// =============================================================================

/// How two same-kind bodies of one element are compared
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DefinitionPolicy {
    /// Incompatible only when kinds or serialized bodies differ
    #[default]
    Structural,
    /// Every independently authored redefinition is incompatible
    Conservative,
}

#[derive(Debug, Clone)]
pub struct ConflictDetector {
    policy: DefinitionPolicy,
    annotations: bool,
}

impl Default for ConflictDetector {
    fn default() -> Self {
        Self::new(DefinitionPolicy::default())
    }
}

impl ConflictDetector {
    pub fn new(policy: DefinitionPolicy) -> Self {
        Self {
            policy,
            annotations: true,
        }
    }

    pub fn from_config(config: &ConflictConfig) -> Self {
        Self {
            policy: config.definition_policy,
            annotations: config.detect_annotation_conflicts,
        }
    }

    pub fn policy(&self) -> DefinitionPolicy {
        self.policy
    }

    /// Run every element and namespace pass
    pub fn detect(&self, registry: &SchemaRegistry) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        conflicts.extend(self.detect_duplicate_namespaces(registry));
        conflicts.extend(self.detect_duplicate_elements(registry));
        conflicts.extend(self.detect_incompatible_definitions(registry));
        if self.annotations {
            conflicts.extend(self.detect_annotation_conflicts(registry));
        }
        debug!(count = conflicts.len(), "conflict detection finished");
        conflicts
    }

    pub fn detect_duplicate_namespaces(&self, registry: &SchemaRegistry) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for namespace in registry.namespaces() {
            let complete_files: BTreeSet<String> = registry
                .schema_infos(namespace)
                .iter()
                .filter(|info| info.complete)
                .map(|info| info.source_file.clone())
                .collect();

            if complete_files.len() > 1 {
                conflicts.push(Conflict::duplicate_namespace_schema(
                    namespace,
                    complete_files.into_iter().collect(),
                ));
            }
        }
        conflicts
    }

    pub fn detect_duplicate_elements(&self, registry: &SchemaRegistry) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for (key, records) in registry.elements() {
            let files = distinct_files(records);
            if files.len() < 2 {
                continue;
            }
            if distinct_bodies(records).len() < 2 {
                continue;
            }
            conflicts.push(Conflict::duplicate_element(&key.namespace, &key.name, files));
        }
        conflicts
    }

    pub fn detect_incompatible_definitions(&self, registry: &SchemaRegistry) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for (key, records) in registry.elements() {
            let files = distinct_files(records);
            if files.len() < 2 {
                continue;
            }
            let bodies = distinct_bodies(records);
            if bodies.len() < 2 {
                continue;
            }

            let kinds: BTreeSet<_> = records.iter().map(|r| r.kind).collect();
            let incompatible = kinds.len() > 1
                || match self.policy {
                    DefinitionPolicy::Conservative => true,
                    DefinitionPolicy::Structural => {
                        let prints: BTreeSet<_> = bodies.iter().map(|r| r.definition.fingerprint()).collect();
                        prints.len() > 1
                    }
                };

            if incompatible {
                let details = incompatibility_details(&bodies, kinds.len() > 1);
                conflicts.push(Conflict::incompatible_definition(
                    &key.namespace,
                    &key.name,
                    files,
                    details,
                ));
            }
        }
        conflicts
    }

    pub fn detect_annotation_conflicts(&self, registry: &SchemaRegistry) -> Vec<Conflict> {
        let mut conflicts = Vec::new();
        for (key, records) in registry.annotations() {
            let distinct: BTreeSet<&str> = records.iter().map(|r| r.value.as_str()).collect();
            if distinct.len() < 2 {
                continue;
            }
            let mut values: Vec<(String, String)> = records
                .iter()
                .map(|r| (r.value.clone(), r.source_file.clone()))
                .collect();
            values.dedup();
            conflicts.push(Conflict::annotation_conflict(
                &key.namespace,
                &key.element,
                &key.term,
                &values,
            ));
        }
        conflicts
    }

    /// One conflict per alias shared by two or more namespaces
    pub fn detect_alias_conflicts(&self, registry: &SchemaRegistry) -> Vec<Conflict> {
        let mut by_alias: BTreeMap<&str, Vec<&SchemaInfo>> = BTreeMap::new();
        for info in registry.all_schema_infos() {
            if let Some(alias) = info.alias.as_deref().filter(|a| !a.is_empty()) {
                by_alias.entry(alias).or_default().push(info);
            }
        }

        let mut conflicts = Vec::new();
        for (alias, infos) in by_alias {
            // First user per namespace
            let mut seen = BTreeSet::new();
            let users: Vec<&SchemaInfo> = infos
                .into_iter()
                .filter(|info| seen.insert(info.namespace.as_str()))
                .collect();
            if users.len() > 1 {
                conflicts.push(Conflict::alias_conflict(alias, &users));
            }
        }
        conflicts
    }

    /// All passes, alias conflicts included
    pub fn generate_report(&self, registry: &SchemaRegistry) -> ConflictDetectionReport {
        let mut conflicts = self.detect(registry);
        conflicts.extend(self.detect_alias_conflicts(registry));
        ConflictDetectionReport::new(conflicts)
    }
}

fn distinct_files(records: &[ElementRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.source_file.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// First record for each distinct definition object
fn distinct_bodies(records: &[ElementRecord]) -> Vec<&ElementRecord> {
    let mut bodies: Vec<&ElementRecord> = Vec::new();
    for record in records {
        if !bodies.iter().any(|b| b.definition.ptr_eq(&record.definition)) {
            bodies.push(record);
        }
    }
    bodies
}

fn incompatibility_details(bodies: &[&ElementRecord], kinds_differ: bool) -> String {
    let pairs: Vec<String> = bodies
        .iter()
        .map(|r| {
            if kinds_differ {
                format!("{} in {}", r.kind, r.source_file)
            } else {
                format!("{} in {} [{}]", r.kind, r.source_file, r.definition.fingerprint().short())
            }
        })
        .collect();
    let mut details = format!("Incompatible definitions found: {}", pairs.join(", "));

    if let [a, b] = bodies {
        if !kinds_differ {
            let diff = render_diff(&a.definition, &b.definition);
            if !diff.is_empty() {
                details.push('\n');
                details.push_str(&diff);
            }
        }
    }
    details
}

fn render_diff(old: &ElementDefinition, new: &ElementDefinition) -> String {
    let old_text = old.canonical_json();
    let new_text = new.canonical_json();
    let diff = TextDiff::from_lines(&old_text, &new_text);

    let mut out = String::new();
    for change in diff.iter_all_changes() {
        let sign = match change.tag() {
            ChangeTag::Delete => "-",
            ChangeTag::Insert => "+",
            ChangeTag::Equal => continue,
        };
        out.push_str(sign);
        out.push_str(change.value().trim_end());
        out.push('\n');
    }
    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Annotation, SchemaElements, StructuredType};
    use std::sync::Arc;

    fn with_entity(ns: &str, entity: StructuredType) -> SchemaElements {
        let mut schema = SchemaElements::new(ns);
        schema.entity_types.push(Arc::new(entity));
        schema
    }

    #[test]
    fn test_conflict_type_severity() {
        assert_eq!(ConflictType::DuplicateElement.severity(), Severity::Error);
        assert_eq!(ConflictType::AliasConflict.severity(), Severity::Error);
        assert_eq!(ConflictType::CircularReference.severity(), Severity::Warning);
        assert_eq!(ConflictType::MissingReference.severity(), Severity::Warning);
    }

    #[test]
    fn test_shared_definition_is_not_a_duplicate() {
        let shared = Arc::new(StructuredType::new("Customer").with_property("Id", "Edm.Int32"));
        let mut a = SchemaElements::new("NS");
        a.entity_types.push(Arc::clone(&shared));
        let mut b = SchemaElements::new("NS.Ext");
        b.entity_types.push(Arc::new(StructuredType::new("Other")));
        let mut c = SchemaElements::new("NS");
        c.entity_types.push(shared);

        let mut registry = SchemaRegistry::new();
        registry.ingest(a, "a.xml");
        registry.ingest(b, "b.xml");
        registry.ingest(c, "c.xml");

        let detector = ConflictDetector::default();
        assert!(detector.detect_duplicate_elements(&registry).is_empty());
        assert!(detector.detect_incompatible_definitions(&registry).is_empty());
    }

    #[test]
    fn test_same_file_redefinition_is_not_cross_file() {
        let mut schema = with_entity("NS", StructuredType::new("Customer"));
        schema.entity_types.push(Arc::new(StructuredType::new("Customer").with_key("Id")));

        let mut registry = SchemaRegistry::new();
        registry.ingest(schema, "one.xml");

        assert!(ConflictDetector::default().detect(&registry).is_empty());
    }

    #[test]
    fn test_structural_policy_ignores_identical_bodies() {
        let mut registry = SchemaRegistry::new();
        registry.ingest(with_entity("NS", StructuredType::new("Customer").with_key("Id")), "a.xml");
        registry.ingest(with_entity("NS", StructuredType::new("Customer").with_key("Id")), "b.xml");

        let structural = ConflictDetector::new(DefinitionPolicy::Structural);
        assert_eq!(structural.detect_duplicate_elements(&registry).len(), 1);
        assert!(structural.detect_incompatible_definitions(&registry).is_empty());

        let conservative = ConflictDetector::new(DefinitionPolicy::Conservative);
        assert_eq!(conservative.detect_incompatible_definitions(&registry).len(), 1);
    }

    #[test]
    fn test_structural_policy_reports_body_diff() {
        let mut registry = SchemaRegistry::new();
        registry.ingest(with_entity("NS", StructuredType::new("Customer").with_property("Name", "Edm.String")), "a.xml");
        registry.ingest(with_entity("NS", StructuredType::new("Customer").with_property("Name", "Edm.Int32")), "b.xml");

        let conflicts = ConflictDetector::default().detect_incompatible_definitions(&registry);
        assert_eq!(conflicts.len(), 1);
        let details = &conflicts[0].details;
        assert!(details.starts_with("Incompatible definitions found: EntityType in a.xml"));
        assert!(details.contains("\n-"));
        assert!(details.contains("\n+"));
        assert!(details.contains("Edm.Int32"));
    }

    #[test]
    fn test_kind_mismatch_is_incompatible() {
        let mut complex = SchemaElements::new("NS");
        complex.complex_types.push(Arc::new(StructuredType::new("Address")));

        let mut registry = SchemaRegistry::new();
        registry.ingest(with_entity("NS", StructuredType::new("Address")), "a.xml");
        registry.ingest(complex, "b.xml");

        let conflicts = ConflictDetector::default().detect_incompatible_definitions(&registry);
        assert_eq!(conflicts.len(), 1);
        assert_eq!(
            conflicts[0].details,
            "Incompatible definitions found: EntityType in a.xml, ComplexType in b.xml"
        );
    }

    #[test]
    fn test_annotation_conflict() {
        let a = with_entity(
            "NS",
            StructuredType::new("Customer").with_annotation(Annotation::new("Core.Description", "Buyer")),
        );
        let b = with_entity(
            "NS",
            StructuredType::new("Customer").with_annotation(Annotation::new("Core.Description", "Client")),
        );

        let mut registry = SchemaRegistry::new();
        registry.ingest(a, "a.xml");
        registry.ingest(b, "b.xml");

        let conflicts = ConflictDetector::default().detect_annotation_conflicts(&registry);
        assert_eq!(conflicts.len(), 1);
        assert!(conflicts[0].description.contains("Core.Description"));
        assert_eq!(conflicts[0].details, "Values: 'Buyer' in a.xml, 'Client' in b.xml");
        assert_eq!(conflicts[0].files, vec!["a.xml", "b.xml"]);
    }

    #[test]
    fn test_qualified_annotations_do_not_collide() {
        let entity = StructuredType::new("Customer")
            .with_annotation(Annotation::new("Core.Description", "Buyer"))
            .with_annotation(Annotation::new("Core.Description", "B").with_qualifier("Short"));

        let mut registry = SchemaRegistry::new();
        registry.ingest(with_entity("NS", entity), "a.xml");

        assert!(ConflictDetector::default().detect_annotation_conflicts(&registry).is_empty());
    }
}
