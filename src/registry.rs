//! Schema Element Registry
//!
//! Indexes parsed schema blocks by element identity, namespace and applied
//! annotation. Append-only during ingestion, read-only afterwards; one
//! registry lives for exactly one validation run.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

use crate::schema::{Annotation, ElementDefinition, ElementKind, SchemaElements};

/// Identity of a top-level element
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ElementKey {
    pub namespace: String,
    /// Plain name, or `Name(T1,T2)` for actions and functions
    pub name: String,
}

impl ElementKey {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ElementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// One file's definition of an element
#[derive(Debug, Clone)]
pub struct ElementRecord {
    pub key: ElementKey,
    pub kind: ElementKind,
    pub definition: ElementDefinition,
    pub source_file: String,
}

/// Schema-level metadata for one schema block
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub namespace: String,
    pub alias: Option<String>,
    pub source_file: String,
    /// Carries a container or at least one type
    pub complete: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnnotationKey {
    pub namespace: String,
    pub element: String,
    /// Term, with `#Qualifier` appended when qualified
    pub term: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnotationRecord {
    pub value: String,
    pub source_file: String,
}

/// What `ingest` did with a schema block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Ingested { elements: usize, annotations: usize },
    /// No namespace; nothing was indexed
    SkippedNoNamespace,
}

/// Cross-file element index for one validation run
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    elements: BTreeMap<ElementKey, Vec<ElementRecord>>,
    namespace_files: BTreeMap<String, BTreeSet<String>>,
    schema_infos: BTreeMap<String, Vec<SchemaInfo>>,
    annotations: BTreeMap<AnnotationKey, Vec<AnnotationRecord>>,
    ingested: Vec<(String, Arc<SchemaElements>)>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every element of one parsed schema block
    pub fn ingest(
        &mut self,
        schema: impl Into<Arc<SchemaElements>>,
        source_file: impl Into<String>,
    ) -> IngestOutcome {
        let schema = schema.into();
        let source_file = source_file.into();

        let Some(namespace) = schema.namespace.clone().filter(|ns| !ns.is_empty()) else {
            debug!(file = %source_file, "schema without namespace, skipping");
            return IngestOutcome::SkippedNoNamespace;
        };

        self.namespace_files
            .entry(namespace.clone())
            .or_default()
            .insert(source_file.clone());

        self.schema_infos
            .entry(namespace.clone())
            .or_default()
            .push(SchemaInfo {
                namespace: namespace.clone(),
                alias: schema.alias.clone(),
                source_file: source_file.clone(),
                complete: schema.is_complete(),
            });

        let mut element_count = 0;
        let mut annotation_count = 0;

        for definition in schema.definitions() {
            let key = ElementKey::new(namespace.clone(), definition.element_name());

            for annotation in definition.annotations() {
                self.add_annotation(&namespace, &key.name, annotation, &source_file);
                annotation_count += 1;
            }
            // Keyed like an external `Type/Member` target
            for (member, annotations) in definition.member_annotations() {
                let path = format!("{}/{}", key.name, member);
                for annotation in annotations {
                    self.add_annotation(&namespace, &path, annotation, &source_file);
                    annotation_count += 1;
                }
            }

            self.elements.entry(key.clone()).or_default().push(ElementRecord {
                key,
                kind: definition.kind(),
                definition,
                source_file: source_file.clone(),
            });
            element_count += 1;
        }

        for block in &schema.external_annotations {
            let (target_ns, element) = split_target(&block.target, &namespace, schema.alias.as_deref());
            for annotation in &block.annotations {
                self.add_annotation(&target_ns, &element, annotation, &source_file);
                annotation_count += 1;
            }
        }

        self.ingested.push((source_file.clone(), schema));

        debug!(
            file = %source_file,
            namespace = %namespace,
            elements = element_count,
            annotations = annotation_count,
            "ingested schema"
        );

        IngestOutcome::Ingested {
            elements: element_count,
            annotations: annotation_count,
        }
    }

    fn add_annotation(&mut self, namespace: &str, element: &str, annotation: &Annotation, file: &str) {
        let key = AnnotationKey {
            namespace: namespace.to_string(),
            element: element.to_string(),
            term: annotation.term_key(),
        };
        self.annotations.entry(key).or_default().push(AnnotationRecord {
            value: annotation.value_string(),
            source_file: file.to_string(),
        });
    }

    // ========== Queries ==========

    pub fn records(&self, key: &ElementKey) -> &[ElementRecord] {
        self.elements.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Element index in key order
    pub fn elements(&self) -> impl Iterator<Item = (&ElementKey, &[ElementRecord])> {
        self.elements.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn element_count(&self) -> usize {
        self.elements.values().map(Vec::len).sum()
    }

    pub fn annotations(&self) -> impl Iterator<Item = (&AnnotationKey, &[AnnotationRecord])> {
        self.annotations.iter().map(|(k, v)| (k, v.as_slice()))
    }

    pub fn namespace_to_files(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.namespace_files
    }

    pub fn files_for_namespace(&self, namespace: &str) -> Option<&BTreeSet<String>> {
        self.namespace_files.get(namespace)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &String> {
        self.namespace_files.keys()
    }

    pub fn schema_infos(&self, namespace: &str) -> &[SchemaInfo] {
        self.schema_infos.get(namespace).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_schema_infos(&self) -> impl Iterator<Item = &SchemaInfo> {
        self.schema_infos.values().flatten()
    }

    /// Ingested schema blocks with their source files, in ingestion order
    pub fn schemas(&self) -> &[(String, Arc<SchemaElements>)] {
        &self.ingested
    }

    pub fn is_empty(&self) -> bool {
        self.ingested.is_empty()
    }
}

/// Split an annotation target into (namespace, element path)
fn split_target(target: &str, namespace: &str, alias: Option<&str>) -> (String, String) {
    let own_prefixes = std::iter::once(namespace).chain(alias);
    for prefix in own_prefixes {
        if let Some(rest) = target
            .strip_prefix(prefix)
            .and_then(|rest| rest.strip_prefix('.'))
        {
            return (namespace.to_string(), rest.to_string());
        }
    }

    // Foreign target: namespace is everything up to the last dot before any path
    let head = target.split('/').next().unwrap_or(target);
    match head.rfind('.') {
        Some(idx) => (target[..idx].to_string(), target[idx + 1..].to_string()),
        None => (String::new(), target.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{AnnotationTarget, Operation, StructuredType};

    fn customer_schema(ns: &str) -> SchemaElements {
        let mut schema = SchemaElements::new(ns);
        schema.entity_types.push(Arc::new(
            StructuredType::new("Customer")
                .with_key("Id")
                .with_property("Id", "Edm.Int32")
                .with_annotation(Annotation::new("Core.Description", "A customer")),
        ));
        schema
    }

    #[test]
    fn test_ingest_indexes_elements() {
        let mut registry = SchemaRegistry::new();
        let outcome = registry.ingest(customer_schema("Sales"), "sales.xml");

        assert_eq!(outcome, IngestOutcome::Ingested { elements: 1, annotations: 1 });
        let records = registry.records(&ElementKey::new("Sales", "Customer"));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, ElementKind::EntityType);
        assert_eq!(records[0].source_file, "sales.xml");

        let files = registry.files_for_namespace("Sales").unwrap();
        assert!(files.contains("sales.xml"));
        assert!(registry.schema_infos("Sales")[0].complete);
    }

    #[test]
    fn test_ingest_skips_missing_namespace() {
        let mut registry = SchemaRegistry::new();
        let outcome = registry.ingest(SchemaElements::default(), "anon.xml");
        assert_eq!(outcome, IngestOutcome::SkippedNoNamespace);
        assert!(registry.is_empty());
        assert_eq!(registry.element_count(), 0);
    }

    #[test]
    fn test_operation_overloads_get_distinct_keys() {
        let mut schema = SchemaElements::new("Ops");
        schema.functions.push(Arc::new(Operation::new("Find").with_parameter("id", "Edm.Int32")));
        schema.functions.push(Arc::new(Operation::new("Find").with_parameter("name", "Edm.String")));
        schema.actions.push(Arc::new(Operation::new("Reset")));

        let mut registry = SchemaRegistry::new();
        registry.ingest(schema, "ops.xml");

        assert_eq!(registry.records(&ElementKey::new("Ops", "Find(Edm.Int32)")).len(), 1);
        assert_eq!(registry.records(&ElementKey::new("Ops", "Find(Edm.String)")).len(), 1);
        assert_eq!(registry.records(&ElementKey::new("Ops", "Reset()")).len(), 1);
    }

    #[test]
    fn test_external_annotations_resolve_alias() {
        let mut schema = SchemaElements::new("Sales.Models").with_alias("SM");
        schema.external_annotations.push(AnnotationTarget {
            target: "SM.Customer".to_string(),
            annotations: vec![Annotation::new("Core.Description", "Buyer")],
        });

        let mut registry = SchemaRegistry::new();
        registry.ingest(schema, "annotations.xml");

        let (key, records) = registry.annotations().next().unwrap();
        assert_eq!(key.namespace, "Sales.Models");
        assert_eq!(key.element, "Customer");
        assert_eq!(records[0].value, "Buyer");
    }

    #[test]
    fn test_member_annotations_keyed_by_path() {
        let mut property = crate::schema::Property::new("Name", "Edm.String");
        property.annotations.push(Annotation::new("Core.Description", "Full name"));
        let mut customer = StructuredType::new("Customer");
        customer.properties.push(property);
        let mut schema = SchemaElements::new("Sales");
        schema.entity_types.push(Arc::new(customer));

        let mut registry = SchemaRegistry::new();
        let outcome = registry.ingest(schema, "sales.xml");

        assert_eq!(outcome, IngestOutcome::Ingested { elements: 1, annotations: 1 });
        let (key, _) = registry.annotations().next().unwrap();
        assert_eq!(key.element, "Customer/Name");
    }

    #[test]
    fn test_split_foreign_target() {
        assert_eq!(
            split_target("Other.NS.Order/Lines", "Mine", None),
            ("Other.NS".to_string(), "Order/Lines".to_string())
        );
    }
}
