//! Parsed CSDL element model
//!
//! One [`SchemaElements`] value holds everything a single `<Schema>` block
//! declares. Top-level definitions sit behind `Arc` so a definition shared
//! between files (pulled in by reference or include) stays the same object,
//! which the conflict detector relies on to tell re-exports from duplicates.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::fingerprint::Fingerprint;

/// Everything one schema block declares
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SchemaElements {
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,
    #[serde(default)]
    pub entity_types: Vec<Arc<StructuredType>>,
    #[serde(default)]
    pub complex_types: Vec<Arc<StructuredType>>,
    #[serde(default)]
    pub enum_types: Vec<Arc<EnumType>>,
    #[serde(default)]
    pub type_definitions: Vec<Arc<TypeDefinition>>,
    #[serde(default)]
    pub actions: Vec<Arc<Operation>>,
    #[serde(default)]
    pub functions: Vec<Arc<Operation>>,
    #[serde(default)]
    pub terms: Vec<Arc<Term>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_container: Option<Arc<EntityContainer>>,
    /// Annotations applied from outside (`<Annotations Target="...">`)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub external_annotations: Vec<AnnotationTarget>,
}

impl SchemaElements {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: Some(namespace.into()),
            ..Default::default()
        }
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Carries a container or at least one type
    pub fn is_complete(&self) -> bool {
        self.entity_container.is_some()
            || !self.entity_types.is_empty()
            || !self.complex_types.is_empty()
            || !self.enum_types.is_empty()
            || !self.type_definitions.is_empty()
    }

    /// All top-level definitions, container children included
    pub fn definitions(&self) -> Vec<ElementDefinition> {
        let mut defs = Vec::new();
        defs.extend(self.entity_types.iter().cloned().map(ElementDefinition::EntityType));
        defs.extend(self.complex_types.iter().cloned().map(ElementDefinition::ComplexType));
        defs.extend(self.enum_types.iter().cloned().map(ElementDefinition::EnumType));
        defs.extend(self.type_definitions.iter().cloned().map(ElementDefinition::TypeDefinition));
        defs.extend(self.actions.iter().cloned().map(ElementDefinition::Action));
        defs.extend(self.functions.iter().cloned().map(ElementDefinition::Function));
        defs.extend(self.terms.iter().cloned().map(ElementDefinition::Term));

        if let Some(container) = &self.entity_container {
            defs.push(ElementDefinition::EntityContainer(Arc::clone(container)));
            defs.extend(container.entity_sets.iter().cloned().map(ElementDefinition::EntitySet));
            defs.extend(container.singletons.iter().cloned().map(ElementDefinition::Singleton));
            defs.extend(container.action_imports.iter().cloned().map(ElementDefinition::ActionImport));
            defs.extend(
                container
                    .function_imports
                    .iter()
                    .cloned()
                    .map(ElementDefinition::FunctionImport),
            );
        }

        defs
    }
}

// =============================================================================
// Types
// =============================================================================

/// Entity type or complex type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StructuredType {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_type: Option<String>,
    #[serde(default)]
    pub is_abstract: bool,
    #[serde(default)]
    pub open_type: bool,
    /// Key property references (entity types only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub key: Vec<String>,
    #[serde(default)]
    pub properties: Vec<Property>,
    #[serde(default)]
    pub navigation_properties: Vec<NavigationProperty>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl StructuredType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_property(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.properties.push(Property::new(name, type_name));
        self
    }

    pub fn with_navigation(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.navigation_properties.push(NavigationProperty {
            name: name.into(),
            type_name: type_name.into(),
            ..Default::default()
        });
        self
    }

    pub fn with_key(mut self, property: impl Into<String>) -> Self {
        self.key.push(property.into());
        self
    }

    pub fn with_base_type(mut self, base: impl Into<String>) -> Self {
        self.base_type = Some(base.into());
        self
    }

    pub fn with_annotation(mut self, annotation: Annotation) -> Self {
        self.annotations.push(annotation);
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Property {
    pub name: String,
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Property {
    pub fn new(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
            ..Default::default()
        }
    }
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationProperty {
    pub name: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partner: Option<String>,
    #[serde(default)]
    pub contains_target: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumType {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub underlying_type: Option<String>,
    #[serde(default)]
    pub is_flags: bool,
    #[serde(default)]
    pub members: Vec<EnumMember>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumMember {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    pub name: String,
    pub underlying_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

// =============================================================================
// Operations
// =============================================================================

/// Action or function
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    pub name: String,
    #[serde(default)]
    pub is_bound: bool,
    #[serde(default)]
    pub is_composable: bool,
    #[serde(default)]
    pub parameters: Vec<Parameter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<ReturnType>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

impl Operation {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, type_name: impl Into<String>) -> Self {
        self.parameters.push(Parameter {
            name: name.into(),
            type_name: type_name.into(),
            nullable: true,
        });
        self
    }

    pub fn returning(mut self, type_name: impl Into<String>) -> Self {
        self.return_type = Some(ReturnType {
            type_name: type_name.into(),
            nullable: true,
        });
        self
    }

    /// Overload-aware name: `Name(T1,T2)`, or `Name()` without parameters
    pub fn signature(&self) -> String {
        let types: Vec<&str> = self.parameters.iter().map(|p| p.type_name.as_str()).collect();
        format!("{}({})", self.name, types.join(","))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReturnType {
    pub type_name: String,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub name: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_term: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub applies_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

// =============================================================================
// Container
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityContainer {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(default)]
    pub entity_sets: Vec<Arc<EntitySet>>,
    #[serde(default)]
    pub singletons: Vec<Arc<Singleton>>,
    #[serde(default)]
    pub action_imports: Vec<Arc<ActionImport>>,
    #[serde(default)]
    pub function_imports: Vec<Arc<FunctionImport>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntitySet {
    pub name: String,
    pub entity_type: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub navigation_bindings: Vec<NavigationBinding>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NavigationBinding {
    pub path: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Singleton {
    pub name: String,
    pub type_name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionImport {
    pub name: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_set: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FunctionImport {
    pub name: String,
    pub function: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_set: Option<String>,
    #[serde(default)]
    pub include_in_service_document: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub annotations: Vec<Annotation>,
}

// =============================================================================
// Annotations
// =============================================================================

/// A term applied to an element
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    pub term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub qualifier: Option<String>,
    /// Rendered expression; falls back to the term when the annotation has no value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Annotation {
    pub fn new(term: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            qualifier: None,
            value: Some(value.into()),
        }
    }

    pub fn with_qualifier(mut self, qualifier: impl Into<String>) -> Self {
        self.qualifier = Some(qualifier.into());
        self
    }

    /// `Term` or `Term#Qualifier`
    pub fn term_key(&self) -> String {
        match &self.qualifier {
            Some(q) => format!("{}#{}", self.term, q),
            None => self.term.clone(),
        }
    }

    pub fn value_string(&self) -> String {
        self.value.clone().unwrap_or_else(|| self.term.clone())
    }
}

/// `<Annotations Target="NS.Element">` block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationTarget {
    pub target: String,
    pub annotations: Vec<Annotation>,
}

// =============================================================================
// Element definitions
// =============================================================================

/// Concrete kind of a top-level element
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ElementKind {
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
}

impl ElementKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EntityType => "EntityType",
            Self::ComplexType => "ComplexType",
            Self::EnumType => "EnumType",
            Self::TypeDefinition => "TypeDefinition",
            Self::EntityContainer => "EntityContainer",
            Self::EntitySet => "EntitySet",
            Self::Singleton => "Singleton",
            Self::ActionImport => "ActionImport",
            Self::FunctionImport => "FunctionImport",
            Self::Action => "Action",
            Self::Function => "Function",
            Self::Term => "Term",
        }
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared handle to one parsed top-level definition
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "definition")]
pub enum ElementDefinition {
    EntityType(Arc<StructuredType>),
    ComplexType(Arc<StructuredType>),
    EnumType(Arc<EnumType>),
    TypeDefinition(Arc<TypeDefinition>),
    EntityContainer(Arc<EntityContainer>),
    EntitySet(Arc<EntitySet>),
    Singleton(Arc<Singleton>),
    ActionImport(Arc<ActionImport>),
    FunctionImport(Arc<FunctionImport>),
    Action(Arc<Operation>),
    Function(Arc<Operation>),
    Term(Arc<Term>),
}

impl ElementDefinition {
    pub fn kind(&self) -> ElementKind {
        match self {
            Self::EntityType(_) => ElementKind::EntityType,
            Self::ComplexType(_) => ElementKind::ComplexType,
            Self::EnumType(_) => ElementKind::EnumType,
            Self::TypeDefinition(_) => ElementKind::TypeDefinition,
            Self::EntityContainer(_) => ElementKind::EntityContainer,
            Self::EntitySet(_) => ElementKind::EntitySet,
            Self::Singleton(_) => ElementKind::Singleton,
            Self::ActionImport(_) => ElementKind::ActionImport,
            Self::FunctionImport(_) => ElementKind::FunctionImport,
            Self::Action(_) => ElementKind::Action,
            Self::Function(_) => ElementKind::Function,
            Self::Term(_) => ElementKind::Term,
        }
    }

    /// Registry name; operations use their overload signature
    pub fn element_name(&self) -> String {
        match self {
            Self::EntityType(t) | Self::ComplexType(t) => t.name.clone(),
            Self::EnumType(t) => t.name.clone(),
            Self::TypeDefinition(t) => t.name.clone(),
            Self::EntityContainer(c) => c.name.clone(),
            Self::EntitySet(s) => s.name.clone(),
            Self::Singleton(s) => s.name.clone(),
            Self::ActionImport(i) => i.name.clone(),
            Self::FunctionImport(i) => i.name.clone(),
            Self::Action(op) | Self::Function(op) => op.signature(),
            Self::Term(t) => t.name.clone(),
        }
    }

    pub fn annotations(&self) -> &[Annotation] {
        match self {
            Self::EntityType(t) | Self::ComplexType(t) => &t.annotations,
            Self::EnumType(t) => &t.annotations,
            Self::TypeDefinition(t) => &t.annotations,
            Self::EntityContainer(c) => &c.annotations,
            Self::EntitySet(s) => &s.annotations,
            Self::Singleton(s) => &s.annotations,
            Self::ActionImport(i) => &i.annotations,
            Self::FunctionImport(i) => &i.annotations,
            Self::Action(op) | Self::Function(op) => &op.annotations,
            Self::Term(t) => &t.annotations,
        }
    }

    /// Annotations on properties and navigation properties, by member name
    pub fn member_annotations(&self) -> Vec<(&str, &[Annotation])> {
        match self {
            Self::EntityType(t) | Self::ComplexType(t) => t
                .properties
                .iter()
                .map(|p| (p.name.as_str(), p.annotations.as_slice()))
                .chain(
                    t.navigation_properties
                        .iter()
                        .map(|n| (n.name.as_str(), n.annotations.as_slice())),
                )
                .filter(|(_, annotations)| !annotations.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Same underlying object, not merely equal content
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::EntityType(a), Self::EntityType(b))
            | (Self::ComplexType(a), Self::ComplexType(b)) => Arc::ptr_eq(a, b),
            (Self::EnumType(a), Self::EnumType(b)) => Arc::ptr_eq(a, b),
            (Self::TypeDefinition(a), Self::TypeDefinition(b)) => Arc::ptr_eq(a, b),
            (Self::EntityContainer(a), Self::EntityContainer(b)) => Arc::ptr_eq(a, b),
            (Self::EntitySet(a), Self::EntitySet(b)) => Arc::ptr_eq(a, b),
            (Self::Singleton(a), Self::Singleton(b)) => Arc::ptr_eq(a, b),
            (Self::ActionImport(a), Self::ActionImport(b)) => Arc::ptr_eq(a, b),
            (Self::FunctionImport(a), Self::FunctionImport(b)) => Arc::ptr_eq(a, b),
            (Self::Action(a), Self::Action(b)) | (Self::Function(a), Self::Function(b)) => {
                Arc::ptr_eq(a, b)
            }
            (Self::Term(a), Self::Term(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Canonical JSON of the definition body
    pub fn canonical_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::from_str(&self.canonical_json())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_signature() {
        let op = Operation::new("Rank")
            .with_parameter("p1", "Edm.Int32")
            .with_parameter("p2", "NS.Customer");
        assert_eq!(op.signature(), "Rank(Edm.Int32,NS.Customer)");
        assert_eq!(Operation::new("Reset").signature(), "Reset()");
    }

    #[test]
    fn test_schema_completeness() {
        let mut schema = SchemaElements::new("NS");
        assert!(!schema.is_complete());

        schema.actions.push(Arc::new(Operation::new("Ping")));
        assert!(!schema.is_complete());

        schema.enum_types.push(Arc::new(EnumType {
            name: "Color".to_string(),
            ..Default::default()
        }));
        assert!(schema.is_complete());
    }

    #[test]
    fn test_definitions_include_container_children() {
        let mut schema = SchemaElements::new("NS");
        schema.entity_container = Some(Arc::new(EntityContainer {
            name: "Container".to_string(),
            entity_sets: vec![Arc::new(EntitySet {
                name: "Customers".to_string(),
                entity_type: "NS.Customer".to_string(),
                ..Default::default()
            })],
            ..Default::default()
        }));

        let kinds: Vec<ElementKind> = schema.definitions().iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, vec![ElementKind::EntityContainer, ElementKind::EntitySet]);
    }

    #[test]
    fn test_ptr_eq_distinguishes_shared_from_equal() {
        let shared = Arc::new(StructuredType::new("Customer"));
        let a = ElementDefinition::EntityType(Arc::clone(&shared));
        let b = ElementDefinition::EntityType(shared);
        let c = ElementDefinition::EntityType(Arc::new(StructuredType::new("Customer")));

        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a.fingerprint(), c.fingerprint());
    }

    #[test]
    fn test_annotation_term_key() {
        let plain = Annotation::new("Core.Description", "Customer");
        let qualified = Annotation::new("Core.Description", "Short").with_qualifier("Tooltip");
        assert_eq!(plain.term_key(), "Core.Description");
        assert_eq!(qualified.term_key(), "Core.Description#Tooltip");
    }
}
