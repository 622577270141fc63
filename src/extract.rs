//! CSDL schema extraction
//!
//! Turns a compliant CSDL XML document into [`SchemaElements`], one per
//! `<Schema>` block. `edmx:Reference` includes are not followed.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

use crate::error::{Result, ValidationError};
use crate::schema::{
    ActionImport, Annotation, AnnotationTarget, EntityContainer, EntitySet, EnumMember, EnumType,
    FunctionImport, NavigationBinding, NavigationProperty, Operation, Parameter, Property,
    ReturnType, SchemaElements, Singleton, StructuredType, Term, TypeDefinition,
};

/// Produces the parsed element collection for one file
pub trait SchemaExtractor: Send + Sync {
    fn extract(&self, path: &Path) -> Result<Vec<SchemaElements>>;
}

/// Annotation attributes that carry a constant or path expression
const EXPRESSION_ATTRIBUTES: &[&str] = &[
    "String",
    "Bool",
    "Int",
    "Float",
    "Decimal",
    "Date",
    "DateTimeOffset",
    "TimeOfDay",
    "Duration",
    "Guid",
    "Binary",
    "EnumMember",
    "Path",
    "PropertyPath",
    "NavigationPropertyPath",
    "AnnotationPath",
    "ModelElementPath",
    "UrlRef",
];

/// Streaming CSDL reader
#[derive(Debug, Clone, Default)]
pub struct CsdlXmlExtractor;

impl CsdlXmlExtractor {
    pub fn new() -> Self {
        Self
    }

    pub fn parse_str(&self, content: &str, file: &str) -> Result<Vec<SchemaElements>> {
        let mut reader = Reader::from_str(content);
        reader.trim_text(true);

        let mut state = ParseState::new(file);
        let mut buf = Vec::new();

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) => state.open(&e)?,
                Event::Empty(e) => {
                    state.open(&e)?;
                    state.close();
                }
                Event::End(_) => state.close(),
                Event::Text(t) => {
                    let text = t.unescape()?;
                    state.text(&text);
                }
                Event::Eof => break,
                _ => {}
            }
            buf.clear();
        }

        debug!(file = %file, schemas = state.schemas.len(), "extracted schemas");
        Ok(state.schemas)
    }
}

impl SchemaExtractor for CsdlXmlExtractor {
    fn extract(&self, path: &Path) -> Result<Vec<SchemaElements>> {
        let content = std::fs::read_to_string(path)?;
        self.parse_str(&content, &path.display().to_string())
    }
}

// =============================================================================
// Parse state
// =============================================================================

enum ContainerChild {
    Set(EntitySet),
    Singleton(Singleton),
    ActionImport(ActionImport),
    FunctionImport(FunctionImport),
}

/// One open element
enum Frame {
    Schema(SchemaElements),
    Structured { ty: StructuredType, entity: bool },
    Property(Property),
    Navigation(NavigationProperty),
    Enum(EnumType),
    TypeDefinition(TypeDefinition),
    Operation { op: Operation, action: bool },
    Term(Term),
    Container(EntityContainer),
    Child(ContainerChild),
    AnnotationsBlock(AnnotationTarget),
    Annotation { annotation: Annotation, rendered: Vec<String> },
    Other,
}

struct ParseState<'a> {
    file: &'a str,
    stack: Vec<Frame>,
    schemas: Vec<SchemaElements>,
}

impl<'a> ParseState<'a> {
    fn new(file: &'a str) -> Self {
        Self {
            file,
            stack: Vec::new(),
            schemas: Vec::new(),
        }
    }

    fn in_annotation(&mut self) -> Option<&mut Vec<String>> {
        self.stack.iter_mut().rev().find_map(|frame| match frame {
            Frame::Annotation { rendered, .. } => Some(rendered),
            _ => None,
        })
    }

    fn open(&mut self, e: &BytesStart) -> Result<()> {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
        let attrs = attributes(e)?;

        // Anything nested in an annotation is part of its value
        if let Some(rendered) = self.in_annotation() {
            rendered.push(render_element(&name, &attrs));
            self.stack.push(Frame::Other);
            return Ok(());
        }

        let frame = match name.as_str() {
            "Schema" => Frame::Schema(SchemaElements {
                namespace: attrs.get("Namespace").cloned(),
                alias: attrs.get("Alias").cloned(),
                ..Default::default()
            }),
            "EntityType" | "ComplexType" => Frame::Structured {
                ty: StructuredType {
                    name: self.required(&attrs, "Name", &name)?,
                    base_type: attrs.get("BaseType").cloned(),
                    is_abstract: flag(&attrs, "Abstract"),
                    open_type: flag(&attrs, "OpenType"),
                    ..Default::default()
                },
                entity: name == "EntityType",
            },
            "PropertyRef" => {
                let key = self.required(&attrs, "Name", &name)?;
                if let Some(Frame::Structured { ty, .. }) = self.nearest_structured() {
                    ty.key.push(key);
                }
                Frame::Other
            }
            "Property" => Frame::Property(Property {
                name: self.required(&attrs, "Name", &name)?,
                type_name: self.required(&attrs, "Type", &name)?,
                nullable: attrs.get("Nullable").map(|v| v != "false").unwrap_or(true),
                max_length: attrs.get("MaxLength").cloned(),
                default_value: attrs.get("DefaultValue").cloned(),
                annotations: Vec::new(),
            }),
            "NavigationProperty" => Frame::Navigation(NavigationProperty {
                name: self.required(&attrs, "Name", &name)?,
                type_name: self.required(&attrs, "Type", &name)?,
                partner: attrs.get("Partner").cloned(),
                contains_target: flag(&attrs, "ContainsTarget"),
                annotations: Vec::new(),
            }),
            "EnumType" => Frame::Enum(EnumType {
                name: self.required(&attrs, "Name", &name)?,
                underlying_type: attrs.get("UnderlyingType").cloned(),
                is_flags: flag(&attrs, "IsFlags"),
                ..Default::default()
            }),
            "Member" => {
                let member = EnumMember {
                    name: self.required(&attrs, "Name", &name)?,
                    value: attrs.get("Value").cloned(),
                };
                if let Some(Frame::Enum(enum_type)) = self.stack.last_mut() {
                    enum_type.members.push(member);
                }
                Frame::Other
            }
            "TypeDefinition" => Frame::TypeDefinition(TypeDefinition {
                name: self.required(&attrs, "Name", &name)?,
                underlying_type: self.required(&attrs, "UnderlyingType", &name)?,
                annotations: Vec::new(),
            }),
            "Action" | "Function" => Frame::Operation {
                op: Operation {
                    name: self.required(&attrs, "Name", &name)?,
                    is_bound: flag(&attrs, "IsBound"),
                    is_composable: flag(&attrs, "IsComposable"),
                    ..Default::default()
                },
                action: name == "Action",
            },
            "Parameter" => {
                let parameter = Parameter {
                    name: self.required(&attrs, "Name", &name)?,
                    type_name: self.required(&attrs, "Type", &name)?,
                    nullable: attrs.get("Nullable").map(|v| v != "false").unwrap_or(true),
                };
                if let Some(Frame::Operation { op, .. }) = self.stack.last_mut() {
                    op.parameters.push(parameter);
                }
                Frame::Other
            }
            "ReturnType" => {
                let ret = ReturnType {
                    type_name: self.required(&attrs, "Type", &name)?,
                    nullable: attrs.get("Nullable").map(|v| v != "false").unwrap_or(true),
                };
                if let Some(Frame::Operation { op, .. }) = self.stack.last_mut() {
                    op.return_type = Some(ret);
                }
                Frame::Other
            }
            "Term" => Frame::Term(Term {
                name: self.required(&attrs, "Name", &name)?,
                type_name: self.required(&attrs, "Type", &name)?,
                base_term: attrs.get("BaseTerm").cloned(),
                applies_to: attrs
                    .get("AppliesTo")
                    .map(|v| v.split_whitespace().map(str::to_string).collect())
                    .unwrap_or_default(),
                annotations: Vec::new(),
            }),
            "EntityContainer" => Frame::Container(EntityContainer {
                name: self.required(&attrs, "Name", &name)?,
                extends: attrs.get("Extends").cloned(),
                ..Default::default()
            }),
            "EntitySet" => Frame::Child(ContainerChild::Set(EntitySet {
                name: self.required(&attrs, "Name", &name)?,
                entity_type: self.required(&attrs, "EntityType", &name)?,
                ..Default::default()
            })),
            "NavigationPropertyBinding" => {
                let binding = NavigationBinding {
                    path: self.required(&attrs, "Path", &name)?,
                    target: self.required(&attrs, "Target", &name)?,
                };
                if let Some(Frame::Child(ContainerChild::Set(set))) = self.stack.last_mut() {
                    set.navigation_bindings.push(binding);
                }
                Frame::Other
            }
            "Singleton" => Frame::Child(ContainerChild::Singleton(Singleton {
                name: self.required(&attrs, "Name", &name)?,
                type_name: self.required(&attrs, "Type", &name)?,
                annotations: Vec::new(),
            })),
            "ActionImport" => Frame::Child(ContainerChild::ActionImport(ActionImport {
                name: self.required(&attrs, "Name", &name)?,
                action: self.required(&attrs, "Action", &name)?,
                entity_set: attrs.get("EntitySet").cloned(),
                annotations: Vec::new(),
            })),
            "FunctionImport" => Frame::Child(ContainerChild::FunctionImport(FunctionImport {
                name: self.required(&attrs, "Name", &name)?,
                function: self.required(&attrs, "Function", &name)?,
                entity_set: attrs.get("EntitySet").cloned(),
                include_in_service_document: flag(&attrs, "IncludeInServiceDocument"),
                annotations: Vec::new(),
            })),
            "Annotations" => Frame::AnnotationsBlock(AnnotationTarget {
                target: self.required(&attrs, "Target", &name)?,
                annotations: Vec::new(),
            }),
            "Annotation" => {
                let value = EXPRESSION_ATTRIBUTES
                    .iter()
                    .find_map(|key| attrs.get(*key).cloned());
                Frame::Annotation {
                    annotation: Annotation {
                        term: self.required(&attrs, "Term", &name)?,
                        qualifier: attrs.get("Qualifier").cloned(),
                        value,
                    },
                    rendered: Vec::new(),
                }
            }
            _ => Frame::Other,
        };

        self.stack.push(frame);
        Ok(())
    }

    fn nearest_structured(&mut self) -> Option<&mut Frame> {
        self.stack
            .iter_mut()
            .rev()
            .find(|f| matches!(f, Frame::Structured { .. }))
    }

    fn text(&mut self, text: &str) {
        if let Some(rendered) = self.in_annotation() {
            rendered.push(text.to_string());
        }
    }

    /// Pop the current frame and fold it into its parent
    fn close(&mut self) {
        let Some(frame) = self.stack.pop() else {
            return;
        };

        let parent = self.stack.last_mut();
        match (frame, parent) {
            (Frame::Schema(schema), _) => self.schemas.push(schema),

            (Frame::Structured { ty, entity }, Some(Frame::Schema(schema))) => {
                if entity {
                    schema.entity_types.push(Arc::new(ty));
                } else {
                    schema.complex_types.push(Arc::new(ty));
                }
            }
            (Frame::Property(p), Some(Frame::Structured { ty, .. })) => ty.properties.push(p),
            (Frame::Navigation(n), Some(Frame::Structured { ty, .. })) => {
                ty.navigation_properties.push(n)
            }
            (Frame::Enum(t), Some(Frame::Schema(schema))) => schema.enum_types.push(Arc::new(t)),
            (Frame::TypeDefinition(t), Some(Frame::Schema(schema))) => {
                schema.type_definitions.push(Arc::new(t))
            }
            (Frame::Operation { op, action }, Some(Frame::Schema(schema))) => {
                if action {
                    schema.actions.push(Arc::new(op));
                } else {
                    schema.functions.push(Arc::new(op));
                }
            }
            (Frame::Term(t), Some(Frame::Schema(schema))) => schema.terms.push(Arc::new(t)),
            (Frame::Container(c), Some(Frame::Schema(schema))) => {
                schema.entity_container = Some(Arc::new(c))
            }
            (Frame::Child(child), Some(Frame::Container(container))) => match child {
                ContainerChild::Set(s) => container.entity_sets.push(Arc::new(s)),
                ContainerChild::Singleton(s) => container.singletons.push(Arc::new(s)),
                ContainerChild::ActionImport(i) => container.action_imports.push(Arc::new(i)),
                ContainerChild::FunctionImport(i) => container.function_imports.push(Arc::new(i)),
            },
            (Frame::AnnotationsBlock(block), Some(Frame::Schema(schema))) => {
                schema.external_annotations.push(block)
            }
            (Frame::Annotation { mut annotation, rendered }, Some(parent)) => {
                if annotation.value.is_none() && !rendered.is_empty() {
                    annotation.value = Some(expression_value(rendered));
                }
                attach_annotation(parent, annotation);
            }
            (Frame::Other, _) => {}
            (_, _) => debug!(file = %self.file, "element outside its expected parent, ignored"),
        }
    }

    fn required(&self, attrs: &HashMap<String, String>, key: &str, element: &str) -> Result<String> {
        attrs.get(key).cloned().ok_or_else(|| {
            ValidationError::extraction(
                self.file,
                format!("<{}> is missing required attribute '{}'", element, key),
            )
        })
    }
}

fn attach_annotation(parent: &mut Frame, annotation: Annotation) {
    match parent {
        Frame::Structured { ty, .. } => ty.annotations.push(annotation),
        Frame::Property(p) => p.annotations.push(annotation),
        Frame::Navigation(n) => n.annotations.push(annotation),
        Frame::Enum(t) => t.annotations.push(annotation),
        Frame::TypeDefinition(t) => t.annotations.push(annotation),
        Frame::Operation { op, .. } => op.annotations.push(annotation),
        Frame::Term(t) => t.annotations.push(annotation),
        Frame::Container(c) => c.annotations.push(annotation),
        Frame::Child(ContainerChild::Set(s)) => s.annotations.push(annotation),
        Frame::Child(ContainerChild::Singleton(s)) => s.annotations.push(annotation),
        Frame::Child(ContainerChild::ActionImport(i)) => i.annotations.push(annotation),
        Frame::Child(ContainerChild::FunctionImport(i)) => i.annotations.push(annotation),
        Frame::AnnotationsBlock(block) => block.annotations.push(annotation),
        Frame::Schema(_) | Frame::Annotation { .. } | Frame::Other => {}
    }
}

fn attributes(e: &BytesStart) -> Result<HashMap<String, String>> {
    let mut attrs = HashMap::new();
    for attr in e.attributes() {
        let attr = attr.map_err(quick_xml::Error::from)?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
        let value = attr.unescape_value()?.to_string();
        attrs.insert(key, value);
    }
    Ok(attrs)
}

fn flag(attrs: &HashMap<String, String>, key: &str) -> bool {
    attrs.get(key).map(|v| v == "true").unwrap_or(false)
}

/// Value of an element-form expression. A lone constant or path element
/// yields its text, the same string the attribute form carries; records and
/// collections keep their rendered form.
fn expression_value(mut rendered: Vec<String>) -> String {
    let constant = rendered
        .first()
        .is_some_and(|head| EXPRESSION_ATTRIBUTES.contains(&head.as_str()));
    match rendered.len() {
        1 if constant => String::new(),
        2 if constant => rendered.swap_remove(1),
        _ => rendered.join(" "),
    }
}

/// `Name(k=v,...)` with attributes in key order
fn render_element(name: &str, attrs: &HashMap<String, String>) -> String {
    if attrs.is_empty() {
        return name.to_string();
    }
    let mut pairs: Vec<String> = attrs.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
    pairs.sort();
    format!("{}({})", name, pairs.join(","))
}
