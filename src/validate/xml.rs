//! Default per-file validator: XML well-formedness plus a minimal CSDL shape check

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::path::Path;
use tracing::debug;

use super::{FileResult, FileValidator};
use crate::error::Result;

pub const SYNTAX: &str = "syntax";
pub const STRUCTURE: &str = "structure";

/// Attributes an element cannot do without
const REQUIRED_ATTRIBUTES: &[(&str, &[&str])] = &[
    ("Schema", &["Namespace"]),
    ("EntityType", &["Name"]),
    ("ComplexType", &["Name"]),
    ("EnumType", &["Name"]),
    ("Member", &["Name"]),
    ("TypeDefinition", &["Name", "UnderlyingType"]),
    ("Property", &["Name", "Type"]),
    ("NavigationProperty", &["Name", "Type"]),
    ("PropertyRef", &["Name"]),
    ("Action", &["Name"]),
    ("Function", &["Name"]),
    ("Parameter", &["Name", "Type"]),
    ("ReturnType", &["Type"]),
    ("Term", &["Name", "Type"]),
    ("EntityContainer", &["Name"]),
    ("EntitySet", &["Name", "EntityType"]),
    ("NavigationPropertyBinding", &["Path", "Target"]),
    ("Singleton", &["Name", "Type"]),
    ("ActionImport", &["Name", "Action"]),
    ("FunctionImport", &["Name", "Function"]),
    ("Annotations", &["Target"]),
    ("Annotation", &["Term"]),
];

/// quick-xml backed [`FileValidator`]
#[derive(Debug, Clone, Default)]
pub struct XmlFileValidator;

impl XmlFileValidator {
    pub fn new() -> Self {
        Self
    }

    /// Validate in-memory content; `file_name` only labels the result
    pub fn validate_str(&self, content: &str, file_name: &str) -> FileResult {
        let mut result = FileResult::compliant(file_name);
        let mut reader = Reader::from_str(content);
        reader.trim_text(true);

        let mut buf = Vec::new();
        let mut depth = 0usize;
        let mut root_seen = false;
        let mut schemas = 0usize;
        // Depth of the outermost open <Annotation>; its content is free-form
        let mut annotation_depth: Option<usize> = None;

        loop {
            let event = match reader.read_event_into(&mut buf) {
                Ok(event) => event,
                Err(e) => {
                    result.add_error(
                        SYNTAX,
                        format!("XML syntax error at byte {}: {}", reader.buffer_position(), e),
                    );
                    break;
                }
            };

            match event {
                Event::Start(ref e) | Event::Empty(ref e) => {
                    let empty = matches!(event, Event::Empty(_));
                    let name = local_name(e);

                    if !root_seen {
                        root_seen = true;
                        if name != "Edmx" && name != "Schema" {
                            result.add_error(
                                STRUCTURE,
                                format!("Root element must be <edmx:Edmx> or <Schema>, found <{}>", name),
                            );
                        }
                    }

                    if annotation_depth.is_none() {
                        if name == "Schema" {
                            schemas += 1;
                        }
                        check_required(e, &name, &mut result);
                        if name == "Annotation" && !empty {
                            annotation_depth = Some(depth);
                        }
                    }

                    if !empty {
                        depth += 1;
                    }
                }
                Event::End(_) => {
                    depth = depth.saturating_sub(1);
                    if annotation_depth == Some(depth) {
                        annotation_depth = None;
                    }
                }
                Event::Eof => {
                    if depth > 0 {
                        result.add_error(
                            SYNTAX,
                            format!("Unexpected end of document: {} element(s) left open", depth),
                        );
                    }
                    break;
                }
                _ => {}
            }
            buf.clear();
        }

        if !root_seen {
            result.add_error(SYNTAX, "Document has no root element");
        } else if schemas == 0 && result.compliant {
            result.add_warning("Document contains no <Schema> element");
        }

        debug!(
            file = %file_name,
            compliant = result.compliant,
            errors = result.errors.len(),
            "validated file"
        );
        result
    }
}

impl FileValidator for XmlFileValidator {
    fn validate(&self, path: &Path) -> Result<FileResult> {
        let content = std::fs::read_to_string(path)?;
        Ok(self.validate_str(&content, &path.display().to_string()))
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).to_string()
}

fn check_required(e: &BytesStart, name: &str, result: &mut FileResult) {
    let Some((_, required)) = REQUIRED_ATTRIBUTES.iter().find(|(element, _)| *element == name) else {
        return;
    };

    let mut present = Vec::new();
    for attr in e.attributes() {
        match attr {
            Ok(attr) => present.push(String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string()),
            Err(err) => {
                result.add_error(SYNTAX, format!("Malformed attribute on <{}>: {}", name, err));
                return;
            }
        }
    }

    for key in required.iter() {
        if !present.iter().any(|p| p == key) {
            let label = e
                .attributes()
                .flatten()
                .find(|a| a.key.local_name().as_ref() == b"Name")
                .map(|a| format!(" '{}'", String::from_utf8_lossy(&a.value)))
                .unwrap_or_default();
            result.add_error(
                STRUCTURE,
                format!("<{}>{} is missing required attribute '{}'", name, label, key),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="Sales" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      <EntityType Name="Order">
        <Key><PropertyRef Name="Id"/></Key>
        <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
        <Annotation Term="Core.Description">
          <Record><PropertyValue Property="Text" String="An order"/></Record>
        </Annotation>
      </EntityType>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

    #[test]
    fn test_valid_document() {
        let result = XmlFileValidator::new().validate_str(VALID, "valid.xml");
        assert!(result.compliant, "unexpected errors: {:?}", result.errors);
        assert!(result.warnings.is_empty());
    }

    #[test]
    fn test_unclosed_document() {
        let content = r#"<Schema Namespace="A"><EntityType Name="X">"#;
        let result = XmlFileValidator::new().validate_str(content, "open.xml");
        assert!(!result.compliant);
        assert!(result.errors_by_type.contains_key(SYNTAX));
    }

    #[test]
    fn test_mismatched_end_tag() {
        let content = r#"<Schema Namespace="A"><EntityType Name="X"></ComplexType></Schema>"#;
        let result = XmlFileValidator::new().validate_str(content, "bad.xml");
        assert!(!result.compliant);
        assert!(result.errors_by_type.contains_key(SYNTAX));
    }

    #[test]
    fn test_missing_namespace_and_type() {
        let content = r#"<Schema><EntityType Name="X"><Property Name="Id"/></EntityType></Schema>"#;
        let result = XmlFileValidator::new().validate_str(content, "shape.xml");
        assert!(!result.compliant);
        let structure = &result.errors_by_type[STRUCTURE];
        assert_eq!(structure.len(), 2);
        assert!(structure[0].contains("Namespace"));
        assert!(structure[1].contains("<Property> 'Id'"));
    }

    #[test]
    fn test_wrong_root() {
        let result = XmlFileValidator::new().validate_str("<Catalog/>", "other.xml");
        assert!(!result.compliant);
        assert!(result.errors[0].contains("<Catalog>"));
    }

    #[test]
    fn test_empty_document() {
        let result = XmlFileValidator::new().validate_str("", "empty.xml");
        assert!(!result.compliant);
    }

    #[test]
    fn test_edmx_without_schema_warns() {
        let content = r#"<edmx:Edmx xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx"><edmx:DataServices/></edmx:Edmx>"#;
        let result = XmlFileValidator::new().validate_str(content, "bare.xml");
        assert!(result.compliant);
        assert_eq!(result.warnings.len(), 1);
    }
}
