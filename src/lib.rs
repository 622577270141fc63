//! CSDL Conflict Detection
//!
//! Validates a directory of CSDL/EDM schema files as a whole: every file is
//! checked on its own, then the files that pass are indexed together so that
//! definitions colliding across files, and references between elements,
//! can be analysed.
//!
//! ## Features
//!
//! - **Per-file validation**: pluggable [`FileValidator`], run on a bounded worker pool
//! - **Element registry**: every definition indexed by `(namespace, name)` with its source file
//! - **Conflict detection**: duplicate elements, split namespaces, incompatible
//!   redefinitions, conflicting annotations, alias clashes
//! - **Dependency graph**: element references over petgraph, with cycle,
//!   missing-reference and impact analysis
//!
//! ## Pipeline
//!
//! ```text
//! dir/**/*.xml ──▶ FileValidator (parallel) ──▶ SchemaExtractor ──▶ SchemaRegistry
//!                                                                    │
//!                              ConflictDetector ◀────────────────────┤
//!                              DependencyGraph  ◀────────────────────┘
//! ```

pub mod config;
pub mod conflict;
pub mod error;
pub mod extract;
pub mod fingerprint;
pub mod graph;
pub mod registry;
pub mod schema;
pub mod validate;

pub use config::ValidatorConfig;
pub use conflict::{
    Conflict, ConflictDetectionReport, ConflictDetector, ConflictType, DefinitionPolicy, Severity,
};
pub use error::{Result, ValidationError};
pub use extract::{CsdlXmlExtractor, SchemaExtractor};
pub use fingerprint::Fingerprint;
pub use graph::{DependencyGraph, DependencyStatistics, GraphBuilder, ImpactAnalysis, ImpactLevel};
pub use registry::{ElementKey, SchemaInfo, SchemaRegistry};
pub use schema::{ElementDefinition, ElementKind, SchemaElements};
pub use validate::{
    DirectoryValidationResult, DirectoryValidator, FileResult, FileValidator, XmlFileValidator,
};
