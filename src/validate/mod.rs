//! Per-file validation contract and directory-level results
//!
//! Single-file well-formedness checking sits behind [`FileValidator`]; the
//! [`DirectoryValidator`] only consumes its verdicts and runs cross-file
//! analysis over the files that passed.

pub mod directory;
pub mod xml;

pub use directory::DirectoryValidator;
pub use xml::XmlFileValidator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::conflict::{Conflict, ConflictType};
use crate::error::Result;
use crate::graph::{DependencyGraph, DependencyStatistics};

// =============================================================================
// Per-file
// =============================================================================

/// Validates one file in isolation
pub trait FileValidator: Send + Sync {
    /// `Err` is reserved for failures that prevent validation altogether;
    /// structural problems belong in the returned result
    fn validate(&self, path: &Path) -> Result<FileResult>;
}

/// Verdict for a single file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileResult {
    pub file_name: String,
    pub compliant: bool,
    #[serde(default)]
    pub errors: Vec<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
    #[serde(default)]
    pub errors_by_type: BTreeMap<String, Vec<String>>,
}

impl FileResult {
    pub fn compliant(file_name: impl Into<String>) -> Self {
        Self {
            file_name: file_name.into(),
            compliant: true,
            ..Default::default()
        }
    }

    /// Non-compliant result standing in for a validator that failed outright
    pub fn failed(file_name: impl Into<String>, message: impl Into<String>) -> Self {
        let mut result = Self::compliant(file_name);
        result.add_error("exception", message);
        result
    }

    pub fn add_error(&mut self, error_type: &str, message: impl Into<String>) {
        let message = message.into();
        self.compliant = false;
        self.errors_by_type
            .entry(error_type.to_string())
            .or_default()
            .push(message.clone());
        self.errors.push(message);
    }

    pub fn add_warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

// =============================================================================
// Directory
// =============================================================================

/// Everything one directory run produced
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectoryValidationResult {
    pub compliant: bool,
    /// Keyed by path relative to the validated directory
    pub file_results: BTreeMap<String, FileResult>,
    /// Cross-file definition conflicts. Reference-graph findings are not in
    /// here; see `reference_issues`, or `conflicts_of_type` for both lists.
    pub conflicts: Vec<Conflict>,
    /// Circular and missing references, reported as warnings
    pub reference_issues: Vec<Conflict>,
    pub global_errors: Vec<String>,
    pub global_warnings: Vec<String>,
    pub namespace_to_files: BTreeMap<String, BTreeSet<String>>,
    pub directory_path: PathBuf,
    pub validation_time_ms: u64,
    pub validated_at: DateTime<Utc>,
    pub total_files: usize,
    pub valid_files: usize,
    pub invalid_files: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency_statistics: Option<DependencyStatistics>,
    #[serde(skip)]
    pub dependency_graph: Option<Arc<DependencyGraph>>,
}

impl DirectoryValidationResult {
    /// Run that could not start (missing directory, bad pattern)
    pub fn error(directory: &Path, message: impl Into<String>) -> Self {
        Self {
            compliant: false,
            global_errors: vec![message.into()],
            directory_path: directory.to_path_buf(),
            validated_at: Utc::now(),
            ..Default::default()
        }
    }

    pub fn file_result(&self, file: &str) -> Option<&FileResult> {
        self.file_results.get(file)
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }

    pub fn has_global_errors(&self) -> bool {
        !self.global_errors.is_empty()
    }

    /// Some namespace is spread over more than one file
    pub fn has_namespace_conflicts(&self) -> bool {
        self.namespace_to_files.values().any(|files| files.len() > 1)
    }

    pub fn files_for_namespace(&self, namespace: &str) -> Option<&BTreeSet<String>> {
        self.namespace_to_files.get(namespace)
    }

    pub fn conflicts_of_type(&self, conflict_type: ConflictType) -> impl Iterator<Item = &Conflict> {
        self.conflicts
            .iter()
            .chain(&self.reference_issues)
            .filter(move |c| c.conflict_type == conflict_type)
    }

    pub fn summary(&self) -> String {
        format!(
            "Directory: {}\nFiles: {} total, {} valid, {} invalid\nConflicts: {} | Global errors: {} | Global warnings: {}\nOverall: {} ({} ms)",
            self.directory_path.display(),
            self.total_files,
            self.valid_files,
            self.invalid_files,
            self.conflicts.len(),
            self.global_errors.len(),
            self.global_warnings.len(),
            if self.compliant { "COMPLIANT" } else { "NON-COMPLIANT" },
            self.validation_time_ms
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_result_errors_by_type() {
        let mut result = FileResult::compliant("a.xml");
        assert!(result.compliant);

        result.add_error("syntax", "unexpected end of document");
        result.add_error("structure", "missing Namespace");
        result.add_error("structure", "missing Name");

        assert!(!result.compliant);
        assert_eq!(result.errors.len(), 3);
        assert_eq!(result.errors_by_type["structure"].len(), 2);
    }

    #[test]
    fn test_failed_result() {
        let result = FileResult::failed("b.xml", "boom");
        assert!(!result.compliant);
        assert_eq!(result.errors, vec!["boom"]);
        assert_eq!(result.errors_by_type["exception"], vec!["boom"]);
    }

    #[test]
    fn test_error_result_summary() {
        let result = DirectoryValidationResult::error(Path::new("/nowhere"), "Directory does not exist: /nowhere");
        assert!(!result.compliant);
        assert!(result.has_global_errors());
        assert!(result.summary().contains("NON-COMPLIANT"));
    }

    #[test]
    fn test_namespace_helpers() {
        let mut result = DirectoryValidationResult::default();
        result
            .namespace_to_files
            .insert("NS".to_string(), ["a.xml".to_string()].into_iter().collect());
        assert!(!result.has_namespace_conflicts());

        result
            .namespace_to_files
            .get_mut("NS")
            .unwrap()
            .insert("b.xml".to_string());
        assert!(result.has_namespace_conflicts());
        assert_eq!(result.files_for_namespace("NS").unwrap().len(), 2);
        assert!(result.files_for_namespace("Other").is_none());
    }
}
