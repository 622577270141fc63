//! Directory validation orchestrator
//!
//! Runs in two phases. Per-file validation fans out over a bounded rayon
//! pool and joins; everything after that (ingestion, conflict detection,
//! graph analysis) runs single-threaded over the files that passed.

use rayon::prelude::*;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use walkdir::{DirEntry, WalkDir};

use super::{DirectoryValidationResult, FileResult, FileValidator, XmlFileValidator};
use crate::config::{GraphConfig, ValidatorConfig};
use crate::conflict::{ConflictDetector, Severity};
use crate::error::{Result, ValidationError};
use crate::extract::{CsdlXmlExtractor, SchemaExtractor};
use crate::graph::GraphBuilder;
use crate::registry::{IngestOutcome, SchemaRegistry};

/// Validates every matching file under a directory, then checks them against each other
pub struct DirectoryValidator {
    validator: Arc<dyn FileValidator>,
    extractor: Arc<dyn SchemaExtractor>,
    /// None when validation is sequential
    pool: Option<rayon::ThreadPool>,
    max_concurrency: usize,
    detector: ConflictDetector,
    detect_aliases: bool,
    graph_builder: GraphBuilder,
    graph_config: GraphConfig,
    skip_prefixes: Vec<String>,
    default_pattern: String,
}

impl std::fmt::Debug for DirectoryValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryValidator")
            .field("max_concurrency", &self.max_concurrency)
            .field("detector", &self.detector)
            .field("default_pattern", &self.default_pattern)
            .finish_non_exhaustive()
    }
}

impl DirectoryValidator {
    /// Default collaborators, default configuration
    pub fn new() -> Result<Self> {
        Self::with_config(&ValidatorConfig::default())
    }

    pub fn with_config(config: &ValidatorConfig) -> Result<Self> {
        Self::with_collaborators(
            config,
            Arc::new(XmlFileValidator::new()),
            Arc::new(CsdlXmlExtractor::new()),
        )
    }

    pub fn with_collaborators(
        config: &ValidatorConfig,
        validator: Arc<dyn FileValidator>,
        extractor: Arc<dyn SchemaExtractor>,
    ) -> Result<Self> {
        let max_concurrency = config.validation.max_concurrency.max(1);
        let pool = if max_concurrency > 1 {
            Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(max_concurrency)
                    .thread_name(|i| format!("csdl-validate-{}", i))
                    .build()?,
            )
        } else {
            None
        };

        Ok(Self {
            validator,
            extractor,
            pool,
            max_concurrency,
            detector: ConflictDetector::from_config(&config.conflicts),
            detect_aliases: config.conflicts.detect_alias_conflicts,
            graph_builder: GraphBuilder::from_config(&config.graph)?,
            graph_config: config.graph.clone(),
            skip_prefixes: config.validation.skip_prefixes.clone(),
            default_pattern: config.validation.file_pattern.clone(),
        })
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Validate with the configured file pattern
    pub fn validate_directory(&self, directory: impl AsRef<Path>) -> DirectoryValidationResult {
        let pattern = self.default_pattern.clone();
        self.validate_directory_with_pattern(directory, &pattern)
    }

    /// Never fails: access problems come back as a non-compliant result
    /// carrying one global error
    pub fn validate_directory_with_pattern(
        &self,
        directory: impl AsRef<Path>,
        pattern: &str,
    ) -> DirectoryValidationResult {
        let directory = directory.as_ref();
        let start = Instant::now();
        info!(directory = %directory.display(), pattern = %pattern, "validating directory");

        let mut result = match self.run(directory, pattern) {
            Ok(result) => result,
            Err(e) => {
                if e.is_file_access() {
                    error!(directory = %directory.display(), error = %e, "cannot read directory");
                } else {
                    error!(directory = %directory.display(), error = %e, "validation aborted");
                }
                DirectoryValidationResult::error(directory, e.to_string())
            }
        };
        result.validation_time_ms = start.elapsed().as_millis() as u64;

        info!(
            directory = %directory.display(),
            compliant = result.compliant,
            files = result.total_files,
            conflicts = result.conflicts.len(),
            elapsed_ms = result.validation_time_ms,
            "directory validation finished"
        );
        result
    }

    /// Release the worker pool
    pub fn shutdown(self) {
        debug!(threads = self.max_concurrency, "shutting down validator");
        drop(self.pool);
    }

    // ========== Phases ==========

    fn run(&self, directory: &Path, pattern: &str) -> Result<DirectoryValidationResult> {
        let files = self.discover(directory, pattern)?;
        let mut result = DirectoryValidationResult {
            directory_path: directory.to_path_buf(),
            validated_at: chrono::Utc::now(),
            total_files: files.len(),
            ..Default::default()
        };

        if files.is_empty() {
            result.compliant = true;
            result
                .global_warnings
                .push("No XML files found matching the pattern".to_string());
            return Ok(result);
        }

        // Barrier: every per-file result is in before cross-file analysis
        result.file_results = self.validate_files(&files);
        result.valid_files = result.file_results.values().filter(|r| r.compliant).count();
        result.invalid_files = result.total_files - result.valid_files;

        let registry = self.ingest(&files, &result.file_results, &mut result.global_warnings);
        result.namespace_to_files = registry.namespace_to_files().clone();

        result.conflicts = self.detector.detect(&registry);
        if self.detect_aliases {
            result
                .conflicts
                .extend(self.detector.detect_alias_conflicts(&registry));
        }

        let graph = self.graph_builder.build(registry.schemas());
        if self.graph_config.detect_cycles {
            result.reference_issues.extend(graph.cycle_conflicts());
        }
        if self.graph_config.report_missing_references {
            result
                .reference_issues
                .extend(graph.missing_reference_conflicts());
        }
        for failure in graph.extraction_failures() {
            result.global_warnings.push(format!(
                "Could not read type reference '{}' of '{}' in {}: {}",
                failure.reference, failure.from, failure.source_file, failure.reason
            ));
        }

        for conflict in result.conflicts.iter().chain(&result.reference_issues) {
            match conflict.severity() {
                Severity::Error => result.global_errors.push(conflict.to_string()),
                Severity::Warning => result.global_warnings.push(conflict.to_string()),
            }
        }

        if result.invalid_files > 0 {
            result.global_warnings.push(format!(
                "{} out of {} files failed individual validation",
                result.invalid_files, result.total_files
            ));
        }

        result.dependency_statistics = Some(graph.statistics());
        result.dependency_graph = Some(Arc::new(graph));
        result.compliant = result.invalid_files == 0
            && result.conflicts.is_empty()
            && result.global_errors.is_empty();

        Ok(result)
    }

    /// Matching files as (relative key, path), sorted by key
    fn discover(&self, directory: &Path, pattern: &str) -> Result<Vec<(String, PathBuf)>> {
        if !directory.exists() {
            return Err(ValidationError::DirectoryNotFound(directory.to_path_buf()));
        }
        if !directory.is_dir() {
            return Err(ValidationError::NotADirectory(directory.to_path_buf()));
        }

        let matcher = glob::Pattern::new(pattern).map_err(|source| ValidationError::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let mut files = Vec::new();
        let walker = WalkDir::new(directory)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|entry| !self.is_skipped(directory, entry));

        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let key = relative_key(directory, entry.path());
            let name = entry.file_name().to_string_lossy();
            if matcher.matches(&name) || matcher.matches(&key) {
                files.push((key, entry.into_path()));
            }
        }
        files.sort();

        debug!(directory = %directory.display(), count = files.len(), "discovered files");
        Ok(files)
    }

    fn is_skipped(&self, root: &Path, entry: &DirEntry) -> bool {
        if entry.depth() == 0 {
            return false;
        }
        let mut key = relative_key(root, entry.path());
        if entry.file_type().is_dir() {
            key.push('/');
        }
        self.skip_prefixes.iter().any(|prefix| key.starts_with(prefix.as_str()))
    }

    fn validate_files(&self, files: &[(String, PathBuf)]) -> BTreeMap<String, FileResult> {
        match &self.pool {
            Some(pool) if files.len() > 1 => {
                let results = Mutex::new(BTreeMap::new());
                pool.install(|| {
                    files.par_iter().for_each(|(key, path)| {
                        let file_result = self.validate_file(key, path);
                        results
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .insert(key.clone(), file_result);
                    });
                });
                results.into_inner().unwrap_or_else(PoisonError::into_inner)
            }
            _ => files
                .iter()
                .map(|(key, path)| (key.clone(), self.validate_file(key, path)))
                .collect(),
        }
    }

    /// Errors and panics from the validator become a failed result
    fn validate_file(&self, key: &str, path: &Path) -> FileResult {
        match panic::catch_unwind(AssertUnwindSafe(|| self.validator.validate(path))) {
            Ok(Ok(mut file_result)) => {
                file_result.file_name = key.to_string();
                file_result
            }
            Ok(Err(e)) => {
                warn!(file = %key, error = %e, "file validator failed");
                FileResult::failed(key, format!("Validation failed: {}", e))
            }
            Err(payload) => {
                let message = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                warn!(file = %key, panic = %message, "file validator panicked");
                FileResult::failed(key, format!("Validation failed: {}", message))
            }
        }
    }

    /// Extract and index compliant files in key order
    fn ingest(
        &self,
        files: &[(String, PathBuf)],
        file_results: &BTreeMap<String, FileResult>,
        warnings: &mut Vec<String>,
    ) -> SchemaRegistry {
        let mut registry = SchemaRegistry::new();

        for (key, path) in files {
            if !file_results.get(key).map(|r| r.compliant).unwrap_or(false) {
                continue;
            }
            match self.extractor.extract(path) {
                Ok(schemas) => {
                    for schema in schemas {
                        if let IngestOutcome::SkippedNoNamespace = registry.ingest(schema, key.clone()) {
                            warnings.push(format!("Schema without a namespace in {} was skipped", key));
                        }
                    }
                }
                Err(e) => {
                    warn!(file = %key, error = %e, "schema extraction failed");
                    warnings.push(format!("Failed to extract schema elements from {}: {}", key, e));
                }
            }
        }

        debug!(
            namespaces = registry.namespace_to_files().len(),
            elements = registry.element_count(),
            "registry populated"
        );
        registry
    }
}

/// `/`-separated path of `path` below `root`
fn relative_key(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::ConflictType;
    use crate::schema::SchemaElements;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn schema(namespace: &str, body: &str) -> String {
        format!(
            r#"<edmx:Edmx Version="4.0" xmlns:edmx="http://docs.oasis-open.org/odata/ns/edmx">
  <edmx:DataServices>
    <Schema Namespace="{}" xmlns="http://docs.oasis-open.org/odata/ns/edm">
      {}
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#,
            namespace, body
        )
    }

    fn sequential() -> ValidatorConfig {
        let mut config = ValidatorConfig::default();
        config.validation.max_concurrency = 1;
        config
    }

    // =========================================================================
    // Discovery
    // =========================================================================

    #[test]
    fn test_missing_directory() {
        let validator = DirectoryValidator::new().unwrap();
        let result = validator.validate_directory("/definitely/not/here");
        assert!(!result.compliant);
        assert_eq!(result.global_errors.len(), 1);
        assert!(result.global_errors[0].contains("does not exist"));
    }

    #[test]
    fn test_file_instead_of_directory() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.xml", &schema("A", ""));
        let validator = DirectoryValidator::new().unwrap();
        let result = validator.validate_directory(dir.path().join("a.xml"));
        assert!(!result.compliant);
        assert!(result.global_errors[0].contains("not a directory"));
    }

    #[test]
    fn test_invalid_pattern() {
        let dir = TempDir::new().unwrap();
        let validator = DirectoryValidator::new().unwrap();
        let result = validator.validate_directory_with_pattern(dir.path(), "[");
        assert!(!result.compliant);
        assert!(result.global_errors[0].contains("Invalid file pattern"));
    }

    #[test]
    fn test_empty_directory_is_compliant() {
        let dir = TempDir::new().unwrap();
        let validator = DirectoryValidator::new().unwrap();
        let result = validator.validate_directory(dir.path());
        assert!(result.compliant);
        assert_eq!(result.total_files, 0);
        assert!(result.conflicts.is_empty());
        assert_eq!(result.global_warnings.len(), 1);
    }

    #[test]
    fn test_recursive_keys_and_skip_prefixes() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a/model.xml", &schema("A", r#"<ComplexType Name="X"/>"#));
        write(dir.path(), "b/model.xml", &schema("B", r#"<ComplexType Name="Y"/>"#));
        write(dir.path(), "target/model.xml", &schema("C", r#"<ComplexType Name="Z"/>"#));
        write(dir.path(), "notes.txt", "not xml");

        let validator = DirectoryValidator::with_config(&sequential()).unwrap();
        let result = validator.validate_directory(dir.path());

        let keys: Vec<&String> = result.file_results.keys().collect();
        assert_eq!(keys, vec!["a/model.xml", "b/model.xml"]);
        assert!(result.compliant);
    }

    // =========================================================================
    // Cross-file analysis
    // =========================================================================

    #[test]
    fn test_invalid_file_excluded_from_analysis() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "good.xml", &schema("NS", r#"<ComplexType Name="Address"/>"#));
        write(dir.path(), "broken.xml", r#"<Schema Namespace="NS"><ComplexType Name="Address">"#);

        let validator = DirectoryValidator::with_config(&sequential()).unwrap();
        let result = validator.validate_directory(dir.path());

        assert!(!result.compliant);
        assert_eq!(result.valid_files, 1);
        assert_eq!(result.invalid_files, 1);
        assert!(result.conflicts.is_empty());
        assert!(!result.file_result("broken.xml").unwrap().compliant);
        assert!(result
            .global_warnings
            .iter()
            .any(|w| w == "1 out of 2 files failed individual validation"));
    }

    #[test]
    fn test_duplicate_element_is_global_error() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "one.xml",
            &schema("NS", r#"<EntityType Name="Customer"><Property Name="Id" Type="Edm.Int32"/></EntityType>"#),
        );
        write(
            dir.path(),
            "two.xml",
            &schema("NS", r#"<EntityType Name="Customer"><Property Name="Code" Type="Edm.String"/></EntityType>"#),
        );

        let validator = DirectoryValidator::new().unwrap();
        let result = validator.validate_directory(dir.path());

        assert!(!result.compliant);
        assert!(result.has_conflicts());
        assert!(result.has_namespace_conflicts());
        assert_eq!(result.conflicts_of_type(ConflictType::DuplicateElement).count(), 1);
        assert!(result.global_errors.iter().any(|e| e.contains("Customer")));
        validator.shutdown();
    }

    #[test]
    fn test_missing_reference_is_warning_only() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "orders.xml",
            &schema(
                "Sales",
                r#"<EntityType Name="Order"><NavigationProperty Name="Buyer" Type="Sales.Customer"/></EntityType>"#,
            ),
        );

        let validator = DirectoryValidator::with_config(&sequential()).unwrap();
        let result = validator.validate_directory(dir.path());

        assert!(result.compliant);
        assert_eq!(result.reference_issues.len(), 1);
        assert!(result.global_warnings.iter().any(|w| w.contains("Sales.Customer")));
        assert!(result.dependency_graph.is_some());
    }

    // =========================================================================
    // Collaborators
    // =========================================================================

    struct Exploding;

    impl FileValidator for Exploding {
        fn validate(&self, path: &Path) -> Result<FileResult> {
            if path.ends_with("panic.xml") {
                panic!("validator exploded");
            }
            Err(ValidationError::extraction(path.display().to_string(), "refused"))
        }
    }

    #[test]
    fn test_validator_failures_become_results() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "panic.xml", "<Schema/>");
        write(dir.path(), "error.xml", "<Schema/>");

        let validator = DirectoryValidator::with_collaborators(
            &ValidatorConfig::default(),
            Arc::new(Exploding),
            Arc::new(CsdlXmlExtractor::new()),
        )
        .unwrap();
        let result = validator.validate_directory(dir.path());

        assert!(!result.compliant);
        assert_eq!(result.invalid_files, 2);
        let panicked = result.file_result("panic.xml").unwrap();
        assert!(panicked.errors[0].contains("validator exploded"));
        let errored = result.file_result("error.xml").unwrap();
        assert!(errored.errors[0].contains("refused"));
    }

    struct FailingExtractor;

    impl SchemaExtractor for FailingExtractor {
        fn extract(&self, path: &Path) -> Result<Vec<SchemaElements>> {
            Err(ValidationError::extraction(path.display().to_string(), "unreadable"))
        }
    }

    #[test]
    fn test_extraction_failure_is_warning() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.xml", &schema("A", r#"<ComplexType Name="X"/>"#));

        let validator = DirectoryValidator::with_collaborators(
            &sequential(),
            Arc::new(XmlFileValidator::new()),
            Arc::new(FailingExtractor),
        )
        .unwrap();
        let result = validator.validate_directory(dir.path());

        assert!(result.compliant);
        assert!(result.file_result("a.xml").unwrap().compliant);
        assert!(result.namespace_to_files.is_empty());
        assert!(result.global_warnings.iter().any(|w| w.contains("unreadable")));
    }

    struct Counting(AtomicUsize);

    impl FileValidator for Counting {
        fn validate(&self, path: &Path) -> Result<FileResult> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(FileResult::compliant(path.display().to_string()))
        }
    }

    #[test]
    fn test_parallel_validation_collects_every_file() {
        let dir = TempDir::new().unwrap();
        for i in 0..32 {
            write(dir.path(), &format!("f{:02}.xml", i), &schema(&format!("NS{}", i), ""));
        }

        let counter = Arc::new(Counting(AtomicUsize::new(0)));
        let validator = DirectoryValidator::with_collaborators(
            &ValidatorConfig::default(),
            counter.clone(),
            Arc::new(CsdlXmlExtractor::new()),
        )
        .unwrap();
        assert_eq!(validator.max_concurrency(), 4);

        let result = validator.validate_directory(dir.path());
        assert_eq!(counter.0.load(Ordering::SeqCst), 32);
        assert_eq!(result.file_results.len(), 32);
        assert!(result.file_results.iter().all(|(k, r)| k == &r.file_name));
        assert!(result.compliant);
    }
}
