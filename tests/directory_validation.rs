//! Directory Validation Tests
//!
//! Runs the full pipeline over the fixture directories.

use std::path::{Path, PathBuf};

use csdl_conflicts::{ConflictType, DirectoryValidator, ValidatorConfig};

fn fixture(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures").join(name)
}

fn sequential() -> ValidatorConfig {
    let mut config = ValidatorConfig::default();
    config.validation.max_concurrency = 1;
    config
}

// =============================================================================
// Conflict Scenarios
// =============================================================================

#[test]
fn test_conflicted_models_directory() {
    let validator = DirectoryValidator::new().unwrap();
    let result = validator.validate_directory(fixture("conflicted"));

    assert_eq!(result.total_files, 2);
    assert_eq!(result.valid_files, 2);
    assert!(!result.compliant);

    let duplicates: Vec<_> = result
        .conflicts_of_type(ConflictType::DuplicateElement)
        .collect();
    assert_eq!(duplicates.len(), 1);
    match duplicates[0].element_name.as_deref() {
        Some("Customer") => {}
        other => panic!("Expected Customer duplicate, got {:?}", other),
    }
    assert!(duplicates[0].description.contains("Customer"));
    assert_eq!(duplicates[0].files, vec!["customers.xml", "products.xml"]);

    // Address and ProductInfo each live in one file
    assert!(!result.conflicts.iter().any(|c| {
        matches!(c.element_name.as_deref(), Some("Address") | Some("ProductInfo"))
    }));

    assert!(result.has_namespace_conflicts());
    assert_eq!(
        result.files_for_namespace("Conflicted.Models").unwrap().len(),
        2
    );
    validator.shutdown();
}

#[test]
fn test_alias_directory() {
    let validator = DirectoryValidator::with_config(&sequential()).unwrap();
    let result = validator.validate_directory(fixture("aliases"));

    let aliases: Vec<_> = result
        .conflicts_of_type(ConflictType::AliasConflict)
        .collect();
    assert_eq!(aliases.len(), 1);
    assert!(aliases[0].description.contains("Billing.Service"));
    assert!(aliases[0].description.contains("Shipping.Service"));
    assert!(aliases[0].files.contains(&"billing.xml".to_string()));
    assert!(aliases[0].files.contains(&"shipping.xml".to_string()));

    assert!(!result.compliant);
    assert!(result.has_global_errors());
}

// =============================================================================
// Clean Directory
// =============================================================================

#[test]
fn test_clean_directory_is_compliant() {
    let validator = DirectoryValidator::new().unwrap();
    let result = validator.validate_directory(fixture("clean"));

    assert!(result.compliant, "{}", result.summary());
    assert_eq!(result.total_files, 2);
    assert!(result.conflicts.is_empty());
    assert!(result.global_errors.is_empty());
    assert!(result.file_result("README.txt").is_none());

    // Order <-> OrderLine navigation is reported, not fatal
    let cycles: Vec<_> = result
        .conflicts_of_type(ConflictType::CircularReference)
        .collect();
    assert_eq!(cycles.len(), 1);
    assert!(cycles[0].description.contains("Sales.Order"));
    assert_eq!(result.conflicts_of_type(ConflictType::MissingReference).count(), 0);

    let graph = result.dependency_graph.as_ref().unwrap();
    assert!(graph.contains("Catalog.TopProducts(Edm.Int32)"));
    assert!(graph
        .all_dependencies("Sales.OrderLine")
        .contains("Catalog.Dimensions"));
    assert!(graph
        .all_dependents("Catalog.Product")
        .contains("Sales.SalesService.functionImport.TopProducts"));

    let stats = result.dependency_statistics.as_ref().unwrap();
    assert_eq!(stats.circular_dependencies, 1);
    assert_eq!(stats.total_nodes, graph.node_count());
}

#[test]
fn test_result_serializes_to_json() {
    let validator = DirectoryValidator::with_config(&sequential()).unwrap();
    let result = validator.validate_directory(fixture("clean"));

    let json = serde_json::to_value(&result).unwrap();
    assert_eq!(json["compliant"], serde_json::json!(true));
    assert!(json["file_results"]["catalog.xml"]["compliant"].as_bool().unwrap());
    assert!(json.get("dependency_graph").is_none());
}

// =============================================================================
// Mixed Validity
// =============================================================================

#[test]
fn test_invalid_files_reported_and_excluded() {
    let validator = DirectoryValidator::new().unwrap();
    let result = validator.validate_directory(fixture("mixed"));

    assert_eq!(result.total_files, 3);
    assert_eq!(result.valid_files, 1);
    assert_eq!(result.invalid_files, 2);
    assert!(!result.compliant);

    // Both Point definitions would collide, but only one file is valid
    assert!(result.conflicts.is_empty());

    let broken = result.file_result("nested/broken.xml").unwrap();
    assert!(broken.errors_by_type.contains_key("syntax"));
    let unnamed = result.file_result("nested/unnamed.xml").unwrap();
    assert!(unnamed.errors_by_type.contains_key("structure"));

    assert!(result
        .global_warnings
        .contains(&"2 out of 3 files failed individual validation".to_string()));
}

#[test]
fn test_pattern_selects_files() {
    let validator = DirectoryValidator::with_config(&sequential()).unwrap();

    let result = validator.validate_directory_with_pattern(fixture("mixed"), "valid*.xml");
    assert_eq!(result.total_files, 1);
    assert!(result.compliant);

    let result = validator.validate_directory_with_pattern(fixture("mixed"), "nested/*.xml");
    assert_eq!(result.total_files, 2);
    assert!(!result.compliant);

    let result = validator.validate_directory_with_pattern(fixture("clean"), "*.json");
    assert_eq!(result.total_files, 0);
    assert!(result.compliant);
}

#[test]
fn test_sequential_and_parallel_agree() {
    let sequential = DirectoryValidator::with_config(&sequential()).unwrap();
    let parallel = DirectoryValidator::new().unwrap();

    for name in ["conflicted", "aliases", "clean", "mixed"] {
        let a = sequential.validate_directory(fixture(name));
        let b = parallel.validate_directory(fixture(name));
        assert_eq!(a.compliant, b.compliant, "{}", name);
        assert_eq!(a.file_results, b.file_results, "{}", name);
        assert_eq!(a.conflicts, b.conflicts, "{}", name);
        assert_eq!(a.global_errors, b.global_errors, "{}", name);
    }
}

#[test]
fn test_independent_validators_run_concurrently() {
    let handles: Vec<_> = ["conflicted", "clean"]
        .into_iter()
        .map(|name| {
            std::thread::spawn(move || {
                let validator = DirectoryValidator::new().unwrap();
                let result = validator.validate_directory(fixture(name));
                validator.shutdown();
                (name, result.compliant)
            })
        })
        .collect();

    for handle in handles {
        match handle.join().unwrap() {
            ("conflicted", compliant) => assert!(!compliant),
            ("clean", compliant) => assert!(compliant),
            other => panic!("Unexpected result {:?}", other),
        }
    }
}

// =============================================================================
// Access Errors
// =============================================================================

#[test]
fn test_nonexistent_directory() {
    let validator = DirectoryValidator::new().unwrap();
    let result = validator.validate_directory(fixture("does-not-exist"));

    assert!(!result.compliant);
    assert_eq!(result.total_files, 0);
    assert_eq!(result.global_errors.len(), 1);
    assert!(result.global_errors[0].starts_with("Directory does not exist"));
}

#[test]
fn test_empty_directory() {
    let dir = tempfile::TempDir::new().unwrap();
    let validator = DirectoryValidator::new().unwrap();
    let result = validator.validate_directory(dir.path());

    assert!(result.compliant);
    assert_eq!(result.total_files, 0);
    assert!(result.conflicts.is_empty());
    assert!(result.file_results.is_empty());
}
