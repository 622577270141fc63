//! Configuration management for directory validation
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (csdl-conflicts.toml)
//! - Environment variables (CSDL_CONFLICTS__*)
//!
//! ## Example config file (csdl-conflicts.toml):
//! ```toml
//! [validation]
//! max_concurrency = 8
//! file_pattern = "*.xml"
//!
//! [conflicts]
//! definition_policy = "structural"
//! detect_alias_conflicts = true
//!
//! [graph]
//! primitive_prefix = "Edm."
//! detect_cycles = true
//! ```

use config_crate::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};

use crate::conflict::DefinitionPolicy;

/// Main configuration for a validation run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidatorConfig {
    /// File discovery and per-file validation
    #[serde(default)]
    pub validation: ValidationConfig,

    /// Cross-file conflict detection
    #[serde(default)]
    pub conflicts: ConflictConfig,

    /// Dependency graph analysis
    #[serde(default)]
    pub graph: GraphConfig,
}

/// Validation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Worker pool size for per-file validation
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,

    /// Glob matched against file names
    #[serde(default = "default_file_pattern")]
    pub file_pattern: String,

    /// Relative path prefixes never validated
    #[serde(default = "default_skip_prefixes")]
    pub skip_prefixes: Vec<String>,
}

/// Conflict detection configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictConfig {
    /// How same-kind redefinitions are compared
    #[serde(default)]
    pub definition_policy: DefinitionPolicy,

    #[serde(default = "default_true")]
    pub detect_annotation_conflicts: bool,

    #[serde(default = "default_true")]
    pub detect_alias_conflicts: bool,
}

/// Dependency graph configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    /// Type names with this prefix never produce edges
    #[serde(default = "default_primitive_prefix")]
    pub primitive_prefix: String,

    #[serde(default = "default_true")]
    pub detect_cycles: bool,

    #[serde(default = "default_true")]
    pub report_missing_references: bool,

    /// Attach "did you mean" hints to missing references
    #[serde(default = "default_true")]
    pub suggest_similar: bool,
}

// Default value functions
fn default_max_concurrency() -> usize {
    4
}

fn default_file_pattern() -> String {
    "*.xml".to_string()
}

fn default_skip_prefixes() -> Vec<String> {
    vec!["target/".to_string(), ".git/".to_string()]
}

fn default_primitive_prefix() -> String {
    "Edm.".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_concurrency: default_max_concurrency(),
            file_pattern: default_file_pattern(),
            skip_prefixes: default_skip_prefixes(),
        }
    }
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            definition_policy: DefinitionPolicy::default(),
            detect_annotation_conflicts: true,
            detect_alias_conflicts: true,
        }
    }
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            primitive_prefix: default_primitive_prefix(),
            detect_cycles: true,
            report_missing_references: true,
            suggest_similar: true,
        }
    }
}

impl ValidatorConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file over the defaults
    pub fn load_from(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        let config_locations = [
            "csdl-conflicts.toml",
            ".csdl-conflicts.toml",
            "config/csdl-conflicts.toml",
        ];

        for location in config_locations {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(config_dir) = directories::ProjectDirs::from("dev", "csdl", "csdl-conflicts") {
            let xdg_config = config_dir.config_dir().join("csdl-conflicts.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::with_name(path).required(true));
        }

        // CSDL_CONFLICTS__VALIDATION__MAX_CONCURRENCY=8
        builder = builder.add_source(
            Environment::with_prefix("CSDL_CONFLICTS")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config = builder.build()?;
        let mut loaded: Self = config.try_deserialize()?;
        loaded.validation.max_concurrency = loaded.validation.max_concurrency.max(1);
        Ok(loaded)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &str) -> std::io::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        std::fs::write(path, content)
    }
}
