//! Error types for directory validation

use std::path::PathBuf;
use thiserror::Error;

/// Result type for validation operations
pub type Result<T> = std::result::Result<T, ValidationError>;

/// Validation errors
#[derive(Error, Debug)]
pub enum ValidationError {
    #[error("Directory does not exist: {}", .0.display())]
    DirectoryNotFound(PathBuf),

    #[error("Path is not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Invalid file pattern '{pattern}': {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("Failed to extract schema from {file}: {message}")]
    Extraction { file: String, message: String },

    #[error("Malformed type reference '{reference}': {reason}")]
    MalformedType { reference: String, reason: String },

    #[error("Pattern error: {0}")]
    Regex(#[from] regex::Error),

    #[error("Worker pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Configuration error: {0}")]
    Config(#[from] config_crate::ConfigError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ValidationError {
    pub fn extraction(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Extraction {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn malformed_type(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedType {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that mean the directory itself could not be read
    pub fn is_file_access(&self) -> bool {
        matches!(
            self,
            Self::DirectoryNotFound(_) | Self::NotADirectory(_) | Self::Walk(_)
        )
    }
}
