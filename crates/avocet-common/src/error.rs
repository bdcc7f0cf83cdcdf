//! Error types for Avocet.

use crate::types::DataType;
use thiserror::Error;

/// Result type alias using AvocetError.
pub type Result<T> = std::result::Result<T, AvocetError>;

/// Errors that can occur in Avocet operations.
#[derive(Debug, Error)]
pub enum AvocetError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("Page not found: {page_number}")]
    PageNotFound { page_number: u32 },

    #[error("Page size mismatch: expected {expected}, got {actual}")]
    PageSizeMismatch { expected: usize, actual: usize },

    #[error("Page full, unable to store index entries")]
    PageFull,

    // Format errors
    #[error("Format violation: {0}")]
    FormatViolation(String),

    // Index errors
    #[error("Unsupported index column type: {0}")]
    UnsupportedIndexColumnType(DataType),

    #[error("Unmapped index character: {0:?}")]
    UnmappedIndexCharacter(char),

    #[error("Cannot compare index entries with {left} and {right} entry columns")]
    IncompatibleEntryShape { left: usize, right: usize },

    // Type errors
    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    // Table creation errors
    #[error("Invalid table definition: {0}")]
    InvalidTableDefinition(String),

    #[error("Table already exists: {0}")]
    TableAlreadyExists(String),
}
