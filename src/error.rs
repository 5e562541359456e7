// src/error.rs

use std::path::PathBuf;
use thiserror::Error;

/// Core error types for Modsmith
#[derive(Error, Debug)]
pub enum Error {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Instruction or manifest markup could not be read
    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    /// JSON encoding of stored records failed
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A search pattern failed to compile
    #[error("Invalid search pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Zip archive errors
    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// Archive framing not recognized or entry missing
    #[error("Archive error: {0}")]
    Archive(String),

    /// Remote connection refused an operation
    #[error("Transport error: {0}")]
    Transport(String),

    /// Instruction tree is missing required structure
    #[error("Malformed document: {0}")]
    MalformedDocument(String),

    /// Target file does not exist
    #[error("Missing file: {}", .0.display())]
    MissingFile(PathBuf),

    /// A fatal search clause found nothing
    #[error("Pattern not found in {}: {pattern}", path.display())]
    PatternNotFound { path: PathBuf, pattern: String },

    /// A required-absent search clause matched
    #[error("Forbidden pattern present in {}: {pattern}", path.display())]
    PatternForbidden { path: PathBuf, pattern: String },

    /// A search clause could not be compiled against a file
    #[error("Invalid search pattern in {}: {pattern}", path.display())]
    InvalidSearch { path: PathBuf, pattern: String },

    /// A change cannot be reversed
    #[error("Cannot undo change in {}: {pattern}", path.display())]
    Irreversible { path: PathBuf, pattern: String },

    /// Target file is not readable text
    #[error("Unreadable file: {}", .0.display())]
    Unreadable(PathBuf),

    /// Permission repair failed
    #[error("Not writable: {}", .0.display())]
    NotWritable(PathBuf),

    /// No install section accepts the host version
    #[error("Package {package} does not support version {version}")]
    IncompatibleVersion { package: String, version: String },

    /// Same or newer version already installed
    #[error("Package {package} is already installed at version {version}")]
    AlreadyInstalled { package: String, version: String },

    /// Package has no authoritative install record
    #[error("Package '{0}' is not installed")]
    NotInstalled(String),

    /// Database initialization error
    #[error("Failed to initialize database: {0}")]
    InitError(String),

    /// Database not found
    #[error("Database not found at path: {0}")]
    DatabaseNotFound(String),
}

/// Result type alias using Modsmith's Error type
pub type Result<T> = std::result::Result<T, Error>;
