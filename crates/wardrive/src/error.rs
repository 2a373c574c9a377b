//! Error types for wardrive.
//!
//! This module defines all error types used throughout the wardrive crate,
//! providing detailed context for debugging and user-friendly error messages.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for wardrive operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Capture Database Errors ===
    /// Failed to open a capture database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Rule Store Errors ===
    /// A rule was rejected before it reached the rule file.
    #[error("invalid rule: {message}")]
    InvalidRule {
        /// Description of what is wrong with the rule.
        message: String,
    },

    /// The rule already exists in the target section.
    #[error("'{value}' already exists in {section}")]
    DuplicateRule {
        /// The rejected value.
        value: String,
        /// Human-readable name of the section.
        section: String,
    },

    /// The rule file does not contain the requested section header.
    #[error("section {section} not found in {path}")]
    SectionMissing {
        /// The missing header, including brackets.
        section: String,
        /// Path to the rule file.
        path: PathBuf,
    },

    // === Input Errors ===
    /// An exclusion zone string could not be parsed.
    #[error("invalid exclusion zone '{input}': {reason}")]
    InvalidZone {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An input file does not exist.
    #[error("input file not found: {path}")]
    InputNotFound {
        /// The missing path.
        path: PathBuf,
    },

    // === Backup Errors ===
    /// A backup copy does not match its source.
    #[error("backup of {path} does not match the original")]
    BackupMismatch {
        /// The source file whose copy differs.
        path: PathBuf,
    },

    // === Watch Errors ===
    /// The filesystem watcher failed.
    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for wardrive operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create an invalid rule error.
    #[must_use]
    pub fn invalid_rule(message: impl Into<String>) -> Self {
        Self::InvalidRule {
            message: message.into(),
        }
    }

    /// Create an invalid zone error.
    #[must_use]
    pub fn invalid_zone(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidZone {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Check if this error rejected a rule at the rule store boundary.
    #[must_use]
    pub fn is_rule_rejection(&self) -> bool {
        matches!(
            self,
            Self::InvalidRule { .. } | Self::DuplicateRule { .. } | Self::SectionMissing { .. }
        )
    }
}
