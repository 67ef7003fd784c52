//! Error types for the metadata crate.

use mixin_bytecode::BytecodeError;
use thiserror::Error;

/// Metadata cache and hierarchy errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    /// No class bytes could be located for a name
    #[error("Class not found: {name}")]
    ClassNotFound { name: String },

    /// The located class bytes were unreadable
    #[error("Failed to read class {name}: {source}")]
    UnreadableClass {
        name: String,
        source: BytecodeError,
    },

    /// A hierarchy walk could not complete
    #[error("Hierarchy resolution failed for {name}: {reason}")]
    Hierarchy { name: String, reason: String },
}

impl MetadataError {
    /// Create a new class not found error
    pub fn class_not_found<S: Into<String>>(name: S) -> Self {
        Self::ClassNotFound { name: name.into() }
    }

    /// Create a new hierarchy error
    pub fn hierarchy<S: Into<String>>(name: S, reason: S) -> Self {
        Self::Hierarchy {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for metadata operations
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
