//! Error types for the refmap crate.

use thiserror::Error;

/// Reference map errors.
#[derive(Error, Debug)]
pub enum RefMapError {
    /// The document was not valid JSON of the expected shape
    #[error("Malformed reference map: {source}")]
    Malformed {
        #[from]
        source: serde_json::Error,
    },
}

/// Result type for refmap operations
pub type RefMapResult<T> = std::result::Result<T, RefMapError>;
