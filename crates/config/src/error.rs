//! Error types for the configuration crate.

use thiserror::Error;

/// Configuration loading and registration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The document was not valid JSON of the expected shape
    #[error("Malformed configuration {name}: {reason}")]
    Malformed { name: String, reason: String },

    /// A mandatory option was missing or empty
    #[error("Configuration {name} is missing required option '{option}'")]
    MissingOption { name: String, option: String },

    /// The configuration demands a newer engine
    #[error("Configuration {name} requires version {required}, engine is {engine}")]
    VersionMismatch {
        name: String,
        required: String,
        engine: String,
    },

    /// The configuration declares an unusable value
    #[error("Configuration {name}: invalid value for '{option}': {reason}")]
    InvalidOption {
        name: String,
        option: String,
        reason: String,
    },

    /// A configuration of this name was already registered
    #[error("Configuration {name} is already registered")]
    Duplicate { name: String },
}

impl ConfigError {
    /// Create a new malformed configuration error
    pub fn malformed<S: Into<String>>(name: S, reason: S) -> Self {
        Self::Malformed {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a new missing option error
    pub fn missing_option<S: Into<String>>(name: S, option: S) -> Self {
        Self::MissingOption {
            name: name.into(),
            option: option.into(),
        }
    }

    /// Create a new invalid option error
    pub fn invalid_option<S: Into<String>>(name: S, option: S, reason: S) -> Self {
        Self::InvalidOption {
            name: name.into(),
            option: option.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
