//! Error taxonomy of the application engine.
//!
//! Failure kinds map onto the propagation policy: errors inside a single
//! mixin fail that mixin only, unless its configuration is required; errors
//! affecting target-class structure fail the whole target's transformation
//! and the engine hands the original bytes back to the host.

use mixin_bytecode::BytecodeError;
use mixin_config::ConfigError;
use mixin_core::CoreError;
use mixin_metadata::MetadataError;
use thiserror::Error;

/// Engine failure kinds.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or version-incompatible configuration
    #[error("Configuration error: {source}")]
    Configuration {
        #[from]
        source: ConfigError,
    },

    /// A mixin could not be resolved against its declared targets
    #[error("Mixin {mixin} cannot be applied: {reason}")]
    MixinResolution { mixin: String, reason: String },

    /// An injector is structurally invalid
    #[error("Invalid injection {mixin}::{handler}: {reason}")]
    InvalidInjection {
        mixin: String,
        handler: String,
        reason: String,
    },

    /// An injection point matched too few or too many times
    #[error(
        "Injection {mixin}::{handler} into {target} matched {matched} (required {required}, allowed {allowed})"
    )]
    InjectionNotFound {
        mixin: String,
        handler: String,
        target: String,
        matched: usize,
        required: usize,
        allowed: i32,
    },

    /// A merge conflict on the target's structure
    #[error("Apply error in {target}: {reason}")]
    Apply { target: String, reason: String },

    /// Post-apply verification failed
    #[error("Verification of {target} failed: {reason}")]
    Verification { target: String, reason: String },

    /// A nested transformation of the same class was refused
    #[error("Re-entrant transformation of {target} refused")]
    Reentrance { target: String },

    /// An unmet injector constraint
    #[error("Constraint failed for {mixin}::{handler}: {source}")]
    Constraint {
        mixin: String,
        handler: String,
        source: CoreError,
    },

    /// Underlying bytecode failure while reading or rewriting
    #[error("Bytecode error in {context}: {source}")]
    Bytecode {
        context: String,
        source: BytecodeError,
    },

    /// Underlying metadata failure during hierarchy resolution
    #[error("Metadata error: {source}")]
    Metadata {
        #[from]
        source: MetadataError,
    },
}

impl EngineError {
    /// Create a new mixin resolution error
    pub fn resolution<S: Into<String>>(mixin: S, reason: S) -> Self {
        Self::MixinResolution {
            mixin: mixin.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid injection error
    pub fn invalid_injection<S: Into<String>>(mixin: S, handler: S, reason: S) -> Self {
        Self::InvalidInjection {
            mixin: mixin.into(),
            handler: handler.into(),
            reason: reason.into(),
        }
    }

    /// Create a new apply error
    pub fn apply<S: Into<String>>(target: S, reason: S) -> Self {
        Self::Apply {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Create a new verification error
    pub fn verification<S: Into<String>>(target: S, reason: S) -> Self {
        Self::Verification {
            target: target.into(),
            reason: reason.into(),
        }
    }

    /// Wrap a bytecode error with the member or class being rewritten
    pub fn bytecode<S: Into<String>>(context: S, source: BytecodeError) -> Self {
        Self::Bytecode {
            context: context.into(),
            source,
        }
    }

    /// True for failures that abort the whole target's transformation even
    /// when the owning mixin is not required.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            EngineError::Apply { .. } | EngineError::Verification { .. }
        )
    }

    /// Category token for diagnostics.
    pub fn category(&self) -> &'static str {
        match self {
            EngineError::Configuration { .. } => "config",
            EngineError::MixinResolution { .. } => "resolution",
            EngineError::InvalidInjection { .. } => "invalid-injection",
            EngineError::InjectionNotFound { .. } => "injection-not-found",
            EngineError::Apply { .. } => "apply",
            EngineError::Verification { .. } => "verify",
            EngineError::Reentrance { .. } => "reentrance",
            EngineError::Constraint { .. } => "constraint",
            EngineError::Bytecode { .. } => "bytecode",
            EngineError::Metadata { .. } => "metadata",
        }
    }
}

/// Result type for engine operations
pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// A structured diagnostic carrying the coordinates of a failure.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    /// The failing mixin, where one is involved
    pub mixin: Option<String>,
    /// The target class
    pub target: Option<String>,
    /// Member or instruction coordinates
    pub member: Option<String>,
    pub category: &'static str,
    pub message: String,
}

impl Diagnostic {
    /// Builds a diagnostic from an error and its coordinates.
    pub fn from_error(
        error: &EngineError,
        mixin: Option<&str>,
        target: Option<&str>,
        member: Option<&str>,
    ) -> Self {
        Self {
            mixin: mixin.map(str::to_string),
            target: target.map(str::to_string),
            member: member.map(str::to_string),
            category: error.category(),
            message: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_classification() {
        assert!(EngineError::apply("a/B", "field collision").is_structural());
        assert!(!EngineError::resolution("m/M", "target missing").is_structural());
        assert!(!EngineError::Reentrance {
            target: "a/B".to_string()
        }
        .is_structural());
    }

    #[test]
    fn test_categories() {
        assert_eq!(EngineError::apply("t", "x").category(), "apply");
        assert_eq!(
            EngineError::invalid_injection("m", "h", "bad").category(),
            "invalid-injection"
        );
    }
}
