//! Error types for the mixin core crate.

use thiserror::Error;

/// Errors raised by core parsing and lookup primitives.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A member reference string could not be parsed
    #[error("Invalid member reference '{input}': {reason}")]
    InvalidReference { input: String, reason: String },

    /// A constraint expression could not be parsed
    #[error("Invalid constraint '{input}': {reason}")]
    InvalidConstraint { input: String, reason: String },

    /// A constraint was violated by the current environment
    #[error("Constraint violation: token {token} with value {actual:?} does not satisfy {expression}")]
    ConstraintViolation {
        token: String,
        actual: Option<i64>,
        expression: String,
    },

    /// A blackboard key held a value of an unexpected type
    #[error("Blackboard key '{key}' does not hold a {expected}")]
    BlackboardType { key: String, expected: String },

    /// An unknown phase name was supplied
    #[error("Unknown mixin phase: {name}")]
    UnknownPhase { name: String },

    /// An unknown side name was supplied
    #[error("Unknown environment side: {name}")]
    UnknownSide { name: String },
}

impl CoreError {
    /// Create a new invalid reference error
    pub fn invalid_reference<S: Into<String>>(input: S, reason: S) -> Self {
        Self::InvalidReference {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a new invalid constraint error
    pub fn invalid_constraint<S: Into<String>>(input: S, reason: S) -> Self {
        Self::InvalidConstraint {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a new constraint violation error
    pub fn constraint_violation<S: Into<String>>(
        token: S,
        actual: Option<i64>,
        expression: S,
    ) -> Self {
        Self::ConstraintViolation {
            token: token.into(),
            actual,
            expression: expression.into(),
        }
    }

    /// Create a new blackboard type error
    pub fn blackboard_type<S: Into<String>>(key: S, expected: S) -> Self {
        Self::BlackboardType {
            key: key.into(),
            expected: expected.into(),
        }
    }
}

/// Result type for core operations
pub type CoreResult<T> = std::result::Result<T, CoreError>;
