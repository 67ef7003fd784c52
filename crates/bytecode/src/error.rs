//! Error types for the bytecode crate.
//!
//! This module provides error handling for class file parsing, emission and
//! method analysis.

use thiserror::Error;

/// Bytecode model errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BytecodeError {
    /// Class file could not be parsed
    #[error("Parse error: {message}")]
    Parse { message: String },

    /// Class file magic or version is not supported
    #[error("Unsupported class file: {reason}")]
    Unsupported { reason: String },

    /// A constant pool entry was missing or of the wrong kind
    #[error("Bad constant pool entry at index {index}: {reason}")]
    BadPoolEntry { index: u16, reason: String },

    /// An opcode byte is not a valid instruction
    #[error("Invalid opcode: {opcode:#04x} at offset {offset}")]
    InvalidOpcode { opcode: u8, offset: usize },

    /// A type or method descriptor could not be parsed
    #[error("Invalid descriptor '{desc}': {reason}")]
    InvalidDescriptor { desc: String, reason: String },

    /// An instruction handle no longer resolves within its list
    #[error("Stale instruction handle: {context}")]
    StaleHandle { context: String },

    /// A branch target label could not be resolved
    #[error("Unresolved label in method {method}")]
    UnresolvedLabel { method: String },

    /// Emission failed
    #[error("Emit error: {message}")]
    Emit { message: String },

    /// Stack or local analysis failed
    #[error("Analysis of {method} failed: {reason}")]
    Analysis { method: String, reason: String },

    /// Unexpected end of input
    #[error("Unexpected end of class file: needed {needed} more bytes while reading {context}")]
    EndOfInput { needed: usize, context: String },
}

impl BytecodeError {
    /// Create a new parse error
    pub fn parse<S: Into<String>>(message: S) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    /// Create a new unsupported class file error
    pub fn unsupported<S: Into<String>>(reason: S) -> Self {
        Self::Unsupported {
            reason: reason.into(),
        }
    }

    /// Create a new bad pool entry error
    pub fn bad_pool_entry<S: Into<String>>(index: u16, reason: S) -> Self {
        Self::BadPoolEntry {
            index,
            reason: reason.into(),
        }
    }

    /// Create a new invalid descriptor error
    pub fn invalid_descriptor<S: Into<String>>(desc: S, reason: S) -> Self {
        Self::InvalidDescriptor {
            desc: desc.into(),
            reason: reason.into(),
        }
    }

    /// Create a new stale handle error
    pub fn stale_handle<S: Into<String>>(context: S) -> Self {
        Self::StaleHandle {
            context: context.into(),
        }
    }

    /// Create a new emit error
    pub fn emit<S: Into<String>>(message: S) -> Self {
        Self::Emit {
            message: message.into(),
        }
    }

    /// Create a new analysis error
    pub fn analysis<S: Into<String>>(method: S, reason: S) -> Self {
        Self::Analysis {
            method: method.into(),
            reason: reason.into(),
        }
    }

    /// Create a new end of input error
    pub fn end_of_input<S: Into<String>>(needed: usize, context: S) -> Self {
        Self::EndOfInput {
            needed,
            context: context.into(),
        }
    }

    /// True when the input bytes, not the model, are at fault.
    pub fn is_input_error(&self) -> bool {
        matches!(
            self,
            BytecodeError::Parse { .. }
                | BytecodeError::Unsupported { .. }
                | BytecodeError::BadPoolEntry { .. }
                | BytecodeError::InvalidOpcode { .. }
                | BytecodeError::EndOfInput { .. }
        )
    }
}

/// Result type for bytecode operations
pub type BytecodeResult<T> = std::result::Result<T, BytecodeError>;
