//! Compilation errors

use thiserror::Error;

/// Compilation errors
#[derive(Debug, Error)]
pub enum CompileError {
    /// Parse error reported by the parser
    #[error("Parse error: {0}")]
    Parse(String),

    /// Syntax error detected while lowering or generating
    #[error("Syntax error at {line}:{column}: {message}")]
    Syntax {
        /// Error message
        message: String,
        /// Line (1-indexed)
        line: u32,
        /// Column (1-indexed)
        column: u32,
    },

    /// Unsupported language feature
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Malformed object literal initializer
    #[error("Invalid initializer at {line}:{column}: {message}")]
    InvalidInitializer {
        /// Error message
        message: String,
        /// Line (1-indexed)
        line: u32,
        /// Column (1-indexed)
        column: u32,
    },

    /// The frame would need more registers than an operand can address
    #[error("Too many registers (max {max})")]
    TooManyRegisters {
        /// Addressable limit
        max: u32,
    },

    /// Internal compiler error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompileError {
    /// Create a syntax error
    pub fn syntax(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::Syntax {
            message: message.into(),
            line,
            column,
        }
    }

    /// Create an unsupported error
    pub fn unsupported(feature: impl Into<String>) -> Self {
        Self::Unsupported(feature.into())
    }

    /// Create an invalid-initializer error
    pub fn invalid_initializer(message: impl Into<String>, line: u32, column: u32) -> Self {
        Self::InvalidInitializer {
            message: message.into(),
            line,
            column,
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}

/// Result type for compilation
pub type CompileResult<T> = Result<T, CompileError>;
