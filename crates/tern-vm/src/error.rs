//! VM error types

use thiserror::Error;

use crate::value::Value;

/// VM execution errors
///
/// The first four variants are raised by the engine itself and become
/// catchable error objects when they occur inside running code.
#[derive(Debug, Error)]
pub enum VmError {
    /// Type error (e.g. calling a non-function)
    #[error("TypeError: {0}")]
    TypeError(String),

    /// Reference error (unresolvable name)
    #[error("ReferenceError: {0}")]
    ReferenceError(String),

    /// Range error (e.g. call stack exhausted)
    #[error("RangeError: {0}")]
    RangeError(String),

    /// Syntax error from code compiled at run time (`eval`)
    #[error("SyntaxError: {0}")]
    SyntaxError(String),

    /// Uncaught JS exception
    #[error("Uncaught {0}")]
    Exception(Box<ThrownValue>),

    /// Program failed to compile
    #[error(transparent)]
    Compile(#[from] tern_compiler::CompileError),

    /// Malformed bytecode
    #[error("Bytecode error: {0}")]
    Bytecode(#[from] tern_bytecode::BytecodeError),

    /// Internal error
    #[error("InternalError: {0}")]
    Internal(String),
}

/// A thrown JavaScript value
#[derive(Debug)]
pub struct ThrownValue {
    /// The thrown value
    pub value: Value,
    /// Display form of the value at the time it escaped
    pub message: String,
}

impl std::fmt::Display for ThrownValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl VmError {
    /// Create a type error
    pub fn type_error(msg: impl Into<String>) -> Self {
        Self::TypeError(msg.into())
    }

    /// Create a reference error
    pub fn reference_error(msg: impl Into<String>) -> Self {
        Self::ReferenceError(msg.into())
    }

    /// Create a range error
    pub fn range_error(msg: impl Into<String>) -> Self {
        Self::RangeError(msg.into())
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap an uncaught value
    pub fn exception(value: Value, message: String) -> Self {
        Self::Exception(Box::new(ThrownValue { value, message }))
    }

    /// The uncaught value, if this is a JS exception
    pub fn thrown(&self) -> Option<&Value> {
        match self {
            Self::Exception(thrown) => Some(&thrown.value),
            _ => None,
        }
    }

    /// Error constructor name for engine-raised errors that running code
    /// may catch
    pub(crate) fn catchable_kind(&self) -> Option<&'static str> {
        match self {
            Self::TypeError(_) => Some("TypeError"),
            Self::ReferenceError(_) => Some("ReferenceError"),
            Self::RangeError(_) => Some("RangeError"),
            Self::SyntaxError(_) => Some("SyntaxError"),
            _ => None,
        }
    }

    /// Message of an engine-raised error
    pub(crate) fn message(&self) -> String {
        match self {
            Self::TypeError(m) | Self::ReferenceError(m) | Self::RangeError(m) | Self::SyntaxError(m) => {
                m.clone()
            }
            other => other.to_string(),
        }
    }
}

/// Result type for VM operations
pub type VmResult<T> = Result<T, VmError>;
