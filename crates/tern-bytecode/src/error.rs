//! Bytecode errors

use thiserror::Error;

/// Errors that can occur while loading or validating bytecode
#[derive(Debug, Error)]
pub enum BytecodeError {
    /// Invalid magic bytes in a serialized unit
    #[error("Invalid magic bytes")]
    InvalidMagic,

    /// Unsupported bytecode version
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u32),

    /// Unexpected end of serialized data
    #[error("Unexpected end of bytecode")]
    UnexpectedEnd,

    /// Invalid opcode
    #[error("Invalid opcode: {0}")]
    InvalidOpcode(u8),

    /// A jump lands outside the instruction stream
    #[error("Jump at {pc} targets {target}, outside 0..{len}")]
    InvalidJumpTarget {
        /// Offset of the jumping instruction
        pc: usize,
        /// Computed absolute target
        target: i64,
        /// Instruction count
        len: usize,
    },

    /// An operand references a table entry that does not exist
    #[error("Invalid operand at offset {0}")]
    InvalidOperand(usize),

    /// Serialization failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error during serialization
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for bytecode operations
pub type Result<T> = std::result::Result<T, BytecodeError>;
