//! # tern bytecode
//!
//! Register bytecode format produced by `tern-compiler` and consumed by the
//! interpreter and the baseline JIT.
//!
//! ## Design Principles
//!
//! - **Register-based**: operands are signed frame slots. Non-negative slots
//!   are the frame header and the caller-visible arguments, negative slots are
//!   locals and temporaries.
//! - **Side tables**: exception ranges, source positions and switch tables are
//!   kept next to the instruction stream, never inline.
//! - **Immutable output**: an [`UnlinkedCodeBlock`] is frozen once generation
//!   completes and is shared behind an `Arc`.
//! - **Serializable**: units round-trip through serde.

#![warn(clippy::all)]
#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod constant;
pub mod dump;
pub mod error;
pub mod exception;
pub mod frame;
pub mod identifier;
pub mod instruction;
pub mod operand;
pub mod position;
pub mod symbol_table;
pub mod unit;

pub use constant::{Constant, ConstantPool, number_to_string};
pub use error::{BytecodeError, Result};
pub use exception::{HandlerInfo, HandlerTable};
pub use frame::CALL_FRAME_HEADER_SIZE;
pub use identifier::{Identifier, Interner};
pub use instruction::{DebugHookKind, ErrorKind, Instruction, Opcode, ResolveMode};
pub use operand::{
    CallLinkIndex, ConstantIndex, FunctionIndex, IdentifierIndex, JumpOffset, JumpTableIndex,
    Register,
};
pub use position::{ExpressionInfo, ExpressionInfoTable};
pub use symbol_table::{LocalKind, SymbolTable, SymbolTableEntry, VariableStorage};
pub use unit::{CodeKind, SwitchJumpTable, UnitFlags, UnlinkedCodeBlock};

/// Bytecode format version
pub const BYTECODE_VERSION: u32 = 1;

/// Magic bytes for serialized units
pub const BYTECODE_MAGIC: [u8; 8] = *b"TERNBC\0\0";
