//! Unlinked code units
//!
//! The generator's output for one program, function body or eval body. A
//! unit is complete and immutable once built; later stages share it behind an
//! `Arc` and derive their own executable state from it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::constant::ConstantPool;
use crate::error::{BytecodeError, Result};
use crate::exception::HandlerTable;
use crate::identifier::Identifier;
use crate::instruction::Instruction;
use crate::operand::{FunctionIndex, IdentifierIndex, Register};
use crate::position::ExpressionInfoTable;
use crate::symbol_table::SymbolTable;
use crate::{BYTECODE_MAGIC, BYTECODE_VERSION};

/// Which kind of source body a unit was generated from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CodeKind {
    /// Top-level program code
    Global,
    /// A function body
    Function,
    /// Code passed to `eval`
    Eval,
}

/// Unit-wide flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFlags {
    /// Strict mode code
    pub strict: bool,
    /// Body contains a direct `eval` call
    pub uses_eval: bool,
    /// Body contains a `with` statement
    pub uses_with: bool,
    /// An activation record is created on entry
    pub needs_activation: bool,
    /// A full arguments object is materialized on entry
    pub materializes_arguments: bool,
    /// Engine-internal code; no source positions are recorded
    pub builtin: bool,
}

/// Jump table for a dense integer `switch`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwitchJumpTable {
    /// Case value of `branch_offsets[0]`
    pub min: i32,
    /// Offsets relative to the `SwitchImm` instruction; 0 means "take the default"
    pub branch_offsets: Vec<i32>,
}

impl SwitchJumpTable {
    /// Offset for a scrutinee value, if a case matches
    pub fn lookup(&self, value: f64) -> Option<i32> {
        if value.fract() != 0.0 || value < i32::MIN as f64 || value > i32::MAX as f64 {
            return None;
        }
        let slot = (value as i64) - self.min as i64;
        if slot < 0 {
            return None;
        }
        match self.branch_offsets.get(slot as usize) {
            Some(&offset) if offset != 0 => Some(offset),
            _ => None,
        }
    }
}

/// The generator's output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnlinkedCodeBlock {
    /// Source body kind
    pub kind: CodeKind,
    /// Function name, if any
    pub name: Option<Identifier>,
    /// Unit-wide flags
    pub flags: UnitFlags,
    /// Declared parameter count including `this`
    pub num_parameters: u32,
    /// Locals and temporaries below the frame header
    pub num_callee_registers: u32,
    /// Number of call-family instructions (one call-link record each)
    pub num_call_sites: u32,
    /// Slot holding the current scope chain
    pub scope_register: Register,
    /// Slot holding the activation record, when one exists
    pub activation_register: Option<Register>,
    /// Slot holding the materialized arguments object, when one exists
    pub arguments_register: Option<Register>,
    /// Instruction stream
    pub instructions: Vec<Instruction>,
    /// Literal values
    pub constants: ConstantPool,
    /// Names used by property and scope instructions
    pub identifiers: Vec<Identifier>,
    /// Nested function units, referenced by `NewFunction`
    pub functions: Vec<Arc<UnlinkedCodeBlock>>,
    /// Dense switch tables
    pub switch_tables: Vec<SwitchJumpTable>,
    /// Exception ranges
    pub exception_handlers: HandlerTable,
    /// Source positions
    pub expression_info: ExpressionInfoTable,
    /// Named locals
    pub symbol_table: SymbolTable,
    /// `var` and function names global or eval code introduces into its
    /// variable object before running
    pub declared_variables: Vec<Identifier>,
}

impl UnlinkedCodeBlock {
    /// Display name for traces
    pub fn display_name(&self) -> &str {
        match (&self.name, self.kind) {
            (Some(name), _) => name.as_str(),
            (None, CodeKind::Global) => "<global>",
            (None, CodeKind::Eval) => "<eval>",
            (None, CodeKind::Function) => "<anonymous>",
        }
    }

    /// Whether the unit is strict mode code
    #[inline]
    pub fn is_strict(&self) -> bool {
        self.flags.strict
    }

    /// Identifier for an operand
    #[inline]
    pub fn identifier(&self, index: IdentifierIndex) -> Option<&Identifier> {
        self.identifiers.get(index.index() as usize)
    }

    /// Nested function for an operand
    #[inline]
    pub fn function(&self, index: FunctionIndex) -> Option<&Arc<UnlinkedCodeBlock>> {
        self.functions.get(index.index() as usize)
    }

    /// Frame slots a call into this unit needs below its header
    #[inline]
    pub fn frame_size(&self) -> u32 {
        self.num_callee_registers
    }

    /// Check that every branch, switch table and handler range stays inside
    /// the instruction stream and that table operands exist.
    pub fn validate(&self) -> Result<()> {
        let len = self.instructions.len();
        let check = |pc: usize, target: i64| {
            if target < 0 || target >= len as i64 {
                Err(BytecodeError::InvalidJumpTarget { pc, target, len })
            } else {
                Ok(())
            }
        };

        for (pc, instruction) in self.instructions.iter().enumerate() {
            if let Some(offset) = instruction.jump_offset() {
                check(pc, offset.target_from(pc))?;
            }
            match instruction {
                Instruction::SwitchImm { table, .. } => {
                    let table = self
                        .switch_tables
                        .get(table.index() as usize)
                        .ok_or(BytecodeError::InvalidOperand(pc))?;
                    for &offset in table.branch_offsets.iter().filter(|&&o| o != 0) {
                        check(pc, pc as i64 + offset as i64)?;
                    }
                }
                Instruction::NewFunction { function, .. } if self.function(*function).is_none() => {
                    return Err(BytecodeError::InvalidOperand(pc));
                }
                Instruction::LoadConst { constant, .. } if self.constants.get(*constant).is_none() => {
                    return Err(BytecodeError::InvalidOperand(pc));
                }
                _ => {}
            }
        }

        for handler in self.exception_handlers.iter() {
            if handler.start > handler.end || handler.end as usize > len {
                return Err(BytecodeError::InvalidOperand(handler.start as usize));
            }
            check(handler.start as usize, handler.target as i64)?;
        }

        for function in &self.functions {
            function.validate()?;
        }
        Ok(())
    }

    /// Serialize with magic and version header
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let data = serde_json::to_vec(self)?;
        let mut bytes = Vec::with_capacity(16 + data.len());
        bytes.extend_from_slice(&BYTECODE_MAGIC);
        bytes.extend_from_slice(&BYTECODE_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(data.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&data);
        Ok(bytes)
    }

    /// Deserialize a unit written by [`to_bytes`](Self::to_bytes)
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(BytecodeError::UnexpectedEnd);
        }
        if bytes[0..8] != BYTECODE_MAGIC {
            return Err(BytecodeError::InvalidMagic);
        }
        let version = read_u32(bytes, 8)?;
        if version != BYTECODE_VERSION {
            return Err(BytecodeError::UnsupportedVersion(version));
        }
        let data_len = read_u32(bytes, 12)? as usize;
        let data = bytes
            .get(16..16 + data_len)
            .ok_or(BytecodeError::UnexpectedEnd)?;
        Ok(serde_json::from_slice(data)?)
    }
}

fn read_u32(bytes: &[u8], at: usize) -> Result<u32> {
    let raw: [u8; 4] = bytes
        .get(at..at + 4)
        .and_then(|s| s.try_into().ok())
        .ok_or(BytecodeError::UnexpectedEnd)?;
    Ok(u32::from_le_bytes(raw))
}
