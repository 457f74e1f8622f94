//! Errors produced while compiling call sites.

use cranelift_module::ModuleError;

/// Errors produced by the call-site compiler
#[derive(Debug, thiserror::Error)]
pub enum JitError {
    /// Cranelift module-level error
    #[error("cranelift module error: {0}")]
    Module(Box<ModuleError>),

    /// Failed to create the JIT builder or target ISA
    #[error("jit builder initialization failed: {0}")]
    Builder(String),

    /// The instruction at `pc` is not a call the compiler handles
    #[error("unsupported instruction at pc {pc}: {opcode}")]
    UnsupportedInstruction {
        /// Bytecode offset
        pc: usize,
        /// Opcode name
        opcode: String,
    },

    /// `pc` is outside the unit
    #[error("no instruction at pc {pc} (len={instruction_count})")]
    InvalidPc {
        /// Requested offset
        pc: usize,
        /// Unit length
        instruction_count: usize,
    },

    /// A helper the instruction needs was not registered
    #[error("runtime helper {0} is not registered")]
    MissingHelper(&'static str),
}

impl From<ModuleError> for JitError {
    fn from(value: ModuleError) -> Self {
        Self::Module(Box::new(value))
    }
}

/// Result alias for the call-site compiler
pub type JitResult<T> = Result<T, JitError>;
