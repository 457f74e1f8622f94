//! # Tern Compiler
//!
//! Lowers JavaScript source to unlinked register bytecode.
//!
//! ## Pipeline
//!
//! 1. Parse source with oxc and lower it into an arena AST
//! 2. Analyze each function: declarations, captured names, features
//! 3. Generate one unlinked unit per function, nested units included

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod analysis;
pub mod ast;
pub mod config;
pub mod error;
pub mod frontend;
pub mod generator;
pub mod stack_guard;

use std::sync::Arc;

use bumpalo::Bump;
use tern_bytecode::UnlinkedCodeBlock;
use tracing::debug;

pub use config::GeneratorConfig;
pub use error::{CompileError, CompileResult};
pub use generator::generate;

use ast::{BodyKind, FunctionNode};

/// Nesting the parser may handle on the caller's stack
pub const INLINE_PARSE_DEPTH: u32 = 256;

/// Native stack reserved per nesting level when parsing on a sized thread
const PARSE_STACK_PER_LEVEL: usize = 32 * 1024;

/// Base stack of a sized parse thread
const PARSE_STACK_BASE: usize = 4 << 20;

/// Source-to-bytecode compiler
#[derive(Debug, Clone, Copy, Default)]
pub struct Compiler {
    config: GeneratorConfig,
}

impl Compiler {
    /// Create a compiler with the environment's default configuration
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a compiler with an explicit configuration
    pub fn with_config(config: GeneratorConfig) -> Self {
        Self { config }
    }

    /// Active configuration
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Compile a program
    pub fn compile_program(&self, source: &str) -> CompileResult<Arc<UnlinkedCodeBlock>> {
        self.compile_source(source, BodyKind::Program, false)
    }

    /// Compile an eval body; `strict` is the strictness of the code calling
    /// `eval`
    pub fn compile_eval(&self, source: &str, strict: bool) -> CompileResult<Arc<UnlinkedCodeBlock>> {
        self.compile_source(source, BodyKind::Eval, strict)
    }

    /// Generate a unit from an analyzed tree
    pub fn compile_node<'a>(&self, node: &'a FunctionNode<'a>) -> CompileResult<Arc<UnlinkedCodeBlock>> {
        generate(node, &self.config).map(Arc::new)
    }

    /// Deeply nested source runs the pipeline on a thread whose stack is
    /// sized for it; the parser recurses once per bracket and has no guard
    /// of its own. Past `max_parse_depth` the parser is never invoked.
    fn compile_source(
        &self,
        source: &str,
        kind: BodyKind,
        strict: bool,
    ) -> CompileResult<Arc<UnlinkedCodeBlock>> {
        let depth = frontend::nesting_depth(source);
        if depth <= INLINE_PARSE_DEPTH || depth > self.config.max_parse_depth {
            return self.compile_on_current_stack(source, kind, strict);
        }
        let stack_size = PARSE_STACK_BASE + depth as usize * PARSE_STACK_PER_LEVEL;
        debug!(depth, stack_size, "compiling on a sized stack");
        std::thread::scope(|scope| {
            let handle = std::thread::Builder::new()
                .name("tern-parse".into())
                .stack_size(stack_size)
                .spawn_scoped(scope, || self.compile_on_current_stack(source, kind, strict))
                .map_err(|err| CompileError::Internal(format!("cannot spawn parse thread: {err}")))?;
            match handle.join() {
                Ok(result) => result,
                Err(panic) => std::panic::resume_unwind(panic),
            }
        })
    }

    fn compile_on_current_stack(
        &self,
        source: &str,
        kind: BodyKind,
        strict: bool,
    ) -> CompileResult<Arc<UnlinkedCodeBlock>> {
        let arena = Bump::new();
        let root = frontend::parse_source(&arena, source, kind, strict, &self.config)?;
        let unit = self.compile_node(root)?;
        debug!(
            source_len = source.len(),
            arena_bytes = arena.allocated_bytes(),
            functions = unit.functions.len(),
            "compiled source"
        );
        Ok(unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tern_bytecode::CodeKind;

    #[test]
    fn test_compile_program_and_eval() {
        let compiler = Compiler::with_config(GeneratorConfig::default().with_debug_hooks(false));
        let program = compiler.compile_program("var x = 1; x + 1").unwrap();
        assert_eq!(program.kind, CodeKind::Global);

        let eval = compiler.compile_eval("y = 2", true).unwrap();
        assert_eq!(eval.kind, CodeKind::Eval);
        assert!(eval.flags.strict);
    }

    #[test]
    fn test_parse_errors_are_reported() {
        let err = Compiler::new().compile_program("var = ;").unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }
}
