//! Bytecode generator
//!
//! One [`BytecodeGenerator`] walks one analyzed body depth-first and produces
//! one [`UnlinkedCodeBlock`]. Nested functions get their own generator and
//! end up in the parent's function table.
//!
//! ## Register ownership
//!
//! Every `emit_*` method that produces a value returns a register the caller
//! owns one reference to, and the caller releases it when done. Releasing is
//! a no-op for named locals, so callers never need to know what they got back.

mod call;
mod control_flow;
mod emitter;
mod expr;
mod labels;
mod registers;
mod scope;
mod stmt;

pub use control_flow::{ControlFlowEntry, ControlFlowStack, FinallyContext, ForInContext, ForInKind};
pub use emitter::{EmitterOutput, InstructionEmitter, Label};
pub use labels::{LabelScope, LabelScopeKind, LabelScopes};
pub use registers::{MAX_CALLEE_REGISTERS, RegisterAllocator};
pub use scope::{ResolvedScope, ScopeTracker};

use std::sync::Arc;

use rustc_hash::FxHashMap;
use tern_bytecode::{
    CodeKind, Constant, ConstantIndex, DebugHookKind, FunctionIndex, HandlerInfo, HandlerTable,
    Identifier, Instruction, JumpOffset, LocalKind, Register, SwitchJumpTable, UnitFlags,
    UnlinkedCodeBlock, VariableStorage,
};
use tracing::{debug, warn};

use crate::ast::{ArgumentsUsage, BodyKind, FunctionNode, ScopeInfo, Stmt, StmtKind};
use crate::config::GeneratorConfig;
use crate::error::{CompileError, CompileResult};
use crate::stack_guard::StackGuard;

/// Where an expression should leave its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dst {
    /// Any register; usually a fresh temporary
    Any,
    /// The value is not used
    Ignored,
    /// This register
    To(Register),
}

/// Switch table waiting for its case labels to be bound
#[derive(Debug)]
struct PendingSwitch {
    /// Offset of the `SwitchImm`
    pc: u32,
    min: i32,
    /// Case label per value from `min`, `None` for gaps
    cases: Vec<Option<Label>>,
}

/// Generate code for an analyzed body
pub fn generate<'a>(
    node: &'a FunctionNode<'a>,
    config: &GeneratorConfig,
) -> CompileResult<UnlinkedCodeBlock> {
    let guard = StackGuard::from_config(config);
    BytecodeGenerator::new(node, *config, guard, 0)?.generate()
}

/// Single-pass generator for one unit
pub struct BytecodeGenerator<'a> {
    node: &'a FunctionNode<'a>,
    info: &'a ScopeInfo<'a>,
    kind: CodeKind,
    strict: bool,
    config: GeneratorConfig,
    guard: StackGuard,
    /// Emission nesting, counted across nested units
    depth: u32,
    warned_too_deep: bool,

    emitter: InstructionEmitter,
    registers: RegisterAllocator,
    scope: ScopeTracker<'a>,
    control: ControlFlowStack<'a>,
    labels: LabelScopes<'a>,

    scope_register: Register,
    activation_register: Option<Register>,
    arguments_register: Option<Register>,
    /// Activation slots filled from frame values on entry
    entry_copies: Vec<(u32, Register)>,

    functions: Vec<Arc<UnlinkedCodeBlock>>,
    function_cache: FxHashMap<*const FunctionNode<'a>, FunctionIndex>,
    switch_tables: Vec<PendingSwitch>,
    num_call_sites: u32,
    declared_variables: Vec<Identifier>,
}

impl<'a> BytecodeGenerator<'a> {
    /// Lay out the frame of `node` and bind its locals
    pub fn new(
        node: &'a FunctionNode<'a>,
        config: GeneratorConfig,
        guard: StackGuard,
        depth: u32,
    ) -> CompileResult<Self> {
        let info = node
            .scope_info()
            .ok_or_else(|| CompileError::internal("body was not analyzed"))?;
        let kind = match node.kind {
            BodyKind::Program => CodeKind::Global,
            BodyKind::Function => CodeKind::Function,
            BodyKind::Eval => CodeKind::Eval,
        };
        let optimize_locals = kind == CodeKind::Function && !info.features.uses_eval;

        let mut registers = RegisterAllocator::new();
        let scope_register = registers.add_reserved();
        let activation_register = (kind == CodeKind::Function && info.needs_activation())
            .then(|| registers.add_reserved());
        let arguments_register = (info.arguments == ArgumentsUsage::Materialize)
            .then(|| registers.add_reserved());

        let mut scope = ScopeTracker::new(optimize_locals);
        let mut entry_copies = Vec::new();
        let mut declared_variables = Vec::new();

        if kind == CodeKind::Function {
            for (i, param) in node.params.iter().enumerate() {
                let reg = Register::argument(i as u32 + 1);
                if info.is_captured(param.name) {
                    let slot = scope.bind_environment(param.name, false, LocalKind::Normal);
                    entry_copies.push((slot, reg));
                } else {
                    scope.bind_register(param.name, reg, false, LocalKind::Normal);
                }
            }

            if node.is_expression
                && let Some(name) = node.name
                && !scope.is_declared(name)
                && !info.declarations.iter().any(|d| d.name == name)
                && !info.functions.iter().any(|f| f.name == Some(name))
            {
                if info.is_captured(name) {
                    let slot = scope.bind_environment(name, true, LocalKind::Special);
                    entry_copies.push((slot, Register::callee()));
                } else {
                    scope.bind_register(name, Register::callee(), true, LocalKind::Special);
                }
            }

            if let Some(reg) = arguments_register {
                if info.is_captured("arguments") {
                    let slot = scope.bind_environment("arguments", false, LocalKind::Special);
                    entry_copies.push((slot, reg));
                } else {
                    scope.bind_register("arguments", reg, false, LocalKind::Special);
                }
            }

            let names = info
                .declarations
                .iter()
                .map(|d| (d.name, d.read_only))
                .chain(info.functions.iter().filter_map(|f| f.name.map(|n| (n, false))));
            for (name, read_only) in names {
                if scope.is_declared(name) {
                    continue;
                }
                if info.is_captured(name) {
                    scope.bind_environment(name, read_only, LocalKind::Normal);
                } else {
                    let reg = registers.add_variable();
                    scope.bind_register(name, reg, read_only, LocalKind::Normal);
                }
            }
        } else {
            let names = info
                .declarations
                .iter()
                .map(|d| d.name)
                .chain(info.functions.iter().filter_map(|f| f.name));
            for name in names {
                let id = Identifier::new(name);
                if !declared_variables.contains(&id) {
                    declared_variables.push(id);
                }
            }
        }

        Ok(Self {
            node,
            info,
            kind,
            strict: info.features.strict,
            config,
            guard,
            depth,
            warned_too_deep: false,
            emitter: InstructionEmitter::new(!config.builtin),
            registers,
            scope,
            control: ControlFlowStack::default(),
            labels: LabelScopes::default(),
            scope_register,
            activation_register,
            arguments_register,
            entry_copies,
            functions: Vec::new(),
            function_cache: FxHashMap::default(),
            switch_tables: Vec::new(),
            num_call_sites: 0,
            declared_variables,
        })
    }

    /// Emit the whole unit
    pub fn generate(mut self) -> CompileResult<UnlinkedCodeBlock> {
        debug!(
            kind = ?self.kind,
            name = self.node.name.unwrap_or(""),
            strict = self.strict,
            "generating unit"
        );
        self.emit_prologue()?;

        let body = self.node.body;
        if self.kind == CodeKind::Function {
            self.emit_stmts(body, None)?;
            let returns = matches!(body.last(), Some(Stmt { kind: StmtKind::Return(_), .. }));
            if !returns {
                let value = self.load_constant(Dst::Any, Constant::Undefined);
                self.emit_debug_hook(DebugHookKind::WillLeaveCallFrame);
                self.emitter.emit(Instruction::Return { value });
                self.release(value);
            }
        } else {
            let completion = self.registers.new_temporary();
            self.load_constant(Dst::To(completion), Constant::Undefined);
            self.release(completion);
            self.emit_stmts(body, Some(completion))?;
            self.emit_debug_hook(DebugHookKind::DidExecuteProgram);
            self.emitter.emit(Instruction::End { value: completion });
            self.release(completion);
        }

        self.finish()
    }

    fn emit_prologue(&mut self) -> CompileResult<()> {
        let entry_hook = if self.kind == CodeKind::Function {
            DebugHookKind::DidEnterCallFrame
        } else {
            DebugHookKind::WillExecuteProgram
        };
        self.emit_debug_hook(entry_hook);

        if self.kind != CodeKind::Function || self.info.needs_scope_chain() {
            self.emitter.emit(Instruction::GetScope {
                dst: self.scope_register,
            });
        }

        if let Some(activation) = self.activation_register {
            self.emitter.emit(Instruction::CreateActivation {
                dst: activation,
                parent: self.scope_register,
            });
            self.emitter.emit(Instruction::Mov {
                dst: self.scope_register,
                src: activation,
            });
        }

        if let Some(arguments) = self.arguments_register {
            self.emitter.emit(Instruction::CreateArguments { dst: arguments });
        }

        if let Some(activation) = self.activation_register {
            for &(slot, value) in &self.entry_copies {
                self.emitter.emit(Instruction::PutClosureVar {
                    scope: activation,
                    slot,
                    value,
                });
            }
        }

        let features = self.info.features;
        if self.kind == CodeKind::Function
            && !self.strict
            && (features.uses_this || features.uses_eval)
        {
            self.emitter.emit(Instruction::ToThis {
                dst: Register::this(),
            });
        }

        for &function in self.info.functions {
            let Some(name) = function.name else {
                continue;
            };
            let index = self.function_index(function)?;
            if self.kind == CodeKind::Function {
                match self.scope.declared(name).map(|entry| entry.storage) {
                    Some(VariableStorage::Register(reg)) => {
                        self.emitter.emit(Instruction::NewFunction {
                            dst: reg,
                            scope: self.scope_register,
                            function: index,
                        });
                    }
                    Some(VariableStorage::Environment(slot)) => {
                        let value = self.registers.new_temporary();
                        self.emitter.emit(Instruction::NewFunction {
                            dst: value,
                            scope: self.scope_register,
                            function: index,
                        });
                        self.emit_put_closure_var(slot, value)?;
                        self.release(value);
                    }
                    None => {
                        return Err(CompileError::internal(format!(
                            "hoisted function `{name}` has no binding"
                        )));
                    }
                }
            } else {
                let value = self.registers.new_temporary();
                self.emitter.emit(Instruction::NewFunction {
                    dst: value,
                    scope: self.scope_register,
                    function: index,
                });
                let scope = self.emit_resolve_scope(name, tern_bytecode::ResolveMode::DoNotThrowIfNotFound);
                let name_index = self.emitter.add_identifier(name);
                self.emitter.emit(Instruction::PutToScope {
                    scope,
                    name: name_index,
                    value,
                    mode: tern_bytecode::ResolveMode::DoNotThrowIfNotFound,
                });
                self.release(scope);
                self.release(value);
            }
        }
        Ok(())
    }

    fn finish(self) -> CompileResult<UnlinkedCodeBlock> {
        assert!(
            self.control.is_balanced(),
            "control-flow stack not empty at end of unit"
        );
        assert!(self.labels.is_empty(), "label scopes left open at end of unit");

        let num_callee_registers = self.registers.num_callee_registers();
        if num_callee_registers > MAX_CALLEE_REGISTERS {
            return Err(CompileError::TooManyRegisters {
                max: MAX_CALLEE_REGISTERS,
            });
        }

        let bound = |label: Label| {
            self.emitter
                .label_location(label)
                .unwrap_or_else(|| panic!("label {label:?} referenced by a side table was never bound"))
        };

        let mut exception_handlers = HandlerTable::new();
        for (range, data) in self.control.ranges() {
            let start = bound(range.start);
            let end = bound(range.end);
            if start == end {
                continue;
            }
            exception_handlers.push(HandlerInfo {
                start,
                end,
                target: bound(data.target),
                scope_depth: data.scope_depth,
            });
        }

        let switch_tables: Vec<SwitchJumpTable> = self
            .switch_tables
            .iter()
            .map(|pending| SwitchJumpTable {
                min: pending.min,
                branch_offsets: pending
                    .cases
                    .iter()
                    .map(|case| case.map_or(0, |l| bound(l) as i32 - pending.pc as i32))
                    .collect(),
            })
            .collect();

        let features = self.info.features;
        let flags = UnitFlags {
            strict: self.strict,
            uses_eval: features.uses_eval,
            uses_with: features.uses_with,
            needs_activation: self.activation_register.is_some(),
            materializes_arguments: self.arguments_register.is_some(),
            builtin: self.config.builtin,
        };
        let num_parameters = match self.kind {
            CodeKind::Function => self.node.params.len() as u32 + 1,
            CodeKind::Global | CodeKind::Eval => 1,
        };

        let output = self.emitter.finish();
        debug!(
            kind = ?self.kind,
            name = self.node.name.unwrap_or(""),
            instructions = output.instructions.len(),
            registers = num_callee_registers,
            call_sites = self.num_call_sites,
            "generated unit"
        );

        Ok(UnlinkedCodeBlock {
            kind: self.kind,
            name: self.node.name.map(Identifier::new),
            flags,
            num_parameters,
            num_callee_registers,
            num_call_sites: self.num_call_sites,
            scope_register: self.scope_register,
            activation_register: self.activation_register,
            arguments_register: self.arguments_register,
            instructions: output.instructions,
            constants: output.constants,
            identifiers: output.identifiers,
            functions: self.functions,
            switch_tables,
            exception_handlers,
            expression_info: output.positions,
            symbol_table: self.scope.into_symbol_table(),
            declared_variables: self.declared_variables,
        })
    }

    // ==================== Nesting ====================

    /// Check the recursion guard before descending into a subtree
    fn enter(&mut self) -> bool {
        if self.guard.is_safe_to_recurse(self.depth) {
            self.depth += 1;
            true
        } else {
            false
        }
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Replace a subtree too deep to translate with a stack-exceeded throw
    fn emit_too_deep(&mut self) {
        if !self.warned_too_deep {
            self.warned_too_deep = true;
            warn!(
                depth = self.depth,
                stack_used = self.guard.used(),
                "input nested too deeply; emitting stack overflow throw"
            );
        }
        self.emitter.emit(Instruction::ThrowStackOverflow {});
    }

    /// Compile a nested function once, however often its node is emitted
    fn function_index(&mut self, node: &'a FunctionNode<'a>) -> CompileResult<FunctionIndex> {
        let key = node as *const FunctionNode<'a>;
        if let Some(&index) = self.function_cache.get(&key) {
            return Ok(index);
        }
        let unit = BytecodeGenerator::new(node, self.config, self.guard, self.depth + 1)?.generate()?;
        let index = FunctionIndex::new(self.functions.len() as u32);
        self.functions.push(Arc::new(unit));
        self.function_cache.insert(key, index);
        Ok(index)
    }

    // ==================== Registers ====================

    #[inline]
    fn release(&mut self, reg: Register) {
        self.registers.release(reg);
    }

    /// A register to build a value in before it reaches `dst`
    fn temp_destination(&mut self, dst: Dst) -> Register {
        match dst {
            Dst::To(reg) if self.registers.is_temporary(reg) => {
                self.registers.retain(reg);
                reg
            }
            _ => self.registers.new_temporary(),
        }
    }

    /// The register the final instruction of an expression writes
    fn final_destination(&mut self, dst: Dst, reuse: Option<Register>) -> Register {
        match (dst, reuse) {
            (Dst::To(reg), _) => {
                self.registers.retain(reg);
                reg
            }
            (_, Some(reg)) if self.registers.is_temporary(reg) && self.registers.refcount(reg) == 1 => {
                self.registers.retain(reg);
                reg
            }
            _ => self.registers.new_temporary(),
        }
    }

    /// Copy an owned `src` into `dst` when they differ
    fn move_to_destination(&mut self, dst: Dst, src: Register) -> Register {
        match dst {
            Dst::To(reg) if reg != src => {
                self.emitter.emit(Instruction::Mov { dst: reg, src });
                self.release(src);
                self.registers.retain(reg);
                reg
            }
            _ => src,
        }
    }

    /// Placeholder result for a value nobody reads
    fn ignored_result(&mut self) -> Register {
        self.registers.new_temporary()
    }

    /// Result register when no value was computed
    fn placeholder(&mut self, dst: Dst) -> Register {
        match dst {
            Dst::To(reg) => {
                self.registers.retain(reg);
                reg
            }
            Dst::Any | Dst::Ignored => self.registers.new_temporary(),
        }
    }

    // ==================== Constants ====================

    fn constant_index(&mut self, constant: Constant) -> ConstantIndex {
        self.emitter.add_constant(constant)
    }

    fn load_constant(&mut self, dst: Dst, constant: Constant) -> Register {
        if dst == Dst::Ignored {
            return self.ignored_result();
        }
        let reg = self.final_destination(dst, None);
        let constant = self.constant_index(constant);
        self.emitter.emit(Instruction::LoadConst { dst: reg, constant });
        reg
    }

    fn emit_static_error(&mut self, kind: tern_bytecode::ErrorKind, message: &str) {
        let message = self.constant_index(Constant::string(message));
        self.emitter
            .emit(Instruction::ThrowStaticError { message, kind });
    }

    /// Write to a `const` binding
    fn emit_read_only_error(&mut self) {
        if self.strict {
            self.emit_static_error(
                tern_bytecode::ErrorKind::TypeError,
                "Attempted to assign to readonly property.",
            );
        }
    }

    fn emit_debug_hook(&mut self, kind: DebugHookKind) {
        if self.config.debug_hooks {
            self.emitter.emit(Instruction::DebugHook { kind });
        }
    }

    // ==================== Scopes ====================

    fn resolve(&self, name: &str) -> ResolvedScope {
        self.scope.resolve(name, self.control.dynamic_depth())
    }

    fn activation(&self) -> CompileResult<Register> {
        self.activation_register
            .ok_or_else(|| CompileError::internal("captured local without an activation"))
    }

    fn emit_put_closure_var(&mut self, slot: u32, value: Register) -> CompileResult<()> {
        let scope = self.activation()?;
        self.emitter
            .emit(Instruction::PutClosureVar { scope, slot, value });
        Ok(())
    }

    fn emit_resolve_scope(&mut self, name: &str, mode: tern_bytecode::ResolveMode) -> Register {
        let dst = self.registers.new_temporary();
        let name = self.emitter.add_identifier(name);
        self.emitter.emit(Instruction::ResolveScope {
            dst,
            scope: self.scope_register,
            name,
            mode,
        });
        dst
    }

    /// Scope mode of writes to unresolved names
    fn write_mode(&self) -> tern_bytecode::ResolveMode {
        if self.strict {
            tern_bytecode::ResolveMode::ThrowIfNotFound
        } else {
            tern_bytecode::ResolveMode::DoNotThrowIfNotFound
        }
    }

    /// Push a dynamic scope whose object is in `object` (`with`)
    fn emit_push_with_scope(&mut self, object: Register) {
        self.emitter.emit(Instruction::PushWithScope {
            scope: self.scope_register,
            object,
        });
        self.control.push_lexical();
    }

    /// Push a catch scope binding `name`
    fn emit_push_catch_scope(&mut self, name: &str, value: Register) {
        let name = self.emitter.add_identifier(name);
        self.emitter.emit(Instruction::PushCatchScope {
            scope: self.scope_register,
            name,
            value,
        });
        self.control.push_lexical();
    }

    fn emit_pop_scope(&mut self) {
        self.emitter.emit(Instruction::PopScope {
            scope: self.scope_register,
        });
        self.control.pop_lexical();
    }

    // ==================== Jumps ====================

    fn emit_jump(&mut self, target: Label) {
        self.emitter.emit_branch(
            Instruction::Jump {
                offset: JumpOffset::new(0),
            },
            target,
        );
    }

    /// Branch on `cond` without touching the instruction that computed it
    fn emit_jump_if(&mut self, cond: Register, jump_if: bool, target: Label) {
        let offset = JumpOffset::new(0);
        let instruction = if jump_if {
            Instruction::JumpIfTrue { cond, offset }
        } else {
            Instruction::JumpIfFalse { cond, offset }
        };
        self.emitter.emit_branch(instruction, target);
    }

    /// Branch on an owned `cond` the caller releases right after. When the
    /// previous instruction computed `cond` into an otherwise unused
    /// temporary, it is rewound and fused into a compare-and-jump.
    fn emit_consuming_jump_if(&mut self, cond: Register, jump_if: bool, target: Label) {
        match self.fuse_condition(cond, jump_if) {
            Some(fused) => {
                self.emitter.emit_branch(fused, target);
            }
            None => self.emit_jump_if(cond, jump_if, target),
        }
    }

    fn fuse_condition(&mut self, cond: Register, jump_if: bool) -> Option<Instruction> {
        if !self.registers.is_temporary(cond) || self.registers.refcount(cond) != 1 {
            return None;
        }
        let offset = JumpOffset::new(0);
        let fused = match *self.emitter.last_instruction()? {
            Instruction::Less { dst, lhs, rhs } if dst == cond => {
                if jump_if {
                    Instruction::JumpIfLess { lhs, rhs, offset }
                } else {
                    Instruction::JumpIfNotLess { lhs, rhs, offset }
                }
            }
            Instruction::LessEq { dst, lhs, rhs } if dst == cond => {
                if jump_if {
                    Instruction::JumpIfLessEq { lhs, rhs, offset }
                } else {
                    Instruction::JumpIfNotLessEq { lhs, rhs, offset }
                }
            }
            Instruction::Greater { dst, lhs, rhs } if dst == cond => {
                if jump_if {
                    Instruction::JumpIfGreater { lhs, rhs, offset }
                } else {
                    Instruction::JumpIfNotGreater { lhs, rhs, offset }
                }
            }
            Instruction::GreaterEq { dst, lhs, rhs } if dst == cond => {
                if jump_if {
                    Instruction::JumpIfGreaterEq { lhs, rhs, offset }
                } else {
                    Instruction::JumpIfNotGreaterEq { lhs, rhs, offset }
                }
            }
            Instruction::EqNull { dst, src } if dst == cond => {
                if jump_if {
                    Instruction::JumpIfNull { src, offset }
                } else {
                    Instruction::JumpIfNotNull { src, offset }
                }
            }
            Instruction::NotEqNull { dst, src } if dst == cond => {
                if jump_if {
                    Instruction::JumpIfNotNull { src, offset }
                } else {
                    Instruction::JumpIfNull { src, offset }
                }
            }
            Instruction::Not { dst, src } if dst == cond => {
                if jump_if {
                    Instruction::JumpIfFalse { cond: src, offset }
                } else {
                    Instruction::JumpIfTrue { cond: src, offset }
                }
            }
            _ => return None,
        };
        self.emitter.rewind();
        Some(fused)
    }

    // ==================== Unwinding ====================

    /// Leave every context above `target_depth`: pop dynamic scopes and
    /// replay finally blocks, innermost first
    fn emit_pop_scopes(&mut self, target_depth: usize) -> CompileResult<()> {
        let mut top = self.control.len();
        while top > target_depth {
            top -= 1;
            match self.control.entry(top) {
                ControlFlowEntry::Lexical => {
                    self.emitter.emit(Instruction::PopScope {
                        scope: self.scope_register,
                    });
                }
                ControlFlowEntry::Finally(finally) => self.replay_finally(top, finally)?,
                ControlFlowEntry::Switch | ControlFlowEntry::ForIn(_) => {}
            }
        }
        Ok(())
    }

    /// Emit one more copy of a finally body for an exit crossing it. The
    /// copy runs outside the `try`: regions opened inside it are split
    /// around the copy and its own context is hidden while it is emitted.
    fn replay_finally(&mut self, index: usize, finally: FinallyContext<'a>) -> CompileResult<()> {
        let before = self.emitter.here();
        let hidden_entries = self.control.split_off(index);
        let hidden_labels = self.labels.split_off(finally.label_scope_depth);
        let closed = self.control.close_tries_above(finally.try_depth, before);
        let saved_depth = self.control.set_dynamic_depth(finally.dynamic_scope_depth);

        let result = self.emit_stmts(finally.body, None);

        self.control.set_dynamic_depth(saved_depth);
        self.labels.restore(hidden_labels);
        self.control.restore(hidden_entries);
        let after = self.emitter.here();
        self.control.reopen_tries(closed, after);
        result
    }

    /// Next per-unit call-link ordinal
    fn next_call_link(&mut self) -> tern_bytecode::CallLinkIndex {
        let link = tern_bytecode::CallLinkIndex::new(self.num_call_sites);
        self.num_call_sites += 1;
        link
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_program;
    use bumpalo::Bump;

    fn unit(source: &str) -> UnlinkedCodeBlock {
        let arena = Bump::new();
        let program = parse_program(&arena, source).unwrap();
        generate(program, &GeneratorConfig::default().with_debug_hooks(false)).unwrap()
    }

    fn first_function(source: &str) -> Arc<UnlinkedCodeBlock> {
        unit(source).functions[0].clone()
    }

    #[test]
    fn test_function_without_closures_uses_registers() {
        let f = first_function("function f(a, b) { var t = a * b; return t + a; }");
        for (_, entry) in f.symbol_table.iter() {
            assert!(matches!(entry.storage, VariableStorage::Register(_)));
        }
        assert!(!f.instructions.iter().any(|i| matches!(
            i,
            Instruction::ResolveScope { .. }
                | Instruction::GetFromScope { .. }
                | Instruction::GetScope { .. }
        )));
        assert!(f.activation_register.is_none());
    }

    #[test]
    fn test_captured_local_lives_in_activation() {
        let f = first_function("function f() { var x = 1; return function () { return x; }; }");
        let x = f.symbol_table.get(&Identifier::new("x")).unwrap();
        assert!(x.is_captured());
        assert!(f.flags.needs_activation);
        assert!(matches!(f.instructions[0], Instruction::GetScope { .. }));
        assert!(matches!(f.instructions[1], Instruction::CreateActivation { .. }));
        assert!(f.instructions.iter().any(|i| matches!(i, Instruction::PutClosureVar { slot: 0, .. })));
    }

    #[test]
    fn test_captured_parameter_copied_on_entry() {
        let f = first_function("function f(a) { return function () { return a; }; }");
        let activation = f.activation_register.unwrap();
        assert!(f.instructions.iter().any(|i| *i
            == Instruction::PutClosureVar {
                scope: activation,
                slot: 0,
                value: Register::argument(1),
            }));
    }

    #[test]
    fn test_var_shadowing_parameter_reuses_slot() {
        let f = first_function("function f(a) { var a; return a; }");
        let a = f.symbol_table.get(&Identifier::new("a")).unwrap();
        assert_eq!(a.storage, VariableStorage::Register(Register::argument(1)));
        assert_eq!(f.symbol_table.len(), 1);
    }

    #[test]
    fn test_duplicate_parameters_bind_last() {
        let f = first_function("function f(a, a) { return a; }");
        let a = f.symbol_table.get(&Identifier::new("a")).unwrap();
        assert_eq!(a.storage, VariableStorage::Register(Register::argument(2)));
    }

    #[test]
    fn test_sloppy_this_is_coerced() {
        let sloppy = first_function("function f() { return this; }");
        assert!(sloppy.instructions.iter().any(|i| matches!(i, Instruction::ToThis { .. })));
        let strict = first_function("function f() { 'use strict'; return this; }");
        assert!(!strict.instructions.iter().any(|i| matches!(i, Instruction::ToThis { .. })));
        let unused = first_function("function f() { return 1; }");
        assert!(!unused.instructions.iter().any(|i| matches!(i, Instruction::ToThis { .. })));
    }

    #[test]
    fn test_global_code_ends_with_completion() {
        let program = unit("var x = 1; function g() {} x + 1;");
        assert_eq!(program.kind, CodeKind::Global);
        assert!(matches!(program.instructions.last(), Some(Instruction::End { .. })));
        let names: Vec<&str> = program.declared_variables.iter().map(|id| id.as_str()).collect();
        assert_eq!(names, ["x", "g"]);
        assert!(program.instructions.iter().any(|i| matches!(i, Instruction::PutToScope { .. })));
        program.validate().unwrap();
    }

    #[test]
    fn test_named_function_expression_binds_callee() {
        let program = unit("var f = function fact(n) { return n ? n * fact(n - 1) : 1; };");
        let fact = &program.functions[0];
        let entry = fact.symbol_table.get(&Identifier::new("fact")).unwrap();
        assert_eq!(entry.storage, VariableStorage::Register(Register::callee()));
        assert!(entry.read_only);
    }

    #[test]
    fn test_builtin_units_skip_positions() {
        let arena = Bump::new();
        let program = parse_program(&arena, "var x = y + 1;").unwrap();
        let config = GeneratorConfig::default().with_builtin(true);
        let unit = generate(program, &config).unwrap();
        assert!(unit.expression_info.is_empty());
        assert!(unit.flags.builtin);
    }

    #[test]
    fn test_debug_hooks_on_request() {
        let arena = Bump::new();
        let program = parse_program(&arena, "function f() { debugger; }").unwrap();
        let unit = generate(program, &GeneratorConfig::default().with_debug_hooks(true)).unwrap();
        assert_eq!(
            unit.instructions[0],
            Instruction::DebugHook {
                kind: DebugHookKind::WillExecuteProgram
            }
        );
        let f = &unit.functions[0];
        assert!(f.instructions.contains(&Instruction::DebugHook {
            kind: DebugHookKind::WillExecuteDebuggerStatement
        }));
    }
}
