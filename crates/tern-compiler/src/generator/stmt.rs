//! Statement emission
//!
//! Loops are emitted with the test at the bottom: one copy of the condition
//! guards entry, the other closes the loop, so each iteration runs a single
//! conditional branch.

use tern_bytecode::{
    Constant, DebugHookKind, Instruction, JumpOffset, JumpTableIndex, Register, ResolveMode,
    VariableStorage,
};

use super::{
    BytecodeGenerator, Dst, ForInContext, ForInKind, Label, LabelScope, LabelScopeKind,
    PendingSwitch, ResolvedScope,
};
use crate::ast::{
    CatchClause, Expr, ExprKind, ForInTarget, ForInit, Property, PropertyKey, Span, Stmt, StmtKind,
    SwitchCase, VarDeclarator,
};
use crate::error::{CompileError, CompileResult};

/// Fewest integer cases worth a jump table
pub const SWITCH_TABLE_MINIMUM_CASES: usize = 4;

/// Widest value range a jump table may cover
pub const SWITCH_TABLE_MAX_RANGE: i64 = 1000;

/// Whether `stmt` assigns `name` outside nested functions
fn stmt_assigns<'a>(stmt: &'a Stmt<'a>, name: &str) -> bool {
    enum Node<'n> {
        Stmt(&'n Stmt<'n>),
        Expr(&'n Expr<'n>),
    }

    let mut work = vec![Node::Stmt(stmt)];
    while let Some(node) = work.pop() {
        match node {
            Node::Stmt(stmt) => match stmt.kind {
                StmtKind::Expr(e) | StmtKind::Throw(e) => work.push(Node::Expr(e)),
                StmtKind::Return(e) => work.extend(e.map(Node::Expr)),
                StmtKind::Var(decls) => work.extend(decls.iter().filter_map(|d| d.init.map(Node::Expr))),
                StmtKind::If {
                    test,
                    consequent,
                    alternate,
                } => {
                    work.push(Node::Expr(test));
                    work.push(Node::Stmt(consequent));
                    work.extend(alternate.map(Node::Stmt));
                }
                StmtKind::Block(body) => work.extend(body.iter().map(Node::Stmt)),
                StmtKind::While { test, body } | StmtKind::DoWhile { body, test } => {
                    work.push(Node::Expr(test));
                    work.push(Node::Stmt(body));
                }
                StmtKind::For {
                    init,
                    test,
                    update,
                    body,
                } => {
                    match init {
                        Some(ForInit::Var(decls)) => {
                            work.extend(decls.iter().filter_map(|d| d.init.map(Node::Expr)));
                        }
                        Some(ForInit::Expr(e)) => work.push(Node::Expr(e)),
                        None => {}
                    }
                    work.extend(test.map(Node::Expr));
                    work.extend(update.map(Node::Expr));
                    work.push(Node::Stmt(body));
                }
                StmtKind::ForIn {
                    target,
                    object,
                    body,
                } => {
                    match target {
                        ForInTarget::Var(n) if n == name => return true,
                        ForInTarget::Expr(e) if e.as_ident() == Some(name) => return true,
                        ForInTarget::Expr(e) => work.push(Node::Expr(e)),
                        ForInTarget::Var(_) => {}
                    }
                    work.push(Node::Expr(object));
                    work.push(Node::Stmt(body));
                }
                StmtKind::Labeled { body, .. } => work.push(Node::Stmt(body)),
                StmtKind::With { object, body } => {
                    work.push(Node::Expr(object));
                    work.push(Node::Stmt(body));
                }
                StmtKind::Switch {
                    discriminant,
                    cases,
                } => {
                    work.push(Node::Expr(discriminant));
                    for case in cases {
                        work.extend(case.test.map(Node::Expr));
                        work.extend(case.body.iter().map(Node::Stmt));
                    }
                }
                StmtKind::Try {
                    block,
                    handler,
                    finalizer,
                } => {
                    work.extend(block.iter().map(Node::Stmt));
                    if let Some(handler) = handler {
                        work.extend(handler.body.iter().map(Node::Stmt));
                    }
                    if let Some(finalizer) = finalizer {
                        work.extend(finalizer.iter().map(Node::Stmt));
                    }
                }
                StmtKind::Function(_)
                | StmtKind::Break(_)
                | StmtKind::Continue(_)
                | StmtKind::Debugger
                | StmtKind::Empty
                | StmtKind::TooDeep => {}
            },
            Node::Expr(expr) => match expr.kind {
                ExprKind::Assign { target, value, .. } => {
                    if target.as_ident() == Some(name) {
                        return true;
                    }
                    work.push(Node::Expr(target));
                    work.push(Node::Expr(value));
                }
                ExprKind::Update { target, .. } => {
                    if target.as_ident() == Some(name) {
                        return true;
                    }
                    work.push(Node::Expr(target));
                }
                ExprKind::Unary(_, e) => work.push(Node::Expr(e)),
                ExprKind::Binary(_, lhs, rhs) | ExprKind::Logical(_, lhs, rhs) => {
                    work.push(Node::Expr(lhs));
                    work.push(Node::Expr(rhs));
                }
                ExprKind::Conditional {
                    test,
                    consequent,
                    alternate,
                } => {
                    work.push(Node::Expr(test));
                    work.push(Node::Expr(consequent));
                    work.push(Node::Expr(alternate));
                }
                ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
                    work.push(Node::Expr(callee));
                    work.extend(args.iter().map(|a| match *a {
                        crate::ast::Argument::Expr(e) | crate::ast::Argument::Spread(e) => {
                            Node::Expr(e)
                        }
                    }));
                }
                ExprKind::Member { object, .. } => work.push(Node::Expr(object)),
                ExprKind::Index { object, property } => {
                    work.push(Node::Expr(object));
                    work.push(Node::Expr(property));
                }
                ExprKind::Sequence(exprs) => work.extend(exprs.iter().map(Node::Expr)),
                ExprKind::Array(elements) => {
                    work.extend(elements.iter().filter_map(|e| match *e {
                        crate::ast::ArrayElement::Expr(e) | crate::ast::ArrayElement::Spread(e) => {
                            Some(Node::Expr(e))
                        }
                        crate::ast::ArrayElement::Hole => None,
                    }));
                }
                ExprKind::Object(properties) => {
                    for &Property { key, value, .. } in properties {
                        work.push(Node::Expr(value));
                        if let PropertyKey::Computed(key) = key {
                            work.push(Node::Expr(key));
                        }
                    }
                }
                ExprKind::Number(_)
                | ExprKind::String(_)
                | ExprKind::Bool(_)
                | ExprKind::Null
                | ExprKind::This
                | ExprKind::Ident(_)
                | ExprKind::RegExp { .. }
                | ExprKind::Function(_)
                | ExprKind::TooDeep => {}
            },
        }
    }
    false
}

/// Integer value of a case test usable in a jump table
fn case_value(test: &Expr<'_>) -> Option<i32> {
    match test.kind {
        ExprKind::Number(n)
            if n.fract() == 0.0
                && n >= i32::MIN as f64
                && n <= i32::MAX as f64
                && !(n == 0.0 && n.is_sign_negative()) =>
        {
            Some(n as i32)
        }
        _ => None,
    }
}

/// `(min, max)` of a switch that qualifies for a jump table
fn switch_table_range(cases: &[SwitchCase<'_>]) -> Option<(i32, i32)> {
    let mut count = 0;
    let mut min = i32::MAX;
    let mut max = i32::MIN;
    for test in cases.iter().filter_map(|c| c.test) {
        let value = case_value(test)?;
        count += 1;
        min = min.min(value);
        max = max.max(value);
    }
    let range = max as i64 - min as i64 + 1;
    (count >= SWITCH_TABLE_MINIMUM_CASES && range <= SWITCH_TABLE_MAX_RANGE).then_some((min, max))
}

impl<'a> BytecodeGenerator<'a> {
    pub(super) fn emit_stmts(
        &mut self,
        stmts: &'a [Stmt<'a>],
        completion: Option<Register>,
    ) -> CompileResult<()> {
        for stmt in stmts {
            self.emit_stmt(stmt, completion)?;
        }
        Ok(())
    }

    pub(super) fn emit_stmt(
        &mut self,
        stmt: &'a Stmt<'a>,
        completion: Option<Register>,
    ) -> CompileResult<()> {
        if !self.enter() {
            self.emit_too_deep();
            return Ok(());
        }
        let result = self.emit_stmt_inner(stmt, completion);
        self.leave();
        result
    }

    fn emit_stmt_inner(
        &mut self,
        stmt: &'a Stmt<'a>,
        completion: Option<Register>,
    ) -> CompileResult<()> {
        if !matches!(
            stmt.kind,
            StmtKind::Block(_)
                | StmtKind::Function(_)
                | StmtKind::Labeled { .. }
                | StmtKind::Empty
                | StmtKind::Debugger
                | StmtKind::TooDeep
        ) {
            self.emit_debug_hook(DebugHookKind::WillExecuteStatement);
        }

        match stmt.kind {
            StmtKind::Expr(expr) => {
                let dst = completion.map_or(Dst::Ignored, Dst::To);
                let value = self.emit_expr(expr, dst)?;
                self.release(value);
            }
            StmtKind::Var(decls) => self.emit_var_decls(decls)?,
            StmtKind::Function(_) | StmtKind::Empty => {}
            StmtKind::Return(value) => self.emit_return(value, stmt.span)?,
            StmtKind::If {
                test,
                consequent,
                alternate,
            } => {
                let before_then = self.emitter.new_label();
                let before_else = self.emitter.new_label();
                self.emit_condition(test, before_then, before_else, true)?;
                self.emitter.bind_label(before_then);
                self.emit_stmt(consequent, completion)?;
                match alternate {
                    Some(alternate) => {
                        let after_else = self.emitter.new_label();
                        self.emit_jump(after_else);
                        self.emitter.bind_label(before_else);
                        self.emit_stmt(alternate, completion)?;
                        self.emitter.bind_label(after_else);
                    }
                    None => self.emitter.bind_label(before_else),
                }
            }
            StmtKind::Block(body) => self.emit_stmts(body, completion)?,
            StmtKind::While { test, body } => {
                let scope = self.push_loop_scope();
                let top = self.emitter.new_label();
                self.emit_condition(test, top, scope.break_target, true)?;
                self.emitter.bind_label(top);
                self.emitter.emit(Instruction::LoopHint {});
                self.emit_stmt(body, completion)?;
                self.bind_continue(&scope);
                self.emit_condition(test, top, scope.break_target, false)?;
                self.close_label_scope(scope);
            }
            StmtKind::DoWhile { body, test } => {
                let scope = self.push_loop_scope();
                let top = self.emitter.here();
                self.emitter.emit(Instruction::LoopHint {});
                self.emit_stmt(body, completion)?;
                self.bind_continue(&scope);
                self.emit_condition(test, top, scope.break_target, false)?;
                self.close_label_scope(scope);
            }
            StmtKind::For {
                init,
                test,
                update,
                body,
            } => {
                match init {
                    Some(ForInit::Var(decls)) => self.emit_var_decls(decls)?,
                    Some(ForInit::Expr(e)) => {
                        let value = self.emit_expr(e, Dst::Ignored)?;
                        self.release(value);
                    }
                    None => {}
                }
                let scope = self.push_loop_scope();
                let top = self.emitter.new_label();
                if let Some(test) = test {
                    self.emit_condition(test, top, scope.break_target, true)?;
                }
                self.emitter.bind_label(top);
                self.emitter.emit(Instruction::LoopHint {});
                self.emit_stmt(body, completion)?;
                self.bind_continue(&scope);
                if let Some(update) = update {
                    let value = self.emit_expr(update, Dst::Ignored)?;
                    self.release(value);
                }
                match test {
                    Some(test) => self.emit_condition(test, top, scope.break_target, false)?,
                    None => self.emit_jump(top),
                }
                self.close_label_scope(scope);
            }
            StmtKind::ForIn {
                target,
                object,
                body,
            } => self.emit_for_in(target, object, body, completion, stmt.span)?,
            StmtKind::Break(label) => {
                let Some(scope) = self.labels.break_target(label).copied() else {
                    return Err(self.jump_target_error("break", label, stmt.span));
                };
                self.emit_pop_scopes(scope.context_depth)?;
                self.emit_jump(scope.break_target);
            }
            StmtKind::Continue(label) => {
                let target = self
                    .labels
                    .continue_target(label)
                    .and_then(|scope| scope.continue_target.map(|t| (scope.context_depth, t)));
                let Some((depth, target)) = target else {
                    return Err(self.jump_target_error("continue", label, stmt.span));
                };
                self.emit_pop_scopes(depth)?;
                self.emit_jump(target);
            }
            StmtKind::Labeled { label, body } => {
                let scope = LabelScope {
                    kind: LabelScopeKind::Named,
                    name: Some(label),
                    break_target: self.emitter.new_label(),
                    continue_target: None,
                    context_depth: self.control.len(),
                };
                self.labels.push(scope);
                self.emit_stmt(body, completion)?;
                self.close_label_scope(scope);
            }
            StmtKind::Switch {
                discriminant,
                cases,
            } => self.emit_switch(discriminant, cases, completion)?,
            StmtKind::Throw(value) => {
                let value = self.emit_expr(value, Dst::Any)?;
                self.emitter.record_position(stmt.span);
                self.emitter.emit(Instruction::Throw { value });
                self.release(value);
            }
            StmtKind::Try {
                block,
                handler,
                finalizer,
            } => self.emit_try(block, handler, finalizer, completion)?,
            StmtKind::With { object, body } => {
                let object = self.emit_expr(object, Dst::Any)?;
                self.emitter.record_position(stmt.span);
                self.emit_push_with_scope(object);
                self.release(object);
                self.emit_stmt(body, completion)?;
                self.emit_pop_scope();
            }
            StmtKind::Debugger => {
                self.emit_debug_hook(DebugHookKind::WillExecuteDebuggerStatement);
            }
            StmtKind::TooDeep => self.emit_too_deep(),
        }
        Ok(())
    }

    fn jump_target_error(&self, keyword: &str, label: Option<&str>, span: Span) -> CompileError {
        let message = match label {
            Some(label) => format!("`{keyword} {label}` has no matching label"),
            None => format!("`{keyword}` outside of a loop"),
        };
        CompileError::syntax(message, span.line, span.column)
    }

    fn emit_var_decls(&mut self, decls: &'a [VarDeclarator<'a>]) -> CompileResult<()> {
        for decl in decls {
            if let Some(init) = decl.init {
                let value = self.emit_assign_ident(decl.name, None, init, Dst::Ignored, decl.span, true)?;
                self.release(value);
            }
        }
        Ok(())
    }

    fn emit_return(&mut self, value: Option<&'a Expr<'a>>, span: Span) -> CompileResult<()> {
        let mut value = match value {
            Some(e) => self.emit_expr(e, Dst::Any)?,
            None => self.load_constant(Dst::Any, Constant::Undefined),
        };
        if self.control.needs_unwind(0) {
            if !self.registers.is_temporary(value) {
                let copy = self.registers.new_temporary();
                self.emitter.emit(Instruction::Mov {
                    dst: copy,
                    src: value,
                });
                value = copy;
            }
            self.emit_pop_scopes(0)?;
        }
        self.emit_debug_hook(DebugHookKind::WillLeaveCallFrame);
        self.emitter.record_position(span);
        self.emitter.emit(Instruction::Return { value });
        self.release(value);
        Ok(())
    }

    // ==================== Label scopes ====================

    fn push_loop_scope(&mut self) -> LabelScope<'a> {
        let scope = LabelScope {
            kind: LabelScopeKind::Loop,
            name: None,
            break_target: self.emitter.new_label(),
            continue_target: Some(self.emitter.new_label()),
            context_depth: self.control.len(),
        };
        self.labels.push(scope);
        scope
    }

    fn bind_continue(&mut self, scope: &LabelScope<'a>) {
        if let Some(target) = scope.continue_target {
            self.emitter.bind_label(target);
        }
    }

    /// Pop `scope` and bind its break target
    fn close_label_scope(&mut self, scope: LabelScope<'a>) {
        let popped = self.labels.pop();
        debug_assert_eq!(popped.break_target, scope.break_target);
        self.emitter.bind_label(scope.break_target);
    }

    // ==================== switch ====================

    fn emit_switch(
        &mut self,
        discriminant: &'a Expr<'a>,
        cases: &'a [SwitchCase<'a>],
        completion: Option<Register>,
    ) -> CompileResult<()> {
        let scrutinee = self.emit_expr(discriminant, Dst::Any)?;
        let scope = LabelScope {
            kind: LabelScopeKind::Switch,
            name: None,
            break_target: self.emitter.new_label(),
            continue_target: None,
            context_depth: self.control.len(),
        };
        self.labels.push(scope);
        self.control.push_switch();

        let case_labels: Vec<Label> = cases.iter().map(|_| self.emitter.new_label()).collect();
        let default_target = cases
            .iter()
            .position(|c| c.test.is_none())
            .map_or(scope.break_target, |i| case_labels[i]);

        if let Some((min, max)) = switch_table_range(cases) {
            let table = JumpTableIndex::new(self.switch_tables.len() as u32);
            let pc = self.emitter.emit_branch(
                Instruction::SwitchImm {
                    table,
                    default: JumpOffset::new(0),
                    scrutinee,
                },
                default_target,
            );
            let mut slots: Vec<Option<Label>> = vec![None; (max as i64 - min as i64 + 1) as usize];
            for (case, &label) in cases.iter().zip(&case_labels) {
                if let Some(value) = case.test.and_then(case_value) {
                    let slot = &mut slots[(value as i64 - min as i64) as usize];
                    slot.get_or_insert(label);
                }
            }
            self.switch_tables.push(PendingSwitch {
                pc,
                min,
                cases: slots,
            });
        } else {
            for (case, &label) in cases.iter().zip(&case_labels) {
                let Some(test) = case.test else {
                    continue;
                };
                let value = self.emit_expr(test, Dst::Any)?;
                let cond = self.final_destination(Dst::Any, Some(value));
                self.emitter.emit(Instruction::StrictEq {
                    dst: cond,
                    lhs: value,
                    rhs: scrutinee,
                });
                self.emit_jump_if(cond, true, label);
                self.release(cond);
                self.release(value);
            }
            self.emit_jump(default_target);
        }
        self.release(scrutinee);

        for (case, &label) in cases.iter().zip(&case_labels) {
            self.emitter.bind_label(label);
            self.emit_stmts(case.body, completion)?;
        }

        self.control.pop_switch();
        self.close_label_scope(scope);
        Ok(())
    }

    // ==================== for-in ====================

    /// Frame local of the loop variable, if it has one
    fn for_in_local(&self, target: ForInTarget<'a>) -> Option<(Register, &'a str)> {
        let name = match target {
            ForInTarget::Var(name) => name,
            ForInTarget::Expr(e) => e.as_ident()?,
        };
        match self.resolve(name) {
            ResolvedScope::Local(entry) if !entry.read_only => match entry.storage {
                VariableStorage::Register(reg) => Some((reg, name)),
                VariableStorage::Environment(_) => None,
            },
            _ => None,
        }
    }

    /// Store the next key into the loop variable
    fn emit_for_in_store(&mut self, target: ForInTarget<'a>, key: Register, span: Span) -> CompileResult<()> {
        match target {
            ForInTarget::Var(name) => self.emit_store_ident(name, key, span, true),
            ForInTarget::Expr(e) => match e.kind {
                ExprKind::Ident(name) => self.emit_store_ident(name, key, span, false),
                ExprKind::Member { object, property } => {
                    let base = self.emit_expr(object, Dst::Any)?;
                    let name = self.emitter.add_identifier(property);
                    self.emitter.record_position(e.span);
                    self.emitter.emit(Instruction::PutById {
                        base,
                        name,
                        value: key,
                    });
                    self.release(base);
                    Ok(())
                }
                ExprKind::Index { object, property } => {
                    let base = self.emit_expr(object, Dst::Any)?;
                    let property = self.emit_expr(property, Dst::Any)?;
                    self.emitter.record_position(e.span);
                    self.emitter.emit(Instruction::PutByVal {
                        base,
                        property,
                        value: key,
                    });
                    self.release(property);
                    self.release(base);
                    Ok(())
                }
                _ => Err(CompileError::syntax(
                    "invalid for-in target",
                    e.span.line,
                    e.span.column,
                )),
            },
        }
    }

    /// Store an evaluated value into a name
    fn emit_store_ident(
        &mut self,
        name: &'a str,
        value: Register,
        span: Span,
        initializing: bool,
    ) -> CompileResult<()> {
        match self.resolve(name) {
            ResolvedScope::Local(entry) if entry.read_only && !initializing => {
                self.emit_read_only_error();
            }
            ResolvedScope::Local(entry) => match entry.storage {
                VariableStorage::Register(reg) => {
                    self.control.invalidate_for_in(reg);
                    self.emitter.emit(Instruction::Mov { dst: reg, src: value });
                }
                VariableStorage::Environment(slot) => self.emit_put_closure_var(slot, value)?,
            },
            ResolvedScope::Dynamic => {
                let mode = if initializing {
                    ResolveMode::DoNotThrowIfNotFound
                } else {
                    self.write_mode()
                };
                let scope = self.emit_resolve_scope(name, mode);
                let name = self.emitter.add_identifier(name);
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::PutToScope {
                    scope,
                    name,
                    value,
                    mode,
                });
                self.release(scope);
            }
        }
        Ok(())
    }

    /// `for (target in object)`: indexed properties first, counting up to
    /// the enumerable length, then the named keys from a snapshot. Inside
    /// the body, `object[target]` reads take a fast path while the loop
    /// variable is not reassigned.
    fn emit_for_in(
        &mut self,
        target: ForInTarget<'a>,
        object: &'a Expr<'a>,
        body: &'a Stmt<'a>,
        completion: Option<Register>,
        span: Span,
    ) -> CompileResult<()> {
        let end = self.emitter.new_label();

        let mut base = self.emit_expr(object, Dst::Any)?;
        if !self.registers.is_temporary(base) {
            let copy = self.registers.new_temporary();
            self.emitter.emit(Instruction::Mov {
                dst: copy,
                src: base,
            });
            base = copy;
        }
        self.emitter.emit_branch(
            Instruction::JumpIfNull {
                src: base,
                offset: JumpOffset::new(0),
            },
            end,
        );

        let local = self
            .for_in_local(target)
            .map(|(reg, name)| (reg, !stmt_assigns(body, name)));

        // Indexed properties
        let length = self.registers.new_temporary();
        self.emitter.emit(Instruction::GetEnumerableLength { dst: length, base });
        let index = self.load_constant(Dst::Any, Constant::number(0.0));
        {
            let scope = self.push_loop_scope();
            let phase_end = self.emitter.new_label();
            let top = self.emitter.here();
            self.emitter.emit(Instruction::LoopHint {});

            let more = self.registers.new_temporary();
            self.emitter.emit(Instruction::Less {
                dst: more,
                lhs: index,
                rhs: length,
            });
            self.emit_consuming_jump_if(more, false, phase_end);
            self.release(more);

            let present = self.registers.new_temporary();
            self.emitter.emit(Instruction::HasIndexedProperty {
                dst: present,
                base,
                index,
            });
            let Some(continue_target) = scope.continue_target else {
                unreachable!("loop scopes carry a continue target");
            };
            self.emit_jump_if(present, false, continue_target);
            self.release(present);

            let key = self.registers.new_temporary();
            self.emitter.emit(Instruction::ToIndexString { dst: key, index });
            self.emit_for_in_store(target, key, span)?;
            self.release(key);

            self.emit_for_in_body(local, ForInKind::Indexed { index }, body, completion)?;

            self.emitter.bind_label(continue_target);
            self.emitter.emit(Instruction::Inc { dst: index });
            self.emit_jump(top);
            let popped = self.labels.pop();
            self.emitter.bind_label(popped.break_target);
            self.emit_jump(end);
            self.emitter.bind_label(phase_end);
        }
        self.release(index);
        self.release(length);

        // Named properties
        let enumerator = self.registers.new_temporary();
        self.emitter.emit(Instruction::GetPropertyEnumerator {
            dst: enumerator,
            base,
        });
        let position = self.load_constant(Dst::Any, Constant::number(0.0));
        {
            let scope = self.push_loop_scope();
            let top = self.emitter.here();
            self.emitter.emit(Instruction::LoopHint {});

            let key = self.registers.new_temporary();
            self.emitter.emit(Instruction::EnumeratorNext {
                dst: key,
                enumerator,
                index: position,
            });
            self.emitter.emit_branch(
                Instruction::JumpIfNull {
                    src: key,
                    offset: JumpOffset::new(0),
                },
                scope.break_target,
            );

            let present = self.registers.new_temporary();
            self.emitter.emit(Instruction::HasGenericProperty {
                dst: present,
                base,
                property: key,
            });
            let Some(continue_target) = scope.continue_target else {
                unreachable!("loop scopes carry a continue target");
            };
            self.emit_jump_if(present, false, continue_target);
            self.release(present);

            self.emit_for_in_store(target, key, span)?;
            self.emit_for_in_body(
                local,
                ForInKind::Structured {
                    index: position,
                    enumerator,
                },
                body,
                completion,
            )?;
            self.release(key);

            self.emitter.bind_label(continue_target);
            self.emitter.emit(Instruction::Inc { dst: position });
            self.emit_jump(top);
            self.close_label_scope(scope);
        }
        self.release(position);
        self.release(enumerator);
        self.release(base);

        self.emitter.bind_label(end);
        Ok(())
    }

    fn emit_for_in_body(
        &mut self,
        local: Option<(Register, bool)>,
        kind: ForInKind,
        body: &'a Stmt<'a>,
        completion: Option<Register>,
    ) -> CompileResult<()> {
        let Some((local, valid)) = local else {
            return self.emit_stmt(body, completion);
        };
        self.control.push_for_in(ForInContext { local, kind, valid });
        let result = self.emit_stmt(body, completion);
        self.control.pop_for_in();
        result
    }

    // ==================== try ====================

    fn emit_try(
        &mut self,
        block: &'a [Stmt<'a>],
        handler: Option<CatchClause<'a>>,
        finalizer: Option<&'a [Stmt<'a>]>,
        completion: Option<Register>,
    ) -> CompileResult<()> {
        let try_start = self.emitter.here();
        if let Some(body) = finalizer {
            self.control.push_finally(body, self.labels.len());
        }
        let handler_target = self.emitter.new_label();
        self.control.push_try(try_start, handler_target);
        self.emit_stmts(block, completion)?;

        if let Some(catch) = handler {
            let catch_end = self.emitter.new_label();
            self.emit_jump(catch_end);
            let here = self.emitter.here();
            let data = self.control.pop_try(here);
            self.emitter.bind_label(data.target);
            let exception = self.registers.new_temporary();
            self.emitter.emit(Instruction::Catch { dst: exception });
            if finalizer.is_some() {
                let finally_target = self.emitter.new_label();
                self.control.push_try(here, finally_target);
            }
            match catch.param {
                Some(name) => {
                    self.emit_push_catch_scope(name, exception);
                    self.emit_stmts(catch.body, completion)?;
                    self.emit_pop_scope();
                }
                None => self.emit_stmts(catch.body, completion)?,
            }
            self.release(exception);
            self.emitter.bind_label(catch_end);
        }

        if let Some(body) = finalizer {
            let pre_finally = self.emitter.here();
            self.control.pop_finally();
            let data = self.control.pop_try(pre_finally);
            let finally_end = self.emitter.new_label();
            self.emit_stmts(body, completion)?;
            self.emit_jump(finally_end);

            self.emitter.bind_label(data.target);
            let exception = self.registers.new_temporary();
            self.emitter.emit(Instruction::Catch { dst: exception });
            self.emit_stmts(body, completion)?;
            self.emitter.emit(Instruction::Throw { value: exception });
            self.release(exception);
            self.emitter.bind_label(finally_end);
        }
        Ok(())
    }
}
