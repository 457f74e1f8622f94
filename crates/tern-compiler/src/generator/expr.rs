//! Expression emission

use smallvec::{SmallVec, smallvec};
use tern_bytecode::{Constant, Instruction, Register, ResolveMode, VariableStorage};

use super::{BytecodeGenerator, Dst, Label, ResolvedScope};
use crate::ast::{
    ArgumentsUsage, Argument, ArrayElement, BinaryOp, Expr, ExprKind, LogicalOp, Property,
    PropertyKey, PropertyKind, Span, UnaryOp, UpdateOp,
};
use crate::error::{CompileError, CompileResult};

/// Nodes inspected when looking for assignments to a name
const ASSIGNMENT_SCAN_BUDGET: usize = 64;

/// Register instruction for a binary operator
pub(super) fn binary_instruction(op: BinaryOp, dst: Register, lhs: Register, rhs: Register) -> Instruction {
    match op {
        BinaryOp::Add => Instruction::Add { dst, lhs, rhs },
        BinaryOp::Sub => Instruction::Sub { dst, lhs, rhs },
        BinaryOp::Mul => Instruction::Mul { dst, lhs, rhs },
        BinaryOp::Div => Instruction::Div { dst, lhs, rhs },
        BinaryOp::Mod => Instruction::Mod { dst, lhs, rhs },
        BinaryOp::BitAnd => Instruction::BitAnd { dst, lhs, rhs },
        BinaryOp::BitOr => Instruction::BitOr { dst, lhs, rhs },
        BinaryOp::BitXor => Instruction::BitXor { dst, lhs, rhs },
        BinaryOp::Shl => Instruction::Shl { dst, lhs, rhs },
        BinaryOp::Shr => Instruction::Shr { dst, lhs, rhs },
        BinaryOp::UShr => Instruction::UShr { dst, lhs, rhs },
        BinaryOp::Eq => Instruction::Eq { dst, lhs, rhs },
        BinaryOp::NotEq => Instruction::NotEq { dst, lhs, rhs },
        BinaryOp::StrictEq => Instruction::StrictEq { dst, lhs, rhs },
        BinaryOp::StrictNotEq => Instruction::StrictNotEq { dst, lhs, rhs },
        BinaryOp::Less => Instruction::Less { dst, lhs, rhs },
        BinaryOp::LessEq => Instruction::LessEq { dst, lhs, rhs },
        BinaryOp::Greater => Instruction::Greater { dst, lhs, rhs },
        BinaryOp::GreaterEq => Instruction::GreaterEq { dst, lhs, rhs },
        BinaryOp::In => Instruction::In {
            dst,
            property: lhs,
            base: rhs,
        },
        BinaryOp::InstanceOf => Instruction::InstanceOf {
            dst,
            value: lhs,
            constructor: rhs,
        },
    }
}

/// `typeof x == "<type>"` test instruction
fn type_test(type_name: &str, dst: Register, src: Register) -> Option<Instruction> {
    Some(match type_name {
        "undefined" => Instruction::IsUndefined { dst, src },
        "boolean" => Instruction::IsBoolean { dst, src },
        "number" => Instruction::IsNumber { dst, src },
        "string" => Instruction::IsString { dst, src },
        "object" => Instruction::IsObject { dst, src },
        "function" => Instruction::IsFunction { dst, src },
        _ => return None,
    })
}

/// Operand and type name of `typeof operand == "name"` in either order
fn typeof_comparison<'a>(lhs: &'a Expr<'a>, rhs: &'a Expr<'a>) -> Option<(&'a Expr<'a>, &'a str)> {
    let split = |a: &'a Expr<'a>, b: &'a Expr<'a>| match (a.kind, b.kind) {
        (ExprKind::Unary(UnaryOp::TypeOf, operand), ExprKind::String(name)) => Some((operand, name)),
        _ => None,
    };
    split(lhs, rhs)
        .or_else(|| split(rhs, lhs))
        .filter(|&(_, name)| {
            matches!(
                name,
                "undefined" | "boolean" | "number" | "string" | "object" | "function"
            )
        })
}

/// Truthiness of a literal, if `expr` is one
fn constant_truthiness(expr: &Expr<'_>) -> Option<bool> {
    match expr.kind {
        ExprKind::Number(n) => Some(n != 0.0 && !n.is_nan()),
        ExprKind::String(s) => Some(!s.is_empty()),
        ExprKind::Bool(b) => Some(b),
        ExprKind::Null => Some(false),
        _ => None,
    }
}

/// Whether evaluating `expr` may assign `name` directly. Nested functions
/// cannot reach a register local, so they are not searched; a scan that runs
/// out of budget answers yes.
pub(super) fn may_assign<'a>(expr: &'a Expr<'a>, name: &str) -> bool {
    let mut stack: SmallVec<[&'a Expr<'a>; 16]> = smallvec![expr];
    let mut budget = ASSIGNMENT_SCAN_BUDGET;
    while let Some(e) = stack.pop() {
        if budget == 0 {
            return true;
        }
        budget -= 1;
        match e.kind {
            ExprKind::Assign { target, value, .. } => {
                if target.as_ident() == Some(name) {
                    return true;
                }
                stack.push(target);
                stack.push(value);
            }
            ExprKind::Update { target, .. } => {
                if target.as_ident() == Some(name) {
                    return true;
                }
                stack.push(target);
            }
            ExprKind::Unary(_, operand) => stack.push(operand),
            ExprKind::Binary(_, lhs, rhs) | ExprKind::Logical(_, lhs, rhs) => {
                stack.push(lhs);
                stack.push(rhs);
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                stack.push(test);
                stack.push(consequent);
                stack.push(alternate);
            }
            ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
                stack.push(callee);
                stack.extend(args.iter().map(|arg| match *arg {
                    Argument::Expr(e) | Argument::Spread(e) => e,
                }));
            }
            ExprKind::Member { object, .. } => stack.push(object),
            ExprKind::Index { object, property } => {
                stack.push(object);
                stack.push(property);
            }
            ExprKind::Sequence(exprs) => stack.extend(exprs.iter()),
            ExprKind::Array(elements) => {
                stack.extend(elements.iter().filter_map(|element| match *element {
                    ArrayElement::Expr(e) | ArrayElement::Spread(e) => Some(e),
                    ArrayElement::Hole => None,
                }));
            }
            ExprKind::Object(properties) => {
                for property in properties {
                    stack.push(property.value);
                    if let PropertyKey::Computed(key) = property.key {
                        stack.push(key);
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
        }
    }
    false
}

impl<'a> BytecodeGenerator<'a> {
    /// Emit `expr`, leaving its value as `dst` asks
    pub(super) fn emit_expr(&mut self, expr: &'a Expr<'a>, dst: Dst) -> CompileResult<Register> {
        if !self.enter() {
            self.emit_too_deep();
            return Ok(self.placeholder(dst));
        }
        let result = self.emit_expr_inner(expr, dst);
        self.leave();
        result
    }

    fn emit_expr_inner(&mut self, expr: &'a Expr<'a>, dst: Dst) -> CompileResult<Register> {
        let span = expr.span;
        match expr.kind {
            ExprKind::Number(n) => Ok(self.load_constant(dst, Constant::number(n))),
            ExprKind::String(s) => Ok(self.load_constant(dst, Constant::string(s))),
            ExprKind::Bool(b) => Ok(self.load_constant(dst, Constant::Bool(b))),
            ExprKind::Null => Ok(self.load_constant(dst, Constant::Null)),
            ExprKind::This => Ok(match dst {
                Dst::Ignored => self.ignored_result(),
                _ => self.move_to_destination(dst, Register::this()),
            }),
            ExprKind::Ident(name) => {
                self.emit_ident_read(name, dst, ResolveMode::ThrowIfNotFound, span)
            }
            ExprKind::RegExp { pattern, flags } => {
                let reg = self.final_destination(dst, None);
                let pattern = self.constant_index(Constant::string(pattern));
                let flags = self.constant_index(Constant::string(flags));
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::NewRegExp {
                    dst: reg,
                    pattern,
                    flags,
                });
                Ok(reg)
            }
            ExprKind::Array(elements) => self.emit_array(elements, dst),
            ExprKind::Object(properties) => self.emit_object(properties, dst),
            ExprKind::Function(function) => {
                let index = self.function_index(function)?;
                let reg = self.final_destination(dst, None);
                self.emitter.emit(Instruction::NewFunction {
                    dst: reg,
                    scope: self.scope_register,
                    function: index,
                });
                Ok(reg)
            }
            ExprKind::Unary(op, operand) => self.emit_unary(op, operand, dst, span),
            ExprKind::Update { op, prefix, target } => {
                self.emit_update(op, prefix, target, dst, span)
            }
            ExprKind::Binary(op, lhs, rhs) => self.emit_binary(op, lhs, rhs, dst, span),
            ExprKind::Logical(op, lhs, rhs) => self.emit_logical(op, lhs, rhs, dst),
            ExprKind::Assign { op, target, value } => {
                self.emit_assign(op, target, value, dst, span)
            }
            ExprKind::Conditional {
                test,
                consequent,
                alternate,
            } => {
                let reg = self.final_destination(dst, None);
                let before_then = self.emitter.new_label();
                let before_else = self.emitter.new_label();
                let after_else = self.emitter.new_label();

                self.emit_condition(test, before_then, before_else, true)?;
                self.emitter.bind_label(before_then);
                let value = self.emit_expr(consequent, Dst::To(reg))?;
                self.release(value);
                self.emit_jump(after_else);

                self.emitter.bind_label(before_else);
                let value = self.emit_expr(alternate, Dst::To(reg))?;
                self.release(value);
                self.emitter.bind_label(after_else);
                Ok(reg)
            }
            ExprKind::Call { callee, args } => self.emit_call(callee, args, dst, span),
            ExprKind::New { callee, args } => self.emit_construct(callee, args, dst, span),
            ExprKind::Member { object, property } => {
                if property == "length" && self.is_direct_arguments(object) {
                    let reg = self.final_destination(dst, None);
                    self.emitter.emit(Instruction::GetArgumentCount { dst: reg });
                    return Ok(reg);
                }
                let base = self.emit_expr(object, Dst::Any)?;
                let reg = self.final_destination(dst, Some(base));
                let name = self.emitter.add_identifier(property);
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::GetById {
                    dst: reg,
                    base,
                    name,
                });
                self.release(base);
                Ok(reg)
            }
            ExprKind::Index { object, property } => self.emit_index(object, property, dst, span),
            ExprKind::Sequence(exprs) => {
                let Some((last, rest)) = exprs.split_last() else {
                    return Ok(self.load_constant(dst, Constant::Undefined));
                };
                for e in rest {
                    let value = self.emit_expr(e, Dst::Ignored)?;
                    self.release(value);
                }
                self.emit_expr(last, dst)
            }
            ExprKind::TooDeep => {
                self.emit_too_deep();
                Ok(self.placeholder(dst))
            }
        }
    }

    /// `arguments` in a body that never materializes the object
    fn is_direct_arguments(&self, object: &Expr<'_>) -> bool {
        self.info.arguments == ArgumentsUsage::Direct && object.as_ident() == Some("arguments")
    }

    /// Evaluate the left operand of an operator. A named local that a later
    /// operand may assign is copied first so the operator sees its old value.
    pub(super) fn emit_operand_guarded(
        &mut self,
        operand: &'a Expr<'a>,
        later: &[&'a Expr<'a>],
    ) -> CompileResult<Register> {
        let reg = self.emit_expr(operand, Dst::Any)?;
        if let Some(name) = operand.as_ident()
            && !self.registers.is_temporary(reg)
            && later.iter().any(|e| may_assign(e, name))
        {
            let copy = self.registers.new_temporary();
            self.emitter.emit(Instruction::Mov {
                dst: copy,
                src: reg,
            });
            return Ok(copy);
        }
        Ok(reg)
    }

    // ==================== Identifiers ====================

    pub(super) fn emit_ident_read(
        &mut self,
        name: &'a str,
        dst: Dst,
        mode: ResolveMode,
        span: Span,
    ) -> CompileResult<Register> {
        match self.resolve(name) {
            ResolvedScope::Local(entry) => match entry.storage {
                VariableStorage::Register(reg) => Ok(match dst {
                    Dst::Ignored => self.ignored_result(),
                    _ => self.move_to_destination(dst, reg),
                }),
                VariableStorage::Environment(slot) => {
                    if dst == Dst::Ignored {
                        return Ok(self.ignored_result());
                    }
                    let scope = self.activation()?;
                    let reg = self.final_destination(dst, None);
                    self.emitter.emit(Instruction::GetClosureVar {
                        dst: reg,
                        scope,
                        slot,
                    });
                    Ok(reg)
                }
            },
            ResolvedScope::Dynamic => {
                let reg = self.final_destination(dst, None);
                let scope = self.emit_resolve_scope(name, mode);
                let name = self.emitter.add_identifier(name);
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::GetFromScope {
                    dst: reg,
                    scope,
                    name,
                    mode,
                });
                self.release(scope);
                Ok(reg)
            }
        }
    }

    /// Assign `value` (or `name op value`) to an identifier. Initializers of
    /// declarations write `const` bindings too.
    pub(super) fn emit_assign_ident(
        &mut self,
        name: &'a str,
        op: Option<BinaryOp>,
        value: &'a Expr<'a>,
        dst: Dst,
        span: Span,
        initializing: bool,
    ) -> CompileResult<Register> {
        match self.resolve(name) {
            ResolvedScope::Local(entry) if entry.read_only && !initializing => {
                let result = match op {
                    None => self.emit_expr(value, Dst::Any)?,
                    Some(op) => {
                        let current =
                            self.emit_ident_read(name, Dst::Any, ResolveMode::ThrowIfNotFound, span)?;
                        self.emit_read_modify(op, current, value, span)?
                    }
                };
                self.emit_read_only_error();
                Ok(self.move_to_destination(dst, result))
            }
            ResolvedScope::Local(entry) => match entry.storage {
                VariableStorage::Register(reg) => {
                    self.control.invalidate_for_in(reg);
                    match op {
                        None => {
                            let result = self.emit_expr(value, Dst::To(reg))?;
                            self.release(result);
                        }
                        Some(op) if may_assign(value, name) => {
                            let copy = self.registers.new_temporary();
                            self.emitter.emit(Instruction::Mov {
                                dst: copy,
                                src: reg,
                            });
                            let result = self.emit_read_modify(op, copy, value, span)?;
                            self.emitter.emit(Instruction::Mov {
                                dst: reg,
                                src: result,
                            });
                            return Ok(self.move_to_destination(dst, result));
                        }
                        Some(op) => {
                            let rhs = self.emit_expr(value, Dst::Any)?;
                            self.emitter.record_position(span);
                            self.emitter.emit(binary_instruction(op, reg, reg, rhs));
                            self.release(rhs);
                        }
                    }
                    Ok(self.move_to_destination(dst, reg))
                }
                VariableStorage::Environment(slot) => {
                    let scope = self.activation()?;
                    let result = match op {
                        None => self.emit_expr(value, Dst::Any)?,
                        Some(op) => {
                            let current = self.registers.new_temporary();
                            self.emitter.emit(Instruction::GetClosureVar {
                                dst: current,
                                scope,
                                slot,
                            });
                            self.emit_read_modify(op, current, value, span)?
                        }
                    };
                    self.emitter.emit(Instruction::PutClosureVar {
                        scope,
                        slot,
                        value: result,
                    });
                    Ok(self.move_to_destination(dst, result))
                }
            },
            ResolvedScope::Dynamic => {
                let mode = if initializing {
                    ResolveMode::DoNotThrowIfNotFound
                } else {
                    self.write_mode()
                };
                let scope = self.emit_resolve_scope(name, mode);
                let id = self.emitter.add_identifier(name);
                let result = match op {
                    None => self.emit_expr(value, Dst::Any)?,
                    Some(op) => {
                        let current = self.registers.new_temporary();
                        self.emitter.record_position(span);
                        self.emitter.emit(Instruction::GetFromScope {
                            dst: current,
                            scope,
                            name: id,
                            mode: ResolveMode::ThrowIfNotFound,
                        });
                        self.emit_read_modify(op, current, value, span)?
                    }
                };
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::PutToScope {
                    scope,
                    name: id,
                    value: result,
                    mode,
                });
                self.release(scope);
                Ok(self.move_to_destination(dst, result))
            }
        }
    }

    /// `current op value`, consuming `current`
    fn emit_read_modify(
        &mut self,
        op: BinaryOp,
        current: Register,
        value: &'a Expr<'a>,
        span: Span,
    ) -> CompileResult<Register> {
        let rhs = self.emit_expr(value, Dst::Any)?;
        let result = self.final_destination(Dst::Any, Some(current));
        self.emitter.record_position(span);
        self.emitter.emit(binary_instruction(op, result, current, rhs));
        self.release(rhs);
        self.release(current);
        Ok(result)
    }

    // ==================== Operators ====================

    fn emit_binary(
        &mut self,
        op: BinaryOp,
        lhs: &'a Expr<'a>,
        rhs: &'a Expr<'a>,
        dst: Dst,
        span: Span,
    ) -> CompileResult<Register> {
        if matches!(op, BinaryOp::Eq | BinaryOp::StrictEq)
            && let Some((operand, type_name)) = typeof_comparison(lhs, rhs)
        {
            let src = self.emit_typeof_operand(operand)?;
            let reg = self.final_destination(dst, Some(src));
            if let Some(test) = type_test(type_name, reg, src) {
                self.emitter.emit(test);
            }
            self.release(src);
            return Ok(reg);
        }

        if matches!(op, BinaryOp::Eq | BinaryOp::NotEq) {
            let operand = match (lhs.kind, rhs.kind) {
                (_, ExprKind::Null) => Some(lhs),
                (ExprKind::Null, _) => Some(rhs),
                _ => None,
            };
            if let Some(operand) = operand {
                let src = self.emit_expr(operand, Dst::Any)?;
                let reg = self.final_destination(dst, Some(src));
                self.emitter.emit(if op == BinaryOp::Eq {
                    Instruction::EqNull { dst: reg, src }
                } else {
                    Instruction::NotEqNull { dst: reg, src }
                });
                self.release(src);
                return Ok(reg);
            }
        }

        let left = self.emit_operand_guarded(lhs, &[rhs])?;
        let right = self.emit_expr(rhs, Dst::Any)?;
        let reg = self.final_destination(dst, Some(left));
        self.emitter.record_position(span);
        self.emitter.emit(binary_instruction(op, reg, left, right));
        self.release(right);
        self.release(left);
        Ok(reg)
    }

    /// Operand of `typeof`: an unresolvable name reads as undefined
    fn emit_typeof_operand(&mut self, operand: &'a Expr<'a>) -> CompileResult<Register> {
        match operand.as_ident() {
            Some(name) => self.emit_ident_read(
                name,
                Dst::Any,
                ResolveMode::DoNotThrowIfNotFound,
                operand.span,
            ),
            None => self.emit_expr(operand, Dst::Any),
        }
    }

    fn emit_logical(
        &mut self,
        op: LogicalOp,
        lhs: &'a Expr<'a>,
        rhs: &'a Expr<'a>,
        dst: Dst,
    ) -> CompileResult<Register> {
        let temp = self.temp_destination(dst);
        let done = self.emitter.new_label();

        let value = self.emit_expr(lhs, Dst::To(temp))?;
        self.release(value);
        match op {
            LogicalOp::And => self.emit_jump_if(temp, false, done),
            LogicalOp::Or => self.emit_jump_if(temp, true, done),
            LogicalOp::Coalesce => {
                self.emitter.emit_branch(
                    Instruction::JumpIfNotNull {
                        src: temp,
                        offset: tern_bytecode::JumpOffset::new(0),
                    },
                    done,
                );
            }
        }
        let value = self.emit_expr(rhs, Dst::To(temp))?;
        self.release(value);
        self.emitter.bind_label(done);
        Ok(self.move_to_destination(dst, temp))
    }

    fn emit_unary(
        &mut self,
        op: UnaryOp,
        operand: &'a Expr<'a>,
        dst: Dst,
        span: Span,
    ) -> CompileResult<Register> {
        match op {
            UnaryOp::Void => {
                let value = self.emit_expr(operand, Dst::Ignored)?;
                self.release(value);
                Ok(self.load_constant(dst, Constant::Undefined))
            }
            UnaryOp::Delete => self.emit_delete(operand, dst, span),
            UnaryOp::TypeOf => {
                let src = self.emit_typeof_operand(operand)?;
                let reg = self.final_destination(dst, Some(src));
                self.emitter.emit(Instruction::TypeOf { dst: reg, src });
                self.release(src);
                Ok(reg)
            }
            UnaryOp::Minus | UnaryOp::Plus | UnaryOp::Not | UnaryOp::BitNot => {
                let src = self.emit_expr(operand, Dst::Any)?;
                let reg = self.final_destination(dst, Some(src));
                self.emitter.record_position(span);
                self.emitter.emit(match op {
                    UnaryOp::Minus => Instruction::Negate { dst: reg, src },
                    UnaryOp::Plus => Instruction::ToNumber { dst: reg, src },
                    UnaryOp::Not => Instruction::Not { dst: reg, src },
                    _ => Instruction::BitNot { dst: reg, src },
                });
                self.release(src);
                Ok(reg)
            }
        }
    }

    fn emit_delete(&mut self, operand: &'a Expr<'a>, dst: Dst, span: Span) -> CompileResult<Register> {
        match operand.kind {
            ExprKind::Ident(name) => match self.resolve(name) {
                ResolvedScope::Local(_) => Ok(self.load_constant(dst, Constant::Bool(false))),
                ResolvedScope::Dynamic => {
                    let reg = self.final_destination(dst, None);
                    let scope = self.emit_resolve_scope(name, ResolveMode::DoNotThrowIfNotFound);
                    let name = self.emitter.add_identifier(name);
                    self.emitter.emit(Instruction::DeleteById {
                        dst: reg,
                        base: scope,
                        name,
                    });
                    self.release(scope);
                    Ok(reg)
                }
            },
            ExprKind::Member { object, property } => {
                let base = self.emit_expr(object, Dst::Any)?;
                let reg = self.final_destination(dst, Some(base));
                let name = self.emitter.add_identifier(property);
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::DeleteById {
                    dst: reg,
                    base,
                    name,
                });
                self.release(base);
                Ok(reg)
            }
            ExprKind::Index { object, property } => {
                let base = self.emit_operand_guarded(object, &[property])?;
                let key = self.emit_expr(property, Dst::Any)?;
                let reg = self.final_destination(dst, None);
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::DeleteByVal {
                    dst: reg,
                    base,
                    property: key,
                });
                self.release(key);
                self.release(base);
                Ok(reg)
            }
            _ => {
                let value = self.emit_expr(operand, Dst::Ignored)?;
                self.release(value);
                Ok(self.load_constant(dst, Constant::Bool(true)))
            }
        }
    }

    // ==================== Updates and assignments ====================

    fn emit_inc_dec(&mut self, op: UpdateOp, reg: Register) {
        self.emitter.emit(match op {
            UpdateOp::Increment => Instruction::Inc { dst: reg },
            UpdateOp::Decrement => Instruction::Dec { dst: reg },
        });
    }

    /// Update the value held in the temporary `current` in place, returning
    /// the expression result. `current` stays owned by the caller, who
    /// stores it back.
    fn emit_update_value(
        &mut self,
        op: UpdateOp,
        prefix: bool,
        current: Register,
        dst: Dst,
    ) -> Register {
        if prefix {
            self.emit_inc_dec(op, current);
            self.registers.retain(current);
            return self.move_to_destination(dst, current);
        }
        if dst == Dst::Ignored {
            self.emit_inc_dec(op, current);
            return self.ignored_result();
        }
        let result = self.final_destination(dst, None);
        self.emitter.emit(Instruction::ToNumber {
            dst: result,
            src: current,
        });
        self.emit_inc_dec(op, current);
        result
    }

    fn emit_update(
        &mut self,
        op: UpdateOp,
        prefix: bool,
        target: &'a Expr<'a>,
        dst: Dst,
        span: Span,
    ) -> CompileResult<Register> {
        match target.kind {
            ExprKind::Ident(name) => self.emit_update_ident(name, op, prefix, dst, span),
            ExprKind::Member { object, property } => {
                let base = self.emit_expr(object, Dst::Any)?;
                let name = self.emitter.add_identifier(property);
                let current = self.registers.new_temporary();
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::GetById {
                    dst: current,
                    base,
                    name,
                });
                let result = self.emit_update_value(op, prefix, current, dst);
                self.emitter.emit(Instruction::PutById {
                    base,
                    name,
                    value: current,
                });
                self.release(current);
                self.release(base);
                Ok(result)
            }
            ExprKind::Index { object, property } => {
                let base = self.emit_operand_guarded(object, &[property])?;
                let key = self.emit_expr(property, Dst::Any)?;
                let current = self.registers.new_temporary();
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::GetByVal {
                    dst: current,
                    base,
                    property: key,
                });
                let result = self.emit_update_value(op, prefix, current, dst);
                self.emitter.emit(Instruction::PutByVal {
                    base,
                    property: key,
                    value: current,
                });
                self.release(current);
                self.release(key);
                self.release(base);
                Ok(result)
            }
            _ => Err(CompileError::syntax(
                "invalid update target",
                span.line,
                span.column,
            )),
        }
    }

    fn emit_update_ident(
        &mut self,
        name: &'a str,
        op: UpdateOp,
        prefix: bool,
        dst: Dst,
        span: Span,
    ) -> CompileResult<Register> {
        match self.resolve(name) {
            ResolvedScope::Local(entry) => match entry.storage {
                VariableStorage::Register(reg) if entry.read_only => {
                    let copy = self.registers.new_temporary();
                    self.emitter.emit(Instruction::Mov {
                        dst: copy,
                        src: reg,
                    });
                    self.emit_read_only_error();
                    let result = self.emit_update_value(op, prefix, copy, dst);
                    self.release(copy);
                    Ok(result)
                }
                VariableStorage::Register(reg) => {
                    self.control.invalidate_for_in(reg);
                    if prefix || dst == Dst::Ignored {
                        self.emit_inc_dec(op, reg);
                        return Ok(match dst {
                            Dst::Ignored => self.ignored_result(),
                            _ => self.move_to_destination(dst, reg),
                        });
                    }
                    let result = if dst == Dst::To(reg) {
                        self.registers.new_temporary()
                    } else {
                        self.final_destination(dst, None)
                    };
                    self.emitter.emit(Instruction::ToNumber {
                        dst: result,
                        src: reg,
                    });
                    self.emit_inc_dec(op, reg);
                    Ok(self.move_to_destination(dst, result))
                }
                VariableStorage::Environment(slot) => {
                    let scope = self.activation()?;
                    let current = self.registers.new_temporary();
                    self.emitter.emit(Instruction::GetClosureVar {
                        dst: current,
                        scope,
                        slot,
                    });
                    if entry.read_only {
                        self.emit_read_only_error();
                    }
                    let result = self.emit_update_value(op, prefix, current, dst);
                    if !entry.read_only {
                        self.emitter.emit(Instruction::PutClosureVar {
                            scope,
                            slot,
                            value: current,
                        });
                    }
                    self.release(current);
                    Ok(result)
                }
            },
            ResolvedScope::Dynamic => {
                let mode = self.write_mode();
                let scope = self.emit_resolve_scope(name, ResolveMode::ThrowIfNotFound);
                let id = self.emitter.add_identifier(name);
                let current = self.registers.new_temporary();
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::GetFromScope {
                    dst: current,
                    scope,
                    name: id,
                    mode: ResolveMode::ThrowIfNotFound,
                });
                let result = self.emit_update_value(op, prefix, current, dst);
                self.emitter.emit(Instruction::PutToScope {
                    scope,
                    name: id,
                    value: current,
                    mode,
                });
                self.release(current);
                self.release(scope);
                Ok(result)
            }
        }
    }

    fn emit_assign(
        &mut self,
        op: Option<BinaryOp>,
        target: &'a Expr<'a>,
        value: &'a Expr<'a>,
        dst: Dst,
        span: Span,
    ) -> CompileResult<Register> {
        match target.kind {
            ExprKind::Ident(name) => self.emit_assign_ident(name, op, value, dst, span, false),
            ExprKind::Member { object, property } => {
                let base = self.emit_operand_guarded(object, &[value])?;
                let name = self.emitter.add_identifier(property);
                let result = match op {
                    None => self.emit_expr(value, Dst::Any)?,
                    Some(op) => {
                        let current = self.registers.new_temporary();
                        self.emitter.record_position(span);
                        self.emitter.emit(Instruction::GetById {
                            dst: current,
                            base,
                            name,
                        });
                        self.emit_read_modify(op, current, value, span)?
                    }
                };
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::PutById {
                    base,
                    name,
                    value: result,
                });
                self.release(base);
                Ok(self.move_to_destination(dst, result))
            }
            ExprKind::Index { object, property } => {
                let base = self.emit_operand_guarded(object, &[property, value])?;
                let key = self.emit_operand_guarded(property, &[value])?;
                let result = match op {
                    None => self.emit_expr(value, Dst::Any)?,
                    Some(op) => {
                        let current = self.registers.new_temporary();
                        self.emitter.record_position(span);
                        self.emitter.emit(Instruction::GetByVal {
                            dst: current,
                            base,
                            property: key,
                        });
                        self.emit_read_modify(op, current, value, span)?
                    }
                };
                self.emitter.record_position(span);
                self.emitter.emit(Instruction::PutByVal {
                    base,
                    property: key,
                    value: result,
                });
                self.release(key);
                self.release(base);
                Ok(self.move_to_destination(dst, result))
            }
            _ => Err(CompileError::syntax(
                "invalid assignment target",
                span.line,
                span.column,
            )),
        }
    }

    // ==================== Property reads ====================

    fn emit_index(
        &mut self,
        object: &'a Expr<'a>,
        property: &'a Expr<'a>,
        dst: Dst,
        span: Span,
    ) -> CompileResult<Register> {
        if self.is_direct_arguments(object)
            && let ExprKind::Number(n) = property.kind
            && n >= 0.0
            && n.fract() == 0.0
            && n < u32::MAX as f64
        {
            let reg = self.final_destination(dst, None);
            self.emitter.emit(Instruction::GetArgument {
                dst: reg,
                index: n as u32,
            });
            return Ok(reg);
        }

        if let Some(name) = property.as_ident()
            && let ResolvedScope::Local(entry) = self.resolve(name)
            && let VariableStorage::Register(local) = entry.storage
            && let Some(context) = self.control.for_in_for(local)
            && context.valid
        {
            let base = self.emit_expr(object, Dst::Any)?;
            let reg = self.final_destination(dst, Some(base));
            self.emitter.record_position(span);
            self.emitter.emit(match context.kind {
                super::ForInKind::Indexed { index } => Instruction::GetByVal {
                    dst: reg,
                    base,
                    property: index,
                },
                super::ForInKind::Structured { index, enumerator } => Instruction::GetDirectPname {
                    dst: reg,
                    base,
                    property: local,
                    index,
                    enumerator,
                },
            });
            self.release(base);
            return Ok(reg);
        }

        let base = self.emit_operand_guarded(object, &[property])?;
        let key = self.emit_expr(property, Dst::Any)?;
        let reg = self.final_destination(dst, Some(base));
        self.emitter.record_position(span);
        self.emitter.emit(Instruction::GetByVal {
            dst: reg,
            base,
            property: key,
        });
        self.release(key);
        self.release(base);
        Ok(reg)
    }

    // ==================== Literals ====================

    fn emit_array(&mut self, elements: &'a [ArrayElement<'a>], dst: Dst) -> CompileResult<Register> {
        let leading = elements
            .iter()
            .take_while(|e| matches!(e, ArrayElement::Expr(_)))
            .count();
        let array = if leading == elements.len() {
            self.final_destination(dst, None)
        } else {
            self.temp_destination(dst)
        };

        let mut values: Vec<Register> = (0..leading).map(|_| self.registers.new_temporary()).collect();
        values.reverse();
        for (element, &reg) in elements.iter().zip(&values) {
            if let ArrayElement::Expr(e) = *element {
                let value = self.emit_expr(e, Dst::To(reg))?;
                self.release(value);
            }
        }
        let first = values
            .first()
            .copied()
            .unwrap_or_else(|| Register::local(self.registers.next_local()));
        self.emitter.emit(Instruction::NewArray {
            dst: array,
            first,
            count: leading as u32,
        });
        for reg in values {
            self.release(reg);
        }

        for element in &elements[leading..] {
            match *element {
                ArrayElement::Hole => {
                    self.emitter.emit(Instruction::ArrayPushHole { array });
                }
                ArrayElement::Expr(e) => {
                    let value = self.emit_expr(e, Dst::Any)?;
                    self.emitter.emit(Instruction::ArrayPush { array, value });
                    self.release(value);
                }
                ArrayElement::Spread(e) => {
                    let iterable = self.emit_expr(e, Dst::Any)?;
                    self.emitter.record_position(e.span);
                    self.emitter
                        .emit(Instruction::ArrayAppendSpread { array, iterable });
                    self.release(iterable);
                }
            }
        }
        Ok(self.move_to_destination(dst, array))
    }

    fn emit_object(&mut self, properties: &'a [Property<'a>], dst: Dst) -> CompileResult<Register> {
        if self.strict {
            self.check_accessor_clashes(properties)?;
        }

        let object = self.temp_destination(dst);
        self.emitter.emit(Instruction::NewObject { dst: object });

        let mut paired = vec![false; properties.len()];
        for (i, property) in properties.iter().enumerate() {
            if paired[i] {
                continue;
            }
            match (property.kind, property.key) {
                (PropertyKind::Init, PropertyKey::Name(key)) => {
                    let value = self.emit_expr(property.value, Dst::Any)?;
                    let name = self.emitter.add_identifier(key);
                    self.emitter.emit(Instruction::DefineById {
                        base: object,
                        name,
                        value,
                    });
                    self.release(value);
                }
                (PropertyKind::Init, PropertyKey::Computed(key)) => {
                    let key = self.emit_expr(key, Dst::Any)?;
                    let value = self.emit_expr(property.value, Dst::Any)?;
                    self.emitter.record_position(property.span);
                    self.emitter.emit(Instruction::PutByVal {
                        base: object,
                        property: key,
                        value,
                    });
                    self.release(value);
                    self.release(key);
                }
                (_, PropertyKey::Computed(_)) => {
                    return Err(CompileError::unsupported("computed accessor names"));
                }
                (kind, PropertyKey::Name(key)) => {
                    let partner_kind = if kind == PropertyKind::Get {
                        PropertyKind::Set
                    } else {
                        PropertyKind::Get
                    };
                    let partner = properties
                        .iter()
                        .enumerate()
                        .skip(i + 1)
                        .find(|(_, p)| {
                            p.kind == partner_kind && matches!(p.key, PropertyKey::Name(k) if k == key)
                        })
                        .map(|(j, p)| (j, p.value));
                    if let Some((j, _)) = partner {
                        paired[j] = true;
                    }
                    let (getter, setter) = match (kind, partner) {
                        (PropertyKind::Get, p) => (Some(property.value), p.map(|(_, v)| v)),
                        (_, p) => (p.map(|(_, v)| v), Some(property.value)),
                    };
                    let getter = match getter {
                        Some(e) => self.emit_expr(e, Dst::Any)?,
                        None => self.load_constant(Dst::Any, Constant::Undefined),
                    };
                    let setter = match setter {
                        Some(e) => self.emit_expr(e, Dst::Any)?,
                        None => self.load_constant(Dst::Any, Constant::Undefined),
                    };
                    let name = self.emitter.add_identifier(key);
                    self.emitter.emit(Instruction::PutGetterSetter {
                        base: object,
                        name,
                        getter,
                        setter,
                    });
                    self.release(setter);
                    self.release(getter);
                }
            }
        }
        Ok(self.move_to_destination(dst, object))
    }

    /// A name may not be both a data property and an accessor
    fn check_accessor_clashes(&self, properties: &'a [Property<'a>]) -> CompileResult<()> {
        for (i, property) in properties.iter().enumerate() {
            let PropertyKey::Name(key) = property.key else {
                continue;
            };
            let is_accessor = property.kind != PropertyKind::Init;
            let clash = properties[..i].iter().any(|earlier| {
                matches!(earlier.key, PropertyKey::Name(k) if k == key)
                    && (earlier.kind != PropertyKind::Init) != is_accessor
            });
            if clash {
                return Err(CompileError::invalid_initializer(
                    format!("property `{key}` is defined both as data and as an accessor"),
                    property.span.line,
                    property.span.column,
                ));
            }
        }
        Ok(())
    }

    // ==================== Conditions ====================

    /// Emit `expr` for its truthiness only: branch to `true_target` or
    /// `false_target`, falling through into whichever one
    /// `fall_through_true` names
    pub(super) fn emit_condition(
        &mut self,
        expr: &'a Expr<'a>,
        true_target: Label,
        false_target: Label,
        fall_through_true: bool,
    ) -> CompileResult<()> {
        if !self.enter() {
            self.emit_too_deep();
            return Ok(());
        }
        let result = self.emit_condition_inner(expr, true_target, false_target, fall_through_true);
        self.leave();
        result
    }

    fn emit_condition_inner(
        &mut self,
        expr: &'a Expr<'a>,
        true_target: Label,
        false_target: Label,
        fall_through_true: bool,
    ) -> CompileResult<()> {
        match expr.kind {
            ExprKind::Unary(UnaryOp::Not, operand) => {
                self.emit_condition(operand, false_target, true_target, !fall_through_true)
            }
            ExprKind::Logical(LogicalOp::And, lhs, rhs) => {
                let after_lhs = self.emitter.new_label();
                self.emit_condition(lhs, after_lhs, false_target, true)?;
                self.emitter.bind_label(after_lhs);
                self.emit_condition(rhs, true_target, false_target, fall_through_true)
            }
            ExprKind::Logical(LogicalOp::Or, lhs, rhs) => {
                let after_lhs = self.emitter.new_label();
                self.emit_condition(lhs, true_target, after_lhs, false)?;
                self.emitter.bind_label(after_lhs);
                self.emit_condition(rhs, true_target, false_target, fall_through_true)
            }
            _ => {
                if let Some(truthy) = constant_truthiness(expr) {
                    if truthy && !fall_through_true {
                        self.emit_jump(true_target);
                    } else if !truthy && fall_through_true {
                        self.emit_jump(false_target);
                    }
                    return Ok(());
                }
                let cond = self.emit_expr(expr, Dst::Any)?;
                if fall_through_true {
                    self.emit_consuming_jump_if(cond, false, false_target);
                } else {
                    self.emit_consuming_jump_if(cond, true, true_target);
                }
                self.release(cond);
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::AstBuilder;
    use bumpalo::Bump;

    #[test]
    fn test_may_assign_finds_nested_writes() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let x = b.ident("x");
        let write = b.expr(
            ExprKind::Assign {
                op: None,
                target: x,
                value: b.number(1.0),
            },
            Span::default(),
        );
        let sum = b.binary(BinaryOp::Add, b.ident("y"), write);
        assert!(may_assign(sum, "x"));
        assert!(!may_assign(sum, "y"));
    }

    #[test]
    fn test_may_assign_gives_up_conservatively() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let mut e = b.number(0.0);
        for _ in 0..ASSIGNMENT_SCAN_BUDGET {
            e = b.binary(BinaryOp::Add, e, b.number(1.0));
        }
        assert!(may_assign(e, "x"));
        assert!(!may_assign(b.binary(BinaryOp::Add, b.number(1.0), b.number(2.0)), "x"));
    }

    #[test]
    fn test_typeof_comparison_either_side() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let t = b.expr(ExprKind::Unary(UnaryOp::TypeOf, b.ident("v")), Span::default());
        let s = b.expr(ExprKind::String("number"), Span::default());
        assert_eq!(typeof_comparison(t, s).map(|(_, n)| n), Some("number"));
        assert_eq!(typeof_comparison(s, t).map(|(_, n)| n), Some("number"));
        let other = b.expr(ExprKind::String("symbol"), Span::default());
        assert!(typeof_comparison(t, other).is_none());
    }

    #[test]
    fn test_constant_truthiness() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        assert_eq!(constant_truthiness(b.number(0.0)), Some(false));
        assert_eq!(constant_truthiness(b.number(f64::NAN)), Some(false));
        assert_eq!(constant_truthiness(b.number(2.0)), Some(true));
        assert_eq!(constant_truthiness(b.ident("x")), None);
    }
}
