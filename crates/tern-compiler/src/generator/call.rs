//! Calls and `new`
//!
//! A call's arguments are built in consecutive temporaries with `this` in
//! the lowest slot, so the callee frame can be laid directly on top of them:
//! the callee's header occupies the four slots below `this`. Padding
//! temporaries in front keep the callee frame base aligned.

use tern_bytecode::frame::{CALL_FRAME_HEADER_SIZE, call_frame_padding};
use tern_bytecode::{Constant, Instruction, Register};

use super::{BytecodeGenerator, Dst, ResolvedScope};
use crate::ast::{Argument, Expr, ExprKind, Span};
use crate::error::CompileResult;

/// Argument registers of one call site
struct CallArguments {
    /// `argv[0]` is `this`, `argv[i]` is argument `i`; `argv[i] == argv[0] + i`
    argv: Vec<Register>,
    padding: Vec<Register>,
}

impl CallArguments {
    fn this(&self) -> Register {
        self.argv[0]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CallKind {
    Call,
    Eval,
    Construct,
}

impl<'a> BytecodeGenerator<'a> {
    fn new_call_arguments(&mut self, argc: usize) -> CallArguments {
        self.registers.reclaim();
        let slots = argc as u32 + 1;
        let pad = call_frame_padding(self.registers.next_local(), slots);
        let padding = (0..pad).map(|_| self.registers.new_temporary()).collect();
        let mut argv: Vec<Register> = (0..slots).map(|_| self.registers.new_temporary()).collect();
        argv.reverse();
        CallArguments { argv, padding }
    }

    fn release_call_arguments(&mut self, arguments: CallArguments) {
        for reg in arguments.argv.into_iter().chain(arguments.padding) {
            self.release(reg);
        }
    }

    /// Direct `eval(...)`: the name is not shadowed by a local
    fn is_direct_eval(&self, callee: &Expr<'_>) -> bool {
        callee.as_ident() == Some("eval") && self.resolve("eval") == ResolvedScope::Dynamic
    }

    pub(super) fn emit_call(
        &mut self,
        callee: &'a Expr<'a>,
        args: &'a [Argument<'a>],
        dst: Dst,
        span: Span,
    ) -> CompileResult<Register> {
        let kind = if self.is_direct_eval(callee) {
            CallKind::Eval
        } else {
            CallKind::Call
        };
        if args.iter().any(|a| matches!(a, Argument::Spread(_))) {
            return self.emit_varargs_call(kind, callee, args, dst, span);
        }

        match callee.kind {
            ExprKind::Member { object, property } => {
                let function = self.temp_destination(dst);
                let arguments = self.new_call_arguments(args.len());
                let base = self.emit_expr(object, Dst::To(arguments.this()))?;
                self.release(base);
                let name = self.emitter.add_identifier(property);
                self.emitter.record_position(callee.span);
                self.emitter.emit(Instruction::GetById {
                    dst: function,
                    base: arguments.this(),
                    name,
                });
                self.finish_call(kind, function, arguments, args, dst, span)
            }
            ExprKind::Index { object, property } => {
                let function = self.temp_destination(dst);
                let arguments = self.new_call_arguments(args.len());
                let base = self.emit_expr(object, Dst::To(arguments.this()))?;
                self.release(base);
                let key = self.emit_expr(property, Dst::Any)?;
                self.emitter.record_position(callee.span);
                self.emitter.emit(Instruction::GetByVal {
                    dst: function,
                    base: arguments.this(),
                    property: key,
                });
                self.release(key);
                self.finish_call(kind, function, arguments, args, dst, span)
            }
            _ => {
                let function = self.emit_expr(callee, Dst::Any)?;
                let arguments = self.new_call_arguments(args.len());
                self.load_constant(Dst::To(arguments.this()), Constant::Undefined);
                self.release(arguments.this());
                self.finish_call(kind, function, arguments, args, dst, span)
            }
        }
    }

    pub(super) fn emit_construct(
        &mut self,
        callee: &'a Expr<'a>,
        args: &'a [Argument<'a>],
        dst: Dst,
        span: Span,
    ) -> CompileResult<Register> {
        if args.iter().any(|a| matches!(a, Argument::Spread(_))) {
            return self.emit_varargs_call(CallKind::Construct, callee, args, dst, span);
        }
        let function = self.emit_expr(callee, Dst::Any)?;
        let arguments = self.new_call_arguments(args.len());
        self.finish_call(CallKind::Construct, function, arguments, args, dst, span)
    }

    /// Evaluate arguments and emit the call. Consumes `function` and the
    /// argument registers.
    fn finish_call(
        &mut self,
        kind: CallKind,
        function: Register,
        arguments: CallArguments,
        args: &'a [Argument<'a>],
        dst: Dst,
        span: Span,
    ) -> CompileResult<Register> {
        for (i, arg) in args.iter().enumerate() {
            if let Argument::Expr(e) = *arg {
                let value = self.emit_expr(e, Dst::To(arguments.argv[i + 1]))?;
                self.release(value);
            }
        }

        let result = self.final_destination(dst, Some(function));
        let link = self.next_call_link();
        let this_arg = arguments.this();
        let argc = arguments.argv.len() as u32;
        self.emitter.record_position(span);
        self.emitter.emit(match kind {
            CallKind::Call => Instruction::Call {
                dst: result,
                callee: function,
                this_arg,
                argc,
                link,
            },
            CallKind::Eval => Instruction::CallEval {
                dst: result,
                callee: function,
                this_arg,
                argc,
                link,
            },
            CallKind::Construct => Instruction::Construct {
                dst: result,
                callee: function,
                this_arg,
                argc,
                link,
            },
        });
        if let Some(this_local) = this_arg.to_local() {
            self.registers
                .note_frame_extent(this_local + CALL_FRAME_HEADER_SIZE as u32 + 1);
        }
        self.release_call_arguments(arguments);
        self.release(function);
        Ok(result)
    }

    /// Call with spread arguments: the argument list is collected into an
    /// array and the callee frame is built past the live registers
    fn emit_varargs_call(
        &mut self,
        kind: CallKind,
        callee: &'a Expr<'a>,
        args: &'a [Argument<'a>],
        dst: Dst,
        span: Span,
    ) -> CompileResult<Register> {
        let (function, this) = match (kind, callee.kind) {
            (CallKind::Construct, _) => {
                let function = self.emit_expr(callee, Dst::Any)?;
                let this = self.load_constant(Dst::Any, Constant::Undefined);
                (function, this)
            }
            (_, ExprKind::Member { object, property }) => {
                let function = self.temp_destination(dst);
                let this = self.emit_expr(object, Dst::Any)?;
                let name = self.emitter.add_identifier(property);
                self.emitter.record_position(callee.span);
                self.emitter.emit(Instruction::GetById {
                    dst: function,
                    base: this,
                    name,
                });
                (function, this)
            }
            (_, ExprKind::Index { object, property }) => {
                let function = self.temp_destination(dst);
                let this = self.emit_operand_guarded(object, &[property])?;
                let key = self.emit_expr(property, Dst::Any)?;
                self.emitter.record_position(callee.span);
                self.emitter.emit(Instruction::GetByVal {
                    dst: function,
                    base: this,
                    property: key,
                });
                self.release(key);
                (function, this)
            }
            _ => {
                let function = self.emit_expr(callee, Dst::Any)?;
                let this = self.load_constant(Dst::Any, Constant::Undefined);
                (function, this)
            }
        };

        let list = self.registers.new_temporary();
        self.emitter.emit(Instruction::NewArray {
            dst: list,
            first: Register::local(self.registers.next_local()),
            count: 0,
        });
        for arg in args {
            match *arg {
                Argument::Expr(e) => {
                    let value = self.emit_expr(e, Dst::Any)?;
                    self.emitter.emit(Instruction::ArrayPush { array: list, value });
                    self.release(value);
                }
                Argument::Spread(e) => {
                    let iterable = self.emit_expr(e, Dst::Any)?;
                    self.emitter.record_position(e.span);
                    self.emitter.emit(Instruction::ArrayAppendSpread {
                        array: list,
                        iterable,
                    });
                    self.release(iterable);
                }
            }
        }

        let result = self.final_destination(dst, Some(function));
        self.registers.reclaim();
        let first_free = Register::local(self.registers.next_local());
        let link = self.next_call_link();
        self.emitter.record_position(span);
        self.emitter.emit(match kind {
            CallKind::Construct => Instruction::ConstructVarargs {
                dst: result,
                callee: function,
                this_value: this,
                arguments: list,
                first_free,
                link,
            },
            CallKind::Call | CallKind::Eval => Instruction::CallVarargs {
                dst: result,
                callee: function,
                this_value: this,
                arguments: list,
                first_free,
                link,
            },
        });
        self.release(list);
        self.release(this);
        self.release(function);
        Ok(result)
    }
}
