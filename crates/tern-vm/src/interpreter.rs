//! Bytecode interpreter
//!
//! Executes linked code blocks. Calls between bytecode functions never
//! recurse on the host stack: a call pushes a frame and the run loop carries
//! on in the callee. Host code calling back into bytecode (accessors,
//! indirect `eval`, [`VmRuntime::call`](crate::VmRuntime::call)) starts a
//! nested run that ends when its boundary frame returns.
//!
//! Every `Call` and `Construct` site first consults its call-link record.
//! On a hit the cached entry is entered without inspecting the callee any
//! further; on a miss the generic path dispatches and then asks the
//! [`CallLinker`] to cache the result.

use std::cmp::Ordering;
use std::rc::Rc;
use std::sync::Arc;

use smallvec::SmallVec;
use tern_bytecode::frame::{
    ARGUMENT_COUNT, CALL_FRAME_HEADER_SIZE, CALLEE, CALLER_FRAME, RETURN_LOCATION,
    STACK_ALIGNMENT_SLOTS,
};
use tern_bytecode::{
    CallLinkIndex, CodeKind, Identifier, Instruction, Register, ResolveMode, UnlinkedCodeBlock,
    number_to_string,
};
use tern_compiler::Compiler;
use tern_jit::{CallLinkInfo, CallLinker};
use tracing::{debug, trace};

use crate::code_block::CodeBlock;
use crate::config::VmOptions;
use crate::context::{CallFrame, Entry, VmContext};
use crate::error::{VmError, VmResult};
use crate::object::{
    Attributes, Callable, FunctionData, ObjectClass, ObjectRef, Property, PropertySlot, SetOutcome,
    array_index,
};
use crate::realm::{ErrorType, NativeKind};
use crate::scope::{Activation, Scope, ScopeKind, ScopeRef};
use crate::value::Value;

/// Host calls back into bytecode nested deeper than this throw `RangeError`
const MAX_HOST_DEPTH: u32 = 128;

/// What the run loop does after an instruction
enum InstructionResult {
    /// Continue to next instruction
    Continue,
    /// Jump by offset
    Jump(i32),
    /// A callee frame was pushed
    Enter,
    /// Leave the current frame
    Return(Value),
}

/// Where a callee finds `this` and its arguments
#[derive(Clone)]
enum FrameArguments {
    /// Consecutive caller registers; `this` at `this_index`, argument `i`
    /// at `this_index - i`
    InPlace { this_index: usize, argc: u32 },
    /// Values supplied by host code
    Values {
        this: Value,
        args: SmallVec<[Value; 8]>,
    },
}

/// How the callee's result is delivered
#[derive(Clone, Copy)]
struct Invocation {
    construct: bool,
    return_to: Option<Register>,
    stop: bool,
}

/// Resolved call target
enum Target {
    Code(Rc<CodeBlock>, ScopeRef),
    Native(NativeKind),
}

/// Outcome of dispatching a call
enum Invoked {
    /// A frame was pushed; the result arrives when it returns
    Entered,
    /// A host function already produced the result
    Returned(Value),
}

/// The bytecode interpreter
#[derive(Debug)]
pub struct Interpreter {
    options: VmOptions,
    linker: Arc<CallLinker>,
    compiler: Compiler,
    host_depth: u32,
}

impl Interpreter {
    /// Create an interpreter publishing call links through `linker`
    pub fn new(options: VmOptions, linker: Arc<CallLinker>) -> Self {
        Self {
            options,
            linker,
            compiler: Compiler::with_config(options.generator),
            host_depth: 0,
        }
    }

    /// Active options
    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    /// The call linker
    pub fn linker(&self) -> &Arc<CallLinker> {
        &self.linker
    }

    /// Compile program source
    pub fn compile(&self, source: &str) -> VmResult<Arc<UnlinkedCodeBlock>> {
        Ok(self.compiler.compile_program(source)?)
    }

    /// Run global or eval code against the global scope
    pub fn execute(&mut self, ctx: &mut VmContext, code: &Rc<CodeBlock>) -> VmResult<Value> {
        if code.unit().kind == CodeKind::Function {
            return Err(VmError::internal("function code cannot run as a program"));
        }
        let global = ctx.realm().global().clone();
        let scope = ctx.realm().global_scope().clone();
        declare_variables(code, &scope, Attributes::PERMANENT);

        let stop_depth = ctx.depth();
        let arguments = FrameArguments::Values {
            this: Value::Object(global),
            args: SmallVec::new(),
        };
        self.enter_code(
            ctx,
            Rc::clone(code),
            scope,
            Value::Undefined,
            arguments,
            Invocation {
                construct: false,
                return_to: None,
                stop: true,
            },
        )?;
        debug!(code = code.name(), "executing program");
        self.run(ctx, stop_depth)
    }

    /// Call `function` from host code
    pub fn call_function(
        &mut self,
        ctx: &mut VmContext,
        function: &Value,
        this: Value,
        args: &[Value],
    ) -> VmResult<Value> {
        self.call_host(ctx, function, this, args, false)
    }

    /// Call or construct `function` from host code without consulting any
    /// call-link record
    pub(crate) fn call_host(
        &mut self,
        ctx: &mut VmContext,
        function: &Value,
        this: Value,
        args: &[Value],
        construct: bool,
    ) -> VmResult<Value> {
        if self.host_depth >= MAX_HOST_DEPTH {
            return Err(VmError::range_error("Maximum call stack size exceeded"));
        }
        self.host_depth += 1;
        let stop_depth = ctx.depth();
        let arguments = FrameArguments::Values {
            this,
            args: args.iter().cloned().collect(),
        };
        let invocation = Invocation {
            construct,
            return_to: None,
            stop: true,
        };
        let result = match self.invoke(ctx, function, arguments, invocation, None) {
            Ok(Invoked::Entered) => self.run(ctx, stop_depth),
            Ok(Invoked::Returned(value)) => Ok(value),
            Err(err) => Err(err),
        };
        self.host_depth -= 1;
        result
    }

    // ==================== Run loop ====================

    /// Execute until the frame at `stop_depth` returns
    fn run(&mut self, ctx: &mut VmContext, stop_depth: usize) -> VmResult<Value> {
        loop {
            let (code, pc) = {
                let frame = ctx.frame()?;
                (Rc::clone(&frame.code), frame.pc)
            };
            let Some(instruction) = code.unit().instructions.get(pc) else {
                ctx.truncate_frames(stop_depth);
                return Err(VmError::internal(format!(
                    "pc {pc} out of range in {}",
                    code.name()
                )));
            };

            match self.execute_instruction(instruction, &code, ctx) {
                Ok(InstructionResult::Continue) => {
                    ctx.frame_mut()?.pc += 1;
                }
                Ok(InstructionResult::Jump(offset)) => {
                    let frame = ctx.frame_mut()?;
                    frame.pc = usize::try_from(frame.pc as i64 + i64::from(offset))
                        .map_err(|_| VmError::internal("jump before start of code"))?;
                }
                Ok(InstructionResult::Enter) => {}
                Ok(InstructionResult::Return(value)) => {
                    if let Some(value) = self.leave_frame(ctx, value)? {
                        return Ok(value);
                    }
                }
                Err(err) => self.unwind(ctx, err, stop_depth)?,
            }
        }
    }

    /// Pop the current frame. Returns the value when the frame was a host
    /// boundary.
    fn leave_frame(&mut self, ctx: &mut VmContext, value: Value) -> VmResult<Option<Value>> {
        let frame = ctx
            .pop_frame()
            .ok_or_else(|| VmError::internal("return without a frame"))?;
        let value = match (frame.construct, value) {
            (Some(this), value) if !matches!(value, Value::Object(_)) => Value::Object(this),
            (_, value) => value,
        };
        if frame.stop {
            return Ok(Some(value));
        }
        if let Some(dst) = frame.return_to {
            ctx.set(dst, value)?;
        }
        ctx.frame_mut()?.pc += 1;
        Ok(None)
    }

    /// Transfer control to the innermost handler above `stop_depth`, or
    /// return the error to the host once every frame of this run is gone
    fn unwind(&mut self, ctx: &mut VmContext, err: VmError, stop_depth: usize) -> VmResult<()> {
        let value = match self.error_value(ctx, err) {
            Ok(value) => value,
            Err(err) => {
                ctx.truncate_frames(stop_depth);
                return Err(err);
            }
        };

        while ctx.depth() > stop_depth {
            let frame = ctx.frame()?;
            let handler = frame
                .code
                .unit()
                .exception_handlers
                .lookup(frame.pc as u32)
                .copied();
            let Some(handler) = handler else {
                ctx.pop_frame();
                continue;
            };

            let scope_register = frame.code.unit().scope_register;
            let excess = frame.scope_depth.saturating_sub(handler.scope_depth);
            if excess > 0 {
                let mut scope = ctx.get(scope_register)?;
                for _ in 0..excess {
                    scope = match scope.as_scope().and_then(|s| s.parent.clone()) {
                        Some(parent) => Value::Scope(parent),
                        None => break,
                    };
                }
                ctx.set(scope_register, scope)?;
            }
            let frame = ctx.frame_mut()?;
            frame.scope_depth = handler.scope_depth.min(frame.scope_depth);
            frame.pc = handler.target as usize;
            trace!(target = handler.target, "entering exception handler");
            ctx.set_exception(value);
            return Ok(());
        }

        let message = value.to_display_string();
        debug!(%message, "uncaught exception");
        Err(VmError::exception(value, message))
    }

    /// The JS value for an error, or the error itself when running code
    /// cannot catch it
    pub(crate) fn error_value(&mut self, ctx: &mut VmContext, err: VmError) -> Result<Value, VmError> {
        if let VmError::Exception(thrown) = err {
            return Ok(thrown.value);
        }
        let Some(error) = err.catchable_kind().and_then(ErrorType::from_name) else {
            return Err(err);
        };
        Ok(Value::Object(ctx.realm().new_error(error, &err.message())))
    }

    // ==================== Calls ====================

    /// Lay out and push a frame for `code`
    fn enter_code(
        &mut self,
        ctx: &mut VmContext,
        code: Rc<CodeBlock>,
        scope: ScopeRef,
        callee: Value,
        arguments: FrameArguments,
        invocation: Invocation,
    ) -> VmResult<()> {
        let parameters = code.unit().num_parameters.max(1) as usize;
        let caller = ctx.frame().ok().map(|frame| (frame.base, frame.pc));
        let mut copies: SmallVec<[Value; 8]> = SmallVec::new();
        let (base, argc) = match arguments {
            FrameArguments::InPlace { this_index, argc } if argc as usize >= parameters => {
                (VmContext::in_place_base(this_index), argc)
            }
            FrameArguments::InPlace { this_index, argc } => {
                for i in 0..argc as usize {
                    let index = this_index
                        .checked_sub(i)
                        .ok_or_else(|| VmError::internal("argument below stack"))?;
                    copies.push(ctx.read_at(index));
                }
                (VmContext::relocated_base(ctx.free_start(), parameters), argc)
            }
            FrameArguments::Values { this, args } => {
                copies.push(this);
                copies.extend(args);
                let argc = copies.len() as u32;
                let slots = parameters.max(copies.len());
                (VmContext::relocated_base(ctx.free_start(), slots), argc)
            }
        };

        let construct = if invocation.construct {
            let prototype = match callee.as_object().map(|f| f.get_data("prototype")) {
                Some(Value::Object(prototype)) => prototype,
                _ => ctx.realm().object_prototype().clone(),
            };
            Some(ObjectRef::with_class(ObjectClass::Ordinary, Some(prototype)))
        } else {
            None
        };

        let frame = CallFrame {
            code,
            base,
            pc: 0,
            scope,
            scope_depth: 0,
            return_to: invocation.return_to,
            construct: construct.clone(),
            stop: invocation.stop,
        };
        ctx.push_frame(frame, self.options.max_call_depth)?;

        if !copies.is_empty() {
            for i in copies.len()..parameters {
                ctx.set(Register::argument(i as u32), Value::Undefined)?;
            }
            for (i, value) in copies.into_iter().enumerate() {
                ctx.set(Register::argument(i as u32), value)?;
            }
        }
        let (caller_base, caller_pc) = caller.map_or((Value::Undefined, Value::Undefined), |(b, pc)| {
            (Value::Number(b as f64), Value::Number(pc as f64))
        });
        ctx.set(Register::new(CALLER_FRAME), caller_base)?;
        ctx.set(Register::new(RETURN_LOCATION), caller_pc)?;
        ctx.set(Register::new(CALLEE), callee)?;
        ctx.set(
            Register::new(ARGUMENT_COUNT),
            Value::Number(f64::from(argc)),
        )?;
        if let Some(this) = construct {
            ctx.set(Register::this(), Value::Object(this))?;
        }
        Ok(())
    }

    /// Dispatch a call: the cached entry when `site` is linked to `callee`,
    /// the generic path otherwise
    fn invoke(
        &mut self,
        ctx: &mut VmContext,
        callee: &Value,
        arguments: FrameArguments,
        invocation: Invocation,
        site: Option<&Arc<CallLinkInfo>>,
    ) -> VmResult<Invoked> {
        let function = callee.as_object().and_then(|o| o.function());

        if self.options.call_linking
            && let (Some(info), Some(data)) = (site, &function)
            && info.call_type().is_cacheable()
            && let Some(target) = cached_target(ctx, info, data)
        {
            trace!(
                bytecode_offset = info.bytecode_offset(),
                callee = data.identity,
                "call link hit"
            );
            return self.dispatch(ctx, target, callee, arguments, invocation);
        }

        let Some(data) = function else {
            let what = if invocation.construct {
                "is not a constructor"
            } else {
                "is not a function"
            };
            return Err(VmError::type_error(format!(
                "{} {what}",
                describe(callee)
            )));
        };
        let (target, entry) = match data.callable {
            Callable::Closure { code, scope } => {
                self.register_code(ctx, &code);
                let entry = code.entry();
                (Target::Code(code, scope), entry)
            }
            Callable::Native(kind) => {
                if invocation.construct && !kind.is_constructor() {
                    return Err(VmError::type_error(format!(
                        "{} is not a constructor",
                        describe(callee)
                    )));
                }
                (Target::Native(kind), ctx.realm().native_entry(kind))
            }
        };

        match target {
            Target::Code(..) => {
                let invoked = self.dispatch(ctx, target, callee, arguments, invocation)?;
                self.link(site, data.identity, entry);
                Ok(invoked)
            }
            Target::Native(_) => {
                self.link(site, data.identity, entry);
                self.dispatch(ctx, target, callee, arguments, invocation)
            }
        }
    }

    fn link(&self, site: Option<&Arc<CallLinkInfo>>, callee: u64, entry: u64) {
        if !self.options.call_linking {
            return;
        }
        if let Some(info) = site {
            let state = self.linker.link(info, callee, entry);
            trace!(
                bytecode_offset = info.bytecode_offset(),
                ?state,
                "call link miss"
            );
        }
    }

    fn dispatch(
        &mut self,
        ctx: &mut VmContext,
        target: Target,
        callee: &Value,
        arguments: FrameArguments,
        invocation: Invocation,
    ) -> VmResult<Invoked> {
        match target {
            Target::Code(code, scope) => {
                self.enter_code(ctx, code, scope, callee.clone(), arguments, invocation)?;
                Ok(Invoked::Entered)
            }
            Target::Native(kind) => {
                let (this, args) = match arguments {
                    FrameArguments::InPlace { this_index, argc } => {
                        let this = ctx.read_at(this_index);
                        let args = (1..argc as usize)
                            .filter_map(|i| this_index.checked_sub(i))
                            .map(|index| ctx.read_at(index))
                            .collect();
                        (this, args)
                    }
                    FrameArguments::Values { this, args } => (this, args),
                };
                let value = self.call_native(ctx, kind, this, &args, invocation.construct)?;
                Ok(Invoked::Returned(value))
            }
        }
    }

    fn call_native(
        &mut self,
        ctx: &mut VmContext,
        kind: NativeKind,
        _this: Value,
        args: &[Value],
        construct: bool,
    ) -> VmResult<Value> {
        if construct && !kind.is_constructor() {
            return Err(VmError::type_error("not a constructor"));
        }
        match kind {
            NativeKind::Print => {
                let line = args
                    .iter()
                    .map(Value::to_display_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                ctx.print(&line);
                Ok(Value::Undefined)
            }
            NativeKind::Eval => {
                let Some(Value::String(source)) = args.first() else {
                    return Ok(args.first().cloned().unwrap_or_default());
                };
                self.indirect_eval(ctx, source)
            }
            NativeKind::Error(error) => {
                let message = match args.first() {
                    None | Some(Value::Undefined) => String::new(),
                    Some(value) => value.to_display_string(),
                };
                Ok(Value::Object(ctx.realm().new_error(error, &message)))
            }
        }
    }

    /// `Call` and `Construct`
    #[allow(clippy::too_many_arguments)]
    fn op_call(
        &mut self,
        ctx: &mut VmContext,
        code: &Rc<CodeBlock>,
        construct: bool,
        dst: Register,
        callee: Register,
        this_arg: Register,
        argc: u32,
        link: CallLinkIndex,
    ) -> VmResult<InstructionResult> {
        let callee = ctx.get(callee)?;
        let this_index = ctx.frame()?.index(this_arg)?;
        let site = Arc::clone(code.call_link(link)?);
        let invocation = Invocation {
            construct,
            return_to: Some(dst),
            stop: false,
        };
        let arguments = FrameArguments::InPlace { this_index, argc };
        self.finish_call(ctx, &callee, arguments, invocation, Some(&site), dst)
    }

    fn finish_call(
        &mut self,
        ctx: &mut VmContext,
        callee: &Value,
        arguments: FrameArguments,
        invocation: Invocation,
        site: Option<&Arc<CallLinkInfo>>,
        dst: Register,
    ) -> VmResult<InstructionResult> {
        match self.invoke(ctx, callee, arguments, invocation, site)? {
            Invoked::Entered => Ok(InstructionResult::Enter),
            Invoked::Returned(value) => {
                ctx.set(dst, value)?;
                Ok(InstructionResult::Continue)
            }
        }
    }

    /// `CallEval`: direct eval when the callee is the intrinsic `eval`, an
    /// ordinary call otherwise
    fn op_call_eval(
        &mut self,
        ctx: &mut VmContext,
        code: &Rc<CodeBlock>,
        dst: Register,
        callee: Register,
        this_arg: Register,
        argc: u32,
        link: CallLinkIndex,
    ) -> VmResult<InstructionResult> {
        let callee_value = ctx.get(callee)?;
        if !ctx.realm().is_eval(&callee_value) {
            return self.op_call(ctx, code, false, dst, callee, this_arg, argc, link);
        }

        let source = if argc > 1 {
            ctx.get(this_arg.offset(1))?
        } else {
            Value::Undefined
        };
        let Value::String(text) = &source else {
            ctx.set(dst, source)?;
            return Ok(InstructionResult::Continue);
        };

        let frame_scope = ctx.frame()?.scope.clone();
        let scope = match ctx.get(code.unit().scope_register)? {
            Value::Scope(scope) => scope,
            _ => frame_scope,
        };
        let this = ctx.get(Register::this())?;
        let unit = self.compile_eval(text, code.unit().is_strict())?;
        self.enter_eval(ctx, unit, scope, this, Some(dst), false)?;
        Ok(InstructionResult::Enter)
    }

    /// `CallVarargs` and `ConstructVarargs`: the argument array is spread
    /// into a frame built past `first_free`
    #[allow(clippy::too_many_arguments)]
    fn op_call_varargs(
        &mut self,
        ctx: &mut VmContext,
        code: &Rc<CodeBlock>,
        construct: bool,
        dst: Register,
        callee: Register,
        this_value: Register,
        arguments: Register,
        first_free: Register,
        link: CallLinkIndex,
    ) -> VmResult<InstructionResult> {
        let callee = ctx.get(callee)?;
        let this = if construct {
            Value::Undefined
        } else {
            ctx.get(this_value)?
        };
        let values = ctx
            .get(arguments)?
            .as_object()
            .and_then(ObjectRef::element_values)
            .ok_or_else(|| VmError::internal("spread arguments are not an array"))?;

        let argc = values.len() as u32 + 1;
        let this_slot = first_free.index() + 1 - argc as i32;
        let base_slot = (this_slot - CALL_FRAME_HEADER_SIZE)
            .div_euclid(STACK_ALIGNMENT_SLOTS)
            * STACK_ALIGNMENT_SLOTS;
        let this_reg = Register::new(base_slot + CALL_FRAME_HEADER_SIZE);
        ctx.set(this_reg, this)?;
        for (i, value) in values.into_iter().enumerate() {
            ctx.set(this_reg.offset(i as i32 + 1), value)?;
        }

        let this_index = ctx.frame()?.index(this_reg)?;
        let site = Arc::clone(code.call_link(link)?);
        let invocation = Invocation {
            construct,
            return_to: Some(dst),
            stop: false,
        };
        let arguments = FrameArguments::InPlace { this_index, argc };
        self.finish_call(ctx, &callee, arguments, invocation, Some(&site), dst)
    }

    // ==================== Eval ====================

    fn compile_eval(&self, source: &str, strict: bool) -> VmResult<Arc<UnlinkedCodeBlock>> {
        self.compiler
            .compile_eval(source, strict)
            .map_err(|err| VmError::SyntaxError(err.to_string()))
    }

    /// Push a frame running eval code over `caller_scope`
    fn enter_eval(
        &mut self,
        ctx: &mut VmContext,
        unit: Arc<UnlinkedCodeBlock>,
        caller_scope: ScopeRef,
        this: Value,
        return_to: Option<Register>,
        stop: bool,
    ) -> VmResult<()> {
        let strict = unit.is_strict();
        let code = Rc::new(CodeBlock::link(unit, ctx.next_word()));
        let scope = if strict {
            Scope::activation(Activation::default(), caller_scope)
        } else {
            caller_scope
        };
        declare_variables(&code, &scope, Attributes::DEFAULT);
        let arguments = FrameArguments::Values {
            this,
            args: SmallVec::new(),
        };
        self.enter_code(
            ctx,
            code,
            scope,
            Value::Undefined,
            arguments,
            Invocation {
                construct: false,
                return_to,
                stop,
            },
        )
    }

    /// `eval` reached through anything but a direct call: global code
    pub(crate) fn indirect_eval(&mut self, ctx: &mut VmContext, source: &str) -> VmResult<Value> {
        if self.host_depth >= MAX_HOST_DEPTH {
            return Err(VmError::range_error("Maximum call stack size exceeded"));
        }
        let unit = self.compile_eval(source, false)?;
        let scope = ctx.realm().global_scope().clone();
        let this = Value::Object(ctx.realm().global().clone());
        let stop_depth = ctx.depth();
        self.host_depth += 1;
        let result = self
            .enter_eval(ctx, unit, scope, this, None, true)
            .and_then(|()| self.run(ctx, stop_depth));
        self.host_depth -= 1;
        result
    }

    // ==================== Properties ====================

    /// `base[key]`, running getters
    fn get_property(&mut self, ctx: &mut VmContext, base: &Value, key: &Identifier) -> VmResult<Value> {
        match base {
            Value::Object(object) => match object.get_property(key) {
                Some(Property {
                    slot: PropertySlot::Data(value),
                    ..
                }) => Ok(value),
                Some(Property {
                    slot: PropertySlot::Accessor { getter, .. },
                    ..
                }) => {
                    if getter.is_undefined() {
                        Ok(Value::Undefined)
                    } else {
                        self.call_function(ctx, &getter, base.clone(), &[])
                    }
                }
                None => Ok(Value::Undefined),
            },
            Value::String(s) => Ok(string_property(s, key)),
            Value::Undefined | Value::Null => Err(VmError::type_error(format!(
                "Cannot read property '{key}' of {base}"
            ))),
            _ => Ok(Value::Undefined),
        }
    }

    /// `base[key] = value`, running setters
    fn put_property(
        &mut self,
        ctx: &mut VmContext,
        base: &Value,
        key: &Identifier,
        value: Value,
        strict: bool,
    ) -> VmResult<()> {
        match base {
            Value::Object(object) => match object.set(key, value.clone()) {
                SetOutcome::Done => Ok(()),
                SetOutcome::Setter(setter) => {
                    self.call_function(ctx, &setter, base.clone(), &[value])?;
                    Ok(())
                }
                SetOutcome::Rejected if strict => Err(VmError::type_error(
                    "Attempted to assign to readonly property.",
                )),
                SetOutcome::Rejected => Ok(()),
            },
            Value::Undefined | Value::Null => Err(VmError::type_error(format!(
                "Cannot set property '{key}' of {base}"
            ))),
            _ => Ok(()),
        }
    }

    fn delete_property(&self, base: &Value, key: &Identifier, strict: bool) -> VmResult<bool> {
        let object = match base {
            Value::Object(object) => object,
            Value::Scope(scope) => match &scope.kind {
                ScopeKind::Global(object) | ScopeKind::With(object) => object,
                ScopeKind::Activation(_) | ScopeKind::Catch { .. } => return Ok(false),
            },
            Value::Undefined | Value::Null => {
                return Err(VmError::type_error(format!(
                    "Cannot delete property '{key}' of {base}"
                )));
            }
            _ => return Ok(true),
        };
        let deleted = object.delete(key);
        if !deleted && strict {
            return Err(VmError::type_error(format!(
                "Unable to delete property '{key}'"
            )));
        }
        Ok(deleted)
    }

    // ==================== Scopes ====================

    fn scope_operand(&self, ctx: &VmContext, reg: Register) -> VmResult<ScopeRef> {
        match ctx.get(reg)? {
            Value::Scope(scope) => Ok(scope),
            _ => Ok(ctx.frame()?.scope.clone()),
        }
    }

    fn get_from_scope(
        &mut self,
        ctx: &mut VmContext,
        scope: &ScopeRef,
        name: &Identifier,
        mode: ResolveMode,
    ) -> VmResult<Value> {
        match &scope.kind {
            ScopeKind::Global(object) | ScopeKind::With(object) => {
                if object.has_property(name) {
                    self.get_property(ctx, &Value::Object(object.clone()), name)
                } else {
                    not_found(name, mode)
                }
            }
            ScopeKind::Activation(activation) => {
                let activation = activation.borrow();
                match activation.slot_of(name) {
                    Some(slot) => Ok(activation.get(slot)),
                    None => not_found(name, mode),
                }
            }
            ScopeKind::Catch { value, .. } => Ok(value.borrow().clone()),
        }
    }

    fn put_to_scope(
        &mut self,
        ctx: &mut VmContext,
        scope: &ScopeRef,
        name: &Identifier,
        value: Value,
        mode: ResolveMode,
        strict: bool,
    ) -> VmResult<()> {
        match &scope.kind {
            ScopeKind::Global(object) => {
                if mode == ResolveMode::ThrowIfNotFound && !object.has_property(name) {
                    return Err(VmError::reference_error(format!("{name} is not defined")));
                }
                self.put_property(ctx, &Value::Object(object.clone()), name, value, strict)
            }
            ScopeKind::With(object) => {
                self.put_property(ctx, &Value::Object(object.clone()), name, value, strict)
            }
            ScopeKind::Activation(activation) => {
                let mut activation = activation.borrow_mut();
                let slot = match activation.slot_of(name) {
                    Some(slot) => slot,
                    None => {
                        activation.declare(name.clone());
                        activation.slot_of(name).unwrap_or_default()
                    }
                };
                if activation.is_read_only(slot) {
                    if strict {
                        return Err(VmError::type_error(
                            "Attempted to assign to readonly property.",
                        ));
                    }
                    return Ok(());
                }
                activation.set(slot, value);
                Ok(())
            }
            ScopeKind::Catch { value: slot, .. } => {
                *slot.borrow_mut() = value;
                Ok(())
            }
        }
    }

    fn activation_operand(&self, ctx: &VmContext, reg: Register) -> VmResult<ScopeRef> {
        match ctx.get(reg)? {
            Value::Scope(scope) if matches!(scope.kind, ScopeKind::Activation(_)) => Ok(scope),
            other => Err(VmError::internal(format!(
                "closure variable access through {other:?}"
            ))),
        }
    }

    // ==================== Functions ====================

    fn new_closure(
        &mut self,
        ctx: &mut VmContext,
        code: &Rc<CodeBlock>,
        scope: ScopeRef,
        index: tern_bytecode::FunctionIndex,
    ) -> VmResult<Value> {
        let function = code.function(index, || ctx.next_word())?;
        self.register_code(ctx, &function);
        let unit = function.unit();
        let name = unit.name.as_ref().map_or("", |n| n.as_str()).to_string();
        let length = unit.num_parameters.saturating_sub(1);
        let identity = ctx.next_word();
        let object = ctx.realm().new_function(
            Callable::Closure {
                code: Rc::clone(&function),
                scope,
            },
            identity,
            &name,
            length,
        );
        Ok(Value::Object(object))
    }

    fn create_arguments(&self, ctx: &mut VmContext) -> VmResult<Value> {
        let args = ctx.arguments()?;
        let object = ObjectRef::with_class(
            ObjectClass::Arguments,
            Some(ctx.realm().object_prototype().clone()),
        );
        let length = args.len();
        object.set_elements(args.into_vec());
        object.define(
            Identifier::new("length"),
            Value::Number(length as f64),
            Attributes::HIDDEN,
        );
        Ok(Value::Object(object))
    }

    // ==================== Instructions ====================

    fn execute_instruction(
        &mut self,
        instruction: &Instruction,
        code: &Rc<CodeBlock>,
        ctx: &mut VmContext,
    ) -> VmResult<InstructionResult> {
        let strict = code.unit().is_strict();
        match *instruction {
            // ==================== Loads ====================
            Instruction::Mov { dst, src } => {
                let value = ctx.get(src)?;
                ctx.set(dst, value)?;
            }
            Instruction::LoadConst { dst, constant } => {
                ctx.set(dst, code.constant(constant)?)?;
            }

            // ==================== Arithmetic ====================
            Instruction::Add { dst, lhs, rhs } => {
                let (l, r) = (ctx.get(lhs)?.to_primitive(), ctx.get(rhs)?.to_primitive());
                let value = if matches!(l, Value::String(_)) || matches!(r, Value::String(_)) {
                    let mut text = l.to_display_string();
                    text.push_str(&r.to_js_string());
                    Value::string(&text)
                } else {
                    Value::Number(l.to_number() + r.to_number())
                };
                ctx.set(dst, value)?;
            }
            Instruction::Sub { dst, lhs, rhs } => {
                numeric(ctx, dst, lhs, rhs, |a, b| a - b)?;
            }
            Instruction::Mul { dst, lhs, rhs } => {
                numeric(ctx, dst, lhs, rhs, |a, b| a * b)?;
            }
            Instruction::Div { dst, lhs, rhs } => {
                numeric(ctx, dst, lhs, rhs, |a, b| a / b)?;
            }
            Instruction::Mod { dst, lhs, rhs } => {
                numeric(ctx, dst, lhs, rhs, |a, b| a % b)?;
            }
            Instruction::BitAnd { dst, lhs, rhs } => {
                int32(ctx, dst, lhs, rhs, |a, b| f64::from(a & b))?;
            }
            Instruction::BitOr { dst, lhs, rhs } => {
                int32(ctx, dst, lhs, rhs, |a, b| f64::from(a | b))?;
            }
            Instruction::BitXor { dst, lhs, rhs } => {
                int32(ctx, dst, lhs, rhs, |a, b| f64::from(a ^ b))?;
            }
            Instruction::Shl { dst, lhs, rhs } => {
                int32(ctx, dst, lhs, rhs, |a, b| f64::from(a.wrapping_shl(b as u32 & 31)))?;
            }
            Instruction::Shr { dst, lhs, rhs } => {
                int32(ctx, dst, lhs, rhs, |a, b| f64::from(a >> (b as u32 & 31)))?;
            }
            Instruction::UShr { dst, lhs, rhs } => {
                let a = ctx.get(lhs)?.to_uint32();
                let b = ctx.get(rhs)?.to_uint32();
                ctx.set(dst, Value::Number(f64::from(a >> (b & 31))))?;
            }
            Instruction::Negate { dst, src } => {
                let value = -ctx.get(src)?.to_number();
                ctx.set(dst, Value::Number(value))?;
            }
            Instruction::ToNumber { dst, src } => {
                let value = ctx.get(src)?.to_number();
                ctx.set(dst, Value::Number(value))?;
            }
            Instruction::BitNot { dst, src } => {
                let value = !ctx.get(src)?.to_int32();
                ctx.set(dst, Value::Number(f64::from(value)))?;
            }
            Instruction::Not { dst, src } => {
                let value = !ctx.get(src)?.to_boolean();
                ctx.set(dst, Value::Bool(value))?;
            }
            Instruction::Inc { dst } => {
                let value = ctx.get(dst)?.to_number() + 1.0;
                ctx.set(dst, Value::Number(value))?;
            }
            Instruction::Dec { dst } => {
                let value = ctx.get(dst)?.to_number() - 1.0;
                ctx.set(dst, Value::Number(value))?;
            }

            // ==================== Comparison ====================
            Instruction::Eq { dst, lhs, rhs } => {
                let value = ctx.get(lhs)?.loose_equals(&ctx.get(rhs)?);
                ctx.set(dst, Value::Bool(value))?;
            }
            Instruction::NotEq { dst, lhs, rhs } => {
                let value = !ctx.get(lhs)?.loose_equals(&ctx.get(rhs)?);
                ctx.set(dst, Value::Bool(value))?;
            }
            Instruction::StrictEq { dst, lhs, rhs } => {
                let value = ctx.get(lhs)?.strict_equals(&ctx.get(rhs)?);
                ctx.set(dst, Value::Bool(value))?;
            }
            Instruction::StrictNotEq { dst, lhs, rhs } => {
                let value = !ctx.get(lhs)?.strict_equals(&ctx.get(rhs)?);
                ctx.set(dst, Value::Bool(value))?;
            }
            Instruction::Less { dst, lhs, rhs } => {
                relational(ctx, dst, lhs, rhs, |o| o == Ordering::Less)?;
            }
            Instruction::LessEq { dst, lhs, rhs } => {
                relational(ctx, dst, lhs, rhs, |o| o != Ordering::Greater)?;
            }
            Instruction::Greater { dst, lhs, rhs } => {
                relational(ctx, dst, lhs, rhs, |o| o == Ordering::Greater)?;
            }
            Instruction::GreaterEq { dst, lhs, rhs } => {
                relational(ctx, dst, lhs, rhs, |o| o != Ordering::Less)?;
            }
            Instruction::EqNull { dst, src } => {
                let value = ctx.get(src)?.is_nullish();
                ctx.set(dst, Value::Bool(value))?;
            }
            Instruction::NotEqNull { dst, src } => {
                let value = !ctx.get(src)?.is_nullish();
                ctx.set(dst, Value::Bool(value))?;
            }
            Instruction::In {
                dst,
                property,
                base,
            } => {
                let key = ctx.get(property)?.to_property_key();
                let base = ctx.get(base)?;
                let Some(object) = base.as_object() else {
                    return Err(VmError::type_error(format!(
                        "Cannot use 'in' operator to search for '{key}' in {base}"
                    )));
                };
                let value = object.has_property(&key);
                ctx.set(dst, Value::Bool(value))?;
            }
            Instruction::InstanceOf {
                dst,
                value,
                constructor,
            } => {
                let value = ctx.get(value)?;
                let constructor = ctx.get(constructor)?;
                let result = instance_of(&value, &constructor)?;
                ctx.set(dst, Value::Bool(result))?;
            }

            // ==================== Type tests ====================
            Instruction::TypeOf { dst, src } => {
                let value = ctx.get(src)?.type_of();
                ctx.set(dst, Value::string(value))?;
            }
            Instruction::IsUndefined { dst, src } => type_test(ctx, dst, src, "undefined")?,
            Instruction::IsBoolean { dst, src } => type_test(ctx, dst, src, "boolean")?,
            Instruction::IsNumber { dst, src } => type_test(ctx, dst, src, "number")?,
            Instruction::IsString { dst, src } => type_test(ctx, dst, src, "string")?,
            Instruction::IsObject { dst, src } => type_test(ctx, dst, src, "object")?,
            Instruction::IsFunction { dst, src } => type_test(ctx, dst, src, "function")?,

            // ==================== Control flow ====================
            Instruction::Jump { offset } => return Ok(InstructionResult::Jump(offset.offset())),
            Instruction::JumpIfTrue { cond, offset } => {
                return Ok(branch(ctx.get(cond)?.to_boolean(), offset.offset()));
            }
            Instruction::JumpIfFalse { cond, offset } => {
                return Ok(branch(!ctx.get(cond)?.to_boolean(), offset.offset()));
            }
            Instruction::JumpIfNull { src, offset } => {
                return Ok(branch(ctx.get(src)?.is_nullish(), offset.offset()));
            }
            Instruction::JumpIfNotNull { src, offset } => {
                return Ok(branch(!ctx.get(src)?.is_nullish(), offset.offset()));
            }
            Instruction::JumpIfLess { lhs, rhs, offset } => {
                let taken = compare(ctx, lhs, rhs)? == Some(Ordering::Less);
                return Ok(branch(taken, offset.offset()));
            }
            Instruction::JumpIfNotLess { lhs, rhs, offset } => {
                let taken = compare(ctx, lhs, rhs)? != Some(Ordering::Less);
                return Ok(branch(taken, offset.offset()));
            }
            Instruction::JumpIfLessEq { lhs, rhs, offset } => {
                let taken = matches!(compare(ctx, lhs, rhs)?, Some(Ordering::Less | Ordering::Equal));
                return Ok(branch(taken, offset.offset()));
            }
            Instruction::JumpIfNotLessEq { lhs, rhs, offset } => {
                let taken = !matches!(compare(ctx, lhs, rhs)?, Some(Ordering::Less | Ordering::Equal));
                return Ok(branch(taken, offset.offset()));
            }
            Instruction::JumpIfGreater { lhs, rhs, offset } => {
                let taken = compare(ctx, lhs, rhs)? == Some(Ordering::Greater);
                return Ok(branch(taken, offset.offset()));
            }
            Instruction::JumpIfNotGreater { lhs, rhs, offset } => {
                let taken = compare(ctx, lhs, rhs)? != Some(Ordering::Greater);
                return Ok(branch(taken, offset.offset()));
            }
            Instruction::JumpIfGreaterEq { lhs, rhs, offset } => {
                let taken =
                    matches!(compare(ctx, lhs, rhs)?, Some(Ordering::Greater | Ordering::Equal));
                return Ok(branch(taken, offset.offset()));
            }
            Instruction::JumpIfNotGreaterEq { lhs, rhs, offset } => {
                let taken =
                    !matches!(compare(ctx, lhs, rhs)?, Some(Ordering::Greater | Ordering::Equal));
                return Ok(branch(taken, offset.offset()));
            }
            Instruction::SwitchImm {
                table,
                default,
                scrutinee,
            } => {
                let table = code
                    .unit()
                    .switch_tables
                    .get(table.index() as usize)
                    .ok_or_else(|| VmError::internal(format!("switch table {table} out of range")))?;
                let offset = match ctx.get(scrutinee)? {
                    Value::Number(n) => table.lookup(n).unwrap_or(default.offset()),
                    _ => default.offset(),
                };
                return Ok(InstructionResult::Jump(offset));
            }
            Instruction::LoopHint {} | Instruction::Nop {} => {}

            // ==================== Scopes ====================
            Instruction::GetScope { dst } => {
                let scope = ctx.frame()?.scope.clone();
                ctx.set(dst, Value::Scope(scope))?;
            }
            Instruction::CreateActivation { dst, parent } => {
                let parent = self.scope_operand(ctx, parent)?;
                let activation = Activation::new(code.environment(), code.environment_read_only());
                ctx.set(dst, Value::Scope(Scope::activation(activation, parent)))?;
            }
            Instruction::ResolveScope {
                dst, scope, name, ..
            } => {
                let name = code.identifier(name)?;
                let resolved = self.scope_operand(ctx, scope)?.resolve(&name);
                ctx.set(dst, Value::Scope(resolved))?;
            }
            Instruction::GetFromScope {
                dst,
                scope,
                name,
                mode,
            } => {
                let name = code.identifier(name)?;
                let scope = self.scope_operand(ctx, scope)?;
                let value = self.get_from_scope(ctx, &scope, &name, mode)?;
                ctx.set(dst, value)?;
            }
            Instruction::PutToScope {
                scope,
                name,
                value,
                mode,
            } => {
                let name = code.identifier(name)?;
                let scope = self.scope_operand(ctx, scope)?;
                let value = ctx.get(value)?;
                self.put_to_scope(ctx, &scope, &name, value, mode, strict)?;
            }
            Instruction::GetClosureVar { dst, scope, slot } => {
                let scope = self.activation_operand(ctx, scope)?;
                let value = match &scope.kind {
                    ScopeKind::Activation(activation) => activation.borrow().get(slot as usize),
                    _ => Value::Undefined,
                };
                ctx.set(dst, value)?;
            }
            Instruction::PutClosureVar { scope, slot, value } => {
                let scope = self.activation_operand(ctx, scope)?;
                let value = ctx.get(value)?;
                if let ScopeKind::Activation(activation) = &scope.kind {
                    activation.borrow_mut().set(slot as usize, value);
                }
            }
            Instruction::PushWithScope { scope, object } => {
                let object = match ctx.get(object)? {
                    Value::Object(object) => object,
                    Value::Undefined | Value::Null => {
                        return Err(VmError::type_error("Cannot convert undefined or null to object"));
                    }
                    _ => ctx.realm().new_object(),
                };
                let parent = self.scope_operand(ctx, scope)?;
                ctx.set(scope, Value::Scope(Scope::with(object, parent)))?;
                ctx.frame_mut()?.scope_depth += 1;
            }
            Instruction::PushCatchScope { scope, name, value } => {
                let name = code.identifier(name)?;
                let value = ctx.get(value)?;
                let parent = self.scope_operand(ctx, scope)?;
                ctx.set(scope, Value::Scope(Scope::catch(name, value, parent)))?;
                ctx.frame_mut()?.scope_depth += 1;
            }
            Instruction::PopScope { scope } => {
                let current = self.scope_operand(ctx, scope)?;
                let parent = current
                    .parent
                    .clone()
                    .ok_or_else(|| VmError::internal("popped the global scope"))?;
                ctx.set(scope, Value::Scope(parent))?;
                let frame = ctx.frame_mut()?;
                frame.scope_depth = frame.scope_depth.saturating_sub(1);
            }

            // ==================== Properties ====================
            Instruction::GetById { dst, base, name } => {
                let name = code.identifier(name)?;
                let base = ctx.get(base)?;
                let value = self.get_property(ctx, &base, &name)?;
                ctx.set(dst, value)?;
            }
            Instruction::PutById { base, name, value } => {
                let name = code.identifier(name)?;
                let base = ctx.get(base)?;
                let value = ctx.get(value)?;
                self.put_property(ctx, &base, &name, value, strict)?;
            }
            Instruction::DefineById { base, name, value } => {
                let name = code.identifier(name)?;
                let value = ctx.get(value)?;
                if let Value::Object(object) = ctx.get(base)? {
                    object.define(name, value, Attributes::DEFAULT);
                }
            }
            Instruction::PutGetterSetter {
                base,
                name,
                getter,
                setter,
            } => {
                let name = code.identifier(name)?;
                let getter = ctx.get(getter)?;
                let setter = ctx.get(setter)?;
                if let Value::Object(object) = ctx.get(base)? {
                    object.define_accessor(name, getter, setter);
                }
            }
            Instruction::GetByVal {
                dst,
                base,
                property,
            } => {
                let key = ctx.get(property)?.to_property_key();
                let base = ctx.get(base)?;
                let value = self.get_property(ctx, &base, &key)?;
                ctx.set(dst, value)?;
            }
            Instruction::PutByVal {
                base,
                property,
                value,
            } => {
                let key = ctx.get(property)?.to_property_key();
                let base = ctx.get(base)?;
                let value = ctx.get(value)?;
                self.put_property(ctx, &base, &key, value, strict)?;
            }
            Instruction::DeleteById { dst, base, name } => {
                let name = code.identifier(name)?;
                let base = ctx.get(base)?;
                let deleted = self.delete_property(&base, &name, strict)?;
                ctx.set(dst, Value::Bool(deleted))?;
            }
            Instruction::DeleteByVal {
                dst,
                base,
                property,
            } => {
                let key = ctx.get(property)?.to_property_key();
                let base = ctx.get(base)?;
                let deleted = self.delete_property(&base, &key, strict)?;
                ctx.set(dst, Value::Bool(deleted))?;
            }

            // ==================== Allocation ====================
            Instruction::NewObject { dst } => {
                let object = ctx.realm().new_object();
                ctx.set(dst, Value::Object(object))?;
            }
            Instruction::NewArray { dst, first, count } => {
                let values = (0..count as i32)
                    .map(|i| ctx.get(first.offset(i)))
                    .collect::<VmResult<Vec<_>>>()?;
                let array = ctx.realm().new_array(values);
                ctx.set(dst, Value::Object(array))?;
            }
            Instruction::ArrayPush { array, value } => {
                let value = ctx.get(value)?;
                if let Value::Object(array) = ctx.get(array)? {
                    array.push(value);
                }
            }
            Instruction::ArrayPushHole { array } => {
                if let Value::Object(array) = ctx.get(array)? {
                    array.push_hole();
                }
            }
            Instruction::ArrayAppendSpread { array, iterable } => {
                let iterable = ctx.get(iterable)?;
                let values = match &iterable {
                    Value::Object(object) => object.element_values(),
                    Value::String(s) => Some(s.chars().map(|c| Value::string(c.encode_utf8(&mut [0; 4]))).collect()),
                    _ => None,
                };
                let Some(values) = values else {
                    return Err(VmError::type_error(format!(
                        "{} is not iterable",
                        describe(&iterable)
                    )));
                };
                if let Value::Object(array) = ctx.get(array)? {
                    for value in values {
                        array.push(value);
                    }
                }
            }
            Instruction::NewRegExp {
                dst,
                pattern,
                flags,
            } => {
                let regexp = ObjectRef::with_class(
                    ObjectClass::RegExp,
                    Some(ctx.realm().object_prototype().clone()),
                );
                regexp.define(Identifier::new("source"), code.constant(pattern)?, Attributes::HIDDEN);
                regexp.define(Identifier::new("flags"), code.constant(flags)?, Attributes::HIDDEN);
                regexp.define(Identifier::new("lastIndex"), Value::Number(0.0), Attributes::HIDDEN);
                ctx.set(dst, Value::Object(regexp))?;
            }
            Instruction::NewFunction {
                dst,
                scope,
                function,
            } => {
                let scope = self.scope_operand(ctx, scope)?;
                let closure = self.new_closure(ctx, code, scope, function)?;
                ctx.set(dst, closure)?;
            }

            // ==================== Frame values ====================
            Instruction::ToThis { dst } => {
                if ctx.get(dst)?.is_nullish() {
                    let global = ctx.realm().global().clone();
                    ctx.set(dst, Value::Object(global))?;
                }
            }
            Instruction::CreateArguments { dst } => {
                let arguments = self.create_arguments(ctx)?;
                ctx.set(dst, arguments)?;
            }
            Instruction::GetArgument { dst, index } => {
                let passed = ctx.argument_count()?.saturating_sub(1);
                let value = if index < passed {
                    ctx.get(Register::argument(index + 1))?
                } else {
                    Value::Undefined
                };
                ctx.set(dst, value)?;
            }
            Instruction::GetArgumentCount { dst } => {
                let passed = ctx.argument_count()?.saturating_sub(1);
                ctx.set(dst, Value::Number(f64::from(passed)))?;
            }

            // ==================== Calls ====================
            Instruction::Call {
                dst,
                callee,
                this_arg,
                argc,
                link,
            } => return self.op_call(ctx, code, false, dst, callee, this_arg, argc, link),
            Instruction::Construct {
                dst,
                callee,
                this_arg,
                argc,
                link,
            } => return self.op_call(ctx, code, true, dst, callee, this_arg, argc, link),
            Instruction::CallEval {
                dst,
                callee,
                this_arg,
                argc,
                link,
            } => return self.op_call_eval(ctx, code, dst, callee, this_arg, argc, link),
            Instruction::CallVarargs {
                dst,
                callee,
                this_value,
                arguments,
                first_free,
                link,
            } => {
                return self.op_call_varargs(
                    ctx, code, false, dst, callee, this_value, arguments, first_free, link,
                );
            }
            Instruction::ConstructVarargs {
                dst,
                callee,
                this_value,
                arguments,
                first_free,
                link,
            } => {
                return self.op_call_varargs(
                    ctx, code, true, dst, callee, this_value, arguments, first_free, link,
                );
            }
            Instruction::Return { value } | Instruction::End { value } => {
                return Ok(InstructionResult::Return(ctx.get(value)?));
            }

            // ==================== Exceptions ====================
            Instruction::Throw { value } => {
                let value = ctx.get(value)?;
                let message = value.to_display_string();
                return Err(VmError::exception(value, message));
            }
            Instruction::Catch { dst } => {
                let exception = ctx.take_exception();
                ctx.set(dst, exception)?;
            }
            Instruction::ThrowStaticError { message, kind } => {
                let message = code.constant(message)?.to_display_string();
                let error = ctx.realm().new_error(ErrorType::from(kind), &message);
                return Err(VmError::exception(Value::Object(error), format!("{kind}: {message}")));
            }
            Instruction::ThrowStackOverflow {} => {
                return Err(VmError::range_error("Maximum call stack size exceeded"));
            }

            // ==================== Enumeration ====================
            Instruction::GetEnumerableLength { dst, base } => {
                let length = match ctx.get(base)? {
                    Value::Object(object) => object.element_count(),
                    Value::String(s) => s.encode_utf16().count(),
                    _ => 0,
                };
                ctx.set(dst, Value::Number(length as f64))?;
            }
            Instruction::HasIndexedProperty { dst, base, index } => {
                let index = ctx.get(index)?.to_number() as usize;
                let present = match ctx.get(base)? {
                    Value::Object(object) => object.has_element(index),
                    Value::String(s) => index < s.encode_utf16().count(),
                    _ => false,
                };
                ctx.set(dst, Value::Bool(present))?;
            }
            Instruction::ToIndexString { dst, index } => {
                let index = ctx.get(index)?.to_number();
                ctx.set(dst, Value::string(&number_to_string(index)))?;
            }
            Instruction::GetPropertyEnumerator { dst, base } => {
                let keys: Rc<[Identifier]> = match ctx.get(base)? {
                    Value::Object(object) => object.enumerable_keys().into(),
                    _ => Rc::from(Vec::new()),
                };
                ctx.set(dst, Value::Enumerator(keys))?;
            }
            Instruction::EnumeratorNext {
                dst,
                enumerator,
                index,
            } => {
                let index = ctx.get(index)?.to_number() as usize;
                let next = match ctx.get(enumerator)? {
                    Value::Enumerator(keys) => keys
                        .get(index)
                        .map_or(Value::Null, |key| Value::string(key.as_str())),
                    _ => Value::Null,
                };
                ctx.set(dst, next)?;
            }
            Instruction::HasGenericProperty {
                dst,
                base,
                property,
            } => {
                let key = ctx.get(property)?.to_property_key();
                let present = match ctx.get(base)? {
                    Value::Object(object) => object.has_property(&key),
                    _ => false,
                };
                ctx.set(dst, Value::Bool(present))?;
            }
            Instruction::GetDirectPname {
                dst,
                base,
                property,
                ..
            } => {
                let key = ctx.get(property)?.to_property_key();
                let base = ctx.get(base)?;
                let value = self.get_property(ctx, &base, &key)?;
                ctx.set(dst, value)?;
            }

            // ==================== Debugging ====================
            Instruction::DebugHook { kind } => {
                trace!(%kind, code = code.name(), "debug hook");
            }
        }
        Ok(InstructionResult::Continue)
    }

    // ==================== Code management ====================

    /// Register the entry word of `code`; sites still caching swept entries
    /// of dropped code are unlinked
    pub(crate) fn register_code(&self, ctx: &mut VmContext, code: &Rc<CodeBlock>) {
        let dead = ctx.register_code(code);
        if dead.is_empty() {
            return;
        }
        let unlinked: usize = dead.iter().map(|&word| self.linker.reclaim(word)).sum();
        debug!(swept = dead.len(), unlinked, "swept entries of dropped code");
    }

    /// Retire the entry word of `code`: unlink every site caching it and
    /// give the code a fresh word. Returns the number of sites unlinked.
    pub fn reclaim_code(&mut self, ctx: &mut VmContext, code: &Rc<CodeBlock>) -> usize {
        let old = code.entry();
        let unlinked = self.linker.reclaim(old);
        ctx.remove_entry(old);
        let fresh = ctx.next_word();
        code.replace_entry(fresh);
        self.register_code(ctx, code);
        debug!(code = code.name(), old, fresh, unlinked, "reclaimed code entry");
        unlinked
    }
}

/// Bind the `var` and function names of global or eval code in the scope
/// they belong to
fn declare_variables(code: &CodeBlock, scope: &ScopeRef, attributes: Attributes) {
    let declared = &code.unit().declared_variables;
    if declared.is_empty() {
        return;
    }
    let target = scope.variable_scope();
    match &target.kind {
        ScopeKind::Activation(activation) => {
            let mut activation = activation.borrow_mut();
            for name in declared {
                activation.declare(name.clone());
            }
        }
        ScopeKind::Global(object) => {
            for name in declared {
                if !object.has_own_property(name) {
                    object.define(name.clone(), Value::Undefined, attributes);
                }
            }
        }
        ScopeKind::With(_) | ScopeKind::Catch { .. } => {}
    }
}

fn cached_target(ctx: &VmContext, info: &CallLinkInfo, data: &FunctionData) -> Option<Target> {
    let target = info.lookup(data.identity)?;
    match (ctx.entry(target)?, &data.callable) {
        (Entry::Code(code), Callable::Closure { scope, .. }) => {
            Some(Target::Code(code.upgrade()?, scope.clone()))
        }
        (Entry::Native(kind), Callable::Native(_)) => Some(Target::Native(*kind)),
        _ => None,
    }
}

fn not_found(name: &Identifier, mode: ResolveMode) -> VmResult<Value> {
    match mode {
        ResolveMode::ThrowIfNotFound => {
            Err(VmError::reference_error(format!("{name} is not defined")))
        }
        ResolveMode::DoNotThrowIfNotFound => Ok(Value::Undefined),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{s}\""),
        Value::Object(object) if object.is_callable() => format!("function {}", object.function_name()),
        Value::Object(_) => "object".to_string(),
        other => other.to_display_string(),
    }
}

fn string_property(s: &str, key: &Identifier) -> Value {
    if key.as_str() == "length" {
        return Value::Number(s.encode_utf16().count() as f64);
    }
    match array_index(key) {
        Some(index) => s
            .encode_utf16()
            .nth(index as usize)
            .map_or(Value::Undefined, |unit| {
                Value::string(&String::from_utf16_lossy(&[unit]))
            }),
        None => Value::Undefined,
    }
}

fn instance_of(value: &Value, constructor: &Value) -> VmResult<bool> {
    let Some(constructor) = constructor.as_object().filter(|c| c.is_callable()) else {
        return Err(VmError::type_error(
            "Right-hand side of 'instanceof' is not callable",
        ));
    };
    let Value::Object(object) = value else {
        return Ok(false);
    };
    let Value::Object(prototype) = constructor.get_data("prototype") else {
        return Err(VmError::type_error(
            "Function has non-object prototype in instanceof check",
        ));
    };
    let mut current = object.proto();
    while let Some(proto) = current {
        if proto.ptr_eq(&prototype) {
            return Ok(true);
        }
        current = proto.proto();
    }
    Ok(false)
}

#[inline]
fn branch(taken: bool, offset: i32) -> InstructionResult {
    if taken {
        InstructionResult::Jump(offset)
    } else {
        InstructionResult::Continue
    }
}

fn numeric(
    ctx: &mut VmContext,
    dst: Register,
    lhs: Register,
    rhs: Register,
    op: impl FnOnce(f64, f64) -> f64,
) -> VmResult<()> {
    let value = op(ctx.get(lhs)?.to_number(), ctx.get(rhs)?.to_number());
    ctx.set(dst, Value::Number(value))
}

fn int32(
    ctx: &mut VmContext,
    dst: Register,
    lhs: Register,
    rhs: Register,
    op: impl FnOnce(i32, i32) -> f64,
) -> VmResult<()> {
    let value = op(ctx.get(lhs)?.to_int32(), ctx.get(rhs)?.to_int32());
    ctx.set(dst, Value::Number(value))
}

/// Abstract relational comparison; `None` when either side is NaN
fn compare(ctx: &VmContext, lhs: Register, rhs: Register) -> VmResult<Option<Ordering>> {
    let l = ctx.get(lhs)?.to_primitive();
    let r = ctx.get(rhs)?.to_primitive();
    Ok(match (&l, &r) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => l.to_number().partial_cmp(&r.to_number()),
    })
}

fn relational(
    ctx: &mut VmContext,
    dst: Register,
    lhs: Register,
    rhs: Register,
    test: impl FnOnce(Ordering) -> bool,
) -> VmResult<()> {
    let value = compare(ctx, lhs, rhs)?.is_some_and(test);
    ctx.set(dst, Value::Bool(value))
}

fn type_test(ctx: &mut VmContext, dst: Register, src: Register, name: &str) -> VmResult<()> {
    let value = ctx.get(src)?.type_of() == name;
    ctx.set(dst, Value::Bool(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> VmResult<Value> {
        let options = VmOptions::default().with_captured_output(true);
        let linker = Arc::new(CallLinker::new(options.thrash_limit));
        let mut interpreter = Interpreter::new(options, linker);
        let mut ctx = VmContext::new(true);
        let unit = interpreter.compile(source)?;
        let code = Rc::new(CodeBlock::link(unit, ctx.next_word()));
        interpreter.execute(&mut ctx, &code)
    }

    #[test]
    fn test_arithmetic_and_strings() {
        assert_eq!(run("1 + 2 * 3").unwrap().as_number(), Some(7.0));
        assert_eq!(run("'a' + 1 + 2").unwrap().as_str(), Some("a12"));
        assert_eq!(run("-7 % 3").unwrap().as_number(), Some(-1.0));
        assert_eq!(run("1 << 33").unwrap().as_number(), Some(2.0));
        assert_eq!(run("-1 >>> 28").unwrap().as_number(), Some(15.0));
    }

    #[test]
    fn test_comparisons_with_nan() {
        assert!(!run("NaN < 1 || NaN >= 1").unwrap().to_boolean());
        assert!(run("'b' > 'a'").unwrap().to_boolean());
        assert_eq!(run("var n = 0; if (!(NaN <= 1)) n = 1; n").unwrap().as_number(), Some(1.0));
    }

    #[test]
    fn test_short_argument_lists_are_padded() {
        let value = run("function f(a, b, c) { return c; } f(1)").unwrap();
        assert!(value.is_undefined());
        let value = run("function g(a, b) { return arguments.length; } g(1, 2, 3)").unwrap();
        assert_eq!(value.as_number(), Some(3.0));
    }

    #[test]
    fn test_string_properties() {
        assert_eq!(run("'hello'.length").unwrap().as_number(), Some(5.0));
        assert_eq!(run("'hello'[1]").unwrap().as_str(), Some("e"));
    }

    #[test]
    fn test_unresolved_read_throws() {
        let err = run("missing + 1").unwrap_err();
        let thrown = err.thrown().unwrap().to_display_string();
        assert_eq!(thrown, "ReferenceError: missing is not defined");
        assert_eq!(run("typeof missing").unwrap().as_str(), Some("undefined"));
    }
}
