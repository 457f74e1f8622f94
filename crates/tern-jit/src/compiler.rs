//! Cranelift compiler for single call instructions.
//!
//! Every compiled site has the [`NativeEntry`] signature. Called with the
//! caller's context and frame base, it builds the callee frame header below
//! the caller's locals and then enters the callee:
//!
//! ```text
//! callee = fp[callee]
//! base   = fp + (this_arg - 4)            ; or sized at runtime for varargs
//! base[0..4] = fp, pc, callee, argc
//! v = info.version
//! if v even && callee == info.expected && info.target != 0 && info.version == v:
//!     status = info.target(ctx, base)     ; direct entry
//! else:
//!     status = tern_rt_virtual_call(ctx, base, info)
//! if status != 0: ctx.handler = tern_rt_lookup_handler(ctx, pc); return 1
//! fp[dst] = ctx.result; return 0
//! ```
//!
//! The record address is an immediate in the generated code, and the
//! sequence word, comparison word and entry are loaded from it with atomic
//! loads, so relinking never rewrites instructions.

use std::sync::Arc;

use cranelift_codegen::ir::condcodes::IntCC;
use cranelift_codegen::ir::instructions::BlockArg;
use cranelift_codegen::ir::{AbiParam, Block, InstBuilder, MemFlags, UserFuncName, Value, types};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{Linkage, Module, default_libcall_names};
use tern_bytecode::frame::{
    ARGUMENT_COUNT, CALLEE, CALLER_FRAME, RETURN_LOCATION, STACK_ALIGNMENT_SLOTS, THIS_ARGUMENT,
    slot_offset,
};
use tern_bytecode::{Instruction, Register, UnlinkedCodeBlock};
use tracing::debug;

use crate::call_link::{
    CallLinkInfo, CallType, EXPECTED_CALLEE_OFFSET, TARGET_OFFSET, VERSION_OFFSET,
};
use crate::error::{JitError, JitResult};
use crate::runtime_helpers::{
    CallContext, HelperFuncIds, HelperKind, HelperRefs, NativeEntry, RESULT_OFFSET,
    RuntimeHelpers, STATUS_EXCEPTION, STATUS_OK,
};

/// One compiled call instruction
#[derive(Debug, Clone)]
pub struct CompiledCallSite {
    entry: NativeEntry,
    info: Arc<CallLinkInfo>,
    pc: u32,
    code_size: usize,
}

impl CompiledCallSite {
    /// Entry of the generated code
    pub fn entry(&self) -> NativeEntry {
        self.entry
    }

    /// Link record the generated code reads
    pub fn info(&self) -> &Arc<CallLinkInfo> {
        &self.info
    }

    /// Bytecode offset of the compiled instruction
    pub fn pc(&self) -> u32 {
        self.pc
    }

    /// Size of the generated code in bytes
    pub fn code_size(&self) -> usize {
        self.code_size
    }

    /// Run the call with frame base `fp`.
    ///
    /// # Safety
    ///
    /// `fp` must point into a slot array covering every register the
    /// instruction names plus the callee frame below them, `ctx.unit` must
    /// be the unit the site was compiled from, and the compiler that
    /// produced this site must still be alive.
    pub unsafe fn invoke(&self, ctx: &mut CallContext, fp: *mut u64) -> i64 {
        // SAFETY: upheld by the caller.
        unsafe { (self.entry)(ctx, fp) }
    }
}

/// Cranelift-backed compiler for call instructions
pub struct CallSiteCompiler {
    module: JITModule,
    function_builder_ctx: FunctionBuilderContext,
    context: cranelift_codegen::Context,
    next_function_id: u64,
    helper_func_ids: HelperFuncIds,
}

impl CallSiteCompiler {
    /// Create a compiler for the host ISA using `helpers` for slow paths
    pub fn new(helpers: RuntimeHelpers) -> JitResult<Self> {
        let mut flag_builder = settings::builder();
        flag_builder
            .set("use_colocated_libcalls", "false")
            .map_err(|e| JitError::Builder(e.to_string()))?;
        flag_builder
            .set("is_pic", "false")
            .map_err(|e| JitError::Builder(e.to_string()))?;
        let isa = cranelift_native::builder()
            .map_err(|e| JitError::Builder(e.to_string()))?
            .finish(settings::Flags::new(flag_builder))
            .map_err(|e| JitError::Builder(e.to_string()))?;

        let mut builder = JITBuilder::with_isa(isa, default_libcall_names());
        helpers.register_symbols(&mut builder);
        let mut module = JITModule::new(builder);
        let helper_func_ids = HelperFuncIds::declare(&helpers, &mut module)?;
        Ok(Self {
            module,
            function_builder_ctx: FunctionBuilderContext::new(),
            context: cranelift_codegen::Context::new(),
            next_function_id: 0,
            helper_func_ids,
        })
    }

    fn entry_signature(&self) -> cranelift_codegen::ir::Signature {
        let mut signature = self.module.make_signature();
        signature.params.push(AbiParam::new(types::I64)); // ctx
        signature.params.push(AbiParam::new(types::I64)); // frame base
        signature.returns.push(AbiParam::new(types::I64));
        signature
    }

    /// Compile the call instruction at `pc` of `unit` against `info`
    pub fn compile(
        &mut self,
        unit: &UnlinkedCodeBlock,
        pc: usize,
        info: Arc<CallLinkInfo>,
    ) -> JitResult<CompiledCallSite> {
        let instruction = unit.instructions.get(pc).ok_or(JitError::InvalidPc {
            pc,
            instruction_count: unit.instructions.len(),
        })?;
        let shape = CallShape::of(instruction).ok_or_else(|| JitError::UnsupportedInstruction {
            pc,
            opcode: instruction.opcode().name().to_string(),
        })?;

        let signature = self.entry_signature();
        let name = format!(
            "tern_call_{}_{}_{}",
            unit.display_name().replace(['<', '>', ' '], "_"),
            pc,
            self.next_function_id
        );
        self.next_function_id = self.next_function_id.saturating_add(1);

        let func_id = self
            .module
            .declare_function(&name, Linkage::Local, &signature)?;
        self.context.func = cranelift_codegen::ir::Function::with_name_signature(
            UserFuncName::user(0, func_id.as_u32()),
            signature.clone(),
        );
        let helpers = HelperRefs::declare(&self.helper_func_ids, &mut self.module, &mut self.context.func);

        let translated = {
            let mut builder = FunctionBuilder::new(&mut self.context.func, &mut self.function_builder_ctx);
            let entry_sig = builder.import_signature(signature);
            let site = SiteBuilder {
                helpers: &helpers,
                entry_sig,
                pc: pc as u32,
                info: Arc::as_ptr(&info) as i64,
            };
            site.translate(&mut builder, &shape)
                .map(|()| builder.finalize())
        };
        if let Err(err) = translated {
            self.module.clear_context(&mut self.context);
            return Err(err);
        }

        self.module.define_function(func_id, &mut self.context)?;
        let code_size = self
            .context
            .compiled_code()
            .map_or(0, |code| code.code_buffer().len());
        self.module.clear_context(&mut self.context);
        self.module.finalize_definitions()?;

        let code_ptr = self.module.get_finalized_function(func_id);
        // SAFETY: the function was declared with the `NativeEntry` signature.
        let entry = unsafe { std::mem::transmute::<*const u8, NativeEntry>(code_ptr) };
        debug!(
            unit = unit.display_name(),
            pc,
            call_type = ?info.call_type(),
            code_size,
            "compiled call site"
        );
        Ok(CompiledCallSite {
            entry,
            info,
            pc: pc as u32,
            code_size,
        })
    }
}

/// Operands of one call instruction
enum CallShape {
    Fixed {
        call_type: CallType,
        dst: Register,
        callee: Register,
        this_arg: Register,
        argc: u32,
    },
    Varargs {
        dst: Register,
        callee: Register,
        this_value: Register,
        arguments: Register,
        first_free: Register,
    },
}

impl CallShape {
    fn of(instruction: &Instruction) -> Option<Self> {
        let (call_type, _) = CallType::of(instruction)?;
        Some(match *instruction {
            Instruction::Call { dst, callee, this_arg, argc, .. }
            | Instruction::CallEval { dst, callee, this_arg, argc, .. }
            | Instruction::Construct { dst, callee, this_arg, argc, .. } => Self::Fixed {
                call_type,
                dst,
                callee,
                this_arg,
                argc,
            },
            Instruction::CallVarargs { dst, callee, this_value, arguments, first_free, .. }
            | Instruction::ConstructVarargs { dst, callee, this_value, arguments, first_free, .. } => {
                Self::Varargs {
                    dst,
                    callee,
                    this_value,
                    arguments,
                    first_free,
                }
            }
            _ => return None,
        })
    }
}

struct SiteBuilder<'a> {
    helpers: &'a HelperRefs,
    entry_sig: cranelift_codegen::ir::SigRef,
    pc: u32,
    info: i64,
}

fn slot(register: Register) -> i32 {
    slot_offset(register.index())
}

impl SiteBuilder<'_> {
    fn translate(&self, builder: &mut FunctionBuilder, shape: &CallShape) -> JitResult<()> {
        let entry = builder.create_block();
        builder.append_block_params_for_function_params(entry);
        builder.switch_to_block(entry);
        let ctx = builder.block_params(entry)[0];
        let fp = builder.block_params(entry)[1];

        let done = builder.create_block();
        builder.append_block_param(done, types::I64);

        let dst = match *shape {
            CallShape::Fixed {
                call_type,
                dst,
                callee,
                this_arg,
                argc,
            } => {
                let callee = builder.ins().load(types::I64, MemFlags::trusted(), fp, slot(callee));
                let base = builder
                    .ins()
                    .iadd_imm(fp, slot_offset(this_arg.index() - THIS_ARGUMENT) as i64);
                let argc = builder.ins().iconst(types::I64, argc as i64);
                self.store_header(builder, fp, base, callee, argc);
                match call_type {
                    CallType::Eval => {
                        let status = self.call_helper(builder, HelperKind::EvalCall, &[ctx, base])?;
                        builder.ins().jump(done, &[BlockArg::Value(status)]);
                    }
                    _ => self.cached_call(builder, ctx, base, callee, done)?,
                }
                dst
            }
            CallShape::Varargs {
                dst,
                callee,
                this_value,
                arguments,
                first_free,
            } => {
                self.varargs_call(builder, ctx, fp, callee, this_value, arguments, first_free, done)?;
                dst
            }
        };

        // done(status)
        builder.switch_to_block(done);
        let status = builder.block_params(done)[0];
        let normal = builder.create_block();
        let throw = builder.create_block();
        builder.ins().brif(status, throw, &[], normal, &[]);

        builder.switch_to_block(normal);
        let result = builder
            .ins()
            .load(types::I64, MemFlags::trusted(), ctx, RESULT_OFFSET);
        builder.ins().store(MemFlags::trusted(), result, fp, slot(dst));
        let ok = builder.ins().iconst(types::I64, STATUS_OK);
        builder.ins().return_(&[ok]);

        builder.switch_to_block(throw);
        self.emit_throw(builder, ctx)?;

        builder.seal_all_blocks();
        Ok(())
    }

    fn store_header(&self, builder: &mut FunctionBuilder, fp: Value, base: Value, callee: Value, argc: Value) {
        let flags = MemFlags::trusted();
        let pc = builder.ins().iconst(types::I64, self.pc as i64);
        builder.ins().store(flags, fp, base, slot_offset(CALLER_FRAME));
        builder.ins().store(flags, pc, base, slot_offset(RETURN_LOCATION));
        builder.ins().store(flags, callee, base, slot_offset(CALLEE));
        builder.ins().store(flags, argc, base, slot_offset(ARGUMENT_COUNT));
    }

    fn call_helper(&self, builder: &mut FunctionBuilder, kind: HelperKind, args: &[Value]) -> JitResult<Value> {
        let func_ref = self.helpers.require(kind)?;
        let mut operands = args.to_vec();
        if matches!(kind, HelperKind::VirtualCall | HelperKind::EvalCall) {
            operands.push(builder.ins().iconst(types::I64, self.info));
        }
        let call = builder.ins().call(func_ref, &operands);
        Ok(builder.inst_results(call)[0])
    }

    /// Inline-cache check, direct entry on a hit, virtual call otherwise
    fn cached_call(
        &self,
        builder: &mut FunctionBuilder,
        ctx: Value,
        base: Value,
        callee: Value,
        done: Block,
    ) -> JitResult<()> {
        let check = builder.create_block();
        let fast = builder.create_block();
        let slow = builder.create_block();
        builder.append_block_param(fast, types::I64);

        let info = builder.ins().iconst(types::I64, self.info);
        let expected_addr = builder.ins().iadd_imm(info, EXPECTED_CALLEE_OFFSET as i64);
        let target_addr = builder.ins().iadd_imm(info, TARGET_OFFSET as i64);
        let version_addr = builder.ins().iadd_imm(info, VERSION_OFFSET as i64);
        let before = builder
            .ins()
            .atomic_load(types::I64, MemFlags::trusted(), version_addr);
        let expected = builder
            .ins()
            .atomic_load(types::I64, MemFlags::trusted(), expected_addr);
        let hit = builder.ins().icmp(IntCC::Equal, callee, expected);
        let nonzero = builder.ins().icmp_imm(IntCC::NotEqual, callee, 0);
        let odd = builder.ins().band_imm(before, 1);
        let quiet = builder.ins().icmp_imm(IntCC::Equal, odd, 0);
        let hit = builder.ins().band(hit, nonzero);
        let hit = builder.ins().band(hit, quiet);
        builder.ins().brif(hit, check, &[], slow, &[]);

        // check: the entry must be published and no writer may have run
        builder.switch_to_block(check);
        let target = builder
            .ins()
            .atomic_load(types::I64, MemFlags::trusted(), target_addr);
        let after = builder
            .ins()
            .atomic_load(types::I64, MemFlags::trusted(), version_addr);
        let stable = builder.ins().icmp(IntCC::Equal, after, before);
        let published = builder.ins().icmp_imm(IntCC::NotEqual, target, 0);
        let valid = builder.ins().band(stable, published);
        builder
            .ins()
            .brif(valid, fast, &[BlockArg::Value(target)], slow, &[]);

        builder.switch_to_block(fast);
        let target = builder.block_params(fast)[0];
        let call = builder.ins().call_indirect(self.entry_sig, target, &[ctx, base]);
        let status = builder.inst_results(call)[0];
        builder.ins().jump(done, &[BlockArg::Value(status)]);

        builder.switch_to_block(slow);
        let status = self.call_helper(builder, HelperKind::VirtualCall, &[ctx, base])?;
        builder.ins().jump(done, &[BlockArg::Value(status)]);
        Ok(())
    }

    /// Size the frame at runtime, fill it, then take the virtual call
    #[allow(clippy::too_many_arguments)]
    fn varargs_call(
        &self,
        builder: &mut FunctionBuilder,
        ctx: Value,
        fp: Value,
        callee: Register,
        this_value: Register,
        arguments: Register,
        first_free: Register,
        done: Block,
    ) -> JitResult<()> {
        let flags = MemFlags::trusted();
        let arguments = builder.ins().load(types::I64, flags, fp, slot(arguments));
        let argc = self.call_helper(builder, HelperKind::VarargsFrameSize, &[ctx, arguments])?;

        let sized = builder.create_block();
        let failed = builder.create_block();
        let negative = builder.ins().icmp_imm(IntCC::SignedLessThan, argc, 0);
        builder.ins().brif(negative, failed, &[], sized, &[]);

        builder.switch_to_block(failed);
        let status = builder.ins().iconst(types::I64, STATUS_EXCEPTION);
        builder.ins().jump(done, &[BlockArg::Value(status)]);

        // The last argument slot sits just below `first_free`:
        // base = fp + (first_free - argc - 3) slots, aligned down.
        builder.switch_to_block(sized);
        let top = builder
            .ins()
            .iconst(types::I64, slot_offset(first_free.index() + 1 - THIS_ARGUMENT) as i64);
        let span = builder.ins().ishl_imm(argc, 3);
        let offset = builder.ins().isub(top, span);
        let offset = builder
            .ins()
            .band_imm(offset, !(slot_offset(STACK_ALIGNMENT_SLOTS) as i64 - 1));
        let base = builder.ins().iadd(fp, offset);

        let callee = builder.ins().load(types::I64, flags, fp, slot(callee));
        let this_value = builder.ins().load(types::I64, flags, fp, slot(this_value));
        self.store_header(builder, fp, base, callee, argc);
        let status = self.call_helper(builder, HelperKind::VarargsSetup, &[ctx, base, this_value, arguments])?;

        let ready = builder.create_block();
        builder.ins().brif(status, done, &[BlockArg::Value(status)], ready, &[]);

        builder.switch_to_block(ready);
        let status = self.call_helper(builder, HelperKind::VirtualCall, &[ctx, base])?;
        builder.ins().jump(done, &[BlockArg::Value(status)]);
        Ok(())
    }

    /// Record the catch target for this pc and report the exception
    fn emit_throw(&self, builder: &mut FunctionBuilder, ctx: Value) -> JitResult<()> {
        let pc = builder.ins().iconst(types::I64, self.pc as i64);
        self.call_helper(builder, HelperKind::LookupHandler, &[ctx, pc])?;
        let status = builder.ins().iconst(types::I64, STATUS_EXCEPTION);
        builder.ins().return_(&[status]);
        Ok(())
    }
}
