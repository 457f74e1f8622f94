//! Runtime helpers called from compiled call sites.
//!
//! Generic dispatch needs the whole runtime (value model, environments,
//! argument spreading), so compiled code reaches it through `extern "C"`
//! helpers imported by symbol name.
//!
//! # Architecture
//!
//! ```text
//! tern-jit (defines CallContext, helper kinds and signatures)
//!       ↑
//! host runtime (implements the dispatch helpers, fills RuntimeHelpers)
//! ```
//!
//! # ABI
//!
//! Compiled call sites and linked entries share one signature,
//! [`NativeEntry`]: `extern "C" fn(*mut CallContext, *mut u64) -> i64`. The
//! second argument is a frame base; the return value is `0` on normal
//! completion, with the result in [`CallContext::result`], and `1` when an
//! exception is pending in [`CallContext::exception`].
//!
//! Helpers take the context first, then `i64` operands, and return `i64`.

use std::ffi::c_void;

use cranelift_codegen::ir::{self, AbiParam, types};
use cranelift_codegen::isa::CallConv;
use cranelift_jit::JITBuilder;
use cranelift_module::{FuncId, Linkage, Module};
use tern_bytecode::UnlinkedCodeBlock;

use crate::error::{JitError, JitResult};

/// Signature shared by compiled call sites and linked callee entries
pub type NativeEntry = unsafe extern "C" fn(*mut CallContext, *mut u64) -> i64;

/// Returned by a call that completed normally
pub const STATUS_OK: i64 = 0;
/// Returned by a call that left an exception pending
pub const STATUS_EXCEPTION: i64 = 1;

/// Per-thread state shared between compiled code and the host
#[derive(Debug)]
#[repr(C)]
pub struct CallContext {
    /// Opaque host runtime
    pub host: *mut c_void,
    /// Unit whose exception table locates handlers for the running frame;
    /// entries that change it restore it before returning
    pub unit: *const UnlinkedCodeBlock,
    /// Result word of the last completed call
    pub result: u64,
    /// Pending exception word
    pub exception: u64,
    /// Catch target in `unit` for the pending exception, `-1` when none
    pub handler: i64,
}

pub(crate) const RESULT_OFFSET: i32 = std::mem::offset_of!(CallContext, result) as i32;

impl CallContext {
    /// Create a context for frames of `unit`
    pub fn new(host: *mut c_void, unit: &UnlinkedCodeBlock) -> Self {
        Self {
            host,
            unit,
            result: 0,
            exception: 0,
            handler: -1,
        }
    }
}

// ---------------------------------------------------------------------------
// Helper kind enumeration
// ---------------------------------------------------------------------------

/// Identifies a runtime helper function
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum HelperKind {
    /// `(ctx, frame, info) -> status`: generic dispatch through the frame
    /// header, then link `info` on success
    VirtualCall = 0,
    /// `(ctx, frame, info) -> status`: direct eval if the callee is the
    /// intrinsic eval, otherwise a generic call
    EvalCall = 1,
    /// `(ctx, arguments) -> argc` including `this`, or `-1` with an
    /// exception pending
    VarargsFrameSize = 2,
    /// `(ctx, frame, this, arguments) -> status`: fill `this`, the
    /// arguments and the argument count of a sized frame
    VarargsSetup = 3,
    /// `(ctx, pc) -> target`: catch target covering `pc` in the context's
    /// unit, stored into `ctx.handler`
    LookupHandler = 4,
}

const HELPER_COUNT: usize = 5;

const ALL_HELPERS: [HelperKind; HELPER_COUNT] = [
    HelperKind::VirtualCall,
    HelperKind::EvalCall,
    HelperKind::VarargsFrameSize,
    HelperKind::VarargsSetup,
    HelperKind::LookupHandler,
];

impl HelperKind {
    /// Symbol name used for JIT linking
    pub fn symbol_name(self) -> &'static str {
        match self {
            Self::VirtualCall => "tern_rt_virtual_call",
            Self::EvalCall => "tern_rt_eval_call",
            Self::VarargsFrameSize => "tern_rt_varargs_frame_size",
            Self::VarargsSetup => "tern_rt_varargs_setup",
            Self::LookupHandler => "tern_rt_lookup_handler",
        }
    }

    /// Number of i64 parameters, context included
    pub fn param_count(self) -> usize {
        match self {
            Self::VarargsFrameSize | Self::LookupHandler => 2,
            Self::VirtualCall | Self::EvalCall => 3,
            Self::VarargsSetup => 4,
        }
    }

    /// Build the Cranelift IR signature for this helper
    pub fn make_signature(self, call_conv: CallConv) -> ir::Signature {
        let mut sig = ir::Signature::new(call_conv);
        for _ in 0..self.param_count() {
            sig.params.push(AbiParam::new(types::I64));
        }
        sig.returns.push(AbiParam::new(types::I64));
        sig
    }
}

extern "C" fn lookup_handler(ctx: *mut CallContext, pc: i64) -> i64 {
    // SAFETY: compiled call sites pass the context they were invoked with.
    let Some(ctx) = (unsafe { ctx.as_mut() }) else {
        return -1;
    };
    // SAFETY: the host keeps `unit` alive while frames of it run.
    let target = unsafe { ctx.unit.as_ref() }
        .and_then(|unit| unit.exception_handlers.lookup(pc as u32))
        .map_or(-1, |handler| handler.target as i64);
    ctx.handler = target;
    target
}

// ---------------------------------------------------------------------------
// RuntimeHelpers: function pointer table
// ---------------------------------------------------------------------------

/// Table of runtime helper function pointers.
///
/// The host fills the dispatch helpers before constructing a
/// [`CallSiteCompiler`](crate::CallSiteCompiler); handler lookup is built in.
#[derive(Clone)]
pub struct RuntimeHelpers {
    ptrs: [Option<*const u8>; HELPER_COUNT],
}

// SAFETY: function pointers are `Send + Sync` by nature.
unsafe impl Send for RuntimeHelpers {}
unsafe impl Sync for RuntimeHelpers {}

impl Default for RuntimeHelpers {
    fn default() -> Self {
        let mut ptrs = [None; HELPER_COUNT];
        ptrs[HelperKind::LookupHandler as usize] = Some(lookup_handler as *const u8);
        Self { ptrs }
    }
}

impl RuntimeHelpers {
    /// Create a table with only the built-in helpers set
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a helper function pointer.
    ///
    /// # Safety
    ///
    /// The function pointer must have the `extern "C"` signature documented
    /// on `kind`.
    pub unsafe fn set(&mut self, kind: HelperKind, ptr: *const u8) {
        self.ptrs[kind as usize] = Some(ptr);
    }

    /// Get a helper function pointer
    pub fn get(&self, kind: HelperKind) -> Option<*const u8> {
        self.ptrs[kind as usize]
    }

    /// Register all set helpers as symbols on the JIT builder
    pub fn register_symbols(&self, builder: &mut JITBuilder) {
        for kind in ALL_HELPERS {
            if let Some(ptr) = self.get(kind) {
                builder.symbol(kind.symbol_name(), ptr);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// HelperFuncIds: module-level function declarations
// ---------------------------------------------------------------------------

/// Module-level function IDs for declared helper imports
pub(crate) struct HelperFuncIds {
    ids: [Option<FuncId>; HELPER_COUNT],
}

impl HelperFuncIds {
    /// Declare all available helpers as imported functions on the module
    pub fn declare<M: Module>(helpers: &RuntimeHelpers, module: &mut M) -> JitResult<Self> {
        let call_conv = module.isa().default_call_conv();
        let mut ids = [None; HELPER_COUNT];
        for kind in ALL_HELPERS {
            if helpers.get(kind).is_some() {
                let sig = kind.make_signature(call_conv);
                let func_id = module.declare_function(kind.symbol_name(), Linkage::Import, &sig)?;
                ids[kind as usize] = Some(func_id);
            }
        }
        Ok(Self { ids })
    }
}

// ---------------------------------------------------------------------------
// HelperRefs: per-function FuncRefs for calling helpers from IR
// ---------------------------------------------------------------------------

/// Per-compiled-function helper references
pub(crate) struct HelperRefs {
    refs: [Option<ir::FuncRef>; HELPER_COUNT],
}

impl HelperRefs {
    /// Declare all available helpers into a function's IR
    pub fn declare<M: Module>(func_ids: &HelperFuncIds, module: &mut M, func: &mut ir::Function) -> Self {
        let mut refs = [None; HELPER_COUNT];
        for (i, id) in func_ids.ids.iter().enumerate() {
            if let Some(func_id) = id {
                refs[i] = Some(module.declare_func_in_func(*func_id, func));
            }
        }
        Self { refs }
    }

    /// Get the FuncRef, or fail with [`JitError::MissingHelper`]
    pub fn require(&self, kind: HelperKind) -> JitResult<ir::FuncRef> {
        self.refs[kind as usize].ok_or(JitError::MissingHelper(kind.symbol_name()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_handler_is_built_in() {
        let helpers = RuntimeHelpers::new();
        assert!(helpers.get(HelperKind::LookupHandler).is_some());
        assert!(helpers.get(HelperKind::VirtualCall).is_none());
    }

    #[test]
    fn test_lookup_handler_reads_unit_table() {
        let program = tern_compiler::Compiler::new()
            .compile_program("function f(g) { try { g(); } catch (e) { return e; } }")
            .unwrap();
        let unit = &program.functions[0];
        let call = unit.instructions.iter().position(|i| i.is_call()).unwrap();
        let expected = unit.exception_handlers.lookup(call as u32).unwrap().target as i64;

        let mut ctx = CallContext::new(std::ptr::null_mut(), unit);
        assert_eq!(lookup_handler(&mut ctx, call as i64), expected);
        assert_eq!(ctx.handler, expected);
        let last = unit.instructions.len() as i64 - 1;
        assert_eq!(lookup_handler(&mut ctx, last), -1);
        assert_eq!(ctx.handler, -1);
    }

    #[test]
    fn test_signatures() {
        let sig = HelperKind::VarargsSetup.make_signature(CallConv::SystemV);
        assert_eq!(sig.params.len(), 4);
        assert_eq!(sig.returns.len(), 1);
    }
}
