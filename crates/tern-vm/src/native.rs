//! Runtime helpers for natively compiled call sites.
//!
//! Compiled call sites only move 64-bit words. A [`NativeHost`] gives VM
//! values words for the duration of a native run and answers the slow-path
//! helpers the call-site compiler emits calls to. `CallContext::host` must
//! point to the `NativeHost` the words came from.
//!
//! A site links to one of two entry thunks rather than to a code block:
//! the thunk reads the callee word back out of the frame header and enters
//! it through the interpreter. The cached callee word pins the function for
//! as long as the host lives, so a hit never reaches dropped code.
//!
//! # Safety
//!
//! Every helper dereferences `ctx.host` as a `NativeHost` and reads the frame
//! the compiled code built. Both are valid for the duration of
//! [`CompiledCallSite::invoke`](tern_jit::CompiledCallSite::invoke) when the
//! host built the context with [`NativeHost::call_context`].

#![allow(unsafe_code)]

use std::ffi::c_void;

use rustc_hash::FxHashMap;
use tern_bytecode::UnlinkedCodeBlock;
use tern_bytecode::frame::{ARGUMENT_COUNT, CALLEE, THIS_ARGUMENT};
use tern_jit::{
    CallContext, CallLinkInfo, HelperKind, NativeEntry, RuntimeHelpers, STATUS_EXCEPTION, STATUS_OK,
};
use tracing::{debug, trace};

use crate::context::VmContext;
use crate::error::{VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::object::ObjectRef;
use crate::value::Value;

/// VM state seen by natively compiled call sites
pub struct NativeHost<'a> {
    interpreter: &'a mut Interpreter,
    context: &'a mut VmContext,
    /// Word `n` names `values[n - 1]`; word 0 is `undefined`
    values: Vec<Value>,
    /// Words already handed out for functions, by identity
    functions: FxHashMap<u64, u64>,
    /// An error running code cannot catch
    fatal: Option<VmError>,
}

impl std::fmt::Debug for NativeHost<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeHost")
            .field("values", &self.values.len())
            .field("functions", &self.functions.len())
            .field("fatal", &self.fatal)
            .finish()
    }
}

impl<'a> NativeHost<'a> {
    /// Host for sites running against `interpreter` and `context`
    pub fn new(interpreter: &'a mut Interpreter, context: &'a mut VmContext) -> Self {
        Self {
            interpreter,
            context,
            values: Vec::new(),
            functions: FxHashMap::default(),
            fatal: None,
        }
    }

    /// Word standing for `value`. A function gets the same word every time.
    pub fn word(&mut self, value: Value) -> u64 {
        if value.is_undefined() {
            return 0;
        }
        let identity = value
            .as_object()
            .and_then(ObjectRef::function)
            .map(|data| data.identity);
        if let Some(word) = identity.and_then(|id| self.functions.get(&id)) {
            return *word;
        }
        self.values.push(value);
        let word = self.values.len() as u64;
        if let Some(id) = identity {
            self.functions.insert(id, word);
        }
        word
    }

    /// Value behind `word`; unknown words read as `undefined`
    pub fn value(&self, word: u64) -> Value {
        word.checked_sub(1)
            .and_then(|index| self.values.get(index as usize))
            .cloned()
            .unwrap_or_default()
    }

    /// Context for running sites compiled from `unit` against this host
    pub fn call_context(&mut self, unit: &UnlinkedCodeBlock) -> CallContext {
        CallContext::new(self as *mut Self as *mut c_void, unit)
    }

    /// Take an error no handler could catch, raised by the last run
    pub fn take_fatal(&mut self) -> Option<VmError> {
        self.fatal.take()
    }

    /// Run a call and report it in `ctx`
    fn complete(&mut self, ctx: &mut CallContext, result: VmResult<Value>) -> i64 {
        match result {
            Ok(value) => {
                ctx.result = self.word(value);
                STATUS_OK
            }
            Err(err) => self.raise(ctx, err),
        }
    }

    /// Store `err` as the pending exception
    fn raise(&mut self, ctx: &mut CallContext, err: VmError) -> i64 {
        match self.interpreter.error_value(self.context, err) {
            Ok(value) => {
                ctx.exception = self.word(value);
            }
            Err(err) => {
                debug!(error = %err, "uncatchable error in native call");
                ctx.exception = 0;
                self.fatal = Some(err);
            }
        }
        STATUS_EXCEPTION
    }

    fn call(&mut self, callee: &Value, this: Value, args: &[Value], construct: bool) -> VmResult<Value> {
        self.interpreter
            .call_host(self.context, callee, this, args, construct)
    }
}

/// `this` and the arguments a compiled site laid out below `frame`
struct FrameValues {
    callee: Value,
    callee_word: u64,
    this: Value,
    args: Vec<Value>,
}

unsafe fn read_frame(host: &NativeHost<'_>, frame: *const u64) -> FrameValues {
    // SAFETY: the frame header and `argc` slots from `THIS_ARGUMENT` on were
    // written by the compiled site.
    unsafe {
        let callee_word = *frame.offset(CALLEE as isize);
        let argc = *frame.offset(ARGUMENT_COUNT as isize) as isize;
        let this = host.value(*frame.offset(THIS_ARGUMENT as isize));
        let args = (1..argc)
            .map(|i| host.value(*frame.offset(THIS_ARGUMENT as isize + i)))
            .collect();
        FrameValues {
            callee: host.value(callee_word),
            callee_word,
            this,
            args,
        }
    }
}

unsafe fn host<'h>(ctx: *mut CallContext) -> &'h mut NativeHost<'h> {
    // SAFETY: `ctx.host` was set by `NativeHost::call_context`.
    unsafe { &mut *((*ctx).host as *mut NativeHost<'h>) }
}

fn not_callable(callee: &Value, construct: bool) -> VmError {
    let what = if construct {
        "is not a constructor"
    } else {
        "is not a function"
    };
    VmError::type_error(format!("{callee} {what}"))
}

/// Shared body of the linked entries: the site already matched the callee
unsafe fn enter_linked(ctx: *mut CallContext, frame: *mut u64, construct: bool) -> i64 {
    // SAFETY: see the module docs.
    unsafe {
        let host = host(ctx);
        let frame = read_frame(host, frame);
        trace!(callee = frame.callee_word, construct, "native call link hit");
        let result = host.call(&frame.callee, frame.this, &frame.args, construct);
        host.complete(&mut *ctx, result)
    }
}

/// Linked entry of `Call` sites
unsafe extern "C" fn tern_rt_enter_call(ctx: *mut CallContext, frame: *mut u64) -> i64 {
    // SAFETY: called by compiled code with its own context and frame.
    unsafe { enter_linked(ctx, frame, false) }
}

/// Linked entry of `Construct` sites
unsafe extern "C" fn tern_rt_enter_construct(ctx: *mut CallContext, frame: *mut u64) -> i64 {
    // SAFETY: called by compiled code with its own context and frame.
    unsafe { enter_linked(ctx, frame, true) }
}

/// Runtime helper: VirtualCall, the generic call path.
///
/// Signature: `(ctx, frame, info) -> status`
///
/// Dispatches on the callee in the frame header. A callable callee links the
/// site to the entry thunk for its call type, then runs; anything else raises
/// `TypeError` and leaves the record alone.
extern "C" fn tern_rt_virtual_call(ctx: *mut CallContext, frame: i64, info: i64) -> i64 {
    // SAFETY: see the module docs; `info` is the record the site was
    // compiled against and outlives the site.
    unsafe {
        let host = host(ctx);
        let frame = read_frame(host, frame as *const u64);
        let info = CallLinkInfo::retain_raw(info as *const CallLinkInfo);
        let construct = info.call_type().is_construct();
        if !frame.callee.is_callable() {
            let err = not_callable(&frame.callee, construct);
            return host.raise(&mut *ctx, err);
        }
        if host.interpreter.options().call_linking && info.call_type().is_cacheable() {
            let entry: NativeEntry = if construct {
                tern_rt_enter_construct
            } else {
                tern_rt_enter_call
            };
            let state = host
                .interpreter
                .linker()
                .link(&info, frame.callee_word, entry as usize as u64);
            trace!(
                bytecode_offset = info.bytecode_offset(),
                ?state,
                "native call link miss"
            );
        }
        let result = host.call(&frame.callee, frame.this, &frame.args, construct);
        host.complete(&mut *ctx, result)
    }
}

/// Runtime helper: EvalCall.
///
/// Signature: `(ctx, frame, info) -> status`
///
/// The intrinsic `eval` runs its string argument as global code; compiled
/// sites have no interpreter frame whose scope a direct eval could see. Any
/// other callee is called without caching.
extern "C" fn tern_rt_eval_call(ctx: *mut CallContext, frame: i64, _info: i64) -> i64 {
    // SAFETY: see the module docs.
    unsafe {
        let host = host(ctx);
        let frame = read_frame(host, frame as *const u64);
        if !host.context.realm().is_eval(&frame.callee) {
            if !frame.callee.is_callable() {
                let err = not_callable(&frame.callee, false);
                return host.raise(&mut *ctx, err);
            }
            let result = host.call(&frame.callee, frame.this, &frame.args, false);
            return host.complete(&mut *ctx, result);
        }
        let result = match frame.args.first() {
            Some(Value::String(source)) => host.interpreter.indirect_eval(host.context, source),
            other => Ok(other.cloned().unwrap_or_default()),
        };
        host.complete(&mut *ctx, result)
    }
}

/// Runtime helper: VarargsFrameSize.
///
/// Signature: `(ctx, arguments) -> argc including this, or -1`
extern "C" fn tern_rt_varargs_frame_size(ctx: *mut CallContext, arguments: i64) -> i64 {
    // SAFETY: see the module docs.
    unsafe {
        let host = host(ctx);
        let arguments = host.value(arguments as u64);
        match arguments.as_object().and_then(ObjectRef::element_values) {
            Some(values) => values.len() as i64 + 1,
            None => {
                let err = VmError::type_error(format!("{arguments} is not iterable"));
                host.raise(&mut *ctx, err);
                -1
            }
        }
    }
}

/// Runtime helper: VarargsSetup.
///
/// Signature: `(ctx, frame, this, arguments) -> status`
///
/// Fills `this` and the spread elements into the frame sized by
/// [`tern_rt_varargs_frame_size`].
extern "C" fn tern_rt_varargs_setup(ctx: *mut CallContext, frame: i64, this: i64, arguments: i64) -> i64 {
    let frame = frame as *mut u64;
    // SAFETY: see the module docs; the frame has room for the argc the
    // size helper returned.
    unsafe {
        let host = host(ctx);
        let Some(values) = host
            .value(arguments as u64)
            .as_object()
            .and_then(ObjectRef::element_values)
        else {
            let err = VmError::internal("spread arguments changed shape");
            return host.raise(&mut *ctx, err);
        };
        *frame.offset(THIS_ARGUMENT as isize) = this as u64;
        for (i, value) in values.into_iter().enumerate() {
            *frame.offset(THIS_ARGUMENT as isize + 1 + i as isize) = host.word(value);
        }
    }
    STATUS_OK
}

/// Helpers backing call sites compiled for this VM
pub fn runtime_helpers() -> RuntimeHelpers {
    let mut helpers = RuntimeHelpers::new();
    // SAFETY: each function matches the signature documented on its kind.
    unsafe {
        helpers.set(HelperKind::VirtualCall, tern_rt_virtual_call as *const u8);
        helpers.set(HelperKind::EvalCall, tern_rt_eval_call as *const u8);
        helpers.set(
            HelperKind::VarargsFrameSize,
            tern_rt_varargs_frame_size as *const u8,
        );
        helpers.set(HelperKind::VarargsSetup, tern_rt_varargs_setup as *const u8);
    }
    helpers
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmOptions;
    use crate::runtime::VmRuntime;

    #[test]
    fn test_function_words_are_stable() {
        let mut rt = VmRuntime::new(VmOptions::default().with_captured_output(true));
        rt.run("function f() {}").unwrap();
        let f = rt.get_global("f");
        let mut host = rt.native_host();
        let first = host.word(f.clone());
        assert_eq!(host.word(f), first);
        assert_eq!(host.word(Value::Undefined), 0);
        let n = host.word(Value::Number(1.0));
        assert_ne!(n, first);
        assert_eq!(host.value(n).as_number(), Some(1.0));
        assert!(host.value(999).is_undefined());
    }
}
