//! VM runtime - the main entry point
//!
//! Owns one interpreter and one context. Everything a host needs goes
//! through here: compiling and running programs, calling functions, reading
//! globals and retiring compiled code.

use std::rc::Rc;
use std::sync::Arc;

use tern_bytecode::UnlinkedCodeBlock;
use tern_jit::CallLinker;
use tracing::debug;

use crate::code_block::CodeBlock;
use crate::config::VmOptions;
use crate::context::VmContext;
use crate::error::{VmError, VmResult};
use crate::interpreter::Interpreter;
use crate::native::NativeHost;
use crate::object::{Callable, ObjectRef};
use crate::value::Value;

/// The VM runtime
///
/// Single-threaded: values are reference counted without atomics. The call
/// linker is shared behind an `Arc` so a compiler thread can reclaim entries
/// it retires.
#[derive(Debug)]
pub struct VmRuntime {
    interpreter: Interpreter,
    context: VmContext,
}

impl Default for VmRuntime {
    fn default() -> Self {
        Self::new(VmOptions::default())
    }
}

impl VmRuntime {
    /// Create a runtime
    pub fn new(options: VmOptions) -> Self {
        let linker = Arc::new(CallLinker::new(options.thrash_limit));
        Self {
            interpreter: Interpreter::new(options, linker),
            context: VmContext::new(options.capture_output),
        }
    }

    /// Compile and run a program, returning its completion value
    pub fn run(&mut self, source: &str) -> VmResult<Value> {
        let code = self.compile(source)?;
        self.execute(&code)
    }

    /// Compile and link a program without running it
    pub fn compile(&mut self, source: &str) -> VmResult<Rc<CodeBlock>> {
        let unit = self.interpreter.compile(source)?;
        Ok(self.link(unit))
    }

    /// Link an already generated unit
    pub fn link(&mut self, unit: Arc<UnlinkedCodeBlock>) -> Rc<CodeBlock> {
        let code = Rc::new(CodeBlock::link(unit, self.context.next_word()));
        self.interpreter.register_code(&mut self.context, &code);
        code
    }

    /// Run linked global code
    pub fn execute(&mut self, code: &Rc<CodeBlock>) -> VmResult<Value> {
        self.interpreter.execute(&mut self.context, code)
    }

    /// Link and run a generated unit
    pub fn run_unit(&mut self, unit: Arc<UnlinkedCodeBlock>) -> VmResult<Value> {
        let code = self.link(unit);
        self.execute(&code)
    }

    /// Call `function` with `this` and `args`
    pub fn call(&mut self, function: &Value, this: Value, args: &[Value]) -> VmResult<Value> {
        self.interpreter
            .call_function(&mut self.context, function, this, args)
    }

    /// Read a property of the global object
    pub fn get_global(&self, name: &str) -> Value {
        self.context.realm().global().get_data(name)
    }

    /// Host for natively compiled call sites running against this runtime
    pub fn native_host(&mut self) -> NativeHost<'_> {
        NativeHost::new(&mut self.interpreter, &mut self.context)
    }

    /// The global object
    pub fn global(&self) -> &ObjectRef {
        self.context.realm().global()
    }

    /// Captured `print` output
    pub fn output(&self) -> &str {
        self.context.output()
    }

    /// Take the captured output
    pub fn take_output(&mut self) -> String {
        self.context.take_output()
    }

    /// The call linker
    pub fn linker(&self) -> &Arc<CallLinker> {
        self.interpreter.linker()
    }

    /// Active options
    pub fn options(&self) -> &VmOptions {
        self.interpreter.options()
    }

    /// Entry words currently registered, host functions included
    pub fn registered_entries(&self) -> usize {
        self.context.entry_count()
    }

    /// Linked code of a bytecode function
    pub fn function_code(&self, function: &Value) -> VmResult<Rc<CodeBlock>> {
        let data = function
            .as_object()
            .and_then(ObjectRef::function)
            .ok_or_else(|| VmError::type_error(format!("{function} is not a function")))?;
        match data.callable {
            Callable::Closure { code, .. } => Ok(code),
            Callable::Native(_) => Err(VmError::type_error(format!(
                "{} is a host function",
                function
                    .as_object()
                    .map(ObjectRef::function_name)
                    .unwrap_or_default()
            ))),
        }
    }

    /// Retire the entry of `function`'s code as if it had been recompiled:
    /// every call site caching it is unlinked. Returns how many were.
    pub fn reclaim_code(&mut self, function: &Value) -> VmResult<usize> {
        let code = self.function_code(function)?;
        let unlinked = self.interpreter.reclaim_code(&mut self.context, &code);
        debug!(function = code.name(), unlinked, "reclaimed function code");
        Ok(unlinked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> VmRuntime {
        VmRuntime::new(VmOptions::default().with_captured_output(true))
    }

    #[test]
    fn test_run_and_read_globals() {
        let mut rt = runtime();
        let value = rt.run("var answer = 6 * 7; answer").unwrap();
        assert_eq!(value.as_number(), Some(42.0));
        assert_eq!(rt.get_global("answer").as_number(), Some(42.0));
    }

    #[test]
    fn test_call_from_host() {
        let mut rt = runtime();
        rt.run("function add(a, b) { return a + b; }").unwrap();
        let add = rt.get_global("add");
        let sum = rt
            .call(&add, Value::Undefined, &[Value::Number(2.0), Value::Number(3.0)])
            .unwrap();
        assert_eq!(sum.as_number(), Some(5.0));
    }

    #[test]
    fn test_print_is_captured() {
        let mut rt = runtime();
        rt.run("print('a', 1, true)").unwrap();
        assert_eq!(rt.take_output(), "a 1 true\n");
    }

    #[test]
    fn test_function_code_rejects_host_functions() {
        let rt = runtime();
        assert!(rt.function_code(&rt.get_global("print")).is_err());
        assert!(rt.function_code(&Value::Number(1.0)).is_err());
    }
}
