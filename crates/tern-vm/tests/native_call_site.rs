use std::sync::Arc;

use tern_bytecode::{Instruction, Register, UnlinkedCodeBlock};
use tern_compiler::GeneratorConfig;
use tern_jit::{
    CallContext, CallLinkInfo, CallSiteCompiler, CompiledCallSite, LinkState, STATUS_EXCEPTION,
    STATUS_OK,
};
use tern_vm::{NativeHost, Value, VmOptions, VmRuntime, runtime_helpers};

fn options() -> VmOptions {
    VmOptions::default()
        .with_captured_output(true)
        .with_call_linking(true)
        .with_generator(GeneratorConfig::default().with_debug_hooks(false))
}

/// First call instruction of a VM function, compiled to native code
struct Site {
    compiled: CompiledCallSite,
    unit: Arc<UnlinkedCodeBlock>,
    pc: usize,
    info: Arc<CallLinkInfo>,
    _compiler: CallSiteCompiler,
}

impl Site {
    fn of(rt: &VmRuntime, function: &str) -> Self {
        let code = rt.function_code(&rt.get_global(function)).unwrap();
        let unit = Arc::clone(code.unit());
        let pc = unit.instructions.iter().position(Instruction::is_call).unwrap();
        let info = CallLinkInfo::for_instructions(&unit.instructions, unit.num_call_sites)
            .into_iter()
            .find(|info| info.bytecode_offset() == pc as u32)
            .unwrap();
        let mut compiler = CallSiteCompiler::new(runtime_helpers()).unwrap();
        let compiled = compiler.compile(&unit, pc, Arc::clone(&info)).unwrap();
        Self {
            compiled,
            unit,
            pc,
            info,
            _compiler: compiler,
        }
    }

    fn instruction(&self) -> Instruction {
        self.unit.instructions[self.pc].clone()
    }

    fn dst(&self) -> Register {
        match self.instruction() {
            Instruction::Call { dst, .. }
            | Instruction::CallEval { dst, .. }
            | Instruction::Construct { dst, .. }
            | Instruction::CallVarargs { dst, .. }
            | Instruction::ConstructVarargs { dst, .. } => dst,
            other => panic!("not a call: {other:?}"),
        }
    }

    fn handler(&self) -> i64 {
        self.unit
            .exception_handlers
            .lookup(self.pc as u32)
            .map_or(-1, |handler| handler.target as i64)
    }
}

#[repr(C, align(16))]
struct Stack([u64; 512]);

const FP: usize = 256;

/// Register file of the frame running the compiled site
struct Frame(Box<Stack>);

impl Frame {
    fn new() -> Self {
        Self(Box::new(Stack([0; 512])))
    }

    fn set(&mut self, register: Register, word: u64) {
        self.0.0[(FP as i32 + register.index()) as usize] = word;
    }

    fn get(&self, register: Register) -> u64 {
        self.0.0[(FP as i32 + register.index()) as usize]
    }

    /// Fill the callee, `this` and argument registers of a fixed-arity call
    fn prepare(&mut self, site: &Site, host: &mut NativeHost<'_>, callee: &Value, args: &[Value]) {
        let (callee_reg, this_arg, argc) = match site.instruction() {
            Instruction::Call { callee, this_arg, argc, .. }
            | Instruction::CallEval { callee, this_arg, argc, .. }
            | Instruction::Construct { callee, this_arg, argc, .. } => (callee, this_arg, argc),
            other => panic!("not a fixed call: {other:?}"),
        };
        assert_eq!(argc as usize, args.len() + 1);
        self.set(callee_reg, host.word(callee.clone()));
        self.set(this_arg, 0);
        for (i, arg) in args.iter().enumerate() {
            self.set(this_arg.offset(i as i32 + 1), host.word(arg.clone()));
        }
    }

    fn run(&mut self, site: &Site, host: &mut NativeHost<'_>) -> (i64, CallContext) {
        let mut ctx = host.call_context(&site.unit);
        let fp = self.0.0.as_mut_ptr().wrapping_add(FP);
        let status = unsafe { site.compiled.invoke(&mut ctx, fp) };
        (status, ctx)
    }

    fn result(&self, site: &Site, host: &NativeHost<'_>) -> Value {
        host.value(self.get(site.dst()))
    }
}

#[test]
fn test_compiled_site_calls_vm_functions_and_links() {
    let mut rt = VmRuntime::new(options());
    rt.run(
        r#"
        function add(a, b) { return a + b; }
        function mul(a, b) { return a * b; }
        function f(g, a, b) { return g(a, b); }
        "#,
    )
    .unwrap();
    let site = Site::of(&rt, "f");
    let (add, mul) = (rt.get_global("add"), rt.get_global("mul"));
    let linker = Arc::clone(rt.linker());
    let mut frame = Frame::new();
    let mut host = rt.native_host();

    for _ in 0..3 {
        frame.prepare(&site, &mut host, &add, &[Value::Number(2.0), Value::Number(3.0)]);
        let (status, _) = frame.run(&site, &mut host);
        assert_eq!(status, STATUS_OK);
        assert_eq!(frame.result(&site, &host).as_number(), Some(5.0));
    }
    assert_eq!(site.info.state(), LinkState::Linked);
    let add_word = host.word(add.clone());
    let entry = site.info.lookup(add_word).unwrap();
    assert_eq!(linker.linked_sites(entry), 1);

    frame.prepare(&site, &mut host, &mul, &[Value::Number(3.0), Value::Number(4.0)]);
    let (status, _) = frame.run(&site, &mut host);
    assert_eq!(status, STATUS_OK);
    assert_eq!(frame.result(&site, &host).as_number(), Some(12.0));
    assert_eq!(site.info.state(), LinkState::Relinked);
    assert_eq!(site.info.lookup(add_word), None);
    assert_eq!(site.info.lookup(host.word(mul.clone())), Some(entry));
    assert!(host.take_fatal().is_none());
}

#[test]
fn test_non_callable_throws_without_linking() {
    let mut rt = VmRuntime::new(options());
    rt.run("function f(g) { try { return g(1); } catch (e) { return e; } }")
        .unwrap();
    let site = Site::of(&rt, "f");
    let mut frame = Frame::new();
    let mut host = rt.native_host();

    frame.prepare(&site, &mut host, &Value::Number(1.0), &[Value::Number(1.0)]);
    let (status, ctx) = frame.run(&site, &mut host);
    assert_eq!(status, STATUS_EXCEPTION);
    let message = host.value(ctx.exception).to_display_string();
    assert!(message.starts_with("TypeError"), "{message}");
    assert!(message.contains("is not a function"), "{message}");
    assert_eq!(ctx.handler, site.handler());
    assert!(ctx.handler >= 0);
    assert_eq!(site.info.state(), LinkState::Unlinked);
}

#[test]
fn test_thrown_values_reach_the_handler() {
    let mut rt = VmRuntime::new(options());
    rt.run(
        r#"
        function boom(x) { throw x * 7; }
        function f(g) { try { return g(1); } catch (e) { return e; } }
        "#,
    )
    .unwrap();
    let site = Site::of(&rt, "f");
    let boom = rt.get_global("boom");
    let mut frame = Frame::new();
    let mut host = rt.native_host();

    for _ in 0..2 {
        frame.prepare(&site, &mut host, &boom, &[Value::Number(6.0)]);
        let (status, ctx) = frame.run(&site, &mut host);
        assert_eq!(status, STATUS_EXCEPTION);
        assert_eq!(host.value(ctx.exception).as_number(), Some(42.0));
        assert_eq!(ctx.handler, site.handler());
    }
    // the second throw came through the linked entry
    assert_eq!(site.info.state(), LinkState::Linked);
    assert_eq!(site.info.relink_count(), 0);
}

#[test]
fn test_construct_site_builds_objects() {
    let mut rt = VmRuntime::new(options());
    rt.run(
        r#"
        function Point(x) { this.x = x; }
        function f(C, a) { return new C(a); }
        "#,
    )
    .unwrap();
    let site = Site::of(&rt, "f");
    assert!(matches!(site.instruction(), Instruction::Construct { .. }));
    let (point, print) = (rt.get_global("Point"), rt.get_global("print"));
    let mut frame = Frame::new();
    let mut host = rt.native_host();

    for x in [9.0, 10.0] {
        frame.prepare(&site, &mut host, &point, &[Value::Number(x)]);
        let (status, _) = frame.run(&site, &mut host);
        assert_eq!(status, STATUS_OK);
        let object = frame.result(&site, &host);
        let object = object.as_object().unwrap();
        assert_eq!(object.get_data("x").as_number(), Some(x));
    }
    assert_eq!(site.info.state(), LinkState::Linked);

    frame.prepare(&site, &mut host, &print, &[Value::Number(1.0)]);
    let (status, ctx) = frame.run(&site, &mut host);
    assert_eq!(status, STATUS_EXCEPTION);
    let message = host.value(ctx.exception).to_display_string();
    assert!(message.contains("is not a constructor"), "{message}");
}

#[test]
fn test_varargs_site_spreads_vm_arrays() {
    let mut rt = VmRuntime::new(options());
    rt.run(
        r#"
        function sum(a, b, c) { return a + b + c; }
        var xs = [1, 2, 3];
        function f(g, xs) { return g(...xs); }
        "#,
    )
    .unwrap();
    let site = Site::of(&rt, "f");
    let Instruction::CallVarargs { callee, this_value, arguments, .. } = site.instruction() else {
        panic!("expected a varargs call");
    };
    let (sum, xs) = (rt.get_global("sum"), rt.get_global("xs"));
    let mut frame = Frame::new();
    let mut host = rt.native_host();

    let sum_word = host.word(sum);
    let xs_word = host.word(xs);
    frame.set(callee, sum_word);
    frame.set(this_value, 0);
    frame.set(arguments, xs_word);
    let (status, _) = frame.run(&site, &mut host);
    assert_eq!(status, STATUS_OK);
    assert_eq!(frame.result(&site, &host).as_number(), Some(6.0));

    let five = host.word(Value::Number(5.0));
    frame.set(arguments, five);
    let (status, ctx) = frame.run(&site, &mut host);
    assert_eq!(status, STATUS_EXCEPTION);
    let message = host.value(ctx.exception).to_display_string();
    assert!(message.starts_with("TypeError"), "{message}");
    assert_eq!(site.info.state(), LinkState::Unlinked);
}

#[test]
fn test_eval_site_runs_global_code() {
    let mut rt = VmRuntime::new(options());
    rt.run(
        r#"
        var k = 6;
        function id(x) { return x; }
        function f() { return eval('1'); }
        "#,
    )
    .unwrap();
    let site = Site::of(&rt, "f");
    assert!(matches!(site.instruction(), Instruction::CallEval { .. }));
    let (eval, id) = (rt.get_global("eval"), rt.get_global("id"));
    let mut frame = Frame::new();
    let mut host = rt.native_host();

    frame.prepare(&site, &mut host, &eval, &[Value::string("k * 7")]);
    let (status, _) = frame.run(&site, &mut host);
    assert_eq!(status, STATUS_OK);
    assert_eq!(frame.result(&site, &host).as_number(), Some(42.0));

    // a shadowed eval is an ordinary call
    frame.prepare(&site, &mut host, &id, &[Value::string("k * 7")]);
    let (status, _) = frame.run(&site, &mut host);
    assert_eq!(status, STATUS_OK);
    assert_eq!(frame.result(&site, &host).as_str(), Some("k * 7"));
    assert_eq!(site.info.state(), LinkState::Unlinked);
}
