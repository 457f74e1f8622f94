use tern_compiler::GeneratorConfig;
use tern_vm::{VmError, VmOptions, VmRuntime};

fn options() -> VmOptions {
    VmOptions::default()
        .with_captured_output(true)
        .with_generator(GeneratorConfig::default().with_debug_hooks(false))
}

fn output(source: &str) -> String {
    let mut rt = VmRuntime::new(options());
    rt.run(source).unwrap();
    rt.take_output()
}

#[test]
fn test_try_catch_finally_order() {
    let out = output(
        r#"
        var log = '';
        try { log += 't'; throw 'boom'; log += 'x'; }
        catch (e) { log += 'c' + e; }
        finally { log += 'f'; }
        print(log);
        "#,
    );
    assert_eq!(out, "tcboomf\n");
}

#[test]
fn test_exceptions_cross_frames() {
    let out = output(
        r#"
        function inner() { throw new TypeError('bad'); }
        function middle() { inner(); return 'unreached'; }
        function outer() {
            try { return middle(); } catch (e) { return e instanceof TypeError ? e.message : 'wrong'; }
        }
        print(outer());
        "#,
    );
    assert_eq!(out, "bad\n");
}

#[test]
fn test_engine_errors_are_catchable() {
    let out = output(
        r#"
        var a, b, c, d, u;
        try { missing; } catch (e) { a = e instanceof ReferenceError; }
        try { null.x; } catch (e) { b = e instanceof TypeError; }
        try { u(); } catch (e) { c = e.name; }
        try { 1 in 2; } catch (e) { d = e.name; }
        print(a, b, c, d);
        "#,
    );
    assert_eq!(out, "true true TypeError TypeError\n");
}

#[test]
fn test_finally_runs_on_return_and_rethrow() {
    let out = output(
        r#"
        var log = '';
        function f() { try { return 'r'; } finally { log += 'f1'; } }
        function g() { try { throw 'e'; } finally { log += 'f2'; } }
        var v = f();
        try { g(); } catch (e) { log += 'caught-' + e; }
        print(v, log);
        "#,
    );
    assert_eq!(out, "r f1f2caught-e\n");
}

#[test]
fn test_handler_restores_scope_depth() {
    let out = output(
        r#"
        var o = { x: 'with' };
        var x = 'global';
        function f() {
            try {
                with (o) { throw x; }
            } catch (e) {
                return e + ':' + x;
            }
        }
        print(f());
        "#,
    );
    assert_eq!(out, "with:global\n");
}

#[test]
fn test_catch_binding_shadows_and_disappears() {
    let out = output(
        r#"
        var e = 'outer';
        try { throw 'inner'; } catch (e) { print(e); }
        print(e);
        "#,
    );
    assert_eq!(out, "inner\nouter\n");
}

#[test]
fn test_uncaught_exception_reaches_host() {
    let mut rt = VmRuntime::new(options());
    let err = rt.run("function f() { throw new Error('nope'); } f();").unwrap_err();
    match &err {
        VmError::Exception(thrown) => assert_eq!(thrown.message, "Error: nope"),
        other => panic!("unexpected error {other}"),
    }
    // the runtime stays usable
    let value = rt.run("1 + 1").unwrap();
    assert_eq!(value.as_number(), Some(2.0));
}

#[test]
fn test_runaway_recursion_is_range_error() {
    let mut rt = VmRuntime::new(options().with_max_call_depth(200));
    let out = rt
        .run(
            r#"
            function down(n) { return down(n + 1); }
            var kind;
            try { down(0); } catch (e) { kind = e instanceof RangeError; }
            kind
            "#,
        )
        .unwrap();
    assert!(out.to_boolean());

    let err = rt.run("down(0)").unwrap_err();
    let thrown = err.thrown().unwrap().to_display_string();
    assert_eq!(thrown, "RangeError: Maximum call stack size exceeded");
}

#[test]
fn test_deep_nesting_compiles_to_range_error() {
    let depth = 2_000;
    let source = format!(
        "var caught = 'none'; try {{ var y = {}1{}; }} catch (e) {{ caught = e.name; }} caught",
        "(".repeat(depth),
        " + 1)".repeat(depth)
    );
    let generator = GeneratorConfig::default()
        .with_debug_hooks(false)
        .with_max_depth(200);
    let mut rt = VmRuntime::new(options().with_generator(generator));
    let caught = rt.run(&source).unwrap().to_display_string();
    assert_eq!(caught, "RangeError");
}

#[test]
fn test_unparseably_deep_source_throws_range_error() {
    let handle = std::thread::spawn(|| {
        let depth = 50_000;
        let source = format!("var r = {}1{};", "(".repeat(depth), " + 1)".repeat(depth));
        let mut rt = VmRuntime::new(options());
        let err = rt.run(&source).unwrap_err();
        let thrown = err.thrown().map(|v| v.to_display_string());
        // the runtime survives and keeps working
        let next = rt.run("1 + 1").map(|v| v.to_display_string());
        (thrown, next.map_err(|err| err.to_string()))
    });
    let (thrown, next) = handle.join().unwrap();
    assert_eq!(thrown.as_deref(), Some("RangeError: Maximum call stack size exceeded"));
    assert_eq!(next.unwrap(), "2");
}

#[test]
fn test_deep_eval_source_is_catchable() {
    let out = output(&format!(
        "try {{ eval('{}0{}'); }} catch (e) {{ print(e.name); }}",
        "[".repeat(20_000),
        "]".repeat(20_000)
    ));
    assert_eq!(out, "RangeError\n");
}

#[test]
fn test_static_errors_throw_at_runtime() {
    let out = output(
        r#"
        function f() { 'use strict'; const c = 1; c = 2; return c; }
        try { f(); } catch (e) { print(e.name); }
        "#,
    );
    assert_eq!(out, "TypeError\n");
}

#[test]
fn test_eval_syntax_error_is_catchable() {
    let out = output(
        r#"
        try { eval('var = ;'); } catch (e) { print(e instanceof SyntaxError); }
        "#,
    );
    assert_eq!(out, "true\n");
}
