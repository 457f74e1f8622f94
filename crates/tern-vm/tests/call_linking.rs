use std::rc::Rc;
use std::sync::Arc;

use tern_compiler::GeneratorConfig;
use tern_jit::{CallType, LinkState};
use tern_vm::{CodeBlock, Value, VmError, VmOptions, VmRuntime};

fn options() -> VmOptions {
    VmOptions::default()
        .with_captured_output(true)
        .with_call_linking(true)
        .with_generator(GeneratorConfig::default().with_debug_hooks(false))
}

fn code_of(rt: &VmRuntime, name: &str) -> Rc<CodeBlock> {
    rt.function_code(&rt.get_global(name)).unwrap()
}

#[test]
fn test_monomorphic_site_links_once() {
    let mut rt = VmRuntime::new(options());
    let result = rt
        .run(
            r#"
            function inc(x) { return x + 1; }
            function loop(n) { var s = 0; for (var i = 0; i < n; i++) s = inc(s); return s; }
            loop(1000)
            "#,
        )
        .unwrap();
    assert_eq!(result.as_number(), Some(1000.0));

    let code = code_of(&rt, "loop");
    let site = &code.call_links()[0];
    assert_eq!(site.call_type(), CallType::Call);
    assert_eq!(site.state(), LinkState::Linked);
    assert_eq!(site.relink_count(), 0);
    assert_eq!(site.target(), code_of(&rt, "inc").entry());
    assert_eq!(rt.linker().linked_sites(site.target()), 1);
}

#[test]
fn test_alternating_callees_go_generic() {
    let mut rt = VmRuntime::new(options().with_thrash_limit(2));
    let result = rt
        .run(
            r#"
            function one() { return 1; }
            function two() { return 2; }
            var fs = [one, two];
            function loop(n) { var s = 0; for (var i = 0; i < n; i++) s += fs[i % 2](); return s; }
            loop(100)
            "#,
        )
        .unwrap();
    assert_eq!(result.as_number(), Some(150.0));

    let code = code_of(&rt, "loop");
    let site = &code.call_links()[0];
    assert_eq!(site.state(), LinkState::PermanentlyGeneric);
    assert_eq!(site.relink_count(), 2);
    assert_eq!(site.target(), 0);
}

#[test]
fn test_single_switch_is_a_relink() {
    let mut rt = VmRuntime::new(options());
    rt.run(
        r#"
        function a() { return 'a'; }
        function b() { return 'b'; }
        var f = a;
        function call() { return f(); }
        call(); call();
        f = b;
        call(); call();
        "#,
    )
    .unwrap();
    let code = code_of(&rt, "call");
    let site = &code.call_links()[0];
    assert_eq!(site.state(), LinkState::Relinked);
    assert_eq!(site.relink_count(), 1);
    assert_eq!(site.target(), code_of(&rt, "b").entry());
}

#[test]
fn test_reclaim_unlinks_and_relinks() {
    let mut rt = VmRuntime::new(options());
    rt.run(
        r#"
        function target(x) { return x * 2; }
        function caller(x) { return target(x); }
        caller(1);
        "#,
    )
    .unwrap();
    let site = Arc::clone(&code_of(&rt, "caller").call_links()[0]);
    assert_eq!(site.state(), LinkState::Linked);
    let old_entry = site.target();

    let unlinked = rt.reclaim_code(&rt.get_global("target")).unwrap();
    assert_eq!(unlinked, 1);
    assert_eq!(site.state(), LinkState::Unlinked);
    assert_eq!(site.target(), 0);
    assert_eq!(rt.linker().linked_sites(old_entry), 0);

    let value = rt.run("caller(21)").unwrap();
    assert_eq!(value.as_number(), Some(42.0));
    assert_eq!(site.state(), LinkState::Linked);
    let new_entry = code_of(&rt, "target").entry();
    assert_ne!(new_entry, old_entry);
    assert_eq!(site.target(), new_entry);
}

#[test]
fn test_eval_and_varargs_sites_never_link() {
    let mut rt = VmRuntime::new(options());
    rt.run(
        r#"
        function id(x) { return x; }
        function ev() { return eval('1') + eval('2'); }
        function spread(xs) { return id(...xs); }
        for (var i = 0; i < 5; i++) { ev(); spread([i]); }
        "#,
    )
    .unwrap();

    for name in ["ev", "spread"] {
        let code = code_of(&rt, name);
        for site in code.call_links() {
            assert!(!site.call_type().is_cacheable(), "{name}: {:?}", site.call_type());
            assert_eq!(site.state(), LinkState::Unlinked);
        }
    }
}

#[test]
fn test_host_functions_link() {
    let mut rt = VmRuntime::new(options());
    rt.run("function p() { print('x'); } p(); p(); p();").unwrap();
    assert_eq!(rt.take_output(), "x\nx\nx\n");
    let code = code_of(&rt, "p");
    let site = &code.call_links()[0];
    assert_eq!(site.state(), LinkState::Linked);
}

#[test]
fn test_non_callable_miss_keeps_cache() {
    let mut rt = VmRuntime::new(options());
    rt.run(
        r#"
        function good() { return 1; }
        var f = good;
        function call() { return f(); }
        call();
        "#,
    )
    .unwrap();
    let code = code_of(&rt, "call");
    let site = &code.call_links()[0];
    let before = (site.state(), site.expected_callee(), site.target());

    let err = rt.run("f = 42; call();").unwrap_err();
    let thrown = err.thrown().unwrap().to_display_string();
    assert!(thrown.starts_with("TypeError"), "{thrown}");
    assert!(matches!(err, VmError::Exception(_)));
    assert_eq!((site.state(), site.expected_callee(), site.target()), before);

    let value = rt.run("f = good; call()").unwrap();
    assert_eq!(value.as_number(), Some(1.0));
    assert_eq!(site.state(), LinkState::Linked);
}

#[test]
fn test_disabled_linking_stays_unlinked() {
    let mut rt = VmRuntime::new(options().with_call_linking(false));
    let value = rt
        .run("function f() { return 2; } function g() { return f() + f(); } g()")
        .unwrap();
    assert_eq!(value.as_number(), Some(4.0));
    let code = code_of(&rt, "g");
    assert!(code
        .call_links()
        .iter()
        .all(|site| site.state() == LinkState::Unlinked));
}

#[test]
fn test_host_call_uses_no_site() {
    let mut rt = VmRuntime::new(options());
    rt.run("function f(x) { return x; }").unwrap();
    let f = rt.get_global("f");
    for i in 0..3 {
        let v = rt.call(&f, Value::Undefined, &[Value::Number(f64::from(i))]).unwrap();
        assert_eq!(v.as_number(), Some(f64::from(i)));
    }
    assert_eq!(rt.linker().linked_sites(code_of(&rt, "f").entry()), 0);
}

#[test]
fn test_sites_of_dropped_eval_code_do_not_accumulate() {
    let mut rt = VmRuntime::new(options());
    let value = rt
        .run(
            r#"
            function f(x) { return x; }
            var sum = 0;
            for (var i = 0; i < 5000; i++) sum += eval('f(i)');
            sum
            "#,
        )
        .unwrap();
    assert_eq!(value.as_number(), Some(12_497_500.0));

    let entry = code_of(&rt, "f").entry();
    assert!(rt.linker().registered_sites(entry) <= 2);
    assert_eq!(rt.linker().linked_sites(entry), 0);
}

#[test]
fn test_entries_of_dropped_functions_are_swept() {
    let mut rt = VmRuntime::new(options());
    let baseline = rt.registered_entries();
    let value = rt
        .run(
            r#"
            var total = 0;
            for (var i = 0; i < 2000; i++) total += eval('function h() { return 1; } h()');
            total
            "#,
        )
        .unwrap();
    assert_eq!(value.as_number(), Some(2000.0));
    assert!(
        rt.registered_entries() < baseline + 300,
        "{} entries registered",
        rt.registered_entries()
    );
    // the surviving definition still runs and links
    let h = rt.get_global("h");
    assert_eq!(rt.call(&h, Value::Undefined, &[]).unwrap().as_number(), Some(1.0));
    assert_eq!(rt.run("h() + h()").unwrap().as_number(), Some(2.0));
}
