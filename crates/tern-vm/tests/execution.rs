use tern_compiler::GeneratorConfig;
use tern_vm::{Value, VmOptions, VmRuntime};

fn runtime() -> VmRuntime {
    VmRuntime::new(
        VmOptions::default()
            .with_captured_output(true)
            .with_generator(GeneratorConfig::default().with_debug_hooks(false)),
    )
}

fn eval_number(source: &str) -> f64 {
    let mut rt = runtime();
    rt.run(source)
        .unwrap()
        .as_number()
        .unwrap_or_else(|| panic!("not a number: {source}"))
}

fn output(source: &str) -> String {
    let mut rt = runtime();
    rt.run(source).unwrap();
    rt.take_output()
}

#[test]
fn test_function_call() {
    assert_eq!(eval_number("function f(a, b) { return a + b; } f(2, 3)"), 5.0);
}

#[test]
fn test_recursion() {
    let source = "function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); } fib(15)";
    assert_eq!(eval_number(source), 610.0);
}

#[test]
fn test_closures_share_captured_state() {
    let source = r#"
        function counter() {
            var n = 0;
            return { inc: function () { n = n + 1; return n; }, get: function () { return n; } };
        }
        var c = counter();
        c.inc(); c.inc(); c.inc();
        c.get()
    "#;
    assert_eq!(eval_number(source), 3.0);
}

#[test]
fn test_named_function_expression_sees_itself() {
    let source = "var f = function fact(n) { return n <= 1 ? 1 : n * fact(n - 1); }; f(5)";
    assert_eq!(eval_number(source), 120.0);
}

#[test]
fn test_missing_and_extra_arguments() {
    let out = output(
        r#"
        function f(a, b, c) { print(a, b, c, arguments.length); }
        f(1);
        f(1, 2, 3, 4, 5);
        function g() { return arguments[1]; }
        print(g('x', 'y'));
        "#,
    );
    assert_eq!(out, "1 undefined undefined 1\n1 2 3 5\ny\n");
}

#[test]
fn test_materialized_arguments_are_unmapped() {
    let out = output(
        r#"
        function captured(a) { function g() { return a; } a = 2; return arguments[0] + ',' + g(); }
        function escaped(a) { var args = arguments; a = 2; args[0] = 3; return args[0] + ',' + a; }
        function direct(a) { a = 2; return arguments[0]; }
        print(captured(1));
        print(escaped(1));
        print(direct(1));
        print(direct());
        "#,
    );
    assert_eq!(out, "1,2\n3,2\n2\nundefined\n");
}

#[test]
fn test_loops_and_switch() {
    let source = r#"
        var total = 0;
        for (var i = 0; i < 10; i++) {
            switch (i % 4) {
                case 0: total += 1; break;
                case 1: total += 10; break;
                case 2: continue;
                default: total += 100;
            }
        }
        total
    "#;
    // i % 4 over 0..10: 0,1,2,3,0,1,2,3,0,1
    assert_eq!(eval_number(source), 3.0 + 30.0 + 200.0);
}

#[test]
fn test_string_switch() {
    let out = output(
        r#"
        function kind(x) {
            switch (x) { case 'a': return 1; case 'b': return 2; default: return 0; }
        }
        print(kind('a'), kind('b'), kind('z'));
        "#,
    );
    assert_eq!(out, "1 2 0\n");
}

#[test]
fn test_for_in_over_objects_and_arrays() {
    let out = output(
        r#"
        var o = { a: 1, b: 2 };
        var keys = '';
        for (var k in o) keys += k;
        var arr = [10, 20, 30];
        var sum = 0;
        for (var i in arr) sum += arr[i];
        for (var n in null) sum = -1;
        print(keys, sum);
        "#,
    );
    assert_eq!(out, "ab 60\n");
}

#[test]
fn test_for_in_skips_deleted_keys() {
    let out = output(
        r#"
        var o = { a: 1, b: 2, c: 3 };
        var seen = '';
        for (var k in o) { delete o.b; seen += k; }
        print(seen);
        "#,
    );
    assert_eq!(out, "ac\n");
}

#[test]
fn test_accessors() {
    let out = output(
        r#"
        var log = '';
        var o = {
            _v: 1,
            get v() { return this._v * 2; },
            set v(x) { log += 'set' + x; this._v = x; }
        };
        o.v = 5;
        print(o.v, log);
        "#,
    );
    assert_eq!(out, "10 set5\n");
}

#[test]
fn test_constructors_and_prototypes() {
    let out = output(
        r#"
        function Point(x, y) { this.x = x; this.y = y; }
        var p = new Point(1, 2);
        print(p.x + p.y, p instanceof Point, p.constructor === Point);
        function Boxed() { return { boxed: true }; }
        print(new Boxed().boxed);
        "#,
    );
    assert_eq!(out, "3 true true\ntrue\n");
}

#[test]
fn test_spread_calls() {
    let out = output(
        r#"
        function sum(a, b, c) { return a + b + c; }
        var xs = [2, 3];
        print(sum(1, ...xs));
        function P(a, b) { this.v = a * b; }
        print(new P(...xs).v);
        "#,
    );
    assert_eq!(out, "6\n6\n");
}

#[test]
fn test_direct_eval_sees_locals() {
    let out = output(
        r#"
        function f(a) { var b = 2; return eval('a + b'); }
        function g() { eval('var late = 7'); return late; }
        print(f(1), g());
        "#,
    );
    assert_eq!(out, "3 7\n");
}

#[test]
fn test_indirect_eval_is_global() {
    let out = output(
        r#"
        var x = 'global';
        function f() { var x = 'local'; var e = eval; return e('x'); }
        print(f());
        "#,
    );
    assert_eq!(out, "global\n");
}

#[test]
fn test_strict_eval_keeps_its_vars() {
    let mut rt = runtime();
    rt.run("'use strict'; eval('var hidden = 1');").unwrap();
    assert!(rt.get_global("hidden").is_undefined());
    rt.run("eval('var shown = 1');").unwrap();
    assert_eq!(rt.get_global("shown").as_number(), Some(1.0));
}

#[test]
fn test_with_statement() {
    let out = output(
        r#"
        var o = { x: 1 };
        var x = 'outer';
        with (o) { x = 2; }
        print(o.x, x);
        "#,
    );
    assert_eq!(out, "2 outer\n");
}

#[test]
fn test_typeof_and_delete() {
    let out = output(
        r#"
        var o = { a: 1 };
        print(typeof o, typeof o.a, typeof print, typeof nothing, delete o.a, 'a' in o);
        "#,
    );
    assert_eq!(out, "object number function undefined true false\n");
}

#[test]
fn test_host_call_of_closure() {
    let mut rt = runtime();
    rt.run("var base = 10; function add(x) { return base + x + this.k; }")
        .unwrap();
    let this = Value::Object(rt.global().clone());
    rt.run("var k = 100;").unwrap();
    let add = rt.get_global("add");
    let result = rt.call(&add, this, &[Value::Number(1.0)]).unwrap();
    assert_eq!(result.as_number(), Some(111.0));
}

#[test]
fn test_globals_persist_across_runs() {
    let mut rt = runtime();
    rt.run("var n = 1; function bump() { n = n * 3; }").unwrap();
    rt.run("bump(); bump();").unwrap();
    assert_eq!(rt.get_global("n").as_number(), Some(9.0));
}

mod properties {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn interpreted_arithmetic_matches_host(a in -1000i32..1000, b in 1i32..1000) {
            let source = format!(
                "function f(a, b) {{ return [a + b, a - b, a * b, a % b, a & b, a | b, a ^ b]; }} \
                 f({a}, {b})"
            );
            let mut rt = runtime();
            let value = rt.run(&source).unwrap();
            let array = value.as_object().unwrap().element_values().unwrap();
            let got: Vec<f64> = array.iter().map(|v| v.as_number().unwrap()).collect();
            let expected = vec![
                f64::from(a + b),
                f64::from(a - b),
                f64::from(a * b),
                f64::from(a % b),
                f64::from(a & b),
                f64::from(a | b),
                f64::from(a ^ b),
            ];
            prop_assert_eq!(got, expected);
        }
    }
}
