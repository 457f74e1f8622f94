use std::sync::Arc;

use tern_bytecode::{
    CodeKind, Identifier, Instruction, Opcode, Register, UnlinkedCodeBlock, VariableStorage,
};
use tern_compiler::{CompileError, Compiler, GeneratorConfig};

fn compiler() -> Compiler {
    Compiler::with_config(GeneratorConfig::default().with_debug_hooks(false))
}

fn first_function(source: &str) -> Arc<UnlinkedCodeBlock> {
    let program = compiler()
        .compile_program(source)
        .unwrap_or_else(|e| panic!("compile failed: {e}"));
    program.functions[0].clone()
}

fn opcodes(unit: &UnlinkedCodeBlock) -> Vec<Opcode> {
    unit.instructions.iter().map(|i| i.opcode()).collect()
}

fn has(unit: &UnlinkedCodeBlock, opcode: Opcode) -> bool {
    unit.instructions.iter().any(|i| i.opcode() == opcode)
}

#[test]
fn test_add_and_return() {
    let f = first_function("function f(a, b) { return a + b; }");
    assert_eq!(f.kind, CodeKind::Function);
    assert_eq!(f.num_parameters, 3);
    match f.instructions.as_slice() {
        [
            Instruction::Add { dst, lhs, rhs },
            Instruction::Return { value },
        ] => {
            assert_eq!(*lhs, Register::argument(1));
            assert_eq!(*rhs, Register::argument(2));
            assert_eq!(dst, value);
            assert!(dst.is_local());
        }
        other => panic!("unexpected instructions: {other:?}"),
    }
    assert!(!f.flags.materializes_arguments);
    assert!(f.arguments_register.is_none());
    f.validate().unwrap();
}

#[test]
fn test_locals_resolve_to_registers() {
    let f = first_function(
        "function f(a) { var x = a * 2; var y = x + 1; for (var i = 0; i < y; i++) x += i; return x; }",
    );
    assert!(!f.symbol_table.is_empty());
    for (name, entry) in f.symbol_table.iter() {
        assert!(
            matches!(entry.storage, VariableStorage::Register(_)),
            "{} should live in a register",
            name.as_str()
        );
    }
    assert!(!has(&f, Opcode::ResolveScope));
    assert!(!has(&f, Opcode::GetScope));
    assert!(!f.flags.needs_activation);
}

#[test]
fn test_captured_local_is_never_a_temporary() {
    let f = first_function("function f() { var x = 1; var y = 2; return function () { return x + y; }; }");
    let x = f.symbol_table.get(&Identifier::new("x")).unwrap();
    assert!(x.is_captured());
    assert!(f.flags.needs_activation);
    let Some(activation) = f.activation_register else {
        panic!("no activation register");
    };

    // Initializers write the activation, never a frame slot standing in for x.
    let stores: Vec<u32> = f
        .instructions
        .iter()
        .filter_map(|i| match *i {
            Instruction::PutClosureVar { scope, slot, .. } if scope == activation => Some(slot),
            _ => None,
        })
        .collect();
    assert_eq!(stores, [0, 1]);

    let inner = &f.functions[0];
    assert!(has(inner, Opcode::GetFromScope));
}

#[test]
fn test_arguments_length_reads_frame() {
    let f = first_function("function f() { return arguments.length; }");
    assert!(has(&f, Opcode::GetArgumentCount));
    assert!(!has(&f, Opcode::CreateArguments));

    let g = first_function("function g() { return arguments; }");
    assert!(has(&g, Opcode::CreateArguments));
    assert!(g.flags.materializes_arguments);
}

#[test]
fn test_typeof_comparison_is_a_type_test() {
    let f = first_function("function f(x) { return typeof x == 'string'; }");
    assert!(has(&f, Opcode::IsString));
    assert!(!has(&f, Opcode::TypeOf));

    let g = first_function("function g(x) { return 'number' === typeof x; }");
    assert!(has(&g, Opcode::IsNumber));
}

#[test]
fn test_call_sites_are_numbered() {
    let f = first_function("function f(g, o) { g(); o.m(1); new g(2); }");
    assert_eq!(f.num_call_sites, 3);
    let links: Vec<u32> = f
        .instructions
        .iter()
        .filter_map(|i| match *i {
            Instruction::Call { link, .. } | Instruction::Construct { link, .. } => Some(link.index()),
            _ => None,
        })
        .collect();
    assert_eq!(links, [0, 1, 2]);
}

#[test]
fn test_member_call_passes_base_as_this() {
    let f = first_function("function f(o) { return o.m(1, 2); }");
    let call = f
        .instructions
        .iter()
        .find_map(|i| match *i {
            Instruction::Call { this_arg, argc, .. } => Some((this_arg, argc)),
            _ => None,
        })
        .unwrap();
    assert_eq!(call.1, 3);
    assert!(f.instructions.iter().any(|i| matches!(
        *i,
        Instruction::Mov { dst, src } if dst == call.0 && src == Register::argument(1)
    )));
}

#[test]
fn test_direct_eval() {
    let f = first_function("function f() { return eval('1'); }");
    assert!(has(&f, Opcode::CallEval));
    assert!(f.flags.uses_eval);

    // A local named eval is an ordinary call.
    let g = first_function("function g(eval) { return eval('1'); }");
    assert!(!has(&g, Opcode::CallEval));
    assert!(has(&g, Opcode::Call));
}

#[test]
fn test_spread_call_uses_varargs() {
    let f = first_function("function f(g, xs) { return g(1, ...xs); }");
    assert!(has(&f, Opcode::CallVarargs));
    assert!(has(&f, Opcode::ArrayAppendSpread));
}

#[test]
fn test_condition_fuses_comparison() {
    let f = first_function("function f(a, b) { if (a < b) return 1; return 2; }");
    let ops = opcodes(&f);
    assert!(ops.contains(&Opcode::JumpIfNotLess));
    assert!(!ops.contains(&Opcode::Less));
}

#[test]
fn test_with_resolves_dynamically() {
    let f = first_function("function f(o, x) { with (o) { return x; } }");
    assert!(f.flags.uses_with);
    assert!(has(&f, Opcode::PushWithScope));
    assert!(has(&f, Opcode::GetFromScope));
    assert!(has(&f, Opcode::PopScope));
}

#[test]
fn test_strict_const_assignment_throws() {
    let f = first_function("function f() { 'use strict'; const c = 1; c = 2; return c; }");
    assert!(has(&f, Opcode::ThrowStaticError));

    let g = first_function("function g() { const c = 1; c = 2; return c; }");
    assert!(!has(&g, Opcode::ThrowStaticError));
}

#[test]
fn test_strict_accessor_clash_is_an_error() {
    let err = compiler()
        .compile_program("'use strict'; var o = { get a() { return 1; }, a: 2 };")
        .unwrap_err();
    assert!(matches!(err, CompileError::InvalidInitializer { .. }));
}

#[test]
fn test_unsupported_syntax() {
    let err = compiler().compile_program("class A {}").unwrap_err();
    assert!(matches!(err, CompileError::Unsupported(_)));
}

#[test]
fn test_nested_functions_compiled_once() {
    let program = compiler()
        .compile_program("function f() {} function g() { return function () {}; }")
        .unwrap();
    assert_eq!(program.functions.len(), 2);
    assert_eq!(program.functions[1].functions.len(), 1);
    let names: Vec<&str> = program.declared_variables.iter().map(|n| n.as_str()).collect();
    assert_eq!(names, ["f", "g"]);
}
