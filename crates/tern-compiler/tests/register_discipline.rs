use proptest::prelude::*;
use tern_bytecode::{Identifier, Instruction, Register, UnlinkedCodeBlock, VariableStorage};
use tern_compiler::{Compiler, GeneratorConfig};

/// Register an instruction writes, if any
fn written(instruction: &Instruction) -> Option<Register> {
    use Instruction::*;
    match *instruction {
        Mov { dst, .. }
        | LoadConst { dst, .. }
        | Add { dst, .. }
        | Sub { dst, .. }
        | Mul { dst, .. }
        | Div { dst, .. }
        | Mod { dst, .. }
        | BitAnd { dst, .. }
        | BitOr { dst, .. }
        | BitXor { dst, .. }
        | Shl { dst, .. }
        | Shr { dst, .. }
        | UShr { dst, .. }
        | Negate { dst, .. }
        | ToNumber { dst, .. }
        | BitNot { dst, .. }
        | Not { dst, .. }
        | Inc { dst }
        | Dec { dst }
        | Eq { dst, .. }
        | NotEq { dst, .. }
        | StrictEq { dst, .. }
        | StrictNotEq { dst, .. }
        | Less { dst, .. }
        | LessEq { dst, .. }
        | Greater { dst, .. }
        | GreaterEq { dst, .. }
        | EqNull { dst, .. }
        | NotEqNull { dst, .. }
        | In { dst, .. }
        | InstanceOf { dst, .. }
        | TypeOf { dst, .. }
        | IsUndefined { dst, .. }
        | IsBoolean { dst, .. }
        | IsNumber { dst, .. }
        | IsString { dst, .. }
        | IsObject { dst, .. }
        | IsFunction { dst, .. }
        | GetScope { dst }
        | CreateActivation { dst, .. }
        | ResolveScope { dst, .. }
        | GetFromScope { dst, .. }
        | GetClosureVar { dst, .. }
        | GetById { dst, .. }
        | GetByVal { dst, .. }
        | DeleteById { dst, .. }
        | DeleteByVal { dst, .. }
        | NewObject { dst }
        | NewArray { dst, .. }
        | NewRegExp { dst, .. }
        | NewFunction { dst, .. }
        | ToThis { dst }
        | CreateArguments { dst }
        | GetArgument { dst, .. }
        | GetArgumentCount { dst }
        | Call { dst, .. }
        | CallEval { dst, .. }
        | Construct { dst, .. }
        | CallVarargs { dst, .. }
        | ConstructVarargs { dst, .. }
        | Catch { dst } => Some(dst),
        _ => None,
    }
}

fn leaf() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("a".to_string()),
        Just("b".to_string()),
        Just("x".to_string()),
        Just("y".to_string()),
        (0u32..100).prop_map(|n| n.to_string()),
        Just("'s'".to_string()),
    ]
}

/// Expressions over `a`, `b`, `x`, `y` and `g` that assign nothing
fn expression() -> impl Strategy<Value = String> {
    leaf().prop_recursive(6, 64, 3, |inner| {
        prop_oneof![
            (inner.clone(), prop::sample::select(vec!["+", "-", "*", "<", "===", "==", ">="]), inner.clone())
                .prop_map(|(l, op, r)| format!("({l} {op} {r})")),
            (inner.clone(), prop::sample::select(vec!["&&", "||"]), inner.clone())
                .prop_map(|(l, op, r)| format!("({l} {op} {r})")),
            (inner.clone(), inner.clone(), inner.clone())
                .prop_map(|(c, t, e)| format!("({c} ? {t} : {e})")),
            (prop::sample::select(vec!["!", "-", "typeof "]), inner.clone())
                .prop_map(|(op, e)| format!("({op}{e})")),
            prop::collection::vec(inner.clone(), 0..3)
                .prop_map(|args| format!("g({})", args.join(", "))),
            inner.clone().prop_map(|e| format!("({e}).p")),
            (inner.clone(), inner.clone()).prop_map(|(o, k)| format!("({o})[{k}]")),
            prop::collection::vec(inner, 1..3).prop_map(|es| format!("[{}]", es.join(", "))),
        ]
    })
}

fn compile(source: &str) -> std::sync::Arc<UnlinkedCodeBlock> {
    Compiler::with_config(GeneratorConfig::default().with_debug_hooks(false))
        .compile_program(source)
        .unwrap_or_else(|e| panic!("compile failed for {source}: {e}"))
}

fn local_register(unit: &UnlinkedCodeBlock, name: &str) -> Register {
    match unit.symbol_table.get(&Identifier::new(name)).map(|e| e.storage) {
        Some(VariableStorage::Register(reg)) => reg,
        other => panic!("{name} is not a register local: {other:?}"),
    }
}

proptest! {
    #[test]
    fn named_locals_survive_temporaries(expr in expression()) {
        let source = format!(
            "function f(a, b, g) {{ var x = a; var y = b; var r = {expr}; return r + x + y; }}"
        );
        let program = compile(&source);
        let f = &program.functions[0];
        f.validate().unwrap();

        for name in ["x", "y"] {
            let reg = local_register(f, name);
            let writes = f.instructions.iter().filter(|i| written(i) == Some(reg)).count();
            prop_assert_eq!(writes, 1, "{} written more than once in {}", name, source);
        }
        for n in 1..=3 {
            let arg = Register::argument(n);
            prop_assert!(f.instructions.iter().all(|i| written(i) != Some(arg)));
        }
        for reg in f.instructions.iter().filter_map(written) {
            if let Some(local) = reg.to_local() {
                prop_assert!(local < f.num_callee_registers, "{} outside frame", reg);
            }
        }
    }

    #[test]
    fn generation_is_deterministic(expr in expression()) {
        let source = format!("function f(a, b, g) {{ var x = 1, y = 2; return {expr}; }}");
        let first = compile(&source);
        let second = compile(&source);
        prop_assert_eq!(&first.functions[0].instructions, &second.functions[0].instructions);
    }
}

mod labels {
    use super::*;
    use tern_compiler::generator::InstructionEmitter;

    proptest! {
        /// Each step emits a nop, binds a label or branches to one, in any
        /// order; every branch must land on its label's bound offset.
        #[test]
        fn branches_resolve_to_bound_labels(
            steps in prop::collection::vec((0u8..3, 0usize..4), 1..40)
        ) {
            let mut e = InstructionEmitter::new(false);
            let labels: Vec<_> = (0..4).map(|_| e.new_label()).collect();
            let mut bound = [false; 4];
            let mut branches = Vec::new();
            for (action, which) in steps {
                match action {
                    0 => {
                        e.emit(Instruction::Nop {});
                    }
                    1 if !bound[which] => {
                        e.bind_label(labels[which]);
                        bound[which] = true;
                    }
                    _ => {
                        let pc = e.emit_branch(
                            Instruction::Jump { offset: tern_bytecode::JumpOffset::new(0) },
                            labels[which],
                        );
                        branches.push((pc, which));
                    }
                }
            }
            for (which, label) in labels.iter().enumerate() {
                if !bound[which] {
                    e.bind_label(*label);
                }
            }
            let locations: Vec<u32> = labels
                .iter()
                .map(|label| e.label_location(*label).unwrap())
                .collect();
            let out = e.finish();
            for (pc, which) in branches {
                let offset = out.instructions[pc as usize].jump_offset().unwrap();
                prop_assert_eq!(offset.target_from(pc as usize), i64::from(locations[which]));
            }
        }
    }
}
