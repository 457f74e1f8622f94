//! Static analysis
//!
//! Fills in the [`ScopeInfo`] of every body in a tree: declarations, hoisted
//! functions, the captured-name set, feature flags and the `arguments`
//! classification. The walk uses an explicit work list, so trees of any depth
//! are analyzed without native recursion.

use rustc_hash::FxHashSet;
use tracing::trace;

use crate::ast::{
    Argument, ArgumentsUsage, ArrayElement, AstBuilder, BodyKind, Declaration, Expr, ExprKind,
    Features, ForInTarget, ForInit, FunctionNode, PropertyKey, ScopeInfo, Stmt, StmtKind,
    UnaryOp,
};

#[derive(Clone, Copy)]
struct Context {
    body: usize,
    /// Inside a `with` or `catch` body: names resolve through the scope chain
    dynamic: bool,
}

enum Work<'a> {
    Stmt(&'a Stmt<'a>, Context),
    Expr(&'a Expr<'a>, Context),
}

#[derive(Default)]
struct BodyFacts<'a> {
    node: Option<&'a FunctionNode<'a>>,
    children: Vec<usize>,
    declarations: Vec<Declaration<'a>>,
    declared: FxHashSet<&'a str>,
    functions: Vec<&'a FunctionNode<'a>>,
    references: FxHashSet<&'a str>,
    dynamic_references: FxHashSet<&'a str>,
    assigned: FxHashSet<&'a str>,
    features: Features,
    arguments_escapes: bool,
}

impl<'a> BodyFacts<'a> {
    fn declare(&mut self, name: &'a str, read_only: bool) {
        if self.declared.insert(name) {
            self.declarations.push(Declaration { name, read_only });
        }
    }

    fn is_function(&self) -> bool {
        self.node.is_some_and(|n| n.kind == BodyKind::Function)
    }
}

/// Analyze `root` and every function nested in it
pub fn analyze<'a>(builder: AstBuilder<'a>, root: &'a FunctionNode<'a>) {
    let mut bodies: Vec<BodyFacts<'a>> = Vec::new();
    let mut work: Vec<Work<'a>> = Vec::new();

    enter_body(&mut bodies, &mut work, root, None);

    while let Some(item) = work.pop() {
        match item {
            Work::Stmt(stmt, cx) => visit_stmt(&mut bodies, &mut work, stmt, cx),
            Work::Expr(expr, cx) => visit_expr(&mut bodies, &mut work, expr, cx),
        }
    }

    finish(builder, &mut bodies);
}

fn enter_body<'a>(
    bodies: &mut Vec<BodyFacts<'a>>,
    work: &mut Vec<Work<'a>>,
    node: &'a FunctionNode<'a>,
    parent: Option<usize>,
) -> usize {
    let index = bodies.len();
    let inherited_strict = parent.is_some_and(|p| bodies[p].features.strict);
    let mut facts = BodyFacts {
        node: Some(node),
        ..BodyFacts::default()
    };
    facts.features.strict = inherited_strict || node.has_use_strict;
    bodies.push(facts);
    if let Some(p) = parent {
        bodies[p].children.push(index);
        bodies[p].features.has_closures = true;
    }

    let cx = Context {
        body: index,
        dynamic: false,
    };
    for stmt in node.body.iter().rev() {
        work.push(Work::Stmt(stmt, cx));
    }
    index
}

fn push_stmts<'a>(work: &mut Vec<Work<'a>>, stmts: &'a [Stmt<'a>], cx: Context) {
    for stmt in stmts.iter().rev() {
        work.push(Work::Stmt(stmt, cx));
    }
}

/// `arguments[<index literal>]` or `arguments.length`
fn is_direct_arguments_read(expr: &Expr<'_>) -> bool {
    match expr.kind {
        ExprKind::Index { object, property } => {
            object.as_ident() == Some("arguments")
                && matches!(property.kind, ExprKind::Number(n) if n >= 0.0 && n.fract() == 0.0 && n < u32::MAX as f64)
        }
        ExprKind::Member { object, property } => {
            object.as_ident() == Some("arguments") && property == "length"
        }
        _ => false,
    }
}

/// Member or index expression whose base is `arguments`
fn touches_arguments_object(expr: &Expr<'_>) -> bool {
    match expr.kind {
        ExprKind::Index { object, .. } | ExprKind::Member { object, .. } => {
            object.as_ident() == Some("arguments")
        }
        _ => false,
    }
}

fn visit_stmt<'a>(
    bodies: &mut Vec<BodyFacts<'a>>,
    work: &mut Vec<Work<'a>>,
    stmt: &'a Stmt<'a>,
    cx: Context,
) {
    let facts = &mut bodies[cx.body];
    match stmt.kind {
        StmtKind::Expr(expr) | StmtKind::Throw(expr) => work.push(Work::Expr(expr, cx)),
        StmtKind::Var(declarators) => {
            for d in declarators {
                facts.declare(d.name, d.read_only);
            }
            for d in declarators.iter().rev() {
                if let Some(init) = d.init {
                    facts.assigned.insert(d.name);
                    work.push(Work::Expr(init, cx));
                }
            }
        }
        StmtKind::Function(node) => {
            if let Some(name) = node.name {
                facts.declared.insert(name);
            }
            facts.functions.push(node);
            enter_body(bodies, work, node, Some(cx.body));
        }
        StmtKind::Return(value) => {
            if let Some(value) = value {
                work.push(Work::Expr(value, cx));
            }
        }
        StmtKind::If {
            test,
            consequent,
            alternate,
        } => {
            if let Some(alternate) = alternate {
                work.push(Work::Stmt(alternate, cx));
            }
            work.push(Work::Stmt(consequent, cx));
            work.push(Work::Expr(test, cx));
        }
        StmtKind::Block(stmts) => push_stmts(work, stmts, cx),
        StmtKind::While { test, body } | StmtKind::DoWhile { body, test } => {
            work.push(Work::Stmt(body, cx));
            work.push(Work::Expr(test, cx));
        }
        StmtKind::For {
            init,
            test,
            update,
            body,
        } => {
            work.push(Work::Stmt(body, cx));
            if let Some(update) = update {
                work.push(Work::Expr(update, cx));
            }
            if let Some(test) = test {
                work.push(Work::Expr(test, cx));
            }
            match init {
                Some(ForInit::Var(declarators)) => {
                    for d in declarators {
                        facts.declare(d.name, d.read_only);
                    }
                    for d in declarators.iter().rev() {
                        if let Some(init) = d.init {
                            facts.assigned.insert(d.name);
                            work.push(Work::Expr(init, cx));
                        }
                    }
                }
                Some(ForInit::Expr(expr)) => work.push(Work::Expr(expr, cx)),
                None => {}
            }
        }
        StmtKind::ForIn {
            target,
            object,
            body,
        } => {
            work.push(Work::Stmt(body, cx));
            match target {
                ForInTarget::Var(name) => {
                    facts.declare(name, false);
                    facts.assigned.insert(name);
                    record_reference(facts, name, cx);
                }
                ForInTarget::Expr(expr) => {
                    mark_assignment_target(facts, expr);
                    work.push(Work::Expr(expr, cx));
                }
            }
            work.push(Work::Expr(object, cx));
        }
        StmtKind::Labeled { body, .. } => work.push(Work::Stmt(body, cx)),
        StmtKind::Switch {
            discriminant,
            cases,
        } => {
            for case in cases.iter().rev() {
                push_stmts(work, case.body, cx);
                if let Some(test) = case.test {
                    work.push(Work::Expr(test, cx));
                }
            }
            work.push(Work::Expr(discriminant, cx));
        }
        StmtKind::Try {
            block,
            handler,
            finalizer,
        } => {
            if let Some(finalizer) = finalizer {
                push_stmts(work, finalizer, cx);
            }
            if let Some(handler) = handler {
                facts.features.has_catch = true;
                push_stmts(
                    work,
                    handler.body,
                    Context {
                        dynamic: true,
                        ..cx
                    },
                );
            }
            push_stmts(work, block, cx);
        }
        StmtKind::With { object, body } => {
            facts.features.uses_with = true;
            work.push(Work::Stmt(
                body,
                Context {
                    dynamic: true,
                    ..cx
                },
            ));
            work.push(Work::Expr(object, cx));
        }
        StmtKind::Break(_)
        | StmtKind::Continue(_)
        | StmtKind::Debugger
        | StmtKind::Empty
        | StmtKind::TooDeep => {}
    }
}

fn record_reference<'a>(facts: &mut BodyFacts<'a>, name: &'a str, cx: Context) {
    if name == "arguments" && facts.is_function() {
        facts.features.uses_arguments = true;
        facts.arguments_escapes = true;
        if cx.dynamic {
            facts.dynamic_references.insert(name);
        }
        return;
    }
    if cx.dynamic {
        facts.dynamic_references.insert(name);
    } else {
        facts.references.insert(name);
    }
}

fn mark_assignment_target<'a>(facts: &mut BodyFacts<'a>, target: &'a Expr<'a>) {
    if let Some(name) = target.as_ident() {
        facts.assigned.insert(name);
    } else if touches_arguments_object(target) {
        facts.arguments_escapes = true;
    }
}

fn visit_expr<'a>(
    bodies: &mut Vec<BodyFacts<'a>>,
    work: &mut Vec<Work<'a>>,
    expr: &'a Expr<'a>,
    cx: Context,
) {
    let facts = &mut bodies[cx.body];
    match expr.kind {
        ExprKind::Number(_)
        | ExprKind::String(_)
        | ExprKind::Bool(_)
        | ExprKind::Null
        | ExprKind::RegExp { .. }
        | ExprKind::TooDeep => {}
        ExprKind::This => facts.features.uses_this = true,
        ExprKind::Ident(name) => record_reference(facts, name, cx),
        ExprKind::Array(elements) => {
            for element in elements.iter().rev() {
                match element {
                    ArrayElement::Expr(e) | ArrayElement::Spread(e) => {
                        work.push(Work::Expr(e, cx))
                    }
                    ArrayElement::Hole => {}
                }
            }
        }
        ExprKind::Object(properties) => {
            for property in properties.iter().rev() {
                work.push(Work::Expr(property.value, cx));
                if let PropertyKey::Computed(key) = property.key {
                    work.push(Work::Expr(key, cx));
                }
            }
        }
        ExprKind::Function(node) => {
            enter_body(bodies, work, node, Some(cx.body));
        }
        ExprKind::Unary(op, operand) => {
            if op == UnaryOp::Delete && touches_arguments_object(operand) {
                facts.arguments_escapes = true;
            }
            work.push(Work::Expr(operand, cx));
        }
        ExprKind::Update { target, .. } => {
            mark_assignment_target(facts, target);
            work.push(Work::Expr(target, cx));
        }
        ExprKind::Binary(_, lhs, rhs) | ExprKind::Logical(_, lhs, rhs) => {
            work.push(Work::Expr(rhs, cx));
            work.push(Work::Expr(lhs, cx));
        }
        ExprKind::Assign { target, value, .. } => {
            mark_assignment_target(facts, target);
            work.push(Work::Expr(value, cx));
            work.push(Work::Expr(target, cx));
        }
        ExprKind::Conditional {
            test,
            consequent,
            alternate,
        } => {
            work.push(Work::Expr(alternate, cx));
            work.push(Work::Expr(consequent, cx));
            work.push(Work::Expr(test, cx));
        }
        ExprKind::Call { callee, args } | ExprKind::New { callee, args } => {
            if matches!(expr.kind, ExprKind::Call { .. }) {
                if callee.as_ident() == Some("eval") {
                    facts.features.uses_eval = true;
                }
                if touches_arguments_object(callee) {
                    facts.arguments_escapes = true;
                }
            }
            for arg in args.iter().rev() {
                match arg {
                    Argument::Expr(e) | Argument::Spread(e) => work.push(Work::Expr(e, cx)),
                }
            }
            work.push(Work::Expr(callee, cx));
        }
        ExprKind::Member { .. } | ExprKind::Index { .. }
            if facts.is_function() && is_direct_arguments_read(expr) =>
        {
            facts.features.uses_arguments = true;
            if cx.dynamic {
                facts.dynamic_references.insert("arguments");
            }
        }
        ExprKind::Member { object, .. } => work.push(Work::Expr(object, cx)),
        ExprKind::Index { object, property } => {
            work.push(Work::Expr(property, cx));
            work.push(Work::Expr(object, cx));
        }
        ExprKind::Sequence(exprs) => {
            for e in exprs.iter().rev() {
                work.push(Work::Expr(e, cx));
            }
        }
    }
}

/// Resolve captures bottom-up and publish the results on each node
fn finish<'a>(builder: AstBuilder<'a>, bodies: &mut [BodyFacts<'a>]) {
    let mut free: Vec<FxHashSet<&'a str>> = vec![FxHashSet::default(); bodies.len()];

    // Children always have larger indices than their parent.
    for index in (0..bodies.len()).rev() {
        let Some(node) = bodies[index].node else {
            continue;
        };

        let mut from_children: FxHashSet<&'a str> = FxHashSet::default();
        let mut child_eval = false;
        for &child in &bodies[index].children {
            from_children.extend(free[child].iter().copied());
            child_eval |= bodies[child].features.contains_eval;
        }

        let facts = &mut bodies[index];
        facts.features.contains_eval = facts.features.uses_eval || child_eval;

        let mut declared: FxHashSet<&'a str> = facts.declared.clone();
        declared.extend(node.params.iter().map(|p| p.name));
        if node.is_expression
            && let Some(name) = node.name
        {
            declared.insert(name);
        }

        let mut own_free: FxHashSet<&'a str> = facts
            .references
            .iter()
            .chain(facts.dynamic_references.iter())
            .chain(from_children.iter())
            .copied()
            .filter(|name| !declared.contains(name))
            .collect();
        if node.kind == BodyKind::Function {
            own_free.remove("arguments");
        }
        facts.features.has_free_references = !own_free.is_empty();

        let captured: Vec<&'a str> = if node.kind != BodyKind::Function {
            Vec::new()
        } else {
            let capture_all = facts.features.contains_eval || facts.features.uses_with;
            let mut names: Vec<&'a str> = Vec::new();
            let mut push = |name: &'a str| {
                let wanted = capture_all
                    || from_children.contains(name)
                    || facts.dynamic_references.contains(name);
                if wanted && !names.contains(&name) {
                    names.push(name);
                }
            };
            for param in node.params {
                push(param.name);
            }
            for d in &facts.declarations {
                push(d.name);
            }
            for f in &facts.functions {
                if let Some(name) = f.name {
                    push(name);
                }
            }
            if node.is_expression
                && let Some(name) = node.name
            {
                push(name);
            }
            if facts.features.contains_eval
                || facts.dynamic_references.contains("arguments")
            {
                push("arguments");
            }
            names
        };

        let arguments = classify_arguments(node, facts, &captured);
        if arguments == ArgumentsUsage::Materialize {
            facts.features.uses_arguments = true;
        }

        trace!(
            name = node.name.unwrap_or("<anonymous>"),
            captured = captured.len(),
            ?arguments,
            "analyzed body"
        );

        let info = ScopeInfo {
            declarations: builder.slice(&facts.declarations),
            functions: builder.slice(&facts.functions),
            captured: builder.slice(&captured),
            features: facts.features,
            arguments,
        };
        node.set_scope_info(builder.scope_info(info));
        free[index] = own_free;
    }
}

fn classify_arguments<'a>(
    node: &FunctionNode<'a>,
    facts: &BodyFacts<'a>,
    captured: &[&'a str],
) -> ArgumentsUsage {
    if node.kind != BodyKind::Function {
        return ArgumentsUsage::None;
    }
    let shadowed = facts.declared.contains("arguments")
        || node.params.iter().any(|p| p.name == "arguments");
    if shadowed {
        return ArgumentsUsage::None;
    }
    if facts.features.contains_eval {
        return ArgumentsUsage::Materialize;
    }
    if !facts.features.uses_arguments {
        return ArgumentsUsage::None;
    }
    if facts.arguments_escapes || facts.features.uses_with {
        return ArgumentsUsage::Materialize;
    }
    let param_names = || node.params.iter().map(|p| p.name);
    let conflicts = if facts.features.strict {
        param_names().any(|name| facts.assigned.contains(name))
    } else {
        param_names().any(|name| captured.contains(&name))
    };
    if conflicts {
        ArgumentsUsage::Materialize
    } else {
        ArgumentsUsage::Direct
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frontend::parse_program;
    use bumpalo::Bump;

    fn analyzed<'a>(arena: &'a Bump, source: &str) -> &'a FunctionNode<'a> {
        parse_program(arena, source).unwrap()
    }

    fn first_function<'a>(program: &'a FunctionNode<'a>) -> &'a FunctionNode<'a> {
        program.scope_info().unwrap().functions[0]
    }

    #[test]
    fn test_closure_reference_captures() {
        let arena = Bump::new();
        let program = analyzed(
            &arena,
            "function f(a) { var x = 1, y = 2; return function () { return x; }; }",
        );
        let info = first_function(program).scope_info().unwrap();
        assert_eq!(info.captured, &["x"]);
        assert!(info.features.has_closures);
        assert!(!info.is_captured("y"));
        assert!(!info.is_captured("a"));
    }

    #[test]
    fn test_eval_captures_everything() {
        let arena = Bump::new();
        let program = analyzed(&arena, "function f(a) { var x; eval('x'); }");
        let info = first_function(program).scope_info().unwrap();
        assert!(info.features.uses_eval);
        assert!(info.is_captured("a"));
        assert!(info.is_captured("x"));
        assert!(info.is_captured("arguments"));
        assert_eq!(info.arguments, ArgumentsUsage::Materialize);
    }

    #[test]
    fn test_nested_eval_propagates() {
        let arena = Bump::new();
        let program = analyzed(
            &arena,
            "function f() { var x; function g() { eval('x = 1'); } }",
        );
        let info = first_function(program).scope_info().unwrap();
        assert!(info.features.contains_eval);
        assert!(!info.features.uses_eval);
        assert!(info.is_captured("x"));
    }

    #[test]
    fn test_arguments_classification() {
        let arena = Bump::new();
        let cases = [
            ("function f(a) { return a; }", ArgumentsUsage::None),
            (
                "function f(a) { return arguments[0] + arguments.length; }",
                ArgumentsUsage::Direct,
            ),
            ("function f(a) { return arguments; }", ArgumentsUsage::Materialize),
            (
                "function f(a) { arguments[0] = 1; return arguments[0]; }",
                ArgumentsUsage::Materialize,
            ),
            (
                "function f(a) { 'use strict'; a = 2; return arguments[0]; }",
                ArgumentsUsage::Materialize,
            ),
            (
                "function f(a) { a = 2; return arguments[0]; }",
                ArgumentsUsage::Direct,
            ),
            (
                "function f(a) { var g = function () { return a; }; return arguments[0]; }",
                ArgumentsUsage::Materialize,
            ),
            (
                "function f(arguments) { return arguments[0]; }",
                ArgumentsUsage::None,
            ),
        ];
        for (source, expected) in cases {
            let program = analyzed(&arena, source);
            let info = first_function(program).scope_info().unwrap();
            assert_eq!(info.arguments, expected, "{source}");
        }
    }

    #[test]
    fn test_with_and_catch_capture_dynamic_references() {
        let arena = Bump::new();
        let program = analyzed(
            &arena,
            "function f(o) { var a, b, c; try { } catch (e) { a; } return b; }",
        );
        let info = first_function(program).scope_info().unwrap();
        assert!(info.is_captured("a"));
        assert!(!info.is_captured("b"));
        assert!(info.features.has_catch);

        let program = analyzed(&arena, "function f(o) { var a; with (o) { } return a; }");
        let info = first_function(program).scope_info().unwrap();
        assert!(info.features.uses_with);
        assert!(info.is_captured("a"));
    }

    #[test]
    fn test_strictness_is_inherited() {
        let arena = Bump::new();
        let program = analyzed(&arena, "'use strict'; function f() { function g() {} }");
        let f = first_function(program);
        let g = f.scope_info().unwrap().functions[0];
        assert!(program.scope_info().unwrap().features.strict);
        assert!(g.scope_info().unwrap().features.strict);
    }

    #[test]
    fn test_free_references_and_scope_chain() {
        let arena = Bump::new();
        let program = analyzed(&arena, "function add(a, b) { return a + b; }");
        let info = first_function(program).scope_info().unwrap();
        assert!(!info.features.has_free_references);
        assert!(!info.needs_scope_chain());

        let program = analyzed(&arena, "function f() { return print; }");
        let info = first_function(program).scope_info().unwrap();
        assert!(info.needs_scope_chain());
    }

    #[test]
    fn test_deep_tree_is_analyzed_iteratively() {
        let arena = Bump::new();
        let b = AstBuilder::new(&arena);
        let mut expr = b.number(1.0);
        for _ in 0..100_000 {
            expr = b.binary(crate::ast::BinaryOp::Add, expr, b.ident("x"));
        }
        let program = b.program(&[b.expr_stmt(expr)], false);
        analyze(b, program);
        assert!(program.scope_info().unwrap().features.has_free_references);
    }
}
