//! Parser adapter
//!
//! Parses source with oxc and lowers the oxc tree into the arena AST of
//! [`crate::ast`], then runs [`analysis`](crate::analysis). Lowering is
//! recursive but guarded: a subtree too deep for the stack budget becomes a
//! `TooDeep` node, which the generator turns into a stack-exceeded throw.

use bumpalo::Bump;
use oxc_allocator::Allocator;
use oxc_ast::ast as js;
use oxc_parser::Parser;
use oxc_span::{GetSpan, SourceType};
use tern_bytecode::number_to_string;
use tracing::warn;

use crate::analysis::analyze;
use crate::ast::{
    Argument, ArrayElement, AstBuilder, BinaryOp, BodyKind, CatchClause, Expr, ExprKind,
    ForInTarget, ForInit, FunctionNode, LogicalOp, Property, PropertyKey, PropertyKind,
    Span, Stmt, StmtKind, SwitchCase, UnaryOp, UpdateOp, VarDeclarator,
};
use crate::config::GeneratorConfig;
use crate::error::{CompileError, CompileResult};
use crate::stack_guard::StackGuard;

/// Parse and analyze a program with the default configuration
pub fn parse_program<'a>(arena: &'a Bump, source: &str) -> CompileResult<&'a FunctionNode<'a>> {
    parse_source(arena, source, BodyKind::Program, false, &GeneratorConfig::default())
}

/// Parse and analyze an eval body; `strict` is the strictness of the caller
pub fn parse_eval<'a>(
    arena: &'a Bump,
    source: &str,
    strict: bool,
) -> CompileResult<&'a FunctionNode<'a>> {
    parse_source(arena, source, BodyKind::Eval, strict, &GeneratorConfig::default())
}

/// Parse `source` as a program or eval body and analyze the result
pub fn parse_source<'a>(
    arena: &'a Bump,
    source: &str,
    kind: BodyKind,
    strict: bool,
    config: &GeneratorConfig,
) -> CompileResult<&'a FunctionNode<'a>> {
    let builder = AstBuilder::new(arena);
    let depth = nesting_depth(source);
    if depth > config.max_parse_depth {
        warn!(depth, limit = config.max_parse_depth, "source nesting exceeds parser limit");
        let span = Span {
            start: 0,
            end: source.len() as u32,
            line: 1,
            column: 1,
        };
        let body = builder.slice(&[Stmt {
            kind: StmtKind::TooDeep,
            span,
        }]);
        let root = builder.function(kind, None, false, &[], body, strict, span);
        analyze(builder, root);
        return Ok(root);
    }

    let allocator = Allocator::default();
    let source_type = SourceType::default().with_script(true);
    let result = Parser::new(&allocator, source, source_type).parse();

    if let Some(error) = result.errors.first() {
        return Err(CompileError::Parse(error.to_string()));
    }

    let mut lowering = Lowering {
        b: builder,
        lines: LineIndex::new(source),
        guard: StackGuard::from_config(config),
        depth: 0,
    };

    let program = &result.program;
    let use_strict = strict
        || program
            .directives
            .iter()
            .any(|d| d.directive.as_str() == "use strict");
    let body = lowering.lower_stmts(&program.body)?;
    let span = lowering.span(program.span);
    let root = builder.function(kind, None, false, &[], body, use_strict, span);
    analyze(builder, root);
    Ok(root)
}

/// Deepest bracket nesting of `source`.
///
/// A lexical scan: string, template and comment contents are skipped, and a
/// template substitution counts as one level. Regular-expression literals
/// are not recognized, so brackets inside them are counted.
pub fn nesting_depth(source: &str) -> u32 {
    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Open {
        Bracket,
        Substitution,
    }

    let bytes = source.as_bytes();
    let mut open: Vec<Open> = Vec::new();
    let mut deepest = 0;
    let mut in_template = false;
    let mut i = 0;
    while i < bytes.len() {
        let b = bytes[i];
        if in_template {
            match b {
                b'\\' => i += 1,
                b'`' => in_template = false,
                b'$' if bytes.get(i + 1) == Some(&b'{') => {
                    in_template = false;
                    open.push(Open::Substitution);
                    deepest = deepest.max(open.len());
                    i += 1;
                }
                _ => {}
            }
            i += 1;
            continue;
        }
        match b {
            b'(' | b'[' | b'{' => {
                open.push(Open::Bracket);
                deepest = deepest.max(open.len());
            }
            b')' | b']' => {
                open.pop();
            }
            b'}' => {
                if open.pop() == Some(Open::Substitution) {
                    in_template = true;
                }
            }
            b'`' => in_template = true,
            b'\'' | b'"' => {
                i += 1;
                while i < bytes.len() && bytes[i] != b && bytes[i] != b'\n' {
                    if bytes[i] == b'\\' {
                        i += 1;
                    }
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'/') => {
                while i < bytes.len() && bytes[i] != b'\n' {
                    i += 1;
                }
            }
            b'/' if bytes.get(i + 1) == Some(&b'*') => {
                i += 2;
                while i < bytes.len() && !(bytes[i] == b'*' && bytes.get(i + 1) == Some(&b'/')) {
                    i += 1;
                }
                i += 1;
            }
            _ => {}
        }
        i += 1;
    }
    u32::try_from(deepest).unwrap_or(u32::MAX)
}

/// Byte offset → line/column
struct LineIndex {
    starts: Vec<u32>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(
            source
                .bytes()
                .enumerate()
                .filter(|&(_, b)| b == b'\n')
                .map(|(i, _)| i as u32 + 1),
        );
        Self { starts }
    }

    fn position(&self, offset: u32) -> (u32, u32) {
        let line = self.starts.partition_point(|&start| start <= offset);
        let start = self.starts[line.saturating_sub(1)];
        (line as u32, offset - start + 1)
    }
}

struct Lowering<'a> {
    b: AstBuilder<'a>,
    lines: LineIndex,
    guard: StackGuard,
    depth: u32,
}

impl<'a> Lowering<'a> {
    fn span(&self, span: oxc_span::Span) -> Span {
        let (line, column) = self.lines.position(span.start);
        Span {
            start: span.start,
            end: span.end,
            line,
            column,
        }
    }

    fn syntax(&self, message: &str, span: oxc_span::Span) -> CompileError {
        let (line, column) = self.lines.position(span.start);
        CompileError::syntax(message, line, column)
    }

    fn lower_stmts(&mut self, stmts: &[js::Statement<'_>]) -> CompileResult<&'a [Stmt<'a>]> {
        let mut lowered = Vec::with_capacity(stmts.len());
        for stmt in stmts {
            lowered.push(self.lower_stmt(stmt)?);
        }
        Ok(self.b.slice(&lowered))
    }

    fn lower_stmt(&mut self, stmt: &js::Statement<'_>) -> CompileResult<Stmt<'a>> {
        let span = self.span(stmt.span());
        if !self.guard.is_safe_to_recurse(self.depth) {
            return Ok(Stmt {
                kind: StmtKind::TooDeep,
                span,
            });
        }
        self.depth += 1;
        let kind = self.lower_stmt_kind(stmt);
        self.depth -= 1;
        Ok(Stmt { kind: kind?, span })
    }

    fn lower_boxed_stmt(&mut self, stmt: &js::Statement<'_>) -> CompileResult<&'a Stmt<'a>> {
        let lowered = self.lower_stmt(stmt)?;
        Ok(self.b.stmt(lowered.kind, lowered.span))
    }

    fn lower_stmt_kind(&mut self, stmt: &js::Statement<'_>) -> CompileResult<StmtKind<'a>> {
        Ok(match stmt {
            js::Statement::ExpressionStatement(s) => StmtKind::Expr(self.lower_expr(&s.expression)?),
            js::Statement::VariableDeclaration(decl) => {
                StmtKind::Var(self.lower_declarators(decl)?)
            }
            js::Statement::FunctionDeclaration(func) => {
                StmtKind::Function(self.lower_function(func, false)?)
            }
            js::Statement::ReturnStatement(ret) => {
                let value = match &ret.argument {
                    Some(arg) => Some(self.lower_expr(arg)?),
                    None => None,
                };
                StmtKind::Return(value)
            }
            js::Statement::IfStatement(s) => StmtKind::If {
                test: self.lower_expr(&s.test)?,
                consequent: self.lower_boxed_stmt(&s.consequent)?,
                alternate: match &s.alternate {
                    Some(alt) => Some(self.lower_boxed_stmt(alt)?),
                    None => None,
                },
            },
            js::Statement::BlockStatement(block) => StmtKind::Block(self.lower_stmts(&block.body)?),
            js::Statement::WhileStatement(s) => StmtKind::While {
                test: self.lower_expr(&s.test)?,
                body: self.lower_boxed_stmt(&s.body)?,
            },
            js::Statement::DoWhileStatement(s) => StmtKind::DoWhile {
                body: self.lower_boxed_stmt(&s.body)?,
                test: self.lower_expr(&s.test)?,
            },
            js::Statement::ForStatement(s) => {
                let init = match &s.init {
                    Some(js::ForStatementInit::VariableDeclaration(decl)) => {
                        Some(ForInit::Var(self.lower_declarators(decl)?))
                    }
                    Some(init) => match init.as_expression() {
                        Some(expr) => Some(ForInit::Expr(self.lower_expr(expr)?)),
                        None => return Err(CompileError::unsupported("for initializer")),
                    },
                    None => None,
                };
                StmtKind::For {
                    init,
                    test: match &s.test {
                        Some(t) => Some(self.lower_expr(t)?),
                        None => None,
                    },
                    update: match &s.update {
                        Some(u) => Some(self.lower_expr(u)?),
                        None => None,
                    },
                    body: self.lower_boxed_stmt(&s.body)?,
                }
            }
            js::Statement::ForInStatement(s) => {
                let target = match &s.left {
                    js::ForStatementLeft::VariableDeclaration(decl) => {
                        if decl.kind != js::VariableDeclarationKind::Var
                            && decl.kind != js::VariableDeclarationKind::Let
                            && decl.kind != js::VariableDeclarationKind::Const
                        {
                            return Err(CompileError::unsupported("using declarations"));
                        }
                        let Some(declarator) = decl.declarations.first() else {
                            return Err(self.syntax("missing for-in binding", decl.span));
                        };
                        if declarator.init.is_some() {
                            return Err(CompileError::unsupported("for-in initializer"));
                        }
                        ForInTarget::Var(self.binding_name(&declarator.id)?)
                    }
                    js::ForStatementLeft::AssignmentTargetIdentifier(ident) => {
                        let span = self.span(ident.span);
                        let name = self.b.str(ident.name.as_str());
                        ForInTarget::Expr(self.b.expr(ExprKind::Ident(name), span))
                    }
                    js::ForStatementLeft::StaticMemberExpression(member) => {
                        ForInTarget::Expr(self.lower_static_member(member)?)
                    }
                    js::ForStatementLeft::ComputedMemberExpression(member) => {
                        ForInTarget::Expr(self.lower_computed_member(member)?)
                    }
                    _ => return Err(CompileError::unsupported("destructuring for-in target")),
                };
                StmtKind::ForIn {
                    target,
                    object: self.lower_expr(&s.right)?,
                    body: self.lower_boxed_stmt(&s.body)?,
                }
            }
            js::Statement::BreakStatement(s) => {
                StmtKind::Break(s.label.as_ref().map(|l| self.b.str(l.name.as_str())))
            }
            js::Statement::ContinueStatement(s) => {
                StmtKind::Continue(s.label.as_ref().map(|l| self.b.str(l.name.as_str())))
            }
            js::Statement::LabeledStatement(s) => StmtKind::Labeled {
                label: self.b.str(s.label.name.as_str()),
                body: self.lower_boxed_stmt(&s.body)?,
            },
            js::Statement::SwitchStatement(s) => {
                let discriminant = self.lower_expr(&s.discriminant)?;
                let mut cases = Vec::with_capacity(s.cases.len());
                for case in &s.cases {
                    cases.push(SwitchCase {
                        test: match &case.test {
                            Some(t) => Some(self.lower_expr(t)?),
                            None => None,
                        },
                        body: self.lower_stmts(&case.consequent)?,
                    });
                }
                StmtKind::Switch {
                    discriminant,
                    cases: self.b.slice(&cases),
                }
            }
            js::Statement::ThrowStatement(s) => StmtKind::Throw(self.lower_expr(&s.argument)?),
            js::Statement::TryStatement(s) => {
                let block = self.lower_stmts(&s.block.body)?;
                let handler = match &s.handler {
                    Some(clause) => {
                        let param = match &clause.param {
                            Some(param) => Some(self.binding_name(&param.pattern)?),
                            None => None,
                        };
                        Some(CatchClause {
                            param,
                            body: self.lower_stmts(&clause.body.body)?,
                        })
                    }
                    None => None,
                };
                let finalizer = match &s.finalizer {
                    Some(f) => Some(self.lower_stmts(&f.body)?),
                    None => None,
                };
                StmtKind::Try {
                    block,
                    handler,
                    finalizer,
                }
            }
            js::Statement::WithStatement(s) => StmtKind::With {
                object: self.lower_expr(&s.object)?,
                body: self.lower_boxed_stmt(&s.body)?,
            },
            js::Statement::EmptyStatement(_) => StmtKind::Empty,
            js::Statement::DebuggerStatement(_) => StmtKind::Debugger,
            js::Statement::ClassDeclaration(_) => return Err(CompileError::unsupported("classes")),
            js::Statement::ForOfStatement(_) => return Err(CompileError::unsupported("for-of")),
            _ => return Err(CompileError::unsupported("module or TypeScript syntax")),
        })
    }

    fn binding_name(&self, pattern: &js::BindingPattern<'_>) -> CompileResult<&'a str> {
        match pattern {
            js::BindingPattern::BindingIdentifier(ident) => Ok(self.b.str(ident.name.as_str())),
            _ => Err(CompileError::unsupported("destructuring patterns")),
        }
    }

    fn lower_declarators(
        &mut self,
        decl: &js::VariableDeclaration<'_>,
    ) -> CompileResult<&'a [VarDeclarator<'a>]> {
        let read_only = match decl.kind {
            js::VariableDeclarationKind::Var | js::VariableDeclarationKind::Let => false,
            js::VariableDeclarationKind::Const => true,
            _ => return Err(CompileError::unsupported("using declarations")),
        };
        let mut declarators = Vec::with_capacity(decl.declarations.len());
        for d in &decl.declarations {
            let name = self.binding_name(&d.id)?;
            let init = match &d.init {
                Some(init) => Some(self.lower_expr(init)?),
                None => None,
            };
            declarators.push(VarDeclarator {
                name,
                init,
                read_only,
                span: self.span(d.span),
            });
        }
        Ok(self.b.slice(&declarators))
    }

    fn lower_function(
        &mut self,
        func: &js::Function<'_>,
        is_expression: bool,
    ) -> CompileResult<&'a FunctionNode<'a>> {
        if func.generator {
            return Err(CompileError::unsupported("generators"));
        }
        if func.r#async {
            return Err(CompileError::unsupported("async functions"));
        }
        if func.params.rest.is_some() {
            return Err(CompileError::unsupported("rest parameters"));
        }

        let mut params = Vec::with_capacity(func.params.items.len());
        for param in &func.params.items {
            params.push(self.binding_name(&param.pattern)?);
        }

        let (body, use_strict) = match &func.body {
            Some(body) => (
                self.lower_stmts(&body.statements)?,
                body.directives
                    .iter()
                    .any(|d| d.directive.as_str() == "use strict"),
            ),
            None => (self.b.slice(&[]), false),
        };

        let node = self.b.function(
            BodyKind::Function,
            func.id.as_ref().map(|id| id.name.as_str()),
            is_expression,
            &params,
            body,
            use_strict,
            self.span(func.span),
        );
        Ok(node)
    }

    fn lower_expr(&mut self, expr: &js::Expression<'_>) -> CompileResult<&'a Expr<'a>> {
        let span = self.span(expr.span());
        if !self.guard.is_safe_to_recurse(self.depth) {
            return Ok(self.b.expr(ExprKind::TooDeep, span));
        }
        self.depth += 1;
        let kind = self.lower_expr_kind(expr);
        self.depth -= 1;
        Ok(self.b.expr(kind?, span))
    }

    fn lower_static_member(
        &mut self,
        member: &js::StaticMemberExpression<'_>,
    ) -> CompileResult<&'a Expr<'a>> {
        if member.optional {
            return Err(CompileError::unsupported("optional chaining"));
        }
        let object = self.lower_expr(&member.object)?;
        let property = self.b.str(member.property.name.as_str());
        Ok(self
            .b
            .expr(ExprKind::Member { object, property }, self.span(member.span)))
    }

    fn lower_computed_member(
        &mut self,
        member: &js::ComputedMemberExpression<'_>,
    ) -> CompileResult<&'a Expr<'a>> {
        if member.optional {
            return Err(CompileError::unsupported("optional chaining"));
        }
        let object = self.lower_expr(&member.object)?;
        let property = self.lower_expr(&member.expression)?;
        Ok(self
            .b
            .expr(ExprKind::Index { object, property }, self.span(member.span)))
    }

    fn lower_simple_target(
        &mut self,
        target: &js::SimpleAssignmentTarget<'_>,
    ) -> CompileResult<&'a Expr<'a>> {
        match target {
            js::SimpleAssignmentTarget::AssignmentTargetIdentifier(ident) => {
                let name = self.b.str(ident.name.as_str());
                Ok(self.b.expr(ExprKind::Ident(name), self.span(ident.span)))
            }
            js::SimpleAssignmentTarget::StaticMemberExpression(member) => {
                self.lower_static_member(member)
            }
            js::SimpleAssignmentTarget::ComputedMemberExpression(member) => {
                self.lower_computed_member(member)
            }
            _ => Err(CompileError::unsupported("assignment target")),
        }
    }

    fn lower_assignment_target(
        &mut self,
        target: &js::AssignmentTarget<'_>,
    ) -> CompileResult<&'a Expr<'a>> {
        match target {
            js::AssignmentTarget::AssignmentTargetIdentifier(ident) => {
                let name = self.b.str(ident.name.as_str());
                Ok(self.b.expr(ExprKind::Ident(name), self.span(ident.span)))
            }
            js::AssignmentTarget::StaticMemberExpression(member) => {
                self.lower_static_member(member)
            }
            js::AssignmentTarget::ComputedMemberExpression(member) => {
                self.lower_computed_member(member)
            }
            _ => Err(CompileError::unsupported("destructuring assignment")),
        }
    }

    fn lower_arguments(
        &mut self,
        arguments: &[js::Argument<'_>],
    ) -> CompileResult<&'a [Argument<'a>]> {
        let mut lowered = Vec::with_capacity(arguments.len());
        for arg in arguments {
            lowered.push(match arg {
                js::Argument::SpreadElement(spread) => {
                    Argument::Spread(self.lower_expr(&spread.argument)?)
                }
                _ => Argument::Expr(self.lower_expr(arg.to_expression())?),
            });
        }
        Ok(self.b.slice(&lowered))
    }

    fn lower_expr_kind(&mut self, expr: &js::Expression<'_>) -> CompileResult<ExprKind<'a>> {
        Ok(match expr {
            js::Expression::NumericLiteral(lit) => ExprKind::Number(lit.value),
            js::Expression::StringLiteral(lit) => ExprKind::String(self.b.str(lit.value.as_str())),
            js::Expression::BooleanLiteral(lit) => ExprKind::Bool(lit.value),
            js::Expression::NullLiteral(_) => ExprKind::Null,
            js::Expression::ThisExpression(_) => ExprKind::This,
            js::Expression::Identifier(ident) => ExprKind::Ident(self.b.str(ident.name.as_str())),
            js::Expression::RegExpLiteral(lit) => ExprKind::RegExp {
                pattern: self.b.str(lit.regex.pattern.text.as_str()),
                flags: self.b.str(&lit.regex.flags.to_string()),
            },
            js::Expression::TemplateLiteral(lit) => {
                if !lit.expressions.is_empty() {
                    return Err(CompileError::unsupported("template substitutions"));
                }
                let text = lit
                    .quasis
                    .first()
                    .and_then(|q| q.value.cooked.as_ref())
                    .map(|c| c.as_str())
                    .unwrap_or("");
                ExprKind::String(self.b.str(text))
            }
            js::Expression::ArrayExpression(arr) => {
                let mut elements = Vec::with_capacity(arr.elements.len());
                for element in &arr.elements {
                    elements.push(match element {
                        js::ArrayExpressionElement::SpreadElement(spread) => {
                            ArrayElement::Spread(self.lower_expr(&spread.argument)?)
                        }
                        js::ArrayExpressionElement::Elision(_) => ArrayElement::Hole,
                        _ => ArrayElement::Expr(self.lower_expr(element.to_expression())?),
                    });
                }
                ExprKind::Array(self.b.slice(&elements))
            }
            js::Expression::ObjectExpression(obj) => {
                let mut properties = Vec::with_capacity(obj.properties.len());
                for property in &obj.properties {
                    match property {
                        js::ObjectPropertyKind::ObjectProperty(prop) => {
                            properties.push(self.lower_property(prop)?);
                        }
                        js::ObjectPropertyKind::SpreadProperty(_) => {
                            return Err(CompileError::unsupported("object spread"));
                        }
                    }
                }
                ExprKind::Object(self.b.slice(&properties))
            }
            js::Expression::FunctionExpression(func) => {
                ExprKind::Function(self.lower_function(func, true)?)
            }
            js::Expression::ArrowFunctionExpression(_) => {
                return Err(CompileError::unsupported("arrow functions"));
            }
            js::Expression::ClassExpression(_) => return Err(CompileError::unsupported("classes")),
            js::Expression::UnaryExpression(unary) => {
                let op = match unary.operator {
                    js::UnaryOperator::UnaryNegation => UnaryOp::Minus,
                    js::UnaryOperator::UnaryPlus => UnaryOp::Plus,
                    js::UnaryOperator::LogicalNot => UnaryOp::Not,
                    js::UnaryOperator::BitwiseNot => UnaryOp::BitNot,
                    js::UnaryOperator::Typeof => UnaryOp::TypeOf,
                    js::UnaryOperator::Void => UnaryOp::Void,
                    js::UnaryOperator::Delete => UnaryOp::Delete,
                };
                ExprKind::Unary(op, self.lower_expr(&unary.argument)?)
            }
            js::Expression::UpdateExpression(update) => ExprKind::Update {
                op: match update.operator {
                    js::UpdateOperator::Increment => UpdateOp::Increment,
                    js::UpdateOperator::Decrement => UpdateOp::Decrement,
                },
                prefix: update.prefix,
                target: self.lower_simple_target(&update.argument)?,
            },
            js::Expression::BinaryExpression(binary) => {
                let op = binary_op(binary.operator)
                    .ok_or_else(|| CompileError::unsupported("exponentiation"))?;
                ExprKind::Binary(
                    op,
                    self.lower_expr(&binary.left)?,
                    self.lower_expr(&binary.right)?,
                )
            }
            js::Expression::LogicalExpression(logical) => {
                let op = match logical.operator {
                    js::LogicalOperator::And => LogicalOp::And,
                    js::LogicalOperator::Or => LogicalOp::Or,
                    js::LogicalOperator::Coalesce => LogicalOp::Coalesce,
                };
                ExprKind::Logical(
                    op,
                    self.lower_expr(&logical.left)?,
                    self.lower_expr(&logical.right)?,
                )
            }
            js::Expression::AssignmentExpression(assign) => {
                let op = match assign.operator {
                    js::AssignmentOperator::Assign => None,
                    js::AssignmentOperator::Addition => Some(BinaryOp::Add),
                    js::AssignmentOperator::Subtraction => Some(BinaryOp::Sub),
                    js::AssignmentOperator::Multiplication => Some(BinaryOp::Mul),
                    js::AssignmentOperator::Division => Some(BinaryOp::Div),
                    js::AssignmentOperator::Remainder => Some(BinaryOp::Mod),
                    js::AssignmentOperator::ShiftLeft => Some(BinaryOp::Shl),
                    js::AssignmentOperator::ShiftRight => Some(BinaryOp::Shr),
                    js::AssignmentOperator::ShiftRightZeroFill => Some(BinaryOp::UShr),
                    js::AssignmentOperator::BitwiseOR => Some(BinaryOp::BitOr),
                    js::AssignmentOperator::BitwiseXOR => Some(BinaryOp::BitXor),
                    js::AssignmentOperator::BitwiseAnd => Some(BinaryOp::BitAnd),
                    _ => return Err(CompileError::unsupported("logical or exponent assignment")),
                };
                ExprKind::Assign {
                    op,
                    target: self.lower_assignment_target(&assign.left)?,
                    value: self.lower_expr(&assign.right)?,
                }
            }
            js::Expression::ConditionalExpression(cond) => ExprKind::Conditional {
                test: self.lower_expr(&cond.test)?,
                consequent: self.lower_expr(&cond.consequent)?,
                alternate: self.lower_expr(&cond.alternate)?,
            },
            js::Expression::CallExpression(call) => {
                if call.optional {
                    return Err(CompileError::unsupported("optional chaining"));
                }
                ExprKind::Call {
                    callee: self.lower_expr(&call.callee)?,
                    args: self.lower_arguments(&call.arguments)?,
                }
            }
            js::Expression::NewExpression(new) => ExprKind::New {
                callee: self.lower_expr(&new.callee)?,
                args: self.lower_arguments(&new.arguments)?,
            },
            js::Expression::StaticMemberExpression(member) => {
                return Ok(self.lower_static_member(member)?.kind);
            }
            js::Expression::ComputedMemberExpression(member) => {
                return Ok(self.lower_computed_member(member)?.kind);
            }
            js::Expression::SequenceExpression(seq) => {
                let mut exprs = Vec::with_capacity(seq.expressions.len());
                for e in &seq.expressions {
                    exprs.push(*self.lower_expr(e)?);
                }
                ExprKind::Sequence(self.b.slice(&exprs))
            }
            js::Expression::ParenthesizedExpression(paren) => {
                return Ok(self.lower_expr(&paren.expression)?.kind);
            }
            _ => return Err(CompileError::unsupported("expression form")),
        })
    }

    fn lower_property(&mut self, prop: &js::ObjectProperty<'_>) -> CompileResult<Property<'a>> {
        let key = if prop.computed {
            match prop.key.as_expression() {
                Some(expr) => PropertyKey::Computed(self.lower_expr(expr)?),
                None => return Err(CompileError::unsupported("property key")),
            }
        } else {
            match &prop.key {
                js::PropertyKey::StaticIdentifier(ident) => {
                    PropertyKey::Name(self.b.str(ident.name.as_str()))
                }
                js::PropertyKey::StringLiteral(lit) => {
                    PropertyKey::Name(self.b.str(lit.value.as_str()))
                }
                js::PropertyKey::NumericLiteral(lit) => {
                    PropertyKey::Name(self.b.str(&number_to_string(lit.value)))
                }
                _ => return Err(CompileError::unsupported("property key")),
            }
        };
        let kind = match prop.kind {
            js::PropertyKind::Init => PropertyKind::Init,
            js::PropertyKind::Get => PropertyKind::Get,
            js::PropertyKind::Set => PropertyKind::Set,
        };
        Ok(Property {
            key,
            value: self.lower_expr(&prop.value)?,
            kind,
            span: self.span(prop.span),
        })
    }
}

fn binary_op(op: js::BinaryOperator) -> Option<BinaryOp> {
    use js::BinaryOperator as B;
    Some(match op {
        B::Addition => BinaryOp::Add,
        B::Subtraction => BinaryOp::Sub,
        B::Multiplication => BinaryOp::Mul,
        B::Division => BinaryOp::Div,
        B::Remainder => BinaryOp::Mod,
        B::BitwiseAnd => BinaryOp::BitAnd,
        B::BitwiseOR => BinaryOp::BitOr,
        B::BitwiseXOR => BinaryOp::BitXor,
        B::ShiftLeft => BinaryOp::Shl,
        B::ShiftRight => BinaryOp::Shr,
        B::ShiftRightZeroFill => BinaryOp::UShr,
        B::Equality => BinaryOp::Eq,
        B::Inequality => BinaryOp::NotEq,
        B::StrictEquality => BinaryOp::StrictEq,
        B::StrictInequality => BinaryOp::StrictNotEq,
        B::LessThan => BinaryOp::Less,
        B::LessEqualThan => BinaryOp::LessEq,
        B::GreaterThan => BinaryOp::Greater,
        B::GreaterEqualThan => BinaryOp::GreaterEq,
        B::In => BinaryOp::In,
        B::Instanceof => BinaryOp::InstanceOf,
        B::Exponential => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_index() {
        let lines = LineIndex::new("a\nbc\n\nd");
        assert_eq!(lines.position(0), (1, 1));
        assert_eq!(lines.position(3), (2, 2));
        assert_eq!(lines.position(6), (4, 1));
    }

    #[test]
    fn test_lowers_function_and_directive() {
        let arena = Bump::new();
        let program =
            parse_program(&arena, "'use strict';\nfunction add(a, b) { return a + b; }").unwrap();
        assert!(program.has_use_strict);
        let StmtKind::Function(add) = program.body[0].kind else {
            panic!("expected function declaration");
        };
        assert_eq!(add.name, Some("add"));
        assert_eq!(add.params.len(), 2);
        assert_eq!(program.body[0].span.line, 2);
    }

    #[test]
    fn test_parenthesized_is_transparent() {
        let arena = Bump::new();
        let program = parse_program(&arena, "((x));").unwrap();
        let StmtKind::Expr(expr) = program.body[0].kind else {
            panic!("expected expression statement");
        };
        assert_eq!(expr.as_ident(), Some("x"));
    }

    #[test]
    fn test_unsupported_syntax() {
        let arena = Bump::new();
        for source in ["class A {}", "(() => 1)", "var {a} = o;", "function* g() {}", "2 ** 3"] {
            assert!(
                matches!(
                    parse_program(&arena, source),
                    Err(CompileError::Unsupported(_))
                ),
                "{source}"
            );
        }
    }

    #[test]
    fn test_parse_error() {
        let arena = Bump::new();
        assert!(matches!(
            parse_program(&arena, "var = ;"),
            Err(CompileError::Parse(_))
        ));
    }

    #[test]
    fn test_deep_source_lowers_to_placeholder() {
        let arena = Bump::new();
        let config = GeneratorConfig::default().with_max_depth(50);
        let source = format!("{}1{}", "-(".repeat(300), ")".repeat(300));
        let program = parse_source(&arena, &source, BodyKind::Program, false, &config).unwrap();
        let StmtKind::Expr(mut expr) = program.body[0].kind else {
            panic!("expected expression statement");
        };
        let mut depth = 0;
        while let ExprKind::Unary(_, inner) = expr.kind {
            expr = inner;
            depth += 1;
        }
        assert!(matches!(expr.kind, ExprKind::TooDeep));
        assert!(depth < 300);
    }

    #[test]
    fn test_nesting_depth_skips_literals_and_comments() {
        assert_eq!(nesting_depth("f(a[0], {b: 1})"), 2);
        assert_eq!(nesting_depth("'((((' + \"[[[\" // ((((\n"), 0);
        assert_eq!(nesting_depth("/* {{{{ */ x"), 0);
        assert_eq!(nesting_depth("`a ${ (b) } c ((`"), 2);
        assert_eq!(nesting_depth("'it\\'s (' + (x)"), 1);
    }

    #[test]
    fn test_too_deep_source_skips_the_parser() {
        let arena = Bump::new();
        let config = GeneratorConfig::default().with_max_parse_depth(8);
        let source = format!("var x = {}1{};", "(".repeat(9), ")".repeat(9));
        let root = parse_source(&arena, &source, BodyKind::Program, false, &config).unwrap();
        assert_eq!(root.body.len(), 1);
        assert!(matches!(root.body[0].kind, StmtKind::TooDeep));

        let shallow = format!("var x = {}1{};", "(".repeat(8), ")".repeat(8));
        let root = parse_source(&arena, &shallow, BodyKind::Program, false, &config).unwrap();
        assert!(matches!(root.body[0].kind, StmtKind::Var(_)));
    }
}
