//! Annotated syntax tree
//!
//! The generator's input. Nodes live in a `bumpalo` arena and hold only
//! arena references, so a tree of any depth is released in one step with the
//! arena and never through recursive drops. Function nodes carry a
//! [`ScopeInfo`] slot that [`analysis`](crate::analysis) fills in.

use std::cell::OnceCell;

use bumpalo::Bump;

/// Source extent of a node
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Span {
    /// Byte offset of the first character
    pub start: u32,
    /// Byte offset one past the last character
    pub end: u32,
    /// Line of `start` (1-indexed)
    pub line: u32,
    /// Column of `start` (1-indexed)
    pub column: u32,
}

/// Binary operators with a direct instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `%`
    Mod,
    /// `&`
    BitAnd,
    /// `|`
    BitOr,
    /// `^`
    BitXor,
    /// `<<`
    Shl,
    /// `>>`
    Shr,
    /// `>>>`
    UShr,
    /// `==`
    Eq,
    /// `!=`
    NotEq,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNotEq,
    /// `<`
    Less,
    /// `<=`
    LessEq,
    /// `>`
    Greater,
    /// `>=`
    GreaterEq,
    /// `in`
    In,
    /// `instanceof`
    InstanceOf,
}

impl BinaryOp {
    /// Equality family (candidates for `typeof` fusion)
    pub fn is_equality(self) -> bool {
        matches!(
            self,
            BinaryOp::Eq | BinaryOp::NotEq | BinaryOp::StrictEq | BinaryOp::StrictNotEq
        )
    }
}

/// Short-circuiting operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    /// `&&`
    And,
    /// `||`
    Or,
    /// `??`
    Coalesce,
}

/// Prefix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Minus,
    /// `+x`
    Plus,
    /// `!x`
    Not,
    /// `~x`
    BitNot,
    /// `typeof x`
    TypeOf,
    /// `void x`
    Void,
    /// `delete x`
    Delete,
}

/// `++` / `--`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOp {
    /// `++`
    Increment,
    /// `--`
    Decrement,
}

/// An expression node
#[derive(Debug, Clone, Copy)]
pub struct Expr<'a> {
    /// Node payload
    pub kind: ExprKind<'a>,
    /// Source extent
    pub span: Span,
}

/// Expression payloads
#[derive(Debug, Clone, Copy)]
pub enum ExprKind<'a> {
    /// Numeric literal
    Number(f64),
    /// String literal
    String(&'a str),
    /// `true` / `false`
    Bool(bool),
    /// `null`
    Null,
    /// `this`
    This,
    /// Identifier reference
    Ident(&'a str),
    /// Regular-expression literal
    RegExp {
        /// Pattern source
        pattern: &'a str,
        /// Flag characters
        flags: &'a str,
    },
    /// Array literal
    Array(&'a [ArrayElement<'a>]),
    /// Object literal
    Object(&'a [Property<'a>]),
    /// Function expression
    Function(&'a FunctionNode<'a>),
    /// Prefix operator
    Unary(UnaryOp, &'a Expr<'a>),
    /// `++`/`--` on an assignable target
    Update {
        /// Operator
        op: UpdateOp,
        /// Prefix form yields the updated value
        prefix: bool,
        /// Identifier, member or index expression
        target: &'a Expr<'a>,
    },
    /// Binary operator
    Binary(BinaryOp, &'a Expr<'a>, &'a Expr<'a>),
    /// Short-circuiting operator
    Logical(LogicalOp, &'a Expr<'a>, &'a Expr<'a>),
    /// Plain (`op == None`) or compound assignment
    Assign {
        /// Operator of a compound assignment
        op: Option<BinaryOp>,
        /// Identifier, member or index expression
        target: &'a Expr<'a>,
        /// Right-hand side
        value: &'a Expr<'a>,
    },
    /// `test ? consequent : alternate`
    Conditional {
        /// Condition
        test: &'a Expr<'a>,
        /// Value when true
        consequent: &'a Expr<'a>,
        /// Value when false
        alternate: &'a Expr<'a>,
    },
    /// Function call
    Call {
        /// Callee
        callee: &'a Expr<'a>,
        /// Arguments
        args: &'a [Argument<'a>],
    },
    /// `new` expression
    New {
        /// Constructor
        callee: &'a Expr<'a>,
        /// Arguments
        args: &'a [Argument<'a>],
    },
    /// `object.property`
    Member {
        /// Base
        object: &'a Expr<'a>,
        /// Property name
        property: &'a str,
    },
    /// `object[property]`
    Index {
        /// Base
        object: &'a Expr<'a>,
        /// Key expression
        property: &'a Expr<'a>,
    },
    /// Comma expression
    Sequence(&'a [Expr<'a>]),
    /// A subtree too deep to lower; generates a stack-exceeded throw
    TooDeep,
}

impl<'a> Expr<'a> {
    /// Identifier name, if this is a bare identifier
    pub fn as_ident(&self) -> Option<&'a str> {
        match self.kind {
            ExprKind::Ident(name) => Some(name),
            _ => None,
        }
    }

    /// Whether evaluating the node cannot have side effects or observe any
    pub fn is_pure_literal(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Number(_)
                | ExprKind::String(_)
                | ExprKind::Bool(_)
                | ExprKind::Null
                | ExprKind::This
        )
    }

    /// Whether the node may be assigned to
    pub fn is_assignable(&self) -> bool {
        matches!(
            self.kind,
            ExprKind::Ident(_) | ExprKind::Member { .. } | ExprKind::Index { .. }
        )
    }
}

/// Array literal element
#[derive(Debug, Clone, Copy)]
pub enum ArrayElement<'a> {
    /// Ordinary element
    Expr(&'a Expr<'a>),
    /// Elision
    Hole,
    /// `...iterable`
    Spread(&'a Expr<'a>),
}

/// Call or `new` argument
#[derive(Debug, Clone, Copy)]
pub enum Argument<'a> {
    /// Ordinary argument
    Expr(&'a Expr<'a>),
    /// `...iterable`
    Spread(&'a Expr<'a>),
}

/// Object literal property key
#[derive(Debug, Clone, Copy)]
pub enum PropertyKey<'a> {
    /// Identifier, string or numeric key, already converted to its name
    Name(&'a str),
    /// `[expr]`
    Computed(&'a Expr<'a>),
}

/// Object literal property flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    /// `key: value`
    Init,
    /// `get key() {}`
    Get,
    /// `set key(v) {}`
    Set,
}

/// Object literal property
#[derive(Debug, Clone, Copy)]
pub struct Property<'a> {
    /// Key
    pub key: PropertyKey<'a>,
    /// Value or accessor function
    pub value: &'a Expr<'a>,
    /// Flavour
    pub kind: PropertyKind,
    /// Source extent
    pub span: Span,
}

/// A statement node
#[derive(Debug, Clone, Copy)]
pub struct Stmt<'a> {
    /// Node payload
    pub kind: StmtKind<'a>,
    /// Source extent
    pub span: Span,
}

/// Statement payloads
#[derive(Debug, Clone, Copy)]
pub enum StmtKind<'a> {
    /// Expression statement
    Expr(&'a Expr<'a>),
    /// `var`, `let` or `const` declaration
    Var(&'a [VarDeclarator<'a>]),
    /// Function declaration (hoisted; no code at its position)
    Function(&'a FunctionNode<'a>),
    /// `return`
    Return(Option<&'a Expr<'a>>),
    /// `if`
    If {
        /// Condition
        test: &'a Expr<'a>,
        /// Then branch
        consequent: &'a Stmt<'a>,
        /// Else branch
        alternate: Option<&'a Stmt<'a>>,
    },
    /// `{ ... }`
    Block(&'a [Stmt<'a>]),
    /// `while`
    While {
        /// Condition
        test: &'a Expr<'a>,
        /// Body
        body: &'a Stmt<'a>,
    },
    /// `do ... while`
    DoWhile {
        /// Body
        body: &'a Stmt<'a>,
        /// Condition
        test: &'a Expr<'a>,
    },
    /// `for (init; test; update)`
    For {
        /// Initializer
        init: Option<ForInit<'a>>,
        /// Condition
        test: Option<&'a Expr<'a>>,
        /// Update
        update: Option<&'a Expr<'a>>,
        /// Body
        body: &'a Stmt<'a>,
    },
    /// `for (target in object)`
    ForIn {
        /// Loop variable
        target: ForInTarget<'a>,
        /// Enumerated object
        object: &'a Expr<'a>,
        /// Body
        body: &'a Stmt<'a>,
    },
    /// `break [label]`
    Break(Option<&'a str>),
    /// `continue [label]`
    Continue(Option<&'a str>),
    /// `label: body`
    Labeled {
        /// Label name
        label: &'a str,
        /// Labelled statement
        body: &'a Stmt<'a>,
    },
    /// `switch`
    Switch {
        /// Scrutinee
        discriminant: &'a Expr<'a>,
        /// Clauses in source order
        cases: &'a [SwitchCase<'a>],
    },
    /// `throw`
    Throw(&'a Expr<'a>),
    /// `try`
    Try {
        /// Protected block
        block: &'a [Stmt<'a>],
        /// `catch` clause
        handler: Option<CatchClause<'a>>,
        /// `finally` block
        finalizer: Option<&'a [Stmt<'a>]>,
    },
    /// `with`
    With {
        /// Scope object
        object: &'a Expr<'a>,
        /// Body
        body: &'a Stmt<'a>,
    },
    /// `debugger`
    Debugger,
    /// `;`
    Empty,
    /// A subtree too deep to lower; generates a stack-exceeded throw
    TooDeep,
}

/// One name of a declaration
#[derive(Debug, Clone, Copy)]
pub struct VarDeclarator<'a> {
    /// Declared name
    pub name: &'a str,
    /// Initializer
    pub init: Option<&'a Expr<'a>>,
    /// `const`
    pub read_only: bool,
    /// Source extent
    pub span: Span,
}

/// `for` initializer
#[derive(Debug, Clone, Copy)]
pub enum ForInit<'a> {
    /// Declaration
    Var(&'a [VarDeclarator<'a>]),
    /// Expression
    Expr(&'a Expr<'a>),
}

/// `for-in` loop variable
#[derive(Debug, Clone, Copy)]
pub enum ForInTarget<'a> {
    /// `for (var name in ...)`
    Var(&'a str),
    /// `for (target in ...)` with an assignable expression
    Expr(&'a Expr<'a>),
}

/// `case`/`default` clause
#[derive(Debug, Clone, Copy)]
pub struct SwitchCase<'a> {
    /// Case value, `None` for `default`
    pub test: Option<&'a Expr<'a>>,
    /// Clause body
    pub body: &'a [Stmt<'a>],
}

/// `catch` clause
#[derive(Debug, Clone, Copy)]
pub struct CatchClause<'a> {
    /// Bound exception name
    pub param: Option<&'a str>,
    /// Handler body
    pub body: &'a [Stmt<'a>],
}

/// Source body kind of a function node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    /// Top-level program
    Program,
    /// Function body
    Function,
    /// Eval body
    Eval,
}

/// Formal parameter
#[derive(Debug, Clone, Copy)]
pub struct Param<'a> {
    /// Bound name
    pub name: &'a str,
    /// Source extent
    pub span: Span,
}

/// A program, eval body or function
#[derive(Debug)]
pub struct FunctionNode<'a> {
    /// Body kind
    pub kind: BodyKind,
    /// Function name
    pub name: Option<&'a str>,
    /// Named function expressions bind their own name in their body
    pub is_expression: bool,
    /// Formal parameters
    pub params: &'a [Param<'a>],
    /// Body statements
    pub body: &'a [Stmt<'a>],
    /// Body carries a `"use strict"` directive
    pub has_use_strict: bool,
    /// Source extent
    pub span: Span,
    info: OnceCell<&'a ScopeInfo<'a>>,
}

impl<'a> FunctionNode<'a> {
    /// Analysis results, once [`analyze`](crate::analysis::analyze) ran
    pub fn scope_info(&self) -> Option<&'a ScopeInfo<'a>> {
        self.info.get().copied()
    }

    pub(crate) fn set_scope_info(&self, info: &'a ScopeInfo<'a>) {
        // A tree is analyzed once; later calls keep the first result.
        let _ = self.info.set(info);
    }
}

/// Declared name of a body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Declaration<'a> {
    /// Name
    pub name: &'a str,
    /// `const`
    pub read_only: bool,
}

/// How a function body uses its `arguments` object
///
/// A materialized object is never mapped, in sloppy code too: it holds the
/// values passed on entry, and later writes to a parameter or to the object
/// are not seen through the other. `Direct` reads go to the argument
/// registers, so they follow parameters that live there. A sloppy body whose
/// captured parameter lives in the activation is materialized instead, which
/// means `function f(a) { function g() { return a; } a = 2; return arguments[0]; }`
/// returns the value passed in, not 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArgumentsUsage {
    /// Never referenced
    #[default]
    None,
    /// Only `arguments[<literal>]` and `arguments.length` reads
    Direct,
    /// An unmapped object is created on entry
    Materialize,
}

/// Body-wide facts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Features {
    /// Strict mode code
    pub strict: bool,
    /// Direct `eval` call in this body
    pub uses_eval: bool,
    /// Direct `eval` call here or in a nested function
    pub contains_eval: bool,
    /// `with` statement in this body
    pub uses_with: bool,
    /// `this` referenced in this body
    pub uses_this: bool,
    /// `arguments` referenced in this body
    pub uses_arguments: bool,
    /// Nested function literals
    pub has_closures: bool,
    /// `catch` clause in this body
    pub has_catch: bool,
    /// Identifiers this body does not declare
    pub has_free_references: bool,
}

/// Analysis results for one body
#[derive(Debug, Clone, Copy)]
pub struct ScopeInfo<'a> {
    /// `var`/`let`/`const` names in source order, first declaration wins
    pub declarations: &'a [Declaration<'a>],
    /// Hoisted function declarations in source order
    pub functions: &'a [&'a FunctionNode<'a>],
    /// Declared names that must live in the activation record
    pub captured: &'a [&'a str],
    /// Body-wide facts
    pub features: Features,
    /// `arguments` classification
    pub arguments: ArgumentsUsage,
}

impl<'a> ScopeInfo<'a> {
    /// Whether `name` must live in the activation record
    pub fn is_captured(&self, name: &str) -> bool {
        self.captured.iter().any(|&c| c == name)
    }

    /// Whether the body creates an activation record
    pub fn needs_activation(&self) -> bool {
        !self.captured.is_empty()
    }

    /// Whether the body needs the current scope chain in a register
    pub fn needs_scope_chain(&self) -> bool {
        let f = &self.features;
        self.needs_activation()
            || f.has_closures
            || f.contains_eval
            || f.uses_with
            || f.has_catch
            || f.has_free_references
    }
}

/// Arena-backed node constructors
#[derive(Clone, Copy)]
pub struct AstBuilder<'a> {
    arena: &'a Bump,
}

impl<'a> AstBuilder<'a> {
    /// Build nodes into `arena`
    pub fn new(arena: &'a Bump) -> Self {
        Self { arena }
    }

    /// The backing arena
    pub fn arena(&self) -> &'a Bump {
        self.arena
    }

    /// Copy a string into the arena
    pub fn str(&self, s: &str) -> &'a str {
        self.arena.alloc_str(s)
    }

    /// Copy a slice into the arena
    pub fn slice<T: Copy>(&self, items: &[T]) -> &'a [T] {
        self.arena.alloc_slice_copy(items)
    }

    /// Allocate an expression
    pub fn expr(&self, kind: ExprKind<'a>, span: Span) -> &'a Expr<'a> {
        self.arena.alloc(Expr { kind, span })
    }

    /// Allocate a statement
    pub fn stmt(&self, kind: StmtKind<'a>, span: Span) -> &'a Stmt<'a> {
        self.arena.alloc(Stmt { kind, span })
    }

    /// Numeric literal
    pub fn number(&self, value: f64) -> &'a Expr<'a> {
        self.expr(ExprKind::Number(value), Span::default())
    }

    /// Identifier reference
    pub fn ident(&self, name: &str) -> &'a Expr<'a> {
        let name = self.str(name);
        self.expr(ExprKind::Ident(name), Span::default())
    }

    /// Binary expression
    pub fn binary(&self, op: BinaryOp, lhs: &'a Expr<'a>, rhs: &'a Expr<'a>) -> &'a Expr<'a> {
        self.expr(ExprKind::Binary(op, lhs, rhs), Span::default())
    }

    /// Call with plain arguments
    pub fn call(&self, callee: &'a Expr<'a>, args: &[&'a Expr<'a>]) -> &'a Expr<'a> {
        let args: Vec<Argument<'a>> = args.iter().map(|&a| Argument::Expr(a)).collect();
        let args = self.slice(&args);
        self.expr(ExprKind::Call { callee, args }, Span::default())
    }

    /// Expression statement
    pub fn expr_stmt(&self, expr: &'a Expr<'a>) -> Stmt<'a> {
        Stmt {
            kind: StmtKind::Expr(expr),
            span: expr.span,
        }
    }

    /// `return value`
    pub fn return_stmt(&self, value: Option<&'a Expr<'a>>) -> Stmt<'a> {
        Stmt {
            kind: StmtKind::Return(value),
            span: value.map(|v| v.span).unwrap_or_default(),
        }
    }

    /// Allocate a function-like node
    #[allow(clippy::too_many_arguments)]
    pub fn function(
        &self,
        kind: BodyKind,
        name: Option<&str>,
        is_expression: bool,
        params: &[&str],
        body: &[Stmt<'a>],
        has_use_strict: bool,
        span: Span,
    ) -> &'a FunctionNode<'a> {
        let params: Vec<Param<'a>> = params
            .iter()
            .map(|p| Param {
                name: self.str(p),
                span,
            })
            .collect();
        self.arena.alloc(FunctionNode {
            kind,
            name: name.map(|n| self.str(n)),
            is_expression,
            params: self.slice(&params),
            body: self.slice(body),
            has_use_strict,
            span,
            info: OnceCell::new(),
        })
    }

    /// Top-level program node
    pub fn program(&self, body: &[Stmt<'a>], has_use_strict: bool) -> &'a FunctionNode<'a> {
        self.function(
            BodyKind::Program,
            None,
            false,
            &[],
            body,
            has_use_strict,
            Span::default(),
        )
    }

    /// Allocate the results of analysis
    pub(crate) fn scope_info(&self, info: ScopeInfo<'a>) -> &'a ScopeInfo<'a> {
        self.arena.alloc(info)
    }
}
