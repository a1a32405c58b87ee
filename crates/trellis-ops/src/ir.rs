//! Bound statement and expression model
//!
//! The shapes here arrive from the hosting binder with types already
//! resolved. Lowering rewrites them in place (attaching resource bindings)
//! rather than copying into a parallel tree; everything is immutable once
//! the pass finishes.

use trellis_diagnostics::Span;
use trellis_types::{CaptureId, ConversionKind, DisposeMember, LocalId, Type};

use crate::resource::ResourceBinding;

/// A local variable declared somewhere in the lowered body.
#[derive(Debug, Clone)]
pub struct Local {
    pub id: LocalId,
    pub name: String,
    pub ty: Type,
    pub span: Span,
}

/// One lowered body: a local table plus the root block.
///
/// Locals are registered up front (the binder knows them all); statements
/// reference them by id.
#[derive(Debug, Clone, Default)]
pub struct BlockBody {
    pub locals: Vec<Local>,
    pub block: Block,
}

impl BlockBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a local and return its id.
    pub fn add_local(&mut self, name: impl Into<String>, ty: Type, span: Span) -> LocalId {
        let id = self.locals.len() as LocalId;
        self.locals.push(Local {
            id,
            name: name.into(),
            ty,
            span,
        });
        id
    }

    /// Look up a local by id.
    pub fn local(&self, id: LocalId) -> Option<&Local> {
        self.locals.get(id as usize)
    }
}

/// An ordered list of statements.
#[derive(Debug, Clone, Default)]
pub struct Block {
    pub statements: Vec<Statement>,
    pub span: Span,
}

impl Block {
    pub fn new(statements: Vec<Statement>, span: Span) -> Self {
        Self { statements, span }
    }
}

/// A bound statement.
#[derive(Debug, Clone)]
pub enum Statement {
    /// Expression evaluated for its side effects
    Expression(Expr),
    /// Ordinary or resource-marked variable declaration group
    Declaration(DeclarationGroup),
    /// Block-form resource statement with an explicit body
    Resource(ResourceScope),
    /// Labeled statement; the label is a jump target
    Labeled {
        label: String,
        body: Box<Statement>,
        span: Span,
    },
    /// Unconditional jump to a label in the same body
    Goto { label: String, span: Span },
    /// Two-way branch
    If {
        condition: Expr,
        then_body: Box<Statement>,
        else_body: Option<Box<Statement>>,
        span: Span,
    },
    /// Pre-tested loop
    While {
        condition: Expr,
        body: Box<Statement>,
        span: Span,
    },
    /// Nested block scope
    Block(Block),
    /// Early exit from the body
    Return { span: Span },
}

impl Statement {
    pub fn span(&self) -> Span {
        match self {
            Statement::Expression(e) => e.span(),
            Statement::Declaration(g) => g.span,
            Statement::Resource(r) => r.span,
            Statement::Labeled { span, .. }
            | Statement::Goto { span, .. }
            | Statement::If { span, .. }
            | Statement::While { span, .. }
            | Statement::Return { span } => *span,
            Statement::Block(b) => b.span,
        }
    }
}

/// A declaration group: one or more declarations sharing a statement.
///
/// `is_resource` marks the declaration form of the resource construct: each
/// declarator's disposal scope extends over the remaining statements of the
/// enclosing block.
#[derive(Debug, Clone)]
pub struct DeclarationGroup {
    pub declarations: Vec<Declaration>,
    pub is_resource: bool,
    pub is_await: bool,
    pub span: Span,
}

impl DeclarationGroup {
    /// Iterate every declarator in the group, in declaration order.
    pub fn declarators(&self) -> impl Iterator<Item = &Declarator> {
        self.declarations.iter().flat_map(|d| d.declarators.iter())
    }

    /// Mutable variant of [`declarators`](Self::declarators).
    pub fn declarators_mut(&mut self) -> impl Iterator<Item = &mut Declarator> {
        self.declarations
            .iter_mut()
            .flat_map(|d| d.declarators.iter_mut())
    }
}

/// One declaration: a declared type shared by its declarators.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub declared_ty: Type,
    pub is_const: bool,
    pub declarators: Vec<Declarator>,
    pub span: Span,
}

/// One name bound by a declaration.
#[derive(Debug, Clone)]
pub struct Declarator {
    pub local: LocalId,
    pub initializer: Option<Expr>,
    /// Classification result, attached by lowering for resource groups
    pub binding: Option<ResourceBinding>,
    pub span: Span,
}

impl Declarator {
    pub fn new(local: LocalId, initializer: Option<Expr>, span: Span) -> Self {
        Self {
            local,
            initializer,
            binding: None,
            span,
        }
    }
}

/// Block-form resource statement: `use (resource) { body }`.
#[derive(Debug, Clone)]
pub struct ResourceScope {
    pub resource: Resource,
    pub body: Box<Statement>,
    pub is_await: bool,
    pub span: Span,
}

/// The resource of a block-form statement: either a declaration group whose
/// declarators all become resources, or a bare expression.
#[derive(Debug, Clone)]
pub enum Resource {
    Declaration(DeclarationGroup),
    Expression {
        expr: Expr,
        /// Classification result, attached by lowering
        binding: Option<ResourceBinding>,
    },
}

/// A compile-time constant value.
#[derive(Debug, Clone, PartialEq)]
pub enum Const {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

/// A bound expression with a known type.
#[derive(Debug, Clone)]
pub enum Expr {
    /// Constant literal
    Literal { value: Const, ty: Type, span: Span },
    /// Reference to a declared local
    LocalRef { local: LocalId, ty: Type, span: Span },
    /// Reference to an enclosing parameter
    ParamRef { name: String, ty: Type, span: Span },
    /// Object allocation
    New { ty: Type, span: Span },
    /// Bound call to a user function or method
    Call {
        callee: String,
        args: Vec<Expr>,
        ty: Type,
        span: Span,
    },
    /// Synthesized invocation of a resolved disposal member
    DisposeCall {
        member: DisposeMember,
        receiver: Box<Expr>,
        span: Span,
    },
    /// Three-way conditional expression
    Conditional {
        condition: Box<Expr>,
        when_true: Box<Expr>,
        when_false: Box<Expr>,
        ty: Type,
        span: Span,
    },
    /// Null-coalescing expression
    NullCoalesce {
        value: Box<Expr>,
        fallback: Box<Expr>,
        ty: Type,
        span: Span,
    },
    /// Conversion of a known classification
    Conversion {
        kind: ConversionKind,
        operand: Box<Expr>,
        ty: Type,
        span: Span,
    },
    /// Synthesized null test (type is always `bool`)
    IsNull { operand: Box<Expr>, span: Span },
    /// Awaited expression; suspension point in the graph
    Await { operand: Box<Expr>, span: Span },
    /// Read of a write-once flow-capture slot (graph-only)
    CaptureRef { id: CaptureId, ty: Type, span: Span },
}

impl Expr {
    /// The `null` literal.
    pub fn null(span: Span) -> Self {
        Expr::Literal {
            value: Const::Null,
            ty: Type::Null,
            span,
        }
    }

    /// Reference to `local` of type `ty`.
    pub fn local(local: LocalId, ty: Type, span: Span) -> Self {
        Expr::LocalRef { local, ty, span }
    }

    /// The static type of this expression.
    pub fn ty(&self) -> Type {
        match self {
            Expr::Literal { ty, .. }
            | Expr::LocalRef { ty, .. }
            | Expr::ParamRef { ty, .. }
            | Expr::New { ty, .. }
            | Expr::Call { ty, .. }
            | Expr::Conditional { ty, .. }
            | Expr::NullCoalesce { ty, .. }
            | Expr::Conversion { ty, .. }
            | Expr::CaptureRef { ty, .. } => ty.clone(),
            Expr::DisposeCall { member, .. } => member.returns.clone(),
            Expr::IsNull { .. } => Type::Bool,
            Expr::Await { operand, .. } => match operand.ty() {
                Type::Task(inner) => *inner,
                _ => Type::Void,
            },
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::LocalRef { span, .. }
            | Expr::ParamRef { span, .. }
            | Expr::New { span, .. }
            | Expr::Call { span, .. }
            | Expr::DisposeCall { span, .. }
            | Expr::Conditional { span, .. }
            | Expr::NullCoalesce { span, .. }
            | Expr::Conversion { span, .. }
            | Expr::IsNull { span, .. }
            | Expr::Await { span, .. }
            | Expr::CaptureRef { span, .. } => *span,
        }
    }

    /// The constant value of this expression, if statically known.
    /// Conversions preserve their operand's constant.
    pub fn constant(&self) -> Option<&Const> {
        match self {
            Expr::Literal { value, .. } => Some(value),
            Expr::Conversion { operand, .. } => operand.constant(),
            _ => None,
        }
    }

    /// Check whether this expression is provably the `null` literal.
    pub fn is_constant_null(&self) -> bool {
        matches!(self.constant(), Some(Const::Null))
    }
}
