//! The abstract syntax tree (§3.2). Every node category is a tagged sum
//! (`Decl`, `Stmt`, `Expr`, `Pattern`, `TypeExpr`) rather than a trait object
//! hierarchy — a dispatching `match` in the checker and evaluator replaces
//! dynamic method lookup, per §9's note on polymorphism over AST nodes.
//!
//! `ExprNode` carries a `resolved_type` slot that the checker fills in
//! place; it starts `None` and must hold a wildcard-free type once checking
//! succeeds (§8, invariant 2).

use std::cell::RefCell;

use num_bigint::BigInt;

use crate::common::multiphase::Identifier;
use crate::lexing::source::Span;
use crate::types::Type;

#[derive(Clone, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    Int(BigInt),
    Float(f64),
    Str(String),
}

/// The root of one parse: either a whole module file or a REPL session's
/// whole accumulated buffer (§4.6).
#[derive(Clone, Debug)]
pub struct Root {
    pub decls: Vec<Decl>,
}

#[derive(Clone, Debug)]
pub struct Decl {
    pub span: Span,
    pub kind: DeclKind,
}

#[derive(Clone, Debug)]
pub enum DeclKind {
    Var {
        mutable: bool,
        pattern: Pattern,
        annotation: Option<TypeExpr>,
        assert: bool,
        init: Expr,
    },
    Proc {
        name: Identifier,
        literal: ProcLiteral,
    },
    TypeAlias {
        name: Identifier,
        aliased: TypeExpr,
    },
    Struct {
        name: Identifier,
        tuple_form: bool,
        fields: Vec<FieldDecl>,
    },
    Enum {
        name: Identifier,
        variants: Vec<VariantDecl>,
    },
    Test {
        name: String,
        body: Block,
    },
    /// A statement or expression appearing at module/REPL top level,
    /// alongside declarations (§4.3 allows statements to be interleaved).
    Stmt(Stmt),
}

#[derive(Clone, Debug)]
pub struct FieldDecl {
    pub mutable: bool,
    /// `None` for a positional field in a tuple-form `struct`/variant.
    pub name: Option<Identifier>,
    pub annotation: TypeExpr,
}

#[derive(Clone, Debug)]
pub struct VariantDecl {
    pub name: Identifier,
    pub constant: bool,
    pub tuple_form: bool,
    pub fields: Vec<FieldDecl>,
}

#[derive(Clone, Debug)]
pub struct Stmt {
    pub span: Span,
    pub kind: StmtKind,
}

#[derive(Clone, Debug)]
pub enum StmtKind {
    Break(Option<Identifier>),
    Continue(Option<Identifier>),
    Return(Option<Expr>),
    Assert(Expr),
    Loop {
        label: Option<Identifier>,
        body: Block,
    },
    While {
        test: Expr,
        body: Block,
    },
    AssignVar {
        target: Identifier,
        value: Expr,
    },
    AssignField {
        target: Expr,
        field: Identifier,
        value: Expr,
    },
    Expr(Expr),
}

pub type Expr = Box<ExprNode>;

#[derive(Clone, Debug)]
pub struct ExprNode {
    pub span: Span,
    pub kind: ExprKind,
    pub resolved_type: RefCell<Option<Type>>,
}

impl ExprNode {
    pub fn new(span: Span, kind: ExprKind) -> Expr {
        Box::new(Self {
            span,
            kind,
            resolved_type: RefCell::new(None),
        })
    }
}

#[derive(Clone, Debug)]
pub struct Block {
    pub span: Span,
    /// Declarations and statements interleaved, in source order (§4.3: a
    /// block is a sequence of statements whose value is the last one's).
    pub items: Vec<BlockItem>,
}

#[derive(Clone, Debug)]
pub enum BlockItem {
    Decl(Decl),
    Stmt(Stmt),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    NotEq,
    IdEq,
    IdNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Default,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UnaryOp {
    Neg,
    Not,
    Spread,
}

#[derive(Clone, Debug)]
pub struct FieldInit {
    pub name: FieldInitName,
    pub value: Expr,
}

#[derive(Clone, Debug)]
pub enum FieldInitName {
    Named(Identifier),
    Positional(usize),
}

#[derive(Clone, Debug)]
pub struct MatchCase {
    pub pattern: Pattern,
    pub asserted_type: Option<TypeExpr>,
    pub guard: Option<Expr>,
    pub body: Expr,
}

#[derive(Clone, Debug)]
pub struct Param {
    pub pattern: Pattern,
    pub annotation: Option<TypeExpr>,
}

#[derive(Clone, Debug)]
pub struct ProcLiteral {
    pub span: Span,
    pub params: Vec<Param>,
    pub return_annotation: Option<TypeExpr>,
    pub body: Block,
}

#[derive(Clone, Debug)]
pub enum ExprKind {
    Block(Block),
    Tuple(Vec<Expr>),
    StructInit {
        name: Identifier,
        fields: Vec<FieldInit>,
        spread: Option<Expr>,
    },
    EnumInit {
        enum_name: Identifier,
        variant_name: Identifier,
        fields: Vec<FieldInit>,
    },
    Group(Expr),
    If {
        pattern: Option<Pattern>,
        asserted_type: Option<TypeExpr>,
        test: Expr,
        then: Block,
        else_: Option<Block>,
    },
    Match {
        test: Option<Expr>,
        cases: Vec<MatchCase>,
    },
    Throw(Expr),
    Proc(ProcLiteral),
    TypeValue(TypeExpr),
    Binary {
        op: BinaryOp,
        left: Expr,
        right: Expr,
    },
    Unary {
        op: UnaryOp,
        operand: Expr,
    },
    Call {
        callee: Expr,
        args: Vec<Expr>,
    },
    Member {
        target: Expr,
        field: MemberField,
    },
    Literal(Literal),
    Identifier(Identifier),
}

#[derive(Clone, Debug)]
pub enum MemberField {
    Named(Identifier),
    Positional(usize),
}

#[derive(Clone, Debug)]
pub struct Pattern {
    pub span: Span,
    pub kind: PatternKind,
}

#[derive(Clone, Debug)]
pub enum PatternKind {
    Wildcard,
    Literal(Literal),
    Identifier {
        name: Identifier,
        mutable: bool,
    },
    As(Box<Pattern>, Box<Pattern>),
    Tuple(Vec<Pattern>),
    Struct {
        name: Identifier,
        tuple_form: bool,
        fields: Vec<PatternField>,
    },
    Variant {
        enum_name: Option<Identifier>,
        variant_name: Identifier,
        tuple_form: bool,
        fields: Vec<PatternField>,
    },
}

#[derive(Clone, Debug)]
pub struct PatternField {
    pub name: FieldInitName,
    pub pattern: Pattern,
}

#[derive(Clone, Debug)]
pub struct TypeExpr {
    pub span: Span,
    pub kind: TypeExprKind,
}

#[derive(Clone, Debug)]
pub enum TypeExprKind {
    Identifier(Identifier),
    Wildcard,
    Proc {
        params: Vec<TypeExpr>,
        returns: Box<TypeExpr>,
    },
    Tuple(Vec<TypeExpr>),
}
