//! The decorated syntax tree (§3, §6). Node *shape* (kinds, spans, child
//! links) is fixed by the external parser; this module defines that fixed
//! contract plus the decoration fields the semantic analyzer attaches in
//! place (`QualType`, value category, resolved entity, constant value,
//! cleanup stack).

use crate::conversion::ConstructKind;
use crate::span::FileSpan;
use crate::symbol::Symbol;
use crate::types::entity::{AccessControl, EntityId, ProcKind};
use crate::types::ty::{LifetimeOpKind, QualType, ValueCategory};

/// A compile-time constant value attached to a decorated expression node.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstValue {
  Int(i128),
  Float(f64),
  /// A pointer constant, either null or the address of a static object;
  /// opaque at this layer (resolved by the IR generator).
  Pointer(Option<EntityId>),
}

/// One entry of a statement's cleanup stack (§3): an object plus the
/// lifetime operation to run for it on every exit path.
#[derive(Clone, Debug)]
pub struct Cleanup {
  pub object: EntityId,
  pub op: LifetimeOpKind,
}

/// Decoration common to every expression node, attached in place by the
/// analyzer (§3 "Syntax tree decoration").
#[derive(Clone, Debug, Default)]
pub struct ExprDecoration {
  pub ty: Option<QualType>,
  pub value_cat: Option<ValueCategory>,
  pub entity: Option<EntityId>,
  pub constant: Option<ConstValue>,
  /// Set once analysis determines this node is unrecoverable; downstream
  /// visitors skip poisoned nodes rather than cascading further errors.
  pub poisoned: bool,
}

/// Binary operators, fixed by the parser's operator table (§6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BinOp {
  Add, Sub, Mul, Div, Rem,
  BitAnd, BitOr, BitXor, Shl, Shr,
  LogAnd, LogOr,
  Eq, Ne, Lt, Le, Gt, Ge,
  Assign, AddAssign, SubAssign, MulAssign, DivAssign, RemAssign,
  BitAndAssign, BitOrAssign, BitXorAssign, ShlAssign, ShrAssign,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UnOp { Neg, Not, BitNot, Deref, AddrOf }

/// An expression node. Kinds mirror `original_source/lib/AST/AST.h`'s
/// `Expression` hierarchy (`Identifier`, `IntegerLiteral`, ...,
/// `ListExpression`), plus the nodes the analyzer/conversion engine insert
/// (`Conversion`, `Construction`, `Materialize`).
#[derive(Debug)]
pub struct Expr {
  pub span: FileSpan,
  pub deco: ExprDecoration,
  pub kind: ExprKind,
}

#[derive(Debug)]
pub enum ExprKind {
  Identifier(Symbol),
  IntLiteral(i128),
  BoolLiteral(bool),
  FloatLiteral(f64),
  StringLiteral(Box<str>),
  UnaryPrefix { op: UnOp, operand: Box<Expr> },
  Binary { op: BinOp, lhs: Box<Expr>, rhs: Box<Expr> },
  MemberAccess { base: Box<Expr>, member: Symbol },
  Reference { operand: Box<Expr> },
  Unique { operand: Box<Expr> },
  Conditional { cond: Box<Expr>, then: Box<Expr>, els: Box<Expr> },
  Call { callee: Box<Expr>, args: Vec<Expr> },
  Subscript { base: Box<Expr>, index: Box<Expr> },
  Slice { base: Box<Expr>, begin: Box<Expr>, count: Box<Expr> },
  ListExpr(Vec<Expr>),
  This,
  /// Inserted by the analyzer/C2 when a conversion is required.
  Conversion { operand: Box<Expr>, target: QualType },
  /// Inserted by the analyzer/C2 to synthesize an object construction.
  Construction { kind: ConstructKind, target: QualType, args: Vec<Expr> },
  /// Inserted per Design Notes (c): materialize a value to a fresh stack
  /// slot before taking its address or binding a reference to it.
  Materialize { operand: Box<Expr> },
  /// Resolved call through a vtable slot; recorded separately from `Call`
  /// once the analyzer determines dynamic dispatch applies.
  VirtualCall { object: Box<Expr>, slot: u32, args: Vec<Expr> },
}

/// A statement node, decorated with its own cleanup stack (§3).
#[derive(Debug)]
pub struct Stmt {
  pub span: FileSpan,
  pub cleanup: Vec<Cleanup>,
  pub kind: StmtKind,
}

#[derive(Debug)]
pub enum StmtKind {
  Expression(Expr),
  Compound(Vec<Stmt>),
  Empty,
  VariableDecl { entity: EntityId, init: Option<Expr> },
  Return(Vec<Expr>),
  If { cond: Expr, then: Box<Stmt>, els: Option<Box<Stmt>> },
  While { cond: Expr, body: Box<Stmt> },
  DoWhile { body: Box<Stmt>, cond: Expr },
  For { init: Option<Box<Stmt>>, cond: Option<Expr>, inc: Option<Expr>, body: Box<Stmt> },
  Break { label: Option<Symbol> },
  Continue { label: Option<Symbol> },
}

/// A top-level declaration. `FunctionDefinition`/`StructDefinition` carry
/// their already-resolved [`EntityId`] once signature analysis has run,
/// per §4.3's "signature analysis precedes body analysis".
#[derive(Debug)]
pub enum Decl {
  Function { entity: EntityId, kind: ProcKind, params: Vec<EntityId>, body: Option<Stmt> },
  Struct { entity: EntityId, members: Vec<EntityId> },
  Variable { entity: EntityId, init: Option<Expr>, access: AccessControl },
  Module { name: Symbol, decls: Vec<Decl> },
}

/// A translation unit: the root the analyzer walks (§4.3).
#[derive(Debug, Default)]
pub struct TranslationUnit {
  pub decls: Vec<Decl>,
}
