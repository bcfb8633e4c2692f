//! Expression/statement decoration (§4.3): the second half of semantic
//! analysis, run after `sema::analyzer`'s declaration pass has every
//! struct laid out and every function's signature typed. Walks a
//! function body bottom-up, attaching `ExprDecoration` in place,
//! resolving overloads, inserting conversion/construction nodes, and
//! building each block's cleanup stack. Grounded in
//! `original_source/lib/Sema/AnalysisContext.cc`'s expression visitor and
//! `lib/Sema/Analysis/ExpressionAnalysis.cc`'s `Call`/`Conversion`
//! handling, generalized to this crate's closed `ExprKind`/`StmtKind`.

use std::mem;

use crate::conversion::{self, ConversionKind};
use crate::diag::{GenericBadStmtKind, Issue, IssueHandler};
use crate::symbol::Symbol;
use crate::symtab::SymbolTable;
use crate::types::ast::{BinOp, Cleanup, ConstValue, Expr, ExprDecoration, ExprKind, Stmt, StmtKind, UnOp};
use crate::types::entity::{EntityId, EntityKind, PropertyKind, TypeTc};
use crate::types::ty::{BindMode, LifetimeOpKind, Mutability, ObjectType, ObjectTypeKind, QualType, ValueCategory};

fn poison(e: &mut Expr) { e.deco.poisoned = true }

/// A throwaway node used only as the argument to [`std::mem::replace`]
/// when wrapping an already-decorated expression in place; immediately
/// discarded once the real wrapper node is built.
fn dummy(span: crate::span::FileSpan) -> Expr {
  Expr { span, deco: ExprDecoration::default(), kind: ExprKind::BoolLiteral(false) }
}

/// Wraps `e` in an inserted `ExprKind::Conversion` targeting `target`
/// (§3 "the analyzer inserts conversion nodes where an implicit
/// conversion applies"), updating its decoration to the converted type.
fn wrap_conversion(e: &mut Expr, target: QualType) {
  let span = e.span.clone();
  let old = mem::replace(e, dummy(span.clone()));
  *e = Expr {
    span,
    deco: ExprDecoration { ty: Some(target.clone()), value_cat: Some(ValueCategory::RValue), entity: None, constant: None, poisoned: false },
    kind: ExprKind::Conversion { operand: Box::new(old), target },
  };
}

/// Wraps `e` (a `ListExpr`) in an inserted `ExprKind::Construction` of
/// `target`, per §4.2's construction-kind selection.
fn wrap_construction(sym: &SymbolTable, e: &mut Expr, target: QualType, iss: &mut IssueHandler) {
  let ExprKind::ListExpr(_) = &e.kind else { return };
  let arg_tys: Vec<ObjectType> = match &e.kind {
    ExprKind::ListExpr(items) => items.iter().filter_map(|i| i.deco.ty.clone().map(|q| q.ty)).collect(),
    _ => unreachable!(),
  };
  let span = e.span.clone();
  let old = mem::replace(e, dummy(span.clone()));
  let ExprKind::ListExpr(items) = old.kind else { unreachable!() };
  if arg_tys.len() != items.len() {
    *e = Expr { span, deco: ExprDecoration { poisoned: true, ..ExprDecoration::default() }, kind: ExprKind::ListExpr(items) };
    return;
  }
  match conversion::select_construction(sym, &target.ty, &arg_tys) {
    Some(kind) => {
      *e = Expr {
        span,
        deco: ExprDecoration { ty: Some(target.clone()), value_cat: Some(ValueCategory::RValue), entity: None, constant: None, poisoned: false },
        kind: ExprKind::Construction { kind, target, args: items },
      };
    }
    None => {
      iss.emit(Issue::CannotConstructType { span: span.clone(), target: format!("{:?}", target.ty) });
      *e = Expr { span, deco: ExprDecoration { poisoned: true, ..ExprDecoration::default() }, kind: ExprKind::ListExpr(items) };
    }
  }
}

/// Finishes decorating an already-typed initializer/argument expression
/// against its `target` slot: aggregate-constructs a `ListExpr`,
/// otherwise inserts a plain conversion node when the types differ.
fn finish_against_target(sym: &SymbolTable, e: &mut Expr, target: &QualType, iss: &mut IssueHandler) {
  if e.deco.poisoned { return }
  if matches!(e.kind, ExprKind::ListExpr(_)) {
    wrap_construction(sym, e, target.clone(), iss);
    return;
  }
  let Some(from) = e.deco.ty.clone() else { return };
  if from.ty == target.ty && from.mutability == target.mutability { return }
  match conversion::convert(ConversionKind::Implicit, &from, target) {
    Ok(_) => wrap_conversion(e, target.clone()),
    Err(err) => iss.emit(Issue::BadTypeConv { span: e.span.clone(), err }),
  }
}

fn property_kind_by_name(name: Symbol) -> Option<PropertyKind> {
  [PropertyKind::Count, PropertyKind::Empty, PropertyKind::Front, PropertyKind::Back, PropertyKind::Data]
    .into_iter()
    .find(|&k| crate::symbol::intern(crate::types::entity::property_name(k)) == name)
}

/// An lvalue of `ty`, the shape almost every sub-expression decoration
/// ends in before an implicit lvalue-to-rvalue load (represented, per
/// Design Notes (c), as an `ExprKind::Conversion` the caller inserts at
/// the use site, not here).
fn lvalue(ty: ObjectType, mutability: Mutability) -> QualType {
  QualType::new(ty, mutability, BindMode::Static)
}

fn rvalue(ty: ObjectType) -> QualType { QualType::new(ty, Mutability::Const, BindMode::Static) }

/// Decorates `expr` in place: fills `ty`/`value_cat`/`entity`/`constant`,
/// recursing into children first (§3 "bottom-up decoration"). `this_ty`
/// is the enclosing method's receiver type, if any, for resolving `This`
/// and unqualified member access.
pub fn decorate_expr(sym: &mut SymbolTable, expr: &mut Expr, this_ty: Option<&QualType>, iss: &mut IssueHandler) {
  match &mut expr.kind {
    ExprKind::IntLiteral(v) => {
      expr.deco.ty = Some(rvalue(sym.int_type(crate::types::ty::IntWidth::W64, true)));
      expr.deco.value_cat = Some(ValueCategory::RValue);
      expr.deco.constant = Some(ConstValue::Int(*v));
    }
    ExprKind::BoolLiteral(_) => {
      expr.deco.ty = Some(rvalue(sym.bool_type()));
      expr.deco.value_cat = Some(ValueCategory::RValue);
    }
    ExprKind::FloatLiteral(v) => {
      expr.deco.ty = Some(rvalue(sym.float_type(crate::types::ty::FloatWidth::F64)));
      expr.deco.value_cat = Some(ValueCategory::RValue);
      expr.deco.constant = Some(ConstValue::Float(*v));
    }
    ExprKind::StringLiteral(_) => {
      let byte_ty = sym.byte_type();
      let arr = sym.array_type(byte_ty, crate::types::ty::ArrayCount::Dynamic);
      expr.deco.ty = Some(rvalue(arr));
      expr.deco.value_cat = Some(ValueCategory::RValue);
    }
    ExprKind::This => {
      match this_ty {
        Some(ty) => { expr.deco.ty = Some(ty.clone()); expr.deco.value_cat = Some(ValueCategory::LValue) }
        None => {
          iss.emit(Issue::GenericBadStmt { span: expr.span.clone(), reason: GenericBadStmtKind::Other });
          poison(expr);
        }
      }
    }
    ExprKind::Identifier(name) => decorate_identifier(sym, expr.span.clone(), *name, &mut expr.deco, iss),
    ExprKind::UnaryPrefix { op, operand } => {
      decorate_expr(sym, operand, this_ty, iss);
      decorate_unary(sym, *op, operand, &mut expr.deco, &expr.span, iss);
    }
    ExprKind::Binary { op, lhs, rhs } => {
      decorate_expr(sym, lhs, this_ty, iss);
      decorate_expr(sym, rhs, this_ty, iss);
      decorate_binary(sym, *op, lhs, rhs, &mut expr.deco, &expr.span, iss);
    }
    ExprKind::MemberAccess { base, member } => {
      decorate_expr(sym, base, this_ty, iss);
      decorate_member_access(sym, base, *member, &mut expr.deco, &expr.span, this_ty, iss);
    }
    ExprKind::Reference { operand } => {
      decorate_expr(sym, operand, this_ty, iss);
      if operand.deco.value_cat != Some(ValueCategory::LValue) {
        iss.emit(Issue::BadValueCatConv { span: expr.span.clone(), err: conversion::ConvError::RValueToLValue });
        poison(expr);
      } else if let Some(qt) = &operand.deco.ty {
        let refty = sym.reference(qt.clone());
        expr.deco.ty = Some(rvalue(refty));
        expr.deco.value_cat = Some(ValueCategory::RValue);
      }
    }
    ExprKind::Unique { operand } => {
      decorate_expr(sym, operand, this_ty, iss);
      if let Some(qt) = &operand.deco.ty {
        let uniq = sym.unique_pointer(qt.clone());
        expr.deco.ty = Some(rvalue(uniq));
        expr.deco.value_cat = Some(ValueCategory::RValue);
      }
    }
    ExprKind::Conditional { cond, then, els } => {
      decorate_expr(sym, cond, this_ty, iss);
      decorate_expr(sym, then, this_ty, iss);
      decorate_expr(sym, els, this_ty, iss);
      require_bool(sym, cond, iss);
      match (&then.deco.ty, &els.deco.ty) {
        (Some(t), Some(e)) => match conversion::common_type(t, e) {
          Some(ty) => {
            expr.deco.ty = Some(rvalue(ty));
            expr.deco.value_cat = Some(ValueCategory::RValue);
          }
          None => {
            iss.emit(Issue::BadTypeConv { span: expr.span.clone(), err: conversion::ConvError::NoObjectConversion { from: format!("{:?}", t.ty), to: format!("{:?}", e.ty) } });
            poison(expr);
          }
        },
        _ => poison(expr),
      }
    }
    ExprKind::Call { callee, args } => {
      for a in args.iter_mut() { decorate_expr(sym, a, this_ty, iss) }
      decorate_call(sym, callee, args, &mut expr.deco, &expr.span, this_ty, iss);
    }
    ExprKind::Subscript { base, index } => {
      decorate_expr(sym, base, this_ty, iss);
      decorate_expr(sym, index, this_ty, iss);
      decorate_subscript(sym, base, &mut expr.deco, &expr.span, iss);
    }
    ExprKind::Slice { base, begin, count } => {
      decorate_expr(sym, base, this_ty, iss);
      decorate_expr(sym, begin, this_ty, iss);
      decorate_expr(sym, count, this_ty, iss);
      if let Some(qt) = base.deco.ty.clone() {
        if let ObjectTypeKind::Array { elem, .. } = qt.ty.as_ref() {
          let dyn_arr = sym.array_type(elem.clone(), crate::types::ty::ArrayCount::Dynamic);
          expr.deco.ty = Some(rvalue(dyn_arr));
          expr.deco.value_cat = Some(ValueCategory::RValue);
        } else {
          poison(expr);
        }
      }
    }
    ExprKind::ListExpr(items) => {
      for it in items.iter_mut() { decorate_expr(sym, it, this_ty, iss) }
      // The target type of an aggregate list is only known from the
      // enclosing context (an initializer or argument slot); left
      // undecorated here and finished by whichever caller inserts the
      // `Construction` node around it (mirrors `ListExpression` needing
      // its target type supplied externally).
    }
    ExprKind::Conversion { operand, .. } | ExprKind::Materialize { operand } => decorate_expr(sym, operand, this_ty, iss),
    ExprKind::Construction { args, .. } => for a in args.iter_mut() { decorate_expr(sym, a, this_ty, iss) },
    ExprKind::VirtualCall { object, args, .. } => {
      decorate_expr(sym, object, this_ty, iss);
      for a in args.iter_mut() { decorate_expr(sym, a, this_ty, iss) }
    }
  }
}

fn decorate_identifier(sym: &mut SymbolTable, span: crate::span::FileSpan, name: Symbol, deco: &mut crate::types::ast::ExprDecoration, iss: &mut IssueHandler) {
  let candidates = sym.unqualified_lookup(name);
  let Some(&id) = candidates.first() else {
    iss.emit(Issue::GenericBadStmt { span, reason: GenericBadStmtKind::Other });
    deco.poisoned = true;
    return;
  };
  let resolved = sym.strip_alias(id);
  deco.entity = Some(resolved);
  match &sym.entity(resolved).kind {
    EntityKind::Variable(v) => {
      deco.ty = Some(v.ty.clone());
      deco.value_cat = Some(ValueCategory::LValue);
    }
    EntityKind::Function(_) => {
      // A bare function name outside a call; left with no object type
      // here (functions aren't first-class values in this surface
      // language, per the grammar `Call`'s callee being resolved
      // directly in `decorate_call` rather than through this path).
    }
    _ => { deco.poisoned = true }
  }
}

fn require_bool(sym: &SymbolTable, e: &Expr, iss: &mut IssueHandler) {
  let Some(qt) = &e.deco.ty else { return };
  if conversion::determine_object_conversion(ConversionKind::Implicit, &qt.ty, &sym.bool_type()).is_err() {
    iss.emit(Issue::BadTypeConv {
      span: e.span.clone(),
      err: conversion::ConvError::NoObjectConversion { from: format!("{:?}", qt.ty), to: "bool".into() },
    });
  }
}

fn decorate_unary(sym: &mut SymbolTable, op: UnOp, operand: &Expr, deco: &mut crate::types::ast::ExprDecoration, span: &crate::span::FileSpan, iss: &mut IssueHandler) {
  let Some(qt) = operand.deco.ty.clone() else { deco.poisoned = true; return };
  match op {
    UnOp::Neg | UnOp::Not | UnOp::BitNot => {
      deco.ty = Some(rvalue(qt.ty));
      deco.value_cat = Some(ValueCategory::RValue);
    }
    UnOp::Deref => match qt.ty.as_ref() {
      ObjectTypeKind::RawPtr { base } | ObjectTypeKind::UniquePtr { base } => {
        deco.ty = Some(lvalue(base.ty.clone(), base.mutability));
        deco.value_cat = Some(ValueCategory::LValue);
      }
      _ => {
        iss.emit(Issue::GenericBadStmt { span: span.clone(), reason: GenericBadStmtKind::Other });
        deco.poisoned = true;
      }
    },
    UnOp::AddrOf => {
      let ptr = sym.pointer(qt);
      deco.ty = Some(rvalue(ptr));
      deco.value_cat = Some(ValueCategory::RValue);
    }
  }
}

fn decorate_binary(sym: &SymbolTable, op: BinOp, lhs: &Expr, rhs: &mut Expr, deco: &mut crate::types::ast::ExprDecoration, span: &crate::span::FileSpan, iss: &mut IssueHandler) {
  use BinOp::*;
  let (Some(lt), Some(rt)) = (lhs.deco.ty.clone(), rhs.deco.ty.clone()) else { deco.poisoned = true; return };
  match op {
    Assign | AddAssign | SubAssign | MulAssign | DivAssign | RemAssign
    | BitAndAssign | BitOrAssign | BitXorAssign | ShlAssign | ShrAssign => {
      if lhs.deco.value_cat != Some(ValueCategory::LValue) || !lt.is_mut() {
        iss.emit(Issue::BadMutConv { span: span.clone(), err: conversion::ConvError::MutabilityWiden });
        deco.poisoned = true;
        return;
      }
      if let Err(err) = conversion::convert(ConversionKind::Implicit, &rt, &lt) {
        iss.emit(Issue::BadTypeConv { span: span.clone(), err });
        deco.poisoned = true;
        return;
      }
      finish_against_target(sym, rhs, &lt, iss);
      deco.ty = Some(lt);
      deco.value_cat = Some(ValueCategory::LValue);
    }
    Eq | Ne | Lt | Le | Gt | Ge => {
      if conversion::common_type(&lt, &rt).is_none() {
        iss.emit(Issue::BadTypeConv { span: span.clone(), err: conversion::ConvError::NoObjectConversion { from: format!("{:?}", lt.ty), to: format!("{:?}", rt.ty) } });
        deco.poisoned = true;
        return;
      }
      deco.ty = Some(rvalue(sym.bool_type()));
      deco.value_cat = Some(ValueCategory::RValue);
    }
    Add | Sub | Mul | Div | Rem | BitAnd | BitOr | BitXor | Shl | Shr | LogAnd | LogOr => {
      match conversion::common_type(&lt, &rt) {
        Some(ty) => {
          deco.ty = Some(rvalue(ty));
          deco.value_cat = Some(ValueCategory::RValue);
        }
        None => {
          iss.emit(Issue::BadTypeConv { span: span.clone(), err: conversion::ConvError::NoObjectConversion { from: format!("{:?}", lt.ty), to: format!("{:?}", rt.ty) } });
          deco.poisoned = true;
        }
      }
    }
  }
}

/// Whether accessing a `Private` member of `owner` is permitted from the
/// current context: only when that context is itself a method of `owner`
/// (its `this_ty` names the same struct). `Internal` isn't checked here —
/// it gates visibility across library boundaries, enforced at import
/// resolution rather than per member-access expression (see `DESIGN.md`).
fn accessible(owner: EntityId, access: crate::types::entity::AccessControl, this_ty: Option<&QualType>) -> bool {
  if access != crate::types::entity::AccessControl::Private { return true }
  matches!(this_ty.map(|t| t.ty.as_ref()), Some(ObjectTypeKind::Struct { entity }) if *entity == owner)
}

fn decorate_member_access(sym: &SymbolTable, base: &Expr, member: Symbol, deco: &mut crate::types::ast::ExprDecoration, span: &crate::span::FileSpan, this_ty: Option<&QualType>, iss: &mut IssueHandler) {
  let Some(base_ty) = base.deco.ty.clone() else { deco.poisoned = true; return };
  match base_ty.ty.as_ref() {
    ObjectTypeKind::Struct { entity } => {
      let EntityKind::Type(spanned) = &sym.entity(*entity).kind else { deco.poisoned = true; return };
      let TypeTc::Typed(ty) = &spanned.k else { deco.poisoned = true; return };
      match ty.layout.members.iter().find(|m| m.name == member) {
        Some(m) if !accessible(*entity, m.access, this_ty) => {
          iss.emit(Issue::BadAccessControl { span: span.clone(), name: member });
          deco.poisoned = true;
        }
        Some(m) => {
          deco.ty = Some(lvalue(m.ty.ty.clone(), if base_ty.is_mut() { m.ty.mutability } else { Mutability::Const }));
          deco.value_cat = Some(ValueCategory::LValue);
        }
        None => {
          iss.emit(Issue::GenericBadStmt { span: span.clone(), reason: GenericBadStmtKind::Other });
          deco.poisoned = true;
        }
      }
    }
    _ => match property_kind_by_name(member).and_then(|k| sym.find_property(&base_ty.ty, k)) {
      Some(prop_id) => {
        let EntityKind::Property(p) = &sym.entity(prop_id).kind else { deco.poisoned = true; return };
        deco.entity = Some(prop_id);
        deco.ty = Some(p.ty.clone());
        deco.value_cat = Some(p.value_cat);
      }
      None => {
        iss.emit(Issue::GenericBadStmt { span: span.clone(), reason: GenericBadStmtKind::Other });
        deco.poisoned = true;
      }
    },
  }
}

/// Ranks how well `args` match `params` for overload resolution: `Some`
/// total rank (lower is better, `Trivial` contributing 0) if every
/// argument implicitly converts, `None` if any doesn't.
fn overload_rank(args: &[ObjectType], params: &[QualType]) -> Option<u32> {
  if args.len() != params.len() { return None }
  let mut total = 0u32;
  for (a, p) in args.iter().zip(params) {
    match conversion::determine_object_conversion(ConversionKind::Implicit, a, &p.ty) {
      Ok(Some(chain)) => total += chain.iter().map(|c| u32::from(c.rank())).sum::<u32>(),
      Ok(None) => {}
      Err(_) => return None,
    }
  }
  Some(total)
}

fn decorate_call(sym: &mut SymbolTable, callee: &Expr, args: &mut [Expr], deco: &mut crate::types::ast::ExprDecoration, span: &crate::span::FileSpan, this_ty: Option<&QualType>, iss: &mut IssueHandler) {
  let ExprKind::Identifier(name) = &callee.kind else {
    iss.emit(Issue::GenericBadStmt { span: span.clone(), reason: GenericBadStmtKind::Other });
    deco.poisoned = true;
    return;
  };
  let _ = this_ty;
  let arg_tys: Vec<ObjectType> = args.iter().filter_map(|a| a.deco.ty.clone().map(|q| q.ty)).collect();
  if arg_tys.len() != args.len() { deco.poisoned = true; return }

  let candidates = sym.unqualified_lookup(*name);
  let mut best: Option<(EntityId, u32, Vec<QualType>, QualType)> = None;
  for &cand in &candidates {
    let resolved = sym.strip_alias(cand);
    let EntityKind::Function(f) = &sym.entity(resolved).kind else { continue };
    let crate::types::entity::ProcTc::Typed(ty) = &f.tc else { continue };
    let Some(rank) = overload_rank(&arg_tys, &ty.args) else { continue };
    if best.as_ref().is_none_or(|(_, best_rank, ..)| rank < *best_rank) {
      best = Some((resolved, rank, ty.args.clone(), ty.ret.clone()));
    }
  }
  match best {
    Some((func, _, params, ret)) => {
      deco.entity = Some(func);
      deco.ty = Some(ret);
      deco.value_cat = Some(ValueCategory::RValue);
      for (arg, param) in args.iter_mut().zip(&params) {
        finish_against_target(sym, arg, param, iss);
      }
    }
    None => {
      iss.emit(Issue::GenericBadStmt { span: span.clone(), reason: GenericBadStmtKind::Other });
      deco.poisoned = true;
    }
  }
}

fn decorate_subscript(sym: &SymbolTable, base: &Expr, deco: &mut crate::types::ast::ExprDecoration, span: &crate::span::FileSpan, iss: &mut IssueHandler) {
  let Some(base_ty) = base.deco.ty.clone() else { deco.poisoned = true; return };
  match base_ty.ty.as_ref() {
    ObjectTypeKind::Array { elem, .. } => {
      deco.ty = Some(lvalue(elem.clone(), if base_ty.is_mut() { Mutability::Mut } else { Mutability::Const }));
      deco.value_cat = Some(ValueCategory::LValue);
    }
    _ => {
      let _ = sym;
      iss.emit(Issue::GenericBadStmt { span: span.clone(), reason: GenericBadStmtKind::Other });
      deco.poisoned = true;
    }
  }
}

/// Whether `ty` needs a destructor run when its owning variable goes out
/// of scope (§3's cleanup-stack contract): non-trivial dtor only, not
/// gated on the other three lifetime ops.
fn needs_destructor(sym: &SymbolTable, ty: &ObjectType) -> bool {
  match ty.as_ref() {
    ObjectTypeKind::Struct { entity } => match &sym.entity(*entity).kind {
      EntityKind::Type(spanned) => match &spanned.k {
        TypeTc::Typed(t) => t.lifetime.dtor.as_ref().is_some_and(|op| !op.is_trivial() && !op.is_deleted()),
        TypeTc::ForwardDeclared => false,
      },
      _ => false,
    },
    ObjectTypeKind::UniquePtr { .. } => true,
    ObjectTypeKind::Array { elem, .. } => needs_destructor(sym, elem),
    _ => false,
  }
}

/// Decorates every statement in `stmt`, recursing into nested bodies,
/// and fills each `Compound`'s cleanup stack with the destructors its
/// direct `VariableDecl` children need, in reverse declaration order
/// (§3 "cleanups run in reverse declaration order on every exit path").
pub fn decorate_stmt(sym: &mut SymbolTable, stmt: &mut Stmt, this_ty: Option<&QualType>, iss: &mut IssueHandler) {
  match &mut stmt.kind {
    StmtKind::Expression(e) => decorate_expr(sym, e, this_ty, iss),
    StmtKind::Empty => {}
    StmtKind::Compound(stmts) => {
      let mut cleanups = Vec::new();
      for s in stmts.iter_mut() {
        decorate_stmt(sym, s, this_ty, iss);
        if let StmtKind::VariableDecl { entity, .. } = &s.kind {
          let ty = match &sym.entity(*entity).kind {
            EntityKind::Variable(v) => Some(v.ty.ty.clone()),
            _ => None,
          };
          if let Some(ty) = ty {
            if needs_destructor(sym, &ty) {
              cleanups.push(Cleanup { object: *entity, op: LifetimeOpKind::Destructor });
            }
          }
        }
      }
      cleanups.reverse();
      stmt.cleanup = cleanups;
    }
    StmtKind::VariableDecl { entity, init } => {
      if let Some(init) = init {
        decorate_expr(sym, init, this_ty, iss);
        let var_ty = match &sym.entity(*entity).kind { EntityKind::Variable(v) => Some(v.ty.clone()), _ => None };
        if let Some(var_ty) = var_ty {
          finish_against_target(sym, init, &var_ty, iss);
        }
      }
    }
    StmtKind::Return(exprs) => for e in exprs.iter_mut() { decorate_expr(sym, e, this_ty, iss) },
    StmtKind::If { cond, then, els } => {
      decorate_expr(sym, cond, this_ty, iss);
      require_bool(sym, cond, iss);
      decorate_stmt(sym, then, this_ty, iss);
      if let Some(els) = els { decorate_stmt(sym, els, this_ty, iss) }
    }
    StmtKind::While { cond, body } => {
      decorate_expr(sym, cond, this_ty, iss);
      require_bool(sym, cond, iss);
      decorate_stmt(sym, body, this_ty, iss);
    }
    StmtKind::DoWhile { body, cond } => {
      decorate_stmt(sym, body, this_ty, iss);
      decorate_expr(sym, cond, this_ty, iss);
      require_bool(sym, cond, iss);
    }
    StmtKind::For { init, cond, inc, body } => {
      if let Some(init) = init { decorate_stmt(sym, init, this_ty, iss) }
      if let Some(cond) = cond { decorate_expr(sym, cond, this_ty, iss); require_bool(sym, cond, iss) }
      if let Some(inc) = inc { decorate_expr(sym, inc, this_ty, iss) }
      decorate_stmt(sym, body, this_ty, iss);
    }
    StmtKind::Break { .. } | StmtKind::Continue { .. } => {}
  }
}

// Not yet addressed here: virtual-dispatch resolution (`ExprKind::Call`
// synthesizing a `VirtualCall` through a polymorphic receiver). That
// needs a struct's member-function list reachable from a method call
// site, which this backend doesn't have yet — `Decl::Function` has no
// receiver/owning-struct field, so every function body is decorated as a
// free function (see `sema::analyzer::decorate_bodies`'s doc comment).
// `vtable::VTable::build` and the `TypeTy::vtable`/`bases` fields are
// wired up (`sema::analyzer::finalize_struct`) and ready for this once a
// method-declaration surface exists; see `DESIGN.md` for the open gap.

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag::IssueHandler;
  use crate::span::{FileId, FileSpan};
  use crate::symbol::intern;
  use crate::types::entity::AccessControl;
  use crate::types::ty::IntWidth;

  fn sp() -> FileSpan { FileSpan::new(FileId::new("decorate-test"), 0, 1) }

  fn expr(kind: ExprKind) -> Expr { Expr { span: sp(), deco: ExprDecoration::default(), kind } }

  #[test]
  fn integer_addition_decorates_to_the_common_int_type() {
    let mut sym = SymbolTable::new();
    let mut iss = IssueHandler::new();
    let mut e = expr(ExprKind::Binary {
      op: BinOp::Add,
      lhs: Box::new(expr(ExprKind::IntLiteral(1))),
      rhs: Box::new(expr(ExprKind::IntLiteral(2))),
    });
    decorate_expr(&mut sym, &mut e, None, &mut iss);
    assert!(!iss.has_errors());
    assert!(!e.deco.poisoned);
    assert_eq!(e.deco.value_cat, Some(ValueCategory::RValue));
  }

  #[test]
  fn assigning_to_a_const_binding_is_a_mutability_error() {
    let mut sym = SymbolTable::new();
    let mut iss = IssueHandler::new();
    let i32_ty = sym.int_type(IntWidth::W32, true);
    let qty = QualType::new(i32_ty, Mutability::Const, BindMode::Static);
    let var = sym.declare_variable(intern("x"), sp(), qty, AccessControl::Public, &mut iss);
    let mut e = expr(ExprKind::Binary {
      op: BinOp::Assign,
      lhs: Box::new(expr(ExprKind::Identifier(intern("x")))),
      rhs: Box::new(expr(ExprKind::IntLiteral(5))),
    });
    let _ = var;
    decorate_expr(&mut sym, &mut e, None, &mut iss);
    assert!(iss.has_errors());
  }

  #[test]
  fn compound_block_collects_destructors_for_unique_pointer_locals() {
    let mut sym = SymbolTable::new();
    let mut iss = IssueHandler::new();
    let byte_ty = sym.byte_type();
    let uniq = sym.unique_pointer(QualType::new(byte_ty, Mutability::Mut, BindMode::Static));
    let var = sym.declare_variable(intern("buf"), sp(), QualType::new(uniq, Mutability::Mut, BindMode::Static), AccessControl::Public, &mut iss);
    let mut block = Stmt {
      span: sp(),
      cleanup: Vec::new(),
      kind: StmtKind::Compound(vec![Stmt { span: sp(), cleanup: Vec::new(), kind: StmtKind::VariableDecl { entity: var, init: None } }]),
    };
    decorate_stmt(&mut sym, &mut block, None, &mut iss);
    assert_eq!(block.cleanup.len(), 1);
    assert_eq!(block.cleanup[0].object, var);
  }
}
