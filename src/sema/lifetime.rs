//! Lifetime-operation synthesis (§3 invariant (i), §4.1's lifetime
//! metadata). Grounded in `original_source/lib/Sema/LifetimeFunctionAnalysis.cc`'s
//! terminology and implicit-definition rules:
//!
//! - The default constructor, copy/move constructors and destructor are
//!   *special member functions* (SMFs).
//! - A type has trivial lifetime if no lifetime function is user-defined
//!   and every non-static data member has trivial lifetime; all builtin
//!   types except unique pointers have trivial lifetime, and arrays are
//!   trivial iff their element type is.
//! - Each SMF is implicitly defined when no conflicting lifetime function
//!   is user-defined and every member supports that operation; otherwise
//!   it's either the matching user-defined function or deleted.

use crate::diag::IssueHandler;
use crate::symbol::{Symbol, intern};
use crate::symtab::SymbolTable;
use crate::types::entity::{AccessControl, EntityId, EntityKind, FunctionOrigin, ProcKind, ProcTc, TypeTc};
use crate::types::ty::{BindMode, LifetimeMetadata, LifetimeOpKind, LifetimeOperation, Mutability, ObjectType, ObjectTypeKind, QualType};

fn smf_name(kind: LifetimeOpKind) -> Symbol {
  match kind {
    LifetimeOpKind::DefaultConstructor | LifetimeOpKind::CopyConstructor => intern("new"),
    LifetimeOpKind::MoveConstructor => intern("move"),
    LifetimeOpKind::Destructor => intern("delete"),
  }
}

/// The canonical signature an SMF of this kind must have: `new(&mut this)`,
/// `new(&mut this, other: &Self)`, `move(&mut this, other: &mut Self)` or
/// `delete(&mut this)`. Reference-ness is expressed through `BindMode::Dyn`
/// rather than wrapping the type in `ObjectTypeKind::Reference`, matching
/// how every other parameter list in this backend represents by-reference
/// binding (see `conversion.rs`'s `QualType`-based signatures).
fn smf_signature(kind: LifetimeOpKind, struct_ty: &ObjectType) -> Vec<QualType> {
  let self_param = QualType::new(struct_ty.clone(), Mutability::Mut, BindMode::Dyn);
  match kind {
    LifetimeOpKind::DefaultConstructor | LifetimeOpKind::Destructor => vec![self_param],
    LifetimeOpKind::CopyConstructor => vec![self_param, QualType::new(struct_ty.clone(), Mutability::Const, BindMode::Dyn)],
    LifetimeOpKind::MoveConstructor => vec![self_param, QualType::new(struct_ty.clone(), Mutability::Mut, BindMode::Dyn)],
  }
}

fn named_functions(sym: &SymbolTable, members: &[EntityId], name: Symbol) -> Vec<EntityId> {
  members.iter().copied()
    .filter(|&id| sym.entity(id).name == Some(name) && sym.entity(id).is_function())
    .collect()
}

fn member_qual_types(sym: &SymbolTable, members: &[EntityId]) -> Vec<QualType> {
  members.iter()
    .filter_map(|&id| match &sym.entity(id).kind {
      EntityKind::Variable(v) => Some(v.ty.clone()),
      _ => None,
    })
    .collect()
}

fn find_by_signature(sym: &SymbolTable, candidates: &[EntityId], params: &[QualType]) -> Option<EntityId> {
  candidates.iter().copied().find(|&id| {
    let EntityKind::Function(f) = &sym.entity(id).kind else { return false };
    let ProcTc::Typed(ty) = &f.tc else { return false };
    ty.args.len() == params.len() && ty.args.iter().zip(params).all(|(a, b)| a.ty == b.ty)
  })
}

/// Whether `member`'s own lifetime supports `kind` at all (i.e. it isn't
/// deleted). Unique pointers have every SMF except a copy constructor
/// (they're move-only); every other builtin scalar always does.
fn member_has_op(sym: &SymbolTable, member: &ObjectType, kind: LifetimeOpKind) -> bool {
  match member.as_ref() {
    ObjectTypeKind::UniquePtr { .. } => !matches!(kind, LifetimeOpKind::CopyConstructor),
    ObjectTypeKind::Struct { entity } => match &sym.entity(*entity).kind {
      EntityKind::Type(spanned) => match &spanned.k {
        TypeTc::Typed(ty) => ty.lifetime.get(kind).is_none_or(|op| !op.is_deleted()),
        TypeTc::ForwardDeclared => false,
      },
      _ => false,
    },
    ObjectTypeKind::Array { elem, .. } => member_has_op(sym, elem, kind),
    _ => true,
  }
}

/// Whether `member` itself has trivial lifetime (§3's "all builtin types
/// except for unique pointers have trivial lifetime").
fn member_is_trivial(sym: &SymbolTable, member: &ObjectType) -> bool {
  match member.as_ref() {
    ObjectTypeKind::UniquePtr { .. } => false,
    ObjectTypeKind::Struct { entity } => match &sym.entity(*entity).kind {
      EntityKind::Type(spanned) => matches!(&spanned.k, TypeTc::Typed(ty) if ty.lifetime.is_all_trivial()),
      _ => false,
    },
    ObjectTypeKind::Array { elem, .. } => member_is_trivial(sym, elem),
    _ => member.is_trivial_lifetime_scalar(),
  }
}

/// Synthesizes or locates each of the four special member functions for a
/// struct and writes the result into its `TypeTy::lifetime`. Requires the
/// struct's `TypeTc` to already be `Typed` with `layout` filled in (struct
/// layout is computed before lifetime analysis runs, per the dependency
/// order §4.3 imposes on recursive types).
///
/// `members` is the struct's full member list (fields and any user-written
/// `new`/`move`/`delete`), already declared by signature analysis per
/// `ast::Decl::Struct`'s contract ("signature analysis precedes body
/// analysis"). `home_scope` is where a synthesized special member function
/// is declared; struct entities don't own a `Scope` of their own (the same
/// convention `serialize.rs`'s preparse/parse split uses), so the caller
/// passes in whichever scope it's tracking the struct's body under.
pub fn analyze_lifetime(sym: &mut SymbolTable, struct_id: EntityId, home_scope: EntityId, members: &[EntityId]) {
  let struct_ty: ObjectType = std::rc::Rc::new(ObjectTypeKind::Struct { entity: struct_id });
  let access = sym.entity(struct_id).access;
  let span = sym.entity(struct_id).span.clone().expect("struct must have a span");

  let new_fns = named_functions(sym, members, intern("new"));
  let move_fns = named_functions(sym, members, intern("move"));
  let delete_fns = named_functions(sym, members, intern("delete"));
  let any_user_defined = !new_fns.is_empty() || !move_fns.is_empty() || !delete_fns.is_empty();
  let member_tys = member_qual_types(sym, members);

  let mut meta = LifetimeMetadata::default();
  for kind in LifetimeOpKind::ALL {
    let candidates: &[EntityId] = match kind {
      LifetimeOpKind::DefaultConstructor | LifetimeOpKind::CopyConstructor => &new_fns,
      LifetimeOpKind::MoveConstructor => &move_fns,
      LifetimeOpKind::Destructor => &delete_fns,
    };
    let params = smf_signature(kind, &struct_ty);
    let op = if let Some(found) = find_by_signature(sym, candidates, &params) {
      LifetimeOperation::Nontrivial { function: found }
    } else if !any_user_defined && member_tys.iter().all(|m| member_has_op(sym, &m.ty, kind)) {
      if member_tys.iter().all(|m| member_is_trivial(sym, &m.ty)) {
        LifetimeOperation::Trivial
      } else {
        LifetimeOperation::Nontrivial { function: generate_smf(sym, kind, home_scope, &struct_ty, access, span.clone()) }
      }
    } else {
      LifetimeOperation::Deleted
    };
    meta.set(kind, op);
  }

  let EntityKind::Type(spanned) = &mut sym.entity_mut(struct_id).kind else {
    panic!("analyze_lifetime called on a non-struct entity")
  };
  let TypeTc::Typed(ty) = &mut spanned.k else {
    panic!("analyze_lifetime requires the struct's layout to already be computed")
  };
  ty.lifetime = meta;
}

/// Declares a `Generated` function for `kind` inside the struct's member
/// scope. It has no AST body; the IR builder synthesizes one directly from
/// `members` when it lowers a call to this function (§4.1's "default/copy/
/// move/destroy operate member-wise").
fn generate_smf(sym: &mut SymbolTable, kind: LifetimeOpKind, scope_id: EntityId, struct_ty: &ObjectType, access: AccessControl, span: crate::span::FileSpan) -> EntityId {
  let params = smf_signature(kind, struct_ty);
  let void = QualType::new(sym.void_type(), Mutability::Const, BindMode::Static);
  sym.push_scope(scope_id);
  let func = sym.declare_function_with_origin(smf_name(kind), span, access, FunctionOrigin::Generated);
  let mut iss = IssueHandler::new();
  sym.set_function_type(func, ProcKind::Proc, params, void, &mut iss);
  sym.pop_scope();
  debug_assert!(!iss.has_errors(), "a generated SMF should never clash with itself");
  func
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::{FileId, FileSpan};
  use crate::types::ty::IntWidth;

  fn sp() -> FileSpan { FileSpan::new(FileId::new("lifetime-test"), 0, 1) }

  fn declare_struct_with_members(sym: &mut SymbolTable, name: &str, member_tys: &[ObjectType]) -> (EntityId, EntityId, Vec<EntityId>) {
    let mut iss = IssueHandler::new();
    let id = sym.declare_struct(intern(name), sp(), AccessControl::Public, &mut iss);
    if let EntityKind::Type(spanned) = &mut sym.entity_mut(id).kind {
      spanned.k = TypeTc::Typed(crate::types::entity::TypeTy {
        intrinsic: None,
        layout: crate::types::ty::Layout::default(),
        lifetime: LifetimeMetadata::default(),
        bases: Vec::new(),
        vtable: None,
      });
    }
    let scope = sym.declare_anonymous_scope();
    sym.push_scope(scope);
    let mut members = Vec::new();
    for (i, ty) in member_tys.iter().enumerate() {
      let qty = QualType::new(ty.clone(), Mutability::Mut, BindMode::Static);
      members.push(sym.declare_variable(intern(&format!("m{i}")), sp(), qty, AccessControl::Public, &mut iss));
    }
    sym.pop_scope();
    assert!(!iss.has_errors());
    (id, scope, members)
  }

  #[test]
  fn an_all_scalar_struct_gets_trivial_lifetime_with_no_generated_functions() {
    let mut sym = SymbolTable::new();
    let i32_ty = sym.int_type(IntWidth::W32, true);
    let (id, scope, members) = declare_struct_with_members(&mut sym, "Point", &[i32_ty.clone(), i32_ty]);
    analyze_lifetime(&mut sym, id, scope, &members);
    let EntityKind::Type(spanned) = &sym.entity(id).kind else { unreachable!() };
    let TypeTc::Typed(ty) = &spanned.k else { unreachable!() };
    assert!(ty.lifetime.is_all_trivial());
    assert!(ty.lifetime.trivial_lifetime_ops());
  }

  #[test]
  fn a_struct_holding_a_unique_pointer_gets_generated_nontrivial_operations() {
    let mut sym = SymbolTable::new();
    let byte_ty = sym.byte_type();
    let unique_qual = QualType::new(byte_ty, Mutability::Mut, BindMode::Static);
    let unique_ty = sym.unique_pointer(unique_qual);
    let (id, scope, members) = declare_struct_with_members(&mut sym, "Buffer", &[unique_ty]);
    analyze_lifetime(&mut sym, id, scope, &members);
    let EntityKind::Type(spanned) = &sym.entity(id).kind else { unreachable!() };
    let TypeTc::Typed(ty) = &spanned.k else { unreachable!() };
    assert!(!ty.lifetime.is_all_trivial());
    assert!(matches!(ty.lifetime.default_ctor, Some(LifetimeOperation::Nontrivial { .. })));
    assert!(matches!(ty.lifetime.copy_ctor, Some(LifetimeOperation::Deleted)));
    assert!(matches!(ty.lifetime.move_ctor, Some(LifetimeOperation::Nontrivial { .. })));
    assert!(matches!(ty.lifetime.dtor, Some(LifetimeOperation::Nontrivial { .. })));
  }

  #[test]
  fn a_user_defined_constructor_is_found_instead_of_generated() {
    let mut sym = SymbolTable::new();
    let i32_ty = sym.int_type(IntWidth::W32, true);
    let (id, scope, members) = declare_struct_with_members(&mut sym, "Counter", &[i32_ty]);
    let struct_ty: ObjectType = std::rc::Rc::new(ObjectTypeKind::Struct { entity: id });
    sym.push_scope(scope);
    let user_ctor = sym.declare_function(intern("new"), sp(), AccessControl::Public);
    let mut iss = IssueHandler::new();
    let self_param = QualType::new(struct_ty, Mutability::Mut, BindMode::Dyn);
    let void = QualType::new(sym.void_type(), Mutability::Const, BindMode::Static);
    sym.set_function_type(user_ctor, ProcKind::Proc, vec![self_param], void, &mut iss);
    sym.pop_scope();
    assert!(!iss.has_errors());

    let mut members_with_ctor = members.clone();
    members_with_ctor.push(user_ctor);
    analyze_lifetime(&mut sym, id, scope, &members_with_ctor);
    let EntityKind::Type(spanned) = &sym.entity(id).kind else { unreachable!() };
    let TypeTc::Typed(ty) = &spanned.k else { unreachable!() };
    assert_eq!(ty.lifetime.default_ctor, Some(LifetimeOperation::Nontrivial { function: user_ctor }));
    // no user "new(&mut this, other: &Self)" overload exists, and a
    // user-defined default constructor blocks implicit generation of the
    // others (`anyUserDefined`), so copy construction is deleted.
    assert_eq!(ty.lifetime.copy_ctor, Some(LifetimeOperation::Deleted));
  }
}
