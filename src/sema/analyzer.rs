//! The declaration-level driver of semantic analysis (C3, §4.3): given a
//! `TranslationUnit` whose entities have already been declared by an
//! earlier signature pass (per `types::ast::Decl`'s "signature analysis
//! precedes body analysis" contract), this module orders struct
//! declarations by their member-type dependencies, computes each struct's
//! layout, and runs lifetime/vtable finalization over them.
//!
//! Grounded in `original_source/lib/Sema/AnalysisContext.cc`'s two-pass
//! structure (a declaration pass that can see forward references, then a
//! definition pass that requires complete types) and `Sema/Entity.cc`'s
//! identifier validation.

use std::collections::HashMap;

use crate::diag::{GenericBadStmtKind, Issue, IssueHandler};
use crate::sema::lifetime::analyze_lifetime;
use crate::symbol::Symbol;
use crate::symtab::SymbolTable;
use crate::types::ast::{Decl, TranslationUnit};
use crate::types::entity::{AccessControl, EntityId, EntityKind, TypeTc, TypeTy};
use crate::types::ty::{BindMode, Layout, LifetimeMetadata, MemberLayout, Mutability, ObjectTypeKind, QualType};

/// Rejects `move` (a keyword per Design Notes' resolution of the
/// ambiguity between "lifetime op name" and "identifier") and any
/// identifier starting with the builtin-reserved `__builtin_` prefix.
fn check_reserved_identifier(sym: &SymbolTable, id: EntityId, iss: &mut IssueHandler) {
  let Some(name) = sym.entity(id).name else { return };
  let spelling = name.as_str();
  if spelling == "move" || spelling.starts_with("__builtin_") {
    if let Some(span) = sym.entity(id).span.clone() {
      iss.emit(Issue::GenericBadStmt { span, reason: GenericBadStmtKind::ReservedIdentifier });
    }
  }
}

fn walk_decls_for_reserved_identifiers(decls: &[Decl], sym: &SymbolTable, iss: &mut IssueHandler) {
  for decl in decls {
    match decl {
      Decl::Function { entity, params, .. } => {
        check_reserved_identifier(sym, *entity, iss);
        for &p in params { check_reserved_identifier(sym, p, iss) }
      }
      Decl::Struct { entity, members } => {
        check_reserved_identifier(sym, *entity, iss);
        for &m in members { check_reserved_identifier(sym, m, iss) }
      }
      Decl::Variable { entity, .. } => check_reserved_identifier(sym, *entity, iss),
      Decl::Module { decls, .. } => walk_decls_for_reserved_identifiers(decls, sym, iss),
    }
  }
}

/// A struct member depends on another struct (an edge in the layout
/// dependency graph) only when it holds that struct *by value*: a
/// pointer, reference or unique pointer is one machine word regardless of
/// what it points to, so it never forces the pointee to be laid out
/// first (§4.3's "a cycle without an intervening pointer/reference
/// indirection" is the only kind that's an error).
fn direct_struct_dependency(ty: &crate::types::ty::ObjectType) -> Option<EntityId> {
  match ty.as_ref() {
    ObjectTypeKind::Struct { entity } => Some(*entity),
    ObjectTypeKind::Array { elem, .. } => direct_struct_dependency(elem),
    _ => None,
  }
}

/// Collects, for each struct declaration, the set of other struct
/// declarations (by index into `structs`) its members directly depend on.
fn dependency_graph(sym: &SymbolTable, structs: &[(EntityId, &[EntityId])]) -> Vec<Vec<usize>> {
  let index_of: HashMap<EntityId, usize> = structs.iter().enumerate().map(|(i, (id, _))| (*id, i)).collect();
  structs.iter().map(|(_, members)| {
    members.iter()
      .filter_map(|&m| match &sym.entity(m).kind {
        EntityKind::Variable(v) => direct_struct_dependency(&v.ty.ty),
        // A base-class subobject depends on its base exactly like a
        // by-value member depends on its field type: the base must be
        // laid out (and, per `finalize_struct`, have its vtable built)
        // before the derived struct can be.
        EntityKind::BaseClassObject(b) => Some(b.ty),
        _ => None,
      })
      .filter_map(|dep_entity| index_of.get(&dep_entity).copied())
      .collect()
  }).collect()
}

/// Kahn's algorithm over the dependency graph. Returns the layout order on
/// success, or the index of a struct caught in a cycle.
fn topo_sort(deps: &[Vec<usize>]) -> Result<Vec<usize>, usize> {
  let n = deps.len();
  // A node is ready once every struct its members directly depend on is
  // already placed; repeatedly picking any ready node is Kahn's
  // algorithm without needing an explicit indegree table.
  let mut placed = vec![false; n];
  let mut order = Vec::with_capacity(n);
  for _ in 0..n {
    let next = (0..n).find(|&i| !placed[i] && deps[i].iter().all(|&d| placed[d]));
    match next {
      Some(i) => { placed[i] = true; order.push(i) }
      None => return Err((0..n).find(|&i| !placed[i]).unwrap_or(0)),
    }
  }
  Ok(order)
}

fn struct_size_align(sym: &SymbolTable, entity: EntityId) -> (u32, u32) {
  match &sym.entity(entity).kind {
    EntityKind::Type(spanned) => match &spanned.k {
      TypeTc::Typed(ty) => (ty.layout.size, ty.layout.align.max(1)),
      TypeTc::ForwardDeclared => (0, 1),
    },
    _ => (0, 1),
  }
}

fn member_layout_entry(sym: &SymbolTable, member: EntityId, offset: &mut u32) -> Option<MemberLayout> {
  match &sym.entity(member).kind {
    EntityKind::Variable(v) => {
      let (size, align) = match v.ty.ty.as_ref() {
        ObjectTypeKind::Struct { entity } => struct_size_align(sym, *entity),
        other => {
          let size = other.scalar_size().unwrap_or(0);
          (size, size.max(1))
        }
      };
      let aligned = offset.next_multiple_of(align.max(1));
      *offset = aligned + size;
      Some(MemberLayout { name: sym.entity(member).name.unwrap_or_else(|| crate::symbol::intern("")), ty: v.ty.clone(), offset: aligned, access: v.access })
    }
    // A base-class subobject occupies its own contiguous region just like
    // a by-value member, sized and aligned by the base's own layout
    // (declare_base_class's `offset` field is the one finalize_struct
    // records here, not recomputed independently).
    EntityKind::BaseClassObject(b) => {
      let (size, align) = struct_size_align(sym, b.ty);
      let aligned = offset.next_multiple_of(align.max(1));
      *offset = aligned + size;
      let name = sym.entity(b.ty).name.unwrap_or_else(|| crate::symbol::intern("__base"));
      let ty = QualType::new(std::rc::Rc::new(ObjectTypeKind::Struct { entity: b.ty }), Mutability::Mut, BindMode::Static);
      Some(MemberLayout { name, ty, offset: aligned, access: AccessControl::Public })
    }
    _ => None,
  }
}

/// Sequential field layout: offsets assigned in declaration order, each
/// aligned to its own type's alignment, with the struct's overall
/// alignment the max of its members' (no reordering/packing: Scatha
/// structs keep "declaration order is layout order"). Also returns, for
/// each `BaseClassObject` member, the base's
/// entity id alongside the byte offset just computed for it — vtable
/// construction needs that offset as the base's this-adjust.
fn compute_layout(sym: &SymbolTable, members: &[EntityId]) -> (Layout, Vec<(EntityId, u32)>) {
  let mut offset = 0u32;
  let mut align = 1u32;
  let mut entries = Vec::new();
  let mut base_offsets = Vec::new();
  for &m in members {
    if let Some(entry) = member_layout_entry(sym, m, &mut offset) {
      align = align.max(match entry.ty.ty.as_ref() {
        ObjectTypeKind::Struct { entity } => match &sym.entity(*entity).kind {
          EntityKind::Type(spanned) => match &spanned.k {
            TypeTc::Typed(ty) => ty.layout.align.max(1),
            TypeTc::ForwardDeclared => 1,
          },
          _ => 1,
        },
        other => other.scalar_size().unwrap_or(1).max(1),
      });
      if let EntityKind::BaseClassObject(b) = &sym.entity(m).kind {
        base_offsets.push((b.ty, entry.offset));
      }
      entries.push(entry);
    }
  }
  let size = offset.next_multiple_of(align.max(1));
  (Layout { size, align, members: entries }, base_offsets)
}

/// Builds `struct_id`'s vtable out of its bases' already-finalized
/// vtables (§4.3 "VTable construction"), or `None` if none of its bases
/// carry one. `own_declared` is always empty here: this backend has no
/// method-declaration surface on `Decl::Struct` yet (member functions are
/// ordinary free-function `Decl::Function`s, per `decorate_bodies`'s own
/// doc comment), so a struct can only ever inherit vtable slots from its
/// bases, never introduce or override one of its own — tracked as an open
/// gap in `DESIGN.md` rather than faked here.
fn build_struct_vtable(sym: &SymbolTable, struct_id: EntityId, base_offsets: &[(EntityId, u32)]) -> Option<crate::vtable::VTable> {
  let mut bases = Vec::new();
  for &(base_id, offset) in base_offsets {
    let EntityKind::Type(spanned) = &sym.entity(base_id).kind else { continue };
    if let TypeTc::Typed(base_ty) = &spanned.k {
      if let Some(base_vt) = &base_ty.vtable {
        bases.push((base_id, offset as i32, base_vt.clone()));
      }
    }
  }
  if bases.is_empty() { return None }
  Some(crate::vtable::VTable::build(struct_id, vec![], bases))
}

/// Finalizes one struct: computes its layout, resolves its base list from
/// the `BaseClassObject` members `declare_base_class` produced, builds its
/// vtable from its bases' (§4.3), then runs lifetime-operation synthesis.
fn finalize_struct(sym: &mut SymbolTable, struct_id: EntityId, home_scope: EntityId, members: &[EntityId]) {
  let (layout, base_offsets) = compute_layout(sym, members);
  let bases: Vec<EntityId> = base_offsets.iter().map(|&(id, _)| id).collect();
  let vtable = build_struct_vtable(sym, struct_id, &base_offsets);
  let EntityKind::Type(spanned) = &mut sym.entity_mut(struct_id).kind else { return };
  spanned.k = TypeTc::Typed(TypeTy { intrinsic: None, layout, lifetime: LifetimeMetadata::default(), bases, vtable });
  analyze_lifetime(sym, struct_id, home_scope, members);
}

/// Decorates every function body in `decls` (§4.3's expression/statement
/// decoration pass), recursing into nested `Decl::Module`s. Runs after
/// every struct has a finished layout and lifetime metadata, since
/// member access and construction resolution both consult `TypeTy`.
/// `this_ty` support for methods is left to a future receiver field on
/// `Decl::Function` — every body here is decorated as a free function.
fn decorate_bodies(sym: &mut SymbolTable, decls: &mut [Decl], iss: &mut IssueHandler) {
  for decl in decls {
    match decl {
      Decl::Function { body: Some(body), .. } => crate::sema::decorate::decorate_stmt(sym, body, None, iss),
      Decl::Function { body: None, .. } | Decl::Struct { .. } | Decl::Variable { .. } => {}
      Decl::Module { decls, .. } => decorate_bodies(sym, decls, iss),
    }
  }
}

/// Processes every `Decl::Struct` in `tu`: rejects reserved identifiers,
/// topologically sorts structs by member dependency (a cycle with no
/// pointer/reference indirection is `RecursiveLayout`), lays out and
/// finalizes lifetime operations in dependency order, then decorates
/// every function body. `home_scope` is where generated special member
/// functions are declared — see `sema::lifetime::analyze_lifetime`'s doc
/// comment.
pub fn analyze_translation_unit(sym: &mut SymbolTable, tu: &mut TranslationUnit, home_scope: EntityId, iss: &mut IssueHandler) {
  walk_decls_for_reserved_identifiers(&tu.decls, sym, iss);

  let structs: Vec<(EntityId, &[EntityId])> = tu.decls.iter()
    .filter_map(|d| match d { Decl::Struct { entity, members } => Some((*entity, members.as_slice())), _ => None })
    .collect();
  let deps = dependency_graph(sym, &structs);

  match topo_sort(&deps) {
    Ok(order) => {
      for i in order {
        let (struct_id, members) = structs[i];
        finalize_struct(sym, struct_id, home_scope, members);
      }
    }
    Err(bad) => {
      let (struct_id, _) = structs[bad];
      if let Some(span) = sym.entity(struct_id).span.clone() {
        iss.emit(Issue::GenericBadStmt { span, reason: GenericBadStmtKind::RecursiveLayout });
      }
      // Lay out whatever isn't part of the cycle so downstream passes
      // still see as much of the program as possible (§4.3's "analysis
      // continues with poisoned placeholders after every error").
      for (i, (struct_id, members)) in structs.iter().enumerate() {
        if i != bad { finalize_struct(sym, *struct_id, home_scope, members) }
      }
    }
  }

  decorate_bodies(sym, &mut tu.decls, iss);
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::diag::IssueHandler;
  use crate::span::{FileId, FileSpan};
  use crate::symbol::intern;
  use crate::types::entity::{AccessControl, ProcKind};
  use crate::types::ty::{BindMode, IntWidth, Mutability, QualType};

  fn sp() -> FileSpan { FileSpan::new(FileId::new("analyzer-test"), 0, 1) }

  #[test]
  fn independent_structs_lay_out_in_declaration_order() {
    let mut sym = SymbolTable::new();
    let mut iss = IssueHandler::new();
    let i32_ty = sym.int_type(IntWidth::W32, true);

    let a = sym.declare_struct(intern("A"), sp(), AccessControl::Public, &mut iss);
    let scope = sym.declare_anonymous_scope();
    sym.push_scope(scope);
    let a_member = sym.declare_variable(intern("x"), sp(), QualType::new(i32_ty.clone(), Mutability::Mut, BindMode::Static), AccessControl::Public, &mut iss);
    sym.pop_scope();

    let mut tu = TranslationUnit { decls: vec![Decl::Struct { entity: a, members: vec![a_member] }] };
    analyze_translation_unit(&mut sym, &mut tu, scope, &mut iss);
    assert!(!iss.has_errors());

    let EntityKind::Type(spanned) = &sym.entity(a).kind else { unreachable!() };
    let TypeTc::Typed(ty) = &spanned.k else { unreachable!() };
    assert_eq!(ty.layout.size, 4);
    assert!(ty.lifetime.is_all_trivial());
  }

  #[test]
  fn a_struct_embedding_another_by_value_depends_on_it_being_laid_out_first() {
    let mut sym = SymbolTable::new();
    let mut iss = IssueHandler::new();
    let i32_ty = sym.int_type(IntWidth::W32, true);

    let inner = sym.declare_struct(intern("Inner"), sp(), AccessControl::Public, &mut iss);
    let inner_scope = sym.declare_anonymous_scope();
    sym.push_scope(inner_scope);
    let inner_member = sym.declare_variable(intern("v"), sp(), QualType::new(i32_ty, Mutability::Mut, BindMode::Static), AccessControl::Public, &mut iss);
    sym.pop_scope();

    let inner_ty: crate::types::ty::ObjectType = std::rc::Rc::new(ObjectTypeKind::Struct { entity: inner });
    let outer = sym.declare_struct(intern("Outer"), sp(), AccessControl::Public, &mut iss);
    let outer_scope = sym.declare_anonymous_scope();
    sym.push_scope(outer_scope);
    let outer_member = sym.declare_variable(intern("inner"), sp(), QualType::new(inner_ty, Mutability::Mut, BindMode::Static), AccessControl::Public, &mut iss);
    sym.pop_scope();

    // Declared in dependency-violating order: Outer first, Inner second.
    let mut tu = TranslationUnit { decls: vec![
      Decl::Struct { entity: outer, members: vec![outer_member] },
      Decl::Struct { entity: inner, members: vec![inner_member] },
    ] };
    analyze_translation_unit(&mut sym, &mut tu, outer_scope, &mut iss);
    assert!(!iss.has_errors());

    let EntityKind::Type(spanned) = &sym.entity(outer).kind else { unreachable!() };
    let TypeTc::Typed(ty) = &spanned.k else { unreachable!() };
    assert_eq!(ty.layout.size, 4);
  }

  #[test]
  fn a_struct_with_a_base_class_inherits_its_vtable() {
    let mut sym = SymbolTable::new();
    let mut iss = IssueHandler::new();

    let base = sym.declare_struct(intern("Base"), sp(), AccessControl::Public, &mut iss);
    let base_ty_obj: crate::types::ty::ObjectType = std::rc::Rc::new(ObjectTypeKind::Struct { entity: base });
    let recv_ref = QualType::new(base_ty_obj, Mutability::Const, BindMode::Static);
    let recv_obj = sym.reference(recv_ref);
    let void = sym.void_type();
    let method_ty = sym.function_type(vec![recv_obj], void);
    let base_fn = sym.declare_function(intern("speak"), sp(), AccessControl::Public);
    let base_vt = crate::vtable::VTable::build(
      base,
      vec![crate::vtable::VTableSlot { name: intern("speak"), ty: method_ty, function: Some(base_fn) }],
      vec![],
    );
    if let EntityKind::Type(spanned) = &mut sym.entity_mut(base).kind {
      spanned.k = TypeTc::Typed(TypeTy {
        intrinsic: None, layout: Layout::default(), lifetime: LifetimeMetadata::default(),
        bases: Vec::new(), vtable: Some(base_vt),
      });
    }

    let derived = sym.declare_struct(intern("Derived"), sp(), AccessControl::Public, &mut iss);
    let scope = sym.declare_anonymous_scope();
    sym.push_scope(scope);
    let base_member = sym.declare_base_class(base, 0);
    sym.pop_scope();
    assert!(!iss.has_errors());

    finalize_struct(&mut sym, derived, scope, &[base_member]);

    let EntityKind::Type(spanned) = &sym.entity(derived).kind else { unreachable!() };
    let TypeTc::Typed(ty) = &spanned.k else { unreachable!() };
    assert_eq!(ty.bases, vec![base]);
    let vt = ty.vtable.as_ref().expect("Derived should inherit Base's vtable");
    assert_eq!(vt.layout(base).len(), 1);
    assert_eq!(vt.this_adjust(base), 0);
  }

  #[test]
  fn move_used_as_an_identifier_is_a_reserved_identifier_issue() {
    let mut sym = SymbolTable::new();
    let mut iss = IssueHandler::new();
    let void = QualType::new(sym.void_type(), Mutability::Const, BindMode::Static);
    let f = sym.declare_function(intern("move"), sp(), AccessControl::Public);
    sym.set_function_type(f, ProcKind::Func, vec![], void, &mut iss);
    let scope = sym.declare_anonymous_scope();
    let mut tu = TranslationUnit { decls: vec![Decl::Function { entity: f, kind: ProcKind::Func, params: vec![], body: None }] };
    analyze_translation_unit(&mut sym, &mut tu, scope, &mut iss);
    assert!(iss.issues().iter().any(|i| matches!(i, Issue::GenericBadStmt { reason: GenericBadStmtKind::ReservedIdentifier, .. })));
  }
}
