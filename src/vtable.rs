//! Virtual dispatch tables (§4.3 "VTable construction"). Grounded in
//! `original_source/scatha/include/scatha/Sema/VTable.h`'s `layout(type)`
//! accessor (a record's vtable exposes a per-ancestor view, keyed by the
//! ancestor/protocol type) and `lib/Sema/VTable.cc`'s `findFnImpl`/
//! `matchArgs` depth-first search. The original builds one `VTable` per
//! record during semantic analysis and threads an `inheritanceMap` of
//! owned child `VTable`s; this module takes the already-built base
//! vtables as plain arguments instead, since this backend's entity graph
//! has no owning-pointer tree to walk (everything is an [`EntityId`]).

use std::collections::HashMap;

use crate::symbol::Symbol;
use crate::types::entity::EntityId;
use crate::types::ty::{ObjectType, ObjectTypeKind};

/// A single dispatch slot: the name and declared signature a call site
/// resolves against, plus the function currently occupying it (`None`
/// only transiently, never observable once a vtable finishes building).
#[derive(Clone, Debug)]
pub struct VTableSlot {
  pub name: Symbol,
  pub ty: ObjectType,
  pub function: Option<EntityId>,
}

/// One ancestor's view into a vtable: its slot list, in that ancestor's
/// own declaration order, plus the this-pointer byte adjustment needed to
/// get from a pointer to the most-derived object to that ancestor's
/// subobject (glossary: "Thunk"). Zero for the type's own, primary view.
#[derive(Clone, Debug, Default)]
pub struct AncestorLayout {
  pub slots: Vec<VTableSlot>,
  pub this_adjust: i32,
}

/// A record's complete vtable: its own dispatch slots plus one view per
/// ancestor/protocol it conforms to, so a call through a base-typed
/// pointer dispatches using that base's slot indices (§4.3 "a struct's
/// vtable exposes a stable view per ancestor it's accessed through").
#[derive(Clone, Debug)]
pub struct VTable {
  owner: EntityId,
  layouts: HashMap<EntityId, AncestorLayout>,
}

fn signature_matches(a: &ObjectType, b: &ObjectType) -> bool {
  match (a.as_ref(), b.as_ref()) {
    (ObjectTypeKind::Function { args: aa, ret: ar }, ObjectTypeKind::Function { args: ba, ret: br }) =>
      !aa.is_empty() && aa.len() == ba.len() && aa[1..] == ba[1..] && ar == br,
    _ => false,
  }
}

fn resolve_overrides(own_declared: &[VTableSlot], inherited: &[VTableSlot]) -> Vec<VTableSlot> {
  inherited.iter().map(|slot| {
    match own_declared.iter().find(|o| o.name == slot.name && signature_matches(&slot.ty, &o.ty)) {
      Some(over) => VTableSlot { name: slot.name, ty: slot.ty.clone(), function: over.function },
      None => slot.clone(),
    }
  }).collect()
}

impl VTable {
  /// Builds `owner`'s vtable depth-first: the first entry of `bases` is
  /// treated as the primary base whose slot layout `owner`'s own view
  /// extends (stable indices: an override occupies its base's slot, a new
  /// virtual method is appended); every other base/protocol contributes
  /// its full ancestor map unchanged except for the composed this-adjust
  /// and any slots `own_declared` overrides (§4.3's "stable slot
  /// assignment, this-pointer adjustment recording").
  #[must_use] pub fn build(owner: EntityId, own_declared: Vec<VTableSlot>, bases: Vec<(EntityId, i32, VTable)>) -> VTable {
    let mut layouts = HashMap::new();

    let own_view = match bases.first() {
      Some((primary_id, _, primary_vt)) => {
        let primary_slots = primary_vt.layout(*primary_id);
        let mut view = resolve_overrides(&own_declared, primary_slots);
        for decl in &own_declared {
          if !view.iter().any(|s| s.name == decl.name && signature_matches(&s.ty, &decl.ty)) {
            view.push(decl.clone());
          }
        }
        view
      }
      None => own_declared.clone(),
    };
    layouts.insert(owner, AncestorLayout { slots: own_view, this_adjust: 0 });

    for (base_id, offset, base_vt) in &bases {
      for (&anc_id, anc_layout) in &base_vt.layouts {
        if anc_id == owner { continue }
        let composed = AncestorLayout {
          slots: resolve_overrides(&own_declared, &anc_layout.slots),
          this_adjust: offset + anc_layout.this_adjust,
        };
        layouts.entry(anc_id).or_insert(composed);
      }
      layouts.entry(*base_id).or_insert_with(|| AncestorLayout {
        slots: resolve_overrides(&own_declared, base_vt.layout(*base_id)),
        this_adjust: *offset,
      });
    }

    VTable { owner, layouts }
  }

  #[must_use] pub fn owner(&self) -> EntityId { self.owner }

  /// Reconstructs a vtable directly from its already-resolved per-ancestor
  /// layouts, bypassing `build`'s override resolution — used by
  /// `serialize::deserialize`, which reads back a layout map a prior
  /// `serialize` call already flattened, rather than rebuilding it from
  /// base vtables.
  #[must_use] pub(crate) fn from_layouts(owner: EntityId, layouts: HashMap<EntityId, AncestorLayout>) -> VTable {
    VTable { owner, layouts }
  }

  /// Every ancestor/protocol type this vtable carries a view for,
  /// including `owner` itself — what `serialize::serialize_entity` walks
  /// to flatten a vtable into its descriptor form.
  pub fn ancestors(&self) -> impl Iterator<Item = EntityId> + '_ { self.layouts.keys().copied() }

  /// The slot list visible through a pointer/reference typed as `ty`,
  /// which must be `self`'s own type, an ancestor, or a conformed
  /// protocol (the precondition `VTable::layout` documents in the
  /// original).
  #[must_use] pub fn layout(&self, ty: EntityId) -> &[VTableSlot] {
    self.layouts.get(&ty).map_or(&[], |l| l.slots.as_slice())
  }

  #[must_use] pub fn this_adjust(&self, ty: EntityId) -> i32 {
    self.layouts.get(&ty).map_or(0, |l| l.this_adjust)
  }

  /// Searches `self`'s own view, then every ancestor view, for a slot
  /// whose name and non-receiver argument types match the call (§4.3's
  /// `findFunction`/`matchArgs`). Returns the ancestor type the matching
  /// slot was found under and its index within that ancestor's layout.
  #[must_use] pub fn find_function(&self, name: Symbol, call_ty: &ObjectType) -> Option<(EntityId, usize)> {
    for (&ty, layout) in &self.layouts {
      if let Some(idx) = layout.slots.iter().position(|s| s.name == name && signature_matches(&s.ty, call_ty)) {
        return Some((ty, idx));
      }
    }
    None
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::symbol::intern;
  use crate::symtab::SymbolTable;
  use crate::types::ty::{BindMode, Mutability, QualType};

  fn dummy_entity(st: &mut SymbolTable, name: &str) -> EntityId {
    st.declare_function(intern(name), test_span(), crate::types::entity::AccessControl::Public)
  }

  fn test_span() -> crate::span::FileSpan {
    crate::span::FileSpan::new(crate::span::FileId::new("vtable-test"), 0, 0)
  }

  fn method_ty(st: &mut SymbolTable, receiver: ObjectType) -> ObjectType {
    let recv_ref = QualType::new(receiver, Mutability::Const, BindMode::Static);
    let recv_obj = st.reference(recv_ref);
    st.function_type(vec![recv_obj], st.void_type())
  }

  #[test]
  fn an_override_keeps_the_base_slot_index() {
    let mut st = SymbolTable::new();
    let base_struct = intern("Base");
    let base_entity = st.declare_struct(base_struct, test_span(), crate::types::entity::AccessControl::Public, &mut crate::diag::IssueHandler::new());
    let base_ty: ObjectType = std::rc::Rc::new(ObjectTypeKind::Struct { entity: base_entity });
    let base_method_ty = method_ty(&mut st, base_ty.clone());

    let base_fn = dummy_entity(&mut st, "speak");
    let base_vt = VTable::build(base_entity, vec![VTableSlot { name: intern("speak"), ty: base_method_ty.clone(), function: Some(base_fn) }], vec![]);

    let derived_struct = intern("Derived");
    let derived_entity = st.declare_struct(derived_struct, test_span(), crate::types::entity::AccessControl::Public, &mut crate::diag::IssueHandler::new());
    let derived_fn = dummy_entity(&mut st, "speak");
    let derived_method_ty = method_ty(&mut st, base_ty);
    let derived_vt = VTable::build(
      derived_entity,
      vec![VTableSlot { name: intern("speak"), ty: derived_method_ty, function: Some(derived_fn) }],
      vec![(base_entity, 0, base_vt)],
    );

    let via_base = derived_vt.layout(base_entity);
    assert_eq!(via_base.len(), 1);
    assert_eq!(via_base[0].function, Some(derived_fn));
    let via_derived = derived_vt.layout(derived_entity);
    assert_eq!(via_derived.len(), 1);
    assert_eq!(via_derived[0].function, Some(derived_fn));
  }

  #[test]
  fn secondary_base_this_adjust_is_recorded() {
    let mut st = SymbolTable::new();
    let iface_entity = st.declare_struct(intern("Iface"), test_span(), crate::types::entity::AccessControl::Public, &mut crate::diag::IssueHandler::new());
    let iface_ty: ObjectType = std::rc::Rc::new(ObjectTypeKind::Struct { entity: iface_entity });
    let iface_method_ty = method_ty(&mut st, iface_ty);
    let iface_fn = dummy_entity(&mut st, "draw");
    let iface_vt = VTable::build(iface_entity, vec![VTableSlot { name: intern("draw"), ty: iface_method_ty, function: Some(iface_fn) }], vec![]);

    let widget_entity = st.declare_struct(intern("Widget"), test_span(), crate::types::entity::AccessControl::Public, &mut crate::diag::IssueHandler::new());
    let widget_vt = VTable::build(widget_entity, vec![], vec![(iface_entity, 8, iface_vt)]);

    assert_eq!(widget_vt.this_adjust(iface_entity), 8);
    assert_eq!(widget_vt.this_adjust(widget_entity), 0);
  }
}
