//! The entity graph & symbol table (C1, §4.1). Owns every compile-time
//! entity for the lifetime of a compilation; every other reference into it
//! is a non-owning [`EntityId`]. Structural types are canonicalized by the
//! factory methods. Grounded in `original_source/scatha/lib/Sema/SymbolTable.cc`'s
//! `addEntity`/`unqualifiedLookup`/structural-type caches.

use std::collections::HashMap;
use std::rc::Rc;

use crate::diag::{Issue, IssueHandler};
use crate::span::FileSpan;
use crate::symbol::{Symbol, intern};
use crate::types::entity::{
  AccessControl, Alias, BaseClassObject, ConstTc, Entity, EntityId, EntityKind, Function,
  GlobalTc, PoisonEntity, PrimType, ProcKind, ProcTc, ProcTy, Property, PropertyKind, Scope,
  ScopeKind, Temporary, TypeTc, Variable, make_primitive_names, property_name,
};
use crate::types::ty::{ArrayCount, BindMode, Mutability, ObjectType, ObjectTypeKind, QualType};
use crate::types::IdxVec;

/// Owns every [`Entity`] produced during a compilation. Indices
/// ([`EntityId`]) are the only way to refer to an entity from outside this
/// table; they are never invalidated or reused, so cyclic references
/// (a struct pointing to itself, a function referring to its enclosing
/// scope) are just indices, never owning pointers (see `DESIGN.md`,
/// "ownership graphs").
pub struct SymbolTable {
  entities: IdxVec<EntityId, Entity>,
  global_scope: EntityId,
  current_scope: EntityId,
  primitives: HashMap<Symbol, PrimType>,
  /// Indexed by `PrimType as usize`; `PrimType` is a plain unit-variant
  /// enum with no `Hash` impl, so a dense vector stands in for a map.
  prim_entities: Vec<Option<EntityId>>,
  array_cache: HashMap<(ObjectType, ArrayCountKey), ObjectType>,
  ptr_cache: HashMap<(ObjectType, Mutability, BindMode), ObjectType>,
  ref_cache: HashMap<(ObjectType, Mutability, BindMode), ObjectType>,
  unique_cache: HashMap<(ObjectType, Mutability, BindMode), ObjectType>,
  fn_type_cache: HashMap<(Vec<ObjectType>, ObjectType), ObjectType>,
  /// The anonymous scope each structural type's builtin properties
  /// (`count`/`empty`/`front`/`back`/`data`) were declared into, so
  /// `find_property` can look them back up (§4.1's "first construction
  /// attaches default properties").
  property_scopes: HashMap<ObjectType, EntityId>,
  temporary_id: u32,
  search_paths: Vec<std::path::PathBuf>,
  /// Paths currently being imported, to reject cyclic `native_dependencies`
  /// (§4.1 addendum; `Issue::BadImport` on a repeat).
  import_stack: Vec<std::path::PathBuf>,
}

#[derive(Clone, PartialEq, Eq, Hash)]
enum ArrayCountKey { Fixed(u64), Dynamic }

/// Number of `PrimType` variants (`void` through `__nullptr_t`); keep in
/// sync with `types::entity::PrimType`.
const PRIM_TYPE_COUNT: usize = 14;

impl SymbolTable {
  #[must_use] pub fn new() -> Self {
    let mut entities = IdxVec::new();
    let global_scope = entities.push(Entity {
      name: None, parent: None, access: AccessControl::Public, aliases: Vec::new(), span: None,
      kind: EntityKind::Scope(Scope::new(ScopeKind::Global, None)),
    });
    let mut this = Self {
      entities,
      global_scope,
      current_scope: global_scope,
      primitives: make_primitive_names(),
      prim_entities: vec![None; PRIM_TYPE_COUNT],
      array_cache: HashMap::new(),
      ptr_cache: HashMap::new(),
      ref_cache: HashMap::new(),
      unique_cache: HashMap::new(),
      fn_type_cache: HashMap::new(),
      property_scopes: HashMap::new(),
      temporary_id: 0,
      search_paths: Vec::new(),
      import_stack: Vec::new(),
    };
    this.seed_primitives();
    this
  }

  fn seed_primitives(&mut self) {
    let prims: Vec<(Symbol, PrimType)> = self.primitives.iter().map(|(&s, &p)| (s, p)).collect();
    for (name, prim) in prims {
      let id = self.entities.push(Entity {
        name: Some(name), parent: Some(self.global_scope), access: AccessControl::Public,
        aliases: Vec::new(), span: None, kind: EntityKind::Prim(prim),
      });
      self.entities[self.global_scope].scope_mut().unwrap().add_child(Some(name), id);
      self.prim_entities[prim as usize] = Some(id);
    }
  }

  #[must_use] pub fn entity(&self, id: EntityId) -> &Entity { &self.entities[id] }
  pub fn entity_mut(&mut self, id: EntityId) -> &mut Entity { &mut self.entities[id] }
  #[must_use] pub fn global_scope(&self) -> EntityId { self.global_scope }
  #[must_use] pub fn current_scope(&self) -> EntityId { self.current_scope }

  pub fn push_scope(&mut self, scope: EntityId) { self.current_scope = scope }
  pub fn pop_scope(&mut self) {
    self.current_scope = self.entities[self.current_scope].parent.unwrap_or(self.global_scope);
  }

  #[must_use] pub fn set_search_paths(&mut self, paths: Vec<std::path::PathBuf>) { self.search_paths = paths }

  fn alloc(&mut self, name: Option<Symbol>, span: Option<FileSpan>, access: AccessControl, kind: EntityKind) -> EntityId {
    let parent = self.current_scope;
    let id = self.entities.push(Entity { name, parent: Some(parent), access, aliases: Vec::new(), span, kind });
    if let Some(scope) = self.entities[parent].scope_mut() { scope.add_child(name, id) }
    id
  }

  /// Checks redefinition against the current scope before constructing an
  /// entity of a non-overloadable kind (§4.1).
  fn check_redefinition(&self, name: Symbol, iss: &mut IssueHandler, span: &FileSpan) -> bool {
    let scope = self.entities[self.current_scope].scope().expect("not in a scope");
    let existing = scope.lookup_local(name);
    if let Some(&prior) = existing.first() {
      let prior_span = self.entities[prior].span.clone();
      if let Some(prior_span) = prior_span {
        iss.emit(Issue::Redefinition { span: span.clone(), name, prior: prior_span });
        return false;
      }
    }
    true
  }

  pub fn declare_variable(
    &mut self, name: Symbol, span: FileSpan, ty: QualType, access: AccessControl, iss: &mut IssueHandler,
  ) -> EntityId {
    if !self.check_redefinition(name, iss, &span) {
      return self.declare_poison(name, span);
    }
    self.alloc(Some(name), Some(span), access, EntityKind::Variable(Variable { ty, access }))
  }

  pub fn declare_parameter(&mut self, name: Symbol, span: FileSpan, ty: QualType, access: AccessControl) -> EntityId {
    self.alloc(Some(name), Some(span), access, EntityKind::Variable(Variable { ty, access }))
  }

  /// Declares a function. Overloadable: coexists with existing functions
  /// of the same name as long as no later `set_function_type` call finds
  /// a signature clash (§4.1). Equivalent to
  /// `declare_function_with_origin(.., FunctionOrigin::Native)`.
  pub fn declare_function(&mut self, name: Symbol, span: FileSpan, access: AccessControl) -> EntityId {
    self.declare_function_with_origin(name, span, access, crate::types::entity::FunctionOrigin::Native)
  }

  /// As [`Self::declare_function`], but records where the function's body
  /// comes from (`Generated` for synthesized special member functions,
  /// `Foreign` for an FFI declaration).
  pub fn declare_function_with_origin(
    &mut self, name: Symbol, span: FileSpan, access: AccessControl, origin: crate::types::entity::FunctionOrigin,
  ) -> EntityId {
    self.alloc(Some(name), Some(span), access, EntityKind::Function(Function { name, tc: ProcTc::ForwardDeclared, access, origin }))
  }

  /// May be called at most twice per function: once to set the signature,
  /// optionally once more to refine the return type. The second call must
  /// preserve the argument-type list (§4.1).
  pub fn set_function_type(&mut self, func: EntityId, kind: ProcKind, args: Vec<QualType>, ret: QualType, iss: &mut IssueHandler) {
    let span = self.entities[func].span.clone().expect("function must have a span");
    let EntityKind::Function(f) = &self.entities[func].kind else { panic!("not a function entity") };
    match &f.tc {
      ProcTc::ForwardDeclared => {
        if let Some(clash) = self.find_signature_clash(func, &args) {
          let name = self.entities[func].name.unwrap_or_else(|| intern(""));
          let prior = self.entities[clash].span.clone().unwrap_or(span.clone());
          iss.emit(Issue::Redefinition { span, name, prior });
        }
        let EntityKind::Function(f) = &mut self.entities[func].kind else { unreachable!() };
        f.tc = ProcTc::Typed(ProcTy { kind, intrinsic: None, args, ret, refined: false });
      }
      ProcTc::Typed(existing) => {
        assert_eq!(existing.args.len(), args.len(), "set_function_type must preserve the argument list");
        let EntityKind::Function(f) = &mut self.entities[func].kind else { unreachable!() };
        if let ProcTc::Typed(ty) = &mut f.tc {
          assert!(!ty.refined, "set_function_type called more than twice");
          ty.ret = ret;
          ty.refined = true;
        }
      }
    }
  }

  fn find_signature_clash(&self, func: EntityId, args: &[QualType]) -> Option<EntityId> {
    let name = self.entities[func].name?;
    let parent = self.entities[func].parent?;
    let scope = self.entities[parent].scope()?;
    for &candidate in scope.lookup_local(name) {
      if candidate == func { continue }
      let candidate = self.strip_alias(candidate);
      if let EntityKind::Function(g) = &self.entities[candidate].kind {
        if let ProcTc::Typed(gty) = &g.tc {
          if gty.args.len() == args.len()
            && gty.args.iter().zip(args).all(|(a, b)| a.ty == b.ty)
          {
            return Some(candidate);
          }
        }
      }
    }
    None
  }

  pub fn declare_struct(&mut self, name: Symbol, span: FileSpan, access: AccessControl, iss: &mut IssueHandler) -> EntityId {
    if !self.check_redefinition(name, iss, &span) {
      return self.declare_poison(name, span);
    }
    self.alloc(Some(name), Some(span.clone()), access, EntityKind::Type(crate::span::Spanned::new(span, TypeTc::ForwardDeclared)))
  }

  pub fn declare_alias(&mut self, name: Symbol, span: FileSpan, target: EntityId, access: AccessControl, iss: &mut IssueHandler) -> EntityId {
    if !self.check_redefinition(name, iss, &span) {
      return self.declare_poison(name, span);
    }
    self.alloc(Some(name), Some(span), access, EntityKind::Alias(Alias { target }))
  }

  pub fn declare_property(&mut self, kind: PropertyKind, ty: QualType, value_cat: crate::types::ty::ValueCategory) -> EntityId {
    let name = intern(property_name(kind));
    self.alloc(Some(name), None, AccessControl::Public, EntityKind::Property(Property { kind, ty, value_cat }))
  }

  pub fn declare_temporary(&mut self, ty: QualType) -> EntityId {
    let id = self.temporary_id;
    self.temporary_id += 1;
    self.alloc(None, None, AccessControl::Public, EntityKind::Temporary(Temporary { id, ty }))
  }

  pub fn declare_base_class(&mut self, ty: EntityId, offset: u32) -> EntityId {
    self.alloc(None, None, AccessControl::Public, EntityKind::BaseClassObject(BaseClassObject { ty, offset }))
  }

  pub fn declare_anonymous_scope(&mut self) -> EntityId {
    self.alloc(None, None, AccessControl::Public, EntityKind::Scope(Scope::new(ScopeKind::Anonymous, Some(self.current_scope))))
  }

  pub fn declare_poison(&mut self, name: Symbol, span: FileSpan) -> EntityId {
    self.alloc(Some(name), Some(span), AccessControl::Public, EntityKind::PoisonEntity(PoisonEntity))
  }

  pub fn declare_global(&mut self, name: Symbol, span: FileSpan, access: AccessControl) -> EntityId {
    self.alloc(Some(name), Some(span.clone()), access, EntityKind::Global(crate::span::Spanned::new(span, GlobalTc::ForwardDeclared)))
  }

  pub fn declare_const(&mut self, name: Symbol, span: FileSpan, access: AccessControl) -> EntityId {
    self.alloc(Some(name), Some(span.clone()), access, EntityKind::Const(crate::span::Spanned::new(span, ConstTc::ForwardDeclared)))
  }

  /// Transparently resolves an alias chain to the entity it ultimately
  /// names.
  #[must_use] pub fn strip_alias(&self, mut id: EntityId) -> EntityId {
    loop {
      match &self.entities[id].kind {
        EntityKind::Alias(a) => id = a.target,
        _ => return id,
      }
    }
  }

  /// `unqualified_lookup` (§4.1): walks outward from the current scope,
  /// merging overload sets of functions with the same name across nested
  /// scopes, stopping at the first scope that yields a non-function.
  #[must_use] pub fn unqualified_lookup(&self, name: Symbol) -> Vec<EntityId> {
    let mut overload_set: Vec<EntityId> = Vec::new();
    let mut scope_id = Some(self.current_scope);
    while let Some(sid) = scope_id {
      let scope = self.entities[sid].scope().expect("walked to a non-scope parent");
      let entities = scope.lookup_local(name);
      if !entities.is_empty() {
        let local_functions: Vec<EntityId> = entities.iter()
          .copied()
          .filter(|&e| self.entities[self.strip_alias(e)].is_function())
          .collect();
        if !local_functions.is_empty() {
          for f in local_functions { if !overload_set.contains(&f) { overload_set.push(f) } }
        } else if overload_set.is_empty() {
          return entities.to_vec();
        }
      }
      scope_id = scope.parent;
    }
    overload_set
  }

  // -- structural type factories (§4.1): hashed by structure, first
  // construction attaches default properties. --

  pub fn array_type(&mut self, elem: ObjectType, count: ArrayCount) -> ObjectType {
    let key = match &count { ArrayCount::Fixed(n) => ArrayCountKey::Fixed(*n), ArrayCount::Dynamic => ArrayCountKey::Dynamic };
    if let Some(ty) = self.array_cache.get(&(elem.clone(), key.clone())) { return ty.clone() }
    let ty: ObjectType = Rc::new(ObjectTypeKind::Array { elem: elem.clone(), count: count.clone() });
    self.array_cache.insert((elem.clone(), key), ty.clone());

    let prop_scope = self.declare_anonymous_scope();
    self.push_scope(prop_scope);
    let usize_ty = self.int_type(crate::types::ty::IntWidth::W64, false);
    let count_ty = QualType::new(usize_ty, Mutability::Const, BindMode::Static);
    self.declare_property(PropertyKind::Count, count_ty.clone(), crate::types::ty::ValueCategory::RValue);
    self.declare_property(PropertyKind::Empty, QualType::new(self.bool_type(), Mutability::Const, BindMode::Static), crate::types::ty::ValueCategory::RValue);
    let elem_ref = QualType::new(elem, Mutability::Mut, BindMode::Static);
    self.declare_property(PropertyKind::Front, elem_ref.clone(), crate::types::ty::ValueCategory::LValue);
    self.declare_property(PropertyKind::Back, elem_ref, crate::types::ty::ValueCategory::LValue);
    self.pop_scope();
    self.property_scopes.insert(ty.clone(), prop_scope);
    ty
  }

  /// Looks up one of a structural type's builtin properties by kind
  /// (§4.1+, grounded in `Entity.cc`'s `findProperty`). `None` both for
  /// types with no property set (scalars) and for a property kind that
  /// type's factory never attached (e.g. `data` on a fixed-size array).
  #[must_use] pub fn find_property(&self, ty: &ObjectType, kind: PropertyKind) -> Option<EntityId> {
    let scope_id = *self.property_scopes.get(ty)?;
    self.entities[scope_id].scope()?.find_property(kind)
  }

  pub fn pointer(&mut self, base: QualType) -> ObjectType {
    let key = (base.ty.clone(), base.mutability, base.bind_mode);
    if let Some(ty) = self.ptr_cache.get(&key) { return ty.clone() }
    let ty: ObjectType = Rc::new(ObjectTypeKind::RawPtr { base });
    self.ptr_cache.insert(key, ty.clone());
    ty
  }

  pub fn reference(&mut self, base: QualType) -> ObjectType {
    let key = (base.ty.clone(), base.mutability, base.bind_mode);
    if let Some(ty) = self.ref_cache.get(&key) { return ty.clone() }
    let ty: ObjectType = Rc::new(ObjectTypeKind::Reference { base });
    self.ref_cache.insert(key, ty.clone());
    ty
  }

  pub fn unique_pointer(&mut self, base: QualType) -> ObjectType {
    let key = (base.ty.clone(), base.mutability, base.bind_mode);
    if let Some(ty) = self.unique_cache.get(&key) { return ty.clone() }
    let ty: ObjectType = Rc::new(ObjectTypeKind::UniquePtr { base });
    self.unique_cache.insert(key, ty.clone());
    ty
  }

  pub fn function_type(&mut self, args: Vec<ObjectType>, ret: ObjectType) -> ObjectType {
    let key = (args.clone(), ret.clone());
    if let Some(ty) = self.fn_type_cache.get(&key) { return ty.clone() }
    let ty: ObjectType = Rc::new(ObjectTypeKind::Function { args: args.clone().into(), ret: ret.clone() });
    self.fn_type_cache.insert(key, ty.clone());
    ty
  }

  #[must_use] pub fn int_type(&self, width: crate::types::ty::IntWidth, signed: bool) -> ObjectType {
    Rc::new(ObjectTypeKind::Int { width, signed })
  }

  #[must_use] pub fn float_type(&self, width: crate::types::ty::FloatWidth) -> ObjectType {
    Rc::new(ObjectTypeKind::Float { width })
  }

  #[must_use] pub fn bool_type(&self) -> ObjectType { Rc::new(ObjectTypeKind::Bool) }
  #[must_use] pub fn byte_type(&self) -> ObjectType { Rc::new(ObjectTypeKind::Byte) }
  #[must_use] pub fn void_type(&self) -> ObjectType { Rc::new(ObjectTypeKind::Void) }
  #[must_use] pub fn nullptr_type(&self) -> ObjectType { Rc::new(ObjectTypeKind::NullPtr) }

  #[must_use] pub fn prim_entity(&self, prim: PrimType) -> Option<EntityId> { self.prim_entities[prim as usize] }

  fn resolve_library_path(&self, name: &str) -> Option<std::path::PathBuf> {
    for base in &self.search_paths {
      let candidate = base.join(name);
      if candidate.exists() { return Some(candidate) }
    }
    let direct = std::path::PathBuf::from(name);
    direct.exists().then_some(direct)
  }

  /// Resolves `name` through the configured search paths, parses its JSON
  /// descriptor into a child `NativeLibrary` scope, and records transitive
  /// dependencies by letting the descriptor's own importer calls recurse
  /// (§4.1 addendum). Cyclic imports and resolution/parse failures are
  /// reported as `Issue::BadImport`, with a poison entity standing in for
  /// the broken import so later references don't cascade further errors.
  pub fn import_native_library(&mut self, name: Symbol, span: FileSpan, iss: &mut IssueHandler) -> EntityId {
    let path_str = name.as_str().to_string();
    let Some(path) = self.resolve_library_path(&path_str) else {
      iss.emit(Issue::BadImport { span: span.clone(), path: path_str, reason: "library not found on search path".into() });
      return self.declare_poison(name, span);
    };
    if self.import_stack.contains(&path) {
      iss.emit(Issue::BadImport { span: span.clone(), path: path_str, reason: "cyclic library import".into() });
      return self.declare_poison(name, span);
    }
    let content = match std::fs::read_to_string(&path) {
      Ok(c) => c,
      Err(e) => {
        iss.emit(Issue::BadImport { span: span.clone(), path: path_str, reason: e.to_string() });
        return self.declare_poison(name, span);
      }
    };
    if !self.check_redefinition(name, iss, &span) {
      return self.declare_poison(name, span);
    }
    let scope_id = self.alloc(
      Some(name), Some(span.clone()), AccessControl::Public,
      EntityKind::Scope(Scope::new(ScopeKind::NativeLibrary, Some(self.current_scope))),
    );
    self.import_stack.push(path);
    self.push_scope(scope_id);
    if let Err(e) = crate::serialize::deserialize_from_str(self, &content) {
      iss.emit(Issue::BadImport { span, path: path_str, reason: e.to_string() });
    }
    self.pop_scope();
    self.import_stack.pop();
    scope_id
  }

  /// Records a foreign library dependency as a `ForeignLibrary` scope with
  /// no parsed contents (§4.1 addendum: "foreign libraries just record
  /// name and file").
  pub fn import_foreign_library(&mut self, name: Symbol, span: FileSpan, iss: &mut IssueHandler) -> EntityId {
    if !self.check_redefinition(name, iss, &span) {
      return self.declare_poison(name, span);
    }
    self.alloc(
      Some(name), Some(span.clone()), AccessControl::Public,
      EntityKind::Scope(Scope::new(ScopeKind::ForeignLibrary, Some(self.current_scope))),
    )
  }
}

impl Default for SymbolTable {
  fn default() -> Self { Self::new() }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::span::{FileId, FileSpan};

  fn sp() -> FileSpan { FileSpan::new(FileId::new("test.scatha"), 0, 1) }

  #[test]
  fn redefinition_of_a_variable_is_rejected() {
    let mut st = SymbolTable::new();
    let mut iss = IssueHandler::new();
    let name = intern("x");
    let ty = QualType::new(st.int_type(crate::types::ty::IntWidth::W32, true), Mutability::Const, BindMode::Static);
    st.declare_variable(name, sp(), ty.clone(), AccessControl::Public, &mut iss);
    assert!(!iss.has_errors());
    st.declare_variable(name, sp(), ty, AccessControl::Public, &mut iss);
    assert!(iss.has_errors());
  }

  #[test]
  fn array_type_is_canonicalized() {
    let mut st = SymbolTable::new();
    let elem = st.int_type(crate::types::ty::IntWidth::W32, true);
    let a = st.array_type(elem.clone(), ArrayCount::Fixed(4));
    let b = st.array_type(elem, ArrayCount::Fixed(4));
    assert!(Rc::ptr_eq(&a, &b));
  }

  #[test]
  fn unqualified_lookup_merges_overloads_across_scopes() {
    let mut st = SymbolTable::new();
    let mut iss = IssueHandler::new();
    let name = intern("f");
    let outer = st.declare_function(name, sp(), AccessControl::Public);
    let int_ty = st.int_type(crate::types::ty::IntWidth::W32, true);
    st.set_function_type(outer, ProcKind::Func, vec![], QualType::new(int_ty.clone(), Mutability::Const, BindMode::Static), &mut iss);

    let file_scope = st.alloc(None, None, AccessControl::Public, EntityKind::Scope(Scope::new(ScopeKind::File, Some(st.global_scope))));
    st.push_scope(file_scope);
    let inner = st.declare_function(name, sp(), AccessControl::Public);
    st.set_function_type(inner, ProcKind::Func, vec![QualType::new(int_ty.clone(), Mutability::Const, BindMode::Static)], QualType::new(int_ty, Mutability::Const, BindMode::Static), &mut iss);

    let found = st.unqualified_lookup(name);
    assert_eq!(found.len(), 2);
    assert!(!iss.has_errors());
  }

  #[test]
  fn importing_a_missing_native_library_is_reported() {
    let mut st = SymbolTable::new();
    let mut iss = IssueHandler::new();
    st.import_native_library(intern("does-not-exist.scathalib"), sp(), &mut iss);
    assert!(iss.has_errors());
  }

  #[test]
  fn foreign_library_import_records_a_scope_without_parsing() {
    let mut st = SymbolTable::new();
    let mut iss = IssueHandler::new();
    let id = st.import_foreign_library(intern("libc"), sp(), &mut iss);
    assert!(!iss.has_errors());
    assert!(st.entity(id).is_scope());
  }
}
