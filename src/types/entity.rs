//! The `Entity` type (§3, §4.1): every named or anonymous construct owned
//! by the symbol table, plus the closed-set primitive registry
//! (`PrimType`/`Keyword`/`IntrinsicProc`) that seeds the global scope.
//! Structure and the `make_prims!` macro are carried over from `mmcc`'s
//! entity registry almost verbatim; only the primitive lists themselves
//! are replaced to match Scatha's surface syntax.

use std::collections::HashMap;

use crate::mk_idx;
use crate::span::{FileSpan, Spanned};
use crate::symbol::{Symbol, intern, init_dense_symbol_map};
use crate::types::ty::{Layout, LifetimeMetadata, QualType, ValueCategory};

mk_idx! {
  /// A stable index into the symbol table's entity arena. Never reused;
  /// cycles in the entity graph (a struct holding a pointer to itself, a
  /// function referring to its parent scope) are resolved by indexing
  /// through this handle rather than an owning reference.
  pub struct EntityId;
}

macro_rules! make_prims {
  {$($(#[$attr0:meta])* enum $name:ident {
    $($(#[$attr:meta])* $x:ident $($mark:literal)?: $e:expr,)*
  })* } => {
    $(
      $(#[$attr0])*
      #[derive(Debug, PartialEq, Eq, Copy, Clone)]
      pub enum $name { $($(#[$attr])* $x),* }

      impl $name {
        /// Evaluate a function on all elements of the type, with their names.
        pub fn scan(#[allow(unused)] mut f: impl FnMut(Self, &'static str)) {
          $(f($name::$x, $e);)*
        }
        /// Convert a string into this type.
        #[allow(clippy::should_implement_trait)]
        #[must_use] pub fn from_str(s: &str) -> Option<Self> {
          match s {
            $($e => Some(Self::$x),)*
            _ => None
          }
        }

        /// Get the Scatha keyword/operator spelling for a symbol.
        #[must_use] pub fn from_symbol(s: Symbol) -> Option<Self> {
          use std::sync::LazyLock;
          static SYMBOL_MAP: LazyLock<Box<[Option<$name>]>> = LazyLock::new(|| {
            init_dense_symbol_map(&[$((intern($e), $name::$x)),*])
          });
          SYMBOL_MAP.get(s.into_usize()).map_or(None, |x| *x)
        }

        /// Get the symbol for this primitive.
        #[must_use] pub fn as_symbol(self) -> Symbol {
          use std::sync::LazyLock;
          static INTERNED: LazyLock<[Symbol; <[()]>::len(&[$(() $($mark)?),*])]> =
            LazyLock::new(|| [$(intern($e)),*]);
          INTERNED[self as usize]
        }
      }
    )*
  }
}

make_prims! {
  /// Spelling of the fixed-width and sentinel primitive types (§3's
  /// scalar `ObjectType` kinds, minus the structural ones which are built
  /// by the symbol table's canonicalizing factories).
  enum PrimType {
    Void: "void",
    Bool: "bool",
    Byte: "byte",
    I8: "i8",
    I16: "i16",
    I32: "i32",
    I64: "i64",
    U8: "u8",
    U16: "u16",
    U32: "u32",
    U64: "u64",
    F32: "f32",
    F64: "f64",
    NullPtrT: "__nullptr_t",
  }

  /// Reserved keywords consumed by the analyzer/conversion engine that are
  /// not types, matching the fixed operator/keyword table of §6.
  enum Keyword {
    New: "new",
    Move: "move",
    Delete: "delete",
    This: "this",
    Unique: "unique",
    Mut: "mut",
    Dyn: "dyn",
    Return: "return",
    Break: "break",
    Continue: "continue",
  }

  /// Builtin procedures dispatched directly by the VM (§4.5/§6), callable
  /// like ordinary functions but resolved to a builtin index rather than a
  /// bytecode address.
  enum IntrinsicProc {
    Alloc: "__builtin_alloc",
    Dealloc: "__builtin_dealloc",
    Exit: "__builtin_exit",
    Open: "sys_open",
    Create: "sys_create",
    Read: "sys_read",
    Write: "sys_write",
    FStat: "sys_fstat",
    MMap: "sys_mmap",
    MMapAnon: "sys_mmap_anon",
    Strlen: "strlen",
  }
}

/// The typechecking status of a typedef: forward-declared (name known,
/// body not yet examined) or fully typed.
#[derive(Clone, Debug)]
pub enum TypeTc {
  ForwardDeclared,
  Typed(TypeTy),
}

#[derive(Clone, Debug)]
pub struct TypeTy {
  pub intrinsic: Option<IntrinsicProc>,
  pub layout: Layout,
  pub lifetime: LifetimeMetadata,
  /// Protocols this struct conforms to / inherits from, in declaration
  /// order; used by vtable construction (§4.3).
  pub bases: Vec<EntityId>,
  /// Built once this struct (or any of its bases) declares at least one
  /// virtual function; `None` for ordinary non-polymorphic structs (§4.3
  /// "VTable construction").
  pub vtable: Option<crate::vtable::VTable>,
}

/// The typechecking status of a procedure.
#[derive(Clone, Debug)]
pub enum ProcTc {
  ForwardDeclared,
  Typed(ProcTy),
}

impl ProcTc {
  #[must_use] pub fn ty(&self) -> Option<&ProcTy> {
    match self { ProcTc::ForwardDeclared => None, ProcTc::Typed(ty) => Some(ty) }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProcKind { Func, Proc, Main }

#[derive(Clone, Debug)]
pub struct ProcTy {
  pub kind: ProcKind,
  pub intrinsic: Option<IntrinsicProc>,
  pub args: Vec<QualType>,
  pub ret: QualType,
  /// Set at most twice (§4.1's `set_function_type`): first when the
  /// signature is declared, optionally again to refine the return type.
  pub refined: bool,
}

#[derive(Clone, Debug)]
pub enum GlobalTc {
  ForwardDeclared,
  Checked(QualType),
}

#[derive(Clone, Debug)]
pub enum ConstTc {
  ForwardDeclared,
  Checked { ty: QualType },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessControl { Public, Private, Internal }

/// A scope-kind, per §3: `GlobalScope`, `FileScope`, `AnonymousScope`,
/// `NativeLibrary`, `ForeignLibrary`, plus ordinary struct/function bodies
/// which are scopes too but are represented through their owning entity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScopeKind { Global, File, Anonymous, NativeLibrary, ForeignLibrary, Function, Struct }

/// A lexical scope: an insertion-order list of children plus a
/// name-to-entity multimap permitting overload lookup (§3).
#[derive(Debug, Default)]
pub struct Scope {
  pub kind: Option<ScopeKind>,
  pub parent: Option<EntityId>,
  pub children: Vec<EntityId>,
  pub names: HashMap<Symbol, Vec<EntityId>>,
}

impl Scope {
  #[must_use] pub fn new(kind: ScopeKind, parent: Option<EntityId>) -> Self {
    Self { kind: Some(kind), parent, children: Vec::new(), names: HashMap::new() }
  }

  pub fn add_child(&mut self, name: Option<Symbol>, entity: EntityId) {
    self.children.push(entity);
    if let Some(name) = name { self.names.entry(name).or_default().push(entity) }
  }

  #[must_use] pub fn lookup_local(&self, name: Symbol) -> &[EntityId] {
    self.names.get(&name).map_or(&[], Vec::as_slice)
  }

  /// Finds a structural type's builtin property by kind (§4.1, grounded
  /// in `Entity.cc`'s `findProperty`). Properties are declared by name
  /// (`property_name`) like any other scope member, so this is a typed
  /// convenience over `lookup_local` rather than a separate index.
  #[must_use] pub fn find_property(&self, kind: PropertyKind) -> Option<EntityId> {
    self.lookup_local(intern(property_name(kind))).first().copied()
  }
}

#[must_use] pub fn property_name(kind: PropertyKind) -> &'static str {
  match kind {
    PropertyKind::Count => "count",
    PropertyKind::Empty => "empty",
    PropertyKind::Front => "front",
    PropertyKind::Back => "back",
    PropertyKind::Data => "data",
  }
}

/// A variable, parameter or `this`-receiver.
#[derive(Clone, Debug)]
pub struct Variable {
  pub ty: QualType,
  pub access: AccessControl,
}

/// A builtin property (`count`, `empty`, `front`, `back`, `data`) attached
/// to a structural type on first construction (§4.1).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PropertyKind { Count, Empty, Front, Back, Data }

#[derive(Clone, Debug)]
pub struct Property {
  pub kind: PropertyKind,
  pub ty: QualType,
  pub value_cat: ValueCategory,
}

/// A materialized temporary object, owned by the innermost enclosing
/// cleanup stack.
#[derive(Clone, Debug)]
pub struct Temporary {
  pub id: u32,
  pub ty: QualType,
}

/// A base-class subobject within a derived struct's layout.
#[derive(Clone, Debug)]
pub struct BaseClassObject {
  pub ty: EntityId,
  pub offset: u32,
}

/// Where a function's body comes from, per §4.5/§6: ordinary source-level
/// functions are `Native` (lowered from the decorated AST), special member
/// functions synthesized by [`crate::sema::lifetime`] are `Generated`
/// (no AST body; the IR builder emits one directly from the member
/// layout), and functions declared inside a `ForeignLibrary` scope are
/// `Foreign` (called through libffi, never lowered to bytecode).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FunctionOrigin { Native, Generated, Foreign }

/// One function among potentially several sharing a name (an
/// [`EntityKind::OverloadSet`] groups these for lookup).
#[derive(Clone, Debug)]
pub struct Function {
  pub name: Symbol,
  pub tc: ProcTc,
  pub access: AccessControl,
  pub origin: FunctionOrigin,
}

/// A name that resolves, transparently, to another entity (§3's "Aliases
/// hold a back-reference to the aliased entity").
#[derive(Clone, Debug)]
pub struct Alias {
  pub target: EntityId,
}

/// A placeholder entity substituted after an analysis error, so that
/// later references to the broken declaration don't cascade further
/// errors (§4.3's failure semantics).
#[derive(Clone, Debug, Default)]
pub struct PoisonEntity;

/// The runtime-discriminated kind of an [`Entity`] (§3's closed set).
#[derive(Debug)]
pub enum EntityKind {
  Variable(Variable),
  Property(Property),
  Temporary(Temporary),
  BaseClassObject(BaseClassObject),
  Function(Function),
  OverloadSet(Vec<EntityId>),
  Alias(Alias),
  PoisonEntity(PoisonEntity),
  Scope(Scope),
  Type(Spanned<TypeTc>),
  Global(Spanned<GlobalTc>),
  Const(Spanned<ConstTc>),
  Prim(PrimType),
}

/// Every named construct: unique identity, optional name, parent scope,
/// access control, alias back-references, and a kind (§3).
#[derive(Debug)]
pub struct Entity {
  pub name: Option<Symbol>,
  pub parent: Option<EntityId>,
  pub access: AccessControl,
  pub aliases: Vec<EntityId>,
  pub span: Option<FileSpan>,
  pub kind: EntityKind,
}

impl Entity {
  #[must_use] pub fn is_function(&self) -> bool { matches!(self.kind, EntityKind::Function(_)) }
  #[must_use] pub fn is_overload_set(&self) -> bool { matches!(self.kind, EntityKind::OverloadSet(_)) }
  #[must_use] pub fn is_scope(&self) -> bool { matches!(self.kind, EntityKind::Scope(_)) }

  #[must_use] pub fn scope(&self) -> Option<&Scope> {
    match &self.kind { EntityKind::Scope(s) => Some(s), _ => None }
  }

  #[must_use] pub fn scope_mut(&mut self) -> Option<&mut Scope> {
    match &mut self.kind { EntityKind::Scope(s) => Some(s), _ => None }
  }
}

/// The initial set of primitive entities seeded into the global scope,
/// mirroring `mmcc`'s `Compiler::make_names`: primitive type spellings
/// become `Prim` entities resolvable by ordinary unqualified lookup.
#[must_use] pub fn make_primitive_names() -> HashMap<Symbol, PrimType> {
  let mut names = HashMap::new();
  PrimType::scan(|p, s| { names.insert(intern(s), p); });
  names
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn prim_type_round_trips_through_symbol() {
    let sym = intern("i32");
    assert_eq!(PrimType::from_symbol(sym), Some(PrimType::I32));
    assert_eq!(PrimType::I32.as_symbol(), sym);
  }

  #[test]
  fn keyword_move_is_reserved() {
    assert_eq!(Keyword::from_str("move"), Some(Keyword::Move));
  }
}
