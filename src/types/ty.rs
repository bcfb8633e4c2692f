//! Types (§3). Types are entities (see [`crate::types::entity::EntityKind`])
//! but their *shape* — the closed kind set, qualifiers and layout — lives
//! here, mirroring the split between `Sema/Entity.h` and a dedicated type
//! header in `original_source`.

use std::rc::Rc;

use crate::symbol::Symbol;
use crate::types::entity::{AccessControl, EntityId};

/// Integer width in bits, one of the fixed set the language supports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntWidth { W8, W16, W32, W64 }

impl IntWidth {
  #[must_use] pub fn bytes(self) -> u32 {
    match self { IntWidth::W8 => 1, IntWidth::W16 => 2, IntWidth::W32 => 4, IntWidth::W64 => 8 }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FloatWidth { F32, F64 }

impl FloatWidth {
  #[must_use] pub fn bytes(self) -> u32 { match self { FloatWidth::F32 => 4, FloatWidth::F64 => 8 } }
}

/// Either a fixed element count or a dynamically-sized array (`[T]`).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ArrayCount { Fixed(u64), Dynamic }

/// The closed kind set of §3's "Types" subsection. `ObjectType` values are
/// canonicalized for the structural kinds (array/pointer/reference/
/// function): identical constructions share one `Rc`-backed instance, see
/// [`crate::symtab::SymbolTable::array_type`] and friends.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ObjectTypeKind {
  Void,
  Bool,
  Byte,
  Int { width: IntWidth, signed: bool },
  Float { width: FloatWidth },
  NullPtr,
  Array { elem: ObjectType, count: ArrayCount },
  RawPtr { base: QualType },
  UniquePtr { base: QualType },
  Reference { base: QualType },
  Function { args: Rc<[ObjectType]>, ret: ObjectType },
  /// A user-defined `struct`; layout and lifetime metadata live on the
  /// owning [`EntityId`] in the symbol table.
  Struct { entity: EntityId },
  /// A `protocol` declaration; carries a vtable like conforming structs.
  Protocol { entity: EntityId },
}

/// A reference-counted, hash-consed object type. Two `ObjectType`s compare
/// equal iff they are the same canonical instance (pointer equality would
/// also work once canonicalized, but structural equality is simpler here).
pub type ObjectType = Rc<ObjectTypeKind>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Mutability { Const, Mut }

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindMode { Static, Dyn }

/// `(ObjectType, mutability, bindMode)`, per §3.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct QualType {
  pub ty: ObjectType,
  pub mutability: Mutability,
  pub bind_mode: BindMode,
}

impl QualType {
  #[must_use] pub fn new(ty: ObjectType, mutability: Mutability, bind_mode: BindMode) -> Self {
    Self { ty, mutability, bind_mode }
  }

  #[must_use] pub fn is_mut(&self) -> bool { self.mutability == Mutability::Mut }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValueCategory { LValue, RValue }

/// The four lifetime operations attached to non-trivial object types,
/// per §3 invariant (i).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LifetimeOpKind { DefaultConstructor, CopyConstructor, MoveConstructor, Destructor }

impl LifetimeOpKind {
  #[must_use] pub const ALL: [LifetimeOpKind; 4] = [
    LifetimeOpKind::DefaultConstructor,
    LifetimeOpKind::CopyConstructor,
    LifetimeOpKind::MoveConstructor,
    LifetimeOpKind::Destructor,
  ];
}

/// Whether a lifetime operation is trivial (no code needed), synthesized
/// inline, synthesized out-of-line, or user-deleted.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LifetimeOperation {
  Trivial,
  /// Synthesized, small enough to inline at each use (e.g. a struct of
  /// two trivial members gets an inlined copy).
  NontrivialInline,
  /// Synthesized or user-defined, large enough to warrant an out-of-line
  /// function; carries the function entity implementing it.
  Nontrivial { function: EntityId },
  /// The user (or a non-copyable member) disables this operation.
  Deleted,
}

impl LifetimeOperation {
  #[must_use] pub fn is_trivial(&self) -> bool { matches!(self, LifetimeOperation::Trivial) }
  #[must_use] pub fn is_deleted(&self) -> bool { matches!(self, LifetimeOperation::Deleted) }
}

/// The four-tuple of lifetime operations for a non-trivial object type,
/// per the glossary's "Lifetime metadata".
#[derive(Clone, Debug, Default)]
pub struct LifetimeMetadata {
  pub default_ctor: Option<LifetimeOperation>,
  pub copy_ctor: Option<LifetimeOperation>,
  pub move_ctor: Option<LifetimeOperation>,
  pub dtor: Option<LifetimeOperation>,
}

impl LifetimeMetadata {
  #[must_use] pub fn get(&self, k: LifetimeOpKind) -> Option<&LifetimeOperation> {
    match k {
      LifetimeOpKind::DefaultConstructor => self.default_ctor.as_ref(),
      LifetimeOpKind::CopyConstructor => self.copy_ctor.as_ref(),
      LifetimeOpKind::MoveConstructor => self.move_ctor.as_ref(),
      LifetimeOpKind::Destructor => self.dtor.as_ref(),
    }
  }

  pub fn set(&mut self, k: LifetimeOpKind, op: LifetimeOperation) {
    match k {
      LifetimeOpKind::DefaultConstructor => self.default_ctor = Some(op),
      LifetimeOpKind::CopyConstructor => self.copy_ctor = Some(op),
      LifetimeOpKind::MoveConstructor => self.move_ctor = Some(op),
      LifetimeOpKind::Destructor => self.dtor = Some(op),
    }
  }

  /// A type has trivial lifetime iff all four operations are trivial (or
  /// absent, for types that never need this metadata at all).
  #[must_use] pub fn is_all_trivial(&self) -> bool {
    [&self.default_ctor, &self.copy_ctor, &self.move_ctor, &self.dtor]
      .into_iter()
      .all(|op| op.as_ref().is_none_or(LifetimeOperation::is_trivial))
  }

  /// The original's narrower `trivialLifetime()`: copy, move and destructor
  /// trivial, deliberately not requiring the default constructor too (a type
  /// can have a nontrivial default constructor, e.g. one that allocates, and
  /// still be bitwise-copyable/movable/destructible). [`Self::is_all_trivial`]
  /// is the codegen-facing "no lifetime work at all" check this module adds
  /// on top; this one is the narrower "trivially copyable" check a few
  /// call sites want instead.
  #[must_use] pub fn trivial_lifetime_ops(&self) -> bool {
    [&self.copy_ctor, &self.move_ctor, &self.dtor]
      .into_iter()
      .all(|op| op.as_ref().is_none_or(LifetimeOperation::is_trivial))
  }

  /// The move constructor, unless it's deleted, in which case the copy
  /// constructor (which may itself be deleted).
  #[must_use] pub fn move_or_copy(&self) -> Option<&LifetimeOperation> {
    match &self.move_ctor {
      Some(op) if !op.is_deleted() => Some(op),
      _ => self.copy_ctor.as_ref(),
    }
  }
}

/// Per-member byte offset within an aggregate, for invariant (ii). `access`
/// carries the declaring member's own access control forward so that
/// `sema::decorate`'s `MemberAccess` handling can enforce it without
/// needing the struct's raw member-entity list (which `TypeTy` doesn't
/// keep around once layout is computed).
#[derive(Clone, Debug)]
pub struct MemberLayout {
  pub name: Symbol,
  pub ty: QualType,
  pub offset: u32,
  pub access: AccessControl,
}

/// Memory layout of an aggregate type: size, alignment, and per-member
/// offsets, per §3 invariant (ii).
#[derive(Clone, Debug, Default)]
pub struct Layout {
  pub size: u32,
  pub align: u32,
  pub members: Vec<MemberLayout>,
}

impl ObjectTypeKind {
  /// Size in bytes for scalar/known-fixed types. Aggregates consult their
  /// owning entity's [`Layout`] instead (see `SymbolTable::layout_of`).
  #[must_use] pub fn scalar_size(&self) -> Option<u32> {
    match self {
      ObjectTypeKind::Void => Some(0),
      ObjectTypeKind::Bool | ObjectTypeKind::Byte => Some(1),
      ObjectTypeKind::Int { width, .. } => Some(width.bytes()),
      ObjectTypeKind::Float { width } => Some(width.bytes()),
      ObjectTypeKind::NullPtr | ObjectTypeKind::RawPtr { .. } | ObjectTypeKind::UniquePtr { .. } => Some(8),
      ObjectTypeKind::Reference { .. } => Some(8),
      ObjectTypeKind::Array { count: ArrayCount::Dynamic, .. } => None,
      ObjectTypeKind::Array { elem, count: ArrayCount::Fixed(n) } =>
        elem.scalar_size().map(|s| s * u32::try_from(*n).unwrap_or(u32::MAX)),
      ObjectTypeKind::Function { .. } => None,
      ObjectTypeKind::Struct { .. } | ObjectTypeKind::Protocol { .. } => None,
    }
  }

  #[must_use] pub fn is_trivial_lifetime_scalar(&self) -> bool {
    matches!(self,
      ObjectTypeKind::Void | ObjectTypeKind::Bool | ObjectTypeKind::Byte |
      ObjectTypeKind::Int { .. } | ObjectTypeKind::Float { .. } | ObjectTypeKind::NullPtr |
      ObjectTypeKind::RawPtr { .. } | ObjectTypeKind::Reference { .. })
  }
}
