//! The conversion & lifetime engine (C2, §4.2). Computes the conversion
//! chain between two types, ranks competing overloads, and selects how an
//! object gets constructed at a call site or initializer. Grounded in
//! `original_source/scatha/lib/Sema/Analysis/Conversion.cc`
//! (`implExplIntConversion`, `pointerConv`, `determineObjConv`,
//! `commonType`), generalized from its `ConvExp<T>`/`dyncast` visitor style
//! to closed Rust enums matched with `match`.

use crate::symtab::SymbolTable;
use crate::types::entity::EntityKind;
use crate::types::ty::{ArrayCount, FloatWidth, IntWidth, Mutability, ObjectType, ObjectTypeKind, QualType, ValueCategory};

/// Why a conversion could not be constructed, attached to the corresponding
/// `Issue` variant in `diag.rs`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConvError {
  /// No conversion exists between these two object types for the
  /// requested [`ConversionKind`].
  NoObjectConversion { from: String, to: String },
  /// `const` cannot bind to a `mut` reference/pointer.
  MutabilityWiden,
  /// An rvalue cannot be bound as an lvalue without materialization.
  RValueToLValue,
  /// No applicable constructor (default/copy/aggregate) for this target.
  NoConstructor { target: String },
}

/// Implicit (used by ordinary assignment/initialization/argument passing),
/// Explicit (a `T as U` cast), or Reinterpret (a bit-for-bit `*T as *U`-style
/// cast restricted to pointer/reference types), per §4.2.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionKind { Implicit, Explicit, Reinterpret }

/// One elementary step of an object-type conversion chain. A chain of
/// these (never mixed with a different [`ConversionKind`]) takes a value of
/// one object type to another (§4.2, §8 "rank monotonicity").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectTypeConversion {
  SignedToUnsigned,
  UnsignedToSigned,
  IntTrunc,
  SignedWiden,
  UnsignedWiden,
  FloatTrunc,
  FloatWiden,
  IntToFloat,
  FloatToInt,
  NullptrToRawPtr,
  NullptrToUniquePtr,
  UniqueToRawPtr,
  ArrayFixedToDynamic,
  Reinterpret,
}

impl ObjectTypeConversion {
  /// Rank table fixed by §4.2+: `Trivial`=0 (the empty chain, never a
  /// member of this enum), value-preserving widenings=1, sign-changing
  /// conversions=2, narrowing/float-int crossings=3, reinterpret=4.
  #[must_use] pub fn rank(self) -> u8 {
    use ObjectTypeConversion::*;
    match self {
      SignedWiden | UnsignedWiden | FloatWiden | ArrayFixedToDynamic | NullptrToRawPtr | NullptrToUniquePtr => 1,
      SignedToUnsigned | UnsignedToSigned => 2,
      IntTrunc | FloatTrunc | IntToFloat | FloatToInt => 3,
      UniqueToRawPtr | Reinterpret => 4,
    }
  }
}

pub type ConvChain = Vec<ObjectTypeConversion>;

/// How an object gets constructed at an initializer or call site, ranked
/// for overload resolution (§4.2+: `TrivDefConstruct`=0 .. `DynArrayConstruct`=3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructKind {
  TrivDefConstruct = 0,
  CopyConstruct = 1,
  AggregateConstruct = 2,
  DynArrayConstruct = 3,
}

fn int_widths_order(w: IntWidth) -> u32 { w.bytes() * 8 }

/// Builds the conversion chain between two integer types, per
/// `implExplIntConversion`: sign change first (implicit conversions forbid
/// narrowing sign changes and widen-then-narrow roundabouts), then a single
/// widen or truncate step.
fn int_conversion(kind: ConversionKind, from: (IntWidth, bool), to: (IntWidth, bool)) -> Result<ConvChain, ConvError> {
  use ObjectTypeConversion::*;
  let (from_w, from_signed) = from;
  let (to_w, to_signed) = to;
  let mut chain = ConvChain::new();
  if from_signed != to_signed {
    if kind == ConversionKind::Implicit {
      if from_signed && !to_signed {
        return Err(ConvError::NoObjectConversion { from: format!("{from_w:?}"), to: format!("{to_w:?}") });
      }
      if !from_signed && to_signed && int_widths_order(from_w) >= int_widths_order(to_w) {
        return Err(ConvError::NoObjectConversion { from: format!("{from_w:?}"), to: format!("{to_w:?}") });
      }
    }
    chain.push(if from_signed { SignedToUnsigned } else { UnsignedToSigned });
  }
  match int_widths_order(from_w).cmp(&int_widths_order(to_w)) {
    std::cmp::Ordering::Equal => {}
    std::cmp::Ordering::Greater => {
      if kind == ConversionKind::Implicit {
        return Err(ConvError::NoObjectConversion { from: format!("{from_w:?}"), to: format!("{to_w:?}") });
      }
      chain.push(IntTrunc);
    }
    std::cmp::Ordering::Less => chain.push(if to_signed { SignedWiden } else { UnsignedWiden }),
  }
  Ok(chain)
}

fn float_conversion(kind: ConversionKind, from: FloatWidth, to: FloatWidth) -> Result<ConvChain, ConvError> {
  if from == to { return Ok(ConvChain::new()) }
  match (from, to) {
    (FloatWidth::F32, FloatWidth::F64) => Ok(vec![ObjectTypeConversion::FloatWiden]),
    (FloatWidth::F64, FloatWidth::F32) => {
      if kind == ConversionKind::Implicit {
        return Err(ConvError::NoObjectConversion { from: "f64".into(), to: "f32".into() });
      }
      Ok(vec![ObjectTypeConversion::FloatTrunc])
    }
    _ => unreachable!(),
  }
}

/// Computes the conversion chain from `from` to `to`, or `None` if they are
/// already the same type (a no-op, i.e. the `Trivial` rank never
/// materializes as a chain element).
pub fn determine_object_conversion(kind: ConversionKind, from: &ObjectType, to: &ObjectType) -> Result<Option<ConvChain>, ConvError> {
  use ObjectTypeKind as K;
  if from == to { return Ok(None) }
  match (from.as_ref(), to.as_ref()) {
    (K::Int { width: fw, signed: fs }, K::Int { width: tw, signed: ts }) => {
      int_conversion(kind, (*fw, *fs), (*tw, *ts)).map(Some)
    }
    (K::Float { width: fw }, K::Float { width: tw }) => float_conversion(kind, *fw, *tw).map(Some),
    (K::Int { .. }, K::Float { .. }) => {
      if kind == ConversionKind::Implicit {
        return Err(ConvError::NoObjectConversion { from: "int".into(), to: "float".into() });
      }
      Ok(Some(vec![ObjectTypeConversion::IntToFloat]))
    }
    (K::Float { .. }, K::Int { .. }) => {
      if kind == ConversionKind::Implicit {
        return Err(ConvError::NoObjectConversion { from: "float".into(), to: "int".into() });
      }
      Ok(Some(vec![ObjectTypeConversion::FloatToInt]))
    }
    (K::NullPtr, K::RawPtr { .. }) => Ok(Some(vec![ObjectTypeConversion::NullptrToRawPtr])),
    (K::NullPtr, K::UniquePtr { .. }) => Ok(Some(vec![ObjectTypeConversion::NullptrToUniquePtr])),
    (K::UniquePtr { base }, K::RawPtr { base: to_base }) => {
      if kind != ConversionKind::Explicit {
        return Err(ConvError::NoObjectConversion { from: "unique ptr".into(), to: "raw ptr".into() });
      }
      if base.mutability == Mutability::Const && to_base.mutability == Mutability::Mut {
        return Err(ConvError::MutabilityWiden);
      }
      Ok(Some(vec![ObjectTypeConversion::UniqueToRawPtr]))
    }
    (K::Array { elem: fe, count: ArrayCount::Fixed(_) }, K::Array { elem: te, count: ArrayCount::Dynamic }) if fe == te => {
      Ok(Some(vec![ObjectTypeConversion::ArrayFixedToDynamic]))
    }
    (K::Struct { entity: a }, K::Struct { entity: b }) if a == b => Ok(None),
    _ if kind == ConversionKind::Reinterpret => Ok(Some(vec![ObjectTypeConversion::Reinterpret])),
    _ => Err(ConvError::NoObjectConversion { from: format!("{from:?}"), to: format!("{to:?}") }),
  }
}

/// A value-category conversion (`LValueToRValue`/materialize) plus a
/// mutability check, mirroring the outer layer `determineObjConv` adds atop
/// the plain object-type chain (§4.2 "conversions compose: value category,
/// then mutability, then object type").
pub fn convert(kind: ConversionKind, from: &QualType, to: &QualType) -> Result<Option<ConvChain>, ConvError> {
  if to.mutability == Mutability::Mut && from.mutability == Mutability::Const {
    return Err(ConvError::MutabilityWiden);
  }
  determine_object_conversion(kind, &from.ty, &to.ty)
}

/// Converts an rvalue to an lvalue only via materialization (Design Notes
/// (c)); an lvalue never implicitly becomes an rvalue without a load, which
/// is represented upstream as `ExprKind::Conversion`, not here.
pub fn value_category_conversion(from: ValueCategory, to: ValueCategory) -> Result<(), ConvError> {
  match (from, to) {
    (ValueCategory::RValue, ValueCategory::LValue) => Err(ConvError::RValueToLValue),
    _ => Ok(()),
  }
}

/// The common type of two qualified types for a conditional expression or
/// binary operator (§4.2), grounded in `commonType`: attempts `a -> b` then
/// `b -> a` implicit conversion and takes whichever succeeds; for signed/
/// unsigned integers of equal rank, widens to the smallest type that fits
/// both (here simplified to the wider of the two, since both are already
/// fixed-width).
#[must_use] pub fn common_type(a: &QualType, b: &QualType) -> Option<ObjectType> {
  if a.ty == b.ty { return Some(a.ty.clone()) }
  if determine_object_conversion(ConversionKind::Implicit, &b.ty, &a.ty).is_ok() { return Some(a.ty.clone()) }
  if determine_object_conversion(ConversionKind::Implicit, &a.ty, &b.ty).is_ok() { return Some(b.ty.clone()) }
  None
}

/// Selects how to construct a value of type `target` from the given
/// argument types, per §4.2+'s construction-kind ranking. Returns `None` if
/// no construction kind applies (the caller raises
/// [`crate::diag::Issue::CannotConstructType`]).
#[must_use] pub fn select_construction(sym: &SymbolTable, target: &ObjectType, args: &[ObjectType]) -> Option<ConstructKind> {
  match target.as_ref() {
    ObjectTypeKind::Struct { entity } => {
      let e = sym.entity(*entity);
      if let EntityKind::Type(tc) = &e.kind {
        if let crate::types::entity::TypeTc::Typed(ty) = &tc.k {
          if args.is_empty() && ty.lifetime.default_ctor.as_ref().is_some_and(|op| !op.is_deleted()) {
            return Some(ConstructKind::TrivDefConstruct);
          }
          if args.len() == 1 && args[0] == *target && ty.lifetime.copy_ctor.as_ref().is_some_and(|op| !op.is_deleted()) {
            return Some(ConstructKind::CopyConstruct);
          }
          if !args.is_empty() {
            return Some(ConstructKind::AggregateConstruct);
          }
        }
      }
      None
    }
    ObjectTypeKind::Array { count: ArrayCount::Dynamic, .. } if !args.is_empty() => Some(ConstructKind::DynArrayConstruct),
    _ if args.is_empty() => Some(ConstructKind::TrivDefConstruct),
    _ if args.len() == 1 && args[0] == *target => Some(ConstructKind::CopyConstruct),
    _ => None,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn widening_is_allowed_implicitly_and_ranked_below_truncation() {
    let chain = int_conversion(ConversionKind::Implicit, (IntWidth::W32, true), (IntWidth::W64, true)).unwrap();
    assert_eq!(chain, vec![ObjectTypeConversion::SignedWiden]);
    assert_eq!(chain[0].rank(), 1);
  }

  #[test]
  fn narrowing_is_rejected_implicitly() {
    let err = int_conversion(ConversionKind::Implicit, (IntWidth::W64, true), (IntWidth::W32, true));
    assert!(err.is_err());
    let ok = int_conversion(ConversionKind::Explicit, (IntWidth::W64, true), (IntWidth::W32, true)).unwrap();
    assert_eq!(ok, vec![ObjectTypeConversion::IntTrunc]);
    assert_eq!(ok[0].rank(), 3);
  }

  #[test]
  fn signed_to_unsigned_widen_is_rejected_implicitly_but_allowed_explicitly() {
    assert!(int_conversion(ConversionKind::Implicit, (IntWidth::W32, true), (IntWidth::W32, false)).is_err());
    let chain = int_conversion(ConversionKind::Explicit, (IntWidth::W32, true), (IntWidth::W32, false)).unwrap();
    assert_eq!(chain, vec![ObjectTypeConversion::SignedToUnsigned]);
  }

  #[test]
  fn rank_is_monotonic_widen_below_truncate_below_reinterpret() {
    assert!(ObjectTypeConversion::SignedWiden.rank() < ObjectTypeConversion::IntTrunc.rank());
    assert!(ObjectTypeConversion::IntTrunc.rank() < ObjectTypeConversion::Reinterpret.rank());
  }
}
