//! Interned identifiers. Every name that flows through the entity graph is
//! a [`Symbol`], a small `Copy` index into a global [`Interner`], mirroring
//! the `Symbol`/`Interner` pair used throughout `mmcc`'s entity graph.

use std::cell::RefCell;
use std::collections::HashMap;

/// An interned string. Cheap to copy and compare.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(u32);

impl Symbol {
  #[must_use] pub fn into_usize(self) -> usize { self.0 as usize }
  #[must_use] pub fn as_str(self) -> &'static str { with_interner(|i| i.resolve(self)) }
}

impl std::fmt::Debug for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{:?}", self.as_str())
  }
}

impl std::fmt::Display for Symbol {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.as_str())
  }
}

/// A string interner. Strings are leaked into `'static` storage once and
/// never evicted, which is correct for a single compilation: identifiers
/// live for the lifetime of the process exactly like `mmcc`'s interner.
#[derive(Default)]
pub struct Interner {
  map: HashMap<&'static str, Symbol>,
  vec: Vec<&'static str>,
}

impl Interner {
  pub fn intern(&mut self, s: &str) -> Symbol {
    if let Some(&sym) = self.map.get(s) { return sym }
    let leaked: &'static str = Box::leak(s.to_owned().into_boxed_str());
    let sym = Symbol(u32::try_from(self.vec.len()).expect("too many symbols"));
    self.vec.push(leaked);
    self.map.insert(leaked, sym);
    sym
  }

  #[must_use] pub fn resolve(&self, sym: Symbol) -> &'static str { self.vec[sym.into_usize()] }
}

thread_local! {
  static INTERNER: RefCell<Interner> = RefCell::new(Interner::default());
}

fn with_interner<R>(f: impl FnOnce(&Interner) -> R) -> R {
  INTERNER.with(|i| f(&i.borrow()))
}

/// Intern a string in the thread-local interner, returning its [`Symbol`].
pub fn intern(s: &str) -> Symbol {
  INTERNER.with(|i| i.borrow_mut().intern(s))
}

/// Build a dense lookup table from [`Symbol`] (by `into_usize`) to `T`,
/// for small closed enumerations such as [`crate::types::entity::PrimOp`]
/// that want O(1) symbol-to-variant lookup. Entries outside the table
/// range are `None`.
pub fn init_dense_symbol_map<T: Copy>(entries: &[(Symbol, T)]) -> Box<[Option<T>]> {
  let max_idx = entries.iter().map(|(s, _)| s.into_usize()).max().unwrap_or(0);
  let mut table = vec![None; max_idx + 1];
  for &(s, t) in entries { table[s.into_usize()] = Some(t) }
  table.into_boxed_slice()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn interning_is_idempotent() {
    let a = intern("foo");
    let b = intern("foo");
    let c = intern("bar");
    assert_eq!(a, b);
    assert_ne!(a, c);
    assert_eq!(a.as_str(), "foo");
  }
}
