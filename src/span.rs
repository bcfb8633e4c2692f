//! Source locations. The lexer/parser (external) stamps every token and
//! syntax node with a [`FileSpan`]; everything downstream threads it through
//! for diagnostics.

use std::cmp::{max, min};
use std::rc::Rc;

/// A source file, identified by its resolved path. Cheaply clonable since
/// every node in a translation unit shares the same handle.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileId(pub Rc<str>);

impl FileId {
  #[must_use] pub fn new(path: impl Into<Rc<str>>) -> Self { Self(path.into()) }
}

impl std::fmt::Display for FileId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", self.0)
  }
}

/// A byte range `[start, end)` within a [`FileId`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FileSpan {
  pub file: FileId,
  pub start: u32,
  pub end: u32,
}

impl FileSpan {
  #[must_use] pub fn new(file: FileId, start: u32, end: u32) -> Self {
    assert!(start <= end, "ill-formed span");
    Self { file, start, end }
  }

  /// The smallest span containing both `self` and `other`. Requires both
  /// spans to come from the same file.
  #[must_use] pub fn join(&self, other: &FileSpan) -> FileSpan {
    assert_eq!(self.file, other.file, "cannot join spans from different files");
    FileSpan { file: self.file.clone(), start: min(self.start, other.start), end: max(self.end, other.end) }
  }
}

/// Wraps a value with the span of the syntax that produced it. Used
/// throughout the entity graph (`Spanned<TypeTc>`, `Spanned<ProcTc>`, ...)
/// exactly as in the decorated-tree model of §3.
#[derive(Clone, Debug)]
pub struct Spanned<T> {
  pub span: FileSpan,
  pub k: T,
}

impl<T> Spanned<T> {
  #[must_use] pub fn new(span: FileSpan, k: T) -> Self { Self { span, k } }

  pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Spanned<U> {
    Spanned { span: self.span, k: f(self.k) }
  }
}

impl<T> std::ops::Deref for Spanned<T> {
  type Target = T;
  fn deref(&self) -> &T { &self.k }
}

impl<T> std::ops::DerefMut for Spanned<T> {
  fn deref_mut(&mut self) -> &mut T { &mut self.k }
}
