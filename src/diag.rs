//! The compiler's issue hierarchy (§7). The semantic analyzer never
//! aborts: every failure is recorded as an [`Issue`] attached to the
//! offending node, and the driver consults the [`IssueHandler`] after each
//! phase, exactly as described in §5 ("a caller consults the handler after
//! each phase").

use crate::conversion::ConvError;
use crate::span::FileSpan;
use crate::symbol::Symbol;

/// A single compiler diagnostic. Each variant carries the span it should be
/// reported at plus whatever fields are needed to localize the message.
#[derive(Debug, Clone)]
pub enum Issue {
  /// A name was redeclared in a scope where it cannot overload the
  /// existing entity of that name.
  Redefinition { span: FileSpan, name: Symbol, prior: FileSpan },
  /// A catch-all for malformed statements, including [`ReservedIdentifier`].
  GenericBadStmt { span: FileSpan, reason: GenericBadStmtKind },
  /// A value-category conversion (`LValueToRValue`, `MaterializeTemporary`)
  /// could not be performed.
  BadValueCatConv { span: FileSpan, err: ConvError },
  /// A mutability conversion (`Mut` -> `Const`, never the reverse) failed.
  BadMutConv { span: FileSpan, err: ConvError },
  /// An object-type conversion chain could not be constructed.
  BadTypeConv { span: FileSpan, err: ConvError },
  /// Object construction (default/copy/explicit constructor/aggregate)
  /// found no applicable construction kind.
  CannotConstructType { span: FileSpan, target: String },
  /// An access-control violation (private member accessed from outside
  /// its owning scope, etc).
  BadAccessControl { span: FileSpan, name: Symbol },
  /// A native or foreign library failed to resolve or parse.
  BadImport { span: FileSpan, path: String, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenericBadStmtKind {
  /// `move` used as an identifier (Design Notes (a) resolves this as a
  /// keyword, so using it as a name is an error, not silently accepted).
  ReservedIdentifier,
  /// A struct-layout dependency cycle with no intervening indirection.
  RecursiveLayout,
  /// Any other malformed statement not covered above.
  Other,
}

impl Issue {
  #[must_use] pub fn span(&self) -> &FileSpan {
    match self {
      Issue::Redefinition { span, .. }
      | Issue::GenericBadStmt { span, .. }
      | Issue::BadValueCatConv { span, .. }
      | Issue::BadMutConv { span, .. }
      | Issue::BadTypeConv { span, .. }
      | Issue::CannotConstructType { span, .. }
      | Issue::BadAccessControl { span, .. }
      | Issue::BadImport { span, .. } => span,
    }
  }

  #[must_use] pub fn is_error(&self) -> bool { true }
}

/// Accumulates [`Issue`]s across a compilation phase without aborting.
/// Analysis continues with poisoned placeholders after every error, per
/// §4.3's failure semantics.
#[derive(Default, Debug)]
pub struct IssueHandler {
  issues: Vec<Issue>,
}

impl IssueHandler {
  #[must_use] pub fn new() -> Self { Self::default() }

  pub fn emit(&mut self, issue: Issue) {
    log::debug!("issue recorded: {issue:?}");
    self.issues.push(issue);
  }

  #[must_use] pub fn has_errors(&self) -> bool { self.issues.iter().any(Issue::is_error) }

  #[must_use] pub fn issues(&self) -> &[Issue] { &self.issues }

  /// Drain the accumulated issues, e.g. to hand them to a formatter after
  /// a phase boundary.
  pub fn take_issues(&mut self) -> Vec<Issue> { std::mem::take(&mut self.issues) }
}
