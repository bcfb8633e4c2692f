//! Semantic analyzer, IR generator and bytecode virtual machine for the
//! Scatha language (see `DESIGN.md` for the grounding ledger behind each
//! module below).

pub mod diag;
pub mod span;
pub mod symbol;
pub mod symtab;
pub mod conversion;
pub mod vtable;
pub mod serialize;
pub mod types;
pub mod sema;
pub mod build_mir;
pub mod build_bytecode;
pub mod codegen;
pub mod vm;

use diag::{Issue, IssueHandler};
use symtab::SymbolTable;
use types::ast::TranslationUnit;
use types::bytecode::Binary;

/// Runs the full pipeline (§2) on an already-declared translation unit:
/// semantic analysis (declaration processing + expression/statement
/// decoration), IR generation, then bytecode emission. Mirrors §5's
/// "a caller consults the handler after each phase" discipline by
/// stopping and returning the accumulated issues as soon as a phase
/// reports an error, rather than running later phases over a tree that
/// analysis gave up on.
pub fn compile(sym: &mut SymbolTable, tu: &mut TranslationUnit) -> Result<Binary, Vec<Issue>> {
  let mut iss = IssueHandler::new();
  let home_scope = sym.global_scope();
  sema::analyzer::analyze_translation_unit(sym, tu, home_scope, &mut iss);
  if iss.has_errors() { return Err(iss.take_issues()) }

  let module = build_mir::lower_translation_unit(sym, tu);
  Ok(build_bytecode::lower_module(&module))
}
