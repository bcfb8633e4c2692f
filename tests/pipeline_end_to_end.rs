//! Cross-module integration checks (§8): a translation unit goes through
//! every phase `scatha::compile` wires together and the VM runs the
//! resulting binary, rather than exercising any one phase in isolation
//! the way each module's own `#[cfg(test)]` block does.

use scatha::diag::IssueHandler;
use scatha::span::{FileId, FileSpan};
use scatha::symbol::intern;
use scatha::symtab::SymbolTable;
use scatha::types::ast::{Decl, Expr, ExprDecoration, ExprKind, Stmt, StmtKind, TranslationUnit};
use scatha::types::entity::{AccessControl, ProcKind};
use scatha::types::ty::{BindMode, IntWidth, Mutability, QualType};

fn sp() -> FileSpan { FileSpan::new(FileId::new("pipeline-test"), 0, 1) }

fn expr(kind: ExprKind) -> Expr { Expr { span: sp(), deco: ExprDecoration::default(), kind } }

/// `public fn main() -> int { return 40 + 2; }`, undecorated (decoration
/// happens as part of `compile`, not here).
fn adder_translation_unit(sym: &mut SymbolTable) -> (TranslationUnit, scatha::types::entity::EntityId) {
  let mut iss = IssueHandler::new();
  let int_ty = sym.int_type(IntWidth::W64, true);
  let f = sym.declare_function(intern("main"), sp(), AccessControl::Public);
  let ret_ty = QualType::new(int_ty, Mutability::Const, BindMode::Static);
  sym.set_function_type(f, ProcKind::Func, vec![], ret_ty, &mut iss);
  assert!(!iss.has_errors());

  let body = Stmt {
    span: sp(),
    cleanup: vec![],
    kind: StmtKind::Return(vec![expr(ExprKind::Binary {
      op: scatha::types::ast::BinOp::Add,
      lhs: Box::new(expr(ExprKind::IntLiteral(40))),
      rhs: Box::new(expr(ExprKind::IntLiteral(2))),
    })]),
  };
  let tu = TranslationUnit { decls: vec![Decl::Function { entity: f, kind: ProcKind::Func, params: vec![], body: Some(body) }] };
  (tu, f)
}

#[test]
fn a_translation_unit_compiles_and_the_vm_returns_its_computed_value() {
  let mut sym = SymbolTable::new();
  let (mut tu, _main) = adder_translation_unit(&mut sym);

  let binary = scatha::compile(&mut sym, &mut tu).expect("compilation should succeed");
  let result = scatha::vm::run(&binary, std::path::Path::new(".")).expect("vm run should succeed");
  assert_eq!(result, 42);
}

#[test]
fn a_binary_with_no_main_function_is_rejected_by_the_loader() {
  let mut sym = SymbolTable::new();
  let mut iss = IssueHandler::new();
  let int_ty = sym.int_type(IntWidth::W64, true);
  let f = sym.declare_function(intern("helper"), sp(), AccessControl::Public);
  let ret_ty = QualType::new(int_ty, Mutability::Const, BindMode::Static);
  sym.set_function_type(f, ProcKind::Func, vec![], ret_ty.clone(), &mut iss);
  assert!(!iss.has_errors());

  let body = Stmt { span: sp(), cleanup: vec![], kind: StmtKind::Return(vec![expr(ExprKind::IntLiteral(7))]) };
  let mut tu = TranslationUnit { decls: vec![Decl::Function { entity: f, kind: ProcKind::Func, params: vec![], body: Some(body) }] };

  let binary = scatha::compile(&mut sym, &mut tu).expect("compilation should succeed");
  let err = scatha::vm::run(&binary, std::path::Path::new(".")).unwrap_err();
  assert!(matches!(err, scatha::vm::error::VmError::NoEntryPoint));
}
