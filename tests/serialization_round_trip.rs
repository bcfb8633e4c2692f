//! Symbol-table serialization (§8): a translation unit with a struct and
//! a free function is analyzed, serialized to JSON, and deserialized into
//! a fresh symbol table, checking that layout, member order and function
//! signatures survive — in the style of `SymbolTableSerialize.t.cc`,
//! adapted to this backend's direct-symbol-table-API style (there's no
//! parser to hand source text to).

use scatha::diag::IssueHandler;
use scatha::sema::analyzer::analyze_translation_unit;
use scatha::serialize::{deserialize, serialize};
use scatha::span::{FileId, FileSpan};
use scatha::symbol::intern;
use scatha::symtab::SymbolTable;
use scatha::types::ast::{Decl, TranslationUnit};
use scatha::types::entity::{AccessControl, EntityKind, ProcKind};
use scatha::types::ty::{BindMode, IntWidth, Mutability, ObjectTypeKind, QualType};

fn sp() -> FileSpan { FileSpan::new(FileId::new("serialize-test"), 0, 1) }

#[test]
fn a_structs_layout_and_a_functions_signature_survive_a_json_round_trip() {
  let mut sym = SymbolTable::new();
  let mut iss = IssueHandler::new();

  let i32_ty = sym.int_type(IntWidth::W32, true);
  let f64_ty = sym.float_type(scatha::types::ty::FloatWidth::F64);

  let point = sym.declare_struct(intern("Point"), sp(), AccessControl::Public, &mut iss);
  let point_scope = sym.declare_anonymous_scope();
  sym.push_scope(point_scope);
  let x = sym.declare_variable(intern("x"), sp(), QualType::new(i32_ty.clone(), Mutability::Mut, BindMode::Static), AccessControl::Public, &mut iss);
  let y = sym.declare_variable(intern("y"), sp(), QualType::new(f64_ty, Mutability::Mut, BindMode::Static), AccessControl::Public, &mut iss);
  sym.pop_scope();
  assert!(!iss.has_errors());

  let point_ty: scatha::types::ty::ObjectType = std::rc::Rc::new(ObjectTypeKind::Struct { entity: point });
  let distance = sym.declare_function(intern("distance"), sp(), AccessControl::Public);
  let recv = sym.reference(QualType::new(point_ty, Mutability::Const, BindMode::Static));
  sym.set_function_type(
    distance,
    ProcKind::Func,
    vec![QualType::new(recv, Mutability::Const, BindMode::Static)],
    QualType::new(i32_ty, Mutability::Const, BindMode::Static),
    &mut iss,
  );
  assert!(!iss.has_errors());

  let home = sym.global_scope();
  let mut tu = TranslationUnit { decls: vec![
    Decl::Struct { entity: point, members: vec![x, y] },
    Decl::Function { entity: distance, kind: ProcKind::Func, params: vec![], body: None },
  ] };
  analyze_translation_unit(&mut sym, &mut tu, home, &mut iss);
  assert!(!iss.has_errors());

  let desc = serialize(&sym);
  let json = serde_json::to_string_pretty(&desc).unwrap();
  let desc2: scatha::serialize::GlobalDescriptor = serde_json::from_str(&json).unwrap();

  let mut sym2 = SymbolTable::new();
  deserialize(&mut sym2, &desc2).unwrap();

  let &point2 = sym2.unqualified_lookup(intern("Point")).first().expect("Point round-trips");
  let EntityKind::Type(spanned) = &sym2.entity(point2).kind else { panic!("Point should be a type entity") };
  let scatha::types::entity::TypeTc::Typed(ty2) = &spanned.k else { panic!("Point should have finished layout") };
  assert_eq!(ty2.layout.members.len(), 2);
  assert_eq!(ty2.layout.members[0].name, intern("x"));
  assert_eq!(ty2.layout.members[1].name, intern("y"));
  assert_eq!(ty2.layout.size, 16); // 4-byte i32 + 8-byte f64, 8-byte aligned

  let distance2 = sym2.unqualified_lookup(intern("distance"));
  assert_eq!(distance2.len(), 1);
}
