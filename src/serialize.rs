//! The library descriptor format (§3+, §6): a JSON tree rooted at a global
//! scope, read by [`crate::symtab::SymbolTable`]'s library importers and
//! written here for the round-trip testable property of §8. Grounded in
//! `original_source/scatha/lib/Sema/Serialize.cc`'s `Serializer`/
//! `Deserializer`, generalized from its `nlohmann::json` + exception-based
//! style to `serde`/`serde_json` with `Result`.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::diag::{Issue, IssueHandler};
use crate::span::{FileId, FileSpan};
use crate::symbol::intern;
use crate::symtab::SymbolTable;
use crate::types::entity::{
  AccessControl, EntityId, EntityKind, Function as FunctionEntity, ProcKind, ProcTc, ProcTy, TypeTc, TypeTy, Variable,
};
use crate::types::ty::{
  ArrayCount, BindMode, FloatWidth, IntWidth, Layout, LifetimeMetadata, LifetimeOpKind, LifetimeOperation, Mutability,
  ObjectType, ObjectTypeKind, QualType,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
  Json(String),
  Import(String),
  UnknownType(String),
  UnresolvedLifetimeFunction(String),
  QualifiedTypenamesUnsupported(String),
  MalformedTypename(String),
  UnresolvedVTableAncestor(String),
}

impl std::fmt::Display for DescriptorError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      DescriptorError::Json(e) => write!(f, "malformed descriptor json: {e}"),
      DescriptorError::Import(e) => write!(f, "library import failed: {e}"),
      DescriptorError::UnknownType(t) => write!(f, "unknown type name: {t}"),
      DescriptorError::UnresolvedLifetimeFunction(n) => write!(f, "unresolved lifetime function: {n}"),
      DescriptorError::QualifiedTypenamesUnsupported(t) => write!(f, "qualified typename not supported: {t}"),
      DescriptorError::MalformedTypename(t) => write!(f, "malformed typename: {t}"),
      DescriptorError::UnresolvedVTableAncestor(n) => write!(f, "unresolved vtable ancestor type: {n}"),
    }
  }
}

impl std::error::Error for DescriptorError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccessControlDesc { Public, Private, Internal }

impl From<AccessControl> for AccessControlDesc {
  fn from(a: AccessControl) -> Self {
    match a { AccessControl::Public => Self::Public, AccessControl::Private => Self::Private, AccessControl::Internal => Self::Internal }
  }
}

impl From<AccessControlDesc> for AccessControl {
  fn from(a: AccessControlDesc) -> Self {
    match a { AccessControlDesc::Public => Self::Public, AccessControlDesc::Private => Self::Private, AccessControlDesc::Internal => Self::Internal }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FunctionKindDesc { Native, Foreign, Generated }

impl From<FunctionKindDesc> for crate::types::entity::FunctionOrigin {
  fn from(k: FunctionKindDesc) -> Self {
    match k {
      FunctionKindDesc::Native => Self::Native,
      FunctionKindDesc::Foreign => Self::Foreign,
      FunctionKindDesc::Generated => Self::Generated,
    }
  }
}

impl From<crate::types::entity::FunctionOrigin> for FunctionKindDesc {
  fn from(o: crate::types::entity::FunctionOrigin) -> Self {
    match o {
      crate::types::entity::FunctionOrigin::Native => Self::Native,
      crate::types::entity::FunctionOrigin::Foreign => Self::Foreign,
      crate::types::entity::FunctionOrigin::Generated => Self::Generated,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LifetimeOpKindDesc { Trivial, NontrivialInline, Nontrivial, Deleted }

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifetimeOpDescriptor {
  pub lifetime_op_kind: LifetimeOpKindDesc,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  pub name: Option<String>,
  #[serde(rename = "type", skip_serializing_if = "Option::is_none", default)]
  pub ty: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifetimeDescriptor {
  #[serde(rename = "DefaultConstructor")]
  pub default_constructor: LifetimeOpDescriptor,
  #[serde(rename = "CopyConstructor")]
  pub copy_constructor: LifetimeOpDescriptor,
  #[serde(rename = "MoveConstructor")]
  pub move_constructor: LifetimeOpDescriptor,
  #[serde(rename = "Destructor")]
  pub destructor: LifetimeOpDescriptor,
}

/// One dispatch slot of a flattened [`AncestorLayoutDescriptor`]: `name`
/// and `type` identify the slot the way a lifetime op's `name`/`type`
/// identify its function (§6); `function` is the occupying function's
/// name, `None` for a declared-but-unresolved slot (never actually
/// produced by `serialize_entity`, but tolerated on read for forward
/// compatibility with a future method-declaration surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VTableSlotDescriptor {
  name: String,
  #[serde(rename = "type")] ty: String,
  #[serde(skip_serializing_if = "Option::is_none", default)]
  function: Option<String>,
}

/// One ancestor's view into a struct's vtable (`vtable::AncestorLayout`
/// flattened to names): `ancestor` is the base/protocol this view
/// dispatches through, `this_adjust` the byte offset to its subobject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AncestorLayoutDescriptor {
  ancestor: String,
  this_adjust: i32,
  slots: Vec<VTableSlotDescriptor>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_entity_type")]
pub enum EntityDescriptor {
  Function {
    #[serde(rename = "_name")] name: String,
    access_control: AccessControlDesc,
    return_type: String,
    argument_types: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    smf_kind: Option<String>,
    function_kind: FunctionKindDesc,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    binary_address: Option<u64>,
  },
  StructType {
    #[serde(rename = "_name")] name: String,
    access_control: AccessControlDesc,
    size: u32,
    align: u32,
    lifetime: LifetimeDescriptor,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    vtable: Vec<AncestorLayoutDescriptor>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<EntityDescriptor>,
  },
  Variable {
    #[serde(rename = "_name")] name: String,
    access_control: AccessControlDesc,
    #[serde(rename = "type")] ty: String,
    #[serde(rename = "mutable")] is_mut: bool,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    index: Option<u32>,
  },
  ForeignLibrary {
    #[serde(rename = "_name")] name: String,
    access_control: AccessControlDesc,
  },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalDescriptor {
  pub entities: Vec<EntityDescriptor>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub native_dependencies: Vec<String>,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub foreign_dependencies: Vec<String>,
}

// -- typename serialization (`serializeTypename`/`parseTypename`) --

/// Serializes the textual spelling of an object type, per §3's grammar:
/// `T`, `&T`, `&mut T`, `*T`, `*unique mut T`, `[T]`, `[T, N]`,
/// `(A, B) -> R`. Struct/protocol names are looked up by entity rather than
/// walked through parent scopes (this backend does not give structs their
/// own nested member scope, unlike a dual Type/Scope object would).
#[must_use] pub fn serialize_typename(sym: &SymbolTable, ty: &ObjectType) -> String {
  fn qual(sym: &SymbolTable, prefix: &str, q: &QualType) -> String {
    let mut_str = if q.mutability == Mutability::Mut { "mut " } else { "" };
    format!("{prefix}{mut_str}{}", serialize_typename(sym, &q.ty))
  }
  match ty.as_ref() {
    ObjectTypeKind::Void => "void".into(),
    ObjectTypeKind::Bool => "bool".into(),
    ObjectTypeKind::Byte => "byte".into(),
    ObjectTypeKind::Int { width, signed } => match (width, signed) {
      (IntWidth::W8, true) => "i8".into(), (IntWidth::W8, false) => "u8".into(),
      (IntWidth::W16, true) => "i16".into(), (IntWidth::W16, false) => "u16".into(),
      (IntWidth::W32, true) => "i32".into(), (IntWidth::W32, false) => "u32".into(),
      (IntWidth::W64, true) => "i64".into(), (IntWidth::W64, false) => "u64".into(),
    },
    ObjectTypeKind::Float { width: FloatWidth::F32 } => "f32".into(),
    ObjectTypeKind::Float { width: FloatWidth::F64 } => "f64".into(),
    ObjectTypeKind::NullPtr => "__nullptr_t".into(),
    ObjectTypeKind::Array { elem, count: ArrayCount::Dynamic } => format!("[{}]", serialize_typename(sym, elem)),
    ObjectTypeKind::Array { elem, count: ArrayCount::Fixed(n) } => format!("[{}, {n}]", serialize_typename(sym, elem)),
    ObjectTypeKind::RawPtr { base } => qual(sym, "*", base),
    ObjectTypeKind::UniquePtr { base } => qual(sym, "*unique ", base),
    ObjectTypeKind::Reference { base } => qual(sym, "&", base),
    ObjectTypeKind::Function { args, ret } => {
      let args = args.iter().map(|a| serialize_typename(sym, a)).collect::<Vec<_>>().join(", ");
      format!("({args}) -> {}", serialize_typename(sym, ret))
    }
    ObjectTypeKind::Struct { entity } | ObjectTypeKind::Protocol { entity } => {
      sym.entity(*entity).name.map(|n| n.to_string()).unwrap_or_else(|| "<anonymous>".into())
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token { Ref, Ptr, Mut, Unique, Dot, Comma, Arrow, Id(String), OpenParen, CloseParen, OpenBracket, CloseBracket, End }

struct Lexer<'a> { rest: &'a str }

impl<'a> Lexer<'a> {
  fn new(s: &'a str) -> Self { Self { rest: s } }

  fn next(&mut self) -> Token {
    self.rest = self.rest.trim_start();
    let Some(c) = self.rest.chars().next() else { return Token::End };
    if self.rest.starts_with("->") { self.rest = &self.rest[2..]; return Token::Arrow }
    let single = match c {
      '&' => Some(Token::Ref), '*' => Some(Token::Ptr), '.' => Some(Token::Dot), ',' => Some(Token::Comma),
      '(' => Some(Token::OpenParen), ')' => Some(Token::CloseParen),
      '[' => Some(Token::OpenBracket), ']' => Some(Token::CloseBracket),
      _ => None,
    };
    if let Some(tok) = single { self.rest = &self.rest[c.len_utf8()..]; return tok }
    let end = self.rest.find(|c: char| c.is_whitespace() || "&*.,()[]".contains(c)).unwrap_or(self.rest.len());
    let word = &self.rest[..end];
    self.rest = &self.rest[end..];
    match word { "mut" => Token::Mut, "unique" => Token::Unique, _ => Token::Id(word.to_string()) }
  }
}

struct TypenameParser<'a, 'b> { sym: &'a mut SymbolTable, lex: Lexer<'b>, lookahead: Option<Token> }

impl<'a, 'b> TypenameParser<'a, 'b> {
  fn new(sym: &'a mut SymbolTable, text: &'b str) -> Self { Self { sym, lex: Lexer::new(text), lookahead: None } }

  fn peek(&mut self) -> Token {
    if self.lookahead.is_none() { self.lookahead = Some(self.lex.next()) }
    self.lookahead.clone().unwrap()
  }

  fn bump(&mut self) -> Token {
    if let Some(t) = self.lookahead.take() { return t }
    self.lex.next()
  }

  fn parse_qual(&mut self) -> Result<QualType, DescriptorError> {
    let mutability = if self.peek() == Token::Mut { self.bump(); Mutability::Mut } else { Mutability::Const };
    let ty = self.parse()?;
    Ok(QualType::new(ty, mutability, BindMode::Static))
  }

  fn parse(&mut self) -> Result<ObjectType, DescriptorError> {
    match self.peek() {
      Token::Ref => { self.bump(); let base = self.parse_qual()?; Ok(self.sym.reference(base)) }
      Token::Ptr => {
        self.bump();
        let unique = if self.peek() == Token::Unique { self.bump(); true } else { false };
        let base = self.parse_qual()?;
        Ok(if unique { self.sym.unique_pointer(base) } else { self.sym.pointer(base) })
      }
      Token::OpenBracket => {
        self.bump();
        let elem = self.parse()?;
        match self.bump() {
          Token::CloseBracket => Ok(self.sym.array_type(elem, ArrayCount::Dynamic)),
          Token::Comma => {
            let Token::Id(n) = self.bump() else { return Err(DescriptorError::MalformedTypename("expected array count".into())) };
            let count: u64 = n.parse().map_err(|_| DescriptorError::MalformedTypename(n.clone()))?;
            if self.bump() != Token::CloseBracket { return Err(DescriptorError::MalformedTypename("expected ]".into())) }
            Ok(self.sym.array_type(elem, ArrayCount::Fixed(count)))
          }
          _ => Err(DescriptorError::MalformedTypename("malformed array type".into())),
        }
      }
      Token::OpenParen => {
        self.bump();
        let mut args = Vec::new();
        loop {
          if self.peek() == Token::CloseParen { self.bump(); break }
          if !args.is_empty() {
            if self.bump() != Token::Comma { return Err(DescriptorError::MalformedTypename("expected ,".into())) }
          }
          args.push(self.parse()?);
        }
        if self.bump() != Token::Arrow { return Err(DescriptorError::MalformedTypename("expected ->".into())) }
        let ret = self.parse()?;
        Ok(self.sym.function_type(args, ret))
      }
      Token::Id(_) => self.parse_id(),
      _ => Err(DescriptorError::MalformedTypename("unexpected token".into())),
    }
  }

  fn parse_id(&mut self) -> Result<ObjectType, DescriptorError> {
    let Token::Id(name) = self.bump() else { unreachable!() };
    if self.peek() == Token::Dot {
      return Err(DescriptorError::QualifiedTypenamesUnsupported(name));
    }
    if let Some(prim) = crate::types::entity::PrimType::from_str(&name) {
      return Ok(match prim {
        crate::types::entity::PrimType::Void => self.sym.void_type(),
        crate::types::entity::PrimType::Bool => self.sym.bool_type(),
        crate::types::entity::PrimType::Byte => self.sym.byte_type(),
        crate::types::entity::PrimType::I8 => self.sym.int_type(IntWidth::W8, true),
        crate::types::entity::PrimType::I16 => self.sym.int_type(IntWidth::W16, true),
        crate::types::entity::PrimType::I32 => self.sym.int_type(IntWidth::W32, true),
        crate::types::entity::PrimType::I64 => self.sym.int_type(IntWidth::W64, true),
        crate::types::entity::PrimType::U8 => self.sym.int_type(IntWidth::W8, false),
        crate::types::entity::PrimType::U16 => self.sym.int_type(IntWidth::W16, false),
        crate::types::entity::PrimType::U32 => self.sym.int_type(IntWidth::W32, false),
        crate::types::entity::PrimType::U64 => self.sym.int_type(IntWidth::W64, false),
        crate::types::entity::PrimType::F32 => self.sym.float_type(FloatWidth::F32),
        crate::types::entity::PrimType::F64 => self.sym.float_type(FloatWidth::F64),
        crate::types::entity::PrimType::NullPtrT => self.sym.nullptr_type(),
      });
    }
    let sym_name = intern(&name);
    let found = self.sym.unqualified_lookup(sym_name);
    let Some(&entity_id) = found.first() else { return Err(DescriptorError::UnknownType(name)) };
    match &self.sym.entity(entity_id).kind {
      EntityKind::Type(_) => Ok(std::rc::Rc::new(ObjectTypeKind::Struct { entity: entity_id })),
      _ => Err(DescriptorError::UnknownType(name)),
    }
  }
}

pub fn parse_typename(sym: &mut SymbolTable, text: &str) -> Result<ObjectType, DescriptorError> {
  TypenameParser::new(sym, text).parse()
}

// -- serialize() --

fn lifetime_op_descriptor(sym: &SymbolTable, op: Option<&LifetimeOperation>) -> LifetimeOpDescriptor {
  let (kind, function) = match op {
    None | Some(LifetimeOperation::Trivial) => (LifetimeOpKindDesc::Trivial, None),
    Some(LifetimeOperation::NontrivialInline) => (LifetimeOpKindDesc::NontrivialInline, None),
    Some(LifetimeOperation::Nontrivial { function }) => (LifetimeOpKindDesc::Nontrivial, Some(*function)),
    Some(LifetimeOperation::Deleted) => (LifetimeOpKindDesc::Deleted, None),
  };
  let (name, ty) = match function {
    Some(f) => {
      let e = sym.entity(f);
      let name = e.name.map(|n| n.to_string());
      let ty = match &e.kind {
        EntityKind::Function(func) => func.tc.ty().map(|t| {
          let args: Vec<ObjectType> = t.args.iter().map(|a| a.ty.clone()).collect();
          serialize_typename(sym, &std::rc::Rc::new(ObjectTypeKind::Function { args: args.into(), ret: t.ret.ty.clone() }))
        }),
        _ => None,
      };
      (name, ty)
    }
    None => (None, None),
  };
  LifetimeOpDescriptor { lifetime_op_kind: kind, name, ty }
}

fn lifetime_descriptor(sym: &SymbolTable, md: &LifetimeMetadata) -> LifetimeDescriptor {
  LifetimeDescriptor {
    default_constructor: lifetime_op_descriptor(sym, md.get(LifetimeOpKind::DefaultConstructor)),
    copy_constructor: lifetime_op_descriptor(sym, md.get(LifetimeOpKind::CopyConstructor)),
    move_constructor: lifetime_op_descriptor(sym, md.get(LifetimeOpKind::MoveConstructor)),
    destructor: lifetime_op_descriptor(sym, md.get(LifetimeOpKind::Destructor)),
  }
}

/// Flattens `vt` (one `HashMap` entry per ancestor the owning struct
/// dispatches through) into the descriptor form, by name rather than
/// `EntityId` the way every other cross-reference in this format works.
fn vtable_descriptor(sym: &SymbolTable, vt: &crate::vtable::VTable) -> Vec<AncestorLayoutDescriptor> {
  vt.ancestors().filter_map(|ancestor| {
    let ancestor_name = sym.entity(ancestor).name?.to_string();
    let slots = vt.layout(ancestor).iter().map(|slot| VTableSlotDescriptor {
      name: slot.name.to_string(),
      ty: serialize_typename(sym, &slot.ty),
      function: slot.function.and_then(|f| sym.entity(f).name).map(|n| n.to_string()),
    }).collect();
    Some(AncestorLayoutDescriptor { ancestor: ancestor_name, this_adjust: vt.this_adjust(ancestor), slots })
  }).collect()
}

fn serialize_entity(sym: &SymbolTable, id: crate::types::entity::EntityId) -> Option<EntityDescriptor> {
  let e = sym.entity(id);
  let name = e.name?.to_string();
  match &e.kind {
    EntityKind::Function(FunctionEntity { tc: ProcTc::Typed(ProcTy { args, ret, .. }), access, origin, .. }) => {
      Some(EntityDescriptor::Function {
        name,
        access_control: (*access).into(),
        return_type: serialize_typename(sym, &ret.ty),
        argument_types: args.iter().map(|a| serialize_typename(sym, &a.ty)).collect(),
        smf_kind: None,
        function_kind: (*origin).into(),
        binary_address: None,
      })
    }
    EntityKind::Type(spanned) => {
      let TypeTc::Typed(TypeTy { layout, lifetime, vtable, .. }) = &spanned.k else { return None };
      Some(EntityDescriptor::StructType {
        name,
        access_control: e.access.into(),
        size: layout.size,
        align: layout.align,
        lifetime: lifetime_descriptor(sym, lifetime),
        vtable: vtable.as_ref().map(|vt| vtable_descriptor(sym, vt)).unwrap_or_default(),
        children: Vec::new(),
      })
    }
    EntityKind::Variable(Variable { ty, access }) => {
      Some(EntityDescriptor::Variable {
        name,
        access_control: (*access).into(),
        ty: serialize_typename(sym, &ty.ty),
        is_mut: ty.is_mut(),
        index: None,
      })
    }
    EntityKind::Scope(scope) if scope.kind == Some(crate::types::entity::ScopeKind::ForeignLibrary) => {
      Some(EntityDescriptor::ForeignLibrary { name, access_control: e.access.into() })
    }
    _ => None,
  }
}

/// Serializes the global scope of `sym` into a [`GlobalDescriptor`],
/// mirroring `Serializer::serialize(GlobalScope const&)`. Library
/// dependency gathering is left to the caller (this crate's entity graph
/// doesn't track per-type owning-library back-references, unlike the
/// original's `parentLibrary` walk); `native_dependencies`/
/// `foreign_dependencies` are populated by the importer instead.
#[must_use] pub fn serialize(sym: &SymbolTable) -> GlobalDescriptor {
  let global = sym.entity(sym.global_scope());
  let EntityKind::Scope(scope) = &global.kind else { return GlobalDescriptor::default() };
  let entities = scope.children.iter().filter_map(|&id| serialize_entity(sym, id)).collect();
  GlobalDescriptor { entities, native_dependencies: Vec::new(), foreign_dependencies: Vec::new() }
}

pub fn serialize_to_string(sym: &SymbolTable) -> Result<String, DescriptorError> {
  serde_json::to_string_pretty(&serialize(sym)).map_err(|e| DescriptorError::Json(e.to_string()))
}

// -- deserialize() --

fn file() -> FileSpan { FileSpan::new(FileId::new("<library descriptor>"), 0, 0) }

/// Resolves the function named by a `Nontrivial` lifetime-op descriptor
/// within `search_scope` (§6: `name` + `type` identify the member).
/// `search_scope` is `None` during the preparse pass, before member
/// functions exist yet — `Nontrivial` entries are deferred to the second
/// pass and get a `Trivial` placeholder in the meantime.
fn declare_lifetime(sym: &mut SymbolTable, search_scope: Option<EntityId>, desc: &LifetimeDescriptor) -> Result<LifetimeMetadata, DescriptorError> {
  let mut md = LifetimeMetadata::default();
  for (kind, op_desc) in [
    (LifetimeOpKind::DefaultConstructor, &desc.default_constructor),
    (LifetimeOpKind::CopyConstructor, &desc.copy_constructor),
    (LifetimeOpKind::MoveConstructor, &desc.move_constructor),
    (LifetimeOpKind::Destructor, &desc.destructor),
  ] {
    let op = match op_desc.lifetime_op_kind {
      LifetimeOpKindDesc::Trivial => LifetimeOperation::Trivial,
      LifetimeOpKindDesc::NontrivialInline => LifetimeOperation::NontrivialInline,
      LifetimeOpKindDesc::Deleted => LifetimeOperation::Deleted,
      LifetimeOpKindDesc::Nontrivial => {
        let Some(scope) = search_scope else { continue };
        let name = op_desc.name.clone().ok_or_else(|| DescriptorError::UnresolvedLifetimeFunction("<missing name>".into()))?;
        let sname = intern(&name);
        let candidates = sym.entity(scope).scope().map(|s| s.lookup_local(sname).to_vec()).unwrap_or_default();
        let function = candidates.into_iter().find(|&c| matches!(&sym.entity(c).kind, EntityKind::Function(_)))
          .ok_or_else(|| DescriptorError::UnresolvedLifetimeFunction(name.clone()))?;
        LifetimeOperation::Nontrivial { function }
      }
    };
    md.set(kind, op);
  }
  Ok(md)
}

/// Deserializes a [`GlobalDescriptor`] into `sym`'s current scope, mirroring
/// `Deserializer::run`: structs are pre-declared (so member/field types
/// that reference each other resolve), then every entity is parsed in
/// full, then lifetime metadata is resolved a second time now that member
/// functions exist. Structs get a side-table anonymous scope to hold their
/// members (this backend's struct entities don't carry their own `Scope`,
/// see `serialize_typename`'s doc comment), keyed by the struct's
/// `EntityId` across both passes.
pub fn deserialize(sym: &mut SymbolTable, desc: &GlobalDescriptor) -> Result<(), DescriptorError> {
  let mut iss = IssueHandler::new();
  for lib in &desc.foreign_dependencies { sym.import_foreign_library(intern(lib), file(), &mut iss); }
  for lib in &desc.native_dependencies { sym.import_native_library(intern(lib), file(), &mut iss); }
  if iss.has_errors() {
    let reasons: Vec<String> = iss.issues().iter().filter_map(|i| match i {
      Issue::BadImport { reason, .. } => Some(reason.clone()),
      _ => None,
    }).collect();
    return Err(DescriptorError::Import(reasons.join("; ")));
  }
  let mut scopes = HashMap::new();
  preparse_types(sym, &desc.entities, &mut scopes)?;
  parse_entities(sym, &desc.entities, &scopes)?;
  resolve_vtables(sym, &desc.entities)
}

/// Third pass: rebuilds every struct's vtable now that every struct and
/// function in the descriptor exists, so ancestor/function names resolve
/// regardless of declaration order (unlike `declare_lifetime`'s
/// `search_scope`, slot functions and ancestor types aren't confined to
/// one struct's member scope, so lookup goes through the global symbol
/// table rather than a side-table scope).
fn resolve_vtables(sym: &mut SymbolTable, entities: &[EntityDescriptor]) -> Result<(), DescriptorError> {
  for e in entities {
    let EntityDescriptor::StructType { name, vtable, children, .. } = e else { continue };
    resolve_vtables(sym, children)?;
    if vtable.is_empty() { continue }
    let Some(&id) = sym.unqualified_lookup(intern(name)).first() else { continue };
    let mut layouts = HashMap::new();
    for anc in vtable {
      let ancestor_id = sym.unqualified_lookup(intern(&anc.ancestor)).first().copied()
        .ok_or_else(|| DescriptorError::UnresolvedVTableAncestor(anc.ancestor.clone()))?;
      let slots = anc.slots.iter().map(|s| {
        let ty = parse_typename(sym, &s.ty)?;
        let function = s.function.as_ref().and_then(|n| sym.unqualified_lookup(intern(n)).first().copied());
        Ok(crate::vtable::VTableSlot { name: intern(&s.name), ty, function })
      }).collect::<Result<Vec<_>, DescriptorError>>()?;
      layouts.insert(ancestor_id, crate::vtable::AncestorLayout { slots, this_adjust: anc.this_adjust });
    }
    if let EntityKind::Type(spanned) = &mut sym.entity_mut(id).kind {
      if let TypeTc::Typed(ty) = &mut spanned.k { ty.vtable = Some(crate::vtable::VTable::from_layouts(id, layouts)); }
    }
  }
  Ok(())
}

fn preparse_types(sym: &mut SymbolTable, entities: &[EntityDescriptor], scopes: &mut HashMap<EntityId, EntityId>) -> Result<(), DescriptorError> {
  for e in entities {
    if let EntityDescriptor::StructType { name, access_control, size, align, children, .. } = e {
      let mut iss = IssueHandler::new();
      let id = sym.declare_struct(intern(name), file(), (*access_control).into(), &mut iss);
      if let EntityKind::Type(spanned) = &mut sym.entity_mut(id).kind {
        spanned.k = TypeTc::Typed(TypeTy {
          intrinsic: None,
          layout: Layout { size: *size, align: *align, members: Vec::new() },
          lifetime: LifetimeMetadata::default(),
          bases: Vec::new(),
          vtable: None,
        });
      }
      let member_scope = sym.declare_anonymous_scope();
      scopes.insert(id, member_scope);
      sym.push_scope(member_scope);
      preparse_types(sym, children, scopes)?;
      sym.pop_scope();
    }
  }
  Ok(())
}

fn parse_entities(sym: &mut SymbolTable, entities: &[EntityDescriptor], scopes: &HashMap<EntityId, EntityId>) -> Result<(), DescriptorError> {
  for e in entities {
    match e {
      EntityDescriptor::StructType { name, lifetime, children, .. } => {
        let sname = intern(name);
        let Some(&id) = sym.unqualified_lookup(sname).first() else { continue };
        let Some(&member_scope) = scopes.get(&id) else { continue };
        sym.push_scope(member_scope);
        parse_entities(sym, children, scopes)?;
        sym.pop_scope();
        let lifetime_md = declare_lifetime(sym, Some(member_scope), lifetime)?;
        if let EntityKind::Type(spanned) = &mut sym.entity_mut(id).kind {
          if let TypeTc::Typed(ty) = &mut spanned.k { ty.lifetime = lifetime_md; }
        }
      }
      EntityDescriptor::Function { name, access_control, return_type, argument_types, function_kind, .. } => {
        let args: Vec<ObjectType> = argument_types.iter().map(|t| parse_typename(sym, t)).collect::<Result<_, _>>()?;
        let ret = parse_typename(sym, return_type)?;
        let func = sym.declare_function_with_origin(intern(name), file(), (*access_control).into(), (*function_kind).into());
        let mut iss = IssueHandler::new();
        let qargs = args.into_iter().map(|a| QualType::new(a, Mutability::Const, BindMode::Static)).collect();
        let qret = QualType::new(ret, Mutability::Const, BindMode::Static);
        sym.set_function_type(func, ProcKind::Func, qargs, qret, &mut iss);
      }
      EntityDescriptor::Variable { name, access_control, ty, is_mut, .. } => {
        let object_ty = parse_typename(sym, ty)?;
        let mutability = if *is_mut { Mutability::Mut } else { Mutability::Const };
        let qty = QualType::new(object_ty, mutability, BindMode::Static);
        let mut iss = IssueHandler::new();
        sym.declare_variable(intern(name), file(), qty, (*access_control).into(), &mut iss);
      }
      EntityDescriptor::ForeignLibrary { name, .. } => {
        let mut iss = IssueHandler::new();
        sym.import_foreign_library(intern(name), file(), &mut iss);
      }
    }
  }
  Ok(())
}

pub fn deserialize_from_str(sym: &mut SymbolTable, text: &str) -> Result<(), DescriptorError> {
  let desc: GlobalDescriptor = serde_json::from_str(text).map_err(|e| DescriptorError::Json(e.to_string()))?;
  deserialize(sym, &desc)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn scalar_typename_round_trips() {
    let mut sym = SymbolTable::new();
    let ty = sym.int_type(IntWidth::W32, true);
    let name = serialize_typename(&sym, &ty);
    assert_eq!(name, "i32");
    let parsed = parse_typename(&mut sym, &name).unwrap();
    assert_eq!(parsed, ty);
  }

  #[test]
  fn pointer_and_array_typenames_round_trip() {
    let mut sym = SymbolTable::new();
    let elem = sym.int_type(IntWidth::W8, false);
    let array = sym.array_type(elem.clone(), ArrayCount::Fixed(4));
    let name = serialize_typename(&sym, &array);
    assert_eq!(name, "[u8, 4]");
    let parsed = parse_typename(&mut sym, &name).unwrap();
    assert_eq!(parsed, array);

    let ptr = sym.pointer(QualType::new(elem, Mutability::Mut, BindMode::Static));
    let ptr_name = serialize_typename(&sym, &ptr);
    assert_eq!(ptr_name, "*mut u8");
    let parsed_ptr = parse_typename(&mut sym, &ptr_name).unwrap();
    assert_eq!(parsed_ptr, ptr);
  }

  #[test]
  fn descriptor_round_trips_through_json() {
    let mut sym = SymbolTable::new();
    let int_ty = sym.int_type(IntWidth::W32, true);
    let mut iss = crate::diag::IssueHandler::new();
    sym.declare_variable(intern("g"), file(), QualType::new(int_ty, Mutability::Const, BindMode::Static), AccessControl::Public, &mut iss);

    let desc = serialize(&sym);
    let json = serde_json::to_string(&desc).unwrap();
    let desc2: GlobalDescriptor = serde_json::from_str(&json).unwrap();
    assert_eq!(desc2.entities.len(), desc.entities.len());

    let mut sym2 = SymbolTable::new();
    deserialize(&mut sym2, &desc2).unwrap();
    assert!(!sym2.unqualified_lookup(intern("g")).is_empty());
  }

  #[test]
  fn a_structs_vtable_round_trips_through_json() {
    let mut sym = SymbolTable::new();
    let mut iss = IssueHandler::new();
    let base = sym.declare_struct(intern("Base"), file(), AccessControl::Public, &mut iss);
    let base_ty: ObjectType = std::rc::Rc::new(ObjectTypeKind::Struct { entity: base });
    let recv = sym.reference(QualType::new(base_ty, Mutability::Const, BindMode::Static));
    let void = QualType::new(sym.void_type(), Mutability::Const, BindMode::Static);
    let speak = sym.declare_function(intern("speak"), file(), AccessControl::Public);
    sym.set_function_type(speak, ProcKind::Func, vec![QualType::new(recv.clone(), Mutability::Const, BindMode::Static)], void, &mut iss);
    assert!(!iss.has_errors());

    let void_ty = sym.void_type();
    let method_ty = sym.function_type(vec![recv], void_ty);
    let vt = crate::vtable::VTable::build(
      base,
      vec![crate::vtable::VTableSlot { name: intern("speak"), ty: method_ty, function: Some(speak) }],
      vec![],
    );
    if let EntityKind::Type(spanned) = &mut sym.entity_mut(base).kind {
      spanned.k = TypeTc::Typed(TypeTy {
        intrinsic: None, layout: Layout::default(), lifetime: LifetimeMetadata::default(), bases: Vec::new(), vtable: Some(vt),
      });
    }

    let desc = serialize(&sym);
    let json = serde_json::to_string(&desc).unwrap();
    let desc2: GlobalDescriptor = serde_json::from_str(&json).unwrap();

    let mut sym2 = SymbolTable::new();
    deserialize(&mut sym2, &desc2).unwrap();
    let &base2 = sym2.unqualified_lookup(intern("Base")).first().expect("Base round-trips");
    let EntityKind::Type(spanned) = &sym2.entity(base2).kind else { unreachable!() };
    let TypeTc::Typed(ty2) = &spanned.k else { unreachable!() };
    let vt2 = ty2.vtable.as_ref().expect("vtable round-trips");
    let slots = vt2.layout(base2);
    assert_eq!(slots.len(), 1);
    assert_eq!(slots[0].name, intern("speak"));
    let speak2 = slots[0].function.expect("slot function resolves");
    assert_eq!(sym2.entity(speak2).name, Some(intern("speak")));
  }
}
