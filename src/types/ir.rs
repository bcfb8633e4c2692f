//! The typed SSA IR module (§3 "IR module", §4.4). Lowering from the
//! decorated tree lives in `build_mir.rs`; this module only defines the
//! data the generator produces. Naming follows `mmcc`'s `types::mir`
//! (`Cfg`/`BasicBlock`/`BlockId`/`VarId`) generalized from x86-bound MIR to
//! a target-agnostic SSA form, since this backend's target is the
//! bytecode VM of §4.5 rather than a native ISA.

use crate::mk_idx;
use crate::symbol::Symbol;
use crate::types::{IdxVec, ty::IntWidth};

mk_idx! { pub struct ValueId; }
mk_idx! { pub struct BlockId; }
mk_idx! { pub struct FuncId; }
mk_idx! { pub struct GlobalId; }
mk_idx! { pub struct StructId; }
mk_idx! { pub struct ConstId; }

/// An IR-level type: the register/memory shape a semantic [`crate::types::ty::QualType`]
/// lowers to. Distinct from `QualType` because several source types share
/// a representation (e.g. `&T` and `own T` are both a pointer word).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IrType {
  Int(IntWidth),
  Float32,
  Float64,
  Ptr,
  /// A fat pointer (pointer + 64-bit length), the representation of a
  /// reference to a dynamic array (glossary: "Fat pointer").
  FatPtr,
  Struct(StructId),
  /// A fixed-size aggregate of repeated elements (a by-value `[T; N]`
  /// struct member or local). Never used as a calling-convention value in
  /// its own right; always reached through an address, same as `Struct`.
  Array { elem: Box<IrType>, count: u32 },
  Void,
}

impl IrType {
  #[must_use] pub fn size(&self) -> u32 {
    match self {
      IrType::Int(w) => w.bytes(),
      IrType::Float32 => 4,
      IrType::Float64 => 8,
      IrType::Ptr => 8,
      IrType::FatPtr => 16,
      IrType::Struct(_) => 0, // resolved via `Module::struct_defs`
      IrType::Array { elem, count } => elem.size() * count,
      IrType::Void => 0,
    }
  }

  /// Whether this type fits in a single 8-byte register.
  #[must_use] pub fn is_register_sized(&self) -> bool {
    matches!(self, IrType::Int(_) | IrType::Float32 | IrType::Float64 | IrType::Ptr)
  }
}

#[derive(Clone, Debug)]
pub struct StructDef {
  pub name: Symbol,
  pub fields: Vec<(IrType, u32)>,
  pub size: u32,
  pub align: u32,
}

#[derive(Clone, Debug)]
pub enum TypedConst {
  Int(IntWidth, i128),
  Float32(f32),
  Float64(f64),
  /// The address of a global, used for `unique`-allocated static data and
  /// string literals.
  GlobalAddr(GlobalId),
  Null,
  Array(Vec<TypedConst>),
}

#[derive(Clone, Debug)]
pub struct Global {
  pub name: Symbol,
  pub ty: IrType,
  pub init: Option<TypedConst>,
  pub mutable: bool,
}

/// Where a use occurs, for the intrusive user list (§3 "each use records
/// its operand slot").
#[derive(Clone, Copy, Debug)]
pub struct Use {
  pub block: BlockId,
  pub inst: usize,
  pub slot: u32,
}

/// An operand: either a previously defined SSA value or an immediate
/// constant folded directly into the instruction.
#[derive(Clone, Debug)]
pub enum Operand {
  Value(ValueId),
  Const(TypedConst),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum IntBinOp { Add, Sub, Mul, SDiv, UDiv, SRem, URem, And, Or, Xor, Shl, AShr, LShr }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FloatBinOp { Add, Sub, Mul, Div }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CmpOp { Eq, Ne, SLt, SLe, SGt, SGe, ULt, ULe, UGt, UGe, FLt, FLe, FGt, FGe }

/// A single SSA instruction. Each variant that produces a value is paired
/// with a [`ValueId`] recorded in the owning [`BasicBlock`]; instructions
/// with no result (stores, calls-for-effect) are standalone.
#[derive(Clone, Debug)]
pub enum InstKind {
  IntBin { op: IntBinOp, lhs: Operand, rhs: Operand, width: IntWidth },
  FloatBin { op: FloatBinOp, lhs: Operand, rhs: Operand, is64: bool },
  Cmp { op: CmpOp, lhs: Operand, rhs: Operand },
  Not { operand: Operand },
  Neg { operand: Operand },
  Convert { operand: Operand, from: IrType, to: IrType },
  /// Load-effective-address: `base + offset`, used for member access,
  /// array indexing and slicing (§4.4).
  Gep { base: Operand, offset: Operand, stride: u32 },
  Load { addr: Operand, ty: IrType },
  Store { addr: Operand, value: Operand },
  /// Direct or indirect call; `callee` is a [`FuncId`] or a computed
  /// function pointer operand.
  Call { callee: CallTarget, args: Vec<Operand> },
  /// Dispatch through a vtable slot, with the recorded this-pointer
  /// adjustment (glossary: "Thunk").
  CallVirtual { vtable_ptr: Operand, slot: u32, this_adjust: i32, args: Vec<Operand> },
  CallForeign { lib: Symbol, name: Symbol, args: Vec<Operand> },
  CallBuiltin { index: u32, args: Vec<Operand> },
  Alloc { size: Operand, align: u32 },
  Dealloc { ptr: Operand, size: Operand, align: u32 },
  Phi { incoming: Vec<(BlockId, Operand)> },
}

#[derive(Clone, Debug)]
pub enum CallTarget { Direct(FuncId), Indirect(Operand) }

#[derive(Clone, Debug)]
pub struct Instruction {
  pub kind: InstKind,
  pub result: Option<(ValueId, IrType)>,
}

#[derive(Clone, Debug)]
pub enum Terminator {
  Return(Vec<Operand>),
  Jump(BlockId),
  Branch { cond: Operand, then_bb: BlockId, else_bb: BlockId },
  Unreachable,
}

#[derive(Clone, Debug, Default)]
pub struct BasicBlock {
  pub insts: Vec<Instruction>,
  pub term: Option<Terminator>,
}

impl BasicBlock {
  pub fn push(&mut self, inst: Instruction) { self.insts.push(inst) }

  #[must_use] pub fn successors(&self) -> Vec<BlockId> {
    match &self.term {
      Some(Terminator::Jump(b)) => vec![*b],
      Some(Terminator::Branch { then_bb, else_bb, .. }) => vec![*then_bb, *else_bb],
      _ => vec![],
    }
  }
}

/// Per-parameter/return transport decision (glossary: "Calling
/// convention"). Computed once per function in `build_mir.rs` and
/// consulted at every call site.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transport {
  /// Passed/returned in one register.
  Register,
  /// A fat pointer: two consecutive register slots.
  RegisterPair,
  /// Passed by pointer; for return values this is the hidden `ValRet`
  /// parameter discipline of §4.4.
  Memory,
}

#[derive(Clone, Debug)]
pub struct ArgAbi { pub ty: IrType, pub transport: Transport }

#[derive(Clone, Debug)]
pub struct CallingConvention {
  pub args: Vec<ArgAbi>,
  pub ret: Vec<ArgAbi>,
  /// Whether a hidden `ValRet` pointer parameter precedes the normal
  /// arguments.
  pub val_ret: bool,
}

#[derive(Clone, Debug)]
pub struct Function {
  pub name: Symbol,
  pub cc: CallingConvention,
  pub values: IdxVec<ValueId, IrType>,
  pub blocks: IdxVec<BlockId, BasicBlock>,
  pub entry: BlockId,
}

impl Function {
  #[must_use] pub fn new(name: Symbol, cc: CallingConvention) -> Self {
    let mut blocks = IdxVec::new();
    let entry = blocks.push(BasicBlock::default());
    Self { name, cc, values: IdxVec::new(), blocks, entry }
  }

  pub fn new_block(&mut self) -> BlockId { self.blocks.push(BasicBlock::default()) }

  pub fn new_value(&mut self, ty: IrType) -> ValueId { self.values.push(ty) }

  /// The user list of a value (§3: "each value carries ... a user list").
  /// Recomputed by scanning, like the dominator/loop/post-dominator
  /// analyses of §3, rather than maintained intrusively: this backend
  /// never mutates IR after generation (optimization is an external
  /// collaborator per §1), so an intrusive list would only pay for itself
  /// across mutations that never happen here.
  #[must_use] pub fn uses_of(&self, target: ValueId) -> Vec<Use> {
    fn operand_matches(op: &Operand, target: ValueId) -> bool {
      matches!(op, Operand::Value(v) if *v == target)
    }
    let mut uses = Vec::new();
    for (block, bb) in self.blocks.iter() {
      for (idx, inst) in bb.insts.iter().enumerate() {
        let operands: Vec<&Operand> = match &inst.kind {
          InstKind::IntBin { lhs, rhs, .. } | InstKind::FloatBin { lhs, rhs, .. } | InstKind::Cmp { lhs, rhs, .. } =>
            vec![lhs, rhs],
          InstKind::Not { operand } | InstKind::Neg { operand } | InstKind::Convert { operand, .. } =>
            vec![operand],
          InstKind::Gep { base, offset, .. } => vec![base, offset],
          InstKind::Load { addr, .. } => vec![addr],
          InstKind::Store { addr, value } => vec![addr, value],
          InstKind::Call { args, .. } | InstKind::CallForeign { args, .. } | InstKind::CallBuiltin { args, .. } =>
            args.iter().collect(),
          InstKind::CallVirtual { vtable_ptr, args, .. } =>
            std::iter::once(vtable_ptr).chain(args.iter()).collect(),
          InstKind::Alloc { size, .. } => vec![size],
          InstKind::Dealloc { ptr, size, .. } => vec![ptr, size],
          InstKind::Phi { incoming } => incoming.iter().map(|(_, op)| op).collect(),
        };
        for (slot, op) in operands.into_iter().enumerate() {
          if operand_matches(op, target) {
            uses.push(Use { block, inst: idx, slot: u32::try_from(slot).unwrap_or(u32::MAX) });
          }
        }
      }
    }
    uses
  }
}

#[derive(Clone, Debug)]
pub struct ForeignFunction {
  pub name: Symbol,
  pub lib: Symbol,
  pub cc: CallingConvention,
}

#[derive(Clone, Debug)]
pub enum Callable { Function(Function), Foreign(ForeignFunction) }

#[derive(Debug, Default)]
pub struct Module {
  pub consts: IdxVec<ConstId, TypedConst>,
  pub structs: IdxVec<StructId, StructDef>,
  pub globals: IdxVec<GlobalId, Global>,
  pub funcs: IdxVec<FuncId, Callable>,
}

impl Module {
  #[must_use] pub fn new() -> Self { Self::default() }
}
