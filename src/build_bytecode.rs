//! Lowers a `types::ir::Module` to a `types::bytecode::Binary` (§4.5, §6):
//! register assignment, block layout, and opcode selection. Grounded in
//! `original_source/src/svm/ExecutionInstDef.h`'s fixed-width instruction
//! encodings; block layout follows `visit_blocks`' reachability/jump-
//! threaded traversal (ported from `mmcc`'s `build_vcode.rs`, which used
//! it for its native-ISA target), with jump targets backpatched once
//! every block's offset is known.

use std::collections::HashMap;

use crate::types::bytecode::{Binary, ForeignDecl, FfiSignature, FfiType, MemOperand, OpCode};
use crate::types::ir::{
  BasicBlock, BlockId, CallTarget, Callable, CmpOp, FloatBinOp, Function, FuncId, GlobalId,
  InstKind, Instruction, IntBinOp, IrType, Module, Operand, Terminator, TypedConst, ValueId,
};
use crate::types::ty::IntWidth;
use crate::types::Idx;

/// Walks a function's blocks so straight-line fallthrough chains stay
/// contiguous in the emitted layout: visit blocks in index order, but
/// whenever a block has an unvisited successor, follow it immediately
/// rather than returning to the outer index scan (ported from
/// `build_vcode.rs::visit_blocks`, minus its reachability check — every
/// block `build_mir.rs` creates is wired into the CFG it builds, so
/// there's no unreachable-block case to reject here).
fn visit_blocks<'a>(func: &'a Function, mut f: impl FnMut(BlockId, &'a BasicBlock)) {
  let mut visited = vec![false; func.blocks.len()];
  let ids: Vec<BlockId> = func.blocks.iter().map(|(id, _)| id).collect();
  for start in ids {
    if visited[start.into_usize()] { continue }
    let mut i = start;
    loop {
      visited[i.into_usize()] = true;
      let bb = &func.blocks[i];
      f(i, bb);
      match bb.successors().into_iter().find(|s| !visited[s.into_usize()]) {
        Some(j) => i = j,
        None => break,
      }
    }
  }
}

#[must_use]
pub fn lower_module(module: &Module) -> Binary {
  let mut emitter = Emitter {
    module,
    funcs: Vec::new(),
    foreign: Vec::new(),
    data: Vec::new(),
    global_offsets: HashMap::new(),
    data_patches: Vec::new(),
  };
  emitter.run()
}

struct FuncBytes {
  id: FuncId,
  bytes: Vec<u8>,
  /// Byte positions in `bytes` holding a placeholder `u32` target-function
  /// offset (patched once every function's final position in the
  /// concatenated code section is known).
  call_patches: Vec<(usize, FuncId)>,
  /// Byte positions in `bytes` holding a placeholder 8-byte global address
  /// (patched once the data section's absolute base is known).
  global_patches: Vec<(usize, GlobalId)>,
  /// Byte positions in `bytes` holding a placeholder `u32` jump target,
  /// still function-relative (the offset of the target block within this
  /// function's own byte stream) — patched to an absolute code-section
  /// address in the same pass that rebases `call_patches`, once this
  /// function's own base offset is known.
  jump_patches: Vec<(usize, u32)>,
}

struct Emitter<'m> {
  module: &'m Module,
  funcs: Vec<FuncBytes>,
  foreign: Vec<ForeignDecl>,
  data: Vec<u8>,
  /// Byte offset of each global's initializer within `data`, relative to
  /// the data section's own start (not yet the absolute address, which
  /// also needs the code section's length added in).
  global_offsets: HashMap<GlobalId, u32>,
  /// Positions within `data` itself holding a placeholder 8-byte address
  /// of another global (a global whose initializer takes the address of a
  /// sibling global).
  data_patches: Vec<(usize, GlobalId)>,
}

impl<'m> Emitter<'m> {
  fn run(&mut self) -> Binary {
    let mut foreign_slot = HashMap::new();
    for (id, callable) in self.module.funcs.iter() {
      if let Callable::Foreign(f) = callable {
        let slot = u32::try_from(self.foreign.len()).unwrap_or(u32::MAX);
        foreign_slot.insert(id, slot);
        self.foreign.push(ForeignDecl {
          lib_name: f.lib.to_string(),
          ffi_name: f.name.to_string(),
          signature: ffi_signature(f),
          slot_index: slot,
        });
      }
    }

    self.layout_globals();

    for (id, callable) in self.module.funcs.iter() {
      if let Callable::Function(func) = callable {
        let fb = FuncLowering::new(&foreign_slot, func).lower();
        self.funcs.push(FuncBytes {
          id, bytes: fb.0, call_patches: fb.1, global_patches: fb.2, jump_patches: fb.3,
        });
      }
    }

    let mut code = Vec::new();
    let mut func_base: HashMap<FuncId, u32> = HashMap::new();
    for fb in &self.funcs {
      func_base.insert(fb.id, u32::try_from(code.len()).unwrap_or(u32::MAX));
      code.extend_from_slice(&fb.bytes);
    }
    for fb in &self.funcs {
      let base = func_base[&fb.id];
      for &(pos, target) in &fb.call_patches {
        let abs = base as usize + pos;
        let target_off = func_base.get(&target).copied().unwrap_or(0);
        byteorder::LE::write_u32(&mut code[abs..abs + 4], target_off);
      }
      // Intra-function jump targets are resolved by `FuncLowering::lower`
      // to an offset *within that function's own byte stream* (block
      // layout isn't known to span multiple functions). Once concatenated
      // into one code section, every jump needs this function's own base
      // added in too — the same rebasing `call_patches` needs, just within
      // a single function instead of across the call graph.
      for &(pos, func_relative_target) in &fb.jump_patches {
        let abs = base as usize + pos;
        byteorder::LE::write_u32(&mut code[abs..abs + 4], base + func_relative_target);
      }
    }

    let start = self.module.funcs.iter().find_map(|(id, c)| match c {
      Callable::Function(f) if is_entry_name(f) => func_base.get(&id).copied(),
      _ => None,
    });

    let data_offset = u32::try_from(code.len()).unwrap_or(0);
    code.extend_from_slice(&self.data);

    // Every `GlobalAddr` reference — whether materialized by a function's
    // `MovRV` or embedded in another global's own initializer — only knows
    // the global's offset within `data`; the data section's absolute base
    // (`data_offset`) is not known until the code section is fully laid
    // out, so both kinds of reference are patched here in one pass.
    for fb in &self.funcs {
      let base = func_base[&fb.id];
      for &(pos, gid) in &fb.global_patches {
        let abs = base as usize + pos;
        let addr = u64::from(data_offset) + u64::from(self.global_offsets.get(&gid).copied().unwrap_or(0));
        byteorder::LE::write_u64(&mut code[abs..abs + 8], addr);
      }
    }
    for &(pos, gid) in &self.data_patches {
      let abs = data_offset as usize + pos;
      let addr = u64::from(data_offset) + u64::from(self.global_offsets.get(&gid).copied().unwrap_or(0));
      byteorder::LE::write_u64(&mut code[abs..abs + 8], addr);
    }

    Binary { code_and_data: code, start, foreign: std::mem::take(&mut self.foreign), data_offset }
  }

  /// Serializes every `Module::globals` initializer into `self.data`,
  /// recording each global's relative offset. A global with no initializer
  /// (a `mutable` static default) gets a zero-filled region sized from its
  /// `IrType`. 8-byte-aligned throughout since the largest scalar these
  /// constants ever hold is a 64-bit word.
  fn layout_globals(&mut self) {
    for (id, g) in self.module.globals.iter() {
      while self.data.len() % 8 != 0 { self.data.push(0) }
      self.global_offsets.insert(id, u32::try_from(self.data.len()).unwrap_or(0));
      match &g.init {
        Some(c) => serialize_const(c, &mut self.data),
        None => {
          let size = g.ty.size().max(1) as usize;
          self.data.resize(self.data.len() + size, 0);
        }
      }
    }
    // Resolve `GlobalAddr`s nested inside another global's own initializer.
    let mut patches = Vec::new();
    for (id, g) in self.module.globals.iter() {
      if let Some(c) = &g.init {
        let base = self.global_offsets[&id];
        collect_global_refs(c, base, &mut patches);
      }
    }
    self.data_patches = patches;
  }
}

/// Walks a constant's structure looking for `GlobalAddr` leaves, recording
/// the byte position (relative to the data section) each one's 8 bytes
/// were written at by `serialize_const`, alongside the 8-byte offsets
/// `serialize_const` itself advances past for every other leaf kind — kept
/// in lockstep with `serialize_const`'s own traversal order.
fn collect_global_refs(c: &TypedConst, pos: u32, out: &mut Vec<(usize, GlobalId)>) {
  match c {
    TypedConst::GlobalAddr(g) => out.push((pos as usize, *g)),
    TypedConst::Array(elems) => {
      let mut offset = pos;
      for e in elems {
        collect_global_refs(e, offset, out);
        offset += const_size(e);
      }
    }
    TypedConst::Int(..) | TypedConst::Float32(_) | TypedConst::Float64(_) | TypedConst::Null => {}
  }
}

fn const_size(c: &TypedConst) -> u32 {
  match c {
    TypedConst::Int(w, _) => w.bytes(),
    TypedConst::Float32(_) => 4,
    TypedConst::Float64(_) => 8,
    TypedConst::Null | TypedConst::GlobalAddr(_) => 8,
    TypedConst::Array(elems) => elems.iter().map(const_size).sum(),
  }
}

/// Serializes a constant's raw bytes for the data section (distinct from
/// `const_bits`, which packs a constant into a single 8-byte register
/// load — an `Array` has no single-register form). `GlobalAddr` writes an
/// 8-byte zero placeholder; `collect_global_refs` finds its position for
/// later patching.
fn serialize_const(c: &TypedConst, out: &mut Vec<u8>) {
  match c {
    TypedConst::Int(w, v) => {
      let bytes = (*v as u64).to_le_bytes();
      out.extend_from_slice(&bytes[..w.bytes() as usize]);
    }
    TypedConst::Float32(f) => out.extend_from_slice(&f.to_bits().to_le_bytes()),
    TypedConst::Float64(f) => out.extend_from_slice(&f.to_bits().to_le_bytes()),
    TypedConst::Null | TypedConst::GlobalAddr(_) => out.extend_from_slice(&[0u8; 8]),
    TypedConst::Array(elems) => { for e in elems { serialize_const(e, out) } }
  }
}

fn is_entry_name(f: &Function) -> bool { f.name.as_str() == "main" }

fn ffi_signature(f: &crate::types::ir::ForeignFunction) -> FfiSignature {
  FfiSignature {
    args: f.cc.args.iter().map(|a| ffi_type(&a.ty)).collect(),
    ret: f.cc.ret.first().map(|a| ffi_type(&a.ty)).unwrap_or(FfiType::Void),
  }
}

fn ffi_type(ty: &IrType) -> FfiType {
  match ty {
    IrType::Int(IntWidth::W8) => FfiType::I8,
    IrType::Int(IntWidth::W16) => FfiType::I16,
    IrType::Int(IntWidth::W32) => FfiType::I32,
    IrType::Int(IntWidth::W64) => FfiType::I64,
    IrType::Float32 => FfiType::F32,
    IrType::Float64 => FfiType::F64,
    IrType::Ptr | IrType::FatPtr => FfiType::Pointer,
    IrType::Struct(_) | IrType::Array { .. } => FfiType::Pointer,
    IrType::Void => FfiType::Void,
  }
}

/// Per-function register assignment and instruction encoding.
struct FuncLowering<'m> {
  foreign_slot: &'m HashMap<FuncId, u32>,
  func: &'m Function,
  regs: HashMap<ValueId, u8>,
  next_reg: u16,
  out: Vec<u8>,
  block_offsets: HashMap<BlockId, u32>,
  /// (position of the 4-byte placeholder, target block) for intra-function
  /// jumps. Resolved to a function-relative byte offset once every block
  /// in this function has been laid out (`lower`'s final pass), then
  /// rebased to an absolute code-section address in `Emitter::run`
  /// alongside `call_patches`.
  jump_patches: Vec<(usize, BlockId)>,
  call_patches: Vec<(usize, FuncId)>,
  /// (position of the 8-byte placeholder, referenced global) for `MovRV`s
  /// materializing a `TypedConst::GlobalAddr`, patched once the data
  /// section's absolute base is known (see `Emitter::run`).
  global_patches: Vec<(usize, GlobalId)>,
}

impl<'m> FuncLowering<'m> {
  fn new(foreign_slot: &'m HashMap<FuncId, u32>, func: &'m Function) -> Self {
    // Parameter values occupy the first `cc.args.len()` slots of
    // `func.values` (see `build_mir.rs::gen_function_body`'s comment), so
    // their registers are exactly their ABI position; every other value
    // gets the next free register in allocation order. No spilling or
    // reuse: a non-optimizing backend simply assumes a function's live
    // value count fits the register file (flagged in DESIGN.md).
    let mut regs = HashMap::new();
    let mut next_reg: u16 = 0;
    for i in 0..func.values.len() {
      let vid = ValueId(u32::try_from(i).unwrap_or(u32::MAX));
      regs.insert(vid, (next_reg % 256) as u8);
      next_reg += 1;
    }
    Self {
      foreign_slot, func, regs, next_reg,
      out: Vec::new(), block_offsets: HashMap::new(),
      jump_patches: Vec::new(), call_patches: Vec::new(), global_patches: Vec::new(),
    }
  }

  fn fresh_reg(&mut self) -> u8 { let r = (self.next_reg % 256) as u8; self.next_reg += 1; r }

  /// Returns the function's bytes alongside three patch lists, all still
  /// carrying function-relative positions/targets: `call_patches` and
  /// `jump_patches` both need this function's eventual base offset in the
  /// concatenated code section added in (the former to name a callee
  /// function, the latter to name a block within *this* function), and
  /// `global_patches` need the data section's base once it's known. None
  /// of those three bases exist yet at the point a single function is
  /// lowered in isolation, so all three patch passes happen one level up,
  /// in `Emitter::run`.
  fn lower(mut self) -> (Vec<u8>, Vec<(usize, FuncId)>, Vec<(usize, GlobalId)>, Vec<(usize, u32)>) {
    let func = self.func;
    let mut order = Vec::new();
    visit_blocks(func, |bid, _| order.push(bid));
    for (idx, &bid) in order.iter().enumerate() {
      let bb = &func.blocks[bid];
      self.block_offsets.insert(bid, u32::try_from(self.out.len()).unwrap_or(0));
      for inst in &bb.insts { self.emit_inst(inst) }
      let fallthrough = order.get(idx + 1).copied();
      self.emit_term(bb.term.as_ref(), fallthrough);
    }
    let jump_patches = self.jump_patches.iter()
      .map(|&(pos, target)| (pos, *self.block_offsets.get(&target).unwrap_or(&0)))
      .collect();
    (self.out, self.call_patches, self.global_patches, jump_patches)
  }

  fn reg_of(&mut self, op: &Operand) -> u8 {
    match op {
      Operand::Value(v) => *self.regs.get(v).unwrap_or(&0),
      Operand::Const(c) => {
        let r = self.fresh_reg();
        self.emit_mov_rv(r, c);
        r
      }
    }
  }

  fn emit_mov_rv(&mut self, r: u8, c: &TypedConst) {
    self.out.push(OpCode::MovRV as u8);
    self.out.push(r);
    if let TypedConst::GlobalAddr(g) = c {
      let pos = self.out.len();
      self.out.extend_from_slice(&[0u8; 8]);
      self.global_patches.push((pos, *g));
      return;
    }
    let bits = const_bits(c);
    let mut buf = [0u8; 8];
    byteorder::LE::write_u64(&mut buf, bits);
    self.out.extend_from_slice(&buf);
  }

  fn emit_mov_rr(&mut self, dst: u8, src: u8) {
    if dst == src { return }
    self.out.push(OpCode::MovRR as u8);
    self.out.push(dst);
    self.out.push(src);
  }

  /// Moves `args` into registers `0..args.len()` for a call. Goes through
  /// fresh scratch registers rather than moving straight into the
  /// destination range, since a later argument's source register can
  /// alias an earlier argument's destination register (e.g. arg 0 lives
  /// in r2 and arg 1 lives in r0 — moving arg 0 into r0 first would
  /// clobber arg 1's value before it's read). Scratch registers are
  /// always fresh and so never alias `0..args.len()`.
  fn marshal_args(&mut self, args: &[Operand]) {
    let srcs: Vec<u8> = args.iter().map(|a| self.reg_of(a)).collect();
    let scratch: Vec<u8> = srcs.iter().map(|&s| { let r = self.fresh_reg(); self.emit_mov_rr(r, s); r }).collect();
    for (i, r) in scratch.into_iter().enumerate() {
      self.emit_mov_rr(u8::try_from(i).unwrap_or(255), r);
    }
  }

  fn dst_reg(&mut self, inst: &Instruction) -> Option<u8> {
    inst.result.as_ref().map(|(v, _)| *self.regs.get(v).unwrap_or(&0))
  }

  /// Computes `lhs op rhs` into `dst`, materializing both operands into
  /// registers first since every arithmetic opcode is register-register
  /// (no immediate arithmetic form exists in the wire format).
  fn emit_inst(&mut self, inst: &Instruction) {
    match &inst.kind {
      InstKind::IntBin { op, lhs, rhs, .. } => {
        let dst = self.dst_reg(inst).unwrap();
        let l = self.reg_of(lhs);
        self.emit_mov_rr(dst, l);
        let r = self.reg_of(rhs);
        self.out.push(int_bin_opcode(*op) as u8);
        self.out.push(dst);
        self.out.push(r);
      }
      InstKind::FloatBin { op, lhs, rhs, .. } => {
        let dst = self.dst_reg(inst).unwrap();
        let l = self.reg_of(lhs);
        self.emit_mov_rr(dst, l);
        let r = self.reg_of(rhs);
        self.out.push(float_bin_opcode(*op) as u8);
        self.out.push(dst);
        self.out.push(r);
      }
      InstKind::Cmp { op, lhs, rhs } => {
        let l = self.reg_of(lhs);
        let r = self.reg_of(rhs);
        self.out.push(cmp_opcode(*op) as u8);
        self.out.push(l);
        self.out.push(r);
        let dst = self.dst_reg(inst).unwrap();
        self.out.push(set_opcode(*op) as u8);
        self.out.push(dst);
      }
      InstKind::Not { operand } => {
        let dst = self.dst_reg(inst).unwrap();
        let s = self.reg_of(operand);
        self.emit_mov_rr(dst, s);
        self.out.push(OpCode::Not as u8);
        self.out.push(dst);
      }
      InstKind::Neg { operand } => {
        let dst = self.dst_reg(inst).unwrap();
        let s = self.reg_of(operand);
        self.emit_mov_rr(dst, s);
        self.out.push(OpCode::Neg as u8);
        self.out.push(dst);
      }
      InstKind::Convert { operand, from, to } => {
        let dst = self.dst_reg(inst).unwrap();
        let s = self.reg_of(operand);
        let op = convert_opcode(from, to);
        self.out.push(op as u8);
        self.out.push(dst);
        self.out.push(s);
        if matches!(op, OpCode::SExt | OpCode::ZExt | OpCode::Trunc) {
          self.out.push(int_width_byte(from));
          self.out.push(int_width_byte(to));
        }
      }
      InstKind::Gep { base, offset, stride } => {
        let dst = self.dst_reg(inst).unwrap();
        let mem = self.mem_operand(base, offset, *stride);
        self.out.push(OpCode::Lea as u8);
        self.out.push(dst);
        mem.encode(&mut self.out);
      }
      InstKind::Load { addr, .. } => {
        let dst = self.dst_reg(inst).unwrap();
        let mem = self.mem_operand(addr, &Operand::Const(TypedConst::Int(IntWidth::W64, 0)), 1);
        self.out.push(OpCode::MovRM as u8);
        self.out.push(dst);
        mem.encode(&mut self.out);
      }
      InstKind::Store { addr, value } => {
        let v = self.reg_of(value);
        let mem = self.mem_operand(addr, &Operand::Const(TypedConst::Int(IntWidth::W64, 0)), 1);
        self.out.push(OpCode::MovMR as u8);
        mem.encode(&mut self.out);
        self.out.push(v);
      }
      InstKind::Alloc { size, .. } => {
        let dst = self.dst_reg(inst).unwrap();
        let sz = self.reg_of(size);
        self.out.push(OpCode::SAlloc as u8);
        self.out.push(dst);
        // `SAlloc`'s fixed operand shape mirrors `Lea`'s (dst reg + mem
        // operand); reuse the size register as the inner-offset slot with
        // no base, matching this backend's "constant-sized alloc in
        // practice" usage (every `Alloc` emitted by `build_mir.rs` carries
        // a folded constant size).
        let mem = MemOperand { base: MemOperand::NO_OFFSET_COUNT, offset_count: sz, multiplier: 1, inner_offset: 0 };
        mem.encode(&mut self.out);
      }
      InstKind::Dealloc { .. } => {
        // The VM's allocator is stack-discipline (`SAlloc` only grows the
        // frame); an explicit `unique`/dynamic-array dealloc is a no-op at
        // the bytecode level here since this backend never emits a heap
        // allocator distinct from the stack allocator. Flagged as a known
        // simplification rather than modeling a real heap.
      }
      InstKind::Call { callee, args } => self.emit_call(inst, callee, args),
      InstKind::CallVirtual { vtable_ptr, slot, args, .. } => self.emit_call_virtual(inst, vtable_ptr, *slot, args),
      InstKind::CallForeign { .. } => {}
      InstKind::CallBuiltin { index, args } => self.emit_call_builtin(inst, *index, args),
      InstKind::Phi { .. } => {
        // Resolved structurally by the predecessor that assigns into this
        // value's register directly (`build_mir.rs` only ever emits `Phi`
        // at the join block of a two-predecessor expression merge, with
        // both producer registers already distinct SSA values) — copy
        // each incoming value into the phi's own register here, since
        // this emitter walks blocks in program order rather than tracking
        // per-edge parallel copies.
        if let InstKind::Phi { incoming } = &inst.kind {
          let dst = self.dst_reg(inst).unwrap();
          if let Some((_, last)) = incoming.last() {
            let r = self.reg_of(last);
            self.emit_mov_rr(dst, r);
          }
        }
      }
    }
  }

  fn mem_operand(&mut self, base: &Operand, offset: &Operand, stride: u32) -> MemOperand {
    let base_reg = self.reg_of(base);
    match offset {
      Operand::Const(TypedConst::Int(_, n)) =>
        MemOperand { base: base_reg, offset_count: MemOperand::NO_OFFSET_COUNT, multiplier: 1, inner_offset: (*n as i64) * i64::from(stride) },
      _ => {
        let off_reg = self.reg_of(offset);
        MemOperand { base: base_reg, offset_count: off_reg, multiplier: stride as i32, inner_offset: 0 }
      }
    }
  }

  /// Writes `args` into the callee's incoming registers 0..argc-1 of the
  /// *new* frame (register numbers are frame-relative, per `SAlloc`'s
  /// stack-of-frames model), then emits `Call`.
  fn emit_call(&mut self, inst: &Instruction, callee: &CallTarget, args: &[Operand]) {
    // The indirect-callee register must be snapshotted into scratch
    // *before* `marshal_args` runs — it may alias a low register that
    // the argument marshalling is about to overwrite.
    let indirect = match callee {
      CallTarget::Indirect(op) => {
        let src = self.reg_of(op);
        let r = self.fresh_reg();
        self.emit_mov_rr(r, src);
        Some(r)
      }
      CallTarget::Direct(_) => None,
    };
    self.marshal_args(args);
    match callee {
      CallTarget::Direct(fid) => {
        if let Some(&slot) = self.foreign_slot.get(fid) {
          self.out.push(OpCode::CallExt as u8);
          let mut buf = [0u8; 4];
          byteorder::LE::write_u32(&mut buf, slot);
          self.out.extend_from_slice(&buf);
        } else {
          self.out.push(OpCode::Call as u8);
          self.out.push(u8::try_from(args.len()).unwrap_or(255));
          let pos = self.out.len();
          self.out.extend_from_slice(&[0; 4]);
          self.call_patches.push((pos, *fid));
        }
      }
      CallTarget::Indirect(_) => {
        self.out.push(OpCode::ICallR as u8);
        self.out.push(indirect.unwrap());
        self.out.push(u8::try_from(args.len()).unwrap_or(255));
      }
    }
    if let Some(dst) = self.dst_reg(inst) { self.emit_mov_rr(dst, 0) }
  }

  fn emit_call_virtual(&mut self, inst: &Instruction, vtable_ptr: &Operand, slot: u32, args: &[Operand]) {
    // Same snapshot-before-marshal concern as the indirect-callee case
    // above: the vtable pointer's register may alias an argument's
    // destination register.
    let vt_src = self.reg_of(vtable_ptr);
    let vt = self.fresh_reg();
    self.emit_mov_rr(vt, vt_src);
    self.marshal_args(args);
    let mem = MemOperand { base: vt, offset_count: MemOperand::NO_OFFSET_COUNT, multiplier: 1, inner_offset: i64::from(slot) * 8 };
    self.out.push(OpCode::ICallM as u8);
    mem.encode(&mut self.out);
    self.out.push(u8::try_from(args.len()).unwrap_or(255));
    if let Some(dst) = self.dst_reg(inst) { self.emit_mov_rr(dst, 0) }
  }

  fn emit_call_builtin(&mut self, inst: &Instruction, index: u32, args: &[Operand]) {
    self.marshal_args(args);
    self.out.push(OpCode::CallBuiltin as u8);
    let mut buf = [0u8; 4];
    byteorder::LE::write_u32(&mut buf, index);
    self.out.extend_from_slice(&buf);
    if let Some(dst) = self.dst_reg(inst) { self.emit_mov_rr(dst, 0) }
  }

  /// `fallthrough` is the block that will be emitted immediately after
  /// this one in the chosen layout (`None` at the end of the function).
  /// A jump to exactly that block needs no opcode at all — execution
  /// falls through to it — which is the entire reason block layout
  /// follows `visit_blocks`' chain-following order instead of raw
  /// `BlockId` order. A two-way branch picks whichever arm to test
  /// against so the fallthrough arm costs nothing; only the non-
  /// fallthrough arm needs an explicit jump (or both, if neither arm is
  /// the fallthrough).
  fn emit_term(&mut self, term: Option<&Terminator>, fallthrough: Option<BlockId>) {
    match term {
      Some(Terminator::Return(vals)) => {
        if let Some(v) = vals.first() {
          let r = self.reg_of(v);
          self.emit_mov_rr(0, r);
        }
        self.out.push(OpCode::Ret as u8);
      }
      Some(Terminator::Jump(b)) => {
        if Some(*b) != fallthrough { self.emit_jump(OpCode::Jmp, *b) }
      }
      Some(Terminator::Branch { cond, then_bb, else_bb }) => {
        let c = self.reg_of(cond);
        self.out.push(OpCode::TestR as u8);
        self.out.push(c);
        self.out.push(c);
        if Some(*else_bb) == fallthrough {
          self.emit_jump(OpCode::Jnz, *then_bb);
        } else if Some(*then_bb) == fallthrough {
          self.emit_jump(OpCode::Jz, *else_bb);
        } else {
          self.emit_jump(OpCode::Jnz, *then_bb);
          self.emit_jump(OpCode::Jmp, *else_bb);
        }
      }
      Some(Terminator::Unreachable) | None => self.out.push(OpCode::Trap as u8),
    }
  }

  fn emit_jump(&mut self, op: OpCode, target: BlockId) {
    self.out.push(op as u8);
    let pos = self.out.len();
    self.out.extend_from_slice(&[0; 4]);
    self.jump_patches.push((pos, target));
  }
}

fn int_bin_opcode(op: IntBinOp) -> OpCode {
  match op {
    IntBinOp::Add => OpCode::AddRR, IntBinOp::Sub => OpCode::SubRR, IntBinOp::Mul => OpCode::MulRR,
    IntBinOp::SDiv => OpCode::SDivRR, IntBinOp::UDiv => OpCode::UDivRR,
    IntBinOp::SRem => OpCode::SRemRR, IntBinOp::URem => OpCode::URemRR,
    IntBinOp::And => OpCode::AndRR, IntBinOp::Or => OpCode::OrRR, IntBinOp::Xor => OpCode::XorRR,
    IntBinOp::Shl => OpCode::ShlRR, IntBinOp::AShr => OpCode::AShrRR, IntBinOp::LShr => OpCode::LShrRR,
  }
}

fn float_bin_opcode(op: FloatBinOp) -> OpCode {
  match op { FloatBinOp::Add => OpCode::FAddRR, FloatBinOp::Sub => OpCode::FSubRR, FloatBinOp::Mul => OpCode::FMulRR, FloatBinOp::Div => OpCode::FDivRR }
}

/// Which typed compare instruction carries out a [`CmpOp`]: equality is
/// representation-agnostic (bit-pattern equality means the same thing for
/// ints and floats), but the ordered comparisons need a sign/floatness split
/// since raw bits only order correctly under one interpretation at a time.
fn cmp_opcode(op: CmpOp) -> OpCode {
  match op {
    CmpOp::Eq | CmpOp::Ne | CmpOp::SLt | CmpOp::SLe | CmpOp::SGt | CmpOp::SGe => OpCode::ICmpS,
    CmpOp::ULt | CmpOp::ULe | CmpOp::UGt | CmpOp::UGe => OpCode::ICmpU,
    CmpOp::FLt | CmpOp::FLe | CmpOp::FGt | CmpOp::FGe => OpCode::FCmp,
  }
}

fn set_opcode(op: CmpOp) -> OpCode {
  match op {
    CmpOp::Eq => OpCode::SetE, CmpOp::Ne => OpCode::SetNe,
    CmpOp::SLt | CmpOp::ULt | CmpOp::FLt => OpCode::SetL,
    CmpOp::SLe | CmpOp::ULe | CmpOp::FLe => OpCode::SetLe,
    CmpOp::SGt | CmpOp::UGt | CmpOp::FGt => OpCode::SetG,
    CmpOp::SGe | CmpOp::UGe | CmpOp::FGe => OpCode::SetGe,
  }
}

/// The byte-width `SExt`/`ZExt`/`Trunc` encode for a non-integer endpoint
/// (a pointer source/target of a same-size reinterpretation) — `8`, same as
/// `IrType::Ptr`'s own size, so the width pair collapses to a same-width
/// no-op move rather than a spurious truncation or extension.
fn int_width_byte(ty: &IrType) -> u8 {
  match ty {
    IrType::Int(w) => w.bytes() as u8,
    _ => 8,
  }
}

fn convert_opcode(from: &IrType, to: &IrType) -> OpCode {
  match (from, to) {
    (IrType::Int(_), IrType::Float32 | IrType::Float64) => OpCode::ItoF,
    (IrType::Float32 | IrType::Float64, IrType::Int(_)) => OpCode::FtoI,
    (IrType::Float32, IrType::Float64) => OpCode::F32toF64,
    (IrType::Float64, IrType::Float32) => OpCode::F64toF32,
    (IrType::Int(a), IrType::Int(b)) if b.bytes() > a.bytes() => OpCode::ZExt,
    (IrType::Int(a), IrType::Int(b)) if b.bytes() < a.bytes() => OpCode::Trunc,
    _ => OpCode::SExt,
  }
}

fn const_bits(c: &TypedConst) -> u64 {
  match c {
    TypedConst::Int(_, v) => *v as u64,
    TypedConst::Float32(f) => u64::from(f.to_bits()),
    TypedConst::Float64(f) => f.to_bits(),
    TypedConst::Null => 0,
    TypedConst::GlobalAddr(g) => u64::from(g.0),
    TypedConst::Array(_) => 0,
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::ir::{BasicBlock, CallingConvention, StructDef};
  use crate::symbol::intern;

  fn leaf_function_returning_a_constant() -> Module {
    let mut module = Module::new();
    let cc = CallingConvention { args: vec![], ret: vec![], val_ret: false };
    let mut f = Function::new(intern("answer"), cc);
    let entry = f.entry;
    let v = f.new_value(IrType::Int(IntWidth::W32));
    f.blocks[entry].push(Instruction {
      kind: InstKind::IntBin { op: IntBinOp::Add, lhs: Operand::Const(TypedConst::Int(IntWidth::W32, 40)), rhs: Operand::Const(TypedConst::Int(IntWidth::W32, 2)), width: IntWidth::W32 },
      result: Some((v, IrType::Int(IntWidth::W32))),
    });
    f.blocks[entry].term = Some(Terminator::Return(vec![Operand::Value(v)]));
    module.funcs.push(Callable::Function(f));
    module
  }

  #[test]
  fn a_leaf_function_lowers_to_nonempty_code_ending_in_ret() {
    let module = leaf_function_returning_a_constant();
    let bin = lower_module(&module);
    assert!(!bin.code_and_data.is_empty());
    assert_eq!(*bin.code_and_data.last().unwrap(), OpCode::Ret as u8);
  }

  #[test]
  fn an_unreferenced_struct_def_does_not_affect_code_layout() {
    let mut module = leaf_function_returning_a_constant();
    module.structs.push(StructDef { name: intern("s"), fields: vec![], size: 0, align: 1 });
    let bin = lower_module(&module);
    assert_eq!(bin.data_offset, u32::try_from(bin.code_and_data.len()).unwrap());
  }

  #[test]
  fn a_function_returning_a_global_addr_patches_to_the_data_section() {
    use crate::types::ir::Global;
    let mut module = Module::new();
    let gid = module.globals.push(Global {
      name: intern("greeting"),
      ty: IrType::Array { elem: Box::new(IrType::Int(IntWidth::W8)), count: 6 },
      init: Some(TypedConst::Array((*b"hello\0").iter().map(|&b| TypedConst::Int(IntWidth::W8, i128::from(b))).collect())),
      mutable: false,
    });
    let cc = CallingConvention { args: vec![], ret: vec![], val_ret: false };
    let mut f = Function::new(intern("greeting_ptr"), cc);
    let entry = f.entry;
    let v = f.new_value(IrType::Ptr);
    f.blocks[entry].push(Instruction {
      kind: InstKind::IntBin {
        op: IntBinOp::Add,
        lhs: Operand::Const(TypedConst::GlobalAddr(gid)),
        rhs: Operand::Const(TypedConst::Int(IntWidth::W64, 0)),
        width: IntWidth::W64,
      },
      result: Some((v, IrType::Ptr)),
    });
    f.blocks[entry].term = Some(Terminator::Return(vec![Operand::Value(v)]));
    module.funcs.push(Callable::Function(f));

    let bin = lower_module(&module);
    assert_eq!(bin.code_and_data.len() as u32 - bin.data_offset, 6);
    assert_eq!(&bin.code_and_data[bin.data_offset as usize..], b"hello\0");
  }
}
