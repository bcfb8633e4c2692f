//! The bytecode interpreter loop (§4.5 "execution"). Grounded in
//! `original_source/src/svm/Execution.cc`'s `VMImpl::execute<Mode>`/
//! `stepExecution` and the `getPointer`/`moveMR`/`moveRM`/`condMove*`/
//! `compareRR`/`compareRV`/`testR`/`set`/`arithmeticRR`/`convert` helpers.
//! Rust has no computed-goto jump table, so `Execution.cc`'s two dispatch
//! strategies (`execute` via a jump-threaded table, `executeNoJumpThread`
//! via a plain `switch`) collapse to one `match`-based loop here; what
//! survives of the distinction is [`ExecutionMode`], which only changes
//! whether an interrupt flag is checked between instructions.

use crate::types::bytecode::{MemOperand, OpCode};
use crate::vm::binary::LoadedProgram;
use crate::vm::error::{VmError, VmResult};
use crate::vm::frame::REGISTER_COUNT;

/// Mirrors `Execution.cc`'s `VMImpl::execute` (tight loop) vs.
/// `executeInterruptible` (checks `interruptExecution`'s flag after every
/// instruction) — the only behavioral difference once jump-threading
/// itself isn't representable in safe Rust.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode { Default, Interruptible }

/// The condition-code pair every compare/test opcode leaves behind and
/// every `Set*`/conditional-jump/conditional-move opcode reads back,
/// exactly `Execution.cc`'s own `CompareFlags`.
#[derive(Clone, Copy, Default)]
struct CompareFlags { less: bool, equal: bool }

impl CompareFlags {
  fn equal(self) -> bool { self.equal }
  fn not_equal(self) -> bool { !self.equal }
  fn less(self) -> bool { self.less }
  fn less_eq(self) -> bool { self.less || self.equal }
  fn greater(self) -> bool { !self.less && !self.equal }
  fn greater_eq(self) -> bool { !self.less }
}

pub struct Interpreter<'p> {
  program: &'p mut LoadedProgram,
  flags: CompareFlags,
  ip: u32,
  interrupted: bool,
}

impl<'p> Interpreter<'p> {
  #[must_use] pub fn new(program: &'p mut LoadedProgram) -> Self {
    let ip = program.entry;
    Self { program, flags: CompareFlags::default(), ip, interrupted: false }
  }

  /// Sets the external interrupt flag an [`ExecutionMode::Interruptible`]
  /// run checks after every instruction (`VMImpl::interruptExecution`'s
  /// counterpart).
  pub fn interrupt(&mut self) { self.interrupted = true }

  /// Runs until the entry frame returns (or an interrupt is observed in
  /// [`ExecutionMode::Interruptible`] mode), returning register 0 of the
  /// entry frame's `Ret` — the sole return-value slot this backend's
  /// calling convention funnels scalar results through.
  pub fn run(&mut self, mode: ExecutionMode) -> VmResult<u64> {
    loop {
      if mode == ExecutionMode::Interruptible && self.interrupted { return Ok(self.regs()[0]) }
      if let Some(result) = self.step()? { return Ok(result) }
    }
  }

  fn regs(&self) -> [u64; REGISTER_COUNT] { self.program.call_stack.current().registers }

  fn reg(&self, idx: u8) -> u64 { self.program.call_stack.current().registers[idx as usize] }

  fn set_reg(&mut self, idx: u8, v: u64) { self.program.call_stack.current_mut().registers[idx as usize] = v }

  fn fetch_u8(&self, at: u32) -> VmResult<u8> {
    Ok(self.program.memory.read_bytes(u64::from(at), 1)?[0])
  }

  fn fetch_u32(&self, at: u32) -> VmResult<u32> {
    Ok(self.program.memory.load(u64::from(at), 4)? as u32)
  }

  fn fetch_mem_operand(&self, at: u32) -> VmResult<MemOperand> {
    let bytes = self.program.memory.read_bytes(u64::from(at), 14)?;
    Ok(MemOperand::decode(&bytes).0)
  }

  /// `addr = reg[base] + innerOffset + reg[offsetCount] * multiplier`,
  /// with `offsetCount == NO_OFFSET_COUNT` zeroing the scaled term —
  /// `getPointer`'s exact formula.
  fn resolve(&self, mem: &MemOperand) -> u64 {
    let base = self.reg(mem.base) as i64;
    let scaled = if mem.offset_count == MemOperand::NO_OFFSET_COUNT {
      0
    } else {
      self.reg(mem.offset_count) as i64 * i64::from(mem.multiplier)
    };
    (base + mem.inner_offset + scaled) as u64
  }

  /// Executes one instruction. Returns `Some(result)` only when the entry
  /// frame's `Ret` is reached — every other opcode returns `None` and
  /// leaves `self.ip` past the instruction it just ran.
  fn step(&mut self) -> VmResult<Option<u64>> {
    let op_byte = self.fetch_u8(self.ip)?;
    let op = OpCode::from_u8(op_byte).ok_or(VmError::InvalidOpcode(op_byte))?;
    let operand_start = self.ip + 1;
    let mut next_ip = operand_start + op.operand_size() as u32;

    match op {
      OpCode::MovRR => {
        let (dst, src) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
        self.set_reg(dst, self.reg(src));
      }
      OpCode::MovRV => {
        let dst = self.fetch_u8(operand_start)?;
        let v = self.program.memory.load(u64::from(operand_start + 1), 8)?;
        self.set_reg(dst, v);
      }
      OpCode::MovMR => {
        let mem = self.fetch_mem_operand(operand_start)?;
        let src = self.fetch_u8(operand_start + 14)?;
        let addr = self.resolve(&mem);
        self.program.memory.store(addr, self.reg(src), 8)?;
      }
      OpCode::MovRM => {
        let dst = self.fetch_u8(operand_start)?;
        let mem = self.fetch_mem_operand(operand_start + 1)?;
        let addr = self.resolve(&mem);
        let v = self.program.memory.load(addr, 8)?;
        self.set_reg(dst, v);
      }
      OpCode::CondMovRR => {
        let (dst, src) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
        if self.flags.not_equal() { self.set_reg(dst, self.reg(src)) }
      }
      OpCode::CondMovRV => {
        let dst = self.fetch_u8(operand_start)?;
        let v = self.program.memory.load(u64::from(operand_start + 1), 8)?;
        if self.flags.not_equal() { self.set_reg(dst, v) }
      }
      OpCode::CondMovRM => {
        let dst = self.fetch_u8(operand_start)?;
        let mem = self.fetch_mem_operand(operand_start + 1)?;
        if self.flags.not_equal() {
          let addr = self.resolve(&mem);
          let v = self.program.memory.load(addr, 8)?;
          self.set_reg(dst, v);
        }
      }
      OpCode::Lea => {
        let dst = self.fetch_u8(operand_start)?;
        let mem = self.fetch_mem_operand(operand_start + 1)?;
        self.set_reg(dst, self.resolve(&mem));
      }
      OpCode::SAlloc => {
        let dst = self.fetch_u8(operand_start)?;
        let mem = self.fetch_mem_operand(operand_start + 1)?;
        // `base`/`multiplier`/`inner_offset` are unused padding here — the
        // emitter stashes the allocation's size-holding register in
        // `offset_count` and abuses `NO_OFFSET_COUNT` for `base` since
        // there's no "no base register" sentinel of its own.
        let size = self.reg(mem.offset_count);
        let ptr = self.program.memory.alloc_stack(size)?;
        self.set_reg(dst, ptr);
      }
      OpCode::Call => {
        let argc = self.fetch_u8(operand_start)?;
        let target = self.fetch_u32(operand_start + 1)?;
        self.call(argc, next_ip)?;
        next_ip = target;
      }
      OpCode::ICallR => {
        let callee_reg = self.fetch_u8(operand_start)?;
        let argc = self.fetch_u8(operand_start + 1)?;
        let target = self.reg(callee_reg) as u32;
        self.call(argc, next_ip)?;
        next_ip = target;
      }
      OpCode::ICallM => {
        let mem = self.fetch_mem_operand(operand_start)?;
        let argc = self.fetch_u8(operand_start + 14)?;
        let addr = self.resolve(&mem);
        let target = self.program.memory.load(addr, 8)? as u32;
        self.call(argc, next_ip)?;
        next_ip = target;
      }
      OpCode::Ret => {
        let value = self.reg(0);
        if self.program.call_stack.is_at_entry() {
          return Ok(Some(value));
        }
        let (ret_ip, _popped_r0) = self.program.call_stack.pop();
        self.set_reg(0, value);
        next_ip = ret_ip.expect("non-entry frame always has a return address");
      }
      OpCode::CallExt => {
        let slot = self.fetch_u32(operand_start)?;
        let args = self.regs();
        let result = self.program.foreign.call(slot, &args, &mut self.program.memory)?;
        self.set_reg(0, result);
      }
      OpCode::CallBuiltin => {
        let index = self.fetch_u32(operand_start)?;
        let args = self.regs();
        let result = crate::vm::host::dispatch(index, &args, &mut self.program.memory, &mut self.program.files)?;
        self.set_reg(0, result);
      }
      OpCode::Jmp => next_ip = self.jump_target(operand_start, true)?,
      OpCode::Jz => next_ip = self.jump_target(operand_start, self.flags.equal())?,
      OpCode::Jnz => next_ip = self.jump_target(operand_start, self.flags.not_equal())?,
      OpCode::Je => next_ip = self.jump_target(operand_start, self.flags.equal())?,
      OpCode::Jne => next_ip = self.jump_target(operand_start, self.flags.not_equal())?,
      OpCode::Jl => next_ip = self.jump_target(operand_start, self.flags.less())?,
      OpCode::Jle => next_ip = self.jump_target(operand_start, self.flags.less_eq())?,
      OpCode::Jg => next_ip = self.jump_target(operand_start, self.flags.greater())?,
      OpCode::Jge => next_ip = self.jump_target(operand_start, self.flags.greater_eq())?,
      OpCode::ICmpS => self.compare_signed(operand_start)?,
      OpCode::ICmpU => self.compare_unsigned(operand_start)?,
      OpCode::FCmp => self.compare_float(operand_start)?,
      OpCode::CmpRV => {
        let a = self.fetch_u8(operand_start)? ;
        let b = self.program.memory.load(u64::from(operand_start + 1), 8)? as i64;
        let a = self.reg(a) as i64;
        self.flags = CompareFlags { less: a < b, equal: a == b };
      }
      OpCode::TestR => {
        let r = self.fetch_u8(operand_start)?;
        let a = self.reg(r) as i64;
        self.flags = CompareFlags { less: a < 0, equal: a == 0 };
      }
      OpCode::SetZ | OpCode::SetE => self.set_from(operand_start, self.flags.equal())?,
      OpCode::SetNz | OpCode::SetNe => self.set_from(operand_start, self.flags.not_equal())?,
      OpCode::SetL => self.set_from(operand_start, self.flags.less())?,
      OpCode::SetLe => self.set_from(operand_start, self.flags.less_eq())?,
      OpCode::SetG => self.set_from(operand_start, self.flags.greater())?,
      OpCode::SetGe => self.set_from(operand_start, self.flags.greater_eq())?,
      OpCode::AddRR => self.int_rr(operand_start, |a, b| a.wrapping_add(b))?,
      OpCode::SubRR => self.int_rr(operand_start, |a, b| a.wrapping_sub(b))?,
      OpCode::MulRR => self.int_rr(operand_start, |a, b| a.wrapping_mul(b))?,
      OpCode::SDivRR => self.checked_int_rr(operand_start, |a, b| (a as i64).checked_div(b as i64).map(|v| v as u64))?,
      OpCode::UDivRR => self.checked_int_rr(operand_start, u64::checked_div)?,
      OpCode::SRemRR => self.checked_int_rr(operand_start, |a, b| (a as i64).checked_rem(b as i64).map(|v| v as u64))?,
      OpCode::URemRR => self.checked_int_rr(operand_start, u64::checked_rem)?,
      OpCode::AndRR => self.int_rr(operand_start, |a, b| a & b)?,
      OpCode::OrRR => self.int_rr(operand_start, |a, b| a | b)?,
      OpCode::XorRR => self.int_rr(operand_start, |a, b| a ^ b)?,
      OpCode::ShlRR => self.int_rr(operand_start, |a, b| a.wrapping_shl(b as u32 & 63))?,
      OpCode::AShrRR => self.int_rr(operand_start, |a, b| ((a as i64).wrapping_shr(b as u32 & 63)) as u64)?,
      OpCode::LShrRR => self.int_rr(operand_start, |a, b| a.wrapping_shr(b as u32 & 63))?,
      OpCode::FAddRR => self.float_rr(operand_start, |a, b| a + b)?,
      OpCode::FSubRR => self.float_rr(operand_start, |a, b| a - b)?,
      OpCode::FMulRR => self.float_rr(operand_start, |a, b| a * b)?,
      OpCode::FDivRR => self.float_rr(operand_start, |a, b| a / b)?,
      OpCode::Neg => {
        let r = self.fetch_u8(operand_start)?;
        self.set_reg(r, (self.reg(r) as i64).wrapping_neg() as u64);
      }
      OpCode::Not => {
        let r = self.fetch_u8(operand_start)?;
        self.set_reg(r, !self.reg(r));
      }
      OpCode::FNeg => {
        let r = self.fetch_u8(operand_start)?;
        self.set_reg(r, (-f64::from_bits(self.reg(r))).to_bits());
      }
      OpCode::SExt | OpCode::ZExt | OpCode::Trunc => self.convert_int(op, operand_start)?,
      OpCode::ItoF => {
        let (dst, src) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
        self.set_reg(dst, (self.reg(src) as i64 as f64).to_bits());
      }
      OpCode::FtoI => {
        let (dst, src) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
        self.set_reg(dst, f64::from_bits(self.reg(src)) as i64 as u64);
      }
      OpCode::F32toF64 => {
        let (dst, src) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
        let f = f32::from_bits(self.reg(src) as u32);
        self.set_reg(dst, f64::from(f).to_bits());
      }
      OpCode::F64toF32 => {
        let (dst, src) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
        let f = f64::from_bits(self.reg(src));
        self.set_reg(dst, u64::from((f as f32).to_bits()));
      }
      OpCode::Terminate => return Ok(Some(self.reg(0))),
      OpCode::Trap => return Err(VmError::InvalidOpcode(op_byte)),
    }

    self.ip = next_ip;
    Ok(None)
  }

  fn jump_target(&self, operand_start: u32, cond: bool) -> VmResult<u32> {
    let dest = self.fetch_u32(operand_start)?;
    Ok(if cond { dest } else { operand_start + 4 })
  }

  fn call(&mut self, argc: u8, return_ip: u32) -> VmResult<()> {
    let args: Vec<u64> = (0..argc).map(|i| self.reg(i)).collect();
    self.program.call_stack.push(return_ip)?;
    for (i, v) in args.into_iter().enumerate() {
      self.set_reg(u8::try_from(i).unwrap_or(255), v);
    }
    Ok(())
  }

  fn compare_signed(&mut self, operand_start: u32) -> VmResult<()> {
    let (ra, rb) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
    let (a, b) = (self.reg(ra) as i64, self.reg(rb) as i64);
    self.flags = CompareFlags { less: a < b, equal: a == b };
    Ok(())
  }

  fn compare_unsigned(&mut self, operand_start: u32) -> VmResult<()> {
    let (ra, rb) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
    let (a, b) = (self.reg(ra), self.reg(rb));
    self.flags = CompareFlags { less: a < b, equal: a == b };
    Ok(())
  }

  fn compare_float(&mut self, operand_start: u32) -> VmResult<()> {
    let (ra, rb) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
    let (a, b) = (f64::from_bits(self.reg(ra)), f64::from_bits(self.reg(rb)));
    self.flags = CompareFlags { less: a < b, equal: a == b };
    Ok(())
  }

  fn set_from(&mut self, operand_start: u32, cond: bool) -> VmResult<()> {
    let dst = self.fetch_u8(operand_start)?;
    self.set_reg(dst, u64::from(cond));
    Ok(())
  }

  fn int_rr(&mut self, operand_start: u32, f: impl Fn(u64, u64) -> u64) -> VmResult<()> {
    let (ra, rb) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
    self.set_reg(ra, f(self.reg(ra), self.reg(rb)));
    Ok(())
  }

  fn checked_int_rr(&mut self, operand_start: u32, f: impl Fn(u64, u64) -> Option<u64>) -> VmResult<()> {
    let (ra, rb) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
    let result = f(self.reg(ra), self.reg(rb)).ok_or(VmError::DivideByZero)?;
    self.set_reg(ra, result);
    Ok(())
  }

  fn float_rr(&mut self, operand_start: u32, f: impl Fn(f64, f64) -> f64) -> VmResult<()> {
    let (ra, rb) = (self.fetch_u8(operand_start)?, self.fetch_u8(operand_start + 1)?);
    let result = f(f64::from_bits(self.reg(ra)), f64::from_bits(self.reg(rb)));
    self.set_reg(ra, result.to_bits());
    Ok(())
  }

  /// `SExt`/`ZExt`/`Trunc` each carry their source/destination integer
  /// width as a trailing byte pair (see `types::bytecode::OpCode::
  /// operand_size`): mask to the source width first, then sign- or
  /// zero-extend (or simply re-mask, for `Trunc`) to the destination
  /// width.
  fn convert_int(&mut self, op: OpCode, operand_start: u32) -> VmResult<()> {
    let dst = self.fetch_u8(operand_start)?;
    let src = self.fetch_u8(operand_start + 1)?;
    let from_width = self.fetch_u8(operand_start + 2)? as u32 * 8;
    let to_width = self.fetch_u8(operand_start + 3)? as u32 * 8;
    let raw = self.reg(src);
    let narrowed = if from_width >= 64 { raw } else { raw & ((1u64 << from_width) - 1) };
    let value = match op {
      OpCode::SExt if from_width < 64 => {
        let shift = 64 - from_width;
        (((narrowed << shift) as i64) >> shift) as u64
      }
      _ => narrowed,
    };
    let result = if to_width >= 64 { value } else { value & ((1u64 << to_width) - 1) };
    self.set_reg(dst, result);
    Ok(())
  }
}
