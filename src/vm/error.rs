//! Runtime failures the interpreter can hit (§4.5, §6 "Execution errors").
//! Grounded in `original_source/src/svm/ArithmeticOps.h`'s `ArithmeticError`
//! (divide/remainder by zero) and `VirtualMachine.cc`'s bounds/alignment
//! checks on memory and foreign/builtin slot indices.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum VmError {
  #[error("unknown opcode {0:#04x}")]
  InvalidOpcode(u8),
  #[error("division by zero")]
  DivideByZero,
  #[error("memory access of {len} bytes at address {addr:#x} is out of bounds")]
  OutOfBounds { addr: u64, len: u64 },
  #[error("memory access at address {addr:#x} is not {align}-byte aligned")]
  Misaligned { addr: u64, align: u64 },
  #[error("call stack overflow (depth exceeded {0})")]
  StackOverflow(usize),
  #[error("binary declares no start address")]
  NoEntryPoint,
  #[error("builtin slot {0} has no registered handler")]
  InvalidBuiltinSlot(u32),
  #[error("foreign slot {0} is out of range")]
  InvalidForeignSlot(u32),
  #[error("foreign call into {0:?} failed: {1}")]
  Ffi(String, String),
  #[error("heap pointer {0:#x} does not name a live allocation")]
  DanglingPointer(u64),
  #[error("I/O failure in builtin {name}: {source}")]
  Io { name: &'static str, #[source] source: std::io::Error },
}

pub type VmResult<T> = Result<T, VmError>;
