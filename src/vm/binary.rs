//! Loading a produced `types::bytecode::Binary` into a fresh VM (§6
//! "Bytecode binary format" → §4.5 "execution"). Grounded in
//! `original_source/src/svm/VirtualMachine.cc::loadBinary`: copy the
//! code+data section into the static region, resolve foreign declarations,
//! and fail fast if there's no declared entry point.

use std::path::Path;

use crate::types::bytecode::Binary;
use crate::vm::error::{VmError, VmResult};
use crate::vm::ffi::ForeignTable;
use crate::vm::frame::CallStack;
use crate::vm::host::FileTable;
use crate::vm::memory::Memory;

/// Default reserved stack size, mirroring `VirtualMachine`'s own
/// constructor default.
pub const DEFAULT_STACK_SIZE: u64 = 1 << 20;

/// Default call-frame depth ceiling.
pub const DEFAULT_MAX_DEPTH: usize = 4096;

pub struct LoadedProgram {
  pub memory: Memory,
  pub foreign: ForeignTable,
  pub files: FileTable,
  pub call_stack: CallStack,
  pub entry: u32,
  pub data_offset: u32,
}

/// Loads `binary` with foreign libraries resolved out of `libdir`. Returns
/// [`VmError::NoEntryPoint`] if the binary has no `main`, matching §6's "no
/// entry" sentinel.
pub fn load(binary: &Binary, libdir: &Path) -> VmResult<LoadedProgram> {
  let entry = binary.start.ok_or(VmError::NoEntryPoint)?;
  let memory = Memory::new(binary.code_and_data.clone(), DEFAULT_STACK_SIZE);
  let foreign = ForeignTable::load(&binary.foreign, libdir)?;
  Ok(LoadedProgram {
    memory,
    foreign,
    files: FileTable::default(),
    call_stack: CallStack::new(DEFAULT_MAX_DEPTH),
    entry,
    data_offset: binary.data_offset,
  })
}
