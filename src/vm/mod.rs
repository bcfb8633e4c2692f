//! The bytecode virtual machine (§4.5, §6): loads a `types::bytecode::
//! Binary` and executes it. Grounded in `original_source/src/svm/
//! VirtualMachine.cc`'s public surface (`loadBinary`/`execute`/
//! `beginExecution`/`endExecution`) generalized to a single entry point,
//! since this backend has no separate assembler/loader tool driving the
//! VM interactively the way a standalone `svm` binary would.

pub mod binary;
pub mod error;
pub mod ffi;
pub mod frame;
pub mod host;
pub mod interp;
pub mod memory;

use std::path::Path;

use crate::types::bytecode::Binary;
use error::VmResult;
use interp::{ExecutionMode, Interpreter};

/// Loads and runs `binary` to completion, returning the value its entry
/// function's `Ret` produced. `libdir` is where foreign-library
/// declarations are resolved from (`VirtualMachine::setLibdir`'s
/// counterpart).
pub fn run(binary: &Binary, libdir: &Path) -> VmResult<u64> {
  let mut program = binary::load(binary, libdir)?;
  let mut vm = Interpreter::new(&mut program);
  vm.run(ExecutionMode::Default)
}
