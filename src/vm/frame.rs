//! Call frames (§4.5 "register window per call"). Grounded in
//! `original_source/src/svm/Execution.cc`'s `VMImpl::beginExecution`, which
//! reserves a fixed-size register window per call
//! (`MaxCallframeRegisterCount`) rather than sizing each frame to its
//! callee's actual register pressure — the wire format's flat, per-function
//! register numbering (no frame-offset encoded in `Call`/`ICallR`/`ICallM`)
//! only works if every frame gets the same constant-size window.

use crate::vm::error::{VmError, VmResult};

/// 256 matches the wire format's register operands, which are plain `u8`s
/// (see `types::bytecode::OpCode::operand_size`'s two-register opcodes) —
/// a register index can never exceed this regardless of frame size.
pub const REGISTER_COUNT: usize = 256;

/// One activation record: a fixed register window plus the return address
/// to resume at. Register 0 doubles as the argument-0 slot on entry and
/// the return-value slot on exit, per `build_bytecode.rs`'s calling
/// convention (`marshal_args` writes into `0..argc`; every call site emits
/// `MovRR(dst, 0)` right after the call instruction).
pub struct Frame {
  pub registers: [u64; REGISTER_COUNT],
  /// Byte offset in the code section to resume at after `Ret` pops this
  /// frame; `None` for the bottom (entry) frame, mirroring
  /// `VMImpl::beginExecution`'s `bottomReg == regPtr` root-frame check.
  pub return_ip: Option<u32>,
}

impl Frame {
  #[must_use] pub fn new(return_ip: Option<u32>) -> Self {
    Self { registers: [0; REGISTER_COUNT], return_ip }
  }
}

/// The call stack. Depth-bounded the same way a native stack is bounded by
/// its reserved size, since an unbounded `Vec<Frame>` would just move a
/// runaway-recursion crash from a stack-overflow signal to an OOM one.
pub struct CallStack {
  frames: Vec<Frame>,
  max_depth: usize,
}

impl CallStack {
  #[must_use] pub fn new(max_depth: usize) -> Self {
    Self { frames: vec![Frame::new(None)], max_depth }
  }

  pub fn push(&mut self, return_ip: u32) -> VmResult<()> {
    if self.frames.len() >= self.max_depth { return Err(VmError::StackOverflow(self.max_depth)) }
    self.frames.push(Frame::new(Some(return_ip)));
    Ok(())
  }

  /// Pops the current frame, returning its return address (`None` if this
  /// was the entry frame, meaning execution should halt) and its register-0
  /// value so the caller can copy it into the resumed frame.
  pub fn pop(&mut self) -> (Option<u32>, u64) {
    let popped = self.frames.pop().expect("call stack is never empty while executing");
    (popped.return_ip, popped.registers[0])
  }

  #[must_use] pub fn current(&self) -> &Frame { self.frames.last().expect("call stack is never empty") }

  pub fn current_mut(&mut self) -> &mut Frame { self.frames.last_mut().expect("call stack is never empty") }

  #[must_use] pub fn depth(&self) -> usize { self.frames.len() }

  #[must_use] pub fn is_at_entry(&self) -> bool { self.frames.len() == 1 }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn pop_reports_the_return_address_and_result_register() {
    let mut stack = CallStack::new(8);
    stack.push(0x40).unwrap();
    stack.current_mut().registers[0] = 99;
    let (ret_ip, result) = stack.pop();
    assert_eq!(ret_ip, Some(0x40));
    assert_eq!(result, 99);
    assert!(stack.is_at_entry());
  }

  #[test]
  fn deep_recursion_is_rejected_rather_than_growing_unbounded() {
    let mut stack = CallStack::new(4);
    for _ in 0..3 { stack.push(0).unwrap() }
    assert!(stack.push(0).is_err());
  }
}
