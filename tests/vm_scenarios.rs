//! A hand-built IR module exercising the "unique int" lifecycle of §8:
//! allocate, store, load, deallocate, return — run through the real
//! bytecode emitter and VM rather than through either module's own
//! in-isolation unit tests.

use scatha::build_bytecode::lower_module;
use scatha::symbol::intern;
use scatha::types::ir::{
  Callable, CallingConvention, Function, InstKind, Instruction, IrType, Module, Operand,
  Terminator, TypedConst,
};
use scatha::types::ty::IntWidth;

fn unique_int_round_trip_module() -> Module {
  let mut module = Module::new();
  let cc = CallingConvention { args: vec![], ret: vec![], val_ret: false };
  let mut f = Function::new(intern("main"), cc);
  let entry = f.entry;

  let ptr = f.new_value(IrType::Ptr);
  f.blocks[entry].push(Instruction {
    kind: InstKind::Alloc { size: Operand::Const(TypedConst::Int(IntWidth::W64, 8)), align: 8 },
    result: Some((ptr, IrType::Ptr)),
  });
  f.blocks[entry].push(Instruction {
    kind: InstKind::Store { addr: Operand::Value(ptr), value: Operand::Const(TypedConst::Int(IntWidth::W64, 42)) },
    result: None,
  });
  let loaded = f.new_value(IrType::Int(IntWidth::W64));
  f.blocks[entry].push(Instruction {
    kind: InstKind::Load { addr: Operand::Value(ptr), ty: IrType::Int(IntWidth::W64) },
    result: Some((loaded, IrType::Int(IntWidth::W64))),
  });
  f.blocks[entry].push(Instruction {
    kind: InstKind::Dealloc {
      ptr: Operand::Value(ptr),
      size: Operand::Const(TypedConst::Int(IntWidth::W64, 8)),
      align: 8,
    },
    result: None,
  });
  f.blocks[entry].term = Some(Terminator::Return(vec![Operand::Value(loaded)]));

  module.funcs.push(Callable::Function(f));
  module
}

#[test]
fn unique_int_allocates_stores_loads_and_deallocates_before_returning() {
  let module = unique_int_round_trip_module();
  let binary = lower_module(&module);
  let result = scatha::vm::run(&binary, std::path::Path::new(".")).expect("vm run should succeed");
  assert_eq!(result, 42);
}

/// A nested call: `main` calls `inner`, which computes a value into a
/// register other than its own r0 before returning, checking that only
/// the callee's r0 crosses back into the caller's frame (§8 "VM register
/// discipline").
fn nested_call_module() -> Module {
  let mut module = Module::new();

  let inner_cc = CallingConvention { args: vec![], ret: vec![], val_ret: false };
  let mut inner = Function::new(intern("inner"), inner_cc);
  let inner_entry = inner.entry;
  let scratch = inner.new_value(IrType::Int(IntWidth::W64));
  inner.blocks[inner_entry].push(Instruction {
    kind: InstKind::IntBin {
      op: scatha::types::ir::IntBinOp::Add,
      lhs: Operand::Const(TypedConst::Int(IntWidth::W64, 100)),
      rhs: Operand::Const(TypedConst::Int(IntWidth::W64, 1)),
      width: IntWidth::W64,
    },
    result: Some((scratch, IrType::Int(IntWidth::W64))),
  });
  let answer = inner.new_value(IrType::Int(IntWidth::W64));
  inner.blocks[inner_entry].push(Instruction {
    kind: InstKind::IntBin {
      op: scatha::types::ir::IntBinOp::Sub,
      lhs: Operand::Const(TypedConst::Int(IntWidth::W64, 42)),
      rhs: Operand::Const(TypedConst::Int(IntWidth::W64, 0)),
      width: IntWidth::W64,
    },
    result: Some((answer, IrType::Int(IntWidth::W64))),
  });
  inner.blocks[inner_entry].term = Some(Terminator::Return(vec![Operand::Value(answer)]));
  let inner_id = module.funcs.push(Callable::Function(inner));

  let main_cc = CallingConvention { args: vec![], ret: vec![], val_ret: false };
  let mut main = Function::new(intern("main"), main_cc);
  let main_entry = main.entry;
  let result = main.new_value(IrType::Int(IntWidth::W64));
  main.blocks[main_entry].push(Instruction {
    kind: InstKind::Call { callee: scatha::types::ir::CallTarget::Direct(inner_id), args: vec![] },
    result: Some((result, IrType::Int(IntWidth::W64))),
  });
  main.blocks[main_entry].term = Some(Terminator::Return(vec![Operand::Value(result)]));
  module.funcs.push(Callable::Function(main));

  module
}

#[test]
fn a_callees_scratch_registers_never_leak_into_the_callers_frame() {
  let module = nested_call_module();
  let binary = lower_module(&module);
  let result = scatha::vm::run(&binary, std::path::Path::new(".")).expect("vm run should succeed");
  assert_eq!(result, 42);
}
