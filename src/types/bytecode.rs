//! The bytecode wire format (§4.5, §6): opcodes and the binary layout
//! shared between the emitter (`build_bytecode.rs`) and the interpreter
//! (`vm::interp`). Grounded in `original_source/src/svm/ExecutionInstDef.h`
//! and `include/svm/OpCode.def.h`'s opcode catalogue.

use byteorder::{LE, ByteOrder};

/// A single 8-bit opcode (§4.5 "A single 8-bit opcode followed by inline
/// operands"). Variants are grouped below by instruction category.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
  // -- moves --
  MovRR = 0, MovRV, MovMR, MovRM,
  CondMovRR, CondMovRV, CondMovRM,
  // -- addressing --
  Lea,
  // -- stack --
  SAlloc,
  // -- calls --
  Call, ICallR, ICallM, Ret, CallExt, CallBuiltin,
  // -- control flow --
  Jmp, Jz, Jnz, Je, Jne, Jl, Jle, Jg, Jge,
  // -- compare/test/set --
  // Three typed compare opcodes rather than one, mirroring the distinct
  // `ucmp*`/`scmp*`/`fcmp*` instruction families: the sign/floatness of a
  // comparison changes how its raw register bits are ordered, so it must be
  // a property of the opcode rather than something `interp` infers from
  // context it doesn't have. Equality (`Eq`/`Ne`) needs no such split since
  // bit-pattern equality is the same test for every representation.
  ICmpS, ICmpU, FCmp, CmpRV, TestR, SetZ, SetNz, SetE, SetNe, SetL, SetLe, SetG, SetGe,
  // -- arithmetic (signed/unsigned/float, 32/64) --
  AddRR, SubRR, MulRR, SDivRR, UDivRR, SRemRR, URemRR,
  AndRR, OrRR, XorRR, ShlRR, AShrRR, LShrRR,
  FAddRR, FSubRR, FMulRR, FDivRR,
  Neg, Not, FNeg,
  // -- conversions --
  SExt, ZExt, Trunc, ItoF, FtoI, F32toF64, F64toF32,
  // -- termination --
  Terminate, Trap,
}

impl OpCode {
  #[must_use] pub fn from_u8(b: u8) -> Option<OpCode> {
    if b <= OpCode::Trap as u8 { Some(unsafe { std::mem::transmute::<u8, OpCode>(b) }) } else { None }
  }

  /// Number of operand bytes following the opcode, excluding the opcode
  /// byte itself; a fixed per-opcode payload size (§6).
  #[must_use] pub fn operand_size(self) -> usize {
    use OpCode::*;
    match self {
      Ret | Terminate | Trap => 0,
      SetZ | SetNz | SetE | SetNe | SetL | SetLe | SetG | SetGe | Not | FNeg | Neg => 1,
      CondMovRR | TestR | ItoF | FtoI | F32toF64 | F64toF32 => 2,
      // `SExt`/`ZExt`/`Trunc` additionally carry the source and destination
      // integer width (one byte each, holding the width in bytes: 1/2/4/8)
      // — unlike `ItoF`/`FtoI`/the float-width conversions, which convert
      // between a single fixed pair of representations each, a bare
      // register-to-register integer move can't tell a zero/sign-extend
      // from a truncation without knowing both widths.
      SExt | ZExt | Trunc => 4,
      ICmpS | ICmpU | FCmp | AddRR | SubRR | MulRR | SDivRR | UDivRR | SRemRR | URemRR |
      AndRR | OrRR | XorRR | ShlRR | AShrRR | LShrRR | FAddRR | FSubRR | FMulRR | FDivRR => 2,
      CondMovRV => 9,
      MovRR => 2,
      MovRV => 9,
      // A `MemOperand` (base, offset-count, multiplier, inner-offset) is
      // 1 + 1 + 4 + 8 = 14 bytes on the wire (see `MemOperand::encode`);
      // `Lea`/`SAlloc` add the destination register, `MovMR`/`MovRM`/
      // `CondMovRM`/`ICallM` add the other register or arg count.
      Lea | SAlloc => 14 + 1,
      MovMR | MovRM | CondMovRM => 14 + 1,
      CmpRV => 9,
      Call => 5,
      ICallR => 2,
      ICallM => 14 + 1,
      CallExt | CallBuiltin => 4,
      Jmp | Jz | Jnz | Je | Jne | Jl | Jle | Jg | Jge => 4,
    }
  }

  #[must_use] pub fn is_terminal(self) -> bool {
    matches!(self, OpCode::Call | OpCode::ICallR | OpCode::ICallM | OpCode::Ret | OpCode::Terminate | OpCode::Trap)
  }
}

/// A memory operand, formed from a base register, an offset-count
/// register, a constant multiplier and a constant inner offset (§4.5):
/// `addr = reg[base] + innerOffset + reg[offsetCount] * multiplier`.
#[derive(Clone, Copy, Debug)]
pub struct MemOperand {
  pub base: u8,
  pub offset_count: u8,
  pub multiplier: i32,
  pub inner_offset: i64,
}

impl MemOperand {
  pub const NO_OFFSET_COUNT: u8 = 0xFF;

  pub fn encode(&self, out: &mut Vec<u8>) {
    out.push(self.base);
    out.push(self.offset_count);
    let mut buf4 = [0u8; 4];
    LE::write_i32(&mut buf4, self.multiplier);
    out.extend_from_slice(&buf4);
    let mut buf8 = [0u8; 8];
    LE::write_i64(&mut buf8, self.inner_offset);
    out.extend_from_slice(&buf8);
  }

  #[must_use] pub fn decode(bytes: &[u8]) -> (MemOperand, &[u8]) {
    let base = bytes[0];
    let offset_count = bytes[1];
    let multiplier = LE::read_i32(&bytes[2..6]);
    let inner_offset = LE::read_i64(&bytes[6..14]);
    (MemOperand { base, offset_count, multiplier, inner_offset }, &bytes[14..])
  }
}

/// A foreign-library declaration (§4.5, §6): `(lib-name, { ffi-name,
/// signature, slot-index })`.
#[derive(Clone, Debug)]
pub struct ForeignDecl {
  pub lib_name: String,
  pub ffi_name: String,
  pub signature: FfiSignature,
  pub slot_index: u32,
}

/// A minimal description of an FFI signature sufficient to build a
/// `libffi` call interface (§4.5 "builds a libffi call interface per FFI
/// signature").
#[derive(Clone, Debug)]
pub struct FfiSignature {
  pub args: Vec<FfiType>,
  pub ret: FfiType,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FfiType { Void, U8, I8, U16, I16, U32, I32, U64, I64, F32, F64, Pointer, Struct(Vec<FfiType>) }

/// A produced binary (§6 "Bytecode binary format"): a header, a flat
/// code+data section, a start-address offset, and foreign-library
/// declarations.
#[derive(Clone, Debug)]
pub struct Binary {
  pub code_and_data: Vec<u8>,
  /// `None` is the "no entry" sentinel of §6.
  pub start: Option<u32>,
  pub foreign: Vec<ForeignDecl>,
  /// Size, in bytes, of the static-data region at the tail of
  /// `code_and_data` (everything before it is executable code).
  pub data_offset: u32,
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn opcode_round_trips() {
    for b in 0..=(OpCode::Trap as u8) {
      assert_eq!(OpCode::from_u8(b).map(|o| o as u8), Some(b));
    }
    assert_eq!(OpCode::from_u8(200), None);
  }

  #[test]
  fn mem_operand_round_trips() {
    let m = MemOperand { base: 3, offset_count: 5, multiplier: 8, inner_offset: -16 };
    let mut buf = Vec::new();
    m.encode(&mut buf);
    let (decoded, rest) = MemOperand::decode(&buf);
    assert!(rest.is_empty());
    assert_eq!(decoded.base, 3);
    assert_eq!(decoded.offset_count, 5);
    assert_eq!(decoded.multiplier, 8);
    assert_eq!(decoded.inner_offset, -16);
  }
}
