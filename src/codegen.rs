//! Serializes a `types::bytecode::Binary` to the on-disk container format
//! §6 calls the "bytecode binary format": a header, the flat code+data
//! section, a start-address offset (or the "no entry" sentinel), and the
//! foreign-library declaration list. Grounded in `mmcc`'s own
//! `LinkedCode::write_elf` for the overall shape of a linker-stage writer
//! (header, then sections, via `byteorder`'s `LE` writes) — generalized
//! from an ELF executable header to this backend's own flat container
//! since the target is `vm::binary::load`, not the host OS's loader.

use std::io::{self, Read, Write};

use byteorder::{LE, ReadBytesExt, WriteBytesExt};

use crate::types::bytecode::{Binary, FfiSignature, FfiType, ForeignDecl};

/// Distinguishes this backend's own binaries from other byte streams
/// (an ELF header's `0x7f 'E' 'L' 'F'` plays the same role in the
/// teacher's format).
const MAGIC: [u8; 4] = *b"SCBC";
const VERSION: u32 = 1;
/// Sentinel `start` value on the wire standing in for `Binary::start ==
/// None` (§6 "the sentinel 'no entry'") — `u32::MAX` is never a valid code
/// offset since `code_and_data` can't reach that size in any binary this
/// backend could plausibly emit.
const NO_ENTRY: u32 = u32::MAX;

/// Writes `binary` as a complete container: magic, version, then the
/// code+data section length and bytes, the data-section offset, the start
/// offset (or [`NO_ENTRY`]), and the foreign-declaration table.
pub fn write_binary(binary: &Binary, w: &mut impl Write) -> io::Result<()> {
  w.write_all(&MAGIC)?;
  w.write_u32::<LE>(VERSION)?;
  w.write_u32::<LE>(u32::try_from(binary.code_and_data.len()).expect("binary exceeds 4 GiB"))?;
  w.write_all(&binary.code_and_data)?;
  w.write_u32::<LE>(binary.data_offset)?;
  w.write_u32::<LE>(binary.start.unwrap_or(NO_ENTRY))?;
  w.write_u32::<LE>(u32::try_from(binary.foreign.len()).expect("too many foreign declarations"))?;
  for decl in &binary.foreign {
    write_string(w, &decl.lib_name)?;
    write_string(w, &decl.ffi_name)?;
    w.write_u32::<LE>(decl.slot_index)?;
    write_signature(w, &decl.signature)?;
  }
  Ok(())
}

fn write_string(w: &mut impl Write, s: &str) -> io::Result<()> {
  w.write_u32::<LE>(u32::try_from(s.len()).expect("identifier too long"))?;
  w.write_all(s.as_bytes())
}

fn write_signature(w: &mut impl Write, sig: &FfiSignature) -> io::Result<()> {
  w.write_u32::<LE>(u32::try_from(sig.args.len()).expect("too many arguments"))?;
  for arg in &sig.args { write_ffi_type(w, arg)? }
  write_ffi_type(w, &sig.ret)
}

fn write_ffi_type(w: &mut impl Write, ty: &FfiType) -> io::Result<()> {
  let tag: u8 = match ty {
    FfiType::Void => 0, FfiType::U8 => 1, FfiType::I8 => 2, FfiType::U16 => 3, FfiType::I16 => 4,
    FfiType::U32 => 5, FfiType::I32 => 6, FfiType::U64 => 7, FfiType::I64 => 8,
    FfiType::F32 => 9, FfiType::F64 => 10, FfiType::Pointer => 11, FfiType::Struct(_) => 12,
  };
  w.write_u8(tag)?;
  if let FfiType::Struct(fields) = ty {
    w.write_u32::<LE>(u32::try_from(fields.len()).expect("too many struct fields"))?;
    for f in fields { write_ffi_type(w, f)? }
  }
  Ok(())
}

#[derive(Debug)]
pub enum ReadBinaryError {
  Io(io::Error),
  BadMagic,
  UnsupportedVersion(u32),
  MalformedFfiType(u8),
}

impl std::fmt::Display for ReadBinaryError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      ReadBinaryError::Io(e) => write!(f, "{e}"),
      ReadBinaryError::BadMagic => write!(f, "not a bytecode binary (bad magic)"),
      ReadBinaryError::UnsupportedVersion(v) => write!(f, "unsupported binary version {v}"),
      ReadBinaryError::MalformedFfiType(tag) => write!(f, "malformed FFI type tag {tag:#04x}"),
    }
  }
}

impl std::error::Error for ReadBinaryError {}

impl From<io::Error> for ReadBinaryError {
  fn from(e: io::Error) -> Self { ReadBinaryError::Io(e) }
}

/// Reads back a `Binary` written by [`write_binary`] — the inverse
/// direction, so a produced binary can be round-tripped the way the
/// library descriptor format is (§8).
pub fn read_binary(r: &mut impl Read) -> Result<Binary, ReadBinaryError> {
  let mut magic = [0u8; 4];
  r.read_exact(&mut magic)?;
  if magic != MAGIC { return Err(ReadBinaryError::BadMagic) }
  let version = r.read_u32::<LE>()?;
  if version != VERSION { return Err(ReadBinaryError::UnsupportedVersion(version)) }

  let code_len = r.read_u32::<LE>()? as usize;
  let mut code_and_data = vec![0u8; code_len];
  r.read_exact(&mut code_and_data)?;
  let data_offset = r.read_u32::<LE>()?;
  let start_raw = r.read_u32::<LE>()?;
  let start = if start_raw == NO_ENTRY { None } else { Some(start_raw) };

  let foreign_count = r.read_u32::<LE>()?;
  let mut foreign = Vec::with_capacity(foreign_count as usize);
  for _ in 0..foreign_count {
    let lib_name = read_string(r)?;
    let ffi_name = read_string(r)?;
    let slot_index = r.read_u32::<LE>()?;
    let signature = read_signature(r)?;
    foreign.push(ForeignDecl { lib_name, ffi_name, signature, slot_index });
  }

  Ok(Binary { code_and_data, start, foreign, data_offset })
}

fn read_string(r: &mut impl Read) -> Result<String, ReadBinaryError> {
  let len = r.read_u32::<LE>()? as usize;
  let mut buf = vec![0u8; len];
  r.read_exact(&mut buf)?;
  Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn read_signature(r: &mut impl Read) -> Result<FfiSignature, ReadBinaryError> {
  let argc = r.read_u32::<LE>()?;
  let mut args = Vec::with_capacity(argc as usize);
  for _ in 0..argc { args.push(read_ffi_type(r)?) }
  let ret = read_ffi_type(r)?;
  Ok(FfiSignature { args, ret })
}

fn read_ffi_type(r: &mut impl Read) -> Result<FfiType, ReadBinaryError> {
  let tag = r.read_u8()?;
  Ok(match tag {
    0 => FfiType::Void, 1 => FfiType::U8, 2 => FfiType::I8, 3 => FfiType::U16, 4 => FfiType::I16,
    5 => FfiType::U32, 6 => FfiType::I32, 7 => FfiType::U64, 8 => FfiType::I64,
    9 => FfiType::F32, 10 => FfiType::F64, 11 => FfiType::Pointer,
    12 => {
      let count = r.read_u32::<LE>()?;
      let mut fields = Vec::with_capacity(count as usize);
      for _ in 0..count { fields.push(read_ffi_type(r)?) }
      FfiType::Struct(fields)
    }
    other => return Err(ReadBinaryError::MalformedFfiType(other)),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn sample() -> Binary {
    Binary {
      code_and_data: vec![OpcodeStub::RET, 0, 0, 1, 2, 3, 4],
      start: Some(0),
      data_offset: 1,
      foreign: vec![ForeignDecl {
        lib_name: "libm.so".into(),
        ffi_name: "sqrt".into(),
        slot_index: 0,
        signature: FfiSignature { args: vec![FfiType::F64], ret: FfiType::F64 },
      }],
    }
  }

  // Stand-in for a real opcode byte — this module doesn't care what the
  // bytes mean, only that they round-trip.
  struct OpcodeStub;
  impl OpcodeStub { const RET: u8 = 0; }

  #[test]
  fn binary_round_trips_through_the_container_format() {
    let original = sample();
    let mut buf = Vec::new();
    write_binary(&original, &mut buf).unwrap();
    let read_back = read_binary(&mut &buf[..]).unwrap();
    assert_eq!(read_back.code_and_data, original.code_and_data);
    assert_eq!(read_back.start, original.start);
    assert_eq!(read_back.data_offset, original.data_offset);
    assert_eq!(read_back.foreign.len(), 1);
    assert_eq!(read_back.foreign[0].ffi_name, "sqrt");
    assert_eq!(read_back.foreign[0].signature.args, vec![FfiType::F64]);
  }

  #[test]
  fn no_entry_sentinel_round_trips_to_none() {
    let mut binary = sample();
    binary.start = None;
    let mut buf = Vec::new();
    write_binary(&binary, &mut buf).unwrap();
    assert_eq!(read_binary(&mut &buf[..]).unwrap().start, None);
  }

  #[test]
  fn bad_magic_is_rejected() {
    let buf = vec![0u8; 16];
    assert!(matches!(read_binary(&mut &buf[..]), Err(ReadBinaryError::BadMagic)));
  }
}
