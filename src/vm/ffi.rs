//! Foreign-function calls (§4.5 "`CallExt` invokes a foreign function
//! through a `libffi` call interface"). Grounded in
//! `original_source/src/svm/VirtualMachine.cc`'s `toLibFFI`/
//! `initForeignFunction`/`loadForeignFunctions`: one `ffi_cif` built per
//! declared foreign function via `ffi_prep_cif`, resolved out of a
//! `dlopen`ed library by name. `libffi`'s `middle` API is this crate's
//! safe-ish wrapper around exactly that C API; `libloading` stands in for
//! `VirtualMachine.cc`'s own small `dlopen`/`dlsym` wrapper (`loadLibrary`).

use std::collections::HashMap;
use std::path::Path;

use libffi::middle::{Arg, Cif, CodePtr, Type};
use libloading::{Library, Symbol};

use crate::types::bytecode::{FfiSignature, FfiType, ForeignDecl};
use crate::vm::error::{VmError, VmResult};
use crate::vm::memory::Memory;

fn ffi_type(t: &FfiType) -> Type {
  match t {
    FfiType::Void => Type::void(),
    FfiType::U8 => Type::u8(),
    FfiType::I8 => Type::i8(),
    FfiType::U16 => Type::u16(),
    FfiType::I16 => Type::i16(),
    FfiType::U32 => Type::u32(),
    FfiType::I32 => Type::i32(),
    FfiType::U64 => Type::u64(),
    FfiType::I64 => Type::i64(),
    FfiType::F32 => Type::f32(),
    FfiType::F64 => Type::f64(),
    FfiType::Pointer => Type::pointer(),
    FfiType::Struct(fields) => Type::structure(fields.iter().map(ffi_type)),
  }
}

/// One resolved foreign function: the call interface built once up front
/// (mirrors `initForeignFunction`'s one-time `ffi_prep_cif`) and the raw
/// code pointer `dlsym` handed back.
struct ForeignFn {
  cif: Cif,
  code: CodePtr,
  sig: FfiSignature,
}

/// Owns every `dlopen`ed library for the binary's lifetime — `libffi`'s
/// `CodePtr`s are only valid while the library that exported them stays
/// mapped, same as `VirtualMachine.cc` keeping `dylibs` alive alongside
/// its `foreignFunctionTable`.
pub struct ForeignTable {
  _libs: Vec<Library>,
  /// Indexed by `ForeignDecl::slot_index`, the same index `CallExt`'s
  /// operand names — `build_bytecode.rs` assigns slots by push order, so
  /// `decls[i].slot_index == i` always holds.
  fns: Vec<ForeignFn>,
}

impl ForeignTable {
  /// Loads every distinct declared library once and resolves each
  /// function by name out of it.
  pub fn load(decls: &[ForeignDecl], libdir: &Path) -> VmResult<Self> {
    let mut libs: Vec<Library> = Vec::new();
    let mut lib_index: HashMap<&str, usize> = HashMap::new();
    for decl in decls {
      lib_index.entry(decl.lib_name.as_str()).or_insert_with(|| {
        let path = libdir.join(&decl.lib_name);
        let lib = unsafe { Library::new(&path) }
          .unwrap_or_else(|_| panic!("foreign library {:?} failed to load", decl.lib_name));
        libs.push(lib);
        libs.len() - 1
      });
    }

    let mut fns = Vec::with_capacity(decls.len());
    for decl in decls {
      let lib = &libs[lib_index[decl.lib_name.as_str()]];
      let sym: Symbol<'_, unsafe extern "C" fn()> = unsafe { lib.get(decl.ffi_name.as_bytes()) }
        .map_err(|e| VmError::Ffi(decl.ffi_name.clone(), e.to_string()))?;
      let code = CodePtr::from_ptr((*sym as *const ()).cast());
      let arg_types: Vec<Type> = decl.signature.args.iter().map(ffi_type).collect();
      let cif = Cif::new(arg_types, ffi_type(&decl.signature.ret));
      fns.push(ForeignFn { cif, code, sig: decl.signature.clone() });
    }

    Ok(Self { _libs: libs, fns })
  }

  /// Invokes the foreign function at `slot`. `args` are the caller's raw
  /// register words; a `Pointer`-typed argument names a virtual address,
  /// not a host one — `vm::memory::Memory` addresses static and heap data
  /// in two disjoint spaces neither of which a native callee understands —
  /// so each is translated through `mem.host_ptr` first
  /// (`dereferenceFFIPtrArg`'s counterpart) rather than passed through raw.
  pub fn call(&self, slot: u32, args: &[u64], mem: &mut Memory) -> VmResult<u64> {
    let f = self.fns.get(slot as usize).ok_or(VmError::InvalidForeignSlot(slot))?;
    let floats32: Vec<f32> = args.iter().map(|&w| f32::from_bits(w as u32)).collect();
    let floats64: Vec<f64> = args.iter().map(|&w| f64::from_bits(w)).collect();
    let mut ptrs: Vec<*mut u8> = vec![std::ptr::null_mut(); args.len()];
    for (i, ty) in f.sig.args.iter().enumerate() {
      if matches!(ty, FfiType::Pointer) { ptrs[i] = mem.host_ptr(args[i])?; }
    }
    let ffi_args: Vec<Arg> = f.sig.args.iter().enumerate().map(|(i, ty)| match ty {
      FfiType::F32 => Arg::new(&floats32[i]),
      FfiType::F64 => Arg::new(&floats64[i]),
      FfiType::Pointer => Arg::new(&ptrs[i]),
      _ => Arg::new(&args[i]),
    }).collect();
    Ok(unsafe { f.cif.call::<u64>(f.code, &ffi_args) })
  }
}
