//! Virtual address space (§4.5, §6): a contiguous static region (the
//! loaded binary's code+data, immediately followed by the call stack) and a
//! separately addressed heap of slot-indexed allocations. Grounded in
//! `original_source/src/svm/VirtualMachine.cc` (`loadBinary`'s static-region
//! layout, `allocateMemory`/`deallocateMemory`/`mapMemory`) and
//! `Memory.h`'s `load`/`store` byte-copy primitives.

use crate::vm::error::{VmError, VmResult};

/// Heap addresses are tagged with a high bit so a pointer's origin (static
/// region vs. heap slot) is recoverable from the address alone, the same
/// distinction `VirtualMachine::validPtrRange` draws between the static
/// blob and `allocateMemory`'s returned pointers.
const HEAP_TAG: u64 = 1 << 63;

/// One heap allocation. `None` once deallocated — the slot index stays
/// assigned so existing (now-dangling) pointers fail `dereference` instead
/// of aliasing whatever later reuses the slot.
type HeapSlot = Option<Vec<u8>>;

pub struct Memory {
  /// Code, data and stack, addressed `0..static.len()` directly (this is
  /// also how `Lea`/`MovRM`/`MovMR`'s `MemOperand` addresses work: a base
  /// register holding a raw `u64` offset into this region).
  static_region: Vec<u8>,
  /// Byte offset within `static_region` where the call stack begins; grows
  /// upward from here via `SAlloc` (`lincsp`'s "bump the stack pointer"
  /// discipline).
  pub stack_base: u64,
  pub stack_top: u64,
  heap: Vec<HeapSlot>,
}

impl Memory {
  /// `code_and_data` is the binary's static region verbatim; `stack_size`
  /// bytes are reserved immediately after it for the call stack, matching
  /// `VirtualMachine`'s constructor reserving a fixed stack region adjacent
  /// to the loaded binary.
  #[must_use] pub fn new(code_and_data: Vec<u8>, stack_size: u64) -> Self {
    let stack_base = code_and_data.len() as u64;
    let mut static_region = code_and_data;
    static_region.resize((stack_base + stack_size) as usize, 0);
    Self { static_region, stack_base, stack_top: stack_base, heap: Vec::new() }
  }

  fn is_heap(addr: u64) -> bool { addr & HEAP_TAG != 0 }

  fn heap_index(addr: u64) -> usize { (addr & !HEAP_TAG) as usize }

  fn slice(&self, addr: u64, len: u64) -> VmResult<&[u8]> {
    if Self::is_heap(addr) {
      let idx = Self::heap_index(addr);
      let alloc = self.heap.get(idx).and_then(|s| s.as_ref())
        .ok_or(VmError::DanglingPointer(addr))?;
      if len > alloc.len() as u64 { return Err(VmError::OutOfBounds { addr, len }) }
      Ok(&alloc[..len as usize])
    } else {
      let end = addr.checked_add(len).ok_or(VmError::OutOfBounds { addr, len })?;
      if end > self.static_region.len() as u64 { return Err(VmError::OutOfBounds { addr, len }) }
      Ok(&self.static_region[addr as usize..end as usize])
    }
  }

  fn slice_mut(&mut self, addr: u64, len: u64) -> VmResult<&mut [u8]> {
    if Self::is_heap(addr) {
      let idx = Self::heap_index(addr);
      let alloc = self.heap.get_mut(idx).and_then(|s| s.as_mut())
        .ok_or(VmError::DanglingPointer(addr))?;
      if len > alloc.len() as u64 { return Err(VmError::OutOfBounds { addr, len }) }
      Ok(&mut alloc[..len as usize])
    } else {
      let end = addr.checked_add(len).ok_or(VmError::OutOfBounds { addr, len })?;
      if end > self.static_region.len() as u64 { return Err(VmError::OutOfBounds { addr, len }) }
      Ok(&mut self.static_region[addr as usize..end as usize])
    }
  }

  /// Byte-copies `N` bytes at `addr` into a little-endian `u64`-sized
  /// value, the generic load `Memory.h` provides for every scalar width the
  /// VM moves through registers.
  pub fn load(&self, addr: u64, width: usize) -> VmResult<u64> {
    let bytes = self.slice(addr, width as u64)?;
    let mut buf = [0u8; 8];
    buf[..width].copy_from_slice(bytes);
    Ok(u64::from_le_bytes(buf))
  }

  pub fn store(&mut self, addr: u64, value: u64, width: usize) -> VmResult<()> {
    let bytes = value.to_le_bytes();
    self.slice_mut(addr, width as u64)?.copy_from_slice(&bytes[..width]);
    Ok(())
  }

  pub fn read_bytes(&self, addr: u64, len: u64) -> VmResult<Vec<u8>> {
    self.slice(addr, len).map(<[u8]>::to_vec)
  }

  pub fn write_bytes(&mut self, addr: u64, data: &[u8]) -> VmResult<()> {
    self.slice_mut(addr, data.len() as u64)?.copy_from_slice(data);
    Ok(())
  }

  /// Reads a NUL-terminated byte string starting at `addr`, the shape every
  /// builtin taking a `char*` path argument expects (`sys_open`,
  /// `sys_create`, `strlen`).
  pub fn read_cstr(&self, addr: u64) -> VmResult<Vec<u8>> {
    if Self::is_heap(addr) {
      let idx = Self::heap_index(addr);
      let alloc = self.heap.get(idx).and_then(|s| s.as_ref()).ok_or(VmError::DanglingPointer(addr))?;
      Ok(alloc.iter().take_while(|&&b| b != 0).copied().collect())
    } else {
      let start = addr as usize;
      let region = &self.static_region;
      let end = region[start..].iter().position(|&b| b == 0)
        .map(|i| start + i)
        .ok_or(VmError::OutOfBounds { addr, len: 0 })?;
      Ok(region[start..end].to_vec())
    }
  }

  /// Grows the stack by `bytes` (rounded up to 8-byte alignment — the
  /// existing `SAlloc` emission doesn't guarantee a pre-rounded size),
  /// returning the pointer to the newly reserved region, mirroring
  /// `lincsp`'s stack-pointer bump.
  pub fn alloc_stack(&mut self, bytes: u64) -> VmResult<u64> {
    let rounded = (bytes + 7) & !7;
    let ptr = self.stack_top;
    let new_top = ptr.checked_add(rounded).ok_or(VmError::StackOverflow(usize::MAX))?;
    if new_top > self.static_region.len() as u64 {
      return Err(VmError::StackOverflow((new_top - self.stack_base) as usize));
    }
    self.static_region.resize(new_top as usize, 0);
    self.stack_top = new_top;
    Ok(ptr)
  }

  /// Heap allocation for `__builtin_alloc` (`IntrinsicProc::Alloc`),
  /// tagging the returned address so later loads/stores route to the heap
  /// slot rather than the static region.
  pub fn alloc_heap(&mut self, size: u64) -> u64 {
    self.heap.push(Some(vec![0u8; size as usize]));
    (self.heap.len() as u64 - 1) | HEAP_TAG
  }

  /// `__builtin_dealloc` (`IntrinsicProc::Dealloc`): frees the slot's
  /// backing bytes but keeps the slot index reserved, so any pointer still
  /// held to it dereferences as `DanglingPointer` rather than silently
  /// reading whatever a later allocation reuses the index for.
  pub fn dealloc_heap(&mut self, addr: u64) -> VmResult<()> {
    if !Self::is_heap(addr) { return Err(VmError::DanglingPointer(addr)) }
    let idx = Self::heap_index(addr);
    let slot = self.heap.get_mut(idx).ok_or(VmError::DanglingPointer(addr))?;
    if slot.is_none() { return Err(VmError::DanglingPointer(addr)) }
    *slot = None;
    Ok(())
  }

  /// Translates a virtual pointer into a real host pointer a foreign
  /// function can dereference — `vm::ffi`'s `dereferenceFFIPtrArg`
  /// counterpart. A virtual address is an offset into `static_region` or a
  /// tagged heap-slot index, neither of which a native callee understands,
  /// so every `Pointer`-typed FFI argument must be translated through here
  /// rather than passed through as the raw `u64` the way scalar arguments
  /// are. Valid only for the duration of the call this pointer is
  /// marshalled for — a later `alloc_heap`/`alloc_stack` can reallocate
  /// the backing storage and invalidate it.
  pub fn host_ptr(&mut self, addr: u64) -> VmResult<*mut u8> {
    if Self::is_heap(addr) {
      let idx = Self::heap_index(addr);
      let alloc = self.heap.get_mut(idx).and_then(Option::as_mut).ok_or(VmError::DanglingPointer(addr))?;
      Ok(alloc.as_mut_ptr())
    } else {
      if addr > self.static_region.len() as u64 { return Err(VmError::OutOfBounds { addr, len: 0 }) }
      Ok(unsafe { self.static_region.as_mut_ptr().add(addr as usize) })
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn load_store_round_trips_through_the_static_region() {
    let mut mem = Memory::new(vec![0; 16], 64);
    mem.store(4, 0xdead_beef, 4).unwrap();
    assert_eq!(mem.load(4, 4).unwrap(), 0xdead_beef);
  }

  #[test]
  fn heap_alloc_and_dealloc_round_trip() {
    let mut mem = Memory::new(vec![], 0);
    let ptr = mem.alloc_heap(8);
    mem.store(ptr, 42, 8).unwrap();
    assert_eq!(mem.load(ptr, 8).unwrap(), 42);
    mem.dealloc_heap(ptr).unwrap();
    assert!(mem.load(ptr, 8).is_err());
  }

  #[test]
  fn stack_alloc_rounds_up_to_eight_bytes() {
    let mut mem = Memory::new(vec![0; 8], 64);
    let p0 = mem.alloc_stack(3).unwrap();
    let p1 = mem.alloc_stack(1).unwrap();
    assert_eq!(p1 - p0, 8);
  }

  #[test]
  fn out_of_bounds_static_access_errors() {
    let mem = Memory::new(vec![0; 4], 0);
    assert!(mem.load(100, 8).is_err());
  }
}
