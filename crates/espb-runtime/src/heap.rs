// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! a bounds-checked bump/free-list allocator standing in for the heap
//! manager (spec 1 lists the heap manager as an external collaborator;
//! this crate still needs *some* allocator behind ALLOCA and HEAP.* so it
//! is implemented here as a minimal first-fit allocator over a
//! grow-on-demand `Vec<u8>` buffer).
//!
//! heap allocations live in their own address range, offset by
//! [`HEAP_BASE`] from `memory_data` (spec 4.1's "LOAD/STORE address
//! resolution": "the address register may hold ... an absolute native
//! address ... when the heap is outside `memory_data`"). this crate has
//! no real native pointers to hand out (registers are a tagged enum, not
//! raw bytes), so a fixed offset is the simplest way to give heap and
//! linear-memory addresses disjoint, uniformly-`usize` ranges without
//! `unsafe`.

use std::collections::HashMap;

use espb_isa::{InterpreterError, InterpretResult, ResultCode};

/// heap addresses are `HEAP_BASE + local offset`; chosen far larger than
/// any embedded target's linear memory so the two ranges never collide.
pub const HEAP_BASE: usize = 0x1_0000_0000;

pub struct Heap {
    data: Vec<u8>,
    allocations: HashMap<usize, usize>,
    free_list: Vec<(usize, usize)>,
}

impl Heap {
    pub fn new() -> Self {
        Heap {
            data: Vec::new(),
            allocations: HashMap::new(),
            free_list: Vec::new(),
        }
    }

    pub fn is_heap_address(addr: usize) -> bool {
        addr >= HEAP_BASE
    }

    fn local_offset(addr: usize) -> InterpretResult<usize> {
        addr.checked_sub(HEAP_BASE).ok_or_else(|| {
            InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "address is not a heap address")
        })
    }

    /// first-fit allocation; falls back to growing the buffer when no free
    /// block is large enough.
    pub fn malloc(&mut self, size: usize) -> InterpretResult<usize> {
        if size == 0 {
            return Ok(HEAP_BASE);
        }
        if let Some(pos) = self.free_list.iter().position(|&(_, len)| len >= size) {
            let (offset, len) = self.free_list.remove(pos);
            if len > size {
                self.free_list.push((offset + size, len - size));
            }
            self.allocations.insert(offset, size);
            return Ok(HEAP_BASE + offset);
        }

        let offset = self.data.len();
        self.data.resize(offset + size, 0);
        self.allocations.insert(offset, size);
        Ok(HEAP_BASE + offset)
    }

    pub fn calloc(&mut self, count: usize, elem_size: usize) -> InterpretResult<usize> {
        let size = count.checked_mul(elem_size).ok_or_else(|| {
            InterpreterError::new(ResultCode::OutOfMemory, "calloc size overflow")
        })?;
        let addr = self.malloc(size)?;
        let offset = addr - HEAP_BASE;
        self.data[offset..offset + size].fill(0);
        Ok(addr)
    }

    pub fn realloc(&mut self, addr: usize, new_size: usize) -> InterpretResult<usize> {
        let old_offset = Self::local_offset(addr)?;
        let old_size = *self.allocations.get(&old_offset).ok_or_else(|| {
            InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "realloc of unknown pointer")
        })?;

        let new_addr = self.malloc(new_size)?;
        let new_offset = new_addr - HEAP_BASE;
        let copy_len = old_size.min(new_size);
        let snapshot: Vec<u8> = self.data[old_offset..old_offset + copy_len].to_vec();
        self.data[new_offset..new_offset + copy_len].copy_from_slice(&snapshot);

        self.free(addr)?;
        Ok(new_addr)
    }

    /// frees a pointer previously returned by `malloc`/`calloc`/`realloc`. the
    /// block's size is recovered from `allocations` rather than taken as a
    /// parameter, so a caller (e.g. the ALLOCA frame-release path, which only
    /// ever records pointers) cannot corrupt `free_list` with a wrong length.
    pub fn free(&mut self, addr: usize) -> InterpretResult<()> {
        let offset = Self::local_offset(addr)?;
        let size = self.allocations.remove(&offset).ok_or_else(|| {
            InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "double free or free of unknown pointer")
        })?;
        self.free_list.push((offset, size));
        Ok(())
    }

    pub fn read(&self, addr: usize, len: usize) -> InterpretResult<&[u8]> {
        let offset = Self::local_offset(addr)?;
        self.data.get(offset..offset + len).ok_or_else(|| {
            InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "heap read out of bounds")
        })
    }

    pub fn write(&mut self, addr: usize, bytes: &[u8]) -> InterpretResult<()> {
        let offset = Self::local_offset(addr)?;
        let slot = self.data.get_mut(offset..offset + bytes.len()).ok_or_else(|| {
            InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "heap write out of bounds")
        })?;
        slot.copy_from_slice(bytes);
        Ok(())
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn malloc_then_free_then_reuse() {
        let mut heap = Heap::new();
        let a = heap.malloc(16).unwrap();
        heap.free(a).unwrap();
        let b = heap.malloc(8).unwrap();
        assert_eq!(a, b, "first-fit should reuse the freed block");
    }

    #[test]
    fn realloc_preserves_contents() {
        let mut heap = Heap::new();
        let a = heap.malloc(4).unwrap();
        heap.write(a, &[1, 2, 3, 4]).unwrap();
        let b = heap.realloc(a, 8).unwrap();
        assert_eq!(heap.read(b, 4).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn double_free_is_an_error() {
        let mut heap = Heap::new();
        let a = heap.malloc(4).unwrap();
        heap.free(a).unwrap();
        assert!(heap.free(a).is_err());
    }
}
