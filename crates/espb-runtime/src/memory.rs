// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! the instance's linear memory (`memory_data`, spec 3). plain
//! bounds-checked byte buffer; data-segment instantiation and
//! MEMORY.INIT/COPY/FILL/DATA.DROP (spec 4.1, extended opcode family) are
//! implemented directly against it.

use espb_isa::{InterpreterError, InterpretResult, ResultCode};
use espb_module::DataSegment;

pub struct LinearMemory {
    data: Vec<u8>,
    /// `data_segments[i]` becomes unusable once DATA.DROP(i) runs, per
    /// spec 4.1's extended-opcode family; re-running MEMORY.INIT against a
    /// dropped segment is an error rather than silently a no-op, since the
    /// spec reserves silent behavior for in-range/zero-length cases only.
    dropped: Vec<bool>,
}

impl LinearMemory {
    pub fn new(size: usize) -> Self {
        LinearMemory {
            data: vec![0u8; size],
            dropped: Vec::new(),
        }
    }

    /// copies every non-passive data segment into linear memory at
    /// instantiation (spec 3, "Module ... data segments"); segment layout
    /// (target offset) is outside this spec's scope, so active segments
    /// are placed back-to-back starting at offset 0, matching the layout
    /// `func_ptr_map`'s `data_offset`s already assume.
    pub fn instantiate_data_segments(&mut self, segments: &[DataSegment]) {
        self.dropped = vec![false; segments.len()];
        let mut cursor = 0usize;
        for segment in segments {
            if segment.passive {
                continue;
            }
            let end = cursor + segment.bytes.len();
            if end > self.data.len() {
                self.data.resize(end, 0);
            }
            self.data[cursor..end].copy_from_slice(&segment.bytes);
            cursor = end;
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn is_in_bounds(&self, addr: usize, len: usize) -> bool {
        addr.checked_add(len).map(|end| end <= self.data.len()).unwrap_or(false)
    }

    pub fn read(&self, addr: usize, len: usize) -> InterpretResult<&[u8]> {
        self.data.get(addr..addr + len).ok_or_else(|| {
            InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "linear memory read out of bounds")
        })
    }

    pub fn write(&mut self, addr: usize, bytes: &[u8]) -> InterpretResult<()> {
        let slot = self.data.get_mut(addr..addr + bytes.len()).ok_or_else(|| {
            InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "linear memory write out of bounds")
        })?;
        slot.copy_from_slice(bytes);
        Ok(())
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// MEMORY.INIT: copies `len` bytes from data segment `segment_index`
    /// (starting at `segment_offset`) into linear memory at `dest`.
    pub fn memory_init(
        &mut self,
        segments: &[DataSegment],
        segment_index: u32,
        segment_offset: usize,
        dest: usize,
        len: usize,
    ) -> InterpretResult<()> {
        let idx = segment_index as usize;
        if self.dropped.get(idx).copied().unwrap_or(true) {
            return Err(InterpreterError::new(ResultCode::InvalidOperand, "data segment is dropped or missing"));
        }
        let segment = segments.get(idx).ok_or_else(|| {
            InterpreterError::new(ResultCode::InvalidOperand, "data segment index out of range")
        })?;
        let src = segment.bytes.get(segment_offset..segment_offset + len).ok_or_else(|| {
            InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "data segment slice out of bounds")
        })?;
        self.write(dest, src)
    }

    /// MEMORY.COPY: supports overlapping regions (like `memmove`).
    pub fn memory_copy(&mut self, dest: usize, src: usize, len: usize) -> InterpretResult<()> {
        if !self.is_in_bounds(dest, len) || !self.is_in_bounds(src, len) {
            return Err(InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "MEMORY.COPY out of bounds"));
        }
        self.data.copy_within(src..src + len, dest);
        Ok(())
    }

    pub fn memory_fill(&mut self, dest: usize, value: u8, len: usize) -> InterpretResult<()> {
        let slot = self.data.get_mut(dest..dest + len).ok_or_else(|| {
            InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "MEMORY.FILL out of bounds")
        })?;
        slot.fill(value);
        Ok(())
    }

    pub fn data_drop(&mut self, segment_index: u32) -> InterpretResult<()> {
        let slot = self.dropped.get_mut(segment_index as usize).ok_or_else(|| {
            InterpreterError::new(ResultCode::InvalidOperand, "data segment index out of range")
        })?;
        *slot = true;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn copy_handles_overlap_like_memmove() {
        let mut mem = LinearMemory::new(16);
        mem.write(0, &[1, 2, 3, 4]).unwrap();
        mem.memory_copy(2, 0, 4).unwrap();
        assert_eq!(mem.read(2, 4).unwrap(), &[1, 2, 3, 4]);
    }

    #[test]
    fn dropped_segment_rejects_init() {
        let mut mem = LinearMemory::new(16);
        let segments = vec![DataSegment { bytes: vec![9, 9, 9, 9], passive: true }];
        mem.instantiate_data_segments(&segments);
        mem.data_drop(0).unwrap();
        assert!(mem.memory_init(&segments, 0, 0, 0, 4).is_err());
    }

    #[test]
    fn out_of_bounds_read_is_rejected() {
        let mem = LinearMemory::new(4);
        assert!(mem.read(2, 4).is_err());
    }
}
