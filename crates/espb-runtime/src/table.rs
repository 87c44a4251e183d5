// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! the indirect call table(s) (spec 3, "Instance ... indirect table");
//! backs the TABLE.INIT/GET/SET/SIZE/COPY/FILL extended opcodes.
//! `TableGet`'s element type is a guest function reference, stored via
//! [`espb_isa::FuncRef`]'s tagged wire encoding so `TABLE.GET` can hand a
//! register the same representation CALL_INDIRECT already knows how to
//! decode.

use espb_isa::{FuncRef, InterpreterError, InterpretResult, ResultCode};
use espb_module::ElementSegment;

pub struct Table {
    data: Vec<Option<u32>>,
    max_size: Option<usize>,
}

impl Table {
    pub fn new(initial_size: usize, max_size: Option<usize>) -> Self {
        Table {
            data: vec![None; initial_size],
            max_size,
        }
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn get(&self, index: usize) -> InterpretResult<Option<u32>> {
        self.data.get(index).copied().ok_or_else(|| {
            InterpreterError::new(ResultCode::InvalidOperand, "table index out of bounds")
        })
    }

    pub fn get_func_ref(&self, index: usize) -> InterpretResult<FuncRef> {
        match self.get(index)? {
            Some(function_index) => Ok(FuncRef::Local(function_index)),
            None => Err(InterpreterError::new(ResultCode::InvalidFuncIndex, "table slot is empty")),
        }
    }

    pub fn set(&mut self, index: usize, function_index: Option<u32>) -> InterpretResult<()> {
        let slot = self.data.get_mut(index).ok_or_else(|| {
            InterpreterError::new(ResultCode::InvalidOperand, "table index out of bounds")
        })?;
        *slot = function_index;
        Ok(())
    }

    pub fn grow(&mut self, additional: usize, fill: Option<u32>) -> InterpretResult<usize> {
        let new_size = self.data.len() + additional;
        if let Some(max) = self.max_size {
            if new_size > max {
                return Err(InterpreterError::new(ResultCode::OutOfMemory, "table grow exceeds table_max_size"));
            }
        }
        let old_size = self.data.len();
        self.data.resize(new_size, fill);
        Ok(old_size)
    }

    pub fn init(
        &mut self,
        segments: &[ElementSegment],
        segment_index: u32,
        segment_offset: usize,
        dest: usize,
        len: usize,
    ) -> InterpretResult<()> {
        let segment = segments.get(segment_index as usize).ok_or_else(|| {
            InterpreterError::new(ResultCode::InvalidOperand, "element segment index out of range")
        })?;
        let src = segment
            .function_indices
            .get(segment_offset..segment_offset + len)
            .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, "element segment slice out of bounds"))?;
        for (i, function_index) in src.iter().enumerate() {
            self.set(dest + i, Some(*function_index))?;
        }
        Ok(())
    }

    pub fn copy(&mut self, dest: usize, src: usize, len: usize) -> InterpretResult<()> {
        if dest + len > self.data.len() || src + len > self.data.len() {
            return Err(InterpreterError::new(ResultCode::InvalidOperand, "TABLE.COPY out of bounds"));
        }
        let snapshot = self.data[src..src + len].to_vec();
        self.data[dest..dest + len].copy_from_slice(&snapshot);
        Ok(())
    }

    pub fn fill(&mut self, dest: usize, value: Option<u32>, len: usize) -> InterpretResult<()> {
        let slot = self.data.get_mut(dest..dest + len).ok_or_else(|| {
            InterpreterError::new(ResultCode::InvalidOperand, "TABLE.FILL out of bounds")
        })?;
        slot.fill(value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grow_respects_table_max_size() {
        let mut t = Table::new(2, Some(3));
        assert!(t.grow(1, None).is_ok());
        assert!(t.grow(1, None).is_err());
    }

    #[test]
    fn init_populates_from_element_segment() {
        let mut t = Table::new(4, None);
        let segments = vec![ElementSegment { table_index: 0, offset: 0, function_indices: vec![5, 6, 7] }];
        t.init(&segments, 0, 0, 1, 3).unwrap();
        assert_eq!(t.get(1).unwrap(), Some(5));
        assert_eq!(t.get(3).unwrap(), Some(7));
    }
}
