// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! the 0xFD-prefixed extended opcode family (spec 4.1): MEMORY.*, DATA.DROP,
//! HEAP.*, TABLE.*.
//!
//! grounded on `extcall.rs`'s sub-opcode dispatch for the same prefixed-byte
//! idea, wired here to [`crate::memory::LinearMemory`], [`crate::heap::Heap`]
//! and [`crate::table::Table`] directly rather than through a syscall table,
//! since those three already carry the bulk operations this family needs.

use espb_isa::{ExtendedOp, InterpreterError, InterpretResult, ResultCode, Value};
use espb_isa::FuncRef;

use super::{Flow, Vm};

fn reg_as_usize(value: Value) -> InterpretResult<usize> {
    value
        .as_ptr()
        .or_else(|| value.as_i32().map(|v| v as u32 as usize))
        .or_else(|| value.as_i64().map(|v| v as u64 as usize))
        .ok_or_else(|| super::type_mismatch(value))
}

fn raw32(vm: &Vm, reg: u8) -> InterpretResult<u32> {
    Ok(vm.reg_get(reg)?.to_raw_bits() as u32)
}

pub(super) fn dispatch(vm: &mut Vm) -> InterpretResult<Flow> {
    let byte = vm.fetch_u8()?;
    let op = ExtendedOp::from_byte(byte)
        .ok_or_else(|| InterpreterError::new(ResultCode::UnknownOpcode, format!("unknown extended opcode byte 0x{:02X}", byte)))?;

    use ExtendedOp::*;
    match op {
        MemoryInit => memory_init(vm),
        MemoryCopy => memory_copy(vm),
        MemoryFill => memory_fill(vm),
        DataDrop => data_drop(vm),
        HeapMalloc => heap_malloc(vm),
        HeapCalloc => heap_calloc(vm),
        HeapRealloc => heap_realloc(vm),
        HeapFree => heap_free(vm),
        TableInit => table_init(vm),
        TableGet => table_get(vm),
        TableSet => table_set(vm),
        TableSize => table_size(vm),
        TableCopy => table_copy(vm),
        TableFill => table_fill(vm),
    }
}

fn memory_init(vm: &mut Vm) -> InterpretResult<Flow> {
    let segment_index = vm.fetch_u32()?;
    let dest_reg = vm.fetch_u8()?;
    let offset_reg = vm.fetch_u8()?;
    let len_reg = vm.fetch_u8()?;
    let dest = reg_as_usize(vm.reg_get(dest_reg)?)?;
    let offset = reg_as_usize(vm.reg_get(offset_reg)?)?;
    let len = reg_as_usize(vm.reg_get(len_reg)?)?;
    vm.instance.memory.memory_init(&vm.module.data_segments, segment_index, offset, dest, len)?;
    Ok(Flow::Continue)
}

fn memory_copy(vm: &mut Vm) -> InterpretResult<Flow> {
    let dst_reg = vm.fetch_u8()?;
    let src_reg = vm.fetch_u8()?;
    let len_reg = vm.fetch_u8()?;
    let dst = reg_as_usize(vm.reg_get(dst_reg)?)?;
    let src = reg_as_usize(vm.reg_get(src_reg)?)?;
    let len = reg_as_usize(vm.reg_get(len_reg)?)?;
    vm.instance.memory.memory_copy(dst, src, len)?;
    Ok(Flow::Continue)
}

fn memory_fill(vm: &mut Vm) -> InterpretResult<Flow> {
    let dst_reg = vm.fetch_u8()?;
    let value_reg = vm.fetch_u8()?;
    let len_reg = vm.fetch_u8()?;
    let dst = reg_as_usize(vm.reg_get(dst_reg)?)?;
    let value = raw32(vm, value_reg)? as u8;
    let len = reg_as_usize(vm.reg_get(len_reg)?)?;
    vm.instance.memory.memory_fill(dst, value, len)?;
    Ok(Flow::Continue)
}

fn data_drop(vm: &mut Vm) -> InterpretResult<Flow> {
    let segment_index = vm.fetch_u32()?;
    vm.instance.memory.data_drop(segment_index)?;
    Ok(Flow::Continue)
}

fn heap_malloc(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let size_reg = vm.fetch_u8()?;
    let size = reg_as_usize(vm.reg_get(size_reg)?)?;
    let ptr = vm.instance.heap.malloc(size)?;
    vm.reg_set(dest, Value::Ptr(ptr))?;
    Ok(Flow::Continue)
}

fn heap_calloc(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let count_reg = vm.fetch_u8()?;
    let elem_size_reg = vm.fetch_u8()?;
    let count = reg_as_usize(vm.reg_get(count_reg)?)?;
    let elem_size = reg_as_usize(vm.reg_get(elem_size_reg)?)?;
    let ptr = vm.instance.heap.calloc(count, elem_size)?;
    vm.reg_set(dest, Value::Ptr(ptr))?;
    Ok(Flow::Continue)
}

fn heap_realloc(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let ptr_reg = vm.fetch_u8()?;
    let size_reg = vm.fetch_u8()?;
    let ptr = reg_as_usize(vm.reg_get(ptr_reg)?)?;
    let new_size = reg_as_usize(vm.reg_get(size_reg)?)?;
    let new_ptr = vm.instance.heap.realloc(ptr, new_size)?;
    vm.reg_set(dest, Value::Ptr(new_ptr))?;
    Ok(Flow::Continue)
}

fn heap_free(vm: &mut Vm) -> InterpretResult<Flow> {
    let ptr_reg = vm.fetch_u8()?;
    let ptr = reg_as_usize(vm.reg_get(ptr_reg)?)?;
    vm.instance.heap.free(ptr)?;
    Ok(Flow::Continue)
}

fn table_init(vm: &mut Vm) -> InterpretResult<Flow> {
    let segment_index = vm.fetch_u32()?;
    let dest_reg = vm.fetch_u8()?;
    let src_reg = vm.fetch_u8()?;
    let len_reg = vm.fetch_u8()?;
    let dest = reg_as_usize(vm.reg_get(dest_reg)?)?;
    let src = reg_as_usize(vm.reg_get(src_reg)?)?;
    let len = reg_as_usize(vm.reg_get(len_reg)?)?;
    vm.instance.table.init(&vm.module.element_segments, segment_index, src, dest, len)?;
    Ok(Flow::Continue)
}

/// this crate exposes a single default table (spec 4.1's table-index
/// operand is read and ignored, matching [`crate::instance::Instance`]
/// carrying exactly one [`crate::table::Table`]; see DESIGN.md).
fn table_get(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let _table_index = vm.fetch_u16()?;
    let index_reg = vm.fetch_u8()?;
    let index = reg_as_usize(vm.reg_get(index_reg)?)?;
    let func_ref = vm.instance.table.get_func_ref(index)?;
    let local_index = func_ref.as_local().expect("Table::get_func_ref only ever yields FuncRef::Local");
    vm.reg_set(dest, Value::U32(FuncRef::encode_local(local_index)))?;
    Ok(Flow::Continue)
}

const TABLE_CLEAR_SENTINEL: u32 = u32::MAX;

/// TABLE.SET/TABLE.FILL's value register: a tagged value decodes through
/// [`FuncRef`] like any other function reference; an untagged value is
/// taken as a raw function index directly, with `u32::MAX` reserved to mean
/// "clear this slot" -- a convention this crate introduces since the
/// extended opcode family leaves it unspecified (DESIGN.md).
fn decode_table_value(raw: u32, num_functions: u32) -> InterpretResult<Option<u32>> {
    if raw == TABLE_CLEAR_SENTINEL {
        return Ok(None);
    }
    if FuncRef::looks_tagged(raw) {
        let func_ref = FuncRef::decode(raw, num_functions)
            .ok_or_else(|| InterpreterError::new(ResultCode::InvalidFuncIndex, "TABLE.SET/TABLE.FILL value tags a function index out of range"))?;
        Ok(func_ref.as_local())
    } else {
        Ok(Some(raw))
    }
}

fn table_set(vm: &mut Vm) -> InterpretResult<Flow> {
    let _table_index = vm.fetch_u16()?;
    let index_reg = vm.fetch_u8()?;
    let value_reg = vm.fetch_u8()?;
    let index = reg_as_usize(vm.reg_get(index_reg)?)?;
    let raw = raw32(vm, value_reg)?;
    let function_index = decode_table_value(raw, vm.module.num_functions() as u32)?;
    vm.instance.table.set(index, function_index)?;
    Ok(Flow::Continue)
}

fn table_size(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let _table_index = vm.fetch_u16()?;
    let size = vm.instance.table.size();
    vm.reg_set(dest, Value::U32(size as u32))?;
    Ok(Flow::Continue)
}

fn table_copy(vm: &mut Vm) -> InterpretResult<Flow> {
    let _table_index = vm.fetch_u16()?;
    let dst_reg = vm.fetch_u8()?;
    let src_reg = vm.fetch_u8()?;
    let len_reg = vm.fetch_u8()?;
    let dst = reg_as_usize(vm.reg_get(dst_reg)?)?;
    let src = reg_as_usize(vm.reg_get(src_reg)?)?;
    let len = reg_as_usize(vm.reg_get(len_reg)?)?;
    vm.instance.table.copy(dst, src, len)?;
    Ok(Flow::Continue)
}

fn table_fill(vm: &mut Vm) -> InterpretResult<Flow> {
    let _table_index = vm.fetch_u16()?;
    let dst_reg = vm.fetch_u8()?;
    let value_reg = vm.fetch_u8()?;
    let len_reg = vm.fetch_u8()?;
    let dst = reg_as_usize(vm.reg_get(dst_reg)?)?;
    let raw = raw32(vm, value_reg)?;
    let function_index = decode_table_value(raw, vm.module.num_functions() as u32)?;
    let len = reg_as_usize(vm.reg_get(len_reg)?)?;
    vm.instance.table.fill(dst, function_index, len)?;
    Ok(Flow::Continue)
}
