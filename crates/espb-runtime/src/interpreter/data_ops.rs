// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! moves, constant loads, global access, LOAD/STORE, ALLOCA/ADDR_OF,
//! numeric conversions and SELECT (spec 4.1).
//!
//! grounded on `data.rs`'s LOAD/STORE family and `local.rs`'s
//! register-move opcodes; address resolution here additionally routes
//! between linear memory and the heap's disjoint range (see
//! `heap.rs`'s module comment), since a single contiguous `memory_data`
//! buffer is not assumed.

use espb_isa::{InterpreterError, InterpretResult, ResultCode, Value};

use crate::heap::Heap;

use super::{control_flow, Flow, Vm};

fn raw32(vm: &Vm, reg: u8) -> InterpretResult<u32> {
    Ok(vm.reg_get(reg)?.to_raw_bits() as u32)
}

fn raw64(vm: &Vm, reg: u8) -> InterpretResult<u64> {
    Ok(vm.reg_get(reg)?.to_raw_bits())
}

/// reads a register as an address or count -- any integer-ish tag is
/// accepted, since the opcodes that feed into ALLOCA's size operand or a
/// LOAD/STORE address register are not guaranteed to agree on signedness.
fn reg_as_usize(value: Value) -> InterpretResult<usize> {
    value
        .as_ptr()
        .or_else(|| value.as_i32().map(|v| v as u32 as usize))
        .or_else(|| value.as_i64().map(|v| v as u64 as usize))
        .ok_or_else(|| super::type_mismatch(value))
}

/// resolves a LOAD/STORE/atomic address from a base register plus a
/// signed 16-bit displacement (spec 4.1). the base register may name
/// either a linear-memory offset or a heap pointer (`heap.rs`'s disjoint
/// `HEAP_BASE` range); callers route the resolved address to the right
/// backing store via [`load_bytes`]/[`store_bytes`].
pub(super) fn resolve_address(vm: &Vm, addr_reg: u8, offset: i16) -> InterpretResult<usize> {
    let base = reg_as_usize(vm.reg_get(addr_reg)?)?;
    let resolved = if offset >= 0 {
        base.checked_add(offset as usize)
    } else {
        base.checked_sub((-(offset as i32)) as usize)
    };
    resolved.ok_or_else(|| InterpreterError::new(ResultCode::MemoryAccessOutOfBounds, "LOAD/STORE address computation overflowed"))
}

pub(super) fn load_bytes(vm: &Vm, addr: usize, len: usize) -> InterpretResult<Vec<u8>> {
    if Heap::is_heap_address(addr) {
        Ok(vm.instance.heap.read(addr, len)?.to_vec())
    } else {
        Ok(vm.instance.memory.read(addr, len)?.to_vec())
    }
}

pub(super) fn store_bytes(vm: &mut Vm, addr: usize, bytes: &[u8]) -> InterpretResult<()> {
    if Heap::is_heap_address(addr) {
        vm.instance.heap.write(addr, bytes)
    } else {
        vm.instance.memory.write(addr, bytes)
    }
}

// -- moves and constants --

/// shared by MovI8/16/32/64: the destination's width comes entirely from
/// which dispatcher entry routed here, but since [`Value`] already carries
/// its own width, copying the source cell verbatim is correct for every
/// width in one pass (spec 4.1, "tag-agnostic").
pub(super) fn mov(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let value = vm.reg_get(src)?;
    vm.reg_set(dest, value)?;
    Ok(Flow::Continue)
}

pub(super) fn ldc_i32_imm(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let imm = vm.fetch_i32()?;
    vm.reg_set(dest, Value::I32(imm))?;
    Ok(Flow::Continue)
}

pub(super) fn ldc_i64_imm(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let imm = vm.fetch_i64()?;
    vm.reg_set(dest, Value::I64(imm))?;
    Ok(Flow::Continue)
}

pub(super) fn ldc_f32_imm(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let imm = vm.fetch_f32()?;
    vm.reg_set(dest, Value::F32(imm))?;
    Ok(Flow::Continue)
}

pub(super) fn ldc_f64_imm(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let imm = vm.fetch_f64()?;
    vm.reg_set(dest, Value::F64(imm))?;
    Ok(Flow::Continue)
}

pub(super) fn ldc_ptr_imm(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let imm = vm.fetch_ptr_imm()?;
    vm.reg_set(dest, Value::Ptr(imm))?;
    Ok(Flow::Continue)
}

const GLOBAL_ADDR_FUNCTION_FLAG: u16 = 0x8000;

/// LD_GLOBAL_ADDR (spec 4.1). registers are a tagged enum rather than
/// byte-addressable storage, so "the address of a global" has no literal
/// referent the way it would over a flat `memory_data` buffer; this crate
/// follows the same simplification [`addr_of`] uses for ADDR_OF --
/// allocate a fresh heap cell, copy the value's raw bits into it, and
/// hand back that pointer. writes through the returned
/// pointer do not alias the original global (documented simplification,
/// see DESIGN.md).
pub(super) fn ld_global_addr(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let symbol_index = vm.fetch_u16()?;

    if symbol_index & GLOBAL_ADDR_FUNCTION_FLAG != 0 {
        let function_index = (symbol_index & !GLOBAL_ADDR_FUNCTION_FLAG) as usize;
        let data_offset = vm
            .module
            .func_ptr_map_by_index
            .get(function_index)
            .copied()
            .flatten()
            .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, "LD_GLOBAL_ADDR function index has no recorded data-section address"))?;
        vm.reg_set(dest, Value::Ptr(data_offset as usize))?;
        return Ok(Flow::Continue);
    }

    let value = vm.instance.global(symbol_index as u32)?;
    let cell = vm.instance.heap.malloc(8)?;
    vm.instance.heap.write(cell, &value.to_raw_bits().to_le_bytes())?;
    vm.reg_set(dest, Value::Ptr(cell))?;
    Ok(Flow::Continue)
}

pub(super) fn ld_global(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let symbol_index = vm.fetch_u16()?;
    let value = vm.instance.global(symbol_index as u32)?;
    vm.reg_set(dest, value)?;
    Ok(Flow::Continue)
}

pub(super) fn st_global(vm: &mut Vm) -> InterpretResult<Flow> {
    let src = vm.fetch_u8()?;
    let symbol_index = vm.fetch_u16()?;
    let value = vm.reg_get(src)?;
    vm.instance.set_global(symbol_index as u32, value)?;
    Ok(Flow::Continue)
}

// -- LOAD / STORE --

pub(super) fn load_i8(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = load_bytes(vm, addr, 1)?;
    vm.reg_set(dest, Value::I8(bytes[0] as i8))?;
    Ok(Flow::Continue)
}

pub(super) fn load_u8(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = load_bytes(vm, addr, 1)?;
    vm.reg_set(dest, Value::U8(bytes[0]))?;
    Ok(Flow::Continue)
}

pub(super) fn load_i16(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = load_bytes(vm, addr, 2)?;
    vm.reg_set(dest, Value::I16(i16::from_le_bytes([bytes[0], bytes[1]])))?;
    Ok(Flow::Continue)
}

pub(super) fn load_u16(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = load_bytes(vm, addr, 2)?;
    vm.reg_set(dest, Value::U16(u16::from_le_bytes([bytes[0], bytes[1]])))?;
    Ok(Flow::Continue)
}

pub(super) fn load_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = load_bytes(vm, addr, 4)?;
    let arr: [u8; 4] = bytes.try_into().expect("length checked above");
    vm.reg_set(dest, Value::I32(i32::from_le_bytes(arr)))?;
    Ok(Flow::Continue)
}

pub(super) fn load_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = load_bytes(vm, addr, 8)?;
    let arr: [u8; 8] = bytes.try_into().expect("length checked above");
    vm.reg_set(dest, Value::I64(i64::from_le_bytes(arr)))?;
    Ok(Flow::Continue)
}

pub(super) fn load_f32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = load_bytes(vm, addr, 4)?;
    let arr: [u8; 4] = bytes.try_into().expect("length checked above");
    vm.reg_set(dest, Value::F32(f32::from_bits(u32::from_le_bytes(arr))))?;
    Ok(Flow::Continue)
}

pub(super) fn load_f64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = load_bytes(vm, addr, 8)?;
    let arr: [u8; 8] = bytes.try_into().expect("length checked above");
    vm.reg_set(dest, Value::F64(f64::from_bits(u64::from_le_bytes(arr))))?;
    Ok(Flow::Continue)
}

pub(super) fn load_ptr(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = load_bytes(vm, addr, 8)?;
    let arr: [u8; 8] = bytes.try_into().expect("length checked above");
    vm.reg_set(dest, Value::Ptr(u64::from_le_bytes(arr) as usize))?;
    Ok(Flow::Continue)
}

pub(super) fn load_bool(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = load_bytes(vm, addr, 1)?;
    vm.reg_set(dest, Value::Bool(bytes[0] != 0))?;
    Ok(Flow::Continue)
}

pub(super) fn store_i8(vm: &mut Vm) -> InterpretResult<Flow> {
    let src = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let byte = raw32(vm, src)? as u8;
    store_bytes(vm, addr, &[byte])?;
    Ok(Flow::Continue)
}

pub(super) fn store_i16(vm: &mut Vm) -> InterpretResult<Flow> {
    let src = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = (raw32(vm, src)? as u16).to_le_bytes();
    store_bytes(vm, addr, &bytes)?;
    Ok(Flow::Continue)
}

pub(super) fn store_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let src = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = raw32(vm, src)?.to_le_bytes();
    store_bytes(vm, addr, &bytes)?;
    Ok(Flow::Continue)
}

pub(super) fn store_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let src = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = raw64(vm, src)?.to_le_bytes();
    store_bytes(vm, addr, &bytes)?;
    Ok(Flow::Continue)
}

pub(super) fn store_f32(vm: &mut Vm) -> InterpretResult<Flow> {
    let src = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = raw32(vm, src)?.to_le_bytes();
    store_bytes(vm, addr, &bytes)?;
    Ok(Flow::Continue)
}

pub(super) fn store_f64(vm: &mut Vm) -> InterpretResult<Flow> {
    let src = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = raw64(vm, src)?.to_le_bytes();
    store_bytes(vm, addr, &bytes)?;
    Ok(Flow::Continue)
}

pub(super) fn store_ptr(vm: &mut Vm) -> InterpretResult<Flow> {
    let src = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let bytes = raw64(vm, src)?.to_le_bytes();
    store_bytes(vm, addr, &bytes)?;
    Ok(Flow::Continue)
}

pub(super) fn store_bool(vm: &mut Vm) -> InterpretResult<Flow> {
    let src = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = resolve_address(vm, addr_reg, offset)?;
    let byte = (raw32(vm, src)? != 0) as u8;
    store_bytes(vm, addr, &[byte])?;
    Ok(Flow::Continue)
}

// -- ALLOCA / ADDR_OF --

/// scoped allocation owned by the current call frame (spec 3 invariant 4):
/// the pointer is recorded against the currently executing call-stack
/// frame and freed automatically on END.
pub(super) fn alloca(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let size_reg = vm.fetch_u8()?;
    let size = reg_as_usize(vm.reg_get(size_reg)?)?;
    let ptr = vm.instance.heap.malloc(size)?;
    vm.ctx.call_stack.record_alloca(ptr)?;
    vm.reg_set(dest, Value::Ptr(ptr))?;
    Ok(Flow::Continue)
}

/// see [`ld_global_addr`]'s doc comment -- the same heap-cell
/// simplification applies here, since a register is not a byte-addressable
/// storage cell to begin with.
pub(super) fn addr_of(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let value = vm.reg_get(src)?;
    let cell = vm.instance.heap.malloc(8)?;
    vm.instance.heap.write(cell, &value.to_raw_bits().to_le_bytes())?;
    vm.reg_set(dest, Value::Ptr(cell))?;
    Ok(Flow::Continue)
}

// -- conversions --

fn read_f32(vm: &Vm, reg: u8) -> InterpretResult<f32> {
    let value = vm.reg_get(reg)?;
    value.as_f32().ok_or_else(|| super::type_mismatch(value))
}

fn read_f64(vm: &Vm, reg: u8) -> InterpretResult<f64> {
    let value = vm.reg_get(reg)?;
    value.as_f64().ok_or_else(|| super::type_mismatch(value))
}

pub(super) fn trunc_i64_to_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let bits = raw64(vm, src)? as u32;
    vm.reg_set(dest, Value::I32(bits as i32))?;
    Ok(Flow::Continue)
}

pub(super) fn extend_i32_s_to_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = raw32(vm, src)? as i32;
    vm.reg_set(dest, Value::I64(v as i64))?;
    Ok(Flow::Continue)
}

pub(super) fn extend_i32_u_to_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = raw32(vm, src)?;
    vm.reg_set(dest, Value::U64(v as u64))?;
    Ok(Flow::Continue)
}

pub(super) fn convert_i32_s_to_f32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = raw32(vm, src)? as i32;
    vm.reg_set(dest, Value::F32(v as f32))?;
    Ok(Flow::Continue)
}

pub(super) fn convert_i32_u_to_f32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = raw32(vm, src)?;
    vm.reg_set(dest, Value::F32(v as f32))?;
    Ok(Flow::Continue)
}

pub(super) fn convert_i32_s_to_f64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = raw32(vm, src)? as i32;
    vm.reg_set(dest, Value::F64(v as f64))?;
    Ok(Flow::Continue)
}

pub(super) fn convert_i32_u_to_f64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = raw32(vm, src)?;
    vm.reg_set(dest, Value::F64(v as f64))?;
    Ok(Flow::Continue)
}

pub(super) fn convert_i64_s_to_f32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = raw64(vm, src)? as i64;
    vm.reg_set(dest, Value::F32(v as f32))?;
    Ok(Flow::Continue)
}

pub(super) fn convert_i64_s_to_f64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = raw64(vm, src)? as i64;
    vm.reg_set(dest, Value::F64(v as f64))?;
    Ok(Flow::Continue)
}

pub(super) fn trunc_f32_to_i32_s(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = read_f32(vm, src)?;
    vm.reg_set(dest, Value::I32(v as i32))?;
    Ok(Flow::Continue)
}

pub(super) fn trunc_f32_to_i32_u(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = read_f32(vm, src)?;
    vm.reg_set(dest, Value::U32(v as u32))?;
    Ok(Flow::Continue)
}

pub(super) fn trunc_f64_to_i32_s(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = read_f64(vm, src)?;
    vm.reg_set(dest, Value::I32(v as i32))?;
    Ok(Flow::Continue)
}

pub(super) fn trunc_f64_to_i32_u(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = read_f64(vm, src)?;
    vm.reg_set(dest, Value::U32(v as u32))?;
    Ok(Flow::Continue)
}

pub(super) fn promote_f32_to_f64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = read_f32(vm, src)?;
    vm.reg_set(dest, Value::F64(v as f64))?;
    Ok(Flow::Continue)
}

pub(super) fn demote_f64_to_f32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = read_f64(vm, src)?;
    vm.reg_set(dest, Value::F32(v as f32))?;
    Ok(Flow::Continue)
}

pub(super) fn ptr_to_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let value = vm.reg_get(src)?;
    let ptr = value.as_ptr().ok_or_else(|| super::type_mismatch(value))?;
    vm.reg_set(dest, Value::I32(ptr as u32 as i32))?;
    Ok(Flow::Continue)
}

pub(super) fn i32_to_ptr(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = raw32(vm, src)?;
    vm.reg_set(dest, Value::Ptr(v as usize))?;
    Ok(Flow::Continue)
}

pub(super) fn ptr_to_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let value = vm.reg_get(src)?;
    let ptr = value.as_ptr().ok_or_else(|| super::type_mismatch(value))?;
    vm.reg_set(dest, Value::I64(ptr as u64 as i64))?;
    Ok(Flow::Continue)
}

pub(super) fn i64_to_ptr(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = raw64(vm, src)?;
    vm.reg_set(dest, Value::Ptr(v as usize))?;
    Ok(Flow::Continue)
}

// -- SELECT --

/// shared by SelectI32/I64/F32/F64/Ptr: the chosen `Value` is copied
/// verbatim, the same tag-agnostic reasoning as [`mov`].
pub(super) fn select(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let cond = vm.fetch_u8()?;
    let then_reg = vm.fetch_u8()?;
    let else_reg = vm.fetch_u8()?;

    let cond_value = vm.reg_get(cond)?;
    let chosen = if control_flow::is_truthy(cond_value)? {
        vm.reg_get(then_reg)?
    } else {
        vm.reg_get(else_reg)?
    };
    vm.reg_set(dest, chosen)?;
    Ok(Flow::Continue)
}
