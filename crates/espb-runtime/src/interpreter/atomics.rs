// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! atomic RMW/CMPXCHG/LOAD/STORE and FENCE (spec 4.1).
//!
//! the dispatcher is single-threaded (spec 5), so "atomic" here just means
//! the read-modify-write happens as one opcode with no intervening step --
//! there is no real contention to arbitrate. grounded on `data_ops.rs`'s
//! LOAD/STORE family for address resolution and byte encoding; the RMW and
//! CMPXCHG families skip the i16 displacement LOAD/STORE carries, per their
//! own operand layout.

use espb_isa::{InterpretResult, Value};

use super::{data_ops, Flow, Vm};

fn raw32(vm: &Vm, reg: u8) -> InterpretResult<u32> {
    Ok(vm.reg_get(reg)?.to_raw_bits() as u32)
}

fn raw64(vm: &Vm, reg: u8) -> InterpretResult<u64> {
    Ok(vm.reg_get(reg)?.to_raw_bits())
}

fn load_i32_at(vm: &Vm, addr: usize) -> InterpretResult<i32> {
    let bytes = data_ops::load_bytes(vm, addr, 4)?;
    let arr: [u8; 4] = bytes.try_into().expect("length checked above");
    Ok(i32::from_le_bytes(arr))
}

fn load_i64_at(vm: &Vm, addr: usize) -> InterpretResult<i64> {
    let bytes = data_ops::load_bytes(vm, addr, 8)?;
    let arr: [u8; 8] = bytes.try_into().expect("length checked above");
    Ok(i64::from_le_bytes(arr))
}

fn store_i32_at(vm: &mut Vm, addr: usize, value: i32) -> InterpretResult<()> {
    data_ops::store_bytes(vm, addr, &value.to_le_bytes())
}

fn store_i64_at(vm: &mut Vm, addr: usize, value: i64) -> InterpretResult<()> {
    data_ops::store_bytes(vm, addr, &value.to_le_bytes())
}

macro_rules! rmw_i32 {
    ($name:ident, $op:expr) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let addr_reg = vm.fetch_u8()?;
            let operand_reg = vm.fetch_u8()?;
            let addr = data_ops::resolve_address(vm, addr_reg, 0)?;
            let operand = raw32(vm, operand_reg)? as i32;
            let old = load_i32_at(vm, addr)?;
            let f: fn(i32, i32) -> i32 = $op;
            store_i32_at(vm, addr, f(old, operand))?;
            vm.reg_set(dest, Value::I32(old))?;
            Ok(Flow::Continue)
        }
    };
}

rmw_i32!(rmw_add_i32, |a, b| a.wrapping_add(b));
rmw_i32!(rmw_sub_i32, |a, b| a.wrapping_sub(b));
rmw_i32!(rmw_and_i32, |a, b| a & b);
rmw_i32!(rmw_or_i32, |a, b| a | b);
rmw_i32!(rmw_xor_i32, |a, b| a ^ b);
rmw_i32!(rmw_xchg_i32, |_old, new| new);

pub(super) fn cmpxchg_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let expected_reg = vm.fetch_u8()?;
    let new_reg = vm.fetch_u8()?;
    let addr = data_ops::resolve_address(vm, addr_reg, 0)?;
    let expected = raw32(vm, expected_reg)? as i32;
    let new = raw32(vm, new_reg)? as i32;

    let old = load_i32_at(vm, addr)?;
    if old == expected {
        store_i32_at(vm, addr, new)?;
    }
    vm.reg_set(dest, Value::I32(old))?;
    Ok(Flow::Continue)
}

pub(super) fn rmw_add_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let operand_reg = vm.fetch_u8()?;
    let addr = data_ops::resolve_address(vm, addr_reg, 0)?;
    let operand = raw64(vm, operand_reg)? as i64;

    let old = load_i64_at(vm, addr)?;
    store_i64_at(vm, addr, old.wrapping_add(operand))?;
    vm.reg_set(dest, Value::I64(old))?;
    Ok(Flow::Continue)
}

pub(super) fn cmpxchg_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let expected_reg = vm.fetch_u8()?;
    let new_reg = vm.fetch_u8()?;
    let addr = data_ops::resolve_address(vm, addr_reg, 0)?;
    let expected = raw64(vm, expected_reg)? as i64;
    let new = raw64(vm, new_reg)? as i64;

    let old = load_i64_at(vm, addr)?;
    if old == expected {
        store_i64_at(vm, addr, new)?;
    }
    vm.reg_set(dest, Value::I64(old))?;
    Ok(Flow::Continue)
}

pub(super) fn atomic_load_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = data_ops::resolve_address(vm, addr_reg, offset)?;
    let value = load_i32_at(vm, addr)?;
    vm.reg_set(dest, Value::I32(value))?;
    Ok(Flow::Continue)
}

pub(super) fn atomic_load_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = data_ops::resolve_address(vm, addr_reg, offset)?;
    let value = load_i64_at(vm, addr)?;
    vm.reg_set(dest, Value::I64(value))?;
    Ok(Flow::Continue)
}

pub(super) fn atomic_store_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let src = vm.fetch_u8()?;
    let addr_reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    let addr = data_ops::resolve_address(vm, addr_reg, offset)?;
    let value = raw32(vm, src)? as i32;
    store_i32_at(vm, addr, value)?;
    Ok(Flow::Continue)
}

/// no memory model to fence against in a single-threaded dispatcher; kept
/// as a real opcode so guest bytecode compiled with atomics enabled still
/// decodes cleanly.
pub(super) fn fence(_vm: &mut Vm) -> InterpretResult<Flow> {
    Ok(Flow::Continue)
}
