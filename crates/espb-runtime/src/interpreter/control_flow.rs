// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! branch opcodes (spec 4.1): NOP, BR, BR_IF, BR_TABLE, UNREACHABLE.
//!
//! grounded on `control_flow.rs`'s `InterpretResult::Move(offset)` return
//! convention; this crate's [`Vm::pc`] is a plain field rather than a
//! returned delta, so branching here just writes `vm.pc` directly instead
//! of returning a relative move for the caller to apply.

use espb_isa::{InterpreterError, InterpretResult, ResultCode, Value};

use super::{Flow, Vm};

pub(super) fn nop(_vm: &mut Vm) -> InterpretResult<Flow> {
    Ok(Flow::Continue)
}

pub(super) fn unreachable(_vm: &mut Vm) -> InterpretResult<Flow> {
    Err(InterpreterError::new(ResultCode::RuntimeTrap, "executed UNREACHABLE"))
}

/// a value is "truthy" for BR_IF/SELECT purposes (spec 4.1) when its raw
/// payload is nonzero; BOOL and the integer/pointer tags all agree with
/// their natural reading, and a float is truthy unless it is exactly zero
/// (positive or negative).
pub(super) fn is_truthy(value: Value) -> InterpretResult<bool> {
    Ok(match value {
        Value::Bool(b) => b,
        Value::I8(v) => v != 0,
        Value::U8(v) => v != 0,
        Value::I16(v) => v != 0,
        Value::U16(v) => v != 0,
        Value::I32(v) => v != 0,
        Value::U32(v) => v != 0,
        Value::I64(v) => v != 0,
        Value::U64(v) => v != 0,
        Value::Ptr(v) => v != 0,
        Value::F32(v) => v != 0.0,
        Value::F64(v) => v != 0.0,
        Value::Void => return Err(super::type_mismatch(value)),
    })
}

/// resolves a branch target from an instruction-relative offset (spec 4.1,
/// "counted from the start of this instruction") and writes it to `vm.pc`.
/// an offset of exactly zero is a legal (if unusual) BR target -- it
/// re-executes the branch itself forever, which is the guest bytecode's
/// problem to avoid, not this dispatcher's (spec 9, open question d). the
/// only check made here is that the resulting address is in bounds.
fn apply_branch(vm: &mut Vm, opcode_start: usize, offset: i32) -> InterpretResult<()> {
    let target = opcode_start as i64 + offset as i64;
    if target < 0 || target as usize > vm.code_len() {
        return Err(InterpreterError::new(ResultCode::RuntimeTrapBadBranchTarget, "branch target out of bounds"));
    }
    if offset == 0 {
        eprintln!("espb-runtime: branch at {} targets itself; guest bytecode will loop here indefinitely", opcode_start);
    }
    vm.pc = target as usize;
    Ok(())
}

pub(super) fn br(vm: &mut Vm, opcode_start: usize) -> InterpretResult<Flow> {
    let offset = vm.fetch_i16()?;
    apply_branch(vm, opcode_start, offset as i32)?;
    Ok(Flow::Continue)
}

pub(super) fn br_if(vm: &mut Vm, opcode_start: usize) -> InterpretResult<Flow> {
    let reg = vm.fetch_u8()?;
    let offset = vm.fetch_i16()?;
    if is_truthy(vm.reg_get(reg)?)? {
        apply_branch(vm, opcode_start, offset as i32)?;
    }
    Ok(Flow::Continue)
}

pub(super) fn br_table(vm: &mut Vm, opcode_start: usize) -> InterpretResult<Flow> {
    let reg = vm.fetch_u8()?;
    let count = vm.fetch_u16()?;
    let index = vm.reg_get(reg)?;
    let index = index
        .as_i32()
        .map(|v| v as i64)
        .or_else(|| index.as_i64())
        .or_else(|| index.as_ptr().map(|v| v as i64))
        .ok_or_else(|| super::type_mismatch(index))?;

    let mut offsets = Vec::with_capacity(count as usize);
    for _ in 0..count {
        offsets.push(vm.fetch_i16()?);
    }
    let default_offset = vm.fetch_i16()?;

    let chosen = if index >= 0 && (index as usize) < offsets.len() {
        offsets[index as usize]
    } else {
        default_offset
    };
    apply_branch(vm, opcode_start, chosen as i32)?;
    Ok(Flow::Continue)
}
