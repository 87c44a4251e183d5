// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! integer and floating-point arithmetic, the immediate-8 variants, and
//! every compare opcode (spec 4.1).
//!
//! grounded on `arithmetic.rs`/`comparison.rs`'s one-function-per-opcode
//! shape; registers here read their operands by raw bit pattern rather
//! than matching on the stored [`Value`] tag (`value.rs`'s own doc:
//! "most arithmetic opcodes are type-specialized and never inspect the
//! tag on a read"). the `binop!`/`unop!`/`cmp!` macros below exist purely
//! to avoid retyping that fetch-operands/compute/store shape ~70 times;
//! wasmtime's and wasmi's opcode tables lean on the same kind of local
//! macro for exactly this reason. the trapping division/remainder/
//! multiplication opcodes and every compare are written out by hand since
//! each has its own trap condition.

use espb_isa::{InterpreterError, InterpretResult, ResultCode, Value};

use super::{Flow, Vm};

fn raw32(vm: &Vm, reg: u8) -> InterpretResult<u32> {
    Ok(vm.reg_get(reg)?.to_raw_bits() as u32)
}

fn raw64(vm: &Vm, reg: u8) -> InterpretResult<u64> {
    Ok(vm.reg_get(reg)?.to_raw_bits())
}

fn read_f32(vm: &Vm, reg: u8) -> InterpretResult<f32> {
    Ok(f32::from_bits(raw32(vm, reg)?))
}

fn read_f64(vm: &Vm, reg: u8) -> InterpretResult<f64> {
    Ok(f64::from_bits(raw64(vm, reg)?))
}

fn trap(code: ResultCode, message: &str) -> InterpreterError {
    InterpreterError::new(code, message)
}

/// a [dest][lhs][rhs] 32-bit binary op; `$conv` reinterprets the raw bits
/// (e.g. `as i32` or `as u32`), `$op` computes the result, `$ctor` wraps it
/// back into a [`Value`].
macro_rules! binop32 {
    ($name:ident, $conv:ty, $op:expr, $ctor:path) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let lhs_reg = vm.fetch_u8()?;
            let rhs_reg = vm.fetch_u8()?;
            let lhs = raw32(vm, lhs_reg)? as $conv;
            let rhs = raw32(vm, rhs_reg)? as $conv;
            let f: fn($conv, $conv) -> $conv = $op;
            vm.reg_set(dest, $ctor(f(lhs, rhs)))?;
            Ok(Flow::Continue)
        }
    };
}

macro_rules! binop64 {
    ($name:ident, $conv:ty, $op:expr, $ctor:path) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let lhs_reg = vm.fetch_u8()?;
            let rhs_reg = vm.fetch_u8()?;
            let lhs = raw64(vm, lhs_reg)? as $conv;
            let rhs = raw64(vm, rhs_reg)? as $conv;
            let f: fn($conv, $conv) -> $conv = $op;
            vm.reg_set(dest, $ctor(f(lhs, rhs)))?;
            Ok(Flow::Continue)
        }
    };
}

macro_rules! unop32 {
    ($name:ident, $conv:ty, $op:expr, $ctor:path) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let src = vm.fetch_u8()?;
            let v = raw32(vm, src)? as $conv;
            let f: fn($conv) -> $conv = $op;
            vm.reg_set(dest, $ctor(f(v)))?;
            Ok(Flow::Continue)
        }
    };
}

macro_rules! unop64 {
    ($name:ident, $conv:ty, $op:expr, $ctor:path) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let src = vm.fetch_u8()?;
            let v = raw64(vm, src)? as $conv;
            let f: fn($conv) -> $conv = $op;
            vm.reg_set(dest, $ctor(f(v)))?;
            Ok(Flow::Continue)
        }
    };
}

macro_rules! binop_imm8 {
    ($name:ident, $op:expr) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let lhs_reg = vm.fetch_u8()?;
            let imm = vm.fetch_i8()?;
            let lhs = raw32(vm, lhs_reg)? as i32;
            let f: fn(i32, i32) -> i32 = $op;
            vm.reg_set(dest, Value::I32(f(lhs, imm as i32)))?;
            Ok(Flow::Continue)
        }
    };
}

fn wrap_add_i32(a: i32, b: i32) -> i32 {
    a.wrapping_add(b)
}
fn wrap_sub_i32(a: i32, b: i32) -> i32 {
    a.wrapping_sub(b)
}
fn wrap_mul_i32_unchecked(a: i32, b: i32) -> i32 {
    a.wrapping_mul(b)
}
fn bit_and_i32(a: i32, b: i32) -> i32 {
    a & b
}
fn bit_or_i32(a: i32, b: i32) -> i32 {
    a | b
}
fn bit_xor_i32(a: i32, b: i32) -> i32 {
    a ^ b
}
fn shl_i32_fn(a: i32, b: i32) -> i32 {
    a.wrapping_shl((b as u32) & 0x1F)
}
fn shr_s_i32_fn(a: i32, b: i32) -> i32 {
    a.wrapping_shr((b as u32) & 0x1F)
}
fn shr_u_i32_fn(a: i32, b: i32) -> i32 {
    ((a as u32).wrapping_shr((b as u32) & 0x1F)) as i32
}
fn not_i32_fn(a: i32) -> i32 {
    !a
}

binop32!(add_i32, i32, wrap_add_i32, Value::I32);
binop32!(sub_i32, i32, wrap_sub_i32, Value::I32);
binop32!(and_i32, i32, bit_and_i32, Value::I32);
binop32!(or_i32, i32, bit_or_i32, Value::I32);
binop32!(xor_i32, i32, bit_xor_i32, Value::I32);
binop32!(shl_i32, i32, shl_i32_fn, Value::I32);
binop32!(shr_s_i32, i32, shr_s_i32_fn, Value::I32);
binop32!(shr_u_i32, i32, shr_u_i32_fn, Value::I32);
unop32!(not_i32, i32, not_i32_fn, Value::I32);

binop_imm8!(add_i32_imm8, wrap_add_i32);
binop_imm8!(sub_i32_imm8, wrap_sub_i32);
binop_imm8!(mul_i32_imm8, wrap_mul_i32_unchecked);
binop_imm8!(and_i32_imm8, bit_and_i32);
binop_imm8!(or_i32_imm8, bit_or_i32);
binop_imm8!(xor_i32_imm8, bit_xor_i32);
binop_imm8!(shl_i32_imm8, shl_i32_fn);
binop_imm8!(shr_s_i32_imm8, shr_s_i32_fn);
binop_imm8!(shr_u_i32_imm8, shr_u_i32_fn);

fn wrap_add_i64(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}
fn wrap_sub_i64(a: i64, b: i64) -> i64 {
    a.wrapping_sub(b)
}
fn bit_and_i64(a: i64, b: i64) -> i64 {
    a & b
}
fn bit_or_i64(a: i64, b: i64) -> i64 {
    a | b
}
fn bit_xor_i64(a: i64, b: i64) -> i64 {
    a ^ b
}
fn shl_i64_fn(a: i64, b: i64) -> i64 {
    a.wrapping_shl((b as u32) & 0x3F)
}
fn shr_s_i64_fn(a: i64, b: i64) -> i64 {
    a.wrapping_shr((b as u32) & 0x3F)
}
fn shr_u_i64_fn(a: i64, b: i64) -> i64 {
    ((a as u64).wrapping_shr((b as u32) & 0x3F)) as i64
}
fn not_i64_fn(a: i64) -> i64 {
    !a
}
/// 64-bit MUL wraps silently rather than trapping (spec 4.1's explicit
/// carve-out for this one opcode).
fn wrap_mul_i64(a: i64, b: i64) -> i64 {
    a.wrapping_mul(b)
}

binop64!(add_i64, i64, wrap_add_i64, Value::I64);
binop64!(sub_i64, i64, wrap_sub_i64, Value::I64);
binop64!(mul_i64, i64, wrap_mul_i64, Value::I64);
binop64!(and_i64, i64, bit_and_i64, Value::I64);
binop64!(or_i64, i64, bit_or_i64, Value::I64);
binop64!(xor_i64, i64, bit_xor_i64, Value::I64);
binop64!(shl_i64, i64, shl_i64_fn, Value::I64);
binop64!(shr_s_i64, i64, shr_s_i64_fn, Value::I64);
binop64!(shr_u_i64, i64, shr_u_i64_fn, Value::I64);
unop64!(not_i64, i64, not_i64_fn, Value::I64);

/// traps on division by zero, and on the one signed overflow case
/// (`i32::MIN / -1`) that wrapping division cannot represent.
pub(super) fn div_s_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = raw32(vm, lhs_reg)? as i32;
    let rhs = raw32(vm, rhs_reg)? as i32;
    if rhs == 0 {
        return Err(trap(ResultCode::RuntimeTrapDivByZero, "DIV_S_I32 by zero"));
    }
    if lhs == i32::MIN && rhs == -1 {
        return Err(trap(ResultCode::RuntimeTrapIntegerOverflow, "DIV_S_I32 overflow"));
    }
    vm.reg_set(dest, Value::I32(lhs / rhs))?;
    Ok(Flow::Continue)
}

pub(super) fn div_u_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = raw32(vm, lhs_reg)?;
    let rhs = raw32(vm, rhs_reg)?;
    if rhs == 0 {
        return Err(trap(ResultCode::RuntimeTrapDivByZero, "DIV_U_I32 by zero"));
    }
    vm.reg_set(dest, Value::U32(lhs / rhs))?;
    Ok(Flow::Continue)
}

pub(super) fn rem_s_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = raw32(vm, lhs_reg)? as i32;
    let rhs = raw32(vm, rhs_reg)? as i32;
    if rhs == 0 {
        return Err(trap(ResultCode::RuntimeTrapDivByZero, "REM_S_I32 by zero"));
    }
    let result = if lhs == i32::MIN && rhs == -1 { 0 } else { lhs % rhs };
    vm.reg_set(dest, Value::I32(result))?;
    Ok(Flow::Continue)
}

pub(super) fn rem_u_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = raw32(vm, lhs_reg)?;
    let rhs = raw32(vm, rhs_reg)?;
    if rhs == 0 {
        return Err(trap(ResultCode::RuntimeTrapDivByZero, "REM_U_I32 by zero"));
    }
    vm.reg_set(dest, Value::U32(lhs % rhs))?;
    Ok(Flow::Continue)
}

pub(super) fn mul_i32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = raw32(vm, lhs_reg)? as i32;
    let rhs = raw32(vm, rhs_reg)? as i32;
    let result = lhs.checked_mul(rhs).ok_or_else(|| trap(ResultCode::RuntimeTrapIntegerOverflow, "MUL_I32 overflow"))?;
    vm.reg_set(dest, Value::I32(result))?;
    Ok(Flow::Continue)
}

pub(super) fn div_s_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = raw64(vm, lhs_reg)? as i64;
    let rhs = raw64(vm, rhs_reg)? as i64;
    if rhs == 0 {
        return Err(trap(ResultCode::RuntimeTrapDivByZero, "DIV_S_I64 by zero"));
    }
    if lhs == i64::MIN && rhs == -1 {
        return Err(trap(ResultCode::RuntimeTrapIntegerOverflow, "DIV_S_I64 overflow"));
    }
    vm.reg_set(dest, Value::I64(lhs / rhs))?;
    Ok(Flow::Continue)
}

pub(super) fn div_u_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = raw64(vm, lhs_reg)?;
    let rhs = raw64(vm, rhs_reg)?;
    if rhs == 0 {
        return Err(trap(ResultCode::RuntimeTrapDivByZero, "DIV_U_I64 by zero"));
    }
    vm.reg_set(dest, Value::U64(lhs / rhs))?;
    Ok(Flow::Continue)
}

pub(super) fn rem_s_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = raw64(vm, lhs_reg)? as i64;
    let rhs = raw64(vm, rhs_reg)? as i64;
    if rhs == 0 {
        return Err(trap(ResultCode::RuntimeTrapDivByZero, "REM_S_I64 by zero"));
    }
    let result = if lhs == i64::MIN && rhs == -1 { 0 } else { lhs % rhs };
    vm.reg_set(dest, Value::I64(result))?;
    Ok(Flow::Continue)
}

pub(super) fn rem_u_i64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = raw64(vm, lhs_reg)?;
    let rhs = raw64(vm, rhs_reg)?;
    if rhs == 0 {
        return Err(trap(ResultCode::RuntimeTrapDivByZero, "REM_U_I64 by zero"));
    }
    vm.reg_set(dest, Value::U64(lhs % rhs))?;
    Ok(Flow::Continue)
}

// -- float arithmetic --

macro_rules! binop_f32 {
    ($name:ident, $op:expr) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let lhs_reg = vm.fetch_u8()?;
            let rhs_reg = vm.fetch_u8()?;
            let lhs = read_f32(vm, lhs_reg)?;
            let rhs = read_f32(vm, rhs_reg)?;
            let f: fn(f32, f32) -> f32 = $op;
            vm.reg_set(dest, Value::F32(f(lhs, rhs)))?;
            Ok(Flow::Continue)
        }
    };
}

macro_rules! binop_f64 {
    ($name:ident, $op:expr) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let lhs_reg = vm.fetch_u8()?;
            let rhs_reg = vm.fetch_u8()?;
            let lhs = read_f64(vm, lhs_reg)?;
            let rhs = read_f64(vm, rhs_reg)?;
            let f: fn(f64, f64) -> f64 = $op;
            vm.reg_set(dest, Value::F64(f(lhs, rhs)))?;
            Ok(Flow::Continue)
        }
    };
}

fn fadd32(a: f32, b: f32) -> f32 {
    a + b
}
fn fsub32(a: f32, b: f32) -> f32 {
    a - b
}
fn fmul32(a: f32, b: f32) -> f32 {
    a * b
}
fn fdiv32(a: f32, b: f32) -> f32 {
    a / b
}
fn fadd64(a: f64, b: f64) -> f64 {
    a + b
}
fn fsub64(a: f64, b: f64) -> f64 {
    a - b
}
fn fmul64(a: f64, b: f64) -> f64 {
    a * b
}
fn fdiv64(a: f64, b: f64) -> f64 {
    a / b
}

binop_f32!(add_f32, fadd32);
binop_f32!(sub_f32, fsub32);
binop_f32!(mul_f32, fmul32);
binop_f32!(div_f32, fdiv32);
binop_f64!(add_f64, fadd64);
binop_f64!(sub_f64, fsub64);
binop_f64!(mul_f64, fmul64);
binop_f64!(div_f64, fdiv64);

pub(super) fn neg_f32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = read_f32(vm, src)?;
    vm.reg_set(dest, Value::F32(-v))?;
    Ok(Flow::Continue)
}

pub(super) fn neg_f64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let src = vm.fetch_u8()?;
    let v = read_f64(vm, src)?;
    vm.reg_set(dest, Value::F64(-v))?;
    Ok(Flow::Continue)
}

// -- compares --

macro_rules! cmp_i32 {
    ($name:ident, $conv:ty, $op:tt) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let lhs_reg = vm.fetch_u8()?;
            let rhs_reg = vm.fetch_u8()?;
            let lhs = raw32(vm, lhs_reg)? as $conv;
            let rhs = raw32(vm, rhs_reg)? as $conv;
            vm.reg_set(dest, Value::Bool(lhs $op rhs))?;
            Ok(Flow::Continue)
        }
    };
}

macro_rules! cmp_i64 {
    ($name:ident, $conv:ty, $op:tt) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let lhs_reg = vm.fetch_u8()?;
            let rhs_reg = vm.fetch_u8()?;
            let lhs = raw64(vm, lhs_reg)? as $conv;
            let rhs = raw64(vm, rhs_reg)? as $conv;
            vm.reg_set(dest, Value::Bool(lhs $op rhs))?;
            Ok(Flow::Continue)
        }
    };
}

cmp_i32!(cmp_eq_i32, i32, ==);
cmp_i32!(cmp_ne_i32, i32, !=);
cmp_i32!(cmp_lt_s_i32, i32, <);
cmp_i32!(cmp_lt_u_i32, u32, <);
cmp_i32!(cmp_gt_s_i32, i32, >);
cmp_i32!(cmp_gt_u_i32, u32, >);
cmp_i32!(cmp_le_s_i32, i32, <=);
cmp_i32!(cmp_le_u_i32, u32, <=);
cmp_i32!(cmp_ge_s_i32, i32, >=);
cmp_i32!(cmp_ge_u_i32, u32, >=);

cmp_i64!(cmp_eq_i64, i64, ==);
cmp_i64!(cmp_ne_i64, i64, !=);
cmp_i64!(cmp_lt_s_i64, i64, <);
cmp_i64!(cmp_lt_u_i64, u64, <);
cmp_i64!(cmp_gt_s_i64, i64, >);
cmp_i64!(cmp_gt_u_i64, u64, >);
cmp_i64!(cmp_le_s_i64, i64, <=);
cmp_i64!(cmp_le_u_i64, u64, <=);
cmp_i64!(cmp_ge_s_i64, i64, >=);
cmp_i64!(cmp_ge_u_i64, u64, >=);

/// CMP_EQ/NE trap on a NaN operand rather than silently returning false
/// (spec 4.1); the ordered comparisons (LT/GT/LE/GE) do not trap and use
/// Rust's IEEE-754 ordering, which already returns `false` against NaN.
fn check_not_nan_f32(a: f32, b: f32, opcode: &str) -> InterpretResult<()> {
    if a.is_nan() || b.is_nan() {
        return Err(trap(ResultCode::RuntimeTrap, &format!("{} operand is NaN", opcode)));
    }
    Ok(())
}

fn check_not_nan_f64(a: f64, b: f64, opcode: &str) -> InterpretResult<()> {
    if a.is_nan() || b.is_nan() {
        return Err(trap(ResultCode::RuntimeTrap, &format!("{} operand is NaN", opcode)));
    }
    Ok(())
}

pub(super) fn cmp_eq_f32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = read_f32(vm, lhs_reg)?;
    let rhs = read_f32(vm, rhs_reg)?;
    check_not_nan_f32(lhs, rhs, "CMP_EQ_F32")?;
    vm.reg_set(dest, Value::Bool(lhs == rhs))?;
    Ok(Flow::Continue)
}

pub(super) fn cmp_ne_f32(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = read_f32(vm, lhs_reg)?;
    let rhs = read_f32(vm, rhs_reg)?;
    check_not_nan_f32(lhs, rhs, "CMP_NE_F32")?;
    vm.reg_set(dest, Value::Bool(lhs != rhs))?;
    Ok(Flow::Continue)
}

macro_rules! cmp_f32_ordered {
    ($name:ident, $op:tt) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let lhs_reg = vm.fetch_u8()?;
            let rhs_reg = vm.fetch_u8()?;
            let lhs = read_f32(vm, lhs_reg)?;
            let rhs = read_f32(vm, rhs_reg)?;
            vm.reg_set(dest, Value::Bool(lhs $op rhs))?;
            Ok(Flow::Continue)
        }
    };
}

macro_rules! cmp_f64_ordered {
    ($name:ident, $op:tt) => {
        pub(super) fn $name(vm: &mut Vm) -> InterpretResult<Flow> {
            let dest = vm.fetch_u8()?;
            let lhs_reg = vm.fetch_u8()?;
            let rhs_reg = vm.fetch_u8()?;
            let lhs = read_f64(vm, lhs_reg)?;
            let rhs = read_f64(vm, rhs_reg)?;
            vm.reg_set(dest, Value::Bool(lhs $op rhs))?;
            Ok(Flow::Continue)
        }
    };
}

cmp_f32_ordered!(cmp_lt_f32, <);
cmp_f32_ordered!(cmp_gt_f32, >);
cmp_f32_ordered!(cmp_le_f32, <=);
cmp_f32_ordered!(cmp_ge_f32, >=);

pub(super) fn cmp_eq_f64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = read_f64(vm, lhs_reg)?;
    let rhs = read_f64(vm, rhs_reg)?;
    check_not_nan_f64(lhs, rhs, "CMP_EQ_F64")?;
    vm.reg_set(dest, Value::Bool(lhs == rhs))?;
    Ok(Flow::Continue)
}

pub(super) fn cmp_ne_f64(vm: &mut Vm) -> InterpretResult<Flow> {
    let dest = vm.fetch_u8()?;
    let lhs_reg = vm.fetch_u8()?;
    let rhs_reg = vm.fetch_u8()?;
    let lhs = read_f64(vm, lhs_reg)?;
    let rhs = read_f64(vm, rhs_reg)?;
    check_not_nan_f64(lhs, rhs, "CMP_NE_F64")?;
    vm.reg_set(dest, Value::Bool(lhs != rhs))?;
    Ok(Flow::Continue)
}

cmp_f64_ordered!(cmp_lt_f64, <);
cmp_f64_ordered!(cmp_gt_f64, >);
cmp_f64_ordered!(cmp_le_f64, <=);
cmp_f64_ordered!(cmp_ge_f64, >=);
