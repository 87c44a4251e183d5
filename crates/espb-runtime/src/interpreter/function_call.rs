// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! CALL_IMPORT, CALL, CALL_INDIRECT, CALL_INDIRECT_PTR and END (spec 4.1,
//! 4.2, 6).
//!
//! grounded on `process_function_call.rs`'s call/return plumbing for the
//! frame push/pop shape, and on `invoke_import_directly` (`mod.rs`) for the
//! CALL_IMPORT instance-pointer/closure pattern, which this module reuses
//! verbatim since both are marshalling the same host-import ABI, just from
//! a register operand instead of a Rust argument slice.
//!
//! argument-passing convention for a local call (CALL/CALL_INDIRECT/
//! CALL_INDIRECT_PTR carry no argument-register list in their own operand
//! encoding): the callee's first N registers are seeded from the caller's
//! own R0..R(N-1), and its results are written back into the same R0.. on
//! return -- the convention END's doc comment calls "read from R0" (DESIGN.md).

use espb_isa::{FuncRef, InterpreterError, InterpretResult, ResultCode, Value};

use crate::bridge::{self, AbiType};
use crate::host_import;
use crate::instance::Instance;

use super::{Flow, Vm};

/// where a CALL_INDIRECT/CALL_INDIRECT_PTR register operand resolves to
/// (spec 4.2). `Native` is only ever produced for `0x0D`; `0x0B` rejects a
/// pointer outside `memory_data` instead of returning it.
enum IndirectTarget {
    Local(u32),
    Native(usize),
}

/// classifies a CALL_INDIRECT(_PTR) register operand (spec 4.2): a tagged
/// value decodes through [`FuncRef`] as today; an untagged small integer is
/// taken as a direct local function index; a `PTR`-tagged value is either a
/// `func_ptr_map` offset inside `memory_data` or -- only when `allow_native`
/// -- a genuine native function pointer (path C, `0x0D` only).
fn classify_indirect_operand(vm: &Vm, value: Value, allow_native: bool) -> InterpretResult<IndirectTarget> {
    let num_functions = vm.module.num_functions() as u32;

    if let Some(ptr) = value.as_ptr() {
        return if vm.instance.memory.is_in_bounds(ptr, 1) {
            vm.module
                .function_index_at_data_offset(ptr as u32)
                .map(IndirectTarget::Local)
                .ok_or_else(|| InterpreterError::new(ResultCode::InvalidFuncIndex, "pointer is inside memory_data but not present in func_ptr_map"))
        } else if allow_native {
            Ok(IndirectTarget::Native(ptr))
        } else {
            Err(InterpreterError::new(ResultCode::InvalidFuncIndex, "pointer is outside memory_data; only CALL_INDIRECT_PTR dispatches into native code"))
        };
    }

    let raw = value.to_raw_bits() as u32;
    if FuncRef::looks_tagged(raw) {
        let func_ref = FuncRef::decode(raw, num_functions)
            .ok_or_else(|| InterpreterError::new(ResultCode::InvalidFuncIndex, "register tags a function index out of range"))?;
        return Ok(IndirectTarget::Local(func_ref.as_local().expect("FuncRef::decode only ever yields FuncRef::Local")));
    }
    if raw < num_functions {
        return Ok(IndirectTarget::Local(raw));
    }
    Err(InterpreterError::new(ResultCode::InvalidFuncIndex, "register names neither a valid local function index nor a func_ptr_map pointer"))
}

const VARIADIC_MARKER: u8 = 0xAA;

/// CALL_IMPORT's optional variadic type-tag block (spec 4.1): present only
/// when the target import's signature declares a variadic tail.
fn maybe_fetch_variadic_tags(vm: &mut Vm) -> InterpretResult<Option<Vec<espb_isa::ValueTag>>> {
    if vm.peek_u8().ok() != Some(VARIADIC_MARKER) {
        return Ok(None);
    }
    vm.fetch_u8()?;
    let argc = vm.fetch_u8()?;
    let mut tags = Vec::with_capacity(argc as usize);
    for _ in 0..argc {
        let byte = vm.fetch_u8()?;
        let tag = espb_isa::ValueTag::from_byte(byte)
            .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, "unknown variadic type-tag byte"))?;
        tags.push(tag);
    }
    Ok(Some(tags))
}

/// mirrors `mod.rs`'s `invoke_import_directly`, reading the import index
/// and arguments from the current register frame instead of a Rust slice,
/// and writing the result (if any) back into R0 instead of returning it.
pub(super) fn call_import(vm: &mut Vm) -> InterpretResult<Flow> {
    let import_index = vm.fetch_u16()? as u32;
    let variadic_tags = maybe_fetch_variadic_tags(vm)?;

    let import = vm
        .module
        .imports
        .get(import_index as usize)
        .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, "CALL_IMPORT index out of range"))?;
    let arg_tags = host_import::import_arg_tags(import, vm.module, variadic_tags.as_deref())?;

    if arg_tags.len() > vm.config.ffi_args_max {
        return Err(InterpreterError::new(ResultCode::InvalidOperand, "CALL_IMPORT argument count exceeds ffi_args_max"));
    }
    let args: Vec<Value> = (0..arg_tags.len() as u8).map(|reg| vm.reg_get(reg)).collect::<InterpretResult<_>>()?;

    let result_tag = vm.module.signature_of_import(import_index).and_then(|s| s.results.first().copied());
    let result_abi = result_tag.map(AbiType::from_tag).transpose()?;

    let module = vm.module;
    let config = vm.config;
    let instance_ptr: *mut Instance = &mut *vm.instance as *mut Instance;
    let Instance { memory, host_imports, callbacks, .. } = &mut *vm.instance;

    let mut cb_closure = |local_idx: u32, user_data: Option<Value>| -> InterpretResult<usize> {
        callbacks.get_or_create(module, instance_ptr, config, local_idx, user_data)
    };

    let prepared = host_import::prepare_call(module, memory, import_index, &args, &arg_tags, &mut cb_closure)?;

    // spec 4.3 step 7: a blocking import checkpoints the caller's live
    // register frame before the native call, since the call may suspend
    // this thread long enough for re-entrant dispatcher activity (a
    // callback trampoline firing on the same thread) to run against the
    // same shadow stack while the frame is still "in flight".
    let blocking = host_imports.is_blocking(import_index)?;
    let frame_size = vm.module.functions[vm.local_function_index as usize].num_virtual_regs as usize;
    let checkpoint = blocking.then(|| vm.ctx.shadow_stack.frame_slice(vm.ctx.shadow_stack.fp, frame_size).to_vec());

    let bits = prepared.execute(host_imports, memory, import_index, result_abi)?;

    if let Some(saved) = checkpoint {
        let fp = vm.ctx.shadow_stack.fp;
        vm.ctx.shadow_stack.frame_slice_mut(fp, frame_size).copy_from_slice(&saved);
    }

    if let (Some(tag), Some(bits)) = (result_tag, bits) {
        vm.reg_set(0, Value::from_raw_bits(tag, bits))?;
    }
    Ok(Flow::Continue)
}

/// shared by CALL/CALL_INDIRECT/CALL_INDIRECT_PTR once a concrete local
/// function index has been resolved (spec 4.2).
///
/// a leaf callee's frame is carved directly above the caller's without
/// touching the caller's own registers -- it issues no further CALL, so
/// nothing above the caller's frame is ever referenced again once it
/// returns. a non-leaf callee instead snapshots the caller's frame up to
/// the callee's eventual landing spot first, since the callee's own nested
/// calls will grow `sp` further while it runs; the snapshot is restored
/// verbatim on END. `saved_num_regs` lets END use the same rewind formula
/// (`current_fp - saved_num_regs`) for both cases: zero for the leaf path,
/// the caller's frame size for the snapshotted path.
fn perform_local_call(vm: &mut Vm, callee_local_index: u32) -> InterpretResult<Flow> {
    let callee_body = vm
        .module
        .functions
        .get(callee_local_index as usize)
        .ok_or_else(|| InterpreterError::new(ResultCode::InvalidFuncIndex, "call target out of range"))?;
    let num_params = vm
        .module
        .signature_of_local(callee_local_index)
        .map(|s| s.params.len())
        .unwrap_or(0);
    let callee_frame_size = callee_body.num_virtual_regs as usize;
    let is_leaf = callee_body.is_leaf();

    let args: Vec<Value> = (0..num_params as u8).map(|reg| vm.reg_get(reg)).collect::<InterpretResult<_>>()?;

    let caller_fp = vm.ctx.shadow_stack.fp;
    let caller_frame_size = vm.module.functions[vm.local_function_index as usize].num_virtual_regs as usize;
    let return_pc = vm.pc;

    let (new_fp, saved_fp, saved_num_regs) = if is_leaf {
        let new_fp = vm.ctx.shadow_stack.sp;
        vm.ctx.shadow_stack.ensure_space(callee_frame_size)?;
        vm.ctx.shadow_stack.zero_frame(new_fp, callee_frame_size);
        vm.ctx.shadow_stack.sp = new_fp + callee_frame_size;
        (new_fp, caller_fp, 0u32)
    } else {
        vm.ctx.shadow_stack.snapshot_frame(caller_fp, caller_frame_size)?;
        let new_fp = vm.ctx.shadow_stack.sp;
        vm.ctx.shadow_stack.ensure_space(callee_frame_size)?;
        vm.ctx.shadow_stack.zero_frame(new_fp, callee_frame_size);
        vm.ctx.shadow_stack.sp = new_fp + callee_frame_size;
        (new_fp, caller_fp, caller_frame_size as u32)
    };

    for (i, arg) in args.into_iter().enumerate() {
        vm.ctx.shadow_stack.set(new_fp, i, arg)?;
    }
    vm.ctx.call_stack.push(return_pc, saved_fp, vm.local_function_index, Some(saved_fp), saved_num_regs)?;

    vm.local_function_index = callee_local_index;
    vm.ctx.shadow_stack.fp = new_fp;
    vm.pc = 0;
    Ok(Flow::Continue)
}

pub(super) fn call(vm: &mut Vm) -> InterpretResult<Flow> {
    let local_index = vm.fetch_u16()? as u32;
    perform_local_call(vm, local_index)
}

/// CALL_INDIRECT's register either carries a tagged local function
/// reference (the encoding TABLE.GET produces), a direct untagged function
/// index, or a `func_ptr_map` pointer inside `memory_data` -- a pointer
/// outside it is rejected, since only `0x0D` dispatches into native code
/// (spec 4.2). signature-index equality is required for the fast path
/// (tagged/direct); a pointer resolved through `func_ptr_map` instead
/// requires only signature-compatibility, matching `0x0D`'s path A
/// (DESIGN.md).
pub(super) fn call_indirect(vm: &mut Vm) -> InterpretResult<Flow> {
    let reg = vm.fetch_u8()?;
    let expected_signature_index = vm.fetch_u16()? as u32;
    let value = vm.reg_get(reg)?;
    let via_pointer = value.as_ptr().is_some();

    let local_index = match classify_indirect_operand(vm, value, false)? {
        IndirectTarget::Local(i) => i,
        IndirectTarget::Native(_) => unreachable!("classify_indirect_operand never returns Native when allow_native is false"),
    };

    let body = vm
        .module
        .functions
        .get(local_index as usize)
        .ok_or_else(|| InterpreterError::new(ResultCode::InvalidFuncIndex, "CALL_INDIRECT target out of range"))?;

    if via_pointer {
        check_signature_compatible(vm, body.signature_index, expected_signature_index, "CALL_INDIRECT")?;
    } else if body.signature_index != expected_signature_index {
        return Err(InterpreterError::new(ResultCode::TypeMismatch, "CALL_INDIRECT signature mismatch"));
    }
    perform_local_call(vm, local_index)
}

fn check_signature_compatible(vm: &Vm, actual_index: u32, expected_index: u32, opname: &str) -> InterpretResult<()> {
    let expected = vm
        .module
        .signatures
        .get(expected_index as usize)
        .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, format!("{opname} expected signature index out of range")))?;
    let actual = vm
        .module
        .signatures
        .get(actual_index as usize)
        .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, format!("{opname} target has no recorded signature")))?;
    if !actual.is_compatible_with(expected) {
        return Err(InterpreterError::new(ResultCode::TypeMismatch, format!("{opname} signature mismatch")));
    }
    Ok(())
}

/// CALL_INDIRECT_PTR's register resolves through three paths (spec 4.2):
/// (A) a tagged/direct local reference, or a `func_ptr_map` pointer inside
/// `memory_data`, dispatches as a guest call with a signature-compatibility
/// check; (B) a pointer inside `memory_data` absent from `func_ptr_map` is
/// rejected by [`classify_indirect_operand`]; (C) a pointer outside
/// `memory_data` is a genuine native function pointer, invoked through the
/// FFI bridge (C4) with the expected signature as its native calling
/// convention.
pub(super) fn call_indirect_ptr(vm: &mut Vm) -> InterpretResult<Flow> {
    let reg = vm.fetch_u8()?;
    let expected_signature_index = vm.fetch_u16()? as u32;
    let value = vm.reg_get(reg)?;

    match classify_indirect_operand(vm, value, true)? {
        IndirectTarget::Local(local_index) => {
            let body = vm
                .module
                .functions
                .get(local_index as usize)
                .ok_or_else(|| InterpreterError::new(ResultCode::InvalidFuncIndex, "CALL_INDIRECT_PTR target out of range"))?;
            check_signature_compatible(vm, body.signature_index, expected_signature_index, "CALL_INDIRECT_PTR")?;
            perform_local_call(vm, local_index)
        }
        IndirectTarget::Native(ptr) => perform_native_ptr_call(vm, ptr, expected_signature_index),
    }
}

/// path C of CALL_INDIRECT_PTR: the register held a pointer outside
/// `memory_data`, so it is a real native function address rather than a
/// guest one. marshals arguments out of R0..R(num_params-1) -- the
/// function-pointer register itself is never counted as an argument, per
/// spec 4.2's "the first register read holds the function pointer and is
/// skipped when collecting arguments" -- through the same FFI bridge (C4)
/// CALL_IMPORT uses, and writes the single return value (if any) to R0.
fn perform_native_ptr_call(vm: &mut Vm, target_ptr: usize, expected_signature_index: u32) -> InterpretResult<Flow> {
    let signature = vm
        .module
        .signatures
        .get(expected_signature_index as usize)
        .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, "CALL_INDIRECT_PTR expected signature index out of range"))?;

    let param_abi: Vec<AbiType> = signature.params.iter().map(|tag| AbiType::from_tag(*tag)).collect::<InterpretResult<_>>()?;
    if param_abi.len() > vm.config.ffi_args_max {
        return Err(InterpreterError::new(ResultCode::InvalidOperand, "CALL_INDIRECT_PTR argument count exceeds ffi_args_max"));
    }
    let result_tag = signature.results.first().copied();
    let result_abi: Vec<AbiType> = result_tag.map(AbiType::from_tag).transpose()?.into_iter().collect();

    let abi_values: Vec<u64> = (0..param_abi.len() as u8).map(|reg| vm.reg_get(reg).map(|v| v.to_raw_bits())).collect::<InterpretResult<_>>()?;
    let params_buf: Vec<u8> = abi_values.iter().flat_map(|bits| bits.to_le_bytes()).collect();
    let mut results_buf = [0u8; bridge::SLOT_SIZE_IN_BYTES];

    let wrapper = bridge::build_call_wrapper(&param_abi, &result_abi);
    unsafe {
        wrapper(target_ptr as *const u8, params_buf.as_ptr(), results_buf.as_mut_ptr());
    }

    if let Some(tag) = result_tag {
        vm.reg_set(0, Value::from_raw_bits(tag, u64::from_le_bytes(results_buf)))?;
    }
    Ok(Flow::Continue)
}

pub(super) fn end(vm: &mut Vm) -> InterpretResult<Flow> {
    let sig = vm
        .module
        .signature_of_local(vm.local_function_index)
        .expect("function index validated at invoke/CALL time");
    let num_results = sig.results.len();
    let results: Vec<Value> = (0..num_results as u8).map(|reg| vm.reg_get(reg)).collect::<InterpretResult<_>>()?;

    let popped = vm.ctx.call_stack.pop()?;
    for ptr in &popped.alloca_ptrs {
        vm.instance.heap.free(*ptr)?;
    }

    match popped.return_pc {
        None => Ok(Flow::Done(results)),
        Some(return_pc) => {
            let current_fp = vm.ctx.shadow_stack.fp;
            let restored_sp = current_fp - popped.saved_num_regs as usize;
            if popped.saved_num_regs > 0 {
                vm.ctx.shadow_stack.restore_frame(popped.saved_fp, restored_sp, popped.saved_num_regs as usize);
            }
            vm.ctx.shadow_stack.sp = restored_sp;
            vm.ctx.shadow_stack.fp = popped.saved_fp;
            vm.local_function_index = popped.caller_function_index;
            vm.pc = return_pc;

            for (i, value) in results.into_iter().enumerate() {
                vm.reg_set(i as u8, value)?;
            }
            Ok(Flow::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use espb_isa::ValueTag;
    use espb_module::{FunctionFlags, ModuleBuilder};

    use crate::config::VmConfig;
    use crate::context::ExecutionContext;
    use crate::host_import::HostFunctionResolver;
    use crate::instance::Instance;
    use crate::interpreter::invoke;

    use super::*;

    extern "C" fn add_one(x: i32) -> i32 {
        x + 1
    }

    struct AddOneResolver;
    impl HostFunctionResolver for AddOneResolver {
        fn resolve(&self, _module_id: u8, _entity_name: &str) -> Option<usize> {
            Some(add_one as usize)
        }
    }

    /// spec 4.3 step 7: a blocking import's native call leaves every
    /// register of the calling frame untouched except R0 (the result),
    /// exactly as a non-blocking call would -- the checkpoint exists to
    /// survive re-entrant dispatcher activity during the call, not to
    /// change the call's own observable effect on the frame.
    #[test]
    fn blocking_call_import_preserves_unrelated_registers() {
        let mut b = ModuleBuilder::new();
        let sig = b.add_signature(vec![ValueTag::I32], vec![ValueTag::I32]);
        let import_index = b.add_import(0, "add_one", sig, true);

        let caller_sig = b.add_signature(vec![], vec![ValueTag::I32]);
        let mut code = vec![
            Opcode::LdcI32Imm as u8, 0, 41, 0, 0, 0, // r0 = 41 (the argument)
            Opcode::LdcI32Imm as u8, 1, 7, 0, 0, 0, // r1 = 7, unrelated to the call
        ];
        code.push(Opcode::CallImport as u8);
        code.extend_from_slice(&(import_index as u16).to_le_bytes());
        // r0 (the import's result, 42) + r1 (untouched by the call, 7):
        // proves r1 survived the blocking checkpoint/restore round trip.
        code.extend_from_slice(&[Opcode::AddI32 as u8, 0, 0, 1]);
        code.push(Opcode::End as u8);
        b.add_function(caller_sig, 2, 1, FunctionFlags::empty(), code);
        let module = b.build();

        let config = VmConfig::default();
        let mut instance = Instance::new(&module, &config, &AddOneResolver).expect("instantiation");
        let mut ctx = ExecutionContext::new(&config);
        let result = invoke(&module, &mut instance, &mut ctx, &config, 1, &[]).unwrap();

        assert_eq!(result, vec![Value::I32(49)]);
    }
}
