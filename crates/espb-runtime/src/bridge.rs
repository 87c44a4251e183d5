// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! the FFI bridge (spec 4.3, component C4) and the callback trampoline
//! factory (spec 4.4, component C7).
//!
//! grounded on `build_vm_to_external_function` (the VM-calls-host
//! direction: a JIT-built wrapper that loads marshalled arguments from a
//! flat buffer, `call_indirect`s the resolved host pointer, and stores the
//! single return slot back) and `build_host_to_vm_function` (the
//! host-calls-VM direction, used here for the callback trampoline: a
//! JIT-built native-callable stub whose body calls a fixed Rust delegate
//! function with the real arguments spilled to a stack slot). both use a
//! process-wide `JITModule` singleton built once, and both dodge JIT
//! symbol collisions with a random numeric suffix on every generated
//! function name -- two wrapper/trampoline builds for the same shape are
//! expected over a module's lifetime.

use std::sync::{Mutex, MutexGuard, Once};

use cranelift_codegen::ir::{types, AbiParam, Function, InstBuilder, MemFlags, StackSlotData, StackSlotKind, Type, UserFuncName};
use cranelift_codegen::settings::{self, Configurable};
use cranelift_frontend::{FunctionBuilder, FunctionBuilderContext};
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{DataDescription, Linkage, Module as ClifModule};
use rand::Rng;

use espb_isa::{InterpreterError, InterpretResult, ResultCode, ValueTag};

/// the slot width shared by every marshalled argument/result buffer; wide
/// enough to hold any scalar tag (including F64/PTR) without per-tag
/// layout logic.
pub const SLOT_SIZE_IN_BYTES: usize = 8;

/// native ABI categories a [`ValueTag`] maps onto (spec 4.3 step 2).
/// sub-word integer tags and BOOL widen to `I32`; 64-bit integers pass as
/// `I64`; `PTR` passes as the host's pointer width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiType {
    I32,
    I64,
    F32,
    F64,
    Ptr,
}

impl AbiType {
    pub fn from_tag(tag: ValueTag) -> InterpretResult<AbiType> {
        use ValueTag::*;
        Ok(match tag {
            I8 | U8 | I16 | U16 | I32 | U32 | BOOL => AbiType::I32,
            I64 | U64 => AbiType::I64,
            F32 => AbiType::F32,
            F64 => AbiType::F64,
            PTR => AbiType::Ptr,
            V128 | VOID => {
                return Err(InterpreterError::new(ResultCode::TypeMismatch, "type has no native ABI representation"))
            }
        })
    }

    fn clif_type(self, pointer_type: Type) -> Type {
        match self {
            AbiType::I32 => types::I32,
            AbiType::I64 => types::I64,
            AbiType::F32 => types::F32,
            AbiType::F64 => types::F64,
            AbiType::Ptr => pointer_type,
        }
    }
}

static mut JIT_SINGLETON: Mutex<Option<JitContext>> = Mutex::new(None);
static INIT: Once = Once::new();

struct JitContext {
    function_builder_context: FunctionBuilderContext,
    data_description: DataDescription,
    module: JITModule,
}

impl JitContext {
    fn new() -> Self {
        let mut flag_builder = settings::builder();
        flag_builder.set("use_colocated_libcalls", "false").unwrap();
        flag_builder.set("is_pic", "true").unwrap();

        let isa_builder = cranelift_native::builder()
            .unwrap_or_else(|msg| panic!("host machine is not supported: {}", msg));
        let isa = isa_builder.finish(settings::Flags::new(flag_builder)).unwrap();

        let jit_builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let jit_module = JITModule::new(jit_builder);

        JitContext {
            function_builder_context: FunctionBuilderContext::new(),
            data_description: DataDescription::new(),
            module: jit_module,
        }
    }
}

fn jit() -> MutexGuard<'static, Option<JitContext>> {
    INIT.call_once(|| unsafe { JIT_SINGLETON = Mutex::new(Some(JitContext::new())) });
    unsafe { JIT_SINGLETON.lock().unwrap() }
}

fn random_suffixed(prefix: &str) -> String {
    format!("{}_{}", prefix, rand::thread_rng().gen::<u32>())
}

/// `extern "C" fn(target_fn_ptr: *const u8, params_ptr: *const u8, results_ptr: *mut u8)`.
/// used by [`build_call_wrapper`]'s generated code and by the callers that
/// invoke it after populating `params_ptr`.
pub type CallWrapperFn = unsafe extern "C" fn(*const u8, *const u8, *mut u8);

/// builds (or would build, at real JIT time) a native stub that, given a
/// resolved host function pointer and flat param/result buffers, performs
/// the actual native call (spec 4.3 steps 2/5 -- "FFI argument setup" /
/// "standard synchronous marshalling"). one wrapper shape is built per
/// distinct `(params, results)` signature encountered; callers are
/// expected to cache the returned pointer themselves (see
/// `host_import.rs`'s resolver cache, C8) rather than rebuild it per call.
pub fn build_call_wrapper(params: &[AbiType], results: &[AbiType]) -> CallWrapperFn {
    let mut guard = jit();
    let ctx = guard.as_mut().unwrap();
    let pointer_type = ctx.module.isa().pointer_type();
    let mem_flags = MemFlags::new();

    let mut target_sig = ctx.module.make_signature();
    for p in params {
        target_sig.params.push(AbiParam::new(p.clif_type(pointer_type)));
    }
    if let Some(r) = results.first() {
        target_sig.returns.push(AbiParam::new(r.clif_type(pointer_type)));
    }

    let mut wrapper_sig = ctx.module.make_signature();
    wrapper_sig.params.push(AbiParam::new(pointer_type)); // target_fn_ptr
    wrapper_sig.params.push(AbiParam::new(pointer_type)); // params_ptr
    wrapper_sig.params.push(AbiParam::new(pointer_type)); // results_ptr

    let name = random_suffixed("espb_call_wrapper");
    let func_id = ctx.module.declare_function(&name, Linkage::Local, &wrapper_sig).unwrap();
    let mut func = Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), wrapper_sig);

    let mut builder = FunctionBuilder::new(&mut func, &mut ctx.function_builder_context);
    let block0 = builder.create_block();
    builder.append_block_params_for_function_params(block0);
    builder.switch_to_block(block0);

    let target_ptr = builder.block_params(block0)[0];
    let params_ptr = builder.block_params(block0)[1];
    let results_ptr = builder.block_params(block0)[2];

    let loaded_params: Vec<_> = params
        .iter()
        .enumerate()
        .map(|(i, p)| {
            builder
                .ins()
                .load(p.clif_type(pointer_type), mem_flags, params_ptr, (i * SLOT_SIZE_IN_BYTES) as i32)
        })
        .collect();

    let sig_ref = builder.import_signature(target_sig);
    let call = builder.ins().call_indirect(sig_ref, target_ptr, &loaded_params);

    if !results.is_empty() {
        let ret = builder.inst_results(call)[0];
        builder.ins().store(mem_flags, ret, results_ptr, 0);
    }

    builder.ins().return_(&[]);
    builder.seal_all_blocks();
    builder.finalize();

    let mut codegen_ctx = ctx.module.make_context();
    codegen_ctx.func = func;
    ctx.module.define_function(func_id, &mut codegen_ctx).unwrap();
    ctx.module.clear_context(&mut codegen_ctx);
    ctx.module.finalize_definitions().unwrap();

    let raw = ctx.module.get_finalized_function(func_id);
    unsafe { std::mem::transmute::<*const u8, CallWrapperFn>(raw) }
}

/// `extern "C" fn(context_ptr: *mut u8, params_ptr: *const u8, results_ptr: *mut u8)`,
/// the shape every callback trampoline's delegate must have -- the
/// trampoline spills its (native-ABI) arguments to `params_ptr` and reads
/// its single return value back from `results_ptr`.
pub type TrampolineDelegateFn = extern "C" fn(*mut u8, *const u8, *mut u8);

/// builds a native-callable trampoline whose signature is the *callback's*
/// native ABI shape. when host code calls the returned pointer, the
/// generated body spills the real arguments to a stack slot and calls
/// `delegate_addr` with `(context_addr, params_ptr, results_ptr)` --
/// `delegate_addr` is expected to decode `params_ptr`, re-enter the VM
/// (spec 4.4), and write the guest function's return value to
/// `results_ptr` (spec 4.4 steps 1-3).
pub fn build_callback_trampoline(
    delegate_addr: usize,
    context_addr: usize,
    params: &[AbiType],
    results: &[AbiType],
) -> *const u8 {
    let mut guard = jit();
    let ctx = guard.as_mut().unwrap();
    let pointer_type = ctx.module.isa().pointer_type();
    let mem_flags = MemFlags::new();

    let mut delegate_sig = ctx.module.make_signature();
    delegate_sig.params.push(AbiParam::new(pointer_type)); // context_ptr
    delegate_sig.params.push(AbiParam::new(pointer_type)); // params_ptr
    delegate_sig.params.push(AbiParam::new(pointer_type)); // results_ptr

    let mut trampoline_sig = ctx.module.make_signature();
    for p in params {
        trampoline_sig.params.push(AbiParam::new(p.clif_type(pointer_type)));
    }
    if let Some(r) = results.first() {
        trampoline_sig.returns.push(AbiParam::new(r.clif_type(pointer_type)));
    }

    let name = random_suffixed("espb_callback_trampoline");
    let func_id = ctx.module.declare_function(&name, Linkage::Local, &trampoline_sig).unwrap();
    let mut func = Function::with_name_signature(UserFuncName::user(0, func_id.as_u32()), trampoline_sig);

    let ss_params = func.create_sized_stack_slot(StackSlotData::new(
        StackSlotKind::ExplicitSlot,
        (SLOT_SIZE_IN_BYTES * params.len().max(1)) as u32,
        3,
    ));
    let ss_results = func.create_sized_stack_slot(StackSlotData::new(
        StackSlotKind::ExplicitSlot,
        SLOT_SIZE_IN_BYTES as u32,
        3,
    ));

    let mut builder = FunctionBuilder::new(&mut func, &mut ctx.function_builder_context);
    let block0 = builder.create_block();
    builder.append_block_params_for_function_params(block0);
    builder.switch_to_block(block0);

    for (i, _) in params.iter().enumerate() {
        let v = builder.block_params(block0)[i];
        builder.ins().stack_store(v, ss_params, (i * SLOT_SIZE_IN_BYTES) as i32);
    }

    let callee = builder.ins().iconst(pointer_type, delegate_addr as i64);
    let context_arg = builder.ins().iconst(pointer_type, context_addr as i64);
    let params_arg = builder.ins().stack_addr(pointer_type, ss_params, 0);
    let results_arg = builder.ins().stack_addr(pointer_type, ss_results, 0);

    let sig_ref = builder.import_signature(delegate_sig);
    builder.ins().call_indirect(sig_ref, callee, &[context_arg, params_arg, results_arg]);

    if let Some(r) = results.first() {
        let ret = builder.ins().stack_load(r.clif_type(pointer_type), ss_results, 0);
        builder.ins().return_(&[ret]);
    } else {
        builder.ins().return_(&[]);
    }

    builder.seal_all_blocks();
    builder.finalize();

    let mut codegen_ctx = ctx.module.make_context();
    codegen_ctx.func = func;
    ctx.module.define_function(func_id, &mut codegen_ctx).unwrap();
    ctx.module.clear_context(&mut codegen_ctx);
    ctx.module.finalize_definitions().unwrap();

    ctx.module.get_finalized_function(func_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sub_word_and_bool_tags_widen_to_i32() {
        assert_eq!(AbiType::from_tag(ValueTag::U8).unwrap(), AbiType::I32);
        assert_eq!(AbiType::from_tag(ValueTag::BOOL).unwrap(), AbiType::I32);
        assert_eq!(AbiType::from_tag(ValueTag::I64).unwrap(), AbiType::I64);
    }

    #[test]
    fn void_and_v128_have_no_abi_type() {
        assert!(AbiType::from_tag(ValueTag::VOID).is_err());
        assert!(AbiType::from_tag(ValueTag::V128).is_err());
    }
}
