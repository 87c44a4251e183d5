// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! the VM-facing half of the callback trampoline mechanism (spec 4.4,
//! component C7): a per-instance cache of `(guest function index) ->
//! native trampoline address`, and the delegate the trampoline calls into
//! to re-enter the dispatcher.
//!
//! grounded on `ecall/callback.rs`'s `get_callback_function` /
//! `ecall/function_address.rs`'s `get_callback_function_ptr`: both cache a
//! trampoline per `(module_index, function_internal_index)`, built once via
//! `build_host_to_vm_function`/`build_host_to_vm_delegate_function` and
//! reused for every subsequent call -- the same shape `build_callback_trampoline`
//! (bridge.rs) exists to serve. Neither function threads a
//! per-registration `user_data` value through the cache key (their thread
//! context is a process-wide singleton); this crate keeps that precedent
//! -- one trampoline per function index, with the *most recently
//! registered* user_data value honoured, matching `thread_context.rs`'s
//! single callback-function-table-per-context design.

use std::collections::HashMap;

use espb_isa::{InterpreterError, InterpretResult, ResultCode, Value, ValueTag};
use espb_module::Module;

use crate::bridge::{self, AbiType, SLOT_SIZE_IN_BYTES};
use crate::config::VmConfig;
use crate::context::ExecutionContext;
use crate::instance::Instance;

/// everything the delegate needs to decode a native call and re-enter the
/// VM (spec 4.4 steps 1-4). boxed and leaked into the trampoline's closure
/// context; reclaimed when its [`CallbackRegistry`] entry is dropped, which
/// only happens at instance teardown (spec 5, "callback trampolines shared
/// by pointer").
struct CallbackContext {
    module_ptr: *const Module,
    instance_ptr: *mut Instance,
    config: VmConfig,
    /// global function index (imports precede locals, spec 6).
    global_function_index: u32,
    native_param_abi: Vec<AbiType>,
    native_param_tags: Vec<ValueTag>,
    result_tag: Option<ValueTag>,
    /// the value supplied in the corresponding `user_data_param_idx`
    /// register at registration time (spec 4.4 step 4); appended as the
    /// guest call's final argument when present, since the native caller
    /// never re-supplies it on each invocation.
    user_data: Option<Value>,
}

// SAFETY: a `CallbackContext` is only ever dereferenced from inside
// `callback_delegate`, which runs on whatever thread the host calls the
// trampoline from; the spec's concurrency model (5) already requires the
// host to serialize access to one instance's shared state, so this crate
// does not add its own synchronization on top.
unsafe impl Send for CallbackContext {}
unsafe impl Sync for CallbackContext {}

pub struct CallbackRegistry {
    trampolines: HashMap<u32, (*const u8, Box<CallbackContext>)>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        CallbackRegistry {
            trampolines: HashMap::new(),
        }
    }

    /// returns the cached trampoline for `global_function_index`, building
    /// one on first use (spec 4.4). `user_data` (if any) replaces the
    /// cached context's stored value on every call, so re-registering the
    /// same guest function with a different user_data value (spec 3
    /// invariant 5) still reaches the right closure state on the next
    /// invocation.
    ///
    /// `instance_ptr` is taken as a raw pointer rather than `&mut Instance`
    /// so a caller already holding split field-borrows of its own
    /// `Instance` (the CALL_IMPORT handler needs `memory` and `callbacks`
    /// borrowed independently, see `interpreter::function_call`) can still
    /// reach this without fighting the borrow checker; the pointer is only
    /// ever dereferenced later, from a fresh call stack frame, by
    /// `callback_delegate`.
    pub fn get_or_create(
        &mut self,
        module: &Module,
        instance_ptr: *mut Instance,
        config: &VmConfig,
        local_function_index: u32,
        user_data: Option<Value>,
    ) -> InterpretResult<usize> {
        let global_function_index = module.num_imports() as u32 + local_function_index;

        if let Some((addr, ctx)) = self.trampolines.get_mut(&global_function_index) {
            ctx.user_data = user_data;
            return Ok(*addr as usize);
        }

        let signature = module
            .signature_of_local(local_function_index)
            .ok_or_else(|| InterpreterError::new(ResultCode::InvalidFuncIndex, "callback target has no signature"))?;

        if signature.results.len() > 1 {
            return Err(InterpreterError::new(
                ResultCode::InvalidOperand,
                "callback target declares more than one return value",
            ));
        }

        // when user_data is present, it is carried by the context rather
        // than re-supplied on every native call, so the trampoline's
        // exposed native arity is one narrower than the guest function's
        // full declared signature (spec 4.4 step 4).
        let native_param_count = if user_data.is_some() {
            signature.params.len().saturating_sub(1)
        } else {
            signature.params.len()
        };
        let native_param_tags = signature.params[..native_param_count].to_vec();
        let native_param_abi = native_param_tags
            .iter()
            .map(|t| AbiType::from_tag(*t))
            .collect::<InterpretResult<Vec<_>>>()?;
        let result_tag = signature.results.first().copied();
        let result_abi = result_tag.map(AbiType::from_tag).transpose()?;

        let context = Box::new(CallbackContext {
            module_ptr: module as *const Module,
            instance_ptr,
            config: *config,
            global_function_index,
            native_param_abi: native_param_abi.clone(),
            native_param_tags,
            result_tag,
            user_data,
        });
        let context_addr = context.as_ref() as *const CallbackContext as usize;

        let delegate_addr = callback_delegate as usize;
        let trampoline = bridge::build_callback_trampoline(
            delegate_addr,
            context_addr,
            &native_param_abi,
            &result_abi.into_iter().collect::<Vec<_>>(),
        );

        let addr = trampoline as usize;
        self.trampolines.insert(global_function_index, (trampoline, context));
        Ok(addr)
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

fn value_from_abi_bits(tag: ValueTag, bits: u64) -> Value {
    Value::from_raw_bits(tag, bits)
}

/// the delegate every callback trampoline's generated body calls into
/// (spec 4.4 steps 1-3): decodes the native arguments, reconstructs the
/// full guest argument vector (appending `user_data` when the context
/// carries one), spins up a fresh execution context (spec 4.4 step 2,
/// spec 5's nested-context rule for callback re-entry), and invokes the
/// guest function. errors are logged and swallowed (spec 7, "Callback
/// trampolines propagate errors by logging and returning; the outer host
/// sees the native return") since there is no way to surface a
/// `Result` across this native ABI boundary.
pub extern "C" fn callback_delegate(context_ptr: *mut u8, params_ptr: *const u8, results_ptr: *mut u8) {
    let ctx = unsafe { &*(context_ptr as *const CallbackContext) };

    let mut args = Vec::with_capacity(ctx.native_param_tags.len() + 1);
    for (i, tag) in ctx.native_param_tags.iter().enumerate() {
        let mut raw = [0u8; SLOT_SIZE_IN_BYTES];
        unsafe {
            std::ptr::copy_nonoverlapping(
                params_ptr.add(i * SLOT_SIZE_IN_BYTES),
                raw.as_mut_ptr(),
                SLOT_SIZE_IN_BYTES,
            );
        }
        args.push(value_from_abi_bits(*tag, u64::from_le_bytes(raw)));
    }
    if let Some(user_data) = ctx.user_data {
        args.push(user_data);
    }

    let module = unsafe { &*ctx.module_ptr };
    let instance = unsafe { &mut *ctx.instance_ptr };
    let mut exec_ctx = ExecutionContext::new(&ctx.config);

    let outcome = crate::interpreter::invoke(module, instance, &mut exec_ctx, &ctx.config, ctx.global_function_index, &args);

    match outcome {
        Ok(results) => {
            if let Some(result_tag) = ctx.result_tag {
                let bits = results.first().copied().unwrap_or(Value::from_raw_bits(result_tag, 0)).to_raw_bits();
                unsafe {
                    std::ptr::copy_nonoverlapping(bits.to_le_bytes().as_ptr(), results_ptr, SLOT_SIZE_IN_BYTES);
                }
            }
        }
        Err(err) => {
            eprintln!("espb-runtime: callback trampoline for function {} trapped: {}", ctx.global_function_index, err);
            unsafe {
                std::ptr::write_bytes(results_ptr, 0, SLOT_SIZE_IN_BYTES);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use espb_module::{FunctionFlags, ModuleBuilder};
    use crate::host_import::HostFunctionResolver;

    struct StubResolver;
    impl HostFunctionResolver for StubResolver {
        fn resolve(&self, _module_id: u8, _entity_name: &str) -> Option<usize> {
            Some(0x1)
        }
    }

    #[test]
    fn same_function_index_reuses_cached_trampoline() {
        let mut builder = ModuleBuilder::new();
        let sig = builder.add_signature(vec![ValueTag::I32], vec![ValueTag::I32]);
        builder.add_function(sig, 1, 0, FunctionFlags::IS_LEAF, vec![0x0F]);
        let module = builder.build();
        let config = VmConfig::default();
        let mut instance = Instance::new(&module, &config, &StubResolver).unwrap();

        let mut registry = CallbackRegistry::new();
        let instance_ptr = &mut instance as *mut Instance;
        let addr1 = registry
            .get_or_create(&module, instance_ptr, &config, 0, None)
            .unwrap();
        let addr2 = registry
            .get_or_create(&module, instance_ptr, &config, 0, None)
            .unwrap();
        assert_eq!(addr1, addr2);
    }

    #[test]
    fn registering_with_user_data_narrows_native_arity() {
        let mut builder = ModuleBuilder::new();
        let sig = builder.add_signature(vec![ValueTag::I32, ValueTag::PTR], vec![]);
        builder.add_function(sig, 2, 1, FunctionFlags::IS_LEAF, vec![0x0F]);
        let module = builder.build();
        let config = VmConfig::default();
        let mut instance = Instance::new(&module, &config, &StubResolver).unwrap();

        let mut registry = CallbackRegistry::new();
        let instance_ptr = &mut instance as *mut Instance;
        let addr = registry
            .get_or_create(&module, instance_ptr, &config, 0, Some(Value::Ptr(0xABCD)))
            .unwrap();
        assert_ne!(addr, 0);
        let (_, ctx) = registry.trampolines.get(&0).unwrap();
        assert_eq!(ctx.native_param_tags.len(), 1);
    }
}
