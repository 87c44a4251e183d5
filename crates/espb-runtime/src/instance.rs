// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! the per-activation, writable instance state (spec 3, "Instance").
//! grounded on `ThreadContext` (stack, heap, pc, bridge/callback function
//! tables, external_function_table, program_context): this is the direct
//! analogue, minus the fields that moved into [`crate::context::ExecutionContext`]
//! because they are per-execution-context rather than per-instance (spec
//! 5: an instance may be driven by more than one execution context at
//! once, each with its own shadow/call stack; `memory_data`, the heap, the
//! table, globals and the resolved imports are the parts that stay
//! instance-wide and shared-by-read).

use espb_isa::{InterpreterError, InterpretResult, ResultCode, Value};
use espb_module::Module;

use crate::callback::CallbackRegistry;
use crate::config::VmConfig;
use crate::heap::Heap;
use crate::host_import::{HostFunctionResolver, HostImportTable};
use crate::memory::LinearMemory;
use crate::table::Table;

pub struct Instance {
    pub memory: LinearMemory,
    pub heap: Heap,
    pub table: Table,
    pub globals: Vec<Value>,
    pub host_imports: HostImportTable,
    pub callbacks: CallbackRegistry,
}

impl Instance {
    /// instantiation: copies active data segments into linear memory,
    /// seeds globals from their declared initializers, and resolves every
    /// import through `resolver` up front (spec 6, "Host symbol
    /// resolution") so a later CALL_IMPORT never repeats the lookup (C8).
    /// any unresolved import fails the whole instantiation with
    /// `IMPORT_RESOLUTION_FAILED` (spec 7, "external" error category).
    pub fn new(
        module: &Module,
        _config: &VmConfig,
        resolver: &dyn HostFunctionResolver,
    ) -> InterpretResult<Self> {
        let mut memory = LinearMemory::new(module.memory_initial_size);
        memory.instantiate_data_segments(&module.data_segments);

        let globals = module.globals.iter().map(|g| g.initial).collect();

        let table = Table::new(module.table_initial_size, module.table_max_size);

        let host_imports = HostImportTable::resolve(module, resolver).map_err(|e| {
            InterpreterError::new(
                ResultCode::InstantiationFailed,
                format!("instantiation failed: {}", e),
            )
        })?;

        Ok(Instance {
            memory,
            heap: Heap::new(),
            table,
            globals,
            host_imports,
            callbacks: CallbackRegistry::new(),
        })
    }

    pub fn global(&self, index: u32) -> InterpretResult<Value> {
        self.globals.get(index as usize).copied().ok_or_else(|| {
            InterpreterError::new(ResultCode::InvalidGlobalIndex, "global index out of range")
        })
    }

    pub fn set_global(&mut self, index: u32, value: Value) -> InterpretResult<()> {
        let slot = self.globals.get_mut(index as usize).ok_or_else(|| {
            InterpreterError::new(ResultCode::InvalidGlobalIndex, "global index out of range")
        })?;
        *slot = value;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use espb_module::ModuleBuilder;
    use espb_isa::ValueTag;

    struct StubResolver;
    impl HostFunctionResolver for StubResolver {
        fn resolve(&self, _module_id: u8, _entity_name: &str) -> Option<usize> {
            Some(0x1000)
        }
    }

    #[test]
    fn instantiation_seeds_globals_from_initializers() {
        let mut builder = ModuleBuilder::new();
        builder.add_global(ValueTag::I32, true, Value::I32(42));
        let module = builder.build();

        let instance = Instance::new(&module, &VmConfig::default(), &StubResolver).unwrap();
        assert_eq!(instance.global(0).unwrap(), Value::I32(42));
    }

    #[test]
    fn instantiation_fails_on_unresolved_import() {
        struct NoneResolver;
        impl HostFunctionResolver for NoneResolver {
            fn resolve(&self, _: u8, _: &str) -> Option<usize> {
                None
            }
        }
        let mut builder = ModuleBuilder::new();
        let sig = builder.add_signature(vec![], vec![]);
        builder.add_import(0, "missing", sig, false);
        let module = builder.build();

        let err = Instance::new(&module, &VmConfig::default(), &NoneResolver).unwrap_err();
        assert_eq!(err.code(), ResultCode::InstantiationFailed);
    }
}
