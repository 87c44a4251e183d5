// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! a small programmatic assembler for [`Module`] values, for tests and for
//! embedders that build modules directly rather than through a parser (the
//! binary loader that would produce a `Module` from bytes is out of scope,
//! see the purpose & scope section of the design document).

use espb_isa::{Value, ValueTag};

use crate::module::{
    CbMetaEntry, DataSegment, ElementSegment, Features, FuncPtrMapEntry, FunctionBody,
    FunctionFlags, Global, ImMetaArg, Import, Module, Signature,
};

#[derive(Debug, Default)]
pub struct ModuleBuilder {
    signatures: Vec<Signature>,
    functions: Vec<FunctionBody>,
    imports: Vec<Import>,
    globals: Vec<Global>,
    data_segments: Vec<DataSegment>,
    func_ptr_map: Vec<FuncPtrMapEntry>,
    func_ptr_map_by_index: Vec<Option<u32>>,
    element_segments: Vec<ElementSegment>,
    immeta: Vec<Vec<Option<ImMetaArg>>>,
    cbmeta: Vec<Vec<CbMetaEntry>>,
    features: Features,
    memory_initial_size: usize,
    table_initial_size: usize,
    table_max_size: Option<usize>,
}

/// a single small page as a default, not a value named by the spec itself.
const DEFAULT_MEMORY_INITIAL_SIZE: usize = 64 * 1024;

impl ModuleBuilder {
    pub fn new() -> Self {
        ModuleBuilder {
            memory_initial_size: DEFAULT_MEMORY_INITIAL_SIZE,
            ..Default::default()
        }
    }

    /// overrides the linear memory's initial size (default 64 KiB).
    pub fn set_memory_initial_size(&mut self, size: usize) {
        self.memory_initial_size = size;
    }

    /// sets the indirect call table's initial and maximum sizes.
    pub fn set_table_size(&mut self, initial: usize, max: Option<usize>) {
        self.table_initial_size = initial;
        self.table_max_size = max;
    }

    /// appends a signature, returning its index.
    pub fn add_signature(&mut self, params: Vec<ValueTag>, results: Vec<ValueTag>) -> u32 {
        self.signatures.push(Signature { params, results });
        (self.signatures.len() - 1) as u32
    }

    /// appends a local function body, returning its (local, not global)
    /// function index.
    pub fn add_function(
        &mut self,
        signature_index: u32,
        num_virtual_regs: u32,
        max_reg_used: u32,
        flags: FunctionFlags,
        code: Vec<u8>,
    ) -> u32 {
        self.functions.push(FunctionBody {
            signature_index,
            num_virtual_regs,
            max_reg_used,
            flags,
            code,
            jit_code_ptr: None,
        });
        self.func_ptr_map_by_index.push(None);
        (self.functions.len() - 1) as u32
    }

    /// appends a host import, returning its import index. imports must all
    /// be added before any local function in global-index terms, but
    /// builder call order does not matter -- `Module::classify_function_index`
    /// always places `self.imports` before `self.functions`.
    pub fn add_import(
        &mut self,
        module_id: u8,
        entity_name: impl Into<String>,
        signature_index: u32,
        blocking: bool,
    ) -> u32 {
        self.imports.push(Import {
            module_id,
            entity_name: entity_name.into(),
            signature_index,
            blocking,
        });
        self.immeta.push(Vec::new());
        self.cbmeta.push(Vec::new());
        (self.imports.len() - 1) as u32
    }

    pub fn add_global(&mut self, tag: ValueTag, mutable: bool, initial: Value) -> u32 {
        self.globals.push(Global {
            tag,
            mutable,
            initial,
        });
        (self.globals.len() - 1) as u32
    }

    pub fn add_data_segment(&mut self, bytes: Vec<u8>, passive: bool) -> u32 {
        self.data_segments.push(DataSegment { bytes, passive });
        (self.data_segments.len() - 1) as u32
    }

    /// records a function-pointer-map entry and the parallel by-index
    /// lookup (spec 3, "function pointer map").
    pub fn map_function_pointer(&mut self, function_index: u32, data_offset: u32) {
        self.func_ptr_map.push(FuncPtrMapEntry {
            data_offset,
            function_index,
        });
        self.func_ptr_map.sort_by_key(|e| e.data_offset);
        if let Some(slot) = self.func_ptr_map_by_index.get_mut(function_index as usize) {
            *slot = Some(data_offset);
        }
    }

    pub fn add_element_segment(
        &mut self,
        table_index: u32,
        offset: u32,
        function_indices: Vec<u32>,
    ) -> u32 {
        self.element_segments.push(ElementSegment {
            table_index,
            offset,
            function_indices,
        });
        (self.element_segments.len() - 1) as u32
    }

    /// attaches a marshalling-metadata entry to one argument of an already
    /// added import. callers must add all of an import's arg entries in
    /// ascending `arg_index` order.
    pub fn set_immeta(&mut self, import_index: u32, arg_index: usize, plan: ImMetaArg) {
        let args = &mut self.immeta[import_index as usize];
        if args.len() <= arg_index {
            args.resize(arg_index + 1, None);
        }
        args[arg_index] = Some(plan);
    }

    pub fn add_cbmeta(
        &mut self,
        import_index: u32,
        callback_param_idx: u8,
        user_data_param_idx: Option<u8>,
    ) {
        self.cbmeta[import_index as usize].push(CbMetaEntry {
            callback_param_idx,
            user_data_param_idx,
        });
    }

    pub fn enable_feature(&mut self, features: Features) {
        self.features |= features;
    }

    pub fn build(self) -> Module {
        Module {
            signatures: self.signatures,
            functions: self.functions,
            imports: self.imports,
            globals: self.globals,
            data_segments: self.data_segments,
            func_ptr_map: self.func_ptr_map,
            func_ptr_map_by_index: self.func_ptr_map_by_index,
            element_segments: self.element_segments,
            immeta: self.immeta,
            cbmeta: self.cbmeta,
            features: self.features,
            memory_initial_size: self.memory_initial_size,
            table_initial_size: self.table_initial_size,
            table_max_size: self.table_max_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_a_leaf_function_module() {
        let mut b = ModuleBuilder::new();
        let sig = b.add_signature(vec![ValueTag::I32, ValueTag::I32], vec![ValueTag::I32]);
        b.add_function(sig, 2, 1, FunctionFlags::IS_LEAF, vec![0x0F]);
        let module = b.build();

        assert_eq!(module.num_functions(), 1);
        assert_eq!(module.signature_of_local(0).unwrap().params.len(), 2);
    }

    #[test]
    fn function_pointer_map_stays_sorted() {
        let mut b = ModuleBuilder::new();
        let sig = b.add_signature(vec![], vec![]);
        b.add_function(sig, 0, 0, FunctionFlags::empty(), vec![0x0F]);
        b.add_function(sig, 0, 0, FunctionFlags::empty(), vec![0x0F]);
        b.map_function_pointer(1, 0x200);
        b.map_function_pointer(0, 0x100);
        let module = b.build();

        assert_eq!(module.function_index_at_data_offset(0x100), Some(0));
        assert_eq!(module.function_index_at_data_offset(0x200), Some(1));
        assert_eq!(module.func_ptr_map_by_index[0], Some(0x100));
    }
}
