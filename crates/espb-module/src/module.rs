// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

use espb_isa::{Value, ValueTag};

/// a function's parameter and result type sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub params: Vec<ValueTag>,
    pub results: Vec<ValueTag>,
}

impl Signature {
    /// signature-index equality is required for CALL_INDIRECT's fast path;
    /// when resolution instead went through `func_ptr_map`,
    /// signature-*compatibility* (same arity and sequence of type tags)
    /// suffices -- see spec 4.2.
    pub fn is_compatible_with(&self, other: &Signature) -> bool {
        self.params == other.params && self.results == other.results
    }
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FunctionFlags: u32 {
        const IS_LEAF = 0x1;
    }
}

/// a function body. `code` is the raw bytecode; `num_virtual_regs` sizes the
/// register frame allocated for this function on the shadow stack, and
/// `max_reg_used` bounds validation of register operands against it.
#[derive(Debug, Clone)]
pub struct FunctionBody {
    pub signature_index: u32,
    pub num_virtual_regs: u32,
    pub max_reg_used: u32,
    pub flags: FunctionFlags,
    pub code: Vec<u8>,
    /// present only if a JIT cold path has compiled this function; this
    /// crate never sets it (no bytecode JIT is implemented -- see the
    /// design document's JIT coupling note). kept as a plain address rather
    /// than a raw pointer so `FunctionBody` stays `Send`/`Sync`.
    pub jit_code_ptr: Option<usize>,
}

impl FunctionBody {
    pub fn is_leaf(&self) -> bool {
        self.flags.contains(FunctionFlags::IS_LEAF)
    }

    /// size in bytes of this function's register frame on the shadow stack.
    pub fn frame_size_in_bytes(&self) -> usize {
        self.num_virtual_regs as usize * std::mem::size_of::<u64>()
    }
}

/// a host-import descriptor: which symbol to resolve, its signature, and
/// whether calling it may block the dispatcher thread (spec 4.3 step 7).
#[derive(Debug, Clone)]
pub struct Import {
    pub module_id: u8,
    pub entity_name: String,
    pub signature_index: u32,
    pub blocking: bool,
}

#[derive(Debug, Clone)]
pub struct Global {
    pub tag: ValueTag,
    pub mutable: bool,
    pub initial: Value,
}

#[derive(Debug, Clone)]
pub struct DataSegment {
    pub bytes: Vec<u8>,
    /// a passive segment is only materialized by MEMORY.INIT and may be
    /// dropped early by DATA.DROP; an active segment is copied into linear
    /// memory at instantiation.
    pub passive: bool,
}

/// one entry of the function-pointer map, sorted by `data_offset` for
/// binary search from CALL_INDIRECT_PTR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FuncPtrMapEntry {
    pub data_offset: u32,
    pub function_index: u32,
}

#[derive(Debug, Clone)]
pub struct ElementSegment {
    pub table_index: u32,
    pub offset: u32,
    pub function_indices: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
    InOut,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Standard,
    Async,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeKind {
    Constant(u32),
    FromArg(u8),
    NullTerminated,
}

/// per-argument marshalling metadata for one host-import argument (spec
/// 4.3 step 4). absent (`None`) for an argument with no copy-in/copy-out
/// plan -- e.g. a plain by-value integer.
#[derive(Debug, Clone, Copy)]
pub struct ImMetaArg {
    pub direction: Direction,
    pub handler: HandlerKind,
    pub size_kind: SizeKind,
}

/// pairs a callback-parameter index with its user_data parameter, or `None`
/// when the import has no user_data parameter (wire value `0x0F`, spec 6).
#[derive(Debug, Clone, Copy)]
pub struct CbMetaEntry {
    pub callback_param_idx: u8,
    pub user_data_param_idx: Option<u8>,
}

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Features: u32 {
        const CALLBACK_AUTO = 0x1;
        const MARSHALLING_META = 0x2;
    }
}

/// the read-only, shared module structure the dispatcher executes against.
/// global function indices place imports before locals, matching
/// `invoke`'s index space (spec 6): `[0, imports.len())` are imports,
/// `[imports.len(), imports.len() + functions.len())` are local functions.
#[derive(Debug, Clone)]
pub struct Module {
    pub signatures: Vec<Signature>,
    pub functions: Vec<FunctionBody>,
    pub imports: Vec<Import>,
    pub globals: Vec<Global>,
    pub data_segments: Vec<DataSegment>,
    /// sorted ascending by `data_offset`.
    pub func_ptr_map: Vec<FuncPtrMapEntry>,
    /// parallel to `functions`; `None` means the function has no recorded
    /// data-section address (wire sentinel `0xFFFF_FFFF`).
    pub func_ptr_map_by_index: Vec<Option<u32>>,
    pub element_segments: Vec<ElementSegment>,
    /// `immeta[import_index][arg_index]`.
    pub immeta: Vec<Vec<Option<ImMetaArg>>>,
    /// `cbmeta[import_index]`.
    pub cbmeta: Vec<Vec<CbMetaEntry>>,
    pub features: Features,
    /// initial size of the instance's linear memory, in bytes. grown to
    /// fit active data segments at instantiation if they overrun it.
    pub memory_initial_size: usize,
    /// initial size of the instance's indirect call table, in elements.
    pub table_initial_size: usize,
    /// `None` means the table cannot grow past `table_initial_size`.
    pub table_max_size: Option<usize>,
}

impl Module {
    pub fn num_imports(&self) -> usize {
        self.imports.len()
    }

    pub fn num_functions(&self) -> usize {
        self.functions.len()
    }

    /// classify a global function index (imports precede locals) into
    /// either an import index or a local function index.
    pub fn classify_function_index(&self, global_index: usize) -> Option<FunctionRef> {
        let num_imports = self.imports.len();
        if global_index < num_imports {
            Some(FunctionRef::Import(global_index as u32))
        } else if global_index < num_imports + self.functions.len() {
            Some(FunctionRef::Local((global_index - num_imports) as u32))
        } else {
            None
        }
    }

    pub fn signature_of_local(&self, function_index: u32) -> Option<&Signature> {
        let body = self.functions.get(function_index as usize)?;
        self.signatures.get(body.signature_index as usize)
    }

    pub fn signature_of_import(&self, import_index: u32) -> Option<&Signature> {
        let import = self.imports.get(import_index as usize)?;
        self.signatures.get(import.signature_index as usize)
    }

    /// binary search `func_ptr_map` by data-segment offset, used by
    /// CALL_INDIRECT/CALL_INDIRECT_PTR to classify a `memory_data` pointer
    /// as a guest function reference (spec 4.2).
    pub fn function_index_at_data_offset(&self, data_offset: u32) -> Option<u32> {
        self.func_ptr_map
            .binary_search_by_key(&data_offset, |e| e.data_offset)
            .ok()
            .map(|i| self.func_ptr_map[i].function_index)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionRef {
    Import(u32),
    Local(u32),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_module() -> Module {
        Module {
            signatures: vec![],
            functions: vec![],
            imports: vec![],
            globals: vec![],
            data_segments: vec![],
            func_ptr_map: vec![],
            func_ptr_map_by_index: vec![],
            element_segments: vec![],
            immeta: vec![],
            cbmeta: vec![],
            features: Features::empty(),
            memory_initial_size: 0,
            table_initial_size: 0,
            table_max_size: None,
        }
    }

    #[test]
    fn classifies_imports_before_locals() {
        let mut m = empty_module();
        m.imports.push(Import {
            module_id: 1,
            entity_name: "printf".into(),
            signature_index: 0,
            blocking: false,
        });
        m.functions.push(FunctionBody {
            signature_index: 0,
            num_virtual_regs: 1,
            max_reg_used: 0,
            flags: FunctionFlags::IS_LEAF,
            code: vec![],
            jit_code_ptr: None,
        });

        assert_eq!(m.classify_function_index(0), Some(FunctionRef::Import(0)));
        assert_eq!(m.classify_function_index(1), Some(FunctionRef::Local(0)));
        assert_eq!(m.classify_function_index(2), None);
    }

    #[test]
    fn func_ptr_map_binary_search() {
        let mut m = empty_module();
        m.func_ptr_map.push(FuncPtrMapEntry { data_offset: 0x100, function_index: 5 });
        m.func_ptr_map.push(FuncPtrMapEntry { data_offset: 0x200, function_index: 7 });
        assert_eq!(m.function_index_at_data_offset(0x100), Some(5));
        assert_eq!(m.function_index_at_data_offset(0x150), None);
    }
}
