// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! execution tunables (spec 6, "Configuration options"). grounded on
//! `ProgramSettings` -- a plain struct of values passed by reference into
//! context construction, rather than a global or a builder pattern.

/// tunables for one [`crate::instance::Instance`]/[`crate::context::ExecutionContext`]
/// pair. `Default` matches the values named in the spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    /// initial size of the shadow stack, in bytes.
    pub shadow_stack_initial_size: usize,
    /// growth increment when the shadow stack needs more room (spec 4.5).
    pub shadow_stack_increment: usize,
    /// fixed capacity of the call stack; exceeding it is `STACK_OVERFLOW`
    /// (spec 8, B3).
    pub call_stack_size: usize,
    /// maximum number of arguments copied per CALL/CALL_IMPORT (spec 4.2).
    pub ffi_args_max: usize,
    /// enables per-opcode register-bound assertions; off by default since
    /// the bytecode is assumed validated at load time (spec 1, Non-goals).
    pub debug_checks: bool,
    /// enables the JIT cold-path hint on CALL/CALL_INDIRECT (spec 4.2, 9).
    /// this crate never populates `jit_code_ptr` itself (the JIT compiler
    /// is an external collaborator, spec 1), so leaving this on is a no-op
    /// unless the embedder's loader attaches JIT code to a `FunctionBody`.
    pub jit_enabled: bool,
    /// ad-hoc per-frame cap on ALLOCA allocations (spec 9, open question c).
    /// not part of the public `invoke` contract; purely an implementation
    /// limit on [`crate::call_stack::RuntimeFrame::alloca_ptrs`].
    pub max_alloca_per_frame: usize,
}

pub const DEFAULT_SHADOW_STACK_INITIAL_SIZE: usize = 4 * 1024;
pub const DEFAULT_SHADOW_STACK_INCREMENT: usize = 4 * 1024;
pub const DEFAULT_CALL_STACK_SIZE: usize = 64;
pub const DEFAULT_FFI_ARGS_MAX: usize = 16;
pub const DEFAULT_MAX_ALLOCA_PER_FRAME: usize = 32;

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            shadow_stack_initial_size: DEFAULT_SHADOW_STACK_INITIAL_SIZE,
            shadow_stack_increment: DEFAULT_SHADOW_STACK_INCREMENT,
            call_stack_size: DEFAULT_CALL_STACK_SIZE,
            ffi_args_max: DEFAULT_FFI_ARGS_MAX,
            debug_checks: false,
            jit_enabled: false,
            max_alloca_per_frame: DEFAULT_MAX_ALLOCA_PER_FRAME,
        }
    }
}
