// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

//! the per-activation execution context: one [`ShadowStack`] plus one
//! [`CallStack`], owned exclusively by a single dispatcher invocation
//! (spec 5, "single-threaded cooperative per execution context"). an
//! [`crate::instance::Instance`] may be driven by several `ExecutionContext`s
//! concurrently, one per host thread, while its own state (memory, table,
//! resolved imports) stays shared-by-read.
//!
//! grounded on `ThreadContext`'s own pairing of a `Stack` with a call-frame
//! record list; split out of `Instance` here because a callback trampoline
//! re-entering the VM (spec 4.4 step 2, "initializes a fresh execution
//! context") needs a brand new one without disturbing the instance it
//! re-enters.

use crate::call_stack::CallStack;
use crate::config::VmConfig;
use crate::stack::ShadowStack;

pub struct ExecutionContext {
    pub shadow_stack: ShadowStack,
    pub call_stack: CallStack,
}

impl ExecutionContext {
    pub fn new(config: &VmConfig) -> Self {
        // the shadow stack is sized in `Value` slots, not bytes -- see
        // `stack.rs`'s module comment on why this crate's register frames
        // are backed by `Vec<Value>` rather than raw bytes. a slot is at
        // least as large as the spec's 16-byte Value cell conceptually
        // requires, so dividing the configured byte sizes by 8 keeps the
        // configured capacity in the right ballpark without pretending to
        // match byte-for-byte.
        let slot_size = std::mem::size_of::<u64>();
        ExecutionContext {
            shadow_stack: ShadowStack::new(
                (config.shadow_stack_initial_size / slot_size).max(1),
                (config.shadow_stack_increment / slot_size).max(1),
            ),
            call_stack: CallStack::new(config.call_stack_size, config.max_alloca_per_frame),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_context_starts_empty() {
        let ctx = ExecutionContext::new(&VmConfig::default());
        assert!(ctx.call_stack.is_empty());
        assert_eq!(ctx.shadow_stack.fp, 0);
        assert_eq!(ctx.shadow_stack.sp, 0);
    }
}
