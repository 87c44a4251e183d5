// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

/// the high bit used by the legacy wire encoding to mark "this integer is
/// actually a guest function index", see [`FuncRef::decode`].
pub const CALLBACK_FLAG_BIT: u32 = 0x8000_0000;

/// a reference to a callable guest function, either by local index or by a
/// raw native pointer already resolved to executable memory (e.g. a
/// callback trampoline's entry address, or a pointer taken from
/// `func_ptr_map`).
///
/// guest memory and CALL_IMPORT/CALL_INDIRECT_PTR arguments still cross the
/// wire as a tagged `u32`/`i32`/pointer-sized integer (`index | 0x8000_0000`);
/// [`FuncRef::encode`]/[`FuncRef::decode`] are the only places that bit
/// layout is allowed to leak into, isolating the rest of the dispatcher from
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FuncRef {
    Local(u32),
    Pointer(usize),
}

impl FuncRef {
    /// decode a tagged 32-bit integer as read from a register or from guest
    /// memory. returns `None` when the high bit is set but the low bits do
    /// not reference any function index the caller knows to be valid --
    /// callers are expected to treat that as a malformed operand
    /// (`INVALID_OPERAND`), per the design-notes decision on open question
    /// (b): this crate does not silently fall back to treating it as opaque
    /// user_data.
    pub fn decode(raw: u32, num_functions: u32) -> Option<FuncRef> {
        if raw & CALLBACK_FLAG_BIT != 0 {
            let index = raw & !CALLBACK_FLAG_BIT;
            if index < num_functions {
                Some(FuncRef::Local(index))
            } else {
                None
            }
        } else {
            None
        }
    }

    /// true when `raw` looks like a tagged callback index, independent of
    /// whether the index is actually in range. used by the CALL_IMPORT
    /// handler's callback-detection step (spec 4.3 step 3) to decide whether
    /// to attempt [`FuncRef::decode`] at all.
    pub fn looks_tagged(raw: u32) -> bool {
        raw & CALLBACK_FLAG_BIT != 0
    }

    pub fn encode_local(index: u32) -> u32 {
        index | CALLBACK_FLAG_BIT
    }

    pub fn as_local(&self) -> Option<u32> {
        match *self {
            FuncRef::Local(i) => Some(i),
            FuncRef::Pointer(_) => None,
        }
    }

    pub fn as_pointer(&self) -> Option<usize> {
        match *self {
            FuncRef::Pointer(p) => Some(p),
            FuncRef::Local(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_in_range_index() {
        let raw = FuncRef::encode_local(3);
        assert_eq!(raw, 0x8000_0003);
        assert_eq!(FuncRef::decode(raw, 8), Some(FuncRef::Local(3)));
    }

    #[test]
    fn rejects_out_of_range_index() {
        let raw = FuncRef::encode_local(9);
        assert_eq!(FuncRef::decode(raw, 8), None);
    }

    #[test]
    fn untagged_integers_are_not_func_refs() {
        assert!(!FuncRef::looks_tagged(0x1234));
        assert_eq!(FuncRef::decode(0x1234, 8), None);
    }
}
