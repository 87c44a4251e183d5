// Copyright (c) 2023 Hemashushu <hippospark@gmail.com>, All rights reserved.
//
// This Source Code Form is subject to the terms of
// the Mozilla Public License version 2.0 and additional exceptions,
// more details in file LICENSE and CONTRIBUTING.

// note:
//
// - the host data types:
//   int8, int16, int32, int64, float32, float64
// - the vm data types:
//   i8, i16, i32, i64, f32, f64, ptr, bool
//
// opcodes are single bytes (the dispatcher fetches one opcode byte, then
// reads its operands in the fixed order documented on each variant below).
// multi-byte operands are little-endian. the `0xFC` prefix opens an
// extended family (memory/table operations) whose second byte selects the
// sub-opcode; that second byte is read separately by the handler and is not
// itself an `Opcode` value.

/// one opcode per dispatcher table slot. the discriminant is the wire byte;
/// it must never be renumbered once bytecode exists that depends on it.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    // -- control, 0x00-0x0F --
    /// no operation, one byte.
    Nop = 0x00,
    /// no operation, used purely for instruction-width alignment padding.
    NopPad = 0x01,
    /// [i16 offset], signed, counted from the start of this instruction.
    Br = 0x02,
    /// [reg u8][i16 offset]; branch when reg is nonzero.
    BrIf = 0x03,
    /// [reg u8][u16 count][i16 offset]*count[i16 default]; index clamped to
    /// default when out of range.
    BrTable = 0x04,
    /// traps unconditionally.
    Unreachable = 0x05,
    /// [u16 import index][optional variadic block: 0xAA marker, u8 argc,
    /// argc type-tag bytes].
    CallImport = 0x09,
    /// [u16 local function index].
    Call = 0x0A,
    /// [reg u8 holding function index][u16 expected signature index].
    CallIndirect = 0x0B,
    /// [reg u8 holding function index or native pointer][u16 expected
    /// signature index].
    CallIndirectPtr = 0x0D,
    /// function return; no operands (the callee's return value is read from
    /// R0 by the handler).
    End = 0x0F,

    // -- moves and constants, 0x10-0x1F --
    /// [dest reg u8][src reg u8]; raw 8-bit copy, tag-agnostic.
    MovI8 = 0x10,
    /// [dest reg u8][src reg u8]; raw 16-bit copy, tag-agnostic.
    MovI16 = 0x11,
    /// [dest reg u8][src reg u8]; raw 32-bit copy, tag-agnostic.
    MovI32 = 0x12,
    /// [dest reg u8][src reg u8]; raw 64-bit copy, tag-agnostic.
    MovI64 = 0x13,
    /// [dest reg u8][i32 imm].
    LdcI32Imm = 0x18,
    /// [dest reg u8][i64 imm].
    LdcI64Imm = 0x19,
    /// [dest reg u8][f32 imm].
    LdcF32Imm = 0x1A,
    /// [dest reg u8][f64 imm].
    LdcF64Imm = 0x1B,
    /// [dest reg u8][ptr-sized imm].
    LdcPtrImm = 0x1C,
    /// [dest reg u8][u16 symbol index]; high bit of the symbol index means
    /// "function pointer": returns the data-segment address recorded in
    /// `func_ptr_map`.
    LdGlobalAddr = 0x1D,
    /// [dest reg u8][u16 symbol index]; loads the global's value, typed per
    /// its declared type.
    LdGlobal = 0x1E,
    /// [src reg u8][u16 symbol index].
    StGlobal = 0x1F,

    // -- arithmetic, 0x20-0x3E: [dest reg u8][lhs reg u8][rhs reg u8] --
    AddI32 = 0x20,
    SubI32 = 0x21,
    MulI32 = 0x22,
    DivSI32 = 0x23,
    DivUI32 = 0x24,
    RemSI32 = 0x25,
    RemUI32 = 0x26,
    AndI32 = 0x27,
    OrI32 = 0x28,
    XorI32 = 0x29,
    ShlI32 = 0x2A,
    ShrSI32 = 0x2B,
    ShrUI32 = 0x2C,
    /// [dest reg u8][src reg u8]; unary.
    NotI32 = 0x2D,

    AddI64 = 0x2E,
    SubI64 = 0x2F,
    MulI64 = 0x30,
    DivSI64 = 0x31,
    DivUI64 = 0x32,
    RemSI64 = 0x33,
    RemUI64 = 0x34,
    AndI64 = 0x35,
    OrI64 = 0x36,
    XorI64 = 0x37,
    ShlI64 = 0x38,
    ShrSI64 = 0x39,
    ShrUI64 = 0x3A,
    NotI64 = 0x3B,

    AddF32 = 0x3C,
    SubF32 = 0x3D,
    MulF32 = 0x3E,

    // -- arithmetic continued, and immediate-8 variants, 0x40-0x58 --
    DivF32 = 0x40,
    /// [dest reg u8][src reg u8]; unary.
    NegF32 = 0x41,
    AddF64 = 0x42,
    SubF64 = 0x43,
    MulF64 = 0x44,
    DivF64 = 0x45,
    /// [dest reg u8][src reg u8]; unary.
    NegF64 = 0x46,

    /// [dest reg u8][lhs reg u8][i8 imm]; immediate-operand arithmetic,
    /// avoids a constant load for small literals.
    AddI32Imm8 = 0x50,
    SubI32Imm8 = 0x51,
    MulI32Imm8 = 0x52,
    AndI32Imm8 = 0x53,
    OrI32Imm8 = 0x54,
    XorI32Imm8 = 0x55,
    ShlI32Imm8 = 0x56,
    ShrSI32Imm8 = 0x57,
    ShrUI32Imm8 = 0x58,

    // -- memory, 0x70-0x89: [dest/src reg u8][addr reg u8][i16 offset] --
    LoadI8 = 0x70,
    LoadU8 = 0x71,
    LoadI16 = 0x72,
    LoadU16 = 0x73,
    LoadI32 = 0x74,
    LoadI64 = 0x75,
    LoadF32 = 0x76,
    LoadF64 = 0x77,
    LoadPtr = 0x78,
    LoadBool = 0x79,
    StoreI8 = 0x80,
    StoreI16 = 0x81,
    StoreI32 = 0x82,
    StoreI64 = 0x83,
    StoreF32 = 0x84,
    StoreF64 = 0x85,
    StorePtr = 0x86,
    StoreBool = 0x87,

    /// scoped allocation owned by the current call frame, freed
    /// automatically on END. [dest reg u8 <- pointer][size reg u8].
    Alloca = 0x8F,
    /// produce a pointer into the register frame, used to pass a register's
    /// address to host code that writes back through it.
    /// [dest reg u8 <- pointer][src reg u8].
    AddrOf = 0x8E,

    // -- conversions, 0x90-0xBD: [dest reg u8][src reg u8] --
    TruncI64ToI32 = 0x90,
    ExtendI32SToI64 = 0x91,
    ExtendI32UToI64 = 0x92,
    ConvertI32SToF32 = 0x93,
    ConvertI32UToF32 = 0x94,
    ConvertI32SToF64 = 0x95,
    ConvertI32UToF64 = 0x96,
    ConvertI64SToF32 = 0x97,
    ConvertI64SToF64 = 0x98,
    TruncF32ToI32S = 0x99,
    TruncF32ToI32U = 0x9A,
    TruncF64ToI32S = 0x9B,
    TruncF64ToI32U = 0x9C,
    PromoteF32ToF64 = 0x9D,
    DemoteF64ToF32 = 0x9E,
    PtrToI32 = 0x9F,
    I32ToPtr = 0xA0,
    PtrToI64 = 0xA1,
    I64ToPtr = 0xA2,

    // -- select / compare, 0xBE-0xEB --
    /// [dest reg u8][cond reg u8][then reg u8][else reg u8]; i32 operands.
    SelectI32 = 0xBE,
    /// same layout, i64 operands.
    SelectI64 = 0xBF,
    /// same layout, f32 operands.
    SelectF32 = 0xD4,
    /// same layout, f64 operands.
    SelectF64 = 0xD5,
    /// same layout, ptr operands.
    SelectPtr = 0xD6,

    /// [dest reg u8][lhs reg u8][rhs reg u8]; writes 0/1 BOOL.
    CmpEqI32 = 0xC0,
    CmpNeI32 = 0xC1,
    CmpLtSI32 = 0xC2,
    CmpLtUI32 = 0xC3,
    CmpGtSI32 = 0xC4,
    CmpGtUI32 = 0xC5,
    CmpLeSI32 = 0xC6,
    CmpLeUI32 = 0xC7,
    CmpGeSI32 = 0xC8,
    CmpGeUI32 = 0xC9,
    CmpEqI64 = 0xCA,
    CmpNeI64 = 0xCB,
    CmpLtSI64 = 0xCC,
    CmpLtUI64 = 0xCD,
    CmpGtSI64 = 0xCE,
    CmpGtUI64 = 0xCF,
    CmpLeSI64 = 0xD0,
    CmpLeUI64 = 0xD1,
    CmpGeSI64 = 0xD2,
    CmpGeUI64 = 0xD3,
    /// traps on NaN operands rather than returning a BOOL result.
    CmpEqF32 = 0xE0,
    CmpNeF32 = 0xE1,
    CmpLtF32 = 0xE2,
    CmpGtF32 = 0xE3,
    CmpLeF32 = 0xE4,
    CmpGeF32 = 0xE5,
    CmpEqF64 = 0xE6,
    CmpNeF64 = 0xE7,
    CmpLtF64 = 0xE8,
    CmpGtF64 = 0xE9,
    CmpLeF64 = 0xEA,
    CmpGeF64 = 0xEB,

    // -- atomics, 0xD7-0xDF / 0xEC-0xEE / 0xF0-0xF6 --
    /// [dest reg u8 <- old value][addr reg u8][operand reg u8].
    AtomicRmwAddI32 = 0xD7,
    AtomicRmwSubI32 = 0xD8,
    AtomicRmwAndI32 = 0xD9,
    AtomicRmwOrI32 = 0xDA,
    AtomicRmwXorI32 = 0xDB,
    AtomicRmwXchgI32 = 0xDC,
    /// [dest reg u8 <- old value][addr reg u8][expected reg u8][new reg u8].
    AtomicCmpxchgI32 = 0xDD,
    AtomicRmwAddI64 = 0xDE,
    AtomicCmpxchgI64 = 0xDF,
    /// [dest reg u8][addr reg u8][i16 offset]; sequentially consistent.
    AtomicLoadI32 = 0xEC,
    AtomicLoadI64 = 0xED,
    /// [src reg u8][addr reg u8][i16 offset]; sequentially consistent.
    AtomicStoreI32 = 0xEE,
    /// no operands; full sequentially-consistent fence.
    AtomicFence = 0xF0,

    /// extended-family prefix; the following byte selects among
    /// MEMORY.INIT/COPY/FILL, DATA.DROP, HEAP.MALLOC/CALLOC/REALLOC/FREE,
    /// TABLE.INIT/GET/SET/SIZE/COPY/FILL (see [`ExtendedOp`]).
    ExtendedPrefix = 0xFC,
}

/// sub-opcodes following the [`Opcode::ExtendedPrefix`] (`0xFC`) byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExtendedOp {
    /// [u32 data segment index][dest addr reg u8][offset reg u8][len reg u8].
    MemoryInit = 0x00,
    /// [dst reg u8][src reg u8][len reg u8].
    MemoryCopy = 0x01,
    /// [dst reg u8][value reg u8 (low byte)][len reg u8].
    MemoryFill = 0x02,
    /// [u32 data segment index]; marks a passive data segment unusable.
    DataDrop = 0x03,
    /// [dest reg u8 <- pointer][size reg u8].
    HeapMalloc = 0x04,
    /// [dest reg u8 <- pointer][count reg u8][elem size reg u8].
    HeapCalloc = 0x05,
    /// [dest reg u8 <- pointer][ptr reg u8][new size reg u8].
    HeapRealloc = 0x06,
    /// [ptr reg u8].
    HeapFree = 0x07,
    /// [u32 element segment index][dest table offset reg u8][src offset reg u8][len reg u8].
    TableInit = 0x08,
    /// [dest reg u8 <- FuncRef][table index u16][index reg u8].
    TableGet = 0x09,
    /// [table index u16][index reg u8][value reg u8].
    TableSet = 0x0A,
    /// [dest reg u8 <- size][table index u16].
    TableSize = 0x0B,
    /// [table index u16][dst offset reg u8][src offset reg u8][len reg u8].
    TableCopy = 0x0C,
    /// [table index u16][dst offset reg u8][value reg u8][len reg u8].
    TableFill = 0x0D,
}

impl Opcode {
    /// best-effort decode; out-of-range or reserved byte values are not an
    /// `Opcode` at all and the dispatcher reports `UnknownOpcode` rather
    /// than panicking, since a byte stream may legally contain opcodes this
    /// build does not implement (e.g. future V128 opcodes).
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        use Opcode::*;
        let op = match byte {
            0x00 => Nop,
            0x01 => NopPad,
            0x02 => Br,
            0x03 => BrIf,
            0x04 => BrTable,
            0x05 => Unreachable,
            0x09 => CallImport,
            0x0A => Call,
            0x0B => CallIndirect,
            0x0D => CallIndirectPtr,
            0x0F => End,
            0x10 => MovI8,
            0x11 => MovI16,
            0x12 => MovI32,
            0x13 => MovI64,
            0x18 => LdcI32Imm,
            0x19 => LdcI64Imm,
            0x1A => LdcF32Imm,
            0x1B => LdcF64Imm,
            0x1C => LdcPtrImm,
            0x1D => LdGlobalAddr,
            0x1E => LdGlobal,
            0x1F => StGlobal,
            0x20 => AddI32,
            0x21 => SubI32,
            0x22 => MulI32,
            0x23 => DivSI32,
            0x24 => DivUI32,
            0x25 => RemSI32,
            0x26 => RemUI32,
            0x27 => AndI32,
            0x28 => OrI32,
            0x29 => XorI32,
            0x2A => ShlI32,
            0x2B => ShrSI32,
            0x2C => ShrUI32,
            0x2D => NotI32,
            0x2E => AddI64,
            0x2F => SubI64,
            0x30 => MulI64,
            0x31 => DivSI64,
            0x32 => DivUI64,
            0x33 => RemSI64,
            0x34 => RemUI64,
            0x35 => AndI64,
            0x36 => OrI64,
            0x37 => XorI64,
            0x38 => ShlI64,
            0x39 => ShrSI64,
            0x3A => ShrUI64,
            0x3B => NotI64,
            0x3C => AddF32,
            0x3D => SubF32,
            0x3E => MulF32,
            0x40 => DivF32,
            0x41 => NegF32,
            0x42 => AddF64,
            0x43 => SubF64,
            0x44 => MulF64,
            0x45 => DivF64,
            0x46 => NegF64,
            0x50 => AddI32Imm8,
            0x51 => SubI32Imm8,
            0x52 => MulI32Imm8,
            0x53 => AndI32Imm8,
            0x54 => OrI32Imm8,
            0x55 => XorI32Imm8,
            0x56 => ShlI32Imm8,
            0x57 => ShrSI32Imm8,
            0x58 => ShrUI32Imm8,
            0x70 => LoadI8,
            0x71 => LoadU8,
            0x72 => LoadI16,
            0x73 => LoadU16,
            0x74 => LoadI32,
            0x75 => LoadI64,
            0x76 => LoadF32,
            0x77 => LoadF64,
            0x78 => LoadPtr,
            0x79 => LoadBool,
            0x80 => StoreI8,
            0x81 => StoreI16,
            0x82 => StoreI32,
            0x83 => StoreI64,
            0x84 => StoreF32,
            0x85 => StoreF64,
            0x86 => StorePtr,
            0x87 => StoreBool,
            0x8E => AddrOf,
            0x8F => Alloca,
            0x90 => TruncI64ToI32,
            0x91 => ExtendI32SToI64,
            0x92 => ExtendI32UToI64,
            0x93 => ConvertI32SToF32,
            0x94 => ConvertI32UToF32,
            0x95 => ConvertI32SToF64,
            0x96 => ConvertI32UToF64,
            0x97 => ConvertI64SToF32,
            0x98 => ConvertI64SToF64,
            0x99 => TruncF32ToI32S,
            0x9A => TruncF32ToI32U,
            0x9B => TruncF64ToI32S,
            0x9C => TruncF64ToI32U,
            0x9D => PromoteF32ToF64,
            0x9E => DemoteF64ToF32,
            0x9F => PtrToI32,
            0xA0 => I32ToPtr,
            0xA1 => PtrToI64,
            0xA2 => I64ToPtr,
            0xBE => SelectI32,
            0xBF => SelectI64,
            0xC0 => CmpEqI32,
            0xC1 => CmpNeI32,
            0xC2 => CmpLtSI32,
            0xC3 => CmpLtUI32,
            0xC4 => CmpGtSI32,
            0xC5 => CmpGtUI32,
            0xC6 => CmpLeSI32,
            0xC7 => CmpLeUI32,
            0xC8 => CmpGeSI32,
            0xC9 => CmpGeUI32,
            0xCA => CmpEqI64,
            0xCB => CmpNeI64,
            0xCC => CmpLtSI64,
            0xCD => CmpLtUI64,
            0xCE => CmpGtSI64,
            0xCF => CmpGtUI64,
            0xD0 => CmpLeSI64,
            0xD1 => CmpLeUI64,
            0xD2 => CmpGeSI64,
            0xD3 => CmpGeUI64,
            0xD4 => SelectF32,
            0xD5 => SelectF64,
            0xD6 => SelectPtr,
            0xD7 => AtomicRmwAddI32,
            0xD8 => AtomicRmwSubI32,
            0xD9 => AtomicRmwAndI32,
            0xDA => AtomicRmwOrI32,
            0xDB => AtomicRmwXorI32,
            0xDC => AtomicRmwXchgI32,
            0xDD => AtomicCmpxchgI32,
            0xDE => AtomicRmwAddI64,
            0xDF => AtomicCmpxchgI64,
            0xE0 => CmpEqF32,
            0xE1 => CmpNeF32,
            0xE2 => CmpLtF32,
            0xE3 => CmpGtF32,
            0xE4 => CmpLeF32,
            0xE5 => CmpGeF32,
            0xE6 => CmpEqF64,
            0xE7 => CmpNeF64,
            0xE8 => CmpLtF64,
            0xE9 => CmpGtF64,
            0xEA => CmpLeF64,
            0xEB => CmpGeF64,
            0xEC => AtomicLoadI32,
            0xED => AtomicLoadI64,
            0xEE => AtomicStoreI32,
            0xF0 => AtomicFence,
            0xFC => ExtendedPrefix,
            _ => return None,
        };
        Some(op)
    }
}

impl ExtendedOp {
    pub fn from_byte(byte: u8) -> Option<ExtendedOp> {
        use ExtendedOp::*;
        let op = match byte {
            0x00 => MemoryInit,
            0x01 => MemoryCopy,
            0x02 => MemoryFill,
            0x03 => DataDrop,
            0x04 => HeapMalloc,
            0x05 => HeapCalloc,
            0x06 => HeapRealloc,
            0x07 => HeapFree,
            0x08 => TableInit,
            0x09 => TableGet,
            0x0A => TableSet,
            0x0B => TableSize,
            0x0C => TableCopy,
            0x0D => TableFill,
            _ => return None,
        };
        Some(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_documented_control_opcode() {
        assert_eq!(Opcode::from_byte(0x0A), Some(Opcode::Call));
        assert_eq!(Opcode::from_byte(0x0F), Some(Opcode::End));
        assert_eq!(Opcode::from_byte(0x09), Some(Opcode::CallImport));
    }

    #[test]
    fn unknown_byte_decodes_to_none() {
        assert_eq!(Opcode::from_byte(0x06), None);
        assert_eq!(Opcode::from_byte(0xFF), None);
    }

    #[test]
    fn discriminant_matches_wire_byte() {
        assert_eq!(Opcode::Call as u8, 0x0A);
        assert_eq!(Opcode::DivSI32 as u8, 0x23);
    }

    #[test]
    fn extended_family_decodes() {
        assert_eq!(ExtendedOp::from_byte(0x01), Some(ExtendedOp::MemoryCopy));
        assert_eq!(ExtendedOp::from_byte(0x0D), Some(ExtendedOp::TableFill));
        assert_eq!(ExtendedOp::from_byte(0xFF), None);
    }
}
