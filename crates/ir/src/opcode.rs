//! Opcode constants for the three bytecode spaces a [`crate::PreInstr`]
//! can occupy: plain Wasm opcodes (`<= 0xFF`), the misc/SIMD prefix
//! spaces (`0xFC00+sub`, `0xFD00+sub`), and the predecoder's own
//! fused superinstructions and data slots (`0xE0..=0xEF`, `0xFF00`,
//! `0xFF01`).
//!
//! Base opcode values match the WebAssembly core specification's
//! binary encoding exactly, so a disassembly dump of the predecoded
//! stream is directly comparable against a `wasm-objdump` listing for
//! every instruction this crate understands.

/// Plain (un-prefixed) Wasm opcodes, valid as [`crate::PreInstr::opcode`]
/// in the `0x00..=0xFF` range.
pub mod op {
    pub const UNREACHABLE: u16 = 0x00;
    pub const NOP: u16 = 0x01;
    pub const BLOCK: u16 = 0x02;
    pub const LOOP: u16 = 0x03;
    pub const IF: u16 = 0x04;
    pub const ELSE: u16 = 0x05;
    pub const END: u16 = 0x0B;
    pub const BR: u16 = 0x0C;
    pub const BR_IF: u16 = 0x0D;
    pub const BR_TABLE: u16 = 0x0E;
    pub const RETURN: u16 = 0x0F;
    pub const CALL: u16 = 0x10;
    pub const CALL_INDIRECT: u16 = 0x11;

    pub const DROP: u16 = 0x1A;
    pub const SELECT: u16 = 0x1B;
    pub const SELECT_T: u16 = 0x1C;

    pub const LOCAL_GET: u16 = 0x20;
    pub const LOCAL_SET: u16 = 0x21;
    pub const LOCAL_TEE: u16 = 0x22;
    pub const GLOBAL_GET: u16 = 0x23;
    pub const GLOBAL_SET: u16 = 0x24;
    pub const TABLE_GET: u16 = 0x25;
    pub const TABLE_SET: u16 = 0x26;

    pub const I32_LOAD: u16 = 0x28;
    pub const I64_LOAD: u16 = 0x29;
    pub const F32_LOAD: u16 = 0x2A;
    pub const F64_LOAD: u16 = 0x2B;
    pub const I32_LOAD8_S: u16 = 0x2C;
    pub const I32_LOAD8_U: u16 = 0x2D;
    pub const I32_LOAD16_S: u16 = 0x2E;
    pub const I32_LOAD16_U: u16 = 0x2F;
    pub const I64_LOAD8_S: u16 = 0x30;
    pub const I64_LOAD8_U: u16 = 0x31;
    pub const I64_LOAD16_S: u16 = 0x32;
    pub const I64_LOAD16_U: u16 = 0x33;
    pub const I64_LOAD32_S: u16 = 0x34;
    pub const I64_LOAD32_U: u16 = 0x35;
    pub const I32_STORE: u16 = 0x36;
    pub const I64_STORE: u16 = 0x37;
    pub const F32_STORE: u16 = 0x38;
    pub const F64_STORE: u16 = 0x39;
    pub const I32_STORE8: u16 = 0x3A;
    pub const I32_STORE16: u16 = 0x3B;
    pub const I64_STORE8: u16 = 0x3C;
    pub const I64_STORE16: u16 = 0x3D;
    pub const I64_STORE32: u16 = 0x3E;
    pub const MEMORY_SIZE: u16 = 0x3F;
    pub const MEMORY_GROW: u16 = 0x40;

    pub const I32_CONST: u16 = 0x41;
    pub const I64_CONST: u16 = 0x42;
    pub const F32_CONST: u16 = 0x43;
    pub const F64_CONST: u16 = 0x44;

    pub const I32_EQZ: u16 = 0x45;
    pub const I32_EQ: u16 = 0x46;
    pub const I32_NE: u16 = 0x47;
    pub const I32_LT_S: u16 = 0x48;
    pub const I32_LT_U: u16 = 0x49;
    pub const I32_GT_S: u16 = 0x4A;
    pub const I32_GT_U: u16 = 0x4B;
    pub const I32_LE_S: u16 = 0x4C;
    pub const I32_LE_U: u16 = 0x4D;
    pub const I32_GE_S: u16 = 0x4E;
    pub const I32_GE_U: u16 = 0x4F;

    pub const I64_EQZ: u16 = 0x50;
    pub const I64_EQ: u16 = 0x51;
    pub const I64_NE: u16 = 0x52;
    pub const I64_LT_S: u16 = 0x53;
    pub const I64_LT_U: u16 = 0x54;
    pub const I64_GT_S: u16 = 0x55;
    pub const I64_GT_U: u16 = 0x56;
    pub const I64_LE_S: u16 = 0x57;
    pub const I64_LE_U: u16 = 0x58;
    pub const I64_GE_S: u16 = 0x59;
    pub const I64_GE_U: u16 = 0x5A;

    pub const F32_EQ: u16 = 0x5B;
    pub const F32_NE: u16 = 0x5C;
    pub const F32_LT: u16 = 0x5D;
    pub const F32_GT: u16 = 0x5E;
    pub const F32_LE: u16 = 0x5F;
    pub const F32_GE: u16 = 0x60;
    pub const F64_EQ: u16 = 0x61;
    pub const F64_NE: u16 = 0x62;
    pub const F64_LT: u16 = 0x63;
    pub const F64_GT: u16 = 0x64;
    pub const F64_LE: u16 = 0x65;
    pub const F64_GE: u16 = 0x66;

    pub const I32_CLZ: u16 = 0x67;
    pub const I32_CTZ: u16 = 0x68;
    pub const I32_POPCNT: u16 = 0x69;
    pub const I32_ADD: u16 = 0x6A;
    pub const I32_SUB: u16 = 0x6B;
    pub const I32_MUL: u16 = 0x6C;
    pub const I32_DIV_S: u16 = 0x6D;
    pub const I32_DIV_U: u16 = 0x6E;
    pub const I32_REM_S: u16 = 0x6F;
    pub const I32_REM_U: u16 = 0x70;
    pub const I32_AND: u16 = 0x71;
    pub const I32_OR: u16 = 0x72;
    pub const I32_XOR: u16 = 0x73;
    pub const I32_SHL: u16 = 0x74;
    pub const I32_SHR_S: u16 = 0x75;
    pub const I32_SHR_U: u16 = 0x76;
    pub const I32_ROTL: u16 = 0x77;
    pub const I32_ROTR: u16 = 0x78;

    pub const I64_CLZ: u16 = 0x79;
    pub const I64_CTZ: u16 = 0x7A;
    pub const I64_POPCNT: u16 = 0x7B;
    pub const I64_ADD: u16 = 0x7C;
    pub const I64_SUB: u16 = 0x7D;
    pub const I64_MUL: u16 = 0x7E;
    pub const I64_DIV_S: u16 = 0x7F;
    pub const I64_DIV_U: u16 = 0x80;
    pub const I64_REM_S: u16 = 0x81;
    pub const I64_REM_U: u16 = 0x82;
    pub const I64_AND: u16 = 0x83;
    pub const I64_OR: u16 = 0x84;
    pub const I64_XOR: u16 = 0x85;
    pub const I64_SHL: u16 = 0x86;
    pub const I64_SHR_S: u16 = 0x87;
    pub const I64_SHR_U: u16 = 0x88;
    pub const I64_ROTL: u16 = 0x89;
    pub const I64_ROTR: u16 = 0x8A;

    pub const F32_ABS: u16 = 0x8B;
    pub const F32_NEG: u16 = 0x8C;
    pub const F32_CEIL: u16 = 0x8D;
    pub const F32_FLOOR: u16 = 0x8E;
    pub const F32_TRUNC: u16 = 0x8F;
    pub const F32_NEAREST: u16 = 0x90;
    pub const F32_SQRT: u16 = 0x91;
    pub const F32_ADD: u16 = 0x92;
    pub const F32_SUB: u16 = 0x93;
    pub const F32_MUL: u16 = 0x94;
    pub const F32_DIV: u16 = 0x95;
    pub const F32_MIN: u16 = 0x96;
    pub const F32_MAX: u16 = 0x97;
    pub const F32_COPYSIGN: u16 = 0x98;

    pub const F64_ABS: u16 = 0x99;
    pub const F64_NEG: u16 = 0x9A;
    pub const F64_CEIL: u16 = 0x9B;
    pub const F64_FLOOR: u16 = 0x9C;
    pub const F64_TRUNC: u16 = 0x9D;
    pub const F64_NEAREST: u16 = 0x9E;
    pub const F64_SQRT: u16 = 0x9F;
    pub const F64_ADD: u16 = 0xA0;
    pub const F64_SUB: u16 = 0xA1;
    pub const F64_MUL: u16 = 0xA2;
    pub const F64_DIV: u16 = 0xA3;
    pub const F64_MIN: u16 = 0xA4;
    pub const F64_MAX: u16 = 0xA5;
    pub const F64_COPYSIGN: u16 = 0xA6;

    pub const I32_WRAP_I64: u16 = 0xA7;
    pub const I32_TRUNC_F32_S: u16 = 0xA8;
    pub const I32_TRUNC_F32_U: u16 = 0xA9;
    pub const I32_TRUNC_F64_S: u16 = 0xAA;
    pub const I32_TRUNC_F64_U: u16 = 0xAB;
    pub const I64_EXTEND_I32_S: u16 = 0xAC;
    pub const I64_EXTEND_I32_U: u16 = 0xAD;
    pub const I64_TRUNC_F32_S: u16 = 0xAE;
    pub const I64_TRUNC_F32_U: u16 = 0xAF;
    pub const I64_TRUNC_F64_S: u16 = 0xB0;
    pub const I64_TRUNC_F64_U: u16 = 0xB1;
    pub const F32_CONVERT_I32_S: u16 = 0xB2;
    pub const F32_CONVERT_I32_U: u16 = 0xB3;
    pub const F32_CONVERT_I64_S: u16 = 0xB4;
    pub const F32_CONVERT_I64_U: u16 = 0xB5;
    pub const F32_DEMOTE_F64: u16 = 0xB6;
    pub const F64_CONVERT_I32_S: u16 = 0xB7;
    pub const F64_CONVERT_I32_U: u16 = 0xB8;
    pub const F64_CONVERT_I64_S: u16 = 0xB9;
    pub const F64_CONVERT_I64_U: u16 = 0xBA;
    pub const F64_PROMOTE_F32: u16 = 0xBB;
    pub const I32_REINTERPRET_F32: u16 = 0xBC;
    pub const I64_REINTERPRET_F64: u16 = 0xBD;
    pub const F32_REINTERPRET_I32: u16 = 0xBE;
    pub const F64_REINTERPRET_I64: u16 = 0xBF;

    pub const I32_EXTEND8_S: u16 = 0xC0;
    pub const I32_EXTEND16_S: u16 = 0xC1;
    pub const I64_EXTEND8_S: u16 = 0xC2;
    pub const I64_EXTEND16_S: u16 = 0xC3;
    pub const I64_EXTEND32_S: u16 = 0xC4;

    pub const REF_NULL: u16 = 0xD0;
    pub const REF_IS_NULL: u16 = 0xD1;
    pub const REF_FUNC: u16 = 0xD2;

    /// The `0xFC` misc-opcode prefix byte itself; predecoded misc
    /// instructions store `0xFC00 + sub` as their opcode (see
    /// [`super::misc`]).
    pub const MISC_PREFIX: u8 = 0xFC;
    /// The `0xFD` SIMD-opcode prefix byte; a function containing any
    /// SIMD instruction fails predecoding (§4.2 step 7).
    pub const SIMD_PREFIX: u8 = 0xFD;
}

/// Misc-prefixed (`0xFC`) opcode sub-indices: saturating truncation and
/// the bulk-memory proposal. A predecoded misc instruction's
/// [`crate::PreInstr::opcode`] is `0xFC00 | sub`.
pub mod misc {
    pub const I32_TRUNC_SAT_F32_S: u16 = 0;
    pub const I32_TRUNC_SAT_F32_U: u16 = 1;
    pub const I32_TRUNC_SAT_F64_S: u16 = 2;
    pub const I32_TRUNC_SAT_F64_U: u16 = 3;
    pub const I64_TRUNC_SAT_F32_S: u16 = 4;
    pub const I64_TRUNC_SAT_F32_U: u16 = 5;
    pub const I64_TRUNC_SAT_F64_S: u16 = 6;
    pub const I64_TRUNC_SAT_F64_U: u16 = 7;
    pub const MEMORY_INIT: u16 = 8;
    pub const DATA_DROP: u16 = 9;
    pub const MEMORY_COPY: u16 = 10;
    pub const MEMORY_FILL: u16 = 11;
    pub const TABLE_INIT: u16 = 12;
    pub const ELEM_DROP: u16 = 13;
    pub const TABLE_COPY: u16 = 14;
    pub const TABLE_GROW: u16 = 15;
    pub const TABLE_SIZE: u16 = 16;
    pub const TABLE_FILL: u16 = 17;

    /// Base of the predecoded opcode range misc instructions occupy.
    pub const BASE: u16 = 0xFC00;
}

/// Fused superinstruction opcodes (§4.2 "Peephole fusion"), occupying
/// `0xE0..=0xEF`. Each collapses a 2- or 3-instruction idiom the
/// predecoder recognized into a single dispatch entry whose operands
/// are packed into `extra`/`operand`.
pub mod fused {
    /// `local.get A` + `local.get B`. `extra = A`, `operand = B`.
    pub const LOCALS_GET_GET: u16 = 0xE0;
    /// `local.get A` + `i32.const C`. `extra = A`, `operand = C as u32`.
    pub const LOCAL_GET_CONST: u16 = 0xE1;
    /// `local.get A` + `local.get B` + `i32.add`.
    pub const LOCALS_ADD: u16 = 0xE2;
    /// `local.get A` + `local.get B` + `i32.sub`.
    pub const LOCALS_SUB: u16 = 0xE3;
    /// `local.get A` + `local.get B` + `i32.gt_s`.
    pub const LOCALS_GT_S: u16 = 0xE4;
    /// `local.get A` + `local.get B` + `i32.le_s`.
    pub const LOCALS_LE_S: u16 = 0xE5;
    /// `local.get A` + `i32.const C` + `i32.add`.
    pub const LOCAL_CONST_ADD: u16 = 0xE6;
    /// `local.get A` + `i32.const C` + `i32.sub`.
    pub const LOCAL_CONST_SUB: u16 = 0xE7;
    /// `local.get A` + `i32.const C` + `i32.lt_s`.
    pub const LOCAL_CONST_LT_S: u16 = 0xE8;
    /// `local.get A` + `i32.const C` + `i32.ge_s`.
    pub const LOCAL_CONST_GE_S: u16 = 0xE9;
    /// `local.get A` + `i32.const C` + `i32.lt_u`.
    pub const LOCAL_CONST_LT_U: u16 = 0xEA;

    /// Number of consumed source instructions for each fused opcode,
    /// used by the interpreter to advance the program counter by the
    /// right amount.
    pub fn consumed_count(opcode: u16) -> usize {
        match opcode {
            LOCALS_GET_GET | LOCAL_GET_CONST => 2,
            LOCALS_ADD | LOCALS_SUB | LOCALS_GT_S | LOCALS_LE_S | LOCAL_CONST_ADD
            | LOCAL_CONST_SUB | LOCAL_CONST_LT_S | LOCAL_CONST_GE_S | LOCAL_CONST_LT_U => 3,
            _ => 1,
        }
    }
}

/// Predecoder-private data-slot opcodes. These never appear as the
/// opcode the dispatch loop switches on for execution; they are
/// payload words following an `if` opener or a `br_table` head.
pub mod slot {
    /// Data slot following an `if` opener: stores the resolved `end`
    /// target and an else-presence flag.
    pub const IF_DATA: u16 = 0xFF00;
    /// One resolved depth entry in a `br_table`'s jump vector.
    pub const BR_TABLE_ENTRY: u16 = 0xFF01;
}
