//! Core primitives shared by every `wrun` crate: the flat [`WasmError`]
//! model, Wasm value types, and the LEB128/byte-cursor [`Reader`] used
//! by the module decoder.
//!
//! This crate mirrors the role `wasmi_core` plays for `wasmi`: it has
//! no dependency on the decoder, predecoder, or execution engine, so
//! it can be depended upon by all of them without a cycle.

mod error;
mod leb;
mod value;

pub use error::{InvalidErrorOrdinal, WasmError};
pub use leb::Reader;
pub use value::{FuncType, Limits, UntypedVal, ValType};

/// Number of bytes in one Wasm linear memory page (64 KiB).
pub const PAGE_SIZE: u64 = 64 * 1024;

/// The maximum number of pages a 32-bit linear memory may ever reach.
pub const MAX_PAGES_32: u64 = 1 << 16;

/// The magic number that opens every Wasm binary, core or component.
pub const WASM_MAGIC: [u8; 4] = *b"\0asm";

/// The core Wasm 1.0 binary format version.
pub const CORE_VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// The Component Model binary format version (layer 1).
pub const COMPONENT_VERSION: [u8; 4] = [0x0d, 0x00, 0x01, 0x00];
