//! Core Wasm module representation: the decoded, immutable result of
//! parsing a `.wasm` binary (§4.1, §3 "Module").
//!
//! `Module` owns the original byte buffer and stores code bodies and
//! init expressions as [`ByteRange`] offsets into it rather than
//! borrowed slices, so the type needs no lifetime parameter while
//! still avoiding a copy of the bytecode.

mod decode;
pub mod types;

pub use decode::decode;
pub use types::*;

use wrun_core::{FuncType, ValType, WasmError};

#[derive(Debug, Clone)]
pub struct Module {
    bytes: Box<[u8]>,

    types: Box<[FuncType]>,

    imports: Box<[Import]>,
    num_imported_funcs: u32,
    num_imported_tables: u32,
    num_imported_memories: u32,
    num_imported_globals: u32,
    num_imported_tags: u32,

    funcs: Box<[FuncDef]>,
    tables: Box<[TableType]>,
    memories: Box<[MemoryType]>,
    tags: Box<[TypeIdx]>,
    globals: Box<[GlobalDef]>,

    exports: Box<[Export]>,
    start: Option<u32>,

    element_segments: Box<[ElementSegment]>,
    data_segments: Box<[DataSegment]>,

    custom_sections: Box<[CustomSection]>,
}

impl Module {
    /// Decodes and validates a core Wasm binary (§4.1).
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Result<Self, WasmError> {
        decode::decode(bytes.into())
    }

    /// The raw bytes spanned by `range`, resolved against this
    /// module's owned buffer.
    pub fn bytes_at(&self, range: ByteRange) -> &[u8] {
        &self.bytes[range.start as usize..range.end as usize]
    }

    pub fn types(&self) -> &[FuncType] {
        &self.types
    }

    pub fn get_type(&self, idx: TypeIdx) -> Option<&FuncType> {
        self.types.get(idx.0 as usize)
    }

    pub fn imports(&self) -> &[Import] {
        &self.imports
    }

    pub fn num_imported_funcs(&self) -> u32 {
        self.num_imported_funcs
    }

    pub fn num_imported_tables(&self) -> u32 {
        self.num_imported_tables
    }

    pub fn num_imported_memories(&self) -> u32 {
        self.num_imported_memories
    }

    pub fn num_imported_globals(&self) -> u32 {
        self.num_imported_globals
    }

    /// Defined (non-imported) functions, in code-section order.
    pub fn funcs(&self) -> &[FuncDef] {
        &self.funcs
    }

    /// The total number of functions in the combined import+defined
    /// index space (§3 "Index-space layout").
    pub fn total_funcs(&self) -> u32 {
        self.num_imported_funcs + self.funcs.len() as u32
    }

    /// Looks up a function's type by absolute `FuncIdx`, whether it is
    /// an import or a defined function.
    pub fn func_type(&self, idx: FuncIdx) -> Option<&FuncType> {
        let raw = idx.0;
        let type_idx = if raw < self.num_imported_funcs {
            self.imports
                .iter()
                .filter_map(|i| match &i.desc {
                    ImportDesc::Func(type_idx) => Some(*type_idx),
                    _ => None,
                })
                .nth(raw as usize)?
        } else {
            let local = (raw - self.num_imported_funcs) as usize;
            self.funcs.get(local)?.type_idx
        };
        self.get_type(type_idx)
    }

    pub fn tables(&self) -> &[TableType] {
        &self.tables
    }

    pub fn total_tables(&self) -> u32 {
        self.num_imported_tables + self.tables.len() as u32
    }

    pub fn table_type(&self, idx: TableIdx) -> Option<TableType> {
        let raw = idx.0;
        if raw < self.num_imported_tables {
            self.imports.iter().filter_map(|i| match &i.desc {
                ImportDesc::Table(t) => Some(*t),
                _ => None,
            }).nth(raw as usize)
        } else {
            self.tables.get((raw - self.num_imported_tables) as usize).copied()
        }
    }

    pub fn memories(&self) -> &[MemoryType] {
        &self.memories
    }

    pub fn total_memories(&self) -> u32 {
        self.num_imported_memories + self.memories.len() as u32
    }

    pub fn memory_type(&self, idx: MemoryIdx) -> Option<MemoryType> {
        let raw = idx.0;
        if raw < self.num_imported_memories {
            self.imports.iter().filter_map(|i| match &i.desc {
                ImportDesc::Memory(m) => Some(*m),
                _ => None,
            }).nth(raw as usize)
        } else {
            self.memories.get((raw - self.num_imported_memories) as usize).copied()
        }
    }

    pub fn globals(&self) -> &[GlobalDef] {
        &self.globals
    }

    pub fn total_globals(&self) -> u32 {
        self.num_imported_globals + self.globals.len() as u32
    }

    pub fn global_type(&self, idx: GlobalIdx) -> Option<GlobalType> {
        let raw = idx.0;
        if raw < self.num_imported_globals {
            self.imports.iter().filter_map(|i| match &i.desc {
                ImportDesc::Global(g) => Some(*g),
                _ => None,
            }).nth(raw as usize)
        } else {
            self.globals.get((raw - self.num_imported_globals) as usize).map(|g| g.ty)
        }
    }

    pub fn exports(&self) -> &[Export] {
        &self.exports
    }

    pub fn get_export(&self, name: &str) -> Option<&Export> {
        self.exports.iter().find(|e| &*e.name == name)
    }

    pub fn start(&self) -> Option<FuncIdx> {
        self.start.map(FuncIdx)
    }

    pub fn element_segments(&self) -> &[ElementSegment] {
        &self.element_segments
    }

    pub fn data_segments(&self) -> &[DataSegment] {
        &self.data_segments
    }

    pub fn data_count(&self) -> u32 {
        self.data_segments.len() as u32
    }

    /// Retained custom sections, `(name, bytes)` — not discarded, so
    /// `inspect`-style tools can read them without a second decode
    /// pass (§3 "Custom sections").
    pub fn custom_sections(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.custom_sections
            .iter()
            .map(move |s| (&*s.name, self.bytes_at(s.bytes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_module_bytes() -> Vec<u8> {
        // magic + version only: the empty module.
        vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00]
    }

    #[test]
    fn decodes_empty_module() {
        let module = Module::new(minimal_module_bytes()).unwrap();
        assert_eq!(module.total_funcs(), 0);
        assert_eq!(module.exports().len(), 0);
        assert!(module.start().is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = minimal_module_bytes();
        bytes[0] = 0xFF;
        assert_eq!(Module::new(bytes).unwrap_err(), WasmError::InvalidModule);
    }

    #[test]
    fn rejects_truncated_header() {
        let bytes = vec![0x00, 0x61, 0x73];
        assert_eq!(Module::new(bytes).unwrap_err(), WasmError::InvalidModule);
    }

    #[test]
    fn decodes_a_single_type_and_function() {
        let mut bytes = minimal_module_bytes();
        // Type section: 1 type, () -> (i32)
        bytes.extend_from_slice(&[1, 5, 1, 0x60, 0, 1, 0x7F]);
        // Function section: 1 function, type 0
        bytes.extend_from_slice(&[3, 2, 1, 0]);
        // Code section: 1 body, empty locals + i32.const 0 + end
        bytes.extend_from_slice(&[10, 6, 1, 4, 0, 0x41, 0x00, 0x0B]);
        let module = Module::new(bytes).unwrap();
        assert_eq!(module.total_funcs(), 1);
        assert_eq!(module.types().len(), 1);
        assert_eq!(module.types()[0].results(), &[ValType::I32]);
    }

    #[test]
    fn mismatched_function_and_code_counts_is_invalid() {
        let mut bytes = minimal_module_bytes();
        bytes.extend_from_slice(&[1, 5, 1, 0x60, 0, 1, 0x7F]);
        bytes.extend_from_slice(&[3, 2, 1, 0]);
        // Code section declares zero bodies.
        bytes.extend_from_slice(&[10, 1, 0]);
        assert_eq!(Module::new(bytes).unwrap_err(), WasmError::InvalidModule);
    }

    #[test]
    fn custom_sections_are_retained() {
        let mut bytes = minimal_module_bytes();
        // Custom section: name "x", payload [0xAB]
        bytes.extend_from_slice(&[0, 3, 1, b'x', 0xAB]);
        let module = Module::new(bytes).unwrap();
        let sections: Vec<_> = module.custom_sections().collect();
        assert_eq!(sections, vec![("x", &[0xABu8][..])]);
    }
}
