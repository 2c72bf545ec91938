use super::types::*;
use super::Module;
use wrun_core::{FuncType, Limits, Reader, ValType, WasmError, CORE_VERSION, WASM_MAGIC};

/// Core Wasm section identifiers (§4.1: "for each section parses its
/// length prefix and hands off to a sub-decoder").
mod section_id {
    pub const CUSTOM: u8 = 0;
    pub const TYPE: u8 = 1;
    pub const IMPORT: u8 = 2;
    pub const FUNCTION: u8 = 3;
    pub const TABLE: u8 = 4;
    pub const MEMORY: u8 = 5;
    pub const GLOBAL: u8 = 6;
    pub const EXPORT: u8 = 7;
    pub const START: u8 = 8;
    pub const ELEMENT: u8 = 9;
    pub const CODE: u8 = 10;
    pub const DATA: u8 = 11;
    pub const DATA_COUNT: u8 = 12;
    pub const TAG: u8 = 13;
}

/// Parses and validates a core Wasm binary, producing a [`Module`].
///
/// The byte buffer is moved into the returned module; every code body,
/// init expression, and custom section payload is kept as a
/// [`ByteRange`] into that buffer rather than copied (§4.1).
pub fn decode(bytes: Box<[u8]>) -> Result<Module, WasmError> {
    tracing::debug!(target: "decode", bytes = bytes.len(), "decoding module");

    // `Reader` borrows `bytes` for the scan; we re-derive ranges as
    // offsets, which remain valid once we move `bytes` into `Module`.
    let mut reader = Reader::new(&bytes);

    if reader.read_bytes(4)? != WASM_MAGIC {
        return Err(WasmError::InvalidModule);
    }
    if reader.read_bytes(4)? != CORE_VERSION {
        return Err(WasmError::InvalidModule);
    }

    let mut builder = ModuleBuilder::default();
    let mut seen_code = false;
    let mut declared_func_count: Option<u32> = None;

    while !reader.is_empty() {
        let id = reader.read_u8()?;
        let size = reader.read_u32_leb()? as usize;
        if size > reader.remaining() {
            return Err(WasmError::InvalidModule);
        }
        tracing::trace!(target: "decode", section_id = id, size, "section");
        let section_start = reader.pos();
        let section_bytes = reader.read_bytes(size)?;
        let mut sec = Reader::new(section_bytes);

        match id {
            section_id::CUSTOM => {
                let name = sec.read_name()?;
                let start = (section_start + sec.pos()) as u32;
                let end = (section_start + size) as u32;
                builder.custom_sections.push(CustomSection {
                    name: name.into(),
                    bytes: ByteRange { start, end },
                });
            }
            section_id::TYPE => {
                let count = sec.read_u32_leb()?;
                for _ in 0..count {
                    builder.types.push(parse_func_type(&mut sec)?);
                }
            }
            section_id::IMPORT => {
                let count = sec.read_u32_leb()?;
                for _ in 0..count {
                    let module = sec.read_name()?.into();
                    let field = sec.read_name()?.into();
                    let desc = parse_import_desc(&mut sec, &builder.types)?;
                    match desc.kind() {
                        ExternKind::Func => builder.num_imported_funcs += 1,
                        ExternKind::Table => builder.num_imported_tables += 1,
                        ExternKind::Memory => builder.num_imported_memories += 1,
                        ExternKind::Global => builder.num_imported_globals += 1,
                        ExternKind::Tag => builder.num_imported_tags += 1,
                    }
                    builder.imports.push(Import {
                        module,
                        field,
                        desc,
                    });
                }
            }
            section_id::FUNCTION => {
                let count = sec.read_u32_leb()?;
                declared_func_count = Some(count);
                for _ in 0..count {
                    let type_idx = TypeIdx(sec.read_u32_leb()?);
                    builder.func_types.push(type_idx);
                }
            }
            section_id::TABLE => {
                let count = sec.read_u32_leb()?;
                for _ in 0..count {
                    builder.tables.push(parse_table_type(&mut sec)?);
                }
            }
            section_id::MEMORY => {
                let count = sec.read_u32_leb()?;
                for _ in 0..count {
                    let limits = parse_limits(&mut sec)?;
                    builder.memories.push(MemoryType { limits });
                }
            }
            section_id::TAG => {
                let count = sec.read_u32_leb()?;
                for _ in 0..count {
                    let _attribute = sec.read_u8()?;
                    let type_idx = TypeIdx(sec.read_u32_leb()?);
                    builder.tags.push(type_idx);
                }
            }
            section_id::GLOBAL => {
                let count = sec.read_u32_leb()?;
                for _ in 0..count {
                    let value_type = parse_val_type(&mut sec)?;
                    let mutable = sec.read_u8()? != 0;
                    let init = parse_const_expr_range(&mut sec, section_start)?;
                    builder.globals.push(GlobalDef {
                        ty: GlobalType {
                            value_type,
                            mutable,
                        },
                        init,
                    });
                }
            }
            section_id::EXPORT => {
                let count = sec.read_u32_leb()?;
                for _ in 0..count {
                    let name = sec.read_name()?.into();
                    let kind = match sec.read_u8()? {
                        0x00 => ExternKind::Func,
                        0x01 => ExternKind::Table,
                        0x02 => ExternKind::Memory,
                        0x03 => ExternKind::Global,
                        0x04 => ExternKind::Tag,
                        _ => return Err(WasmError::InvalidModule),
                    };
                    let index = sec.read_u32_leb()?;
                    builder.exports.push(Export { name, kind, index });
                }
            }
            section_id::START => {
                builder.start = Some(sec.read_u32_leb()?);
            }
            section_id::ELEMENT => {
                let count = sec.read_u32_leb()?;
                for _ in 0..count {
                    builder
                        .element_segments
                        .push(parse_element_segment(&mut sec, section_start)?);
                }
            }
            section_id::CODE => {
                seen_code = true;
                let count = sec.read_u32_leb()?;
                if let Some(declared) = declared_func_count {
                    if declared != count {
                        return Err(WasmError::InvalidModule);
                    }
                }
                for i in 0..count {
                    let body_size = sec.read_u32_leb()? as usize;
                    let body_start = (section_start + sec.pos()) as u32;
                    sec.skip(body_size)?;
                    let body_end = body_start + body_size as u32;
                    let type_idx = *builder
                        .func_types
                        .get(i as usize)
                        .ok_or(WasmError::InvalidModule)?;
                    builder.funcs.push(FuncDef {
                        type_idx,
                        code: ByteRange {
                            start: body_start,
                            end: body_end,
                        },
                    });
                }
            }
            section_id::DATA => {
                let count = sec.read_u32_leb()?;
                if let Some(expected) = builder.data_count {
                    if expected != count {
                        return Err(WasmError::InvalidModule);
                    }
                }
                for _ in 0..count {
                    builder
                        .data_segments
                        .push(parse_data_segment(&mut sec, section_start)?);
                }
            }
            section_id::DATA_COUNT => {
                builder.data_count = Some(sec.read_u32_leb()?);
            }
            _ => {
                // Unknown section IDs are skipped wholesale (§4.1).
            }
        }
    }

    if declared_func_count.is_some() && !seen_code {
        return Err(WasmError::InvalidModule);
    }
    if let Some(expected) = builder.data_count {
        if expected as usize != builder.data_segments.len() {
            return Err(WasmError::InvalidModule);
        }
    }

    let module = builder.finish(bytes);
    tracing::debug!(
        target: "decode",
        funcs = module.funcs().len(),
        exports = module.exports().len(),
        "decoded module"
    );
    Ok(module)
}

#[derive(Default)]
struct ModuleBuilder {
    types: Vec<FuncType>,
    imports: Vec<Import>,
    num_imported_funcs: u32,
    num_imported_tables: u32,
    num_imported_memories: u32,
    num_imported_globals: u32,
    num_imported_tags: u32,
    func_types: Vec<TypeIdx>,
    funcs: Vec<FuncDef>,
    tables: Vec<TableType>,
    memories: Vec<MemoryType>,
    tags: Vec<TypeIdx>,
    globals: Vec<GlobalDef>,
    exports: Vec<Export>,
    start: Option<u32>,
    element_segments: Vec<ElementSegment>,
    data_segments: Vec<DataSegment>,
    data_count: Option<u32>,
    custom_sections: Vec<CustomSection>,
}

impl ModuleBuilder {
    fn finish(self, bytes: Box<[u8]>) -> Module {
        Module {
            bytes,
            types: self.types.into(),
            imports: self.imports.into(),
            num_imported_funcs: self.num_imported_funcs,
            num_imported_tables: self.num_imported_tables,
            num_imported_memories: self.num_imported_memories,
            num_imported_globals: self.num_imported_globals,
            num_imported_tags: self.num_imported_tags,
            funcs: self.funcs.into(),
            tables: self.tables.into(),
            memories: self.memories.into(),
            tags: self.tags.into(),
            globals: self.globals.into(),
            exports: self.exports.into(),
            start: self.start,
            element_segments: self.element_segments.into(),
            data_segments: self.data_segments.into(),
            custom_sections: self.custom_sections.into(),
        }
    }
}

fn parse_val_type(r: &mut Reader<'_>) -> Result<ValType, WasmError> {
    ValType::from_byte(r.read_u8()?).ok_or(WasmError::InvalidModule)
}

fn parse_func_type(r: &mut Reader<'_>) -> Result<FuncType, WasmError> {
    if r.read_u8()? != 0x60 {
        return Err(WasmError::InvalidModule);
    }
    let params = parse_val_type_vec(r)?;
    let results = parse_val_type_vec(r)?;
    Ok(FuncType::new(params, results))
}

fn parse_val_type_vec(r: &mut Reader<'_>) -> Result<Box<[ValType]>, WasmError> {
    let count = r.read_u32_leb()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        out.push(parse_val_type(r)?);
    }
    Ok(out.into())
}

/// Decodes `limits`, including the reference-types/memory64 flags
/// (§4.1: "decode flags bit 0 (max present), bit 2 (64-bit
/// addressing). The shared bit is accepted and ignored").
fn parse_limits(r: &mut Reader<'_>) -> Result<Limits, WasmError> {
    let flags = r.read_u8()?;
    let has_max = flags & 0x01 != 0;
    let shared = flags & 0x02 != 0;
    let memory64 = flags & 0x04 != 0;
    let min = if memory64 {
        r.read_u64_leb()?
    } else {
        r.read_u32_leb()? as u64
    };
    let max = if has_max {
        Some(if memory64 {
            r.read_u64_leb()?
        } else {
            r.read_u32_leb()? as u64
        })
    } else {
        None
    };
    let limits = Limits {
        min,
        max,
        memory64,
        shared,
    };
    if !limits.is_valid() {
        return Err(WasmError::InvalidModule);
    }
    Ok(limits)
}

fn parse_table_type(r: &mut Reader<'_>) -> Result<TableType, WasmError> {
    let element = parse_val_type(r)?;
    if !element.is_ref() {
        return Err(WasmError::InvalidModule);
    }
    let limits = parse_limits(r)?;
    Ok(TableType { element, limits })
}

fn parse_import_desc(r: &mut Reader<'_>, types: &[FuncType]) -> Result<ImportDesc, WasmError> {
    Ok(match r.read_u8()? {
        0x00 => {
            let idx = r.read_u32_leb()?;
            if idx as usize >= types.len() {
                return Err(WasmError::InvalidModule);
            }
            ImportDesc::Func(TypeIdx(idx))
        }
        0x01 => ImportDesc::Table(parse_table_type(r)?),
        0x02 => ImportDesc::Memory(MemoryType {
            limits: parse_limits(r)?,
        }),
        0x03 => {
            let value_type = parse_val_type(r)?;
            let mutable = r.read_u8()? != 0;
            ImportDesc::Global(GlobalType {
                value_type,
                mutable,
            })
        }
        0x04 => {
            let _attribute = r.read_u8()?;
            ImportDesc::Tag(TypeIdx(r.read_u32_leb()?))
        }
        _ => return Err(WasmError::InvalidModule),
    })
}

/// Scans a restricted constant expression ({`*.const`, `global.get`,
/// `ref.null`, `ref.func`, `end`}, §3 "Invariants") and returns the
/// byte range it occupies (including the trailing `end`), without
/// evaluating it — evaluation happens at instantiation (§4.7).
fn parse_const_expr_range(r: &mut Reader<'_>, section_start: usize) -> Result<ByteRange, WasmError> {
    let start = (section_start + r.pos()) as u32;
    loop {
        let opcode = r.read_u8()?;
        match opcode {
            0x0B => break, // end
            0x41 => {
                r.read_i32_leb()?;
            }
            0x42 => {
                r.read_i64_leb()?;
            }
            0x43 => {
                r.read_f32()?;
            }
            0x44 => {
                r.read_f64()?;
            }
            0x23 => {
                r.read_u32_leb()?;
            } // global.get
            0xD0 => {
                parse_val_type(r)?;
            } // ref.null <reftype>
            0xD2 => {
                r.read_u32_leb()?;
            } // ref.func
            _ => return Err(WasmError::InvalidModule),
        }
    }
    let end = (section_start + r.pos()) as u32;
    Ok(ByteRange { start, end })
}

fn parse_element_segment(
    r: &mut Reader<'_>,
    section_start: usize,
) -> Result<ElementSegment, WasmError> {
    let flags = r.read_u32_leb()?;
    let (mode, explicit_kind_or_type) = match flags {
        0 => {
            let offset = parse_const_expr_range(r, section_start)?;
            (
                ElementMode::Active {
                    table: TableIdx(0),
                    offset,
                },
                false,
            )
        }
        1 => (ElementMode::Passive, true),
        2 => {
            let table = TableIdx(r.read_u32_leb()?);
            let offset = parse_const_expr_range(r, section_start)?;
            (ElementMode::Active { table, offset }, true)
        }
        3 => (ElementMode::Declarative, true),
        4 => {
            let offset = parse_const_expr_range(r, section_start)?;
            (
                ElementMode::Active {
                    table: TableIdx(0),
                    offset,
                },
                false,
            )
        }
        5 => (ElementMode::Passive, false),
        6 => {
            let table = TableIdx(r.read_u32_leb()?);
            let offset = parse_const_expr_range(r, section_start)?;
            (ElementMode::Active { table, offset }, false)
        }
        7 => (ElementMode::Declarative, false),
        _ => return Err(WasmError::InvalidModule),
    };

    let uses_expr_items = matches!(flags, 4..=7);
    let ty = if explicit_kind_or_type {
        if uses_expr_items {
            parse_val_type(r)?
        } else {
            match r.read_u8()? {
                0x00 => ValType::FuncRef,
                _ => return Err(WasmError::InvalidModule),
            }
        }
    } else {
        ValType::FuncRef
    };

    let count = r.read_u32_leb()?;
    let mut items = Vec::with_capacity(count as usize);
    if uses_expr_items {
        for _ in 0..count {
            items.push(ElemItem::Expr(parse_const_expr_range(r, section_start)?));
        }
    } else {
        for _ in 0..count {
            items.push(ElemItem::Func(FuncIdx(r.read_u32_leb()?)));
        }
    }

    Ok(ElementSegment {
        mode,
        ty,
        items: items.into(),
    })
}

fn parse_data_segment(r: &mut Reader<'_>, section_start: usize) -> Result<DataSegment, WasmError> {
    let flags = r.read_u32_leb()?;
    let mode = match flags {
        0 => {
            let offset = parse_const_expr_range(r, section_start)?;
            DataMode::Active {
                memory: MemoryIdx(0),
                offset,
            }
        }
        1 => DataMode::Passive,
        2 => {
            let memory = MemoryIdx(r.read_u32_leb()?);
            let offset = parse_const_expr_range(r, section_start)?;
            DataMode::Active { memory, offset }
        }
        _ => return Err(WasmError::InvalidModule),
    };
    let len = r.read_u32_leb()? as usize;
    let start = (section_start + r.pos()) as u32;
    r.skip(len)?;
    let end = start + len as u32;
    Ok(DataSegment {
        mode,
        bytes: ByteRange { start, end },
    })
}
