//! Component Model binary format: a collaborator, not part of the
//! core (§1 "Out of scope as external collaborators", §6 "Component
//! binary format"). This module only goes as far as the spec asks of
//! a collaborator — enough for `inspect` to describe a component and
//! for embedded core modules to be handed to [`crate::Module::new`] —
//! not a full component-linking implementation.
//!
//! A component container wraps zero or more core Wasm modules plus
//! its own type/import/export/instance/canonical sections. Decoding
//! mirrors [`crate::module::decode`]'s section loop: walk `(id, size)`
//! pairs, bounds-check each size against the remaining buffer, and
//! keep most payloads as borrowed byte ranges rather than eagerly
//! building an IR for machinery this runtime does not execute.

use wrun_core::{Reader, WasmError};

pub const COMPONENT_MAGIC: [u8; 4] = *b"\0asm";
pub const COMPONENT_VERSION: [u8; 4] = [0x0D, 0x00, 0x01, 0x00];

/// Component section identifiers, as laid out in the upstream binary
/// format (§6: "core_module=1, type=7, import=10, export=11,
/// canonical=8, etc.").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SectionId {
    Custom = 0,
    CoreModule = 1,
    CoreInstance = 2,
    CoreType = 3,
    Component = 4,
    Instance = 5,
    Alias = 6,
    Type = 7,
    Canonical = 8,
    Start = 9,
    Import = 10,
    Export = 11,
}

impl SectionId {
    fn from_byte(b: u8) -> Option<Self> {
        use SectionId::*;
        Some(match b {
            0 => Custom,
            1 => CoreModule,
            2 => CoreInstance,
            3 => CoreType,
            4 => Component,
            5 => Instance,
            6 => Alias,
            7 => Type,
            8 => Canonical,
            9 => Start,
            10 => Import,
            11 => Export,
            _ => return None,
        })
    }
}

/// A byte range into the component's own owned buffer, resolved the
/// same way [`crate::module::ByteRange`] is resolved against a
/// [`crate::Module`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u32,
    pub end: u32,
}

/// A named import or export at the component boundary. Only the name
/// and raw descriptor bytes are kept — resolving the descriptor into
/// a core `ExternKind`/type is machinery this collaborator does not
/// need, since nothing in the core engine links against component
/// imports directly.
#[derive(Debug, Clone)]
pub struct ComponentItem {
    pub name: Box<str>,
    pub descriptor: ByteRange,
}

/// One component-level type, canonical-function, alias, start, or
/// instance declaration: the "typed descriptors" the spec calls out
/// (§6), kept as a raw payload range since each one's internal shape
/// varies by a discriminant this collaborator does not interpret.
#[derive(Debug, Clone)]
pub struct Descriptor {
    pub section: SectionId,
    pub bytes: ByteRange,
}

/// A decoded component container.
#[derive(Debug, Clone)]
pub struct Component {
    bytes: Box<[u8]>,
    /// Raw bytes of each embedded `core:module` section, in order —
    /// each one is itself a valid core Wasm binary and can be handed
    /// straight to [`crate::Module::new`].
    pub core_modules: Vec<ByteRange>,
    pub imports: Vec<ComponentItem>,
    pub exports: Vec<ComponentItem>,
    /// Type, canonical, alias, start, and instance sections, kept in
    /// encounter order as raw descriptors.
    pub descriptors: Vec<Descriptor>,
    pub custom_sections: Vec<(Box<str>, ByteRange)>,
}

/// Advances past one `externdesc` entry of an import/export section:
/// a one-byte sort tag followed by a single index, for the four sorts
/// (core module, func, instance, component) that are plain typeidx
/// references. This collaborator does not resolve component-level
/// `value`/`type` descriptors, so those tags are rejected outright
/// rather than guessed at — silently mis-skipping one would corrupt
/// every later entry's name in the same section.
fn skip_extern_desc(sec: &mut Reader) -> Result<(), WasmError> {
    match sec.read_u8()? {
        0x00 | 0x01 | 0x04 | 0x05 => {
            sec.read_u32_leb()?;
            Ok(())
        }
        _ => Err(WasmError::InvalidModule),
    }
}

impl Component {
    /// Decodes a component binary's outer container. Fails with
    /// `InvalidModule` on a bad magic/version or a section whose
    /// declared size overruns the buffer — the same failure contract
    /// as the core module decoder.
    pub fn new(bytes: impl Into<Box<[u8]>>) -> Result<Self, WasmError> {
        let bytes = bytes.into();
        let mut reader = Reader::new(&bytes);

        if reader.read_bytes(4)? != COMPONENT_MAGIC {
            return Err(WasmError::InvalidModule);
        }
        if reader.read_bytes(4)? != COMPONENT_VERSION {
            return Err(WasmError::InvalidModule);
        }

        let mut core_modules = Vec::new();
        let mut imports = Vec::new();
        let mut exports = Vec::new();
        let mut descriptors = Vec::new();
        let mut custom_sections = Vec::new();

        while !reader.is_empty() {
            let id_byte = reader.read_u8()?;
            let size = reader.read_u32_leb()? as usize;
            if size > reader.remaining() {
                return Err(WasmError::InvalidModule);
            }
            let section_start = reader.pos();
            let section_bytes = reader.read_bytes(size)?;
            let Some(id) = SectionId::from_byte(id_byte) else {
                // Unknown section IDs are skipped, not rejected — the
                // same permissiveness the core decoder extends to
                // unrecognized custom data (§4.1).
                continue;
            };

            match id {
                SectionId::Custom => {
                    let mut sec = Reader::new(section_bytes);
                    let name = sec.read_name()?;
                    let start = (section_start + sec.pos()) as u32;
                    custom_sections.push((
                        name.into(),
                        ByteRange {
                            start,
                            end: (section_start + size) as u32,
                        },
                    ));
                }
                SectionId::CoreModule => {
                    core_modules.push(ByteRange {
                        start: section_start as u32,
                        end: (section_start + size) as u32,
                    });
                }
                SectionId::Import | SectionId::Export => {
                    let mut sec = Reader::new(section_bytes);
                    let count = sec.read_u32_leb()?;
                    let dest = if id == SectionId::Import {
                        &mut imports
                    } else {
                        &mut exports
                    };
                    for _ in 0..count {
                        let name = sec.read_name()?;
                        let desc_start = section_start + sec.pos();
                        skip_extern_desc(&mut sec)?;
                        let desc_end = section_start + sec.pos();
                        dest.push(ComponentItem {
                            name: name.into(),
                            descriptor: ByteRange {
                                start: desc_start as u32,
                                end: desc_end as u32,
                            },
                        });
                    }
                }
                SectionId::Type
                | SectionId::Canonical
                | SectionId::Alias
                | SectionId::Start
                | SectionId::Instance
                | SectionId::CoreInstance
                | SectionId::CoreType
                | SectionId::Component => {
                    descriptors.push(Descriptor {
                        section: id,
                        bytes: ByteRange {
                            start: section_start as u32,
                            end: (section_start + size) as u32,
                        },
                    });
                }
            }
        }

        Ok(Component {
            bytes,
            core_modules,
            imports,
            exports,
            descriptors,
            custom_sections,
        })
    }

    pub fn bytes_at(&self, range: ByteRange) -> &[u8] {
        &self.bytes[range.start as usize..range.end as usize]
    }
}

/// Maps a WASI Preview‑2 interface name to the Preview‑1 host module
/// it should resolve against (§6: "a simple adapter maps WASI
/// Preview‑2 interface names ... to their Preview‑1 function groups
/// under the module name `wasi_snapshot_preview1`").
///
/// This is deliberately a flat allowlist rather than a parser of the
/// `wasi:pkg/interface@version` grammar: every interface this runtime
/// bridges resolves to the same Preview‑1 module, so there is nothing
/// for a per-interface mapping to select between yet.
pub fn preview1_module_for(interface: &str) -> Option<&'static str> {
    const KNOWN_INTERFACES: &[&str] = &[
        "wasi:cli/stdin",
        "wasi:cli/stdout",
        "wasi:cli/stderr",
        "wasi:cli/environment",
        "wasi:cli/exit",
        "wasi:clocks/wall-clock",
        "wasi:clocks/monotonic-clock",
        "wasi:filesystem/types",
        "wasi:filesystem/preopens",
        "wasi:random/random",
        "wasi:io/streams",
    ];
    KNOWN_INTERFACES
        .contains(&interface)
        .then_some("wasi_snapshot_preview1")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn empty_component() -> Vec<u8> {
        let mut bytes = COMPONENT_MAGIC.to_vec();
        bytes.extend_from_slice(&COMPONENT_VERSION);
        bytes
    }

    #[test]
    fn decodes_an_empty_component() {
        let component = Component::new(empty_component()).unwrap();
        assert!(component.core_modules.is_empty());
        assert!(component.imports.is_empty());
    }

    #[test]
    fn rejects_a_core_module_magic() {
        let bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        assert_eq!(Component::new(bytes).unwrap_err(), WasmError::InvalidModule);
    }

    #[test]
    fn extracts_an_embedded_core_module() {
        let mut bytes = empty_component();
        let core_module = [0x00u8, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        bytes.push(SectionId::CoreModule as u8);
        bytes.push(core_module.len() as u8);
        bytes.extend_from_slice(&core_module);

        let component = Component::new(bytes).unwrap();
        assert_eq!(component.core_modules.len(), 1);
        assert_eq!(
            component.bytes_at(component.core_modules[0]),
            &core_module
        );
    }

    #[test]
    fn import_section_with_multiple_entries_parses_all_names() {
        let mut bytes = empty_component();
        // import section: count=2
        //   "a"  -> func idx 0
        //   "bb" -> func idx 1
        let payload: Vec<u8> = vec![2, 1, b'a', 0x01, 0, 2, b'b', b'b', 0x01, 1];
        bytes.push(SectionId::Import as u8);
        bytes.push(payload.len() as u8);
        bytes.extend_from_slice(&payload);

        let component = Component::new(bytes).unwrap();
        let names: Vec<&str> = component.imports.iter().map(|i| &*i.name).collect();
        assert_eq!(names, vec!["a", "bb"]);
    }

    #[test]
    fn unknown_section_ids_are_skipped() {
        let mut bytes = empty_component();
        bytes.push(200);
        bytes.push(3);
        bytes.extend_from_slice(&[1, 2, 3]);
        assert!(Component::new(bytes).is_ok());
    }

    #[test]
    fn maps_known_preview2_interfaces() {
        assert_eq!(
            preview1_module_for("wasi:cli/stdin"),
            Some("wasi_snapshot_preview1")
        );
        assert_eq!(preview1_module_for("wasi:unknown/thing"), None);
    }
}
