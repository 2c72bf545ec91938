//! Instantiation and tiered execution (§4.4–§4.8).
//!
//! An [`Instance`] owns everything a running module needs: its decoded
//! [`Module`], its memories/tables/globals, and one [`FuncInstance`]
//! per entry of the combined import+defined function index space.
//! [`Engine::call`] is the single entry point every host caller and
//! every `call`/`call_indirect` dispatch inside the interpreter goes
//! through.

pub mod tier1;
pub mod tier2;

#[cfg(all(feature = "jit", target_arch = "aarch64"))]
pub mod jit;

use std::sync::Arc;

use wrun_core::{Reader, UntypedVal, ValType, WasmError};

use crate::linker::{HostFunc, Linker};
use crate::module::{ByteRange, ElemItem, ElementMode, ExternKind, ImportDesc, Module};
use crate::predecode::{self, PreFunc};
use crate::regir::{self};
use crate::runtime::{CallStack, Global, Memory, Table};
use wrun_ir::RegFunc;

/// Compilation strategy selection (§9 "Config").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompilationMode {
    /// Tier 1 only — always interpret the predecoded stream directly.
    Interpreter,
    /// Start at Tier 1, promote hot functions to the register-IR
    /// interpreter (and, on `aarch64` with the `jit` feature, further
    /// to native code) once their call count crosses
    /// [`tier1::HOT_THRESHOLD`].
    Tiered,
}

impl Default for CompilationMode {
    fn default() -> Self {
        Self::Tiered
    }
}

/// Engine-wide configuration (§9).
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub compilation_mode: CompilationMode,
}

/// A function in the instance's absolute function index space: either
/// a host function bound by the [`Linker`], or a module-defined
/// function lazily predecoded on first call.
pub enum FuncInstance {
    Host(HostFunc),
    Local(LocalFunc),
}

pub struct LocalFunc {
    pub type_idx: crate::module::TypeIdx,
    pub pre: PreFunc,
    pub regir: Option<RegFunc>,
    pub call_count: std::sync::atomic::AtomicU32,
    /// Tier 3's compiled form, populated lazily on first hot call.
    /// `Some(None)` means compilation was attempted and failed (an
    /// unsupported opcode), pinning the function at Tier 2 forever.
    #[cfg(all(feature = "jit", target_arch = "aarch64"))]
    pub jit: std::sync::OnceLock<Option<Arc<jit::JitFunc>>>,
}

/// A fully instantiated module: decoded [`Module`] plus its own
/// memories, tables, globals, and resolved function table.
pub struct Instance {
    pub module: Arc<Module>,
    pub memories: Vec<Memory>,
    pub tables: Vec<Table>,
    pub globals: Vec<Global>,
    pub funcs: Vec<FuncInstance>,
    pub call_stack: CallStack,
    /// Tracks `data.drop`, one flag per entry of
    /// `module.data_segments()`; `memory.init` against a dropped
    /// segment is treated as length-zero (§5 "Bulk memory").
    pub data_dropped: Vec<bool>,
    /// Tracks `elem.drop`, one flag per entry of
    /// `module.element_segments()` (§5 "Bulk memory").
    pub elem_dropped: Vec<bool>,
}

impl Instance {
    /// Instantiates `module` against `linker`, resolving every import
    /// in declaration order, applying active element/data segments,
    /// and running the start function if present (§4.8).
    pub fn instantiate(module: Module, linker: &Linker) -> Result<Self, WasmError> {
        tracing::debug!(target: "engine", "instantiating module");
        let module = Arc::new(module);
        let mut memories = Vec::new();
        let mut tables = Vec::new();
        let mut globals = Vec::new();
        let mut funcs = Vec::new();

        for import in module.imports() {
            match &import.desc {
                ImportDesc::Func(type_idx) => {
                    let ty = module.get_type(*type_idx).ok_or(WasmError::InvalidModule)?;
                    let host = linker.resolve_func(&import.module, &import.field, ty)?;
                    funcs.push(FuncInstance::Host(host));
                }
                ImportDesc::Memory(m) => {
                    memories.push(Memory::new(m.limits.min, m.limits.max));
                }
                ImportDesc::Table(t) => {
                    tables.push(Table::new(t.limits.min, t.limits.max));
                }
                ImportDesc::Global(_) => {
                    // Imported mutable globals would need a shared cell
                    // across instances; out of scope for this engine
                    // (§9 Non-goals: cross-instance shared state).
                    globals.push(Global::new(UntypedVal::from(0u64), false));
                }
                ImportDesc::Tag(_) => {}
            }
        }

        for def in module.funcs() {
            let code = module.bytes_at(def.code);
            let ty = module.get_type(def.type_idx).ok_or(WasmError::InvalidModule)?;
            let pre = match predecode::predecode(code, ty.params()) {
                Ok(pre) => pre,
                Err(predecode::PredecodeError::Invalid(e)) => return Err(e),
                Err(predecode::PredecodeError::Unsupported(reason)) => {
                    tracing::warn!(
                        target: "engine",
                        func_idx = funcs.len(),
                        ?reason,
                        "function fell back to an empty body: unsupported opcode"
                    );
                    PreFunc::default()
                }
            };
            let regir = regir::lower(&pre.instrs, &pre.consts, pre.num_locals);
            funcs.push(FuncInstance::Local(LocalFunc {
                type_idx: def.type_idx,
                pre,
                regir,
                call_count: std::sync::atomic::AtomicU32::new(0),
                #[cfg(all(feature = "jit", target_arch = "aarch64"))]
                jit: std::sync::OnceLock::new(),
            }));
        }

        for t in module.tables() {
            tables.push(Table::new(t.limits.min, t.limits.max));
        }
        for m in module.memories() {
            memories.push(Memory::new(m.limits.min, m.limits.max));
        }
        for g in module.globals() {
            let bits = eval_const_expr(&module, module.bytes_at(g.init))?;
            globals.push(Global::new(UntypedVal::from_bits(bits), g.ty.mutable));
        }

        let mut instance = Instance {
            module: module.clone(),
            memories,
            tables,
            globals,
            funcs,
            call_stack: CallStack::default(),
            data_dropped: vec![false; module.data_segments().len()],
            elem_dropped: vec![false; module.element_segments().len()],
        };

        for seg in module.element_segments() {
            if let ElementMode::Active { table, offset } = &seg.mode {
                let base = eval_const_expr(&module, module.bytes_at(*offset))? as u32;
                let items: Vec<Option<u32>> = seg
                    .items
                    .iter()
                    .map(|item| match item {
                        ElemItem::Func(idx) => Some(idx.0),
                        ElemItem::Expr(range) => {
                            eval_const_expr(&module, module.bytes_at(*range))
                                .ok()
                                .map(|v| v as u32)
                        }
                    })
                    .collect();
                if let Some(t) = instance.tables.get_mut(table.0 as usize) {
                    t.init(base, &items)?;
                }
            }
        }

        for seg in module.data_segments() {
            if let crate::module::DataMode::Active { memory, offset } = &seg.mode {
                let base = eval_const_expr(&module, module.bytes_at(*offset))? as u64;
                let bytes = module.bytes_at(seg.bytes);
                if let Some(mem) = instance.memories.get_mut(memory.0 as usize) {
                    mem.write(base, bytes)?;
                }
            }
        }

        if let Some(start) = module.start() {
            Engine::call(&mut instance, start.0, &[])?;
        }

        Ok(instance)
    }

    pub fn export_func_index(&self, name: &str) -> Option<u32> {
        let export = self.module.get_export(name)?;
        (export.kind == ExternKind::Func).then_some(export.index)
    }
}

/// Evaluates a restricted constant expression (global/element/data
/// offset init), the one place outside the predecoder that needs to
/// interpret raw Wasm bytes directly (§4.1 "restricted const-expr").
fn eval_const_expr(module: &Module, bytes: &[u8]) -> Result<u64, WasmError> {
    let mut reader = Reader::new(bytes);
    let opcode = reader.read_u8()?;
    let value = match opcode {
        0x41 => reader.read_i32_leb()? as u32 as u64,
        0x42 => reader.read_i64_leb()? as u64,
        0x43 => reader.read_f32()?.to_bits() as u64,
        0x44 => reader.read_f64()?.to_bits(),
        0x23 => {
            let _idx = reader.read_u32_leb()?;
            // Only imported globals may be referenced here per the Wasm
            // validation rules, and imports are bound to a zero-valued
            // placeholder (§9 Non-goals: no cross-instance shared
            // state), so every reference evaluates to zero regardless
            // of which import it names.
            let _ = module;
            0
        }
        0xD0 => {
            let _ty = ValType::from_byte(reader.read_u8()?).ok_or(WasmError::InvalidModule)?;
            0
        }
        0xD2 => reader.read_u32_leb()? as u64,
        _ => return Err(WasmError::InvalidModule),
    };
    Ok(value)
}

/// The tiered execution dispatcher (§4.4–§4.6): routes a call to the
/// interpreter tier appropriate for the callee's current hotness.
pub struct Engine;

impl Engine {
    pub fn call(
        instance: &mut Instance,
        func_idx: u32,
        args: &[UntypedVal],
    ) -> Result<Vec<UntypedVal>, WasmError> {
        tracing::trace!(target: "engine", func_idx, "call");
        instance.call_stack.enter()?;
        let result = Self::call_inner(instance, func_idx, args);
        instance.call_stack.leave();
        result
    }

    fn call_inner(
        instance: &mut Instance,
        func_idx: u32,
        args: &[UntypedVal],
    ) -> Result<Vec<UntypedVal>, WasmError> {
        // Clone the Arc out first: a host function needs `&mut Instance`
        // (to reach guest memory), which conflicts with the shared
        // borrow `instance.funcs.get` would otherwise hold open.
        let host = match instance.funcs.get(func_idx as usize).ok_or(WasmError::Trap)? {
            FuncInstance::Host(host) => Some(host.func.clone()),
            FuncInstance::Local(_) => None,
        };
        match host {
            Some(f) => f(instance, args),
            None => tier1::run(instance, func_idx, args),
        }
    }
}
