//! Host-import binding (§4.8): resolves a module's import section
//! against host-registered functions by `(module, field)` name and
//! exact signature match.

use std::collections::HashMap;
use std::sync::Arc;

use wrun_core::{FuncType, UntypedVal, WasmError};

use crate::engine::Instance;

/// A host function callable from wasm: takes the calling [`Instance`]
/// (so a host function like WASI's `fd_write` can read/write the
/// guest's linear memory) plus the untyped argument slots in
/// declared-parameter order, and returns the declared results in order
/// or traps. Mirrors the `Caller`-style host-function signature the
/// wider Wasm-runtime ecosystem uses for exactly this reason.
pub type HostFn = dyn Fn(&mut Instance, &[UntypedVal]) -> Result<Vec<UntypedVal>, WasmError> + Send + Sync;

#[derive(Clone)]
pub struct HostFunc {
    pub ty: FuncType,
    pub func: Arc<HostFn>,
}

/// A resolver binding `(module, field)` names to host functions,
/// consulted in declaration order during instantiation.
#[derive(Clone, Default)]
pub struct Linker {
    funcs: HashMap<(String, String), HostFunc>,
}

impl Linker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a host function under `module`/`field`. A later call
    /// with the same key overwrites the earlier registration, matching
    /// the teacher's own linker semantics of "last definition wins".
    pub fn define_func(
        &mut self,
        module: impl Into<String>,
        field: impl Into<String>,
        ty: FuncType,
        func: impl Fn(&mut Instance, &[UntypedVal]) -> Result<Vec<UntypedVal>, WasmError> + Send + Sync + 'static,
    ) {
        self.funcs.insert(
            (module.into(), field.into()),
            HostFunc {
                ty,
                func: Arc::new(func),
            },
        );
    }

    /// Looks up a host function by import name, checking that its
    /// signature matches exactly (§4.8 "returns `ImportNotFound` on
    /// failure" covers both a missing name and a signature mismatch).
    pub fn resolve_func(&self, module: &str, field: &str, expected: &FuncType) -> Result<HostFunc, WasmError> {
        let entry = self
            .funcs
            .get(&(module.to_string(), field.to_string()))
            .ok_or(WasmError::ImportNotFound)?;
        if &entry.ty != expected {
            return Err(WasmError::ImportNotFound);
        }
        Ok(entry.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::Module;
    use wrun_core::ValType;

    fn empty_instance() -> Instance {
        let bytes: &[u8] = &[0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        let module = Module::new(bytes.to_vec()).unwrap();
        Instance::instantiate(module, &Linker::new()).unwrap()
    }

    #[test]
    fn resolves_a_matching_function() {
        let mut linker = Linker::new();
        let ty = FuncType::new([ValType::I32], [ValType::I32]);
        linker.define_func("env", "double", ty.clone(), |_instance, args| {
            Ok(vec![UntypedVal::from(args[0].i32() * 2)])
        });
        let found = linker.resolve_func("env", "double", &ty).unwrap();
        let mut instance = empty_instance();
        let result = (found.func)(&mut instance, &[UntypedVal::from(21i32)]).unwrap();
        assert_eq!(result[0].i32(), 42);
    }

    #[test]
    fn missing_import_is_not_found() {
        let linker = Linker::new();
        let ty = FuncType::new([], []);
        assert_eq!(
            linker.resolve_func("env", "missing", &ty).unwrap_err(),
            WasmError::ImportNotFound
        );
    }
}
