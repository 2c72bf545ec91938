//! A tiered WebAssembly execution engine: binary decoder, fixed-width
//! predecoder, register-IR allocator, a two-tier interpreter, and (on
//! `aarch64` with the `jit` feature) a native code generator.
//!
//! ```no_run
//! use wrun::{Config, Instance, Linker, Module};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let wasm = std::fs::read("module.wasm")?;
//! let module = Module::new(wasm)?;
//! let linker = Linker::new();
//! let mut instance = Instance::instantiate(module, &linker)?;
//! let func_idx = instance.export_func_index("main").expect("export");
//! let results = wrun::Engine::call(&mut instance, func_idx, &[])?;
//! # let _ = (config(), results);
//! # Ok(())
//! # }
//! # fn config() -> Config { Config::default() }
//! ```

pub mod component;
pub mod engine;
pub mod linker;
pub mod module;
pub mod predecode;
pub mod regir;
pub mod runtime;

pub use engine::{CompilationMode, Config, Engine, Instance};
pub use linker::Linker;
pub use module::Module;
pub use wrun_core::WasmError;

#[cfg(test)]
mod tests {
    use super::*;
    use wrun_core::{UntypedVal, ValType};

    fn wat_add_module() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        // type: (i32, i32) -> i32
        bytes.extend_from_slice(&[1, 7, 1, 0x60, 2, 0x7F, 0x7F, 1, 0x7F]);
        // function: 1 fn, type 0
        bytes.extend_from_slice(&[3, 2, 1, 0]);
        // export: "add" -> func 0
        bytes.extend_from_slice(&[7, 7, 1, 3, b'a', b'd', b'd', 0x00, 0x00]);
        // code: locals none, local.get 0, local.get 1, i32.add, end
        bytes.extend_from_slice(&[10, 9, 1, 7, 0, 0x20, 0x00, 0x20, 0x01, 0x6A, 0x0B]);
        bytes
    }

    #[test]
    fn runs_an_exported_add_function() {
        let module = Module::new(wat_add_module()).unwrap();
        let linker = Linker::new();
        let mut instance = Instance::instantiate(module, &linker).unwrap();
        let func_idx = instance.export_func_index("add").unwrap();
        let results = Engine::call(
            &mut instance,
            func_idx,
            &[UntypedVal::from(2i32), UntypedVal::from(40i32)],
        )
        .unwrap();
        assert_eq!(results[0].i32(), 42);
    }

    #[test]
    fn instantiation_fails_on_missing_import() {
        let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        bytes.extend_from_slice(&[1, 5, 1, 0x60, 0, 1, 0x7F]);
        // import: "env"."missing" func type 0
        bytes.extend_from_slice(&[2, 13, 1, 3, b'e', b'n', b'v', 7, b'm', b'i', b's', b's', b'i', b'n', b'g', 0x00, 0x00]);
        let module = Module::new(bytes).unwrap();
        let linker = Linker::new();
        assert_eq!(
            Instance::instantiate(module, &linker).unwrap_err(),
            WasmError::ImportNotFound
        );
    }

    #[test]
    fn host_import_is_callable() {
        let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        bytes.extend_from_slice(&[1, 7, 1, 0x60, 2, 0x7F, 0x7F, 1, 0x7F]);
        bytes.extend_from_slice(&[2, 13, 1, 3, b'e', b'n', b'v', 3, b'a', b'd', b'd', 0x00, 0x00]);
        bytes.extend_from_slice(&[7, 7, 1, 3, b'a', b'd', b'd', 0x00, 0x00]);
        let module = Module::new(bytes).unwrap();

        let mut linker = Linker::new();
        let ty = wrun_core::FuncType::new([ValType::I32, ValType::I32], [ValType::I32]);
        linker.define_func("env", "add", ty, |_instance, args| {
            Ok(vec![UntypedVal::from(args[0].i32() + args[1].i32())])
        });

        let mut instance = Instance::instantiate(module, &linker).unwrap();
        let func_idx = instance.export_func_index("add").unwrap();
        let results = Engine::call(
            &mut instance,
            func_idx,
            &[UntypedVal::from(19i32), UntypedVal::from(23i32)],
        )
        .unwrap();
        assert_eq!(results[0].i32(), 42);
    }

    /// `main() -> i32`, memory with zero pages, body `i32.const 0;
    /// i32.load offset=0`: any four-byte load traps against a
    /// zero-length memory.
    fn wat_memory_oob_module() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        // type: () -> i32
        bytes.extend_from_slice(&[1, 5, 1, 0x60, 0, 1, 0x7F]);
        // function: 1 fn, type 0
        bytes.extend_from_slice(&[3, 2, 1, 0]);
        // memory: 1 memory, flags=0 (no max), min=0 pages
        bytes.extend_from_slice(&[5, 3, 1, 0x00, 0x00]);
        // export: "main" -> func 0
        bytes.extend_from_slice(&[7, 8, 1, 4, b'm', b'a', b'i', b'n', 0x00, 0x00]);
        // code: locals none; i32.const 0; i32.load align=2 offset=0; end
        bytes.extend_from_slice(&[10, 9, 1, 7, 0, 0x41, 0x00, 0x28, 0x02, 0x00, 0x0B]);
        bytes
    }

    #[test]
    fn out_of_bounds_load_traps() {
        let module = Module::new(wat_memory_oob_module()).unwrap();
        let linker = Linker::new();
        let mut instance = Instance::instantiate(module, &linker).unwrap();
        let func_idx = instance.export_func_index("main").unwrap();
        let err = Engine::call(&mut instance, func_idx, &[]).unwrap_err();
        assert_eq!(err, WasmError::OutOfBoundsMemoryAccess);
    }

    /// One mutable i32 global initialized to 10; `main() -> i32` reads
    /// it, overwrites it with 32, then returns the new value — exercises
    /// `global.get`/`global.set` together rather than in isolation.
    fn wat_global_mutation_module() -> Vec<u8> {
        let mut bytes = vec![0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];
        // type: () -> i32
        bytes.extend_from_slice(&[1, 5, 1, 0x60, 0, 1, 0x7F]);
        // function: 1 fn, type 0
        bytes.extend_from_slice(&[3, 2, 1, 0]);
        // global: i32 mutable, init i32.const 10
        bytes.extend_from_slice(&[6, 6, 1, 0x7F, 0x01, 0x41, 0x0A, 0x0B]);
        // export: "main" -> func 0
        bytes.extend_from_slice(&[7, 8, 1, 4, b'm', b'a', b'i', b'n', 0x00, 0x00]);
        // code: locals none; i32.const 32; global.set 0; global.get 0; end
        bytes.extend_from_slice(&[
            10, 10, 1, 8, 0, 0x41, 0x20, 0x24, 0x00, 0x23, 0x00, 0x0B,
        ]);
        bytes
    }

    #[test]
    fn global_mutation_is_observed_after_set() {
        let module = Module::new(wat_global_mutation_module()).unwrap();
        let linker = Linker::new();
        let mut instance = Instance::instantiate(module, &linker).unwrap();
        let func_idx = instance.export_func_index("main").unwrap();
        let results = Engine::call(&mut instance, func_idx, &[]).unwrap();
        assert_eq!(results[0].i32(), 32);
    }
}
