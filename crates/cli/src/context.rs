use anyhow::{Context as _, Error, Result, bail};
use std::path::Path;
use wrun::{Engine, Instance, Linker, Module};

use crate::args::{KeyValue, RunArgs};

/// Owns the decoded module, its instance, and the WASI context for one
/// `run`/batch session.
pub struct Context {
    instance: Instance,
}

impl Context {
    pub fn new(wasm_path: &Path, links: &[KeyValue], envs: &[KeyValue], func_args: &[String]) -> Result<Self, Error> {
        let bytes = std::fs::read(wasm_path)
            .with_context(|| format!("failed to read Wasm file '{}'", wasm_path.display()))?;
        let module = Module::new(bytes)
            .map_err(|e| anyhow::anyhow!("failed to decode '{}': {e}", wasm_path.display()))?;

        let mut linker = Linker::new();
        let mut ctx_builder = wrun_wasi::WasiCtx::builder()
            .args(std::iter::once(wasm_path.display().to_string()).chain(func_args.iter().cloned()));
        for kv in envs {
            ctx_builder = ctx_builder.env(kv.key.as_str(), kv.value.as_str());
        }
        wrun_wasi::add_to_linker(&mut linker, ctx_builder.build());
        for link in links {
            link_module(&mut linker, link)?;
        }

        let instance = Instance::instantiate(module, &linker)
            .map_err(|e| anyhow::anyhow!("failed to instantiate '{}': {e}", wasm_path.display()))?;
        Ok(Context { instance })
    }

    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    pub fn instance_mut(&mut self) -> &mut Instance {
        &mut self.instance
    }

    /// Resolves `name` to an exported function index, falling back to
    /// the conventional WASI entry points `""` and `"_start"`.
    pub fn resolve_entry(&self, requested: Option<&str>) -> Result<(String, u32), Error> {
        if let Some(name) = requested {
            return self
                .instance
                .export_func_index(name)
                .map(|idx| (name.to_string(), idx))
                .ok_or_else(|| anyhow::anyhow!("no exported function named '{name}'"));
        }
        for candidate in ["", "_start"] {
            if let Some(idx) = self.instance.export_func_index(candidate) {
                return Ok((candidate.to_string(), idx));
            }
        }
        bail!("did not specify --invoke and could not find exported WASI entry point functions")
    }

    pub fn call(&mut self, func_idx: u32, args: &[wrun_core::UntypedVal]) -> Result<Vec<wrun_core::UntypedVal>, wrun_core::WasmError> {
        Engine::call(&mut self.instance, func_idx, args)
    }
}

fn link_module(linker: &mut Linker, kv: &KeyValue) -> Result<(), Error> {
    // `--link NAME=PATH` binds every export of the module at PATH into
    // `linker` under the module name NAME, letting `run` wire together
    // more than one Wasm module (§6 "CLI surface").
    let bytes = std::fs::read(&kv.value)
        .with_context(|| format!("failed to read linked module '{}'", kv.value))?;
    let dep_module = Module::new(bytes)
        .map_err(|e| anyhow::anyhow!("failed to decode linked module '{}': {e}", kv.value))?;
    let dep_instance = Instance::instantiate(dep_module.clone(), &Linker::new())
        .map_err(|e| anyhow::anyhow!("failed to instantiate linked module '{}': {e}", kv.value))?;
    let dep_instance = std::sync::Arc::new(std::sync::Mutex::new(dep_instance));

    for export in dep_module.exports() {
        if export.kind != wrun::module::ExternKind::Func {
            continue;
        }
        let Some(ty) = dep_module.func_type(wrun::module::FuncIdx(export.index)) else {
            continue;
        };
        let name = kv.key.clone();
        let field = export.name.to_string();
        let func_idx = export.index;
        let dep = dep_instance.clone();
        linker.define_func(name, field, ty.clone(), move |_caller, args| {
            let mut dep = dep.lock().unwrap();
            Engine::call(&mut dep, func_idx, args)
        });
    }
    Ok(())
}
