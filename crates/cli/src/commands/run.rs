use anyhow::{Error, Result, anyhow, bail};
use std::io::{BufRead, Write};
use wrun_core::{UntypedVal, ValType};

use super::Command;
use crate::args::RunArgs;
use crate::context::Context;
use crate::display::DisplayValue;
use crate::utils::decode_func_args;

pub type RunCommand = RunArgs;

impl Command for RunCommand {
    fn execute(self) -> Result<(), Error> {
        if let Some(categories) = &self.trace {
            init_tracing(categories);
        }

        let mut ctx = Context::new(&self.wasm_file, &self.link, &self.envs, &self.func_args)?;

        if self.batch {
            return run_batch(&mut ctx);
        }

        let (name, func_idx) = ctx.resolve_entry(self.invoke.as_deref())?;
        let ty = ctx
            .instance()
            .module
            .get_type(func_type_idx(&ctx, func_idx)?)
            .ok_or_else(|| anyhow!("function '{name}' has no registered type"))?
            .clone();
        let func_args = decode_func_args(&ty, &self.func_args)?;

        if self.profile {
            eprintln!("invoking {name}({:?})", self.func_args);
        }

        match ctx.call(func_idx, &func_args) {
            Ok(results) => {
                print_results(&ty.results().to_vec(), &results);
                Ok(())
            }
            Err(error) => bail!("failed during execution of '{name}': {error}"),
        }
    }
}

fn func_type_idx(ctx: &Context, func_idx: u32) -> Result<wrun::module::TypeIdx, Error> {
    // `Module::func_type` already resolves import-vs-defined index
    // space, but `get_type` wants the raw `TypeIdx`; reconstruct it by
    // scanning the combined function space the same way the module does.
    let module = &ctx.instance().module;
    if func_idx < module.num_imported_funcs() {
        return module
            .imports()
            .iter()
            .filter_map(|i| match &i.desc {
                wrun::module::ImportDesc::Func(t) => Some(*t),
                _ => None,
            })
            .nth(func_idx as usize)
            .ok_or_else(|| anyhow!("function index {func_idx} out of range"));
    }
    let local = (func_idx - module.num_imported_funcs()) as usize;
    module
        .funcs()
        .get(local)
        .map(|f| f.type_idx)
        .ok_or_else(|| anyhow!("function index {func_idx} out of range"))
}

fn print_results(result_types: &[ValType], results: &[UntypedVal]) {
    for (ty, value) in result_types.iter().zip(results) {
        println!("{}", DisplayValue(*ty, *value));
    }
}

/// Reads `invoke <len>:<name> [args...]` / `invoke hex:<hex-name> [args...]`
/// requests from stdin, one per line, and writes `ok [vals...]` or
/// `error <reason>` responses to stdout (§6 "CLI surface").
fn run_batch(ctx: &mut Context) -> Result<(), Error> {
    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    for line in stdin.lock().lines() {
        let line = line?;
        let response = match handle_batch_line(ctx, &line) {
            Ok(rendered) => rendered,
            Err(error) => format!("error {error}"),
        };
        writeln!(stdout, "{response}")?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_batch_line(ctx: &mut Context, line: &str) -> Result<String, Error> {
    let mut parts = line.split_whitespace();
    let Some("invoke") = parts.next() else {
        bail!("expected 'invoke <len>:<name> [args...]'");
    };
    let Some(target) = parts.next() else {
        bail!("missing invocation target");
    };
    let name = parse_batch_name(target)?;
    let func_idx = ctx
        .instance()
        .export_func_index(&name)
        .ok_or_else(|| anyhow!("no exported function named '{name}'"))?;
    let type_idx = func_type_idx(ctx, func_idx)?;
    let ty = ctx
        .instance()
        .module
        .get_type(type_idx)
        .ok_or_else(|| anyhow!("function '{name}' has no registered type"))?
        .clone();
    let args: Vec<String> = parts.map(String::from).collect();
    let func_args = decode_func_args(&ty, &args)?;
    let results = ctx
        .call(func_idx, &func_args)
        .map_err(|e| anyhow!("{e}"))?;
    let rendered: Vec<String> = ty
        .results()
        .iter()
        .zip(&results)
        .map(|(ty, v)| DisplayValue(*ty, *v).to_string())
        .collect();
    Ok(format!("ok {}", rendered.join(" ")))
}

fn parse_batch_name(target: &str) -> Result<String, Error> {
    if let Some(hex) = target.strip_prefix("hex:") {
        let bytes = (0..hex.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&hex[i..i + 2], 16))
            .collect::<Result<Vec<u8>, _>>()
            .map_err(|_| anyhow!("invalid hex-encoded name '{hex}'"))?;
        return String::from_utf8(bytes).map_err(|_| anyhow!("hex-encoded name is not valid UTF-8"));
    }
    let Some((len_str, name)) = target.split_once(':') else {
        bail!("invocation target must be '<len>:<name>' or 'hex:<hex-name>'");
    };
    let len: usize = len_str
        .parse()
        .map_err(|_| anyhow!("invalid length prefix '{len_str}'"))?;
    if name.len() != len {
        bail!("declared length {len} does not match name '{name}' ({} bytes)", name.len());
    }
    Ok(name.to_string())
}

fn init_tracing(categories: &str) {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_new(categories).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
