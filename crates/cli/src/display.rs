use std::fmt::{self, Display};
use wrun::module::{ExternKind, Module};
use wrun_core::{FuncType, UntypedVal, ValType};

/// Display wrapper for a 64-bit widened Wasm value, printed in the
/// representation implied by `ty`.
pub struct DisplayValue(pub ValType, pub UntypedVal);

impl Display for DisplayValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            ValType::I32 => self.1.i32().fmt(f),
            ValType::I64 => self.1.i64().fmt(f),
            ValType::F32 => self.1.f32().fmt(f),
            ValType::F64 => self.1.f64().fmt(f),
            ValType::V128 | ValType::FuncRef | ValType::ExternRef => {
                write!(f, "0x{:016x}", self.1.i64())
            }
        }
    }
}

fn write_func_type(f: &mut fmt::Formatter<'_>, name: Option<&str>, ty: &FuncType) -> fmt::Result {
    match name {
        Some(name) => write!(f, "fn {name}(")?,
        None => f.write_str("fn(")?,
    }
    for (i, p) in ty.params().iter().enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        p.fmt(f)?;
    }
    f.write_str(")")?;
    match ty.results() {
        [] => {}
        [single] => {
            f.write_str(" -> ")?;
            single.fmt(f)?;
        }
        many => {
            f.write_str(" -> (")?;
            for (i, r) in many.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                r.fmt(f)?;
            }
            f.write_str(")")?;
        }
    }
    Ok(())
}

/// Lists every exported function of a decoded [`Module`], one per line.
pub struct DisplayExportedFuncs<'a>(pub &'a Module);

impl Display for DisplayExportedFuncs<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let funcs: Vec<_> = self
            .0
            .exports()
            .iter()
            .filter(|e| e.kind == ExternKind::Func)
            .collect();
        if funcs.is_empty() {
            return f.write_str("the module exports no functions");
        }
        f.write_str("the module exports the following functions:\n")?;
        for export in funcs {
            let Some(ty) = self.0.func_type(wrun::module::FuncIdx(export.index)) else {
                continue;
            };
            f.write_str(" - ")?;
            write_func_type(f, Some(&export.name), ty)?;
            f.write_str("\n")?;
        }
        Ok(())
    }
}

/// Summarizes a decoded module's sections for `inspect`.
pub struct DisplayModuleSummary<'a>(pub &'a Module);

impl Display for DisplayModuleSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.0;
        writeln!(f, "types:      {}", m.types().len())?;
        writeln!(f, "imports:    {}", m.imports().len())?;
        writeln!(f, "funcs:      {} (+{} imported)", m.funcs().len(), m.num_imported_funcs())?;
        writeln!(f, "tables:     {} (+{} imported)", m.tables().len(), m.num_imported_tables())?;
        writeln!(f, "memories:   {} (+{} imported)", m.memories().len(), m.num_imported_memories())?;
        writeln!(f, "globals:    {} (+{} imported)", m.globals().len(), m.num_imported_globals())?;
        writeln!(f, "exports:    {}", m.exports().len())?;
        writeln!(f, "elem segs:  {}", m.element_segments().len())?;
        writeln!(f, "data segs:  {}", m.data_segments().len())?;
        write!(f, "start:      {}", m.start().map_or("none".to_string(), |f| f.0.to_string()))?;
        write!(f, "\n{}", DisplayExportedFuncs(m))
    }
}
