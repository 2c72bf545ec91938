use anyhow::{Error, anyhow, bail};
use wrun_core::{FuncType, UntypedVal, ValType};

/// Parses `args` into [`UntypedVal`]s matching `ty`'s declared parameter
/// types, or fails with a message naming the offending argument.
pub fn decode_func_args(ty: &FuncType, args: &[String]) -> Result<Vec<UntypedVal>, Error> {
    if args.len() != ty.params().len() {
        bail!(
            "expected {} argument(s), got {}",
            ty.params().len(),
            args.len()
        );
    }
    ty.params()
        .iter()
        .zip(args)
        .enumerate()
        .map(|(n, (param_type, arg))| {
            macro_rules! make_err {
                () => {
                    |_| {
                        anyhow!(
                            "failed to parse function argument {arg} at index {n} as {param_type}"
                        )
                    }
                };
            }
            match param_type {
                ValType::I32 => arg.parse::<i32>().map(UntypedVal::from).map_err(make_err!()),
                ValType::I64 => arg.parse::<i64>().map(UntypedVal::from).map_err(make_err!()),
                ValType::F32 => arg.parse::<f32>().map(UntypedVal::from).map_err(make_err!()),
                ValType::F64 => arg.parse::<f64>().map(UntypedVal::from).map_err(make_err!()),
                ValType::V128 => arg
                    .parse::<u128>()
                    .map(|v| UntypedVal::from(v as u64))
                    .map_err(make_err!()),
                ValType::FuncRef | ValType::ExternRef => {
                    bail!("the wrun CLI cannot take arguments of reference type")
                }
            }
        })
        .collect()
}
