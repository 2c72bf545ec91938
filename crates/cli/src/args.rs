use anyhow::{Error, Result, bail};
use clap::{Parser, Subcommand};
use std::{path::PathBuf, str::FromStr};

use crate::commands::{Command, ValidateCommand};

/// A CLI flag value key-value argument (`--env K=V`, `--link NAME=PATH`).
#[derive(Debug, Clone)]
pub struct KeyValue {
    pub key: String,
    pub value: String,
}

impl FromStr for KeyValue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let Some(eq_pos) = s.find('=') else {
            bail!("missing '=' in KEY=VALUE pair: {s}")
        };
        let (key, eq_value) = s.split_at(eq_pos);
        let value = &eq_value[1..];
        if key.is_empty() {
            bail!("missing KEY in KEY=VALUE pair: {s}")
        }
        Ok(KeyValue {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

#[derive(Parser)]
#[command(
    name = "wrun",
    version,
    about = "A tiered WebAssembly runtime",
    after_help = "If a subcommand is not provided, the `run` subcommand is used.",
    args_conflicts_with_subcommands = true
)]
pub struct WrunApp {
    #[command(subcommand)]
    pub command: Option<WrunCommand>,

    #[command(flatten)]
    pub run: RunArgs,
}

#[derive(Subcommand)]
pub enum WrunCommand {
    /// Executes a Wasm module (the default subcommand).
    Run(RunArgs),
    /// Decodes a module and prints its imports/exports/sections.
    Inspect(InspectArgs),
    /// Decodes and validates a module without running it.
    Validate(InspectArgs),
}

impl Command for WrunApp {
    fn execute(self) -> Result<(), Error> {
        let command = self.command.unwrap_or(WrunCommand::Run(self.run));
        match command {
            WrunCommand::Run(args) => args.execute(),
            WrunCommand::Inspect(args) => args.execute(),
            WrunCommand::Validate(args) => ValidateCommand(args).execute(),
        }
    }
}

#[derive(Parser)]
#[command(trailing_var_arg = true)]
pub struct RunArgs {
    /// The host directory to pre-open for the guest's WASI filesystem.
    #[clap(long = "dir", value_name = "DIRECTORY", action = clap::ArgAction::Append)]
    pub dirs: Vec<PathBuf>,

    /// An environment variable made available to the guest via WASI.
    #[clap(long = "env", value_name = "NAME=VAL", value_parser(KeyValue::from_str), action = clap::ArgAction::Append)]
    pub envs: Vec<KeyValue>,

    /// Binds a host import name to a module path, for linking multiple
    /// Wasm modules together (`--link env.helper=helper.wasm`).
    #[clap(long = "link", value_name = "NAME=PATH", value_parser(KeyValue::from_str), action = clap::ArgAction::Append)]
    pub link: Vec<KeyValue>,

    /// The function to invoke. Defaults to `""` or `_start` if present.
    #[clap(long = "invoke", value_name = "FUNCTION")]
    pub invoke: Option<String>,

    /// Reads invocation requests from stdin instead of invoking once.
    #[clap(long = "batch")]
    pub batch: bool,

    /// Prints a line of execution-time tracing per invocation.
    #[clap(long = "profile")]
    pub profile: bool,

    /// Enables `tracing` log categories, e.g. `--trace=decode,engine`.
    #[clap(long = "trace", value_name = "CATEGORIES")]
    pub trace: Option<String>,

    /// The Wasm module file to execute.
    #[clap(value_name = "MODULE")]
    pub wasm_file: PathBuf,

    /// Arguments passed to the invoked function, or to WASI as argv.
    #[clap(value_name = "ARGS")]
    pub func_args: Vec<String>,
}

#[derive(Parser)]
pub struct InspectArgs {
    /// The Wasm module file to inspect.
    #[clap(value_name = "MODULE")]
    pub wasm_file: PathBuf,
}
