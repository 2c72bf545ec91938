use anyhow::{Context as _, Error, Result};
use wrun::Module;

use super::Command;
use crate::args::InspectArgs;

/// Wraps [`InspectArgs`] so `validate` and `inspect` can each carry their
/// own [`Command`] impl despite sharing the same flag set.
pub struct ValidateCommand(pub InspectArgs);

impl Command for ValidateCommand {
    fn execute(self) -> Result<(), Error> {
        let wasm_file = &self.0.wasm_file;
        let bytes = std::fs::read(wasm_file)
            .with_context(|| format!("failed to read Wasm file '{}'", wasm_file.display()))?;
        Module::new(bytes)
            .map_err(|e| anyhow::anyhow!("'{}' is not a valid module: {e}", wasm_file.display()))?;
        println!("{}: ok", wasm_file.display());
        Ok(())
    }
}
