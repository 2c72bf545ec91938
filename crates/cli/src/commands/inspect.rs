use anyhow::{Context as _, Error, Result};
use wrun::Module;

use super::Command;
use crate::args::InspectArgs;
use crate::display::DisplayModuleSummary;

pub type InspectCommand = InspectArgs;

impl Command for InspectCommand {
    fn execute(self) -> Result<(), Error> {
        let bytes = std::fs::read(&self.wasm_file)
            .with_context(|| format!("failed to read Wasm file '{}'", self.wasm_file.display()))?;
        let module = Module::new(bytes)
            .map_err(|e| anyhow::anyhow!("failed to decode '{}': {e}", self.wasm_file.display()))?;
        println!("{}", DisplayModuleSummary(&module));
        Ok(())
    }
}
