mod inspect;
mod run;
mod validate;

use anyhow::Error;

pub use inspect::InspectCommand;
pub use run::RunCommand;
pub use validate::ValidateCommand;

/// Implemented by sub-commands in order to execute them.
pub trait Command {
    fn execute(self) -> Result<(), Error>;
}
