//! CLI command implementations

pub mod budget;
pub mod collect;
pub mod error;
pub mod stations;

pub use budget::BudgetCommand;
pub use collect::{Cli, CollectArgs, Commands, OutputFormat};
pub use error::CliError;
pub use stations::StationsCommand;
