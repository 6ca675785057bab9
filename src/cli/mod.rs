//! CLI command implementations

pub mod download;
pub mod error;
pub mod variables;

pub use download::{Cli, Commands, OutputFormat, RequestArgs};
pub use error::CliError;
pub use variables::VariablesCommand;
