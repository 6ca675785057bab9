//! CLI command for listing published variables

use super::download::OutputFormat;
use super::CliError;
use crate::{TemporalResolution, Variable};
use clap::Args;
use serde_json::json;

/// Variables subcommand
#[derive(Debug, Args)]
pub struct VariablesCommand {
    /// Only list variables published at this resolution
    #[arg(long)]
    pub resolution: Option<TemporalResolution>,
}

impl VariablesCommand {
    /// Variables matching the optional resolution filter
    pub fn matching(&self) -> Vec<Variable> {
        match self.resolution {
            Some(resolution) => Variable::available_for(resolution),
            None => Variable::ALL.to_vec(),
        }
    }

    /// Print the variable table
    pub fn execute(&self, format: OutputFormat) -> Result<(), CliError> {
        let resolutions = [
            TemporalResolution::Daily,
            TemporalResolution::Monthly,
            TemporalResolution::Annual,
        ];
        let variables = self.matching();

        match format {
            OutputFormat::Json => {
                let rows: Vec<_> = variables
                    .iter()
                    .map(|variable| {
                        let available: Vec<_> = resolutions
                            .iter()
                            .filter(|r| variable.supports(**r))
                            .map(|r| {
                                json!({
                                    "resolution": r.as_str(),
                                    "earliest": variable.earliest_available(*r).to_string(),
                                })
                            })
                            .collect();
                        json!({
                            "variable": variable.code(),
                            "description": variable.description(),
                            "unit": variable.unit(),
                            "resolutions": available,
                        })
                    })
                    .collect();
                let output = serde_json::to_string_pretty(&rows).map_err(|e| {
                    CliError::InvalidArgument(format!("Failed to serialize variables: {e}"))
                })?;
                println!("{output}");
            }
            OutputFormat::Human => {
                println!("Found {} variables:\n", variables.len());
                for variable in variables {
                    let available: Vec<String> = resolutions
                        .iter()
                        .filter(|r| variable.supports(**r))
                        .map(|r| format!("{} (from {})", r, variable.earliest_available(*r)))
                        .collect();
                    println!(
                        "{:<7} | {:<4} | {} | {}",
                        variable.code(),
                        variable.unit(),
                        variable.description(),
                        available.join(", ")
                    );
                }
            }
        }

        Ok(())
    }
}
