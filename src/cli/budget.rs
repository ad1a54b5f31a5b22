//! Budget status command

use crate::collector::budget::BudgetState;
use crate::resume::{self, RunState};
use clap::Args;
use serde_json::json;

use super::{Cli, CliError, OutputFormat};

/// Budget subcommand
#[derive(Debug, Args)]
pub struct BudgetCommand {}

impl BudgetCommand {
    /// Print the budget as a new run would start with it
    pub fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        let state = RunState::load_or_new(&resume::state_path(&cli.resume_dir))?;
        let snapshot = cli.budget(&state).snapshot();

        match cli.output_format {
            OutputFormat::Json => {
                let output = json!({ "budgets": snapshot });
                println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
            }
            OutputFormat::Human => {
                for state in &snapshot {
                    println!("{}", format_budget(state));
                }
                if let Some(summary) = state.last_summary() {
                    println!("\nLast run:\n{}", summary.render_human());
                }
            }
        }
        Ok(())
    }
}

fn format_budget(state: &BudgetState) -> String {
    format!(
        "{:<14} {:>6}/{:<6} used, {} remaining, resets at {}",
        state.category().to_string(),
        state.used(),
        state.ceiling(),
        state.remaining(),
        state.resets_at().format("%Y-%m-%d %H:%M UTC")
    )
}
