//! Station lookup and registry listing

use crate::collector::budget::RequestBudget;
use crate::collector::cache::ResponseCache;
use crate::fetcher::FetchResult;
use crate::registry::StationRegistry;
use crate::resume::{self, RunState};
use crate::Station;
use clap::Args;
use serde_json::json;
use std::sync::Arc;

use super::{Cli, CliError, OutputFormat};

/// Stations subcommand
#[derive(Debug, Args)]
pub struct StationsCommand {
    /// Station name to search for. Lists the registered stations when omitted.
    pub query: Option<String>,
}

impl StationsCommand {
    /// Execute the stations command
    pub async fn execute(&self, cli: &Cli) -> Result<(), CliError> {
        match &self.query {
            Some(query) => self.lookup(cli, query).await,
            None => list_registry(cli.output_format),
        }
    }

    async fn lookup(&self, cli: &Cli, query: &str) -> Result<(), CliError> {
        // location lookups are unmetered, the snapshot only feeds the other categories
        let state = RunState::load_or_new(&resume::state_path(&cli.resume_dir))?;
        let budget: Arc<RequestBudget> = Arc::new(cli.budget(&state));
        let client = cli.client(budget, Arc::new(ResponseCache::new()));

        let stations = match client.lookup_station(query).await? {
            FetchResult::Success(stations) => stations,
            FetchResult::BudgetExhausted => {
                return Err(CliError::LookupFailed("daily budget exhausted".to_string()))
            }
            FetchResult::RetryableFailure(msg) | FetchResult::TerminalFailure(msg) => {
                return Err(CliError::LookupFailed(msg))
            }
        };

        match cli.output_format {
            OutputFormat::Json => {
                let output = json!({ "query": query, "stations": stations });
                println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
            }
            OutputFormat::Human => {
                if stations.is_empty() {
                    println!("No stations found for '{query}'");
                }
                for station in &stations {
                    println!("{}", format_station(station));
                }
            }
        }
        Ok(())
    }
}

fn list_registry(format: OutputFormat) -> Result<(), CliError> {
    let registry = StationRegistry::load_embedded()?;

    match format {
        OutputFormat::Json => {
            let output = json!({
                "stations": registry.stations(),
                "pairs": registry.pairs(),
            });
            println!("{}", serde_json::to_string_pretty(&output).unwrap_or_default());
        }
        OutputFormat::Human => {
            println!("Stations:");
            for station in registry.stations() {
                println!("  {:<12} {}", station.id(), station.name());
            }
            println!("Pairs:");
            for pair in registry.pairs() {
                println!("  {} -> {}", pair.from(), pair.to());
            }
        }
    }
    Ok(())
}

fn format_station(station: &Station) -> String {
    let id = station.id.as_deref().unwrap_or("-");
    let name = station.name.as_deref().unwrap_or("<unnamed>");
    match station.coordinate.and_then(|c| c.x.zip(c.y)) {
        Some((x, y)) => format!("{id:<12} {name} ({x:.5}, {y:.5})"),
        None => format!("{id:<12} {name}"),
    }
}
