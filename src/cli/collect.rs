//! Collect command and the top-level CLI definition

use crate::collector::budget::RequestBudget;
use crate::collector::cache::ResponseCache;
use crate::collector::config::{
    CONNECTIONS_DAILY_CEILING, DEFAULT_BASE_URL, MAX_RETRIES, STATIONBOARD_DAILY_CEILING,
};
use crate::collector::retry::{RetryExecutor, RetryPolicy};
use crate::collector::{CollectionRequest, CollectionScheduler, RunSummary};
use crate::fetcher::http::HttpTransport;
use crate::fetcher::pacer::RequestPacer;
use crate::fetcher::ApiClient;
use crate::output::CsvSink;
use crate::registry::StationRegistry;
use crate::resume::{self, RunLock, RunState};
use crate::shutdown::SharedShutdown;
use crate::{BoardType, Category, TimeSlot};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use super::CliError;

/// Output format for command results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON output
    Json,
    /// Human-readable output
    #[default]
    Human,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "human" => Ok(OutputFormat::Human),
            _ => Err(format!("Invalid output format: {s}")),
        }
    }
}

/// Parse a `FROM:TO` connection pair
fn parse_pair(s: &str) -> Result<(String, String), String> {
    let (from, to) = s
        .split_once(':')
        .ok_or_else(|| format!("Invalid pair: {s} (expected FROM:TO)"))?;
    let (from, to) = (from.trim(), to.trim());
    if from.is_empty() || to.is_empty() {
        return Err(format!("Invalid pair: {s} (origin and destination are required)"));
    }
    Ok((from.to_string(), to.to_string()))
}

/// Transit data collector CLI
#[derive(Parser, Debug)]
#[command(name = "transit-collector")]
#[command(about = "Collect station boards and connections from the Swiss public transport API", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (json or human)
    #[arg(long, global = true, default_value = "human")]
    pub output_format: OutputFormat,

    /// Root directory of the CSV output
    #[arg(long, global = true, default_value = "data/raw")]
    pub data_dir: PathBuf,

    /// Directory holding the budget snapshot, failed cells and cache snapshot
    #[arg(long, global = true, default_value = ".resume")]
    pub resume_dir: PathBuf,

    /// Retries after the first attempt of a transient failure (range: 0-20)
    #[arg(long, global = true, default_value_t = MAX_RETRIES, value_parser = clap::value_parser!(u32).range(0..=20))]
    pub max_retries: u32,

    /// Daily ceiling of station board requests
    #[arg(long, global = true, default_value_t = STATIONBOARD_DAILY_CEILING)]
    pub board_ceiling: u32,

    /// Daily ceiling of connection requests
    #[arg(long, global = true, default_value_t = CONNECTIONS_DAILY_CEILING)]
    pub connection_ceiling: u32,

    /// Base URL of the transport API
    #[arg(long, global = true, default_value = DEFAULT_BASE_URL)]
    pub base_url: String,

    /// Load the response cache snapshot before a run and save it afterwards
    #[arg(long, global = true, default_value_t = false)]
    pub persist_cache: bool,

    /// Serve Prometheus metrics on this address
    #[arg(long, global = true)]
    pub metrics_addr: Option<SocketAddr>,
}

impl Cli {
    /// Budget with the configured ceilings, restored from `state`
    pub fn budget(&self, state: &RunState) -> RequestBudget {
        let budget = RequestBudget::new([
            (Category::StationBoard, self.board_ceiling),
            (Category::Connections, self.connection_ceiling),
        ]);
        budget.restore(state.budgets());
        budget
    }

    /// HTTP client sharing `budget` and `cache`
    pub fn client(&self, budget: Arc<RequestBudget>, cache: Arc<ResponseCache>) -> ApiClient {
        let policy = RetryPolicy::default().with_max_retries(self.max_retries);
        ApiClient::new(
            Arc::new(HttpTransport::new(self.base_url.as_str())),
            budget,
            cache,
            RetryExecutor::new(policy),
        )
        .with_pacer(RequestPacer::default())
    }
}

/// CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect station boards and connections for a date range
    Collect(CollectArgs),

    /// Look up stations by name, or list the registered stations
    Stations(super::StationsCommand),

    /// Show the remaining daily request budget
    Budget(super::BudgetCommand),
}

/// Arguments of the collect command
#[derive(Parser, Debug)]
pub struct CollectArgs {
    /// First date to collect (YYYY-MM-DD)
    #[arg(long)]
    pub start_date: NaiveDate,

    /// Last date to collect, inclusive (defaults to the start date)
    #[arg(long)]
    pub end_date: Option<NaiveDate>,

    /// Station to collect boards for (repeatable)
    #[arg(long = "station")]
    pub stations: Vec<String>,

    /// Connection pair as FROM:TO (repeatable)
    #[arg(long = "pair", value_parser = parse_pair)]
    pub pairs: Vec<(String, String)>,

    /// Restrict the run to these categories (board, connections)
    #[arg(long = "category", value_delimiter = ',')]
    pub categories: Vec<Category>,

    /// Station board slots as HH:MM, comma separated (default: every hour 05:00-23:00)
    #[arg(long, value_delimiter = ',')]
    pub board_slots: Vec<TimeSlot>,

    /// Connection slots as HH:MM, comma separated (default: commuter peaks)
    #[arg(long, value_delimiter = ',')]
    pub connection_slots: Vec<TimeSlot>,

    /// Board type: arrival or departure
    #[arg(long, default_value = "arrival")]
    pub board_type: BoardType,

    /// Only re-run the cells that failed permanently in earlier runs
    #[arg(long, default_value_t = false)]
    pub only_failed: bool,
}

impl CollectArgs {
    /// Assemble the collection request. Registry defaults apply when no target is given.
    pub fn request(&self, state: &RunState) -> Result<CollectionRequest, CliError> {
        let end_date = self.end_date.unwrap_or(self.start_date);
        let registry = StationRegistry::load_embedded()?;
        let mut builder = CollectionRequest::builder(self.start_date, end_date)
            .board_type(self.board_type);

        if self.stations.is_empty() && self.pairs.is_empty() {
            for target in registry.default_station_targets() {
                builder = builder.station_target(target);
            }
            for pair in registry.pairs() {
                builder = builder.pair(pair.from(), pair.to());
            }
        } else {
            for name in &self.stations {
                builder = builder.station_target(registry.station_target(name));
            }
            for (from, to) in &self.pairs {
                builder = builder.pair(from.as_str(), to.as_str());
            }
        }

        if !self.categories.is_empty() {
            builder = builder.categories(self.categories.clone());
        }
        if !self.board_slots.is_empty() {
            builder = builder.board_slots(self.board_slots.clone());
        }
        if !self.connection_slots.is_empty() {
            builder = builder.connection_slots(self.connection_slots.clone());
        }
        if self.only_failed {
            builder = builder.only_cells(state.failed_cell_keys());
        }

        Ok(builder.build()?)
    }

    /// Execute the collect command
    pub async fn execute(&self, cli: &Cli, shutdown: SharedShutdown) -> Result<(), CliError> {
        let _lock = RunLock::try_acquire(&cli.resume_dir)?;
        let state_path = resume::state_path(&cli.resume_dir);
        let cache_path = resume::cache_path(&cli.resume_dir);

        let mut state = RunState::load_or_new(&state_path)?;
        let request = self.request(&state)?;

        let budget = Arc::new(cli.budget(&state));
        let cache = Arc::new(ResponseCache::new());
        if cli.persist_cache {
            let loaded = resume::load_cache(&cache_path, &cache)?;
            info!(entries = loaded, "Loaded response cache snapshot");
        }

        let client = Arc::new(cli.client(budget.clone(), cache.clone()));
        let sink = Arc::new(CsvSink::new(cli.data_dir.clone()));

        info!(
            start = %request.start_date,
            end = %request.end_date,
            cells = request.total_cells(),
            data_dir = %cli.data_dir.display(),
            "Starting collection"
        );

        let mut scheduler = CollectionScheduler::new(client, sink).with_shutdown(shutdown);
        let progress = (cli.output_format == OutputFormat::Human).then(create_progress_bar);
        if let Some(progress) = &progress {
            scheduler = scheduler.with_progress(progress.clone());
        }

        let result = scheduler.run(&request).await;

        let summary = match &result {
            Ok(summary) => Some(summary),
            Err(e) => e.summary(),
        };
        if let Some(summary) = summary {
            state.record_run(&budget, summary);
            state.save(&state_path)?;
            if cli.persist_cache {
                let saved = resume::save_cache(&cache_path, &cache)?;
                info!(entries = saved, "Saved response cache snapshot");
            }
        }

        match result {
            Ok(summary) => {
                output_summary(cli.output_format, &summary)?;
                Ok(())
            }
            Err(e) => {
                if let Some(summary) = e.summary() {
                    output_summary(cli.output_format, summary)?;
                }
                Err(e.into())
            }
        }
    }
}

fn output_summary(format: OutputFormat, summary: &RunSummary) -> Result<(), CliError> {
    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(summary)
                .map_err(|e| CliError::ConfigurationError(format!("Failed to encode summary: {e}")))?;
            println!("{json}");
        }
        OutputFormat::Human => {
            println!("{}", summary.render_human());
            if summary.cancelled {
                warn!("Run interrupted, pending cells are collected on the next run");
            }
        }
    }
    Ok(())
}

/// Create progress bar with style. The scheduler sets its length.
fn create_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new(0);
    let style = ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({percent}%) {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-");
    pb.set_style(style);
    pb.set_message("Collecting");
    pb
}
