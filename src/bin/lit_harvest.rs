use std::fs::{self, OpenOptions};
use std::process::ExitCode;
use std::sync::Mutex;

use camino::Utf8PathBuf;
use chrono::Local;
use clap::Parser;
use miette::IntoDiagnostic;
use tracing::info;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use lit_harvester::config::ConfigLoader;
use lit_harvester::domain::{DateRange, SearchQuery};
use lit_harvester::error::HarvestError;
use lit_harvester::fetcher::HttpFetcher;
use lit_harvester::harvest::{Harvester, ProgressSink};
use lit_harvester::output::{JsonOutput, LogSink, OutputMode, print_summary};
use lit_harvester::retry::Retrying;
use lit_harvester::workspace::Workspace;

const INITIAL_DAYS_BACK: u32 = 30;
const INITIAL_MAX_RESULTS: usize = 100;

#[derive(Parser)]
#[command(name = "lit-harvest")]
#[command(about = "Harvest open-access publications into a deduplicating registry")]
#[command(version, author)]
struct Cli {
    /// First run over a new output directory: 30 days, up to 100 results.
    #[arg(long, conflicts_with_all = ["days_back", "max_results"])]
    initial_fetch: bool,

    #[arg(long, default_value_t = 7)]
    days_back: u32,

    #[arg(long, default_value_t = 50)]
    max_results: usize,

    #[arg(long)]
    output_dir: Option<String>,

    #[arg(long)]
    topic: Option<String>,

    #[arg(long)]
    config: Option<String>,

    /// Print the run report as JSON on stdout.
    #[arg(long)]
    json: bool,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(err) = report.downcast_ref::<HarvestError>() {
            return ExitCode::from(map_exit_code(err));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &HarvestError) -> u8 {
    match error {
        HarvestError::RegistryRead(_)
        | HarvestError::RegistryCorrupt { .. }
        | HarvestError::RegistryWrite(_)
        | HarvestError::ConfigRead(_)
        | HarvestError::ConfigParse(_)
        | HarvestError::InvalidConfig(_)
        | HarvestError::InvalidDateRange { .. } => 2,
        _ => 1,
    }
}

fn init_tracing(workspace: &Workspace) -> miette::Result<()> {
    fs::create_dir_all(workspace.root().as_std_path()).into_diagnostic()?;
    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(workspace.log_path().as_std_path())
        .into_diagnostic()?;

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(
            fmt::layer()
                .with_target(false)
                .with_ansi(false)
                .with_writer(Mutex::new(log_file)),
        )
        .try_init()
        .into_diagnostic()?;
    Ok(())
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::Json
    } else {
        OutputMode::Human
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    if let Some(topic) = cli.topic.filter(|topic| !topic.trim().is_empty()) {
        config.topic = topic;
    }
    if let Some(output_dir) = cli.output_dir {
        config.output_dir = Utf8PathBuf::from(output_dir);
    }

    let workspace = Workspace::new(config.output_dir.clone());
    init_tracing(&workspace)?;

    let (days_back, max_results) = if cli.initial_fetch {
        (INITIAL_DAYS_BACK, INITIAL_MAX_RESULTS)
    } else {
        (cli.days_back, cli.max_results)
    };
    let query = SearchQuery {
        topic: config.topic.clone(),
        publication_types: config.publication_types.clone(),
        date_range: DateRange::last_days(days_back, Local::now().date_naive())?,
        max_results,
    };
    info!(output_dir = %workspace.root(), initial = cli.initial_fetch, "lit-harvest starting");

    let harvester = Harvester::new(
        workspace,
        config.search_backend()?,
        Retrying::new(config.resolver_backend()?, config.retry),
        Retrying::new(HttpFetcher::new()?, config.retry),
        config.analyzer_backend()?,
        Retrying::new(config.storage_backend()?, config.retry),
    );

    let sink: &dyn ProgressSink = match output_mode {
        OutputMode::Json => &JsonOutput,
        OutputMode::Human => &LogSink,
    };
    let report = harvester.run(&query, sink)?;

    match output_mode {
        OutputMode::Json => JsonOutput::print_report(&report).into_diagnostic()?,
        OutputMode::Human => print_summary(&report).into_diagnostic()?,
    }
    Ok(())
}
