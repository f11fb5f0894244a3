//! medsearch — search medical databases from the command line.
//! Entry point for the agent binary.

mod config;
mod output;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use medsearch_access::{AccessOrchestrator, BatchCoordinator, BatchReport, BatchRequest, JsonFileStore, SourceStatus, SuccessRateTracker};
use medsearch_common::sandbox::SandboxClient;
use medsearch_common::{DateRange, StrategyKind};
use tracing_subscriber::EnvFilter;

/// Search PubMed, drug regulators and commercial drug databases in one go.
#[derive(Parser, Debug)]
#[command(name = "medsearch", version, about)]
struct Args {
    /// Search query, e.g. a drug or condition name
    #[arg(long, short, required_unless_present = "list_databases")]
    query: Option<String>,

    /// Comma-separated source ids; defaults to `search.databases` from the config
    #[arg(long, value_delimiter = ',')]
    databases: Vec<String>,

    /// Maximum results per source
    #[arg(long)]
    max_results: Option<usize>,

    /// Earliest publication date (YYYY-MM-DD)
    #[arg(long)]
    min_date: Option<String>,

    /// Latest publication date (YYYY-MM-DD)
    #[arg(long)]
    max_date: Option<String>,

    /// Query sources concurrently
    #[arg(long)]
    parallel: bool,

    /// Concurrent sources when --parallel is set
    #[arg(long)]
    max_workers: Option<usize>,

    /// Output file; defaults to results_<timestamp>.json in `search.output_dir`
    #[arg(long, short)]
    output: Option<PathBuf>,

    /// List the known databases and exit
    #[arg(long)]
    list_databases: bool,

    /// Also query the commercial databases (DrugBank, RxNav, ChEMBL)
    #[arg(long)]
    include_commercial: bool,

    /// Never send CAPTCHAs to the solving service
    #[arg(long)]
    no_captcha_solver: bool,

    /// Only use official APIs; skip every browser-driven strategy
    #[arg(long)]
    no_browser_automation: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("medsearch=debug,info")),
        )
        .init();

    let args = Args::parse();
    let config = config::Config::load()?;

    let client = SandboxClient::new(config.search.http_timeout())?;
    let mut registry = medsearch_sources::default_registry(client.clone(), config.api_keys());
    if args.no_browser_automation {
        registry.retain_kinds(|kind| kind == StrategyKind::Api);
    }

    let tracker = SuccessRateTracker::spawn(Arc::new(JsonFileStore::new(config.tracker.stats_path.clone())));
    let mut orchestrator = AccessOrchestrator::new(registry, config.catalog(), tracker)
        .with_retry_policy(config.retry.policy());
    if !args.no_captcha_solver {
        if let Some(solver) = config.captcha.solver(client) {
            orchestrator = orchestrator.with_captcha_solver(solver);
        }
    }

    if args.list_databases {
        print_databases(&orchestrator);
        return Ok(());
    }

    let Some(query) = args.query.as_deref() else {
        anyhow::bail!("--query is required");
    };
    let source_ids = if args.databases.is_empty() {
        config.search.selected_databases(args.include_commercial)
    } else {
        args.databases.clone()
    };
    for id in &source_ids {
        if !orchestrator.registry().contains(id) {
            tracing::warn!(source_id = %id, "No access strategy available; source will return nothing");
        }
    }

    let date_range = DateRange::parse(args.min_date.as_deref(), args.max_date.as_deref())?;
    let mut request = BatchRequest::new(query, source_ids)
        .with_max_results(args.max_results.unwrap_or(config.search.max_results))
        .with_date_range(date_range);
    if args.parallel || config.search.parallel {
        request = request.parallel(args.max_workers.unwrap_or(config.search.max_workers));
    }

    let coordinator = BatchCoordinator::new(Arc::new(orchestrator));
    let report = coordinator.run(&request).await?;

    let path = args.output.unwrap_or_else(|| output::default_path(&config.search.output_dir));
    output::write_results(&path, &report.records)?;
    print_summary(&report, &path);
    Ok(())
}

fn print_databases(orchestrator: &AccessOrchestrator) {
    println!("Available databases:");
    for id in orchestrator.list_databases() {
        let source = orchestrator.catalog().get_database_config(&id);
        let methods: Vec<_> = orchestrator
            .registry()
            .strategies(&id)
            .iter()
            .map(|s| s.kind.as_str())
            .collect();
        let methods = if methods.is_empty() { "none".to_string() } else { methods.join(", ") };
        println!("  {id:<18} {:<40} [{methods}]", source.name);
    }
}

fn print_summary(report: &BatchReport, path: &std::path::Path) {
    println!("Batch {} finished in {} ms", report.batch_id, report.duration_ms);
    for source in &report.sources {
        match &source.status {
            SourceStatus::Completed { records } => {
                println!("  {:<18} {records:>4} results ({} ms)", source.source_id, source.duration_ms)
            }
            SourceStatus::Panicked { message } => {
                println!("  {:<18} failed: {message}", source.source_id)
            }
        }
    }
    println!("{} results saved to {}", report.records.len(), path.display());
}
