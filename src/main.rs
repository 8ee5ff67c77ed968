//! # Butterfly-compare CLI
//!
//! Command-line interface for the butterfly-compare library.
//! Runs comparison and benchmark sessions and prints result rows as JSON lines.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use butterfly_compare::{
    CoordinatePair, CoordinateRegistry, Mode, PairFilter, PlausibilityChecker, RunConfig, Scenario, Session,
};
use clap::{Args, Parser, Subcommand};
use log::{error, info, warn, LevelFilter};

mod cli;

/// Exit status when a run timed out or was interrupted but partial rows were printed
const EXIT_INCOMPLETE: i32 = 2;

/// Command-line interface for butterfly-compare
#[derive(Parser)]
#[command(name = "butterfly-compare")]
#[command(about = "Compare and benchmark routing backends on fixed coordinate pairs")]
#[command(long_about = "Queries MOTIS, Google Directions, Valhalla and OpenTripPlanner with the same pairs:
  butterfly-compare compare --config compare.json --region aachen --mode transit
  butterfly-compare bench --config compare.json --scenario local --repetitions 10
  butterfly-compare coords --scenario long_distance

Rows are printed to stdout as JSON lines, logs and progress go to stderr.")]
#[command(version = env!("BUTTERFLY_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Query every backend and line the answers up against the baseline
    Compare(CompareArgs),
    /// Measure latency, CPU time and payload size per backend
    Bench(BenchArgs),
    /// List the coordinate pairs a run would use
    Coords(PairArgs),
}

#[derive(Args)]
struct PairArgs {
    /// Only pairs of this scenario (local, regional, long_distance)
    #[arg(long)]
    scenario: Option<Scenario>,

    /// Only pairs of this region (e.g. aachen)
    #[arg(long)]
    region: Option<String>,

    /// Coordinate table to use instead of the built-in one
    #[arg(long, env = "BUTTERFLY_COMPARE_COORDS")]
    coords: Option<PathBuf>,
}

#[derive(Args)]
struct RunArgs {
    /// Run configuration (backends, baseline, timeouts)
    #[arg(short, long, env = "BUTTERFLY_COMPARE_CONFIG")]
    config: PathBuf,

    /// Restrict the run to these backends (repeatable)
    #[arg(short, long)]
    backend: Vec<String>,

    /// Show what would be queried without sending any request
    #[arg(long)]
    dry_run: bool,

    #[command(flatten)]
    pairs: PairArgs,
}

#[derive(Args)]
struct CompareArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Modes to compare (repeatable); defaults to transit
    #[arg(short, long)]
    mode: Vec<Mode>,

    /// Print one row per trip instead of one row per pair and mode
    #[arg(long)]
    trips: bool,
}

#[derive(Args)]
struct BenchArgs {
    #[command(flatten)]
    run: RunArgs,

    /// Mode to benchmark
    #[arg(short, long, default_value = "transit")]
    mode: Mode,

    /// Repetitions per backend and pair, overriding the configuration
    #[arg(short, long)]
    repetitions: Option<usize>,

    /// Print per-backend summaries instead of raw records
    #[arg(long)]
    summary: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging to stderr
    let mut logger = env_logger::Builder::from_default_env();
    logger.target(env_logger::Target::Stderr);
    if cli.verbose {
        logger.filter_level(LevelFilter::Debug);
    }
    logger.init();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(EXIT_INCOMPLETE),
        Err(e) => {
            error!("❌ Error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Returns whether the run completed
async fn run(cli: Cli) -> anyhow::Result<bool> {
    if cli.verbose {
        eprintln!("🦋 Butterfly-compare v{} starting...", env!("BUTTERFLY_VERSION"));
    }

    match cli.command {
        Command::Compare(args) => compare(args).await,
        Command::Bench(args) => bench(args).await,
        Command::Coords(args) => {
            let pairs = select_pairs(&args)?;
            cli::print_rows(&pairs)?;
            Ok(true)
        }
    }
}

async fn compare(args: CompareArgs) -> anyhow::Result<bool> {
    let config = load_config(&args.run)?;
    let pairs = select_pairs(&args.run.pairs)?;
    let modes = if args.mode.is_empty() {
        vec![Mode::Transit]
    } else {
        args.mode
    };

    let units = pairs.len() * modes.len() * config.backends.len();
    if args.run.dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would send {units} queries: {} pairs x {} modes x backends {:?}",
            pairs.len(),
            modes.len(),
            config.backend_ids().iter().map(|b| b.as_str()).collect::<Vec<_>>()
        );
        return Ok(true);
    }

    let progress = cli::ProgressManager::new(units as u64, "queries");
    let session = Session::from_config(&config)?.with_progress(progress.callback());
    cancel_on_ctrl_c(&session);

    let report = session.compare(&pairs, &modes).await;
    progress.finish("done");

    let checker = PlausibilityChecker::new(config.plausibility.clone());
    let implausible = report
        .verdicts(&checker)
        .iter()
        .filter(|v| !v.is_plausible())
        .count();
    if implausible > 0 {
        warn!("{implausible} of {} trips violate plausibility rules", report.trips.len());
    }
    if !report.disabled.is_empty() {
        warn!("Backends disabled after authentication failures: {:?}", report.disabled);
    }

    if args.trips {
        cli::print_rows(&report.trip_rows())?;
    } else {
        cli::print_rows(&report.comparison_rows())?;
    }
    Ok(report.complete)
}

async fn bench(args: BenchArgs) -> anyhow::Result<bool> {
    let mut config = load_config(&args.run)?;
    if let Some(repetitions) = args.repetitions {
        if repetitions == 0 {
            bail!("--repetitions must be at least 1");
        }
        config.repetitions = repetitions;
    }
    let pairs = select_pairs(&args.run.pairs)?;

    let records = pairs.len() * config.backends.len() * config.repetitions;
    if args.run.dry_run {
        eprintln!(
            "🔍 [DRY RUN] Would measure {records} {} requests ({} repetitions per backend and pair)",
            args.mode,
            config.repetitions
        );
        return Ok(true);
    }

    let progress = cli::ProgressManager::new(records as u64, "requests");
    let session = Session::from_config(&config)?.with_progress(progress.callback());
    cancel_on_ctrl_c(&session);

    let report = session.benchmark(&pairs, args.mode).await;
    progress.finish("done");

    if args.summary {
        cli::print_rows(&report.summaries())?;
    } else {
        cli::print_rows(&report.rows())?;
    }
    Ok(report.complete)
}

fn load_config(args: &RunArgs) -> anyhow::Result<RunConfig> {
    let mut config = RunConfig::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    config.retain_backends(&args.backend)?;
    info!(
        "Backends: {:?}, baseline {:?}",
        config.backend_ids(),
        config.baseline_id()
    );
    Ok(config)
}

fn select_pairs(args: &PairArgs) -> anyhow::Result<Vec<CoordinatePair>> {
    let registry = match &args.coords {
        Some(path) => load_registry(path)?,
        None => CoordinateRegistry::builtin()?,
    };
    let filter = PairFilter {
        scenario: args.scenario,
        region: args.region.clone(),
    };

    let pairs = registry.select(&filter);
    if pairs.is_empty() {
        let regions: Vec<&str> = registry.regions().into_iter().collect();
        bail!(
            "no coordinate pairs match (registry {} has regions {:?})",
            registry.version(),
            regions
        );
    }
    info!("Selected {} of {} pairs", pairs.len(), registry.len());
    Ok(pairs)
}

fn load_registry(path: &Path) -> anyhow::Result<CoordinateRegistry> {
    CoordinateRegistry::from_file(path).with_context(|| format!("loading {}", path.display()))
}

/// Cancel the session on Ctrl-C; rows finished so far are still printed
fn cancel_on_ctrl_c(session: &Session) {
    let token = session.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("⚠️  Interrupted, keeping finished results");
            token.cancel();
        }
    });
}
