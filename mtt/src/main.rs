//! Migration tool system test driver.
//!
//! `mtt run <suite>` executes every test case of a suite against real hosts
//! (or the in-process mock with `--mock`); `mtt list <suite>` prints what
//! would run.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mtt_common::cluster::suite_cluster_config_path;
use mtt_common::testcase::{RUN_LIST_FILE, SKIP_LIST_FILE, discover_testcase_dirs};
use mtt_common::{
    ClusterConfig, HarnessSettings, MockEnvironment, Orchestrator, RunReport, SshEnvironment,
    TestCase, TestEnvironment, TestSelection, Timings,
};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "mtt")]
#[command(author, version, about = "Migration tool system test driver")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the test cases of a suite
    Run(RunArgs),
    /// List the test cases of a suite with their descriptions
    List {
        /// Suite directory containing testcase_* directories
        suite_dir: PathBuf,
    },
}

#[derive(clap::Args)]
struct RunArgs {
    /// Suite directory containing testcase_* directories
    suite_dir: PathBuf,

    /// Cluster configuration (default: <suite>/cluster_config.json)
    #[arg(long)]
    cluster_config: Option<PathBuf>,

    /// Print each test case's description without running it
    #[arg(long)]
    describe_only: bool,

    /// Skip list (default: <suite>/testcase_to_skip.json)
    #[arg(long)]
    skip_list: Option<PathBuf>,

    /// Run list (default: <suite>/testcase_to_run.json)
    #[arg(long)]
    run_list: Option<PathBuf>,

    /// Use the in-process mock environment with zero pauses
    #[arg(long, env = "MTT_MOCK_SSH")]
    mock: bool,

    /// Write the run report as JSON to this path
    #[arg(long)]
    report: Option<PathBuf>,

    /// Settings file (TOML)
    #[arg(long)]
    settings: Option<PathBuf>,
}

fn init_logging(verbose: bool, json: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    tracing_subscriber::registry()
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer()))
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    match cli.command {
        Commands::List { suite_dir } => {
            list(&suite_dir)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Run(args) => run(args).await,
    }
}

fn list(suite_dir: &Path) -> Result<()> {
    let dirs = discover_testcase_dirs(suite_dir)
        .with_context(|| format!("Failed to list test cases in {}", suite_dir.display()))?;
    for dir in dirs {
        let case = TestCase::from_dir(dir);
        match case.load_definition() {
            Ok(definition) => print!(
                "{}",
                mtt_common::testcase::format_description(&case.name, &definition)
            ),
            Err(e) => println!("Test case: {} (unreadable: {e})", case.name),
        }
    }
    Ok(())
}

fn list_path(explicit: Option<PathBuf>, suite_dir: &Path, default_name: &str) -> PathBuf {
    explicit.unwrap_or_else(|| suite_dir.join(default_name))
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let mut settings = HarnessSettings::resolve(args.settings.as_deref())
        .context("Failed to load harness settings")?;
    settings.mock |= args.mock;

    let cluster_path = suite_cluster_config_path(&args.suite_dir, args.cluster_config.as_deref());
    let cluster = ClusterConfig::load(&cluster_path)
        .with_context(|| format!("Failed to load {}", cluster_path.display()))?;
    info!(
        "Loaded cluster configuration from {} ({} entities)",
        cluster_path.display(),
        cluster.entities.len()
    );

    let skip_path = list_path(args.skip_list.clone(), &args.suite_dir, SKIP_LIST_FILE);
    let run_path = list_path(args.run_list.clone(), &args.suite_dir, RUN_LIST_FILE);
    let selection = TestSelection::load(&settings.suite_name, Some(&skip_path), Some(&run_path))
        .context("Failed to load skip/run lists")?;

    let case_dirs = discover_testcase_dirs(&args.suite_dir)?;
    info!("Discovered {} test cases", case_dirs.len());

    let report = if settings.mock {
        warn!("Running against the mock environment; no remote host is touched");
        settings.timings = Timings::instant();
        let mock = MockEnvironment::new();
        mock.set_producer_round(Duration::from_millis(100));
        execute(
            Arc::new(mock),
            settings,
            &args,
            cluster,
            selection,
            &case_dirs,
        )
        .await
    } else {
        let env = Arc::new(SshEnvironment::new(settings.remote.clone()));
        execute(env, settings, &args, cluster, selection, &case_dirs).await
    };

    let mut stdout = std::io::stdout();
    report.print_summary(&mut stdout)?;
    if let Some(path) = &args.report {
        report
            .write_json(path)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
        info!("Wrote run report to {}", path.display());
    }

    Ok(if report.all_passed() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

async fn execute<E: TestEnvironment>(
    env: Arc<E>,
    settings: HarnessSettings,
    args: &RunArgs,
    cluster: ClusterConfig,
    selection: TestSelection,
    case_dirs: &[PathBuf],
) -> RunReport {
    Orchestrator::new(env, settings, args.suite_dir.clone(), cluster)
        .with_selection(selection)
        .describe_only(args.describe_only)
        .run(case_dirs)
        .await
}
