//! buildyard - multi-repository build orchestrator
//!
//! Reads `.build.json`, synchronizes every configured git project under the
//! home directory, runs its build scripts per branch and republishes the
//! output below `«home»/artifacts`.
//!
//! ## Exit codes
//!
//! - `0`: every project succeeded
//! - `1`: the run completed but at least one project failed
//! - `2`: the configuration could not be loaded, or a run-level fault halted the run

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn, Level};

use buildyard_core::plugin::LoadInfo;
use buildyard_core::{
    load_plugins, BuildConfig, ConfigError, GitBackend, LoadedConfig, ProjectScheduler,
    ProjectStatus, RunContext, RunReport, BUILD_TIME, DEFAULT_CONFIG_FILE, VERSION,
};
use buildyard_plugins::builtin_catalog;

const EXIT_FAILED: u8 = 1;
const EXIT_FATAL: u8 = 2;

#[derive(Parser)]
#[command(name = "buildyard")]
#[command(author = "Buildyard Contributors")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Synchronize, build and publish a set of git projects", long_about = None)]
struct Cli {
    /// Configuration file (default: .build.json in the working directory)
    #[arg(short, long, env = "BUILDYARD_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Build projects one after another even if the config enables async
    #[arg(long)]
    sequential: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(EXIT_FATAL)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let working_dir = std::env::current_dir().context("failed to determine working directory")?;
    let config_path = config_path(cli.config.as_deref(), &working_dir);

    // The subscriber can only be installed once, so the level is settled
    // before the config error (if any) is reported.
    let loaded = BuildConfig::load(&config_path);
    let (level, level_error) = resolve_level(cli.verbose, loaded.as_ref().ok());
    buildyard_core::init_tracing(cli.json, level);
    log_banner();

    let LoadedConfig { config, raw, path } =
        loaded.with_context(|| format!("failed to load {}", config_path.display()))?;
    info!("Loaded configuration from {}", path.display());
    if let Some(e) = level_error {
        warn!(error = %e, "Falling back to log level INFO");
    }

    let home = config.resolve_home(&working_dir);
    let async_mode = config.async_mode && !cli.sequential;
    if config.async_mode && cli.sequential {
        info!("Sequential mode forced from the command line");
    }
    let ctx = Arc::new(RunContext::new(home, &working_dir, async_mode));

    let plugins = load_plugins(&builtin_catalog(), &config.plugins, &raw, VERSION);
    info!("Loaded {} plugin(s): {:?}", plugins.len(), plugins.names());
    plugins.post_load(&LoadInfo {
        version: &ctx.version,
        build_time: &ctx.build_time,
    });

    let scheduler = ProjectScheduler::new(ctx, GitBackend::new(), Arc::new(plugins))
        .with_wildcard_policy(config.wildcard.clone());
    let report = scheduler.run(config.projects).await;

    log_summary(&report);
    Ok(ExitCode::from(exit_code(&report)))
}

fn config_path(flag: Option<&Path>, working_dir: &Path) -> PathBuf {
    match flag {
        Some(path) if path.is_absolute() => path.to_path_buf(),
        Some(path) => working_dir.join(path),
        None => working_dir.join(DEFAULT_CONFIG_FILE),
    }
}

fn resolve_level(verbose: bool, loaded: Option<&LoadedConfig>) -> (Level, Option<ConfigError>) {
    if verbose {
        return (Level::DEBUG, None);
    }
    match loaded.map(|l| l.config.log_level()) {
        Some(Ok(level)) => (level, None),
        Some(Err(e)) => (Level::INFO, Some(e)),
        None => (Level::INFO, None),
    }
}

fn log_banner() {
    info!(
        "buildyard {} built {} running on {}/{}",
        VERSION,
        BUILD_TIME,
        std::env::consts::OS,
        std::env::consts::ARCH
    );
}

fn log_summary(report: &RunReport) {
    for outcome in &report.outcomes {
        let branches = outcome.branches.len();
        let ms = outcome.duration.as_millis();
        match &outcome.status {
            ProjectStatus::Succeeded => {
                info!(project = %outcome.project, "OK ({} branches, {} ms)", branches, ms)
            }
            ProjectStatus::Failed(reason) => {
                error!(project = %outcome.project, "FAILED after {} branches: {}", branches, reason)
            }
            ProjectStatus::Halted(reason) => {
                error!(project = %outcome.project, "HALTED the run: {}", reason)
            }
            ProjectStatus::Skipped => warn!(project = %outcome.project, "SKIPPED"),
        }
    }
    info!(
        "{} of {} projects succeeded in {:.1}s",
        report.succeeded_count(),
        report.outcomes.len(),
        report.duration.as_secs_f64()
    );
}

fn exit_code(report: &RunReport) -> u8 {
    if report.halted() {
        EXIT_FATAL
    } else if report.all_succeeded() {
        0
    } else {
        EXIT_FAILED
    }
}
