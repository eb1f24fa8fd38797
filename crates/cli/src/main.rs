//! cvsgitsync batch runner.
//!
//! Runs import (CVS -> Git) and export (Git -> CVS) cycles over the
//! configured repositories, prints a summary, and delivers any queued
//! notifications. Intended to be invoked from cron.

mod report;
mod style;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

use cvsgitsync_core::config::AppConfig;
use cvsgitsync_core::git::GitIdentity;
use cvsgitsync_core::models::{BatchReport, Direction, Repository};
use cvsgitsync_core::{BranchMap, FailureIsolation, NativeBackends, Notifier, SyncEngine};

// ---------------------------------------------------------------------------
// CLI argument definitions
// ---------------------------------------------------------------------------

/// Bidirectional CVS/Git branch synchronization.
#[derive(Parser, Debug)]
#[command(
    name = "cvsgitsync",
    version,
    about = "Synchronize CVS branches and Git branches in both directions"
)]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(
        short,
        long,
        global = true,
        default_value = "/etc/cvsgitsync/config.toml"
    )]
    config: PathBuf,

    /// Override the configured log level (trace, debug, info, warn, error).
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Import CVS branches into their mapped Git branches.
    Import(Selection),

    /// Export Git branches into their mapped CVS branches.
    Export(Selection),

    /// Import, then export.
    Sync {
        /// Limit the run to these repositories.
        #[arg(short, long)]
        repo: Vec<String>,
    },

    /// Validate the configuration file and every branch map.
    Validate,

    /// Show the resolved branch maps.
    Branches {
        /// Limit the output to these repositories.
        #[arg(short, long)]
        repo: Vec<String>,
    },
}

#[derive(clap::Args, Debug)]
struct Selection {
    /// Limit the run to these repositories.
    #[arg(short, long)]
    repo: Vec<String>,

    /// Limit the run to these source-side branches (CVS branches on
    /// import, Git branches on export).
    #[arg(short, long, requires = "repo")]
    branch: Vec<String>,
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("{}", style::error(&format!("{:#}", e)));
            ExitCode::FAILURE
        }
    }
}

/// Returns `Ok(false)` when the command ran but something failed.
async fn run(cli: Cli) -> Result<bool> {
    let config = AppConfig::load_from_file(&cli.config).context("failed to load configuration")?;

    // Validation reports on stdout only; everything else logs.
    let _log_guard = match cli.command {
        Commands::Validate => None,
        _ => init_logging(&config, cli.log_level.as_deref())?,
    };

    match cli.command {
        Commands::Validate => cmd_validate(&cli.config, &config),
        Commands::Import(selection) => {
            let repos = select_repositories(&config, &selection.repo)?;
            let batch =
                run_batch(config.clone(), repos, Direction::Import, selection.branch).await?;
            finish(&config, batch).await
        }
        Commands::Export(selection) => {
            let repos = select_repositories(&config, &selection.repo)?;
            let batch =
                run_batch(config.clone(), repos, Direction::Export, selection.branch).await?;
            finish(&config, batch).await
        }
        Commands::Sync { repo } => {
            let repos = select_repositories(&config, &repo)?;
            let mut batch =
                run_batch(config.clone(), repos.clone(), Direction::Import, Vec::new()).await?;
            if !batch.aborted {
                let exported =
                    run_batch(config.clone(), repos, Direction::Export, Vec::new()).await?;
                batch.merge(exported);
            }
            finish(&config, batch).await
        }
        Commands::Branches { repo } => cmd_branches(&config, &repo),
    }
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Stderr always; a daily-rotated file too when `log_dir` is configured.
fn init_logging(config: &AppConfig, override_level: Option<&str>) -> Result<Option<WorkerGuard>> {
    let level = override_level.unwrap_or(&config.global.log_level);
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.global.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "cvsgitsync.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_ansi(false).with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .with(file_layer)
        .init();

    Ok(guard)
}

// ---------------------------------------------------------------------------
// Batch runs
// ---------------------------------------------------------------------------

fn select_repositories(config: &AppConfig, names: &[String]) -> Result<Vec<Repository>> {
    if names.is_empty() {
        return Ok(config.repositories());
    }
    names
        .iter()
        .map(|name| config.repository(name).map_err(anyhow::Error::from))
        .collect()
}

/// Run one direction over `repos` on a blocking thread.
async fn run_batch(
    config: AppConfig,
    repos: Vec<Repository>,
    direction: Direction,
    only: Vec<String>,
) -> Result<BatchReport> {
    let disposition = match direction {
        Direction::Import => config.import.on_error,
        Direction::Export => config.export.on_error,
    };
    info!(%direction, repositories = repos.len(), %disposition, "starting batch");

    let batch = tokio::task::spawn_blocking(move || {
        let identity = GitIdentity::new(
            config.global.commit_name.clone(),
            config.global.commit_email.clone(),
        );
        let engine = SyncEngine::new(
            NativeBackends::new(identity),
            config.global.base_branch.clone(),
        );
        FailureIsolation::new(direction, disposition)
            .run(&repos, |repo| engine.sync_repository(repo, direction, &only))
    })
    .await
    .context("batch worker stopped unexpectedly")?;

    Ok(batch)
}

/// Print the summary and deliver queued notifications.
async fn finish(config: &AppConfig, batch: BatchReport) -> Result<bool> {
    report::print_batch(&batch);

    let notifications = batch.all_notifications();
    if !notifications.is_empty() {
        let notifier = Notifier::new(&config.notifications);
        let failed = notifier.deliver_all(&notifications).await;
        if failed > 0 {
            println!(
                "{}",
                style::warn(&format!(
                    "{} of {} notification(s) could not be delivered",
                    failed,
                    notifications.len()
                ))
            );
        }
    }

    Ok(batch.is_success())
}

// ---------------------------------------------------------------------------
// Inspection
// ---------------------------------------------------------------------------

fn cmd_validate(path: &Path, config: &AppConfig) -> Result<bool> {
    println!("Validating configuration: {}", path.display());
    println!();
    println!("  {}", style::success("TOML structure and required fields are valid"));

    let mut ok = true;
    for repo in config.repositories() {
        match BranchMap::resolve(&repo) {
            Ok(map) => println!(
                "  {}",
                style::success(&format!(
                    "{}: {} import, {} export, {} merge edge(s)",
                    repo.name,
                    map.import_pairs().len(),
                    map.export_pairs().len(),
                    map.edges().count()
                ))
            ),
            Err(e) => {
                println!("  {}", style::error(&format!("{}: {}", repo.name, e)));
                ok = false;
            }
        }
    }

    println!();
    println!("Configuration summary:");
    println!("  Git work dir  : {}", config.global.git_dir.display());
    println!("  CVS work dir  : {}", config.global.cvs_dir.display());
    println!("  Export dir    : {}", config.global.export_dir.display());
    println!("  Base branch   : {}", config.global.base_branch);
    println!("  On import err : {}", config.import.on_error);
    println!("  On export err : {}", config.export.on_error);
    println!("  Repositories  : {}", config.repositories.len());
    println!();
    if ok {
        println!("{}", style::success("Configuration is valid."));
    } else {
        println!("{}", style::error("Configuration has invalid branch maps."));
    }

    Ok(ok)
}

fn cmd_branches(config: &AppConfig, names: &[String]) -> Result<bool> {
    for repo in select_repositories(config, names)? {
        let map = BranchMap::resolve(&repo)
            .with_context(|| format!("invalid branch map for repository '{}'", repo.name))?;
        report::print_branch_map(&map);
    }
    Ok(true)
}
