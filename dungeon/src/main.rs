//! Dungeon - four-process dungeon crawl
//!
//! CLI entry point for the dungeon and, through the hidden `worker`
//! subcommand, for each of its worker processes.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use eyre::{Context, Result};
use tracing::info;

use dungeon::cli::{Cli, Command};
use dungeon::config::Config;
use dungeon::dungeon::{Dungeon, Launch, clean};
use dungeon::role::Role;
use dungeon::worker::Worker;

/// Resolve the log level: CLI, then config, then INFO
fn resolve_level(cli: Option<&str>, config: Option<&str>) -> tracing::Level {
    match cli.or(config) {
        Some(level) => tracing::Level::from_str(level).unwrap_or_else(|_| {
            eprintln!("Unknown log level {:?}, using INFO", level);
            tracing::Level::INFO
        }),
        None => tracing::Level::INFO,
    }
}

fn setup_logging(process: &str, level: tracing::Level, log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir).context("Failed to create log directory")?;

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let log_path = log_dir.join(format!("{}.log", process));
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!(process, pid = std::process::id(), %level, "Logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let Cli {
        config: config_path,
        log_level,
        command,
    } = Cli::parse();

    // Load configuration
    let config = Config::load(config_path.as_ref()).context("Failed to load configuration")?;
    config.validate().context("Invalid configuration")?;

    let process = match &command {
        Some(Command::Worker { role }) => role.name(),
        _ => "dungeon",
    };
    let level = resolve_level(log_level.as_deref(), config.log_level.as_deref());
    setup_logging(process, level, &config.log_dir()).context("Failed to setup logging")?;

    // Dispatch command
    match command {
        Some(Command::Clean) => cmd_clean(&config),
        Some(Command::Worker { role }) => cmd_worker(role, &config).await,
        None => cmd_run(config, config_path, log_level).await,
    }
}

/// Run the game
async fn cmd_run(config: Config, config_path: Option<PathBuf>, log_level: Option<String>) -> Result<()> {
    let launch = Launch::new(config.workers.executable.clone())?
        .with_config_path(config_path)
        .with_log_level(log_level);

    info!(namespace = %config.ipc.namespace, rounds = config.challenges.rounds, "Starting game");
    println!("Entering the dungeon...");

    let report = Dungeon::new(config, launch).with_progress(true).run().await?;
    println!();
    println!("{}", report.summary());
    Ok(())
}

/// Serve one role until the dungeon closes
async fn cmd_worker(role: Role, config: &Config) -> Result<()> {
    let worker = Worker::attach(role, config).context(format!("{} failed to start", role))?;
    worker.run().await
}

/// Remove stale shared objects
fn cmd_clean(config: &Config) -> Result<()> {
    let removed = clean(config)?;
    println!(
        "Removed {} stale object(s) from namespace {:?}",
        removed, config.ipc.namespace
    );
    Ok(())
}
