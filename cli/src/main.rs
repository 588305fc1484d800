// wave: desktop CLI for the Wave proximity discovery core
//
// Runs local multi-device simulations and manages the persisted settings a
// device would start with.

mod config;
mod simulate;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use wave_core::{SledStorage, StorageBackend, WavePreferences};

#[derive(Parser)]
#[command(name = "wave")]
#[command(about = "Wave: BLE proximity discovery", long_about = None)]
#[command(version)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Write logs to a daily rolling file in this directory
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run simulated devices against a loopback matching service
    Simulate {
        #[arg(short, long)]
        devices: Option<usize>,
        /// Seconds to keep the devices discovering
        #[arg(short = 't', long, default_value = "3")]
        duration: u64,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Turn Wave on for the next launch
    Enable,
    /// Turn Wave off and keep it off across relaunches
    Disable,
    /// Show the persisted service flag and configuration
    Status,
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
}

fn init_logging(verbose: bool, log_dir: Option<PathBuf>) -> Option<WorkerGuard> {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    match log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "wave.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(writer)
                .with_ansi(false)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::Config::load()?;

    let log_dir = cli.log_dir.or_else(|| config.log_dir.clone().map(PathBuf::from));
    // Flushes the file writer on exit
    let _guard = init_logging(cli.verbose, log_dir);

    match cli.command {
        Commands::Simulate { devices, duration } => cmd_simulate(config, devices, duration).await,
        Commands::Config { action } => cmd_config(config, action),
        Commands::Enable => cmd_set_enabled(&config, true),
        Commands::Disable => cmd_set_enabled(&config, false),
        Commands::Status => cmd_status(&config),
    }
}

async fn cmd_simulate(config: config::Config, devices: Option<usize>, duration: u64) -> Result<()> {
    let devices = devices.unwrap_or(config.simulate_devices);

    println!(
        "{} {} devices on {} for {}s",
        "Simulating".bold(),
        devices.to_string().bright_cyan(),
        config.wave.service_id().to_string().dimmed(),
        duration
    );
    println!();

    let report = simulate::run(
        &config.wave,
        simulate::SimulationOptions {
            devices,
            duration: Duration::from_secs(duration),
        },
        false,
    )
    .await?;

    println!();
    println!(
        "{} sessions, {} discoveries, {} matches",
        report.sessions_started,
        report.discoveries,
        report.matches.len().to_string().green()
    );

    Ok(())
}

fn cmd_config(mut config: config::Config, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save()?;
            info!(key = %key, value = %value, "Configuration saved");
            println!("{} Set {} = {}", "✓".green(), key.bright_cyan(), value);
        }

        ConfigAction::Get { key } => {
            if let Some(value) = config.get(&key) {
                println!("{} = {}", key.bright_cyan(), value);
            } else if config.list().iter().any(|(k, _)| *k == key) {
                println!("{} = {}", key.bright_cyan(), "(unset)".dimmed());
            } else {
                anyhow::bail!("Unknown config key: {}", key);
            }
        }

        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            println!();

            for (key, value) in config.list() {
                println!("  {:<24} {}", key.bright_cyan(), value);
            }
        }
    }

    Ok(())
}

fn open_preferences(config: &config::Config) -> Result<WavePreferences> {
    let path = config.storage_path()?;
    let path = path.to_str().context("Storage path is not valid UTF-8")?;
    let storage: Arc<dyn StorageBackend> =
        Arc::new(SledStorage::open(path).context("Failed to open preferences")?);
    Ok(WavePreferences::new(storage))
}

fn cmd_set_enabled(config: &config::Config, enabled: bool) -> Result<()> {
    let preferences = open_preferences(config)?;
    preferences
        .set_service_enabled(enabled)
        .context("Failed to persist service flag")?;
    info!(enabled, "Service flag persisted");

    if enabled {
        println!("{} Wave enabled", "✓".green());
    } else {
        println!("{} Wave disabled", "✓".green());
    }
    Ok(())
}

fn cmd_status(config: &config::Config) -> Result<()> {
    let preferences = open_preferences(config)?;
    let enabled = preferences
        .service_enabled()
        .context("Failed to read service flag")?;

    println!("{}", "Wave Status".bold());
    println!();

    let state = if enabled { "enabled".green() } else { "disabled".red() };
    println!("  {:<24} {}", "service".bright_cyan(), state);
    println!(
        "  {:<24} {}",
        "service_uuid".bright_cyan(),
        config.wave.service_id()
    );
    println!(
        "  {:<24} {}",
        "storage".bright_cyan(),
        config.storage_path()?.display()
    );

    Ok(())
}
