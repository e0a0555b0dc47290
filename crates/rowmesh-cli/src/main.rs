use std::path::PathBuf;

use clap::{Parser, Subcommand};
use rowmesh_core::RowmeshConfig;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod commands;
mod config;
mod output;

use commands::{config::ConfigArgs, coordinator::CoordinatorArgs, worker::WorkerArgs};
use config::RowmeshConfigLoader;

#[derive(Debug, Parser)]
#[command(name = "rowmesh", version, about, long_about = None)]
struct Cli {
    /// Path to config file (default: rowmesh.toml or ~/.config/rowmesh/config.toml).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Set log level or filter directives.
    #[arg(long, global = true, env = "ROWMESH_LOG")]
    log_level: Option<String>,

    /// Log output format: pretty, compact or json.
    #[arg(long, global = true, env = "ROWMESH_LOG_FORMAT")]
    log_format: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Start the coordinator, optionally running one job.
    #[command(name = "coordinator")]
    Coordinator(CoordinatorArgs),

    /// Start a worker node.
    #[command(name = "worker")]
    Worker(WorkerArgs),

    /// Configuration management (generate, show, validate).
    #[command(name = "config")]
    Config(ConfigArgs),
}

fn setup_logging(log_level: &str, log_format: &str) {
    use std::io::IsTerminal;

    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    let is_terminal = std::io::stdout().is_terminal();
    let registry = tracing_subscriber::registry();

    match log_format {
        "json" => registry
            .with(fmt::layer().json().with_target(true))
            .with(env_filter)
            .init(),
        "compact" => registry
            .with(fmt::layer().compact().with_ansi(is_terminal))
            .with(env_filter)
            .init(),
        _ => registry
            .with(fmt::layer().with_ansi(is_terminal).with_target(true))
            .with(env_filter)
            .init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Commands::Config(args) = &cli.command {
        return commands::run_config(args, cli.config.as_deref());
    }

    let rowmesh_config = RowmeshConfig::load(cli.config.as_deref())?;

    let log_level = cli
        .log_level
        .as_deref()
        .unwrap_or(&rowmesh_config.logging.level);
    let log_format = cli
        .log_format
        .as_deref()
        .unwrap_or(&rowmesh_config.logging.format);
    setup_logging(log_level, log_format);

    match cli.command {
        Commands::Coordinator(args) => commands::run_coordinator(args, &rowmesh_config).await,
        Commands::Worker(args) => commands::run_worker(args, &rowmesh_config).await,
        Commands::Config(args) => commands::run_config(&args, cli.config.as_deref()),
    }
}
