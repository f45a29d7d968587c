//! famsync CLI
//!
//! Command-line host for the famsync client: watch a user's change feed,
//! send notifications and manage configuration.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use famsync_core::Config;

mod commands;
mod logging;
mod output;

use output::{Output, OutputFormat};

#[derive(Parser)]
#[command(name = "famsync")]
#[command(about = "famsync - cross-device change notifications")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Use this config file instead of the default
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Subscribe and print every event until Ctrl-C
    Watch {
        /// User to watch (defaults to the configured user_id)
        #[arg(short, long)]
        user: Option<String>,
    },
    /// Broadcast one event to the user's other devices
    Send {
        /// Event kind: people, shots, medicine, prn, sharing or raw_change
        kind: String,
        /// Table name, required for raw_change
        #[arg(short, long)]
        table: Option<String>,
        /// User to send as (defaults to the configured user_id)
        #[arg(short, long)]
        user: Option<String>,
        /// Seconds to wait for the channel and for peers
        #[arg(short, long, default_value_t = 10)]
        wait: u64,
    },
    /// Show endpoint, user and retry schedule
    Status,
    /// Show or set configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
enum ConfigCommands {
    /// Show current configuration
    Show,
    /// Set a configuration value
    Set {
        /// Configuration key (realtime_url, api_key, user_id, ...)
        key: String,
        /// Configuration value
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let output = Output::new(OutputFormat::from_flags(cli.json, cli.quiet));
    let config_path = cli.config.as_ref();

    // Config commands must work even when the file doesn't parse
    if let Commands::Config { command } = &cli.command {
        return handle_config_command(command.clone(), config_path, &output);
    }

    let config =
        Config::load_with_cli_override(config_path).context("Failed to load configuration")?;
    logging::init(&config);

    match cli.command {
        Commands::Watch { user } => commands::watch::run(&config, user, &output).await,
        Commands::Send {
            kind,
            table,
            user,
            wait,
        } => commands::send::run(&config, &kind, table, user, wait, &output).await,
        Commands::Status => commands::status::show(&config, config_path, &output),
        Commands::Config { .. } => unreachable!(), // Handled above
    }
}

fn handle_config_command(
    command: Option<ConfigCommands>,
    config_path: Option<&PathBuf>,
    output: &Output,
) -> Result<()> {
    match command {
        Some(ConfigCommands::Show) | None => commands::config::show(config_path, output),
        Some(ConfigCommands::Set { key, value }) => {
            commands::config::set(key, value, config_path, output)
        }
    }
}
