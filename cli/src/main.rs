// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Flotilla CLI
//!
//! The `flotilla` binary runs the fleet controller daemon and provides
//! thin client commands against a running controller's HTTP API.
//!
//! ## Commands
//!
//! - `flotilla serve` - Run the controller daemon
//! - `flotilla agent list|get|remove|ping` - Registry operations
//! - `flotilla exec` - Dispatch a command against an agent
//! - `flotilla config create|effective` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod client;
mod commands;

use commands::{AgentCommand, ConfigCommand};

/// Flotilla - fleet controller for remote runner daemons
#[derive(Parser)]
#[command(name = "flotilla")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to controller configuration file
    #[arg(
        short,
        long,
        global = true,
        env = "FLOTILLA_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Controller API base URL for client commands
    #[arg(
        long,
        global = true,
        env = "FLOTILLA_API_URL",
        default_value = "http://127.0.0.1:8700"
    )]
    api_url: String,

    /// Admin bearer token for client commands
    #[arg(long, global = true, env = "FLOTILLA_ADMIN_TOKEN", default_value = "")]
    token: String,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "FLOTILLA_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the controller daemon
    #[command(name = "serve")]
    Serve,

    /// Agent registry operations
    #[command(name = "agent")]
    Agent {
        #[command(subcommand)]
        command: AgentCommand,
    },

    /// Dispatch a command against an agent
    #[command(name = "exec")]
    Exec(commands::ExecArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level)?;

    let client = client::ControllerClient::new(cli.api_url.clone(), cli.token.clone());
    match cli.command {
        Commands::Serve => commands::serve::run(cli.config.as_deref()).await,
        Commands::Agent { command } => commands::agent::handle_command(command, &client).await,
        Commands::Exec(args) => commands::exec::handle_command(args, &client).await,
        Commands::Config { command } => commands::config::handle_command(command, &client).await,
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
