// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! # QiFlow Control Plane CLI
//!
//! The `qiflow` binary operates a fleet of agent swarms: it runs the control
//! plane daemon and exposes one-shot operator commands against the same
//! services.
//!
//! ## Commands
//!
//! - `qiflow daemon` - Run the health poller and idle sweeper until signalled
//! - `qiflow host list|add|remove|test|exec|logs|audit` - Host operations over SSH
//! - `qiflow poll` - Run a single health poll cycle
//! - `qiflow control` - Issue one control action to one swarm
//! - `qiflow batch` - Issue one control action to many swarms
//! - `qiflow config show|validate|generate` - Configuration management
//! - `qiflow update` - Apply database migrations

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use qiflow_control::commands::{self, BatchArgs, ConfigCommand, ControlArgs, HostCommand};
use qiflow_core::domain::config::ControlPlaneConfigManifest;

/// QiFlow control plane - operate a fleet of agent swarms
#[derive(Parser)]
#[command(name = "qiflow")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "QIFLOW_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); defaults to the configured level
    #[arg(long, global = true, env = "QIFLOW_LOG_LEVEL")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the control plane daemon in the foreground
    #[command(name = "daemon")]
    Daemon,

    /// Host operations
    #[command(name = "host")]
    Host {
        #[command(subcommand)]
        command: HostCommand,
    },

    /// Run one health poll cycle and print the summary
    #[command(name = "poll")]
    Poll,

    /// Issue a control action to a single swarm
    #[command(name = "control")]
    Control(ControlArgs),

    /// Issue a control action to several swarms at once
    #[command(name = "batch")]
    Batch(BatchArgs),

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },

    /// Update the QiFlow database schema
    #[command(name = "update")]
    Update {
        #[command(flatten)]
        command: commands::UpdateCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let mut cli = Cli::parse();

    let Some(command) = cli.command.take() else {
        eprintln!("{}", "No command specified. Use --help for usage.".yellow());
        std::process::exit(1);
    };

    match command {
        // Config commands must work even when the file on disk is broken.
        Commands::Config { command } => {
            init_logging(cli.log_level.as_deref().unwrap_or("info"), "text")?;
            commands::config::handle_command(command, cli.config).await
        }
        Commands::Daemon => commands::daemon::run(load_config(&cli)?).await,
        Commands::Host { command } => {
            commands::host::handle_command(command, load_config(&cli)?).await
        }
        Commands::Poll => commands::poll::run(load_config(&cli)?).await,
        Commands::Control(args) => commands::control::run(args, load_config(&cli)?).await,
        Commands::Batch(args) => commands::batch::run(args, load_config(&cli)?).await,
        Commands::Update { command } => {
            commands::update::execute(command, &load_config(&cli)?).await
        }
    }
}

/// Load and validate the configuration, then start logging at the
/// configured level unless `--log-level` overrides it.
fn load_config(cli: &Cli) -> Result<ControlPlaneConfigManifest> {
    let config = ControlPlaneConfigManifest::load_or_default(cli.config.clone())
        .context("Failed to load configuration")?;
    let logging = config.logging();
    init_logging(
        cli.log_level.as_deref().unwrap_or(&logging.level),
        &logging.format,
    )?;
    config
        .validate()
        .context("Configuration validation failed")?;
    Ok(config)
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
