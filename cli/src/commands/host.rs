// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! Host commands
//!
//! Commands: list, add, remove, test, exec, logs, audit

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::oneshot;

use qiflow_core::application::command_executor::ExecuteOptions;
use qiflow_core::domain::command::CommandType;
use qiflow_core::domain::config::ControlPlaneConfigManifest;
use qiflow_core::domain::host::{HostAuth, HostId, HostStatus, NewHost, OsType};
use qiflow_core::domain::ssh::StreamChunk;
use qiflow_core::infrastructure::dispatcher::LoggingDispatcher;

use crate::commands::shutdown_signal;
use crate::services::FleetServices;

#[derive(Subcommand)]
pub enum HostCommand {
    /// List registered hosts
    List,

    /// Register a host
    Add {
        /// Unique host identifier
        #[arg(long)]
        id: String,

        /// DNS name or address
        #[arg(long)]
        hostname: String,

        #[arg(long, default_value_t = 22)]
        port: u16,

        /// SSH login user
        #[arg(long)]
        user: String,

        /// Operating system (linux, windows)
        #[arg(long, default_value = "linux")]
        os: OsType,

        /// Private key used for authentication
        #[arg(long, value_name = "FILE")]
        key: PathBuf,

        /// Environment variable holding the key passphrase
        #[arg(long, value_name = "VAR")]
        passphrase_env: Option<String>,

        /// Maximum swarms the host may run
        #[arg(long, default_value_t = 5)]
        capacity: u32,
    },

    /// Close the host's session and delete it
    Remove {
        host_id: String,
    },

    /// Open (or reuse) the host's SSH session and report latency
    Test {
        host_id: String,
    },

    /// Run a whitelisted command on the host
    Exec {
        host_id: String,

        /// Command name (see --help for the whitelist)
        #[arg(value_parser = whitelisted_command)]
        command: String,

        /// File whose contents are sent on stdin (update_settings only)
        #[arg(long, value_name = "FILE")]
        input: Option<PathBuf>,

        /// Operator recorded in the audit trail
        #[arg(long = "as", value_name = "OPERATOR")]
        executed_by: Option<String>,
    },

    /// Follow the swarm heartbeat log until interrupted
    Logs {
        host_id: String,
    },

    /// Show recent command audit entries
    Audit {
        host_id: String,

        #[arg(short = 'n', long, default_value_t = 20)]
        limit: usize,
    },
}

pub async fn handle_command(
    command: HostCommand,
    config: ControlPlaneConfigManifest,
) -> Result<()> {
    let services = FleetServices::build(&config, Arc::new(LoggingDispatcher)).await?;
    let result = run(command, &services).await;
    services.shutdown().await;
    result
}

async fn run(command: HostCommand, services: &FleetServices) -> Result<()> {
    match command {
        HostCommand::List => {
            let hosts = services.hosts.list_hosts().await?;
            if hosts.is_empty() {
                println!("{}", "No hosts registered.".dimmed());
            }
            for host in hosts {
                let last_seen = host
                    .last_seen
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_else(|| "never".to_string());
                println!(
                    "{}  {}@{}:{}  {}  {}  last seen {}",
                    host.host_id.as_str().bold(),
                    host.username,
                    host.hostname,
                    host.port,
                    host.os_type.as_str(),
                    colored_status(host.status),
                    last_seen
                );
            }
            Ok(())
        }
        HostCommand::Add {
            id,
            hostname,
            port,
            user,
            os,
            key,
            passphrase_env,
            capacity,
        } => {
            let host = services
                .hosts
                .register_host(NewHost {
                    host_id: HostId::new(id),
                    hostname,
                    port,
                    username: user,
                    os_type: os,
                    auth: HostAuth {
                        private_key_path: Some(key),
                        passphrase_env,
                    },
                    capacity_max_swarms: capacity,
                })
                .await?;
            println!("{}", format!("✓ Registered host {}", host.host_id).green());
            Ok(())
        }
        HostCommand::Remove { host_id } => {
            services.hosts.delete_host(&HostId::new(host_id.clone())).await?;
            println!("{}", format!("✓ Removed host {}", host_id).green());
            Ok(())
        }
        HostCommand::Test { host_id } => {
            let report = services
                .hosts
                .test_connection(&HostId::new(host_id))
                .await?;
            println!(
                "{}",
                format!("✓ Connected to {} in {}ms", report.host_id, report.latency_ms).green()
            );
            Ok(())
        }
        HostCommand::Exec {
            host_id,
            command,
            input,
            executed_by,
        } => {
            let input = match input {
                Some(path) => Some(
                    std::fs::read_to_string(&path)
                        .with_context(|| format!("Failed to read input file {:?}", path))?,
                ),
                None => None,
            };
            let output = services
                .executor
                .execute(&HostId::new(host_id), &command, ExecuteOptions { input, executed_by })
                .await?;

            if !output.stdout.is_empty() {
                print!("{}", output.stdout);
            }
            if !output.stderr.is_empty() {
                eprint!("{}", output.stderr.red());
            }
            if output.success {
                println!(
                    "{}",
                    format!("✓ {} exited 0 ({}ms)", command, output.duration_ms).green()
                );
                Ok(())
            } else {
                anyhow::bail!("{} exited with status {}", command, output.exit_code)
            }
        }
        HostCommand::Logs { host_id } => follow_logs(services, HostId::new(host_id)).await,
        HostCommand::Audit { host_id, limit } => {
            let entries = services
                .hosts
                .audit_logs(&HostId::new(host_id), limit)
                .await?;
            if entries.is_empty() {
                println!("{}", "No audit entries.".dimmed());
            }
            for entry in entries {
                let outcome = match (entry.success, entry.exit_code) {
                    (true, _) => "ok".green(),
                    (false, Some(code)) => format!("exit {}", code).yellow(),
                    (false, None) => "failed".red(),
                };
                println!(
                    "{}  {:<16} {:<10} by {} ({}ms)",
                    entry.timestamp.to_rfc3339(),
                    entry.command,
                    outcome,
                    entry.executed_by,
                    entry.duration_ms
                );
                if let Some(error) = entry.error {
                    println!("    {}", error.dimmed());
                }
            }
            Ok(())
        }
    }
}

async fn follow_logs(services: &FleetServices, host_id: HostId) -> Result<()> {
    let (err_tx, err_rx) = oneshot::channel();
    let handle = services
        .executor
        .stream_logs(
            &host_id,
            |chunk| match chunk {
                StreamChunk::Stdout(text) => print!("{}", text),
                StreamChunk::Stderr(text) => eprint!("{}", text.red()),
                StreamChunk::Closed { .. } => {}
            },
            move |e| {
                let _ = err_tx.send(e);
            },
        )
        .await?;

    println!("{}", format!("Following logs on {} (Ctrl+C to stop)", host_id).dimmed());

    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            handle.cancel();
            Ok(())
        }
        failure = err_rx => match failure {
            Ok(e) => Err(anyhow::Error::new(e).context("Log stream failed")),
            // Sender dropped without an error: the remote side ended the stream.
            Err(_) => Ok(()),
        },
    };
    handle.join().await;
    outcome
}

fn whitelisted_command(name: &str) -> Result<String, String> {
    name.parse::<CommandType>()
        .map(|c| c.as_str().to_string())
        .map_err(|_| {
            let allowed: Vec<_> = CommandType::ALL.iter().map(|c| c.as_str()).collect();
            format!("not a whitelisted command; allowed: {}", allowed.join(", "))
        })
}

fn colored_status(status: HostStatus) -> colored::ColoredString {
    match status {
        HostStatus::Online => status.as_str().green(),
        HostStatus::Offline => status.as_str().dimmed(),
        HostStatus::Error => status.as_str().red(),
    }
}
