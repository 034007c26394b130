// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! `qiflow batch`: one control action fanned out over several swarms.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use std::sync::Arc;

use qiflow_core::domain::batch::{
    BatchOperationResult, BatchRequest, BatchStatus, SwarmResultStatus,
};
use qiflow_core::domain::config::ControlPlaneConfigManifest;
use qiflow_core::domain::control::ControlAction;
use qiflow_core::domain::swarm::SwarmId;
use qiflow_core::infrastructure::dispatcher::LoggingDispatcher;

use crate::commands::collect_params;
use crate::services::FleetServices;

#[derive(Args)]
pub struct BatchArgs {
    /// Control action applied to every swarm
    pub action: ControlAction,

    /// Target swarms
    #[arg(required = true, num_args = 1..)]
    pub swarm_ids: Vec<String>,

    /// Action parameter as key=value; repeatable
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Operator recorded in the audit trail
    #[arg(long = "as", value_name = "OPERATOR")]
    pub executed_by: Option<String>,

    /// Print the full result as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(args: BatchArgs, config: ControlPlaneConfigManifest) -> Result<()> {
    let request = BatchRequest {
        action: args.action,
        swarm_ids: args.swarm_ids.into_iter().map(SwarmId::new).collect(),
        parameters: collect_params(&args.params)?,
        executed_by: args.executed_by,
    };

    let services = FleetServices::build(&config, Arc::new(LoggingDispatcher)).await?;
    let result = services.batches.execute_batch(request).await;
    services.shutdown().await;
    let result = result?;

    if args.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&result).context("Failed to serialize batch result")?
        );
    } else {
        print_summary(&result);
    }

    if result.status == BatchStatus::Failed {
        anyhow::bail!("batch {} failed for every swarm", result.batch_id);
    }
    Ok(())
}

fn print_summary(result: &BatchOperationResult) {
    let status = match result.status {
        BatchStatus::Completed => result.status.as_str().green(),
        BatchStatus::PartialFailure => result.status.as_str().yellow(),
        _ => result.status.as_str().red(),
    };
    println!("{} {} ({})", "Batch".bold(), result.batch_id, status);
    println!(
        "  {}: {} succeeded, {} failed of {}",
        result.action, result.successful, result.failed, result.total_swarms
    );
    for member in &result.results {
        match member.status {
            SwarmResultStatus::Success => println!("  {} {}", "✓".green(), member.swarm_id),
            SwarmResultStatus::Failed => println!(
                "  {} {}: {}",
                "✗".red(),
                member.swarm_id,
                member.error.as_deref().unwrap_or("unknown error")
            ),
        }
    }
}
