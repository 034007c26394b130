// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! `qiflow control`: one control action against one swarm.

use anyhow::{bail, Result};
use clap::Args;
use colored::Colorize;
use std::sync::Arc;

use qiflow_core::application::command_executor::DEFAULT_EXECUTED_BY;
use qiflow_core::domain::config::ControlPlaneConfigManifest;
use qiflow_core::domain::control::{ControlAction, ControlParameters, SCHEDULE_PRESETS};
use qiflow_core::domain::swarm::SwarmId;
use qiflow_core::infrastructure::dispatcher::LoggingDispatcher;

use crate::commands::collect_params;
use crate::services::FleetServices;

#[derive(Args)]
pub struct ControlArgs {
    /// Target swarm
    pub swarm_id: String,

    /// pause, resume, restart_agent, force_sync, emergency_stop,
    /// manual_trigger or apply_schedule_preset
    pub action: ControlAction,

    /// Action parameter as key=value (agent_id, task, preset); repeatable
    #[arg(short, long = "param", value_name = "KEY=VALUE")]
    pub params: Vec<String>,

    /// Only check preconditions; nothing is queued
    #[arg(long)]
    pub dry_run: bool,

    /// Operator recorded in the audit trail
    #[arg(long = "as", value_name = "OPERATOR")]
    pub executed_by: Option<String>,
}

pub async fn run(args: ControlArgs, config: ControlPlaneConfigManifest) -> Result<()> {
    let parameters = collect_params(&args.params)?;
    let swarm_id = SwarmId::new(args.swarm_id.clone());
    let services = FleetServices::build(&config, Arc::new(LoggingDispatcher)).await?;
    let result = issue(&services, &args, &swarm_id, &parameters).await;
    services.shutdown().await;

    if result.is_err() && args.action == ControlAction::ApplySchedulePreset {
        let presets: Vec<_> = SCHEDULE_PRESETS.iter().map(|p| p.name).collect();
        eprintln!("{}", format!("Available presets: {}", presets.join(", ")).dimmed());
    }
    result
}

async fn issue(
    services: &FleetServices,
    args: &ControlArgs,
    swarm_id: &SwarmId,
    parameters: &ControlParameters,
) -> Result<()> {
    if args.dry_run {
        let validation = services.control.validate(swarm_id, args.action).await?;
        if let Some(reason) = validation.error {
            bail!("{} would be rejected for {}: {}", args.action, swarm_id, reason);
        }
        println!("{}", format!("✓ {} may run on {}", args.action, swarm_id).green());
        return Ok(());
    }

    let outcome = services
        .control
        .execute(
            swarm_id,
            args.action,
            parameters,
            args.executed_by.as_deref().unwrap_or(DEFAULT_EXECUTED_BY),
        )
        .await?;
    println!("{}", format!("✓ {}", outcome.message).green());
    println!("  Command: {}", outcome.command_id);
    println!("  Queued at: {}", outcome.queued_at.to_rfc3339());
    Ok(())
}
