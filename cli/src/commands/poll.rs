// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! `qiflow poll`: one health poll cycle over every registered swarm.

use anyhow::Result;
use colored::Colorize;
use std::sync::Arc;

use qiflow_core::domain::config::ControlPlaneConfigManifest;
use qiflow_core::infrastructure::dispatcher::LoggingDispatcher;

use crate::services::FleetServices;

pub async fn run(config: ControlPlaneConfigManifest) -> Result<()> {
    let services = FleetServices::build(&config, Arc::new(LoggingDispatcher)).await?;
    let report = services.poller.poll_once().await;
    services.shutdown().await;

    println!("{}", "Poll cycle complete".bold());
    println!("  Polled:   {}", report.polled);
    println!("  Online:   {}", report.online.to_string().green());
    println!("  Degraded: {}", report.degraded.to_string().yellow());
    println!("  Offline:  {}", report.offline.to_string().red());
    if report.stale_marked > 0 {
        println!("  Marked offline as stale: {}", report.stale_marked);
    }

    Ok(())
}
