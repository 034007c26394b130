// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! Control plane daemon
//!
//! Runs in the foreground until Ctrl+C or SIGTERM:
//! - Health poller on its configured interval
//! - Idle SSH session sweeper
//! - Expired read cache purge
//! - Control command queue drain
//! - Fleet event logging
//!
//! Shutdown stops the poller before closing every pooled session.

use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use qiflow_core::domain::config::ControlPlaneConfigManifest;
use qiflow_core::domain::control::ControlCommand;
use qiflow_core::domain::events::FleetEvent;
use qiflow_core::infrastructure::dispatcher::ChannelDispatcher;
use qiflow_core::infrastructure::event_bus::{EventBusError, EventReceiver};

use crate::commands::shutdown_signal;
use crate::services::FleetServices;

const DISPATCH_QUEUE_CAPACITY: usize = 256;

pub async fn run(config: ControlPlaneConfigManifest) -> Result<()> {
    info!(name = %config.metadata.name, "Starting QiFlow control plane");

    let (dispatcher, queue) = ChannelDispatcher::new(DISPATCH_QUEUE_CAPACITY);
    let services = FleetServices::build(&config, Arc::new(dispatcher)).await?;

    let events = tokio::spawn(log_events(services.event_bus.subscribe()));
    let drain = tokio::spawn(drain_queue(queue));

    services.pool.start_sweeper();
    let purger = services
        .cache
        .start_purger(config.spec.pool.sweep_interval());
    if config.spec.poller.enabled {
        services.poller.start();
    } else {
        info!("Health poller disabled by configuration");
    }

    info!("Control plane running");
    shutdown_signal().await;
    info!("Control plane shutting down");

    services.shutdown().await;
    purger.abort();
    drain.abort();
    events.abort();

    Ok(())
}

async fn drain_queue(mut queue: mpsc::Receiver<ControlCommand>) {
    while let Some(command) = queue.recv().await {
        info!(
            command_id = %command.command_id,
            swarm_id = %command.swarm_id,
            host_url = %command.host_url,
            action = %command.action,
            executed_by = %command.executed_by,
            "Control command ready for delivery"
        );
    }
}

async fn log_events(mut events: EventReceiver) {
    loop {
        match events.recv().await {
            Ok(FleetEvent::SwarmHealthChanged {
                swarm_id,
                previous,
                current,
                ..
            }) => info!(swarm_id = %swarm_id, %previous, %current, "Swarm health changed"),
            Ok(FleetEvent::BatchCompleted {
                batch_id,
                action,
                status,
                successful,
                failed,
                ..
            }) => info!(
                batch_id = %batch_id,
                action = %action,
                status = status.as_str(),
                successful,
                failed,
                "Batch completed"
            ),
            Ok(event) => debug!(?event, "Fleet event"),
            Err(EventBusError::Lagged(n)) => warn!("Event log lagged; {} events dropped", n),
            Err(EventBusError::Closed) => break,
            Err(EventBusError::Empty) => {}
        }
    }
}
