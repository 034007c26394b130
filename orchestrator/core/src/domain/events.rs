// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::batch::{BatchId, BatchStatus};
use crate::domain::control::ControlAction;
use crate::domain::host::HostId;
use crate::domain::swarm::{SwarmId, SwarmStatus};

/// Facts about the fleet published on the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    /// Poll or staleness sweep changed a swarm's classification.
    SwarmHealthChanged {
        swarm_id: SwarmId,
        previous: SwarmStatus,
        current: SwarmStatus,
        changed_at: DateTime<Utc>,
    },
    CommandExecuted {
        host_id: HostId,
        command: String,
        success: bool,
        exit_code: Option<i32>,
        duration_ms: u64,
        executed_at: DateTime<Utc>,
    },
    ControlActionQueued {
        swarm_id: SwarmId,
        action: ControlAction,
        command_id: Uuid,
        queued_at: DateTime<Utc>,
    },
    BatchCompleted {
        batch_id: BatchId,
        action: ControlAction,
        status: BatchStatus,
        successful: usize,
        failed: usize,
        completed_at: DateTime<Utc>,
    },
}

impl FleetEvent {
    /// Swarm the event concerns, if any.
    pub fn swarm_id(&self) -> Option<&SwarmId> {
        match self {
            FleetEvent::SwarmHealthChanged { swarm_id, .. } => Some(swarm_id),
            FleetEvent::ControlActionQueued { swarm_id, .. } => Some(swarm_id),
            FleetEvent::CommandExecuted { .. } | FleetEvent::BatchCompleted { .. } => None,
        }
    }
}
