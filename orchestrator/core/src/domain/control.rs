// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Control Actions
//!
//! Named actions an operator can request against a swarm, the precondition
//! table deciding which of them may target an offline swarm, and the fixed
//! schedule preset catalogue.
//!
//! Control actions only record intent. The resulting [`ControlCommand`] is
//! handed to a [`crate::domain::dispatch::ControlDispatcher`] for delivery.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Control action vocabulary and schedule presets

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::swarm::SwarmId;

/// Free-form action parameters (`agent_id`, `preset`, `task`, ...).
pub type ControlParameters = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlAction {
    Pause,
    Resume,
    RestartAgent,
    ForceSync,
    EmergencyStop,
    ManualTrigger,
    ApplySchedulePreset,
}

impl ControlAction {
    pub const ALL: [ControlAction; 7] = [
        ControlAction::Pause,
        ControlAction::Resume,
        ControlAction::RestartAgent,
        ControlAction::ForceSync,
        ControlAction::EmergencyStop,
        ControlAction::ManualTrigger,
        ControlAction::ApplySchedulePreset,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ControlAction::Pause => "pause",
            ControlAction::Resume => "resume",
            ControlAction::RestartAgent => "restart_agent",
            ControlAction::ForceSync => "force_sync",
            ControlAction::EmergencyStop => "emergency_stop",
            ControlAction::ManualTrigger => "manual_trigger",
            ControlAction::ApplySchedulePreset => "apply_schedule_preset",
        }
    }

    /// Actions that may target a swarm whose last known status is offline.
    pub fn allowed_when_offline(&self) -> bool {
        matches!(
            self,
            ControlAction::Resume
                | ControlAction::EmergencyStop
                | ControlAction::ApplySchedulePreset
        )
    }

    /// Cache path suffixes invalidated in addition to `swarm:{id}` and
    /// `swarm:{id}:status`.
    pub fn extra_cache_suffixes(&self) -> &'static [&'static str] {
        match self {
            ControlAction::RestartAgent => &["agents"],
            ControlAction::ApplySchedulePreset => &["schedule"],
            _ => &[],
        }
    }
}

impl fmt::Display for ControlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ControlAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ControlAction::ALL
            .iter()
            .copied()
            .find(|a| a.as_str() == s)
            .ok_or_else(|| s.to_string())
    }
}

// ============================================================================
// Schedule presets
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulePreset {
    pub name: &'static str,
    pub cron: &'static str,
    pub timezone: &'static str,
    pub description: &'static str,
}

pub static SCHEDULE_PRESETS: [SchedulePreset; 5] = [
    SchedulePreset {
        name: "continuous",
        cron: "*/15 * * * *",
        timezone: "UTC",
        description: "Run every 15 minutes around the clock",
    },
    SchedulePreset {
        name: "business_hours",
        cron: "0 9-17 * * 1-5",
        timezone: "America/New_York",
        description: "Hourly during weekday business hours",
    },
    SchedulePreset {
        name: "nightly",
        cron: "0 2 * * *",
        timezone: "UTC",
        description: "Once per night at 02:00",
    },
    SchedulePreset {
        name: "weekends_only",
        cron: "0 */2 * * 0,6",
        timezone: "UTC",
        description: "Every two hours on Saturday and Sunday",
    },
    SchedulePreset {
        name: "off_hours",
        cron: "0 0-8,18-23 * * *",
        timezone: "UTC",
        description: "Hourly outside 09:00-17:00",
    },
];

pub fn find_preset(name: &str) -> Option<&'static SchedulePreset> {
    SCHEDULE_PRESETS.iter().find(|p| p.name == name)
}

// ============================================================================
// Results
// ============================================================================

/// Answer of the precondition check run before every action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self { valid: true, error: None }
    }

    pub fn rejected(error: impl Into<String>) -> Self {
        Self {
            valid: false,
            error: Some(error.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ControlStatus {
    Queued,
}

/// Returned by every accepted control action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlOutcome {
    pub command_id: Uuid,
    pub swarm_id: SwarmId,
    pub action: ControlAction,
    pub status: ControlStatus,
    pub message: String,
    pub queued_at: DateTime<Utc>,
}

/// Unit of work handed to a dispatcher for delivery to the swarm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlCommand {
    pub command_id: Uuid,
    pub swarm_id: SwarmId,
    pub host_url: String,
    pub action: ControlAction,
    pub parameters: ControlParameters,
    pub executed_by: String,
    pub issued_at: DateTime<Utc>,
}
