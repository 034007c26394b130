// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Aggregate
//!
//! A [`Swarm`] is a remote group of autonomous agents exposing a small status
//! HTTP API at `host_url`. One swarm maps to one externally reachable URL; it is
//! not required to live on a registered [`crate::domain::host::Host`].
//!
//! This module also owns the health classification rules applied by the
//! poller:
//!
//! | Payload | Classification |
//! |---------|----------------|
//! | `status == "offline"` | `offline` (metrics ignored) |
//! | `cpu > 90` or `memory > 90` | `degraded` |
//! | otherwise | `online` |
//! | fetch failed (timeout, network, non-2xx) | `offline` |

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// CPU or memory utilisation above this percentage marks a swarm degraded.
pub const DEGRADED_THRESHOLD_PERCENT: f64 = 90.0;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SwarmId(pub String);

impl SwarmId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SwarmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SwarmId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwarmStatus {
    Online,
    Degraded,
    Offline,
}

impl SwarmStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SwarmStatus::Online => "online",
            SwarmStatus::Degraded => "degraded",
            SwarmStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for SwarmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SwarmStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(SwarmStatus::Online),
            "degraded" => Ok(SwarmStatus::Degraded),
            "offline" => Ok(SwarmStatus::Offline),
            other => Err(format!("unknown swarm status '{}'", other)),
        }
    }
}

/// Resource utilisation percentages reported by a swarm.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HealthMetrics {
    pub cpu: f64,
    pub memory: f64,
    pub disk: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Swarm {
    pub swarm_id: SwarmId,
    pub name: String,
    pub host_url: String,
    pub status: SwarmStatus,
    pub health_status: HealthMetrics,
    pub active_agents: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_completion: Option<f64>,
    pub last_seen: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Swarm {
    pub fn new(swarm_id: SwarmId, name: impl Into<String>, host_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            swarm_id,
            name: name.into(),
            host_url: host_url.into(),
            status: SwarmStatus::Offline,
            health_status: HealthMetrics::default(),
            active_agents: 0,
            project_completion: None,
            last_seen: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A swarm is stale when it is not already offline and has not been seen
    /// for strictly longer than `threshold`. Never-seen swarms count as stale.
    pub fn is_stale(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        if self.status == SwarmStatus::Offline {
            return false;
        }
        match self.last_seen {
            Some(seen) => now.signed_duration_since(seen) > threshold,
            None => true,
        }
    }
}

/// Outcome of one poll for a single swarm, persisted by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthUpdate {
    pub status: SwarmStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<HealthMetrics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub active_agents: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_completion: Option<f64>,
    /// Set when the swarm answered; failed polls leave `last_seen` untouched.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
}

impl HealthUpdate {
    pub fn unreachable() -> Self {
        Self {
            status: SwarmStatus::Offline,
            metrics: None,
            active_agents: None,
            project_completion: None,
            seen_at: None,
        }
    }
}

// ============================================================================
// Swarm status API payloads
// ============================================================================

/// Body of `GET {host_url}/status`.
///
/// Accepts both the flat shape (`cpu`, `memory`, `disk`) and the nested
/// `resources` block served by the heartbeat agent.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SwarmStatusPayload {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub cpu: Option<f64>,
    #[serde(default)]
    pub memory: Option<f64>,
    #[serde(default)]
    pub disk: Option<f64>,
    #[serde(default)]
    pub resources: Option<ResourceBlock>,
    #[serde(default)]
    pub agents: Option<AgentsBlock>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceBlock {
    #[serde(default)]
    pub cpu_percent: Option<f64>,
    #[serde(default)]
    pub memory_percent: Option<f64>,
    #[serde(default)]
    pub disk_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentsBlock {
    #[serde(default)]
    pub active: u32,
    #[serde(default)]
    pub total: Option<u32>,
}

/// Body of `GET {host_url}/project/completion`.
#[derive(Debug, Clone, Deserialize)]
pub struct CompletionPayload {
    #[serde(alias = "completion_percentage")]
    pub completion: f64,
}

impl SwarmStatusPayload {
    pub fn reports_offline(&self) -> bool {
        self.status
            .as_deref()
            .is_some_and(|s| s.eq_ignore_ascii_case("offline"))
    }

    pub fn metrics(&self) -> HealthMetrics {
        let nested = self.resources.clone().unwrap_or_default();
        HealthMetrics {
            cpu: self.cpu.or(nested.cpu_percent).unwrap_or(0.0),
            memory: self.memory.or(nested.memory_percent).unwrap_or(0.0),
            disk: self.disk.or(nested.disk_percent).unwrap_or(0.0),
        }
    }

    pub fn active_agents(&self) -> u32 {
        self.agents.as_ref().map(|a| a.active).unwrap_or(0)
    }

    pub fn classify(&self) -> SwarmStatus {
        if self.reports_offline() {
            return SwarmStatus::Offline;
        }
        classify_metrics(&self.metrics())
    }
}

pub fn classify_metrics(metrics: &HealthMetrics) -> SwarmStatus {
    if metrics.cpu > DEGRADED_THRESHOLD_PERCENT || metrics.memory > DEGRADED_THRESHOLD_PERCENT {
        SwarmStatus::Degraded
    } else {
        SwarmStatus::Online
    }
}
