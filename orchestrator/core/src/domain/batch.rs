// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! # Batch Operations and Swarm Groups
//!
//! A batch fans one [`ControlAction`] out across many swarms and aggregates the
//! per-swarm outcomes. A [`SwarmGroup`] is a named set of swarm IDs used as a
//! batch target.
//!
//! ## Counting rules
//!
//! While a batch is running `successful + failed + in_progress == total_swarms`.
//! Once it is resolved `successful + failed == total_swarms` and the status is
//! one of `completed`, `partial_failure` or `failed`. Status never returns to
//! `in_progress` after finalization.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer
//! - **Purpose:** Batch result aggregate and group aggregate

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::domain::control::{ControlAction, ControlOutcome, ControlParameters};
use crate::domain::swarm::SwarmId;

pub const SWARM_NOT_FOUND: &str = "Swarm not found";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BatchId(pub Uuid);

impl BatchId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BatchId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    InProgress,
    Completed,
    PartialFailure,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BatchStatus::Completed | BatchStatus::PartialFailure | BatchStatus::Failed
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::InProgress => "in_progress",
            BatchStatus::Completed => "completed",
            BatchStatus::PartialFailure => "partial_failure",
            BatchStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SwarmResultStatus {
    Success,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmBatchResult {
    pub swarm_id: SwarmId,
    pub status: SwarmResultStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ControlOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SwarmBatchResult {
    pub fn success(swarm_id: SwarmId, outcome: ControlOutcome) -> Self {
        Self {
            swarm_id,
            status: SwarmResultStatus::Success,
            result: Some(outcome),
            error: None,
        }
    }

    pub fn failed(swarm_id: SwarmId, error: impl Into<String>) -> Self {
        Self {
            swarm_id,
            status: SwarmResultStatus::Failed,
            result: None,
            error: Some(error.into()),
        }
    }

    pub fn not_found(swarm_id: SwarmId) -> Self {
        Self::failed(swarm_id, SWARM_NOT_FOUND)
    }

    pub fn is_success(&self) -> bool {
        self.status == SwarmResultStatus::Success
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchOperationResult {
    pub batch_id: BatchId,
    pub action: ControlAction,
    pub total_swarms: usize,
    pub successful: usize,
    pub failed: usize,
    pub in_progress: usize,
    pub results: Vec<SwarmBatchResult>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: BatchStatus,
}

impl BatchOperationResult {
    pub fn new(action: ControlAction, total_swarms: usize) -> Self {
        Self {
            batch_id: BatchId::new(),
            action,
            total_swarms,
            successful: 0,
            failed: 0,
            in_progress: total_swarms,
            results: Vec::with_capacity(total_swarms),
            started_at: Utc::now(),
            completed_at: None,
            status: BatchStatus::Pending,
        }
    }

    pub fn begin(&mut self) {
        if self.status == BatchStatus::Pending {
            self.status = BatchStatus::InProgress;
        }
    }

    /// Record one resolved swarm. Ignored once the batch is terminal.
    pub fn record(&mut self, result: SwarmBatchResult) {
        if self.status.is_terminal() || self.in_progress == 0 {
            return;
        }
        if result.is_success() {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
        self.in_progress -= 1;
        self.results.push(result);
    }

    /// Stamp the terminal status. Calling this more than once has no effect.
    pub fn finalize(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.in_progress = 0;
        self.failed = self.total_swarms.saturating_sub(self.successful);
        self.status = aggregate_status(self.successful, self.total_swarms);
        self.completed_at = Some(Utc::now());
    }
}

pub fn aggregate_status(successful: usize, total: usize) -> BatchStatus {
    if successful == 0 {
        BatchStatus::Failed
    } else if successful == total {
        BatchStatus::Completed
    } else {
        BatchStatus::PartialFailure
    }
}

/// Input of a batch run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchRequest {
    pub action: ControlAction,
    pub swarm_ids: Vec<SwarmId>,
    #[serde(default)]
    pub parameters: ControlParameters,
    #[serde(default)]
    pub executed_by: Option<String>,
}

// ============================================================================
// Swarm groups
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SwarmGroup {
    pub group_id: GroupId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub swarm_ids: Vec<SwarmId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwarmGroup {
    pub fn new(name: String, description: Option<String>, swarm_ids: Vec<SwarmId>) -> Self {
        let now = Utc::now();
        Self {
            group_id: GroupId::new(),
            name,
            description,
            swarm_ids: dedupe(swarm_ids),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn add_swarms(&mut self, ids: impl IntoIterator<Item = SwarmId>) {
        for id in ids {
            if !self.swarm_ids.contains(&id) {
                self.swarm_ids.push(id);
            }
        }
        self.updated_at = Utc::now();
    }

    pub fn remove_swarms(&mut self, ids: &[SwarmId]) {
        self.swarm_ids.retain(|id| !ids.contains(id));
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewSwarmGroup {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub swarm_ids: Vec<SwarmId>,
}

/// Partial update; `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub swarm_ids: Option<Vec<SwarmId>>,
}

/// Collapse duplicates, keeping the first occurrence.
pub fn dedupe(ids: Vec<SwarmId>) -> Vec<SwarmId> {
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}
