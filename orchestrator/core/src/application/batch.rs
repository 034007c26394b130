// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! # Batch Orchestrator
//!
//! Fans one control action out across many swarms and aggregates the
//! per-swarm outcomes into a [`BatchOperationResult`].
//!
//! ## Flow
//!
//! 1. Reject an empty target list; collapse duplicate IDs.
//! 2. Resolve every ID concurrently. Unknown IDs are recorded as failed
//!    (`Swarm not found`) without running anything. Zero known IDs is an error.
//! 3. Store the record `in_progress`, then validate and execute the action on
//!    every known swarm concurrently. Each swarm's outcome is captured on its
//!    own; one failure never cancels the rest.
//! 4. Finalize once: `failed = total - successful`, terminal status, and
//!    `completed_at`.
//!
//! Results are held in memory, bounded by `retention`.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Bulk control actions with partial-failure reporting

use dashmap::DashMap;
use futures::future::join_all;
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::application::command_executor::DEFAULT_EXECUTED_BY;
use crate::application::groups::SwarmGroupService;
use crate::application::swarm_control::SwarmControlService;
use crate::domain::batch::{
    dedupe, BatchId, BatchOperationResult, BatchRequest, GroupId, SwarmBatchResult,
};
use crate::domain::config::BatchConfig;
use crate::domain::control::{ControlAction, ControlParameters};
use crate::domain::errors::ErrorKind;
use crate::domain::events::FleetEvent;
use crate::domain::repository::{RepositoryError, SwarmRepository};
use crate::domain::swarm::SwarmId;
use crate::infrastructure::event_bus::EventBus;

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("swarm_ids must contain at least one swarm")]
    MissingSwarmIds,

    #[error("none of the requested swarms exist")]
    NoValidSwarms,

    #[error("group '{0}' not found")]
    GroupNotFound(GroupId),

    #[error("group '{0}' has no swarms")]
    GroupHasNoSwarms(GroupId),

    #[error("invalid group: {0}")]
    InvalidGroup(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl BatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BatchError::MissingSwarmIds
            | BatchError::NoValidSwarms
            | BatchError::InvalidGroup(_) => {
                ErrorKind::InvalidInput
            }
            BatchError::GroupNotFound(_) => ErrorKind::NotFound,
            BatchError::GroupHasNoSwarms(_) => ErrorKind::PreconditionFailed,
            BatchError::Repository(e) => e.kind(),
        }
    }
}

pub struct BatchOrchestrator {
    swarms: Arc<dyn SwarmRepository>,
    control: Arc<SwarmControlService>,
    groups: Arc<SwarmGroupService>,
    event_bus: EventBus,
    config: BatchConfig,
    batches: DashMap<BatchId, BatchOperationResult>,
}

impl BatchOrchestrator {
    pub fn new(
        swarms: Arc<dyn SwarmRepository>,
        control: Arc<SwarmControlService>,
        groups: Arc<SwarmGroupService>,
        event_bus: EventBus,
        config: BatchConfig,
    ) -> Self {
        Self {
            swarms,
            control,
            groups,
            event_bus,
            config,
            batches: DashMap::new(),
        }
    }

    pub async fn execute_batch(
        &self,
        request: BatchRequest,
    ) -> Result<BatchOperationResult, BatchError> {
        if request.swarm_ids.is_empty() {
            return Err(BatchError::MissingSwarmIds);
        }

        let action = request.action;
        let swarm_ids = dedupe(request.swarm_ids);
        let executed_by = request
            .executed_by
            .unwrap_or_else(|| DEFAULT_EXECUTED_BY.to_string());

        let lookups = join_all(swarm_ids.iter().map(|id| async move {
            (id.clone(), self.swarms.find_by_id(id).await)
        }))
        .await;

        let mut valid = Vec::new();
        let mut rejected = Vec::new();
        let mut lookup_error = None;
        for (id, lookup) in lookups {
            match lookup {
                Ok(Some(_)) => valid.push(id),
                Ok(None) => rejected.push(SwarmBatchResult::not_found(id)),
                Err(e) => {
                    warn!(swarm_id = %id, "Swarm lookup failed during batch: {}", e);
                    rejected.push(SwarmBatchResult::failed(id, e.to_string()));
                    lookup_error.get_or_insert(e);
                }
            }
        }

        if valid.is_empty() {
            return Err(match lookup_error {
                Some(e) => BatchError::Repository(e),
                None => BatchError::NoValidSwarms,
            });
        }

        let mut record = BatchOperationResult::new(action, swarm_ids.len());
        record.begin();
        for result in rejected {
            record.record(result);
        }
        let batch_id = record.batch_id;
        self.store(record.clone());

        info!(
            batch_id = %batch_id,
            action = %action,
            total = record.total_swarms,
            valid = valid.len(),
            "Batch operation started"
        );

        let mut pending: FuturesUnordered<_> = valid
            .into_iter()
            .map(|swarm_id| self.run_one(swarm_id, action, &request.parameters, &executed_by))
            .collect();

        while let Some(result) = pending.next().await {
            debug!(
                batch_id = %batch_id,
                swarm_id = %result.swarm_id,
                success = result.is_success(),
                "Batch member resolved"
            );
            if let Some(mut stored) = self.batches.get_mut(&batch_id) {
                stored.record(result.clone());
            }
            record.record(result);
        }

        record.finalize();
        // A newer batch may already have evicted this one.
        if let Some(mut stored) = self.batches.get_mut(&batch_id) {
            *stored = record.clone();
        }

        metrics::counter!(
            "qiflow_batch_operations_total",
            "action" => action.as_str(),
            "status" => record.status.as_str()
        )
        .increment(1);

        if let Some(completed_at) = record.completed_at {
            self.event_bus.publish(FleetEvent::BatchCompleted {
                batch_id,
                action,
                status: record.status,
                successful: record.successful,
                failed: record.failed,
                completed_at,
            });
        }

        info!(
            batch_id = %batch_id,
            action = %action,
            status = record.status.as_str(),
            successful = record.successful,
            failed = record.failed,
            "Batch operation finished"
        );

        Ok(record)
    }

    /// Run a batch against the group's current members.
    pub async fn execute_batch_on_group(
        &self,
        group_id: &GroupId,
        action: ControlAction,
        parameters: ControlParameters,
        executed_by: Option<String>,
    ) -> Result<BatchOperationResult, BatchError> {
        let group = self.groups.get_group(group_id)?;
        if group.swarm_ids.is_empty() {
            return Err(BatchError::GroupHasNoSwarms(*group_id));
        }

        debug!(
            group_id = %group_id,
            name = %group.name,
            members = group.swarm_ids.len(),
            "Running batch on group"
        );
        self.execute_batch(BatchRequest {
            action,
            swarm_ids: group.swarm_ids,
            parameters,
            executed_by,
        })
        .await
    }

    pub fn get_batch(&self, batch_id: &BatchId) -> Option<BatchOperationResult> {
        self.batches.get(batch_id).map(|entry| entry.value().clone())
    }

    /// Most recent batches first, at most `list_limit`.
    pub fn list_batches(&self) -> Vec<BatchOperationResult> {
        let mut batches: Vec<BatchOperationResult> =
            self.batches.iter().map(|entry| entry.value().clone()).collect();
        batches.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        batches.truncate(self.config.list_limit);
        batches
    }

    async fn run_one(
        &self,
        swarm_id: SwarmId,
        action: ControlAction,
        parameters: &ControlParameters,
        executed_by: &str,
    ) -> SwarmBatchResult {
        match self.control.validate(&swarm_id, action).await {
            Ok(check) if !check.valid => {
                let reason = check.error.unwrap_or_else(|| "validation failed".to_string());
                return SwarmBatchResult::failed(swarm_id, reason);
            }
            Err(e) => return SwarmBatchResult::failed(swarm_id, e.to_string()),
            Ok(_) => {}
        }

        match self.control.execute(&swarm_id, action, parameters, executed_by).await {
            Ok(outcome) => SwarmBatchResult::success(swarm_id, outcome),
            Err(e) => {
                debug!(swarm_id = %swarm_id, action = %action, "Batch member failed: {}", e);
                SwarmBatchResult::failed(swarm_id, e.to_string())
            }
        }
    }

    fn store(&self, record: BatchOperationResult) {
        let batch_id = record.batch_id;
        self.batches.insert(batch_id, record);

        while self.batches.len() > self.config.retention.max(1) {
            let oldest = self
                .batches
                .iter()
                .filter(|entry| *entry.key() != batch_id)
                .min_by_key(|entry| entry.value().started_at)
                .map(|entry| *entry.key());
            match oldest {
                Some(id) => {
                    self.batches.remove(&id);
                    debug!(batch_id = %id, "Evicted batch result past retention");
                }
                None => break,
            }
        }
    }
}
