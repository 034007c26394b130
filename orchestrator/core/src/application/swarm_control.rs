// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! Swarm Control Application Service
//!
//! Accepts named control actions for a swarm, checks their preconditions and
//! records intent:
//! - Control audit row per accepted action
//! - Invalidation of the swarm's cached read paths
//! - A [`ControlCommand`] handed to the injected [`ControlDispatcher`]
//!
//! Delivery to the swarm is the dispatcher's job; this service only returns a
//! `queued` outcome.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Per-swarm control actions and precondition checks

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::domain::audit::ControlAuditEntry;
use crate::domain::batch::SWARM_NOT_FOUND;
use crate::domain::control::{
    find_preset, ControlAction, ControlCommand, ControlOutcome, ControlParameters, ControlStatus,
    ValidationResult,
};
use crate::domain::dispatch::{ControlDispatcher, DispatchError, ReadCache};
use crate::domain::errors::ErrorKind;
use crate::domain::events::FleetEvent;
use crate::domain::repository::{AuditLogRepository, RepositoryError, SwarmRepository};
use crate::domain::swarm::{Swarm, SwarmId, SwarmStatus};
use crate::infrastructure::event_bus::EventBus;

/// Lifetime of a cached `swarm:{id}` read.
pub const SWARM_CACHE_TTL: Duration = Duration::from_secs(30);

#[derive(Debug, Error)]
pub enum ControlError {
    #[error("swarm '{0}' not found")]
    SwarmNotFound(SwarmId),

    #[error("precondition failed for swarm '{swarm_id}': {reason}")]
    PreconditionFailed { swarm_id: SwarmId, reason: String },

    #[error("unknown control action '{0}'")]
    InvalidAction(String),

    #[error("unknown schedule preset '{0}'")]
    InvalidPreset(String),

    #[error("action '{action}' requires parameter '{parameter}'")]
    MissingParameter {
        action: ControlAction,
        parameter: &'static str,
    },

    #[error(transparent)]
    Dispatch(#[from] DispatchError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl ControlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ControlError::SwarmNotFound(_) => ErrorKind::NotFound,
            ControlError::PreconditionFailed { .. } => ErrorKind::PreconditionFailed,
            ControlError::InvalidAction(_)
            | ControlError::InvalidPreset(_)
            | ControlError::MissingParameter { .. } => ErrorKind::InvalidInput,
            ControlError::Dispatch(_) => ErrorKind::Internal,
            ControlError::Repository(e) => e.kind(),
        }
    }
}

pub fn swarm_cache_key(swarm_id: &SwarmId) -> String {
    format!("swarm:{}", swarm_id)
}

pub struct SwarmControlService {
    swarms: Arc<dyn SwarmRepository>,
    audit: Arc<dyn AuditLogRepository>,
    cache: Arc<dyn ReadCache>,
    dispatcher: Arc<dyn ControlDispatcher>,
    event_bus: EventBus,
}

impl SwarmControlService {
    pub fn new(
        swarms: Arc<dyn SwarmRepository>,
        audit: Arc<dyn AuditLogRepository>,
        cache: Arc<dyn ReadCache>,
        dispatcher: Arc<dyn ControlDispatcher>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            swarms,
            audit,
            cache,
            dispatcher,
            event_bus,
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read-through lookup over the `swarm:{id}` cache entry.
    pub async fn get_swarm(&self, swarm_id: &SwarmId) -> Result<Swarm, ControlError> {
        let key = swarm_cache_key(swarm_id);
        if let Some(cached) = self.cache.get(&key) {
            match serde_json::from_value::<Swarm>(cached) {
                Ok(swarm) => return Ok(swarm),
                Err(e) => {
                    debug!(swarm_id = %swarm_id, "Discarding undecodable cache entry: {}", e);
                    self.cache.invalidate(&key);
                }
            }
        }

        let swarm = self.load(swarm_id).await?;
        match serde_json::to_value(&swarm) {
            Ok(value) => self.cache.set(&key, value, SWARM_CACHE_TTL),
            Err(e) => warn!(swarm_id = %swarm_id, "Failed to cache swarm: {}", e),
        }
        Ok(swarm)
    }

    /// Check whether `action` may run against the swarm right now.
    pub async fn validate(
        &self,
        swarm_id: &SwarmId,
        action: ControlAction,
    ) -> Result<ValidationResult, ControlError> {
        let Some(swarm) = self.swarms.find_by_id(swarm_id).await? else {
            return Ok(ValidationResult::rejected(SWARM_NOT_FOUND));
        };
        Ok(check_precondition(&swarm, action))
    }

    // ========================================================================
    // Actions
    // ========================================================================

    pub async fn pause(
        &self,
        swarm_id: &SwarmId,
        executed_by: &str,
    ) -> Result<ControlOutcome, ControlError> {
        self.perform(
            swarm_id,
            ControlAction::Pause,
            ControlParameters::new(),
            executed_by,
            "Pause".to_string(),
        )
            .await
    }

    pub async fn resume(
        &self,
        swarm_id: &SwarmId,
        executed_by: &str,
    ) -> Result<ControlOutcome, ControlError> {
        self.perform(
            swarm_id,
            ControlAction::Resume,
            ControlParameters::new(),
            executed_by,
            "Resume".to_string(),
        )
            .await
    }

    pub async fn restart_agent(
        &self,
        swarm_id: &SwarmId,
        agent_id: &str,
        executed_by: &str,
    ) -> Result<ControlOutcome, ControlError> {
        if agent_id.trim().is_empty() {
            return Err(ControlError::MissingParameter {
                action: ControlAction::RestartAgent,
                parameter: "agent_id",
            });
        }
        let mut parameters = ControlParameters::new();
        parameters.insert("agent_id".to_string(), Value::String(agent_id.to_string()));
        self.perform(
            swarm_id,
            ControlAction::RestartAgent,
            parameters,
            executed_by,
            format!("Restart of agent '{}'", agent_id),
        )
        .await
    }

    pub async fn force_sync(
        &self,
        swarm_id: &SwarmId,
        executed_by: &str,
    ) -> Result<ControlOutcome, ControlError> {
        self.perform(
            swarm_id,
            ControlAction::ForceSync,
            ControlParameters::new(),
            executed_by,
            "Force sync".to_string(),
        )
            .await
    }

    pub async fn emergency_stop(
        &self,
        swarm_id: &SwarmId,
        executed_by: &str,
    ) -> Result<ControlOutcome, ControlError> {
        self.perform(
            swarm_id,
            ControlAction::EmergencyStop,
            ControlParameters::new(),
            executed_by,
            "Emergency stop".to_string(),
        )
        .await
    }

    pub async fn manual_trigger(
        &self,
        swarm_id: &SwarmId,
        task: Option<&str>,
        executed_by: &str,
    ) -> Result<ControlOutcome, ControlError> {
        let mut parameters = ControlParameters::new();
        let summary = match task {
            Some(task) => {
                parameters.insert("task".to_string(), Value::String(task.to_string()));
                format!("Manual trigger of '{}'", task)
            }
            None => "Manual trigger".to_string(),
        };
        self.perform(swarm_id, ControlAction::ManualTrigger, parameters, executed_by, summary)
            .await
    }

    pub async fn apply_schedule_preset(
        &self,
        swarm_id: &SwarmId,
        preset_name: &str,
        executed_by: &str,
    ) -> Result<ControlOutcome, ControlError> {
        let preset =
            find_preset(preset_name)
                .ok_or_else(|| ControlError::InvalidPreset(preset_name.to_string()))?;

        let mut parameters = ControlParameters::new();
        parameters.insert("preset".to_string(), Value::String(preset.name.to_string()));
        parameters.insert("cron".to_string(), Value::String(preset.cron.to_string()));
        parameters.insert("timezone".to_string(), Value::String(preset.timezone.to_string()));

        self.perform(
            swarm_id,
            ControlAction::ApplySchedulePreset,
            parameters,
            executed_by,
            format!("Schedule preset '{}'", preset.name),
        )
        .await
    }

    /// Run `action` with its arguments taken from `parameters`.
    pub async fn execute(
        &self,
        swarm_id: &SwarmId,
        action: ControlAction,
        parameters: &ControlParameters,
        executed_by: &str,
    ) -> Result<ControlOutcome, ControlError> {
        match action {
            ControlAction::Pause => self.pause(swarm_id, executed_by).await,
            ControlAction::Resume => self.resume(swarm_id, executed_by).await,
            ControlAction::RestartAgent => {
                let agent_id = string_param(parameters, action, "agent_id")?;
                self.restart_agent(swarm_id, agent_id, executed_by).await
            }
            ControlAction::ForceSync => self.force_sync(swarm_id, executed_by).await,
            ControlAction::EmergencyStop => self.emergency_stop(swarm_id, executed_by).await,
            ControlAction::ManualTrigger => {
                let task = parameters.get("task").and_then(Value::as_str);
                self.manual_trigger(swarm_id, task, executed_by).await
            }
            ControlAction::ApplySchedulePreset => {
                let preset = string_param(parameters, action, "preset")?;
                self.apply_schedule_preset(swarm_id, preset, executed_by).await
            }
        }
    }

    /// [`execute`](Self::execute) for an action given by name.
    pub async fn execute_named(
        &self,
        swarm_id: &SwarmId,
        action: &str,
        parameters: &ControlParameters,
        executed_by: &str,
    ) -> Result<ControlOutcome, ControlError> {
        let action: ControlAction = action.parse().map_err(ControlError::InvalidAction)?;
        self.execute(swarm_id, action, parameters, executed_by).await
    }

    async fn perform(
        &self,
        swarm_id: &SwarmId,
        action: ControlAction,
        parameters: ControlParameters,
        executed_by: &str,
        summary: String,
    ) -> Result<ControlOutcome, ControlError> {
        let swarm = self.load(swarm_id).await?;

        let check = check_precondition(&swarm, action);
        if !check.valid {
            return Err(ControlError::PreconditionFailed {
                swarm_id: swarm_id.clone(),
                reason: check.error.unwrap_or_default(),
            });
        }

        let audit = ControlAuditEntry::new(
            swarm_id.clone(),
            action.as_str(),
            executed_by,
            Value::Object(parameters.clone()),
        );
        self.audit.create_control_audit(&audit).await?;

        self.invalidate(swarm_id, action);

        let command = ControlCommand {
            command_id: Uuid::new_v4(),
            swarm_id: swarm_id.clone(),
            host_url: swarm.host_url.clone(),
            action,
            parameters,
            executed_by: executed_by.to_string(),
            issued_at: Utc::now(),
        };
        let command_id = command.command_id;
        let queued_at = command.issued_at;
        self.dispatcher.dispatch(command).await?;

        self.event_bus.publish(FleetEvent::ControlActionQueued {
            swarm_id: swarm_id.clone(),
            action,
            command_id,
            queued_at,
        });

        info!(
            swarm_id = %swarm_id,
            action = %action,
            command_id = %command_id,
            executed_by = %executed_by,
            "Control action queued"
        );

        Ok(ControlOutcome {
            command_id,
            swarm_id: swarm_id.clone(),
            action,
            status: ControlStatus::Queued,
            message: format!("{} queued for swarm {}", summary, swarm_id),
            queued_at,
        })
    }

    async fn load(&self, swarm_id: &SwarmId) -> Result<Swarm, ControlError> {
        self.swarms
            .find_by_id(swarm_id)
            .await?
            .ok_or_else(|| ControlError::SwarmNotFound(swarm_id.clone()))
    }

    fn invalidate(&self, swarm_id: &SwarmId, action: ControlAction) {
        let base = swarm_cache_key(swarm_id);
        self.cache.invalidate(&format!("{}:status", base));
        for suffix in action.extra_cache_suffixes() {
            self.cache.invalidate(&format!("{}:{}", base, suffix));
        }
        self.cache.invalidate(&base);
    }
}

fn check_precondition(swarm: &Swarm, action: ControlAction) -> ValidationResult {
    if swarm.status == SwarmStatus::Offline && !action.allowed_when_offline() {
        return ValidationResult::rejected(format!(
            "Swarm is offline; '{}' requires an online or degraded swarm",
            action
        ));
    }
    ValidationResult::ok()
}

fn string_param<'a>(
    parameters: &'a ControlParameters,
    action: ControlAction,
    name: &'static str,
) -> Result<&'a str, ControlError> {
    parameters
        .get(name)
        .and_then(Value::as_str)
        .ok_or(ControlError::MissingParameter {
            action,
            parameter: name,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::cache::TtlCache;
    use crate::infrastructure::dispatcher::ChannelDispatcher;
    use crate::infrastructure::repositories::{InMemoryAuditLogRepository, InMemorySwarmRepository};
    use serde_json::json;
    use tokio::sync::mpsc;

    struct Fixture {
        service: SwarmControlService,
        swarms: Arc<InMemorySwarmRepository>,
        audit: Arc<InMemoryAuditLogRepository>,
        cache: Arc<TtlCache>,
        queue: mpsc::Receiver<ControlCommand>,
    }

    async fn fixture(swarms: &[(&str, SwarmStatus)]) -> Fixture {
        let repo = Arc::new(InMemorySwarmRepository::new());
        for (id, status) in swarms {
            let mut swarm = Swarm::new(SwarmId::new(*id), *id, format!("http://{}.local", id));
            swarm.status = *status;
            repo.create(&swarm).await.unwrap();
        }
        let audit = Arc::new(InMemoryAuditLogRepository::new());
        let cache = Arc::new(TtlCache::new());
        let (dispatcher, queue) = ChannelDispatcher::new(16);

        Fixture {
            service: SwarmControlService::new(
                repo.clone(),
                audit.clone(),
                cache.clone(),
                Arc::new(dispatcher),
                EventBus::with_default_capacity(),
            ),
            swarms: repo,
            audit,
            cache,
            queue,
        }
    }

    #[tokio::test]
    async fn test_validate_missing_swarm() {
        let f = fixture(&[]).await;
        let result = f
            .service
            .validate(&SwarmId::new("ghost"), ControlAction::Pause)
            .await
            .unwrap();
        assert_eq!(result, ValidationResult::rejected(SWARM_NOT_FOUND));
    }

    #[tokio::test]
    async fn test_offline_swarm_only_accepts_offline_safe_actions() {
        let f = fixture(&[("s1", SwarmStatus::Offline)]).await;
        let id = SwarmId::new("s1");
        for action in ControlAction::ALL {
            let result = f.service.validate(&id, action).await.unwrap();
            assert_eq!(result.valid, action.allowed_when_offline(), "{}", action);
        }

        let err = f.service.pause(&id, "ops").await.unwrap_err();
        assert!(matches!(err, ControlError::PreconditionFailed { .. }));
        assert_eq!(err.kind(), ErrorKind::PreconditionFailed);
    }

    #[tokio::test]
    async fn test_degraded_swarm_can_be_paused() {
        let f = fixture(&[("s1", SwarmStatus::Degraded)]).await;
        let result = f
            .service
            .validate(&SwarmId::new("s1"), ControlAction::Pause)
            .await
            .unwrap();
        assert!(result.valid);
    }

    #[tokio::test]
    async fn test_pause_audits_dispatches_and_queues() {
        let mut f = fixture(&[("s1", SwarmStatus::Online)]).await;
        let id = SwarmId::new("s1");

        let outcome = f.service.pause(&id, "ops").await.unwrap();
        assert_eq!(outcome.status, ControlStatus::Queued);
        assert_eq!(outcome.action, ControlAction::Pause);

        let dispatched = f.queue.recv().await.unwrap();
        assert_eq!(dispatched.command_id, outcome.command_id);
        assert_eq!(dispatched.host_url, "http://s1.local");

        let audit = f.audit.get_control_audit(&id, 10).await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].action, "pause");
        assert_eq!(audit[0].executed_by, "ops");
    }

    #[tokio::test]
    async fn test_restart_agent_invalidates_agents_path() {
        let mut f = fixture(&[("s1", SwarmStatus::Online)]).await;
        let id = SwarmId::new("s1");
        for key in ["swarm:s1", "swarm:s1:status", "swarm:s1:agents", "swarm:s1:schedule"] {
            f.cache.set(key, json!(true), SWARM_CACHE_TTL);
        }

        f.service.restart_agent(&id, "agent-7", "ops").await.unwrap();
        assert!(f.cache.get("swarm:s1").is_none());
        assert!(f.cache.get("swarm:s1:status").is_none());
        assert!(f.cache.get("swarm:s1:agents").is_none());
        assert_eq!(f.cache.get("swarm:s1:schedule"), Some(json!(true)));

        let dispatched = f.queue.recv().await.unwrap();
        assert_eq!(dispatched.parameters.get("agent_id"), Some(&json!("agent-7")));
    }

    #[tokio::test]
    async fn test_apply_schedule_preset() {
        let mut f = fixture(&[("s1", SwarmStatus::Offline)]).await;
        let id = SwarmId::new("s1");

        let err = f
            .service
            .apply_schedule_preset(&id, "lunch_break", "ops")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidPreset(ref name) if name == "lunch_break"));
        assert!(f.queue.try_recv().is_err());

        f.cache.set("swarm:s1:schedule", json!("old"), SWARM_CACHE_TTL);
        let outcome = f
            .service
            .apply_schedule_preset(&id, "nightly", "ops")
            .await
            .unwrap();
        assert_eq!(outcome.status, ControlStatus::Queued);
        assert!(f.cache.get("swarm:s1:schedule").is_none());

        let dispatched = f.queue.recv().await.unwrap();
        assert_eq!(dispatched.parameters.get("cron"), Some(&json!("0 2 * * *")));
    }

    #[tokio::test]
    async fn test_execute_requires_parameters() {
        let f = fixture(&[("s1", SwarmStatus::Online)]).await;
        let id = SwarmId::new("s1");

        let err = f
            .service
            .execute(&id, ControlAction::RestartAgent, &ControlParameters::new(), "ops")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ControlError::MissingParameter { parameter: "agent_id", .. }
        ));

        let err = f
            .service
            .execute_named(&id, "reboot", &ControlParameters::new(), "ops")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::InvalidAction(ref a) if a == "reboot"));
    }

    #[tokio::test]
    async fn test_get_swarm_reads_through_cache() {
        let f = fixture(&[("s1", SwarmStatus::Online)]).await;
        let id = SwarmId::new("s1");

        let first = f.service.get_swarm(&id).await.unwrap();
        assert_eq!(first.status, SwarmStatus::Online);

        f.swarms.update_status(&id, SwarmStatus::Degraded).await.unwrap();
        let cached = f.service.get_swarm(&id).await.unwrap();
        assert_eq!(cached.status, SwarmStatus::Online);

        f.cache.invalidate("swarm:s1");
        let fresh = f.service.get_swarm(&id).await.unwrap();
        assert_eq!(fresh.status, SwarmStatus::Degraded);
    }

    #[tokio::test]
    async fn test_closed_dispatcher_surfaces_error() {
        let f = fixture(&[("s1", SwarmStatus::Online)]).await;
        drop(f.queue);
        let err = f
            .service
            .force_sync(&SwarmId::new("s1"), "ops")
            .await
            .unwrap_err();
        assert!(matches!(err, ControlError::Dispatch(DispatchError::QueueClosed)));
    }
}
