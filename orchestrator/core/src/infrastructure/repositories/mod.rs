// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! Repository Implementations
//!
//! This module provides infrastructure implementations of repository abstractions
//! defined in the domain layer, following the Repository pattern from DDD.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure
//! - **Purpose:** Persist and retrieve hosts, swarms and audit trails
//! - **Pattern:** Repository (DDD), Adapter (Hexagonal Architecture)
//!
//! # Available Implementations
//!
//! ## PostgreSQL Repositories
//!
//! - **PostgresHostRepository** - Host registry
//! - **PostgresSwarmRepository** - Swarm registry and health snapshots
//! - **PostgresAuditLogRepository** - Command and control audit trails
//!
//! ## In-Memory Repositories
//!
//! Lightweight implementations for testing and development:
//! - **InMemoryHostRepository**
//! - **InMemorySwarmRepository**
//! - **InMemoryAuditLogRepository**
//!
//! # Usage
//!
//! ```no_run
//! use qiflow_core::domain::host::HostId;
//! use qiflow_core::domain::repository::HostRepository;
//! use qiflow_core::infrastructure::repositories::PostgresHostRepository;
//! use sqlx::PgPool;
//!
//! async fn lookup(database_url: &str) -> anyhow::Result<()> {
//!     let pool = PgPool::connect(database_url).await?;
//!     let repo = PostgresHostRepository::new(pool);
//!     let host = repo.find_by_id(&HostId::new("edge-01")).await?;
//!     println!("{:?}", host);
//!     Ok(())
//! }
//! ```

pub mod postgres_audit;
pub mod postgres_host;
pub mod postgres_swarm;

pub use postgres_audit::PostgresAuditLogRepository;
pub use postgres_host::PostgresHostRepository;
pub use postgres_swarm::PostgresSwarmRepository;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::domain::audit::{CommandAuditLogEntry, ControlAuditEntry};
use crate::domain::host::{Host, HostId, HostStatus};
use crate::domain::repository::{
    AuditLogRepository, HostRepository, RepositoryError, SwarmRepository,
};
use crate::domain::swarm::{HealthUpdate, Swarm, SwarmId, SwarmStatus};

#[derive(Clone, Default)]
pub struct InMemoryHostRepository {
    hosts: Arc<RwLock<HashMap<HostId, Host>>>,
}

impl InMemoryHostRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostRepository for InMemoryHostRepository {
    async fn find_by_id(&self, id: &HostId) -> Result<Option<Host>, RepositoryError> {
        Ok(self.hosts.read().get(id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Host>, RepositoryError> {
        let mut hosts: Vec<Host> = self.hosts.read().values().cloned().collect();
        hosts.sort_by(|a, b| a.host_id.cmp(&b.host_id));
        Ok(hosts)
    }

    async fn create(&self, host: &Host) -> Result<(), RepositoryError> {
        let mut hosts = self.hosts.write();
        if hosts.contains_key(&host.host_id) {
            return Err(RepositoryError::AlreadyExists(format!("Host {}", host.host_id)));
        }
        hosts.insert(host.host_id.clone(), host.clone());
        Ok(())
    }

    async fn update(&self, host: &Host) -> Result<(), RepositoryError> {
        let mut hosts = self.hosts.write();
        match hosts.get_mut(&host.host_id) {
            Some(existing) => {
                *existing = host.clone();
                existing.updated_at = Utc::now();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("Host {} not found", host.host_id))),
        }
    }

    async fn delete(&self, id: &HostId) -> Result<(), RepositoryError> {
        match self.hosts.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound(format!("Host {} not found", id))),
        }
    }

    async fn update_last_seen(
        &self,
        id: &HostId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let mut hosts = self.hosts.write();
        let host = hosts
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Host {} not found", id)))?;
        host.last_seen = Some(at);
        host.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(&self, id: &HostId, status: HostStatus) -> Result<(), RepositoryError> {
        let mut hosts = self.hosts.write();
        let host = hosts
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Host {} not found", id)))?;
        host.status = status;
        host.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemorySwarmRepository {
    swarms: Arc<RwLock<HashMap<SwarmId, Swarm>>>,
}

impl InMemorySwarmRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SwarmRepository for InMemorySwarmRepository {
    async fn find_by_id(&self, id: &SwarmId) -> Result<Option<Swarm>, RepositoryError> {
        Ok(self.swarms.read().get(id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Swarm>, RepositoryError> {
        let mut swarms: Vec<Swarm> = self.swarms.read().values().cloned().collect();
        swarms.sort_by(|a, b| a.swarm_id.cmp(&b.swarm_id));
        Ok(swarms)
    }

    async fn create(&self, swarm: &Swarm) -> Result<(), RepositoryError> {
        let mut swarms = self.swarms.write();
        if swarms.contains_key(&swarm.swarm_id) {
            return Err(RepositoryError::AlreadyExists(format!("Swarm {}", swarm.swarm_id)));
        }
        swarms.insert(swarm.swarm_id.clone(), swarm.clone());
        Ok(())
    }

    async fn update(&self, swarm: &Swarm) -> Result<(), RepositoryError> {
        let mut swarms = self.swarms.write();
        match swarms.get_mut(&swarm.swarm_id) {
            Some(existing) => {
                *existing = swarm.clone();
                existing.updated_at = Utc::now();
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("Swarm {} not found", swarm.swarm_id))),
        }
    }

    async fn delete(&self, id: &SwarmId) -> Result<(), RepositoryError> {
        match self.swarms.write().remove(id) {
            Some(_) => Ok(()),
            None => Err(RepositoryError::NotFound(format!("Swarm {} not found", id))),
        }
    }

    async fn update_health(
        &self,
        id: &SwarmId,
        update: &HealthUpdate,
    ) -> Result<(), RepositoryError> {
        let mut swarms = self.swarms.write();
        let swarm = swarms
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Swarm {} not found", id)))?;
        swarm.status = update.status;
        if let Some(metrics) = update.metrics {
            swarm.health_status = metrics;
        }
        if let Some(active) = update.active_agents {
            swarm.active_agents = active;
        }
        if let Some(completion) = update.project_completion {
            swarm.project_completion = Some(completion);
        }
        if let Some(seen) = update.seen_at {
            swarm.last_seen = Some(seen);
        }
        swarm.updated_at = Utc::now();
        Ok(())
    }

    async fn update_status(
        &self,
        id: &SwarmId,
        status: SwarmStatus,
    ) -> Result<(), RepositoryError> {
        let mut swarms = self.swarms.write();
        let swarm = swarms
            .get_mut(id)
            .ok_or_else(|| RepositoryError::NotFound(format!("Swarm {} not found", id)))?;
        swarm.status = status;
        swarm.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct InMemoryAuditLogRepository {
    commands: Arc<RwLock<Vec<CommandAuditLogEntry>>>,
    controls: Arc<RwLock<Vec<ControlAuditEntry>>>,
}

impl InMemoryAuditLogRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AuditLogRepository for InMemoryAuditLogRepository {
    async fn create_audit_log(&self, entry: &CommandAuditLogEntry) -> Result<(), RepositoryError> {
        self.commands.write().push(entry.clone());
        Ok(())
    }

    async fn get_audit_logs(
        &self,
        host_id: &HostId,
        limit: usize,
    ) -> Result<Vec<CommandAuditLogEntry>, RepositoryError> {
        // Appended in time order; walk backwards for newest first.
        Ok(self
            .commands
            .read()
            .iter()
            .rev()
            .filter(|e| &e.host_id == host_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn create_control_audit(&self, entry: &ControlAuditEntry) -> Result<(), RepositoryError> {
        self.controls.write().push(entry.clone());
        Ok(())
    }

    async fn get_control_audit(
        &self,
        swarm_id: &SwarmId,
        limit: usize,
    ) -> Result<Vec<ControlAuditEntry>, RepositoryError> {
        Ok(self
            .controls
            .read()
            .iter()
            .rev()
            .filter(|e| &e.swarm_id == swarm_id)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::host::{HostAuth, NewHost, OsType};
    use crate::domain::swarm::HealthMetrics;

    fn host(id: &str) -> Host {
        Host::register(NewHost {
            host_id: HostId::new(id),
            hostname: format!("{}.internal", id),
            port: 22,
            username: "qiflow".to_string(),
            os_type: OsType::Linux,
            auth: HostAuth::key("/keys/id"),
            capacity_max_swarms: 5,
        })
    }

    #[tokio::test]
    async fn test_host_crud() {
        let repo = InMemoryHostRepository::new();
        repo.create(&host("h1")).await.unwrap();
        assert!(matches!(
            repo.create(&host("h1")).await,
            Err(RepositoryError::AlreadyExists(_))
        ));

        repo.update_status(&HostId::new("h1"), HostStatus::Online).await.unwrap();
        let found = repo.find_by_id(&HostId::new("h1")).await.unwrap().unwrap();
        assert_eq!(found.status, HostStatus::Online);

        repo.delete(&HostId::new("h1")).await.unwrap();
        assert!(repo.find_by_id(&HostId::new("h1")).await.unwrap().is_none());
        assert!(matches!(
            repo.delete(&HostId::new("h1")).await,
            Err(RepositoryError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_failed_poll_keeps_last_seen() {
        let repo = InMemorySwarmRepository::new();
        let id = SwarmId::new("s1");
        repo.create(&Swarm::new(id.clone(), "alpha", "http://alpha")).await.unwrap();

        let seen = Utc::now();
        repo.update_health(
            &id,
            &HealthUpdate {
                status: SwarmStatus::Online,
                metrics: Some(HealthMetrics { cpu: 10.0, memory: 20.0, disk: 30.0 }),
                active_agents: Some(4),
                project_completion: None,
                seen_at: Some(seen),
            },
        )
        .await
        .unwrap();

        repo.update_health(&id, &HealthUpdate::unreachable()).await.unwrap();

        let swarm = repo.find_by_id(&id).await.unwrap().unwrap();
        assert_eq!(swarm.status, SwarmStatus::Offline);
        assert_eq!(swarm.last_seen, Some(seen));
        assert_eq!(swarm.active_agents, 4);
        assert_eq!(swarm.health_status.memory, 20.0);
    }

    #[tokio::test]
    async fn test_audit_logs_newest_first_with_limit() {
        let repo = InMemoryAuditLogRepository::new();
        let h1 = HostId::new("h1");
        for (i, command) in ["check_status", "get_logs", "restart_swarm"].iter().enumerate() {
            let entry =
                CommandAuditLogEntry::completed(h1.clone(), *command, "ops", 0, "", "", i as u64);
            repo.create_audit_log(&entry).await.unwrap();
        }
        let other =
            CommandAuditLogEntry::completed(HostId::new("h2"), "get_logs", "ops", 0, "", "", 1);
        repo.create_audit_log(&other).await.unwrap();

        let logs = repo.get_audit_logs(&h1, 2).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].command, "restart_swarm");
        assert_eq!(logs[1].command, "get_logs");
    }
}
