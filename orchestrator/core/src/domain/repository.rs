// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for the durable aggregates. Interfaces are defined in
//! the domain layer and implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `HostRepository` | `Host` | `InMemoryHostRepository`, `PostgresHostRepository` |
//! | `SwarmRepository` | `Swarm` | `InMemorySwarmRepository`, `PostgresSwarmRepository` |
//! | `AuditLogRepository` | audit entries | `InMemoryAuditLogRepository`, `PostgresAuditLogRepository` |
//!
//! Writes are last-write-wins; no cross-row transactions are required.
//!
//! ## Storage Backend Abstraction
//!
//! Concrete implementations are selected at startup from configuration
//! (`qiflow-config.yaml`). In-memory implementations are used for development
//! and testing; PostgreSQL implementations for production. Batch results and
//! swarm groups are process-local and have no repository.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::audit::{CommandAuditLogEntry, ControlAuditEntry};
use crate::domain::errors::ErrorKind;
use crate::domain::host::{Host, HostId, HostStatus};
use crate::domain::swarm::{HealthUpdate, Swarm, SwarmId, SwarmStatus};

/// Storage backend enum for pluggable persistence
#[derive(Debug, Clone)]
pub enum StorageBackend {
    InMemory,
    PostgreSQL(PostgresConfig),
}

#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub connection_string: String,
    pub max_connections: u32,
}

/// Repository interface for Host aggregates
#[async_trait]
pub trait HostRepository: Send + Sync {
    async fn find_by_id(&self, id: &HostId) -> Result<Option<Host>, RepositoryError>;

    async fn find_all(&self) -> Result<Vec<Host>, RepositoryError>;

    /// Insert a new host; fails with `AlreadyExists` on a duplicate ID.
    async fn create(&self, host: &Host) -> Result<(), RepositoryError>;

    /// Replace an existing host; fails with `NotFound` if absent.
    async fn update(&self, host: &Host) -> Result<(), RepositoryError>;

    async fn delete(&self, id: &HostId) -> Result<(), RepositoryError>;

    async fn update_last_seen(&self, id: &HostId, at: DateTime<Utc>) -> Result<(), RepositoryError>;

    async fn update_status(&self, id: &HostId, status: HostStatus) -> Result<(), RepositoryError>;
}

/// Repository interface for Swarm aggregates
#[async_trait]
pub trait SwarmRepository: Send + Sync {
    async fn find_by_id(&self, id: &SwarmId) -> Result<Option<Swarm>, RepositoryError>;

    async fn find_all(&self) -> Result<Vec<Swarm>, RepositoryError>;

    async fn create(&self, swarm: &Swarm) -> Result<(), RepositoryError>;

    async fn update(&self, swarm: &Swarm) -> Result<(), RepositoryError>;

    async fn delete(&self, id: &SwarmId) -> Result<(), RepositoryError>;

    /// Persist one poll outcome. `last_seen` moves only when `update.seen_at` is set.
    async fn update_health(
        &self,
        id: &SwarmId,
        update: &HealthUpdate,
    ) -> Result<(), RepositoryError>;

    async fn update_status(&self, id: &SwarmId, status: SwarmStatus) -> Result<(), RepositoryError>;
}

/// Append-only audit trail for commands and control actions
#[async_trait]
pub trait AuditLogRepository: Send + Sync {
    async fn create_audit_log(&self, entry: &CommandAuditLogEntry) -> Result<(), RepositoryError>;

    /// Most recent entries for a host, newest first.
    async fn get_audit_logs(
        &self,
        host_id: &HostId,
        limit: usize,
    ) -> Result<Vec<CommandAuditLogEntry>, RepositoryError>;

    async fn create_control_audit(&self, entry: &ControlAuditEntry) -> Result<(), RepositoryError>;

    /// Most recent control actions for a swarm, newest first.
    async fn get_control_audit(
        &self,
        swarm_id: &SwarmId,
        limit: usize,
    ) -> Result<Vec<ControlAuditEntry>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Entity already exists: {0}")]
    AlreadyExists(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl RepositoryError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RepositoryError::NotFound(_) => ErrorKind::NotFound,
            RepositoryError::AlreadyExists(_) => ErrorKind::InvalidInput,
            _ => ErrorKind::Internal,
        }
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            sqlx::Error::Database(ref db) if db.is_unique_violation() => {
                RepositoryError::AlreadyExists(db.message().to_string())
            }
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
