// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

//! Host lifecycle: registration, connection testing, removal and audit reads.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

use crate::application::connection_pool::{ConnectionPool, PoolError};
use crate::domain::audit::CommandAuditLogEntry;
use crate::domain::errors::ErrorKind;
use crate::domain::host::{Host, HostId, HostStatus, NewHost};
use crate::domain::repository::{AuditLogRepository, HostRepository, RepositoryError};

#[derive(Debug, Error)]
pub enum HostError {
    #[error("invalid host: {0}")]
    InvalidHost(String),

    #[error("host '{0}' not found")]
    HostNotFound(HostId),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

impl HostError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HostError::InvalidHost(_) => ErrorKind::InvalidInput,
            HostError::HostNotFound(_) => ErrorKind::NotFound,
            HostError::Repository(e) => e.kind(),
        }
    }
}

/// Result of a successful connection test.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionTest {
    pub host_id: HostId,
    pub latency_ms: u64,
}

pub struct HostService {
    hosts: Arc<dyn HostRepository>,
    pool: Arc<ConnectionPool>,
    audit: Arc<dyn AuditLogRepository>,
}

impl HostService {
    pub fn new(
        hosts: Arc<dyn HostRepository>,
        pool: Arc<ConnectionPool>,
        audit: Arc<dyn AuditLogRepository>,
    ) -> Self {
        Self { hosts, pool, audit }
    }

    /// Store a new host with status `offline`.
    pub async fn register_host(&self, new: NewHost) -> Result<Host, HostError> {
        validate_new_host(&new)?;
        let host = Host::register(new);
        self.hosts.create(&host).await?;
        info!(
            host_id = %host.host_id,
            hostname = %host.hostname,
            os = host.os_type.as_str(),
            "Registered host"
        );
        Ok(host)
    }

    pub async fn get_host(&self, host_id: &HostId) -> Result<Host, HostError> {
        self.hosts
            .find_by_id(host_id)
            .await?
            .ok_or_else(|| HostError::HostNotFound(host_id.clone()))
    }

    pub async fn list_hosts(&self) -> Result<Vec<Host>, HostError> {
        Ok(self.hosts.find_all().await?)
    }

    /// Close the host's pooled session, then delete the record.
    pub async fn delete_host(&self, host_id: &HostId) -> Result<(), HostError> {
        self.get_host(host_id).await?;
        self.pool.close(host_id).await;
        self.hosts.delete(host_id).await?;
        info!(host_id = %host_id, "Deleted host");
        Ok(())
    }

    /// Check out the host's pooled session (connecting if needed) and record
    /// the outcome on the host.
    pub async fn test_connection(&self, host_id: &HostId) -> Result<ConnectionTest, PoolError> {
        let started = Instant::now();
        match self.pool.acquire(host_id).await {
            Ok(session) => {
                session.release();
                let latency_ms = started.elapsed().as_millis() as u64;
                self.hosts.update_status(host_id, HostStatus::Online).await?;
                self.hosts.update_last_seen(host_id, Utc::now()).await?;
                info!(host_id = %host_id, latency_ms, "Host connection test succeeded");
                Ok(ConnectionTest {
                    host_id: host_id.clone(),
                    latency_ms,
                })
            }
            Err(PoolError::HostNotFound(id)) => Err(PoolError::HostNotFound(id)),
            Err(e) => {
                warn!(host_id = %host_id, error = %e, "Host connection test failed");
                if let Err(update_err) = self
                    .hosts
                    .update_status(host_id, HostStatus::Error)
                    .await
                {
                    warn!(host_id = %host_id, "Failed to record host error status: {}", update_err);
                }
                Err(e)
            }
        }
    }

    /// Most recent command audit rows for the host, newest first.
    pub async fn audit_logs(
        &self,
        host_id: &HostId,
        limit: usize,
    ) -> Result<Vec<CommandAuditLogEntry>, HostError> {
        Ok(self.audit.get_audit_logs(host_id, limit).await?)
    }
}

fn validate_new_host(new: &NewHost) -> Result<(), HostError> {
    if new.host_id.as_str().trim().is_empty() {
        return Err(HostError::InvalidHost("host_id must not be empty".to_string()));
    }
    if new.hostname.trim().is_empty() || new.hostname.chars().any(char::is_whitespace) {
        return Err(HostError::InvalidHost(format!("invalid hostname '{}'", new.hostname)));
    }
    if new.username.trim().is_empty() {
        return Err(HostError::InvalidHost("username must not be empty".to_string()));
    }
    if new.port == 0 {
        return Err(HostError::InvalidHost("port must be between 1 and 65535".to_string()));
    }
    Ok(())
}
