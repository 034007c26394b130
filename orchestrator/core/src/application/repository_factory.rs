// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! Repository Factory - Application Layer
//!
//! Creates concrete repository implementations based on storage backend
//! configuration, keeping the domain layer free of infrastructure types.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Select in-memory or PostgreSQL repositories

use sqlx::PgPool;
use std::sync::Arc;

use crate::domain::repository::{
    AuditLogRepository, HostRepository, RepositoryError, StorageBackend, SwarmRepository,
};
use crate::infrastructure::repositories::{
    InMemoryAuditLogRepository, InMemoryHostRepository, InMemorySwarmRepository,
    PostgresAuditLogRepository, PostgresHostRepository, PostgresSwarmRepository,
};

/// The repositories every service is built from.
#[derive(Clone)]
pub struct Repositories {
    pub hosts: Arc<dyn HostRepository>,
    pub swarms: Arc<dyn SwarmRepository>,
    pub audit: Arc<dyn AuditLogRepository>,
}

/// Creates all repositories for the configured backend. The PostgreSQL
/// backend requires a connected pool.
pub fn create_repositories(
    backend: &StorageBackend,
    pool: Option<PgPool>,
) -> Result<Repositories, RepositoryError> {
    Ok(Repositories {
        hosts: create_host_repository(backend, pool.clone())?,
        swarms: create_swarm_repository(backend, pool.clone())?,
        audit: create_audit_log_repository(backend, pool)?,
    })
}

/// Creates a HostRepository implementation based on the configured backend
pub fn create_host_repository(
    backend: &StorageBackend,
    pool: Option<PgPool>,
) -> Result<Arc<dyn HostRepository>, RepositoryError> {
    match backend {
        StorageBackend::InMemory => Ok(Arc::new(InMemoryHostRepository::new())),
        StorageBackend::PostgreSQL(_) => Ok(Arc::new(PostgresHostRepository::new(require(pool)?))),
    }
}

/// Creates a SwarmRepository implementation based on the configured backend
pub fn create_swarm_repository(
    backend: &StorageBackend,
    pool: Option<PgPool>,
) -> Result<Arc<dyn SwarmRepository>, RepositoryError> {
    match backend {
        StorageBackend::InMemory => Ok(Arc::new(InMemorySwarmRepository::new())),
        StorageBackend::PostgreSQL(_) => Ok(Arc::new(PostgresSwarmRepository::new(require(pool)?))),
    }
}

/// Creates an AuditLogRepository implementation based on the configured backend
pub fn create_audit_log_repository(
    backend: &StorageBackend,
    pool: Option<PgPool>,
) -> Result<Arc<dyn AuditLogRepository>, RepositoryError> {
    match backend {
        StorageBackend::InMemory => Ok(Arc::new(InMemoryAuditLogRepository::new())),
        StorageBackend::PostgreSQL(_) => {
            Ok(Arc::new(PostgresAuditLogRepository::new(require(pool)?)))
        }
    }
}

fn require(pool: Option<PgPool>) -> Result<PgPool, RepositoryError> {
    pool.ok_or_else(|| {
        RepositoryError::Database(
            "PostgreSQL backend selected without a connection pool".to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::repository::PostgresConfig;

    #[tokio::test]
    async fn test_in_memory_backend_needs_no_pool() {
        let repos = create_repositories(&StorageBackend::InMemory, None).unwrap();
        assert!(repos.hosts.find_all().await.unwrap().is_empty());
        assert!(repos.swarms.find_all().await.unwrap().is_empty());
    }

    #[test]
    fn test_postgres_backend_requires_pool() {
        let backend = StorageBackend::PostgreSQL(PostgresConfig {
            connection_string: "postgres://localhost/qiflow".to_string(),
            max_connections: 5,
        });
        assert!(matches!(
            create_repositories(&backend, None),
            Err(RepositoryError::Database(_))
        ));
    }
}
