// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Host
//!
//! PostgreSQL-backed host registry.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `HostRepository` over the `hosts` table

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::host::{Host, HostAuth, HostId, HostStatus, OsType};
use crate::domain::repository::{HostRepository, RepositoryError};

const HOST_COLUMNS: &str = r#"
    host_id, hostname, port, username, os_type, auth,
    capacity_max_swarms, current_swarms, status, last_seen,
    created_at, updated_at
"#;

pub struct PostgresHostRepository {
    pool: PgPool,
}

impl PostgresHostRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl HostRepository for PostgresHostRepository {
    async fn find_by_id(&self, id: &HostId) -> Result<Option<Host>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM hosts WHERE host_id = $1", HOST_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(parse_host_row).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Host>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {} FROM hosts ORDER BY host_id", HOST_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.into_iter().map(parse_host_row).collect()
    }

    async fn create(&self, host: &Host) -> Result<(), RepositoryError> {
        let auth_json = serde_json::to_value(&host.auth)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO hosts (
                host_id, hostname, port, username, os_type, auth,
                capacity_max_swarms, current_swarms, status, last_seen,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(host.host_id.as_str())
        .bind(&host.hostname)
        .bind(host.port as i32)
        .bind(&host.username)
        .bind(host.os_type.as_str())
        .bind(auth_json)
        .bind(host.capacity_max_swarms as i32)
        .bind(host.current_swarms as i32)
        .bind(host.status.as_str())
        .bind(host.last_seen)
        .bind(host.created_at)
        .bind(host.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, host: &Host) -> Result<(), RepositoryError> {
        let auth_json = serde_json::to_value(&host.auth)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        let result = sqlx::query(
            r#"
            UPDATE hosts SET
                hostname = $2, port = $3, username = $4, os_type = $5, auth = $6,
                capacity_max_swarms = $7, current_swarms = $8, status = $9,
                last_seen = $10, updated_at = NOW()
            WHERE host_id = $1
            "#,
        )
        .bind(host.host_id.as_str())
        .bind(&host.hostname)
        .bind(host.port as i32)
        .bind(&host.username)
        .bind(host.os_type.as_str())
        .bind(auth_json)
        .bind(host.capacity_max_swarms as i32)
        .bind(host.current_swarms as i32)
        .bind(host.status.as_str())
        .bind(host.last_seen)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to update host: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Host {} not found", host.host_id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &HostId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM hosts WHERE host_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Host {} not found", id)));
        }
        Ok(())
    }

    async fn update_last_seen(
        &self,
        id: &HostId,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE hosts SET last_seen = $2, updated_at = NOW() WHERE host_id = $1",
        )
        .bind(id.as_str())
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Host {} not found", id)));
        }
        Ok(())
    }

    async fn update_status(&self, id: &HostId, status: HostStatus) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE hosts SET status = $2, updated_at = NOW() WHERE host_id = $1",
        )
        .bind(id.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Host {} not found", id)));
        }
        Ok(())
    }
}

fn parse_host_row(row: sqlx::postgres::PgRow) -> Result<Host, RepositoryError> {
    let host_id: String = row.get("host_id");
    let port: i32 = row.get("port");
    let os_type: String = row.get("os_type");
    let auth_val: serde_json::Value = row.get("auth");
    let capacity: i32 = row.get("capacity_max_swarms");
    let current: i32 = row.get("current_swarms");
    let status: String = row.get("status");

    let auth: HostAuth = serde_json::from_value(auth_val)
        .map_err(|e| RepositoryError::Serialization(format!("Failed to deserialize auth: {}", e)))?;
    let os_type: OsType = os_type.parse().map_err(RepositoryError::Serialization)?;
    let status: HostStatus = status.parse().map_err(RepositoryError::Serialization)?;

    Ok(Host {
        host_id: HostId(host_id),
        hostname: row.get("hostname"),
        port: u16::try_from(port)
            .map_err(|_| RepositoryError::Serialization(format!("port out of range: {}", port)))?,
        username: row.get("username"),
        os_type,
        auth,
        capacity_max_swarms: capacity.max(0) as u32,
        current_swarms: current.max(0) as u32,
        status,
        last_seen: row.get("last_seen"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
