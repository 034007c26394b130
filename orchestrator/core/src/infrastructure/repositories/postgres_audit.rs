// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::audit::{CommandAuditLogEntry, ControlAuditEntry};
use crate::domain::host::HostId;
use crate::domain::repository::{AuditLogRepository, RepositoryError};
use crate::domain::swarm::SwarmId;

/// Append-only audit trail in `command_audit_logs` and `control_audit_logs`.
pub struct PostgresAuditLogRepository {
    pool: PgPool,
}

impl PostgresAuditLogRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditLogRepository for PostgresAuditLogRepository {
    async fn create_audit_log(&self, entry: &CommandAuditLogEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO command_audit_logs (
                id, host_id, command, executed_by, exit_code, output,
                error, duration_ms, success, timestamp
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(entry.id)
        .bind(entry.host_id.as_str())
        .bind(&entry.command)
        .bind(&entry.executed_by)
        .bind(entry.exit_code)
        .bind(&entry.output)
        .bind(&entry.error)
        .bind(entry.duration_ms as i64)
        .bind(entry.success)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to write audit log: {}", e)))?;

        Ok(())
    }

    async fn get_audit_logs(
        &self,
        host_id: &HostId,
        limit: usize,
    ) -> Result<Vec<CommandAuditLogEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, host_id, command, executed_by, exit_code, output,
                   error, duration_ms, success, timestamp
            FROM command_audit_logs
            WHERE host_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(host_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| {
                let duration_ms: i64 = row.get("duration_ms");
                CommandAuditLogEntry {
                    id: row.get("id"),
                    host_id: HostId(row.get("host_id")),
                    command: row.get("command"),
                    executed_by: row.get("executed_by"),
                    exit_code: row.get("exit_code"),
                    output: row.get("output"),
                    error: row.get("error"),
                    duration_ms: duration_ms.max(0) as u64,
                    success: row.get("success"),
                    timestamp: row.get("timestamp"),
                }
            })
            .collect())
    }

    async fn create_control_audit(&self, entry: &ControlAuditEntry) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO control_audit_logs (id, swarm_id, action, executed_by, parameters, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.id)
        .bind(entry.swarm_id.as_str())
        .bind(&entry.action)
        .bind(&entry.executed_by)
        .bind(&entry.parameters)
        .bind(entry.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to write control audit: {}", e)))?;

        Ok(())
    }

    async fn get_control_audit(
        &self,
        swarm_id: &SwarmId,
        limit: usize,
    ) -> Result<Vec<ControlAuditEntry>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, swarm_id, action, executed_by, parameters, timestamp
            FROM control_audit_logs
            WHERE swarm_id = $1
            ORDER BY timestamp DESC
            LIMIT $2
            "#,
        )
        .bind(swarm_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|row| ControlAuditEntry {
                id: row.get("id"),
                swarm_id: SwarmId(row.get("swarm_id")),
                action: row.get("action"),
                executed_by: row.get("executed_by"),
                parameters: row.get("parameters"),
                timestamp: row.get("timestamp"),
            })
            .collect())
    }
}
