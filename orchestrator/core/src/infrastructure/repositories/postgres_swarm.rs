// Copyright (c) 2026 QiFlow Team
// SPDX-License-Identifier: AGPL-3.0
//! Postgres Swarm
//!
//! PostgreSQL-backed swarm registry. Health metrics are stored as JSONB.
//!
//! # Architecture
//!
//! - **Layer:** Infrastructure Layer
//! - **Purpose:** Implements `SwarmRepository` over the `swarms` table

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::repository::{RepositoryError, SwarmRepository};
use crate::domain::swarm::{HealthMetrics, HealthUpdate, Swarm, SwarmId, SwarmStatus};

const SWARM_COLUMNS: &str = r#"
    swarm_id, name, host_url, status, health_status, active_agents,
    project_completion, last_seen, created_at, updated_at
"#;

pub struct PostgresSwarmRepository {
    pool: PgPool,
}

impl PostgresSwarmRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SwarmRepository for PostgresSwarmRepository {
    async fn find_by_id(&self, id: &SwarmId) -> Result<Option<Swarm>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM swarms WHERE swarm_id = $1", SWARM_COLUMNS))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(parse_swarm_row).transpose()
    }

    async fn find_all(&self) -> Result<Vec<Swarm>, RepositoryError> {
        let rows = sqlx::query(&format!("SELECT {} FROM swarms ORDER BY swarm_id", SWARM_COLUMNS))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.into_iter().map(parse_swarm_row).collect()
    }

    async fn create(&self, swarm: &Swarm) -> Result<(), RepositoryError> {
        let health_json = serde_json::to_value(swarm.health_status)?;

        sqlx::query(
            r#"
            INSERT INTO swarms (
                swarm_id, name, host_url, status, health_status, active_agents,
                project_completion, last_seen, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(swarm.swarm_id.as_str())
        .bind(&swarm.name)
        .bind(&swarm.host_url)
        .bind(swarm.status.as_str())
        .bind(health_json)
        .bind(swarm.active_agents as i32)
        .bind(swarm.project_completion)
        .bind(swarm.last_seen)
        .bind(swarm.created_at)
        .bind(swarm.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn update(&self, swarm: &Swarm) -> Result<(), RepositoryError> {
        let health_json = serde_json::to_value(swarm.health_status)?;

        let result = sqlx::query(
            r#"
            UPDATE swarms SET
                name = $2, host_url = $3, status = $4, health_status = $5,
                active_agents = $6, project_completion = $7, last_seen = $8,
                updated_at = NOW()
            WHERE swarm_id = $1
            "#,
        )
        .bind(swarm.swarm_id.as_str())
        .bind(&swarm.name)
        .bind(&swarm.host_url)
        .bind(swarm.status.as_str())
        .bind(health_json)
        .bind(swarm.active_agents as i32)
        .bind(swarm.project_completion)
        .bind(swarm.last_seen)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to update swarm: {}", e)))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Swarm {} not found", swarm.swarm_id)));
        }
        Ok(())
    }

    async fn delete(&self, id: &SwarmId) -> Result<(), RepositoryError> {
        let result = sqlx::query("DELETE FROM swarms WHERE swarm_id = $1")
            .bind(id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Swarm {} not found", id)));
        }
        Ok(())
    }

    async fn update_health(
        &self,
        id: &SwarmId,
        update: &HealthUpdate,
    ) -> Result<(), RepositoryError> {
        let health_json = update.metrics.map(serde_json::to_value).transpose()?;

        // COALESCE keeps the previous value for every field the poll did not produce.
        let result = sqlx::query(
            r#"
            UPDATE swarms SET
                status = $2,
                health_status = COALESCE($3, health_status),
                active_agents = COALESCE($4, active_agents),
                project_completion = COALESCE($5, project_completion),
                last_seen = COALESCE($6, last_seen),
                updated_at = NOW()
            WHERE swarm_id = $1
            "#,
        )
        .bind(id.as_str())
        .bind(update.status.as_str())
        .bind(health_json)
        .bind(update.active_agents.map(|a| a as i32))
        .bind(update.project_completion)
        .bind(update.seen_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Swarm {} not found", id)));
        }
        Ok(())
    }

    async fn update_status(
        &self,
        id: &SwarmId,
        status: SwarmStatus,
    ) -> Result<(), RepositoryError> {
        let result = sqlx::query(
            "UPDATE swarms SET status = $2, updated_at = NOW() WHERE swarm_id = $1",
        )
        .bind(id.as_str())
        .bind(status.as_str())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("Swarm {} not found", id)));
        }
        Ok(())
    }
}

fn parse_swarm_row(row: sqlx::postgres::PgRow) -> Result<Swarm, RepositoryError> {
    let swarm_id: String = row.get("swarm_id");
    let status: String = row.get("status");
    let health_val: serde_json::Value = row.get("health_status");
    let active_agents: i32 = row.get("active_agents");

    let health_status: HealthMetrics = serde_json::from_value(health_val).map_err(|e| {
        RepositoryError::Serialization(format!("Failed to deserialize health_status: {}", e))
    })?;
    let status: SwarmStatus = status.parse().map_err(RepositoryError::Serialization)?;

    Ok(Swarm {
        swarm_id: SwarmId(swarm_id),
        name: row.get("name"),
        host_url: row.get("host_url"),
        status,
        health_status,
        active_agents: active_agents.max(0) as u32,
        project_completion: row.get("project_completion"),
        last_seen: row.get("last_seen"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}
