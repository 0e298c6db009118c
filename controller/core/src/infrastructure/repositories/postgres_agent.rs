// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Agent Repository
//!
//! Production `AgentRepository` / `GroupRepository` implementations backed
//! by the `agents` and `agent_groups` tables via `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::{Agent, AgentGroup, AgentId, AgentStatus, GroupId};
use crate::domain::repository::{AgentRepository, GroupRepository, RepositoryError};

pub struct PostgresAgentRepository {
    pool: PgPool,
}

impl PostgresAgentRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn agent_from_row(row: &sqlx::postgres::PgRow) -> Result<Agent, RepositoryError> {
        let labels_val: serde_json::Value = row.get("labels");
        let labels = serde_json::from_value(labels_val)
            .map_err(|e| RepositoryError::Serialization(format!("Invalid labels map: {}", e)))?;
        let status_str: String = row.get("status");
        let group_id: Option<uuid::Uuid> = row.get("group_id");

        Ok(Agent {
            id: AgentId(row.get("id")),
            name: row.get("name"),
            base_url: row.get("base_url"),
            token: row.get("token"),
            default_cwd: row.get("default_cwd"),
            group_id: group_id.map(GroupId),
            labels,
            status: AgentStatus::parse(&status_str),
            last_seen: row.get("last_seen"),
            version: row.get("version"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

const AGENT_COLUMNS: &str = "id, name, base_url, token, default_cwd, group_id, labels, status, last_seen, version, created_at, updated_at";

#[async_trait]
impl AgentRepository for PostgresAgentRepository {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        let labels = serde_json::to_value(&agent.labels)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO agents (
                id, name, base_url, token, default_cwd, group_id, labels,
                status, last_seen, version, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                base_url = EXCLUDED.base_url,
                token = EXCLUDED.token,
                default_cwd = EXCLUDED.default_cwd,
                group_id = EXCLUDED.group_id,
                labels = EXCLUDED.labels,
                status = EXCLUDED.status,
                last_seen = EXCLUDED.last_seen,
                version = EXCLUDED.version,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(agent.id.0)
        .bind(&agent.name)
        .bind(&agent.base_url)
        .bind(&agent.token)
        .bind(&agent.default_cwd)
        .bind(agent.group_id.map(|g| g.0))
        .bind(labels)
        .bind(agent.status.as_str())
        .bind(agent.last_seen)
        .bind(&agent.version)
        .bind(agent.created_at)
        .bind(agent.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save agent: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM agents WHERE id = $1", AGENT_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(|row| Self::agent_from_row(&row)).transpose()
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Agent>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM agents WHERE name = $1",
            AGENT_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(|row| Self::agent_from_row(&row)).transpose()
    }

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM agents ORDER BY name ASC",
            AGENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::agent_from_row).collect()
    }

    async fn update_probe_result(
        &self,
        id: AgentId,
        status: AgentStatus,
        last_seen: Option<DateTime<Utc>>,
        version: Option<String>,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            UPDATE agents SET
                status = $2,
                last_seen = COALESCE($3, last_seen),
                version = COALESCE($4, version),
                updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id.0)
        .bind(status.as_str())
        .bind(last_seen)
        .bind(version)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: AgentId) -> Result<bool, RepositoryError> {
        let result = sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct PostgresGroupRepository {
    pool: PgPool,
}

impl PostgresGroupRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn group_from_row(row: &sqlx::postgres::PgRow) -> Result<AgentGroup, RepositoryError> {
        let labels_val: serde_json::Value = row.get("labels");
        let labels = serde_json::from_value(labels_val)
            .map_err(|e| RepositoryError::Serialization(format!("Invalid labels map: {}", e)))?;
        Ok(AgentGroup {
            id: GroupId(row.get("id")),
            name: row.get("name"),
            description: row.get("description"),
            labels,
            created_at: row.get("created_at"),
        })
    }
}

#[async_trait]
impl GroupRepository for PostgresGroupRepository {
    async fn save(&self, group: &AgentGroup) -> Result<(), RepositoryError> {
        let labels = serde_json::to_value(&group.labels)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO agent_groups (id, name, description, labels, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                description = EXCLUDED.description,
                labels = EXCLUDED.labels
            "#,
        )
        .bind(group.id.0)
        .bind(&group.name)
        .bind(&group.description)
        .bind(labels)
        .bind(group.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save group: {}", e)))?;
        Ok(())
    }

    async fn find_by_id(&self, id: GroupId) -> Result<Option<AgentGroup>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, description, labels, created_at FROM agent_groups WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(|row| Self::group_from_row(&row)).transpose()
    }

    async fn list_all(&self) -> Result<Vec<AgentGroup>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT id, name, description, labels, created_at FROM agent_groups ORDER BY name ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::group_from_row).collect()
    }
}
