// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Config Repository
//!
//! Configuration rows are immutable and versioned per `(scope, ref_id)`.
//! Version allocation inserts `COALESCE(MAX(version),0)+1` in a single
//! statement under the table's `(scope, ref_id, version)` unique
//! constraint; a concurrent writer that loses the race hits the constraint
//! and the insert is retried with a fresh allocation.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::config::{Assignment, ConfigId, ConfigObject, ConfigScope};
use crate::domain::repository::{ConfigRepository, RepositoryError};

const VERSION_INSERT_RETRIES: u32 = 8;

pub struct PostgresConfigRepository {
    pool: PgPool,
}

impl PostgresConfigRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn config_from_row(row: &sqlx::postgres::PgRow) -> Result<ConfigObject, RepositoryError> {
        let scope_str: String = row.get("scope");
        let scope = ConfigScope::parse(&scope_str)
            .ok_or_else(|| RepositoryError::Serialization(format!("Invalid scope: {}", scope_str)))?;
        Ok(ConfigObject {
            id: ConfigId(row.get("id")),
            scope,
            ref_id: row.get("ref_id"),
            version: row.get("version"),
            name: row.get("name"),
            document: row.get("document"),
            created_at: row.get("created_at"),
        })
    }

    fn assignment_from_row(row: &sqlx::postgres::PgRow) -> Assignment {
        Assignment {
            id: row.get("id"),
            agent_id: AgentId(row.get("agent_id")),
            config_id: ConfigId(row.get("config_id")),
            effective_version: row.get("effective_version"),
            created_at: row.get("created_at"),
        }
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(
            err,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
        )
    }
}

#[async_trait]
impl ConfigRepository for PostgresConfigRepository {
    async fn insert_next_version(
        &self,
        scope: ConfigScope,
        ref_id: Uuid,
        name: Option<String>,
        document: Value,
    ) -> Result<ConfigObject, RepositoryError> {
        for _ in 0..VERSION_INSERT_RETRIES {
            let id = ConfigId::new();
            let created_at = Utc::now();
            let result = sqlx::query(
                r#"
                INSERT INTO configs (id, scope, ref_id, version, name, document, created_at)
                SELECT $1, $2, $3, COALESCE(MAX(version), 0) + 1, $4, $5, $6
                FROM configs WHERE scope = $2 AND ref_id = $3
                RETURNING version
                "#,
            )
            .bind(id.0)
            .bind(scope.as_str())
            .bind(ref_id)
            .bind(&name)
            .bind(&document)
            .bind(created_at)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(row) => {
                    return Ok(ConfigObject {
                        id,
                        scope,
                        ref_id,
                        version: row.get("version"),
                        name,
                        document,
                        created_at,
                    });
                }
                Err(e) if Self::is_unique_violation(&e) => continue,
                Err(e) => return Err(RepositoryError::Database(e.to_string())),
            }
        }
        Err(RepositoryError::Conflict(format!(
            "Version allocation for ({}, {}) kept colliding",
            scope, ref_id
        )))
    }

    async fn find_by_id(&self, id: ConfigId) -> Result<Option<ConfigObject>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, scope, ref_id, version, name, document, created_at FROM configs WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(|row| Self::config_from_row(&row)).transpose()
    }

    async fn latest_for(
        &self,
        scope: ConfigScope,
        ref_id: Uuid,
    ) -> Result<Option<ConfigObject>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, scope, ref_id, version, name, document, created_at
            FROM configs
            WHERE scope = $1 AND ref_id = $2
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(scope.as_str())
        .bind(ref_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(|row| Self::config_from_row(&row)).transpose()
    }

    async fn list(
        &self,
        scope: Option<ConfigScope>,
        ref_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ConfigObject>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT id, scope, ref_id, version, name, document, created_at
            FROM configs
            WHERE ($1::text IS NULL OR scope = $1)
              AND ($2::uuid IS NULL OR ref_id = $2)
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(scope.map(|s| s.as_str()))
        .bind(ref_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::config_from_row).collect()
    }

    async fn save_assignment(&self, assignment: &Assignment) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO assignments (id, agent_id, config_id, effective_version, created_at)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(assignment.id)
        .bind(assignment.agent_id.0)
        .bind(assignment.config_id.0)
        .bind(assignment.effective_version)
        .bind(assignment.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save assignment: {}", e)))?;
        Ok(())
    }

    async fn latest_assignment_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<Assignment>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, agent_id, config_id, effective_version, created_at
            FROM assignments
            WHERE agent_id = $1
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(agent_id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(row.map(|row| Self::assignment_from_row(&row)))
    }

    async fn delete_assignments_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM assignments WHERE agent_id = $1")
            .bind(agent_id.0)
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(result.rows_affected())
    }
}
