// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Update and ApiKey Repositories

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;

use crate::domain::agent::AgentId;
use crate::domain::api_key::{ApiKey, ApiKeyRole};
use crate::domain::repository::{ApiKeyRepository, RepositoryError, UpdateRepository};
use crate::domain::update::{UpdateId, UpdateRecord, UpdateStatus};

pub struct PostgresUpdateRepository {
    pool: PgPool,
}

impl PostgresUpdateRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn update_from_row(row: &sqlx::postgres::PgRow) -> UpdateRecord {
        let status_str: String = row.get("status");
        UpdateRecord {
            id: UpdateId(row.get("id")),
            agent_id: AgentId(row.get("agent_id")),
            target: row.get("target"),
            strategy: row.get("strategy"),
            status: UpdateStatus::parse(&status_str),
            log: row.get("log"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl UpdateRepository for PostgresUpdateRepository {
    async fn save(&self, update: &UpdateRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO updates (id, agent_id, target, strategy, status, log, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (id) DO UPDATE SET
                status = EXCLUDED.status,
                log = EXCLUDED.log,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(update.id.0)
        .bind(update.agent_id.0)
        .bind(&update.target)
        .bind(&update.strategy)
        .bind(update.status.as_str())
        .bind(&update.log)
        .bind(update.created_at)
        .bind(update.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save update: {}", e)))?;
        Ok(())
    }

    async fn find_by_id(&self, id: UpdateId) -> Result<Option<UpdateRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, agent_id, target, strategy, status, log, created_at, updated_at FROM updates WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(row.map(|row| Self::update_from_row(&row)))
    }

    async fn set_outcome(
        &self,
        id: UpdateId,
        status: UpdateStatus,
        log: &str,
    ) -> Result<(), RepositoryError> {
        sqlx::query("UPDATE updates SET status = $2, log = $3, updated_at = $4 WHERE id = $1")
            .bind(id.0)
            .bind(status.as_str())
            .bind(log)
            .bind(Utc::now())
            .execute(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;
        Ok(())
    }
}

pub struct PostgresApiKeyRepository {
    pool: PgPool,
}

impl PostgresApiKeyRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyRepository for PostgresApiKeyRepository {
    async fn save(&self, key: &ApiKey) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, name, token, role, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (id) DO UPDATE SET
                name = EXCLUDED.name,
                token = EXCLUDED.token,
                role = EXCLUDED.role
            "#,
        )
        .bind(key.id)
        .bind(&key.name)
        .bind(&key.token)
        .bind(key.role.as_str())
        .bind(key.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save api key: {}", e)))?;
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ApiKey>, RepositoryError> {
        let row = sqlx::query(
            "SELECT id, name, token, role, created_at FROM api_keys WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(|row| {
            let role_str: String = row.get("role");
            let role = ApiKeyRole::parse(&role_str).ok_or_else(|| {
                RepositoryError::Serialization(format!("Invalid api key role: {}", role_str))
            })?;
            Ok(ApiKey {
                id: row.get("id"),
                name: row.get("name"),
                token: row.get("token"),
                role,
                created_at: row.get("created_at"),
            })
        })
        .transpose()
    }
}
