// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Run Repository
//!
//! Terminal run records, append-only run logs and content-addressed
//! artifacts. Log sequence allocation happens inside the insert statement
//! so the store serializes it per run id under the `(run_id, seq)` primary
//! key.

use async_trait::async_trait;
use sqlx::postgres::PgPool;
use sqlx::Row;
use uuid::Uuid;

use crate::domain::agent::AgentId;
use crate::domain::repository::{RepositoryError, RunRepository};
use crate::domain::run::{Run, RunArtifact, RunId, RunKind, RunLogLine, RunStatus, StreamKind};

const LOG_APPEND_RETRIES: u32 = 8;

pub struct PostgresRunRepository {
    pool: PgPool,
}

impl PostgresRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn run_from_row(row: &sqlx::postgres::PgRow) -> Result<Run, RepositoryError> {
        let kind_str: String = row.get("kind");
        let kind = RunKind::parse(&kind_str)
            .ok_or_else(|| RepositoryError::Serialization(format!("Invalid run kind: {}", kind_str)))?;
        let status_str: String = row.get("status");
        let env_val: serde_json::Value = row.get("env_keys");
        let env_keys = serde_json::from_value(env_val)
            .map_err(|e| RepositoryError::Serialization(format!("Invalid env map: {}", e)))?;

        Ok(Run {
            id: RunId(row.get("id")),
            agent_id: AgentId(row.get("agent_id")),
            requested_by: row.get("requested_by"),
            kind,
            command_hash: row.get("command_hash"),
            cwd: row.get("cwd"),
            env_keys,
            status: RunStatus::parse(&status_str),
            exit_code: row.get("exit_code"),
            stdout_head: row.get("stdout_head"),
            stderr_head: row.get("stderr_head"),
            duration_ms: row.get("duration_ms"),
            remote_host: row.get("remote_host"),
            finished_at: row.get("finished_at"),
        })
    }

    fn is_unique_violation(err: &sqlx::Error) -> bool {
        matches!(
            err,
            sqlx::Error::Database(db) if db.code().as_deref() == Some("23505")
        )
    }
}

const RUN_COLUMNS: &str = "id, agent_id, requested_by, kind, command_hash, cwd, env_keys, status, exit_code, stdout_head, stderr_head, duration_ms, remote_host, finished_at";

#[async_trait]
impl RunRepository for PostgresRunRepository {
    async fn save(&self, run: &Run) -> Result<(), RepositoryError> {
        let env_keys = serde_json::to_value(&run.env_keys)
            .map_err(|e| RepositoryError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO runs (
                id, agent_id, requested_by, kind, command_hash, cwd, env_keys,
                status, exit_code, stdout_head, stderr_head, duration_ms,
                remote_host, finished_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(run.id.0)
        .bind(run.agent_id.0)
        .bind(&run.requested_by)
        .bind(run.kind.as_str())
        .bind(&run.command_hash)
        .bind(&run.cwd)
        .bind(env_keys)
        .bind(run.status.as_str())
        .bind(run.exit_code)
        .bind(&run.stdout_head)
        .bind(&run.stderr_head)
        .bind(run.duration_ms)
        .bind(&run.remote_host)
        .bind(run.finished_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save run: {}", e)))?;

        Ok(())
    }

    async fn find_by_id(&self, id: RunId) -> Result<Option<Run>, RepositoryError> {
        let row = sqlx::query(&format!("SELECT {} FROM runs WHERE id = $1", RUN_COLUMNS))
            .bind(id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| RepositoryError::Database(e.to_string()))?;

        row.map(|row| Self::run_from_row(&row)).transpose()
    }

    async fn find_by_agent(
        &self,
        agent_id: AgentId,
        limit: i64,
    ) -> Result<Vec<Run>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM runs WHERE agent_id = $1 ORDER BY finished_at DESC LIMIT $2",
            RUN_COLUMNS
        ))
        .bind(agent_id.0)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        rows.iter().map(Self::run_from_row).collect()
    }

    async fn append_log(
        &self,
        run_id: RunId,
        stream: StreamKind,
        chunk: &str,
    ) -> Result<i64, RepositoryError> {
        for _ in 0..LOG_APPEND_RETRIES {
            let result = sqlx::query(
                r#"
                INSERT INTO run_logs (run_id, seq, stream, chunk)
                SELECT $1, COALESCE(MAX(seq), 0) + 1, $2, $3
                FROM run_logs WHERE run_id = $1
                RETURNING seq
                "#,
            )
            .bind(run_id.0)
            .bind(stream.as_str())
            .bind(chunk)
            .fetch_one(&self.pool)
            .await;

            match result {
                Ok(row) => return Ok(row.get("seq")),
                Err(e) if Self::is_unique_violation(&e) => continue,
                Err(e) => return Err(RepositoryError::Database(e.to_string())),
            }
        }
        Err(RepositoryError::Conflict(format!(
            "Log sequence allocation for run {} kept colliding",
            run_id
        )))
    }

    async fn logs(&self, run_id: RunId, after: i64) -> Result<Vec<RunLogLine>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT run_id, seq, stream, chunk
            FROM run_logs
            WHERE run_id = $1 AND seq > $2
            ORDER BY seq ASC
            "#,
        )
        .bind(run_id.0)
        .bind(after)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(rows
            .iter()
            .map(|row| {
                let stream_str: String = row.get("stream");
                RunLogLine {
                    run_id: RunId(row.get("run_id")),
                    seq: row.get("seq"),
                    stream: StreamKind::parse(&stream_str),
                    chunk: row.get("chunk"),
                }
            })
            .collect())
    }

    async fn orphaned_run_ids(&self) -> Result<Vec<RunId>, RepositoryError> {
        let rows = sqlx::query(
            r#"
            SELECT DISTINCT l.run_id
            FROM run_logs l
            LEFT JOIN runs r ON r.id = l.run_id
            WHERE r.id IS NULL
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(rows.iter().map(|row| RunId(row.get("run_id"))).collect())
    }

    async fn save_artifact(&self, artifact: &RunArtifact) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO run_artifacts (
                id, run_id, agent_id, remote_path, size_bytes, mime_type, sha256, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(artifact.id)
        .bind(artifact.run_id.map(|r| r.0))
        .bind(artifact.agent_id.0)
        .bind(&artifact.remote_path)
        .bind(artifact.size_bytes)
        .bind(&artifact.mime_type)
        .bind(&artifact.sha256)
        .bind(artifact.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(format!("Failed to save artifact: {}", e)))?;
        Ok(())
    }

    async fn find_artifact(&self, id: Uuid) -> Result<Option<RunArtifact>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, run_id, agent_id, remote_path, size_bytes, mime_type, sha256, created_at
            FROM run_artifacts WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| RepositoryError::Database(e.to_string()))?;

        Ok(row.map(|row| {
            let run_id: Option<Uuid> = row.get("run_id");
            RunArtifact {
                id: row.get("id"),
                run_id: run_id.map(RunId),
                agent_id: AgentId(row.get("agent_id")),
                remote_path: row.get("remote_path"),
                size_bytes: row.get("size_bytes"),
                mime_type: row.get("mime_type"),
                sha256: row.get("sha256"),
                created_at: row.get("created_at"),
            }
        }))
    }
}
