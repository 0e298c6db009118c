// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # PostgreSQL Connection Pool
//!
//! Wraps `sqlx::postgres::PgPool` in a thin `Database` newtype that can be
//! injected into all PostgreSQL repository implementations, and owns the
//! schema bootstrap run at controller startup.

use anyhow::Result;
use sqlx::postgres::{PgPool, PgPoolOptions};

#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS agent_groups (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        description TEXT,
        labels JSONB NOT NULL DEFAULT '{}'::jsonb,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS agents (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL UNIQUE,
        base_url TEXT NOT NULL,
        token TEXT NOT NULL,
        default_cwd TEXT,
        group_id UUID,
        labels JSONB NOT NULL DEFAULT '{}'::jsonb,
        status TEXT NOT NULL,
        last_seen TIMESTAMPTZ,
        version TEXT,
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_agents_status ON agents (status)",
    r#"
    CREATE TABLE IF NOT EXISTS configs (
        id UUID PRIMARY KEY,
        scope TEXT NOT NULL,
        ref_id UUID NOT NULL,
        version BIGINT NOT NULL,
        name TEXT,
        document JSONB NOT NULL,
        created_at TIMESTAMPTZ NOT NULL,
        UNIQUE (scope, ref_id, version)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_configs_scope_ref ON configs (scope, ref_id)",
    r#"
    CREATE TABLE IF NOT EXISTS assignments (
        id UUID PRIMARY KEY,
        agent_id UUID NOT NULL,
        config_id UUID NOT NULL,
        effective_version BIGINT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_assignments_agent ON assignments (agent_id, created_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS runs (
        id UUID PRIMARY KEY,
        agent_id UUID NOT NULL,
        requested_by TEXT NOT NULL,
        kind TEXT NOT NULL,
        command_hash TEXT NOT NULL,
        cwd TEXT,
        env_keys JSONB NOT NULL DEFAULT '{}'::jsonb,
        status TEXT NOT NULL,
        exit_code INTEGER NOT NULL,
        stdout_head TEXT NOT NULL DEFAULT '',
        stderr_head TEXT NOT NULL DEFAULT '',
        duration_ms BIGINT NOT NULL,
        remote_host TEXT,
        finished_at TIMESTAMPTZ NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_runs_agent ON runs (agent_id, finished_at DESC)",
    r#"
    CREATE TABLE IF NOT EXISTS run_logs (
        run_id UUID NOT NULL,
        seq BIGINT NOT NULL,
        stream TEXT NOT NULL,
        chunk TEXT NOT NULL,
        PRIMARY KEY (run_id, seq)
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS run_artifacts (
        id UUID PRIMARY KEY,
        run_id UUID,
        agent_id UUID NOT NULL,
        remote_path TEXT NOT NULL,
        size_bytes BIGINT NOT NULL,
        mime_type TEXT NOT NULL,
        sha256 TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS updates (
        id UUID PRIMARY KEY,
        agent_id UUID NOT NULL,
        target TEXT NOT NULL,
        strategy TEXT NOT NULL,
        status TEXT NOT NULL,
        log TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMPTZ NOT NULL,
        updated_at TIMESTAMPTZ NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS api_keys (
        id UUID PRIMARY KEY,
        name TEXT NOT NULL,
        token TEXT NOT NULL UNIQUE,
        role TEXT NOT NULL,
        created_at TIMESTAMPTZ NOT NULL
    )
    "#,
];

impl Database {
    pub async fn new(connection_string: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    /// Idempotent schema bootstrap, run once at startup.
    pub async fn migrate(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn get_pool(&self) -> &PgPool {
        &self.pool
    }
}
