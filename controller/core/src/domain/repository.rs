// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Repository Interfaces
//!
//! Persistence contracts for each aggregate root: interface defined in the
//! domain layer, implemented in `crate::infrastructure::repositories`.
//!
//! | Trait | Aggregate | Implementations |
//! |-------|-----------|----------------|
//! | `AgentRepository` | `Agent` / `AgentGroup` | `InMemoryAgentRepository`, `PostgresAgentRepository` |
//! | `ConfigRepository` | `ConfigObject` / `Assignment` | `InMemoryConfigRepository`, `PostgresConfigRepository` |
//! | `RunRepository` | `Run` / `RunLogLine` / `RunArtifact` | `InMemoryRunRepository`, `PostgresRunRepository` |
//! | `UpdateRepository` | `UpdateRecord` | `InMemoryUpdateRepository`, `PostgresUpdateRepository` |
//! | `ApiKeyRepository` | `ApiKey` | `InMemoryApiKeyRepository`, `PostgresApiKeyRepository` |
//!
//! In-memory implementations back the test suite; PostgreSQL implementations
//! are selected at controller startup.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::agent::{Agent, AgentGroup, AgentId, AgentStatus, GroupId};
use crate::domain::api_key::ApiKey;
use crate::domain::config::{Assignment, ConfigId, ConfigObject, ConfigScope};
use crate::domain::run::{Run, RunArtifact, RunId, RunLogLine, StreamKind};
use crate::domain::update::{UpdateId, UpdateRecord, UpdateStatus};

/// Repository interface for Agent aggregates.
#[async_trait]
pub trait AgentRepository: Send + Sync {
    /// Save agent (create or update, keyed by id).
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError>;

    async fn find_by_name(&self, name: &str) -> Result<Option<Agent>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError>;

    /// Health-monitor write path: status, last-seen and reported version
    /// only. Registry fields are untouched.
    async fn update_probe_result(
        &self,
        id: AgentId,
        status: AgentStatus,
        last_seen: Option<DateTime<Utc>>,
        version: Option<String>,
    ) -> Result<(), RepositoryError>;

    /// Delete agent by ID. Returns whether a row was actually removed, so
    /// callers can make removal idempotent without a prior lookup.
    async fn delete(&self, id: AgentId) -> Result<bool, RepositoryError>;
}

/// Repository interface for AgentGroup aggregates.
#[async_trait]
pub trait GroupRepository: Send + Sync {
    async fn save(&self, group: &AgentGroup) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: GroupId) -> Result<Option<AgentGroup>, RepositoryError>;

    async fn list_all(&self) -> Result<Vec<AgentGroup>, RepositoryError>;
}

/// Repository interface for scoped configuration rows and assignments.
#[async_trait]
pub trait ConfigRepository: Send + Sync {
    /// Insert a new immutable row carrying the next version for the exact
    /// `(scope, ref_id)` pair. Implementations must keep versions unique
    /// and gapless under concurrent creation.
    async fn insert_next_version(
        &self,
        scope: ConfigScope,
        ref_id: Uuid,
        name: Option<String>,
        document: Value,
    ) -> Result<ConfigObject, RepositoryError>;

    async fn find_by_id(&self, id: ConfigId) -> Result<Option<ConfigObject>, RepositoryError>;

    /// Highest-version row for the pair, if any.
    async fn latest_for(
        &self,
        scope: ConfigScope,
        ref_id: Uuid,
    ) -> Result<Option<ConfigObject>, RepositoryError>;

    /// Newest-first listing, optionally filtered by scope and/or ref.
    async fn list(
        &self,
        scope: Option<ConfigScope>,
        ref_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ConfigObject>, RepositoryError>;

    async fn save_assignment(&self, assignment: &Assignment) -> Result<(), RepositoryError>;

    /// Most recently created assignment for the agent, if any.
    async fn latest_assignment_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<Assignment>, RepositoryError>;

    /// Cascade path for agent removal. Returns the number of rows removed.
    async fn delete_assignments_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<u64, RepositoryError>;
}

/// Repository interface for run audit records and their output logs.
#[async_trait]
pub trait RunRepository: Send + Sync {
    /// Write the terminal run record. Called exactly once per run.
    async fn save(&self, run: &Run) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: RunId) -> Result<Option<Run>, RepositoryError>;

    async fn find_by_agent(
        &self,
        agent_id: AgentId,
        limit: i64,
    ) -> Result<Vec<Run>, RepositoryError>;

    /// Append one output fragment, allocating the next sequence number for
    /// the run. Returns the allocated sequence.
    async fn append_log(
        &self,
        run_id: RunId,
        stream: StreamKind,
        chunk: &str,
    ) -> Result<i64, RepositoryError>;

    /// Persisted replay: log lines with `seq > after`, in sequence order.
    async fn logs(&self, run_id: RunId, after: i64) -> Result<Vec<RunLogLine>, RepositoryError>;

    /// Run ids that have log lines but no terminal run record — streams the
    /// previous process never finished. Used by the startup reconciliation
    /// sweep.
    async fn orphaned_run_ids(&self) -> Result<Vec<RunId>, RepositoryError>;

    async fn save_artifact(&self, artifact: &RunArtifact) -> Result<(), RepositoryError>;

    async fn find_artifact(&self, id: Uuid) -> Result<Option<RunArtifact>, RepositoryError>;
}

/// Repository interface for advisory agent-update records.
#[async_trait]
pub trait UpdateRepository: Send + Sync {
    async fn save(&self, update: &UpdateRecord) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, id: UpdateId) -> Result<Option<UpdateRecord>, RepositoryError>;

    async fn set_outcome(
        &self,
        id: UpdateId,
        status: UpdateStatus,
        log: &str,
    ) -> Result<(), RepositoryError>;
}

/// Repository interface for stored API credentials.
#[async_trait]
pub trait ApiKeyRepository: Send + Sync {
    async fn save(&self, key: &ApiKey) -> Result<(), RepositoryError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<ApiKey>, RepositoryError>;
}

/// Repository errors
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("Row not found".to_string()),
            _ => RepositoryError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for RepositoryError {
    fn from(err: serde_json::Error) -> Self {
        RepositoryError::Serialization(err.to_string())
    }
}
