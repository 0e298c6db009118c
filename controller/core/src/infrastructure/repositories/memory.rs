// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # In-Memory Repositories
//!
//! Development and test implementations of every repository trait. All
//! mutation goes through a single `RwLock` write guard per repository, so
//! the per-key ordering invariants (config versions, run-log sequences)
//! hold under concurrent callers by serialization.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::agent::{Agent, AgentGroup, AgentId, AgentStatus, GroupId};
use crate::domain::api_key::ApiKey;
use crate::domain::config::{Assignment, ConfigId, ConfigObject, ConfigScope};
use crate::domain::repository::{
    AgentRepository, ApiKeyRepository, ConfigRepository, GroupRepository, RepositoryError,
    RunRepository, UpdateRepository,
};
use crate::domain::run::{Run, RunArtifact, RunId, RunLogLine, StreamKind};
use crate::domain::update::{UpdateId, UpdateRecord, UpdateStatus};

#[derive(Default)]
pub struct InMemoryAgentRepository {
    agents: RwLock<HashMap<AgentId, Agent>>,
}

impl InMemoryAgentRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl AgentRepository for InMemoryAgentRepository {
    async fn save(&self, agent: &Agent) -> Result<(), RepositoryError> {
        self.agents.write().await.insert(agent.id, agent.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: AgentId) -> Result<Option<Agent>, RepositoryError> {
        Ok(self.agents.read().await.get(&id).cloned())
    }

    async fn find_by_name(&self, name: &str) -> Result<Option<Agent>, RepositoryError> {
        Ok(self
            .agents
            .read()
            .await
            .values()
            .find(|a| a.name == name)
            .cloned())
    }

    async fn list_all(&self) -> Result<Vec<Agent>, RepositoryError> {
        let mut agents: Vec<Agent> = self.agents.read().await.values().cloned().collect();
        agents.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(agents)
    }

    async fn update_probe_result(
        &self,
        id: AgentId,
        status: AgentStatus,
        last_seen: Option<DateTime<Utc>>,
        version: Option<String>,
    ) -> Result<(), RepositoryError> {
        let mut agents = self.agents.write().await;
        let agent = agents
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("agent {}", id)))?;
        agent.status = status;
        if let Some(seen) = last_seen {
            agent.last_seen = Some(seen);
        }
        if let Some(version) = version {
            agent.version = Some(version);
        }
        Ok(())
    }

    async fn delete(&self, id: AgentId) -> Result<bool, RepositoryError> {
        Ok(self.agents.write().await.remove(&id).is_some())
    }
}

#[derive(Default)]
pub struct InMemoryGroupRepository {
    groups: RwLock<HashMap<GroupId, AgentGroup>>,
}

impl InMemoryGroupRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GroupRepository for InMemoryGroupRepository {
    async fn save(&self, group: &AgentGroup) -> Result<(), RepositoryError> {
        self.groups.write().await.insert(group.id, group.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: GroupId) -> Result<Option<AgentGroup>, RepositoryError> {
        Ok(self.groups.read().await.get(&id).cloned())
    }

    async fn list_all(&self) -> Result<Vec<AgentGroup>, RepositoryError> {
        let mut groups: Vec<AgentGroup> = self.groups.read().await.values().cloned().collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(groups)
    }
}

#[derive(Default)]
struct ConfigState {
    configs: Vec<ConfigObject>,
    assignments: Vec<Assignment>,
}

#[derive(Default)]
pub struct InMemoryConfigRepository {
    state: RwLock<ConfigState>,
}

impl InMemoryConfigRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConfigRepository for InMemoryConfigRepository {
    async fn insert_next_version(
        &self,
        scope: ConfigScope,
        ref_id: Uuid,
        name: Option<String>,
        document: Value,
    ) -> Result<ConfigObject, RepositoryError> {
        // The write guard serializes allocation, so read-max-plus-one is
        // safe here; the PostgreSQL implementation needs the constraint
        // and retry instead.
        let mut state = self.state.write().await;
        let next = state
            .configs
            .iter()
            .filter(|c| c.scope == scope && c.ref_id == ref_id)
            .map(|c| c.version)
            .max()
            .unwrap_or(0)
            + 1;
        let config = ConfigObject {
            id: ConfigId::new(),
            scope,
            ref_id,
            version: next,
            name,
            document,
            created_at: Utc::now(),
        };
        state.configs.push(config.clone());
        Ok(config)
    }

    async fn find_by_id(&self, id: ConfigId) -> Result<Option<ConfigObject>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .configs
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn latest_for(
        &self,
        scope: ConfigScope,
        ref_id: Uuid,
    ) -> Result<Option<ConfigObject>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .configs
            .iter()
            .filter(|c| c.scope == scope && c.ref_id == ref_id)
            .max_by_key(|c| c.version)
            .cloned())
    }

    async fn list(
        &self,
        scope: Option<ConfigScope>,
        ref_id: Option<Uuid>,
        limit: i64,
    ) -> Result<Vec<ConfigObject>, RepositoryError> {
        let state = self.state.read().await;
        let mut configs: Vec<ConfigObject> = state
            .configs
            .iter()
            .filter(|c| scope.map_or(true, |s| c.scope == s))
            .filter(|c| ref_id.map_or(true, |r| c.ref_id == r))
            .cloned()
            .collect();
        configs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        configs.truncate(limit.max(0) as usize);
        Ok(configs)
    }

    async fn save_assignment(&self, assignment: &Assignment) -> Result<(), RepositoryError> {
        self.state
            .write()
            .await
            .assignments
            .push(assignment.clone());
        Ok(())
    }

    async fn latest_assignment_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<Option<Assignment>, RepositoryError> {
        Ok(self
            .state
            .read()
            .await
            .assignments
            .iter()
            .filter(|a| a.agent_id == agent_id)
            .max_by_key(|a| a.created_at)
            .cloned())
    }

    async fn delete_assignments_for_agent(
        &self,
        agent_id: AgentId,
    ) -> Result<u64, RepositoryError> {
        let mut state = self.state.write().await;
        let before = state.assignments.len();
        state.assignments.retain(|a| a.agent_id != agent_id);
        Ok((before - state.assignments.len()) as u64)
    }
}

#[derive(Default)]
struct RunState {
    runs: HashMap<RunId, Run>,
    logs: Vec<RunLogLine>,
    artifacts: HashMap<Uuid, RunArtifact>,
}

#[derive(Default)]
pub struct InMemoryRunRepository {
    state: RwLock<RunState>,
}

impl InMemoryRunRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunRepository for InMemoryRunRepository {
    async fn save(&self, run: &Run) -> Result<(), RepositoryError> {
        self.state.write().await.runs.insert(run.id, run.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: RunId) -> Result<Option<Run>, RepositoryError> {
        Ok(self.state.read().await.runs.get(&id).cloned())
    }

    async fn find_by_agent(
        &self,
        agent_id: AgentId,
        limit: i64,
    ) -> Result<Vec<Run>, RepositoryError> {
        let state = self.state.read().await;
        let mut runs: Vec<Run> = state
            .runs
            .values()
            .filter(|r| r.agent_id == agent_id)
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        runs.truncate(limit.max(0) as usize);
        Ok(runs)
    }

    async fn append_log(
        &self,
        run_id: RunId,
        stream: StreamKind,
        chunk: &str,
    ) -> Result<i64, RepositoryError> {
        let mut state = self.state.write().await;
        let seq = state
            .logs
            .iter()
            .filter(|l| l.run_id == run_id)
            .map(|l| l.seq)
            .max()
            .unwrap_or(0)
            + 1;
        state.logs.push(RunLogLine {
            run_id,
            seq,
            stream,
            chunk: chunk.to_string(),
        });
        Ok(seq)
    }

    async fn logs(&self, run_id: RunId, after: i64) -> Result<Vec<RunLogLine>, RepositoryError> {
        let state = self.state.read().await;
        let mut lines: Vec<RunLogLine> = state
            .logs
            .iter()
            .filter(|l| l.run_id == run_id && l.seq > after)
            .cloned()
            .collect();
        lines.sort_by_key(|l| l.seq);
        Ok(lines)
    }

    async fn orphaned_run_ids(&self) -> Result<Vec<RunId>, RepositoryError> {
        let state = self.state.read().await;
        let mut ids: Vec<RunId> = state
            .logs
            .iter()
            .map(|l| l.run_id)
            .filter(|id| !state.runs.contains_key(id))
            .collect();
        ids.sort_by_key(|id| id.0);
        ids.dedup();
        Ok(ids)
    }

    async fn save_artifact(&self, artifact: &RunArtifact) -> Result<(), RepositoryError> {
        self.state
            .write()
            .await
            .artifacts
            .insert(artifact.id, artifact.clone());
        Ok(())
    }

    async fn find_artifact(&self, id: Uuid) -> Result<Option<RunArtifact>, RepositoryError> {
        Ok(self.state.read().await.artifacts.get(&id).cloned())
    }
}

#[derive(Default)]
pub struct InMemoryUpdateRepository {
    updates: RwLock<HashMap<UpdateId, UpdateRecord>>,
}

impl InMemoryUpdateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UpdateRepository for InMemoryUpdateRepository {
    async fn save(&self, update: &UpdateRecord) -> Result<(), RepositoryError> {
        self.updates.write().await.insert(update.id, update.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: UpdateId) -> Result<Option<UpdateRecord>, RepositoryError> {
        Ok(self.updates.read().await.get(&id).cloned())
    }

    async fn set_outcome(
        &self,
        id: UpdateId,
        status: UpdateStatus,
        log: &str,
    ) -> Result<(), RepositoryError> {
        let mut updates = self.updates.write().await;
        let update = updates
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("update {}", id)))?;
        update.status = status;
        update.log = log.to_string();
        update.updated_at = Utc::now();
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryApiKeyRepository {
    keys: RwLock<Vec<ApiKey>>,
}

impl InMemoryApiKeyRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ApiKeyRepository for InMemoryApiKeyRepository {
    async fn save(&self, key: &ApiKey) -> Result<(), RepositoryError> {
        self.keys.write().await.push(key.clone());
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ApiKey>, RepositoryError> {
        Ok(self
            .keys
            .read()
            .await
            .iter()
            .find(|k| k.token == token)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn config_versions_are_gapless_under_concurrent_creation() {
        let repo = std::sync::Arc::new(InMemoryConfigRepository::new());
        let ref_id = Uuid::new_v4();
        let n = 16;

        let mut handles = Vec::new();
        for i in 0..n {
            let repo = repo.clone();
            handles.push(tokio::spawn(async move {
                repo.insert_next_version(ConfigScope::Agent, ref_id, None, json!({"i": i}))
                    .await
                    .map(|c| c.version)
            }));
        }

        let mut versions = Vec::new();
        for handle in handles {
            versions.push(handle.await.unwrap().unwrap());
        }
        versions.sort_unstable();
        assert_eq!(versions, (1..=n as i64).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn run_log_sequences_start_at_one_with_no_gaps() {
        let repo = InMemoryRunRepository::new();
        let run_id = RunId::new();
        for i in 1..=5 {
            let seq = repo
                .append_log(run_id, StreamKind::Stdout, &format!("chunk {}", i))
                .await
                .unwrap();
            assert_eq!(seq, i);
        }
        let lines = repo.logs(run_id, 2).await.unwrap();
        assert_eq!(lines.iter().map(|l| l.seq).collect::<Vec<_>>(), vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn orphaned_runs_are_log_ids_without_terminal_records() {
        let repo = InMemoryRunRepository::new();
        let orphan = RunId::new();
        repo.append_log(orphan, StreamKind::Stdout, "left behind")
            .await
            .unwrap();

        let finished = RunId::new();
        repo.append_log(finished, StreamKind::Stdout, "done").await.unwrap();
        repo.save(&Run {
            id: finished,
            agent_id: AgentId::new(),
            requested_by: "test".to_string(),
            kind: crate::domain::run::RunKind::Bash,
            command_hash: String::new(),
            cwd: None,
            env_keys: HashMap::new(),
            status: crate::domain::run::RunStatus::Ok,
            exit_code: 0,
            stdout_head: String::new(),
            stderr_head: String::new(),
            duration_ms: 1,
            remote_host: None,
            finished_at: Utc::now(),
        })
        .await
        .unwrap();

        assert_eq!(repo.orphaned_run_ids().await.unwrap(), vec![orphan]);
    }
}
