// Agent Registry - CRUD and self-registration for runner daemons
//
// Owns agent identity, credentials and registry fields. Status and
// last-seen belong to the health monitor; the registry only seeds them.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::application::ServiceError;
use crate::domain::agent::{Agent, AgentId, AgentStatus, AgentSummary, GroupId, RedactedAgent};
use crate::domain::events::FleetEvent;
use crate::domain::repository::{AgentRepository, ConfigRepository};
use crate::infrastructure::event_bus::FleetEventBus;
use crate::infrastructure::runner_client::RunnerClient;

/// Create-or-update request, keyed by unique agent name.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct UpsertAgentRequest {
    pub name: String,
    pub base_url: String,
    pub token: String,
    #[serde(default)]
    pub default_cwd: Option<String>,
    #[serde(default)]
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

pub struct AgentRegistryService {
    agents: Arc<dyn AgentRepository>,
    configs: Arc<dyn ConfigRepository>,
    client: Arc<dyn RunnerClient>,
    bus: FleetEventBus,
}

impl AgentRegistryService {
    pub fn new(
        agents: Arc<dyn AgentRepository>,
        configs: Arc<dyn ConfigRepository>,
        client: Arc<dyn RunnerClient>,
        bus: FleetEventBus,
    ) -> Self {
        Self {
            agents,
            configs,
            client,
            bus,
        }
    }

    /// Admin listing: full registry view minus the credential.
    pub async fn list(&self) -> Result<Vec<RedactedAgent>, ServiceError> {
        let agents = self.agents.list_all().await?;
        Ok(agents.iter().map(Agent::redacted).collect())
    }

    /// Public-safe discovery listing: no credentials, no URLs.
    pub async fn catalog(&self) -> Result<Vec<AgentSummary>, ServiceError> {
        let agents = self.agents.list_all().await?;
        Ok(agents.iter().map(Agent::summary).collect())
    }

    /// Resolve an agent by UUID or by unique name.
    pub async fn resolve(&self, reference: &str) -> Result<Agent, ServiceError> {
        if let Ok(id) = AgentId::from_string(reference) {
            if let Some(agent) = self.agents.find_by_id(id).await? {
                return Ok(agent);
            }
        }
        self.agents
            .find_by_name(reference)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("agent {}", reference)))
    }

    pub async fn get(&self, reference: &str) -> Result<RedactedAgent, ServiceError> {
        Ok(self.resolve(reference).await?.redacted())
    }

    /// Create-if-absent-else-update, keyed by unique name. Registry fields
    /// only; status and last-seen survive updates untouched.
    pub async fn upsert(&self, request: UpsertAgentRequest) -> Result<RedactedAgent, ServiceError> {
        validate(&request)?;

        let now = Utc::now();
        let agent = match self.agents.find_by_name(&request.name).await? {
            Some(mut existing) => {
                existing.base_url = request.base_url;
                existing.token = request.token;
                existing.default_cwd = request.default_cwd;
                existing.group_id = request.group_id;
                existing.labels = request.labels;
                existing.updated_at = now;
                existing
            }
            None => Agent {
                id: AgentId::new(),
                name: request.name,
                base_url: request.base_url,
                token: request.token,
                default_cwd: request.default_cwd,
                group_id: request.group_id,
                labels: request.labels,
                status: AgentStatus::Offline,
                last_seen: None,
                version: None,
                created_at: now,
                updated_at: now,
            },
        };

        self.agents.save(&agent).await?;
        info!("Registered agent {} ({})", agent.name, agent.id);
        Ok(agent.redacted())
    }

    /// Self-registration performed by the agent under the registration
    /// credential. A reachability probe is attempted so a healthy agent
    /// shows up online immediately, but its failure never fails the
    /// registration; the health monitor corrects status on the next tick.
    pub async fn self_register(
        &self,
        request: UpsertAgentRequest,
    ) -> Result<RedactedAgent, ServiceError> {
        let registered = self.upsert(request).await?;
        let agent = self.resolve(&registered.id.to_string()).await?;

        match self.client.health(&agent, Duration::from_secs(2)).await {
            Ok(payload) => {
                let version = payload
                    .get("version")
                    .and_then(|v| v.as_str())
                    .map(str::to_string);
                self.agents
                    .update_probe_result(agent.id, AgentStatus::Online, Some(Utc::now()), version)
                    .await?;
            }
            Err(e) => {
                warn!(
                    "Self-registered agent {} not reachable yet: {}",
                    agent.name, e
                );
            }
        }

        self.get(&agent.id.to_string()).await
    }

    /// Idempotent removal. Cascades dependent assignments, keeps historical
    /// runs for audit, and emits `AgentRemoved` only when a row actually
    /// went away. Returns whether anything was removed.
    pub async fn remove(&self, reference: &str) -> Result<bool, ServiceError> {
        let agent = match self.resolve(reference).await {
            Ok(agent) => agent,
            Err(ServiceError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let dropped = self.configs.delete_assignments_for_agent(agent.id).await?;
        let removed = self.agents.delete(agent.id).await?;
        if removed {
            info!(
                "Removed agent {} ({}, {} assignments dropped)",
                agent.name, agent.id, dropped
            );
            self.bus.publish(FleetEvent::AgentRemoved {
                agent_id: agent.id,
                name: agent.name,
                removed_at: Utc::now(),
            });
        }
        Ok(removed)
    }
}

fn validate(request: &UpsertAgentRequest) -> Result<(), ServiceError> {
    if request.name.trim().is_empty() {
        return Err(ServiceError::BadRequest("name is required".to_string()));
    }
    if request.base_url.trim().is_empty() {
        return Err(ServiceError::BadRequest("url is required".to_string()));
    }
    if request.token.trim().is_empty() {
        return Err(ServiceError::BadRequest("token is required".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::{Assignment, ConfigScope};
    use crate::infrastructure::event_bus::recv_logging_lag;
    use crate::infrastructure::repositories::{InMemoryAgentRepository, InMemoryConfigRepository};
    use crate::infrastructure::runner_client::{
        ChunkStream, ClientError, ExecPayload, FileDownloadPayload, FileUploadPayload,
        SshExecPayload, UpdatePayload,
    };
    use async_trait::async_trait;
    use serde_json::json;

    /// Runner stub whose health probe always fails with connection refused.
    struct UnreachableRunner;

    #[async_trait]
    impl RunnerClient for UnreachableRunner {
        async fn health(
            &self,
            _agent: &Agent,
            _timeout: Duration,
        ) -> Result<serde_json::Value, ClientError> {
            Err(ClientError::Unreachable("connection refused".to_string()))
        }

        async fn exec_stream(
            &self,
            _agent: &Agent,
            _payload: ExecPayload,
        ) -> Result<ChunkStream, ClientError> {
            Err(ClientError::Unreachable("connection refused".to_string()))
        }

        async fn ssh_exec_stream(
            &self,
            _agent: &Agent,
            _payload: SshExecPayload,
        ) -> Result<ChunkStream, ClientError> {
            Err(ClientError::Unreachable("connection refused".to_string()))
        }

        async fn upload(
            &self,
            _agent: &Agent,
            _payload: FileUploadPayload,
        ) -> Result<(), ClientError> {
            Err(ClientError::Unreachable("connection refused".to_string()))
        }

        async fn download(
            &self,
            _agent: &Agent,
            _remote_path: &str,
        ) -> Result<FileDownloadPayload, ClientError> {
            Err(ClientError::Unreachable("connection refused".to_string()))
        }

        async fn trigger_update(
            &self,
            _agent: &Agent,
            _payload: UpdatePayload,
        ) -> Result<String, ClientError> {
            Err(ClientError::Unreachable("connection refused".to_string()))
        }
    }

    fn service() -> (AgentRegistryService, Arc<InMemoryConfigRepository>, FleetEventBus) {
        let configs = Arc::new(InMemoryConfigRepository::new());
        let bus = FleetEventBus::new(16);
        let service = AgentRegistryService::new(
            Arc::new(InMemoryAgentRepository::new()),
            configs.clone(),
            Arc::new(UnreachableRunner),
            bus.clone(),
        );
        (service, configs, bus)
    }

    fn upsert_request(name: &str) -> UpsertAgentRequest {
        UpsertAgentRequest {
            name: name.to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            token: "tok".to_string(),
            default_cwd: None,
            group_id: None,
            labels: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn upsert_requires_name_url_token() {
        let (service, _, _) = service();
        let mut request = upsert_request("edge-01");
        request.token = String::new();
        match service.upsert(request).await {
            Err(ServiceError::BadRequest(_)) => {}
            other => panic!("Expected BadRequest, got {:?}", other.map(|a| a.name)),
        }
    }

    #[tokio::test]
    async fn upsert_is_keyed_by_name() {
        let (service, _, _) = service();
        let first = service.upsert(upsert_request("edge-01")).await.unwrap();

        let mut changed = upsert_request("edge-01");
        changed.base_url = "http://10.0.0.9:9900".to_string();
        let second = service.upsert(changed).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.base_url, "http://10.0.0.9:9900");
        assert_eq!(service.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn self_register_succeeds_when_agent_unreachable() {
        let (service, _, _) = service();
        let registered = service.self_register(upsert_request("edge-01")).await.unwrap();
        assert_eq!(registered.status, AgentStatus::Offline);
        assert!(service.get("edge-01").await.is_ok());
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_emits_once() {
        let (service, _, bus) = service();
        let mut rx = bus.subscribe();
        service.upsert(upsert_request("edge-01")).await.unwrap();

        assert!(service.remove("edge-01").await.unwrap());
        assert!(!service.remove("edge-01").await.unwrap());

        match recv_logging_lag(&mut rx).await.unwrap() {
            FleetEvent::AgentRemoved { name, .. } => assert_eq!(name, "edge-01"),
            other => panic!("Wrong event type received: {:?}", other),
        }
        // Second remove produced nothing.
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn reregistering_same_name_does_not_resurrect_assignments() {
        let (service, configs, _) = service();
        let agent = service.upsert(upsert_request("edge-01")).await.unwrap();

        let config = configs
            .insert_next_version(ConfigScope::Agent, agent.id.0, None, json!({"a": 1}))
            .await
            .unwrap();
        configs
            .save_assignment(&Assignment {
                id: uuid::Uuid::new_v4(),
                agent_id: agent.id,
                config_id: config.id,
                effective_version: config.version,
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        service.remove("edge-01").await.unwrap();
        let reborn = service.upsert(upsert_request("edge-01")).await.unwrap();

        assert_ne!(reborn.id, agent.id);
        assert!(configs
            .latest_assignment_for_agent(reborn.id)
            .await
            .unwrap()
            .is_none());
        assert!(configs
            .latest_assignment_for_agent(agent.id)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn catalog_exposes_no_urls() {
        let (service, _, _) = service();
        service.upsert(upsert_request("edge-01")).await.unwrap();
        let catalog = service.catalog().await.unwrap();
        let json = serde_json::to_value(&catalog).unwrap();
        assert!(json[0].get("base_url").is_none());
        assert!(json[0].get("token").is_none());
    }
}
