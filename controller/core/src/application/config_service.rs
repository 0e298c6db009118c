// Config Resolver - scoped storage, monotonic versioning, effective view
//
// Documents are layered global -> group -> agent -> assignment; precedence
// and merge semantics live in `domain::config`. This service owns request
// validation, version allocation and the resolution read path shared by
// the admin endpoint and the agent-authenticated pull.

use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

use crate::application::ServiceError;
use crate::domain::agent::Agent;
use crate::domain::config::{
    deep_merge, Assignment, ConfigId, ConfigObject, ConfigScope, EffectiveConfig, GLOBAL_REF,
};
use crate::domain::repository::ConfigRepository;

/// Default page size for unfiltered listings.
const DEFAULT_LIST_LIMIT: i64 = 50;

#[derive(Debug, Clone, serde::Deserialize)]
pub struct CreateConfigRequest {
    pub scope: String,
    #[serde(default)]
    pub ref_id: Option<Uuid>,
    #[serde(default)]
    pub name: Option<String>,
    pub document: Value,
}

pub struct ConfigService {
    configs: Arc<dyn ConfigRepository>,
}

impl ConfigService {
    pub fn new(configs: Arc<dyn ConfigRepository>) -> Self {
        Self { configs }
    }

    /// Create a new immutable config row carrying the next version for its
    /// `(scope, ref)` pair.
    pub async fn create(&self, request: CreateConfigRequest) -> Result<ConfigObject, ServiceError> {
        let scope = ConfigScope::parse(&request.scope)
            .ok_or_else(|| ServiceError::BadRequest(format!("invalid scope: {}", request.scope)))?;

        let ref_id = match scope {
            ConfigScope::Global => GLOBAL_REF,
            ConfigScope::Group | ConfigScope::Agent => request.ref_id.ok_or_else(|| {
                ServiceError::BadRequest(format!("ref_id is required for {} scope", scope))
            })?,
        };

        let config = self
            .configs
            .insert_next_version(scope, ref_id, request.name, request.document)
            .await?;
        debug!(
            "Created config {} ({} {} v{})",
            config.id, config.scope, config.ref_id, config.version
        );
        Ok(config)
    }

    /// Newest-first listing; defaults to recent global rows when unfiltered.
    pub async fn list(
        &self,
        scope: Option<ConfigScope>,
        ref_id: Option<Uuid>,
    ) -> Result<Vec<ConfigObject>, ServiceError> {
        let (scope, ref_id) = match (scope, ref_id) {
            (None, None) => (Some(ConfigScope::Global), Some(GLOBAL_REF)),
            other => other,
        };
        Ok(self.configs.list(scope, ref_id, DEFAULT_LIST_LIMIT).await?)
    }

    /// Pin an existing config row to an agent. Earlier assignment rows stay
    /// for history; resolution only ever reads the most recent one.
    pub async fn assign(
        &self,
        agent: &Agent,
        config_id: ConfigId,
    ) -> Result<Assignment, ServiceError> {
        let config = self
            .configs
            .find_by_id(config_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("config {}", config_id)))?;

        let assignment = Assignment {
            id: Uuid::new_v4(),
            agent_id: agent.id,
            config_id: config.id,
            effective_version: config.version,
            created_at: Utc::now(),
        };
        self.configs.save_assignment(&assignment).await?;
        Ok(assignment)
    }

    /// Resolve the fully merged configuration for one agent. The version
    /// marker is opaque and minted per resolution, not content-derived.
    pub async fn effective(&self, agent: &Agent) -> Result<EffectiveConfig, ServiceError> {
        let mut document = Value::Object(serde_json::Map::new());

        if let Some(global) = self.configs.latest_for(ConfigScope::Global, GLOBAL_REF).await? {
            deep_merge(&mut document, &global.document);
        }

        if let Some(group_id) = agent.group_id {
            if let Some(group) = self
                .configs
                .latest_for(ConfigScope::Group, group_id.0)
                .await?
            {
                deep_merge(&mut document, &group.document);
            }
        }

        if let Some(own) = self
            .configs
            .latest_for(ConfigScope::Agent, agent.id.0)
            .await?
        {
            deep_merge(&mut document, &own.document);
        }

        if let Some(assignment) = self.configs.latest_assignment_for_agent(agent.id).await? {
            if let Some(pinned) = self.configs.find_by_id(assignment.config_id).await? {
                deep_merge(&mut document, &pinned.document);
            }
        }

        Ok(EffectiveConfig {
            agent_id: agent.id,
            document,
            version_marker: Uuid::new_v4(),
            resolved_at: Utc::now(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::agent::{AgentId, AgentStatus, GroupId};
    use crate::infrastructure::repositories::InMemoryConfigRepository;
    use serde_json::json;
    use std::collections::HashMap;

    fn service() -> ConfigService {
        ConfigService::new(Arc::new(InMemoryConfigRepository::new()))
    }

    fn agent_in_group(group: Option<GroupId>) -> Agent {
        Agent {
            id: AgentId::new(),
            name: "edge-01".to_string(),
            base_url: "http://127.0.0.1:1".to_string(),
            token: "tok".to_string(),
            default_cwd: None,
            group_id: group,
            labels: HashMap::new(),
            status: AgentStatus::Online,
            last_seen: None,
            version: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn create_request(scope: &str, ref_id: Option<Uuid>, document: Value) -> CreateConfigRequest {
        CreateConfigRequest {
            scope: scope.to_string(),
            ref_id,
            name: None,
            document,
        }
    }

    #[tokio::test]
    async fn create_rejects_unknown_scope_and_missing_ref() {
        let service = service();
        assert!(matches!(
            service
                .create(create_request("tenant", None, json!({})))
                .await,
            Err(ServiceError::BadRequest(_))
        ));
        assert!(matches!(
            service.create(create_request("agent", None, json!({}))).await,
            Err(ServiceError::BadRequest(_))
        ));
    }

    #[tokio::test]
    async fn versions_increment_per_scope_ref_pair() {
        let service = service();
        let ref_id = Uuid::new_v4();
        for expected in 1..=3 {
            let config = service
                .create(create_request("agent", Some(ref_id), json!({"v": expected})))
                .await
                .unwrap();
            assert_eq!(config.version, expected);
        }
        // A different pair starts back at 1.
        let other = service
            .create(create_request("global", None, json!({})))
            .await
            .unwrap();
        assert_eq!(other.version, 1);
    }

    #[tokio::test]
    async fn effective_layers_global_group_agent() {
        let service = service();
        let group_id = GroupId(Uuid::new_v4());
        let agent = agent_in_group(Some(group_id));

        service
            .create(create_request("global", None, json!({"a": 1, "b": 1})))
            .await
            .unwrap();
        service
            .create(create_request("group", Some(group_id.0), json!({"b": 2, "c": 2})))
            .await
            .unwrap();
        service
            .create(create_request("agent", Some(agent.id.0), json!({"c": 3, "d": 4})))
            .await
            .unwrap();

        let effective = service.effective(&agent).await.unwrap();
        assert_eq!(effective.document, json!({"a": 1, "b": 2, "c": 3, "d": 4}));
    }

    #[tokio::test]
    async fn assignment_is_highest_precedence_overlay() {
        let service = service();
        let agent = agent_in_group(None);

        service
            .create(create_request("global", None, json!({"mode": "default", "x": 1})))
            .await
            .unwrap();
        let pinned = service
            .create(create_request("agent", Some(agent.id.0), json!({"mode": "agent"})))
            .await
            .unwrap();
        // Later agent-scope version exists, but the assignment pins the
        // earlier row on top of everything.
        service
            .create(create_request("agent", Some(agent.id.0), json!({"mode": "newer"})))
            .await
            .unwrap();
        service.assign(&agent, pinned.id).await.unwrap();

        let effective = service.effective(&agent).await.unwrap();
        assert_eq!(effective.document["mode"], "agent");
        assert_eq!(effective.document["x"], 1);
    }

    #[tokio::test]
    async fn latest_version_wins_within_a_layer() {
        let service = service();
        let agent = agent_in_group(None);
        service
            .create(create_request("global", None, json!({"rev": 1})))
            .await
            .unwrap();
        service
            .create(create_request("global", None, json!({"rev": 2})))
            .await
            .unwrap();

        let effective = service.effective(&agent).await.unwrap();
        assert_eq!(effective.document["rev"], 2);
    }

    #[tokio::test]
    async fn resolution_markers_are_opaque_and_fresh() {
        let service = service();
        let agent = agent_in_group(None);
        let first = service.effective(&agent).await.unwrap();
        let second = service.effective(&agent).await.unwrap();
        assert_eq!(first.document, second.document);
        assert_ne!(first.version_marker, second.version_marker);
    }

    #[tokio::test]
    async fn assign_unknown_config_is_not_found() {
        let service = service();
        let agent = agent_in_group(None);
        assert!(matches!(
            service.assign(&agent, ConfigId::new()).await,
            Err(ServiceError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn unfiltered_list_defaults_to_recent_global() {
        let service = service();
        service
            .create(create_request("global", None, json!({"g": 1})))
            .await
            .unwrap();
        service
            .create(create_request("agent", Some(Uuid::new_v4()), json!({"a": 1})))
            .await
            .unwrap();

        let listed = service.list(None, None).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].scope, ConfigScope::Global);
    }
}
