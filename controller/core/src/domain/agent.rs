// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgentId(pub Uuid);

impl AgentId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AgentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl std::fmt::Display for GroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Liveness status as maintained by the health monitor.
///
/// `Degraded` is reserved for partial-health signals; current probe logic
/// only ever transitions between `Online` and `Offline`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Online,
    Degraded,
    Offline,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Online => "online",
            AgentStatus::Degraded => "degraded",
            AgentStatus::Offline => "offline",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "online" => AgentStatus::Online,
            "degraded" => AgentStatus::Degraded,
            _ => AgentStatus::Offline,
        }
    }
}

impl std::fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A registered runner daemon.
///
/// `token` is the per-agent bearer credential: used for outbound calls to
/// the runner and verified against inbound config pulls. It must never be
/// serialized outward; every API-facing view goes through `RedactedAgent`
/// or `AgentSummary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub name: String,
    pub base_url: String,
    pub token: String,
    pub default_cwd: Option<String>,
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub status: AgentStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Agent {
    pub fn redacted(&self) -> RedactedAgent {
        RedactedAgent {
            id: self.id,
            name: self.name.clone(),
            base_url: self.base_url.clone(),
            default_cwd: self.default_cwd.clone(),
            group_id: self.group_id,
            labels: self.labels.clone(),
            status: self.status,
            last_seen: self.last_seen,
            version: self.version.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    pub fn summary(&self) -> AgentSummary {
        AgentSummary {
            id: self.id,
            name: self.name.clone(),
            default_cwd: self.default_cwd.clone(),
            labels: self.labels.clone(),
            status: self.status,
        }
    }
}

/// Admin-facing view: everything except the credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactedAgent {
    pub id: AgentId,
    pub name: String,
    pub base_url: String,
    pub default_cwd: Option<String>,
    pub group_id: Option<GroupId>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub status: AgentStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub version: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Public-safe catalog entry for discovery UIs: no credentials, no URLs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentSummary {
    pub id: AgentId,
    pub name: String,
    pub default_cwd: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub status: AgentStatus,
}

/// Named grouping of agents. The reference from `Agent.group_id` is weak:
/// deleting a group does not delete its agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentGroup {
    pub id: GroupId,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_agent() -> Agent {
        Agent {
            id: AgentId::new(),
            name: "edge-01".to_string(),
            base_url: "http://10.0.0.7:9900".to_string(),
            token: "secret-bearer".to_string(),
            default_cwd: Some("/srv".to_string()),
            group_id: None,
            labels: HashMap::from([("region".to_string(), "eu".to_string())]),
            status: AgentStatus::Online,
            last_seen: Some(Utc::now()),
            version: Some("1.4.2".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn redacted_view_drops_token() {
        let agent = sample_agent();
        let json = serde_json::to_value(agent.redacted()).unwrap();
        assert!(json.get("token").is_none());
        assert_eq!(json["name"], "edge-01");
        assert_eq!(json["base_url"], "http://10.0.0.7:9900");
    }

    #[test]
    fn summary_drops_url_and_token() {
        let agent = sample_agent();
        let json = serde_json::to_value(agent.summary()).unwrap();
        assert!(json.get("token").is_none());
        assert!(json.get("base_url").is_none());
        assert_eq!(json["status"], "online");
    }

    #[test]
    fn status_round_trips_through_storage_strings() {
        for status in [AgentStatus::Online, AgentStatus::Degraded, AgentStatus::Offline] {
            assert_eq!(AgentStatus::parse(status.as_str()), status);
        }
        // Unknown strings degrade to offline rather than failing the row read.
        assert_eq!(AgentStatus::parse("unknown"), AgentStatus::Offline);
    }
}
