// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::agent::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UpdateId(pub Uuid);

impl UpdateId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStatus {
    Pending,
    Running,
    Ok,
    Error,
}

impl UpdateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UpdateStatus::Pending => "pending",
            UpdateStatus::Running => "running",
            UpdateStatus::Ok => "ok",
            UpdateStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "pending" => UpdateStatus::Pending,
            "running" => UpdateStatus::Running,
            "ok" => UpdateStatus::Ok,
            _ => UpdateStatus::Error,
        }
    }
}

/// Advisory record of an agent self-update request. The runner performs the
/// update on its own; this row only tracks what was asked and what came back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub id: UpdateId,
    pub agent_id: AgentId,
    pub target: String,
    pub strategy: String,
    pub status: UpdateStatus,
    pub log: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UpdateRecord {
    pub fn new(agent_id: AgentId, target: String, strategy: String) -> Self {
        let now = Utc::now();
        Self {
            id: UpdateId::new(),
            agent_id,
            target,
            strategy,
            status: UpdateStatus::Pending,
            log: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}
