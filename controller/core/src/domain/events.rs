// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::agent::{AgentId, AgentStatus};
use crate::domain::run::{RunId, RunStatus, StreamKind};
use crate::domain::update::{UpdateId, UpdateStatus};

/// Fleet-wide notifications pushed to dashboards.
///
/// Status transitions are emitted only when the newly probed status differs
/// from the stored one; `RunFinished` fires exactly once per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FleetEvent {
    AgentStatusChanged {
        agent_id: AgentId,
        name: String,
        from: AgentStatus,
        to: AgentStatus,
        changed_at: DateTime<Utc>,
    },
    AgentRemoved {
        agent_id: AgentId,
        name: String,
        removed_at: DateTime<Utc>,
    },
    RunFinished {
        run_id: RunId,
        agent_id: AgentId,
        status: RunStatus,
        exit_code: i32,
        finished_at: DateTime<Utc>,
    },
    UpdateFinished {
        update_id: UpdateId,
        agent_id: AgentId,
        status: UpdateStatus,
        finished_at: DateTime<Utc>,
    },
}

/// One live output fragment of a run, fanned out to attached observers as
/// it is appended to the run log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutputChunk {
    pub run_id: RunId,
    pub seq: i64,
    pub stream: StreamKind,
    pub data: String,
}
