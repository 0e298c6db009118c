// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Run Audit Records
//!
//! A `Run` is one dispatched execution, written once when it reaches a
//! terminal state. Audit rows never carry the raw command (only its SHA-256)
//! and never carry environment values (keys are kept, values redacted).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::agent::AgentId;

/// Marker substituted for every environment value in the audit record.
pub const ENV_REDACTION_MARKER: &str = "<redacted>";

/// Cap on persisted stdout/stderr heads.
pub const MAX_HEAD_BYTES: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunKind {
    Bash,
    Python,
    Ssh,
}

impl RunKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunKind::Bash => "bash",
            RunKind::Python => "python",
            RunKind::Ssh => "ssh",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bash" => Some(RunKind::Bash),
            "python" => Some(RunKind::Python),
            "ssh" => Some(RunKind::Ssh),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Ok,
    Error,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Ok => "ok",
            RunStatus::Error => "error",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "ok" => RunStatus::Ok,
            _ => RunStatus::Error,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamKind {
    Stdout,
    Stderr,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "stderr" => StreamKind::Stderr,
            _ => StreamKind::Stdout,
        }
    }
}

/// Terminal audit record for one dispatched execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub agent_id: AgentId,
    pub requested_by: String,
    pub kind: RunKind,
    pub command_hash: String,
    pub cwd: Option<String>,
    pub env_keys: HashMap<String, String>,
    pub status: RunStatus,
    pub exit_code: i32,
    pub stdout_head: String,
    pub stderr_head: String,
    pub duration_ms: i64,
    pub remote_host: Option<String>,
    pub finished_at: DateTime<Utc>,
}

/// One append-only output fragment of a run. `seq` starts at 1 and is
/// strictly increasing per run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunLogLine {
    pub run_id: RunId,
    pub seq: i64,
    pub stream: StreamKind,
    pub chunk: String,
}

/// Content-addressed record of a file pulled down from a runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunArtifact {
    pub id: Uuid,
    pub run_id: Option<RunId>,
    pub agent_id: AgentId,
    pub remote_path: String,
    pub size_bytes: i64,
    pub mime_type: String,
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// Hex SHA-256 of the submitted command or script body. The raw content is
/// never persisted.
pub fn hash_command(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

/// Keep environment keys for the audit trail, drop every value.
pub fn redact_env(env: &HashMap<String, String>) -> HashMap<String, String> {
    env.keys()
        .map(|k| (k.clone(), ENV_REDACTION_MARKER.to_string()))
        .collect()
}

/// Truncate to the persisted head cap on a char boundary.
pub fn head(text: &str) -> String {
    if text.len() <= MAX_HEAD_BYTES {
        return text.to_string();
    }
    let mut end = MAX_HEAD_BYTES;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_hash_is_stable_and_hex() {
        let a = hash_command("echo hi");
        let b = hash_command("echo hi");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_command("echo bye"));
    }

    #[test]
    fn env_redaction_keeps_keys_only() {
        let env = HashMap::from([
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("DB_PASSWORD".to_string(), "hunter2".to_string()),
        ]);
        let redacted = redact_env(&env);
        assert_eq!(redacted.len(), 2);
        assert_eq!(redacted["DB_PASSWORD"], ENV_REDACTION_MARKER);
        assert_eq!(redacted["PATH"], ENV_REDACTION_MARKER);
    }

    #[test]
    fn head_truncates_on_char_boundary() {
        let long = "é".repeat(MAX_HEAD_BYTES);
        let truncated = head(&long);
        assert!(truncated.len() <= MAX_HEAD_BYTES);
        assert!(truncated.chars().all(|c| c == 'é'));

        let short = "short output";
        assert_eq!(head(short), short);
    }

    #[test]
    fn kind_parse_matches_wire_values() {
        assert_eq!(RunKind::parse("bash"), Some(RunKind::Bash));
        assert_eq!(RunKind::parse("python"), Some(RunKind::Python));
        assert_eq!(RunKind::parse("ssh"), Some(RunKind::Ssh));
        assert_eq!(RunKind::parse("perl"), None);
    }
}
