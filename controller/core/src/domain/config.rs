// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Scoped Configuration Model
//!
//! Configuration documents are immutable rows versioned per `(scope, ref)`
//! pair. Resolution layers global → group → agent → assignment with a deep
//! merge: map-shaped values merge key-by-key, everything else (arrays,
//! strings, numbers, explicit null) replaces the inherited value outright.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::agent::AgentId;

/// Sentinel ref id for global-scope rows: the nil UUID.
pub const GLOBAL_REF: Uuid = Uuid::nil();

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfigId(pub Uuid);

impl ConfigId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ConfigId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConfigId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigScope {
    Global,
    Group,
    Agent,
}

impl ConfigScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigScope::Global => "global",
            ConfigScope::Group => "group",
            ConfigScope::Agent => "agent",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "global" => Some(ConfigScope::Global),
            "group" => Some(ConfigScope::Group),
            "agent" => Some(ConfigScope::Agent),
            _ => None,
        }
    }
}

impl std::fmt::Display for ConfigScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable configuration row. New versions are new rows; `version`
/// is strictly increasing per `(scope, ref_id)` starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigObject {
    pub id: ConfigId,
    pub scope: ConfigScope,
    pub ref_id: Uuid,
    pub version: i64,
    pub name: Option<String>,
    pub document: Value,
    pub created_at: DateTime<Utc>,
}

/// Pins one config row to one agent as the highest-precedence overlay.
/// The most recently created assignment for an agent wins at resolution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub config_id: ConfigId,
    pub effective_version: i64,
    pub created_at: DateTime<Utc>,
}

/// Fully merged configuration for one agent, stamped with an opaque
/// per-resolution marker (not content-derived).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EffectiveConfig {
    pub agent_id: AgentId,
    pub document: Value,
    pub version_marker: Uuid,
    pub resolved_at: DateTime<Utc>,
}

/// Merge `overlay` on top of `base` in place.
///
/// Only map-into-map positions recurse; any other overlay value (arrays
/// included) replaces the base value at that key. An explicit JSON null in
/// the overlay therefore clears whatever the base held.
pub fn deep_merge(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => {
                        base_map.insert(key.clone(), overlay_value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Layer a sequence of documents (lowest precedence first) into one.
pub fn merge_layers<'a>(layers: impl IntoIterator<Item = &'a Value>) -> Value {
    let mut merged = Value::Object(serde_json::Map::new());
    for layer in layers {
        deep_merge(&mut merged, layer);
    }
    merged
}
