// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiKeyRole {
    Reader,
    Writer,
    Admin,
}

impl ApiKeyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiKeyRole::Reader => "reader",
            ApiKeyRole::Writer => "writer",
            ApiKeyRole::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reader" => Some(ApiKeyRole::Reader),
            "writer" => Some(ApiKeyRole::Writer),
            "admin" => Some(ApiKeyRole::Admin),
            _ => None,
        }
    }
}

/// Stored API credential. Admin-tier endpoints accept an admin-role key in
/// place of the static admin secret.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    pub name: String,
    pub token: String,
    pub role: ApiKeyRole,
    pub created_at: DateTime<Utc>,
}
