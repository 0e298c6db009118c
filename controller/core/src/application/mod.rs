// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod config_service;
pub mod dispatch;
pub mod health;
pub mod registry;
pub mod updates;

use crate::domain::repository::RepositoryError;

/// Application-level failure taxonomy, mapped onto HTTP statuses by the
/// presentation layer.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Upstream agent call failed: {0}")]
    Upstream(String),

    #[error("Feature unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Storage(#[from] RepositoryError),
}
